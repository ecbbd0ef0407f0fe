//! Read-only catalog of the TPC-H tables.
//!
//! The catalog is process-wide and initialized once; after construction it is
//! immutable. The engine hard-codes the `tpch` database.

use std::sync::OnceLock;

use quiver_result::{Error, Result};
use quiver_types::LType;
use rustc_hash::FxHashMap;

/// The single database the engine serves.
pub const TPCH_DATABASE: &str = "tpch";

/// Schema of one table: parallel column name/type arrays plus a name→index
/// map.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<String>,
    pub types: Vec<LType>,
    pub column_index: FxHashMap<String, usize>,
}

impl TableDef {
    fn new(name: &str, columns: Vec<(&str, LType)>) -> Self {
        let mut names = Vec::with_capacity(columns.len());
        let mut types = Vec::with_capacity(columns.len());
        let mut column_index = FxHashMap::default();
        for (idx, (col, typ)) in columns.into_iter().enumerate() {
            names.push(col.to_string());
            types.push(typ);
            column_index.insert(col.to_string(), idx);
        }
        Self {
            name: name.to_string(),
            columns: names,
            types,
            column_index,
        }
    }

    /// Position of a column, if the table has it.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.column_index.get(name).copied()
    }
}

/// Database → table → schema map.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: FxHashMap<String, FxHashMap<String, TableDef>>,
}

impl Catalog {
    fn insert(&mut self, database: &str, table: TableDef) {
        self.tables
            .entry(database.to_string())
            .or_default()
            .insert(table.name.clone(), table);
    }

    /// Look up a table schema.
    pub fn table(&self, database: &str, name: &str) -> Result<&TableDef> {
        self.tables
            .get(database)
            .and_then(|db| db.get(name))
            .ok_or_else(|| Error::Catalog(format!("table {database}.{name} does not exist")))
    }
}

/// The TPC-H catalog, built on first use.
pub fn tpch_catalog() -> &'static Catalog {
    static CATALOG: OnceLock<Catalog> = OnceLock::new();
    CATALOG.get_or_init(build_tpch)
}

fn build_tpch() -> Catalog {
    let int = LType::integer();
    let date = LType::date();
    let money = LType::decimal(15, 2);

    let mut catalog = Catalog::default();
    catalog.insert(
        TPCH_DATABASE,
        TableDef::new(
            "region",
            vec![
                ("r_regionkey", int),
                ("r_name", LType::varchar(25)),
                ("r_comment", LType::varchar(152)),
            ],
        ),
    );
    catalog.insert(
        TPCH_DATABASE,
        TableDef::new(
            "nation",
            vec![
                ("n_nationkey", int),
                ("n_name", LType::varchar(25)),
                ("n_regionkey", int),
                ("n_comment", LType::varchar(152)),
            ],
        ),
    );
    catalog.insert(
        TPCH_DATABASE,
        TableDef::new(
            "part",
            vec![
                ("p_partkey", int),
                ("p_name", LType::varchar(55)),
                ("p_mfgr", LType::varchar(25)),
                ("p_brand", LType::varchar(10)),
                ("p_type", LType::varchar(25)),
                ("p_size", int),
                ("p_container", LType::varchar(10)),
                ("p_retailprice", money),
                ("p_comment", LType::varchar(23)),
            ],
        ),
    );
    catalog.insert(
        TPCH_DATABASE,
        TableDef::new(
            "supplier",
            vec![
                ("s_suppkey", int),
                ("s_name", LType::varchar(25)),
                ("s_address", LType::varchar(40)),
                ("s_nationkey", int),
                ("s_phone", LType::varchar(15)),
                ("s_acctbal", money),
                ("s_comment", LType::varchar(101)),
            ],
        ),
    );
    catalog.insert(
        TPCH_DATABASE,
        TableDef::new(
            "partsupp",
            vec![
                ("ps_partkey", int),
                ("ps_suppkey", int),
                ("ps_availqty", int),
                ("ps_supplycost", money),
                ("ps_comment", LType::varchar(199)),
            ],
        ),
    );
    catalog.insert(
        TPCH_DATABASE,
        TableDef::new(
            "customer",
            vec![
                ("c_custkey", int),
                ("c_name", LType::varchar(25)),
                ("c_address", LType::varchar(40)),
                ("c_nationkey", int),
                ("c_phone", LType::varchar(15)),
                ("c_acctbal", money),
                ("c_mktsegment", LType::varchar(10)),
                ("c_comment", LType::varchar(117)),
            ],
        ),
    );
    catalog.insert(
        TPCH_DATABASE,
        TableDef::new(
            "orders",
            vec![
                ("o_orderkey", int),
                ("o_custkey", int),
                ("o_orderstatus", LType::varchar(1)),
                ("o_totalprice", money),
                ("o_orderdate", date),
                ("o_orderpriority", LType::varchar(15)),
                ("o_clerk", LType::varchar(15)),
                ("o_shippriority", int),
                ("o_comment", LType::varchar(79)),
            ],
        ),
    );
    catalog.insert(
        TPCH_DATABASE,
        TableDef::new(
            "lineitem",
            vec![
                ("l_orderkey", int),
                ("l_partkey", int),
                ("l_suppkey", int),
                ("l_linenumber", int),
                ("l_quantity", money),
                ("l_extendedprice", money),
                ("l_discount", money),
                ("l_tax", money),
                ("l_returnflag", LType::varchar(1)),
                ("l_linestatus", LType::varchar(1)),
                ("l_shipdate", date),
                ("l_commitdate", date),
                ("l_receiptdate", date),
                ("l_shipinstruct", LType::varchar(25)),
                ("l_shipmode", LType::varchar(10)),
                ("l_comment", LType::varchar(44)),
            ],
        ),
    );
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiver_types::LTypeId;

    #[test]
    fn looks_up_tables_and_columns() {
        let nation = tpch_catalog().table(TPCH_DATABASE, "nation").unwrap();
        assert_eq!(nation.columns.len(), 4);
        assert_eq!(nation.column("n_regionkey"), Some(2));
        assert_eq!(nation.types[1].id, LTypeId::Varchar);

        let lineitem = tpch_catalog().table(TPCH_DATABASE, "lineitem").unwrap();
        assert_eq!(lineitem.columns.len(), 16);
        assert_eq!(lineitem.types[10].id, LTypeId::Date);
        assert_eq!(lineitem.types[5], LType::decimal(15, 2));
    }

    #[test]
    fn unknown_table_is_a_catalog_error() {
        let err = tpch_catalog().table(TPCH_DATABASE, "warehouse").unwrap_err();
        assert!(matches!(err, Error::Catalog(_)));
    }
}
