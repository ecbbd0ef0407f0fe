use quiver_expr::Expr;
use quiver_result::{Error, Result};
use quiver_types::LType;
use rustc_hash::FxHashMap;

/// What kind of relation a binding exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingType {
    Table,
    Subquery,
    Dummy,
    CatalogEntry,
}

/// A named relation visible to name resolution inside one scope: parallel
/// column name/type arrays, a name→index map, and the unique relation tag of
/// the producing operator.
#[derive(Debug, Clone)]
pub struct Binding {
    pub typ: BindingType,
    pub database: String,
    pub alias: String,
    pub index: u64,
    pub types: Vec<LType>,
    pub names: Vec<String>,
    pub name_map: FxHashMap<String, usize>,
}

impl Binding {
    pub fn new(
        typ: BindingType,
        database: &str,
        alias: &str,
        index: u64,
        types: Vec<LType>,
        names: Vec<String>,
    ) -> Self {
        let mut name_map = FxHashMap::default();
        for (idx, name) in names.iter().enumerate() {
            name_map.insert(name.clone(), idx);
        }
        Self {
            typ,
            database: database.to_string(),
            alias: alias.to_string(),
            index,
            types,
            names,
            name_map,
        }
    }

    /// Position of `column` inside this binding, if present.
    pub fn has_column(&self, column: &str) -> Option<usize> {
        self.name_map.get(column).copied()
    }

    /// Produce a bound column reference into this binding.
    pub fn bind_column(&self, column: &str, depth: usize) -> Result<Expr> {
        let idx = self.has_column(column).ok_or_else(|| {
            Error::invalid(format!(
                "table {} does not have column {column}",
                self.alias
            ))
        })?;
        Ok(Expr::column(
            &self.alias,
            column,
            (self.index, idx),
            depth,
            self.types[idx],
        ))
    }
}

/// One name-resolution scope: alias → binding with an explicit insertion
/// order. Insertion order matters for wildcard expansion and for the
/// `count(*)` column-0 rewrite; nothing else may rely on map iteration order.
#[derive(Debug, Default)]
pub struct BindContext {
    bindings: Vec<Binding>,
    by_alias: FxHashMap<String, usize>,
}

impl BindContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// All bindings in insertion order.
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn add_binding(&mut self, binding: Binding) -> Result<()> {
        if self.by_alias.contains_key(&binding.alias) {
            return Err(Error::invalid(format!("duplicate alias {}", binding.alias)));
        }
        self.by_alias
            .insert(binding.alias.clone(), self.bindings.len());
        self.bindings.push(binding);
        Ok(())
    }

    /// Merge another scope into this one, preserving insertion order.
    pub fn add_context(&mut self, other: BindContext) -> Result<()> {
        for binding in other.bindings {
            self.add_binding(binding)?;
        }
        Ok(())
    }

    pub fn get_binding(&self, alias: &str) -> Option<&Binding> {
        self.by_alias.get(alias).map(|idx| &self.bindings[*idx])
    }

    /// Find the unique binding containing `column` in this scope alone.
    fn match_in_scope(&self, column: &str) -> Result<Option<&Binding>> {
        let mut found: Option<&Binding> = None;
        for binding in &self.bindings {
            if binding.has_column(column).is_some() {
                if let Some(prev) = found {
                    return Err(Error::invalid(format!(
                        "ambiguous column {column} in {} or {}",
                        prev.alias, binding.alias
                    )));
                }
                found = Some(binding);
            }
        }
        Ok(found)
    }
}

/// Parent-scope chain for correlated binding: each hop adds one to the depth
/// of columns resolved through it.
#[derive(Clone, Copy)]
pub struct OuterScope<'a> {
    pub ctx: &'a BindContext,
    pub parent: Option<&'a OuterScope<'a>>,
}

/// Resolve `(table, column)` against a scope and its parent chain.
///
/// Qualified references look the alias up level by level; unqualified
/// references must match exactly one binding per level, otherwise the lookup
/// is ambiguous. The returned depth counts parent hops (zero = local).
pub fn resolve_column<'a>(
    ctx: &'a BindContext,
    outer: Option<&OuterScope<'a>>,
    table: Option<&str>,
    column: &str,
) -> Result<(&'a Binding, usize)> {
    let mut depth = 0usize;
    let mut current: Option<(&BindContext, Option<&OuterScope>)> = Some((ctx, outer));
    while let Some((scope, parent)) = current {
        match table {
            Some(alias) => {
                if let Some(binding) = scope.get_binding(alias) {
                    if binding.has_column(column).is_some() {
                        return Ok((binding, depth));
                    }
                    return Err(Error::invalid(format!(
                        "table {alias} does not have column {column}"
                    )));
                }
            }
            None => {
                if let Some(binding) = scope.match_in_scope(column)? {
                    return Ok((binding, depth));
                }
            }
        }
        depth += 1;
        current = parent.map(|p| (p.ctx, p.parent));
    }
    match table {
        Some(alias) => Err(Error::invalid(format!("table {alias} does not exist"))),
        None => Err(Error::invalid(format!("no table has column {column}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(alias: &str, index: u64, columns: &[&str]) -> Binding {
        Binding::new(
            BindingType::Table,
            "tpch",
            alias,
            index,
            columns.iter().map(|_| LType::integer()).collect(),
            columns.iter().map(|c| c.to_string()).collect(),
        )
    }

    #[test]
    fn duplicate_alias_is_rejected() {
        let mut ctx = BindContext::new();
        ctx.add_binding(binding("n", 1, &["n_nationkey"])).unwrap();
        let err = ctx.add_binding(binding("n", 2, &["x"])).unwrap_err();
        assert!(err.to_string().contains("duplicate alias"));
    }

    #[test]
    fn unqualified_ambiguity_is_reported() {
        let mut ctx = BindContext::new();
        ctx.add_binding(binding("a", 1, &["key", "a_val"])).unwrap();
        ctx.add_binding(binding("b", 2, &["key", "b_val"])).unwrap();
        let err = resolve_column(&ctx, None, None, "key").unwrap_err();
        assert!(err.to_string().contains("ambiguous column key"));
        let (bind, depth) = resolve_column(&ctx, None, None, "b_val").unwrap();
        assert_eq!(bind.index, 2);
        assert_eq!(depth, 0);
    }

    #[test]
    fn parent_hops_count_depth() {
        let mut outer_ctx = BindContext::new();
        outer_ctx
            .add_binding(binding("n", 1, &["n_name", "n_regionkey"]))
            .unwrap();
        let mut inner_ctx = BindContext::new();
        inner_ctx
            .add_binding(binding("r", 2, &["r_regionkey", "r_name"]))
            .unwrap();
        let outer = OuterScope {
            ctx: &outer_ctx,
            parent: None,
        };
        let (bind, depth) = resolve_column(&inner_ctx, Some(&outer), None, "n_name").unwrap();
        assert_eq!(bind.index, 1);
        assert_eq!(depth, 1);
        let (bind, depth) =
            resolve_column(&inner_ctx, Some(&outer), Some("r"), "r_name").unwrap();
        assert_eq!(bind.index, 2);
        assert_eq!(depth, 0);
    }

    #[test]
    fn missing_column_names_the_failure() {
        let mut ctx = BindContext::new();
        ctx.add_binding(binding("n", 1, &["n_name"])).unwrap();
        let err = resolve_column(&ctx, None, None, "n_nam").unwrap_err();
        assert_eq!(err.to_string(), "invalid argument: no table has column n_nam");
    }
}
