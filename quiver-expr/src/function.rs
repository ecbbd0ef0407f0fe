use std::fmt;
use std::sync::OnceLock;

use quiver_result::{Error, Result};
use quiver_types::{LType, LTypeId};
use rustc_hash::FxHashMap;

/// Named functions known to the engine. Scalar and aggregate implementations
/// are dispatched on this id by the executor and the aggregation operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuncId {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    DateAdd,
}

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FuncId::Count => "count",
            FuncId::Sum => "sum",
            FuncId::Min => "min",
            FuncId::Max => "max",
            FuncId::Avg => "avg",
            FuncId::DateAdd => "date_add",
        };
        write!(f, "{s}")
    }
}

/// Name-to-id map plus per-function argument/return-type deciders.
pub struct FunctionRegistry {
    names: FxHashMap<&'static str, FuncId>,
}

impl FunctionRegistry {
    fn build() -> Self {
        let mut names = FxHashMap::default();
        names.insert("count", FuncId::Count);
        names.insert("sum", FuncId::Sum);
        names.insert("min", FuncId::Min);
        names.insert("max", FuncId::Max);
        names.insert("avg", FuncId::Avg);
        names.insert("date_add", FuncId::DateAdd);
        Self { names }
    }

    /// Resolve a function name, case-insensitively.
    pub fn resolve(&self, name: &str) -> Result<FuncId> {
        let lower = name.to_ascii_lowercase();
        self.names
            .get(lower.as_str())
            .copied()
            .ok_or_else(|| Error::invalid(format!("unknown function {name}")))
    }

    /// True when the id names an aggregate.
    pub fn is_aggregate(&self, id: FuncId) -> bool {
        matches!(
            id,
            FuncId::Count | FuncId::Sum | FuncId::Min | FuncId::Max | FuncId::Avg
        )
    }

    /// Decide the return type from the argument types.
    pub fn return_type(&self, id: FuncId, args: &[LType]) -> Result<LType> {
        match id {
            FuncId::Count => Ok(LType::integer()),
            FuncId::Sum => {
                let arg = first_arg(id, args)?;
                match arg.id {
                    LTypeId::Integer => Ok(LType::integer()),
                    LTypeId::Decimal => Ok(LType::decimal(18, arg.scale)),
                    LTypeId::Float => Ok(LType::float()),
                    other => Err(Error::invalid(format!("sum over {other:?} argument"))),
                }
            }
            FuncId::Avg => {
                let arg = first_arg(id, args)?;
                if !arg.is_numeric() {
                    return Err(Error::invalid(format!("avg over {} argument", arg)));
                }
                Ok(LType::float())
            }
            FuncId::Min | FuncId::Max => first_arg(id, args),
            FuncId::DateAdd => Ok(LType::date()),
        }
    }
}

fn first_arg(id: FuncId, args: &[LType]) -> Result<LType> {
    args.first()
        .copied()
        .ok_or_else(|| Error::invalid(format!("{id} requires an argument")))
}

/// Process-wide registry, initialized once.
pub fn registry() -> &'static FunctionRegistry {
    static REGISTRY: OnceLock<FunctionRegistry> = OnceLock::new();
    REGISTRY.get_or_init(FunctionRegistry::build)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_case_insensitively() {
        assert_eq!(registry().resolve("COUNT").unwrap(), FuncId::Count);
        assert_eq!(registry().resolve("sum").unwrap(), FuncId::Sum);
        assert!(registry().resolve("median").is_err());
    }

    #[test]
    fn aggregate_classification() {
        for id in [FuncId::Count, FuncId::Sum, FuncId::Min, FuncId::Max, FuncId::Avg] {
            assert!(registry().is_aggregate(id));
        }
        assert!(!registry().is_aggregate(FuncId::DateAdd));
    }

    #[test]
    fn sum_keeps_decimal_scale() {
        let out = registry()
            .return_type(FuncId::Sum, &[LType::decimal(15, 2)])
            .unwrap();
        assert_eq!(out.id, LTypeId::Decimal);
        assert_eq!(out.scale, 2);
        assert_eq!(
            registry().return_type(FuncId::Sum, &[LType::integer()]).unwrap(),
            LType::integer()
        );
        assert!(registry()
            .return_type(FuncId::Sum, &[LType::varchar(10)])
            .is_err());
    }
}
