use std::fmt;

/// Rows per chunk. Operators allocate output vectors at this capacity and the
/// scan reads at most this many records per call.
pub const DEFAULT_VECTOR_SIZE: usize = 2048;

/// Logical type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LTypeId {
    Invalid,
    Boolean,
    Integer,
    Decimal,
    Float,
    Date,
    Interval,
    Varchar,
}

/// Logical type: a tag plus optional width/scale (used by `Decimal` and
/// `Varchar`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LType {
    pub id: LTypeId,
    pub width: u8,
    pub scale: u8,
}

impl LType {
    pub const fn new(id: LTypeId) -> Self {
        Self {
            id,
            width: 0,
            scale: 0,
        }
    }

    pub const fn invalid() -> Self {
        Self::new(LTypeId::Invalid)
    }

    pub const fn boolean() -> Self {
        Self::new(LTypeId::Boolean)
    }

    pub const fn integer() -> Self {
        Self::new(LTypeId::Integer)
    }

    pub const fn float() -> Self {
        Self::new(LTypeId::Float)
    }

    pub const fn date() -> Self {
        Self::new(LTypeId::Date)
    }

    pub const fn interval() -> Self {
        Self::new(LTypeId::Interval)
    }

    pub const fn decimal(width: u8, scale: u8) -> Self {
        Self {
            id: LTypeId::Decimal,
            width,
            scale,
        }
    }

    pub const fn varchar(width: u8) -> Self {
        Self {
            id: LTypeId::Varchar,
            width,
            scale: 0,
        }
    }

    #[inline]
    pub fn is_invalid(&self) -> bool {
        self.id == LTypeId::Invalid
    }

    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self.id,
            LTypeId::Integer | LTypeId::Decimal | LTypeId::Float
        )
    }
}

impl fmt::Display for LType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            LTypeId::Invalid => write!(f, "invalid"),
            LTypeId::Boolean => write!(f, "boolean"),
            LTypeId::Integer => write!(f, "integer"),
            LTypeId::Decimal => write!(f, "decimal({},{})", self.width, self.scale),
            LTypeId::Float => write!(f, "float"),
            LTypeId::Date => write!(f, "date"),
            LTypeId::Interval => write!(f, "interval"),
            LTypeId::Varchar => write!(f, "varchar"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_width_and_scale() {
        assert_eq!(LType::decimal(15, 2).to_string(), "decimal(15,2)");
        assert_eq!(LType::integer().to_string(), "integer");
    }

    #[test]
    fn numeric_classification() {
        assert!(LType::integer().is_numeric());
        assert!(LType::decimal(15, 2).is_numeric());
        assert!(LType::float().is_numeric());
        assert!(!LType::varchar(25).is_numeric());
        assert!(!LType::date().is_numeric());
    }
}
