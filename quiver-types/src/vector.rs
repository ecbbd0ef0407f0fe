use std::borrow::Cow;
use std::sync::Arc;

use quiver_result::{Error, Result};

use crate::chunk::SelectVector;
use crate::types::{LType, LTypeId};
use crate::value::{DateValue, IntervalValue, Value};

/// Typed storage behind a flat vector.
#[derive(Debug, Clone)]
pub enum VectorBuffer {
    Boolean(Vec<bool>),
    Integer(Vec<i64>),
    Float(Vec<f64>),
    Decimal(Vec<i64>),
    Date(Vec<DateValue>),
    Interval(Vec<IntervalValue>),
    Varchar(Vec<String>),
}

impl VectorBuffer {
    fn for_type(ltype: LType) -> Result<Self> {
        Ok(match ltype.id {
            LTypeId::Boolean => VectorBuffer::Boolean(Vec::new()),
            LTypeId::Integer => VectorBuffer::Integer(Vec::new()),
            LTypeId::Float => VectorBuffer::Float(Vec::new()),
            LTypeId::Decimal => VectorBuffer::Decimal(Vec::new()),
            LTypeId::Date => VectorBuffer::Date(Vec::new()),
            LTypeId::Interval => VectorBuffer::Interval(Vec::new()),
            LTypeId::Varchar => VectorBuffer::Varchar(Vec::new()),
            LTypeId::Invalid => {
                return Err(Error::internal("cannot allocate a vector of invalid type"))
            }
        })
    }

    fn len(&self) -> usize {
        match self {
            VectorBuffer::Boolean(v) => v.len(),
            VectorBuffer::Integer(v) => v.len(),
            VectorBuffer::Float(v) => v.len(),
            VectorBuffer::Decimal(v) => v.len(),
            VectorBuffer::Date(v) => v.len(),
            VectorBuffer::Interval(v) => v.len(),
            VectorBuffer::Varchar(v) => v.len(),
        }
    }

    fn push_default(&mut self) {
        match self {
            VectorBuffer::Boolean(v) => v.push(false),
            VectorBuffer::Integer(v) => v.push(0),
            VectorBuffer::Float(v) => v.push(0.0),
            VectorBuffer::Decimal(v) => v.push(0),
            VectorBuffer::Date(v) => v.push(DateValue::new(1970, 1, 1)),
            VectorBuffer::Interval(v) => v.push(IntervalValue {
                count: 0,
                unit: crate::value::IntervalUnit::Day,
            }),
            VectorBuffer::Varchar(v) => v.push(String::new()),
        }
    }
}

/// Flat vector: one typed buffer plus a validity mask (`true` = valid).
#[derive(Debug, Clone)]
pub struct FlatVector {
    ltype: LType,
    data: VectorBuffer,
    validity: Vec<bool>,
}

impl FlatVector {
    pub fn new(ltype: LType) -> Result<Self> {
        Ok(Self {
            ltype,
            data: VectorBuffer::for_type(ltype)?,
            validity: Vec::new(),
        })
    }

    /// Allocate `len` default-valued, all-NULL slots, for column-wise fills.
    pub fn with_len(ltype: LType, len: usize) -> Result<Self> {
        let mut v = Self::new(ltype)?;
        for _ in 0..len {
            v.data.push_default();
            v.validity.push(false);
        }
        Ok(v)
    }

    #[inline]
    pub fn ltype(&self) -> LType {
        self.ltype
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.validity.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.validity.is_empty()
    }

    #[inline]
    pub fn is_valid(&self, row: usize) -> bool {
        self.validity[row]
    }

    #[inline]
    pub fn buffer(&self) -> &VectorBuffer {
        &self.data
    }

    pub fn push_null(&mut self) {
        self.data.push_default();
        self.validity.push(false);
    }

    /// Append a value, coercing NULL into an invalid slot.
    pub fn push_value(&mut self, value: &Value) -> Result<()> {
        if value.is_null() {
            self.push_null();
            return Ok(());
        }
        self.data.push_default();
        self.validity.push(true);
        let row = self.validity.len() - 1;
        self.store(row, value)
    }

    /// Overwrite a pre-allocated slot.
    pub fn set_value(&mut self, row: usize, value: &Value) -> Result<()> {
        if row >= self.validity.len() {
            return Err(Error::internal(format!(
                "vector write out of bounds: {row} >= {}",
                self.validity.len()
            )));
        }
        if value.is_null() {
            self.validity[row] = false;
            return Ok(());
        }
        self.validity[row] = true;
        self.store(row, value)
    }

    fn store(&mut self, row: usize, value: &Value) -> Result<()> {
        match (&mut self.data, value) {
            (VectorBuffer::Boolean(buf), Value::Boolean(v)) => buf[row] = *v,
            (VectorBuffer::Integer(buf), Value::Integer(v)) => buf[row] = *v,
            (VectorBuffer::Float(buf), Value::Float(v)) => buf[row] = *v,
            (VectorBuffer::Float(buf), Value::Integer(v)) => buf[row] = *v as f64,
            (VectorBuffer::Decimal(buf), Value::Decimal { value: v, .. }) => buf[row] = *v,
            (VectorBuffer::Date(buf), Value::Date(v)) => buf[row] = *v,
            (VectorBuffer::Interval(buf), Value::Interval(v)) => buf[row] = *v,
            (VectorBuffer::Varchar(buf), Value::Varchar(v)) => buf[row] = v.clone(),
            (_, value) => {
                return Err(Error::internal(format!(
                    "value {value:?} does not fit a {} vector",
                    self.ltype
                )))
            }
        }
        Ok(())
    }

    pub fn value(&self, row: usize) -> Value {
        if !self.validity[row] {
            return Value::Null;
        }
        match &self.data {
            VectorBuffer::Boolean(buf) => Value::Boolean(buf[row]),
            VectorBuffer::Integer(buf) => Value::Integer(buf[row]),
            VectorBuffer::Float(buf) => Value::Float(buf[row]),
            VectorBuffer::Decimal(buf) => Value::Decimal {
                value: buf[row],
                scale: self.ltype.scale,
            },
            VectorBuffer::Date(buf) => Value::Date(buf[row]),
            VectorBuffer::Interval(buf) => Value::Interval(buf[row]),
            VectorBuffer::Varchar(buf) => Value::Varchar(buf[row].clone()),
        }
    }
}

/// A column of values of one logical type.
///
/// Flat vectors own their buffer. Constant vectors repeat one value for the
/// enclosing chunk's cardinality. Dictionary vectors remap rows of an
/// `Arc`-shared base vector through a selection vector, which is how chunk
/// slicing stays zero-copy.
#[derive(Debug, Clone)]
pub enum Vector {
    Flat(FlatVector),
    Constant { ltype: LType, value: Value },
    Dictionary { sel: SelectVector, base: Arc<Vector> },
}

impl Vector {
    pub fn constant(ltype: LType, value: Value) -> Self {
        Vector::Constant { ltype, value }
    }

    /// Build a dictionary view over `base` without copying buffers.
    pub fn dictionary(base: Arc<Vector>, sel: SelectVector) -> Self {
        Vector::Dictionary { sel, base }
    }

    pub fn ltype(&self) -> LType {
        match self {
            Vector::Flat(flat) => flat.ltype(),
            Vector::Constant { ltype, .. } => *ltype,
            Vector::Dictionary { base, .. } => base.ltype(),
        }
    }

    /// Resolve a row through the representation.
    pub fn value(&self, row: usize) -> Value {
        match self {
            Vector::Flat(flat) => flat.value(row),
            Vector::Constant { value, .. } => value.clone(),
            Vector::Dictionary { sel, base } => base.value(sel.index(row)),
        }
    }

    /// Materialize the first `count` rows as a flat vector. Flat inputs are
    /// borrowed; constant and dictionary inputs are gathered.
    pub fn flatten(&self, count: usize) -> Result<Cow<'_, FlatVector>> {
        match self {
            Vector::Flat(flat) => Ok(Cow::Borrowed(flat)),
            _ => {
                let mut out = FlatVector::new(self.ltype())?;
                for row in 0..count {
                    out.push_value(&self.value(row))?;
                }
                Ok(Cow::Owned(out))
            }
        }
    }
}

impl From<FlatVector> for Vector {
    fn from(flat: FlatVector) -> Self {
        Vector::Flat(flat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_vector_round_trips_values() {
        let mut v = FlatVector::new(LType::integer()).unwrap();
        v.push_value(&Value::Integer(7)).unwrap();
        v.push_null();
        v.push_value(&Value::Integer(-3)).unwrap();
        assert_eq!(v.value(0), Value::Integer(7));
        assert_eq!(v.value(1), Value::Null);
        assert_eq!(v.value(2), Value::Integer(-3));
    }

    #[test]
    fn dictionary_remaps_without_copy() {
        let mut flat = FlatVector::new(LType::varchar(8)).unwrap();
        for name in ["ALGERIA", "BRAZIL", "CANADA"] {
            flat.push_value(&Value::Varchar(name.into())).unwrap();
        }
        let base = Arc::new(Vector::Flat(flat));
        let sel = SelectVector::from_indices(vec![2, 0]);
        let dict = Vector::dictionary(Arc::clone(&base), sel);
        assert_eq!(dict.value(0), Value::Varchar("CANADA".into()));
        assert_eq!(dict.value(1), Value::Varchar("ALGERIA".into()));
        let flat = dict.flatten(2).unwrap();
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn type_mismatch_is_internal_error() {
        let mut v = FlatVector::new(LType::integer()).unwrap();
        let err = v.push_value(&Value::Varchar("x".into())).unwrap_err();
        assert!(err.is_internal());
    }
}
