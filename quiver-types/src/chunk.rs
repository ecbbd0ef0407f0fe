use std::sync::Arc;

use quiver_result::{Error, Result};

use crate::types::LType;
use crate::value::Value;
use crate::vector::Vector;

/// Dense list of selected row indices into a chunk. Preserves physical row
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectVector {
    indices: Vec<usize>,
}

impl SelectVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            indices: Vec::with_capacity(capacity),
        }
    }

    pub fn from_indices(indices: Vec<usize>) -> Self {
        Self { indices }
    }

    #[inline]
    pub fn push(&mut self, row: usize) {
        self.indices.push(row);
    }

    #[inline]
    pub fn index(&self, position: usize) -> usize {
        self.indices[position]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn clear(&mut self) {
        self.indices.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.indices.iter().copied()
    }
}

/// A batch of up to [`crate::DEFAULT_VECTOR_SIZE`](crate::DEFAULT_VECTOR_SIZE)
/// rows, columnar. Columns are `Arc`-shared so a chunk can reference another
/// chunk's vectors (zero-copy projection) or remap them through a selection
/// vector (filtering) without copying buffers.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    columns: Vec<Arc<Vector>>,
    count: usize,
}

impl Chunk {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Assemble a chunk from freshly built vectors.
    pub fn from_vectors(vectors: Vec<Vector>, count: usize) -> Self {
        Self {
            columns: vectors.into_iter().map(Arc::new).collect(),
            count,
        }
    }

    /// Assemble a chunk from shared vectors without copying.
    pub fn from_arcs(columns: Vec<Arc<Vector>>, count: usize) -> Self {
        Self { columns, count }
    }

    /// Cardinality: the logical row count of every column.
    #[inline]
    pub fn card(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> &Arc<Vector> {
        &self.columns[index]
    }

    pub fn types(&self) -> Vec<LType> {
        self.columns.iter().map(|c| c.ltype()).collect()
    }

    pub fn value(&self, column: usize, row: usize) -> Value {
        self.columns[column].value(row)
    }

    pub fn reset(&mut self) {
        self.columns.clear();
        self.count = 0;
    }

    /// Zero-copy projection: pick `indices` columns of `input` by reference.
    pub fn reference_indices(input: &Chunk, indices: &[usize]) -> Result<Chunk> {
        let mut columns = Vec::with_capacity(indices.len());
        for &idx in indices {
            if idx >= input.columns.len() {
                return Err(Error::internal(format!(
                    "column reference {idx} out of range ({} columns)",
                    input.columns.len()
                )));
            }
            columns.push(Arc::clone(&input.columns[idx]));
        }
        Ok(Chunk {
            columns,
            count: input.count,
        })
    }

    /// Filtered projection: pick `indices` columns of `input` restricted to
    /// the first `count` rows of `sel`, as dictionary vectors over the shared
    /// bases.
    pub fn slice_indices(
        input: &Chunk,
        sel: &SelectVector,
        count: usize,
        indices: &[usize],
    ) -> Result<Chunk> {
        let rows = SelectVector::from_indices(sel.iter().take(count).collect());
        let mut columns = Vec::with_capacity(indices.len());
        for &idx in indices {
            if idx >= input.columns.len() {
                return Err(Error::internal(format!(
                    "column reference {idx} out of range ({} columns)",
                    input.columns.len()
                )));
            }
            columns.push(Arc::new(Vector::dictionary(
                Arc::clone(&input.columns[idx]),
                rows.clone(),
            )));
        }
        Ok(Chunk {
            columns,
            count: rows.len(),
        })
    }

    /// Row values in column order, for scalar consumers (sort payloads, join
    /// keys, result printing).
    pub fn row(&self, row: usize) -> Vec<Value> {
        self.columns.iter().map(|c| c.value(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::FlatVector;

    fn int_chunk(values: &[&[i64]]) -> Chunk {
        let count = values[0].len();
        let vectors = values
            .iter()
            .map(|col| {
                let mut v = FlatVector::new(LType::integer()).unwrap();
                for x in col.iter() {
                    v.push_value(&Value::Integer(*x)).unwrap();
                }
                Vector::Flat(v)
            })
            .collect();
        Chunk::from_vectors(vectors, count)
    }

    #[test]
    fn reference_shares_columns() {
        let input = int_chunk(&[&[1, 2, 3], &[10, 20, 30]]);
        let out = Chunk::reference_indices(&input, &[1]).unwrap();
        assert_eq!(out.card(), 3);
        assert_eq!(out.column_count(), 1);
        assert_eq!(out.value(0, 2), Value::Integer(30));
        assert!(Arc::ptr_eq(out.column(0), input.column(1)));
    }

    #[test]
    fn slice_applies_selection_in_order() {
        let input = int_chunk(&[&[1, 2, 3, 4]]);
        let mut sel = SelectVector::new();
        sel.push(0);
        sel.push(2);
        sel.push(3);
        let out = Chunk::slice_indices(&input, &sel, 2, &[0]).unwrap();
        assert_eq!(out.card(), 2);
        assert_eq!(out.value(0, 0), Value::Integer(1));
        assert_eq!(out.value(0, 1), Value::Integer(3));
    }

    #[test]
    fn out_of_range_reference_fails() {
        let input = int_chunk(&[&[1]]);
        assert!(Chunk::reference_indices(&input, &[3]).is_err());
    }
}
