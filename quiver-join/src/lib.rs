//! Hash join: a chained hash table over the build side plus a probe cursor
//! that walks matched-row chains in chunk-sized batches.
//!
//! Key equality follows SQL: NULL keys never match. Build rows with a NULL
//! key are skipped outright; probe rows with a NULL key only surface through
//! the LEFT-outer unmatched pass. A join with no keys degenerates into the
//! cross product.

use quiver_result::{Error, Result};
use quiver_types::{Chunk, DateValue, FlatVector, LType, Value, Vector};
use rustc_hash::FxHashMap;

/// Join flavor the scan cursor honors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Cross,
}

/// One join-key value, normalized for hashing. Floats hash by bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyValue {
    Boolean(bool),
    Integer(i64),
    Float(u64),
    Decimal { value: i64, scale: u8 },
    Date(DateValue),
    Varchar(String),
}

fn key_row(keys: &Chunk, row: usize) -> Result<Option<Vec<KeyValue>>> {
    let mut out = Vec::with_capacity(keys.column_count());
    for col in 0..keys.column_count() {
        let part = match keys.value(col, row) {
            Value::Null => return Ok(None),
            Value::Boolean(v) => KeyValue::Boolean(v),
            Value::Integer(v) => KeyValue::Integer(v),
            Value::Float(v) => KeyValue::Float(v.to_bits()),
            Value::Decimal { value, scale } => KeyValue::Decimal { value, scale },
            Value::Date(v) => KeyValue::Date(v),
            Value::Varchar(v) => KeyValue::Varchar(v),
            other => {
                return Err(Error::internal(format!(
                    "value {other:?} cannot be a join key"
                )))
            }
        };
        out.push(part);
    }
    Ok(Some(out))
}

/// Chained hash table over the build (right) side.
pub struct JoinHashTable {
    build_types: Vec<LType>,
    heads: FxHashMap<Vec<KeyValue>, usize>,
    /// Chain links, frozen by [`JoinHashTable::finalize`].
    next: Vec<Option<usize>>,
    rows: Vec<Vec<Value>>,
    finalized: bool,
}

impl JoinHashTable {
    pub fn new(build_types: Vec<LType>) -> Self {
        Self {
            build_types,
            heads: FxHashMap::default(),
            next: Vec::new(),
            rows: Vec::new(),
            finalized: false,
        }
    }

    pub fn build_types(&self) -> &[LType] {
        &self.build_types
    }

    /// Number of stored build rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Ingest one build chunk: hash the keys and store the payload rows.
    /// Keyless builds (cross product) store every row unhashed.
    pub fn build(&mut self, keys: &Chunk, payload: &Chunk) -> Result<()> {
        if self.finalized {
            return Err(Error::internal("hash join build after finalize"));
        }
        for row in 0..payload.card() {
            if keys.column_count() > 0 {
                let Some(key) = key_row(keys, row)? else {
                    // NULL keys can never match.
                    continue;
                };
                let idx = self.rows.len();
                let prev = self.heads.insert(key, idx);
                self.next.push(prev);
                self.rows.push(payload.row(row));
            } else {
                self.next.push(None);
                self.rows.push(payload.row(row));
            }
        }
        Ok(())
    }

    /// Freeze the chain pointers. Probing before this is an internal error.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    /// Start a probe pass over one chunk of key rows.
    pub fn probe(&self, keys: &Chunk, kind: JoinKind) -> Result<JoinScan> {
        if !self.finalized {
            return Err(Error::internal("hash join probe before finalize"));
        }
        let probe_rows = keys.card();
        let mut cursors = Vec::with_capacity(probe_rows);
        for row in 0..probe_rows {
            let cursor = match kind {
                JoinKind::Cross => {
                    if self.rows.is_empty() {
                        Cursor::Done
                    } else {
                        Cursor::Sequential(0)
                    }
                }
                _ => match key_row(keys, row)? {
                    Some(key) => match self.heads.get(&key) {
                        Some(head) => Cursor::Chain(*head),
                        None => Cursor::Done,
                    },
                    None => Cursor::Done,
                },
            };
            cursors.push(cursor);
        }
        Ok(JoinScan {
            kind,
            cursors,
            probe_row: 0,
            matched: vec![false; probe_rows],
            unmatched_pass: false,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    /// Walking a hash bucket chain; holds the current build row.
    Chain(usize),
    /// Cross product: walking every build row in order.
    Sequential(usize),
    Done,
}

/// Probe cursor over one left chunk. Each call to [`JoinScan::next`]
/// materializes one batch of matched rows as (left columns ++ build
/// columns); LEFT joins finish with a NULL-padded pass over unmatched left
/// rows.
#[derive(Debug)]
pub struct JoinScan {
    kind: JoinKind,
    cursors: Vec<Cursor>,
    probe_row: usize,
    matched: Vec<bool>,
    unmatched_pass: bool,
}

impl JoinScan {
    /// Produce up to `capacity` combined rows; an empty chunk means the scan
    /// is exhausted.
    pub fn next(&mut self, ht: &JoinHashTable, left: &Chunk, capacity: usize) -> Result<Chunk> {
        let left_types: Vec<LType> = left.types();
        let mut columns: Vec<FlatVector> = Vec::new();
        for t in left_types.iter().chain(ht.build_types.iter()) {
            columns.push(FlatVector::new(*t)?);
        }
        let mut produced = 0usize;

        while !self.unmatched_pass && produced < capacity && self.probe_row < self.cursors.len() {
            let row = self.probe_row;
            match self.cursors[row] {
                Cursor::Done => {
                    self.probe_row += 1;
                }
                Cursor::Chain(build_idx) => {
                    self.emit(&mut columns, left, row, Some(&ht.rows[build_idx]))?;
                    produced += 1;
                    self.matched[row] = true;
                    self.cursors[row] = match ht.next[build_idx] {
                        Some(next) => Cursor::Chain(next),
                        None => Cursor::Done,
                    };
                }
                Cursor::Sequential(build_idx) => {
                    self.emit(&mut columns, left, row, Some(&ht.rows[build_idx]))?;
                    produced += 1;
                    self.matched[row] = true;
                    self.cursors[row] = if build_idx + 1 < ht.rows.len() {
                        Cursor::Sequential(build_idx + 1)
                    } else {
                        Cursor::Done
                    };
                }
            }
        }

        // Unmatched left rows appear exactly once with NULL right columns.
        if self.kind == JoinKind::Left {
            if !self.unmatched_pass && self.probe_row >= self.cursors.len() {
                self.unmatched_pass = true;
                self.probe_row = 0;
            }
            if self.unmatched_pass {
                while produced < capacity && self.probe_row < self.matched.len() {
                    let row = self.probe_row;
                    self.probe_row += 1;
                    if !self.matched[row] {
                        self.emit(&mut columns, left, row, None)?;
                        produced += 1;
                    }
                }
            }
        }

        Ok(Chunk::from_vectors(
            columns.into_iter().map(Vector::Flat).collect(),
            produced,
        ))
    }

    fn emit(
        &self,
        columns: &mut [FlatVector],
        left: &Chunk,
        left_row: usize,
        build_row: Option<&[Value]>,
    ) -> Result<()> {
        let left_cols = left.column_count();
        for col in 0..left_cols {
            columns[col].push_value(&left.value(col, left_row))?;
        }
        match build_row {
            Some(values) => {
                for (col, value) in values.iter().enumerate() {
                    columns[left_cols + col].push_value(value)?;
                }
            }
            None => {
                for col in columns.iter_mut().skip(left_cols) {
                    col.push_null();
                }
            }
        }
        Ok(())
    }
}
