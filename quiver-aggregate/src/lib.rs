//! Hash aggregation: a radix-partitioned table of group keys → aggregate
//! states, plus the single-state path for global (no GROUP BY) aggregation.
//!
//! The sink phase ingests chunks laid out as (group columns followed by one parameter
//! column per aggregate). The scan phase probes group keys per row and
//! materializes the current aggregate values, so a HAVING-like filter can run
//! against (child row, aggregate states).

use std::hash::{Hash, Hasher};

use quiver_result::{Error, Result};
use quiver_types::{Chunk, DateValue, FlatVector, LType, LTypeId, Value, Vector};
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};

const RADIX_BITS: u32 = 4;
const RADIX_PARTITIONS: usize = 1 << RADIX_BITS;

/// Aggregate function kinds with grouped states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggrKind {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

/// One aggregate: kind plus parameter and return types.
#[derive(Debug, Clone)]
pub struct AggrSpec {
    pub kind: AggrKind,
    pub param_typ: LType,
    pub return_typ: LType,
}

impl AggrSpec {
    /// Fresh state: count and sums start at zero, min/max start empty.
    pub fn init(&self) -> AggrState {
        match self.kind {
            AggrKind::Count => AggrState::Count(0),
            AggrKind::Sum => match self.return_typ.id {
                LTypeId::Integer => AggrState::SumInt { value: 0 },
                LTypeId::Decimal => AggrState::SumDecimal {
                    value: 0,
                    scale: self.return_typ.scale,
                },
                _ => AggrState::SumFloat { value: 0.0 },
            },
            AggrKind::Min => AggrState::Min(None),
            AggrKind::Max => AggrState::Max(None),
            AggrKind::Avg => AggrState::Avg { sum: 0.0, count: 0 },
        }
    }
}

/// Per-group accumulator. Updates are overflow-checked.
#[derive(Debug, Clone)]
pub enum AggrState {
    Count(i64),
    SumInt { value: i64 },
    SumDecimal { value: i64, scale: u8 },
    SumFloat { value: f64 },
    Min(Option<Value>),
    Max(Option<Value>),
    Avg { sum: f64, count: i64 },
}

impl AggrState {
    /// Feed one parameter value. NULLs are ignored except by min/max
    /// emptiness and count semantics (count counts non-NULL values).
    pub fn update(&mut self, value: &Value) -> Result<()> {
        if value.is_null() {
            return Ok(());
        }
        match self {
            AggrState::Count(n) => {
                *n = n
                    .checked_add(1)
                    .ok_or_else(|| Error::invalid("count overflow"))?;
            }
            AggrState::SumInt { value: acc } => {
                let v = match value {
                    Value::Integer(v) => *v,
                    other => {
                        return Err(Error::internal(format!("sum(int) over {other:?}")));
                    }
                };
                *acc = acc
                    .checked_add(v)
                    .ok_or_else(|| Error::invalid("sum overflow"))?;
            }
            AggrState::SumDecimal { value: acc, scale } => {
                let v = match value {
                    Value::Decimal { value, scale: s } => rescale(*value, *s, *scale)?,
                    Value::Integer(v) => rescale(*v, 0, *scale)?,
                    other => {
                        return Err(Error::internal(format!("sum(decimal) over {other:?}")));
                    }
                };
                *acc = acc
                    .checked_add(v)
                    .ok_or_else(|| Error::invalid("sum overflow"))?;
            }
            AggrState::SumFloat { value: acc } => {
                *acc += numeric_as_float(value)?;
            }
            AggrState::Min(slot) => {
                let replace = match slot {
                    None => true,
                    Some(current) => value.compare(current) == std::cmp::Ordering::Less,
                };
                if replace {
                    *slot = Some(value.clone());
                }
            }
            AggrState::Max(slot) => {
                let replace = match slot {
                    None => true,
                    Some(current) => value.compare(current) == std::cmp::Ordering::Greater,
                };
                if replace {
                    *slot = Some(value.clone());
                }
            }
            AggrState::Avg { sum, count } => {
                *sum += numeric_as_float(value)?;
                *count += 1;
            }
        }
        Ok(())
    }

    /// Current value of the aggregate. Empty min/max/avg finalize to NULL;
    /// count and sum finalize to zero.
    pub fn finalize(&self) -> Value {
        match self {
            AggrState::Count(n) => Value::Integer(*n),
            AggrState::SumInt { value } => Value::Integer(*value),
            AggrState::SumDecimal { value, scale } => Value::Decimal {
                value: *value,
                scale: *scale,
            },
            AggrState::SumFloat { value } => Value::Float(*value),
            AggrState::Min(slot) | AggrState::Max(slot) => {
                slot.clone().unwrap_or(Value::Null)
            }
            AggrState::Avg { sum, count } => {
                if *count == 0 {
                    Value::Null
                } else {
                    Value::Float(*sum / *count as f64)
                }
            }
        }
    }
}

fn rescale(value: i64, from: u8, to: u8) -> Result<i64> {
    if from == to {
        return Ok(value);
    }
    if from < to {
        let factor = 10i64
            .checked_pow((to - from) as u32)
            .ok_or_else(|| Error::invalid("decimal rescale overflow"))?;
        value
            .checked_mul(factor)
            .ok_or_else(|| Error::invalid("decimal rescale overflow"))
    } else {
        Ok(value / 10i64.pow((from - to) as u32))
    }
}

fn numeric_as_float(value: &Value) -> Result<f64> {
    Ok(match value {
        Value::Integer(v) => *v as f64,
        Value::Float(v) => *v,
        Value::Decimal { value, scale } => *value as f64 / 10f64.powi(*scale as i32),
        other => {
            return Err(Error::internal(format!(
                "numeric aggregate over {other:?}"
            )))
        }
    })
}

/// Group-key part. NULL forms its own group; floats key by bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyPart {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(u64),
    Decimal { value: i64, scale: u8 },
    Date(DateValue),
    Varchar(String),
}

fn group_key(chunk: &Chunk, row: usize, group_count: usize) -> Result<Vec<KeyPart>> {
    let mut key = Vec::with_capacity(group_count);
    for col in 0..group_count {
        let part = match chunk.value(col, row) {
            Value::Null => KeyPart::Null,
            Value::Boolean(v) => KeyPart::Boolean(v),
            Value::Integer(v) => KeyPart::Integer(v),
            Value::Float(v) => KeyPart::Float(v.to_bits()),
            Value::Decimal { value, scale } => KeyPart::Decimal { value, scale },
            Value::Date(v) => KeyPart::Date(v),
            Value::Varchar(v) => KeyPart::Varchar(v),
            other => {
                return Err(Error::internal(format!(
                    "value {other:?} cannot be a group key"
                )))
            }
        };
        key.push(part);
    }
    Ok(key)
}

fn radix_partition(key: &[KeyPart]) -> usize {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    (hasher.finish() as usize) & (RADIX_PARTITIONS - 1)
}

/// Scan-phase bookkeeping: groups already emitted plus diagnostic counters.
#[derive(Debug, Default)]
pub struct AggrScanState {
    pub seen: FxHashSet<usize>,
    pub child_cnt: usize,
    pub filtered_cnt: usize,
    pub output_cnt: usize,
}

/// Radix-partitioned hash table of group keys → aggregate state rows.
pub struct GroupedHashTable {
    group_types: Vec<LType>,
    specs: Vec<AggrSpec>,
    partitions: Vec<FxHashMap<Vec<KeyPart>, usize>>,
    group_rows: Vec<Vec<Value>>,
    states: Vec<Vec<AggrState>>,
}

impl GroupedHashTable {
    pub fn new(group_types: Vec<LType>, specs: Vec<AggrSpec>) -> Self {
        Self {
            group_types,
            specs,
            partitions: (0..RADIX_PARTITIONS).map(|_| FxHashMap::default()).collect(),
            group_rows: Vec::new(),
            states: Vec::new(),
        }
    }

    pub fn num_groups(&self) -> usize {
        self.group_rows.len()
    }

    pub fn group_row(&self, group: usize) -> &[Value] {
        &self.group_rows[group]
    }

    /// Ingest one chunk laid out as (group columns, then aggregate parameters):
    /// hash each row's group columns, insert a fresh state row if the group
    /// is new, and feed the parameter values into each aggregate.
    pub fn sink(&mut self, chunk: &Chunk) -> Result<()> {
        let group_count = self.group_types.len();
        let expected = group_count + self.specs.len();
        if chunk.column_count() != expected {
            return Err(Error::internal(format!(
                "aggregation sink chunk has {} columns, expected {expected}",
                chunk.column_count()
            )));
        }
        for row in 0..chunk.card() {
            let key = group_key(chunk, row, group_count)?;
            let group = self.lookup_or_insert(key, chunk, row, group_count)?;
            for i in 0..self.specs.len() {
                let value = chunk.value(group_count + i, row);
                self.states[group][i].update(&value)?;
            }
        }
        Ok(())
    }

    fn lookup_or_insert(
        &mut self,
        key: Vec<KeyPart>,
        chunk: &Chunk,
        row: usize,
        group_count: usize,
    ) -> Result<usize> {
        let partition = radix_partition(&key);
        if let Some(group) = self.partitions[partition].get(&key) {
            return Ok(*group);
        }
        let group = self.group_rows.len();
        let mut group_row = Vec::with_capacity(group_count);
        for col in 0..group_count {
            group_row.push(chunk.value(col, row));
        }
        self.group_rows.push(group_row);
        self.states
            .push(self.specs.iter().map(|s| s.init()).collect());
        self.partitions[partition].insert(key, group);
        Ok(group)
    }

    /// Probe each row's group and materialize the current aggregate values.
    /// Returns the states chunk plus the group index per row (`None` for a
    /// group the sink never saw).
    pub fn fetch_aggregates(&self, group_chunk: &Chunk) -> Result<(Chunk, Vec<Option<usize>>)> {
        let group_count = self.group_types.len();
        let mut columns: Vec<FlatVector> = self
            .specs
            .iter()
            .map(|s| FlatVector::new(s.return_typ))
            .collect::<Result<_>>()?;
        let mut groups = Vec::with_capacity(group_chunk.card());
        for row in 0..group_chunk.card() {
            let key = group_key(group_chunk, row, group_count)?;
            let partition = radix_partition(&key);
            match self.partitions[partition].get(&key) {
                Some(&group) => {
                    for (i, state) in self.states[group].iter().enumerate() {
                        columns[i].push_value(&state.finalize())?;
                    }
                    groups.push(Some(group));
                }
                None => {
                    for col in columns.iter_mut() {
                        col.push_null();
                    }
                    groups.push(None);
                }
            }
        }
        let count = group_chunk.card();
        Ok((
            Chunk::from_vectors(columns.into_iter().map(Vector::Flat).collect(), count),
            groups,
        ))
    }
}

/// Global aggregation: one state tuple instead of a hash table.
pub struct GlobalAggrState {
    specs: Vec<AggrSpec>,
    states: Vec<AggrState>,
}

impl GlobalAggrState {
    pub fn new(specs: Vec<AggrSpec>) -> Self {
        let states = specs.iter().map(|s| s.init()).collect();
        Self { specs, states }
    }

    /// Ingest one chunk of parameter columns (one per aggregate).
    pub fn sink(&mut self, chunk: &Chunk) -> Result<()> {
        if chunk.column_count() != self.specs.len() {
            return Err(Error::internal(format!(
                "global aggregation sink chunk has {} columns, expected {}",
                chunk.column_count(),
                self.specs.len()
            )));
        }
        for row in 0..chunk.card() {
            for (i, state) in self.states.iter_mut().enumerate() {
                state.update(&chunk.value(i, row))?;
            }
        }
        Ok(())
    }

    /// The single result row. With no input: count=0, sum=0, min=max=NULL.
    pub fn finalize_chunk(&self) -> Result<Chunk> {
        let mut columns = Vec::with_capacity(self.specs.len());
        for (spec, state) in self.specs.iter().zip(self.states.iter()) {
            let mut v = FlatVector::new(spec.return_typ)?;
            v.push_value(&state.finalize())?;
            columns.push(Vector::Flat(v));
        }
        Ok(Chunk::from_vectors(columns, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(cols: Vec<Vec<Value>>, types: Vec<LType>) -> Chunk {
        let count = cols.first().map(|c| c.len()).unwrap_or(0);
        let vectors = cols
            .into_iter()
            .zip(types)
            .map(|(col, typ)| {
                let mut v = FlatVector::new(typ).unwrap();
                for value in col {
                    v.push_value(&value).unwrap();
                }
                Vector::Flat(v)
            })
            .collect();
        Chunk::from_vectors(vectors, count)
    }

    fn sum_spec() -> AggrSpec {
        AggrSpec {
            kind: AggrKind::Sum,
            param_typ: LType::integer(),
            return_typ: LType::integer(),
        }
    }

    #[test]
    fn groups_accumulate_and_fetch() {
        let mut table = GroupedHashTable::new(vec![LType::varchar(8)], vec![sum_spec()]);
        let vals = |k: &str, v: i64| (Value::Varchar(k.into()), Value::Integer(v));
        let rows = vec![vals("a", 1), vals("b", 2), vals("a", 3)];
        let sink = chunk(
            vec![
                rows.iter().map(|r| r.0.clone()).collect(),
                rows.iter().map(|r| r.1.clone()).collect(),
            ],
            vec![LType::varchar(8), LType::integer()],
        );
        table.sink(&sink).unwrap();
        assert_eq!(table.num_groups(), 2);

        let probe = chunk(
            vec![vec![
                Value::Varchar("a".into()),
                Value::Varchar("b".into()),
                Value::Varchar("c".into()),
            ]],
            vec![LType::varchar(8)],
        );
        let (states, groups) = table.fetch_aggregates(&probe).unwrap();
        assert_eq!(states.value(0, 0), Value::Integer(4));
        assert_eq!(states.value(0, 1), Value::Integer(2));
        assert_eq!(states.value(0, 2), Value::Null);
        assert_eq!(groups[2], None);
        assert_ne!(groups[0], groups[1]);
    }

    #[test]
    fn null_group_key_forms_its_own_group() {
        let mut table = GroupedHashTable::new(vec![LType::integer()], vec![sum_spec()]);
        let sink = chunk(
            vec![
                vec![Value::Null, Value::Integer(1), Value::Null],
                vec![Value::Integer(5), Value::Integer(6), Value::Integer(7)],
            ],
            vec![LType::integer(), LType::integer()],
        );
        table.sink(&sink).unwrap();
        assert_eq!(table.num_groups(), 2);
        let probe = chunk(vec![vec![Value::Null]], vec![LType::integer()]);
        let (states, _) = table.fetch_aggregates(&probe).unwrap();
        assert_eq!(states.value(0, 0), Value::Integer(12));
    }

    #[test]
    fn aggregation_sum_law() {
        // sum of a column equals the sum of grouped sums.
        let keys: Vec<i64> = (0..100).map(|i| i % 7).collect();
        let vals: Vec<i64> = (0..100).map(|i| i * 3 + 1).collect();
        let mut table = GroupedHashTable::new(vec![LType::integer()], vec![sum_spec()]);
        let sink = chunk(
            vec![
                keys.iter().map(|k| Value::Integer(*k)).collect(),
                vals.iter().map(|v| Value::Integer(*v)).collect(),
            ],
            vec![LType::integer(), LType::integer()],
        );
        table.sink(&sink).unwrap();
        let mut grouped_total = 0i64;
        for g in 0..table.num_groups() {
            let key = table.group_row(g)[0].clone();
            let probe = chunk(vec![vec![key]], vec![LType::integer()]);
            let (states, _) = table.fetch_aggregates(&probe).unwrap();
            match states.value(0, 0) {
                Value::Integer(v) => grouped_total += v,
                other => panic!("expected integer sum, got {other:?}"),
            }
        }
        assert_eq!(grouped_total, vals.iter().sum::<i64>());
    }

    #[test]
    fn empty_global_aggregation_emits_init_row() {
        let specs = vec![
            AggrSpec {
                kind: AggrKind::Count,
                param_typ: LType::integer(),
                return_typ: LType::integer(),
            },
            sum_spec(),
            AggrSpec {
                kind: AggrKind::Min,
                param_typ: LType::integer(),
                return_typ: LType::integer(),
            },
            AggrSpec {
                kind: AggrKind::Max,
                param_typ: LType::integer(),
                return_typ: LType::integer(),
            },
        ];
        let global = GlobalAggrState::new(specs);
        let out = global.finalize_chunk().unwrap();
        assert_eq!(out.card(), 1);
        assert_eq!(out.value(0, 0), Value::Integer(0));
        assert_eq!(out.value(1, 0), Value::Integer(0));
        assert_eq!(out.value(2, 0), Value::Null);
        assert_eq!(out.value(3, 0), Value::Null);
    }

    #[test]
    fn decimal_sums_align_scales() {
        let spec = AggrSpec {
            kind: AggrKind::Sum,
            param_typ: LType::decimal(15, 2),
            return_typ: LType::decimal(18, 2),
        };
        let mut state = spec.init();
        state
            .update(&Value::Decimal {
                value: 150,
                scale: 2,
            })
            .unwrap();
        state.update(&Value::Integer(2)).unwrap();
        assert_eq!(
            state.finalize(),
            Value::Decimal {
                value: 350,
                scale: 2
            }
        );
    }
}
