//! Sort: normalized memcmp-comparable sort keys, fixed-width payload rows,
//! per-block sorting and a k-way merge across sorted blocks.
//!
//! Keys encode per column as a null byte followed by an order-preserving
//! fixed-width value image (sign-flipped big-endian integers and dates,
//! total-order float bits, a truncated prefix for strings). Descending
//! columns invert the value bytes only; the null byte always encodes the
//! column's null placement. Truncated string columns keep the full value
//! beside the key as the tie-break.

use std::cmp::Ordering;

use quiver_result::{Error, Result};
use quiver_types::{
    Chunk, DateValue, FlatVector, LType, LTypeId, Value, Vector, DEFAULT_VECTOR_SIZE,
};

/// Bytes of a string that participate in the normalized key.
const STRING_PREFIX: usize = 12;
/// Rows per payload block before a new block starts.
const BLOCK_CAPACITY: usize = 16 * DEFAULT_VECTOR_SIZE;

/// One sort key column: type, direction, and null placement.
#[derive(Debug, Clone)]
pub struct SortColumn {
    pub typ: LType,
    pub desc: bool,
    pub nulls_first: bool,
}

/// Fixed-width normalized key layout.
#[derive(Debug, Clone)]
pub struct SortLayout {
    pub columns: Vec<SortColumn>,
}

impl SortLayout {
    pub fn new(columns: Vec<SortColumn>) -> Self {
        Self { columns }
    }

    fn key_width(typ: LType) -> Result<usize> {
        Ok(match typ.id {
            LTypeId::Boolean => 1,
            LTypeId::Integer | LTypeId::Float | LTypeId::Decimal => 8,
            LTypeId::Date => 4,
            LTypeId::Varchar => STRING_PREFIX,
            other => {
                return Err(Error::internal(format!("{other:?} is not sortable")));
            }
        })
    }

    /// Encode one key row. Returns the memcmp image plus the full strings of
    /// truncated columns for tie-breaking.
    fn encode_row(&self, keys: &Chunk, row: usize) -> Result<(Vec<u8>, Vec<Option<String>>)> {
        let mut image = Vec::new();
        let mut ties = Vec::new();
        for (col, column) in self.columns.iter().enumerate() {
            let value = keys.value(col, row);
            let width = Self::key_width(column.typ)?;
            match &value {
                Value::Null => {
                    image.push(if column.nulls_first { 0x00 } else { 0xFF });
                    image.extend(std::iter::repeat(0u8).take(width));
                }
                _ => {
                    image.push(if column.nulls_first { 0x01 } else { 0x00 });
                    let start = image.len();
                    encode_value(&mut image, &value, width)?;
                    // Inverting the null byte as well would override the
                    // column's null placement, so only the value flips.
                    if column.desc {
                        for byte in &mut image[start..] {
                            *byte = !*byte;
                        }
                    }
                }
            }
            if column.typ.id == LTypeId::Varchar {
                ties.push(match &value {
                    Value::Varchar(s) => Some(s.clone()),
                    _ => None,
                });
            }
        }
        Ok((image, ties))
    }

    /// Compare two encoded rows, falling back to the full strings when the
    /// truncated images tie.
    fn compare(
        &self,
        a_image: &[u8],
        a_ties: &[Option<String>],
        b_image: &[u8],
        b_ties: &[Option<String>],
    ) -> Ordering {
        match a_image.cmp(b_image) {
            Ordering::Equal => {}
            other => return other,
        }
        let mut tie = 0usize;
        for column in &self.columns {
            if column.typ.id != LTypeId::Varchar {
                continue;
            }
            let ord = match (&a_ties[tie], &b_ties[tie]) {
                (Some(a), Some(b)) => a.cmp(b),
                (None, None) => Ordering::Equal,
                // The null byte already ordered these rows; a mismatch here
                // cannot happen with equal images.
                (None, Some(_)) | (Some(_), None) => Ordering::Equal,
            };
            let ord = if column.desc { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
            tie += 1;
        }
        Ordering::Equal
    }
}

fn encode_value(image: &mut Vec<u8>, value: &Value, width: usize) -> Result<()> {
    match value {
        Value::Boolean(v) => image.push(u8::from(*v)),
        Value::Integer(v) => image.extend((*v as u64 ^ (1u64 << 63)).to_be_bytes()),
        Value::Decimal { value, .. } => {
            image.extend((*value as u64 ^ (1u64 << 63)).to_be_bytes())
        }
        Value::Float(v) => {
            let bits = v.to_bits();
            let ordered = if bits & (1u64 << 63) != 0 {
                !bits
            } else {
                bits ^ (1u64 << 63)
            };
            image.extend(ordered.to_be_bytes());
        }
        Value::Date(v) => {
            let days = v.to_epoch_days()?;
            image.extend((days as u32 ^ (1u32 << 31)).to_be_bytes());
        }
        Value::Varchar(s) => {
            let bytes = s.as_bytes();
            let take = bytes.len().min(width);
            image.extend(&bytes[..take]);
            image.extend(std::iter::repeat(0u8).take(width - take));
        }
        other => {
            return Err(Error::internal(format!("{other:?} is not sortable")));
        }
    }
    Ok(())
}

/// Fixed-width payload row layout with a per-block string heap.
#[derive(Debug, Clone)]
pub struct RowLayout {
    pub types: Vec<LType>,
}

impl RowLayout {
    pub fn new(types: Vec<LType>) -> Self {
        Self { types }
    }

    fn encode_row(&self, payload: &Chunk, row: usize, heap: &mut Vec<u8>) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        for (col, typ) in self.types.iter().enumerate() {
            let value = payload.value(col, row);
            if value.is_null() {
                bytes.push(0u8);
                bytes.extend(std::iter::repeat(0u8).take(Self::value_width(*typ)?));
                continue;
            }
            bytes.push(1u8);
            match (&value, typ.id) {
                (Value::Boolean(v), LTypeId::Boolean) => bytes.push(u8::from(*v)),
                (Value::Integer(v), LTypeId::Integer) => bytes.extend(v.to_le_bytes()),
                (Value::Integer(v), LTypeId::Float) => {
                    bytes.extend((*v as f64).to_le_bytes())
                }
                (Value::Float(v), LTypeId::Float) => bytes.extend(v.to_le_bytes()),
                (Value::Decimal { value, .. }, LTypeId::Decimal) => {
                    bytes.extend(value.to_le_bytes())
                }
                (Value::Date(v), LTypeId::Date) => {
                    bytes.extend(v.to_epoch_days()?.to_le_bytes())
                }
                (Value::Varchar(s), LTypeId::Varchar) => {
                    let offset = u32::try_from(heap.len())
                        .map_err(|_| Error::invalid("sort heap exceeds 4 GiB"))?;
                    let len = u32::try_from(s.len())
                        .map_err(|_| Error::invalid("oversized string in sort payload"))?;
                    heap.extend(s.as_bytes());
                    bytes.extend(offset.to_le_bytes());
                    bytes.extend(len.to_le_bytes());
                }
                (value, _) => {
                    return Err(Error::internal(format!(
                        "payload value {value:?} does not fit a {typ} slot"
                    )));
                }
            }
        }
        Ok(bytes)
    }

    fn value_width(typ: LType) -> Result<usize> {
        Ok(match typ.id {
            LTypeId::Boolean => 1,
            LTypeId::Integer | LTypeId::Float | LTypeId::Decimal | LTypeId::Varchar => 8,
            LTypeId::Date => 4,
            other => {
                return Err(Error::internal(format!(
                    "{other:?} cannot live in a sort payload"
                )))
            }
        })
    }

    fn decode_row(&self, bytes: &[u8], heap: &[u8]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(self.types.len());
        let mut pos = 0usize;
        for typ in &self.types {
            let valid = bytes[pos] != 0;
            pos += 1;
            let width = Self::value_width(*typ)?;
            let slot = &bytes[pos..pos + width];
            pos += width;
            if !valid {
                values.push(Value::Null);
                continue;
            }
            let value = match typ.id {
                LTypeId::Boolean => Value::Boolean(slot[0] != 0),
                LTypeId::Integer => {
                    Value::Integer(i64::from_le_bytes(slot.try_into().unwrap()))
                }
                LTypeId::Float => Value::Float(f64::from_le_bytes(slot.try_into().unwrap())),
                LTypeId::Decimal => Value::Decimal {
                    value: i64::from_le_bytes(slot.try_into().unwrap()),
                    scale: typ.scale,
                },
                LTypeId::Date => {
                    let days = i32::from_le_bytes(slot.try_into().unwrap());
                    Value::Date(DateValue::from_epoch_days(days)?)
                }
                LTypeId::Varchar => {
                    let offset = u32::from_le_bytes(slot[0..4].try_into().unwrap()) as usize;
                    let len = u32::from_le_bytes(slot[4..8].try_into().unwrap()) as usize;
                    let text = std::str::from_utf8(&heap[offset..offset + len])
                        .map_err(|err| Error::internal(format!("corrupt sort heap: {err}")))?;
                    Value::Varchar(text.to_string())
                }
                other => {
                    return Err(Error::internal(format!(
                        "{other:?} cannot live in a sort payload"
                    )))
                }
            };
            values.push(value);
        }
        Ok(values)
    }
}

#[derive(Debug, Default)]
struct SortBlock {
    keys: Vec<Vec<u8>>,
    ties: Vec<Vec<Option<String>>>,
    payload: Vec<Vec<u8>>,
    heap: Vec<u8>,
    /// Row order after the in-block sort.
    order: Vec<usize>,
}

/// Sort progress, driven by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortState {
    Init,
    Sort,
    Scan,
}

/// Local sort: sink key/payload chunks, sort, then scan payload rows back in
/// order.
pub struct LocalSort {
    pub state: SortState,
    layout: SortLayout,
    row_layout: RowLayout,
    blocks: Vec<SortBlock>,
    /// Global merged order as (block, row) pairs.
    merged: Vec<(usize, usize)>,
}

impl LocalSort {
    pub fn new(layout: SortLayout, row_layout: RowLayout) -> Self {
        Self {
            state: SortState::Init,
            layout,
            row_layout,
            blocks: vec![SortBlock::default()],
            merged: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.blocks.iter().map(|b| b.keys.len()).sum()
    }

    /// Encode and buffer one batch of key and payload rows.
    pub fn sink_chunk(&mut self, keys: &Chunk, payload: &Chunk) -> Result<()> {
        if keys.card() != payload.card() {
            return Err(Error::internal(format!(
                "sort sink: {} key rows vs {} payload rows",
                keys.card(),
                payload.card()
            )));
        }
        for row in 0..keys.card() {
            if self.blocks.last().map(|b| b.keys.len()).unwrap_or(0) >= BLOCK_CAPACITY {
                self.blocks.push(SortBlock::default());
            }
            let block = self.blocks.last_mut().expect("at least one block");
            let (image, ties) = self.layout.encode_row(keys, row)?;
            let bytes = self.row_layout.encode_row(payload, row, &mut block.heap)?;
            block.keys.push(image);
            block.ties.push(ties);
            block.payload.push(bytes);
        }
        Ok(())
    }

    /// Sort each block in place, then merge the sorted blocks into one run.
    pub fn sort(&mut self, _external: bool) {
        for block in &mut self.blocks {
            let mut order: Vec<usize> = (0..block.keys.len()).collect();
            let layout = &self.layout;
            order.sort_unstable_by(|&a, &b| {
                layout.compare(
                    &block.keys[a],
                    &block.ties[a],
                    &block.keys[b],
                    &block.ties[b],
                )
            });
            block.order = order;
        }

        // K-way merge across the sorted blocks.
        let mut heads = vec![0usize; self.blocks.len()];
        let total = self.row_count();
        self.merged = Vec::with_capacity(total);
        while self.merged.len() < total {
            let mut best: Option<usize> = None;
            for (b, block) in self.blocks.iter().enumerate() {
                if heads[b] >= block.order.len() {
                    continue;
                }
                let candidate = block.order[heads[b]];
                best = match best {
                    None => Some(b),
                    Some(current) => {
                        let cur_block = &self.blocks[current];
                        let cur_row = cur_block.order[heads[current]];
                        let ord = self.layout.compare(
                            &block.keys[candidate],
                            &block.ties[candidate],
                            &cur_block.keys[cur_row],
                            &cur_block.ties[cur_row],
                        );
                        if ord == Ordering::Less {
                            Some(b)
                        } else {
                            Some(current)
                        }
                    }
                };
            }
            let winner = best.expect("rows remain");
            let row = self.blocks[winner].order[heads[winner]];
            heads[winner] += 1;
            self.merged.push((winner, row));
        }
    }

    /// Start scanning the merged payload back.
    pub fn scanner(&self) -> PayloadScanner {
        PayloadScanner { position: 0 }
    }

    fn decode(&self, position: usize) -> Result<Vec<Value>> {
        let (block, row) = self.merged[position];
        let block = &self.blocks[block];
        self.row_layout.decode_row(&block.payload[row], &block.heap)
    }

    pub fn payload_types(&self) -> &[LType] {
        &self.row_layout.types
    }
}

/// Walks the sorted payload and materializes successive chunks.
pub struct PayloadScanner {
    position: usize,
}

impl PayloadScanner {
    pub fn remaining(&self, sort: &LocalSort) -> usize {
        sort.merged.len().saturating_sub(self.position)
    }

    /// Emit up to `max` rows of sorted payload.
    pub fn scan(&mut self, sort: &LocalSort, max: usize) -> Result<Chunk> {
        let take = self.remaining(sort).min(max);
        let mut columns: Vec<FlatVector> = sort
            .payload_types()
            .iter()
            .map(|t| FlatVector::new(*t))
            .collect::<Result<_>>()?;
        for _ in 0..take {
            let row = sort.decode(self.position)?;
            self.position += 1;
            for (col, value) in row.iter().enumerate() {
                columns[col].push_value(value)?;
            }
        }
        Ok(Chunk::from_vectors(
            columns.into_iter().map(Vector::Flat).collect(),
            take,
        ))
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

    fn sort_ints(values: Vec<i64>, desc: bool) -> Vec<i64> {
        let layout = SortLayout::new(vec![SortColumn {
            typ: LType::integer(),
            desc,
            nulls_first: false,
        }]);
        let mut sort = LocalSort::new(layout, RowLayout::new(vec![LType::integer()]));
        let col: Vec<Value> = values.iter().map(|v| Value::Integer(*v)).collect();
        let keys = chunk(vec![col.clone()], vec![LType::integer()]);
        let payload = chunk(vec![col], vec![LType::integer()]);
        sort.sink_chunk(&keys, &payload).unwrap();
        sort.sort(true);
        let mut scanner = sort.scanner();
        let mut out = Vec::new();
        loop {
            let c = scanner.scan(&sort, 4).unwrap();
            if c.card() == 0 {
                break;
            }
            for row in 0..c.card() {
                match c.value(0, row) {
                    Value::Integer(v) => out.push(v),
                    other => panic!("expected integer, got {other:?}"),
                }
            }
        }
        out
    }

    #[test]
    fn integers_sort_in_both_directions() {
        assert_eq!(
            sort_ints(vec![5, -3, 12, 0, -3], false),
            vec![-3, -3, 0, 5, 12]
        );
        assert_eq!(
            sort_ints(vec![5, -3, 12, 0], true),
            vec![12, 5, 0, -3]
        );
    }

    #[test]
    fn long_shared_prefixes_fall_back_to_tie_break() {
        let names = vec![
            "UNITED KINGDOM",
            "UNITED STATES",
            "UNITED ARAB EMIRATES",
        ];
        let layout = SortLayout::new(vec![SortColumn {
            typ: LType::varchar(25),
            desc: false,
            nulls_first: false,
        }]);
        let mut sort = LocalSort::new(layout, RowLayout::new(vec![LType::varchar(25)]));
        let col: Vec<Value> = names
            .iter()
            .map(|n| Value::Varchar(n.to_string()))
            .collect();
        let keys = chunk(vec![col.clone()], vec![LType::varchar(25)]);
        let payload = chunk(vec![col], vec![LType::varchar(25)]);
        sort.sink_chunk(&keys, &payload).unwrap();
        sort.sort(true);
        let mut scanner = sort.scanner();
        let out = scanner.scan(&sort, 10).unwrap();
        // The prefixes differ within the first 12 bytes here, so the image
        // compare alone must order ARAB < KINGDOM < STATES.
        assert_eq!(
            (0..3).map(|r| out.value(0, r).to_string()).collect::<Vec<_>>(),
            vec![
                "UNITED ARAB EMIRATES".to_string(),
                "UNITED KINGDOM".to_string(),
                "UNITED STATES".to_string(),
            ]
        );
    }

    #[test]
    fn identical_prefixes_use_full_string() {
        let a = "AAAAAAAAAAAAZZZ"; // same first 12 bytes
        let b = "AAAAAAAAAAAAAAA";
        let layout = SortLayout::new(vec![SortColumn {
            typ: LType::varchar(25),
            desc: false,
            nulls_first: false,
        }]);
        let mut sort = LocalSort::new(layout, RowLayout::new(vec![LType::varchar(25)]));
        let col = vec![
            Value::Varchar(a.to_string()),
            Value::Varchar(b.to_string()),
        ];
        let keys = chunk(vec![col.clone()], vec![LType::varchar(25)]);
        let payload = chunk(vec![col], vec![LType::varchar(25)]);
        sort.sink_chunk(&keys, &payload).unwrap();
        sort.sort(true);
        let mut scanner = sort.scanner();
        let out = scanner.scan(&sort, 10).unwrap();
        assert_eq!(out.value(0, 0), Value::Varchar(b.to_string()));
        assert_eq!(out.value(0, 1), Value::Varchar(a.to_string()));
    }

    #[test]
    fn sorting_twice_is_deterministic_and_merges_blocks() {
        // More rows than one block holds, sunk in vector-sized chunks.
        let total = BLOCK_CAPACITY + DEFAULT_VECTOR_SIZE + 1;
        let values: Vec<i64> = (0..total as i64).map(|i| (i * 48271) % 9973).collect();
        let run = |values: &[i64]| -> Vec<i64> {
            let layout = SortLayout::new(vec![SortColumn {
                typ: LType::integer(),
                desc: false,
                nulls_first: false,
            }]);
            let mut sort = LocalSort::new(layout, RowLayout::new(vec![LType::integer()]));
            for batch in values.chunks(DEFAULT_VECTOR_SIZE) {
                let col: Vec<Value> = batch.iter().map(|v| Value::Integer(*v)).collect();
                let keys = chunk(vec![col.clone()], vec![LType::integer()]);
                let payload = chunk(vec![col], vec![LType::integer()]);
                sort.sink_chunk(&keys, &payload).unwrap();
            }
            sort.sort(true);
            let mut scanner = sort.scanner();
            let mut out = Vec::with_capacity(values.len());
            loop {
                let c = scanner.scan(&sort, DEFAULT_VECTOR_SIZE).unwrap();
                if c.card() == 0 {
                    break;
                }
                for row in 0..c.card() {
                    match c.value(0, row) {
                        Value::Integer(v) => out.push(v),
                        other => panic!("expected integer, got {other:?}"),
                    }
                }
            }
            out
        };
        let first = run(&values);
        let second = run(&values);
        assert_eq!(first, second);
        let mut expected = values;
        expected.sort_unstable();
        assert_eq!(first, expected);
    }

    #[test]
    fn nulls_place_according_to_the_column_in_both_directions() {
        let run = |desc: bool, nulls_first: bool| -> Vec<Value> {
            let layout = SortLayout::new(vec![SortColumn {
                typ: LType::integer(),
                desc,
                nulls_first,
            }]);
            let mut sort = LocalSort::new(layout, RowLayout::new(vec![LType::integer()]));
            let col = vec![Value::Integer(3), Value::Null, Value::Integer(-1)];
            let keys = chunk(vec![col.clone()], vec![LType::integer()]);
            let payload = chunk(vec![col], vec![LType::integer()]);
            sort.sink_chunk(&keys, &payload).unwrap();
            sort.sort(true);
            let mut scanner = sort.scanner();
            let out = scanner.scan(&sort, 10).unwrap();
            (0..out.card()).map(|r| out.value(0, r)).collect()
        };
        assert_eq!(
            run(false, true),
            vec![Value::Null, Value::Integer(-1), Value::Integer(3)]
        );
        assert_eq!(
            run(false, false),
            vec![Value::Integer(-1), Value::Integer(3), Value::Null]
        );
        // The descending flip must not override the null marker.
        assert_eq!(
            run(true, true),
            vec![Value::Null, Value::Integer(3), Value::Integer(-1)]
        );
        assert_eq!(
            run(true, false),
            vec![Value::Integer(3), Value::Integer(-1), Value::Null]
        );
    }
}
