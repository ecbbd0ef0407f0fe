//! Table scan readers: `|`-delimited text (TPC-H `.tbl`) and Parquet via the
//! row API. The scan owns its file handle and closes it with the operator.

use std::fs::File;

use csv::{ReaderBuilder, StringRecord};
use parquet::file::reader::SerializedFileReader;
use parquet::record::reader::RowIter;
use parquet::record::Field;
use quiver_result::{Error, Result};
use quiver_types::{Chunk, DateValue, FlatVector, LType, LTypeId, Value, Vector};

use crate::config::{DataFormat, ExecConfig};

enum TableReader {
    Csv(Box<csv::Reader<File>>),
    Parquet(RowIter<'static>),
}

impl std::fmt::Debug for TableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableReader::Csv(_) => f.write_str("TableReader::Csv(..)"),
            TableReader::Parquet(_) => f.write_str("TableReader::Parquet(..)"),
        }
    }
}

/// Streaming reader for one table, restricted to the projected columns.
#[derive(Debug)]
pub struct TableScanner {
    reader: TableReader,
    column_ids: Vec<usize>,
    read_types: Vec<LType>,
    show_raw: bool,
    record: StringRecord,
}

impl TableScanner {
    pub fn open(
        config: &ExecConfig,
        table: &str,
        column_ids: Vec<usize>,
        read_types: Vec<LType>,
    ) -> Result<Self> {
        let path = config.table_path(table);
        let reader = match config.format {
            DataFormat::Csv => {
                let reader = ReaderBuilder::new()
                    .delimiter(b'|')
                    .has_headers(false)
                    .flexible(true)
                    .from_path(&path)
                    .map_err(|err| {
                        Error::invalid(format!("cannot open {}: {err}", path.display()))
                    })?;
                TableReader::Csv(Box::new(reader))
            }
            DataFormat::Parquet => {
                let file = File::open(&path)?;
                let reader = SerializedFileReader::new(file)
                    .map_err(|err| {
                        Error::invalid(format!("cannot open {}: {err}", path.display()))
                    })?;
                TableReader::Parquet(RowIter::from_file_into(Box::new(reader)))
            }
        };
        Ok(Self {
            reader,
            column_ids,
            read_types,
            show_raw: config.show_raw,
            record: StringRecord::new(),
        })
    }

    /// Read up to `max` records into a chunk of the projected columns.
    pub fn read_chunk(&mut self, max: usize) -> Result<Chunk> {
        let mut columns: Vec<FlatVector> = self
            .read_types
            .iter()
            .map(|t| FlatVector::new(*t))
            .collect::<Result<_>>()?;
        let mut rows = 0usize;
        while rows < max {
            if !self.read_row(&mut columns)? {
                break;
            }
            rows += 1;
        }
        Ok(Chunk::from_vectors(
            columns.into_iter().map(Vector::Flat).collect(),
            rows,
        ))
    }

    fn read_row(&mut self, columns: &mut [FlatVector]) -> Result<bool> {
        match &mut self.reader {
            TableReader::Csv(reader) => {
                let got = reader
                    .read_record(&mut self.record)
                    .map_err(|err| Error::invalid(format!("malformed record: {err}")))?;
                if !got {
                    return Ok(false);
                }
                if self.show_raw {
                    tracing::debug!(target: "quiver::scan", record = ?self.record, "raw");
                }
                for (slot, &idx) in self.column_ids.iter().enumerate() {
                    let field = self.record.get(idx).ok_or_else(|| {
                        Error::invalid(format!(
                            "record has {} fields, column {idx} requested",
                            self.record.len()
                        ))
                    })?;
                    let value = field_to_value(field, self.read_types[slot])?;
                    columns[slot].push_value(&value)?;
                }
                Ok(true)
            }
            TableReader::Parquet(iter) => {
                let Some(row) = iter.next() else {
                    return Ok(false);
                };
                let row = row.map_err(|err| Error::invalid(format!("parquet read: {err}")))?;
                if self.show_raw {
                    tracing::debug!(target: "quiver::scan", record = %row, "raw");
                }
                let fields: Vec<&Field> = row.get_column_iter().map(|(_, f)| f).collect();
                for (slot, &idx) in self.column_ids.iter().enumerate() {
                    let field = fields.get(idx).ok_or_else(|| {
                        Error::invalid(format!(
                            "parquet row has {} columns, column {idx} requested",
                            fields.len()
                        ))
                    })?;
                    let value = parquet_field_to_value(field, self.read_types[slot])?;
                    columns[slot].push_value(&value)?;
                }
                Ok(true)
            }
        }
    }
}

/// Parse a delimited-text field per its declared logical type.
pub fn field_to_value(field: &str, typ: LType) -> Result<Value> {
    Ok(match typ.id {
        LTypeId::Date => Value::Date(DateValue::parse_iso(field)?),
        LTypeId::Integer => Value::Integer(
            field
                .parse::<i64>()
                .map_err(|err| Error::invalid(format!("bad integer {field:?}: {err}")))?,
        ),
        LTypeId::Float => Value::Float(
            field
                .parse::<f64>()
                .map_err(|err| Error::invalid(format!("bad float {field:?}: {err}")))?,
        ),
        LTypeId::Decimal => parse_decimal(field, typ.scale)?,
        LTypeId::Varchar => Value::Varchar(field.to_string()),
        other => {
            return Err(Error::internal(format!(
                "{other:?} columns do not appear in data files"
            )))
        }
    })
}

fn parse_decimal(field: &str, scale: u8) -> Result<Value> {
    let bad = |detail: &str| Error::invalid(format!("bad decimal {field:?}: {detail}"));
    let (neg, rest) = match field.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, field),
    };
    let (int_part, frac_part) = match rest.split_once('.') {
        Some((i, f)) => (i, f),
        None => (rest, ""),
    };
    let int: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| bad("integer part"))?
    };
    let mut frac = 0i64;
    let scale = scale as usize;
    for i in 0..scale {
        let digit = frac_part.as_bytes().get(i).copied().unwrap_or(b'0');
        if !digit.is_ascii_digit() {
            return Err(bad("fractional part"));
        }
        frac = frac * 10 + (digit - b'0') as i64;
    }
    let pow = 10i64.pow(scale as u32);
    let mut value = int
        .checked_mul(pow)
        .and_then(|v| v.checked_add(frac))
        .ok_or_else(|| bad("out of range"))?;
    if neg {
        value = -value;
    }
    Ok(Value::Decimal {
        value,
        scale: scale as u8,
    })
}

/// Convert a Parquet field per the declared logical type. Integer date
/// columns encode days since 1970-01-01; integer columns may arrive as 32- or
/// 64-bit values.
pub fn parquet_field_to_value(field: &Field, typ: LType) -> Result<Value> {
    if matches!(field, Field::Null) {
        return Ok(Value::Null);
    }
    Ok(match (typ.id, field) {
        (LTypeId::Date, Field::Date(days)) => Value::Date(DateValue::from_epoch_days(*days)?),
        (LTypeId::Date, Field::Int(days)) => Value::Date(DateValue::from_epoch_days(*days)?),
        (LTypeId::Integer, Field::Int(v)) => Value::Integer(*v as i64),
        (LTypeId::Integer, Field::Long(v)) => Value::Integer(*v),
        (LTypeId::Decimal, Field::Int(v)) => Value::Decimal {
            value: *v as i64,
            scale: typ.scale,
        },
        (LTypeId::Decimal, Field::Long(v)) => Value::Decimal {
            value: *v,
            scale: typ.scale,
        },
        (LTypeId::Decimal, Field::Double(v)) => Value::Decimal {
            value: (v * 10f64.powi(typ.scale as i32)).round() as i64,
            scale: typ.scale,
        },
        (LTypeId::Float, Field::Double(v)) => Value::Float(*v),
        (LTypeId::Float, Field::Float(v)) => Value::Float(*v as f64),
        (LTypeId::Varchar, Field::Str(v)) => Value::Varchar(v.clone()),
        (_, other) => {
            return Err(Error::invalid(format!(
                "parquet field {other} does not fit a {typ} column"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_fields_per_declared_type() {
        assert_eq!(
            field_to_value("1995-03-15", LType::date()).unwrap(),
            Value::Date(DateValue::new(1995, 3, 15))
        );
        assert_eq!(
            field_to_value("42", LType::integer()).unwrap(),
            Value::Integer(42)
        );
        assert_eq!(
            field_to_value("1234.56", LType::decimal(15, 2)).unwrap(),
            Value::Decimal {
                value: 123456,
                scale: 2
            }
        );
        assert_eq!(
            field_to_value("-0.07", LType::decimal(15, 2)).unwrap(),
            Value::Decimal {
                value: -7,
                scale: 2
            }
        );
        assert!(field_to_value("x", LType::integer()).is_err());
    }

    #[test]
    fn reads_pipe_delimited_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.tbl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "0|AFRICA|lar deposits|").unwrap();
        writeln!(file, "1|AMERICA|hs use ironic|").unwrap();
        drop(file);

        let config = ExecConfig::new(DataFormat::Csv, dir.path());
        // Read r_name (1) and r_regionkey (0), in catalog order.
        let mut scanner = TableScanner::open(
            &config,
            "region",
            vec![0, 1],
            vec![LType::integer(), LType::varchar(25)],
        )
        .unwrap();
        let chunk = scanner.read_chunk(10).unwrap();
        assert_eq!(chunk.card(), 2);
        assert_eq!(chunk.value(0, 1), Value::Integer(1));
        assert_eq!(chunk.value(1, 0), Value::Varchar("AFRICA".into()));
        let next = scanner.read_chunk(10).unwrap();
        assert_eq!(next.card(), 0);
    }

    #[test]
    fn missing_file_is_a_user_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExecConfig::new(DataFormat::Csv, dir.path());
        let err =
            TableScanner::open(&config, "nation", vec![0], vec![LType::integer()]).unwrap_err();
        assert!(!err.is_internal());
    }
}
