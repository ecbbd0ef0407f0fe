use std::cmp::Ordering;
use std::fmt;

use quiver_result::{Error, Result};
use time::{Date, Month};

use crate::types::LType;

/// Calendar date carried as (year, month, day). Orders chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateValue {
    pub year: i32,
    pub month: u8,
    pub day: u8,
}

impl DateValue {
    pub fn new(year: i32, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    /// Parse an ISO `YYYY-MM-DD` date.
    pub fn parse_iso(field: &str) -> Result<Self> {
        let format = time::macros::format_description!("[year]-[month]-[day]");
        let date = Date::parse(field, &format)
            .map_err(|err| Error::invalid(format!("bad date {field:?}: {err}")))?;
        Ok(Self {
            year: date.year(),
            month: date.month() as u8,
            day: date.day(),
        })
    }

    /// Decode a days-since-1970-01-01 value, the encoding columnar files use
    /// for date columns.
    pub fn from_epoch_days(days: i32) -> Result<Self> {
        let epoch = Date::from_calendar_date(1970, Month::January, 1)
            .map_err(|err| Error::internal(err))?;
        let date = Date::from_julian_day(epoch.to_julian_day() + days)
            .map_err(|err| Error::invalid(format!("date out of range: {days} days: {err}")))?;
        Ok(Self {
            year: date.year(),
            month: date.month() as u8,
            day: date.day(),
        })
    }

    /// Days since 1970-01-01.
    pub fn to_epoch_days(self) -> Result<i32> {
        let date = self.to_date()?;
        let epoch = Date::from_calendar_date(1970, Month::January, 1)
            .map_err(|err| Error::internal(err))?;
        Ok(date.to_julian_day() - epoch.to_julian_day())
    }

    /// Shift by an interval. Month and year arithmetic clamps the day to the
    /// end of the target month.
    pub fn add_interval(self, interval: &IntervalValue, negate: bool) -> Result<Self> {
        let count = if negate {
            -interval.count
        } else {
            interval.count
        };
        match interval.unit {
            IntervalUnit::Day => {
                let days = self.to_epoch_days()? as i64 + count;
                let days = i32::try_from(days)
                    .map_err(|_| Error::invalid("date arithmetic out of range"))?;
                Self::from_epoch_days(days)
            }
            IntervalUnit::Month => self.add_months(count),
            IntervalUnit::Year => self.add_months(count * 12),
        }
    }

    fn add_months(self, months: i64) -> Result<Self> {
        let total = (self.year as i64) * 12 + (self.month as i64 - 1) + months;
        let year = total.div_euclid(12);
        let month = (total.rem_euclid(12) + 1) as u8;
        let year =
            i32::try_from(year).map_err(|_| Error::invalid("date arithmetic out of range"))?;
        let month_enum = Month::try_from(month).map_err(|err| Error::internal(err))?;
        let last = time::util::days_in_year_month(year, month_enum);
        Ok(Self {
            year,
            month,
            day: self.day.min(last),
        })
    }

    fn to_date(self) -> Result<Date> {
        let month = Month::try_from(self.month)
            .map_err(|err| Error::invalid(format!("bad month {}: {err}", self.month)))?;
        Date::from_calendar_date(self.year, month, self.day).map_err(|err| {
            Error::invalid(format!(
                "bad date {}-{}-{}: {err}",
                self.year, self.month, self.day
            ))
        })
    }
}

impl fmt::Display for DateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Interval unit. Closed set; the binder rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalUnit {
    Day,
    Month,
    Year,
}

impl fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntervalUnit::Day => write!(f, "day"),
            IntervalUnit::Month => write!(f, "month"),
            IntervalUnit::Year => write!(f, "year"),
        }
    }
}

/// Interval scalar: a count of units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalValue {
    pub count: i64,
    pub unit: IntervalUnit,
}

/// Immutable scalar tagged by its logical type.
///
/// Decimals carry a 64-bit payload plus scale: `value = payload / 10^scale`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Decimal { value: i64, scale: u8 },
    Date(DateValue),
    Interval(IntervalValue),
    Varchar(String),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn ltype(&self) -> LType {
        match self {
            Value::Null => LType::invalid(),
            Value::Boolean(_) => LType::boolean(),
            Value::Integer(_) => LType::integer(),
            Value::Float(_) => LType::float(),
            Value::Decimal { scale, .. } => LType::decimal(18, *scale),
            Value::Date(_) => LType::date(),
            Value::Interval(_) => LType::interval(),
            Value::Varchar(_) => LType::varchar(0),
        }
    }

    /// Total order used by sort tie-breaks and min/max aggregates. NULL sorts
    /// before every non-NULL value; values of mismatched types do not occur
    /// inside one column.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (
                Value::Decimal { value: a, scale: sa },
                Value::Decimal { value: b, scale: sb },
            ) => {
                if sa == sb {
                    a.cmp(b)
                } else {
                    let fa = *a as f64 / 10f64.powi(*sa as i32);
                    let fb = *b as f64 / 10f64.powi(*sb as i32);
                    fa.total_cmp(&fb)
                }
            }
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Varchar(a), Value::Varchar(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(v) => write!(f, "{v}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal { value, scale } => {
                if *scale == 0 {
                    return write!(f, "{value}");
                }
                let pow = 10i64.pow(*scale as u32);
                let sign = if *value < 0 { "-" } else { "" };
                let abs = value.unsigned_abs();
                let pow = pow as u64;
                write!(
                    f,
                    "{sign}{}.{:0width$}",
                    abs / pow,
                    abs % pow,
                    width = *scale as usize
                )
            }
            Value::Date(v) => write!(f, "{v}"),
            Value::Interval(v) => write!(f, "{} {}", v.count, v.unit),
            Value::Varchar(v) => write!(f, "{v}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_dates_round_trip_through_epoch_days() {
        let d = DateValue::parse_iso("1995-03-15").unwrap();
        assert_eq!(d, DateValue::new(1995, 3, 15));
        let days = d.to_epoch_days().unwrap();
        assert_eq!(DateValue::from_epoch_days(days).unwrap(), d);
        assert_eq!(DateValue::from_epoch_days(0).unwrap(), DateValue::new(1970, 1, 1));
    }

    #[test]
    fn interval_arithmetic_clamps_month_ends() {
        let d = DateValue::new(1996, 1, 31);
        let one_month = IntervalValue {
            count: 1,
            unit: IntervalUnit::Month,
        };
        assert_eq!(
            d.add_interval(&one_month, false).unwrap(),
            DateValue::new(1996, 2, 29)
        );
        let ninety_days = IntervalValue {
            count: 90,
            unit: IntervalUnit::Day,
        };
        assert_eq!(
            DateValue::new(1995, 3, 15).add_interval(&ninety_days, false).unwrap(),
            DateValue::new(1995, 6, 13)
        );
    }

    #[test]
    fn decimal_display_keeps_scale() {
        let v = Value::Decimal {
            value: 123450,
            scale: 2,
        };
        assert_eq!(v.to_string(), "1234.50");
        let neg = Value::Decimal {
            value: -75,
            scale: 2,
        };
        assert_eq!(neg.to_string(), "-0.75");
    }

    #[test]
    fn null_sorts_first() {
        assert_eq!(Value::Null.compare(&Value::Integer(-5)), Ordering::Less);
        assert_eq!(
            Value::Varchar("CANADA".into()).compare(&Value::Varchar("BRAZIL".into())),
            Ordering::Greater
        );
    }
}
