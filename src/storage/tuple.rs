//! Values and rows
//!
//! `Value` is the runtime representation of one column value. `Tuple` is a
//! row, stored in blocks with the tagged little-endian encoding below.

use std::cmp::Ordering;
use std::fmt;
use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::DataType;
use crate::error::{Error, Result};

/// Days from 0001-01-01 (CE day 1) to 1970-01-01
const UNIX_EPOCH_CE_DAYS: i32 = 719_163;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// A value in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value (32-bit)
    Integer(i32),
    /// Big integer value (64-bit)
    BigInt(i64),
    /// Float value (64-bit)
    Float(f64),
    /// String value
    String(String),
    /// Date value (days since epoch)
    Date(i32),
    /// Time of day (milliseconds since midnight)
    Time(i64),
    /// Timestamp value (milliseconds since epoch)
    Timestamp(i64),
    /// Binary data
    Bytes(Vec<u8>),
}

// Floats compare by bits so values can key hash maps (GROUP BY, DISTINCT).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(v) => v.hash(state),
            Value::Integer(v) => v.hash(state),
            Value::BigInt(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::String(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
            Value::Time(v) => v.hash(state),
            Value::Timestamp(v) => v.hash(state),
            Value::Bytes(v) => v.hash(state),
        }
    }
}

/// Arithmetic operators shared by `Value::arith`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl Value {
    /// Integer literal in the narrowest type that holds it
    pub fn from_i64(v: i64) -> Value {
        match i32::try_from(v) {
            Ok(i) => Value::Integer(i),
            Err(_) => Value::BigInt(v),
        }
    }

    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to convert to boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::Integer(i) => Some(*i != 0),
            Value::BigInt(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Boolean(b) => Some(*b as i64),
            Value::Integer(i) => Some(*i as i64),
            Value::BigInt(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::Date(d) => Some(*d as i64),
            Value::Time(t) | Value::Timestamp(t) => Some(*t),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::String(s) => s.trim().parse().ok(),
            other => other.as_i64().map(|i| i as f64),
        }
    }

    /// Borrow the string payload
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Boolean(_) => "BOOLEAN",
            Value::Integer(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "STRING",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Bytes(_) => "BYTES",
        }
    }

    fn is_integral(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::BigInt(_) | Value::Boolean(_))
    }

    fn is_number(&self) -> bool {
        self.is_integral() || matches!(self, Value::Float(_))
    }

    /// Compare two values (for WHERE clauses, ORDER BY, etc.)
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            // NULL sorts first
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),

            (a, b) if a.is_integral() && b.is_integral() => {
                Some(a.as_i64()?.cmp(&b.as_i64()?))
            }
            (a, b) if a.is_number() && b.is_number() => a.as_f64()?.partial_cmp(&b.as_f64()?),

            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Date(d), Value::Timestamp(t)) => Some((*d as i64 * MILLIS_PER_DAY).cmp(t)),
            (Value::Timestamp(t), Value::Date(d)) => Some(t.cmp(&(*d as i64 * MILLIS_PER_DAY))),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),

            // Temporal values compare against their string forms.
            (Value::String(_), Value::Date(_) | Value::Time(_) | Value::Timestamp(_)) => {
                let coerced = self.coerce_like(other)?;
                coerced.compare(other)
            }
            (Value::Date(_) | Value::Time(_) | Value::Timestamp(_), Value::String(_)) => {
                let coerced = other.coerce_like(self)?;
                self.compare(&coerced)
            }

            _ => None,
        }
    }

    fn coerce_like(&self, target: &Value) -> Option<Value> {
        let data_type = match target {
            Value::Date(_) => DataType::Date,
            Value::Time(_) => DataType::Time,
            Value::Timestamp(_) => DataType::Timestamp,
            _ => return None,
        };
        self.coerce_to(&data_type, "").ok()
    }

    /// Apply an arithmetic operator. NULL in, NULL out.
    pub fn arith(&self, op: ArithOp, other: &Value) -> Result<Value> {
        if self.is_null() || other.is_null() {
            return Ok(Value::Null);
        }

        if let (Value::Timestamp(t), ArithOp::Add | ArithOp::Sub) = (self, op) {
            if let Some(delta) = other.as_i64().filter(|_| other.is_integral()) {
                let ms = if op == ArithOp::Add {
                    t.checked_add(delta)
                } else {
                    t.checked_sub(delta)
                }
                .ok_or_else(|| Error::ExecutionError("integer overflow".to_string()))?;
                return Ok(Value::Timestamp(ms));
            }
        }

        if self.is_integral() && other.is_integral() {
            let (a, b) = (self.as_i64().unwrap_or(0), other.as_i64().unwrap_or(0));
            let result = match op {
                ArithOp::Add => a.checked_add(b),
                ArithOp::Sub => a.checked_sub(b),
                ArithOp::Mul => a.checked_mul(b),
                ArithOp::Div | ArithOp::Rem if b == 0 => return Err(Error::DivisionByZero),
                ArithOp::Div => a.checked_div(b),
                ArithOp::Rem => a.checked_rem(b),
            }
            .ok_or_else(|| Error::ExecutionError("integer overflow".to_string()))?;

            let both_narrow = matches!(self, Value::Integer(_)) && matches!(other, Value::Integer(_));
            return Ok(if both_narrow {
                Value::from_i64(result)
            } else {
                Value::BigInt(result)
            });
        }

        let (Some(a), Some(b)) = (self.as_f64(), other.as_f64()) else {
            return Err(Error::TypeMismatch {
                from: self.type_name().to_string(),
                to: other.type_name().to_string(),
            });
        };
        if matches!(op, ArithOp::Div | ArithOp::Rem) && b == 0.0 {
            return Err(Error::DivisionByZero);
        }
        Ok(Value::Float(match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
            ArithOp::Rem => a % b,
        }))
    }

    /// Convert to a column's type. `column` names the column in errors.
    pub fn coerce_to(&self, data_type: &DataType, column: &str) -> Result<Value> {
        let mismatch = || Error::TypeMismatch {
            from: self.type_name().to_string(),
            to: data_type.to_string(),
        };

        if self.is_null() {
            return Ok(Value::Null);
        }

        let value = match data_type {
            DataType::Boolean => match self {
                Value::String(s) => match s.to_ascii_lowercase().as_str() {
                    "true" | "t" | "1" => Value::Boolean(true),
                    "false" | "f" | "0" => Value::Boolean(false),
                    _ => return Err(mismatch()),
                },
                other => Value::Boolean(other.as_bool().ok_or_else(mismatch)?),
            },
            DataType::SmallInt | DataType::Integer => {
                let v = self.integral_value().ok_or_else(mismatch)?;
                let narrow = i32::try_from(v).map_err(|_| mismatch())?;
                if *data_type == DataType::SmallInt && i16::try_from(narrow).is_err() {
                    return Err(mismatch());
                }
                Value::Integer(narrow)
            }
            DataType::BigInt => Value::BigInt(self.integral_value().ok_or_else(mismatch)?),
            DataType::Float | DataType::Double => match self {
                Value::Date(_) | Value::Time(_) | Value::Timestamp(_) | Value::Bytes(_) => {
                    return Err(mismatch())
                }
                other => Value::Float(other.as_f64().ok_or_else(mismatch)?),
            },
            DataType::Char(_) | DataType::Varchar(_) | DataType::Text => match self {
                Value::Bytes(_) => return Err(mismatch()),
                other => Value::String(other.to_string()),
            },
            DataType::Date => match self {
                Value::Date(_) => self.clone(),
                Value::Timestamp(ms) => Value::Date(ms.div_euclid(MILLIS_PER_DAY) as i32),
                Value::String(s) => Value::Date(parse_date(s).ok_or_else(mismatch)?),
                _ => return Err(mismatch()),
            },
            DataType::Time => match self {
                Value::Time(_) => self.clone(),
                Value::Timestamp(ms) => Value::Time(ms.rem_euclid(MILLIS_PER_DAY)),
                Value::String(s) => Value::Time(parse_time(s).ok_or_else(mismatch)?),
                _ => return Err(mismatch()),
            },
            DataType::Timestamp => match self {
                Value::Timestamp(_) => self.clone(),
                Value::Date(d) => Value::Timestamp(*d as i64 * MILLIS_PER_DAY),
                Value::Integer(_) | Value::BigInt(_) => {
                    Value::Timestamp(self.as_i64().ok_or_else(mismatch)?)
                }
                Value::String(s) => Value::Timestamp(parse_timestamp(s).ok_or_else(mismatch)?),
                _ => return Err(mismatch()),
            },
            DataType::Blob => match self {
                Value::Bytes(_) => self.clone(),
                Value::String(s) => Value::Bytes(s.as_bytes().to_vec()),
                _ => return Err(mismatch()),
            },
        };

        if let (Some(max), Value::String(s)) = (data_type.max_length(), &value) {
            if s.chars().count() > max {
                return Err(Error::ValueTooLarge(column.to_string()));
            }
        }
        Ok(value)
    }

    fn integral_value(&self) -> Option<i64> {
        match self {
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Float(_) => None,
            Value::Date(_) | Value::Time(_) | Value::Timestamp(_) | Value::Bytes(_) => None,
            other => other.as_i64(),
        }
    }

    /// Render as a SQL literal that the parser reads back as the same value
    pub fn to_sql_literal(&self) -> String {
        match self {
            Value::Null | Value::Bytes(_) => "NULL".to_string(),
            Value::Boolean(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::BigInt(i) => i.to_string(),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => format!("{:.1}", f),
            Value::Float(f) => f.to_string(),
            other => format!("'{}'", other.to_string().replace('\'', "''")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Integer(i) => write!(f, "{}", i),
            Value::BigInt(i) => write!(f, "{}", i),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Date(d) => match date_from_days(*d) {
                Some(date) => write!(f, "{}", date.format("%Y-%m-%d")),
                None => write!(f, "DATE({})", d),
            },
            Value::Time(t) => match time_from_millis(*t) {
                Some(time) => write!(f, "{}", time.format("%H:%M:%S%.3f")),
                None => write!(f, "TIME({})", t),
            },
            Value::Timestamp(t) => match timestamp_from_millis(*t) {
                Some(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S%.3f")),
                None => write!(f, "TIMESTAMP({})", t),
            },
            Value::Bytes(b) => write!(f, "BYTES[{}]", b.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

pub(crate) fn date_from_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_CE_DAYS)?)
}

pub(crate) fn days_from_date(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - UNIX_EPOCH_CE_DAYS
}

pub(crate) fn time_from_millis(ms: i64) -> Option<NaiveTime> {
    if !(0..MILLIS_PER_DAY).contains(&ms) {
        return None;
    }
    NaiveTime::from_num_seconds_from_midnight_opt(
        (ms / 1000) as u32,
        ((ms % 1000) * 1_000_000) as u32,
    )
}

pub(crate) fn millis_from_time(time: NaiveTime) -> i64 {
    time.num_seconds_from_midnight() as i64 * 1000 + (time.nanosecond() / 1_000_000) as i64
}

pub(crate) fn timestamp_from_millis(ms: i64) -> Option<DateTime<Utc>> {
    let secs = ms.div_euclid(1000);
    let nanos = (ms.rem_euclid(1000) * 1_000_000) as u32;
    DateTime::from_timestamp(secs, nanos)
}

fn parse_date(s: &str) -> Option<i32> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .ok()
        .map(days_from_date)
}

fn parse_time(s: &str) -> Option<i64> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
        .map(millis_from_time)
}

fn parse_timestamp(s: &str) -> Option<i64> {
    let s = s.trim();
    let parsed = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })?;
    Some(Utc.from_utc_datetime(&parsed).timestamp_millis())
}

/// Type tags of the row encoding
mod tag {
    pub const NULL: u8 = 0;
    pub const BOOLEAN: u8 = 1;
    pub const INTEGER: u8 = 2;
    pub const BIGINT: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const STRING: u8 = 5;
    pub const DATE: u8 = 6;
    pub const TIMESTAMP: u8 = 7;
    pub const BYTES: u8 = 8;
    pub const TIME: u8 = 9;
}

/// A tuple (row) in the database
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tuple {
    values: Vec<Value>,
}

impl Tuple {
    /// Create a new tuple from values
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// Get a value by index
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Set a value by index
    pub fn set(&mut self, index: usize, value: Value) {
        if index < self.values.len() {
            self.values[index] = value;
        }
    }

    /// Get all values
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Get number of values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if tuple is empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consume the tuple and return the values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Serialize tuple to binary format
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        // Writes into a Vec cannot fail.
        let _ = self.write_to(&mut bytes);
        bytes
    }

    fn write_to(&self, out: &mut Vec<u8>) -> std::io::Result<()> {
        out.write_u32::<LittleEndian>(self.values.len() as u32)?;
        for value in &self.values {
            match value {
                Value::Null => out.write_u8(tag::NULL)?,
                Value::Boolean(b) => {
                    out.write_u8(tag::BOOLEAN)?;
                    out.write_u8(*b as u8)?;
                }
                Value::Integer(i) => {
                    out.write_u8(tag::INTEGER)?;
                    out.write_i32::<LittleEndian>(*i)?;
                }
                Value::BigInt(i) => {
                    out.write_u8(tag::BIGINT)?;
                    out.write_i64::<LittleEndian>(*i)?;
                }
                Value::Float(f) => {
                    out.write_u8(tag::FLOAT)?;
                    out.write_f64::<LittleEndian>(*f)?;
                }
                Value::String(s) => {
                    out.write_u8(tag::STRING)?;
                    out.write_u32::<LittleEndian>(s.len() as u32)?;
                    out.extend_from_slice(s.as_bytes());
                }
                Value::Date(d) => {
                    out.write_u8(tag::DATE)?;
                    out.write_i32::<LittleEndian>(*d)?;
                }
                Value::Timestamp(t) => {
                    out.write_u8(tag::TIMESTAMP)?;
                    out.write_i64::<LittleEndian>(*t)?;
                }
                Value::Bytes(b) => {
                    out.write_u8(tag::BYTES)?;
                    out.write_u32::<LittleEndian>(b.len() as u32)?;
                    out.extend_from_slice(b);
                }
                Value::Time(t) => {
                    out.write_u8(tag::TIME)?;
                    out.write_i64::<LittleEndian>(*t)?;
                }
            }
        }
        Ok(())
    }

    /// Deserialize tuple from binary format
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        Self::read_from(&mut cursor)
            .map_err(|e| Error::StorageError(format!("malformed row: {}", e)))
    }

    fn read_from(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        let count = cursor.read_u32::<LittleEndian>()? as usize;
        let remaining = cursor.get_ref().len();
        if count > remaining {
            return Err(invalid_data(format!("{} values in {} bytes", count, remaining)));
        }

        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let value = match cursor.read_u8()? {
                tag::NULL => Value::Null,
                tag::BOOLEAN => Value::Boolean(cursor.read_u8()? != 0),
                tag::INTEGER => Value::Integer(cursor.read_i32::<LittleEndian>()?),
                tag::BIGINT => Value::BigInt(cursor.read_i64::<LittleEndian>()?),
                tag::FLOAT => Value::Float(cursor.read_f64::<LittleEndian>()?),
                tag::STRING => {
                    let bytes = read_len_prefixed(cursor)?;
                    Value::String(String::from_utf8(bytes).map_err(|e| invalid_data(e.to_string()))?)
                }
                tag::DATE => Value::Date(cursor.read_i32::<LittleEndian>()?),
                tag::TIMESTAMP => Value::Timestamp(cursor.read_i64::<LittleEndian>()?),
                tag::BYTES => Value::Bytes(read_len_prefixed(cursor)?),
                tag::TIME => Value::Time(cursor.read_i64::<LittleEndian>()?),
                other => return Err(invalid_data(format!("unknown type tag {}", other))),
            };
            values.push(value);
        }
        Ok(Tuple::new(values))
    }
}

fn read_len_prefixed(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Vec<u8>> {
    let len = cursor.read_u32::<LittleEndian>()? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(invalid_data(format!("length {} overruns the row", len)));
    }
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn invalid_data(msg: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg)
}

impl FromIterator<Value> for Tuple {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Tuple::new(iter.into_iter().collect())
    }
}

impl IntoIterator for Tuple {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

impl<'a> IntoIterator for &'a Tuple {
    type Item = &'a Value;
    type IntoIter = std::slice::Iter<'a, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_comparison() {
        assert_eq!(
            Value::Integer(5).compare(&Value::BigInt(3)),
            Some(Ordering::Greater)
        );
        assert_eq!(
            Value::Integer(2).compare(&Value::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Null.compare(&Value::Integer(1)), Some(Ordering::Less));
        assert_eq!(Value::String("a".into()).compare(&Value::Integer(1)), None);
    }

    #[test]
    fn test_arithmetic_promotion() {
        assert_eq!(
            Value::Integer(5).arith(ArithOp::Add, &Value::Integer(3)).unwrap(),
            Value::Integer(8)
        );
        assert_eq!(
            Value::Integer(i32::MAX)
                .arith(ArithOp::Add, &Value::Integer(1))
                .unwrap(),
            Value::BigInt(i32::MAX as i64 + 1)
        );
        assert_eq!(
            Value::Integer(7).arith(ArithOp::Div, &Value::Float(2.0)).unwrap(),
            Value::Float(3.5)
        );
        assert!(Value::Integer(1).arith(ArithOp::Add, &Value::Null).unwrap().is_null());
        assert!(matches!(
            Value::Integer(1).arith(ArithOp::Rem, &Value::Integer(0)),
            Err(Error::DivisionByZero)
        ));
    }

    #[test]
    fn test_timestamp_arithmetic_overflow() {
        let now = Value::Timestamp(1_700_000_000_000);
        assert_eq!(
            now.arith(ArithOp::Add, &Value::Integer(1000)).unwrap(),
            Value::Timestamp(1_700_000_001_000)
        );
        assert!(matches!(
            now.arith(ArithOp::Add, &Value::BigInt(i64::MAX)),
            Err(Error::ExecutionError(msg)) if msg == "integer overflow"
        ));
        assert!(matches!(
            Value::Timestamp(-1).arith(ArithOp::Sub, &Value::BigInt(i64::MAX)),
            Ok(Value::Timestamp(i64::MIN))
        ));
        assert!(Value::Timestamp(-2)
            .arith(ArithOp::Sub, &Value::BigInt(i64::MAX))
            .is_err());
    }

    #[test]
    fn test_coercion() {
        assert_eq!(
            Value::BigInt(12).coerce_to(&DataType::Integer, "a").unwrap(),
            Value::Integer(12)
        );
        assert_eq!(
            Value::Integer(3).coerce_to(&DataType::Double, "a").unwrap(),
            Value::Float(3.0)
        );
        assert_eq!(
            Value::from("1970-01-02").coerce_to(&DataType::Date, "a").unwrap(),
            Value::Date(1)
        );
        assert_eq!(
            Value::from("1970-01-01 00:00:01").coerce_to(&DataType::Timestamp, "a").unwrap(),
            Value::Timestamp(1000)
        );
        assert!(matches!(
            Value::from("toolong").coerce_to(&DataType::Varchar(3), "name"),
            Err(Error::ValueTooLarge(col)) if col == "name"
        ));
        assert!(Value::from("abc").coerce_to(&DataType::Integer, "a").is_err());
    }

    #[test]
    fn test_temporal_display() {
        assert_eq!(Value::Date(0).to_string(), "1970-01-01");
        assert_eq!(Value::Timestamp(1_500).to_string(), "1970-01-01 00:00:01.500");
        assert_eq!(Value::Time(3_600_000).to_string(), "01:00:00.000");
    }

    #[test]
    fn test_sql_literal() {
        assert_eq!(Value::from("it's").to_sql_literal(), "'it''s'");
        assert_eq!(Value::Float(2.0).to_sql_literal(), "2.0");
        assert_eq!(Value::Date(0).to_sql_literal(), "'1970-01-01'");
    }

    #[test]
    fn test_tuple_encoding() {
        let tuple = Tuple::new(vec![
            Value::Integer(1),
            Value::String("hello".to_string()),
            Value::Null,
            Value::Time(42),
            Value::Bytes(vec![1, 2, 3]),
        ]);

        let bytes = tuple.to_bytes();
        assert_eq!(Tuple::from_bytes(&bytes).unwrap(), tuple);
        assert!(Tuple::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(Tuple::from_bytes(&[0xFF, 0xFF, 0xFF, 0xFF]).is_err());
    }
}
