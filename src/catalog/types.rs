//! Column data types

use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL Data Types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean type
    Boolean,
    /// Small integer (16-bit)
    SmallInt,
    /// Integer (32-bit)
    Integer,
    /// Big integer (64-bit)
    BigInt,
    /// Single-precision floating point
    Float,
    /// Double-precision floating point
    Double,
    /// Fixed-length character string
    Char(usize),
    /// Variable-length character string with max length
    Varchar(usize),
    /// Unlimited text
    Text,
    /// Date (days since epoch)
    Date,
    /// Time of day (milliseconds since midnight)
    Time,
    /// Timestamp (milliseconds since epoch)
    Timestamp,
    /// Binary data
    Blob,
}

impl DataType {
    /// Check if this type is an integer type
    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::SmallInt | DataType::Integer | DataType::BigInt)
    }

    /// Check if this type is numeric
    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, DataType::Float | DataType::Double)
    }

    /// Check if this type is a string type
    pub fn is_string(&self) -> bool {
        matches!(
            self,
            DataType::Char(_) | DataType::Varchar(_) | DataType::Text
        )
    }

    /// Maximum length of a string type, if bounded
    pub fn max_length(&self) -> Option<usize> {
        match self {
            DataType::Char(n) | DataType::Varchar(n) => Some(*n),
            _ => None,
        }
    }

    /// Check if this type is comparable with another type
    pub fn is_comparable_with(&self, other: &DataType) -> bool {
        match (self, other) {
            (a, b) if a == b => true,
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            (a, b) if a.is_string() && b.is_string() => true,
            (DataType::Date, DataType::Timestamp) | (DataType::Timestamp, DataType::Date) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Boolean => write!(f, "BOOLEAN"),
            DataType::SmallInt => write!(f, "SMALLINT"),
            DataType::Integer => write!(f, "INTEGER"),
            DataType::BigInt => write!(f, "BIGINT"),
            DataType::Float => write!(f, "FLOAT"),
            DataType::Double => write!(f, "DOUBLE"),
            DataType::Char(n) => write!(f, "CHAR({})", n),
            DataType::Varchar(n) => write!(f, "VARCHAR({})", n),
            DataType::Text => write!(f, "TEXT"),
            DataType::Date => write!(f, "DATE"),
            DataType::Time => write!(f, "TIME"),
            DataType::Timestamp => write!(f, "TIMESTAMP"),
            DataType::Blob => write!(f, "BLOB"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_comparison() {
        assert!(DataType::Integer.is_comparable_with(&DataType::BigInt));
        assert!(DataType::Varchar(50).is_comparable_with(&DataType::Text));
        assert!(!DataType::Integer.is_comparable_with(&DataType::Text));
    }

    #[test]
    fn test_display_and_length() {
        assert_eq!(DataType::Varchar(32).to_string(), "VARCHAR(32)");
        assert_eq!(DataType::Timestamp.to_string(), "TIMESTAMP");
        assert_eq!(DataType::Char(1).max_length(), Some(1));
    }
}
