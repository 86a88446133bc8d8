//! Table schemas and column metadata

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::types::DataType;
use crate::error::{Error, Result};
use crate::storage::Value;

/// Column definition in a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Data type
    pub data_type: DataType,
    /// Column position (0-indexed)
    pub position: usize,
    /// Is this column nullable?
    pub nullable: bool,
    /// Value used when an INSERT omits the column
    pub default: Option<Value>,
    /// Is this part of the primary key?
    pub primary_key: bool,
    /// Is this column unique?
    pub unique: bool,
    /// Filled from the table's counter when inserted as NULL
    pub auto_increment: bool,
}

impl Column {
    /// Create a new column with minimal required fields
    pub fn new(name: impl Into<String>, data_type: DataType, position: usize) -> Self {
        Self {
            name: name.into(),
            data_type,
            position,
            nullable: true,
            default: None,
            primary_key: false,
            unique: false,
            auto_increment: false,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Set primary key flag. Key columns are never nullable.
    pub fn primary_key(mut self, pk: bool) -> Self {
        self.primary_key = pk;
        if pk {
            self.nullable = false;
        }
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn auto_increment(mut self, auto_increment: bool) -> Self {
        self.auto_increment = auto_increment;
        self
    }

    fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.data_type);
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        } else if !self.nullable {
            sql.push_str(" NOT NULL");
        }
        if self.unique && !self.primary_key {
            sql.push_str(" UNIQUE");
        }
        if self.auto_increment {
            sql.push_str(" AUTO_INCREMENT");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&default.to_sql_literal());
        }
        sql
    }
}

/// Table schema - defines the structure of a table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    /// Ordered list of columns
    columns: Vec<Column>,
    /// Lowercased column name to index mapping
    name_to_index: HashMap<String, usize>,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl Schema {
    /// Create a new empty schema
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
            name_to_index: HashMap::new(),
        }
    }

    /// Create a schema from a list of columns
    pub fn from_columns(columns: Vec<Column>) -> Self {
        let mut schema = Self::new();
        for col in columns {
            schema.add_column(col);
        }
        schema
    }

    /// Add a column to the schema. A later column with a duplicate name
    /// is caught by `validate`.
    pub fn add_column(&mut self, mut column: Column) {
        column.position = self.columns.len();
        self.name_to_index
            .entry(column.name.to_lowercase())
            .or_insert(column.position);
        self.columns.push(column);
    }

    /// Get column by name (case-insensitive)
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.get_column_index(name).map(|idx| &self.columns[idx])
    }

    /// Get column by index
    pub fn get_column_by_index(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    /// Get column index by name (case-insensitive)
    pub fn get_column_index(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(&name.to_lowercase()).copied()
    }

    /// Get all columns
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Get number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.get_column_index(name).is_some()
    }

    /// Get primary key columns
    pub fn primary_key_columns(&self) -> Vec<&Column> {
        self.columns.iter().filter(|c| c.primary_key).collect()
    }

    /// Get column names
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Check that `table` can be created with this schema
    pub fn validate(&self, table: &str) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::ParseError(format!(
                "table '{}' must have at least one column",
                table
            )));
        }

        let mut seen = HashMap::new();
        for column in &self.columns {
            if seen.insert(column.name.to_lowercase(), ()).is_some() {
                return Err(Error::ColumnAlreadyExists(
                    column.name.clone(),
                    table.to_string(),
                ));
            }
            if column.auto_increment && !column.data_type.is_integer() {
                return Err(Error::ParseError(format!(
                    "AUTO_INCREMENT column '{}' must have an integer type",
                    column.name
                )));
            }
            if let Some(default) = &column.default {
                let coerced = default.coerce_to(&column.data_type, &column.name)?;
                if coerced.is_null() && !column.nullable {
                    return Err(Error::NullNotAllowed(column.name.clone()));
                }
            }
        }
        Ok(())
    }

    /// CREATE TABLE text that parses back into this schema
    pub fn to_create_sql(&self, table: &str) -> String {
        let columns: Vec<String> = self.columns.iter().map(Column::to_sql).collect();
        format!("CREATE TABLE {} ({})", table, columns.join(", "))
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Schema {
        let mut schema = Schema::new();
        schema.add_column(
            Column::new("id", DataType::Integer, 0)
                .primary_key(true)
                .auto_increment(true),
        );
        schema.add_column(Column::new("name", DataType::Varchar(100), 1).nullable(false));
        schema.add_column(Column::new("email", DataType::Varchar(255), 2).unique(true));
        schema.add_column(Column::new("score", DataType::Double, 3).default(Value::Float(0.0)));
        schema
    }

    #[test]
    fn test_schema_creation() {
        let schema = users();

        assert_eq!(schema.column_count(), 4);
        assert!(schema.has_column("id"));
        assert!(schema.has_column("NAME"));
        assert!(!schema.has_column("unknown"));

        let id_col = schema.get_column("id").unwrap();
        assert!(id_col.primary_key);
        assert!(!id_col.nullable);
        assert_eq!(schema.get_column_index("Email"), Some(2));
        schema.validate("users").unwrap();
    }

    #[test]
    fn test_create_sql() {
        assert_eq!(
            users().to_create_sql("users"),
            "CREATE TABLE users (id INTEGER PRIMARY KEY AUTO_INCREMENT, \
             name VARCHAR(100) NOT NULL, email VARCHAR(255) UNIQUE, \
             score DOUBLE DEFAULT 0.0)"
        );
    }

    #[test]
    fn test_validate_rejects_bad_schemas() {
        assert!(Schema::new().validate("t").is_err());

        let dup = Schema::from_columns(vec![
            Column::new("a", DataType::Integer, 0),
            Column::new("A", DataType::Text, 1),
        ]);
        assert!(matches!(
            dup.validate("t"),
            Err(Error::ColumnAlreadyExists(..))
        ));

        let auto_text = Schema::from_columns(vec![
            Column::new("a", DataType::Text, 0).auto_increment(true)
        ]);
        assert!(auto_text.validate("t").is_err());

        let bad_default = Schema::from_columns(vec![
            Column::new("a", DataType::Integer, 0).default(Value::from("x"))
        ]);
        assert!(matches!(
            bad_default.validate("t"),
            Err(Error::TypeMismatch { .. })
        ));
    }
}
