//! SQL statement tree
//!
//! Statements own their expressions in unbound form. Binding happens at
//! execution time, once the referenced tables are known.

use super::expr::Expr;
use crate::catalog::Schema;

/// A SQL statement
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    CreateTable(CreateTableStatement),
    DropTable(DropTableStatement),
    ShowTables,
}

impl Statement {
    /// True for statements that change the catalog
    pub fn is_ddl(&self) -> bool {
        matches!(self, Statement::CreateTable(_) | Statement::DropTable(_))
    }

    /// Tables the statement reads or writes
    pub fn table_names(&self) -> Vec<&str> {
        match self {
            Statement::Select(s) => s.from.iter().map(|t| t.name.as_str()).collect(),
            Statement::Insert(s) => vec![s.table_name.as_str()],
            Statement::Update(s) => vec![s.table_name.as_str()],
            Statement::Delete(s) => vec![s.table_name.as_str()],
            Statement::CreateTable(s) => vec![s.table_name.as_str()],
            Statement::DropTable(s) => vec![s.table_name.as_str()],
            Statement::ShowTables => Vec::new(),
        }
    }
}

/// SELECT statement
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectStatement {
    pub distinct: bool,
    pub columns: Vec<SelectItem>,
    /// Comma-separated FROM list; empty for `SELECT <exprs>`
    pub from: Vec<TableRef>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
}

/// A single item in the SELECT list
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// All columns (*)
    Wildcard,
    /// A table's all columns (table.*)
    QualifiedWildcard(String),
    /// An expression with optional alias
    Expr { expr: Expr, alias: Option<String> },
}

/// Table reference
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    /// Name that qualifies columns of this table in the query
    pub fn reference_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// ORDER BY item
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: Expr,
    pub ascending: bool,
}

/// INSERT statement
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table_name: String,
    /// Column names (optional)
    pub columns: Option<Vec<String>>,
    pub values: Vec<Vec<Expr>>,
}

/// UPDATE statement
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table_name: String,
    pub assignments: Vec<Assignment>,
    pub where_clause: Option<Expr>,
}

/// Column assignment (for UPDATE)
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

/// DELETE statement
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table_name: String,
    pub where_clause: Option<Expr>,
}

/// CREATE TABLE statement
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStatement {
    pub table_name: String,
    pub schema: Schema,
    pub if_not_exists: bool,
}

/// DROP TABLE statement
#[derive(Debug, Clone, PartialEq)]
pub struct DropTableStatement {
    pub table_name: String,
    pub if_exists: bool,
}
