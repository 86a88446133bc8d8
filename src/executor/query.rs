//! Compiled statements

use std::fmt;

use super::cursor::ResultSet;
use super::executor;
use crate::database::Database;
use crate::error::{Error, Result};
use crate::sql::{Parser, Statement};
use crate::storage::Value;

/// A parsed statement, ready to run any number of times
///
/// A `Query` holds no table references and no parameter values, so one
/// instance can be shared between threads and executions. Parameters are
/// supplied to `execute`.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    sql: String,
    statement: Statement,
    param_count: usize,
}

impl Query {
    /// Parse a single statement. A trailing `;` is allowed.
    pub fn parse(sql: &str) -> Result<Self> {
        let mut parser = Parser::new(sql)?;
        let statement = parser.parse()?;
        parser.expect_end()?;
        Ok(Self {
            sql: sql.to_string(),
            statement,
            param_count: parser.param_count(),
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// Number of `?` placeholders
    pub fn param_count(&self) -> usize {
        self.param_count
    }

    /// True if running the query changes the set of tables
    pub fn is_ddl(&self) -> bool {
        self.statement.is_ddl()
    }

    /// Run against `db` with one value per placeholder
    pub fn execute(&self, db: &Database, params: &[Value]) -> Result<ResultSet> {
        if params.len() < self.param_count {
            return Err(Error::UnboundParameter(params.len() + 1));
        }
        if params.len() > self.param_count {
            return Err(Error::ExecutionError(format!(
                "{} parameters supplied but the statement has {}",
                params.len(),
                self.param_count
            )));
        }
        executor::execute(db, &self.statement, params)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_counts_params() {
        let query = Query::parse("SELECT * FROM t WHERE a = ? AND b < ?;").unwrap();
        assert_eq!(query.param_count(), 2);
        assert!(matches!(query.statement(), Statement::Select(_)));
        assert!(!query.is_ddl());
    }

    #[test]
    fn test_parse_rejects_trailing_text() {
        assert!(Query::parse("SELECT 1 SELECT 2").is_err());
        assert!(Query::parse("DROP TABLE t").unwrap().is_ddl());
    }

    #[test]
    fn test_param_count_checked() {
        let db = Database::in_memory().unwrap();
        let query = Query::parse("SELECT ? + 1").unwrap();
        assert!(matches!(
            query.execute(&db, &[]),
            Err(Error::UnboundParameter(1))
        ));
        assert!(query
            .execute(&db, &[Value::Integer(1), Value::Integer(2)])
            .is_err());

        let mut rs = query.execute(&db, &[Value::Integer(41)]).unwrap();
        assert!(rs.next());
        assert_eq!(rs.get_long(0).unwrap(), 42);
    }
}
