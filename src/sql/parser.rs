//! SQL Parser
//!
//! Recursive descent over the token stream. Expressions come out unbound;
//! function calls are assembled argument by argument so that an arity
//! error surfaces at the offending argument.

use super::ast::*;
use super::expr::{AggregateFunc, BinaryOp, Expr, UnaryOp};
use super::function::Function;
use super::lexer::Lexer;
use super::token::Token;
use crate::catalog::{Column, DataType, Schema};
use crate::error::{Error, Result};
use crate::storage::Value;

/// SQL Parser
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    /// Number of `?` parameters seen so far
    param_count: usize,
}

type Level = fn(&mut Parser) -> Result<Expr>;

impl Parser {
    /// Create a new parser from a SQL string
    pub fn new(sql: &str) -> Result<Self> {
        let mut lexer = Lexer::new(sql);
        let tokens = lexer.tokenize()?;

        Ok(Self {
            tokens,
            position: 0,
            param_count: 0,
        })
    }

    /// Parse a single SQL statement
    pub fn parse(&mut self) -> Result<Statement> {
        let stmt = self.parse_statement()?;

        // Consume optional semicolon
        if self.check(&Token::Semicolon) {
            self.advance();
        }

        Ok(stmt)
    }

    /// Parse multiple SQL statements
    pub fn parse_all(&mut self) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();

        while !self.is_at_end() {
            statements.push(self.parse()?);
        }

        Ok(statements)
    }

    /// Fail unless all input has been consumed
    pub fn expect_end(&self) -> Result<()> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(Error::UnexpectedToken {
                expected: "end of statement".to_string(),
                found: format!("{}", self.current()),
            })
        }
    }

    /// Parameters referenced by the statements parsed so far
    pub fn param_count(&self) -> usize {
        self.param_count
    }

    /// Parse a standalone expression
    pub fn parse_expression(&mut self) -> Result<Expr> {
        self.parse_expr()
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.current() {
            Token::Select => self.parse_select().map(Statement::Select),
            Token::Insert => self.parse_insert().map(Statement::Insert),
            Token::Update => self.parse_update().map(Statement::Update),
            Token::Delete => self.parse_delete().map(Statement::Delete),
            Token::Create => self.parse_create_table().map(Statement::CreateTable),
            Token::Drop => self.parse_drop_table().map(Statement::DropTable),
            Token::Show => {
                self.advance();
                self.expect(&Token::Tables)?;
                Ok(Statement::ShowTables)
            }
            _ => Err(Error::UnexpectedToken {
                expected: "SELECT, INSERT, UPDATE, DELETE, CREATE, DROP or SHOW".to_string(),
                found: format!("{}", self.current()),
            }),
        }
    }

    // ========== SELECT Statement ==========

    fn parse_select(&mut self) -> Result<SelectStatement> {
        self.expect(&Token::Select)?;

        let mut stmt = SelectStatement::default();

        if self.check(&Token::Distinct) {
            self.advance();
            stmt.distinct = true;
        } else if self.check(&Token::All) {
            self.advance();
        }

        stmt.columns = self.parse_select_list()?;

        if self.check(&Token::From) {
            self.advance();
            loop {
                stmt.from.push(self.parse_table_ref()?);
                if !self.check(&Token::Comma) {
                    break;
                }
                self.advance();
            }
        }

        if self.check(&Token::Where) {
            self.advance();
            stmt.where_clause = Some(self.parse_expr()?);
        }

        if self.check(&Token::Group) {
            self.advance();
            self.expect(&Token::By)?;
            stmt.group_by = self.parse_expr_list()?;
        }

        if self.check(&Token::Having) {
            self.advance();
            stmt.having = Some(self.parse_expr()?);
        }

        if self.check(&Token::Order) {
            self.advance();
            self.expect(&Token::By)?;
            stmt.order_by = self.parse_order_by_list()?;
        }

        if self.check(&Token::Limit) {
            self.advance();
            stmt.limit = Some(self.parse_expr()?);
        }

        if self.check(&Token::Offset) {
            self.advance();
            stmt.offset = Some(self.parse_expr()?);
        }

        Ok(stmt)
    }

    fn parse_select_list(&mut self) -> Result<Vec<SelectItem>> {
        let mut items = Vec::new();

        loop {
            items.push(self.parse_select_item()?);

            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }

        Ok(items)
    }

    fn parse_select_item(&mut self) -> Result<SelectItem> {
        if self.check(&Token::Asterisk) {
            self.advance();
            return Ok(SelectItem::Wildcard);
        }

        // table.*
        if let Token::Identifier(name) = self.current().clone() {
            if self.peek() == Some(&Token::Dot) && self.peek_at(2) == Some(&Token::Asterisk) {
                self.position += 3;
                return Ok(SelectItem::QualifiedWildcard(name));
            }
        }

        let expr = self.parse_expr()?;
        let alias = self.parse_alias()?;

        Ok(SelectItem::Expr { expr, alias })
    }

    /// `AS name` or a bare identifier
    fn parse_alias(&mut self) -> Result<Option<String>> {
        if self.check(&Token::As) {
            self.advance();
            return self.expect_identifier().map(Some);
        }
        if let Token::Identifier(alias) = self.current().clone() {
            self.advance();
            return Ok(Some(alias));
        }
        Ok(None)
    }

    fn parse_table_ref(&mut self) -> Result<TableRef> {
        let name = self.expect_identifier()?;
        let alias = self.parse_alias()?;
        Ok(TableRef { name, alias })
    }

    fn parse_order_by_list(&mut self) -> Result<Vec<OrderByItem>> {
        let mut items = Vec::new();

        loop {
            let expr = self.parse_expr()?;
            let ascending = if self.check(&Token::Desc) {
                self.advance();
                false
            } else {
                if self.check(&Token::Asc) {
                    self.advance();
                }
                true
            };
            items.push(OrderByItem { expr, ascending });

            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }

        Ok(items)
    }

    // ========== DML Statements ==========

    fn parse_insert(&mut self) -> Result<InsertStatement> {
        self.expect(&Token::Insert)?;
        self.expect(&Token::Into)?;

        let table_name = self.expect_identifier()?;

        let columns = if self.check(&Token::LParen) {
            self.advance();
            let cols = self.parse_identifier_list()?;
            self.expect(&Token::RParen)?;
            Some(cols)
        } else {
            None
        };

        self.expect(&Token::Values)?;

        let mut values = Vec::new();
        loop {
            self.expect(&Token::LParen)?;
            values.push(self.parse_expr_list()?);
            self.expect(&Token::RParen)?;

            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }

        Ok(InsertStatement {
            table_name,
            columns,
            values,
        })
    }

    fn parse_update(&mut self) -> Result<UpdateStatement> {
        self.expect(&Token::Update)?;

        let table_name = self.expect_identifier()?;

        self.expect(&Token::Set)?;

        let mut assignments = Vec::new();
        loop {
            let column = self.expect_identifier()?;
            self.expect(&Token::Eq)?;
            let value = self.parse_expr()?;
            assignments.push(Assignment { column, value });

            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }

        let where_clause = self.parse_where()?;

        Ok(UpdateStatement {
            table_name,
            assignments,
            where_clause,
        })
    }

    fn parse_delete(&mut self) -> Result<DeleteStatement> {
        self.expect(&Token::Delete)?;
        self.expect(&Token::From)?;

        let table_name = self.expect_identifier()?;
        let where_clause = self.parse_where()?;

        Ok(DeleteStatement {
            table_name,
            where_clause,
        })
    }

    fn parse_where(&mut self) -> Result<Option<Expr>> {
        if self.check(&Token::Where) {
            self.advance();
            Ok(Some(self.parse_expr()?))
        } else {
            Ok(None)
        }
    }

    // ========== DDL Statements ==========

    fn parse_create_table(&mut self) -> Result<CreateTableStatement> {
        self.expect(&Token::Create)?;
        self.expect(&Token::Table)?;

        let if_not_exists = if self.check(&Token::If) {
            self.advance();
            self.expect(&Token::Not)?;
            self.expect(&Token::Exists)?;
            true
        } else {
            false
        };

        let table_name = self.expect_identifier()?;

        self.expect(&Token::LParen)?;

        let mut columns = Vec::new();
        let mut primary_key: Option<Vec<String>> = None;
        loop {
            if self.check(&Token::Primary) {
                self.advance();
                self.expect(&Token::Key)?;
                self.expect(&Token::LParen)?;
                let names = self.parse_identifier_list()?;
                self.expect(&Token::RParen)?;
                if primary_key.replace(names).is_some() {
                    return Err(Error::ParseError(format!(
                        "table '{}' declares more than one PRIMARY KEY constraint",
                        table_name
                    )));
                }
            } else {
                columns.push(self.parse_column_def()?);
            }

            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }

        self.expect(&Token::RParen)?;

        for name in primary_key.unwrap_or_default() {
            let column = columns
                .iter_mut()
                .find(|c: &&mut Column| c.name.eq_ignore_ascii_case(&name))
                .ok_or_else(|| Error::ColumnNotFound(name.clone(), table_name.clone()))?;
            column.primary_key = true;
            column.nullable = false;
        }

        Ok(CreateTableStatement {
            table_name,
            schema: Schema::from_columns(columns),
            if_not_exists,
        })
    }

    fn parse_column_def(&mut self) -> Result<Column> {
        let name = self.expect_identifier()?;
        let data_type = self.parse_data_type()?;

        let mut column = Column::new(name, data_type, 0);
        loop {
            match self.current() {
                Token::Not => {
                    self.advance();
                    self.expect(&Token::Null)?;
                    column = column.nullable(false);
                }
                Token::Null => {
                    self.advance();
                    column = column.nullable(true);
                }
                Token::Default => {
                    self.advance();
                    column = column.default(self.parse_default_value()?);
                }
                Token::Primary => {
                    self.advance();
                    self.expect(&Token::Key)?;
                    column = column.primary_key(true);
                }
                Token::Unique => {
                    self.advance();
                    column = column.unique(true);
                }
                Token::AutoIncrement => {
                    self.advance();
                    column = column.auto_increment(true);
                }
                _ => break,
            }
        }

        if column.primary_key {
            column.nullable = false;
        }
        Ok(column)
    }

    /// DEFAULT takes a literal, optionally negated
    fn parse_default_value(&mut self) -> Result<Value> {
        let negate = if self.check(&Token::Minus) {
            self.advance();
            true
        } else {
            false
        };

        let value = match self.current().clone() {
            Token::IntegerLiteral(n) if negate => Value::from_i64(-n),
            Token::IntegerLiteral(n) => Value::from_i64(n),
            Token::FloatLiteral(f) if negate => Value::Float(-f),
            Token::FloatLiteral(f) => Value::Float(f),
            Token::StringLiteral(s) if !negate => Value::String(s),
            Token::True if !negate => Value::Boolean(true),
            Token::False if !negate => Value::Boolean(false),
            Token::Null if !negate => Value::Null,
            other => {
                return Err(Error::UnexpectedToken {
                    expected: "literal default value".to_string(),
                    found: format!("{}", other),
                })
            }
        };
        self.advance();
        Ok(value)
    }

    fn parse_data_type(&mut self) -> Result<DataType> {
        let data_type = match self.current() {
            Token::Int | Token::Integer => DataType::Integer,
            Token::BigInt => DataType::BigInt,
            Token::SmallInt => DataType::SmallInt,
            Token::Float | Token::Real => DataType::Float,
            Token::Double => DataType::Double,
            Token::Text => DataType::Text,
            Token::Boolean => DataType::Boolean,
            Token::Date => DataType::Date,
            Token::Time => DataType::Time,
            Token::Timestamp => DataType::Timestamp,
            Token::Blob => DataType::Blob,
            Token::Varchar => {
                self.advance();
                return Ok(DataType::Varchar(self.parse_type_length()?));
            }
            Token::Char => {
                self.advance();
                let length = if self.check(&Token::LParen) {
                    self.parse_type_length()?
                } else {
                    1
                };
                return Ok(DataType::Char(length));
            }
            _ => {
                return Err(Error::UnexpectedToken {
                    expected: "data type".to_string(),
                    found: format!("{}", self.current()),
                })
            }
        };
        self.advance();
        Ok(data_type)
    }

    fn parse_type_length(&mut self) -> Result<usize> {
        self.expect(&Token::LParen)?;
        let length = self.expect_integer()?;
        self.expect(&Token::RParen)?;
        usize::try_from(length)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| Error::ParseError(format!("invalid type length {}", length)))
    }

    fn parse_drop_table(&mut self) -> Result<DropTableStatement> {
        self.expect(&Token::Drop)?;
        self.expect(&Token::Table)?;

        let if_exists = if self.check(&Token::If) {
            self.advance();
            self.expect(&Token::Exists)?;
            true
        } else {
            false
        };

        let table_name = self.expect_identifier()?;
        Ok(DropTableStatement {
            table_name,
            if_exists,
        })
    }

    // ========== Expressions ==========

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or_expr()
    }

    fn parse_or_expr(&mut self) -> Result<Expr> {
        self.parse_binary_level(&[(Token::Or, BinaryOp::Or)], Parser::parse_and_expr)
    }

    fn parse_and_expr(&mut self) -> Result<Expr> {
        self.parse_binary_level(&[(Token::And, BinaryOp::And)], Parser::parse_not_expr)
    }

    fn parse_not_expr(&mut self) -> Result<Expr> {
        if self.check(&Token::Not) {
            self.advance();
            let expr = self.parse_not_expr()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(expr),
            });
        }
        self.parse_comparison_expr()
    }

    fn parse_comparison_expr(&mut self) -> Result<Expr> {
        let left = self.parse_bitor_expr()?;

        if self.check(&Token::Is) {
            self.advance();
            let negated = if self.check(&Token::Not) {
                self.advance();
                true
            } else {
                false
            };
            self.expect(&Token::Null)?;
            return Ok(Expr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        let negated = self.check(&Token::Not)
            && matches!(self.peek(), Some(Token::Between | Token::In | Token::Like));
        if negated {
            self.advance();
        }

        match self.current() {
            Token::Between => {
                self.advance();
                let low = self.parse_bitor_expr()?;
                self.expect(&Token::And)?;
                let high = self.parse_bitor_expr()?;
                return Ok(Expr::Between {
                    expr: Box::new(left),
                    low: Box::new(low),
                    high: Box::new(high),
                    negated,
                });
            }
            Token::In => {
                self.advance();
                self.expect(&Token::LParen)?;
                let list = self.parse_expr_list()?;
                self.expect(&Token::RParen)?;
                return Ok(Expr::InList {
                    expr: Box::new(left),
                    list,
                    negated,
                });
            }
            Token::Like => {
                self.advance();
                let pattern = self.parse_bitor_expr()?;
                return Ok(Expr::Like {
                    expr: Box::new(left),
                    pattern: Box::new(pattern),
                    negated,
                });
            }
            _ => {}
        }

        let op = match self.current() {
            Token::Eq => BinaryOp::Eq,
            Token::Neq => BinaryOp::NotEq,
            Token::Lt => BinaryOp::Lt,
            Token::Lte => BinaryOp::LtEq,
            Token::Gt => BinaryOp::Gt,
            Token::Gte => BinaryOp::GtEq,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_bitor_expr()?;
        Ok(Expr::binary(op, left, right))
    }

    fn parse_bitor_expr(&mut self) -> Result<Expr> {
        self.parse_binary_level(&[(Token::Pipe, BinaryOp::BitOr)], Parser::parse_bitxor_expr)
    }

    fn parse_bitxor_expr(&mut self) -> Result<Expr> {
        self.parse_binary_level(&[(Token::Caret, BinaryOp::BitXor)], Parser::parse_bitand_expr)
    }

    fn parse_bitand_expr(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            &[(Token::Ampersand, BinaryOp::BitAnd)],
            Parser::parse_shift_expr,
        )
    }

    fn parse_shift_expr(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            &[
                (Token::ShiftLeft, BinaryOp::ShiftLeft),
                (Token::ShiftRight, BinaryOp::ShiftRight),
            ],
            Parser::parse_additive_expr,
        )
    }

    fn parse_additive_expr(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            &[
                (Token::Plus, BinaryOp::Add),
                (Token::Minus, BinaryOp::Sub),
                (Token::Concat, BinaryOp::Concat),
            ],
            Parser::parse_multiplicative_expr,
        )
    }

    fn parse_multiplicative_expr(&mut self) -> Result<Expr> {
        self.parse_binary_level(
            &[
                (Token::Asterisk, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Mod),
            ],
            Parser::parse_unary_expr,
        )
    }

    /// Left-associative chain of the operators in `ops` over `next`
    fn parse_binary_level(&mut self, ops: &[(Token, BinaryOp)], next: Level) -> Result<Expr> {
        let mut left = next(self)?;

        while let Some((_, op)) = ops.iter().find(|(token, _)| token == self.current()) {
            self.advance();
            let right = next(self)?;
            left = Expr::binary(*op, left, right);
        }

        Ok(left)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr> {
        match self.current() {
            Token::Minus => {
                self.advance();
                let expr = self.parse_unary_expr()?;
                Ok(match expr {
                    Expr::Literal(Value::Integer(i)) => Expr::Literal(Value::from_i64(-(i as i64))),
                    Expr::Literal(Value::BigInt(i)) if i != i64::MIN => {
                        Expr::Literal(Value::from_i64(-i))
                    }
                    Expr::Literal(Value::Float(f)) => Expr::Literal(Value::Float(-f)),
                    expr => Expr::Unary {
                        op: UnaryOp::Neg,
                        expr: Box::new(expr),
                    },
                })
            }
            Token::Plus => {
                self.advance();
                self.parse_unary_expr()
            }
            Token::Tilde => {
                self.advance();
                let expr = self.parse_unary_expr()?;
                Ok(Expr::Unary {
                    op: UnaryOp::BitNot,
                    expr: Box::new(expr),
                })
            }
            _ => self.parse_primary_expr(),
        }
    }

    fn parse_primary_expr(&mut self) -> Result<Expr> {
        let token = self.current().clone();
        let literal = match token {
            Token::IntegerLiteral(n) => Some(Value::from_i64(n)),
            Token::FloatLiteral(f) => Some(Value::Float(f)),
            Token::StringLiteral(ref s) => Some(Value::String(s.clone())),
            Token::True => Some(Value::Boolean(true)),
            Token::False => Some(Value::Boolean(false)),
            Token::Null => Some(Value::Null),
            _ => None,
        };
        if let Some(value) = literal {
            self.advance();
            return Ok(Expr::Literal(value));
        }

        match token {
            Token::Question => {
                self.advance();
                let index = self.param_count;
                self.param_count += 1;
                Ok(Expr::Param(index))
            }

            Token::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }

            // DATE '2024-01-31', TIME '12:00:00', TIMESTAMP '...'
            typed @ (Token::Date | Token::Time | Token::Timestamp) => {
                let data_type = match typed {
                    Token::Date => DataType::Date,
                    Token::Time => DataType::Time,
                    _ => DataType::Timestamp,
                };
                self.advance();
                match self.current().clone() {
                    Token::StringLiteral(s) => {
                        self.advance();
                        let value = Value::String(s).coerce_to(&data_type, "literal")?;
                        Ok(Expr::Literal(value))
                    }
                    other => Err(Error::UnexpectedToken {
                        expected: format!("{} literal", data_type),
                        found: format!("{}", other),
                    }),
                }
            }

            Token::Count | Token::Sum | Token::Avg | Token::Min | Token::Max => {
                self.parse_aggregate()
            }

            Token::Identifier(name) => {
                self.advance();

                if self.check(&Token::LParen) {
                    return self.parse_function_call(&name);
                }
                if self.check(&Token::Dot) {
                    self.advance();
                    let column = self.expect_identifier()?;
                    return Ok(Expr::Column {
                        table: Some(name),
                        name: column,
                    });
                }
                // CURRENT_DATE and friends need no parentheses
                if name.to_ascii_uppercase().starts_with("CURRENT_") {
                    if let Some(function) = Function::from_name(&name) {
                        let call = Expr::call(function);
                        call.check_arity()?;
                        return Ok(call);
                    }
                }
                Ok(Expr::Column { table: None, name })
            }

            _ => Err(Error::UnexpectedToken {
                expected: "expression".to_string(),
                found: format!("{}", self.current()),
            }),
        }
    }

    fn parse_function_call(&mut self, name: &str) -> Result<Expr> {
        let function =
            Function::from_name(name).ok_or_else(|| Error::UnknownFunction(name.to_string()))?;

        self.expect(&Token::LParen)?;
        let mut call = Expr::call(function);
        if !self.check(&Token::RParen) {
            loop {
                let arg = self.parse_expr()?;
                call.add_arg(arg)?;

                if !self.check(&Token::Comma) {
                    break;
                }
                self.advance();
            }
        }
        self.expect(&Token::RParen)?;

        call.check_arity()?;
        Ok(call)
    }

    fn parse_aggregate(&mut self) -> Result<Expr> {
        let func = match self.current() {
            Token::Count => AggregateFunc::Count,
            Token::Sum => AggregateFunc::Sum,
            Token::Avg => AggregateFunc::Avg,
            Token::Min => AggregateFunc::Min,
            _ => AggregateFunc::Max,
        };
        self.advance();
        self.expect(&Token::LParen)?;

        let distinct = if self.check(&Token::Distinct) {
            self.advance();
            true
        } else {
            if self.check(&Token::All) {
                self.advance();
            }
            false
        };

        let mut aggregate = Expr::Aggregate {
            func,
            arg: None,
            distinct,
        };

        if func == AggregateFunc::Count && !distinct && self.check(&Token::Asterisk) {
            self.advance();
        } else {
            loop {
                let arg = self.parse_expr()?;
                aggregate.add_arg(arg)?;

                if !self.check(&Token::Comma) {
                    break;
                }
                self.advance();
            }
        }
        self.expect(&Token::RParen)?;

        aggregate.check_arity()?;
        Ok(aggregate)
    }

    // ========== Helper functions ==========

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>> {
        let mut exprs = Vec::new();

        loop {
            exprs.push(self.parse_expr()?);

            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }

        Ok(exprs)
    }

    fn parse_identifier_list(&mut self) -> Result<Vec<String>> {
        let mut identifiers = Vec::new();

        loop {
            identifiers.push(self.expect_identifier()?);

            if !self.check(&Token::Comma) {
                break;
            }
            self.advance();
        }

        Ok(identifiers)
    }

    fn current(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::Eof)
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_at(1)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.position + offset)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current(), Token::Eof)
    }

    fn check(&self, token: &Token) -> bool {
        std::mem::discriminant(self.current()) == std::mem::discriminant(token)
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        if self.check(token) {
            self.advance();
            Ok(())
        } else {
            Err(Error::UnexpectedToken {
                expected: format!("{}", token),
                found: format!("{}", self.current()),
            })
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        match self.current().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(Error::UnexpectedToken {
                expected: "identifier".to_string(),
                found: format!("{}", self.current()),
            }),
        }
    }

    fn expect_integer(&mut self) -> Result<i64> {
        match self.current().clone() {
            Token::IntegerLiteral(n) => {
                self.advance();
                Ok(n)
            }
            _ => Err(Error::UnexpectedToken {
                expected: "integer".to_string(),
                found: format!("{}", self.current()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(sql: &str) -> Statement {
        Parser::new(sql).unwrap().parse().unwrap()
    }

    fn parse_expr(sql: &str) -> Expr {
        Parser::new(sql).unwrap().parse_expression().unwrap()
    }

    #[test]
    fn test_parse_simple_select() {
        match parse("SELECT * FROM users") {
            Statement::Select(s) => {
                assert_eq!(s.columns, vec![SelectItem::Wildcard]);
                assert_eq!(s.from.len(), 1);
                assert_eq!(s.from[0].name, "users");
            }
            other => panic!("Expected SELECT, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_select_clauses() {
        let stmt = parse(
            "SELECT DISTINCT u.name AS n, count(*) FROM users u, orders AS o \
             WHERE u.id = o.user_id GROUP BY u.name HAVING count(*) > 1 \
             ORDER BY n DESC, 2 LIMIT 10 OFFSET 5;",
        );
        let Statement::Select(s) = stmt else {
            panic!("Expected SELECT");
        };
        assert!(s.distinct);
        assert_eq!(s.columns.len(), 2);
        assert!(matches!(&s.columns[0], SelectItem::Expr { alias: Some(a), .. } if a == "n"));
        assert_eq!(s.from[0].reference_name(), "u");
        assert_eq!(s.from[1].reference_name(), "o");
        assert!(s.where_clause.is_some());
        assert_eq!(s.group_by.len(), 1);
        assert!(s.having.is_some());
        assert_eq!(s.order_by.len(), 2);
        assert!(!s.order_by[0].ascending);
        assert!(s.order_by[1].ascending);
        assert_eq!(s.limit, Some(Expr::Literal(Value::Integer(10))));
        assert_eq!(s.offset, Some(Expr::Literal(Value::Integer(5))));
    }

    #[test]
    fn test_parse_qualified_wildcard() {
        let Statement::Select(s) = parse("SELECT o.*, u.id FROM users u, orders o") else {
            panic!("Expected SELECT");
        };
        assert_eq!(s.columns[0], SelectItem::QualifiedWildcard("o".to_string()));
    }

    #[test]
    fn test_parse_insert_update_delete() {
        match parse("INSERT INTO users (id, name) VALUES (1, 'a'), (2, ?)") {
            Statement::Insert(s) => {
                assert_eq!(s.columns, Some(vec!["id".to_string(), "name".to_string()]));
                assert_eq!(s.values.len(), 2);
                assert_eq!(s.values[1][1], Expr::Param(0));
            }
            other => panic!("Expected INSERT, got {:?}", other),
        }

        match parse("UPDATE users SET name = 'b', score = score + 1 WHERE id = 1") {
            Statement::Update(s) => {
                assert_eq!(s.assignments.len(), 2);
                assert!(s.where_clause.is_some());
            }
            other => panic!("Expected UPDATE, got {:?}", other),
        }

        assert!(matches!(
            parse("DELETE FROM users"),
            Statement::Delete(DeleteStatement { where_clause: None, .. })
        ));
    }

    #[test]
    fn test_parse_create_table() {
        let stmt = parse(
            "CREATE TABLE IF NOT EXISTS items (\
             id INT, sku CHAR(8) NOT NULL UNIQUE, price DOUBLE DEFAULT -1.5, \
             qty SMALLINT DEFAULT 0, PRIMARY KEY (id))",
        );
        let Statement::CreateTable(s) = stmt else {
            panic!("Expected CREATE TABLE");
        };
        assert!(s.if_not_exists);
        assert_eq!(s.table_name, "items");
        let schema = &s.schema;
        assert_eq!(schema.column_count(), 4);
        assert!(schema.get_column("id").unwrap().primary_key);
        assert!(!schema.get_column("id").unwrap().nullable);
        assert_eq!(schema.get_column("sku").unwrap().data_type, DataType::Char(8));
        assert!(schema.get_column("sku").unwrap().unique);
        assert_eq!(
            schema.get_column("price").unwrap().default,
            Some(Value::Float(-1.5))
        );
        assert_eq!(schema.get_column_index("qty"), Some(3));
    }

    #[test]
    fn test_create_sql_round_trips() {
        let sql = "CREATE TABLE t (id BIGINT PRIMARY KEY AUTO_INCREMENT, note TEXT DEFAULT 'x')";
        let Statement::CreateTable(s) = parse(sql) else {
            panic!("Expected CREATE TABLE");
        };
        let regenerated = s.schema.to_create_sql("t");
        let Statement::CreateTable(again) = parse(&regenerated) else {
            panic!("Expected CREATE TABLE");
        };
        assert_eq!(again.schema, s.schema);
    }

    #[test]
    fn test_parse_drop_and_show() {
        assert_eq!(
            parse("DROP TABLE IF EXISTS users"),
            Statement::DropTable(DropTableStatement {
                table_name: "users".to_string(),
                if_exists: true,
            })
        );
        assert_eq!(parse("SHOW TABLES"), Statement::ShowTables);
    }

    #[test]
    fn test_operator_precedence() {
        assert_eq!(
            parse_expr("1 + 2 * 3"),
            Expr::binary(
                BinaryOp::Add,
                Expr::Literal(Value::Integer(1)),
                Expr::binary(
                    BinaryOp::Mul,
                    Expr::Literal(Value::Integer(2)),
                    Expr::Literal(Value::Integer(3)),
                ),
            )
        );

        // a - 1 is subtraction, not a column followed by -1
        assert!(matches!(
            parse_expr("a-1"),
            Expr::Binary { op: BinaryOp::Sub, .. }
        ));
        assert_eq!(parse_expr("-5"), Expr::Literal(Value::Integer(-5)));

        // Bitwise operators bind tighter than comparison
        assert!(matches!(
            parse_expr("a & 4 = 4"),
            Expr::Binary { op: BinaryOp::Eq, .. }
        ));
        assert!(matches!(
            parse_expr("a = 1 OR b = 2 AND c = 3"),
            Expr::Binary { op: BinaryOp::Or, .. }
        ));
    }

    #[test]
    fn test_parse_predicates() {
        assert!(matches!(
            parse_expr("x NOT BETWEEN 1 AND 5"),
            Expr::Between { negated: true, .. }
        ));
        assert!(matches!(
            parse_expr("x IS NOT NULL"),
            Expr::IsNull { negated: true, .. }
        ));
        assert!(matches!(
            parse_expr("name NOT LIKE 'a%'"),
            Expr::Like { negated: true, .. }
        ));
        assert!(matches!(
            parse_expr("x IN (1, 2, 3)"),
            Expr::InList { negated: false, ref list, .. } if list.len() == 3
        ));
    }

    #[test]
    fn test_parse_functions() {
        assert_eq!(parse_expr("NOW()"), Expr::call(Function::Now));
        assert_eq!(parse_expr("current_timestamp"), Expr::call(Function::Now));
        assert_eq!(parse_expr("CURRENT_DATE"), Expr::call(Function::CurrentDate));

        assert!(matches!(
            Parser::new("NOW(1)").unwrap().parse_expression(),
            Err(Error::TooManyArguments { max: 0, .. })
        ));
        assert!(matches!(
            Parser::new("MOD(1)").unwrap().parse_expression(),
            Err(Error::TooFewArguments { min: 2, got: 1, .. })
        ));
        assert!(matches!(
            Parser::new("nope(1)").unwrap().parse_expression(),
            Err(Error::UnknownFunction(_))
        ));
    }

    #[test]
    fn test_parse_aggregates() {
        assert_eq!(
            parse_expr("COUNT(*)"),
            Expr::Aggregate {
                func: AggregateFunc::Count,
                arg: None,
                distinct: false,
            }
        );
        assert!(matches!(
            parse_expr("count(DISTINCT name)"),
            Expr::Aggregate { distinct: true, arg: Some(_), .. }
        ));
        assert!(matches!(
            Parser::new("SUM(a, b)").unwrap().parse_expression(),
            Err(Error::TooManyArguments { max: 1, .. })
        ));
    }

    #[test]
    fn test_parameters_are_numbered() {
        let mut parser = Parser::new("SELECT * FROM t WHERE a = ? AND b = ?").unwrap();
        parser.parse().unwrap();
        assert_eq!(parser.param_count(), 2);
    }

    #[test]
    fn test_typed_literals() {
        assert_eq!(parse_expr("DATE '1970-01-02'"), Expr::Literal(Value::Date(1)));
        assert!(Parser::new("DATE 'nope'").unwrap().parse_expression().is_err());
    }

    #[test]
    fn test_trailing_input_rejected() {
        let mut parser = Parser::new("SELECT 1 garbage more").unwrap();
        parser.parse().unwrap();
        assert!(parser.expect_end().is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!(Parser::new("SELEC * FROM t").unwrap().parse().is_err());
        assert!(Parser::new("CREATE TABLE t (a VARCHAR)").unwrap().parse().is_err());
        assert!(Parser::new("CREATE TABLE t (a INT, PRIMARY KEY (b))").unwrap().parse().is_err());
    }
}
