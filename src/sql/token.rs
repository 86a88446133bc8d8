//! SQL Token definitions

use std::fmt;

/// SQL Token types
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // ========== Keywords ==========
    // DDL Keywords
    Create,
    Drop,
    Table,
    Show,
    Tables,

    // DML Keywords
    Select,
    Insert,
    Update,
    Delete,
    Into,
    Values,
    Set,
    From,
    Where,

    // Clauses
    And,
    Or,
    Not,
    As,

    // Ordering & Grouping
    Order,
    By,
    Asc,
    Desc,
    Group,
    Having,
    Limit,
    Offset,

    // Constraints
    Primary,
    Key,
    Unique,
    Default,
    Null,
    AutoIncrement,

    // Data Types
    Int,
    Integer,
    BigInt,
    SmallInt,
    Float,
    Double,
    Real,
    Varchar,
    Char,
    Text,
    Boolean,
    Date,
    Time,
    Timestamp,
    Blob,

    // Boolean Literals
    True,
    False,

    // Aggregate Functions
    Count,
    Sum,
    Avg,
    Min,
    Max,

    // Other Keywords
    Distinct,
    All,
    Exists,
    In,
    Between,
    Like,
    Is,
    If,

    // ========== Literals ==========
    /// Integer literal
    IntegerLiteral(i64),
    /// Float literal
    FloatLiteral(f64),
    /// String literal (single-quoted)
    StringLiteral(String),
    /// Identifier (table name, column name, etc.)
    Identifier(String),

    // ========== Operators ==========
    /// =
    Eq,
    /// <> or !=
    Neq,
    /// <
    Lt,
    /// >
    Gt,
    /// <=
    Lte,
    /// >=
    Gte,
    /// +
    Plus,
    /// -
    Minus,
    /// *
    Asterisk,
    /// /
    Slash,
    /// %
    Percent,
    /// ||
    Concat,
    /// &
    Ampersand,
    /// |
    Pipe,
    /// ^
    Caret,
    /// ~
    Tilde,
    /// <<
    ShiftLeft,
    /// >>
    ShiftRight,

    // ========== Delimiters ==========
    /// (
    LParen,
    /// )
    RParen,
    /// ,
    Comma,
    /// ;
    Semicolon,
    /// .
    Dot,
    /// ? positional parameter
    Question,

    // ========== Special ==========
    /// End of input
    Eof,
}

impl Token {
    /// Check if this token is a keyword
    pub fn is_keyword(&self) -> bool {
        !matches!(
            self,
            Token::IntegerLiteral(_)
                | Token::FloatLiteral(_)
                | Token::StringLiteral(_)
                | Token::Identifier(_)
                | Token::Eq
                | Token::Neq
                | Token::Lt
                | Token::Gt
                | Token::Lte
                | Token::Gte
                | Token::Plus
                | Token::Minus
                | Token::Asterisk
                | Token::Slash
                | Token::Percent
                | Token::Concat
                | Token::Ampersand
                | Token::Pipe
                | Token::Caret
                | Token::Tilde
                | Token::ShiftLeft
                | Token::ShiftRight
                | Token::LParen
                | Token::RParen
                | Token::Comma
                | Token::Semicolon
                | Token::Dot
                | Token::Question
                | Token::Eof
        )
    }

    /// Try to parse a keyword from a string
    pub fn from_keyword(s: &str) -> Option<Token> {
        match s.to_uppercase().as_str() {
            // DDL
            "CREATE" => Some(Token::Create),
            "DROP" => Some(Token::Drop),
            "TABLE" => Some(Token::Table),
            "SHOW" => Some(Token::Show),
            "TABLES" => Some(Token::Tables),

            // DML
            "SELECT" => Some(Token::Select),
            "INSERT" => Some(Token::Insert),
            "UPDATE" => Some(Token::Update),
            "DELETE" => Some(Token::Delete),
            "INTO" => Some(Token::Into),
            "VALUES" => Some(Token::Values),
            "SET" => Some(Token::Set),
            "FROM" => Some(Token::From),
            "WHERE" => Some(Token::Where),

            // Clauses
            "AND" => Some(Token::And),
            "OR" => Some(Token::Or),
            "NOT" => Some(Token::Not),
            "AS" => Some(Token::As),

            // Ordering & Grouping
            "ORDER" => Some(Token::Order),
            "BY" => Some(Token::By),
            "ASC" => Some(Token::Asc),
            "DESC" => Some(Token::Desc),
            "GROUP" => Some(Token::Group),
            "HAVING" => Some(Token::Having),
            "LIMIT" => Some(Token::Limit),
            "OFFSET" => Some(Token::Offset),

            // Constraints
            "PRIMARY" => Some(Token::Primary),
            "KEY" => Some(Token::Key),
            "UNIQUE" => Some(Token::Unique),
            "DEFAULT" => Some(Token::Default),
            "NULL" => Some(Token::Null),
            "AUTO_INCREMENT" | "AUTOINCREMENT" => Some(Token::AutoIncrement),

            // Data Types
            "INT" => Some(Token::Int),
            "INTEGER" => Some(Token::Integer),
            "BIGINT" => Some(Token::BigInt),
            "SMALLINT" => Some(Token::SmallInt),
            "FLOAT" => Some(Token::Float),
            "DOUBLE" => Some(Token::Double),
            "REAL" => Some(Token::Real),
            "VARCHAR" => Some(Token::Varchar),
            "CHAR" => Some(Token::Char),
            "TEXT" => Some(Token::Text),
            "BOOLEAN" | "BOOL" => Some(Token::Boolean),
            "DATE" => Some(Token::Date),
            "TIME" => Some(Token::Time),
            "TIMESTAMP" => Some(Token::Timestamp),
            "BLOB" => Some(Token::Blob),

            // Boolean Literals
            "TRUE" => Some(Token::True),
            "FALSE" => Some(Token::False),

            // Aggregate Functions
            "COUNT" => Some(Token::Count),
            "SUM" => Some(Token::Sum),
            "AVG" => Some(Token::Avg),
            "MIN" => Some(Token::Min),
            "MAX" => Some(Token::Max),

            // Other Keywords
            "DISTINCT" => Some(Token::Distinct),
            "ALL" => Some(Token::All),
            "EXISTS" => Some(Token::Exists),
            "IN" => Some(Token::In),
            "BETWEEN" => Some(Token::Between),
            "LIKE" => Some(Token::Like),
            "IS" => Some(Token::Is),
            "IF" => Some(Token::If),

            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Create => write!(f, "CREATE"),
            Token::Drop => write!(f, "DROP"),
            Token::Table => write!(f, "TABLE"),
            Token::Show => write!(f, "SHOW"),
            Token::Tables => write!(f, "TABLES"),
            Token::Select => write!(f, "SELECT"),
            Token::Insert => write!(f, "INSERT"),
            Token::Update => write!(f, "UPDATE"),
            Token::Delete => write!(f, "DELETE"),
            Token::Into => write!(f, "INTO"),
            Token::Values => write!(f, "VALUES"),
            Token::Set => write!(f, "SET"),
            Token::From => write!(f, "FROM"),
            Token::Where => write!(f, "WHERE"),
            Token::And => write!(f, "AND"),
            Token::Or => write!(f, "OR"),
            Token::Not => write!(f, "NOT"),
            Token::As => write!(f, "AS"),
            Token::Order => write!(f, "ORDER"),
            Token::By => write!(f, "BY"),
            Token::Asc => write!(f, "ASC"),
            Token::Desc => write!(f, "DESC"),
            Token::Group => write!(f, "GROUP"),
            Token::Having => write!(f, "HAVING"),
            Token::Limit => write!(f, "LIMIT"),
            Token::Offset => write!(f, "OFFSET"),
            Token::Primary => write!(f, "PRIMARY"),
            Token::Key => write!(f, "KEY"),
            Token::Unique => write!(f, "UNIQUE"),
            Token::Default => write!(f, "DEFAULT"),
            Token::Null => write!(f, "NULL"),
            Token::AutoIncrement => write!(f, "AUTO_INCREMENT"),
            Token::Int => write!(f, "INT"),
            Token::Integer => write!(f, "INTEGER"),
            Token::BigInt => write!(f, "BIGINT"),
            Token::SmallInt => write!(f, "SMALLINT"),
            Token::Float => write!(f, "FLOAT"),
            Token::Double => write!(f, "DOUBLE"),
            Token::Real => write!(f, "REAL"),
            Token::Varchar => write!(f, "VARCHAR"),
            Token::Char => write!(f, "CHAR"),
            Token::Text => write!(f, "TEXT"),
            Token::Boolean => write!(f, "BOOLEAN"),
            Token::Date => write!(f, "DATE"),
            Token::Time => write!(f, "TIME"),
            Token::Timestamp => write!(f, "TIMESTAMP"),
            Token::Blob => write!(f, "BLOB"),
            Token::True => write!(f, "TRUE"),
            Token::False => write!(f, "FALSE"),
            Token::Count => write!(f, "COUNT"),
            Token::Sum => write!(f, "SUM"),
            Token::Avg => write!(f, "AVG"),
            Token::Min => write!(f, "MIN"),
            Token::Max => write!(f, "MAX"),
            Token::Distinct => write!(f, "DISTINCT"),
            Token::All => write!(f, "ALL"),
            Token::Exists => write!(f, "EXISTS"),
            Token::In => write!(f, "IN"),
            Token::Between => write!(f, "BETWEEN"),
            Token::Like => write!(f, "LIKE"),
            Token::Is => write!(f, "IS"),
            Token::If => write!(f, "IF"),
            Token::IntegerLiteral(n) => write!(f, "{}", n),
            Token::FloatLiteral(n) => write!(f, "{}", n),
            Token::StringLiteral(s) => write!(f, "'{}'", s),
            Token::Identifier(s) => write!(f, "{}", s),
            Token::Eq => write!(f, "="),
            Token::Neq => write!(f, "<>"),
            Token::Lt => write!(f, "<"),
            Token::Gt => write!(f, ">"),
            Token::Lte => write!(f, "<="),
            Token::Gte => write!(f, ">="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Asterisk => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Concat => write!(f, "||"),
            Token::Ampersand => write!(f, "&"),
            Token::Pipe => write!(f, "|"),
            Token::Caret => write!(f, "^"),
            Token::Tilde => write!(f, "~"),
            Token::ShiftLeft => write!(f, "<<"),
            Token::ShiftRight => write!(f, ">>"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
            Token::Dot => write!(f, "."),
            Token::Question => write!(f, "?"),
            Token::Eof => write!(f, "EOF"),
        }
    }
}
