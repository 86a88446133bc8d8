//! SQL front end: lexer, parser, statement tree and expressions

pub mod ast;
pub mod expr;
pub mod function;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::*;
pub use expr::{AggregateFunc, BinaryOp, BindScope, Expr, ExprType, UnaryOp, COST_UNAVAILABLE};
pub use function::{Function, FunctionSignature};
pub use lexer::Lexer;
pub use parser::Parser;
pub use token::Token;
