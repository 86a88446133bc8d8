//! Catalog module
//!
//! Data types, table schemas, and the factory that creates and loads tables.

pub mod factory;
pub mod schema;
pub mod types;

pub use factory::TableFactory;
pub use schema::{Column, Schema};
pub use types::DataType;
