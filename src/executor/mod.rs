//! Query execution module
//!
//! This module contains compiled queries, the join planner, the statement
//! executor, and result cursors.

pub mod context;
pub mod cursor;
pub mod executor;
pub mod planner;
pub mod query;

pub use context::QueryContext;
pub use cursor::ResultSet;
pub use planner::{plan_joins, JoinPlan};
pub use query::Query;
