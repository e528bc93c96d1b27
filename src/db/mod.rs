//! Database layer - connection pool, table schemas and batch appends

pub mod pool;
pub mod schema;
pub mod writer;

pub use pool::{ConnectionTarget, ConnectionTargetBuilder};
pub use schema::TableSchema;
pub use writer::{BatchWriter, TableWriter};
