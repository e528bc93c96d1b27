//! Partition file parsing into row batches

pub mod delimited;
pub mod reader;

pub use delimited::reader::read_partition;
pub use reader::{DelimitedConfig, ReaderConfig, RowBatch};
