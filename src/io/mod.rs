//! Filesystem discovery of dataset partitions

pub mod partitions;

pub use partitions::list_partitions;
