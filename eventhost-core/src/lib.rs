//! Partition lease and checkpoint coordination for hosts sharing the consumption of a partitioned
//! event stream.
//!
//! - [lease] hands out time-bounded, epoch-fenced ownership of partitions.
//! - [checkpoint] records how far each partition has been processed.
//! - [management] seeds both stores with the partition set and positions of the hub.
//! - [host] runs the ownership loop of one processor host on top of them.

pub use crate::error::{Error, Result};

mod error;
mod shared;

pub mod checkpoint;
pub mod config;
pub mod host;
pub mod lease;
pub mod management;
