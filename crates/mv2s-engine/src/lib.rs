//! The store actor: the primary orchestrator composing the container codec
//! (`mv2s-storage`) and WAL ring (`mv2s-durability`) into the durable
//! frame-put/delete/supersede/put-embedding API.

#![warn(missing_docs)]

pub mod config;
pub mod lease;
pub mod stats;
pub mod store;

pub use config::{StoreConfig, WriterLeasePolicy};
pub use lease::LeaseHandle;
pub use stats::Stats;
pub use store::{PutOptions, Store};
