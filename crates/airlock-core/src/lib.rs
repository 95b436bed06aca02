//! Shared primitives for the Airlock telemetry-shipping client.
//!
//! This crate holds the pieces of the pipeline that have no opinion about
//! scheduling or transport: the pooled buffer arena that bounds allocation
//! churn and total memory, the record codec that turns a typed event plus
//! routing key and timestamp into size-checked bytes, and the delivery
//! counters that account for every record's terminal outcome.

pub mod buffer_pool;
pub mod counters;
pub mod error;
pub mod record;

pub use buffer_pool::{BufferPool, BufferPoolConfig, PoolStatsSnapshot, PooledBuffer};
pub use counters::DeliveryCounters;
pub use error::{Error, Result};
pub use record::{decode_records, serialize_record, DecodedRecord, Record};
