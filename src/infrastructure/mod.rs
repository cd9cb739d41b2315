//! Infrastructure layer: storage backends behind one typed gateway, and
//! in-process implementations of the external service ports.

pub mod in_memory;
pub mod kv;
pub mod notify;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod store;
