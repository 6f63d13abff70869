//! # ReplicaDB Store
//!
//! Transactional document store interfaces and an in-memory reference
//! backend.
//!
//! This crate provides:
//! - [`ConnectionProvider`], [`Connection`], [`WriteTransaction`] and
//!   [`ExclusiveWriteTransaction`]: the narrow interface the replier drives
//! - [`MemoryServer`]: a reference backend with unique `_id` and secondary
//!   unique indexes, commit-time write-conflict detection and an
//!   exclusive-writer gate
//! - [`StoreStats`]: atomic counters of connections, transactions and writes
//!
//! ## Transactions
//!
//! Transactions are scoped values. `commit` and `rollback` consume them, and
//! dropping an unfinished transaction rolls it back.
//!
//! ```rust,ignore
//! let server = MemoryServer::new();
//! let conn = server.open_connection()?;
//! let mut txn = conn.open_write_transaction()?;
//! txn.insert(&ns, doc)?;
//! txn.commit()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
mod error;
mod gate;
mod memory;
mod stats;

pub use api::{
    Connection, ConnectionProvider, ExclusiveWriteTransaction, IndexSpec, WriteTransaction,
};
pub use error::{StoreError, StoreResult};
pub use gate::{GatePermit, WriteGate};
pub use memory::{
    MemoryConnection, MemoryExclusiveTransaction, MemoryServer, MemoryWriteTransaction, ID_INDEX,
};
pub use stats::{StatsSnapshot, StoreStats};
