//! # ReplicaDB Testkit
//!
//! Test utilities for ReplicaDB.
//!
//! This crate provides:
//! - Fixtures: document and operation builders, seeded stores, batch files
//! - Property-based generators of valid CUD operation sequences
//! - A sequential reference model of operation semantics
//! - Fault-injecting store wrappers that count transactions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use replidb_testkit::prelude::*;
//!
//! let server = FaultyServer::new(MemoryServer::new());
//! server.inject_commit_conflicts(1);
//! // ... run a batch, then inspect server.stats()
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod model;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::model::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use model::*;
