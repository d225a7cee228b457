//! Storage - Backend Trait and Implementations
//!
//! TigerStyle: Abstract storage with simulation-first testing.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    StorageBackend Trait                      │
//! └─────────────────────────────────────────────────────────────┘
//!          ↑                              ↑
//!          │                              │
//! ┌────────┴────────┐           ┌────────┴────────┐
//! │SimStorageBackend│           │ PostgresBackend │
//! │ (tests, no DB)  │           │  (production)   │
//! └─────────────────┘           └─────────────────┘
//! ```

mod backend;
mod error;
mod postgres;
mod sim;

pub use backend::{StorageBackend, LIST_LIMIT_MAX};
pub use error::{StorageError, StorageResult};
pub use postgres::{PostgresBackend, POOL_CONNECTIONS_MAX, SCHEMA_SQL};
pub use sim::SimStorageBackend;
