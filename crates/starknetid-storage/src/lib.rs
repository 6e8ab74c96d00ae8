//! starknetid-storage — persistence backends for the naming index.
//!
//! Backends:
//! - [`MemoryStorage`] — in-memory, transactional (dev/testing)
//! - [`postgres`] — PostgreSQL via `sqlx` (feature `postgres`, on by default)

#[cfg(feature = "postgres")]
pub mod postgres;

pub use starknetid_core::memory::MemoryStorage;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresOptions, PostgresStorage};
