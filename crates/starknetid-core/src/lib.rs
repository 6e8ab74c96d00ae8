//! starknetid-core — building blocks for the StarknetId naming indexer.
//!
//! # Architecture
//!
//! ```text
//! transport ─► Supervisor ─► Channel ─► AggregationContext ─► StoreWriter
//!                                          ├── label::decode     (felt → label)
//!                                          ├── ResolverCache     (resolver → subdomain suffix)
//!                                          └── NamingStorage     (lookups + transactional writes)
//! ```
//!
//! This crate holds everything below the channel: the felt scalar, the label
//! codec, the data model, event payload decoding, the per-block aggregation
//! context and the persistence traits with an in-memory backend.

pub mod cache;
pub mod context;
pub mod error;
pub mod events;
pub mod felt;
pub mod label;
pub mod memory;
pub mod storage;
pub mod sync_map;
pub mod types;

pub use cache::ResolverCache;
pub use context::{AggregationContext, EventOrigin};
pub use error::IndexerError;
pub use events::{EventKind, EventPayload};
pub use felt::Felt;
pub use memory::MemoryStorage;
pub use storage::{NamingStorage, NamingTransaction};
pub use sync_map::SyncMap;
pub use types::{
    Action, Address, Contract, Domain, Field, FieldNamespace, Pending, StarknetId, StreamState,
    Subdomain,
};
