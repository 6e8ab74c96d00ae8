//! starknetid-indexer — stream processing for the StarknetId naming index.
//!
//! ```text
//! Transport ──messages──► Supervisor ──(demux by subscription id)──► Channel ──► StoreWriter
//!           ──reconnects─►     │                                        │
//!                              └── resubscribe once the channel drains ─┘
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use starknetid_indexer::{IndexerConfig, Supervisor, Transport};
//! use starknetid_core::MemoryStorage;
//!
//! # async fn run(transport: Arc<dyn Transport>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = IndexerConfig::load("config.yml")?;
//! let supervisor = Arc::new(Supervisor::new(&config, Arc::new(MemoryStorage::new()), transport)?);
//! supervisor.init().await?;
//! supervisor.subscribe(config.subscriptions.clone()).await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod logging;
pub mod store;
pub mod supervisor;
pub mod transport;

pub use channel::Channel;
pub use config::{DatabaseConfig, IndexerBuilder, IndexerConfig};
pub use logging::{init_tracing, LogConfig};
pub use store::StoreWriter;
pub use supervisor::Supervisor;
pub use transport::{
    AddressFilter, AddressNotice, EventFilter, EventMessage, IntegerFilter, Payload, Subscription,
    SubscriptionId, Transport, TransportMessage,
};
