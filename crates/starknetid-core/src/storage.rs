//! Persistence traits for the naming index.
//!
//! Lookups go through [`NamingStorage`]; every write happens inside a
//! [`NamingTransaction`] obtained from [`NamingStorage::begin`], which either
//! commits all of its statements or none of them.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::felt::Felt;
use crate::types::{Address, Domain, Field, StarknetId, StreamState, Subdomain};

/// Read side and transaction factory of a naming store.
///
/// Lookups that find nothing return `Ok(None)`; callers treat that as
/// "use a default" rather than an error.
#[async_trait]
pub trait NamingStorage: Send + Sync {
    async fn address_by_hash(&self, hash: &[u8]) -> Result<Option<Address>, IndexerError>;

    /// Subdomain served by the resolver with address id `resolver_id`.
    async fn subdomain_by_resolver(
        &self,
        resolver_id: u64,
    ) -> Result<Option<Subdomain>, IndexerError>;

    /// Highest address id stored so far.
    async fn last_address_id(&self) -> Result<Option<u64>, IndexerError>;

    async fn state_by_name(&self, name: &str) -> Result<Option<StreamState>, IndexerError>;

    async fn list_states(&self) -> Result<Vec<StreamState>, IndexerError>;

    /// Open a write transaction.
    async fn begin(&self) -> Result<Box<dyn NamingTransaction>, IndexerError>;
}

/// Write statements executed inside one transaction.
#[async_trait]
pub trait NamingTransaction: Send {
    /// Upsert by hash.
    async fn save_addresses(&mut self, addresses: &[Address]) -> Result<(), IndexerError>;

    /// Upsert by token id.
    async fn insert_starknet_ids(&mut self, ids: &[StarknetId]) -> Result<(), IndexerError>;

    async fn update_starknet_id_owner(&mut self, id: &StarknetId) -> Result<(), IndexerError>;

    async fn delete_starknet_ids(&mut self, ids: &[Felt]) -> Result<(), IndexerError>;

    /// Insert, ignoring labels that already exist.
    async fn insert_subdomains(&mut self, subdomains: &[Subdomain]) -> Result<(), IndexerError>;

    /// Insert or update a domain, writing only the columns set on `domain`.
    async fn upsert_domain(&mut self, domain: &Domain) -> Result<(), IndexerError>;

    /// Overwrite only the owner of an existing domain.
    async fn transfer_domain(&mut self, domain: &str, owner: &Felt) -> Result<(), IndexerError>;

    async fn upsert_field(&mut self, field: &Field) -> Result<(), IndexerError>;

    async fn save_state(&mut self, state: &StreamState) -> Result<(), IndexerError>;

    async fn commit(self: Box<Self>) -> Result<(), IndexerError>;

    async fn rollback(self: Box<Self>) -> Result<(), IndexerError>;
}
