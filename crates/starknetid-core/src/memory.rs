//! In-memory naming store.
//!
//! Writes are buffered per transaction and applied under one lock on commit,
//! so a failed or rolled-back transaction leaves no trace. Test hooks let
//! callers inject commit failures and latency.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::IndexerError;
use crate::felt::Felt;
use crate::storage::{NamingStorage, NamingTransaction};
use crate::types::{Address, Domain, Field, FieldNamespace, StarknetId, StreamState, Subdomain};

#[derive(Debug, Default, Clone)]
struct Tables {
    addresses: HashMap<Vec<u8>, Address>,
    domains: BTreeMap<String, Domain>,
    subdomains: BTreeMap<String, Subdomain>,
    starknet_ids: HashMap<Felt, StarknetId>,
    fields: HashMap<(FieldNamespace, String, String), Field>,
    states: BTreeMap<String, StreamState>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: Mutex<Tables>,
    fail_commits: AtomicUsize,
    commit_delay: Mutex<Duration>,
    begun: AtomicUsize,
    committed: AtomicUsize,
}

/// In-memory [`NamingStorage`]. Cloning shares the same tables.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.inner.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Test hooks ───────────────────────────────────────────────────────────

    /// Make the next commit fail with a storage error.
    pub fn fail_next_commit(&self) {
        self.set_fail_commits(1);
    }

    /// Make the next `n` commits fail.
    pub fn set_fail_commits(&self, n: usize) {
        self.inner.fail_commits.store(n, Ordering::SeqCst);
    }

    /// Sleep this long inside every commit before applying it.
    pub fn set_commit_delay(&self, delay: Duration) {
        *self.inner.commit_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of transactions opened so far.
    pub fn transactions_begun(&self) -> usize {
        self.inner.begun.load(Ordering::SeqCst)
    }

    /// Number of transactions committed so far.
    pub fn transactions_committed(&self) -> usize {
        self.inner.committed.load(Ordering::SeqCst)
    }

    // ─── Seeding ──────────────────────────────────────────────────────────────

    pub fn insert_address(&self, address: Address) {
        self.tables().addresses.insert(address.hash.clone(), address);
    }

    pub fn insert_subdomain(&self, subdomain: Subdomain) {
        self.tables().subdomains.insert(subdomain.subdomain.clone(), subdomain);
    }

    pub fn insert_state(&self, state: StreamState) {
        self.tables().states.insert(state.name.clone(), state);
    }

    pub fn insert_starknet_id(&self, id: StarknetId) {
        self.tables().starknet_ids.insert(id.starknet_id.clone(), id);
    }

    // ─── Inspection ───────────────────────────────────────────────────────────

    pub fn domain(&self, name: &str) -> Option<Domain> {
        self.tables().domains.get(name).cloned()
    }

    pub fn domains(&self) -> Vec<Domain> {
        self.tables().domains.values().cloned().collect()
    }

    pub fn subdomain(&self, label: &str) -> Option<Subdomain> {
        self.tables().subdomains.get(label).cloned()
    }

    pub fn starknet_id(&self, id: &Felt) -> Option<StarknetId> {
        self.tables().starknet_ids.get(id).cloned()
    }

    pub fn starknet_id_count(&self) -> usize {
        self.tables().starknet_ids.len()
    }

    pub fn field(&self, namespace: FieldNamespace, owner: &Felt, name: &str) -> Option<Field> {
        let key = (namespace, owner.to_decimal_string(), name.to_string());
        self.tables().fields.get(&key).cloned()
    }

    pub fn address(&self, hash: &[u8]) -> Option<Address> {
        self.tables().addresses.get(hash).cloned()
    }

    pub fn state(&self, name: &str) -> Option<StreamState> {
        self.tables().states.get(name).cloned()
    }
}

#[async_trait]
impl NamingStorage for MemoryStorage {
    async fn address_by_hash(&self, hash: &[u8]) -> Result<Option<Address>, IndexerError> {
        Ok(self.address(hash))
    }

    async fn subdomain_by_resolver(
        &self,
        resolver_id: u64,
    ) -> Result<Option<Subdomain>, IndexerError> {
        Ok(self
            .tables()
            .subdomains
            .values()
            .find(|s| s.resolver_id == Some(resolver_id))
            .cloned())
    }

    async fn last_address_id(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self.tables().addresses.values().filter_map(|a| a.id).max())
    }

    async fn state_by_name(&self, name: &str) -> Result<Option<StreamState>, IndexerError> {
        Ok(self.state(name))
    }

    async fn list_states(&self) -> Result<Vec<StreamState>, IndexerError> {
        Ok(self.tables().states.values().cloned().collect())
    }

    async fn begin(&self) -> Result<Box<dyn NamingTransaction>, IndexerError> {
        self.inner.begun.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            ops: Vec::new(),
        }))
    }
}

// ─── Transaction ──────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Op {
    SaveAddress(Address),
    InsertStarknetId(StarknetId),
    UpdateStarknetIdOwner(StarknetId),
    DeleteStarknetId(Felt),
    InsertSubdomain(Subdomain),
    UpsertDomain(Domain),
    TransferDomain(String, Felt),
    UpsertField(Field),
    SaveState(StreamState),
}

impl Op {
    fn apply(self, t: &mut Tables) {
        match self {
            Op::SaveAddress(a) => {
                t.addresses.insert(a.hash.clone(), a);
            }
            Op::InsertStarknetId(s) => {
                t.starknet_ids.insert(s.starknet_id.clone(), s);
            }
            Op::UpdateStarknetIdOwner(s) => {
                if let Some(row) = t.starknet_ids.get_mut(&s.starknet_id) {
                    row.owner_address = s.owner_address;
                    row.owner_id = s.owner_id;
                }
            }
            Op::DeleteStarknetId(id) => {
                t.starknet_ids.remove(&id);
            }
            Op::InsertSubdomain(s) => {
                t.subdomains.entry(s.subdomain.clone()).or_insert(s);
            }
            Op::UpsertDomain(d) => {
                let row = t
                    .domains
                    .entry(d.domain.clone())
                    .or_insert_with(|| Domain::new(d.domain.clone()));
                let (has_address, has_ownership) = (d.has_address(), d.has_ownership());
                if has_address {
                    row.address_hash = d.address_hash;
                    row.address_id = d.address_id;
                }
                if has_ownership {
                    row.owner = d.owner;
                    row.expiry = d.expiry;
                }
            }
            Op::TransferDomain(name, owner) => {
                if let Some(row) = t.domains.get_mut(&name) {
                    row.owner = Some(owner);
                }
            }
            Op::UpsertField(f) => {
                t.fields.insert(f.key(), f);
            }
            Op::SaveState(s) => {
                t.states.insert(s.name.clone(), s);
            }
        }
    }
}

struct MemoryTransaction {
    inner: Arc<Inner>,
    ops: Vec<Op>,
}

#[async_trait]
impl NamingTransaction for MemoryTransaction {
    async fn save_addresses(&mut self, addresses: &[Address]) -> Result<(), IndexerError> {
        self.ops.extend(addresses.iter().cloned().map(Op::SaveAddress));
        Ok(())
    }

    async fn insert_starknet_ids(&mut self, ids: &[StarknetId]) -> Result<(), IndexerError> {
        self.ops.extend(ids.iter().cloned().map(Op::InsertStarknetId));
        Ok(())
    }

    async fn update_starknet_id_owner(&mut self, id: &StarknetId) -> Result<(), IndexerError> {
        self.ops.push(Op::UpdateStarknetIdOwner(id.clone()));
        Ok(())
    }

    async fn delete_starknet_ids(&mut self, ids: &[Felt]) -> Result<(), IndexerError> {
        self.ops.extend(ids.iter().cloned().map(Op::DeleteStarknetId));
        Ok(())
    }

    async fn insert_subdomains(&mut self, subdomains: &[Subdomain]) -> Result<(), IndexerError> {
        self.ops.extend(subdomains.iter().cloned().map(Op::InsertSubdomain));
        Ok(())
    }

    async fn upsert_domain(&mut self, domain: &Domain) -> Result<(), IndexerError> {
        self.ops.push(Op::UpsertDomain(domain.clone()));
        Ok(())
    }

    async fn transfer_domain(&mut self, domain: &str, owner: &Felt) -> Result<(), IndexerError> {
        self.ops.push(Op::TransferDomain(domain.to_string(), owner.clone()));
        Ok(())
    }

    async fn upsert_field(&mut self, field: &Field) -> Result<(), IndexerError> {
        self.ops.push(Op::UpsertField(field.clone()));
        Ok(())
    }

    async fn save_state(&mut self, state: &StreamState) -> Result<(), IndexerError> {
        self.ops.push(Op::SaveState(state.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), IndexerError> {
        let delay = *self.inner.commit_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let injected = self
            .inner
            .fail_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(IndexerError::Storage("injected commit failure".into()));
        }

        let this = *self;
        let count = this.ops.len();
        {
            let mut tables = this.inner.tables.lock().unwrap_or_else(PoisonError::into_inner);
            for op in this.ops {
                op.apply(&mut tables);
            }
        }
        this.inner.committed.fetch_add(1, Ordering::SeqCst);
        debug!(ops = count, "memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), IndexerError> {
        debug!(ops = self.ops.len(), "memory transaction rolled back");
        Ok(())
    }
}
