//! Per-stream aggregation of the block currently being assembled.
//!
//! Every entity category is a [`SyncMap`] from natural key to at most one
//! pending mutation; recording the same key twice merges instead of
//! duplicating. The store writer drains the maps at end of block and calls
//! [`AggregationContext::reset`] after a successful commit.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use crate::cache::ResolverCache;
use crate::error::IndexerError;
use crate::events::EventPayload;
use crate::felt::Felt;
use crate::label::{self, ROOT_DOMAIN};
use crate::storage::NamingStorage;
use crate::sync_map::SyncMap;
use crate::types::{
    Action, Address, Contract, Domain, Field, FieldNamespace, Pending, StarknetId, StreamState,
    Subdomain,
};

/// Where an event came from; needed by handlers that build names or
/// register subdomains.
#[derive(Debug, Clone)]
pub struct EventOrigin {
    pub height: u64,
    pub time: DateTime<Utc>,
    pub contract: Contract,
}

pub struct AggregationContext {
    cache: ResolverCache,
    storage: Arc<dyn NamingStorage>,
    /// Contract hash → fixed subdomain label.
    static_subdomains: HashMap<Vec<u8>, String>,

    domains: SyncMap<String, Domain>,
    transferred_domains: SyncMap<String, Domain>,
    starknet_ids: SyncMap<Felt, Pending<StarknetId>>,
    fields: SyncMap<(FieldNamespace, String, String), Field>,
    addresses: SyncMap<String, Address>,
    subdomains: SyncMap<String, Subdomain>,

    /// Height of the last end-of-block marker seen.
    state: RwLock<StreamState>,
    /// Height of the last successful flush.
    checkpoint: RwLock<StreamState>,
}

impl AggregationContext {
    pub fn new(name: impl Into<String>, storage: Arc<dyn NamingStorage>) -> Self {
        let state = StreamState::new(name);
        Self {
            cache: ResolverCache::new(Arc::clone(&storage)),
            storage,
            static_subdomains: HashMap::new(),
            domains: SyncMap::new(),
            transferred_domains: SyncMap::new(),
            starknet_ids: SyncMap::new(),
            fields: SyncMap::new(),
            addresses: SyncMap::new(),
            subdomains: SyncMap::new(),
            checkpoint: RwLock::new(state.clone()),
            state: RwLock::new(state),
        }
    }

    /// Registries whose names always carry a fixed subdomain.
    pub fn with_static_subdomains(mut self, map: HashMap<Vec<u8>, String>) -> Self {
        self.static_subdomains = map;
        self
    }

    /// Resume from a persisted checkpoint.
    pub fn with_checkpoint(self, persisted: StreamState) -> Self {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = persisted.clone();
        *self.checkpoint.write().unwrap_or_else(PoisonError::into_inner) = persisted;
        self
    }

    // ─── Event dispatch ───────────────────────────────────────────────────────

    /// Fold one decoded event into the pending block.
    pub async fn apply(
        &self,
        payload: EventPayload,
        origin: &EventOrigin,
    ) -> Result<(), IndexerError> {
        match payload {
            EventPayload::Transfer(t) => {
                self.record_identity_transfer(&t.token_id.0, &t.from, &t.to).await
            }
            EventPayload::AddrToDomainUpdate(u) | EventPayload::DomainToAddrUpdate(u) => {
                self.record_domain_link(&u.domain, &u.address, &origin.contract).await
            }
            EventPayload::StarknetIdUpdate(u) => {
                self.record_domain_ownership(&u.domain, &u.owner, &u.expiry)
            }
            EventPayload::DomainTransfer(u) => self.record_domain_transfer(&u.domain, &u.new_owner),
            EventPayload::VerifierDataUpdate(u) => {
                self.record_field(
                    &u.starknet_id,
                    FieldNamespace::Verifier,
                    u.field.to_ascii_string(),
                    u.data.to_value_bytes(),
                );
                Ok(())
            }
            EventPayload::DomainToResolverUpdate(u) => {
                self.record_subdomain_binding(&u.domain, &u.resolver, origin.height, origin.time)
                    .await
            }
        }
    }

    // ─── Addresses ────────────────────────────────────────────────────────────

    /// Upsert an address observed on the address sub-stream.
    pub fn record_address(&self, address: Address) {
        self.addresses.set(address.key(), address);
    }

    /// Resolve by hash: storage, then this block's addresses, else a stub.
    pub async fn find_address(&self, hash: &[u8]) -> Result<Address, IndexerError> {
        if let Some(found) = self.storage.address_by_hash(hash).await? {
            return Ok(found);
        }
        Ok(self
            .addresses
            .get(&hex::encode(hash))
            .unwrap_or_else(|| Address::stub(hash.to_vec())))
    }

    // ─── Domains ──────────────────────────────────────────────────────────────

    async fn full_domain_name(
        &self,
        labels: &[Felt],
        contract: &Contract,
    ) -> Result<String, IndexerError> {
        let mut parts = label::decode_segments(labels)?;
        match self.static_subdomains.get(&contract.hash) {
            Some(fixed) => {
                parts.push(fixed.clone());
                parts.push(ROOT_DOMAIN.to_string());
            }
            None => parts.push(self.cache.get_subdomain_suffix(contract.id).await?),
        }
        Ok(parts.join("."))
    }

    fn root_domain_name(labels: &[Felt]) -> Result<String, IndexerError> {
        let mut parts = label::decode_segments(labels)?;
        parts.push(ROOT_DOMAIN.to_string());
        Ok(parts.join("."))
    }

    /// Point a domain at an address. Ownership columns are left untouched.
    pub async fn record_domain_link(
        &self,
        labels: &[Felt],
        address: &Felt,
        contract: &Contract,
    ) -> Result<(), IndexerError> {
        let hash = address.to_bytes_be();
        let resolved = self.find_address(&hash).await?;
        let name = self.full_domain_name(labels, contract).await?;
        debug!(domain = %name, address = %address, "domain link");

        self.domains.update(name.clone(), |pending| {
            let mut d = pending.unwrap_or_else(|| Domain::new(name));
            d.address_hash = Some(hash);
            d.address_id = resolved.id;
            d
        });
        Ok(())
    }

    /// Set owner identity and expiry. Address columns are left untouched.
    pub fn record_domain_ownership(
        &self,
        labels: &[Felt],
        owner: &Felt,
        expiry: &Felt,
    ) -> Result<(), IndexerError> {
        let name = Self::root_domain_name(labels)?;
        let expiry = unix_time(expiry)?;

        self.domains.update(name.clone(), |pending| {
            let mut d = pending.unwrap_or_else(|| Domain::new(name));
            d.owner = Some(owner.clone());
            d.expiry = Some(expiry);
            d
        });
        Ok(())
    }

    /// Owner overwrite applied after the base domain rows are written.
    pub fn record_domain_transfer(
        &self,
        labels: &[Felt],
        new_owner: &Felt,
    ) -> Result<(), IndexerError> {
        let name = Self::root_domain_name(labels)?;
        let mut d = Domain::new(name.clone());
        d.owner = Some(new_owner.clone());
        self.transferred_domains.set(name, d);
        Ok(())
    }

    // ─── Identity tokens ──────────────────────────────────────────────────────

    /// Merge a token `Transfer` into the pending net action.
    ///
    /// A zero `from` is a mint, a zero `to` a burn. A mint replaces any
    /// pending entry with `Insert`; a burn turns any pending entry into
    /// `Delete`; a plain transfer overwrites the owner and keeps the pending
    /// action.
    pub async fn record_identity_transfer(
        &self,
        token: &Felt,
        from: &Felt,
        to: &Felt,
    ) -> Result<(), IndexerError> {
        let (action, owner) = if from.is_zero() {
            (Action::Insert, to)
        } else if to.is_zero() {
            (Action::Delete, from)
        } else {
            (Action::Update, to)
        };

        let hash = owner.to_bytes_be();
        let resolved = self.find_address(&hash).await?;
        let data = StarknetId {
            starknet_id: token.clone(),
            owner_address: hash,
            owner_id: resolved.id,
        };
        debug!(token = %token, %action, "identity transfer");

        self.starknet_ids.update(token.clone(), |pending| match (pending, action) {
            (None, _) | (Some(_), Action::Insert) => Pending::new(data, action),
            (Some(mut p), Action::Delete) => {
                p.action = Action::Delete;
                p
            }
            (Some(mut p), Action::Update) => {
                p.data = data;
                p
            }
        });
        Ok(())
    }

    // ─── Fields ───────────────────────────────────────────────────────────────

    pub fn record_field(
        &self,
        owner: &Felt,
        namespace: FieldNamespace,
        name: String,
        value: Vec<u8>,
    ) {
        let field = Field {
            owner_id: owner.clone(),
            namespace,
            name,
            value,
        };
        self.fields.set(field.key(), field);
    }

    // ─── Subdomains ───────────────────────────────────────────────────────────

    /// Register a subdomain served by `resolver` and seed the resolver cache.
    pub async fn record_subdomain_binding(
        &self,
        labels: &[Felt],
        resolver: &Felt,
        height: u64,
        time: DateTime<Utc>,
    ) -> Result<(), IndexerError> {
        let name = label::decode_segments(labels)?.join(".");
        let resolved = self.find_address(&resolver.to_bytes_be()).await?;
        if let Some(id) = resolved.id {
            self.cache.set_subdomain_suffix(id, &name).await;
        }
        debug!(subdomain = %name, resolver_id = ?resolved.id, "subdomain binding");

        self.subdomains.set(
            name.clone(),
            Subdomain {
                subdomain: name,
                resolver_id: resolved.id,
                registration_height: height,
                registration_date: time,
            },
        );
        Ok(())
    }

    // ─── Block lifecycle ──────────────────────────────────────────────────────

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
            && self.transferred_domains.is_empty()
            && self.starknet_ids.is_empty()
            && self.fields.is_empty()
            && self.addresses.is_empty()
            && self.subdomains.is_empty()
    }

    /// Drop every pending mutation. Stream state is kept.
    pub fn reset(&self) {
        self.domains.reset();
        self.transferred_domains.reset();
        self.starknet_ids.reset();
        self.fields.reset();
        self.addresses.reset();
        self.subdomains.reset();
    }

    /// Record an end-of-block marker.
    pub fn update_state(&self, height: u64) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.last_height = height;
        state.last_time = Some(Utc::now());
    }

    /// In-flight state, advanced on every end-of-block marker.
    pub fn state(&self) -> StreamState {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Last state known to be durably stored.
    pub fn checkpoint(&self) -> StreamState {
        self.checkpoint.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Promote the in-flight state to the persisted checkpoint.
    pub fn mark_persisted(&self, state: StreamState) {
        *self.checkpoint.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    // ─── Snapshots for the store writer ───────────────────────────────────────

    pub fn addresses(&self) -> Vec<Address> {
        self.addresses.values()
    }

    pub fn starknet_ids(&self) -> Vec<Pending<StarknetId>> {
        self.starknet_ids.values()
    }

    pub fn subdomains(&self) -> Vec<Subdomain> {
        self.subdomains.values()
    }

    pub fn domains(&self) -> Vec<Domain> {
        self.domains.values()
    }

    pub fn transferred_domains(&self) -> Vec<Domain> {
        self.transferred_domains.values()
    }

    pub fn fields(&self) -> Vec<Field> {
        self.fields.values()
    }

    pub fn pending_identity(&self, token: &Felt) -> Option<Pending<StarknetId>> {
        self.starknet_ids.get(token)
    }

    pub fn pending_domain(&self, name: &str) -> Option<Domain> {
        self.domains.get(&name.to_string())
    }
}

fn unix_time(felt: &Felt) -> Result<DateTime<Utc>, IndexerError> {
    let secs = felt.to_u64()?;
    i64::try_from(secs)
        .ok()
        .and_then(|s| Utc.timestamp_opt(s, 0).single())
        .ok_or_else(|| IndexerError::Decode(format!("timestamp out of range: {secs}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;

    const CAT: u64 = 0x6B2E;
    const XPLORER: u64 = 0xbfff81efd;

    fn ctx() -> (AggregationContext, MemoryStorage) {
        let store = MemoryStorage::new();
        let ctx = AggregationContext::new("main", Arc::new(store.clone()));
        (ctx, store)
    }

    fn felt(v: u64) -> Felt {
        Felt::from(v)
    }

    fn root_contract() -> Contract {
        Contract { id: 1, hash: vec![1; 32] }
    }

    #[tokio::test]
    async fn mint_then_transfers_nets_to_insert_with_final_owner() {
        let (ctx, _) = ctx();
        let token = felt(42);
        ctx.record_identity_transfer(&token, &Felt::zero(), &felt(0xa)).await.unwrap();
        ctx.record_identity_transfer(&token, &felt(0xa), &felt(0xb)).await.unwrap();
        ctx.record_identity_transfer(&token, &felt(0xb), &felt(0xc)).await.unwrap();

        let p = ctx.pending_identity(&token).unwrap();
        assert_eq!(p.action, Action::Insert);
        assert_eq!(p.data.owner_address, felt(0xc).to_bytes_be());
    }

    #[tokio::test]
    async fn update_then_burn_nets_to_delete() {
        let (ctx, _) = ctx();
        let token = felt(7);
        ctx.record_identity_transfer(&token, &felt(0xa), &felt(0xb)).await.unwrap();
        ctx.record_identity_transfer(&token, &felt(0xb), &Felt::zero()).await.unwrap();
        assert_eq!(ctx.pending_identity(&token).unwrap().action, Action::Delete);
    }

    #[tokio::test]
    async fn mint_then_burn_nets_to_delete() {
        let (ctx, _) = ctx();
        let token = felt(9);
        ctx.record_identity_transfer(&token, &Felt::zero(), &felt(0xa)).await.unwrap();
        ctx.record_identity_transfer(&token, &felt(0xa), &Felt::zero()).await.unwrap();
        assert_eq!(ctx.pending_identity(&token).unwrap().action, Action::Delete);

        ctx.record_identity_transfer(&token, &Felt::zero(), &felt(0xb)).await.unwrap();
        let p = ctx.pending_identity(&token).unwrap();
        assert_eq!(p.action, Action::Insert);
        assert_eq!(p.data.owner_address, felt(0xb).to_bytes_be());
    }

    #[tokio::test]
    async fn transfer_then_transfer_is_single_update() {
        let (ctx, _) = ctx();
        let token = felt(7);
        ctx.record_identity_transfer(&token, &felt(0xa), &felt(0xb)).await.unwrap();
        ctx.record_identity_transfer(&token, &felt(0xb), &felt(0xd)).await.unwrap();

        let ids = ctx.starknet_ids();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].action, Action::Update);
        assert_eq!(ids[0].data.owner_address, felt(0xd).to_bytes_be());
    }

    #[tokio::test]
    async fn owner_id_resolves_from_pending_addresses() {
        let (ctx, _) = ctx();
        ctx.record_address(Address {
            id: Some(77),
            hash: felt(0xb).to_bytes_be(),
            height: 3,
            class_id: None,
        });
        ctx.record_identity_transfer(&felt(1), &Felt::zero(), &felt(0xb)).await.unwrap();
        assert_eq!(ctx.pending_identity(&felt(1)).unwrap().data.owner_id, Some(77));
    }

    #[tokio::test]
    async fn domain_link_and_ownership_merge() {
        let (ctx, _) = ctx();
        let labels = [felt(CAT)];
        ctx.record_domain_link(&labels, &felt(0x123), &root_contract()).await.unwrap();
        ctx.record_domain_ownership(&labels, &felt(42), &felt(1_700_000_000)).unwrap();

        let d = ctx.pending_domain("cat.stark").unwrap();
        assert_eq!(d.address_hash, Some(felt(0x123).to_bytes_be()));
        assert_eq!(d.owner, Some(felt(42)));
        assert_eq!(d.expiry.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(ctx.domains().len(), 1);
    }

    #[tokio::test]
    async fn static_subdomain_by_contract_hash() {
        let store = MemoryStorage::new();
        let contract = Contract { id: 5, hash: vec![0xee; 32] };
        let ctx = AggregationContext::new("main", Arc::new(store)).with_static_subdomains(
            HashMap::from([(contract.hash.clone(), "braavos".to_string())]),
        );

        ctx.record_domain_link(&[felt(CAT)], &felt(1), &contract).await.unwrap();
        assert!(ctx.pending_domain("cat.braavos.stark").is_some());
    }

    #[tokio::test]
    async fn subdomain_binding_seeds_cache_for_later_links() {
        let (ctx, store) = ctx();
        let resolver = felt(0x5050);
        store.insert_address(Address {
            id: Some(31),
            hash: resolver.to_bytes_be(),
            height: 1,
            class_id: None,
        });

        ctx.record_subdomain_binding(&[felt(XPLORER)], &resolver, 10, Utc::now())
            .await
            .unwrap();
        let contract = Contract { id: 31, hash: resolver.to_bytes_be() };
        ctx.record_domain_link(&[felt(CAT)], &felt(9), &contract).await.unwrap();

        assert!(ctx.pending_domain("cat.xplorer.stark").is_some());
        assert_eq!(ctx.subdomains()[0].resolver_id, Some(31));
    }

    #[tokio::test]
    async fn verifier_field_last_write_wins() {
        let (ctx, _) = ctx();
        let name = Felt::from_bytes_be(b"discord");
        for data in [1u64, 2] {
            let payload = EventPayload::VerifierDataUpdate(crate::events::VerifierDataUpdate {
                starknet_id: felt(42),
                field: name.clone(),
                data: felt(data),
                verifier: None,
            });
            let origin = EventOrigin { height: 1, time: Utc::now(), contract: root_contract() };
            ctx.apply(payload, &origin).await.unwrap();
        }
        let fields = ctx.fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].name, "discord");
        assert_eq!(fields[0].value, vec![2]);
    }

    #[tokio::test]
    async fn reset_empties_but_keeps_state() {
        let (ctx, _) = ctx();
        assert!(ctx.is_empty());
        ctx.record_domain_transfer(&[felt(CAT)], &felt(3)).unwrap();
        ctx.update_state(12);
        assert!(!ctx.is_empty());

        ctx.reset();
        assert!(ctx.is_empty());
        assert_eq!(ctx.state().last_height, 12);
        assert_eq!(ctx.checkpoint().last_height, 0);
    }

    #[tokio::test]
    async fn undecodable_expiry_is_decode_error() {
        let (ctx, _) = ctx();
        let huge = Felt::parse("0x1000000000000000000000").unwrap();
        let err = ctx.record_domain_ownership(&[felt(CAT)], &felt(1), &huge).unwrap_err();
        assert!(err.is_decode());
        assert!(ctx.is_empty());
    }
}
