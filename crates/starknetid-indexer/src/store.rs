//! Applies one block's aggregate to storage in a single transaction.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use starknetid_core::context::AggregationContext;
use starknetid_core::error::IndexerError;
use starknetid_core::storage::{NamingStorage, NamingTransaction};
use starknetid_core::types::{Action, StreamState};

pub struct StoreWriter {
    storage: Arc<dyn NamingStorage>,
}

impl StoreWriter {
    pub fn new(storage: Arc<dyn NamingStorage>) -> Self {
        Self { storage }
    }

    /// Persist the pending block and the in-flight stream state.
    ///
    /// An empty context opens no transaction. On failure the transaction is
    /// rolled back and the context keeps its pending mutations; on success it
    /// is reset and its checkpoint advances to the flushed height.
    pub async fn flush(&self, ctx: &AggregationContext) -> Result<(), IndexerError> {
        if ctx.is_empty() {
            return Ok(());
        }
        let since = Instant::now();
        let state = ctx.state();

        let mut tx = self.storage.begin().await?;
        if let Err(e) = Self::write(&mut tx, ctx, &state).await {
            if let Err(rb) = tx.rollback().await {
                warn!(channel = %state.name, error = %rb, "rollback failed");
            }
            return Err(e);
        }
        tx.commit().await?;

        ctx.reset();
        ctx.mark_persisted(state.clone());

        info!(
            channel = %state.name,
            height = state.last_height,
            save_time_ms = since.elapsed().as_millis() as u64,
            "indexed"
        );
        Ok(())
    }

    async fn write(
        tx: &mut Box<dyn NamingTransaction>,
        ctx: &AggregationContext,
        state: &StreamState,
    ) -> Result<(), IndexerError> {
        let addresses = ctx.addresses();
        if !addresses.is_empty() {
            tx.save_addresses(&addresses).await?;
        }

        let (mut minted, mut transferred, mut burned) = (Vec::new(), Vec::new(), Vec::new());
        for pending in ctx.starknet_ids() {
            match pending.action {
                Action::Insert => minted.push(pending.data),
                Action::Update => transferred.push(pending.data),
                Action::Delete => burned.push(pending.data.starknet_id),
            }
        }
        if !minted.is_empty() {
            tx.insert_starknet_ids(&minted).await?;
        }
        for id in &transferred {
            tx.update_starknet_id_owner(id).await?;
        }
        if !burned.is_empty() {
            tx.delete_starknet_ids(&burned).await?;
        }

        let subdomains = ctx.subdomains();
        if !subdomains.is_empty() {
            tx.insert_subdomains(&subdomains).await?;
        }

        for domain in ctx.domains() {
            tx.upsert_domain(&domain).await?;
        }
        for domain in ctx.transferred_domains() {
            if let Some(owner) = &domain.owner {
                tx.transfer_domain(&domain.domain, owner).await?;
            }
        }

        for field in ctx.fields() {
            tx.upsert_field(&field).await?;
        }

        tx.save_state(state).await
    }
}
