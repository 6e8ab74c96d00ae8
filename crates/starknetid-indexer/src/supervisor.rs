//! Subscription lifecycle: subscribe, demultiplex, resubscribe, shut down.
//!
//! The supervisor keeps two views of its channels. Transport subscription ids
//! change on every reconnect; logical stream names, and the channel with its
//! aggregation context, persist across them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use starknetid_core::context::AggregationContext;
use starknetid_core::error::IndexerError;
use starknetid_core::storage::NamingStorage;
use starknetid_core::types::StreamState;

use crate::channel::Channel;
use crate::config::IndexerConfig;
use crate::store::StoreWriter;
use crate::transport::{Subscription, SubscriptionId, Transport, TransportMessage};

pub struct Supervisor {
    transport: Arc<dyn Transport>,
    storage: Arc<dyn NamingStorage>,
    static_subdomains: HashMap<Vec<u8>, String>,
    channel_capacity: usize,
    resubscribe_poll: Duration,

    channels: RwLock<HashMap<SubscriptionId, Arc<Channel>>>,
    channels_by_name: RwLock<HashMap<String, Arc<Channel>>>,
    subscriptions: RwLock<BTreeMap<String, Subscription>>,

    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(
        config: &IndexerConfig,
        storage: Arc<dyn NamingStorage>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, IndexerError> {
        Ok(Self {
            transport,
            storage,
            static_subdomains: config.static_subdomains()?,
            channel_capacity: config.channel_capacity,
            resubscribe_poll: config.resubscribe_poll(),
            channels: RwLock::new(HashMap::new()),
            channels_by_name: RwLock::new(HashMap::new()),
            subscriptions: RwLock::new(BTreeMap::new()),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    fn new_channel(&self, state: StreamState) -> Arc<Channel> {
        let context = AggregationContext::new(state.name.clone(), Arc::clone(&self.storage))
            .with_static_subdomains(self.static_subdomains.clone())
            .with_checkpoint(state);
        let writer = StoreWriter::new(Arc::clone(&self.storage));
        Arc::new(Channel::new(context, writer, self.channel_capacity))
    }

    /// Build one channel per persisted stream, seeded with its checkpoint.
    pub async fn init(&self) -> Result<(), IndexerError> {
        let states = self.storage.list_states().await?;
        let mut by_name = self.channels_by_name.write().await;
        for state in states {
            info!(channel = %state.name, height = state.last_height, "restoring stream state");
            let name = state.name.clone();
            by_name.insert(name, self.new_channel(state));
        }
        Ok(())
    }

    /// Channel of a logical stream, if it exists.
    pub async fn channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels_by_name.read().await.get(name).cloned()
    }

    /// Transport ids currently bound, with their stream names.
    pub async fn active_subscriptions(&self) -> Vec<(SubscriptionId, String)> {
        let mut out: Vec<_> = self
            .channels
            .read()
            .await
            .iter()
            .map(|(id, ch)| (*id, ch.name().to_string()))
            .collect();
        out.sort();
        out
    }

    async fn channel_or_create(&self, name: &str) -> Arc<Channel> {
        let mut by_name = self.channels_by_name.write().await;
        if let Some(ch) = by_name.get(name) {
            return Arc::clone(ch);
        }
        let ch = self.new_channel(StreamState::new(name));
        by_name.insert(name.to_string(), Arc::clone(&ch));
        ch
    }

    /// Filter resuming strictly after the channel's persisted checkpoint.
    async fn resume_filter(
        &self,
        ch: &Channel,
        template: &Subscription,
    ) -> Result<Subscription, IndexerError> {
        let last_address_id = if template.has_address_filter() {
            self.storage.last_address_id().await?.unwrap_or(0)
        } else {
            0
        };
        Ok(template.resume(ch.checkpoint().last_height, last_address_id))
    }

    /// `true` when some live transport id is routed to `ch`.
    async fn is_bound(&self, ch: &Arc<Channel>) -> bool {
        self.channels.read().await.values().any(|bound| Arc::ptr_eq(bound, ch))
    }

    /// Start a channel and subscribe for every logical stream. Streams that
    /// already hold a live subscription are skipped.
    pub async fn subscribe(
        &self,
        subscriptions: BTreeMap<String, Subscription>,
    ) -> Result<(), IndexerError> {
        for (name, template) in subscriptions {
            let ch = self.channel_or_create(&name).await;
            if self.is_bound(&ch).await {
                warn!(topic = %name, "already subscribed");
                continue;
            }
            self.subscriptions.write().await.insert(name.clone(), template.clone());
            ch.start(self.cancel.child_token()).await;

            let filter = self.resume_filter(&ch, &template).await?;
            info!(topic = %name, "subscribing...");
            let id = self.transport.subscribe(filter).await?;
            self.channels.write().await.insert(id, ch);
        }
        Ok(())
    }

    /// Spawn the demultiplexing and reconnect-handling tasks.
    pub fn start(
        self: &Arc<Self>,
        mut messages: mpsc::Receiver<TransportMessage>,
        mut reconnects: mpsc::Receiver<SubscriptionId>,
    ) {
        let this = Arc::clone(self);
        let listen = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = this.cancel.cancelled() => break,
                    msg = messages.recv() => match msg {
                        Some(msg) => this.dispatch(msg).await,
                        None => break,
                    },
                }
            }
            info!("close listen thread");
        });

        let this = Arc::clone(self);
        let reconnect = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = this.cancel.cancelled() => break,
                    id = reconnects.recv() => match id {
                        Some(id) => {
                            if let Err(e) = this.resubscribe(id).await {
                                error!(subscription = %id, error = %e, "resubscribe");
                            }
                        }
                        None => break,
                    },
                }
            }
            info!("close reconnect thread");
        });

        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([listen, reconnect]);
    }

    /// Route one message to its channel. May wait on a full queue.
    pub async fn dispatch(&self, msg: TransportMessage) {
        let id = msg.subscription_id;
        let Some(ch) = self.channels.read().await.get(&id).cloned() else {
            error!(subscription = %id, "unknown subscription");
            return;
        };
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            pushed = ch.push(msg) => {
                if let Err(e) = pushed {
                    warn!(subscription = %id, channel = %ch.name(), error = %e, "message dropped");
                }
            }
        }
    }

    /// Rebind the stream behind a dropped subscription id.
    ///
    /// Waits until the channel has processed everything it accepted, so the
    /// resume filter is computed from a checkpoint covering every buffered
    /// event.
    pub async fn resubscribe(&self, id: SubscriptionId) -> Result<(), IndexerError> {
        let ch = self
            .channels
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(IndexerError::UnknownSubscription(id.0))?;

        while !ch.is_empty() {
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.resubscribe_poll) => {}
            }
        }
        debug!(subscription = %id, channel = %ch.name(), "channel drained");

        self.channels.write().await.remove(&id);

        let template = self
            .subscriptions
            .read()
            .await
            .get(ch.name())
            .cloned()
            .ok_or_else(|| {
                IndexerError::Config(format!("unknown subscription request: {}", ch.name()))
            })?;
        let filter = self.resume_filter(&ch, &template).await?;

        info!(topic = %ch.name(), height = ch.checkpoint().last_height, "resubscribing...");
        let new_id = self.transport.subscribe(filter).await?;
        self.channels.write().await.insert(new_id, ch);
        Ok(())
    }

    /// Unsubscribe every bound id. Stops at the first transport error.
    pub async fn unsubscribe(&self) -> Result<(), IndexerError> {
        for (id, name) in self.active_subscriptions().await {
            info!(subscription = %name, id = id.0, "unsubscribing...");
            self.transport.unsubscribe(id).await?;
        }
        Ok(())
    }

    /// Unsubscribe, stop background tasks and close every channel. Messages
    /// still queued are dropped; streams resume from their checkpoints.
    pub async fn shutdown(&self) -> Result<(), IndexerError> {
        let unsubscribed = self.unsubscribe().await;
        if let Err(e) = &unsubscribed {
            error!(error = %e, "unsubscribing");
        }

        self.cancel.cancel();
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "supervisor task panicked");
            }
        }

        let channels: Vec<_> = self.channels_by_name.read().await.values().cloned().collect();
        join_all(channels.iter().map(|ch| ch.close())).await;
        unsubscribed
    }
}
