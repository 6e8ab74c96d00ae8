//! One worker per logical stream.
//!
//! A [`Channel`] owns an [`AggregationContext`] and a bounded inbound queue.
//! Its loop folds events into the context and flushes at every end-of-block
//! marker. A failed flush halts the channel: later messages are drained and
//! discarded until the process is restarted.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use starknetid_core::context::{AggregationContext, EventOrigin};
use starknetid_core::error::IndexerError;
use starknetid_core::events::{EventKind, EventPayload};
use starknetid_core::types::StreamState;

use crate::store::StoreWriter;
use crate::transport::{EventMessage, Payload, TransportMessage};

pub struct Channel {
    name: String,
    worker: Arc<Worker>,
    sender: Mutex<Option<mpsc::Sender<TransportMessage>>>,
    receiver: Mutex<Option<mpsc::Receiver<TransportMessage>>>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// State shared between the channel handle and its loop.
struct Worker {
    name: String,
    context: Arc<AggregationContext>,
    writer: StoreWriter,
    /// Messages accepted but not yet fully processed.
    pending: AtomicUsize,
    failed: AtomicBool,
}

impl Channel {
    pub fn new(context: AggregationContext, writer: StoreWriter, capacity: usize) -> Self {
        let name = context.state().name;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            name: name.clone(),
            worker: Arc::new(Worker {
                name,
                context: Arc::new(context),
                writer,
                pending: AtomicUsize::new(0),
                failed: AtomicBool::new(false),
            }),
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Arc<AggregationContext> {
        &self.worker.context
    }

    /// Last durably flushed state.
    pub fn checkpoint(&self) -> StreamState {
        self.worker.context.checkpoint()
    }

    pub fn is_failed(&self) -> bool {
        self.worker.failed.load(Ordering::SeqCst)
    }

    /// `true` when every accepted message has been processed.
    pub fn is_empty(&self) -> bool {
        self.worker.pending.load(Ordering::SeqCst) == 0
    }

    /// Spawn the processing loop. Calling it again is a no-op.
    pub async fn start(&self, cancel: CancellationToken) {
        let Some(rx) = self.receiver.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            return;
        };
        let worker = Arc::clone(&self.worker);
        let handle = tokio::spawn(async move { worker.run(rx, cancel).await });
        *self.handle.lock().await = Some(handle);
    }

    /// Enqueue a message, waiting while the queue is full.
    pub async fn push(&self, msg: TransportMessage) -> Result<(), IndexerError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| IndexerError::Aborted {
                reason: format!("channel {} is closed", self.name),
            })?;
        let permit = sender.reserve().await.map_err(|_| IndexerError::Aborted {
            reason: format!("channel {} loop has stopped", self.name),
        })?;
        self.worker.pending.fetch_add(1, Ordering::SeqCst);
        permit.send(msg);
        Ok(())
    }

    /// Close the queue and wait for the loop to exit. Queued messages are
    /// processed first unless the loop's token is already cancelled, in which
    /// case they are dropped and the persisted checkpoint stays put.
    pub async fn close(&self) {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!(channel = %self.name, error = %e, "channel loop panicked");
            }
        }
        info!(channel = %self.name, "channel closed");
    }
}

impl Worker {
    async fn run(&self, mut rx: mpsc::Receiver<TransportMessage>, cancel: CancellationToken) {
        loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            self.handle(msg).await;
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        debug!(channel = %self.name, "channel loop stopped");
    }

    async fn handle(&self, msg: TransportMessage) {
        if self.failed.load(Ordering::SeqCst) {
            return;
        }
        let subscription = msg.subscription_id.0;

        match msg.payload {
            Payload::EndOfBlock { height } => {
                info!(subscription, height, channel = %self.name, "end of block");
                self.context.update_state(height);
                if let Err(e) = self.writer.flush(&self.context).await {
                    error!(channel = %self.name, height, error = %e, "saving data");
                    self.failed.store(true, Ordering::SeqCst);
                }
            }
            Payload::Event(event) => {
                if let Err(e) = self.handle_event(&event).await {
                    error!(
                        channel = %self.name,
                        name = %event.name,
                        height = event.height,
                        error = %e,
                        "event parsing"
                    );
                }
                debug!(
                    name = %event.name,
                    height = event.height,
                    time = event.time,
                    id = event.id,
                    subscription,
                    channel = %self.name,
                    "new event"
                );
            }
            Payload::Address(notice) => {
                debug!(
                    height = notice.height,
                    id = notice.id,
                    subscription,
                    channel = %self.name,
                    "new address"
                );
                self.context.record_address(notice.into());
            }
        }
    }

    async fn handle_event(&self, event: &EventMessage) -> Result<(), IndexerError> {
        let kind: EventKind = event.name.parse()?;
        if kind.is_ignored() {
            debug!(name = %kind, height = event.height, "skip event");
            return Ok(());
        }
        let Some(payload) = EventPayload::decode(kind, &event.raw)? else {
            return Ok(());
        };
        let time = i64::try_from(event.time)
            .ok()
            .and_then(|t| Utc.timestamp_opt(t, 0).single())
            .unwrap_or_else(|| {
                warn!(time = event.time, "event time out of range");
                Utc::now()
            });
        let origin = EventOrigin {
            height: event.height,
            time,
            contract: event.contract.clone(),
        };
        self.context.apply(payload, &origin).await
    }
}
