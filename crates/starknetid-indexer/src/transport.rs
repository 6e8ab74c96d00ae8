//! The streaming transport the supervisor consumes.
//!
//! A transport multiplexes every subscription over one message stream and
//! reports dropped subscriptions on a separate reconnect stream. Both streams
//! are handed to [`Supervisor::start`](crate::supervisor::Supervisor::start)
//! as `mpsc` receivers.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use starknetid_core::error::IndexerError;
use starknetid_core::types::{Address, Contract};

/// Transport-level subscription id. Changes on every resubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─── Filters ──────────────────────────────────────────────────────────────────

/// Strict lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegerFilter {
    pub gt: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    /// Emitting contract (hex).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<String>,
    /// Event names; empty = all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<IntegerFilter>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressFilter {
    #[serde(default)]
    pub only_starknet: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<IntegerFilter>,
}

/// Filter template of one logical stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(default)]
    pub events: Vec<EventFilter>,
    #[serde(default)]
    pub addresses: Vec<AddressFilter>,
}

impl Subscription {
    /// Copy of this template resuming strictly after `last_height` and
    /// `last_address_id`.
    pub fn resume(&self, last_height: u64, last_address_id: u64) -> Self {
        let mut sub = self.clone();
        for f in &mut sub.events {
            f.height = Some(IntegerFilter { gt: last_height });
        }
        for f in &mut sub.addresses {
            f.id = Some(IntegerFilter { gt: last_address_id });
        }
        sub
    }

    pub fn has_address_filter(&self) -> bool {
        !self.addresses.is_empty()
    }
}

// ─── Messages ─────────────────────────────────────────────────────────────────

/// One message on the multiplexed stream.
#[derive(Debug, Clone)]
pub struct TransportMessage {
    pub subscription_id: SubscriptionId,
    pub payload: Payload,
}

#[derive(Debug, Clone)]
pub enum Payload {
    EndOfBlock { height: u64 },
    Event(EventMessage),
    Address(AddressNotice),
}

#[derive(Debug, Clone)]
pub struct EventMessage {
    pub name: String,
    pub height: u64,
    /// Block time, unix seconds.
    pub time: u64,
    pub id: u64,
    pub contract: Contract,
    /// Structured payload as JSON.
    pub raw: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AddressNotice {
    pub id: u64,
    pub hash: Vec<u8>,
    pub height: u64,
    pub class_id: Option<u64>,
}

impl From<AddressNotice> for Address {
    fn from(n: AddressNotice) -> Self {
        Address {
            id: Some(n.id),
            hash: n.hash,
            height: n.height,
            class_id: n.class_id,
        }
    }
}

impl TransportMessage {
    pub fn end_of_block(id: SubscriptionId, height: u64) -> Self {
        Self {
            subscription_id: id,
            payload: Payload::EndOfBlock { height },
        }
    }

    pub fn event(id: SubscriptionId, event: EventMessage) -> Self {
        Self {
            subscription_id: id,
            payload: Payload::Event(event),
        }
    }

    pub fn address(id: SubscriptionId, notice: AddressNotice) -> Self {
        Self {
            subscription_id: id,
            payload: Payload::Address(notice),
        }
    }
}

// ─── Transport trait ──────────────────────────────────────────────────────────

#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, filter: Subscription) -> Result<SubscriptionId, IndexerError>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), IndexerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_sets_lower_bounds() {
        let template = Subscription {
            events: vec![EventFilter::default(), EventFilter::default()],
            addresses: vec![AddressFilter::default()],
        };
        let sub = template.resume(11, 300);
        assert!(sub.events.iter().all(|f| f.height == Some(IntegerFilter { gt: 11 })));
        assert_eq!(sub.addresses[0].id, Some(IntegerFilter { gt: 300 }));
        assert!(template.events[0].height.is_none());
    }

    #[test]
    fn subscription_from_yaml() {
        let yaml = r#"
events:
  - contract: "0x05dbdedc203e92749e2e746e2d40a768d966bd243df04a6b712e222bc040a9af"
    name: [Transfer, VerifierDataUpdate]
addresses:
  - only_starknet: true
"#;
        let sub: Subscription = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(sub.events[0].name.len(), 2);
        assert!(sub.addresses[0].only_starknet);
        assert!(sub.has_address_filter());
    }
}
