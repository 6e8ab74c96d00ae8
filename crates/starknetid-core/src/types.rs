//! Data model shared by the aggregation context and the storage backends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::felt::Felt;

// ─── Address ──────────────────────────────────────────────────────────────────

/// A chain address, keyed by its hash.
///
/// `id` is the surrogate identity assigned by the upstream indexer; it is
/// `None` for stubs created from a bare hash reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub id: Option<u64>,
    pub hash: Vec<u8>,
    /// Block number of the first occurrence.
    pub height: u64,
    pub class_id: Option<u64>,
}

impl Address {
    /// An address known only by hash.
    pub fn stub(hash: Vec<u8>) -> Self {
        Self {
            id: None,
            hash,
            height: 0,
            class_id: None,
        }
    }

    /// Aggregation key (lowercase hex of the hash).
    pub fn key(&self) -> String {
        hex::encode(&self.hash)
    }
}

/// The contract that emitted an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    /// Address id of the contract.
    pub id: u64,
    pub hash: Vec<u8>,
}

// ─── Domain ───────────────────────────────────────────────────────────────────

/// Pending mutation of a domain row.
///
/// Every column is optional: a block may touch the address mapping, the
/// ownership/expiry pair, or both, and the write must only set the columns
/// present here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    /// Full dot-joined name, e.g. `"deployer.fricoben.stark"`.
    pub domain: String,
    pub address_hash: Option<Vec<u8>>,
    pub address_id: Option<u64>,
    /// Owner's starknet id.
    pub owner: Option<Felt>,
    pub expiry: Option<DateTime<Utc>>,
}

impl Domain {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            ..Default::default()
        }
    }

    /// `true` when the address-mapping columns are set.
    pub fn has_address(&self) -> bool {
        self.address_hash.is_some()
    }

    /// `true` when the ownership/expiry columns are set.
    pub fn has_ownership(&self) -> bool {
        self.owner.is_some() || self.expiry.is_some()
    }
}

// ─── Subdomain ────────────────────────────────────────────────────────────────

/// A subdomain served by a custom resolver contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subdomain {
    /// Label without the root suffix, e.g. `"xplorer"`.
    pub subdomain: String,
    /// Address id of the resolver contract, if it is indexed.
    pub resolver_id: Option<u64>,
    pub registration_height: u64,
    pub registration_date: DateTime<Utc>,
}

// ─── StarknetId ───────────────────────────────────────────────────────────────

/// An identity token and its current owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarknetId {
    pub starknet_id: Felt,
    pub owner_address: Vec<u8>,
    pub owner_id: Option<u64>,
}

// ─── Field ────────────────────────────────────────────────────────────────────

/// Namespace of an identity field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldNamespace {
    Verifier = 1,
    User = 2,
}

impl FieldNamespace {
    /// Stored `SMALLINT` value.
    pub fn as_i16(self) -> i16 {
        self as i16
    }

    pub fn from_i16(v: i16) -> Option<Self> {
        match v {
            1 => Some(Self::Verifier),
            2 => Some(Self::User),
            _ => None,
        }
    }
}

/// A named data field attached to an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub owner_id: Felt,
    pub namespace: FieldNamespace,
    pub name: String,
    pub value: Vec<u8>,
}

impl Field {
    /// Unique key `(namespace, owner, name)`.
    pub fn key(&self) -> (FieldNamespace, String, String) {
        (self.namespace, self.owner_id.to_decimal_string(), self.name.clone())
    }
}

// ─── StreamState ──────────────────────────────────────────────────────────────

/// Resumable checkpoint of one logical stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    pub name: String,
    /// Last block height whose events are durably stored.
    pub last_height: u64,
    pub last_time: Option<DateTime<Utc>>,
}

impl StreamState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

// ─── Net actions ──────────────────────────────────────────────────────────────

/// Net action collapsed from every event touching one entity in a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A pending entity together with its net action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending<T> {
    pub action: Action,
    pub data: T,
}

impl<T> Pending<T> {
    pub fn new(data: T, action: Action) -> Self {
        Self { action, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_column_presence() {
        let mut d = Domain::new("cat.stark");
        assert!(!d.has_address() && !d.has_ownership());
        d.owner = Some(Felt::from(1));
        assert!(d.has_ownership());
        assert!(!d.has_address());
    }

    #[test]
    fn field_namespace_roundtrip() {
        assert_eq!(
            FieldNamespace::from_i16(FieldNamespace::Verifier.as_i16()),
            Some(FieldNamespace::Verifier)
        );
        assert_eq!(FieldNamespace::from_i16(9), None);
    }

    #[test]
    fn address_key_is_hex() {
        assert_eq!(Address::stub(vec![0xab, 0x01]).key(), "ab01");
    }
}
