//! Naming-registry event kinds and their structured payloads.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::IndexerError;
use crate::felt::{Felt, Uint256};

/// Every event name the naming contracts emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Transfer,
    VerifierDataUpdate,
    OnInftEquipped,
    DomainToAddrUpdate,
    AddrToDomainUpdate,
    StarknetIdUpdate,
    DomainTransfer,
    ResetSubdomainsUpdate,
    DomainToResolverUpdate,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        Self::Transfer,
        Self::VerifierDataUpdate,
        Self::OnInftEquipped,
        Self::DomainToAddrUpdate,
        Self::AddrToDomainUpdate,
        Self::StarknetIdUpdate,
        Self::DomainTransfer,
        Self::ResetSubdomainsUpdate,
        Self::DomainToResolverUpdate,
    ];

    /// Event name as emitted on chain.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transfer => "Transfer",
            Self::VerifierDataUpdate => "VerifierDataUpdate",
            Self::OnInftEquipped => "on_inft_equipped",
            Self::DomainToAddrUpdate => "domain_to_addr_update",
            Self::AddrToDomainUpdate => "addr_to_domain_update",
            Self::StarknetIdUpdate => "starknet_id_update",
            Self::DomainTransfer => "domain_transfer",
            Self::ResetSubdomainsUpdate => "reset_subdomains_update",
            Self::DomainToResolverUpdate => "domain_to_resolver_update",
        }
    }

    /// Recognized kinds that carry nothing the index stores.
    pub fn is_ignored(self) -> bool {
        matches!(self, Self::OnInftEquipped | Self::ResetSubdomainsUpdate)
    }
}

impl FromStr for EventKind {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| IndexerError::UnknownEvent(s.to_string()))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Payloads ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Transfer {
    #[serde(rename = "from_")]
    pub from: Felt,
    pub to: Felt,
    #[serde(rename = "tokenId")]
    pub token_id: Uint256,
}

/// Payload of both `addr_to_domain_update` and `domain_to_addr_update`.
#[derive(Debug, Clone, Deserialize)]
pub struct DomainAddressUpdate {
    #[serde(default)]
    pub domain_len: Option<Felt>,
    pub domain: Vec<Felt>,
    pub address: Felt,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StarknetIdUpdate {
    #[serde(default)]
    pub domain_len: Option<Felt>,
    pub domain: Vec<Felt>,
    pub owner: Felt,
    pub expiry: Felt,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomainTransfer {
    #[serde(default)]
    pub domain_len: Option<Felt>,
    pub domain: Vec<Felt>,
    #[serde(default)]
    pub prev_owner: Option<Felt>,
    pub new_owner: Felt,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifierDataUpdate {
    pub starknet_id: Felt,
    pub field: Felt,
    pub data: Felt,
    #[serde(default)]
    pub verifier: Option<Felt>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomainToResolverUpdate {
    #[serde(default)]
    pub domain_len: Option<Felt>,
    pub domain: Vec<Felt>,
    pub resolver: Felt,
}

/// A decoded event payload.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Transfer(Transfer),
    AddrToDomainUpdate(DomainAddressUpdate),
    DomainToAddrUpdate(DomainAddressUpdate),
    StarknetIdUpdate(StarknetIdUpdate),
    DomainTransfer(DomainTransfer),
    VerifierDataUpdate(VerifierDataUpdate),
    DomainToResolverUpdate(DomainToResolverUpdate),
}

impl EventPayload {
    /// Decode `raw` JSON for `kind`. Ignored kinds yield `Ok(None)`.
    pub fn decode(kind: EventKind, raw: &[u8]) -> Result<Option<Self>, IndexerError> {
        let payload = match kind {
            EventKind::OnInftEquipped | EventKind::ResetSubdomainsUpdate => return Ok(None),
            EventKind::Transfer => Self::Transfer(parse(kind, raw)?),
            EventKind::AddrToDomainUpdate => Self::AddrToDomainUpdate(parse(kind, raw)?),
            EventKind::DomainToAddrUpdate => Self::DomainToAddrUpdate(parse(kind, raw)?),
            EventKind::StarknetIdUpdate => Self::StarknetIdUpdate(parse(kind, raw)?),
            EventKind::DomainTransfer => Self::DomainTransfer(parse(kind, raw)?),
            EventKind::VerifierDataUpdate => Self::VerifierDataUpdate(parse(kind, raw)?),
            EventKind::DomainToResolverUpdate => Self::DomainToResolverUpdate(parse(kind, raw)?),
        };
        Ok(Some(payload))
    }
}

fn parse<T: for<'de> Deserialize<'de>>(kind: EventKind, raw: &[u8]) -> Result<T, IndexerError> {
    serde_json::from_slice(raw).map_err(|e| IndexerError::Decode(format!("{kind}: {e}")))
}
