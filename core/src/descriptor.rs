//! Canonical bridge descriptors and the raw records they are built from.

use crate::now_ms;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Transport name used when a source reports none.
pub const DIRECT_TRANSPORT: &str = "direct";

/// Loosely-typed bag of source-native fields. Adapters fill in whatever the
/// source provides; validation happens at the normalization boundary, not in
/// the adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawRecord {
    pub fingerprint: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub transport: Option<String>,
    pub observed_ms: Option<i64>,
    /// Source-specific leftovers, kept for provenance only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new(fingerprint: impl Into<String>, address: impl Into<String>, port: u16) -> Self {
        RawRecord {
            fingerprint: Some(fingerprint.into()),
            address: Some(address.into()),
            port: Some(port),
            ..RawRecord::default()
        }
    }

    pub fn transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = Some(transport.into());
        self
    }

    pub fn observed_ms(mut self, ms: i64) -> Self {
        self.observed_ms = Some(ms);
        self
    }
}

/// Canonical, source-agnostic representation of one discovered endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeDescriptor {
    /// Opaque identity key; unique within a run after normalization.
    pub fingerprint: String,
    pub address: String,
    pub port: u16,
    pub transport: String,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
    /// Contributing adapter names in trust order; more than one after a merge.
    pub sources: Vec<String>,
    /// True only when produced under a verified authorization record.
    pub authorized: bool,
    /// True when `fingerprint`/`address` hold ciphertext rather than plaintext.
    pub encrypted: bool,
}

/// Why a raw record was dropped at the normalization boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizationError {
    MissingFingerprint,
    MissingAddress,
    MissingPort,
    InvalidPort(u16),
}

/// Map a raw record onto the canonical schema. Records missing fingerprint,
/// address or port are dropped (counted by the caller, not fatal to a run).
pub fn normalize(raw: &RawRecord, source: &str) -> Result<BridgeDescriptor, NormalizationError> {
    let fingerprint = match raw.fingerprint.as_deref() {
        Some(fp) if !fp.trim().is_empty() => fp.trim().to_string(),
        _ => return Err(NormalizationError::MissingFingerprint),
    };
    let address = match raw.address.as_deref() {
        Some(a) if !a.trim().is_empty() => a.trim().to_string(),
        _ => return Err(NormalizationError::MissingAddress),
    };
    let port = match raw.port {
        Some(0) => return Err(NormalizationError::InvalidPort(0)),
        Some(p) => p,
        None => return Err(NormalizationError::MissingPort),
    };
    let observed = raw.observed_ms.unwrap_or_else(now_ms);
    Ok(BridgeDescriptor {
        fingerprint,
        address,
        port,
        transport: raw
            .transport
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(DIRECT_TRANSPORT)
            .to_string(),
        first_seen_ms: observed,
        last_seen_ms: observed,
        sources: vec![source.to_string()],
        authorized: false,
        encrypted: false,
    })
}

impl BridgeDescriptor {
    /// Merge a later observation of the same fingerprint into `self`.
    /// `self` came from the higher-trust source, so its transport, address
    /// and port win on conflict; timestamps widen and sources union.
    pub fn merge_from(&mut self, other: &BridgeDescriptor) {
        debug_assert_eq!(self.fingerprint, other.fingerprint);
        self.first_seen_ms = self.first_seen_ms.min(other.first_seen_ms);
        // last_seen is updated, never decreased
        self.last_seen_ms = self.last_seen_ms.max(other.last_seen_ms);
        for s in &other.sources {
            if !self.sources.contains(s) {
                self.sources.push(s.clone());
            }
        }
    }
}
