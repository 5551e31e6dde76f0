//! Trust points: the anchor state for one zone and class.

use std::fmt;
use std::path::PathBuf;

use hickory_proto::rr::Name;
use serde::Serialize;

use super::key::KeyRecord;
use super::rr::{class_mnemonic, KeyData, KeyRr, KeyType};
use super::state::KeyState;

/// Identity of a trust point. Immutable and unique within a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnchorId {
    /// Zone apex
    pub name: Name,
    /// Numeric DNS class
    pub class: u16,
}

impl AnchorId {
    /// Build an identity.
    #[must_use]
    pub const fn new(name: Name, class: u16) -> Self {
        Self { name, class }
    }
}

impl fmt::Display for AnchorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, class_mnemonic(self.class))
    }
}

/// The anchor set of one zone with its probe bookkeeping.
///
/// `trusted_ds` and `trusted_dnskey` are derived from `keys` by
/// [`TrustPoint::assemble`] and can be rebuilt at any time.
#[derive(Debug, Clone)]
pub struct TrustPoint {
    /// Zone and class
    pub id: AnchorId,
    /// Tracked keys, in no particular order
    pub keys: Vec<KeyRecord>,
    trusted_ds: Option<Vec<KeyRr>>,
    trusted_dnskey: Option<Vec<KeyRr>>,
    /// Time of the last probe attempt
    pub last_queried: u64,
    /// Time of the last probe with a verified key set
    pub last_success: u64,
    /// When the next probe is due. Changed only through the anchor store,
    /// which keeps its time index in step.
    pub next_probe_time: u64,
    /// Failed probes since the last success
    pub query_failed: u32,
    /// Seconds between successful probes
    pub query_interval: u64,
    /// Seconds between retries after a failed probe
    pub retry_time: u64,
    /// All keys were revoked; the point is being torn down
    pub revoked: bool,
    /// File this point is persisted to
    pub file: Option<PathBuf>,
}

impl TrustPoint {
    /// An empty trust point.
    #[must_use]
    pub const fn new(id: AnchorId) -> Self {
        Self {
            id,
            keys: Vec::new(),
            trusted_ds: None,
            trusted_dnskey: None,
            last_queried: 0,
            last_success: 0,
            next_probe_time: 0,
            query_failed: 0,
            query_interval: 0,
            retry_time: 0,
            revoked: false,
            file: None,
        }
    }

    /// Index of the key matching `data`, ignoring the revoke bit.
    #[must_use]
    pub fn find_key(&self, data: &KeyData) -> Option<usize> {
        self.keys
            .iter()
            .position(|k| k.rr.data.same_key_ignoring_revoke(data))
    }

    /// Rebuild the trusted DS and DNSKEY sets from keys in VALID or MISSING.
    pub fn assemble(&mut self) {
        let collect = |key_type: KeyType| {
            let set: Vec<KeyRr> = self
                .keys
                .iter()
                .filter(|k| k.state().is_trusted() && k.rr.key_type() == key_type)
                .map(|k| k.rr.clone())
                .collect();
            (!set.is_empty()).then_some(set)
        };
        let ds = collect(KeyType::Ds);
        let dnskey = collect(KeyType::Dnskey);
        self.trusted_ds = ds;
        self.trusted_dnskey = dnskey;
    }

    /// Trusted DS seed records, if any.
    #[must_use]
    pub fn trusted_ds(&self) -> Option<&[KeyRr]> {
        self.trusted_ds.as_deref()
    }

    /// Trusted DNSKEY records, if any.
    #[must_use]
    pub fn trusted_dnskey(&self) -> Option<&[KeyRr]> {
        self.trusted_dnskey.as_deref()
    }

    /// Whether the assembled material can still validate anything.
    #[must_use]
    pub const fn has_trust_material(&self) -> bool {
        self.trusted_ds.is_some() || self.trusted_dnskey.is_some()
    }

    /// Number of key-signing keys in VALID.
    #[must_use]
    pub fn valid_ksk_count(&self) -> usize {
        self.keys
            .iter()
            .filter(|k| k.is_ksk() && k.state() == KeyState::Valid)
            .count()
    }

    /// Drop START and REMOVED records. Returns how many were dropped.
    pub fn remove_inert_keys(&mut self) -> usize {
        let before = self.keys.len();
        self.keys.retain(|k| !k.state().is_inert());
        before - self.keys.len()
    }

    /// Snapshot for status listings.
    #[must_use]
    pub fn summary(&self) -> AnchorSummary {
        AnchorSummary {
            zone: self.id.name.to_string(),
            class: self.id.class,
            revoked: self.revoked,
            last_queried: self.last_queried,
            last_success: self.last_success,
            next_probe_time: self.next_probe_time,
            query_failed: self.query_failed,
            query_interval: self.query_interval,
            retry_time: self.retry_time,
            keys: self
                .keys
                .iter()
                .map(|k| KeySummary {
                    record_type: k.rr.key_type().mnemonic(),
                    key_tag: k.key_tag(),
                    ksk: k.is_ksk(),
                    state: k.state(),
                    pending_count: k.pending_count(),
                    last_change: k.last_change(),
                })
                .collect(),
        }
    }
}

/// Status of one trust point.
#[derive(Debug, Clone, Serialize)]
pub struct AnchorSummary {
    /// Zone name
    pub zone: String,
    /// Numeric class
    pub class: u16,
    /// Torn down after all keys were revoked
    pub revoked: bool,
    /// Last probe attempt
    pub last_queried: u64,
    /// Last verified probe
    pub last_success: u64,
    /// Next probe due
    pub next_probe_time: u64,
    /// Failures since the last success
    pub query_failed: u32,
    /// Probe interval after success
    pub query_interval: u64,
    /// Probe interval after failure
    pub retry_time: u64,
    /// Tracked keys
    pub keys: Vec<KeySummary>,
}

/// Status of one tracked key.
#[derive(Debug, Clone, Serialize)]
pub struct KeySummary {
    /// `DNSKEY` or `DS`
    pub record_type: &'static str,
    /// Key tag
    pub key_tag: u16,
    /// Has the SEP flag
    pub ksk: bool,
    /// Rollover state
    pub state: KeyState,
    /// Pending probe count
    pub pending_count: u8,
    /// Last state change
    pub last_change: u64,
}
