//! Collaborators supplied by the embedding resolver.
//!
//! Autotrust does not speak DNS or check signatures itself. The resolver
//! fetches DNSKEY sets ([`KeysetFetcher`]), validates them
//! ([`KeysetVerifier`]) and provides the time ([`Clock`]).

use std::fmt;

use async_trait::async_trait;
use hickory_proto::rr::Name;
use i1_anchor::KeyRr;

use crate::error::FetchError;

/// A DNSKEY set as fetched for a trust point.
#[derive(Debug, Clone, Default)]
pub struct Keyset {
    /// DNSKEY records at the zone apex
    pub records: Vec<KeyRr>,
    /// TTL of the set
    pub ttl: u32,
    /// Expiration times of the RRSIGs covering the set
    pub signature_expirations: Vec<u64>,
}

impl Keyset {
    /// Seconds until the earliest signature expires, if any signature was seen.
    #[must_use]
    pub fn expiry_margin(&self, now: u64) -> Option<u64> {
        self.signature_expirations
            .iter()
            .min()
            .map(|exp| exp.saturating_sub(now))
    }
}

/// Result of validating a key set against the trust point's anchors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Chains to a trusted DS or DNSKEY
    Secure,
    /// Unsigned or no usable anchor
    Insecure,
    /// Signatures present but wrong
    Bogus(String),
}

impl Verdict {
    /// Whether the key set may update the trust point.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        matches!(self, Self::Secure)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secure => write!(f, "secure"),
            Self::Insecure => write!(f, "insecure"),
            Self::Bogus(reason) => write!(f, "bogus: {reason}"),
        }
    }
}

/// Fetches DNSKEY sets.
///
/// Implementations enforce their own timeouts; a fetch never waits forever.
#[async_trait]
pub trait KeysetFetcher: Send + Sync {
    /// Fetch the DNSKEY set at `zone` with its covering signatures.
    async fn fetch_keyset(&self, zone: &Name, class: u16) -> Result<Keyset, FetchError>;

    /// Drop any cached DNSKEY set for `zone` so the next fetch goes to the
    /// network.
    fn invalidate(&self, _zone: &Name, _class: u16) {}
}

/// Checks DNSSEC signatures on fetched key sets.
#[async_trait]
pub trait KeysetVerifier: Send + Sync {
    /// Validate `keyset` against the trusted DS and DNSKEY sets.
    async fn verify(
        &self,
        keyset: &Keyset,
        trusted_ds: Option<&[KeyRr]>,
        trusted_dnskey: Option<&[KeyRr]>,
    ) -> Verdict;

    /// Whether `keyset.records[index]` signs the set itself.
    async fn verify_self_signed(&self, keyset: &Keyset, index: usize) -> bool;

    /// Whether keys of this DNSSEC algorithm can be validated.
    fn algorithm_supported(&self, _algorithm: u8) -> bool {
        true
    }
}

/// Source of wall-clock time in unix seconds.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> u64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
    }
}
