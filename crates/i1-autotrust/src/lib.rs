//! i1-autotrust: RFC 5011 automated DNSSEC trust anchor maintenance.
//!
//! Keeps a resolver's trust anchors current across key rollovers without
//! operator intervention. Each trust point is probed periodically; the
//! observed DNSKEY set drives a per-key state machine with hold-down
//! timers, and the result is written back to the trust point's file.
//!
//! # Architecture
//!
//! - [`persist`] - trust anchor file format, atomic save
//! - [`statetable`] - per-key state transitions and forget policy
//! - [`update`] - steps of one probe applied to a locked trust point
//! - [`store`] - [`AnchorStore`]: identity and probe-time indices
//! - [`scheduler`] - which point to probe next, with jitter
//! - [`resolver`] - traits for the DNS fetcher, the DNSSEC verifier and the clock
//! - [`probe`] - [`Autotrust`]: drives probes and the scheduler loop
//!
//! # Locking
//!
//! The store's index lock is held only while an index is mutated. Each
//! trust point has its own lock, released while a key set is fetched or
//! verified and re-validated before results are applied. When both are
//! needed the index lock is taken first.

pub mod config;
pub mod error;
pub mod persist;
pub mod probe;
pub mod resolver;
pub mod scheduler;
pub mod statetable;
pub mod store;
pub mod update;

// Re-exports for convenience.
pub use config::{AutotrustConfig, HolddownPolicy};
pub use error::{AutotrustError, FetchError};
pub use probe::{Autotrust, Outcome};
pub use resolver::{Clock, Keyset, KeysetFetcher, KeysetVerifier, SystemClock, Verdict};
pub use store::{AnchorSlot, AnchorStore, ProbeTicket};

/// Result type for i1-autotrust operations.
pub type Result<T> = std::result::Result<T, AutotrustError>;
