//! One candidate key of a trust point and its rollover bookkeeping.

use super::rr::{KeyRr, KeyType};
use super::state::KeyState;

/// Upper bound for the pending counter; it saturates here.
pub const MAX_PENDING_COUNT: u8 = 250;

/// A key (or DS seed) tracked for one trust point.
///
/// `pending_count` is only meaningful in [`KeyState::AddPend`]; every state
/// change goes through [`KeyRecord::set_state`], which keeps it at zero
/// everywhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    /// The record itself
    pub rr: KeyRr,
    state: KeyState,
    pending_count: u8,
    last_change: u64,
    /// Seen in the key set of the current probe
    pub fetched: bool,
    /// Seen self-signed with the revoke bit in the current probe
    pub revoked: bool,
}

impl KeyRecord {
    /// A newly observed key in [`KeyState::Start`].
    #[must_use]
    pub const fn new(rr: KeyRr) -> Self {
        Self {
            rr,
            state: KeyState::Start,
            pending_count: 0,
            last_change: 0,
            fetched: false,
            revoked: false,
        }
    }

    /// A manually configured anchor: trusted, never changed.
    #[must_use]
    pub const fn configured(rr: KeyRr) -> Self {
        Self {
            rr,
            state: KeyState::Valid,
            pending_count: 0,
            last_change: 0,
            fetched: false,
            revoked: false,
        }
    }

    /// Rebuild a record from persisted fields.
    ///
    /// A pending count on a key outside ADDPEND is dropped.
    #[must_use]
    pub fn restore(rr: KeyRr, state: KeyState, pending_count: u8, last_change: u64) -> Self {
        let pending_count = if state == KeyState::AddPend {
            pending_count.min(MAX_PENDING_COUNT)
        } else {
            0
        };
        Self {
            rr,
            state,
            pending_count,
            last_change,
            fetched: false,
            revoked: false,
        }
    }

    /// Current rollover state.
    #[must_use]
    pub const fn state(&self) -> KeyState {
        self.state
    }

    /// Number of probes that have seen this key while pending.
    #[must_use]
    pub const fn pending_count(&self) -> u8 {
        self.pending_count
    }

    /// Time of the last state change (0 for configured anchors).
    #[must_use]
    pub const fn last_change(&self) -> u64 {
        self.last_change
    }

    /// Move to `state`, stamping the change time.
    pub fn set_state(&mut self, state: KeyState, now: u64) {
        if state != KeyState::AddPend {
            self.pending_count = 0;
        }
        self.state = state;
        self.last_change = now;
    }

    /// Restart the hold-down clock without changing state.
    pub fn stamp(&mut self, now: u64) {
        self.last_change = now;
    }

    /// Clear the per-probe observation flags.
    pub fn clear_observations(&mut self) {
        self.fetched = false;
        self.revoked = false;
    }

    /// Record that the current probe saw this key.
    ///
    /// Only keys on their way into trust accrue pending probes.
    pub fn mark_seen(&mut self) {
        self.fetched = true;
        if matches!(self.state, KeyState::Start | KeyState::AddPend)
            && self.pending_count < MAX_PENDING_COUNT
        {
            self.pending_count += 1;
        }
    }

    /// A DNSKEY with the SEP flag; only these go through the state table.
    #[must_use]
    pub const fn is_ksk(&self) -> bool {
        self.rr.is_ksk()
    }

    /// A DNSKEY row (as opposed to a DS seed).
    #[must_use]
    pub const fn is_dnskey(&self) -> bool {
        matches!(self.rr.key_type(), KeyType::Dnskey)
    }

    /// Key tag for logging.
    #[must_use]
    pub fn key_tag(&self) -> u16 {
        self.rr.key_tag()
    }
}
