//! Probe scheduling.
//!
//! A point handed out by [`AnchorStore::next_due`] is rescheduled at once
//! by its retry time, so a slow probe is not handed out twice. A successful
//! probe moves it out by its query interval instead. Both delays are
//! jittered down to 90% of the nominal value so resolvers started together
//! drift apart.

use std::sync::MutexGuard;

use i1_anchor::TrustPoint;
use rand::Rng;
use tracing::debug;

use crate::config::HolddownPolicy;
use crate::store::{AnchorSlot, AnchorStore, ProbeTicket};

/// Next probe time for a nominal `wait`: uniform in
/// `[now + wait - wait/10, now + wait]`, with `wait` floored by the policy.
#[must_use]
pub fn calc_next_probe(wait: u64, policy: &HolddownPolicy, now: u64) -> u64 {
    let wait = wait.max(policy.min_probe_wait());
    let spread = wait / 10;
    let jitter = rand::thread_rng().gen_range(0..=spread);
    now.saturating_add(wait - spread + jitter)
}

impl AnchorStore {
    /// Take the earliest point due at `now` that is not already being
    /// probed.
    ///
    /// Every due point looked at is moved out by its retry time, including
    /// ones skipped because a probe is still outstanding. A point whose lock
    /// is held elsewhere is passed over without waiting for it.
    pub fn next_due(&self, now: u64, policy: &HolddownPolicy) -> Option<ProbeTicket> {
        let mut index = self.lock_index();
        let mut found = None;

        for id in index.due(now) {
            let Some(slot) = index.slot(&id).cloned() else {
                continue;
            };
            let Some(mut point) = slot.try_lock() else {
                debug!(zone = %id, "trust point busy, looking again later");
                continue;
            };
            let at = calc_next_probe(point.retry_time, policy, now);
            index.set_next_probe(&mut point, at);
            drop(point);

            if let Some(ticket) = Self::try_ticket(&slot) {
                found = Some(ticket);
                break;
            }
            debug!(zone = %id, "probe still in flight, not starting another");
        }

        let earliest = index.earliest();
        drop(index);
        self.notify(earliest);
        found
    }

    /// Reschedule a probed point by its query interval.
    ///
    /// Returns the point still locked, or `None` if it was torn down.
    pub fn schedule_success<'a>(
        &self,
        slot: &'a AnchorSlot,
        now: u64,
        policy: &HolddownPolicy,
    ) -> Option<MutexGuard<'a, TrustPoint>> {
        self.reschedule(slot, |tp| calc_next_probe(tp.query_interval, policy, now))
    }

    /// Seconds until the earliest point is due; `None` for an empty store.
    #[must_use]
    pub fn wait_time(&self, now: u64) -> Option<u64> {
        self.lock_index()
            .earliest()
            .map(|t| t.saturating_sub(now))
    }
}
