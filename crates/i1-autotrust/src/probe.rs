//! Probe driver.
//!
//! [`Autotrust`] ties the store to the resolver's collaborators: it fetches
//! a trust point's DNSKEY set, has it verified, and applies the result.
//! The point's lock is dropped across every `.await` and re-validated
//! afterwards; a point torn down in the meantime discards the result.

use std::sync::Arc;
use std::time::Duration;

use i1_anchor::{AnchorId, KeyRr};
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};

use crate::config::AutotrustConfig;
use crate::resolver::{Clock, Keyset, KeysetFetcher, KeysetVerifier};
use crate::store::{AnchorSlot, AnchorStore, ProbeTicket};
use crate::update;

/// What a probe did to its trust point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No key changed state
    Unchanged,
    /// Keys or probe timing changed
    Updated,
    /// The key set did not verify; only the failure count moved
    Rejected,
    /// Every key was revoked and the trust point was removed
    PointRemoved,
    /// The trust point was torn down while the probe was in flight
    Discarded,
}

/// RFC 5011 trust anchor maintenance for one resolver.
pub struct Autotrust {
    store: Arc<AnchorStore>,
    fetcher: Arc<dyn KeysetFetcher>,
    verifier: Arc<dyn KeysetVerifier>,
    clock: Arc<dyn Clock>,
    config: AutotrustConfig,
}

impl Autotrust {
    /// Build a driver over an existing store.
    pub fn new(
        store: Arc<AnchorStore>,
        fetcher: Arc<dyn KeysetFetcher>,
        verifier: Arc<dyn KeysetVerifier>,
        clock: Arc<dyn Clock>,
        config: AutotrustConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            verifier,
            clock,
            config,
        }
    }

    /// Build a driver and load the configured anchor files into a new store.
    pub fn from_config(
        config: AutotrustConfig,
        fetcher: Arc<dyn KeysetFetcher>,
        verifier: Arc<dyn KeysetVerifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(AnchorStore::new());
        let loaded = store.load_files(&config.anchor_files);
        info!(
            loaded,
            configured = config.anchor_files.len(),
            "trust anchor files loaded"
        );
        Self::new(store, fetcher, verifier, clock, config)
    }

    /// The trust points under maintenance.
    #[must_use]
    pub const fn store(&self) -> &Arc<AnchorStore> {
        &self.store
    }

    /// Apply one probe's observation to a trust point.
    ///
    /// `observed` is `None` when the key set could not be fetched; only
    /// hold-down timeouts are applied then, and nothing is saved.
    pub async fn process_probe(&self, slot: &AnchorSlot, observed: Option<Keyset>) -> Outcome {
        let policy = &self.config.holddown;
        let now = self.clock.now();

        // Hold-down timeouts, and revoked keys that may be self-signed.
        let (mut changed, candidates, keyset) = {
            let Some(mut tp) = self.store.relock(slot) else {
                return Outcome::Discarded;
            };
            let changed = update::apply_holddown_timeouts(&mut tp, policy, now);
            if changed {
                tp.assemble();
            }
            let Some(keyset) = observed else {
                debug!(zone = %slot.id(), "no key set this probe");
                return if changed {
                    Outcome::Updated
                } else {
                    Outcome::Unchanged
                };
            };
            let candidates = update::revocation_candidates(&tp, &keyset);
            (changed, candidates, keyset)
        };

        let mut confirmed = Vec::new();
        for index in candidates {
            if self.verifier.verify_self_signed(&keyset, index).await {
                confirmed.push(index);
            }
        }

        // Revocations, then a snapshot of the anchors to verify against.
        let (trusted_ds, trusted_dnskey) = {
            let Some(mut tp) = self.store.relock(slot) else {
                return Outcome::Discarded;
            };
            if update::apply_self_signed_revocations(&mut tp, &keyset, &confirmed, now) {
                changed = true;
                tp.assemble();
                if !tp.has_trust_material() {
                    tp.last_success = now;
                    self.store.teardown(slot, tp);
                    return Outcome::PointRemoved;
                }
            }
            (
                tp.trusted_ds().map(<[KeyRr]>::to_vec),
                tp.trusted_dnskey().map(<[KeyRr]>::to_vec),
            )
        };

        let verdict = self
            .verifier
            .verify(&keyset, trusted_ds.as_deref(), trusted_dnskey.as_deref())
            .await;

        let Some(mut tp) = self.store.relock(slot) else {
            return Outcome::Discarded;
        };
        if !verdict.is_secure() {
            warn!(zone = %slot.id(), %verdict, "key set failed verification");
            if update::record_verification_failure(&mut tp) {
                slot.save(tp);
            }
            return Outcome::Rejected;
        }

        let supported = |algorithm: u8| self.verifier.algorithm_supported(algorithm);
        changed |= update::apply_keyset(&mut tp, &keyset, policy, &supported, now);
        drop(tp);

        let Some(mut tp) = self.store.schedule_success(slot, now, policy) else {
            return Outcome::Discarded;
        };
        tp.assemble();
        if !tp.has_trust_material() {
            self.store.teardown(slot, tp);
            return Outcome::PointRemoved;
        }
        debug!(
            zone = %slot.id(),
            next_probe = tp.next_probe_time,
            changed,
            "probe applied"
        );
        slot.save(tp);

        if changed {
            Outcome::Updated
        } else {
            Outcome::Unchanged
        }
    }

    /// Fetch and apply a trust point's key set. The ticket is held until
    /// the result is applied.
    pub async fn probe(&self, ticket: ProbeTicket) -> Outcome {
        let slot = Arc::clone(ticket.slot());
        let id = slot.id().clone();

        match self.store.relock(&slot) {
            Some(mut tp) => tp.last_queried = self.clock.now(),
            None => return Outcome::Discarded,
        }

        self.fetcher.invalidate(&id.name, id.class);
        let observed = match self.fetcher.fetch_keyset(&id.name, id.class).await {
            Ok(keyset) => Some(keyset),
            Err(e) => {
                warn!(zone = %id, error = %e, "key set fetch failed");
                None
            }
        };

        let outcome = self.process_probe(&slot, observed).await;
        drop(ticket);
        outcome
    }

    /// Probe a trust point now. `None` if it is unknown or a probe of it
    /// is already in flight.
    pub async fn probe_now(&self, id: &AnchorId) -> Option<Outcome> {
        let ticket = self.store.begin_probe(id)?;
        Some(self.probe(ticket).await)
    }

    /// Probe trust points as they come due until `shutdown` turns true.
    ///
    /// Each probe runs in its own task.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut wake = self.store.subscribe();
        info!(anchors = self.store.len(), "autotrust probe loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let now = self.clock.now();
            while let Some(ticket) = self.store.next_due(now, &self.config.holddown) {
                let zone = ticket.slot().id().to_string();
                let this = Arc::clone(&self);
                tokio::spawn(
                    async move {
                        let outcome = this.probe(ticket).await;
                        debug!(?outcome, "probe finished");
                    }
                    .instrument(tracing::info_span!("probe", %zone)),
                );
            }

            let wait = self
                .store
                .wait_time(self.clock.now())
                .unwrap_or(self.config.default_probe_wait_secs)
                .max(1);

            tokio::select! {
                () = tokio::time::sleep(Duration::from_secs(wait)) => {}
                changed = wake.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("autotrust probe loop stopped");
    }
}
