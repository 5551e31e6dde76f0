//! The anchor store: every trust point, by identity and by probe time.
//!
//! Both indices live behind one lock that is held only while an index is
//! changed. Each trust point sits in its own [`AnchorSlot`] with its own
//! lock. Lock order is index first, then point; code holding a point lock
//! releases it before touching the index.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use i1_anchor::{AnchorId, AnchorSummary, TrustPoint};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::AutotrustError;
use crate::persist;
use crate::Result;

/// One trust point and its probe flag.
#[derive(Debug)]
pub struct AnchorSlot {
    id: AnchorId,
    point: Mutex<TrustPoint>,
    file: Mutex<()>,
    in_flight: AtomicBool,
}

impl AnchorSlot {
    fn new(point: TrustPoint) -> Self {
        Self {
            id: point.id.clone(),
            point: Mutex::new(point),
            file: Mutex::new(()),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Identity of the trust point.
    #[must_use]
    pub const fn id(&self) -> &AnchorId {
        &self.id
    }

    /// Lock the trust point.
    ///
    /// Do not hold the guard across an `.await` or while calling into the
    /// store's index.
    pub fn lock(&self) -> MutexGuard<'_, TrustPoint> {
        // A panic mid-probe leaves state the next probe rewrites anyway.
        self.point.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the trust point unless someone else holds it.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, TrustPoint>> {
        match self.point.try_lock() {
            Ok(point) => Some(point),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Save the point after releasing its lock.
    ///
    /// Writes are serialized per point. A snapshot taken before the point
    /// was revoked is dropped so it cannot replace the REVOKED file.
    pub(crate) fn save(&self, point: MutexGuard<'_, TrustPoint>) {
        let snapshot = point.clone();
        drop(point);

        let _file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if !snapshot.revoked && self.lock().revoked {
            debug!(zone = %self.id, "trust point revoked meanwhile, not saving");
            return;
        }
        if let Err(e) = persist::save(&snapshot) {
            warn!(zone = %self.id, error = %e, "could not save trust anchor");
        }
    }

    /// Whether a probe of this point is outstanding.
    #[must_use]
    pub fn is_probing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }
}

/// Exclusive right to probe one trust point.
///
/// At most one ticket exists per point; dropping it lets the point be
/// probed again.
#[derive(Debug)]
pub struct ProbeTicket {
    slot: Arc<AnchorSlot>,
}

impl ProbeTicket {
    fn acquire(slot: &Arc<AnchorSlot>) -> Option<Self> {
        slot.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self {
            slot: Arc::clone(slot),
        })
    }

    /// The point being probed.
    #[must_use]
    pub const fn slot(&self) -> &Arc<AnchorSlot> {
        &self.slot
    }
}

impl Drop for ProbeTicket {
    fn drop(&mut self) {
        self.slot.in_flight.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default)]
pub(crate) struct Indices {
    by_id: HashMap<AnchorId, Arc<AnchorSlot>>,
    by_time: BTreeSet<(u64, AnchorId)>,
}

impl Indices {
    /// The slot registered for `slot`'s identity, if it is that very slot.
    fn holds(&self, slot: &AnchorSlot) -> bool {
        self.by_id
            .get(&slot.id)
            .is_some_and(|s| std::ptr::eq(s.as_ref(), slot))
    }

    pub(crate) fn slot(&self, id: &AnchorId) -> Option<&Arc<AnchorSlot>> {
        self.by_id.get(id)
    }

    pub(crate) fn earliest(&self) -> Option<u64> {
        self.by_time.first().map(|(t, _)| *t)
    }

    /// Identities due at or before `now`, earliest first.
    pub(crate) fn due(&self, now: u64) -> Vec<AnchorId> {
        self.by_time
            .iter()
            .take_while(|(t, _)| *t <= now)
            .map(|(_, id)| id.clone())
            .collect()
    }

    /// Move a point in the time index. The point must be locked by the caller.
    pub(crate) fn set_next_probe(&mut self, tp: &mut TrustPoint, at: u64) {
        self.by_time.remove(&(tp.next_probe_time, tp.id.clone()));
        tp.next_probe_time = at;
        self.by_time.insert((at, tp.id.clone()));
    }
}

/// All trust points of a resolver.
#[derive(Debug)]
pub struct AnchorStore {
    index: Mutex<Indices>,
    wake: watch::Sender<Option<u64>>,
}

impl Default for AnchorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AnchorStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        let (wake, _) = watch::channel(None);
        Self {
            index: Mutex::new(Indices::default()),
            wake,
        }
    }

    pub(crate) fn lock_index(&self) -> MutexGuard<'_, Indices> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the earliest probe time if it changed.
    pub(crate) fn notify(&self, earliest: Option<u64>) {
        self.wake.send_if_modified(|current| {
            if *current == earliest {
                false
            } else {
                *current = earliest;
                true
            }
        });
    }

    /// Watch the earliest probe time across all trust points.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<u64>> {
        self.wake.subscribe()
    }

    /// Add a trust point.
    pub fn insert(&self, point: TrustPoint) -> Result<Arc<AnchorSlot>> {
        if point.revoked {
            return Err(AutotrustError::Config(format!(
                "trust point {} is revoked",
                point.id
            )));
        }
        let mut index = self.lock_index();
        if index.by_id.contains_key(&point.id) {
            return Err(AutotrustError::DuplicateAnchor(point.id.to_string()));
        }
        index.by_time.insert((point.next_probe_time, point.id.clone()));
        let slot = Arc::new(AnchorSlot::new(point));
        index.by_id.insert(slot.id.clone(), Arc::clone(&slot));
        let earliest = index.earliest();
        drop(index);

        self.notify(earliest);
        debug!(zone = %slot.id, "trust point added");
        Ok(slot)
    }

    /// Load a trust anchor file and add its trust point.
    ///
    /// A file marked REVOKED loads but is not added; `Ok(None)` is returned.
    pub fn load_file(&self, path: &Path) -> Result<Option<Arc<AnchorSlot>>> {
        let point = persist::load(path)?;
        if point.revoked {
            warn!(
                zone = %point.id,
                path = %path.display(),
                "trust anchor was revoked, not using it; replace the file to re-enable"
            );
            return Ok(None);
        }
        let slot = self.insert(point)?;
        info!(zone = %slot.id, path = %path.display(), "loaded trust anchor");
        Ok(Some(slot))
    }

    /// Load several files, skipping those that fail. Returns how many
    /// trust points were added.
    pub fn load_files<P: AsRef<Path>>(&self, paths: &[P]) -> usize {
        let mut added = 0;
        for path in paths {
            match self.load_file(path.as_ref()) {
                Ok(Some(_)) => added += 1,
                Ok(None) => {}
                Err(e) => warn!(error = %e, "skipping trust anchor file"),
            }
        }
        added
    }

    /// Look up a trust point.
    #[must_use]
    pub fn get(&self, id: &AnchorId) -> Option<Arc<AnchorSlot>> {
        self.lock_index().slot(id).cloned()
    }

    /// Number of trust points.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_index().by_id.len()
    }

    /// Whether the store has no trust points.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identities of all trust points, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<AnchorId> {
        let mut ids: Vec<AnchorId> = self.lock_index().by_id.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Status of every trust point, sorted by identity.
    #[must_use]
    pub fn summaries(&self) -> Vec<AnchorSummary> {
        let mut slots: Vec<Arc<AnchorSlot>> = self.lock_index().by_id.values().cloned().collect();
        slots.sort_by(|a, b| a.id.cmp(&b.id));
        slots.iter().map(|s| s.lock().summary()).collect()
    }

    /// Try to start a probe of `id`. `None` if unknown or already probing.
    #[must_use]
    pub fn begin_probe(&self, id: &AnchorId) -> Option<ProbeTicket> {
        let slot = self.get(id)?;
        ProbeTicket::acquire(&slot)
    }

    pub(crate) fn try_ticket(slot: &Arc<AnchorSlot>) -> Option<ProbeTicket> {
        ProbeTicket::acquire(slot)
    }

    /// Lock a trust point that is still live in this store.
    ///
    /// `None` if the point was removed or is being torn down; results
    /// computed for it must then be dropped.
    pub fn relock<'a>(&self, slot: &'a AnchorSlot) -> Option<MutexGuard<'a, TrustPoint>> {
        let index = self.lock_index();
        if !index.holds(slot) {
            return None;
        }
        let point = slot.lock();
        drop(index);
        (!point.revoked).then_some(point)
    }

    /// Set a live point's next probe time, computed from the locked point.
    ///
    /// Returns the point still locked, or `None` if it is no longer live.
    pub fn reschedule<'a>(
        &self,
        slot: &'a AnchorSlot,
        next: impl FnOnce(&TrustPoint) -> u64,
    ) -> Option<MutexGuard<'a, TrustPoint>> {
        let mut index = self.lock_index();
        if !index.holds(slot) {
            return None;
        }
        let mut point = slot.lock();
        if point.revoked {
            return None;
        }
        let at = next(&point);
        index.set_next_probe(&mut point, at);
        let earliest = index.earliest();
        drop(index);

        self.notify(earliest);
        Some(point)
    }

    /// Revoke a trust point and remove it from the store.
    ///
    /// Takes the locked point. The REVOKED file is written first, the point
    /// is then unlinked from both indices, and the file is written once
    /// more with no next probe time. Returns whether this call removed the
    /// point; a second teardown of the same point is a no-op.
    pub fn teardown(&self, slot: &AnchorSlot, mut point: MutexGuard<'_, TrustPoint>) -> bool {
        point.revoked = true;
        slot.save(point);

        let mut index = self.lock_index();
        if !index.holds(slot) {
            return false;
        }
        index.by_id.remove(&slot.id);
        let mut point = slot.lock();
        index
            .by_time
            .remove(&(point.next_probe_time, slot.id.clone()));
        let earliest = index.earliest();
        drop(index);
        self.notify(earliest);

        point.next_probe_time = 0;
        slot.save(point);
        info!(zone = %slot.id, "all keys revoked, trust point removed");
        true
    }

    /// Revoke and remove a trust point by identity.
    pub fn revoke_and_remove(&self, id: &AnchorId) -> bool {
        let Some(slot) = self.get(id) else {
            return false;
        };
        let point = slot.lock();
        self.teardown(&slot, point)
    }
}
