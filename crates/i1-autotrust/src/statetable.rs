//! Key rollover state table.
//!
//! ```text
//!            fetched               holddown + count
//!   START ------------> ADDPEND -------------------> VALID <---------+
//!     ^                    |                          |   |           |
//!     +----- missing ------+                  missing |   | revoked   | fetched
//!                                                     v   v           |
//!                                                 MISSING --------------+
//!                                                     | revoked
//!                                                     v
//!                           REMOVED <-- del holddown -- REVOKED
//! ```
//!
//! Only key-signing keys go through the table. Every transition stamps the
//! key's `last_change` with the probe time.

use i1_anchor::{KeyRecord, KeyState, TrustPoint};
use tracing::{debug, info, warn};

use crate::config::HolddownPolicy;

/// Seconds by which `holddown` has been exceeded since `last_change`.
///
/// Zero means the hold-down has not elapsed; reaching it exactly is not
/// enough. A clock that reads earlier than `last_change` counts as no time
/// elapsed.
#[must_use]
pub fn holddown_exceeded(last_change: u64, holddown: u64, now: u64) -> u64 {
    if now < last_change {
        warn!(
            last_change,
            now, "clock is behind a key's last change time, treating as no time elapsed"
        );
        return 0;
    }
    (now - last_change).saturating_sub(holddown)
}

fn transition(key: &mut KeyRecord, to: KeyState, now: u64) {
    info!(
        key_tag = key.key_tag(),
        from = %key.state(),
        to = %to,
        "trust anchor key state changed"
    );
    key.set_state(to, now);
}

/// Revoke a VALID or MISSING key and set the revoke bit on the stored copy.
///
/// Returns whether the key changed.
pub fn revoke(key: &mut KeyRecord, now: u64) -> bool {
    if !matches!(key.state(), KeyState::Valid | KeyState::Missing) {
        return false;
    }
    let old_tag = key.key_tag();
    key.rr.data.set_revoked(true);
    transition(key, KeyState::Revoked, now);
    if key.key_tag() != old_tag {
        debug!(old_tag, new_tag = key.key_tag(), "key tag changed by revoke bit");
    }
    true
}

/// ADDPEND keys past the add hold-down with enough sightings become VALID.
fn add_holddown_elapsed(key: &KeyRecord, policy: &HolddownPolicy, now: u64) -> bool {
    key.pending_count() >= policy.min_pending_count
        && holddown_exceeded(key.last_change(), policy.add_holddown_secs, now) > 0
}

fn del_holddown_elapsed(key: &KeyRecord, policy: &HolddownPolicy, now: u64) -> bool {
    holddown_exceeded(key.last_change(), policy.del_holddown_secs, now) > 0
}

/// Run one probe's worth of the state table over a key.
///
/// Uses the key's `fetched` and `revoked` observations. Returns whether the
/// state or `last_change` changed.
pub fn step_key(key: &mut KeyRecord, policy: &HolddownPolicy, now: u64) -> bool {
    let before = (key.state(), key.last_change());

    match key.state() {
        KeyState::Start => {
            if key.fetched {
                transition(key, KeyState::AddPend, now);
            }
        }
        KeyState::AddPend => {
            if !key.fetched {
                transition(key, KeyState::Start, now);
            } else if add_holddown_elapsed(key, policy, now) {
                transition(key, KeyState::Valid, now);
            }
        }
        KeyState::Valid => {
            if key.revoked {
                revoke(key, now);
            } else if !key.fetched {
                transition(key, KeyState::Missing, now);
            } else if key.last_change() == 0 {
                // Configured anchor seen for the first time
                key.stamp(now);
            }
        }
        KeyState::Missing => {
            if key.revoked {
                revoke(key, now);
            } else if key.fetched {
                transition(key, KeyState::Valid, now);
            }
        }
        KeyState::Revoked => {
            if key.fetched {
                key.stamp(now);
            } else if del_holddown_elapsed(key, policy, now) {
                transition(key, KeyState::Removed, now);
            }
        }
        KeyState::Removed => {}
    }

    (key.state(), key.last_change()) != before
}

/// Transitions that need only the passage of time: ADDPEND to VALID and
/// REVOKED to REMOVED. Applied on every probe, even a failed one.
pub fn apply_timeouts(tp: &mut TrustPoint, policy: &HolddownPolicy, now: u64) -> bool {
    let mut changed = false;
    for key in tp.keys.iter_mut().filter(|k| k.is_ksk()) {
        match key.state() {
            KeyState::AddPend if add_holddown_elapsed(key, policy, now) => {
                transition(key, KeyState::Valid, now);
                changed = true;
            }
            KeyState::Revoked if del_holddown_elapsed(key, policy, now) => {
                transition(key, KeyState::Removed, now);
                changed = true;
            }
            _ => {}
        }
    }
    changed
}

/// Drop keys that no longer contribute once a key-signing key is trusted.
///
/// With at least one VALID key-signing key, every other kind of key (DS
/// seeds and zone-signing keys) is removed, and MISSING key-signing keys
/// are removed after the keep-missing hold-down. Nothing is removed while
/// no key-signing key is VALID.
pub fn forget_keys(tp: &mut TrustPoint, policy: &HolddownPolicy, now: u64) -> bool {
    if tp.valid_ksk_count() == 0 {
        return false;
    }

    let mut changed = false;
    for key in &mut tp.keys {
        if !key.is_ksk() {
            if !key.state().is_inert() {
                debug!(key_tag = key.key_tag(), "removing key made redundant by a valid KSK");
                key.set_state(KeyState::Removed, now);
                changed = true;
            }
        } else if key.state() == KeyState::Missing
            && policy.keep_missing_secs != 0
            && holddown_exceeded(key.last_change(), policy.keep_missing_secs, now) > 0
        {
            transition(key, KeyState::Removed, now);
            changed = true;
        }
    }
    changed
}

/// Promote ADDPEND key-signing keys when trust comes from a configured
/// zone-signing key.
///
/// Applies only while no key-signing key is VALID and some non-KSK DNSKEY
/// is VALID with no `last_change`, i.e. was configured rather than learned.
pub fn bootstrap_from_configured(tp: &mut TrustPoint, now: u64) -> bool {
    if tp.valid_ksk_count() > 0 {
        return false;
    }
    let seeded = tp.keys.iter().any(|k| {
        k.is_dnskey() && !k.is_ksk() && k.state() == KeyState::Valid && k.last_change() == 0
    });
    if !seeded {
        return false;
    }

    let mut changed = false;
    for key in tp
        .keys
        .iter_mut()
        .filter(|k| k.is_ksk() && k.state() == KeyState::AddPend)
    {
        info!(key_tag = key.key_tag(), "promoting KSK trusted through configured ZSK");
        transition(key, KeyState::Valid, now);
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::rr::Name;
    use i1_anchor::{AnchorId, KeyRr};

    const DAY: u64 = 86_400;
    const NOW: u64 = 1_700_000_000;

    fn zone() -> Name {
        Name::from_ascii("example.com.").unwrap()
    }

    fn ksk(byte: u8) -> KeyRr {
        KeyRr::dnskey(zone(), 3600, 257, 8, vec![byte; 16])
    }

    fn zsk(byte: u8) -> KeyRr {
        KeyRr::dnskey(zone(), 3600, 256, 8, vec![byte; 16])
    }

    fn policy() -> HolddownPolicy {
        HolddownPolicy::default()
    }

    fn key(state: KeyState, pending: u8, last_change: u64) -> KeyRecord {
        KeyRecord::restore(ksk(1), state, pending, last_change)
    }

    fn point(keys: Vec<KeyRecord>) -> TrustPoint {
        let mut tp = TrustPoint::new(AnchorId::new(zone(), 1));
        tp.keys = keys;
        tp
    }

    #[test]
    fn test_holddown_exceeded() {
        assert_eq!(holddown_exceeded(NOW - 31 * DAY, 30 * DAY, NOW), DAY);
        assert_eq!(holddown_exceeded(NOW - 30 * DAY, 30 * DAY, NOW), 0);
        assert_eq!(holddown_exceeded(NOW - 29 * DAY, 30 * DAY, NOW), 0);
        // Clock went backwards
        assert_eq!(holddown_exceeded(NOW + 10, 0, NOW), 0);
    }

    #[test]
    fn test_start_fetched_becomes_addpend() {
        let mut k = KeyRecord::new(ksk(1));
        k.mark_seen();
        assert!(step_key(&mut k, &policy(), NOW));
        assert_eq!(k.state(), KeyState::AddPend);
        assert_eq!(k.pending_count(), 1);
        assert_eq!(k.last_change(), NOW);
    }

    #[test]
    fn test_start_not_fetched_stays() {
        let mut k = KeyRecord::new(ksk(1));
        assert!(!step_key(&mut k, &policy(), NOW));
        assert_eq!(k.state(), KeyState::Start);
    }

    #[test]
    fn test_addpend_missing_returns_to_start() {
        let mut k = key(KeyState::AddPend, 3, NOW - DAY);
        assert!(step_key(&mut k, &policy(), NOW));
        assert_eq!(k.state(), KeyState::Start);
        assert_eq!(k.pending_count(), 0);
    }

    #[test]
    fn test_addpend_needs_holddown_and_count() {
        // Hold-down elapsed but only one sighting (this one)
        let mut k = key(KeyState::AddPend, 0, NOW - 31 * DAY);
        k.mark_seen();
        assert!(!step_key(&mut k, &policy(), NOW));
        assert_eq!(k.state(), KeyState::AddPend);

        // Enough sightings but hold-down not elapsed
        let mut k = key(KeyState::AddPend, 5, NOW - 10 * DAY);
        k.mark_seen();
        assert!(!step_key(&mut k, &policy(), NOW));
        assert_eq!(k.state(), KeyState::AddPend);

        let mut k = key(KeyState::AddPend, 1, NOW - 31 * DAY);
        k.mark_seen();
        assert!(step_key(&mut k, &policy(), NOW));
        assert_eq!(k.state(), KeyState::Valid);
        assert_eq!(k.pending_count(), 0);
    }

    #[test]
    fn test_valid_transitions() {
        let mut k = key(KeyState::Valid, 0, NOW - DAY);
        assert!(step_key(&mut k, &policy(), NOW));
        assert_eq!(k.state(), KeyState::Missing);

        let mut k = key(KeyState::Valid, 0, NOW - DAY);
        k.mark_seen();
        assert!(!step_key(&mut k, &policy(), NOW));
        assert_eq!(k.state(), KeyState::Valid);
        assert_eq!(k.last_change(), NOW - DAY);

        let mut k = KeyRecord::configured(ksk(1));
        k.mark_seen();
        assert!(step_key(&mut k, &policy(), NOW));
        assert_eq!(k.state(), KeyState::Valid);
        assert_eq!(k.last_change(), NOW);
    }

    #[test]
    fn test_revoked_observation_sets_bit() {
        let mut k = key(KeyState::Valid, 0, NOW - DAY);
        k.mark_seen();
        k.revoked = true;
        assert!(step_key(&mut k, &policy(), NOW));
        assert_eq!(k.state(), KeyState::Revoked);
        assert!(k.rr.data.is_revoked());
    }

    #[test]
    fn test_missing_transitions() {
        let mut k = key(KeyState::Missing, 0, NOW - DAY);
        k.mark_seen();
        assert!(step_key(&mut k, &policy(), NOW));
        assert_eq!(k.state(), KeyState::Valid);

        let mut k = key(KeyState::Missing, 0, NOW - DAY);
        k.revoked = true;
        assert!(step_key(&mut k, &policy(), NOW));
        assert_eq!(k.state(), KeyState::Revoked);
    }

    #[test]
    fn test_revoked_transitions() {
        let mut k = key(KeyState::Revoked, 0, NOW - 40 * DAY);
        k.mark_seen();
        assert!(step_key(&mut k, &policy(), NOW));
        assert_eq!(k.state(), KeyState::Revoked);
        assert_eq!(k.last_change(), NOW);

        let mut k = key(KeyState::Revoked, 0, NOW - 40 * DAY);
        assert!(step_key(&mut k, &policy(), NOW));
        assert_eq!(k.state(), KeyState::Removed);

        let mut k = key(KeyState::Revoked, 0, NOW - 10 * DAY);
        assert!(!step_key(&mut k, &policy(), NOW));
        assert_eq!(k.state(), KeyState::Revoked);
    }

    #[test]
    fn test_revoke_only_trusted_keys() {
        let mut k = key(KeyState::AddPend, 1, NOW);
        assert!(!revoke(&mut k, NOW));
        let mut k = key(KeyState::Missing, 0, NOW - DAY);
        let tag = k.key_tag();
        assert!(revoke(&mut k, NOW));
        assert_ne!(k.key_tag(), tag);
    }

    #[test]
    fn test_apply_timeouts() {
        let mut tp = point(vec![
            key(KeyState::AddPend, 2, NOW - 31 * DAY),
            KeyRecord::restore(ksk(2), KeyState::Revoked, 0, NOW - 31 * DAY),
            KeyRecord::restore(ksk(3), KeyState::Valid, 0, NOW - 31 * DAY),
        ]);
        assert!(apply_timeouts(&mut tp, &policy(), NOW));
        assert_eq!(tp.keys[0].state(), KeyState::Valid);
        assert_eq!(tp.keys[0].pending_count(), 0);
        assert_eq!(tp.keys[1].state(), KeyState::Removed);
        assert_eq!(tp.keys[2].state(), KeyState::Valid);
        assert!(!apply_timeouts(&mut tp, &policy(), NOW));
    }

    #[test]
    fn test_forget_requires_valid_ksk() {
        let mut tp = point(vec![
            KeyRecord::configured(zsk(9)),
            key(KeyState::Missing, 0, NOW - 400 * DAY),
        ]);
        assert!(!forget_keys(&mut tp, &policy(), NOW));
        assert_eq!(tp.keys[1].state(), KeyState::Missing);
    }

    #[test]
    fn test_forget_removes_redundant_keys() {
        let ds = ksk(1).to_ds(2).unwrap();
        let mut tp = point(vec![
            KeyRecord::restore(ksk(1), KeyState::Valid, 0, NOW - DAY),
            KeyRecord::configured(ds),
            KeyRecord::configured(zsk(9)),
            KeyRecord::restore(ksk(2), KeyState::Missing, 0, NOW - 400 * DAY),
            KeyRecord::restore(ksk(3), KeyState::Missing, 0, NOW - 10 * DAY),
        ]);
        assert!(forget_keys(&mut tp, &policy(), NOW));
        let states: Vec<KeyState> = tp.keys.iter().map(KeyRecord::state).collect();
        assert_eq!(
            states,
            vec![
                KeyState::Valid,
                KeyState::Removed,
                KeyState::Removed,
                KeyState::Removed,
                KeyState::Missing,
            ]
        );
    }

    #[test]
    fn test_keep_missing_zero_keeps_forever() {
        let mut tp = point(vec![
            KeyRecord::restore(ksk(1), KeyState::Valid, 0, NOW - DAY),
            KeyRecord::restore(ksk(2), KeyState::Missing, 0, 1),
        ]);
        let policy = HolddownPolicy {
            keep_missing_secs: 0,
            ..HolddownPolicy::default()
        };
        assert!(!forget_keys(&mut tp, &policy, NOW));
        assert_eq!(tp.keys[1].state(), KeyState::Missing);
    }

    #[test]
    fn test_bootstrap_from_configured_zsk() {
        let mut tp = point(vec![
            KeyRecord::configured(zsk(9)),
            key(KeyState::AddPend, 1, NOW),
        ]);
        assert!(bootstrap_from_configured(&mut tp, NOW));
        assert_eq!(tp.keys[1].state(), KeyState::Valid);
        // Already have a valid KSK
        assert!(!bootstrap_from_configured(&mut tp, NOW));
    }

    #[test]
    fn test_bootstrap_ignores_learned_zsk() {
        let mut tp = point(vec![
            KeyRecord::restore(zsk(9), KeyState::Valid, 0, NOW - DAY),
            key(KeyState::AddPend, 1, NOW),
        ]);
        assert!(!bootstrap_from_configured(&mut tp, NOW));
        assert_eq!(tp.keys[1].state(), KeyState::AddPend);
    }
}
