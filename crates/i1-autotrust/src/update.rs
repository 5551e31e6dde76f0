//! Probe steps applied to a locked trust point.
//!
//! Each function here runs synchronously under the trust point's lock. The
//! asynchronous parts of a probe (fetching and signature checks) happen
//! between them, driven by [`crate::Autotrust::process_probe`].

use i1_anchor::{KeyRecord, KeyState, TrustPoint};
use tracing::{debug, info};

use crate::config::HolddownPolicy;
use crate::resolver::Keyset;
use crate::statetable;

/// Upper bound on the probe interval after a success.
pub const MAX_QUERY_INTERVAL: u64 = 15 * 86_400;

/// Upper bound on the retry time after a failure.
pub const MAX_RETRY_TIME: u64 = 86_400;

/// Hold-down transitions that need no fresh data.
pub fn apply_holddown_timeouts(tp: &mut TrustPoint, policy: &HolddownPolicy, now: u64) -> bool {
    statetable::apply_timeouts(tp, policy, now)
}

/// Positions in `keyset` of revoked key-signing keys that match a VALID or
/// MISSING key of the trust point. Each must still be checked for a
/// self-signature before it is acted on.
#[must_use]
pub fn revocation_candidates(tp: &TrustPoint, keyset: &Keyset) -> Vec<usize> {
    keyset
        .records
        .iter()
        .enumerate()
        .filter(|(_, rr)| rr.is_ksk() && rr.data.is_revoked())
        .filter(|(_, rr)| {
            tp.find_key(&rr.data)
                .is_some_and(|i| tp.keys[i].state().is_trusted())
        })
        .map(|(i, _)| i)
        .collect()
}

/// Revoke the keys whose revoked, self-signed form was seen in `keyset`.
pub fn apply_self_signed_revocations(
    tp: &mut TrustPoint,
    keyset: &Keyset,
    confirmed: &[usize],
    now: u64,
) -> bool {
    let mut changed = false;
    for rr in confirmed.iter().filter_map(|&i| keyset.records.get(i)) {
        if let Some(i) = tp.find_key(&rr.data) {
            let key = &mut tp.keys[i];
            key.revoked = true;
            if statetable::revoke(key, now) {
                info!(zone = %tp.id, key_tag = rr.key_tag(), "self-signed revocation seen");
                changed = true;
            }
        }
    }
    changed
}

/// Count a key set that did not verify.
///
/// Returns whether the trust point should be saved: only once it has had a
/// successful probe, so a file still bootstrapping from DS records is not
/// rewritten without them.
pub fn record_verification_failure(tp: &mut TrustPoint) -> bool {
    tp.query_failed = tp.query_failed.saturating_add(1);
    tp.last_success != 0
}

/// Probe interval and retry time derived from a key set.
///
/// Both are bounded by the TTL and by the earliest signature expiry, and
/// never below the policy's floor.
#[must_use]
pub fn probe_times(keyset: &Keyset, policy: &HolddownPolicy, now: u64) -> (u64, u64) {
    let floor = policy.min_probe_wait();
    let ttl = u64::from(keyset.ttl);
    let margin = keyset.expiry_margin(now).unwrap_or(u64::MAX);

    let query_interval = MAX_QUERY_INTERVAL.min(ttl / 2).min(margin / 2).max(floor);
    let retry_time = MAX_RETRY_TIME.min(ttl / 10).min(margin / 10).max(floor);
    (query_interval, retry_time)
}

fn set_probe_times(
    tp: &mut TrustPoint,
    keyset: &Keyset,
    policy: &HolddownPolicy,
    now: u64,
) -> bool {
    let (query_interval, retry_time) = probe_times(keyset, policy, now);
    if tp.query_interval == query_interval && tp.retry_time == retry_time {
        return false;
    }
    debug!(zone = %tp.id, query_interval, retry_time, "probe timing changed");
    tp.query_interval = query_interval;
    tp.retry_time = retry_time;
    true
}

/// Mark the key-signing keys of a verified key set as fetched, adding the
/// ones not yet tracked.
///
/// A new key that matches a trusted DS record is VALID at once; any other
/// new key starts in START. Keys carrying the revoke bit are never added.
fn mark_fetched(
    tp: &mut TrustPoint,
    keyset: &Keyset,
    algorithm_supported: &dyn Fn(u8) -> bool,
    now: u64,
) -> bool {
    let mut changed = false;
    for rr in &keyset.records {
        if !rr.is_ksk() || rr.data.is_revoked() {
            continue;
        }
        if !algorithm_supported(rr.data.algorithm()) {
            debug!(
                key_tag = rr.key_tag(),
                algorithm = rr.data.algorithm(),
                "skipping key with unsupported algorithm"
            );
            continue;
        }
        if let Some(i) = tp.find_key(&rr.data) {
            tp.keys[i].mark_seen();
            continue;
        }

        let mut key = KeyRecord::new(rr.clone());
        let ds_match = tp
            .trusted_ds()
            .is_some_and(|ds| ds.iter().any(|d| rr.matches_ds(d)));
        if ds_match {
            info!(
                zone = %tp.id,
                key_tag = rr.key_tag(),
                "new key matches trusted DS, valid at once"
            );
            key.set_state(KeyState::Valid, now);
        } else {
            info!(zone = %tp.id, key_tag = rr.key_tag(), "new key seen");
        }
        key.mark_seen();
        tp.keys.push(key);
        changed = true;
    }
    changed
}

/// Apply a verified key set: mark keys seen, run the state table, forget
/// and bootstrap rules, and drop keys that carry no information.
///
/// Returns whether any key or the probe timing changed.
pub fn apply_keyset(
    tp: &mut TrustPoint,
    keyset: &Keyset,
    policy: &HolddownPolicy,
    algorithm_supported: &dyn Fn(u8) -> bool,
    now: u64,
) -> bool {
    tp.last_success = now;
    tp.query_failed = 0;
    for key in &mut tp.keys {
        key.clear_observations();
    }

    let mut changed = mark_fetched(tp, keyset, algorithm_supported, now);
    changed |= set_probe_times(tp, keyset, policy, now);

    for key in tp.keys.iter_mut().filter(|k| k.is_ksk()) {
        changed |= statetable::step_key(key, policy, now);
    }

    changed |= statetable::forget_keys(tp, policy, now);
    changed |= statetable::bootstrap_from_configured(tp, now);

    let dropped = tp.remove_inert_keys();
    if dropped > 0 {
        debug!(zone = %tp.id, dropped, "dropped inert keys");
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

    fn dnskey(flags: u16, byte: u8) -> KeyRr {
        KeyRr::dnskey(zone(), 86_400, flags, 8, vec![byte; 16])
    }

    fn keyset(records: Vec<KeyRr>) -> Keyset {
        Keyset {
            records,
            ttl: 86_400,
            signature_expirations: vec![NOW + 20 * DAY],
        }
    }

    fn point(keys: Vec<KeyRecord>) -> TrustPoint {
        let mut tp = TrustPoint::new(AnchorId::new(zone(), 1));
        tp.keys = keys;
        tp.assemble();
        tp
    }

    fn all_supported(_: u8) -> bool {
        true
    }

    #[test]
    fn test_probe_times() {
        let policy = HolddownPolicy::default();
        // ttl/2 = 43200, margin/2 = 10 days
        let (qi, rt) = probe_times(&keyset(Vec::new()), &policy, NOW);
        assert_eq!(qi, 43_200);
        assert_eq!(rt, 8_640);

        // Short TTL hits the one-hour floor
        let short = Keyset {
            ttl: 600,
            ..keyset(Vec::new())
        };
        assert_eq!(probe_times(&short, &policy, NOW), (3600, 3600));

        // No signatures, huge TTL: ceilings apply
        let long = Keyset {
            records: Vec::new(),
            ttl: u32::MAX,
            signature_expirations: Vec::new(),
        };
        assert_eq!(
            probe_times(&long, &policy, NOW),
            (MAX_QUERY_INTERVAL, MAX_RETRY_TIME)
        );

        let small = HolddownPolicy {
            permit_small_holddown: true,
            ..HolddownPolicy::default()
        };
        assert_eq!(probe_times(&short, &small, NOW), (300, 60));
    }

    #[test]
    fn test_new_key_enters_addpend() {
        let mut tp = point(vec![KeyRecord::restore(
            dnskey(257, 1),
            KeyState::Valid,
            0,
            NOW - DAY,
        )]);
        let ks = keyset(vec![dnskey(257, 1), dnskey(257, 2)]);
        assert!(apply_keyset(&mut tp, &ks, &HolddownPolicy::default(), &all_supported, NOW));
        assert_eq!(tp.keys.len(), 2);
        assert_eq!(tp.keys[1].state(), KeyState::AddPend);
        assert_eq!(tp.keys[1].pending_count(), 1);
        assert_eq!(tp.last_success, NOW);
        assert_eq!(tp.query_interval, 43_200);
    }

    #[test]
    fn test_new_key_matching_ds_is_valid() {
        let ksk = dnskey(257, 1);
        let mut tp = point(vec![KeyRecord::configured(ksk.to_ds(2).unwrap())]);
        let ks = keyset(vec![ksk.clone(), dnskey(256, 7)]);
        assert!(apply_keyset(&mut tp, &ks, &HolddownPolicy::default(), &all_supported, NOW));

        // DS seed forgotten once the KSK is valid; ZSK never tracked
        assert_eq!(tp.keys.len(), 1);
        assert_eq!(tp.keys[0].rr, ksk);
        assert_eq!(tp.keys[0].state(), KeyState::Valid);
        assert_eq!(tp.keys[0].last_change(), NOW);
    }

    #[test]
    fn test_revoked_and_unsupported_keys_not_added() {
        let mut tp = point(vec![KeyRecord::restore(
            dnskey(257, 1),
            KeyState::Valid,
            0,
            NOW - DAY,
        )]);
        let mut ks = keyset(vec![dnskey(257, 1), dnskey(257 | 0x80, 2)]);
        ks.records.push(KeyRr::dnskey(zone(), 86_400, 257, 200, vec![3; 16]));
        apply_keyset(&mut tp, &ks, &HolddownPolicy::default(), &|alg: u8| alg != 200, NOW);
        assert_eq!(tp.keys.len(), 1);
    }

    #[test]
    fn test_missing_key_is_kept_while_valid_exists() {
        let mut tp = point(vec![
            KeyRecord::restore(dnskey(257, 1), KeyState::Valid, 0, NOW - DAY),
            KeyRecord::restore(dnskey(257, 2), KeyState::Valid, 0, NOW - DAY),
        ]);
        let ks = keyset(vec![dnskey(257, 1)]);
        apply_keyset(&mut tp, &ks, &HolddownPolicy::default(), &all_supported, NOW);
        assert_eq!(tp.keys[1].state(), KeyState::Missing);
    }

    #[test]
    fn test_last_valid_ksk_survives() {
        // Only trusted key goes missing with no replacement KSK published:
        // it stays MISSING past keep-missing and keeps trust
        let mut tp = point(vec![KeyRecord::restore(
            dnskey(257, 1),
            KeyState::Valid,
            0,
            NOW - 500 * DAY,
        )]);
        let ks = keyset(vec![dnskey(256, 2)]);
        apply_keyset(&mut tp, &ks, &HolddownPolicy::default(), &all_supported, NOW);
        apply_keyset(&mut tp, &ks, &HolddownPolicy::default(), &all_supported, NOW + 400 * DAY);
        let old = tp.find_key(&dnskey(257, 1).data).unwrap();
        assert_eq!(tp.keys[old].state(), KeyState::Missing);
        tp.assemble();
        assert!(tp.has_trust_material());
    }

    #[test]
    fn test_zsk_bootstrap() {
        let mut tp = point(vec![KeyRecord::configured(dnskey(256, 9))]);
        let ks = keyset(vec![dnskey(256, 9), dnskey(257, 1)]);
        apply_keyset(&mut tp, &ks, &HolddownPolicy::default(), &all_supported, NOW);
        let ksk = tp.find_key(&dnskey(257, 1).data).unwrap();
        assert_eq!(tp.keys[ksk].state(), KeyState::Valid);

        // Next probe: the configured ZSK is no longer needed
        apply_keyset(&mut tp, &ks, &HolddownPolicy::default(), &all_supported, NOW + DAY);
        assert_eq!(tp.keys.len(), 1);
        assert!(tp.keys[0].is_ksk());
    }

    #[test]
    fn test_revocation_candidates_and_fast_path() {
        let mut tp = point(vec![
            KeyRecord::restore(dnskey(257, 1), KeyState::Valid, 0, NOW - DAY),
            KeyRecord::restore(dnskey(257, 2), KeyState::AddPend, 1, NOW - DAY),
        ]);
        let ks = keyset(vec![
            dnskey(257 | 0x80, 1),
            dnskey(257 | 0x80, 2),
            dnskey(257, 3),
        ]);
        let candidates = revocation_candidates(&tp, &ks);
        assert_eq!(candidates, vec![0]);

        assert!(apply_self_signed_revocations(&mut tp, &ks, &candidates, NOW));
        assert_eq!(tp.keys[0].state(), KeyState::Revoked);
        assert!(tp.keys[0].rr.data.is_revoked());
        assert!(!apply_self_signed_revocations(&mut tp, &ks, &candidates, NOW));
    }

    #[test]
    fn test_verification_failure_persists_after_first_success() {
        let mut tp = point(Vec::new());
        assert!(!record_verification_failure(&mut tp));
        assert_eq!(tp.query_failed, 1);
        tp.last_success = NOW;
        assert!(record_verification_failure(&mut tp));
        assert_eq!(tp.query_failed, 2);
    }
}
