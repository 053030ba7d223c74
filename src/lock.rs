//! C3: the lock table set. Three disjoint lists -- pending requests, locks
//! granted to peers, and locks we own -- each entry timer-armed (spec.md
//! §4.3). `LockKind` is a closed, tagged sum type standing in for the
//! original's `type`-discriminated union (REDESIGN FLAG, spec.md §9:
//! "tagged variants for lockable resources").

use std::collections::HashMap;
use std::mem::{discriminant, Discriminant};
use std::time::{Duration, Instant};

use crate::mac::MacAddress;
use crate::wire::StpBeacon;

/// How long a pending subgraph-join invitation survives before it is
/// considered failed (spec.md §4.5.1: "deliberately cheap-to-fail").
pub const PENDING_JOIN_REQUEST_TIMEOUT: Duration = Duration::from_millis(500);
/// Generic lock-protocol round-trip timeout.
pub const LOCK_ROUND_TRIP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockKind {
  /// Subgraph-join invitation (spec.md §4.5.1).
  StpAddReq,
  /// Local-swap: lock on the arc to the weak peer being dropped. `other`
  /// names the stronger candidate that will replace it.
  LockReqOld { other: MacAddress },
  /// Local-swap: lock on the arc to the stronger candidate peer.
  LockReqNew { other: MacAddress },
  /// Tracks an outstanding beacon ack from a neighbor (spec.md §4.6).
  StpBeaconAck { beacon: StpBeacon },
  /// Broadcast-suppression filter held on behalf of `client` (spec.md §4.7).
  AdHocBcastBlock { client: MacAddress },
  /// Sketch-only parameter-change protocol stages (spec.md §1, §4.10):
  /// they participate in lock accounting so tree mutation cannot interleave
  /// with a parameter change, but no handler drives them to completion.
  ParmChangeStart,
  ParmChangeReady,
  ParmChangeGo,
}

impl LockKind {
  /// Whether holding/awaiting this kind counts toward `doing_stp_update`
  /// (spec.md §4.5.3): every kind that mutates C4.
  pub fn is_tree_update(&self) -> bool {
    matches!(self, LockKind::StpAddReq | LockKind::LockReqOld { .. } | LockKind::LockReqNew { .. })
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LockRecord {
  pub kind: LockKind,
  pub peer: MacAddress,
  pub deadline: Instant,
}

type LockKey = (MacAddress, Discriminant<LockKind>);

fn key(peer: MacAddress, kind: &LockKind) -> LockKey {
  (peer, discriminant(kind))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
  /// spec.md §8 invariant 1: a peer may appear in at most one of
  /// {pending, granted, owned} for a given lock kind at any instant.
  AlreadyTracked,
}

#[derive(Debug, Default)]
pub struct LockTable {
  pending: HashMap<LockKey, LockRecord>,
  granted: HashMap<LockKey, LockRecord>,
  owned: HashMap<LockKey, LockRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockList {
  Pending,
  Granted,
  Owned,
}

impl LockTable {
  pub fn new() -> Self {
    LockTable::default()
  }

  fn already_tracked(&self, peer: MacAddress, kind: &LockKind) -> bool {
    let k = key(peer, kind);
    self.pending.contains_key(&k) || self.granted.contains_key(&k) || self.owned.contains_key(&k)
  }

  pub fn add_pending(&mut self, peer: MacAddress, kind: LockKind, deadline: Instant) -> Result<(), LockError> {
    if self.already_tracked(peer, &kind) {
      return Err(LockError::AlreadyTracked);
    }
    self.pending.insert(key(peer, &kind), LockRecord { kind, peer, deadline });
    Ok(())
  }

  /// As grantor: record that we have extended a lock to `peer`.
  pub fn add_granted(&mut self, peer: MacAddress, kind: LockKind, deadline: Instant) -> Result<(), LockError> {
    if self.already_tracked(peer, &kind) {
      return Err(LockError::AlreadyTracked);
    }
    self.granted.insert(key(peer, &kind), LockRecord { kind, peer, deadline });
    Ok(())
  }

  /// On receiving GRANT: move the matching pending request to owned.
  pub fn accept_grant(&mut self, peer: MacAddress, kind: &LockKind, deadline: Instant) -> Option<LockRecord> {
    let k = key(peer, kind);
    let record = self.pending.remove(&k)?;
    self.owned.insert(k, LockRecord { deadline, ..record.clone() });
    Some(record)
  }

  /// On receiving RELEASE: drop the matching granted record.
  pub fn release_granted(&mut self, peer: MacAddress, kind: &LockKind) -> Option<LockRecord> {
    self.granted.remove(&key(peer, kind))
  }

  /// After sending RELEASE ourselves: drop the matching owned record.
  pub fn release_owned(&mut self, peer: MacAddress, kind: &LockKind) -> Option<LockRecord> {
    self.owned.remove(&key(peer, kind))
  }

  pub fn remove_pending(&mut self, peer: MacAddress, kind: &LockKind) -> Option<LockRecord> {
    self.pending.remove(&key(peer, kind))
  }

  pub fn find(&self, list: LockList, peer: MacAddress, kind: &LockKind) -> Option<&LockRecord> {
    let table = match list {
      LockList::Pending => &self.pending,
      LockList::Granted => &self.granted,
      LockList::Owned => &self.owned,
    };
    table.get(&key(peer, kind))
  }

  /// Finds and removes the sole pending record for `peer` whose kind
  /// satisfies `pred`, without the caller needing to reconstruct the exact
  /// payload to compute the lookup key (useful when a reply message, e.g.
  /// `LOCAL-LOCK-GRANT`, names the peer but not which tree-mutation kind was
  /// outstanding for it).
  pub fn take_pending_matching(&mut self, peer: MacAddress, pred: impl Fn(&LockKind) -> bool) -> Option<LockRecord> {
    let found_key = self.pending.iter().find(|(k, r)| k.0 == peer && pred(&r.kind)).map(|(k, _)| *k)?;
    self.pending.remove(&found_key)
  }

  /// As [`Self::take_pending_matching`], but for the granted list (used when
  /// a release message names only the peer, e.g. broadcast-suppression
  /// unblock or a generic `LOCAL-LOCK-RELEASE`).
  pub fn take_granted_matching(&mut self, peer: MacAddress, pred: impl Fn(&LockKind) -> bool) -> Option<LockRecord> {
    let found_key = self.granted.iter().find(|(k, r)| k.0 == peer && pred(&r.kind)).map(|(k, _)| *k)?;
    self.granted.remove(&found_key)
  }

  /// Moves the pending record for `peer` matching `pred` into owned,
  /// returning the record as it now sits in `owned` (with its original
  /// payload preserved, so callers can recover e.g. the paired peer stashed
  /// in `LockReqOld { other }` / `LockReqNew { other }`).
  pub fn accept_grant_matching(&mut self, peer: MacAddress, pred: impl Fn(&LockKind) -> bool, deadline: Instant) -> Option<LockRecord> {
    let record = self.take_pending_matching(peer, pred)?;
    let k = key(peer, &record.kind);
    let owned = LockRecord { deadline, ..record.clone() };
    self.owned.insert(k, owned.clone());
    Some(owned)
  }

  pub fn owned_iter(&self) -> impl Iterator<Item = &LockRecord> {
    self.owned.values()
  }

  pub fn granted_iter(&self) -> impl Iterator<Item = &LockRecord> {
    self.granted.values()
  }

  pub fn pending_iter(&self) -> impl Iterator<Item = &LockRecord> {
    self.pending.values()
  }

  /// spec.md §4.5.3: true iff any lock is owned, any lock is granted, or
  /// any pending request is of a tree-update kind.
  pub fn doing_stp_update(&self) -> bool {
    !self.owned.is_empty()
      || !self.granted.is_empty()
      || self.pending.values().any(|r| r.kind.is_tree_update())
  }

  /// Release every owned/granted/tree-update-pending lock, as
  /// `clear_stp_update_state()` does on deny/refuse/timeout
  /// (spec.md §4.5.2 step 5). Returns the peers that held an owned lock,
  /// so the caller can send them an explicit release message.
  pub fn clear_stp_update_state(&mut self) -> Vec<LockRecord> {
    let released: Vec<LockRecord> = self.owned.values().cloned().collect();
    self.owned.clear();
    self.granted.retain(|_, r| !r.kind.is_tree_update());
    self.pending.retain(|_, r| !r.kind.is_tree_update());
    released
  }

  /// Sweep every list for expired deadlines, removing them and returning
  /// the records so the caller can run the kind-specific post-timeout hook
  /// (spec.md §4.3: "notify the web UI ... retry sends ... otherwise just
  /// drop").
  pub fn expire(&mut self, now: Instant) -> Vec<(LockList, LockRecord)> {
    let mut expired = Vec::new();
    for (list, table) in [
      (LockList::Pending, &mut self.pending),
      (LockList::Granted, &mut self.granted),
      (LockList::Owned, &mut self.owned),
    ] {
      let dead: Vec<LockKey> = table.iter().filter(|(_, r)| now >= r.deadline).map(|(k, _)| *k).collect();
      for k in dead {
        if let Some(record) = table.remove(&k) {
          expired.push((list, record));
        }
      }
    }
    expired
  }

  /// The next deadline across all three lists, feeding C9's scheduler.
  pub fn next_deadline(&self) -> Option<Instant> {
    self
      .pending
      .values()
      .chain(self.granted.values())
      .chain(self.owned.values())
      .map(|r| r.deadline)
      .min()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn soon() -> Instant {
    Instant::now() + Duration::from_secs(1)
  }

  #[test]
  fn peer_cannot_be_tracked_twice_for_the_same_kind() {
    let mut table = LockTable::new();
    let peer = MacAddress([1; 6]);
    table.add_pending(peer, LockKind::StpAddReq, soon()).unwrap();
    assert_eq!(table.add_pending(peer, LockKind::StpAddReq, soon()), Err(LockError::AlreadyTracked));
  }

  #[test]
  fn grant_moves_pending_to_owned() {
    let mut table = LockTable::new();
    let peer = MacAddress([1; 6]);
    table.add_pending(peer, LockKind::StpAddReq, soon()).unwrap();
    assert!(table.accept_grant(peer, &LockKind::StpAddReq, soon()).is_some());
    assert!(table.find(LockList::Pending, peer, &LockKind::StpAddReq).is_none());
    assert!(table.find(LockList::Owned, peer, &LockKind::StpAddReq).is_some());
  }

  #[test]
  fn doing_stp_update_reflects_tree_update_locks_only() {
    let mut table = LockTable::new();
    let peer = MacAddress([1; 6]);
    assert!(!table.doing_stp_update());
    table.add_pending(peer, LockKind::AdHocBcastBlock { client: peer }, soon()).unwrap();
    assert!(!table.doing_stp_update());
    table.add_pending(MacAddress([2; 6]), LockKind::StpAddReq, soon()).unwrap();
    assert!(table.doing_stp_update());
  }

  #[test]
  fn clear_stp_update_state_releases_owned_and_prunes_tree_kinds_only() {
    let mut table = LockTable::new();
    let old = MacAddress([1; 6]);
    let new = MacAddress([2; 6]);
    let bcast_peer = MacAddress([3; 6]);
    table.add_pending(old, LockKind::LockReqOld { other: new }, soon()).unwrap();
    table.accept_grant(old, &LockKind::LockReqOld { other: new }, soon());
    table.add_granted(bcast_peer, LockKind::AdHocBcastBlock { client: bcast_peer }, soon()).unwrap();

    let released = table.clear_stp_update_state();
    assert_eq!(released.len(), 1);
    assert!(table.owned_iter().next().is_none());
    assert!(table.find(LockList::Granted, bcast_peer, &LockKind::AdHocBcastBlock { client: bcast_peer }).is_some());
  }

  #[test]
  fn accept_grant_matching_preserves_the_paired_peer() {
    let mut table = LockTable::new();
    let old = MacAddress([1; 6]);
    let new = MacAddress([2; 6]);
    table.add_pending(old, LockKind::LockReqOld { other: new }, soon()).unwrap();
    let owned = table.accept_grant_matching(old, |k| matches!(k, LockKind::LockReqOld { .. }), soon()).unwrap();
    assert_eq!(owned.kind, LockKind::LockReqOld { other: new });
    assert!(table.find(LockList::Pending, old, &LockKind::LockReqOld { other: new }).is_none());
    assert!(table.find(LockList::Owned, old, &LockKind::LockReqOld { other: new }).is_some());
  }

  #[test]
  fn expire_removes_past_deadlines_from_every_list() {
    let mut table = LockTable::new();
    let peer = MacAddress([1; 6]);
    let past = Instant::now() - Duration::from_secs(1);
    table.add_pending(peer, LockKind::StpAddReq, past).unwrap();
    let expired = table.expire(Instant::now());
    assert_eq!(expired.len(), 1);
    assert!(table.pending_iter().next().is_none());
  }
}
