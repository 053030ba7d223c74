//! C5: the tree-mutation protocol engine. Two single-initiator protocols
//! mutate C4 -- subgraph join (spec.md §4.5.1) and local swap (§4.5.2) --
//! both predicated on [`crate::lock::LockTable::doing_stp_update`] being
//! false (§4.5.3). Follows the same shape used throughout this crate:
//! protocol state lives on the shared state record, handlers are plain
//! methods taking the peer and the already-decoded message.

use std::time::Instant;

use crate::lock::{LockKind, LockList, LOCK_ROUND_TRIP_TIMEOUT, PENDING_JOIN_REQUEST_TIMEOUT};
use crate::mac::MacAddress;
use crate::mesh::MeshState;
use crate::status_events::{EdgeRemovedReason, MeshStatusEvent};
use crate::wire::{ControlBody, ControlFrame, LockMessage, MessageType};

/// Tracks the single in-flight local swap this box may be the initiator of.
/// Only one can ever be in flight (spec.md §4.5.3 serializes all tree
/// mutation on `doing_stp_update`), so this is a plain `Option` field rather
/// than a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSwap {
  pub old: MacAddress,
  pub new: MacAddress,
  pub new_confirmed: bool,
  pub old_confirmed: bool,
}

fn lock_message(originator: MacAddress, node_1: MacAddress, node_2: MacAddress) -> ControlBody {
  ControlBody::Lock(LockMessage { originator, node_1, node_2 })
}

impl MeshState {
  /// spec.md §4.5.1 step 1: periodically pick -- with randomization -- a
  /// neighbor we can hear but have no tree edge to and no beacon from, and
  /// invite it to join our partition.
  pub fn check_connectivity(&mut self, now: Instant) {
    if self.locks.doing_stp_update() {
      return;
    }
    let candidates: Vec<MacAddress> = self
      .neighbors
      .iter()
      .map(|n| n.name)
      .filter(|name| !self.links.contains(name) && !self.beacons.contains(name))
      .collect();
    if candidates.is_empty() {
      return;
    }
    let pick = self.rng.discrete_unif(candidates.len() as u32) as usize;
    let target = candidates[pick];

    let frame = ControlFrame::new(target, MessageType::LocalStpAddRequest, lock_message(self.my_name, self.my_name, target));
    self.queue_send(target, frame);
    // Deliberately cheap to fail: expires on the very next timeout pass if
    // the peer never replies.
    let _ = self.locks.add_pending(target, LockKind::StpAddReq, now + PENDING_JOIN_REQUEST_TIMEOUT);
    self.arm_lock_expiry();
  }

  /// We received `STP-ADD-REQ` from `from`. Accept iff we are not currently
  /// engaged in another tree update (spec.md §4.5.1 step 2).
  pub fn handle_stp_add_req(&mut self, from: MacAddress, now: Instant) {
    if self.locks.doing_stp_update() {
      let frame = ControlFrame::new(from, MessageType::LocalStpRefused, ControlBody::Empty);
      self.queue_send(from, frame);
      return;
    }
    let sig = self.neighbors.get_sig_strength(&from);
    let eth = self.neighbors.get(&from).and_then(|n| n.eth_mac);
    self.links.add_stp_link(from, eth, sig, now);
    self.emit(MeshStatusEvent::TreeEdgeAdded { peer: from });
    let frame = ControlFrame::new(from, MessageType::LocalStpAdded, ControlBody::Empty);
    self.queue_send(from, frame);
    self.flood_known_beacons_to(from, now);
  }

  /// We initiated a join and got `STP-ADDED` back (spec.md §4.5.1 step 3).
  pub fn handle_stp_added(&mut self, from: MacAddress, now: Instant) {
    self.locks.remove_pending(from, &LockKind::StpAddReq);
    let sig = self.neighbors.get_sig_strength(&from);
    let eth = self.neighbors.get(&from).and_then(|n| n.eth_mac);
    self.links.add_stp_link(from, eth, sig, now);
    self.emit(MeshStatusEvent::TreeEdgeAdded { peer: from });
    self.flood_known_beacons_to(from, now);
  }

  /// `STP-REFUSED` (spec.md §4.5.1 step 4) or any lock deny during a local
  /// swap: collapse all in-flight tree-update state.
  pub fn handle_stp_refused(&mut self, _from: MacAddress) {
    self.pending_swap = None;
    self.clear_stp_update_state();
  }

  /// spec.md §4.5.2: the initiator-side decision of whether to swap a weak
  /// tree edge for a stronger candidate reached indirectly through it.
  /// Returns `true` if a swap attempt was launched this tick.
  pub fn local_swap_tick(&mut self, now: Instant) -> bool {
    if self.locks.doing_stp_update() || self.pending_swap.is_some() {
      return false;
    }
    let Some((old, new, diff)) = self.best_swap_candidate() else { return false };

    let scale = self.debug.get(crate::config::DebugOption::ScaleTimersByMeshSize);
    let scale20x = self.debug.get(crate::config::DebugOption::ScaleTimersDebug20x);
    if !self.rng.random_eval(diff, self.beacons.len().max(self.links.len()), scale, scale20x) {
      return false;
    }

    let deadline = now + LOCK_ROUND_TRIP_TIMEOUT;
    if self.locks.add_pending(old, LockKind::LockReqOld { other: new }, deadline).is_err() {
      return false;
    }
    if self.locks.add_pending(new, LockKind::LockReqNew { other: old }, deadline).is_err() {
      self.locks.remove_pending(old, &LockKind::LockReqOld { other: new });
      return false;
    }

    let frame_old = ControlFrame::new(old, MessageType::LocalLockReqOld, lock_message(self.my_name, self.my_name, new));
    self.queue_send(old, frame_old);
    let frame_new = ControlFrame::new(new, MessageType::LocalLockReqNew, lock_message(self.my_name, self.my_name, old));
    self.queue_send(new, frame_new);
    self.arm_lock_expiry();
    true
  }

  /// Greatest positive `new.sig - old.sig` among (existing tree edge `old`,
  /// directly-heard candidate `new`) pairs where `new` is currently only
  /// reachable through `old` in our received-beacon view. Ties broken by MAC
  /// ordering, standing in for first-seen ordering once entries are held in
  /// a map (spec.md §4.5.2 tie-break).
  fn best_swap_candidate(&self) -> Option<(MacAddress, MacAddress, i32)> {
    let mut best: Option<(MacAddress, MacAddress, i32)> = None;
    for link in self.links.iter() {
      let old = link.peer_name;
      for entry in self.beacons.iter() {
        if entry.arrived_via != old || entry.origin == old || entry.origin == self.my_name {
          continue;
        }
        let new = entry.origin;
        if !self.neighbors.contains(&new) {
          continue;
        }
        let new_sig = self.neighbors.get_sig_strength(&new) as i32;
        let diff = new_sig - link.signal_strength_snapshot as i32;
        if diff <= 0 {
          continue;
        }
        let better = match best {
          None => true,
          Some((_, _, best_diff)) if diff > best_diff => true,
          Some((best_old, best_new, best_diff)) if diff == best_diff => (old, new) < (best_old, best_new),
          _ => false,
        };
        if better {
          best = Some((old, new, diff));
        }
      }
    }
    best
  }

  /// We are `old` or `new` and have been asked to lock the arc to the
  /// initiator `from`. Grant iff we are not otherwise engaged in a tree
  /// update (spec.md §4.5.2 step 2).
  pub fn handle_lock_req(&mut self, from: MacAddress, kind: LockKind, now: Instant, grant_type: MessageType, deny_type: MessageType) {
    if self.locks.doing_stp_update() {
      let frame = ControlFrame::new(from, deny_type, ControlBody::Empty);
      self.queue_send(from, frame);
      return;
    }
    let deadline = now + LOCK_ROUND_TRIP_TIMEOUT;
    if self.locks.add_granted(from, kind, deadline).is_err() {
      let frame = ControlFrame::new(from, deny_type, ControlBody::Empty);
      self.queue_send(from, frame);
      return;
    }
    let frame = ControlFrame::new(from, grant_type, ControlBody::Empty);
    self.queue_send(from, frame);
    self.arm_lock_expiry();
  }

  pub fn handle_lock_req_old(&mut self, from: MacAddress, new: MacAddress, now: Instant) {
    self.handle_lock_req(from, LockKind::LockReqOld { other: new }, now, MessageType::LocalLockGrant, MessageType::LocalLockDeny);
  }

  pub fn handle_lock_req_new(&mut self, from: MacAddress, old: MacAddress, now: Instant) {
    self.handle_lock_req(from, LockKind::LockReqNew { other: old }, now, MessageType::LocalLockGrant, MessageType::LocalLockDeny);
  }

  /// `LOCAL-LOCK-GRANT` from `from`, which may be either the `old` or the
  /// `new` side of an in-flight local swap (spec.md §4.5.2 step 3). Once
  /// both sides are owned, deletes our edge to `old` and asks `new` and
  /// `old` to complete the swap.
  pub fn handle_lock_grant(&mut self, from: MacAddress, now: Instant) {
    let deadline = now + LOCK_ROUND_TRIP_TIMEOUT;
    let is_tree_kind = |k: &LockKind| matches!(k, LockKind::LockReqOld { .. } | LockKind::LockReqNew { .. });
    let Some(owned) = self.locks.accept_grant_matching(from, is_tree_kind, deadline) else { return };

    let (old, new) = match owned.kind {
      LockKind::LockReqOld { other: new } => (from, new),
      LockKind::LockReqNew { other: old } => (old, from),
      _ => unreachable!("is_tree_kind only matches LockReqOld/LockReqNew"),
    };

    if self.locks.find(LockList::Owned, old, &LockKind::LockReqOld { other: new }).is_none()
      || self.locks.find(LockList::Owned, new, &LockKind::LockReqNew { other: old }).is_none()
    {
      return; // still waiting on the other grant
    }

    self.links.remove(&old);
    self.emit(MeshStatusEvent::TreeEdgeRemoved { peer: old, reason: EdgeRemovedReason::LocalSwap });
    self.pending_swap = Some(PendingSwap { old, new, new_confirmed: false, old_confirmed: false });

    let frame_new = ControlFrame::new(new, MessageType::LocalStpAddChangedRequest, lock_message(self.my_name, self.my_name, old));
    self.queue_send(new, frame_new);
    let frame_old = ControlFrame::new(old, MessageType::LocalStpDeleteRequest, ControlBody::Empty);
    self.queue_send(old, frame_old);
  }

  pub fn handle_lock_deny(&mut self, from: MacAddress) {
    self.handle_stp_refused(from);
  }

  /// We are `new`: insert the edge to the initiator and confirm (spec.md
  /// §4.5.2 step 4).
  pub fn handle_stp_added_changed_req(&mut self, from: MacAddress, now: Instant) {
    let sig = self.neighbors.get_sig_strength(&from);
    let eth = self.neighbors.get(&from).and_then(|n| n.eth_mac);
    self.links.add_stp_link(from, eth, sig, now);
    self.emit(MeshStatusEvent::TreeEdgeAdded { peer: from });
    let frame = ControlFrame::new(from, MessageType::LocalStpAddedChanged, ControlBody::Empty);
    self.queue_send(from, frame);
  }

  /// We are `old`: delete the edge to the initiator and confirm.
  pub fn handle_stp_delete_req(&mut self, from: MacAddress) {
    self.links.remove(&from);
    self.emit(MeshStatusEvent::TreeEdgeRemoved { peer: from, reason: EdgeRemovedReason::PeerRequested });
    let frame = ControlFrame::new(from, MessageType::LocalStpDeleted, ControlBody::Empty);
    self.queue_send(from, frame);
  }

  /// We are the initiator `N`: `new` confirmed it added the edge (spec.md
  /// §4.5.2 step 4/5).
  pub fn handle_stp_added_changed(&mut self, from: MacAddress, now: Instant) {
    let Some(swap) = self.pending_swap else { return };
    if swap.new != from {
      return;
    }
    self.locks.release_owned(from, &LockKind::LockReqNew { other: swap.old });
    self.pending_swap = Some(PendingSwap { new_confirmed: true, ..swap });
    self.maybe_finalize_swap(now);
  }

  /// We are the initiator `N`: `old` confirmed it deleted the edge.
  pub fn handle_stp_deleted(&mut self, from: MacAddress, now: Instant) {
    let Some(swap) = self.pending_swap else { return };
    if swap.old != from {
      return;
    }
    self.locks.release_owned(from, &LockKind::LockReqOld { other: swap.new });
    self.pending_swap = Some(PendingSwap { old_confirmed: true, ..swap });
    self.maybe_finalize_swap(now);
  }

  fn maybe_finalize_swap(&mut self, now: Instant) {
    let Some(swap) = self.pending_swap else { return };
    if !(swap.new_confirmed && swap.old_confirmed) {
      return;
    }
    let sig = self.neighbors.get_sig_strength(&swap.new);
    let eth = self.neighbors.get(&swap.new).and_then(|n| n.eth_mac);
    self.links.add_stp_link(swap.new, eth, sig, now);
    self.emit(MeshStatusEvent::TreeEdgeAdded { peer: swap.new });
    // Saves a convergence sweep (spec.md §4.5.2 step 4): every beacon we
    // previously learned "arrived via old" now reads "arrived via new".
    self.beacons.rewrite_arrived_via(swap.old, swap.new);
    self.pending_swap = None;
    self.emit_beacon_to_all_links();
  }
}
