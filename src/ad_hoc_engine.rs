//! C7 protocol engine: the periodic optimization tick over [`crate::ad_hoc`]
//! (claim unowned stations, evaluate takeovers, decay smoothed signal
//! strengths) and the broadcast-suppression exchange that keeps every other
//! box from also forwarding a station's broadcast once its owner already
//! has (spec.md §4.7). Split from `ad_hoc.rs` the same way `tree_mutation.rs`
//! and `beacon_engine.rs` sit beside their C5/C6 data tables: the table
//! holds state and pure decisions, this file wires those decisions to
//! messages and the rest of `MeshState`.

use std::collections::HashMap;
use std::time::Instant;

use crate::mac::MacAddress;
use crate::mesh::MeshState;
use crate::status_events::MeshStatusEvent;
use crate::wire::{BcastNotice, ControlBody, ControlFrame, MessageType};

impl MeshState {
  /// One pass of C7's periodic tick (spec.md §4.7): claim unowned stations
  /// up to the per-box cap, decay every tracked signal strength, and
  /// attempt one takeover if a sufficiently stronger claim exists. Any
  /// ownership change floods an immediate beacon so the rest of the mesh
  /// learns of it without waiting for the next scheduled emission.
  pub fn run_ad_hoc_optimization(&mut self, now: Instant) {
    let _ = now;
    if !self.debug.get(crate::config::DebugOption::AdHocClientMode) {
      return;
    }

    let claimed = self.ad_hoc.claim_unknowns(self.my_name);
    for station in &claimed {
      self.emit(MeshStatusEvent::AdHocClientClaimed { station: *station });
    }

    // No raw-radio measurement source in this crate (spec.md §1
    // Non-goals); every tracked station simply decays toward its floor
    // until a beacon or direct sighting refreshes it.
    self.ad_hoc.smooth_signal_strengths(&HashMap::new());

    let scale = self.debug.get(crate::config::DebugOption::ScaleTimersByMeshSize);
    let took_over = self.ad_hoc.attempt_takeover(self.my_name, self.beacons.len(), &mut self.rng, scale);
    if let Some(station) = took_over {
      self.emit(MeshStatusEvent::AdHocClientClaimed { station });
    }

    if !claimed.is_empty() || took_over.is_some() {
      self.emit_beacon_to_all_links();
    }
  }

  /// Called when an owned ad-hoc client's broadcast needs forwarding
  /// (spec.md §4.7: suppress every other box from also forwarding the same
  /// broadcast). This crate has no async callback between "block" and
  /// "unblock" -- the whole sequence runs synchronously within one call,
  /// a deliberate simplification of the original's block-then-later-unblock
  /// pair; see DESIGN.md.
  pub fn owner_forward_broadcast(&mut self, client: MacAddress) {
    let peers: Vec<MacAddress> = self.links.iter().map(|l| l.peer_name).collect();
    for &peer in &peers {
      let frame = ControlFrame::new(peer, MessageType::AdHocBcastBlock, ControlBody::Bcast(BcastNotice { owner: self.my_name, client }));
      self.queue_send(peer, frame);
    }
    for &peer in &peers {
      let frame = ControlFrame::new(peer, MessageType::AdHocBcastUnblock, ControlBody::Bcast(BcastNotice { owner: self.my_name, client }));
      self.queue_send(peer, frame);
    }
  }

  /// A neighbor's owner is about to forward `notice.client`'s broadcast;
  /// install a filter so we don't also forward it.
  pub fn handle_bcast_block(&mut self, from: MacAddress, notice: BcastNotice, now: Instant) {
    let deadline = now + crate::lock::LOCK_ROUND_TRIP_TIMEOUT;
    let _ = self.locks.add_granted(from, crate::lock::LockKind::AdHocBcastBlock { client: notice.client }, deadline);
    self.arm_lock_expiry();
  }

  /// The owner is done forwarding; clear the filter.
  pub fn handle_bcast_unblock(&mut self, from: MacAddress, notice: BcastNotice) {
    self.locks.release_granted(from, &crate::lock::LockKind::AdHocBcastBlock { client: notice.client });
  }

  /// Whether we currently hold a suppression filter for `client`'s
  /// broadcasts from any peer.
  pub fn ignore_ad_hoc_bcast(&self, client: MacAddress) -> bool {
    self
      .locks
      .granted_iter()
      .any(|r| matches!(&r.kind, crate::lock::LockKind::AdHocBcastBlock { client: c } if *c == client))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::DebugVector;

  fn state(mac: u8) -> MeshState {
    MeshState::new(MacAddress([mac; 6]), None, DebugVector::default()).unwrap().0
  }

  #[test]
  fn optimization_tick_claims_sighted_stations_and_floods_a_beacon() {
    let mut a = state(1);
    let station = MacAddress([2; 6]);
    a.ad_hoc.sight(station).unwrap();
    a.run_ad_hoc_optimization(Instant::now());
    assert_eq!(a.ad_hoc.get(&station).unwrap().server_box_mac, Some(a.my_name));
  }

  #[test]
  fn optimization_is_a_no_op_when_ad_hoc_mode_is_disabled() {
    let mut a = state(1);
    a.debug.set(crate::config::DebugOption::AdHocClientMode, false);
    let station = MacAddress([2; 6]);
    a.ad_hoc.sight(station).unwrap();
    a.run_ad_hoc_optimization(Instant::now());
    assert!(a.ad_hoc.get(&station).unwrap().server_box_mac.is_none());
  }

  #[test]
  fn block_then_unblock_round_trips_the_suppression_filter() {
    let mut a = state(1);
    let peer = MacAddress([2; 6]);
    let client = MacAddress([9; 6]);
    let notice = BcastNotice { owner: peer, client };
    a.handle_bcast_block(peer, notice, Instant::now());
    assert!(a.ignore_ad_hoc_bcast(client));
    a.handle_bcast_unblock(peer, notice);
    assert!(!a.ignore_ad_hoc_bcast(client));
  }

  #[test]
  fn owner_forward_broadcast_sends_block_and_unblock_to_every_tree_peer() {
    let mut a = state(1);
    let peer = MacAddress([2; 6]);
    let client = MacAddress([9; 6]);
    a.links.add_stp_link(peer, None, 200, Instant::now());
    a.owner_forward_broadcast(client);
    assert!(a.outbox.iter().any(|(_, f)| f.message_type == MessageType::AdHocBcastBlock));
    assert!(a.outbox.iter().any(|(_, f)| f.message_type == MessageType::AdHocBcastUnblock));
  }
}
