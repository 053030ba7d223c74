//! C6: the beacon engine. Assembles and floods this box's own `StpBeacon`
//! over every tree edge, and processes the beacons received from others --
//! cycle detection, nak-on-stale-edge, and the rebroadcast that lets every
//! box reconstruct the whole tree's topology from locally-heard beacons
//! alone (spec.md §4.6). A flat `impl` block of plain handler methods per
//! incoming message kind, the same shape `mesh.rs` and `tree_mutation.rs`
//! already use.

use std::time::Instant;

use crate::mac::MacAddress;
use crate::mesh::MeshState;
use crate::status_events::{EdgeRemovedReason, MeshStatusEvent};
use crate::wire::status::{DeviceKind, NeighborType};
use crate::wire::{ControlBody, ControlFrame, MessageType, StatusRecord, StpBeacon};

impl MeshState {
  /// Builds this box's current `StpBeacon` (spec.md §4.6: "the originator's
  /// view of its own local neighborhood").
  fn build_own_beacon(&mut self) -> StpBeacon {
    self.beacon_seq = self.beacon_seq.wrapping_add(1);

    let weakest_link = self.links.iter().map(|l| l.signal_strength_snapshot).min().unwrap_or(crate::neighbor::MAX_SIG_STRENGTH);

    let mut status = Vec::new();
    for link in self.links.iter() {
      status.push(StatusRecord {
        name: link.peer_name,
        device_kind: if link.eth_mac.is_some() { DeviceKind::CloudEth } else { DeviceKind::CloudWds },
        neighbor_type: NeighborType::CloudNbr,
        sig_strength: link.signal_strength_snapshot,
        packets_received: 0,
        packets_lost: 0,
        data_packets_received: 0,
        data_packets_lost: 0,
        ping_packets_received: 0,
        ping_packets_lost: 0,
      });
    }
    for neighbor in self.neighbors.iter() {
      if self.links.contains(&neighbor.name) {
        continue;
      }
      status.push(StatusRecord {
        name: neighbor.name,
        device_kind: DeviceKind::Wlan,
        neighbor_type: NeighborType::CloudNonNbr,
        sig_strength: neighbor.signal_strength,
        packets_received: 0,
        packets_lost: 0,
        data_packets_received: 0,
        data_packets_lost: 0,
        ping_packets_received: 0,
        ping_packets_lost: 0,
      });
    }
    for client in self.ad_hoc.iter().filter(|c| c.server_box_mac == Some(self.my_name)) {
      status.push(StatusRecord {
        name: client.station_mac,
        device_kind: DeviceKind::AdHoc,
        neighbor_type: NeighborType::NonCloudClient,
        sig_strength: client.my_sig_strength,
        packets_received: 0,
        packets_lost: 0,
        data_packets_received: 0,
        data_packets_lost: 0,
        ping_packets_received: 0,
        ping_packets_lost: 0,
      });
    }

    StpBeacon { origin: self.my_name, orig_seq: self.beacon_seq, weakest_link, tweak_db: None, status }
  }

  /// Floods a freshly built beacon over every current tree edge (spec.md
  /// §4.6), tracking a per-peer ack lock so a silently-dropped beacon can be
  /// noticed (and simply dropped, not retried, by default -- spec.md §4.3).
  pub fn emit_beacon_to_all_links(&mut self) {
    let beacon = self.build_own_beacon();
    let peers: Vec<MacAddress> = self.links.iter().map(|l| l.peer_name).collect();
    for peer in peers {
      self.send_beacon_to(peer, beacon.clone());
    }
  }

  fn send_beacon_to(&mut self, peer: MacAddress, beacon: StpBeacon) {
    let frame = ControlFrame::new(peer, MessageType::StpBeacon, ControlBody::Beacon(beacon.clone()));
    self.queue_send(peer, frame);
    let deadline = Instant::now() + crate::lock::LOCK_ROUND_TRIP_TIMEOUT;
    let _ = self.locks.add_granted(peer, crate::lock::LockKind::StpBeaconAck { beacon }, deadline);
    self.arm_lock_expiry();
  }

  /// Floods every beacon we currently know of to a single newly joined (or
  /// reconnected) peer, so it doesn't have to wait for the next periodic
  /// emission to learn the rest of the tree (spec.md §4.5.1 step 2/3).
  pub fn flood_known_beacons_to(&mut self, peer: MacAddress, now: Instant) {
    let _ = now;
    let beacons: Vec<StpBeacon> = self
      .beacons
      .iter()
      .filter(|e| e.origin != peer)
      .map(|e| StpBeacon {
        origin: e.origin,
        orig_seq: e.last_seen_originator_seq.unwrap_or(0),
        weakest_link: e.weakest_link,
        tweak_db: None,
        status: e.status_list.clone(),
      })
      .collect();
    for beacon in beacons {
      self.send_beacon_to(peer, beacon);
    }
  }

  /// A peer has acked our beacon (`STP-BEACON-RECV`); clear the outstanding
  /// lock so it doesn't spuriously time out.
  pub fn handle_stp_beacon_recv(&mut self, from: MacAddress) {
    self.locks.take_granted_matching(from, |k| matches!(k, crate::lock::LockKind::StpBeaconAck { .. }));
  }

  /// A neighbor refused our beacon because, from its side, we are no
  /// longer (or never were) a current tree edge. Our own view disagrees,
  /// so tear the edge down locally too (spec.md §4.6 nak handling).
  pub fn handle_stp_beacon_nak(&mut self, from: MacAddress) {
    if self.links.remove(&from).is_some() {
      self.emit(MeshStatusEvent::TreeEdgeRemoved { peer: from, reason: EdgeRemovedReason::PeerRequested });
    }
  }

  /// The sender believes we are part of a cycle through them; honor the
  /// request and drop our side of that edge (spec.md §4.6 cycle handling).
  pub fn handle_stp_arc_delete(&mut self, from: MacAddress) {
    if self.links.remove(&from).is_some() {
      self.emit(MeshStatusEvent::TreeEdgeRemoved { peer: from, reason: EdgeRemovedReason::CycleDetected });
    }
  }

  /// Processes one incoming `StpBeacon` arriving on tree edge `from`
  /// (spec.md §4.6): cycle check, nak check, beacon-table refresh,
  /// ad-hoc-claim bookkeeping, and conditional rebroadcast.
  pub fn handle_incoming_beacon(&mut self, from: MacAddress, now: Instant, beacon: StpBeacon) {
    self.ack_beacon(from);

    if beacon.origin == self.my_name {
      let frame = ControlFrame::new(from, MessageType::StpArcDelete, ControlBody::Empty);
      self.queue_send(from, frame);
      return;
    }
    if !self.links.contains(&from) {
      let frame = ControlFrame::new(from, MessageType::StpBeaconNak, ControlBody::Empty);
      self.queue_send(from, frame);
      return;
    }

    let is_new = self.beacons.is_newer(beacon.origin, beacon.orig_seq);
    self.beacons.insert_or_refresh(from, &beacon, now);
    self.emit(MeshStatusEvent::NeighborTableChanged);

    for row in &beacon.status {
      if row.neighbor_type == NeighborType::NonCloudClient {
        self.ad_hoc.observe_remote_claim(row.name, beacon.origin, row.sig_strength, self.my_name);
      }
    }
    if let Some(tweak) = beacon.tweak_db {
      self.debug.apply_tweak(tweak);
    }

    if !is_new {
      return;
    }
    let peers: Vec<MacAddress> = self.links.iter().map(|l| l.peer_name).filter(|&p| p != from).collect();
    for peer in peers {
      self.send_beacon_to(peer, beacon.clone());
    }
  }

  fn ack_beacon(&mut self, from: MacAddress) {
    let frame = ControlFrame::new(from, MessageType::StpBeaconRecv, ControlBody::Empty);
    self.queue_send(from, frame);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{DebugVector, SigStrengthEntry};

  fn state(mac: u8) -> MeshState {
    MeshState::new(MacAddress([mac; 6]), None, DebugVector::default()).unwrap().0
  }

  #[test]
  fn own_beacon_reports_tree_edges_as_cloud_neighbors() {
    let mut a = state(1);
    let peer = MacAddress([2; 6]);
    a.links.add_stp_link(peer, None, 200, Instant::now());
    let beacon = a.build_own_beacon();
    assert_eq!(beacon.origin, a.my_name);
    assert!(beacon.status.iter().any(|r| r.name == peer && r.neighbor_type == NeighborType::CloudNbr));
  }

  #[test]
  fn emitting_floods_every_tree_edge_and_arms_an_ack_lock() {
    let mut a = state(1);
    let p1 = MacAddress([2; 6]);
    let p2 = MacAddress([3; 6]);
    a.links.add_stp_link(p1, None, 200, Instant::now());
    a.links.add_stp_link(p2, None, 200, Instant::now());
    a.emit_beacon_to_all_links();
    assert_eq!(a.outbox.len(), 2);
    assert!(a.locks.granted_iter().any(|r| r.peer == p1 && matches!(r.kind, crate::lock::LockKind::StpBeaconAck { .. })));
  }

  #[test]
  fn receiving_own_beacon_back_requests_a_cycle_delete() {
    let mut a = state(1);
    let from = MacAddress([2; 6]);
    a.links.add_stp_link(from, None, 200, Instant::now());
    let own = StpBeacon { origin: a.my_name, orig_seq: 1, weakest_link: 200, tweak_db: None, status: Vec::new() };
    a.handle_incoming_beacon(from, Instant::now(), own);
    assert!(a.outbox.iter().any(|(_, f)| f.message_type == MessageType::StpArcDelete));
  }

  #[test]
  fn beacon_from_a_non_tree_peer_is_nakked_and_not_stored() {
    let mut a = state(1);
    let from = MacAddress([2; 6]);
    let origin = MacAddress([3; 6]);
    let beacon = StpBeacon { origin, orig_seq: 1, weakest_link: 200, tweak_db: None, status: Vec::new() };
    a.handle_incoming_beacon(from, Instant::now(), beacon);
    assert!(a.outbox.iter().any(|(_, f)| f.message_type == MessageType::StpBeaconNak));
    assert!(a.beacons.get(&origin).is_none());
  }

  #[test]
  fn fresh_beacon_is_rebroadcast_to_every_other_tree_edge() {
    let mut a = state(1);
    let from = MacAddress([2; 6]);
    let other_peer = MacAddress([3; 6]);
    let origin = MacAddress([9; 6]);
    a.links.add_stp_link(from, None, 200, Instant::now());
    a.links.add_stp_link(other_peer, None, 200, Instant::now());
    let beacon = StpBeacon { origin, orig_seq: 1, weakest_link: 200, tweak_db: None, status: Vec::new() };
    a.handle_incoming_beacon(from, Instant::now(), beacon);
    assert!(a.outbox.iter().any(|(dest, f)| *dest == other_peer && f.message_type == MessageType::StpBeacon));
    assert!(!a.outbox.iter().any(|(dest, f)| *dest == from && f.message_type == MessageType::StpBeacon));
  }

  #[test]
  fn stale_replay_of_a_known_beacon_is_not_rebroadcast() {
    let mut a = state(1);
    let from = MacAddress([2; 6]);
    let other_peer = MacAddress([3; 6]);
    let origin = MacAddress([9; 6]);
    a.links.add_stp_link(from, None, 200, Instant::now());
    a.links.add_stp_link(other_peer, None, 200, Instant::now());
    let beacon = StpBeacon { origin, orig_seq: 5, weakest_link: 200, tweak_db: None, status: Vec::new() };
    a.handle_incoming_beacon(from, Instant::now(), beacon.clone());
    a.outbox.clear();
    a.handle_incoming_beacon(from, Instant::now(), beacon);
    assert!(!a.outbox.iter().any(|(_, f)| f.message_type == MessageType::StpBeacon));
  }

  #[test]
  fn nak_from_a_peer_tears_down_our_side_of_the_edge_too() {
    let mut a = state(1);
    let peer = MacAddress([2; 6]);
    a.links.add_stp_link(peer, None, 200, Instant::now());
    a.handle_stp_beacon_nak(peer);
    assert!(!a.links.contains(&peer));
  }

  #[test]
  fn non_cloud_client_rows_feed_the_ad_hoc_table() {
    let mut a = state(1);
    let from = MacAddress([2; 6]);
    let origin = MacAddress([9; 6]);
    let station = MacAddress([5; 6]);
    a.links.add_stp_link(from, None, 200, Instant::now());
    a.neighbors.reconcile(&[SigStrengthEntry { mac: from, signal: 200, channel: None, noise: None, rate: None }], &[]);
    let beacon = StpBeacon {
      origin,
      orig_seq: 1,
      weakest_link: 200,
      tweak_db: None,
      status: vec![StatusRecord {
        name: station,
        device_kind: DeviceKind::AdHoc,
        neighbor_type: NeighborType::NonCloudClient,
        sig_strength: 120,
        packets_received: 0,
        packets_lost: 0,
        data_packets_received: 0,
        data_packets_lost: 0,
        ping_packets_received: 0,
        ping_packets_lost: 0,
      }],
    };
    a.handle_incoming_beacon(from, Instant::now(), beacon);
    assert_eq!(a.ad_hoc.get(&station).unwrap().server_box_mac, Some(origin));
  }
}
