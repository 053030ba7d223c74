//! C8: the payload forwarder. Per-originator duplicate suppression over a
//! 16-bit sequence space, two-piece fragmentation reassembly, and the
//! tree-directed egress fan-out rules of spec.md §4.8.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use crate::mac::MacAddress;
use crate::wire::PayloadMessage;

/// Where a payload frame arrived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalPath {
  Wired,
  Wireless,
  StpPeer(MacAddress),
}

/// Where a payload frame should be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgressTarget {
  WiredUplink,
  Wireless,
  StpPeer(MacAddress),
  AdHocClient(MacAddress),
}

#[derive(Debug, Default)]
struct FragmentBuffer {
  expected_k: u8,
  expected_n: u8,
  accumulated: BytesMut,
}

#[derive(Debug, Default)]
pub struct Forwarder {
  highest_seen: HashMap<MacAddress, u16>,
  reassembly: HashMap<MacAddress, FragmentBuffer>,
  local_seq: u16,
}

impl Forwarder {
  pub fn new() -> Self {
    Forwarder::default()
  }

  /// Next monotonically increasing sequence number to stamp on a locally
  /// originated payload (spec.md §4.8).
  pub fn next_local_seq(&mut self) -> u16 {
    let seq = self.local_seq;
    self.local_seq = self.local_seq.wrapping_add(1);
    seq
  }

  /// `new = (msg.seq - stored.seq) mod 2^16 ∈ (0, 2^15)` (spec.md §4.8).
  /// Our own name is never new; an unseen originator always is (and primes
  /// the stored sequence).
  pub fn is_new(&mut self, originator: MacAddress, local_name: MacAddress, seq: u16) -> bool {
    if originator == local_name {
      return false;
    }
    match self.highest_seen.get(&originator) {
      None => {
        self.highest_seen.insert(originator, seq);
        true
      }
      Some(&stored) => {
        let delta = seq.wrapping_sub(stored);
        let new = delta != 0 && delta < 0x8000;
        if new {
          self.highest_seen.insert(originator, seq);
        }
        new
      }
    }
  }

  /// Ingress reassembly for one device's stream of payload pieces.
  /// Returns the completed body once the last piece is accepted. Any
  /// mismatch between the expected `(k, n)` and what actually arrives
  /// resets the reassembler for that device (spec.md §4.8).
  pub fn ingress_assemble(&mut self, device: MacAddress, msg: &PayloadMessage) -> Option<Bytes> {
    if !msg.is_fragment() {
      self.reassembly.remove(&device);
      return Some(msg.body.clone());
    }

    let buf = self.reassembly.entry(device).or_default();
    if msg.k == 1 {
      buf.expected_k = 2;
      buf.expected_n = msg.n;
      buf.accumulated = BytesMut::from(&msg.body[..]);
      return None;
    }

    if msg.k != buf.expected_k || msg.n != buf.expected_n {
      self.reassembly.remove(&device);
      return None;
    }

    buf.accumulated.extend_from_slice(&msg.body);
    if msg.is_final_piece() {
      let body = self.reassembly.remove(&device).unwrap().accumulated.freeze();
      Some(body)
    } else {
      None
    }
  }

  /// Computes where a payload should be fanned out, given the tree-aware
  /// suppression rules of spec.md §4.8. `directly_sighted` reports whether
  /// an STP peer already sees the originator directly (via its beacon's
  /// directly-sighted hint); `arrived_via` reports whether that peer is the
  /// tree edge the frame arrived through.
  #[allow(clippy::too_many_arguments)]
  pub fn fanout_destinations(
    &self,
    arrival: ArrivalPath,
    originator: MacAddress,
    stp_peers: &[MacAddress],
    directly_sighted: impl Fn(MacAddress) -> bool,
    arrived_via: impl Fn(MacAddress) -> bool,
    has_wired_uplink: bool,
    ad_hoc_owned_clients: &[MacAddress],
    ad_hoc_forwarding_enabled: bool,
  ) -> Vec<EgressTarget> {
    let _ = originator;
    let mut out = Vec::new();

    if has_wired_uplink && arrival != ArrivalPath::Wired {
      out.push(EgressTarget::WiredUplink);
    }

    for &peer in stp_peers {
      if arrival == ArrivalPath::StpPeer(peer) {
        continue;
      }
      if directly_sighted(peer) || arrived_via(peer) {
        continue;
      }
      out.push(EgressTarget::StpPeer(peer));
    }

    if arrival != ArrivalPath::Wireless {
      out.push(EgressTarget::Wireless);
    }

    if ad_hoc_forwarding_enabled {
      for &client in ad_hoc_owned_clients {
        out.push(EgressTarget::AdHocClient(client));
      }
    }

    out
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn own_originator_is_never_new() {
    let mut fwd = Forwarder::new();
    let me = MacAddress([1; 6]);
    assert!(!fwd.is_new(me, me, 5));
  }

  #[test]
  fn first_sighting_of_an_originator_is_always_new() {
    let mut fwd = Forwarder::new();
    let me = MacAddress([1; 6]);
    let other = MacAddress([2; 6]);
    assert!(fwd.is_new(other, me, 100));
    // replaying the same seq now is not new.
    assert!(!fwd.is_new(other, me, 100));
  }

  #[test]
  fn older_sequence_is_not_new_even_across_small_gaps() {
    let mut fwd = Forwarder::new();
    let me = MacAddress([1; 6]);
    let other = MacAddress([2; 6]);
    fwd.is_new(other, me, 1000);
    assert!(!fwd.is_new(other, me, 999));
    assert!(fwd.is_new(other, me, 1001));
  }

  #[test]
  fn sequence_space_wraps_correctly() {
    let mut fwd = Forwarder::new();
    let me = MacAddress([1; 6]);
    let other = MacAddress([2; 6]);
    fwd.is_new(other, me, 65530);
    assert!(fwd.is_new(other, me, 3)); // wraps forward past 65535
  }

  #[test]
  fn single_piece_frames_pass_straight_through() {
    let mut fwd = Forwarder::new();
    let device = MacAddress([1; 6]);
    let msg = PayloadMessage { k: 1, n: 1, originator: MacAddress::ZERO, originator_seq: 0, body: Bytes::from_static(b"abc") };
    assert_eq!(fwd.ingress_assemble(device, &msg), Some(Bytes::from_static(b"abc")));
  }

  #[test]
  fn two_piece_frames_reassemble_in_order() {
    let mut fwd = Forwarder::new();
    let device = MacAddress([1; 6]);
    let first = PayloadMessage { k: 1, n: 2, originator: MacAddress::ZERO, originator_seq: 0, body: Bytes::from_static(b"hel") };
    let second = PayloadMessage { k: 2, n: 2, originator: MacAddress::ZERO, originator_seq: 0, body: Bytes::from_static(b"lo") };
    assert_eq!(fwd.ingress_assemble(device, &first), None);
    assert_eq!(fwd.ingress_assemble(device, &second), Some(Bytes::from_static(b"hello")));
  }

  #[test]
  fn mismatched_second_piece_resets_the_reassembler() {
    let mut fwd = Forwarder::new();
    let device = MacAddress([1; 6]);
    let first = PayloadMessage { k: 1, n: 2, originator: MacAddress::ZERO, originator_seq: 0, body: Bytes::from_static(b"hel") };
    let bad_second = PayloadMessage { k: 2, n: 3, originator: MacAddress::ZERO, originator_seq: 0, body: Bytes::from_static(b"lo") };
    fwd.ingress_assemble(device, &first);
    assert_eq!(fwd.ingress_assemble(device, &bad_second), None);
    // next frame must start a fresh piece 1.
    let restart = PayloadMessage { k: 1, n: 1, originator: MacAddress::ZERO, originator_seq: 0, body: Bytes::from_static(b"hi") };
    assert_eq!(fwd.ingress_assemble(device, &restart), Some(Bytes::from_static(b"hi")));
  }

  #[test]
  fn fanout_skips_arrival_device_and_suppresses_informed_peers() {
    let fwd = Forwarder::new();
    let origin = MacAddress([9; 6]);
    let via_peer = MacAddress([1; 6]);
    let informed_peer = MacAddress([2; 6]);
    let uninformed_peer = MacAddress([3; 6]);
    let targets = fwd.fanout_destinations(
      ArrivalPath::StpPeer(via_peer),
      origin,
      &[via_peer, informed_peer, uninformed_peer],
      |p| p == informed_peer,
      |p| p == via_peer,
      true,
      &[],
      false,
    );
    assert!(targets.contains(&EgressTarget::WiredUplink));
    assert!(targets.contains(&EgressTarget::Wireless));
    assert!(targets.contains(&EgressTarget::StpPeer(uninformed_peer)));
    assert!(!targets.contains(&EgressTarget::StpPeer(via_peer)));
    assert!(!targets.contains(&EgressTarget::StpPeer(informed_peer)));
  }
}
