//! C4: the STP link list. The set of boxes we have an active tree edge to.
//! Edges are bidirectional by construction -- each side holds its own
//! entry -- and are torn down only by explicit protocol action, never by
//! passive aging (spec.md §4.4).

use std::collections::HashMap;
use std::time::Instant;

use crate::mac::MacAddress;
use crate::wire::MessageType;

/// Consecutive unroutable sends after which a link is torn down.
pub const UNROUTABLE_MAX: u32 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StpLinkEntry {
  pub peer_name: MacAddress,
  pub eth_mac: Option<MacAddress>,
  pub signal_strength_snapshot: u8,
  pub send_seq: u16,
  pub recv_seq: u16,
  pub recv_seq_err: u32,
  pub send_err: u32,
  pub recv_err: u32,
  pub awaiting_ack: bool,
  pub pending_ack: Option<MessageType>,
  pub expect_seq: u16,
  pub last_sent_payload: Option<Vec<u8>>,
  pub unroutable_count: u32,
  pub created_time: Instant,
}

impl StpLinkEntry {
  fn fresh(peer_name: MacAddress, eth_mac: Option<MacAddress>, signal_strength_snapshot: u8, now: Instant) -> Self {
    StpLinkEntry {
      peer_name,
      eth_mac,
      signal_strength_snapshot,
      send_seq: 0,
      recv_seq: 0,
      recv_seq_err: 0,
      send_err: 0,
      recv_err: 0,
      awaiting_ack: false,
      pending_ack: None,
      expect_seq: 0,
      last_sent_payload: None,
      unroutable_count: 0,
      created_time: now,
    }
  }
}

#[derive(Debug, Default)]
pub struct StpLinkList {
  entries: HashMap<MacAddress, StpLinkEntry>,
}

impl StpLinkList {
  pub fn new() -> Self {
    StpLinkList::default()
  }

  pub fn contains(&self, peer: &MacAddress) -> bool {
    self.entries.contains_key(peer)
  }

  pub fn get(&self, peer: &MacAddress) -> Option<&StpLinkEntry> {
    self.entries.get(peer)
  }

  pub fn get_mut(&mut self, peer: &MacAddress) -> Option<&mut StpLinkEntry> {
    self.entries.get_mut(peer)
  }

  pub fn iter(&self) -> impl Iterator<Item = &StpLinkEntry> {
    self.entries.values()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Re-initializes all per-edge counters; idempotent -- re-adding an
  /// existing peer resets flow-control state exactly once (spec.md §4.4,
  /// §8 round-trip property).
  pub fn add_stp_link(&mut self, peer: MacAddress, eth_mac: Option<MacAddress>, signal_strength: u8, now: Instant) {
    self.entries.insert(peer, StpLinkEntry::fresh(peer, eth_mac, signal_strength, now));
  }

  pub fn remove(&mut self, peer: &MacAddress) -> Option<StpLinkEntry> {
    self.entries.remove(peer)
  }

  /// Record a failed send; returns `true` if the link was just torn down
  /// for crossing `UNROUTABLE_MAX`.
  pub fn record_unroutable(&mut self, peer: &MacAddress) -> bool {
    let Some(entry) = self.entries.get_mut(peer) else { return false };
    entry.unroutable_count += 1;
    if entry.unroutable_count >= UNROUTABLE_MAX {
      self.entries.remove(peer);
      true
    } else {
      false
    }
  }

  pub fn record_routable(&mut self, peer: &MacAddress) {
    if let Some(entry) = self.entries.get_mut(peer) {
      entry.unroutable_count = 0;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn re_adding_a_peer_resets_counters() {
    let mut links = StpLinkList::new();
    let peer = MacAddress([1; 6]);
    links.add_stp_link(peer, None, 200, Instant::now());
    links.get_mut(&peer).unwrap().send_seq = 7;
    links.add_stp_link(peer, None, 200, Instant::now());
    assert_eq!(links.get(&peer).unwrap().send_seq, 0);
    assert_eq!(links.len(), 1);
  }

  #[test]
  fn unroutable_count_tears_down_the_link_at_threshold() {
    let mut links = StpLinkList::new();
    let peer = MacAddress([1; 6]);
    links.add_stp_link(peer, None, 200, Instant::now());
    for _ in 0..UNROUTABLE_MAX - 1 {
      assert!(!links.record_unroutable(&peer));
    }
    assert!(links.record_unroutable(&peer));
    assert!(!links.contains(&peer));
  }

  #[test]
  fn record_routable_resets_unroutable_counter() {
    let mut links = StpLinkList::new();
    let peer = MacAddress([1; 6]);
    links.add_stp_link(peer, None, 200, Instant::now());
    links.record_unroutable(&peer);
    links.record_routable(&peer);
    assert_eq!(links.get(&peer).unwrap().unroutable_count, 0);
  }
}
