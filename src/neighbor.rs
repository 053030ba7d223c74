//! C1: the neighbor table. Tracks every box we can hear directly, wirelessly
//! or on the wire, reconciled periodically against the two authoritative
//! files described in spec.md §6 (see [`crate::config`]).

use std::collections::{HashMap, HashSet};

use crate::config::{EthBeaconEntry, SigStrengthEntry};
use crate::mac::MacAddress;
use crate::wire::MessageType;

/// Raw linksys strength ~179-180 corresponds to about "10" on a common
/// wifi-stumbler scale; 185 is used as a safety margin.
pub const WEAK_THRESHOLD: u8 = 185;
pub const GOOD_THRESHOLD: u8 = 190;
pub const MAX_SIG_STRENGTH: u8 = 255;
/// Returned by [`NeighborTable::get_sig_strength`] for an unknown neighbor:
/// "very weak, fake", so callers need not special-case absence.
pub const UNKNOWN_SIG_STRENGTH: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeighborEntry {
  pub name: MacAddress,
  pub eth_mac: Option<MacAddress>,
  pub signal_strength: u8,
  pub send_seq: u16,
  pub recv_seq: u16,
  pub recv_seq_err: u32,
  pub send_err: u32,
  pub recv_err: u32,
  pub duplicate_pending: bool,
  pub awaiting_ack: bool,
  pub pending_ack: Option<MessageType>,
  pub expect_seq: u16,
  pub last_sent_message: Option<Vec<u8>>,
  pub unroutable_count: u32,
}

impl NeighborEntry {
  fn fresh(name: MacAddress) -> Self {
    NeighborEntry {
      name,
      eth_mac: None,
      signal_strength: UNKNOWN_SIG_STRENGTH,
      send_seq: 0,
      recv_seq: 0,
      recv_seq_err: 0,
      send_err: 0,
      recv_err: 0,
      duplicate_pending: false,
      awaiting_ack: false,
      pending_ack: None,
      expect_seq: 0,
      last_sent_message: None,
      unroutable_count: 0,
    }
  }
}

#[derive(Debug, Default)]
pub struct NeighborTable {
  entries: HashMap<MacAddress, NeighborEntry>,
}

impl NeighborTable {
  pub fn new() -> Self {
    NeighborTable::default()
  }

  pub fn get(&self, mac: &MacAddress) -> Option<&NeighborEntry> {
    self.entries.get(mac)
  }

  pub fn get_mut(&mut self, mac: &MacAddress) -> Option<&mut NeighborEntry> {
    self.entries.get_mut(mac)
  }

  pub fn contains(&self, mac: &MacAddress) -> bool {
    self.entries.contains_key(mac)
  }

  pub fn iter(&self) -> impl Iterator<Item = &NeighborEntry> {
    self.entries.values()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Lookup that never fails: an unknown box reads as the weakest possible
  /// signal.
  pub fn get_sig_strength(&self, mac: &MacAddress) -> u8 {
    self.entries.get(mac).map(|e| e.signal_strength).unwrap_or(UNKNOWN_SIG_STRENGTH)
  }

  /// Reconcile against the two authoritative sources (spec.md §4.1).
  /// Returns `true` if membership or wired-connectivity status changed, so
  /// the caller knows to re-flood its own beacon.
  pub fn reconcile(&mut self, sig_entries: &[SigStrengthEntry], eth_entries: &[EthBeaconEntry]) -> bool {
    let mut changed = false;

    let mut seen: HashSet<MacAddress> = HashSet::new();
    for e in sig_entries {
      seen.insert(e.mac);
    }
    for e in eth_entries {
      seen.insert(e.wireless_mac);
    }

    let stale: Vec<MacAddress> = self
      .entries
      .keys()
      .filter(|mac| !seen.contains(mac))
      .copied()
      .collect();
    for mac in stale {
      self.entries.remove(&mac);
      changed = true;
    }

    for e in sig_entries {
      let entry = self.entries.entry(e.mac).or_insert_with(|| {
        changed = true;
        NeighborEntry::fresh(e.mac)
      });
      entry.signal_strength = e.signal;
    }

    for e in eth_entries {
      let entry = self.entries.entry(e.wireless_mac).or_insert_with(|| {
        changed = true;
        NeighborEntry::fresh(e.wireless_mac)
      });
      if entry.eth_mac != Some(e.eth_mac) {
        changed = true;
      }
      entry.eth_mac = Some(e.eth_mac);
      // Ethernet connectivity always wins over the wireless reading.
      entry.signal_strength = MAX_SIG_STRENGTH;
    }

    // Entries that lost wired connectivity this pass (present in sig_entries
    // only, but still carrying a stale eth_mac) report a change too.
    let sig_only: HashSet<MacAddress> = sig_entries.iter().map(|e| e.mac).collect();
    let eth_seen: HashSet<MacAddress> = eth_entries.iter().map(|e| e.wireless_mac).collect();
    for mac in sig_only.difference(&eth_seen) {
      if let Some(entry) = self.entries.get_mut(mac) {
        if entry.eth_mac.is_some() {
          entry.eth_mac = None;
          changed = true;
        }
      }
    }

    changed
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sig(mac: MacAddress, signal: u8) -> SigStrengthEntry {
    SigStrengthEntry { mac, signal, channel: None, noise: None, rate: None }
  }

  fn eth(eth_mac: MacAddress, wireless_mac: MacAddress) -> EthBeaconEntry {
    EthBeaconEntry { eth_mac, wireless_mac }
  }

  #[test]
  fn unknown_neighbor_reads_as_weakest_strength() {
    let table = NeighborTable::new();
    assert_eq!(table.get_sig_strength(&MacAddress::ZERO), UNKNOWN_SIG_STRENGTH);
  }

  #[test]
  fn reconcile_adds_removes_and_pins_wired_entries() {
    let mut table = NeighborTable::new();
    let a = MacAddress([1; 6]);
    let b = MacAddress([2; 6]);
    let a_eth = MacAddress([0xaa; 6]);

    let changed = table.reconcile(&[sig(a, 120), sig(b, 90)], &[]);
    assert!(changed);
    assert_eq!(table.len(), 2);
    assert_eq!(table.get_sig_strength(&a), 120);

    // b drops out of the sig file; a gains wired connectivity.
    let changed = table.reconcile(&[sig(a, 130)], &[eth(a_eth, a)]);
    assert!(changed);
    assert_eq!(table.len(), 1);
    assert_eq!(table.get_sig_strength(&a), MAX_SIG_STRENGTH);
    assert_eq!(table.get(&a).unwrap().eth_mac, Some(a_eth));
  }

  #[test]
  fn reconcile_is_a_no_op_when_nothing_changed() {
    let mut table = NeighborTable::new();
    let a = MacAddress([1; 6]);
    table.reconcile(&[sig(a, 120)], &[]);
    assert!(!table.reconcile(&[sig(a, 120)], &[]));
  }
}
