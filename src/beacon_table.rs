//! C2: the received-beacon table. Holds the latest STP beacon seen from
//! every reachable box, the neighbor it arrived via, and the set of peers
//! that box reports seeing "directly" (used by the forwarder to suppress
//! redundant transmissions, spec.md §4.8).

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::mac::MacAddress;
use crate::wire::StpBeacon;

/// Default per-entry staleness window.
pub const RECEIVED_BEACON_BASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether entry timeouts scale with the number of live entries, to damp
/// churn during large-mesh re-convergence (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingPolicy {
  Fixed,
  ByMeshSize,
}

#[derive(Debug, Clone)]
pub struct ReceivedBeaconEntry {
  pub origin: MacAddress,
  pub arrived_via: MacAddress,
  pub recv_time: Instant,
  pub weakest_link: u8,
  pub status_list: Vec<crate::wire::StatusRecord>,
  pub directly_sighted: HashSet<MacAddress>,
  pub last_seen_originator_seq: Option<u16>,
}

#[derive(Debug, Default)]
pub struct ReceivedBeaconTable {
  entries: HashMap<MacAddress, ReceivedBeaconEntry>,
}

impl ReceivedBeaconTable {
  pub fn new() -> Self {
    ReceivedBeaconTable::default()
  }

  pub fn get(&self, origin: &MacAddress) -> Option<&ReceivedBeaconEntry> {
    self.entries.get(origin)
  }

  pub fn contains(&self, origin: &MacAddress) -> bool {
    self.entries.contains_key(origin)
  }

  pub fn iter(&self) -> impl Iterator<Item = &ReceivedBeaconEntry> {
    self.entries.values()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  /// Insert or refresh the entry for `beacon.origin`. The caller
  /// (the beacon engine, C6) is responsible for having already checked
  /// that `arrived_via` is a current STP neighbor (spec.md §8 invariant 3:
  /// the check is at insertion time only).
  pub fn insert_or_refresh(&mut self, arrived_via: MacAddress, beacon: &StpBeacon, now: Instant) {
    let directly_sighted: HashSet<MacAddress> = beacon.directly_sighted().collect();
    self
      .entries
      .entry(beacon.origin)
      .and_modify(|e| {
        e.arrived_via = arrived_via;
        e.recv_time = now;
        e.weakest_link = beacon.weakest_link;
        e.status_list = beacon.status.clone();
        e.directly_sighted = directly_sighted.clone();
        e.last_seen_originator_seq = Some(beacon.orig_seq);
      })
      .or_insert(ReceivedBeaconEntry {
        origin: beacon.origin,
        arrived_via,
        recv_time: now,
        weakest_link: beacon.weakest_link,
        status_list: beacon.status.clone(),
        directly_sighted,
        last_seen_originator_seq: Some(beacon.orig_seq),
      });
  }

  pub fn remove(&mut self, origin: &MacAddress) -> Option<ReceivedBeaconEntry> {
    self.entries.remove(origin)
  }

  /// `new = (seq - stored.seq) mod 2^16 ∈ (0, 2^15)`, the same wraparound
  /// newness test the forwarder uses for payload sequence numbers
  /// (spec.md §4.8), applied here to a beacon's `orig_seq` to decide
  /// whether re-flooding it is warranted. An origin with no prior entry,
  /// or no recorded sequence, is always newer.
  pub fn is_newer(&self, origin: MacAddress, seq: u16) -> bool {
    match self.entries.get(&origin).and_then(|e| e.last_seen_originator_seq) {
      None => true,
      Some(stored) => {
        let delta = seq.wrapping_sub(stored);
        delta != 0 && delta < 0x8000
      }
    }
  }

  /// Rewrite every entry whose `arrived_via` is `old` to read `new`
  /// instead -- the local-swap "saves a convergence sweep" rewrite of
  /// spec.md §4.5.2 step 4.
  pub fn rewrite_arrived_via(&mut self, old: MacAddress, new: MacAddress) {
    for entry in self.entries.values_mut() {
      if entry.arrived_via == old {
        entry.arrived_via = new;
      }
    }
  }

  fn effective_timeout(&self, policy: ScalingPolicy) -> Duration {
    match policy {
      ScalingPolicy::Fixed => RECEIVED_BEACON_BASE_TIMEOUT,
      ScalingPolicy::ByMeshSize => {
        let factor = self.entries.len().max(1) as u32;
        RECEIVED_BEACON_BASE_TIMEOUT * factor
      }
    }
  }

  /// Sweep and remove every entry that has not been refreshed within its
  /// effective timeout, returning their origins so the caller can trigger
  /// the "unserved-client" sweep of spec.md §4.7.
  pub fn expire(&mut self, now: Instant, policy: ScalingPolicy) -> Vec<MacAddress> {
    let timeout = self.effective_timeout(policy);
    let expired: Vec<MacAddress> = self
      .entries
      .values()
      .filter(|e| now.duration_since(e.recv_time) >= timeout)
      .map(|e| e.origin)
      .collect();
    for origin in &expired {
      self.entries.remove(origin);
    }
    expired
  }
}
