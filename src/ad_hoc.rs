//! C7: the ad-hoc client arbiter. Tracks which plain 802.11 stations this
//! box serves, negotiates ownership with other boxes via signal-strength
//! comparison, and runs the broadcast-suppression protocol (spec.md §4.7).

use std::collections::HashMap;

use static_assertions::const_assert;

use crate::mac::MacAddress;
use crate::random_eval::RandomEval;

pub const AD_HOC_CLIENTS_PER_BOX: usize = 4;
pub const AD_HOC_CLIENTS_ACROSS_CLOUD: usize = 32;

// The per-box cap only means anything if the cloud-wide cap can actually
// hold every box's worth of clients.
const_assert!(AD_HOC_CLIENTS_ACROSS_CLOUD >= AD_HOC_CLIENTS_PER_BOX);
const_assert!(FRESH_CLIENT_STRENGTH < DELETE_AT_STRENGTH);

/// Below this smoothed signal strength a client entry is dropped entirely
/// (spec.md §4.7). See DESIGN.md for how the ambiguous "assuming it started
/// out higher" comment in the original is resolved for freshly-seen
/// clients, which are initialized below this floor on purpose.
pub const DELETE_AT_STRENGTH: u8 = 5;
/// Initial strength recorded for a station on first sighting.
pub const FRESH_CLIENT_STRENGTH: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
  Unknown,
  Mine,
  Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdHocClientEntry {
  pub station_mac: MacAddress,
  pub server_box_mac: Option<MacAddress>,
  pub ownership: Ownership,
  pub my_sig_strength: u8,
  pub owner_sig_strength: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdHocError {
  BoxClientCapExceeded,
  CloudClientCapExceeded,
}

#[derive(Debug, Default)]
pub struct AdHocClientTable {
  entries: HashMap<MacAddress, AdHocClientEntry>,
}

impl AdHocClientTable {
  pub fn new() -> Self {
    AdHocClientTable::default()
  }

  pub fn get(&self, station: &MacAddress) -> Option<&AdHocClientEntry> {
    self.entries.get(station)
  }

  pub fn iter(&self) -> impl Iterator<Item = &AdHocClientEntry> {
    self.entries.values()
  }

  pub fn mine_count(&self) -> usize {
    self.entries.values().filter(|e| e.ownership == Ownership::Mine).count()
  }

  /// First sighting of a station via an 802.11 broadcast (spec.md §4.7).
  pub fn sight(&mut self, station: MacAddress) -> Result<(), AdHocError> {
    if self.entries.contains_key(&station) {
      return Ok(());
    }
    if self.entries.len() >= AD_HOC_CLIENTS_ACROSS_CLOUD {
      return Err(AdHocError::CloudClientCapExceeded);
    }
    self.entries.insert(
      station,
      AdHocClientEntry {
        station_mac: station,
        server_box_mac: None,
        ownership: Ownership::Unknown,
        my_sig_strength: FRESH_CLIENT_STRENGTH,
        owner_sig_strength: 0,
      },
    );
    Ok(())
  }

  /// Periodic optimization pass over `unknown` clients: claim as `mine`
  /// while under the per-box cap. Returns the newly claimed stations.
  pub fn claim_unknowns(&mut self, my_box: MacAddress) -> Vec<MacAddress> {
    let mut claimed = Vec::new();
    let mut mine = self.mine_count();
    let unknown: Vec<MacAddress> = self
      .entries
      .values()
      .filter(|e| e.ownership == Ownership::Unknown)
      .map(|e| e.station_mac)
      .collect();
    for station in unknown {
      if mine >= AD_HOC_CLIENTS_PER_BOX {
        break;
      }
      if let Some(entry) = self.entries.get_mut(&station) {
        entry.ownership = Ownership::Mine;
        entry.server_box_mac = Some(my_box);
        mine += 1;
        claimed.push(station);
      }
    }
    claimed
  }

  /// Best takeover candidate among `other`-owned clients: the station with
  /// the greatest positive `my_sig - owner_sig`, ties broken by MAC
  /// ordering as a stand-in for first-seen ordering (entries are not
  /// insertion-ordered once held in a map).
  pub fn best_takeover_candidate(&self) -> Option<(MacAddress, i32)> {
    self
      .entries
      .values()
      .filter(|e| e.ownership == Ownership::Other)
      .map(|e| (e.station_mac, e.my_sig_strength as i32 - e.owner_sig_strength as i32))
      .filter(|(_, diff)| *diff > 0)
      .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
  }

  /// Attempt a takeover, gated by `random_eval` (spec.md §4.7). Returns
  /// `true` if the claim succeeded (caller should flood a beacon).
  pub fn attempt_takeover(&mut self, my_box: MacAddress, beacon_count: usize, rng: &mut RandomEval, scale_by_mesh_size: bool) -> Option<MacAddress> {
    let (station, diff) = self.best_takeover_candidate()?;
    if !rng.random_eval(diff, beacon_count, scale_by_mesh_size, false) {
      return None;
    }
    let entry = self.entries.get_mut(&station)?;
    entry.ownership = Ownership::Mine;
    entry.server_box_mac = Some(my_box);
    Some(station)
  }

  /// Processes a `non-cloud-client` status row from an incoming beacon:
  /// another box claims to be serving `station` with the given signal.
  pub fn observe_remote_claim(&mut self, station: MacAddress, server: MacAddress, server_sig: u8, my_box: MacAddress) {
    let entry = self.entries.entry(station).or_insert(AdHocClientEntry {
      station_mac: station,
      server_box_mac: None,
      ownership: Ownership::Unknown,
      my_sig_strength: FRESH_CLIENT_STRENGTH,
      owner_sig_strength: 0,
    });

    if server == my_box {
      return;
    }

    match entry.ownership {
      Ownership::Mine => {
        // A race: someone else also believes they serve this station.
        // Relinquish; our own next beacon settles it on a later tick.
        entry.ownership = Ownership::Other;
        entry.server_box_mac = Some(server);
        entry.owner_sig_strength = server_sig;
      }
      Ownership::Other | Ownership::Unknown => {
        entry.ownership = Ownership::Other;
        entry.server_box_mac = Some(server);
        entry.owner_sig_strength = server_sig;
      }
    }
  }

  /// Marks every client served by `lost_box` as `unknown` (spec.md §4.2
  /// "deletion of an entry triggers §4.7's unserved-client sweep").
  pub fn mark_unserved(&mut self, lost_box: MacAddress) -> Vec<MacAddress> {
    let mut affected = Vec::new();
    for entry in self.entries.values_mut() {
      if entry.server_box_mac == Some(lost_box) {
        entry.ownership = Ownership::Unknown;
        entry.server_box_mac = None;
        affected.push(entry.station_mac);
      }
    }
    affected
  }

  /// Per-tick signal smoothing (spec.md §4.7): adopt a fresh measurement
  /// when available, otherwise decay toward zero. Deletes the entry if the
  /// decayed value crosses down through [`DELETE_AT_STRENGTH`] -- a client
  /// that was *initialized* at or below the floor (no measurement has ever
  /// placed it above the floor) is left alone so it gets a chance at a real
  /// reading first; see DESIGN.md.
  pub fn smooth_signal_strengths(&mut self, fresh: &HashMap<MacAddress, u8>) {
    let mut to_delete = Vec::new();
    for entry in self.entries.values_mut() {
      if let Some(&measured) = fresh.get(&entry.station_mac) {
        entry.my_sig_strength = measured;
        continue;
      }
      let previous = entry.my_sig_strength;
      if previous <= DELETE_AT_STRENGTH {
        continue;
      }
      let decayed = ((previous as f64) * 0.9).round() as u8;
      entry.my_sig_strength = decayed;
      if decayed <= DELETE_AT_STRENGTH {
        to_delete.push(entry.station_mac);
      }
    }
    for station in to_delete {
      self.entries.remove(&station);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn claims_are_capped_per_box() {
    let mut table = AdHocClientTable::new();
    let me = MacAddress([0xaa; 6]);
    for i in 0..6u8 {
      table.sight(MacAddress([i; 6])).unwrap();
    }
    let claimed = table.claim_unknowns(me);
    assert_eq!(claimed.len(), AD_HOC_CLIENTS_PER_BOX);
    assert_eq!(table.mine_count(), AD_HOC_CLIENTS_PER_BOX);
  }

  #[test]
  fn takeover_candidate_is_the_largest_positive_diff() {
    let mut table = AdHocClientTable::new();
    let s1 = MacAddress([1; 6]);
    let s2 = MacAddress([2; 6]);
    table.entries.insert(
      s1,
      AdHocClientEntry { station_mac: s1, server_box_mac: Some(MacAddress([9; 6])), ownership: Ownership::Other, my_sig_strength: 40, owner_sig_strength: 30 },
    );
    table.entries.insert(
      s2,
      AdHocClientEntry { station_mac: s2, server_box_mac: Some(MacAddress([9; 6])), ownership: Ownership::Other, my_sig_strength: 60, owner_sig_strength: 10 },
    );
    let (winner, diff) = table.best_takeover_candidate().unwrap();
    assert_eq!(winner, s2);
    assert_eq!(diff, 50);
  }

  #[test]
  fn losing_server_unserves_its_clients() {
    let mut table = AdHocClientTable::new();
    let lost = MacAddress([9; 6]);
    let station = MacAddress([1; 6]);
    table.entries.insert(
      station,
      AdHocClientEntry { station_mac: station, server_box_mac: Some(lost), ownership: Ownership::Other, my_sig_strength: 10, owner_sig_strength: 40 },
    );
    let affected = table.mark_unserved(lost);
    assert_eq!(affected, vec![station]);
    assert_eq!(table.get(&station).unwrap().ownership, Ownership::Unknown);
  }

  #[test]
  fn fresh_clients_survive_until_decayed_down_through_the_floor() {
    let mut table = AdHocClientTable::new();
    let station = MacAddress([1; 6]);
    table.sight(station).unwrap();
    // No fresh measurement ever arrives; a brand-new client starts below
    // the floor and must not be deleted for that reason alone.
    table.smooth_signal_strengths(&HashMap::new());
    assert!(table.get(&station).is_some());
  }

  #[test]
  fn decaying_through_the_floor_deletes_the_entry() {
    let mut table = AdHocClientTable::new();
    let station = MacAddress([1; 6]);
    table.entries.insert(
      station,
      AdHocClientEntry { station_mac: station, server_box_mac: None, ownership: Ownership::Mine, my_sig_strength: 6, owner_sig_strength: 0 },
    );
    table.smooth_signal_strengths(&HashMap::new());
    assert!(table.get(&station).is_none());
  }
}
