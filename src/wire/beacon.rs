// The STP beacon (spec.md §4.6): flooded over every tree edge, carrying
// the originator's view of its own local neighborhood so receivers can
// reconstruct the mesh topology (§4.6 "tree-reconstruction sweep") and
// refresh their received-beacon table (§4.2).

use speedy::{Readable, Writable};

use crate::mac::MacAddress;
use crate::wire::status::StatusRecord;

#[derive(Debug, Clone, PartialEq, Readable, Writable)]
pub struct StpBeacon {
  pub origin: MacAddress,
  pub orig_seq: u16,
  /// Strongest-is-best link metric to the weakest of this box's outgoing
  /// tree edges; used as an at-a-glance health signal by consumers of the
  /// (out-of-scope) HTML topology page.
  pub weakest_link: u8,
  /// Remote debug-vector tweak, encoded as `1000+i` (force false), `2000+i`
  /// (force true), or the raw index `i` (toggle) — spec.md §6.
  pub tweak_db: Option<u16>,
  pub status: Vec<StatusRecord>,
}

impl StpBeacon {
  pub fn directly_sighted(&self) -> impl Iterator<Item = MacAddress> + '_ {
    use crate::wire::status::NeighborType;
    self
      .status
      .iter()
      .filter(|row| matches!(row.neighbor_type, NeighborType::CloudNbr | NeighborType::CloudNonNbr))
      .map(|row| row.name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::wire::status::{DeviceKind, NeighborType};

  fn sample_row(mac: MacAddress) -> StatusRecord {
    StatusRecord {
      name: mac,
      device_kind: DeviceKind::CloudWlan,
      neighbor_type: NeighborType::CloudNbr,
      sig_strength: 200,
      packets_received: 0,
      packets_lost: 0,
      data_packets_received: 0,
      data_packets_lost: 0,
      ping_packets_received: 0,
      ping_packets_lost: 0,
    }
  }

  #[test]
  fn round_trips_through_speedy() {
    let beacon = StpBeacon {
      origin: MacAddress([1, 2, 3, 4, 5, 6]),
      orig_seq: 9,
      weakest_link: 50,
      tweak_db: Some(1011),
      status: vec![sample_row(MacAddress([6, 5, 4, 3, 2, 1]))],
    };
    let bytes = beacon.write_to_vec().unwrap();
    let back = StpBeacon::read_from_buffer(&bytes).unwrap();
    assert_eq!(back, beacon);
  }
}
