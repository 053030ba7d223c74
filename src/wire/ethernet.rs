// Layer-2 envelope: every frame this daemon sends or accepts is an Ethernet
// frame whose EtherType selects the subsystem (spec.md §6). Raw framing
// itself is out of scope (the `Transport` trait owns it); this module only
// knows how to read/write the header bytes that sit in front of our own
// payloads.

use speedy::{Readable, Writable};
use static_assertions::const_assert_eq;

use crate::mac::MacAddress;

/// Control-plane protocol: beacons, locks, tree mutation, ad-hoc arbitration.
pub const CLOUD_MSG: u16 = 0x2983;
/// Wired-discovery beacon, used to populate the eth-beacons neighbor source.
pub const ETH_BCN_MSG: u16 = 0x2984;
/// Link-level remote shell / file transfer. Out of scope; token reserved.
pub const LL_SHELL_MSG: u16 = 0x2985;
/// Wrapped client payload being carried across the mesh.
pub const WRAPPED_CLIENT_MSG: u16 = 0x2986;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Readable, Writable)]
pub struct EthernetHeader {
  pub destination: MacAddress,
  pub source: MacAddress,
  pub ether_type: u16,
}

impl EthernetHeader {
  pub const ENCODED_LEN: usize = 6 + 6 + 2;

  pub fn new(destination: MacAddress, source: MacAddress, ether_type: u16) -> Self {
    EthernetHeader { destination, source, ether_type }
  }
}

const_assert_eq!(EthernetHeader::ENCODED_LEN, 14);

#[cfg(test)]
mod tests {
  use super::*;
  use speedy::{Readable, Writable};

  #[test]
  fn encodes_to_the_fixed_fourteen_byte_header() {
    let hdr = EthernetHeader::new(MacAddress::BROADCAST, MacAddress::ZERO, CLOUD_MSG);
    let bytes = hdr.write_to_vec().unwrap();
    assert_eq!(bytes.len(), EthernetHeader::ENCODED_LEN);
    let back = EthernetHeader::read_from_buffer(&bytes).unwrap();
    assert_eq!(back, hdr);
  }
}
