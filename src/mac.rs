// The "one true name" of a box, and the wire representation of any other
// participant address (station MACs, Ethernet MACs). Six bytes, as on the
// original hardware; no vendor OUI validation is attempted anywhere in this
// crate.

use std::fmt;

use speedy::{Readable, Writable};

/// A 48-bit hardware address, used both as a box's own identity and as the
/// address of an ad-hoc client station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Readable, Writable)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
  pub const BROADCAST: MacAddress = MacAddress([0xff; 6]);
  pub const ZERO: MacAddress = MacAddress([0; 6]);

  pub fn is_broadcast(&self) -> bool {
    *self == Self::BROADCAST
  }

  pub fn from_bytes(bytes: &[u8]) -> Option<MacAddress> {
    <[u8; 6]>::try_from(bytes).ok().map(MacAddress)
  }
}

impl fmt::Display for MacAddress {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let [a, b, c, d, e, g] = self.0;
    write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
  }
}

impl std::str::FromStr for MacAddress {
  type Err = MacParseError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut out = [0u8; 6];
    let mut parts = s.split(':');
    for slot in out.iter_mut() {
      let part = parts.next().ok_or(MacParseError)?;
      *slot = u8::from_str_radix(part, 16).map_err(|_| MacParseError)?;
    }
    if parts.next().is_some() {
      return Err(MacParseError);
    }
    Ok(MacAddress(out))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacParseError;

impl fmt::Display for MacParseError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "not a colon-separated 6-byte hex MAC address")
  }
}

impl std::error::Error for MacParseError {}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_through_display_and_parse() {
    let mac = MacAddress([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    let text = mac.to_string();
    assert_eq!(text, "00:11:22:33:44:55");
    assert_eq!(text.parse::<MacAddress>().unwrap(), mac);
  }

  #[test]
  fn rejects_malformed_text() {
    assert!("not-a-mac".parse::<MacAddress>().is_err());
    assert!("00:11:22:33:44".parse::<MacAddress>().is_err());
  }

  #[test]
  fn broadcast_is_all_ones() {
    assert!(MacAddress::BROADCAST.is_broadcast());
    assert!(!MacAddress::ZERO.is_broadcast());
  }
}
