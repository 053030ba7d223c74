// Closed set of control message discriminators. Value 1 is intentionally
// unused, in case a future build needs to interoperate with a wire format
// that reserves it.

use num_derive::{FromPrimitive, ToPrimitive};
use speedy::{Readable, Writable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Readable, Writable)]
#[repr(u8)]
pub enum MessageType {
  Unknown = 0,
  LocalLockGrant = 2,
  LocalLockDeny = 3,
  LocalDeleteRelease = 4,
  LocalAddRelease = 5,
  LocalLockRelease = 6,
  StpBeacon = 7,
  StpBeaconRecv = 8,
  NonlocalLockReq = 9,
  NonlocalLockGrant = 10,
  NonlocalLockDeny = 11,
  NonlocalDeleteRelease = 12,
  NonlocalAddRelease = 13,
  Ping = 14,
  PingResponse = 15,
  LocalLockReqNew = 16,
  LocalLockReqOld = 17,
  StpArcDelete = 18,
  Sequence = 19,
  AckSequence = 20,
  LocalStpAddRequest = 21,
  LocalStpAdded = 22,
  LocalStpAddChangedRequest = 23,
  LocalStpAddedChanged = 24,
  LocalStpDeleteRequest = 25,
  LocalStpDeleted = 26,
  LocalStpRefused = 27,
  StpBeaconNak = 28,
  AdHocBcastBlock = 29,
  AdHocBcastUnblock = 30,
  ScanResults = 31,
  ParmChangeStart = 32,
  ParmChangeReady = 33,
  ParmChangeNotReady = 34,
  ParmChangeGo = 35,
}

#[cfg(test)]
mod tests {
  use super::*;
  use num_traits::{FromPrimitive, ToPrimitive};

  #[test]
  fn discriminants_match_original_wire_numbers() {
    assert_eq!(MessageType::Unknown.to_u8(), Some(0));
    assert_eq!(MessageType::StpBeacon.to_u8(), Some(7));
    assert_eq!(MessageType::ParmChangeGo.to_u8(), Some(35));
    assert_eq!(MessageType::from_u8(1), None);
    assert_eq!(MessageType::from_u8(21), Some(MessageType::LocalStpAddRequest));
  }
}
