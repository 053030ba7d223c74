// Body shared by every message that requests or grants a lock on the
// logical arc between two boxes: `STP-ADD-REQ`, `STP-ADDED-CHANGED-REQ`,
// `STP-DELETE-REQ`, `LOCK-REQ-OLD`, `LOCK-REQ-NEW`.

use speedy::{Readable, Writable};

use crate::mac::MacAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Readable, Writable)]
pub struct LockMessage {
  pub originator: MacAddress,
  pub node_1: MacAddress,
  pub node_2: MacAddress,
}
