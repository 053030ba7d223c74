// One row of a beacon's status array (spec.md §3, "Status record"):
// describes either a local interface, an STP neighbor, a directly-heard
// neighbor, or (optionally) an owned ad-hoc client.

use num_derive::{FromPrimitive, ToPrimitive};
use speedy::{Readable, Writable};

use crate::mac::MacAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Readable, Writable)]
#[repr(u8)]
pub enum DeviceKind {
  Wds = 0,
  AdHoc = 1,
  Wlan = 2,
  CloudWlan = 3,
  WlanMon = 4,
  Eth = 5,
  CloudEth = 6,
  CloudWds = 7,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Readable, Writable)]
#[repr(u8)]
pub enum NeighborType {
  Unknown = 0,
  CloudNbr = 1,
  CloudNonNbr = 2,
  NonCloudClient = 3,
  NonCloudNonClient = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Readable, Writable)]
pub struct StatusRecord {
  pub name: MacAddress,
  pub device_kind: DeviceKind,
  pub neighbor_type: NeighborType,
  pub sig_strength: u8,
  pub packets_received: u32,
  pub packets_lost: u32,
  pub data_packets_received: u32,
  pub data_packets_lost: u32,
  pub ping_packets_received: u32,
  pub ping_packets_lost: u32,
}
