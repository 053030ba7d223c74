// Broadcast-suppression notice (spec.md §4.7): names the owning box and the
// ad-hoc client whose broadcasts are about to be (or were) forwarded, so
// recipients can install/clear a filtering lock.

use speedy::{Readable, Writable};

use crate::mac::MacAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Readable, Writable)]
pub struct BcastNotice {
  pub owner: MacAddress,
  pub client: MacAddress,
}
