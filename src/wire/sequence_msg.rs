// The optional lock-step flow-control pair (spec.md §4.8, "off by default").
// `SEQUENCE` precedes a payload and must be answered with `ACK-SEQUENCE`
// carrying the same `(send_seq, message_len)` before the next send proceeds.

use speedy::{Readable, Writable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Readable, Writable)]
pub struct SequenceInfo {
  pub send_seq: u16,
  pub message_len: u16,
}
