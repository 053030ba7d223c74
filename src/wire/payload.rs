// Wrapped-client payload frame (spec.md §4.8), carried under EtherType
// `WRAPPED_CLIENT_MSG`. `(k, n)` is "piece k of n"; for MTU reasons `n` is
// at most 2.

use bytes::Bytes;
use speedy::{Context, Readable, Reader, Writable, Writer};

use crate::mac::MacAddress;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadMessage {
  pub k: u8,
  pub n: u8,
  pub originator: MacAddress,
  pub originator_seq: u16,
  pub body: Bytes,
}

impl PayloadMessage {
  pub fn is_fragment(&self) -> bool {
    self.n > 1
  }

  pub fn is_final_piece(&self) -> bool {
    self.k == self.n
  }
}

impl<'a, C: Context> Readable<'a, C> for PayloadMessage {
  fn read_from<R: Reader<'a, C>>(reader: &mut R) -> Result<Self, C::Error> {
    let k = reader.read_u8()?;
    let n = reader.read_u8()?;
    let originator = MacAddress::read_from(reader)?;
    let originator_seq = reader.read_u16()?;
    let body_len = reader.read_u32()? as usize;
    let mut body = vec![0u8; body_len];
    reader.read_bytes(&mut body)?;
    Ok(PayloadMessage { k, n, originator, originator_seq, body: Bytes::from(body) })
  }
}

impl<C: Context> Writable<C> for PayloadMessage {
  fn write_to<W: ?Sized + Writer<C>>(&self, writer: &mut W) -> Result<(), C::Error> {
    writer.write_u8(self.k)?;
    writer.write_u8(self.n)?;
    self.originator.write_to(writer)?;
    writer.write_u16(self.originator_seq)?;
    writer.write_u32(self.body.len() as u32)?;
    writer.write_bytes(&self.body)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_a_single_piece_frame() {
    let msg = PayloadMessage {
      k: 1,
      n: 1,
      originator: MacAddress([1, 1, 1, 1, 1, 1]),
      originator_seq: 42,
      body: Bytes::from_static(b"hello mesh"),
    };
    let bytes = msg.write_to_vec().unwrap();
    let back = PayloadMessage::read_from_buffer(&bytes).unwrap();
    assert_eq!(back, msg);
    assert!(!back.is_fragment());
  }

  #[test]
  fn recognizes_fragment_pieces() {
    let first = PayloadMessage {
      k: 1,
      n: 2,
      originator: MacAddress::ZERO,
      originator_seq: 1,
      body: Bytes::from_static(b"part-a"),
    };
    assert!(first.is_fragment());
    assert!(!first.is_final_piece());
  }
}
