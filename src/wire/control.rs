// The control-message envelope (spec.md §6): a per-link sequence byte, the
// ultimate mesh destination name, a one-byte type discriminator, and a
// body whose shape is picked by that discriminator. The original C encodes
// this as a tagged union and derives the wire length by pointer arithmetic;
// here each variant is responsible for its own `speedy` (de)serialization
// and we record its length explicitly (REDESIGN FLAG: message decoding,
// spec.md §9) rather than reconstructing it from a C struct layout.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use speedy::{Readable, Writable};
use thiserror::Error;

use crate::mac::MacAddress;
use crate::wire::beacon::StpBeacon;
use crate::wire::bcast::BcastNotice;
use crate::wire::lock_msg::LockMessage;
use crate::wire::message_type::MessageType;
use crate::wire::sequence_msg::SequenceInfo;

#[derive(Debug, Clone, PartialEq)]
pub enum ControlBody {
  Empty,
  Lock(LockMessage),
  Beacon(StpBeacon),
  Sequence(SequenceInfo),
  Bcast(BcastNotice),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlFrame {
  pub link_seq: u8,
  pub destination: MacAddress,
  pub message_type: MessageType,
  pub body: ControlBody,
}

#[derive(Debug, Error)]
pub enum ControlDecodeError {
  #[error("truncated control frame header")]
  TruncatedHeader,
  #[error("unknown message type discriminator {0}")]
  UnknownMessageType(u8),
  #[error("body does not match message type {0:?}")]
  BodyMismatch(MessageType),
  #[error("malformed body for {0:?}: {1}")]
  BodyDecode(MessageType, String),
}

impl ControlFrame {
  pub fn new(destination: MacAddress, message_type: MessageType, body: ControlBody) -> Self {
    ControlFrame { link_seq: 0, destination, message_type, body }
  }

  pub fn encode(&self) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.push(self.link_seq);
    out.extend_from_slice(&self.destination.0);
    out.push(self.message_type.to_u8_checked());
    let body_bytes = match &self.body {
      ControlBody::Empty => Vec::new(),
      ControlBody::Lock(lock) => lock.write_to_vec().expect("lock message always encodes"),
      ControlBody::Beacon(beacon) => beacon.write_to_vec().expect("beacon always encodes"),
      ControlBody::Sequence(seq) => seq.write_to_vec().expect("sequence info always encodes"),
      ControlBody::Bcast(notice) => notice.write_to_vec().expect("bcast notice always encodes"),
    };
    out.write_u32::<BigEndian>(body_bytes.len() as u32).expect("Vec<u8> writes never fail");
    out.extend_from_slice(&body_bytes);
    out
  }

  pub fn decode(bytes: &[u8]) -> Result<Self, ControlDecodeError> {
    if bytes.len() < 1 + 6 + 1 + 4 {
      return Err(ControlDecodeError::TruncatedHeader);
    }
    let link_seq = bytes[0];
    let destination = MacAddress::from_bytes(&bytes[1..7]).ok_or(ControlDecodeError::TruncatedHeader)?;
    let type_byte = bytes[7];
    let message_type = MessageType::from_u8_checked(type_byte)
      .ok_or(ControlDecodeError::UnknownMessageType(type_byte))?;
    let len = BigEndian::read_u32(&bytes[8..12]) as usize;
    let body_bytes = bytes.get(12..12 + len).ok_or(ControlDecodeError::TruncatedHeader)?;

    let body = match message_type {
      MessageType::StpBeacon => ControlBody::Beacon(
        StpBeacon::read_from_buffer(body_bytes)
          .map_err(|e| ControlDecodeError::BodyDecode(message_type, e.to_string()))?,
      ),
      MessageType::LocalStpAddRequest
      | MessageType::LocalStpAddChangedRequest
      | MessageType::LocalStpDeleteRequest
      | MessageType::LocalLockReqNew
      | MessageType::LocalLockReqOld => ControlBody::Lock(
        LockMessage::read_from_buffer(body_bytes)
          .map_err(|e| ControlDecodeError::BodyDecode(message_type, e.to_string()))?,
      ),
      MessageType::Sequence | MessageType::AckSequence => ControlBody::Sequence(
        SequenceInfo::read_from_buffer(body_bytes)
          .map_err(|e| ControlDecodeError::BodyDecode(message_type, e.to_string()))?,
      ),
      MessageType::AdHocBcastBlock | MessageType::AdHocBcastUnblock => ControlBody::Bcast(
        BcastNotice::read_from_buffer(body_bytes)
          .map_err(|e| ControlDecodeError::BodyDecode(message_type, e.to_string()))?,
      ),
      _ => ControlBody::Empty,
    };

    Ok(ControlFrame { link_seq, destination, message_type, body })
  }
}

trait MessageTypeByteExt {
  fn to_u8_checked(&self) -> u8;
  fn from_u8_checked(byte: u8) -> Option<MessageType>;
}

impl MessageTypeByteExt for MessageType {
  fn to_u8_checked(&self) -> u8 {
    use num_traits::ToPrimitive;
    self.to_u8().expect("MessageType always fits in a byte")
  }

  fn from_u8_checked(byte: u8) -> Option<MessageType> {
    use num_traits::FromPrimitive;
    MessageType::from_u8(byte)
  }
}
