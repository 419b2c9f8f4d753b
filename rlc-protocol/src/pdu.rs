//! AM PDU Structures and Serialization
//!
//! An AM PDU is either a data fragment carrying a slice of one SDU, or one of
//! three control PDUs: a cumulative/selective acknowledgment, a Move Receiving
//! Window (MRW) command, or the MRW acknowledgment. The wire layout is the
//! logical field-by-field contract: a kind byte followed by the fields, with
//! the ack bitmap bit-packed and the payload length-prefixed.

use crate::sequence::SeqNumber;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// PDU kind discriminators (first byte on the wire)
const KIND_DATA: u8 = 0;
const KIND_ACK: u8 = 1;
const KIND_MRW: u8 = 2;
const KIND_MRW_ACK: u8 = 3;

/// Data PDU: one fragment of an SDU
///
/// `first_sn..=last_sn` is the fragment-sequence range spanned by the parent
/// SDU; `seq` is this fragment's position inside it. The framing predicates
/// below are what the reassembly and discard-cascade logic tests, since they
/// stay valid under window renumbering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPdu {
    /// Position in the per-connection fragment sequence
    pub seq: SeqNumber,
    /// Sequence number of the parent SDU's first fragment
    pub first_sn: SeqNumber,
    /// Sequence number of the parent SDU's last fragment
    pub last_sn: SeqNumber,
    /// Main sequence number of the parent SDU (shared by all its fragments)
    pub sdu_seq: u32,
    /// Number of transmissions already performed for this fragment
    pub retx_count: u32,
    /// Fragment payload
    pub payload: Bytes,
}

impl DataPdu {
    pub fn new(
        seq: SeqNumber,
        first_sn: SeqNumber,
        last_sn: SeqNumber,
        sdu_seq: u32,
        payload: Bytes,
    ) -> Self {
        debug_assert!(first_sn <= seq && seq <= last_sn);
        DataPdu {
            seq,
            first_sn,
            last_sn,
            sdu_seq,
            retx_count: 0,
            payload,
        }
    }

    /// First fragment of its SDU
    #[inline]
    pub fn is_first(&self) -> bool {
        self.seq == self.first_sn
    }

    /// Last fragment of its SDU
    #[inline]
    pub fn is_last(&self) -> bool {
        self.seq == self.last_sn
    }

    /// The SDU fits in this single fragment
    #[inline]
    pub fn is_whole(&self) -> bool {
        self.first_sn == self.last_sn
    }

    /// Neither first nor last
    #[inline]
    pub fn is_middle(&self) -> bool {
        !self.is_first() && !self.is_last()
    }

    /// Number of fragments the parent SDU spans
    pub fn total_fragments(&self) -> u32 {
        (self.last_sn - self.first_sn) as u32 + 1
    }

    /// Serialize to bytes (without the kind byte)
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.seq.as_raw());
        buf.put_u32(self.first_sn.as_raw());
        buf.put_u32(self.last_sn.as_raw());
        buf.put_u32(self.sdu_seq);
        buf.put_u32(self.retx_count);
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    fn decode(mut buf: &[u8]) -> Result<Self, PduError> {
        if buf.len() < 24 {
            return Err(PduError::InsufficientData {
                expected: 24,
                actual: buf.len(),
            });
        }
        let seq = SeqNumber::new(buf.get_u32());
        let first_sn = SeqNumber::new(buf.get_u32());
        let last_sn = SeqNumber::new(buf.get_u32());
        let sdu_seq = buf.get_u32();
        let retx_count = buf.get_u32();
        let payload_len = buf.get_u32() as usize;
        if buf.remaining() < payload_len {
            return Err(PduError::InsufficientData {
                expected: payload_len,
                actual: buf.remaining(),
            });
        }
        if !(first_sn <= seq && seq <= last_sn) {
            return Err(PduError::InvalidFragmentRange {
                seq: seq.as_raw(),
                first: first_sn.as_raw(),
                last: last_sn.as_raw(),
            });
        }
        Ok(DataPdu {
            seq,
            first_sn,
            last_sn,
            sdu_seq,
            retx_count,
            payload: Bytes::copy_from_slice(&buf[..payload_len]),
        })
    }
}

/// Control PDU: acknowledgment and window-advancement handshake messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPdu {
    /// Cumulative + selective acknowledgment.
    ///
    /// `cumulative` acknowledges every fragment up to and including it;
    /// `None` means the report carries no cumulative part (nothing below the
    /// first hole). `bitmap` is anchored at `first_sn` and acknowledges
    /// individual fragments beyond the cumulative point.
    Ack {
        cumulative: Option<SeqNumber>,
        first_sn: SeqNumber,
        bitmap: Vec<bool>,
    },
    /// Move Receiving Window: the sender asks the receiver to advance its
    /// window so that `new_first_sn` becomes the first sequence number.
    MoveWindow {
        mrw_seq: u32,
        new_first_sn: SeqNumber,
    },
    /// Acknowledgment of a MoveWindow command; `new_first_sn` is the
    /// receiver's window start after applying the shift.
    MoveWindowAck {
        mrw_seq: u32,
        new_first_sn: SeqNumber,
    },
}

impl ControlPdu {
    fn kind(&self) -> u8 {
        match self {
            ControlPdu::Ack { .. } => KIND_ACK,
            ControlPdu::MoveWindow { .. } => KIND_MRW,
            ControlPdu::MoveWindowAck { .. } => KIND_MRW_ACK,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            ControlPdu::Ack {
                cumulative,
                first_sn,
                bitmap,
            } => {
                match cumulative {
                    Some(sn) => {
                        buf.put_u8(1);
                        buf.put_u32(sn.as_raw());
                    }
                    None => {
                        buf.put_u8(0);
                        buf.put_u32(0);
                    }
                }
                buf.put_u32(first_sn.as_raw());
                buf.put_u16(bitmap.len() as u16);
                // bit-pack, MSB first
                let mut byte = 0u8;
                for (i, bit) in bitmap.iter().enumerate() {
                    if *bit {
                        byte |= 0x80 >> (i % 8);
                    }
                    if i % 8 == 7 {
                        buf.put_u8(byte);
                        byte = 0;
                    }
                }
                if bitmap.len() % 8 != 0 {
                    buf.put_u8(byte);
                }
            }
            ControlPdu::MoveWindow {
                mrw_seq,
                new_first_sn,
            }
            | ControlPdu::MoveWindowAck {
                mrw_seq,
                new_first_sn,
            } => {
                buf.put_u32(*mrw_seq);
                buf.put_u32(new_first_sn.as_raw());
            }
        }
    }

    fn decode(kind: u8, mut buf: &[u8]) -> Result<Self, PduError> {
        match kind {
            KIND_ACK => {
                if buf.len() < 11 {
                    return Err(PduError::InsufficientData {
                        expected: 11,
                        actual: buf.len(),
                    });
                }
                let has_cumulative = buf.get_u8() != 0;
                let raw_cumulative = buf.get_u32();
                let cumulative = has_cumulative.then(|| SeqNumber::new(raw_cumulative));
                let first_sn = SeqNumber::new(buf.get_u32());
                let bits = buf.get_u16() as usize;
                let bytes_needed = (bits + 7) / 8;
                if buf.remaining() < bytes_needed {
                    return Err(PduError::InsufficientData {
                        expected: bytes_needed,
                        actual: buf.remaining(),
                    });
                }
                let mut bitmap = Vec::with_capacity(bits);
                for i in 0..bits {
                    let byte = buf[i / 8];
                    bitmap.push(byte & (0x80 >> (i % 8)) != 0);
                }
                Ok(ControlPdu::Ack {
                    cumulative,
                    first_sn,
                    bitmap,
                })
            }
            KIND_MRW | KIND_MRW_ACK => {
                if buf.len() < 8 {
                    return Err(PduError::InsufficientData {
                        expected: 8,
                        actual: buf.len(),
                    });
                }
                let mrw_seq = buf.get_u32();
                let new_first_sn = SeqNumber::new(buf.get_u32());
                if kind == KIND_MRW {
                    Ok(ControlPdu::MoveWindow {
                        mrw_seq,
                        new_first_sn,
                    })
                } else {
                    Ok(ControlPdu::MoveWindowAck {
                        mrw_seq,
                        new_first_sn,
                    })
                }
            }
            other => Err(PduError::UnknownKind(other)),
        }
    }
}

/// Unified PDU type (data fragment or control message)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AmPdu {
    Data(DataPdu),
    Control(ControlPdu),
}

impl AmPdu {
    pub fn is_data(&self) -> bool {
        matches!(self, AmPdu::Data(_))
    }

    pub fn is_control(&self) -> bool {
        matches!(self, AmPdu::Control(_))
    }

    /// Serialize the PDU to bytes
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        match self {
            AmPdu::Data(pdu) => {
                buf.put_u8(KIND_DATA);
                pdu.encode(&mut buf);
            }
            AmPdu::Control(pdu) => {
                buf.put_u8(pdu.kind());
                pdu.encode(&mut buf);
            }
        }
        buf
    }

    /// Parse a PDU from bytes (kind byte selects the variant)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PduError> {
        let (&kind, rest) = bytes.split_first().ok_or(PduError::InsufficientData {
            expected: 1,
            actual: 0,
        })?;
        if kind == KIND_DATA {
            Ok(AmPdu::Data(DataPdu::decode(rest)?))
        } else {
            Ok(AmPdu::Control(ControlPdu::decode(kind, rest)?))
        }
    }
}

impl From<DataPdu> for AmPdu {
    fn from(pdu: DataPdu) -> Self {
        AmPdu::Data(pdu)
    }
}

impl From<ControlPdu> for AmPdu {
    fn from(pdu: ControlPdu) -> Self {
        AmPdu::Control(pdu)
    }
}

/// PDU parsing and validation errors
#[derive(Error, Debug)]
pub enum PduError {
    #[error("Insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("Unknown PDU kind: {0}")]
    UnknownKind(u8),

    #[error("Fragment {seq} outside its SDU range [{first}, {last}]")]
    InvalidFragmentRange { seq: u32, first: u32, last: u32 },
}
