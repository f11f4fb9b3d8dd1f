//! The 4-byte BCSP packet header.

use super::SeqNum;
use crate::{bytes::*, packet::PacketType, Error};
use core::fmt;

/// Header preceding every BCSP packet.
///
/// Layout:
///
/// ```notrust
/// Byte 0 (LSb first)
/// +----------+----------+-------------+-------------+
/// |   SEQ    |   ACK    | CRC present |  Reliable   |
/// | (3 bits) | (3 bits) |   (1 bit)   |   (1 bit)   |
/// +----------+----------+-------------+-------------+
///
/// Bytes 1-2 (LSb first)
/// +----------+-----------------------+
/// |   Type   |        Length         |
/// | (4 bits) |       (12 bits)       |
/// +----------+-----------------------+
///
/// Byte 3
/// +------------------------------------+
/// |              Checksum              |
/// |  !(byte0 + byte1 + byte2) mod 256  |
/// +------------------------------------+
/// ```
///
/// `SEQ` is only meaningful for reliable packets and is 0 otherwise. `ACK` always carries the
/// sender's next expected sequence number, acknowledging everything before it. `Length` counts the
/// payload bytes only, not the header or the CRC.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Header {
    pub seq: SeqNum,
    pub ack: SeqNum,
    pub crc_present: bool,
    pub reliable: bool,
    pub ty: PacketType,
    pub length: u16,
}

impl Header {
    /// Size of the encoded header in bytes.
    pub const SIZE: usize = 4;

    /// Encodes the header, computing the checksum byte.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let b0 = self.seq.value()
            | self.ack.value() << 3
            | (self.crc_present as u8) << 6
            | (self.reliable as u8) << 7;
        let b1 = (u8::from(self.ty) & 0x0f) | ((self.length & 0x0f) as u8) << 4;
        let b2 = (self.length >> 4) as u8;
        [b0, b1, b2, checksum(b0, b1, b2)]
    }
}

fn checksum(b0: u8, b1: u8, b2: u8) -> u8 {
    !b0.wrapping_add(b1).wrapping_add(b2)
}

impl<'a> FromBytes<'a> for Header {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        let [b0, b1, b2, b3] = bytes.read_array::<[u8; 4]>()?;
        if checksum(b0, b1, b2) != b3 {
            return Err(Error::Checksum);
        }

        Ok(Header {
            seq: SeqNum::new(b0),
            ack: SeqNum::new(b0 >> 3),
            crc_present: b0 & 0x40 != 0,
            reliable: b0 & 0x80 != 0,
            ty: PacketType::from(b1 & 0x0f),
            length: u16::from(b1 >> 4) | u16::from(b2) << 4,
        })
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("SEQ", &self.seq)
            .field("ACK", &self.ack)
            .field("CRC", &self.crc_present)
            .field("REL", &self.reliable)
            .field("Type", &self.ty)
            .field("Length", &self.length)
            .finish()
    }
}
