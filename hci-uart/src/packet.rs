//! HCI packet types and the HCI packet sizer.
//!
//! The upper layer exchanges [`Packet`]s with the transport: a payload tagged with its
//! [`PacketType`]. The same type values are used for the 4-bit BCSP packet type field and the H4
//! type prefix byte, plus two values (`Ack` and `LinkControl`) that only exist inside the BCSP
//! layer and must never reach the upper consumer.
//!
//! # Packet sizer
//!
//! H4 has no delimiters, so a receiver learns where a packet ends by looking at its HCI header.
//! [`expected_len`] does that from a small per-type table:
//!
//! ```notrust
//! Type      Header  Length field        Mask
//! Command   3       offset 2, 1 byte    0xff
//! ACL       4       offset 2, 2 bytes   0xffff
//! SCO       3       offset 2, 1 byte    0xff
//! Event     2       offset 1, 1 byte    0xff
//! ISO       4       offset 2, 2 bytes   0x3fff
//! ```

use crate::{bytes::ByteReader, frame::Frame};
use core::fmt;

enum_with_unknown! {
    /// Packet type tags.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub enum PacketType(u8) {
        /// Acknowledgement-only BCSP frame without payload.
        Ack = 0,
        /// HCI command.
        Command = 1,
        /// HCI ACL data.
        AclData = 2,
        /// HCI synchronous (SCO) data.
        ScoData = 3,
        /// HCI event.
        Event = 4,
        /// HCI isochronous data.
        IsoData = 5,
        /// Vendor-specific packet.
        Vendor = 14,
        /// BCSP link establishment and power management.
        LinkControl = 15,
    }
}

impl PacketType {
    /// Returns whether packets of this type are sent over the reliable channel.
    pub fn is_reliable(&self) -> bool {
        match self {
            PacketType::Command | PacketType::AclData | PacketType::IsoData | PacketType::Vendor => {
                true
            }
            _ => false,
        }
    }

    /// Returns whether this type is private to the BCSP layer.
    pub fn is_internal(&self) -> bool {
        match self {
            PacketType::Ack | PacketType::LinkControl => true,
            _ => false,
        }
    }

    /// Returns the layout of this type's HCI header, if it has one.
    fn header_layout(&self) -> Option<HeaderLayout> {
        let (header_len, len_offset, len_width, len_mask) = match self {
            PacketType::Command => (3, 2, 1, 0xff),
            PacketType::AclData => (4, 2, 2, 0xffff),
            PacketType::ScoData => (3, 2, 1, 0xff),
            PacketType::Event => (2, 1, 1, 0xff),
            PacketType::IsoData => (4, 2, 2, 0x3fff),
            _ => return None,
        };

        Some(HeaderLayout {
            header_len,
            len_offset,
            len_width,
            len_mask,
        })
    }
}

struct HeaderLayout {
    header_len: usize,
    len_offset: usize,
    len_width: usize,
    len_mask: u16,
}

/// Reasons why [`expected_len`] could not compute a packet length.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SizeError {
    /// Fewer than `needed` header bytes are available.
    Insufficient { needed: usize },

    /// The type has no known HCI header layout.
    UnknownType(u8),
}

/// Computes the total length of an HCI packet (header and payload, without any type prefix) from
/// its header.
///
/// `header` may contain more bytes than the header; only the header is inspected.
pub fn expected_len(ty: PacketType, header: &[u8]) -> Result<usize, SizeError> {
    let layout = ty
        .header_layout()
        .ok_or_else(|| SizeError::UnknownType(ty.into()))?;
    if header.len() < layout.header_len {
        return Err(SizeError::Insufficient {
            needed: layout.header_len,
        });
    }

    // Can't fail: the length field is always inside the header.
    let mut bytes = ByteReader::new(&header[layout.len_offset..layout.header_len]);
    let raw = match layout.len_width {
        1 => bytes.read_u8().map(u16::from),
        _ => bytes.read_u16_le(),
    }
    .map_err(|_| SizeError::Insufficient {
        needed: layout.header_len,
    })?;

    Ok(layout.header_len + usize::from(raw & layout.len_mask))
}

/// Like [`expected_len`], but for H4-framed data that starts with the type byte.
///
/// The result includes the type byte.
pub fn expected_h4_len(data: &[u8]) -> Result<usize, SizeError> {
    match data.split_first() {
        None => Err(SizeError::Insufficient { needed: 1 }),
        Some((&ty, header)) => expected_len(PacketType::from(ty), header)
            .map(|len| len + 1)
            .map_err(|e| match e {
                SizeError::Insufficient { needed } => SizeError::Insufficient { needed: needed + 1 },
                other => other,
            }),
    }
}

/// A tagged HCI packet, as exchanged with the upper layer.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    /// The packet type.
    pub ty: PacketType,
    /// The packet contents (HCI header and payload).
    pub data: Frame,
}

impl Packet {
    /// Creates a packet by copying `data`.
    pub fn new(ty: PacketType, data: &[u8]) -> Self {
        Self {
            ty,
            data: Frame::from_slice(data),
        }
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {:?}", self.ty, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acl_length() {
        assert_eq!(
            expected_len(PacketType::AclData, &[0x02, 0x00, 0x05, 0x00]),
            Ok(9)
        );
        assert_eq!(
            expected_len(PacketType::AclData, &[0x02, 0x00, 0x05]),
            Err(SizeError::Insufficient { needed: 4 })
        );
    }

    #[test]
    fn iso_length_is_masked() {
        // Upper two bits of the ISO length field are reserved.
        assert_eq!(
            expected_len(PacketType::IsoData, &[0x01, 0x00, 0x10, 0xc0]),
            Ok(4 + 0x10)
        );
    }

    #[test]
    fn command_and_event() {
        // HCI_Reset
        assert_eq!(expected_len(PacketType::Command, &[0x03, 0x0c, 0x00]), Ok(3));
        // Command Complete, 4 parameter bytes
        assert_eq!(expected_len(PacketType::Event, &[0x0e, 0x04]), Ok(6));
        assert_eq!(expected_len(PacketType::ScoData, &[0x01, 0x00, 0x30]), Ok(51));
    }

    #[test]
    fn unknown_type() {
        assert_eq!(
            expected_len(PacketType::Vendor, &[0; 8]),
            Err(SizeError::UnknownType(14))
        );
        assert_eq!(expected_h4_len(&[0x42, 0, 0]), Err(SizeError::UnknownType(0x42)));
    }

    #[test]
    fn h4_length() {
        assert_eq!(expected_h4_len(&[]), Err(SizeError::Insufficient { needed: 1 }));
        assert_eq!(
            expected_h4_len(&[0x04, 0x0e]),
            Err(SizeError::Insufficient { needed: 3 })
        );
        assert_eq!(expected_h4_len(&[0x04, 0x0e, 0x04]), Ok(7));
    }

    #[test]
    fn reliability() {
        assert!(PacketType::Command.is_reliable());
        assert!(PacketType::AclData.is_reliable());
        assert!(PacketType::IsoData.is_reliable());
        assert!(PacketType::Vendor.is_reliable());
        assert!(!PacketType::ScoData.is_reliable());
        assert!(!PacketType::Event.is_reliable());
        assert!(!PacketType::LinkControl.is_reliable());
        assert!(PacketType::LinkControl.is_internal());
        assert!(PacketType::Ack.is_internal());
        assert_eq!(PacketType::from(7), PacketType::Unknown(7));
    }
}
