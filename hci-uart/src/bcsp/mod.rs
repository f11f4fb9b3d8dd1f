//! BlueCore Serial Protocol (three-wire UART transport).
//!
//! BCSP adds a 4-byte header and an optional 16-bit CRC to every HCI packet, and runs a sliding
//! window retransmission scheme for the packet types that need to arrive reliably. The resulting
//! packets are SLIP-framed before they hit the wire.
//!
//! This module contains the packet codec ([`pack`] and [`unpack`]). The retransmission queues live
//! in [`arq`], the link establishment and low-power state machines in [`link`], and the link
//! control messages they exchange in [`control`].
//!
//! [`arq`]: arq/index.html
//! [`link`]: link/index.html
//! [`control`]: control/index.html

pub mod arq;
pub mod control;
mod header;
pub mod link;
mod seq_num;

pub use self::header::Header;
pub use self::seq_num::SeqNum;

use crate::{bytes::FromBytes, crc::bcsp_crc, frame::Frame, packet::PacketType, Error};
use byteorder::{BigEndian, ByteOrder};

/// Largest payload a BCSP packet can carry (12-bit length field).
pub const MAX_PAYLOAD_LEN: usize = 0xfff;

/// Size of the CRC trailer.
pub const CRC_LEN: usize = 2;

/// Largest BCSP packet, header and CRC included.
pub const MAX_PACKET_LEN: usize = Header::SIZE + MAX_PAYLOAD_LEN + CRC_LEN;

/// Builds a BCSP packet around `payload`.
///
/// `seq` is only used for reliable packet types; everything else is sent with a sequence number
/// and reliable flag of 0. `ack` is always transmitted. Acknowledgement and link control packets
/// never carry a CRC, regardless of `use_crc`.
///
/// # Panics
///
/// Panics if `payload` is longer than [`MAX_PAYLOAD_LEN`].
///
/// [`MAX_PAYLOAD_LEN`]: constant.MAX_PAYLOAD_LEN.html
pub fn pack(mut payload: Frame, ty: PacketType, seq: SeqNum, ack: SeqNum, use_crc: bool) -> Frame {
    assert!(
        payload.len() <= MAX_PAYLOAD_LEN,
        "BCSP payload too long ({} bytes)",
        payload.len()
    );

    let reliable = ty.is_reliable();
    let crc_present = use_crc && !ty.is_internal();
    let header = Header {
        seq: if reliable { seq } else { SeqNum::ZERO },
        ack,
        crc_present,
        reliable,
        ty,
        length: payload.len() as u16,
    };

    payload.push_front(&header.to_bytes());
    if crc_present {
        let mut crc = [0; CRC_LEN];
        BigEndian::write_u16(&mut crc, bcsp_crc(&payload));
        payload.push_back(&crc);
    }

    payload
}

/// Validates a received BCSP packet and splits it into header and payload.
///
/// Checks are done in order of cost: header checksum, then the payload length against the frame
/// length, then the CRC.
pub fn unpack(mut frame: Frame) -> Result<(Header, Frame), Error> {
    if frame.len() < Header::SIZE {
        return Err(Error::InvalidLength);
    }
    let header = Header::from_slice(&frame[..Header::SIZE])?;

    let trailer = if header.crc_present { CRC_LEN } else { 0 };
    let expected = Header::SIZE + usize::from(header.length) + trailer;
    if frame.len() < expected {
        return Err(Error::InvalidLength);
    }
    if frame.len() > expected {
        warn!(
            "BCSP: overrun, got {} bytes but header says {}",
            frame.len(),
            expected
        );
        return Err(Error::Overrun);
    }

    if header.crc_present {
        let body = expected - CRC_LEN;
        let received = BigEndian::read_u16(&frame[body..]);
        let computed = bcsp_crc(&frame[..body]);
        if received != computed {
            return Err(Error::Crc);
        }
        frame.truncate_back(CRC_LEN)?;
    }

    frame.pull_front(Header::SIZE)?;
    Ok((header, frame))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(payload: &[u8], ty: PacketType, use_crc: bool) -> Frame {
        pack(
            Frame::from_slice(payload),
            ty,
            SeqNum::new(3),
            SeqNum::new(6),
            use_crc,
        )
    }

    #[test]
    fn reliable_with_crc() {
        let frame = packed(&[0x03, 0x0c, 0x00], PacketType::Command, true);
        assert_eq!(frame.len(), Header::SIZE + 3 + CRC_LEN);

        let (header, payload) = unpack(frame).unwrap();
        assert_eq!(header.seq, SeqNum::new(3));
        assert_eq!(header.ack, SeqNum::new(6));
        assert!(header.reliable);
        assert!(header.crc_present);
        assert_eq!(header.ty, PacketType::Command);
        assert_eq!(payload.as_slice(), &[0x03, 0x0c, 0x00]);
    }

    #[test]
    fn unreliable_has_no_seq() {
        let (header, _) = unpack(packed(&[0x0e, 0x00], PacketType::Event, true)).unwrap();
        assert_eq!(header.seq, SeqNum::ZERO);
        assert!(!header.reliable);
        assert!(header.crc_present);
    }

    #[test]
    fn control_never_has_crc() {
        let frame = packed(&[0x01, 0x7e], PacketType::LinkControl, true);
        assert_eq!(frame.as_slice(), &[0x30, 0x2f, 0x00, 0xa0, 0x01, 0x7e]);

        let ack = packed(&[], PacketType::Ack, true);
        assert_eq!(ack.len(), Header::SIZE);
        let (header, payload) = unpack(ack).unwrap();
        assert!(!header.crc_present);
        assert!(payload.is_empty());
    }

    #[test]
    fn length_mismatch() {
        let mut frame = packed(&[1, 2, 3], PacketType::AclData, false);
        frame.push_back(&[4]);
        assert_eq!(unpack(frame), Err(Error::Overrun));

        let mut frame = packed(&[1, 2, 3], PacketType::AclData, false);
        frame.truncate_back(1).unwrap();
        assert_eq!(unpack(frame), Err(Error::InvalidLength));

        assert_eq!(unpack(Frame::from_slice(&[0, 0])), Err(Error::InvalidLength));
    }

    #[test]
    fn corruption() {
        let good = packed(&[0x02, 0x00, 0x01, 0x00, 0xaa], PacketType::AclData, true);

        let mut bad_crc = good.clone();
        let last = bad_crc.len() - 1;
        bad_crc[last] ^= 0x01;
        assert_eq!(unpack(bad_crc), Err(Error::Crc));

        let mut bad_payload = good.clone();
        bad_payload[Header::SIZE + 4] ^= 0x80;
        assert_eq!(unpack(bad_payload), Err(Error::Crc));

        let mut bad_header = good;
        bad_header[1] ^= 0x01;
        assert_eq!(unpack(bad_header), Err(Error::Checksum));
    }
}
