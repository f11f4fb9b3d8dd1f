//! H4 (UART) framing.
//!
//! H4 prefixes each HCI packet with its one-byte type and nothing else: no delimiters, no
//! checksums, no retransmissions. The receiver finds the end of each packet with the HCI packet
//! sizer.

use crate::{
    chain::{Io, Layer, Request},
    frame::Frame,
    packet::{expected_h4_len, Packet, PacketType, SizeError},
    Error,
};
use alloc::vec::Vec;

/// Chain layer translating between packets and an H4 byte stream.
#[derive(Default)]
pub struct H4Layer {
    buf: Vec<u8>,
}

impl H4Layer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of buffered bytes of an incomplete packet.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl Layer for H4Layer {
    fn name(&self) -> &'static str {
        "h4"
    }

    fn send_frame(&mut self, packet: Packet, io: &mut Io) -> Result<(), Error> {
        if packet.ty.is_internal() {
            return Err(Error::InvalidValue);
        }

        let mut data = packet.data;
        data.push_front(&[u8::from(packet.ty)]);
        trace_frame!("H4->", data);
        io.forward_bytes(data);
        Ok(())
    }

    fn receive_bytes(&mut self, bytes: &[u8], io: &mut Io) -> usize {
        self.buf.extend_from_slice(bytes);

        loop {
            match expected_h4_len(&self.buf) {
                Ok(len) if self.buf.len() >= len => {
                    trace_frame!("H4<-", self.buf[..len]);
                    let ty = PacketType::from(self.buf[0]);
                    let packet = Packet {
                        ty,
                        data: Frame::from_slice(&self.buf[1..len]),
                    };
                    self.buf.drain(..len);
                    io.deliver_frame(packet);
                }
                Ok(_) | Err(SizeError::Insufficient { .. }) => break,
                Err(SizeError::UnknownType(ty)) => {
                    warn!("H4: unknown packet type {:#04x}, skipping byte", ty);
                    self.buf.remove(0);
                }
            }
        }

        bytes.len()
    }

    fn configure(&mut self, request: Request, _io: &mut Io) -> Result<(), Error> {
        if request == Request::Purge {
            self.buf.clear();
        }
        Ok(())
    }
}
