//! SLIP byte stuffing.
//!
//! Every BCSP packet travels over the wire wrapped in a SLIP frame: a `0xC0` delimiter on each
//! side, with any delimiter or escape byte inside the packet replaced by a two-byte escape
//! sequence. When software flow control is negotiated, the XON and XOFF bytes are escaped as well
//! so that they can never appear inside a frame.
//!
//! ```notrust
//! Byte           Escaped as
//! 0xC0           0xDB 0xDC
//! 0xDB           0xDB 0xDD
//! 0x11 (XON)     0xDB 0xDE   (only with software flow control)
//! 0x13 (XOFF)    0xDB 0xDF   (only with software flow control)
//! ```
//!
//! Outbound data is encoded in one go by [`encode`]. Inbound data arrives in arbitrary fragments
//! and is reassembled by a [`Collector`] before being passed to [`decode`].

use crate::{bcsp, frame::Frame, Error, Fault};
use alloc::vec::Vec;
use core::mem;

/// Frame delimiter.
pub const DELIMITER: u8 = 0xC0;
/// Escape byte.
pub const ESCAPE: u8 = 0xDB;
/// Escaped delimiter.
pub const ESC_DELIMITER: u8 = 0xDC;
/// Escaped escape byte.
pub const ESC_ESCAPE: u8 = 0xDD;
/// Software flow control: resume.
pub const XON: u8 = 0x11;
/// Escaped XON.
pub const ESC_XON: u8 = 0xDE;
/// Software flow control: pause.
pub const XOFF: u8 = 0x13;
/// Escaped XOFF.
pub const ESC_XOFF: u8 = 0xDF;

/// The longest SLIP frame a valid BCSP packet can produce (every byte escaped, plus delimiters).
pub const MAX_FRAME_LEN: usize = 2 * bcsp::MAX_PACKET_LEN + 2;

fn escape_of(byte: u8, escape_xon_xoff: bool) -> Option<u8> {
    match byte {
        DELIMITER => Some(ESC_DELIMITER),
        ESCAPE => Some(ESC_ESCAPE),
        XON if escape_xon_xoff => Some(ESC_XON),
        XOFF if escape_xon_xoff => Some(ESC_XOFF),
        _ => None,
    }
}

fn unescape(byte: u8) -> Option<u8> {
    match byte {
        ESC_DELIMITER => Some(DELIMITER),
        ESC_ESCAPE => Some(ESCAPE),
        ESC_XON => Some(XON),
        ESC_XOFF => Some(XOFF),
        _ => None,
    }
}

/// Wraps `payload` in a SLIP frame.
pub fn encode(payload: &[u8], escape_xon_xoff: bool) -> Frame {
    let escapes = payload
        .iter()
        .filter(|&&b| escape_of(b, escape_xon_xoff).is_some())
        .count();

    let mut out = Vec::with_capacity(payload.len() + escapes + 2);
    out.push(DELIMITER);
    for &byte in payload {
        match escape_of(byte, escape_xon_xoff) {
            Some(esc) => {
                out.push(ESCAPE);
                out.push(esc);
            }
            None => out.push(byte),
        }
    }
    out.push(DELIMITER);

    Frame::from_vec(out)
}

/// Unwraps a complete SLIP frame, including both delimiters.
///
/// An escape byte followed by anything other than a known escape code is kept as-is, together with
/// its successor.
pub fn decode(raw: &[u8]) -> Result<Frame, Error> {
    let inner = match raw {
        [DELIMITER, inner @ .., DELIMITER] => inner,
        _ => return Err(Error::InvalidValue),
    };

    let mut out = Frame::with_headroom(0, 0, inner.len());
    let mut bytes = inner.iter().copied();
    while let Some(byte) = bytes.next() {
        if byte != ESCAPE {
            out.push_back(&[byte]);
            continue;
        }

        match bytes.next() {
            Some(next) => match unescape(next) {
                Some(orig) => out.push_back(&[orig]),
                None => {
                    debug!("SLIP: invalid escape {:#04x}, passing through", next);
                    out.push_back(&[ESCAPE, next]);
                }
            },
            None => {
                debug!("SLIP: trailing escape byte");
                out.push_back(&[ESCAPE]);
            }
        }
    }

    Ok(out)
}

/// Reassembles SLIP frames from a fragmented byte stream.
pub struct Collector {
    buf: Vec<u8>,
    in_frame: bool,
    complete: bool,
    max_len: usize,
    fault: Option<Fault>,
}

impl Collector {
    /// Creates a collector that drops frames longer than `max_len` raw bytes.
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::new(),
            in_frame: false,
            complete: false,
            max_len,
            fault: None,
        }
    }

    /// Scans `input` for the rest of the current frame.
    ///
    /// Returns the number of bytes consumed and whether a frame was completed. Once a frame is
    /// complete, no further bytes are consumed until it has been removed with [`take`].
    ///
    /// [`take`]: #method.take
    pub fn collect(&mut self, input: &[u8]) -> (usize, bool) {
        if self.complete {
            return (0, true);
        }

        let mut consumed = 0;
        while consumed < input.len() {
            let rest = &input[consumed..];

            if !self.in_frame {
                match rest.iter().position(|&b| b == DELIMITER) {
                    Some(pos) => {
                        if pos != 0 {
                            trace!("SLIP: skipped {} bytes before delimiter", pos);
                        }
                        consumed += pos + 1;
                        if self.append(&[DELIMITER]) {
                            self.in_frame = true;
                        }
                    }
                    None => {
                        trace!("SLIP: skipped {} bytes outside of frame", rest.len());
                        consumed = input.len();
                    }
                }
                continue;
            }

            match rest.iter().position(|&b| b == DELIMITER) {
                Some(0) if self.buf.len() == 1 => {
                    // Back-to-back delimiters: keep the frame open.
                    consumed += 1;
                }
                Some(pos) => {
                    consumed += pos + 1;
                    if self.append(&rest[..=pos]) {
                        self.in_frame = false;
                        self.complete = true;
                        return (consumed, true);
                    }
                }
                None => {
                    consumed = input.len();
                    self.append(rest);
                }
            }
        }

        (consumed, false)
    }

    /// Removes the completed raw frame, delimiters included.
    pub fn take(&mut self) -> Option<Vec<u8>> {
        if self.complete {
            self.complete = false;
            Some(mem::replace(&mut self.buf, Vec::new()))
        } else {
            None
        }
    }

    /// Returns a fault raised while collecting, if any.
    pub fn take_fault(&mut self) -> Option<Fault> {
        self.fault.take()
    }

    /// Drops any partial frame.
    pub fn reset(&mut self) {
        self.buf = Vec::new();
        self.in_frame = false;
        self.complete = false;
    }

    /// Appends to the partial frame. Returns `false` if the frame had to be dropped.
    fn append(&mut self, bytes: &[u8]) -> bool {
        if self.buf.len() + bytes.len() > self.max_len {
            warn!(
                "SLIP: frame exceeds {} bytes, dropping and resynchronizing",
                self.max_len
            );
            self.reset();
            return false;
        }

        if self.buf.try_reserve(bytes.len()).is_err() {
            error!("SLIP: could not grow receive buffer, dropping frame");
            self.reset();
            self.fault = Some(Fault::Allocation);
            return false;
        }

        self.buf.extend_from_slice(bytes);
        true
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new(MAX_FRAME_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn escapes() {
        let payload = [0x01, DELIMITER, ESCAPE, XON, XOFF, 0x02];
        assert_eq!(
            encode(&payload, false).as_slice(),
            &[0xC0, 0x01, 0xDB, 0xDC, 0xDB, 0xDD, 0x11, 0x13, 0x02, 0xC0]
        );
        assert_eq!(
            encode(&payload, true).as_slice(),
            &[0xC0, 0x01, 0xDB, 0xDC, 0xDB, 0xDD, 0xDB, 0xDE, 0xDB, 0xDF, 0x02, 0xC0]
        );
    }

    #[test]
    fn round_trip() {
        let all: Vec<u8> = (0..=255).collect();
        for &oof in &[false, true] {
            for payload in &[&[][..], &[0xC0, 0xC0][..], &[0xDB][..], &all[..]] {
                let encoded = encode(payload, oof);
                assert_eq!(decode(&encoded).unwrap().as_slice(), *payload);
            }
        }
    }

    #[test]
    fn decode_needs_delimiters() {
        assert_eq!(decode(&[0x01, 0x02, 0xC0]), Err(Error::InvalidValue));
        assert_eq!(decode(&[0xC0, 0x01]), Err(Error::InvalidValue));
        assert_eq!(decode(&[0xC0]), Err(Error::InvalidValue));
    }

    #[test]
    fn unknown_escape_is_literal() {
        assert_eq!(
            decode(&[0xC0, 0x01, 0xDB, 0x42, 0x02, 0xC0]).unwrap().as_slice(),
            &[0x01, 0xDB, 0x42, 0x02]
        );
        assert_eq!(decode(&[0xC0, 0xDB, 0xC0]).unwrap().as_slice(), &[0xDB]);
    }

    #[test]
    fn collect_fragments() {
        let mut c = Collector::default();
        assert_eq!(c.collect(&[0x55, 0x66]), (2, false));
        assert_eq!(c.collect(&[0xC0, 0x01]), (2, false));
        assert_eq!(c.collect(&[0x02, 0xC0, 0xC0, 0x03]), (3, true));
        // Nothing more is consumed until the frame is taken.
        assert_eq!(c.collect(&[0xC0, 0x03]), (0, true));
        assert_eq!(c.take(), Some(vec![0xC0, 0x01, 0x02, 0xC0]));
        assert_eq!(c.take(), None);

        assert_eq!(c.collect(&[0xC0, 0x03, 0xC0]), (3, true));
        assert_eq!(c.take(), Some(vec![0xC0, 0x03, 0xC0]));
    }

    #[test]
    fn empty_frame_is_continuation() {
        let mut c = Collector::default();
        assert_eq!(c.collect(&[0xC0, 0xC0, 0xC0]), (3, false));
        assert_eq!(c.collect(&[0x07, 0xC0]), (2, true));
        assert_eq!(c.take(), Some(vec![0xC0, 0x07, 0xC0]));
    }

    #[test]
    fn oversized_frame_resyncs() {
        let mut c = Collector::new(4);
        assert_eq!(c.collect(&[0xC0, 1, 2, 3, 4, 5, 0xC0]), (7, false));
        assert_eq!(c.take(), None);
        assert_eq!(c.collect(&[9, 0xC0, 8, 0xC0]), (4, true));
        assert_eq!(c.take(), Some(vec![0xC0, 8, 0xC0]));
        assert_eq!(c.take_fault(), None);
    }
}
