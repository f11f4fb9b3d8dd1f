use core::fmt;

/// Errors returned by the transport stack.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Frame specified an invalid length value or was too short.
    ///
    /// For BCSP frames this means the payload length in the header is larger than the data that
    /// was actually received.
    InvalidLength,

    /// Invalid value supplied for field.
    InvalidValue,

    /// Unexpectedly reached EOF while reading data from a buffer.
    Eof,

    /// Parsing didn't consume the entire buffer.
    IncompleteParse,

    /// The BCSP header checksum did not match.
    Checksum,

    /// The CRC appended to a BCSP frame did not match its contents.
    Crc,

    /// More data was received than the BCSP header announced.
    ///
    /// This usually means that the receiver lost synchronization with the SLIP stream.
    Overrun,

    /// A packet type byte that the layer does not know how to handle.
    UnknownPacketType(u8),

    /// The operation needs an established link.
    NotActive,

    /// The byte sink below the stack reported a hard error.
    Io,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidLength => f.write_str("invalid length value specified"),
            Error::InvalidValue => f.write_str("invalid value for field"),
            Error::Eof => f.write_str("end of buffer"),
            Error::IncompleteParse => f.write_str("excess data in buffer"),
            Error::Checksum => f.write_str("header checksum mismatch"),
            Error::Crc => f.write_str("CRC mismatch"),
            Error::Overrun => f.write_str("frame longer than announced (overrun)"),
            Error::UnknownPacketType(ty) => write!(f, "unknown packet type {:#04x}", ty),
            Error::NotActive => f.write_str("link is not active"),
            Error::Io => f.write_str("I/O error on the byte stream"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Conditions escalated to the supervising layer.
///
/// Integrity faults are informational: the offending frame has already been discarded and the peer
/// will retransmit it. Everything else is fatal and means the session should be torn down and
/// re-established.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Fault {
    /// A frame failed the header checksum.
    Checksum,

    /// A frame failed the CRC check.
    Crc,

    /// A frame's length did not match its header.
    Length,

    /// A reliable frame arrived with a sequence number other than the one we expected.
    OutOfSequence,

    /// The retransmission timer expired too many times without the peer acknowledging anything.
    RetryLimitExceeded,

    /// A receive buffer could not be allocated. The partial frame was dropped.
    Allocation,

    /// Writing to the byte sink failed.
    WriteFailure,

    /// The peer restarted link establishment while the link was active.
    PeerReset,
}

impl Fault {
    /// Returns whether this fault requires the session to be torn down.
    pub fn is_fatal(&self) -> bool {
        match self {
            Fault::Checksum | Fault::Crc | Fault::Length | Fault::Allocation => false,
            Fault::OutOfSequence
            | Fault::RetryLimitExceeded
            | Fault::WriteFailure
            | Fault::PeerReset => true,
        }
    }

    /// Maps a frame decoding error to the fault reported for it.
    pub(crate) fn from_integrity_error(error: Error) -> Self {
        match error {
            Error::Checksum => Fault::Checksum,
            Error::Crc => Fault::Crc,
            _ => Fault::Length,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Fault::Checksum => "header checksum failure",
            Fault::Crc => "CRC failure",
            Fault::Length => "payload length mismatch",
            Fault::OutOfSequence => "reliable frame out of sequence",
            Fault::RetryLimitExceeded => "retransmission limit exceeded",
            Fault::Allocation => "receive buffer allocation failed",
            Fault::WriteFailure => "write to byte sink failed",
            Fault::PeerReset => "peer reset the link",
        })
    }
}
