//! Link control messages.
//!
//! These are carried as unreliable packets of type [`PacketType::LinkControl`] and drive link
//! establishment (SYNC, SYNC_RESP, CONF, CONF_RESP) and low-power handling (WAKEUP, WOKEN,
//! SLEEP). Every message starts with a fixed two-byte pattern:
//!
//! ```notrust
//! Message     Bytes
//! SYNC        01 7E
//! SYNC_RESP   02 7D
//! CONF        03 FC cfg
//! CONF_RESP   04 7B [cfg]
//! WAKEUP      05 FA
//! WOKEN       06 F9
//! SLEEP       07 78
//! ```
//!
//! [`PacketType::LinkControl`]: ../../packet/enum.PacketType.html

use crate::{bytes::*, utils::Hex, Error};
use core::{cmp, fmt};
use heapless::consts::U3;

/// A decoded link control message.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlMsg {
    /// Start of link establishment.
    Sync,
    /// Answer to `Sync`.
    SyncResp,
    /// Configuration proposal.
    Conf(Option<ConfigField>),
    /// Answer to `Conf`, carrying the configuration the sender will use.
    ///
    /// Older controllers omit the configuration byte.
    ConfResp(Option<ConfigField>),
    /// Request for a sleeping peer to wake up.
    Wakeup,
    /// Answer to `Wakeup`.
    Woken,
    /// The sender is entering low-power mode.
    Sleep,
}

impl ControlMsg {
    fn magic(&self) -> [u8; 2] {
        match self {
            ControlMsg::Sync => [0x01, 0x7e],
            ControlMsg::SyncResp => [0x02, 0x7d],
            ControlMsg::Conf(_) => [0x03, 0xfc],
            ControlMsg::ConfResp(_) => [0x04, 0x7b],
            ControlMsg::Wakeup => [0x05, 0xfa],
            ControlMsg::Woken => [0x06, 0xf9],
            ControlMsg::Sleep => [0x07, 0x78],
        }
    }

    /// Encodes the message.
    pub fn to_bytes(&self) -> heapless::Vec<u8, U3> {
        let mut buf = heapless::Vec::new();
        // Can't fail: messages are at most 3 bytes long.
        buf.extend_from_slice(&self.magic()).ok();
        match self {
            ControlMsg::Conf(Some(cfg)) | ControlMsg::ConfResp(Some(cfg)) => {
                buf.push(cfg.raw()).ok();
            }
            _ => {}
        }
        buf
    }
}

impl<'a> FromBytes<'a> for ControlMsg {
    fn from_bytes(bytes: &mut ByteReader<'a>) -> Result<Self, Error> {
        let magic = bytes.read_array::<[u8; 2]>()?;
        let mut config = || -> Result<Option<ConfigField>, Error> {
            if bytes.is_empty() {
                Ok(None)
            } else {
                Ok(Some(ConfigField(bytes.read_u8()?)))
            }
        };

        Ok(match magic {
            [0x01, 0x7e] => ControlMsg::Sync,
            [0x02, 0x7d] => ControlMsg::SyncResp,
            [0x03, 0xfc] => ControlMsg::Conf(config()?),
            [0x04, 0x7b] => ControlMsg::ConfResp(config()?),
            [0x05, 0xfa] => ControlMsg::Wakeup,
            [0x06, 0xf9] => ControlMsg::Woken,
            [0x07, 0x78] => ControlMsg::Sleep,
            _ => return Err(Error::InvalidValue),
        })
    }
}

/// The configuration byte exchanged in CONF and CONF_RESP.
///
/// Layout:
///
/// ```notrust
/// LSB                                                    MSB
/// +--------------+-----------+-----------+---------+--------+
/// | Window size  |    OOF    |    CRC    | Version |   -    |
/// |   (3 bits)   |  (1 bit)  |  (1 bit)  | (2 bits)| (1 bit)|
/// +--------------+-----------+-----------+---------+--------+
/// ```
///
/// `OOF` enables out-of-frame software flow control, which makes both sides escape XON and XOFF
/// in SLIP frames. `CRC` enables the data integrity check on packets that support it.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ConfigField(u8);

impl ConfigField {
    const WINDOW_MASK: u8 = 0b0000_0111;
    const OOF: u8 = 0b0000_1000;
    const CRC: u8 = 0b0001_0000;
    const VERSION_SHIFT: u8 = 5;

    /// Creates a configuration byte.
    ///
    /// `window` is clamped to the range `1..=7`.
    pub fn new(window: u8, sw_flow_control: bool, crc: bool) -> Self {
        let window = cmp::min(cmp::max(window, 1), 7);
        let mut raw = window;
        if sw_flow_control {
            raw |= Self::OOF;
        }
        if crc {
            raw |= Self::CRC;
        }
        ConfigField(raw)
    }

    /// Wraps a raw configuration byte.
    pub fn from_raw(raw: u8) -> Self {
        ConfigField(raw)
    }

    /// Returns the raw byte.
    pub fn raw(&self) -> u8 {
        self.0
    }

    /// Returns the sliding window size.
    ///
    /// A window of 0 is not meaningful and is read as 1.
    pub fn window(&self) -> u8 {
        cmp::max(self.0 & Self::WINDOW_MASK, 1)
    }

    /// Returns whether out-of-frame software flow control is enabled.
    pub fn sw_flow_control(&self) -> bool {
        self.0 & Self::OOF != 0
    }

    /// Returns whether the data integrity check is enabled.
    pub fn crc(&self) -> bool {
        self.0 & Self::CRC != 0
    }

    /// Returns the protocol version field.
    pub fn version(&self) -> u8 {
        (self.0 >> Self::VERSION_SHIFT) & 0b11
    }

    /// Combines our proposal with the peer's.
    ///
    /// The result uses the smaller of both windows and only enables features both sides asked
    /// for. The version is taken from `self`.
    pub fn negotiate(&self, peer: ConfigField) -> ConfigField {
        let mut out = ConfigField::new(
            cmp::min(self.window(), peer.window()),
            self.sw_flow_control() && peer.sw_flow_control(),
            self.crc() && peer.crc(),
        );
        out.0 |= self.version() << Self::VERSION_SHIFT;
        out
    }
}

impl fmt::Debug for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigField")
            .field("raw", &Hex(self.0))
            .field("window", &self.window())
            .field("oof", &self.sw_flow_control())
            .field("crc", &self.crc())
            .field("version", &self.version())
            .finish()
    }
}
