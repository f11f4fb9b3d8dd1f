//! Notifications from the transport to the upper layer.

use crate::{bcsp::control::ConfigField, packet::Packet, Fault};

/// Something the upper layer should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The link is established. Carries the configuration that is now in effect.
    Active(ConfigField),

    /// An HCI packet was received.
    Packet(Packet),

    /// A fault was detected. Fatal faults require the session to be torn down.
    Fault(Fault),
}
