//! HCI UART transport stack.
//!
//! Carries HCI packets between a host and a Bluetooth controller over a serial byte stream, either
//! with plain H4 framing or with the reliable three-wire/BCSP protocol (SLIP framing, a checksummed
//! packet header, an optional CRC and go-back-N retransmission).
//!
//! # Using the stack
//!
//! The protocol engine is runtime-agnostic and only needs `alloc`. It never reads a clock or blocks:
//! * [`bcsp::link::Link`] is driven by calling `receive`, `poll_transmit` and `timer_update`, and
//!   reports the next deadline it cares about.
//! * [`chain::Chain`] stacks layers (host, BCSP or H4, physical) and routes packets and bytes
//!   between them.
//! * With the `std` feature, [`driver::Transport`] runs a chain on a worker thread and writes to
//!   any `std::io::Write`.
//!
//! [`bcsp::link::Link`]: bcsp/link/struct.Link.html
//! [`chain::Chain`]: chain/struct.Chain.html
//! [`driver::Transport`]: driver/struct.Transport.html

// We're `#[no_std]`, except when testing or when the threaded driver is enabled
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![doc(test(attr(deny(unused_imports, unused_must_use))))]
#![warn(rust_2018_idioms)]
#![allow(clippy::trivially_copy_pass_by_ref)]

extern crate alloc;

#[macro_use]
mod log;
#[macro_use]
mod utils;
pub mod bcsp;
pub mod bytes;
pub mod chain;
pub mod config;
pub mod crc;
#[cfg(feature = "std")]
pub mod driver;
mod error;
pub mod event;
pub mod frame;
pub mod h4;
pub mod packet;
pub mod slip;
pub mod time;

pub use self::error::{Error, Fault};
pub use self::event::Event;
pub use self::frame::Frame;
pub use self::packet::{Packet, PacketType};
