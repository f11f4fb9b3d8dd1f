//! Transport configuration.

use crate::{
    bcsp::{control::ConfigField, MAX_PAYLOAD_LEN},
    time::Duration,
    Error,
};

/// Locally proposed BCSP parameters and timing.
///
/// The window size, CRC and software flow control settings are only proposals: the values actually
/// used are negotiated with the peer during link establishment. Timing values are purely local.
///
/// The defaults are the conventional three-wire UART values.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Config {
    window: u8,
    crc: bool,
    sw_flow_control: bool,
    sync_interval: Duration,
    retransmit_timeout: Duration,
    wakeup_interval: Duration,
    wakeup_guard: Duration,
    max_retries: u8,
}

impl Config {
    /// Largest window size that fits in the 3-bit sequence number space.
    pub const MAX_WINDOW: u8 = 7;

    /// Sets the proposed sliding window size (`1..=7`).
    pub fn with_window(mut self, window: u8) -> Result<Self, Error> {
        if window == 0 || window > Self::MAX_WINDOW {
            return Err(Error::InvalidValue);
        }
        self.window = window;
        Ok(self)
    }

    /// Sets whether to propose the data integrity check.
    pub fn with_crc(mut self, crc: bool) -> Self {
        self.crc = crc;
        self
    }

    /// Sets whether to propose out-of-frame software flow control.
    pub fn with_sw_flow_control(mut self, enabled: bool) -> Self {
        self.sw_flow_control = enabled;
        self
    }

    /// Sets the interval at which SYNC and CONF are repeated during link establishment.
    pub fn with_sync_interval(mut self, interval: Duration) -> Result<Self, Error> {
        if interval == Duration::ZERO {
            return Err(Error::InvalidValue);
        }
        self.sync_interval = interval;
        Ok(self)
    }

    /// Sets the retransmission timeout for unacknowledged reliable packets.
    pub fn with_retransmit_timeout(mut self, timeout: Duration) -> Result<Self, Error> {
        if timeout == Duration::ZERO {
            return Err(Error::InvalidValue);
        }
        self.retransmit_timeout = timeout;
        Ok(self)
    }

    /// Sets the interval after which an unanswered WAKEUP may be repeated.
    ///
    /// Must be longer than the wakeup guard delay.
    pub fn with_wakeup_interval(mut self, interval: Duration) -> Result<Self, Error> {
        if interval == Duration::ZERO || interval <= self.wakeup_guard {
            return Err(Error::InvalidValue);
        }
        self.wakeup_interval = interval;
        Ok(self)
    }

    /// Sets the minimum delay between a WAKEUP and the next packet.
    ///
    /// Must be shorter than the wakeup interval.
    pub fn with_wakeup_guard(mut self, guard: Duration) -> Result<Self, Error> {
        if guard >= self.wakeup_interval {
            return Err(Error::InvalidValue);
        }
        self.wakeup_guard = guard;
        Ok(self)
    }

    /// Sets how many consecutive retransmission timeouts without progress are tolerated.
    pub fn with_max_retries(mut self, retries: u8) -> Result<Self, Error> {
        if retries == 0 {
            return Err(Error::InvalidValue);
        }
        self.max_retries = retries;
        Ok(self)
    }

    pub fn window(&self) -> u8 {
        self.window
    }

    pub fn crc(&self) -> bool {
        self.crc
    }

    pub fn sw_flow_control(&self) -> bool {
        self.sw_flow_control
    }

    pub fn sync_interval(&self) -> Duration {
        self.sync_interval
    }

    pub fn retransmit_timeout(&self) -> Duration {
        self.retransmit_timeout
    }

    pub fn wakeup_interval(&self) -> Duration {
        self.wakeup_interval
    }

    pub fn wakeup_guard(&self) -> Duration {
        self.wakeup_guard
    }

    pub fn max_retries(&self) -> u8 {
        self.max_retries
    }

    /// Largest HCI payload accepted for transmission.
    pub fn max_payload(&self) -> usize {
        MAX_PAYLOAD_LEN
    }

    /// Returns the configuration byte proposed in CONF.
    pub fn config_field(&self) -> ConfigField {
        ConfigField::new(self.window, self.sw_flow_control, self.crc)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window: 4,
            crc: true,
            sw_flow_control: false,
            sync_interval: Duration::from_millis(100),
            retransmit_timeout: Duration::from_millis(250),
            wakeup_interval: Duration::from_millis(10),
            wakeup_guard: Duration::from_millis(1),
            max_retries: 8,
        }
    }
}
