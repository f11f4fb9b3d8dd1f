#![cfg_attr(not(feature = "log"), allow(unused))]

use {
    hci_uart::time::Timer,
    std::{
        env,
        io::{self, Write},
        sync::Mutex,
    },
};

#[cfg(feature = "log")]
use log::{LevelFilter, Log, Metadata, Record};

/// Environment variable holding the maximum log level (`error` through `trace`, or `off`).
pub const LEVEL_VAR: &str = "HCI_UART_LOG";

/// Forwards the `log` crate's macros to an `io::Write`, prefixing every line with a timestamp.
pub struct StampedLogger<T: Timer, W: io::Write + Send> {
    timer: T,
    writer: Mutex<W>,
}

impl<T: Timer, W: io::Write + Send> StampedLogger<T, W> {
    /// Creates a new `StampedLogger` that will print to `writer` and obtains timestamps using
    /// `timer`.
    pub fn new(writer: W, timer: T) -> Self {
        Self {
            timer,
            writer: Mutex::new(writer),
        }
    }
}

#[cfg(feature = "log")]
impl<T, W> Log for StampedLogger<T, W>
where
    T: Timer + Send + Sync,
    W: io::Write + Send,
{
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let stamp = self.timer.now();
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for line in record.args().to_string().split('\n') {
            // Nowhere left to report a failing log sink.
            let _ = writeln!(writer, "{} - {} - {}", stamp, record.level(), line);
        }
    }

    fn flush(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}

/// Installs a `StampedLogger` writing to stderr, with the level taken from `HCI_UART_LOG`.
#[cfg(feature = "log")]
pub fn init<T: Timer + Send + Sync + 'static>(timer: T) {
    let level = env::var(LEVEL_VAR)
        .ok()
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info);

    let logger = Box::new(StampedLogger::new(io::stderr(), timer));
    if log::set_logger(Box::leak(logger)).is_ok() {
        log::set_max_level(level);
    }
}

#[cfg(not(feature = "log"))]
pub fn init<T: Timer + Send + Sync + 'static>(_timer: T) {}
