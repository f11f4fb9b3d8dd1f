//! Threaded driver for `std` targets.
//!
//! A [`Transport`] owns one [`Chain`] behind a mutex and a worker thread that does everything
//! that isn't triggered by the user directly: firing timers, forwarding events to the upper layer
//! and writing outbound bytes. Timer expiry is delivered to the worker as a receive timeout on its
//! message channel, so no other thread ever touches the chain on a timer's behalf.
//!
//! The chain's physical layer writes into an in-memory channel. The worker drains that channel and
//! performs the actual `Write` calls without holding the chain lock, so a slow byte sink never
//! blocks the receive path.
//!
//! [`Chain`]: ../chain/struct.Chain.html

use crate::{
    chain::{Chain, Request, MAX_WRITE_ATTEMPTS},
    config::Config,
    event::Event,
    packet::Packet,
    time::{Duration, Instant, Timer},
    Error, Fault,
};
use std::{
    io::{self, Read, Write},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    vec::Vec,
};

/// A [`Timer`] backed by the operating system's monotonic clock.
///
/// [`Timer`]: ../time/trait.Timer.html
#[derive(Copy, Clone, Debug)]
pub struct StdTimer {
    origin: std::time::Instant,
}

impl StdTimer {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl Default for StdTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer for StdTimer {
    fn now(&self) -> Instant {
        Instant::from_raw_micros(self.origin.elapsed().as_micros() as u64)
    }
}

enum Msg {
    /// Something changed; flush the chain.
    Wake,
    /// Exit the worker loop.
    Shutdown,
}

fn lock(chain: &Mutex<Chain>) -> MutexGuard<'_, Chain> {
    chain.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cloneable handle for feeding a running transport.
#[derive(Clone)]
pub struct Handle {
    chain: Arc<Mutex<Chain>>,
    wake: Sender<Msg>,
}

impl Handle {
    /// Submits an HCI packet for transmission.
    pub fn send(&self, packet: Packet) -> Result<(), Error> {
        let result = lock(&self.chain).send(packet);
        self.wake();
        result
    }

    /// Feeds bytes read from the byte stream into the transport.
    pub fn receive_bytes(&self, bytes: &[u8]) -> usize {
        let consumed = lock(&self.chain).receive_bytes(bytes);
        self.wake();
        consumed
    }

    /// Starts link establishment.
    pub fn start(&self) -> Result<(), Error> {
        self.configure(Request::Start)
    }

    /// Announces low-power mode to the peer.
    pub fn sleep(&self) -> Result<(), Error> {
        self.configure(Request::Sleep)
    }

    fn configure(&self, request: Request) -> Result<(), Error> {
        let result = lock(&self.chain).configure(request);
        self.wake();
        result
    }

    fn wake(&self) {
        // Fails only once the worker is gone, at which point there's nothing left to wake.
        let _ = self.wake.send(Msg::Wake);
    }
}

/// A running transport: one chain, one worker thread and optionally a reader thread.
pub struct Transport {
    handle: Handle,
    worker: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    timer: StdTimer,
}

impl Transport {
    /// Builds a chain with `build` and starts its worker.
    ///
    /// `build` receives the sink the chain's physical layer must write into and the timer the chain
    /// must use. Outbound bytes end up in `writer`, and events are forwarded to `upper`.
    pub fn spawn<F, W>(build: F, writer: W, upper: Sender<Event>) -> Result<Self, Error>
    where
        F: FnOnce(Sender<Vec<u8>>, StdTimer) -> Chain,
        W: Write + Send + 'static,
    {
        let timer = StdTimer::new();
        let (sink, outbound) = mpsc::channel();
        let (wake, messages) = mpsc::channel();
        let chain = Arc::new(Mutex::new(build(sink, timer)));

        let worker = Worker {
            chain: chain.clone(),
            messages,
            outbound,
            writer,
            upper,
            timer,
        };
        let worker = thread::Builder::new()
            .name("hci-uart-worker".into())
            .spawn(move || worker.run())
            .map_err(|e| {
                error!("driver: could not spawn worker: {}", e);
                Error::Io
            })?;

        Ok(Self {
            handle: Handle { chain, wake },
            worker: Some(worker),
            reader: None,
            stop: Arc::new(AtomicBool::new(false)),
            timer,
        })
    }

    /// Spawns a transport running BCSP over `writer`.
    pub fn bcsp<W>(config: Config, writer: W, upper: Sender<Event>) -> Result<Self, Error>
    where
        W: Write + Send + 'static,
    {
        Self::spawn(
            move |sink, timer| Chain::bcsp(sink, config, timer),
            writer,
            upper,
        )
    }

    /// Spawns a transport running H4 over `writer`.
    pub fn h4<W>(writer: W, upper: Sender<Event>) -> Result<Self, Error>
    where
        W: Write + Send + 'static,
    {
        Self::spawn(|sink, _| Chain::h4(sink), writer, upper)
    }

    /// Starts a thread that reads from `source` and feeds the transport.
    ///
    /// The thread exits at end of stream, on a read error, or after the first read that completes
    /// once the transport has been shut down. Shutting down does not wait for a read that is still
    /// blocked.
    pub fn spawn_reader<R>(&mut self, mut source: R) -> Result<(), Error>
    where
        R: Read + Send + 'static,
    {
        let handle = self.handle.clone();
        let stop = self.stop.clone();
        let reader = thread::Builder::new()
            .name("hci-uart-reader".into())
            .spawn(move || {
                let mut buf = [0; 1024];
                while !stop.load(Ordering::Acquire) {
                    match source.read(&mut buf) {
                        Ok(0) => {
                            debug!("driver: end of input stream");
                            break;
                        }
                        Ok(n) => {
                            handle.receive_bytes(&buf[..n]);
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            error!("driver: read failed: {}", e);
                            break;
                        }
                    }
                }
            })
            .map_err(|_| Error::Io)?;

        self.reader = Some(reader);
        Ok(())
    }

    /// Returns a handle for submitting packets and received bytes.
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Returns the clock the transport runs on.
    pub fn timer(&self) -> StdTimer {
        self.timer
    }

    /// Tears the transport down.
    ///
    /// Timers are cancelled first, then the worker is stopped and joined, and finally every queue is
    /// purged.
    pub fn shutdown(&mut self) {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => return,
        };

        info!("driver: shutting down");
        if let Err(e) = lock(&self.handle.chain).configure(Request::CancelTimers) {
            debug!("driver: cancelling timers: {}", e);
        }

        self.stop.store(true, Ordering::Release);
        let _ = self.handle.wake.send(Msg::Shutdown);
        if worker.join().is_err() {
            error!("driver: worker thread panicked");
        }

        if let Err(e) = lock(&self.handle.chain).configure(Request::Purge) {
            debug!("driver: purging queues: {}", e);
        }

        // The reader may be blocked in `read`; it notices `stop` once that returns.
        drop(self.reader.take());
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker<W: Write> {
    chain: Arc<Mutex<Chain>>,
    messages: Receiver<Msg>,
    outbound: Receiver<Vec<u8>>,
    writer: W,
    upper: Sender<Event>,
    timer: StdTimer,
}

impl<W: Write> Worker<W> {
    fn run(mut self) {
        debug!("driver: worker started");

        loop {
            let next_update = lock(&self.chain).next_update();
            let msg = match next_update {
                Some(at) => {
                    let timeout = at
                        .checked_duration_since(self.timer.now())
                        .unwrap_or(Duration::ZERO);
                    self.messages.recv_timeout(timeout.into())
                }
                None => self.messages.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            match msg {
                Ok(Msg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(Msg::Wake) | Err(RecvTimeoutError::Timeout) => {}
            }

            let events: Vec<Event> = {
                let mut chain = lock(&self.chain);
                chain.timer_update();
                chain.poll_pending();
                core::iter::from_fn(|| chain.poll_event()).collect()
            };

            for event in events {
                if let Event::Fault(fault) = event {
                    if fault.is_fatal() {
                        error!("driver: fatal fault: {}", fault);
                    }
                }
                let _ = self.upper.send(event);
            }

            self.write_outbound();
        }

        debug!("driver: worker stopped");
    }

    fn write_outbound(&mut self) {
        while let Ok(chunk) = self.outbound.try_recv() {
            trace_frame!("UART->", chunk);
            if let Err(e) = write_chunk(&mut self.writer, &chunk) {
                error!("driver: write failed: {}", e);
                let _ = self.upper.send(Event::Fault(Fault::WriteFailure));
            }
        }
    }
}

/// Writes all of `data`, retrying partial and interrupted writes a bounded number of times.
fn write_chunk<W: Write>(writer: &mut W, mut data: &[u8]) -> io::Result<()> {
    let mut attempts = 0;
    while !data.is_empty() {
        match writer.write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                data = &data[n..];
                attempts = 0;
            }
            Err(e)
                if e.kind() == io::ErrorKind::Interrupted
                    || e.kind() == io::ErrorKind::WouldBlock =>
            {
                attempts += 1;
                if attempts >= MAX_WRITE_ATTEMPTS {
                    return Err(e);
                }
                thread::yield_now();
            }
            Err(e) => return Err(e),
        }
    }
    writer.flush()
}

/// Writing half of an in-memory byte pipe.
pub struct PipeWriter(Sender<Vec<u8>>);

/// Reading half of an in-memory byte pipe. Reads return 0 once the writer is gone.
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

/// Creates an in-memory byte pipe, for wiring two transports back to back.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel();
    (
        PipeWriter(tx),
        PipeReader {
            rx,
            pending: Vec::new(),
        },
    )
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv() {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}
