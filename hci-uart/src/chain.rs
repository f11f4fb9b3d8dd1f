//! Composable transport layers.
//!
//! A [`Chain`] is an ordered list of [`Layer`]s. Index 0 is the host end, where HCI packets enter
//! and leave; the last index is the physical end, which talks to the byte stream. Packets sent by
//! the host walk towards the physical end (`next`), and bytes received from the wire walk towards
//! the host end (`previous`):
//!
//! ```notrust
//!   host                                           wire
//! +------+   Packet   +------+   SLIP bytes   +----------+
//! | Host | ---------> | BCSP | -------------> | Physical | ---> ByteSink
//! |      | <--------- |      | <------------- |          | <--- receive_bytes
//! +------+            +------+                +----------+
//! ```
//!
//! Layers never call each other. They push work into an [`Io`] context, and the chain processes
//! that work from a queue until nothing is left. The BCSP layer can be swapped for an [`H4Layer`]
//! when the peer expects plain H4 framing.
//!
//! [`H4Layer`]: ../h4/struct.H4Layer.html

use crate::{
    bcsp::link::Link,
    config::Config,
    event::Event,
    frame::Frame,
    h4::H4Layer,
    packet::Packet,
    slip::{self, Collector},
    time::{Instant, Timer},
    Error, Fault,
};
use alloc::{boxed::Box, collections::VecDeque, vec::Vec};

/// How often a sink may refuse to take data before the write is given up.
pub const MAX_WRITE_ATTEMPTS: usize = 16;

/// Control requests that can be sent to every layer of a chain.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Request {
    /// Start link establishment.
    Start,
    /// Enter low-power mode.
    Sleep,
    /// Stop all timers.
    CancelTimers,
    /// Drop all queued data.
    Purge,
}

enum Op {
    ForwardFrame(Packet),
    ForwardBytes(Frame),
    DeliverFrame(Packet),
    DeliverBytes(Frame),
}

/// Collects the work a layer hands to its neighbours.
#[derive(Default)]
pub struct Io {
    ops: Vec<Op>,
    events: Vec<Event>,
}

impl Io {
    /// Passes a packet to the next layer towards the wire.
    pub fn forward_frame(&mut self, packet: Packet) {
        self.ops.push(Op::ForwardFrame(packet));
    }

    /// Passes bytes to the next layer towards the wire.
    pub fn forward_bytes(&mut self, bytes: Frame) {
        self.ops.push(Op::ForwardBytes(bytes));
    }

    /// Passes a packet to the previous layer towards the host.
    pub fn deliver_frame(&mut self, packet: Packet) {
        self.ops.push(Op::DeliverFrame(packet));
    }

    /// Passes bytes to the previous layer towards the host.
    pub fn deliver_bytes(&mut self, bytes: Frame) {
        self.ops.push(Op::DeliverBytes(bytes));
    }

    /// Reports an event to whoever drives the chain.
    pub fn event(&mut self, event: Event) {
        self.events.push(event);
    }
}

/// A transport layer.
///
/// The default implementations pass everything through unchanged.
pub trait Layer {
    /// Short name used in log messages.
    fn name(&self) -> &'static str;

    /// Handles a packet coming from the host side.
    fn send_frame(&mut self, packet: Packet, io: &mut Io) -> Result<(), Error> {
        io.forward_frame(packet);
        Ok(())
    }

    /// Handles bytes coming from the host side.
    fn send_bytes(&mut self, bytes: Frame, io: &mut Io) -> Result<(), Error> {
        io.forward_bytes(bytes);
        Ok(())
    }

    /// Handles bytes coming from the wire side. Returns the number of bytes consumed.
    fn receive_bytes(&mut self, bytes: &[u8], io: &mut Io) -> usize {
        io.deliver_bytes(Frame::from_slice(bytes));
        bytes.len()
    }

    /// Handles a packet coming from the wire side.
    fn receive_frame(&mut self, packet: Packet, io: &mut Io) {
        io.deliver_frame(packet);
    }

    /// Applies a control request. Layers that don't support a request ignore it.
    fn configure(&mut self, _request: Request, _io: &mut Io) -> Result<(), Error> {
        Ok(())
    }

    /// Handles expired timers.
    fn timer_update(&mut self, _io: &mut Io) {}

    /// Returns when `timer_update` needs to be called next.
    fn next_update(&self) -> Option<Instant> {
        None
    }

    /// Flushes anything the layer is holding back, such as queued transmissions.
    fn poll_pending(&mut self, _io: &mut Io) {}
}

/// An ordered stack of transport layers.
pub struct Chain {
    layers: Vec<Box<dyn Layer + Send>>,
    events: VecDeque<Event>,
}

impl Chain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            events: VecDeque::new(),
        }
    }

    /// Appends a layer at the physical end.
    pub fn push<L: Layer + Send + 'static>(mut self, layer: L) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    /// Builds the standard BCSP stack: host, BCSP (SLIP framing included), physical.
    pub fn bcsp<S, T>(sink: S, config: Config, timer: T) -> Self
    where
        S: ByteSink + Send + 'static,
        T: Timer + Send + 'static,
    {
        Chain::new()
            .push(HostLayer)
            .push(BcspLayer::new(config, timer))
            .push(PhysicalLayer::new(sink))
    }

    /// Builds an H4 stack: host, H4, physical.
    pub fn h4<S: ByteSink + Send + 'static>(sink: S) -> Self {
        Chain::new()
            .push(HostLayer)
            .push(H4Layer::new())
            .push(PhysicalLayer::new(sink))
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Returns the index of the neighbour of layer `index` towards the wire.
    pub fn next(&self, index: usize) -> Option<usize> {
        if index + 1 < self.layers.len() {
            Some(index + 1)
        } else {
            None
        }
    }

    /// Returns the index of the neighbour of layer `index` towards the host.
    pub fn previous(&self, index: usize) -> Option<usize> {
        index.checked_sub(1)
    }

    /// Sends a packet from the host end.
    pub fn send(&mut self, packet: Packet) -> Result<(), Error> {
        if self.layers.is_empty() {
            return Err(Error::NotActive);
        }
        let mut io = Io::default();
        let first = self.layers[0].send_frame(packet, &mut io);
        let rest = self.run(0, io);
        first.and(rest)
    }

    /// Feeds bytes received from the wire into the physical end.
    ///
    /// Returns the number of bytes consumed.
    pub fn receive_bytes(&mut self, bytes: &[u8]) -> usize {
        let last = match self.layers.len().checked_sub(1) {
            Some(last) => last,
            None => return 0,
        };
        let mut io = Io::default();
        let consumed = self.layers[last].receive_bytes(bytes, &mut io);
        if let Err(e) = self.run(last, io) {
            debug!("chain: error while processing received data: {}", e);
        }
        consumed
    }

    /// Applies a control request to every layer.
    ///
    /// Returns the first error any layer reported.
    pub fn configure(&mut self, request: Request) -> Result<(), Error> {
        let mut result = Ok(());
        for index in 0..self.layers.len() {
            let mut io = Io::default();
            let configured = self.layers[index].configure(request, &mut io);
            let processed = self.run(index, io);
            result = result.and(configured).and(processed);
        }
        result
    }

    /// Handles expired timers in every layer.
    pub fn timer_update(&mut self) {
        for index in 0..self.layers.len() {
            let mut io = Io::default();
            self.layers[index].timer_update(&mut io);
            if let Err(e) = self.run(index, io) {
                debug!("chain: error after timer update: {}", e);
            }
        }
    }

    /// Lets every layer flush pending work.
    pub fn poll_pending(&mut self) {
        for index in 0..self.layers.len() {
            let mut io = Io::default();
            self.layers[index].poll_pending(&mut io);
            if let Err(e) = self.run(index, io) {
                debug!("chain: error while flushing: {}", e);
            }
        }
    }

    /// Returns the earliest time at which `timer_update` must be called.
    pub fn next_update(&self) -> Option<Instant> {
        self.layers.iter().filter_map(|l| l.next_update()).min()
    }

    /// Takes the next event produced by the chain.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Processes the work produced by layer `origin` and everything it triggers.
    fn run(&mut self, origin: usize, io: Io) -> Result<(), Error> {
        let mut result = Ok(());
        let mut work = VecDeque::new();
        self.absorb(origin, io, &mut work);

        while let Some((from, op)) = work.pop_front() {
            let mut io = Io::default();
            let target = match op {
                Op::ForwardFrame(_) | Op::ForwardBytes(_) => self.next(from),
                Op::DeliverFrame(_) | Op::DeliverBytes(_) => self.previous(from),
            };

            let index = match (target, op) {
                (Some(index), Op::ForwardFrame(packet)) => {
                    result = result.and(self.layers[index].send_frame(packet, &mut io));
                    index
                }
                (Some(index), Op::ForwardBytes(bytes)) => {
                    result = result.and(self.layers[index].send_bytes(bytes, &mut io));
                    index
                }
                (Some(index), Op::DeliverFrame(packet)) => {
                    self.layers[index].receive_frame(packet, &mut io);
                    index
                }
                (Some(index), Op::DeliverBytes(bytes)) => {
                    self.layers[index].receive_bytes(&bytes, &mut io);
                    index
                }
                (None, Op::DeliverFrame(packet)) => {
                    self.events.push_back(Event::Packet(packet));
                    continue;
                }
                (None, _) => {
                    warn!(
                        "chain: {} dropped data at the end of the chain",
                        self.layers[from].name()
                    );
                    continue;
                }
            };

            self.absorb(index, io, &mut work);
        }

        result
    }

    fn absorb(&mut self, from: usize, io: Io, work: &mut VecDeque<(usize, Op)>) {
        self.events.extend(io.events);
        work.extend(io.ops.into_iter().map(|op| (from, op)));
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

/// The host end of a chain: keeps link-private packet types away from the upper layer.
pub struct HostLayer;

impl Layer for HostLayer {
    fn name(&self) -> &'static str {
        "host"
    }

    fn send_frame(&mut self, packet: Packet, io: &mut Io) -> Result<(), Error> {
        if packet.ty.is_internal() {
            return Err(Error::InvalidValue);
        }
        io.forward_frame(packet);
        Ok(())
    }

    fn receive_frame(&mut self, packet: Packet, io: &mut Io) {
        if packet.ty.is_internal() {
            warn!("host: dropping link-private {:?} packet", packet.ty);
            return;
        }
        io.event(Event::Packet(packet));
    }
}

/// BCSP with SLIP framing, driven by a [`Link`].
///
/// [`Link`]: ../bcsp/link/struct.Link.html
pub struct BcspLayer<T: Timer> {
    link: Link<T>,
    collector: Collector,
}

impl<T: Timer> BcspLayer<T> {
    pub fn new(config: Config, timer: T) -> Self {
        Self {
            link: Link::new(config, timer),
            collector: Collector::default(),
        }
    }

    pub fn link(&self) -> &Link<T> {
        &self.link
    }

    /// Moves everything the link produced into `io`.
    fn flush(&mut self, io: &mut Io) {
        while let Some(frame) = self.link.poll_transmit() {
            let encoded = slip::encode(&frame, self.link.sw_flow_control());
            trace_frame!("SLIP->", encoded);
            io.forward_bytes(encoded);
        }

        while let Some(event) = self.link.poll_event() {
            match event {
                Event::Packet(packet) => io.deliver_frame(packet),
                other => io.event(other),
            }
        }
    }
}

impl<T: Timer> Layer for BcspLayer<T> {
    fn name(&self) -> &'static str {
        "bcsp"
    }

    fn send_frame(&mut self, packet: Packet, io: &mut Io) -> Result<(), Error> {
        self.link.send(packet)?;
        self.flush(io);
        Ok(())
    }

    fn receive_bytes(&mut self, bytes: &[u8], io: &mut Io) -> usize {
        let mut rest = bytes;
        while !rest.is_empty() {
            let (consumed, complete) = self.collector.collect(rest);
            rest = &rest[consumed..];

            if let Some(fault) = self.collector.take_fault() {
                io.event(Event::Fault(fault));
            }

            if !complete {
                if consumed == 0 {
                    break;
                }
                continue;
            }

            if let Some(raw) = self.collector.take() {
                trace_frame!("SLIP<-", raw);
                match slip::decode(&raw) {
                    Ok(frame) => {
                        self.link.receive(frame);
                    }
                    Err(e) => debug!("SLIP: dropping malformed frame: {}", e),
                }
            }
        }

        self.flush(io);
        bytes.len() - rest.len()
    }

    fn configure(&mut self, request: Request, io: &mut Io) -> Result<(), Error> {
        match request {
            Request::Start => {
                self.link.start();
            }
            Request::Sleep => {
                self.link.sleep()?;
            }
            Request::CancelTimers => self.link.cancel_timers(),
            Request::Purge => {
                self.link.purge();
                self.collector.reset();
            }
        }
        self.flush(io);
        Ok(())
    }

    fn timer_update(&mut self, io: &mut Io) {
        self.link.timer_update();
        self.flush(io);
    }

    fn next_update(&self) -> Option<Instant> {
        self.link.next_deadline()
    }

    fn poll_pending(&mut self, io: &mut Io) {
        self.flush(io);
    }
}

/// Destination for bytes leaving the physical end of a chain.
pub trait ByteSink {
    /// Writes a prefix of `bytes` and returns its length.
    ///
    /// Returning `Ok(0)` means the sink can't take data right now. Errors are permanent.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Error>;
}

impl ByteSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        self.extend_from_slice(bytes);
        Ok(bytes.len())
    }
}

#[cfg(feature = "std")]
impl ByteSink for std::sync::mpsc::Sender<Vec<u8>> {
    fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        self.send(bytes.to_vec()).map_err(|_| Error::Io)?;
        Ok(bytes.len())
    }
}

/// The wire end of a chain.
pub struct PhysicalLayer<S: ByteSink> {
    sink: S,
}

impl<S: ByteSink> PhysicalLayer<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: ByteSink> Layer for PhysicalLayer<S> {
    fn name(&self) -> &'static str {
        "physical"
    }

    fn send_bytes(&mut self, bytes: Frame, io: &mut Io) -> Result<(), Error> {
        let mut written = 0;
        let mut refused = 0;
        while written < bytes.len() {
            match self.sink.write(&bytes[written..]) {
                Ok(0) => {
                    refused += 1;
                    if refused >= MAX_WRITE_ATTEMPTS {
                        error!(
                            "physical: sink stalled with {} bytes left",
                            bytes.len() - written
                        );
                        io.event(Event::Fault(Fault::WriteFailure));
                        return Err(Error::Io);
                    }
                }
                Ok(n) => {
                    written += n;
                    refused = 0;
                }
                Err(e) => {
                    error!("physical: write failed: {}", e);
                    io.event(Event::Fault(Fault::WriteFailure));
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}
