//! BCSP link establishment, low-power handling and retransmission timing.
//!
//! A [`Link`] ties together the retransmission queues in [`Arq`], the link control messages, and
//! two state machines that run side by side: one for our own state ([`LinkState`]) and one for what
//! we believe the peer's state to be ([`PeerState`]).
//!
//! # Link establishment
//!
//! ```notrust
//!                   SYNC_RESP received               CONF_RESP received
//! Uninitialized ----------------------> Initialized ----------------------> Active
//!   (send SYNC        (send CONF)         (resend CONF       peer Active      ^
//!    every interval)                       every interval)       |            |
//!                                                                | peer not   | CONF received
//!                                                                v Active     |
//!                                                          WaitPeerActive ----+
//! ```
//!
//! Replying to a CONF with a CONF_RESP makes us assume that the peer has reached Active, before
//! it has confirmed anything. That shortcut lets the link come up after a single round trip when
//! both sides configure at the same time.
//!
//! # Low power
//!
//! Once established, either side may announce SLEEP. Before sending anything to a sleeping peer we
//! send WAKEUP and wait for the configured guard time. WOKEN (or the peer's own WAKEUP) marks the
//! peer as awake again. If reliable packets were in flight while the peer went to sleep, they are
//! sent again.
//!
//! # Driving a `Link`
//!
//! The link never blocks and never reads a clock on its own schedule. Every operation returns a
//! [`Cmd`] that says when [`Link::timer_update`] must be called next and whether there are frames
//! to fetch with [`Link::poll_transmit`]. Received packets and faults are fetched with
//! [`Link::poll_event`].
//!
//! [`Arq`]: ../arq/struct.Arq.html

use super::{
    arq::Arq,
    control::{ConfigField, ControlMsg},
    SeqNum,
};
use crate::{
    bcsp,
    bytes::FromBytes,
    config::Config,
    event::Event,
    frame::Frame,
    packet::{Packet, PacketType},
    time::{Instant, Timer},
    Error, Fault,
};
use alloc::collections::VecDeque;
use bitflags::bitflags;

bitflags! {
    /// Pending obligations of the transmit path.
    struct Flags: u8 {
        /// We received a reliable packet and have not acknowledged it yet.
        const ACK_REQUIRED = 1 << 0;

        /// We sent WAKEUP and have neither seen an answer nor given up waiting for one.
        const WAKEUP_PENDING = 1 << 1;

        /// The retry limit was hit and reported. Cleared once the peer acknowledges something.
        const RETRIES_EXHAUSTED = 1 << 2;
    }
}

/// Our side of link establishment and power management.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Sending SYNC until the peer answers.
    Uninitialized,
    /// Synchronized, sending CONF until the peer answers.
    Initialized,
    /// Our CONF was answered, but the peer has not configured yet.
    WaitPeerActive,
    /// Established.
    Active,
    /// Established, and we told the peer that we are sleeping.
    LowPower,
}

impl LinkState {
    /// Returns whether the link is established (awake or not).
    pub fn is_active(&self) -> bool {
        match self {
            LinkState::Active | LinkState::LowPower => true,
            _ => false,
        }
    }
}

/// What we believe the peer's state to be.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PeerState {
    Uninitialized,
    /// Assumed as soon as we answer the peer's CONF.
    Active,
    /// The peer sent SLEEP.
    LowPower,
}

/// Tells the driver what to do after a `Link` operation.
#[derive(Debug, Clone)]
pub struct Cmd {
    /// When to call `Link::timer_update` next.
    pub next_update: NextUpdate,

    /// Whether `Link::poll_transmit` may produce a frame now.
    pub transmit: bool,
}

/// Specifies when `Link::timer_update` should be called the next time.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NextUpdate {
    /// No timer is running.
    Disable,

    /// Call `timer_update` at the given `Instant`.
    At(Instant),
}

/// State of one BCSP link.
pub struct Link<T: Timer> {
    config: Config,
    timer: T,
    state: LinkState,
    peer: PeerState,

    /// Configuration we answer CONF with, and commit when going Active.
    negotiated: ConfigField,

    arq: Arq,
    use_crc: bool,
    sw_flow_control: bool,
    flags: Flags,

    /// Handshake retry in the establishment states, retransmission timeout once established.
    link_timer: Option<Instant>,
    wakeup_timer: Option<Instant>,
    guard_until: Option<Instant>,

    /// Consecutive retransmission timeouts without the peer acknowledging anything.
    retries: u8,

    control: VecDeque<ControlMsg>,
    events: VecDeque<Event>,
}

impl<T: Timer> Link<T> {
    /// Creates a link in `Uninitialized` state. Nothing happens until [`start`] is called.
    ///
    /// [`start`]: #method.start
    pub fn new(config: Config, timer: T) -> Self {
        Self {
            negotiated: config.config_field(),
            arq: Arq::new(config.window()),
            config,
            timer,
            state: LinkState::Uninitialized,
            peer: PeerState::Uninitialized,
            use_crc: false,
            sw_flow_control: false,
            flags: Flags::empty(),
            link_timer: None,
            wakeup_timer: None,
            guard_until: None,
            retries: 0,
            control: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Starts link establishment: sends SYNC now and arms the SYNC retry timer.
    ///
    /// Packets submitted before this call (or before the link is established) stay queued.
    pub fn start(&mut self) -> Cmd {
        info!("BCSP: starting link establishment");
        self.state = LinkState::Uninitialized;
        self.peer = PeerState::Uninitialized;
        self.negotiated = self.config.config_field();
        self.use_crc = false;
        self.sw_flow_control = false;
        self.wakeup_timer = None;
        self.guard_until = None;
        self.flags = Flags::empty();
        self.link_timer = Some(self.timer.now());
        self.timer_update()
    }

    /// Submits a packet from the upper layer.
    ///
    /// If we announced low power earlier, this wakes us up again.
    pub fn send(&mut self, packet: Packet) -> Result<Cmd, Error> {
        if packet.ty.is_internal() {
            return Err(Error::InvalidValue);
        }
        if packet.data.len() > self.config.max_payload() {
            return Err(Error::InvalidLength);
        }

        if self.state == LinkState::LowPower {
            debug!("BCSP: leaving low power to send {:?}", packet.ty);
            self.state = LinkState::Active;
        }

        self.arq.enqueue(packet);
        Ok(self.cmd())
    }

    /// Processes a received BCSP packet (already stripped of SLIP framing).
    pub fn receive(&mut self, frame: Frame) -> Cmd {
        trace_frame!("BCSP<-", frame);

        let (header, payload) = match bcsp::unpack(frame) {
            Ok(unpacked) => unpacked,
            Err(e) => {
                warn!("BCSP: dropping frame: {}", e);
                self.events
                    .push_back(Event::Fault(Fault::from_integrity_error(e)));
                return self.cmd();
            }
        };

        if header.ty != PacketType::LinkControl && !self.state.is_active() {
            debug!(
                "BCSP: dropping {:?} packet, link not active ({:?})",
                header.ty, self.state
            );
            return self.cmd();
        }

        if header.reliable {
            if !self.arq.accept(header.seq) {
                error!(
                    "BCSP: out of sequence packet (seq {}, expected {})",
                    header.seq,
                    self.arq.ack()
                );
                self.flags.insert(Flags::ACK_REQUIRED);
                self.events.push_back(Event::Fault(Fault::OutOfSequence));
                return self.cmd();
            }
            self.flags.insert(Flags::ACK_REQUIRED);
        }

        if self.state.is_active() {
            self.process_ack(header.ack);
        }

        match header.ty {
            PacketType::LinkControl => match ControlMsg::from_slice(&payload) {
                Ok(msg) => self.process_control(msg),
                Err(e) => warn!("BCSP: ignoring link control message {:?}: {}", payload, e),
            },
            PacketType::Ack => {}
            PacketType::Unknown(ty) => {
                warn!("BCSP: dropping packet of unknown type {}", ty);
            }
            ty => self.events.push_back(Event::Packet(Packet { ty, data: payload })),
        }

        self.cmd()
    }

    /// Produces the next BCSP packet to put on the wire, if any.
    ///
    /// Link control messages go first. Once established, a sleeping peer is woken up before any
    /// data or acknowledgement is sent, then one unreliable packet, one reliable packet (if the window allows it) or
    /// a bare acknowledgement is produced, in that order.
    pub fn poll_transmit(&mut self) -> Option<Frame> {
        if let Some(msg) = self.control.pop_front() {
            debug!("BCSP: sending {:?}", msg);
            let payload = Frame::from_slice(&msg.to_bytes());
            return Some(self.frame(payload, PacketType::LinkControl, SeqNum::ZERO));
        }

        if !self.state.is_active() {
            return None;
        }

        let now = self.timer.now();
        let has_data = self.arq.has_unreliable()
            || self.arq.can_send_reliable()
            || self.flags.contains(Flags::ACK_REQUIRED);

        if self.peer == PeerState::LowPower && has_data {
            if !self.flags.contains(Flags::WAKEUP_PENDING) {
                debug!("BCSP: peer asleep, sending WAKEUP");
                self.flags.insert(Flags::WAKEUP_PENDING);
                self.guard_until = Some(now + self.config.wakeup_guard());
                self.wakeup_timer = Some(now + self.config.wakeup_interval());
                let payload = Frame::from_slice(&ControlMsg::Wakeup.to_bytes());
                return Some(self.frame(payload, PacketType::LinkControl, SeqNum::ZERO));
            }

            match self.guard_until {
                Some(guard) if now < guard => return None,
                _ => self.guard_until = None,
            }
        }

        if let Some(packet) = self.arq.next_unreliable() {
            return Some(self.frame(packet.data, packet.ty, SeqNum::ZERO));
        }

        if let Some((seq, packet)) = self.arq.next_reliable() {
            self.link_timer = Some(now + self.config.retransmit_timeout());
            return Some(self.frame(packet.data, packet.ty, seq));
        }

        if self.flags.contains(Flags::ACK_REQUIRED) {
            return Some(self.frame(Frame::new(), PacketType::Ack, SeqNum::ZERO));
        }

        None
    }

    /// Handles expired timers.
    ///
    /// Should be called at the time requested by the last returned [`Cmd`]. Calling it early is
    /// harmless.
    ///
    /// [`Cmd`]: struct.Cmd.html
    pub fn timer_update(&mut self) -> Cmd {
        let now = self.timer.now();

        if expired(self.link_timer, now) {
            self.link_timer = None;
            self.link_timeout(now);
        }

        if expired(self.wakeup_timer, now) {
            trace!("BCSP: wakeup timer expired");
            self.wakeup_timer = None;
            self.guard_until = None;
            self.flags.remove(Flags::WAKEUP_PENDING);
        }

        if expired(self.guard_until, now) {
            self.guard_until = None;
        }

        self.cmd()
    }

    /// Announces that we are going to sleep.
    pub fn sleep(&mut self) -> Result<Cmd, Error> {
        match self.state {
            LinkState::Active => {
                info!("BCSP: entering low power");
                self.control.push_back(ControlMsg::Sleep);
                self.state = LinkState::LowPower;
                Ok(self.cmd())
            }
            LinkState::LowPower => Ok(self.cmd()),
            _ => Err(Error::NotActive),
        }
    }

    /// Takes the next event for the upper layer.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Stops both timers.
    pub fn cancel_timers(&mut self) {
        self.link_timer = None;
        self.wakeup_timer = None;
        self.guard_until = None;
    }

    /// Drops every queued packet, control message and undelivered event.
    pub fn purge(&mut self) {
        self.arq.purge();
        self.control.clear();
        self.events.clear();
        self.flags = Flags::empty();
    }

    /// Cancels all timers and drops all queued data.
    pub fn shutdown(&mut self) {
        info!("BCSP: shutting down link");
        self.cancel_timers();
        self.purge();
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn peer_state(&self) -> PeerState {
        self.peer
    }

    /// Returns the configuration in effect, once the link is established.
    pub fn negotiated(&self) -> Option<ConfigField> {
        if self.state.is_active() {
            Some(self.negotiated)
        } else {
            None
        }
    }

    /// Returns whether outgoing SLIP frames must escape XON and XOFF.
    pub fn sw_flow_control(&self) -> bool {
        self.sw_flow_control
    }

    pub fn arq(&self) -> &Arq {
        &self.arq
    }

    /// Returns whether `poll_transmit` has something to send right now.
    pub fn has_pending_tx(&self) -> bool {
        if !self.control.is_empty() {
            return true;
        }
        self.state.is_active()
            && (self.arq.has_unreliable()
                || self.arq.can_send_reliable()
                || self.flags.contains(Flags::ACK_REQUIRED))
    }

    /// Returns the earliest running timer deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.link_timer, self.wakeup_timer, self.guard_until]
            .iter()
            .flatten()
            .min()
            .copied()
    }

    /// Returns the `Cmd` describing the current timers and transmit state.
    pub fn cmd(&self) -> Cmd {
        Cmd {
            next_update: match self.next_deadline() {
                Some(at) => NextUpdate::At(at),
                None => NextUpdate::Disable,
            },
            transmit: self.has_pending_tx(),
        }
    }

    fn frame(&mut self, payload: Frame, ty: PacketType, seq: SeqNum) -> Frame {
        self.flags.remove(Flags::ACK_REQUIRED);
        let frame = bcsp::pack(payload, ty, seq, self.arq.ack(), self.use_crc);
        trace_frame!("BCSP->", frame);
        frame
    }

    fn link_timeout(&mut self, now: Instant) {
        match self.state {
            LinkState::Uninitialized => {
                self.control.push_back(ControlMsg::Sync);
                self.link_timer = Some(now + self.config.sync_interval());
            }
            LinkState::Initialized => {
                self.control
                    .push_back(ControlMsg::Conf(Some(self.config.config_field())));
                self.link_timer = Some(now + self.config.sync_interval());
            }
            LinkState::WaitPeerActive => {}
            LinkState::Active | LinkState::LowPower => {
                if self.arq.outstanding() == 0 {
                    return;
                }

                if self.flags.contains(Flags::RETRIES_EXHAUSTED) {
                    return;
                }
                if self.retries >= self.config.max_retries() {
                    error!(
                        "BCSP: no acknowledgement after {} retransmissions",
                        self.retries
                    );
                    self.flags.insert(Flags::RETRIES_EXHAUSTED);
                    self.events
                        .push_back(Event::Fault(Fault::RetryLimitExceeded));
                    return;
                }

                self.retries += 1;

                let reloaded = self.arq.reload();
                debug!(
                    "BCSP: retransmission timeout #{}, resending {} packets",
                    self.retries, reloaded
                );
            }
        }
    }

    fn process_ack(&mut self, ack: SeqNum) {
        if self.arq.acknowledge(ack) > 0 {
            self.retries = 0;
            self.flags.remove(Flags::RETRIES_EXHAUSTED);
        }
        if self.arq.outstanding() == 0 {
            self.link_timer = None;
        }
    }

    fn process_control(&mut self, msg: ControlMsg) {
        debug!("BCSP: received {:?} in {:?}", msg, self.state);

        match msg {
            ControlMsg::Sync => {
                if self.state.is_active() {
                    error!("BCSP: peer restarted link establishment");
                    self.events.push_back(Event::Fault(Fault::PeerReset));
                } else {
                    self.control.push_back(ControlMsg::SyncResp);
                }
            }
            ControlMsg::SyncResp => {
                if self.state == LinkState::Uninitialized {
                    info!("BCSP: synchronized");
                    self.state = LinkState::Initialized;
                    self.control
                        .push_back(ControlMsg::Conf(Some(self.config.config_field())));
                    self.link_timer = Some(self.timer.now() + self.config.sync_interval());
                }
            }
            ControlMsg::Conf(cfg) => {
                if let Some(cfg) = cfg {
                    if !self.state.is_active() {
                        self.negotiated = self.config.config_field().negotiate(cfg);
                    }
                }
                self.control
                    .push_back(ControlMsg::ConfResp(Some(self.negotiated)));
                self.peer = PeerState::Active;

                if self.state == LinkState::WaitPeerActive {
                    self.enter_active();
                }
            }
            ControlMsg::ConfResp(cfg) => {
                if self.state != LinkState::Initialized {
                    return;
                }

                self.link_timer = None;
                if let Some(cfg) = cfg {
                    self.negotiated = self.config.config_field().negotiate(cfg);
                }

                if self.peer == PeerState::Active {
                    self.enter_active();
                } else {
                    debug!("BCSP: configured, waiting for peer");
                    self.state = LinkState::WaitPeerActive;
                }
            }
            ControlMsg::Wakeup if self.state.is_active() => {
                self.control.push_back(ControlMsg::Woken);
                if self.state == LinkState::LowPower {
                    info!("BCSP: woken up by peer");
                    self.state = LinkState::Active;
                }
                self.peer_woke();
            }
            ControlMsg::Woken if self.state.is_active() => self.peer_woke(),
            ControlMsg::Sleep if self.state.is_active() => {
                info!("BCSP: peer entered low power");
                self.peer = PeerState::LowPower;
                if self.arq.seq() != self.arq.rack() {
                    let reloaded = self.arq.reload();
                    debug!("BCSP: {} packets in flight while peer fell asleep", reloaded);
                    self.link_timer = None;
                    self.wakeup_timer = Some(self.timer.now());
                }
            }
            ControlMsg::Wakeup | ControlMsg::Woken | ControlMsg::Sleep => {
                debug!("BCSP: ignoring power message, link not active");
            }
        }
    }

    fn peer_woke(&mut self) {
        self.peer = PeerState::Active;
        self.wakeup_timer = None;
        self.guard_until = None;
        self.flags.remove(Flags::WAKEUP_PENDING);

        if self.arq.seq() != self.arq.rack() {
            let reloaded = self.arq.reload();
            debug!("BCSP: resending {} packets sent while peer was asleep", reloaded);
            self.link_timer = None;
        }
    }

    fn enter_active(&mut self) {
        let cfg = self.negotiated;
        info!("BCSP: link active, {:?}", cfg);

        self.state = LinkState::Active;
        self.arq.reset(cfg.window());
        self.use_crc = cfg.crc();
        self.sw_flow_control = cfg.sw_flow_control();
        self.retries = 0;
        self.flags.remove(Flags::RETRIES_EXHAUSTED);
        self.link_timer = None;
        self.events.push_back(Event::Active(cfg));
    }
}

fn expired(deadline: Option<Instant>, now: Instant) -> bool {
    match deadline {
        Some(at) => at <= now,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bcsp::Header,
        time::{mock::MockTimer, Duration},
    };
    use alloc::vec::Vec;

    fn link(timer: &MockTimer) -> Link<MockTimer> {
        Link::new(Config::default(), timer.clone())
    }

    /// Moves every pending frame from `from` to `to`, returning how many were moved.
    fn shuttle(from: &mut Link<MockTimer>, to: &mut Link<MockTimer>) -> usize {
        let mut count = 0;
        while let Some(frame) = from.poll_transmit() {
            to.receive(frame);
            count += 1;
        }
        count
    }

    fn control(frame: Frame) -> ControlMsg {
        let (header, payload) = bcsp::unpack(frame).unwrap();
        assert_eq!(header.ty, PacketType::LinkControl);
        ControlMsg::from_slice(&payload).unwrap()
    }

    fn header(frame: &Frame) -> Header {
        Header::from_slice(&frame[..Header::SIZE]).unwrap()
    }

    fn events(link: &mut Link<MockTimer>) -> Vec<Event> {
        core::iter::from_fn(|| link.poll_event()).collect()
    }

    fn acl(tag: u8) -> Packet {
        Packet::new(PacketType::AclData, &[0x01, 0x00, 0x01, 0x00, tag])
    }

    fn establish(timer: &MockTimer) -> (Link<MockTimer>, Link<MockTimer>) {
        let (mut a, mut b) = (link(timer), link(timer));
        a.start();
        b.start();
        for _ in 0..4 {
            shuttle(&mut a, &mut b);
            shuttle(&mut b, &mut a);
        }
        assert_eq!(a.state(), LinkState::Active);
        assert_eq!(b.state(), LinkState::Active);
        assert_eq!(events(&mut a), [Event::Active(Config::default().config_field())]);
        assert_eq!(events(&mut b), [Event::Active(Config::default().config_field())]);
        (a, b)
    }

    #[test]
    fn sync_once_then_conf() {
        let timer = MockTimer::default();
        let mut host = link(&timer);
        let cmd = host.start();
        assert!(cmd.transmit);
        assert_eq!(
            cmd.next_update,
            NextUpdate::At(timer.now() + Config::default().sync_interval())
        );

        assert_eq!(host.poll_transmit().map(control), Some(ControlMsg::Sync));
        assert!(host.poll_transmit().is_none());

        let sync_resp = bcsp::pack(
            Frame::from_slice(&ControlMsg::SyncResp.to_bytes()),
            PacketType::LinkControl,
            SeqNum::ZERO,
            SeqNum::ZERO,
            false,
        );
        host.receive(sync_resp);
        assert_eq!(host.state(), LinkState::Initialized);
        assert_eq!(
            host.poll_transmit().map(control),
            Some(ControlMsg::Conf(Some(Config::default().config_field())))
        );
        assert!(host.poll_transmit().is_none());
    }

    #[test]
    fn handshake_retries() {
        let timer = MockTimer::default();
        let mut host = link(&timer);
        host.start();
        assert!(host.poll_transmit().is_some());

        timer.advance(Duration::from_millis(50));
        assert!(!host.timer_update().transmit);
        timer.advance(Duration::from_millis(50));
        assert!(host.timer_update().transmit);
        assert_eq!(host.poll_transmit().map(control), Some(ControlMsg::Sync));
        assert!(host.poll_transmit().is_none());
    }

    #[test]
    fn handshake_negotiates() {
        let timer = MockTimer::default();
        let mut a = Link::new(
            Config::default().with_window(7).unwrap().with_sw_flow_control(true),
            timer.clone(),
        );
        let mut b = Link::new(
            Config::default().with_window(2).unwrap().with_crc(false),
            timer.clone(),
        );
        a.start();
        b.start();
        for _ in 0..4 {
            shuttle(&mut a, &mut b);
            shuttle(&mut b, &mut a);
        }

        let expected = ConfigField::new(2, false, false);
        assert_eq!(a.negotiated(), Some(expected));
        assert_eq!(b.negotiated(), Some(expected));
        assert_eq!(a.arq().window(), 2);
        assert!(!a.sw_flow_control());
        assert_eq!(a.peer_state(), PeerState::Active);
        assert_eq!(a.next_deadline(), None);
    }

    #[test]
    fn wait_peer_active() {
        let timer = MockTimer::default();
        let (mut a, mut b) = (link(&timer), link(&timer));
        a.start();
        b.start();
        shuttle(&mut a, &mut b); // SYNC
        shuttle(&mut b, &mut a); // SYNC, SYNC_RESP
        shuttle(&mut a, &mut b); // SYNC_RESP, CONF

        // b answers a's CONF, but a doesn't see b's CONF yet.
        let frames: Vec<_> = core::iter::from_fn(|| b.poll_transmit()).collect();
        let kinds: Vec<_> = frames.iter().cloned().map(control).collect();
        assert_eq!(
            kinds,
            [
                ControlMsg::Conf(Some(Config::default().config_field())),
                ControlMsg::ConfResp(Some(Config::default().config_field())),
            ]
        );
        a.receive(frames[1].clone());
        assert_eq!(a.state(), LinkState::WaitPeerActive);

        a.receive(frames[0].clone());
        assert_eq!(a.state(), LinkState::Active);
    }

    #[test]
    fn packets_before_active_are_queued() {
        let timer = MockTimer::default();
        let (mut a, mut b) = (link(&timer), link(&timer));
        a.send(acl(1)).unwrap();
        a.start();
        b.start();
        for _ in 0..5 {
            shuttle(&mut a, &mut b);
            shuttle(&mut b, &mut a);
        }

        let received: Vec<_> = events(&mut b)
            .into_iter()
            .filter_map(|e| match e {
                Event::Packet(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(received, [acl(1)]);
        assert_eq!(a.arq().outstanding(), 0);
    }

    #[test]
    fn data_and_ack() {
        let timer = MockTimer::default();
        let (mut a, mut b) = establish(&timer);

        assert!(a.send(acl(1)).unwrap().transmit);
        a.send(Packet::new(PacketType::Event, &[0x0e, 0x00])).unwrap();
        let frame = a.poll_transmit().unwrap();
        // Unreliable goes first.
        assert!(!header(&frame).reliable);
        b.receive(frame);
        let frame = a.poll_transmit().unwrap();
        assert!(header(&frame).reliable);
        assert!(header(&frame).crc_present);
        assert!(a.next_deadline().is_some());
        b.receive(frame);
        assert!(a.poll_transmit().is_none());

        assert_eq!(
            events(&mut b),
            [
                Event::Packet(Packet::new(PacketType::Event, &[0x0e, 0x00])),
                Event::Packet(acl(1)),
            ]
        );

        // b owes an acknowledgement.
        let ack = b.poll_transmit().unwrap();
        assert_eq!(header(&ack).ty, PacketType::Ack);
        assert_eq!(header(&ack).ack, SeqNum::new(1));
        assert!(b.poll_transmit().is_none());

        a.receive(ack);
        assert_eq!(a.arq().outstanding(), 0);
        assert_eq!(a.next_deadline(), None);
    }

    #[test]
    fn rejects_bad_packets() {
        let timer = MockTimer::default();
        let mut a = link(&timer);
        assert_eq!(
            a.send(Packet::new(PacketType::LinkControl, &[1, 0x7e])).err(),
            Some(Error::InvalidValue)
        );
        assert_eq!(
            a.send(Packet::new(PacketType::AclData, &[0; 4096])).err(),
            Some(Error::InvalidLength)
        );
        assert_eq!(a.sleep().err(), Some(Error::NotActive));
    }

    #[test]
    fn integrity_errors_are_reported() {
        let timer = MockTimer::default();
        let (mut a, mut b) = establish(&timer);

        a.send(acl(1)).unwrap();
        let mut frame = a.poll_transmit().unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        b.receive(frame);

        assert_eq!(events(&mut b), [Event::Fault(Fault::Crc)]);
        assert!(b.poll_transmit().is_none());
        assert_eq!(b.arq().ack(), SeqNum::ZERO);
    }

    #[test]
    fn retransmits_until_limit() {
        let timer = MockTimer::default();
        let (mut a, _b) = establish(&timer);
        let rto = Config::default().retransmit_timeout();

        a.send(acl(1)).unwrap();
        for _ in 0..=Config::default().max_retries() {
            let frame = a.poll_transmit().unwrap();
            assert_eq!(header(&frame).seq, SeqNum::ZERO);
            timer.advance(rto);
            a.timer_update();
        }

        assert_eq!(events(&mut a), [Event::Fault(Fault::RetryLimitExceeded)]);
        assert!(Fault::RetryLimitExceeded.is_fatal());

        // Later sends re-arm the timer, but the limit is only reported once.
        a.send(acl(2)).unwrap();
        for _ in 0..3 {
            while a.poll_transmit().is_some() {}
            timer.advance(rto);
            a.timer_update();
        }
        assert!(events(&mut a).is_empty());
    }

    #[test]
    fn retry_limit_of_255() {
        let timer = MockTimer::default();
        let (mut a, _b) = establish(&timer);
        let config = Config::default().with_max_retries(255).unwrap();
        a.config = config;
        let rto = config.retransmit_timeout();

        a.send(acl(1)).unwrap();
        for _ in 0..300 {
            while a.poll_transmit().is_some() {}
            timer.advance(rto);
            a.timer_update();
        }
        assert_eq!(events(&mut a), [Event::Fault(Fault::RetryLimitExceeded)]);

        assert!(a.poll_transmit().is_none());

        // An acknowledgement resets the count.
        let ack = bcsp::pack(Frame::new(), PacketType::Ack, SeqNum::ZERO, SeqNum::new(1), false);
        a.receive(ack);
        assert_eq!(a.arq().outstanding(), 0);
        assert_eq!(a.retries, 0);
        assert!(!a.flags.contains(Flags::RETRIES_EXHAUSTED));
    }

    #[test]
    fn out_of_sequence() {
        let timer = MockTimer::default();
        let (mut a, mut b) = establish(&timer);

        a.send(acl(1)).unwrap();
        a.send(acl(2)).unwrap();
        let _lost = a.poll_transmit().unwrap();
        let second = a.poll_transmit().unwrap();
        b.receive(second);

        assert_eq!(events(&mut b), [Event::Fault(Fault::OutOfSequence)]);
        let ack = b.poll_transmit().unwrap();
        assert_eq!(header(&ack).ty, PacketType::Ack);
        assert_eq!(header(&ack).ack, SeqNum::ZERO);
    }

    #[test]
    fn peer_reset_while_active() {
        let timer = MockTimer::default();
        let (mut a, _b) = establish(&timer);
        let mut fresh = link(&timer);
        fresh.start();
        shuttle(&mut fresh, &mut a);
        assert_eq!(events(&mut a), [Event::Fault(Fault::PeerReset)]);
        assert_eq!(a.state(), LinkState::Active);
    }

    #[test]
    fn wakes_sleeping_peer() {
        let timer = MockTimer::default();
        let (mut a, mut b) = establish(&timer);

        b.sleep().unwrap();
        assert_eq!(b.state(), LinkState::LowPower);
        shuttle(&mut b, &mut a);
        assert_eq!(a.peer_state(), PeerState::LowPower);

        a.send(acl(1)).unwrap();
        assert_eq!(a.poll_transmit().map(control), Some(ControlMsg::Wakeup));
        // No second WAKEUP, and no data within the guard time.
        assert!(a.poll_transmit().is_none());
        assert!(a.poll_transmit().is_none());

        let wakeup = bcsp::pack(
            Frame::from_slice(&ControlMsg::Wakeup.to_bytes()),
            PacketType::LinkControl,
            SeqNum::ZERO,
            SeqNum::ZERO,
            false,
        );
        b.receive(wakeup);
        assert_eq!(b.state(), LinkState::Active);
        shuttle(&mut b, &mut a);
        assert_eq!(a.peer_state(), PeerState::Active);

        let data = a.poll_transmit().unwrap();
        assert_eq!(header(&data).ty, PacketType::AclData);
    }

    #[test]
    fn acknowledgement_wakes_sleeping_peer() {
        let timer = MockTimer::default();
        let (mut a, mut b) = establish(&timer);

        b.sleep().unwrap();
        shuttle(&mut b, &mut a);
        assert_eq!(a.peer_state(), PeerState::LowPower);

        // b sends reliable data without announcing that it is awake.
        b.send(acl(1)).unwrap();
        shuttle(&mut b, &mut a);
        assert!(matches!(events(&mut a).as_slice(), [Event::Packet(_)]));

        // WAKEUP goes out first, carrying the acknowledgement.
        let wakeup = a.poll_transmit().unwrap();
        assert_eq!(header(&wakeup).ack, SeqNum::new(1));
        assert_eq!(control(wakeup.clone()), ControlMsg::Wakeup);
        assert!(a.poll_transmit().is_none());

        b.receive(wakeup);
        assert_eq!(b.arq().outstanding(), 0);
        shuttle(&mut b, &mut a);
        assert_eq!(a.peer_state(), PeerState::Active);
    }

    #[test]
    fn guard_time_then_data() {
        let timer = MockTimer::default();
        let (mut a, mut b) = establish(&timer);
        b.sleep().unwrap();
        shuttle(&mut b, &mut a);

        a.send(acl(1)).unwrap();
        assert_eq!(a.poll_transmit().map(control), Some(ControlMsg::Wakeup));
        let guard = timer.now() + Config::default().wakeup_guard();
        assert_eq!(a.cmd().next_update, NextUpdate::At(guard));

        timer.advance(Config::default().wakeup_guard());
        a.timer_update();
        let data = a.poll_transmit().unwrap();
        assert_eq!(header(&data).ty, PacketType::AclData);

        // Peer still asleep when the wakeup interval runs out: try again.
        a.send(acl(2)).unwrap();
        timer.advance(Config::default().wakeup_interval());
        a.timer_update();
        assert_eq!(a.poll_transmit().map(control), Some(ControlMsg::Wakeup));
    }

    #[test]
    fn cross_scenario_reload() {
        let timer = MockTimer::default();
        let (mut a, mut b) = establish(&timer);

        for tag in 0..3 {
            a.send(acl(tag)).unwrap();
        }
        shuttle(&mut a, &mut b);
        shuttle(&mut b, &mut a);
        assert_eq!(a.arq().rack(), SeqNum::new(3));

        a.send(acl(3)).unwrap();
        a.send(acl(4)).unwrap();
        let lost: Vec<_> = core::iter::from_fn(|| a.poll_transmit()).collect();
        assert_eq!(lost.len(), 2);
        assert_eq!(a.arq().seq(), SeqNum::new(5));

        b.sleep().unwrap();
        shuttle(&mut b, &mut a);

        assert_eq!(a.peer_state(), PeerState::LowPower);
        assert_eq!(a.arq().outstanding(), 0);
        assert_eq!(a.arq().seq(), SeqNum::new(3));
        assert_eq!(a.arq().credit(), a.arq().window());

        // The wakeup timer fires right away and the peer is woken before the resend.
        a.timer_update();
        assert_eq!(a.poll_transmit().map(control), Some(ControlMsg::Wakeup));
    }

    #[test]
    fn local_wake_on_send() {
        let timer = MockTimer::default();
        let (mut a, _b) = establish(&timer);
        a.sleep().unwrap();
        assert_eq!(a.poll_transmit().map(control), Some(ControlMsg::Sleep));
        a.send(acl(1)).unwrap();
        assert_eq!(a.state(), LinkState::Active);
    }

    #[test]
    fn shutdown_clears_everything() {
        let timer = MockTimer::default();
        let (mut a, _b) = establish(&timer);
        a.send(acl(1)).unwrap();
        a.poll_transmit();
        a.send(acl(2)).unwrap();

        a.shutdown();
        assert_eq!(a.next_deadline(), None);
        assert_eq!(a.arq().outstanding(), 0);
        assert!(!a.has_pending_tx());
        assert!(a.poll_event().is_none());
    }
}
