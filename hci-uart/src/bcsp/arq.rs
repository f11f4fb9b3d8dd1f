//! Sliding window retransmission (go-back-N).
//!
//! Reliable packets go through three stages: *queued* in the reliable queue, *sent* (moved into
//! the sent queue with a sequence number assigned, consuming one unit of credit) and finally
//! *acknowledged* (removed from the sent queue when the peer's `ack` field moves past them). When
//! the retransmission timer fires, every sent packet is *reloaded* to the head of the reliable
//! queue and the sequence number is rolled back, so the whole window is sent again.
//!
//! Unreliable packets bypass all of this and are sent once, in order.
//!
//! The counters satisfy `seq - rack == sent.len() <= window` (modulo 8) at all times.

use super::SeqNum;
use crate::packet::Packet;
use alloc::collections::VecDeque;

/// Transmit queues and sequence counters of one BCSP link.
pub struct Arq {
    reliable: VecDeque<Packet>,
    unreliable: VecDeque<Packet>,
    sent: VecDeque<Packet>,

    /// Sequence number for the next new reliable packet.
    seq: SeqNum,

    /// Next sequence number we expect from the peer. Sent as our `ack` field.
    ack: SeqNum,

    /// Last `ack` field received from the peer.
    rack: SeqNum,

    window: u8,
    credit: u8,
}

impl Arq {
    pub fn new(window: u8) -> Self {
        Self {
            reliable: VecDeque::new(),
            unreliable: VecDeque::new(),
            sent: VecDeque::new(),
            seq: SeqNum::ZERO,
            ack: SeqNum::ZERO,
            rack: SeqNum::ZERO,
            window,
            credit: window,
        }
    }

    /// Queues a packet for transmission, on the reliable or unreliable queue depending on its type.
    pub fn enqueue(&mut self, packet: Packet) {
        if packet.ty.is_reliable() {
            self.reliable.push_back(packet);
        } else {
            self.unreliable.push_back(packet);
        }
    }

    /// Takes the next unreliable packet.
    pub fn next_unreliable(&mut self) -> Option<Packet> {
        self.unreliable.pop_front()
    }

    /// Takes the next reliable packet if the window has room for it.
    ///
    /// The packet is assigned the current sequence number and a copy stays in the sent queue until
    /// it is acknowledged.
    pub fn next_reliable(&mut self) -> Option<(SeqNum, Packet)> {
        if self.credit == 0 {
            return None;
        }

        let packet = self.reliable.pop_front()?;
        let seq = self.seq;
        self.seq += 1;
        self.credit -= 1;
        self.sent.push_back(packet.clone());
        self.check_invariant();
        Some((seq, packet))
    }

    /// Checks the sequence number of an incoming reliable packet.
    ///
    /// Returns `true` and advances our `ack` if it is the one we expect.
    pub fn accept(&mut self, seq: SeqNum) -> bool {
        if seq == self.ack {
            self.ack += 1;
            true
        } else {
            false
        }
    }

    /// Processes the `ack` field of an incoming packet.
    ///
    /// Returns the number of packets that were newly acknowledged and removed from the sent queue.
    /// Receiving the same `ack` again removes nothing.
    pub fn acknowledge(&mut self, rack: SeqNum) -> usize {
        let count = if rack == self.seq {
            self.sent.len()
        } else {
            usize::from(rack - self.rack)
        };

        if count > self.sent.len() {
            warn!(
                "ARQ: peer acked {} packets, only {} outstanding (rack {} -> {}, seq {})",
                count,
                self.sent.len(),
                self.rack,
                rack,
                self.seq
            );
            return 0;
        }

        for _ in 0..count {
            self.sent.pop_front();
        }
        self.rack = rack;
        self.credit += count as u8;
        self.check_invariant();
        count
    }

    /// Moves all unacknowledged packets back to the head of the reliable queue, in their original
    /// order, and rolls the sequence number back accordingly.
    ///
    /// Returns the number of packets reloaded. Credit is fully restored.
    pub fn reload(&mut self) -> usize {
        let count = self.sent.len();
        while let Some(packet) = self.sent.pop_back() {
            self.reliable.push_front(packet);
        }
        self.seq = self.seq - count as u8;
        self.credit = self.window;
        self.check_invariant();
        count
    }

    /// Resets all counters to 0 and switches to a new window size.
    ///
    /// Anything still in flight is put back on the reliable queue.
    pub fn reset(&mut self, window: u8) {
        self.reload();
        self.seq = SeqNum::ZERO;
        self.ack = SeqNum::ZERO;
        self.rack = SeqNum::ZERO;
        self.window = window;
        self.credit = window;
    }

    /// Drops every queued and unacknowledged packet.
    pub fn purge(&mut self) {
        self.reliable.clear();
        self.unreliable.clear();
        self.sent.clear();
        self.rack = self.seq;
        self.credit = self.window;
    }

    pub fn seq(&self) -> SeqNum {
        self.seq
    }

    pub fn ack(&self) -> SeqNum {
        self.ack
    }

    pub fn rack(&self) -> SeqNum {
        self.rack
    }

    pub fn window(&self) -> u8 {
        self.window
    }

    pub fn credit(&self) -> u8 {
        self.credit
    }

    /// Returns the number of sent but unacknowledged packets.
    pub fn outstanding(&self) -> usize {
        self.sent.len()
    }

    /// Returns whether there are packets waiting to be sent for the first time (or again).
    pub fn has_queued(&self) -> bool {
        !self.reliable.is_empty() || !self.unreliable.is_empty()
    }

    /// Returns whether the next `next_reliable` call would produce a packet.
    pub fn can_send_reliable(&self) -> bool {
        self.credit > 0 && !self.reliable.is_empty()
    }

    /// Returns whether there is an unreliable packet waiting.
    pub fn has_unreliable(&self) -> bool {
        !self.unreliable.is_empty()
    }

    fn check_invariant(&self) {
        debug_assert_eq!(usize::from(self.seq - self.rack), self.sent.len());
        debug_assert!(self.sent.len() <= usize::from(self.window));
        debug_assert_eq!(usize::from(self.credit) + self.sent.len(), usize::from(self.window));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketType;

    fn acl(tag: u8) -> Packet {
        Packet::new(PacketType::AclData, &[tag])
    }

    fn send_all(arq: &mut Arq) -> alloc::vec::Vec<u8> {
        let mut seqs = alloc::vec::Vec::new();
        while let Some((seq, _)) = arq.next_reliable() {
            seqs.push(seq.value());
        }
        seqs
    }

    #[test]
    fn window_limits_outstanding() {
        let mut arq = Arq::new(3);
        for i in 0..5 {
            arq.enqueue(acl(i));
        }

        assert_eq!(send_all(&mut arq), [0, 1, 2]);
        assert_eq!(arq.credit(), 0);
        assert_eq!(arq.outstanding(), 3);
        assert!(!arq.can_send_reliable());

        assert_eq!(arq.acknowledge(SeqNum::new(2)), 2);
        assert_eq!(usize::from(arq.seq() - arq.rack()), arq.outstanding());
        assert_eq!(send_all(&mut arq), [3, 4]);
        assert_eq!(arq.outstanding(), 3);
    }

    #[test]
    fn unreliable_is_separate() {
        let mut arq = Arq::new(1);
        arq.enqueue(Packet::new(PacketType::Event, &[1]));
        arq.enqueue(acl(2));
        arq.enqueue(Packet::new(PacketType::ScoData, &[3]));

        assert_eq!(arq.next_unreliable().map(|p| p.ty), Some(PacketType::Event));
        assert_eq!(arq.next_unreliable().map(|p| p.ty), Some(PacketType::ScoData));
        assert!(arq.next_unreliable().is_none());
        assert_eq!(
            arq.next_reliable().map(|(s, p)| (s, p.ty)),
            Some((SeqNum::ZERO, PacketType::AclData))
        );
    }

    #[test]
    fn acknowledge_is_idempotent() {
        let mut arq = Arq::new(4);
        for i in 0..3 {
            arq.enqueue(acl(i));
        }
        send_all(&mut arq);

        assert_eq!(arq.acknowledge(SeqNum::new(1)), 1);
        assert_eq!(arq.acknowledge(SeqNum::new(1)), 0);
        assert_eq!(arq.outstanding(), 2);
        assert_eq!(arq.credit(), 2);

        // Acknowledging everything purges the sent queue.
        assert_eq!(arq.acknowledge(SeqNum::new(3)), 2);
        assert_eq!(arq.acknowledge(SeqNum::new(3)), 0);
        assert_eq!(arq.outstanding(), 0);
        assert_eq!(arq.credit(), 4);
    }

    #[test]
    fn bogus_ack_is_ignored() {
        let mut arq = Arq::new(4);
        arq.enqueue(acl(0));
        send_all(&mut arq);
        assert_eq!(arq.acknowledge(SeqNum::new(5)), 0);
        assert_eq!(arq.rack(), SeqNum::ZERO);
        assert_eq!(arq.outstanding(), 1);
    }

    #[test]
    fn go_back_n() {
        let mut arq = Arq::new(4);
        arq.enqueue(acl(0));
        arq.enqueue(acl(1));
        send_all(&mut arq);
        arq.acknowledge(SeqNum::new(2));

        for tag in 2..5 {
            arq.enqueue(acl(tag));
        }
        arq.enqueue(acl(5));
        assert_eq!(send_all(&mut arq), [2, 3, 4, 5]);
        arq.acknowledge(SeqNum::new(2));
        assert_eq!(arq.outstanding(), 4);

        assert_eq!(arq.reload(), 4);
        assert_eq!(arq.seq(), SeqNum::new(2));
        assert_eq!(arq.credit(), 4);
        assert_eq!(arq.outstanding(), 0);

        let resent: alloc::vec::Vec<_> = core::iter::from_fn(|| arq.next_reliable())
            .map(|(seq, p)| (seq.value(), p.data[0]))
            .collect();
        assert_eq!(resent, [(2, 2), (3, 3), (4, 4), (5, 5)]);
    }

    #[test]
    fn go_back_n_three_outstanding() {
        let mut arq = Arq::new(7);
        arq.enqueue(acl(0));
        arq.enqueue(acl(1));
        send_all(&mut arq);
        arq.acknowledge(SeqNum::new(2));
        for tag in 2..5 {
            arq.enqueue(acl(tag));
        }
        send_all(&mut arq);
        assert_eq!(arq.seq(), SeqNum::new(5));

        assert_eq!(arq.reload(), 3);
        assert_eq!(arq.seq(), SeqNum::new(2));
        assert_eq!(arq.credit(), 7);
        let heads: alloc::vec::Vec<_> = arq.reliable.iter().map(|p| p.data[0]).collect();
        assert_eq!(heads, [2, 3, 4]);
    }

    #[test]
    fn wraps_around() {
        let mut arq = Arq::new(7);
        for round in 0..3u8 {
            for i in 0..5 {
                arq.enqueue(acl(i));
            }
            send_all(&mut arq);
            let acked = arq.seq();
            assert_eq!(arq.acknowledge(acked), 5);
            assert_eq!(arq.seq().value(), (round + 1) * 5 % 8);
        }
    }

    #[test]
    fn reset_keeps_queued() {
        let mut arq = Arq::new(4);
        arq.enqueue(acl(0));
        arq.enqueue(acl(1));
        arq.next_reliable();
        arq.accept(SeqNum::ZERO);
        arq.reset(2);

        assert_eq!(arq.seq(), SeqNum::ZERO);
        assert_eq!(arq.ack(), SeqNum::ZERO);
        assert_eq!(arq.window(), 2);
        assert_eq!(send_all(&mut arq), [0, 1]);
    }
}
