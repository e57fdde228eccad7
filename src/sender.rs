//! Per-allocation paced synthetic traffic generator.

use bytes::BytesMut;
use rand::Rng;
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::payload;

/// Bytes reserved at the front of every packet this sender encodes.
/// `Allocation::allocation_tx` bypasses the TURN client and sends straight
/// to the relay, so it trims this prefix off before the packet ever
/// reaches a socket; it exists so the TPRF header always starts at a
/// fixed offset regardless of how much framing headroom a future
/// TURN-wrapped transmit path might need.
pub const RESERVED_PREFIX: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Stopped,
    Running,
}

/// Paced generator: holds a monotonic sequence counter and a next-fire
/// timestamp that `tick` advances by exactly `ptime` per packet emitted,
/// with no cap on how many packets one tick may emit (catch-up policy).
pub struct Sender {
    alloc_id: u32,
    session_cookie: u32,
    seq: u32,

    bitrate: u32,
    ptime: Duration,
    psize: usize,

    state: State,
    next_fire: Instant,
    ts_start: Option<Instant>,
    ts_stop: Option<Instant>,

    total_bytes: u64,
    total_packets: u64,
}

impl Sender {
    /// `psize` must be at least the TPRF header size (20 bytes); `ptime`
    /// must be at least the pacing tick (5 ms).
    pub fn new(alloc_id: u32, session_cookie: u32, bitrate: u32, ptime_ms: u32, psize: usize) -> Result<Self, Error> {
        if psize < payload::HDR_SIZE {
            return Err(Error::InvalidArgument("psize smaller than TPRF header"));
        }
        if ptime_ms < crate::allocator::PACING_INTERVAL_MS {
            return Err(Error::InvalidArgument("ptime below the pacing tick"));
        }

        Ok(Self {
            alloc_id,
            session_cookie,
            seq: 0,
            bitrate,
            ptime: Duration::from_millis(ptime_ms as u64),
            psize,
            state: State::Stopped,
            next_fire: Instant::now(),
            ts_start: None,
            ts_stop: None,
            total_bytes: 0,
            total_packets: 0,
        })
    }

    /// Starts the sender: captures the start time and jitters the first
    /// fire by a uniform `[0, 100)` ms delay so many senders kicked off
    /// in the same pacing tick don't all transmit in lockstep.
    pub fn start(&mut self) {
        let now = Instant::now();
        self.ts_start = Some(now);
        let jitter_ms = rand::thread_rng().gen_range(0..100);
        self.next_fire = now + Duration::from_millis(jitter_ms);
        self.state = State::Running;
    }

    pub fn stop(&mut self) {
        self.ts_stop = Some(Instant::now());
        self.state = State::Stopped;
    }

    /// Emits every packet due by `now`, advancing `next_fire` by `ptime`
    /// per packet. Returns the encoded packets (each prefixed with
    /// [`RESERVED_PREFIX`] unused bytes); the caller sends only the
    /// payload past that prefix.
    pub fn tick(&mut self, now: Instant) -> Vec<BytesMut> {
        if self.state != State::Running {
            return Vec::new();
        }

        let mut packets = Vec::new();
        while now >= self.next_fire {
            packets.push(self.encode_packet());
            self.next_fire += self.ptime;
        }
        packets
    }

    fn encode_packet(&mut self) -> BytesMut {
        self.seq += 1;

        let payload_len = self.psize - payload::HDR_SIZE;
        let mut buf = BytesMut::with_capacity(RESERVED_PREFIX + self.psize);
        buf.resize(RESERVED_PREFIX, 0);
        payload::encode(&mut buf, self.session_cookie, self.alloc_id, self.seq, payload_len, payload::PATTERN);

        self.total_bytes += (buf.len() - RESERVED_PREFIX) as u64;
        self.total_packets += 1;

        buf
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets
    }

    /// Average bitrate in bits/second over `[start, stop)`, or `None` if
    /// the sender hasn't both started and stopped.
    pub fn bitrate(&self) -> Option<f64> {
        let start = self.ts_start?;
        let stop = self.ts_stop?;
        let secs = stop.duration_since(start).as_secs_f64();
        if secs <= 0.0 {
            return None;
        }
        Some(self.total_bytes as f64 / (secs / 8.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_psize_below_header() {
        assert!(Sender::new(0, 0, 64_000, 20, 10).is_err());
    }

    #[test]
    fn rejects_ptime_below_pacing_tick() {
        assert!(Sender::new(0, 0, 64_000, 1, 160).is_err());
    }

    #[test]
    fn catch_up_tick_emits_all_due_packets() {
        let mut sender = Sender::new(0, 0xAAAA, 64_000, 20, 160).unwrap();
        sender.start();

        let far_future = Instant::now() + Duration::from_millis(500);
        let packets = sender.tick(far_future);

        assert!(packets.len() >= 20);
        for p in &packets {
            assert_eq!(p.len(), RESERVED_PREFIX + 160);
        }
        assert_eq!(sender.total_packets(), packets.len() as u64);
    }

    #[test]
    fn stopped_sender_emits_nothing() {
        let mut sender = Sender::new(0, 0, 64_000, 20, 160).unwrap();
        assert!(sender.tick(Instant::now() + Duration::from_secs(1)).is_empty());
    }
}
