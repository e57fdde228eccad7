//! Per-allocation inbound packet verifier.

use std::net::SocketAddr;
use std::time::Instant;

use crate::error::Error;
use crate::payload::{self, DecodeError};

/// Verifies inbound TPRF packets against the cookie/alloc_id this
/// allocation expects, and tracks reception statistics.
pub struct Receiver {
    cookie: u32,
    alloc_id: u32,
    ts_start: Option<Instant>,
    ts_last: Option<Instant>,
    total_bytes: u64,
    total_packets: u64,
    last_seq: u32,
}

impl Receiver {
    pub fn new(cookie: u32, alloc_id: u32) -> Self {
        Self {
            cookie,
            alloc_id,
            ts_start: None,
            ts_last: None,
            total_bytes: 0,
            total_packets: 0,
            last_seq: 0,
        }
    }

    /// Verifies and accounts for one inbound packet, already stripped of
    /// TURN channel/indication framing.
    ///
    /// Packets that don't look like TPRF traffic at all are tolerated
    /// (logged, not counted, `Ok(())` returned) since unrelated traffic
    /// can reach the same echo peer. A wrong cookie or alloc_id is a
    /// protocol violation and is returned as an error without being
    /// counted.
    pub fn recv(&mut self, src: SocketAddr, bytes: &[u8]) -> Result<(), Error> {
        let now = Instant::now();
        if self.ts_start.is_none() {
            self.ts_start = Some(now);
        }
        self.ts_last = Some(now);

        let mut pos = 0;
        let hdr = match payload::decode(bytes, &mut pos) {
            Ok(hdr) => hdr,
            Err(DecodeError::BadMessage) => {
                log::warn!(
                    "[{}] ignoring {} non-turnperf bytes from {src}",
                    self.alloc_id,
                    bytes.len()
                );
                return Ok(());
            }
            Err(DecodeError::Protocol) => {
                return Err(Error::Protocol("declared payload_len exceeds buffer"));
            }
        };

        if hdr.session_cookie != self.cookie {
            log::error!(
                "[{}] wrong session cookie from {src} (expected {:#x}, got {:#x})",
                self.alloc_id,
                self.cookie,
                hdr.session_cookie,
            );
            return Err(Error::Protocol("wrong session cookie"));
        }

        if hdr.alloc_id != self.alloc_id {
            log::error!(
                "[{}] wrong alloc_id from {src} (expected {}, got {})",
                self.alloc_id,
                self.alloc_id,
                hdr.alloc_id,
            );
            return Err(Error::Protocol("wrong alloc_id"));
        }

        if self.last_seq != 0 && hdr.seq <= self.last_seq {
            log::warn!(
                "[{}] late or out-of-order packet from {src} (last_seq={}, seq={})",
                self.alloc_id,
                self.last_seq,
                hdr.seq,
            );
        }

        self.total_bytes += bytes.len() as u64;
        self.total_packets += 1;
        // `last_seq` tracks the maximum seq ever observed: an out-of-order
        // packet is logged above but never pulls this back down.
        self.last_seq = self.last_seq.max(hdr.seq);

        Ok(())
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Average bitrate in bits/second over the receiver's observed span,
    /// or `None` before any packet has arrived.
    pub fn bitrate(&self) -> Option<f64> {
        let start = self.ts_start?;
        let last = self.ts_last?;
        let secs = last.duration_since(start).as_secs_f64();
        if secs <= 0.0 {
            return None;
        }
        Some(self.total_bytes as f64 / (secs / 8.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encode_packet(cookie: u32, alloc_id: u32, seq: u32, payload_len: usize) -> BytesMut {
        let mut buf = BytesMut::with_capacity(64);
        payload::encode(&mut buf, cookie, alloc_id, seq, payload_len, payload::PATTERN);
        buf
    }

    fn peer() -> SocketAddr {
        "203.0.113.1:4000".parse().unwrap()
    }

    #[test]
    fn accepts_matching_packets_and_counts_them() {
        let mut recv = Receiver::new(0xAAAA, 3);
        let pkt = encode_packet(0xAAAA, 3, 1, 10);
        recv.recv(peer(), &pkt).unwrap();
        assert_eq!(recv.total_packets(), 1);
        assert_eq!(recv.total_bytes(), pkt.len() as u64);
    }

    #[test]
    fn rejects_wrong_cookie_without_counting() {
        let mut recv = Receiver::new(0xAAAA, 3);
        let pkt = encode_packet(0xBBBB, 3, 1, 10);
        assert!(recv.recv(peer(), &pkt).is_err());
        assert_eq!(recv.total_packets(), 0);
    }

    #[test]
    fn rejects_wrong_alloc_id_without_counting() {
        let mut recv = Receiver::new(0xAAAA, 3);
        let pkt = encode_packet(0xAAAA, 9, 1, 10);
        assert!(recv.recv(peer(), &pkt).is_err());
        assert_eq!(recv.total_packets(), 0);
    }

    #[test]
    fn tolerates_non_turnperf_traffic() {
        let mut recv = Receiver::new(0xAAAA, 3);
        assert!(recv.recv(peer(), b"not turnperf").is_ok());
        assert_eq!(recv.total_packets(), 0);
    }

    #[test]
    fn out_of_order_sequence_is_still_counted() {
        let mut recv = Receiver::new(0xAAAA, 3);
        recv.recv(peer(), &encode_packet(0xAAAA, 3, 5, 4)).unwrap();
        recv.recv(peer(), &encode_packet(0xAAAA, 3, 2, 4)).unwrap();
        assert_eq!(recv.total_packets(), 2);
    }

    #[test]
    fn last_seq_tracks_the_maximum_not_the_latest() {
        let mut recv = Receiver::new(0xAAAA, 3);
        recv.recv(peer(), &encode_packet(0xAAAA, 3, 5, 4)).unwrap();
        assert_eq!(recv.last_seq, 5);
        recv.recv(peer(), &encode_packet(0xAAAA, 3, 2, 4)).unwrap();
        assert_eq!(recv.last_seq, 5);
    }
}
