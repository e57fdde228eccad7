//! Byte-stream framing for the TCP and TLS-over-TCP transports (§4.4.5,
//! §9): turnperf speaks self-delimited STUN messages and ChannelData
//! frames, but `read()` on a stream socket has no notion of where one
//! frame ends and the next begins.
//!
//! An owned [`bytes::BytesMut`] with an explicit read cursor, compacted
//! after every frame extracted. The teacher's server-side accept loop
//! solves the same problem with a double-buffer swap behind an unsafe
//! transmute; a benchmarking client doing far less throughput per
//! connection has no need for that, so this just advances a cursor.

use bytes::{Buf, BytesMut};

use crate::error::Error;

pub struct ReassemblyBuffer {
    buf: BytesMut,
    head: usize,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
            head: 0,
        }
    }

    /// Appends a chunk just read off the socket.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pulls one complete frame (STUN message or ChannelData, padded to a
    /// 4-byte boundary) out of the buffer. `Ok(None)` means more input is
    /// needed; call again after the next `push`. An `Err` means the
    /// stream desynchronized (a leading byte with both high bits set,
    /// RFC 8656 §12) and the transport must be torn down.
    pub fn next_frame(&mut self) -> Result<Option<BytesMut>, Error> {
        let available = &self.buf[self.head..];
        if available.is_empty() {
            self.compact();
            return Ok(None);
        }

        match codec::Decoder::message_size(available, true) {
            Ok(size) => {
                if available.len() < size {
                    return Ok(None);
                }

                let frame = BytesMut::from(&available[..size]);
                self.head += size;
                self.compact();
                Ok(Some(frame))
            }
            Err(codec::Error::Incomplete) => Ok(None),
            Err(_) => Err(Error::Protocol("corrupt byte stream framing")),
        }
    }

    fn compact(&mut self) {
        if self.head > 0 {
            self.buf.advance(self.head);
            self.head = 0;
        }
    }
}

impl Default for ReassemblyBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::ChannelData;

    fn channel_frame(number: u16, payload: &[u8]) -> BytesMut {
        let mut bytes = BytesMut::with_capacity(64);
        ChannelData { number, bytes: payload }.encode(&mut bytes);
        let rem = bytes.len() % 4;
        if rem != 0 {
            bytes.resize(bytes.len() + (4 - rem), 0);
        }
        bytes
    }

    #[test]
    fn incomplete_frame_yields_none() {
        let mut rb = ReassemblyBuffer::new();
        rb.push(&[0x40, 0x00, 0x00, 0x10]);
        assert!(rb.next_frame().unwrap().is_none());
    }

    #[test]
    fn two_frames_delivered_in_one_read_both_come_out() {
        let mut rb = ReassemblyBuffer::new();
        let a = channel_frame(0x4000, b"hello");
        let b = channel_frame(0x4001, b"world!!!");

        let mut chunk = BytesMut::new();
        chunk.extend_from_slice(&a);
        chunk.extend_from_slice(&b);
        rb.push(&chunk);

        let first = rb.next_frame().unwrap().unwrap();
        assert_eq!(first, a);
        let second = rb.next_frame().unwrap().unwrap();
        assert_eq!(second, b);
        assert!(rb.next_frame().unwrap().is_none());
    }

    #[test]
    fn frame_split_across_two_pushes_waits_for_the_rest() {
        let mut rb = ReassemblyBuffer::new();
        let full = channel_frame(0x4002, b"split payload here");

        rb.push(&full[..6]);
        assert!(rb.next_frame().unwrap().is_none());

        rb.push(&full[6..]);
        let frame = rb.next_frame().unwrap().unwrap();
        assert_eq!(frame, full);
    }

    #[test]
    fn leading_byte_with_both_high_bits_set_is_fatal() {
        let mut rb = ReassemblyBuffer::new();
        rb.push(&[0xC0, 0x00, 0x00, 0x00]);
        assert!(rb.next_frame().is_err());
    }
}
