//! The TPRF test-payload wire format: a 20-byte header identifying the
//! run (session cookie), the allocation (alloc_id), and the packet
//! (seq), followed by `payload_len` bytes of filler.

use bytes::{BufMut, BytesMut};

pub const MAGIC: [u8; 4] = *b"TPRF";
pub const HDR_SIZE: usize = 20;
pub const PATTERN: u8 = 0xA5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub session_cookie: u32,
    pub alloc_id: u32,
    pub seq: u32,
    pub payload_len: u32,
}

/// Decode failures, split the way the receiver needs to treat them:
/// `BadMessage` is tolerated noise (unrelated traffic hit the socket),
/// `Protocol` is a genuine framing violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("not a turnperf packet")]
    BadMessage,
    #[error("declared payload_len exceeds remaining buffer")]
    Protocol,
}

/// Writes the 20-byte header plus `payload_len` bytes of `pattern`.
///
/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use turnperf::payload::{encode, decode, HDR_SIZE};
///
/// let mut buf = BytesMut::with_capacity(64);
/// encode(&mut buf, 0xdead_beef, 3, 7, 10, 0xA5);
/// assert_eq!(buf.len(), HDR_SIZE + 10);
///
/// let mut pos = 0;
/// let hdr = decode(&buf, &mut pos).unwrap();
/// assert_eq!(hdr.session_cookie, 0xdead_beef);
/// assert_eq!(hdr.alloc_id, 3);
/// assert_eq!(hdr.seq, 7);
/// assert_eq!(hdr.payload_len, 10);
/// assert_eq!(pos, HDR_SIZE + 10);
/// ```
pub fn encode(buf: &mut BytesMut, session_cookie: u32, alloc_id: u32, seq: u32, payload_len: usize, pattern: u8) {
    buf.put_slice(&MAGIC);
    buf.put_u32(session_cookie);
    buf.put_u32(alloc_id);
    buf.put_u32(seq);
    buf.put_u32(payload_len as u32);
    buf.put_bytes(pattern, payload_len);
}

/// Reads a header starting at `*pos` in `bytes`.
///
/// On success `*pos` advances past the header and its declared payload so
/// that a caller re-assembling a connection-oriented stream stays aligned.
/// On any failure `*pos` is left exactly where it started, so the caller
/// can retry once more bytes have arrived.
pub fn decode(bytes: &[u8], pos: &mut usize) -> Result<Header, DecodeError> {
    let start = *pos;
    let remaining = &bytes[start..];

    if remaining.len() < HDR_SIZE {
        return Err(DecodeError::BadMessage);
    }

    if remaining[0..4] != MAGIC {
        return Err(DecodeError::BadMessage);
    }

    let session_cookie = u32::from_be_bytes(remaining[4..8].try_into().unwrap());
    let alloc_id = u32::from_be_bytes(remaining[8..12].try_into().unwrap());
    let seq = u32::from_be_bytes(remaining[12..16].try_into().unwrap());
    let payload_len = u32::from_be_bytes(remaining[16..20].try_into().unwrap());

    if (remaining.len() - HDR_SIZE) < payload_len as usize {
        return Err(DecodeError::Protocol);
    }

    *pos = start + HDR_SIZE + payload_len as usize;

    Ok(Header {
        session_cookie,
        alloc_id,
        seq,
        payload_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_prefix_is_bad_message_and_restores_position() {
        let bytes = [0u8; 10];
        let mut pos = 0;
        assert_eq!(decode(&bytes, &mut pos), Err(DecodeError::BadMessage));
        assert_eq!(pos, 0);
    }

    #[test]
    fn truncated_payload_is_protocol_error_and_restores_position() {
        let mut buf = BytesMut::with_capacity(32);
        encode(&mut buf, 1, 2, 3, 20, PATTERN);
        let truncated = &buf[..HDR_SIZE + 5];

        let mut pos = 0;
        assert_eq!(decode(truncated, &mut pos), Err(DecodeError::Protocol));
        assert_eq!(pos, 0);
    }

    #[test]
    fn wrong_magic_is_bad_message() {
        let mut buf = BytesMut::with_capacity(32);
        encode(&mut buf, 1, 2, 3, 0, PATTERN);
        buf[0] = b'X';

        let mut pos = 0;
        assert_eq!(decode(&buf, &mut pos), Err(DecodeError::BadMessage));
        assert_eq!(pos, 0);
    }
}
