//! STUN/TURN message codec.
//!
//! This crate is the wire layer consumed by the allocation engine's TURN
//! client: STUN message framing (RFC 8489), ChannelData framing (RFC 8656)
//! and the long-term credential / message-integrity primitives both are
//! built on.

pub mod channel_data;
pub mod crypto;
pub mod message;

pub use channel_data::ChannelData;
pub use message::{Attributes, Message, MessageEncoder};

use std::array::TryFromSliceError;
use std::fmt;
use std::str::Utf8Error;

pub const MAGIC_COOKIE: u32 = 0x2112_A442;

#[derive(Debug)]
pub enum Error {
    InvalidInput,
    UnknownMethod,
    UnknownAttribute,
    Incomplete,
    Utf8,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "invalid input"),
            Self::UnknownMethod => write!(f, "unknown stun method"),
            Self::UnknownAttribute => write!(f, "unknown stun attribute"),
            Self::Incomplete => write!(f, "message is incomplete"),
            Self::Utf8 => write!(f, "invalid utf8"),
        }
    }
}

impl std::error::Error for Error {}

impl From<Utf8Error> for Error {
    fn from(_: Utf8Error) -> Self {
        Self::Utf8
    }
}

impl From<TryFromSliceError> for Error {
    fn from(_: TryFromSliceError) -> Self {
        Self::InvalidInput
    }
}

/// Either a STUN message or a ChannelData frame, as returned by
/// [`Decoder::decode`].
pub enum DecodeResult<'a> {
    Message(Message<'a>),
    ChannelData(ChannelData<'a>),
}

/// Scratch space for one decode. Reused across calls to avoid reallocating
/// the attribute index on every inbound packet.
#[derive(Default)]
pub struct Decoder(Attributes);

impl Decoder {
    pub fn new() -> Self {
        Self(Attributes::default())
    }

    /// Dispatches on the top two bits of the first byte: `0b00`/`0b01` is a
    /// STUN message, `0b10` is ChannelData.
    pub fn decode<'a>(&'a mut self, bytes: &'a [u8]) -> Result<DecodeResult<'a>, Error> {
        if bytes.is_empty() {
            return Err(Error::Incomplete);
        }

        if bytes[0] >> 6 == 0 {
            self.0.clear();
            Ok(DecodeResult::Message(Message::decode(bytes, &mut self.0)?))
        } else {
            Ok(DecodeResult::ChannelData(ChannelData::decode(bytes)?))
        }
    }

    /// Returns the full on-wire length of the next framed message in
    /// `bytes`, or `Error::Incomplete` if not enough bytes are buffered yet.
    ///
    /// `is_tcp` requests 4-byte alignment padding for ChannelData, required
    /// only on connection-oriented transports.
    pub fn message_size(bytes: &[u8], is_tcp: bool) -> Result<usize, Error> {
        if bytes.is_empty() {
            return Err(Error::Incomplete);
        }

        if bytes[0] >> 6 == 0 {
            Message::message_size(bytes)
        } else {
            ChannelData::message_size(bytes, is_tcp)
        }
    }
}
