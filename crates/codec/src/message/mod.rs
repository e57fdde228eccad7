pub mod attributes;
pub mod methods;

use std::ops::Range;

use bytes::{BufMut, BytesMut};

use self::attributes::{Attribute, AttributeType, MessageIntegrity, MessageIntegritySha256};
use self::methods::Method;
use crate::crypto::{Password, fingerprint, hmac_sha1};
use crate::{Error, MAGIC_COOKIE};

/// A cache of `(attribute type, byte range)` pairs built while decoding a
/// message, so that [`Message::get`] doesn't have to rescan the buffer.
/// Reused across decodes via [`crate::Decoder`] to avoid reallocating on
/// every inbound packet.
#[derive(Debug, Clone)]
pub struct Attributes(Vec<(AttributeType, Range<usize>)>);

impl Default for Attributes {
    fn default() -> Self {
        Self(Vec::with_capacity(20))
    }
}

impl Attributes {
    pub fn append(&mut self, kind: AttributeType, range: Range<usize>) {
        self.0.push((kind, range));
    }

    pub fn get(&self, kind: &AttributeType) -> Option<Range<usize>> {
        self.0
            .iter()
            .find(|(k, _)| k == kind)
            .map(|(_, v)| v.clone())
    }

    pub fn get_all<'a>(&'a self, kind: &'a AttributeType) -> impl Iterator<Item = &'a Range<usize>> {
        self.0.iter().filter(move |(k, _)| k == kind).map(|(_, v)| v)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// Builds a STUN/TURN message into a caller-owned [`BytesMut`], one
/// attribute at a time, finishing with an optional MESSAGE-INTEGRITY +
/// FINGERPRINT pair.
pub struct MessageEncoder<'a> {
    token: &'a [u8],
    bytes: &'a mut BytesMut,
}

impl<'a> MessageEncoder<'a> {
    pub fn new(method: Method, token: &'a [u8; 12], bytes: &'a mut BytesMut) -> Self {
        bytes.clear();
        bytes.put_u16(method.into());
        bytes.put_u16(0);
        bytes.put_u32(MAGIC_COOKIE);
        bytes.put(token.as_slice());

        Self { bytes, token }
    }

    /// Starts a new message that reuses the transaction id of a
    /// previously decoded one, e.g. replying to a request.
    pub fn extend(method: Method, reader: &Message<'a>, bytes: &'a mut BytesMut) -> Self {
        let token = reader.token();

        bytes.clear();
        bytes.put_u16(method.into());
        bytes.put_u16(0);
        bytes.put_u32(MAGIC_COOKIE);
        bytes.put(token);

        Self { bytes, token }
    }

    /// Appends one attribute, writing its TLV header, value, and
    /// 4-byte-alignment padding.
    pub fn append<'c, T: Attribute<'c>>(&'c mut self, value: T::Item) {
        self.bytes.put_u16(T::TYPE as u16);

        let os = self.bytes.len();
        unsafe { self.bytes.advance_mut(2) }

        T::serialize(value, self.bytes, self.token);

        let size = self.bytes.len() - os - 2;
        let size_buf = (size as u16).to_be_bytes();
        self.bytes[os] = size_buf[0];
        self.bytes[os + 1] = size_buf[1];

        let psize = alignment_32(size);
        if psize > 0 {
            self.bytes.put_bytes(0, psize);
        }
    }

    /// Finalizes the message: writes the attribute-list length into the
    /// header and, if `password` is given, appends MESSAGE-INTEGRITY and
    /// FINGERPRINT.
    pub fn flush(&mut self, password: Option<&Password>) -> Result<(), Error> {
        self.set_len(self.bytes.len() - 20);

        if let Some(password) = password {
            self.checksum(password)?;
        }

        Ok(())
    }

    fn checksum(&mut self, password: &Password) -> Result<(), Error> {
        assert!(self.bytes.len() >= 20);
        let len = self.bytes.len();

        self.set_len(len + 4);

        {
            let hmac = hmac_sha1(password.as_bytes(), &[self.bytes])?;
            self.bytes.put_u16(match password {
                Password::Md5(_) => AttributeType::MessageIntegrity as u16,
                Password::Sha256(_) => AttributeType::MessageIntegritySha256 as u16,
            });

            self.bytes.put_u16(20);
            self.bytes.put(hmac.as_slice());
        }

        self.set_len(len + 4 + 8);

        let crc = fingerprint(self.bytes);
        self.bytes.put_u16(AttributeType::Fingerprint as u16);
        self.bytes.put_u16(4);
        self.bytes.put_u32(crc);

        Ok(())
    }

    fn set_len(&mut self, len: usize) {
        self.bytes[2..4].copy_from_slice((len as u16).to_be_bytes().as_slice());
    }
}

/// A decoded STUN/TURN message borrowing from the packet it was parsed
/// out of.
pub struct Message<'a> {
    method: Method,
    bytes: &'a [u8],
    size: u16,
    attributes: &'a Attributes,
}

impl<'a> Message<'a> {
    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    #[inline]
    pub fn token(&self) -> &'a [u8] {
        &self.bytes[8..20]
    }

    pub fn get<T: Attribute<'a>>(&self) -> Option<T::Item> {
        let range = self.attributes.get(&T::TYPE)?;
        T::deserialize(&self.bytes[range], self.token()).ok()
    }

    pub fn get_all<T: Attribute<'a>>(&self) -> impl Iterator<Item = T::Item> {
        self.attributes
            .get_all(&T::TYPE)
            .map(|it| T::deserialize(&self.bytes[it.clone()], self.token()))
            .filter_map(Result::ok)
    }

    /// Verifies the message's MESSAGE-INTEGRITY (or -SHA256) attribute
    /// against `password`.
    pub fn checksum(&self, password: &Password) -> Result<(), Error> {
        if self.bytes.is_empty() || self.size < 20 {
            return Err(Error::InvalidInput);
        }

        let integrity = match password {
            Password::Md5(_) => self.get::<MessageIntegrity>(),
            Password::Sha256(_) => self.get::<MessageIntegritySha256>(),
        }
        .ok_or(Error::InvalidInput)?;

        let size_buf = (self.size + 4).to_be_bytes();
        let body = [&self.bytes[0..2], &size_buf[..], &self.bytes[4..self.size as usize]];

        if integrity != hmac_sha1(password.as_bytes(), &body)?.as_slice() {
            return Err(Error::InvalidInput);
        }

        Ok(())
    }

    pub fn decode(bytes: &'a [u8], attributes: &'a mut Attributes) -> Result<Self, Error> {
        let len = bytes.len();
        if len < 20 {
            return Err(Error::Incomplete);
        }

        let method = Method::try_from(u16::from_be_bytes(bytes[..2].try_into()?))?;

        let size = u16::from_be_bytes(bytes[2..4].try_into()?) as usize + 20;
        if len < size {
            return Err(Error::Incomplete);
        }

        if bytes[4..8] != MAGIC_COOKIE.to_be_bytes() {
            return Err(Error::InvalidInput);
        }

        let mut content_len = 0u16;
        let mut found_integrity = false;
        let mut offset = 20;

        loop {
            if len - offset < 4 {
                break;
            }

            let key = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);

            if !found_integrity {
                content_len = offset as u16;
            }

            let size = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;

            offset += 4;
            if len - offset < size {
                break;
            }

            let range = offset..(offset + size);
            if size > 0 {
                offset += size + alignment_32(size);
            }

            let Ok(kind) = AttributeType::try_from(key) else {
                continue;
            };

            if kind == AttributeType::MessageIntegrity {
                found_integrity = true;
            }

            attributes.append(kind, range);
        }

        Ok(Self {
            size: content_len,
            attributes,
            method,
            bytes,
        })
    }

    /// Returns the full on-wire size (header + attribute list) of the
    /// message starting at `buffer`, without decoding its attributes.
    pub fn message_size(buffer: &[u8]) -> Result<usize, Error> {
        if buffer.len() < 20 {
            return Err(Error::Incomplete);
        }

        if buffer[0] >> 6 != 0 {
            return Err(Error::InvalidInput);
        }

        Ok((u16::from_be_bytes(buffer[2..4].try_into()?) as usize) + 20)
    }
}

/// STUN/TURN attribute values are padded to a multiple of 4 bytes
/// (RFC 8489 §14).
///
/// # Test
///
/// ```
/// use turnperf_codec::message::alignment_32;
///
/// assert_eq!(alignment_32(4), 0);
/// assert_eq!(alignment_32(0), 0);
/// assert_eq!(alignment_32(5), 3);
/// ```
#[inline(always)]
pub fn alignment_32(size: usize) -> usize {
    let rem = size % 4;
    if size == 0 || rem == 0 { 0 } else { 4 - rem }
}
