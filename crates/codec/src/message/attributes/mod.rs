pub mod address;
pub mod error;

use std::fmt::Debug;
use std::net::SocketAddr;

use bytes::BufMut;
use num_enum::TryFromPrimitive;

use self::address::XAddress;
pub use self::error::ErrorKind;
use crate::Error;

/// STUN/TURN Attributes Registry (RFC 8489 §18.2, RFC 8656 §14).
///
/// Only the subset this crate's allocation engine and wire codec
/// actually produce or consume is modeled; unrecognized types decode
/// to `Unknown` and are skipped rather than rejected, per RFC 8489 §6.2.
#[repr(u16)]
#[derive(Default, Clone, Copy, PartialEq, Eq, Hash, Debug, TryFromPrimitive)]
pub enum AttributeType {
    #[default]
    Unknown = 0x0000,
    MappedAddress = 0x0001,
    UserName = 0x0006,
    MessageIntegrity = 0x0008,
    ErrorCode = 0x0009,
    ChannelNumber = 0x000C,
    Lifetime = 0x000D,
    XorPeerAddress = 0x0012,
    Data = 0x0013,
    Realm = 0x0014,
    Nonce = 0x0015,
    XorRelayedAddress = 0x0016,
    RequestedAddressFamily = 0x0017,
    EvenPort = 0x0018,
    RequestedTransport = 0x0019,
    DontFragment = 0x001A,
    MessageIntegritySha256 = 0x001C,
    PasswordAlgorithm = 0x001D,
    XorMappedAddress = 0x0020,
    ReservationToken = 0x0022,
    Software = 0x8022,
    AlternateServer = 0x8023,
    Fingerprint = 0x8028,
}

/// A STUN/TURN attribute codec: `TYPE` is the wire tag, `Item` the
/// decoded Rust value. `serialize`/`deserialize` never see the
/// surrounding TLV header — [`super::MessageEncoder::append`] and
/// [`super::Message::decode`] handle that.
pub trait Attribute<'a> {
    type Error: Debug;
    type Item;

    const TYPE: AttributeType;

    #[allow(unused_variables)]
    fn serialize<B: BufMut>(value: Self::Item, bytes: &mut B, transaction_id: &'a [u8]) {}

    fn deserialize(bytes: &'a [u8], transaction_id: &'a [u8]) -> Result<Self::Item, Self::Error>;
}

macro_rules! str_attribute {
    ($name:ident, $ty:expr) => {
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl<'a> Attribute<'a> for $name {
            type Error = Error;
            type Item = &'a str;

            const TYPE: AttributeType = $ty;

            fn serialize<B: BufMut>(value: Self::Item, bytes: &mut B, _: &'a [u8]) {
                bytes.put(value.as_bytes());
            }

            fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Self::Error> {
                Ok(std::str::from_utf8(bytes)?)
            }
        }
    };
}

str_attribute!(UserName, AttributeType::UserName);
str_attribute!(Realm, AttributeType::Realm);
str_attribute!(Nonce, AttributeType::Nonce);
str_attribute!(Software, AttributeType::Software);

macro_rules! bytes_attribute {
    ($name:ident, $ty:expr) => {
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl<'a> Attribute<'a> for $name {
            type Error = Error;
            type Item = &'a [u8];

            const TYPE: AttributeType = $ty;

            fn serialize<B: BufMut>(value: Self::Item, bytes: &mut B, _: &'a [u8]) {
                bytes.put(value);
            }

            fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Self::Error> {
                Ok(bytes)
            }
        }
    };
}

bytes_attribute!(MessageIntegrity, AttributeType::MessageIntegrity);
bytes_attribute!(MessageIntegritySha256, AttributeType::MessageIntegritySha256);
bytes_attribute!(Data, AttributeType::Data);

macro_rules! xaddress_attribute {
    ($name:ident, $ty:expr, $is_xor:expr) => {
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl<'a> Attribute<'a> for $name {
            type Error = Error;
            type Item = SocketAddr;

            const TYPE: AttributeType = $ty;

            fn serialize<B: BufMut>(value: Self::Item, bytes: &mut B, transaction_id: &'a [u8]) {
                XAddress::serialize(&value, transaction_id, bytes, $is_xor)
            }

            fn deserialize(
                bytes: &'a [u8],
                transaction_id: &'a [u8],
            ) -> Result<Self::Item, Self::Error> {
                XAddress::deserialize(bytes, transaction_id, $is_xor)
            }
        }
    };
}

xaddress_attribute!(XorMappedAddress, AttributeType::XorMappedAddress, true);
xaddress_attribute!(XorPeerAddress, AttributeType::XorPeerAddress, true);
xaddress_attribute!(XorRelayedAddress, AttributeType::XorRelayedAddress, true);
xaddress_attribute!(MappedAddress, AttributeType::MappedAddress, false);
xaddress_attribute!(AlternateServer, AttributeType::AlternateServer, false);

/// The LIFETIME attribute (RFC 8656 §14.2): seconds remaining until the
/// allocation expires absent a refresh.
#[derive(Debug, Clone, Copy)]
pub struct Lifetime;

impl<'a> Attribute<'a> for Lifetime {
    type Error = Error;
    type Item = u32;

    const TYPE: AttributeType = AttributeType::Lifetime;

    fn serialize<B: BufMut>(value: Self::Item, bytes: &mut B, _: &'a [u8]) {
        bytes.put_u32(value)
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Self::Error> {
        Ok(u32::from_be_bytes(bytes.try_into()?))
    }
}

/// REQUESTED-TRANSPORT (RFC 8656 §14.7). The protocol codepoint matches
/// the IPv4 Protocol / IPv6 Next Header registry; TURN only allows UDP.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
pub enum RequestedTransport {
    Udp = 0x1100_0000,
}

impl<'a> Attribute<'a> for RequestedTransport {
    type Error = Error;
    type Item = Self;

    const TYPE: AttributeType = AttributeType::RequestedTransport;

    fn serialize<B: BufMut>(value: Self::Item, bytes: &mut B, _: &'a [u8]) {
        bytes.put_u32(value as u32)
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Self::Error> {
        Self::try_from(u32::from_be_bytes(bytes.try_into()?)).map_err(|_| Error::InvalidInput)
    }
}

/// CHANNEL-NUMBER (RFC 8656 §14.1): a 16-bit channel id in `0x4000..=0x7FFF`
/// followed by 2 reserved bytes.
#[derive(Debug, Clone, Copy)]
pub struct ChannelNumber;

impl<'a> Attribute<'a> for ChannelNumber {
    type Error = Error;
    type Item = u16;

    const TYPE: AttributeType = AttributeType::ChannelNumber;

    fn serialize<B: BufMut>(value: Self::Item, bytes: &mut B, _: &'a [u8]) {
        bytes.put_u16(value);
        bytes.put_u16(0);
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Self::Error> {
        if bytes.len() < 2 {
            return Err(Error::InvalidInput);
        }

        Ok(u16::from_be_bytes(bytes[..2].try_into()?))
    }
}

/// FINGERPRINT: CRC32 of the message so far, XOR'd with the STUN magic
/// constant (RFC 8489 §14.7). Always the last attribute, written after
/// MESSAGE-INTEGRITY.
#[derive(Debug, Clone, Copy)]
pub struct Fingerprint;

impl<'a> Attribute<'a> for Fingerprint {
    type Error = Error;
    type Item = u32;

    const TYPE: AttributeType = AttributeType::Fingerprint;

    fn serialize<B: BufMut>(value: Self::Item, bytes: &mut B, _: &'a [u8]) {
        bytes.put_u32(value)
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Self::Error> {
        Ok(u32::from_be_bytes(bytes.try_into()?))
    }
}

/// ERROR-CODE (RFC 8489 §14.8): a class/number pair plus a human-readable
/// reason phrase. `code` is the full three-digit value (e.g. 300), not
/// the class-split wire encoding.
#[derive(Debug, Clone, Copy)]
pub struct ErrorAttribute<'a> {
    pub code: u16,
    pub reason: &'a str,
}

impl<'a> Attribute<'a> for ErrorAttribute<'a> {
    type Error = Error;
    type Item = Self;

    const TYPE: AttributeType = AttributeType::ErrorCode;

    fn serialize<B: BufMut>(value: Self::Item, bytes: &mut B, _: &'a [u8]) {
        bytes.put_u16(0x0000);
        bytes.put_u16(((value.code / 100) << 8) | (value.code % 100));
        bytes.put(value.reason.as_bytes());
    }

    fn deserialize(bytes: &'a [u8], _: &'a [u8]) -> Result<Self::Item, Self::Error> {
        if bytes.len() < 4 {
            return Err(Error::InvalidInput);
        }

        let class_number = u16::from_be_bytes(bytes[2..4].try_into()?);
        let code = ((class_number >> 8) & 0x7) * 100 + (class_number & 0xff);

        Ok(Self {
            code,
            reason: std::str::from_utf8(&bytes[4..])?,
        })
    }
}
