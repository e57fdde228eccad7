//! The TURN client contract consumed by the allocation engine (§4.7,
//! §6.2): allocate/add_permission/add_channel/send/recv, built directly on
//! `turnperf-codec` since no external TURN client crate is on this
//! workspace's dependency graph.
//!
//! This module owns wire encoding/decoding and long-term-credential state;
//! it does no I/O of its own. [`crate::allocation::Allocation`] owns the
//! transport and the retransmission timers, and drives requests through
//! the functions here.

use std::collections::HashMap;
use std::net::SocketAddr;

use bytes::BytesMut;
use codec::message::attributes::{
    AlternateServer, ChannelNumber, Data, ErrorAttribute, Lifetime, MappedAddress, Nonce, Realm,
    RequestedTransport, Software, UserName, XorMappedAddress, XorPeerAddress, XorRelayedAddress,
};
use codec::message::methods::{
    ALLOCATE_REQUEST, CHANNEL_BIND_REQUEST, CREATE_PERMISSION_REQUEST, DATA_INDICATION,
    REFRESH_REQUEST, SEND_INDICATION,
};
use codec::message::{Message, MessageEncoder};
use codec::{ChannelData, DecodeResult, Decoder};
use codec::crypto::Password;

use crate::error::Error;

/// First channel number a client may bind (RFC 8656 §14.1).
const CHANNEL_NUMBER_BASE: u16 = 0x4000;
const CHANNEL_NUMBER_MAX: u16 = 0x7FFF;

/// Default lifetime requested on ALLOCATE/REFRESH, in seconds.
pub const DEFAULT_LIFETIME: u32 = 600;

/// Outcome of a decoded ALLOCATE response.
pub enum AllocateOutcome {
    /// 401 Unauthorized carrying REALM/NONCE: retry once, authenticated.
    Challenge { realm: String, nonce: String },
    /// 300 Try Alternate carrying ALTERNATE-SERVER: rebuild the transport
    /// toward the new address.
    Redirect(SocketAddr),
    Success {
        relay: SocketAddr,
        mapped: SocketAddr,
        software: Option<String>,
        lifetime: u32,
    },
}

/// One inbound application-data unit recovered from TURN framing.
pub enum Incoming<'a> {
    Data { source: SocketAddr, payload: &'a [u8] },
    /// A STUN message that isn't a DATA indication (e.g. a response to a
    /// pending request); the caller matches it against its own pending
    /// transaction table.
    Control(Message<'a>),
}

/// Long-term-credential state and channel bindings for one allocation.
/// Carries no socket; [`crate::allocation::Allocation`] supplies the bytes
/// in and takes the bytes out.
pub struct TurnClient {
    username: String,
    password: String,
    realm: Option<String>,
    nonce: Option<String>,
    credential: Option<Password>,
    channels: HashMap<SocketAddr, u16>,
    next_channel: u16,
}

impl TurnClient {
    pub fn new(username: String, password: String) -> Self {
        Self {
            username,
            password,
            realm: None,
            nonce: None,
            credential: None,
            channels: HashMap::new(),
            next_channel: CHANNEL_NUMBER_BASE,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
    }

    /// Records a 401 challenge's REALM/NONCE and derives the long-term
    /// credential key (MD5 flavor; see DESIGN.md for why MD5 over SHA256).
    pub fn authenticate(&mut self, realm: String, nonce: String) {
        self.credential = Some(Password::md5(&self.username, &realm, &self.password));
        self.realm = Some(realm);
        self.nonce = Some(nonce);
    }

    fn finish(&self, encoder: &mut MessageEncoder<'_>) -> Result<(), Error> {
        encoder.flush(self.credential.as_ref())?;
        Ok(())
    }

    /// Builds an ALLOCATE request. Unauthenticated until [`authenticate`]
    /// has captured a realm/nonce, per RFC 8656 §9's credential retry.
    pub fn build_allocate(&self, token: &[u8; 12], lifetime: u32, bytes: &mut BytesMut) -> Result<(), Error> {
        let mut encoder = MessageEncoder::new(ALLOCATE_REQUEST, token, bytes);
        encoder.append::<RequestedTransport>(RequestedTransport::Udp);
        encoder.append::<Lifetime>(lifetime);

        if self.credential.is_some() {
            self.append_credentials(&mut encoder);
        }

        self.finish(&mut encoder)
    }

    fn append_credentials(&self, encoder: &mut MessageEncoder<'_>) {
        encoder.append::<UserName>(&self.username);
        if let Some(realm) = &self.realm {
            encoder.append::<Realm>(realm);
        }
        if let Some(nonce) = &self.nonce {
            encoder.append::<Nonce>(nonce);
        }
    }

    /// Parses an ALLOCATE response (success, challenge, redirect, or a
    /// fatal TURN error).
    pub fn parse_allocate_response(&self, msg: &Message) -> Result<AllocateOutcome, Error> {
        if msg.method().is_error() {
            return self.parse_error(msg);
        }

        let relay = msg
            .get::<XorRelayedAddress>()
            .ok_or(Error::Protocol("allocate response missing relayed address"))?;
        let mapped = msg
            .get::<XorMappedAddress>()
            .or_else(|| msg.get::<MappedAddress>())
            .ok_or(Error::Protocol("allocate response missing mapped address"))?;
        let lifetime = msg.get::<Lifetime>().unwrap_or(DEFAULT_LIFETIME);
        let software = msg.get::<Software>().map(str::to_owned);

        Ok(AllocateOutcome::Success {
            relay,
            mapped,
            software,
            lifetime,
        })
    }

    fn parse_error(&self, msg: &Message) -> Result<AllocateOutcome, Error> {
        let err = msg
            .get::<ErrorAttribute<'_>>()
            .ok_or(Error::Protocol("error response missing ERROR-CODE"))?;

        match err.code {
            401 | 438 => {
                let realm = msg
                    .get::<Realm>()
                    .ok_or(Error::Protocol("401 response missing REALM"))?
                    .to_owned();
                let nonce = msg
                    .get::<Nonce>()
                    .ok_or(Error::Protocol("401 response missing NONCE"))?
                    .to_owned();
                Ok(AllocateOutcome::Challenge { realm, nonce })
            }
            300 => {
                let alt = msg
                    .get::<AlternateServer>()
                    .ok_or(Error::Protocol("300 response missing ALTERNATE-SERVER"))?;
                Ok(AllocateOutcome::Redirect(alt))
            }
            _ => Err(Error::TurnError {
                code: err.code,
                reason: err.reason.to_string(),
            }),
        }
    }

    /// Checks a non-ALLOCATE response (CreatePermission/ChannelBind/Refresh)
    /// for a TURN-level error, surfacing redirects and stale-nonce the same
    /// way ALLOCATE does.
    pub fn check_response(&self, msg: &Message) -> Result<(), Error> {
        if !msg.method().is_error() {
            return Ok(());
        }

        let err = msg
            .get::<ErrorAttribute<'_>>()
            .ok_or(Error::Protocol("error response missing ERROR-CODE"))?;

        Err(Error::TurnError {
            code: err.code,
            reason: err.reason.to_string(),
        })
    }

    pub fn build_create_permission(&self, token: &[u8; 12], peer: SocketAddr, bytes: &mut BytesMut) -> Result<(), Error> {
        let mut encoder = MessageEncoder::new(CREATE_PERMISSION_REQUEST, token, bytes);
        encoder.append::<XorPeerAddress>(peer);
        self.append_credentials(&mut encoder);
        self.finish(&mut encoder)
    }

    /// Allocates (or looks up) a channel number for `peer` and builds a
    /// CHANNEL-BIND request for it. Channel numbers are never reused within
    /// an allocation's lifetime, even if `peer` changes and changes back.
    pub fn build_channel_bind(&mut self, token: &[u8; 12], peer: SocketAddr, bytes: &mut BytesMut) -> Result<u16, Error> {
        let number = *self.channels.entry(peer).or_insert_with(|| {
            let n = self.next_channel;
            self.next_channel += 1;
            n
        });

        if number > CHANNEL_NUMBER_MAX {
            return Err(Error::Protocol("channel number space exhausted"));
        }

        let mut encoder = MessageEncoder::new(CHANNEL_BIND_REQUEST, token, bytes);
        encoder.append::<ChannelNumber>(number);
        encoder.append::<XorPeerAddress>(peer);
        self.append_credentials(&mut encoder);
        self.finish(&mut encoder)?;

        Ok(number)
    }

    pub fn build_refresh(&self, token: &[u8; 12], lifetime: u32, bytes: &mut BytesMut) -> Result<(), Error> {
        let mut encoder = MessageEncoder::new(REFRESH_REQUEST, token, bytes);
        encoder.append::<Lifetime>(lifetime);
        self.append_credentials(&mut encoder);
        self.finish(&mut encoder)
    }

    /// Wraps `payload` in a Send Indication toward `peer` (indication mode).
    pub fn encode_send_indication(&self, token: &[u8; 12], peer: SocketAddr, payload: &[u8], bytes: &mut BytesMut) -> Result<(), Error> {
        let mut encoder = MessageEncoder::new(SEND_INDICATION, token, bytes);
        encoder.append::<XorPeerAddress>(peer);
        encoder.append::<Data>(payload);
        encoder.flush(None)?;
        Ok(())
    }

    /// Wraps `payload` in a ChannelData frame for the channel already bound
    /// to `peer`. `pad` requests 4-byte stream alignment (TCP/TLS).
    pub fn encode_channel_data(&self, peer: SocketAddr, payload: &[u8], pad: bool, bytes: &mut BytesMut) -> Result<(), Error> {
        let number = *self
            .channels
            .get(&peer)
            .ok_or(Error::Protocol("no channel bound for peer"))?;

        ChannelData {
            number,
            bytes: payload,
        }
        .encode(bytes);

        if pad {
            let rem = bytes.len() % 4;
            if rem != 0 {
                bytes.resize(bytes.len() + (4 - rem), 0);
            }
        }

        Ok(())
    }

    /// Given one self-delimited frame already read off the transport,
    /// decodes it as either a Data Indication, a bound ChannelData frame,
    /// or hands back the raw control message for the caller to match
    /// against its pending request table. `decoder` is reused across calls
    /// to avoid reallocating the attribute index per packet.
    pub fn decode_incoming<'a>(&self, decoder: &'a mut Decoder, bytes: &'a [u8]) -> Result<Incoming<'a>, Error> {
        match decoder.decode(bytes)? {
            DecodeResult::ChannelData(cd) => {
                let source = self
                    .channels
                    .iter()
                    .find(|(_, &n)| n == cd.number())
                    .map(|(addr, _)| *addr)
                    .ok_or(Error::Protocol("channeldata for unbound channel"))?;
                Ok(Incoming::Data {
                    source,
                    payload: cd.as_bytes(),
                })
            }
            DecodeResult::Message(msg) if msg.method() == DATA_INDICATION => {
                let source = msg
                    .get::<XorPeerAddress>()
                    .ok_or(Error::Protocol("data indication missing peer address"))?;
                let payload = msg
                    .get::<Data>()
                    .ok_or(Error::Protocol("data indication missing DATA"))?;
                Ok(Incoming::Data { source, payload })
            }
            DecodeResult::Message(msg) => Ok(Incoming::Control(msg)),
        }
    }
}
