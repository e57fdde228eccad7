use bytes::BytesMut;
use turnperf_codec::crypto::Password;
use turnperf_codec::message::attributes::{
    ErrorAttribute, Lifetime, RequestedTransport, UserName, XorRelayedAddress,
};
use turnperf_codec::message::methods::{ALLOCATE_ERROR, ALLOCATE_REQUEST, ALLOCATE_RESPONSE};
use turnperf_codec::message::{Attributes, Message, MessageEncoder};
use turnperf_codec::{ChannelData, DecodeResult, Decoder};

fn token() -> [u8; 12] {
    *b"abcdefghijkl"
}

#[test]
fn allocate_request_round_trips_with_integrity() {
    let mut buf = BytesMut::with_capacity(256);
    let password = Password::md5("demo", "localhost", "secret");

    {
        let mut encoder = MessageEncoder::new(ALLOCATE_REQUEST, &token(), &mut buf);
        encoder.append::<RequestedTransport>(RequestedTransport::Udp);
        encoder.append::<UserName>("demo");
        encoder.flush(Some(&password)).unwrap();
    }

    let mut attrs = Attributes::default();
    let message = Message::decode(&buf, &mut attrs).unwrap();

    assert_eq!(message.method(), ALLOCATE_REQUEST);
    assert_eq!(message.token(), token());
    assert_eq!(message.get::<UserName>(), Some("demo"));
    assert_eq!(message.get::<RequestedTransport>(), Some(RequestedTransport::Udp));
    message.checksum(&password).expect("integrity must validate");
}

#[test]
fn tampered_body_fails_integrity_check() {
    let mut buf = BytesMut::with_capacity(256);
    let password = Password::md5("demo", "localhost", "secret");

    {
        let mut encoder = MessageEncoder::new(ALLOCATE_REQUEST, &token(), &mut buf);
        encoder.append::<UserName>("demo");
        encoder.flush(Some(&password)).unwrap();
    }

    buf[25] ^= 0xff;

    let mut attrs = Attributes::default();
    let message = Message::decode(&buf, &mut attrs).unwrap();
    assert!(message.checksum(&password).is_err());
}

#[test]
fn allocate_response_carries_relay_and_lifetime() {
    let mut buf = BytesMut::with_capacity(256);
    let relay = "203.0.113.9:55616".parse().unwrap();

    {
        let mut encoder = MessageEncoder::new(ALLOCATE_RESPONSE, &token(), &mut buf);
        encoder.append::<XorRelayedAddress>(relay);
        encoder.append::<Lifetime>(600);
        encoder.flush(None).unwrap();
    }

    let mut attrs = Attributes::default();
    let message = Message::decode(&buf, &mut attrs).unwrap();

    assert_eq!(message.method(), ALLOCATE_RESPONSE);
    assert_eq!(message.get::<XorRelayedAddress>(), Some(relay));
    assert_eq!(message.get::<Lifetime>(), Some(600));
}

#[test]
fn error_response_decodes_try_alternate() {
    let mut buf = BytesMut::with_capacity(256);

    {
        let mut encoder = MessageEncoder::new(ALLOCATE_ERROR, &token(), &mut buf);
        encoder.append::<ErrorAttribute<'_>>(ErrorAttribute {
            code: 300,
            reason: "Try Alternate",
        });
        encoder.flush(None).unwrap();
    }

    let mut attrs = Attributes::default();
    let message = Message::decode(&buf, &mut attrs).unwrap();

    assert_eq!(message.method(), ALLOCATE_ERROR);
    let error = message.get::<ErrorAttribute<'_>>().unwrap();
    assert_eq!(error.code, 300);
    assert_eq!(error.reason, "Try Alternate");
}

#[test]
fn channel_data_round_trips_through_decoder() {
    let payload = [0xA5u8; 32];
    let mut buf = BytesMut::with_capacity(64);

    ChannelData {
        number: 0x4001,
        bytes: &payload,
    }
    .encode(&mut buf);

    let mut decoder = Decoder::new();
    match decoder.decode(&buf).unwrap() {
        DecodeResult::ChannelData(cd) => {
            assert_eq!(cd.number(), 0x4001);
            assert_eq!(cd.as_bytes(), &payload[..]);
        }
        DecodeResult::Message(_) => panic!("expected channel data"),
    }
}

#[test]
fn decoder_dispatches_stun_vs_channel_data_by_leading_bits() {
    let mut buf = BytesMut::with_capacity(64);
    {
        let mut encoder = MessageEncoder::new(ALLOCATE_REQUEST, &token(), &mut buf);
        encoder.flush(None).unwrap();
    }

    let mut decoder = Decoder::new();
    assert!(matches!(
        decoder.decode(&buf).unwrap(),
        DecodeResult::Message(_)
    ));
}
