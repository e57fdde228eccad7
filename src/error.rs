//! Error kinds shared across the allocation engine and traffic generators.

use thiserror::Error;

/// Failure kinds surfaced by the allocation engine, the traffic generators,
/// and the wire codec that sits beneath them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("turn protocol violation: {0}")]
    Protocol(&'static str),

    #[error("relay and mapped address families differ")]
    AddressFamilyMismatch,

    #[error("transport closed before deallocation")]
    TransportClosed,

    #[error("redirect limit (16) exceeded")]
    RedirectExceeded,

    #[error("wire codec error: {0}")]
    Codec(#[from] codec::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("turn server returned error {code}: {reason}")]
    TurnError { code: u16, reason: String },

    #[error("dns resolution failed: {0}")]
    Resolve(#[from] hickory_resolver::ResolveError),

    #[error("no address found for host")]
    NoAddress,
}
