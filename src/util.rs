//! Bitrate/ptime arithmetic and protocol naming.

use crate::transport::Proto;

/// `ptime = 8000 * psize / bitrate`, in milliseconds.
///
/// Integer (floor) division: exact only when `8000 * psize` is a multiple
/// of `bitrate`. Documented rather than rounded, matching the arithmetic
/// of the harness this is ported from.
///
/// # Test
///
/// ```
/// use turnperf::util::calculate_ptime;
///
/// assert_eq!(calculate_ptime(64_000, 160), 20);
/// ```
pub fn calculate_ptime(bitrate: u32, psize: usize) -> u32 {
    (8_000 * psize as u32) / bitrate
}

/// `psize = bitrate * ptime / 8000`, in bytes.
///
/// # Test
///
/// ```
/// use turnperf::util::{calculate_psize, calculate_ptime};
///
/// let (bitrate, ptime) = (64_000, 20);
/// let psize = calculate_psize(bitrate, ptime);
/// assert_eq!(calculate_ptime(bitrate, psize as usize), ptime);
/// ```
pub fn calculate_psize(bitrate: u32, ptime: u32) -> u32 {
    (bitrate * ptime) / 8_000
}

/// Human-readable protocol name for a (transport, secure) pair.
///
/// # Test
///
/// ```
/// use turnperf::util::protocol_name;
/// use turnperf::transport::Proto;
///
/// assert_eq!(protocol_name(Proto::Udp, false), "UDP");
/// assert_eq!(protocol_name(Proto::Udp, true), "DTLS");
/// assert_eq!(protocol_name(Proto::Tcp, false), "TCP");
/// assert_eq!(protocol_name(Proto::Tcp, true), "TLS");
/// ```
pub fn protocol_name(proto: Proto, secure: bool) -> &'static str {
    match (proto, secure) {
        (Proto::Udp, false) => "UDP",
        (Proto::Udp, true) => "DTLS",
        (Proto::Tcp, false) => "TCP",
        (Proto::Tcp, true) => "TLS",
    }
}

/// Formats a bit-per-second rate the way the console summaries print it.
pub fn format_bitrate(bps: f64) -> String {
    if bps >= 1_000_000.0 {
        format!("{:.2} Mbit/s", bps / 1_000_000.0)
    } else if bps >= 1_000.0 {
        format!("{:.2} Kbit/s", bps / 1_000.0)
    } else {
        format!("{bps:.2} bit/s")
    }
}
