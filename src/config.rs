//! Command-line surface and the resolved [`Config`] it produces (§6.3,
//! §9 ambient "Configuration"), mirroring the teacher's `Cli`→`Config`
//! split: `clap` derives the flag parser, a fallible `from_cli` does the
//! DNS-or-literal host resolution and defaulting so the rest of the
//! program only ever sees a fully-resolved value.

use std::net::{SocketAddr, ToSocketAddrs};

use clap::Parser;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};

use crate::error::Error;
use crate::transport::Proto;

pub const DEFAULT_ALLOCATIONS: u32 = 100;
pub const DEFAULT_BITRATE: u32 = 64_000;
pub const DEFAULT_PSIZE: usize = 160;
pub const DEFAULT_USER: &str = "demo";
pub const DEFAULT_PASS: &str = "secret";
const PORT_PLAIN: u16 = 3478;
const PORT_SECURE: u16 = 5349;

/// Which framing mode the TURN client installs toward its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerMode {
    Channel,
    Indication,
}

/// Raw command-line surface, one field per flag in §6.3.
#[derive(Debug, Parser)]
#[command(name = "turnperf", about = "TURN relay performance and correctness test harness")]
pub struct Cli {
    /// Number of concurrent allocations.
    #[arg(short = 'a', default_value_t = DEFAULT_ALLOCATIONS)]
    pub allocations: u32,

    /// Per-allocation target bitrate, in bits per second.
    #[arg(short = 'b', default_value_t = DEFAULT_BITRATE)]
    pub bitrate: u32,

    /// Packet size in bytes, including the TPRF header.
    #[arg(short = 's', default_value_t = DEFAULT_PSIZE)]
    pub psize: usize,

    /// TURN long-term credential username.
    #[arg(short = 'u', default_value = DEFAULT_USER)]
    pub user: String,

    /// TURN long-term credential password.
    #[arg(short = 'p', default_value = DEFAULT_PASS)]
    pub pass: String,

    /// Override the TURN server port (defaults to 3478, or 5349 if secure).
    #[arg(short = 'P')]
    pub port: Option<u16>,

    /// Use Send/Data indications and Permissions instead of Channels.
    #[arg(short = 'i')]
    pub indications: bool,

    /// TCP transport.
    #[arg(short = 't', conflicts_with_all = ["tls", "dtls"])]
    pub tcp: bool,

    /// TLS-over-TCP transport.
    #[arg(short = 'T', conflicts_with_all = ["tcp", "dtls"])]
    pub tls: bool,

    /// DTLS-over-UDP transport.
    #[arg(short = 'D', conflicts_with_all = ["tcp", "tls"])]
    pub dtls: bool,

    /// Reactor polling backend; accepted for CLI compatibility only.
    #[arg(short = 'm')]
    pub method: Option<String>,

    /// Raise log verbosity; repeatable.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// TURN server hostname or literal address.
    pub host: String,
}

/// Fully resolved configuration, constructed once at startup and passed
/// by reference into the [`crate::allocator::Allocator`]. No field here
/// is ever mutated by anything downstream of [`Config::from_cli`].
pub struct Config {
    pub allocations: u32,
    pub bitrate: u32,
    pub psize: usize,
    pub user: String,
    pub pass: String,
    pub peer_mode: PeerMode,
    pub proto: Proto,
    pub secure: bool,
    pub method: Option<String>,
    pub verbose: u8,
    pub server: SocketAddr,
}

impl Config {
    pub async fn from_cli(cli: Cli) -> Result<Self, Error> {
        if cli.psize < crate::payload::HDR_SIZE {
            return Err(Error::InvalidArgument("psize smaller than TPRF header"));
        }

        let (proto, secure) = match (cli.tcp, cli.tls, cli.dtls) {
            (false, false, false) => (Proto::Udp, false),
            (true, false, false) => (Proto::Tcp, false),
            (false, true, false) => (Proto::Tcp, true),
            (false, false, true) => (Proto::Udp, true),
            _ => unreachable!("clap enforces -t/-T/-D are mutually exclusive"),
        };

        let default_port = if secure { PORT_SECURE } else { PORT_PLAIN };
        let port = cli.port.unwrap_or(default_port);
        let server = resolve_host(&cli.host, port, proto, secure).await?;

        Ok(Self {
            allocations: cli.allocations,
            bitrate: cli.bitrate,
            psize: cli.psize,
            user: cli.user,
            pass: cli.pass,
            peer_mode: if cli.indications { PeerMode::Indication } else { PeerMode::Channel },
            proto,
            secure,
            method: cli.method,
            verbose: cli.verbose,
            server,
        })
    }
}

/// Resolves `host` to a socket address: a literal `ip:port` or bare `ip`
/// is used as-is; otherwise a DNS SRV lookup for `_turn._udp.<host>` /
/// `_turns._tcp.<host>` (selected by `proto`/`secure`) is tried first,
/// falling back to a plain `A`/`AAAA` lookup at `port` if SRV resolution
/// fails, matching the original's discover-or-literal two-branch logic.
async fn resolve_host(host: &str, port: u16, proto: Proto, secure: bool) -> Result<SocketAddr, Error> {
    if let Ok(addr) = format!("{host}:{port}").parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(addr) = host.parse::<std::net::IpAddr>() {
        return Ok(SocketAddr::new(addr, port));
    }

    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

    let srv_name = match (proto, secure) {
        (Proto::Udp, false) => format!("_turn._udp.{host}"),
        (Proto::Tcp, false) => format!("_turn._tcp.{host}"),
        (Proto::Tcp, true) => format!("_turns._tcp.{host}"),
        (Proto::Udp, true) => format!("_turns._udp.{host}"),
    };

    if let Ok(srv) = resolver.srv_lookup(srv_name).await {
        if let Some(record) = srv.iter().next() {
            let target = record.target().to_utf8();
            let target_port = record.port();
            if let Some(addr) = lookup_a(&resolver, &target, target_port).await {
                return Ok(addr);
            }
        }
    }

    lookup_a(&resolver, host, port)
        .await
        .ok_or(Error::NoAddress)
}

async fn lookup_a(resolver: &TokioAsyncResolver, host: &str, port: u16) -> Option<SocketAddr> {
    if let Ok(response) = resolver.lookup_ip(host).await {
        if let Some(ip) = response.iter().next() {
            return Some(SocketAddr::new(ip, port));
        }
    }

    // Last resort: the system resolver, for environments where the
    // embedded DNS client can't reach a configured nameserver.
    format!("{host}:{port}")
        .to_socket_addrs()
        .ok()
        .and_then(|mut it| it.next())
}

/// Pacing interval derived from `bitrate`/`psize`, floored at the pacing
/// tick so `Sender::new` never rejects it.
pub fn derive_ptime_ms(bitrate: u32, psize: usize) -> u32 {
    crate::util::calculate_ptime(bitrate, psize).max(crate::allocator::PACING_INTERVAL_MS)
}
