//! One TURN allocation's full lifecycle (§4.4): transport bring-up,
//! long-term-credential ALLOCATE, permission/channel install, keepalive,
//! inbound demultiplexing, and orderly teardown. Runs as its own task so
//! its `tokio::select!` loop owns exactly the resources it needs, with no
//! sharing back to [`crate::allocator::Allocator`] except the terminal
//! [`AllocationEvent`] it reports once.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use codec::{DecodeResult, Decoder};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use crate::allocator::AllocatorCommand;
use crate::config::PeerMode;
use crate::error::Error;
use crate::payload;
use crate::receiver::Receiver;
use crate::sender::{self, Sender};
use crate::transport::{Proto, RecvOutcome, Transport};
use crate::turn_client::{self, AllocateOutcome, TurnClient};
use crate::reassembly::ReassemblyBuffer;

/// RFC 8489 §6.2.1: seven retransmits after the initial send, RTO
/// doubling from 500 ms each time.
const RETRANSMIT_LIMIT: u32 = 7;
const REDIRECT_LIMIT: u32 = 16;
const PING_INTERVAL: Duration = Duration::from_secs(5);

/// Everything an allocation task needs to start; built by
/// [`crate::allocator::Allocator`] and moved into the spawned task.
pub struct AllocationConfig {
    pub index: u32,
    pub server: SocketAddr,
    pub proto: Proto,
    pub secure: bool,
    pub peer_mode: PeerMode,
    pub user: String,
    pub pass: String,
    pub session_cookie: u32,
    pub bitrate: u32,
    pub psize: usize,
}

/// The terminal outcome an allocation task reports exactly once.
pub enum AllocationEvent {
    Ready {
        index: u32,
        atime_ms: u64,
        software: Option<String>,
        authenticated: bool,
        mapped: SocketAddr,
        lifetime: u32,
    },
    Failed {
        index: u32,
        error: Error,
    },
    /// Emitted once, right before the task exits, whether it shut down
    /// cleanly or the transport closed out from under it. Carries the
    /// final traffic counters since the allocator has no other way to see
    /// into a task it doesn't own.
    Stopped {
        index: u32,
        tx_packets: u64,
        tx_bitrate: Option<f64>,
        rx_packets: u64,
        rx_bytes: u64,
        rx_bitrate: Option<f64>,
    },
}

/// Runs one allocation end to end. Reports [`AllocationEvent::Ready`] or
/// [`AllocationEvent::Failed`] on `events` and then, once ready, serves
/// traffic until `commands` delivers [`AllocatorCommand::Shutdown`] or the
/// transport closes out from under it.
pub async fn run(
    cfg: AllocationConfig,
    events: mpsc::Sender<AllocationEvent>,
    commands: watch::Receiver<AllocatorCommand>,
) {
    let index = cfg.index;
    let setup_begin = Instant::now();

    let live = match bring_up(cfg, setup_begin).await {
        Ok(live) => live,
        Err(error) => {
            let _ = events.send(AllocationEvent::Failed { index, error }).await;
            return;
        }
    };

    let ready = AllocationEvent::Ready {
        index,
        atime_ms: setup_begin.elapsed().as_millis() as u64,
        software: live.software.clone(),
        authenticated: live.turnc.is_authenticated(),
        mapped: live.mapped,
        lifetime: live.lifetime,
    };

    if events.send(ready).await.is_err() {
        return;
    }

    let result = live.serve(commands).await;
    result.report(index, &events).await;
}

/// What `Live::serve` hands back: the final counters plus whether it ended
/// in error, so `run` can report exactly one terminal event either way.
struct ServeResult {
    stats: Stats,
    error: Option<Error>,
}

struct Stats {
    tx_packets: u64,
    tx_bitrate: Option<f64>,
    rx_packets: u64,
    rx_bytes: u64,
    rx_bitrate: Option<f64>,
}

impl ServeResult {
    async fn report(self, index: u32, events: &mpsc::Sender<AllocationEvent>) {
        if let Some(error) = self.error {
            let _ = events.send(AllocationEvent::Failed { index, error }).await;
        }

        let _ = events
            .send(AllocationEvent::Stopped {
                index,
                tx_packets: self.stats.tx_packets,
                tx_bitrate: self.stats.tx_bitrate,
                rx_packets: self.stats.rx_packets,
                rx_bytes: self.stats.rx_bytes,
                rx_bitrate: self.stats.rx_bitrate,
            })
            .await;
    }
}

/// Live, ready-to-serve state for one allocation. Field order doubles as
/// the intended drop order: `sender` and `turnc` are logically "above"
/// `transport`, so the explicit teardown in [`Live::serve`] sends
/// REFRESH(0) through `transport` before it, rather than `transport`,
/// drops.
struct Live {
    index: u32,
    session_cookie: u32,
    peer_mode: PeerMode,

    sender: Sender,
    turnc: TurnClient,
    transport: Transport,
    reassembly: ReassemblyBuffer,
    us_tx: UdpSocket,

    receiver: Receiver,
    relay: SocketAddr,
    peer: SocketAddr,
    channel_number: Option<u16>,
    mapped: SocketAddr,
    software: Option<String>,
    lifetime: u32,
    next_ping_at: Instant,
}

impl Live {
    /// Waits for the allocator's start signal, then runs the steady-state
    /// loop: pacing tick, ping keepalive, and inbound demux, until told to
    /// shut down or the transport closes.
    async fn serve(mut self, mut commands: watch::Receiver<AllocatorCommand>) -> ServeResult {
        wait_for(&mut commands, AllocatorCommand::Start).await;
        self.sender.start();

        let mut pace = tokio::time::interval(Duration::from_millis(crate::allocator::PACING_INTERVAL_MS as u64));
        let mut ping = tokio::time::interval(PING_INTERVAL);

        let error = loop {
            tokio::select! {
                _ = pace.tick() => {
                    let packets = self.sender.tick(Instant::now());
                    let mut tx_error = None;
                    for packet in packets {
                        if let Err(e) = self.allocation_tx(&packet).await {
                            tx_error = Some(e);
                            break;
                        }
                    }
                    if let Some(e) = tx_error {
                        break Some(e);
                    }
                }
                _ = ping.tick() => {
                    if Instant::now() >= self.next_ping_at {
                        if let Err(e) = self.send_ping().await {
                            break Some(e);
                        }
                        self.next_ping_at = Instant::now() + PING_INTERVAL;
                    }
                }
                frame = recv_one_frame(&mut self.transport, &mut self.reassembly) => {
                    match frame {
                        Ok(frame) => {
                            if let Err(e) = self.handle_inbound(&frame).await {
                                log::warn!("[{}] inbound packet rejected: {e}", self.index);
                            }
                        }
                        Err(e) => break Some(e),
                    }
                }
                changed = commands.changed() => {
                    if changed.is_err() || *commands.borrow() == AllocatorCommand::Shutdown {
                        break None;
                    }
                }
            }
        };

        self.sender.stop();
        self.shutdown_wire().await;

        ServeResult {
            stats: Stats {
                tx_packets: self.sender.total_packets(),
                tx_bitrate: self.sender.bitrate(),
                rx_packets: self.receiver.total_packets(),
                rx_bytes: self.receiver.total_bytes(),
                rx_bitrate: self.receiver.bitrate(),
            },
            error,
        }
    }

    /// Decodes one frame already read off the transport: a Data
    /// Indication or ChannelData goes to the receiver (after updating
    /// `peer` and, in channel mode, rebinding the channel on a source
    /// change, per §4.4.4/§4.4.6); anything else (a stray response to an
    /// already-satisfied request) is ignored.
    async fn handle_inbound(&mut self, frame: &[u8]) -> Result<(), Error> {
        let mut decoder = Decoder::new();
        let (source, payload) = match self.turnc.decode_incoming(&mut decoder, frame) {
            Ok(turn_client::Incoming::Data { source, payload }) => (source, payload),
            Ok(turn_client::Incoming::Control(_)) => return Ok(()),
            Err(e) => {
                log::warn!("[{}] dropping undecodable inbound frame: {e}", self.index);
                return Ok(());
            }
        };

        if source != self.peer {
            log::info!("[{}] peer source changed {} -> {source}", self.index, self.peer);
            self.peer = source;
            self.rebind_peer().await?;
            self.next_ping_at = Instant::now() + PING_INTERVAL;
        }

        self.receiver.recv(source, payload)
    }

    /// Echo services occasionally rewrite the source port mid-session;
    /// §4.4.4 tolerates this by re-pointing `peer` and, in channel mode,
    /// installing a fresh CHANNEL-BIND toward it (indication mode needs
    /// no server-side update, since Send/Data indications carry the peer
    /// address in-band on every message).
    async fn rebind_peer(&mut self) -> Result<(), Error> {
        if self.peer_mode != PeerMode::Channel {
            return Ok(());
        }

        let token = random_token();
        let mut bytes = BytesMut::new();
        self.channel_number = Some(self.turnc.build_channel_bind(&token, self.peer, &mut bytes)?);
        self.transport.send_raw(&bytes).await
    }

    /// Bypasses the TURN client entirely: `us_tx` sends straight to the
    /// relayed address (§4.4.7). The relay forwards it back to this
    /// allocation's own control connection since the permission/channel
    /// installed earlier names `peer` as exactly `us_tx`'s own address.
    async fn allocation_tx(&mut self, packet: &[u8]) -> Result<(), Error> {
        if packet.len() < sender::RESERVED_PREFIX {
            return Err(Error::InvalidArgument("packet shorter than the reserved prefix"));
        }

        self.us_tx.send_to(&packet[sender::RESERVED_PREFIX..], self.relay).await?;
        Ok(())
    }

    async fn send_ping(&mut self) -> Result<(), Error> {
        let mut bytes = BytesMut::new();
        match self.peer_mode {
            PeerMode::Indication => {
                let token = random_token();
                self.turnc.encode_send_indication(&token, self.peer, b"PING", &mut bytes)?;
            }
            PeerMode::Channel => {
                self.turnc.encode_channel_data(self.peer, b"PING", self.transport.is_stream(), &mut bytes)?;
            }
        }
        self.transport.send_raw(&bytes).await
    }

    /// Sends REFRESH(lifetime=0) to deallocate server-side state before
    /// the transport is dropped (§4.4.8). Best-effort: a transport error
    /// here just means the deallocate never reaches the server, which is
    /// not worth failing the shutdown over.
    async fn shutdown_wire(&mut self) {
        let token = random_token();
        let mut bytes = BytesMut::new();
        if self.turnc.build_refresh(&token, 0, &mut bytes).is_ok() {
            let _ = self.transport.send_raw(&bytes).await;
        }
    }
}

async fn wait_for(commands: &mut watch::Receiver<AllocatorCommand>, want: AllocatorCommand) {
    loop {
        if *commands.borrow() == want {
            return;
        }
        if commands.changed().await.is_err() {
            return;
        }
    }
}

/// Brings up the transport, runs the ALLOCATE handshake (following 300
/// redirects up to [`REDIRECT_LIMIT`]), and installs the permission or
/// channel the rest of the run needs.
async fn bring_up(cfg: AllocationConfig, _setup_begin: Instant) -> Result<Live, Error> {
    let mut server = cfg.server;
    let mut redirc = 0u32;

    loop {
        let mut transport = Transport::connect(cfg.proto, cfg.secure, server).await?;
        let us_tx = bind_aux_udp(server).await?;
        let mut turnc = TurnClient::new(cfg.user.clone(), cfg.pass.clone());
        let mut reassembly = ReassemblyBuffer::new();

        match allocate(&mut transport, &mut reassembly, &mut turnc).await? {
            AllocateOutcome::Redirect(new_server) => {
                redirc += 1;
                if redirc > REDIRECT_LIMIT {
                    return Err(Error::RedirectExceeded);
                }
                log::info!("[{}] redirected to {new_server} (attempt {redirc})", cfg.index);
                server = new_server;
                continue;
            }
            AllocateOutcome::Challenge { .. } => {
                unreachable!("allocate() resolves the 401 challenge internally")
            }
            AllocateOutcome::Success { relay, mapped, software, lifetime } => {
                if relay.is_ipv4() != mapped.is_ipv4() {
                    return Err(Error::AddressFamilyMismatch);
                }

                let peer = SocketAddr::new(mapped.ip(), us_tx.local_addr()?.port());
                let channel_number =
                    install_peer(&mut transport, &mut reassembly, &mut turnc, peer, cfg.peer_mode).await?;

                let ptime_ms = crate::config::derive_ptime_ms(cfg.bitrate, cfg.psize);
                let sender = Sender::new(cfg.index, cfg.session_cookie, cfg.bitrate, ptime_ms, cfg.psize)?;
                let receiver = Receiver::new(cfg.session_cookie, cfg.index);

                return Ok(Live {
                    index: cfg.index,
                    session_cookie: cfg.session_cookie,
                    peer_mode: cfg.peer_mode,
                    sender,
                    turnc,
                    transport,
                    reassembly,
                    us_tx,
                    receiver,
                    relay,
                    peer,
                    channel_number,
                    mapped,
                    software,
                    lifetime,
                    next_ping_at: Instant::now() + PING_INTERVAL,
                });
            }
        }
    }
}

/// Runs the ALLOCATE handshake: an unauthenticated attempt, then one
/// retry per 401/438 challenge (bounded, since a server that keeps
/// rejecting fresh nonces will never converge).
async fn allocate(
    transport: &mut Transport,
    reassembly: &mut ReassemblyBuffer,
    turnc: &mut TurnClient,
) -> Result<AllocateOutcome, Error> {
    let mut bytes = BytesMut::new();

    for _ in 0..3 {
        let token = random_token();
        turnc.build_allocate(&token, turn_client::DEFAULT_LIFETIME, &mut bytes)?;
        let frame = send_with_retry(transport, reassembly, &bytes, &token).await?;

        let mut decoder = Decoder::new();
        let msg = match decoder.decode(&frame)? {
            DecodeResult::Message(msg) => msg,
            DecodeResult::ChannelData(_) => {
                return Err(Error::Protocol("allocate response was channeldata"));
            }
        };

        match turnc.parse_allocate_response(&msg)? {
            AllocateOutcome::Challenge { realm, nonce } => {
                turnc.authenticate(realm, nonce);
                continue;
            }
            other => return Ok(other),
        }
    }

    Err(Error::Protocol("authentication challenge did not converge"))
}

/// Installs a CREATE-PERMISSION or CHANNEL-BIND toward `peer`, per the
/// selected [`PeerMode`].
async fn install_peer(
    transport: &mut Transport,
    reassembly: &mut ReassemblyBuffer,
    turnc: &mut TurnClient,
    peer: SocketAddr,
    mode: PeerMode,
) -> Result<Option<u16>, Error> {
    let token = random_token();
    let mut bytes = BytesMut::new();

    let channel_number = match mode {
        PeerMode::Indication => {
            turnc.build_create_permission(&token, peer, &mut bytes)?;
            None
        }
        PeerMode::Channel => Some(turnc.build_channel_bind(&token, peer, &mut bytes)?),
    };

    let frame = send_with_retry(transport, reassembly, &bytes, &token).await?;
    let mut decoder = Decoder::new();
    if let DecodeResult::Message(msg) = decoder.decode(&frame)? {
        turnc.check_response(&msg)?;
    }

    Ok(channel_number)
}

/// Sends `bytes` and waits for the STUN response carrying `token`,
/// retransmitting with exponential backoff (RFC 8489 §6.2.1) on timeout.
/// Any inbound frame that isn't that response (stray data, a late
/// duplicate) is discarded without resetting the backoff.
async fn send_with_retry(
    transport: &mut Transport,
    reassembly: &mut ReassemblyBuffer,
    bytes: &[u8],
    token: &[u8; 12],
) -> Result<BytesMut, Error> {
    let mut rto_ms: u64 = 500;

    for _ in 0..=RETRANSMIT_LIMIT {
        transport.send_raw(bytes).await?;

        let wait = tokio::time::timeout(Duration::from_millis(rto_ms), async {
            loop {
                let frame = recv_one_frame(transport, reassembly).await?;
                let mut decoder = Decoder::new();
                if let Ok(DecodeResult::Message(msg)) = decoder.decode(&frame) {
                    if msg.token() == token {
                        return Ok(frame);
                    }
                }
            }
        })
        .await;

        match wait {
            Ok(result) => return result,
            Err(_elapsed) => rto_ms *= 2,
        }
    }

    Err(Error::Protocol("turn request timed out after 7 retransmits"))
}

/// Reads exactly one self-delimited frame: a whole datagram for UDP/DTLS,
/// or the next complete message pulled out of the TCP/TLS reassembly
/// buffer (reading more off the stream as needed).
async fn recv_one_frame(transport: &mut Transport, reassembly: &mut ReassemblyBuffer) -> Result<BytesMut, Error> {
    if transport.is_stream() {
        loop {
            if let Some(frame) = reassembly.next_frame()? {
                return Ok(frame);
            }

            match transport.recv_raw().await? {
                RecvOutcome::Stream(chunk) => reassembly.push(&chunk),
                RecvOutcome::Closed => return Err(Error::TransportClosed),
                RecvOutcome::Frame(_) => unreachable!("stream transport yielded a datagram frame"),
            }
        }
    } else {
        match transport.recv_raw().await? {
            RecvOutcome::Frame(buf) => Ok(buf),
            RecvOutcome::Closed => Err(Error::TransportClosed),
            RecvOutcome::Stream(_) => unreachable!("datagram transport yielded a stream chunk"),
        }
    }
}

async fn bind_aux_udp(server: SocketAddr) -> Result<UdpSocket, Error> {
    let bind_addr: SocketAddr = if server.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    Ok(UdpSocket::bind(bind_addr).await?)
}

fn random_token() -> [u8; 12] {
    let mut token = [0u8; 12];
    rand::thread_rng().fill(&mut token);
    token
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_limit_matches_spec() {
        assert_eq!(REDIRECT_LIMIT, 16);
    }
}
