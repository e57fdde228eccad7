//! The four wire transports an allocation can ride: plain UDP, UDP with a
//! DTLS shim, plain TCP, and TCP with a TLS shim. Modeled as a sum type so
//! "exactly one of these is live at a time" is a property of the `match`,
//! not a quartet of nullable fields.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use dimpl::{Config as DtlsConfig, Dtls, DtlsCertificate, Output as DtlsOutput};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::ClientConfig;

use crate::error::Error;
use crate::tls_verify::NoServerVerification;

/// Underlying network protocol, independent of whether it is wrapped in a
/// security layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proto {
    Udp,
    Tcp,
}

/// Receive bufer for the auxiliary UDP socket and the plain-UDP relay path
/// (§4.4.2): large enough that a burst of relayed packets doesn't cause the
/// kernel to drop datagrams before the event loop drains the queue.
pub const UDP_RECV_BUFFER: usize = 512 * 1024;

/// One fully read unit of transport-layer input.
pub enum RecvOutcome {
    /// A self-delimited frame (one UDP datagram, or one decrypted DTLS
    /// application-data record). Ready to hand straight to
    /// [`codec::Decoder::decode`].
    Frame(BytesMut),
    /// An arbitrary chunk of bytes read off a byte stream (TCP/TLS); the
    /// caller must append it to a reassembly buffer and re-run framing.
    Stream(BytesMut),
    /// The peer closed the connection.
    Closed,
}

/// The four transport variants named in §4.4.2. Each carries exactly the
/// handles its bring-up sequence produced.
pub enum Transport {
    Udp {
        socket: UdpSocket,
    },
    UdpDtls {
        socket: UdpSocket,
        dtls: Box<Dtls>,
        #[allow(dead_code)]
        cert: DtlsCertificate,
    },
    Tcp {
        stream: TcpStream,
    },
    TcpTls {
        stream: Box<TlsStream<TcpStream>>,
    },
}

impl Transport {
    pub fn proto(&self) -> Proto {
        match self {
            Transport::Udp { .. } | Transport::UdpDtls { .. } => Proto::Udp,
            Transport::Tcp { .. } | Transport::TcpTls { .. } => Proto::Tcp,
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Transport::UdpDtls { .. } | Transport::TcpTls { .. })
    }

    /// Connection-oriented transports need TCP reassembly and 4-byte
    /// ChannelData alignment; UDP transports deliver whole datagrams.
    pub fn is_stream(&self) -> bool {
        matches!(self.proto(), Proto::Tcp)
    }

    /// Brings up one of the four transports toward `server`, per the
    /// sequences in §4.4.2.
    pub async fn connect(proto: Proto, secure: bool, server: SocketAddr) -> Result<Self, Error> {
        match (proto, secure) {
            (Proto::Udp, false) => {
                let socket = bind_udp(server).await?;
                Ok(Transport::Udp { socket })
            }
            (Proto::Udp, true) => {
                let socket = bind_udp(server).await?;
                socket.connect(server).await?;

                let cert = dimpl::certificate::generate_self_signed_certificate()
                    .map_err(|_| Error::Protocol("dtls certificate generation failed"))?;

                let mut dtls = Dtls::new(Arc::new(DtlsConfig::default()), cert.clone());
                dtls.set_active(true);
                dtls.handle_timeout(Instant::now())
                    .map_err(|_| Error::Protocol("dtls handshake init failed"))?;

                let mut transport = Transport::UdpDtls {
                    socket,
                    dtls: Box::new(dtls),
                    cert,
                };
                transport.drive_dtls_handshake().await?;
                Ok(transport)
            }
            (Proto::Tcp, false) => {
                let stream = TcpStream::connect(server).await?;
                stream.set_nodelay(true).ok();
                Ok(Transport::Tcp { stream })
            }
            (Proto::Tcp, true) => {
                let stream = TcpStream::connect(server).await?;
                stream.set_nodelay(true).ok();

                // A benchmarking client has no pre-shared CA bundle for an
                // arbitrary operator's TURN deployment; mirror every other
                // turnperf-style load tool and skip chain validation rather
                // than make the harness depend on the target's PKI.
                let config = ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoServerVerification::new()))
                    .with_no_client_auth();

                let connector = TlsConnector::from(Arc::new(config));
                let name = rustls_pki_types::ServerName::IpAddress(server.ip().into());
                let stream = connector.connect(name, stream).await?;

                Ok(Transport::TcpTls {
                    stream: Box::new(stream),
                })
            }
        }
    }

    /// Drives the DTLS handshake to completion by round-tripping datagrams
    /// with the server until `dimpl` reports `Output::Connected`.
    async fn drive_dtls_handshake(&mut self) -> Result<(), Error> {
        let Transport::UdpDtls { socket, dtls, .. } = self else {
            unreachable!("drive_dtls_handshake called on a non-DTLS transport");
        };

        flush_dtls_output(socket, dtls).await?;

        let mut buf = [0u8; 2048];
        loop {
            let n = socket.recv(&mut buf).await?;
            dtls.handle_packet(&buf[..n])
                .map_err(|_| Error::Protocol("dtls handshake packet rejected"))?;

            let mut connected = false;
            drain_dtls_output(dtls, |out| {
                if matches!(out, DtlsOutput::Connected) {
                    connected = true;
                }
            });

            flush_dtls_output(socket, dtls).await?;

            if connected {
                return Ok(());
            }
        }
    }

    /// Sends one self-contained message (a STUN request, an indication, or
    /// a ChannelData frame). `is_tcp` padding, if any, has already been
    /// applied by the caller via [`codec::message::alignment_32`]-style
    /// logic in `turn_client`.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        match self {
            Transport::Udp { socket } => {
                socket.send(bytes).await?;
            }
            Transport::UdpDtls { socket, dtls, .. } => {
                dtls.send_application_data(bytes)
                    .map_err(|_| Error::Protocol("dtls send failed"))?;
                flush_dtls_output(socket, dtls).await?;
            }
            Transport::Tcp { stream } => {
                stream.write_all(bytes).await?;
            }
            Transport::TcpTls { stream } => {
                stream.write_all(bytes).await?;
            }
        }

        Ok(())
    }

    /// Reads one unit of input, per [`RecvOutcome`].
    pub async fn recv_raw(&mut self) -> Result<RecvOutcome, Error> {
        match self {
            Transport::Udp { socket } => {
                let mut buf = BytesMut::zeroed(2048);
                let n = socket.recv(&mut buf).await?;
                buf.truncate(n);
                Ok(RecvOutcome::Frame(buf))
            }
            Transport::UdpDtls { socket, dtls, .. } => loop {
                let mut raw = [0u8; 2048];
                let n = socket.recv(&mut raw).await?;
                dtls.handle_packet(&raw[..n])
                    .map_err(|_| Error::Protocol("dtls record rejected"))?;

                let mut app_data = None;
                drain_dtls_output(dtls, |out| {
                    if let DtlsOutput::ApplicationData(data) = out {
                        app_data = Some(BytesMut::from(data));
                    }
                });

                flush_dtls_output(socket, dtls).await?;

                if let Some(data) = app_data {
                    return Ok(RecvOutcome::Frame(data));
                }
            },
            Transport::Tcp { stream } => {
                let mut buf = BytesMut::zeroed(4096);
                let n = stream.read(&mut buf).await?;
                if n == 0 {
                    return Ok(RecvOutcome::Closed);
                }
                buf.truncate(n);
                Ok(RecvOutcome::Stream(buf))
            }
            Transport::TcpTls { stream } => {
                let mut buf = BytesMut::zeroed(4096);
                let n = stream.read(&mut buf).await?;
                if n == 0 {
                    return Ok(RecvOutcome::Closed);
                }
                buf.truncate(n);
                Ok(RecvOutcome::Stream(buf))
            }
        }
    }
}

async fn bind_udp(server: SocketAddr) -> Result<UdpSocket, Error> {
    let bind_addr: SocketAddr = if server.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };

    let socket = UdpSocket::bind(bind_addr).await?;
    set_recv_buffer_size(&socket, UDP_RECV_BUFFER);
    Ok(socket)
}

/// Best-effort; a platform that rejects the requested size still leaves the
/// socket usable at its default buffer size.
fn set_recv_buffer_size(socket: &UdpSocket, size: usize) {
    let sock_ref = socket2::SockRef::from(socket);
    if let Err(e) = sock_ref.set_recv_buffer_size(size) {
        log::warn!("failed to set udp recv buffer to {size} bytes: {e}");
    }
}

async fn flush_dtls_output(socket: &UdpSocket, dtls: &mut Dtls) -> Result<(), Error> {
    let mut out_buf = [0u8; 2048];
    loop {
        match dtls.poll_output(&mut out_buf) {
            DtlsOutput::Packet(packet) => {
                socket.send(packet).await?;
            }
            DtlsOutput::Timeout(_) => break,
            DtlsOutput::Connected | DtlsOutput::PeerCert(_) | DtlsOutput::KeyingMaterial(..) => {}
            DtlsOutput::ApplicationData(_) => break,
        }
    }
    Ok(())
}

fn drain_dtls_output(dtls: &mut Dtls, mut on_output: impl FnMut(DtlsOutput<'_>)) {
    let mut out_buf = [0u8; 2048];
    loop {
        let out = dtls.poll_output(&mut out_buf);
        let is_timeout = matches!(out, DtlsOutput::Timeout(_));
        on_output(out);
        if is_timeout {
            break;
        }
    }
}

