//! `turnperf`: a TURN relay performance and correctness test harness.
//!
//! Binds the allocation engine (§4.4), traffic engine (§4.2/§4.3), and
//! allocator supervisor (§4.5) together as a library so the CLI entry
//! point in `main.rs` stays a thin driver and the wire-level pieces get
//! doctested like any other crate in this workspace.

pub mod allocation;
pub mod allocator;
pub mod config;
pub mod error;
pub mod payload;
pub mod reassembly;
pub mod receiver;
pub mod sender;
pub mod tls_verify;
pub mod transport;
pub mod turn_client;
pub mod util;
