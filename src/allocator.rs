//! The fleet supervisor (§4.5): spawns one task per allocation on a
//! staggered create loop, collects their terminal events, and once every
//! allocation has reported in, starts traffic and periodically prints
//! setup and steady-state summaries.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::allocation::{self, AllocationConfig, AllocationEvent};
use crate::config::Config;
use crate::error::Error;
use crate::util;

/// Every allocation's Sender ticks on this cadence once running (§4.5.3,
/// referenced by `Sender::new`'s minimum `ptime` and `config::derive_ptime_ms`).
pub const PACING_INTERVAL_MS: u32 = 5;

/// How often the create loop starts the next allocation, jittered within
/// `[0, CREATE_JITTER_MS)` so a large `-a` doesn't open every socket in
/// the same tick.
const CREATE_JITTER_MS: u64 = 4;

/// Live summary cadence while allocations are coming up and while traffic
/// is running.
const SPINNER_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorCommand {
    Idle,
    Start,
    Shutdown,
}

struct AllocationOutcome {
    index: u32,
    atime_ms: u64,
    software: Option<String>,
    authenticated: bool,
}

/// Drives the whole run: brings every allocation up, starts traffic once
/// the cohort is ready, and prints the two summaries described in §6.4.
/// A single allocation failing before the cohort is ready is run-fatal
/// (§4.5.2, §7): partial cohorts aren't a reproducible benchmark, so the
/// run aborts on the first `Failed` rather than measuring what came up.
pub struct Allocator {
    config: Config,
    session_cookie: u32,
    commands_tx: watch::Sender<AllocatorCommand>,
    events_tx: mpsc::Sender<AllocationEvent>,
    events_rx: mpsc::Receiver<AllocationEvent>,
    tasks: JoinSet<()>,
}

impl Allocator {
    pub fn new(config: Config) -> Self {
        let (commands_tx, _) = watch::channel(AllocatorCommand::Idle);
        let (events_tx, events_rx) = mpsc::channel(1024);
        let session_cookie: u32 = rand::thread_rng().gen();

        Self {
            config,
            session_cookie,
            commands_tx,
            events_tx,
            events_rx,
            tasks: JoinSet::new(),
        }
    }

    /// Runs the create loop, waits for the full cohort to report ready or
    /// failed, starts traffic, and then serves until `shutdown` is called
    /// (normally from a Ctrl-C handler in `main`).
    pub async fn run(&mut self) -> Result<(), Error> {
        log::info!(
            "allocating {} allocation(s) toward {} over {}",
            self.config.allocations,
            self.config.server,
            util::protocol_name(self.config.proto, self.config.secure),
        );

        let setup_begin = Instant::now();
        self.spawn_all();

        let expected = self.config.allocations;
        let mut ready = Vec::with_capacity(expected as usize);
        let mut spinner = tokio::time::interval(SPINNER_INTERVAL);

        while (ready.len() as u32) < expected {
            tokio::select! {
                event = self.events_rx.recv() => {
                    match event {
                        Some(AllocationEvent::Ready { index, atime_ms, software, authenticated, mapped, lifetime }) => {
                            log::info!("[{index}] ready: mapped={mapped} lifetime={lifetime}s");
                            ready.push(AllocationOutcome { index, atime_ms, software, authenticated });
                        }
                        Some(AllocationEvent::Failed { index, error }) => {
                            log::error!("[{index}] failed to come up: {error}");
                            println!();
                            return Err(error);
                        }
                        Some(AllocationEvent::Stopped { .. }) => {}
                        None => break,
                    }
                }
                _ = spinner.tick() => {
                    print!("\rsetting up... {}/{expected} ready", ready.len());
                    use std::io::Write;
                    let _ = std::io::stdout().flush();
                }
            }
        }
        println!();

        self.print_setup_summary(&ready, setup_begin.elapsed());

        let _ = self.commands_tx.send(AllocatorCommand::Start);
        log::info!("traffic started across {} allocation(s)", ready.len());

        Ok(())
    }

    fn spawn_all(&mut self) {
        for index in 0..self.config.allocations {
            let cfg = AllocationConfig {
                index,
                server: self.config.server,
                proto: self.config.proto,
                secure: self.config.secure,
                peer_mode: self.config.peer_mode,
                user: self.config.user.clone(),
                pass: self.config.pass.clone(),
                session_cookie: self.session_cookie,
                bitrate: self.config.bitrate,
                psize: self.config.psize,
            };

            let events = self.events_tx.clone();
            let commands = self.commands_tx.subscribe();
            let jitter_ms = rand::thread_rng().gen_range(0..CREATE_JITTER_MS);

            self.tasks.spawn_local(async move {
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                allocation::run(cfg, events, commands).await;
            });
        }
    }

    /// Prints the §4.5.2/§6.4 setup summary: allocations/second over the
    /// whole create loop, plus per-allocation atime min/avg/max with the
    /// owning indices.
    fn print_setup_summary(&self, ready: &[AllocationOutcome], elapsed: Duration) {
        println!("--- setup summary ---");

        let elapsed_ms = elapsed.as_millis();
        let rate = if elapsed.as_secs_f64() > 0.0 {
            ready.len() as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        println!("{} allocation(s) in {elapsed_ms}ms ({rate:.1}/s)", ready.len());

        if ready.is_empty() {
            return;
        }

        let min = ready.iter().min_by_key(|o| o.atime_ms).unwrap();
        let max = ready.iter().max_by_key(|o| o.atime_ms).unwrap();
        let avg_ms = ready.iter().map(|o| o.atime_ms).sum::<u64>() / ready.len() as u64;

        println!(
            "allocation time: min {}ms (#{}), avg {avg_ms}ms, max {}ms (#{})",
            min.atime_ms, min.index, max.atime_ms, max.index,
        );

        if let Some(first) = ready.first() {
            println!(
                "software: {} (authenticated: {})",
                first.software.as_deref().unwrap_or("unknown"),
                first.authenticated,
            );
        }
    }

    /// Signals every allocation task to send REFRESH(0) and tear down,
    /// collecting each one's final [`AllocationEvent::Stopped`] counters
    /// and printing the traffic summary (§4.5.4, §6.4) once every task has
    /// joined or `grace` elapses, whichever comes first.
    pub async fn shutdown(&mut self, grace: Duration) {
        let _ = self.commands_tx.send(AllocatorCommand::Shutdown);

        let mut tx_packets = 0u64;
        let mut rx_packets = 0u64;
        let mut rx_bytes = 0u64;
        let mut tx_bitrates = Vec::new();
        let mut rx_bitrates = Vec::new();

        let collect = async {
            loop {
                tokio::select! {
                    joined = self.tasks.join_next() => {
                        if joined.is_none() {
                            break;
                        }
                    }
                    Some(event) = self.events_rx.recv() => {
                        if let AllocationEvent::Stopped { tx_packets: tp, tx_bitrate, rx_packets: rp, rx_bytes: rb, rx_bitrate, .. } = event {
                            tx_packets += tp;
                            rx_packets += rp;
                            rx_bytes += rb;
                            if let Some(b) = tx_bitrate { tx_bitrates.push(b); }
                            if let Some(b) = rx_bitrate { rx_bitrates.push(b); }
                        }
                    }
                }
            }
        };

        if tokio::time::timeout(grace, collect).await.is_err() {
            log::warn!("shutdown grace period elapsed before every allocation reported in");
        }

        self.print_traffic_summary(tx_packets, rx_packets, rx_bytes, &tx_bitrates, &rx_bitrates);
    }

    fn print_traffic_summary(
        &self,
        tx_packets: u64,
        rx_packets: u64,
        rx_bytes: u64,
        tx_bitrates: &[f64],
        rx_bitrates: &[f64],
    ) {
        println!("--- traffic summary ---");
        println!("tx packets: {tx_packets}");
        println!("rx packets: {rx_packets}");
        println!("rx bytes:   {rx_bytes}");

        let total_tx_bitrate: f64 = tx_bitrates.iter().sum();
        let total_rx_bitrate: f64 = rx_bitrates.iter().sum();
        println!("total tx bitrate: {}", util::format_bitrate(total_tx_bitrate));
        println!("total rx bitrate: {}", util::format_bitrate(total_rx_bitrate));

        if rx_packets < tx_packets {
            println!("lost {} packet(s) ({:.2}% loss)", tx_packets - rx_packets, 100.0 * (1.0 - rx_packets as f64 / tx_packets.max(1) as f64));
        }
    }

    pub fn session_cookie(&self) -> u32 {
        self.session_cookie
    }
}
