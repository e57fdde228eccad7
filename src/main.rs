//! CLI entry point (§6.3): parses arguments, resolves the target server,
//! and drives one [`Allocator`] run to completion, including the
//! SIGINT-once-graceful / SIGINT-twice-hard-exit cancellation policy of
//! §5 "Cancellation & timeouts".

use std::time::Duration;

use clap::Parser;
use log::LevelFilter;

use turnperf::allocator::Allocator;
use turnperf::config::{Cli, Config};

/// SIGINT once: stop senders and wait this long to drain in-flight
/// responses before printing the traffic summary.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Exit code for a forced (double-SIGINT) exit, distinct from both
/// success and an ordinary fatal error.
const FORCE_EXIT_CODE: i32 = 2;

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build the tokio runtime");

    let local = tokio::task::LocalSet::new();
    let code = local.block_on(&runtime, run(cli));
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let config = match Config::from_cli(cli).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("turnperf: {e}");
            return 1;
        }
    };

    let mut allocator = Allocator::new(config);

    tokio::select! {
        result = allocator.run() => {
            if let Err(e) = result {
                eprintln!("turnperf: {e}");
                return 1;
            }
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nturnperf: interrupted during setup, exiting");
            return FORCE_EXIT_CODE;
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupt received, stopping senders ({SHUTDOWN_GRACE:?} grace)...");
        }
    }

    tokio::select! {
        _ = allocator.shutdown(SHUTDOWN_GRACE) => {}
        _ = tokio::signal::ctrl_c() => {
            eprintln!("turnperf: second interrupt, forcing exit");
            return FORCE_EXIT_CODE;
        }
    }

    0
}

/// `-v`/`-vv` raises verbosity the way most of this workspace's CLIs do:
/// zero flags is warnings-and-up, one is info, two or more is debug.
fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };

    simple_logger::SimpleLogger::new()
        .with_level(level)
        .init()
        .expect("failed to install the logger");
}
