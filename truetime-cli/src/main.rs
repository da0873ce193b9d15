// Copyright TrueTime Authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! truetime CLI
//!
//! Queries a running PTP daemon's published shared-memory clock data and prints the resulting
//! `[earliest, latest]` TrueTime interval. With `-f`, keeps printing once a second until killed.

use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::{error, Level};

use truetime::TrueTimeClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum WireVersion {
    #[value(name = "1")]
    V1,
    #[value(name = "2")]
    V2,
}

#[derive(Parser, Debug)]
#[command(author, name = "truetime", version, about, long_about = None)]
struct Cli {
    /// Path to the shared-memory segment published by the daemon.
    #[arg(long, default_value = "/var/run/truetime/shm")]
    shm_path: String,

    /// Print TrueTime in a loop, once a second, instead of once.
    #[arg(short, long)]
    follow: bool,

    /// Report the interval in UTC (leap-second smeared) instead of TAI.
    #[arg(short = 'u', long)]
    utc: bool,

    /// Wire layout version to assume, overriding the `_v2` filename-suffix heuristic.
    #[arg(short = 'V', long)]
    wire_version: Option<WireVersion>,

    /// Emit structured log messages. Default to human readable.
    #[arg(short, long)]
    json_output: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let format = tracing_subscriber::fmt::format()
        .with_level(true)
        .with_target(false)
        .with_file(true)
        .with_line_number(true);

    let builder = tracing_subscriber::fmt().with_max_level(Level::INFO);

    if args.json_output {
        builder
            .event_format(format.json().flatten_event(true))
            .init();
    } else {
        builder.event_format(format).init();
    };

    let shm_path = match args.wire_version {
        Some(WireVersion::V2) if !args.shm_path.ends_with("_v2") => {
            format!("{}_v2", args.shm_path)
        }
        Some(WireVersion::V1) if args.shm_path.ends_with("_v2") => {
            args.shm_path.trim_end_matches("_v2").to_string()
        }
        _ => args.shm_path,
    };

    let mut client = TrueTimeClient::new(&shm_path).with_context(|| {
        error!("failed to open {}", shm_path);
        format!("opening {}", shm_path)
    })?;

    loop {
        let tt = if args.utc {
            client.gettime_utc()
        } else {
            client.gettime()
        }
        .map_err(|e| {
            error!("gettime failed: {}", e);
            e
        })
        .context("gettime")?;

        println!("Earliest: {} ns", tt.earliest_ns);
        println!("Latest:   {} ns", tt.latest_ns);
        println!("WOU:      {} ns", tt.latest_ns - tt.earliest_ns);

        if !args.follow {
            break;
        }
        thread::sleep(Duration::from_secs(1));
    }

    Ok(())
}
