//! skylane - snapshot sync and replay tooling
//!
//! Inspects replay files, plays them back headlessly through the client
//! pipeline, and records synthetic demo sessions.

mod demo;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use skylane_client::{Client, ClientConfig, ClientWorld, HeadlessHost, LoopbackNet};
use skylane_net::{Packet, ReplaySummary};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

/// Frame length of the headless update loop.
const FRAME: Duration = Duration::from_micros(16_667);

#[derive(Parser, Debug)]
#[command(author, version, about = "Snapshot sync and replay tooling", long_about = None)]
struct Cli {
    /// Client config file
    #[arg(long, global = true, default_value = "config/client.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a replay's header and frame statistics
    Info {
        /// Replay file
        file: PathBuf,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Play a replay through a headless client
    Play {
        /// Replay file
        file: PathBuf,
        /// Playback speed multiplier (overrides config)
        #[arg(long)]
        speed: Option<f32>,
        /// Stop after this many frames even if the replay continues
        #[arg(long)]
        max_ticks: Option<u64>,
        /// Print every delivered packet
        #[arg(long)]
        verbose: bool,
    },
    /// Record a synthetic session into a directory
    RecordDemo {
        /// Output directory
        dir: PathBuf,
        /// Number of snapshots the demo server sends
        #[arg(long, default_value_t = 120)]
        snapshots: u32,
        /// Units simulated by the demo server
        #[arg(long, default_value_t = 8)]
        units: i32,
    },
}

fn main() -> Result<()> {
    // WARN by default, RUST_LOG overrides
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    info!("Starting skylane v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Info { file, json } => print_info(&file, json),
        Command::Play {
            file,
            speed,
            max_ticks,
            verbose,
        } => {
            let mut config = ClientConfig::load_from_path(&cli.config);
            if let Some(speed) = speed {
                config.playback_speed = speed;
            }
            play(config, &file, max_ticks, verbose)
        }
        Command::RecordDemo {
            dir,
            snapshots,
            units,
        } => {
            let path = demo::record(&dir, snapshots, units)?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn print_info(path: &Path, json: bool) -> Result<()> {
    let summary = ReplaySummary::scan(path)
        .with_context(|| format!("Failed to read replay {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let created = DateTime::<Utc>::from_timestamp_millis(summary.header.created_at_millis)
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| summary.header.created_at_millis.to_string());
    println!("file:     {}", path.display());
    println!("version:  {}", summary.header.version);
    println!("created:  {created}");
    println!("origin:   {}", summary.header.origin);
    println!("player:   {}", summary.header.name);
    println!("duration: {:.3?}", summary.duration());
    println!("frames:   {} ({} payload bytes)", summary.frames, summary.payload_bytes);
    for (kind, count) in &summary.counts {
        println!("  {kind:<16} {count}");
    }
    if let Some(reason) = &summary.truncated {
        println!("truncated: {reason}");
    }
    Ok(())
}

fn play(config: ClientConfig, path: &Path, max_ticks: Option<u64>, verbose: bool) -> Result<()> {
    let mut client = Client::new(
        config,
        Box::new(LoopbackNet::new()),
        Box::new(HeadlessHost::new(None)),
        ClientWorld::with_default_groups(),
    )?;

    let started = Instant::now();
    let counter = std::rc::Rc::new(std::cell::Cell::new(0u64));
    let seen = std::rc::Rc::clone(&counter);
    client.set_packet_observer(Box::new(move |packet: &Packet| {
        seen.set(seen.get() + 1);
        if verbose {
            println!(
                "{:>9.3}s {:<16} {}",
                started.elapsed().as_secs_f64(),
                packet.kind().name(),
                describe(packet)
            );
        }
    }));

    let header = client.start_playback(path)?;
    println!("playing {} ({} @ {})", path.display(), header.name, header.origin);

    let mut ticks = 0u64;
    while client.is_replaying() {
        if max_ticks.is_some_and(|max| ticks >= max) {
            info!(ticks, "tick limit reached");
            client.stop_playback();
            break;
        }
        let frame_start = Instant::now();
        client.update(1.0);
        ticks += 1;
        if let Some(rest) = FRAME.checked_sub(frame_start.elapsed()) {
            std::thread::sleep(rest);
        }
    }
    let delivered = counter.get();

    println!(
        "done after {ticks} ticks, {delivered} packets, {} entities",
        client.world().registry.entity_count()
    );
    client.return_to_menu();
    Ok(())
}

fn describe(packet: &Packet) -> String {
    match packet {
        Packet::Connect { address } => address.clone(),
        Packet::WorldStream { data } => format!("{} bytes", data.len()),
        Packet::ClientSnapshot {
            last_snapshot,
            snap_id,
        } => format!("ack {last_snapshot} seq {snap_id}"),
        Packet::Invoke { method, payload } => format!("method {method}, {} bytes", payload.len()),
        Packet::ConnectPacket(connect) => format!("{} v{}", connect.name, connect.version),
        Packet::Disconnect => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_play_options() {
        let cli = Cli::try_parse_from([
            "skylane",
            "play",
            "a.srep",
            "--speed",
            "2",
            "--max-ticks",
            "10",
        ])
        .expect("parse");
        match cli.command {
            Command::Play {
                file,
                speed,
                max_ticks,
                verbose,
            } => {
                assert_eq!(file, PathBuf::from("a.srep"));
                assert_eq!(speed, Some(2.0));
                assert_eq!(max_ticks, Some(10));
                assert!(!verbose);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.config, PathBuf::from("config/client.toml"));
    }

    #[test]
    fn record_demo_defaults() {
        let cli = Cli::try_parse_from(["skylane", "record-demo", "out"]).expect("parse");
        match cli.command {
            Command::RecordDemo {
                snapshots, units, ..
            } => {
                assert_eq!(snapshots, 120);
                assert_eq!(units, 8);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn describe_invoke() {
        let packet = Packet::Invoke {
            method: 1,
            payload: vec![0; 12],
        };
        assert_eq!(describe(&packet), "method 1, 12 bytes");
    }
}
