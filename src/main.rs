//! hci-snoop CLI

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::Context;
use hci_snoop::wire::{CaptureReader, Direction, PacketType, BTSNOOP_EPOCH_DELTA_US};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        usage();
    }

    match args[1].as_str() {
        "inspect" => {
            if args.len() < 3 {
                eprintln!("Usage: hci-snoop inspect <capture-file>");
                process::exit(1);
            }

            let path = PathBuf::from(&args[2]);
            if let Err(e) = inspect(&path) {
                eprintln!("Error: {e:#}");
                process::exit(1);
            }
        }
        "check-config" => {
            if args.len() < 3 {
                eprintln!("Usage: hci-snoop check-config <config.toml>");
                process::exit(1);
            }

            match hci_snoop::CaptureConfig::from_file(Path::new(&args[2])) {
                Ok(config) => println!("{config:#?}"),
                Err(e) => {
                    eprintln!("Error: {e}");
                    process::exit(1);
                }
            }
        }
        command => {
            eprintln!("Unknown command: {command}");
            eprintln!("Run 'hci-snoop' for usage information.");
            process::exit(1);
        }
    }
}

fn usage() -> ! {
    eprintln!("hci-snoop v{}", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("Usage: hci-snoop <command> [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  inspect        Summarize a btsnoop capture or diagnostics file");
    eprintln!("  check-config   Validate a capture configuration file");
    process::exit(1);
}

fn inspect(path: &Path) -> anyhow::Result<()> {
    let reader = CaptureReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let header = reader.header();

    println!("File:      {}", path.display());
    println!("Version:   {}", header.version());
    println!("Datalink:  {}", header.datalink_type());
    println!("Size:      {} bytes", reader.len());
    println!();

    let mut per_type: BTreeMap<PacketType, (u64, u64)> = BTreeMap::new();
    let mut redacted = 0u64;
    let mut dropped = 0u64;
    let mut first_ts = None;
    let mut last_ts = 0u64;

    for record in reader.records() {
        let record = record.context("Capture file is damaged")?;
        let counts = per_type.entry(record.packet_type).or_default();
        match record.direction {
            Direction::Incoming => counts.0 += 1,
            Direction::Outgoing => counts.1 += 1,
        }
        if record.is_redacted() {
            redacted += 1;
        }
        dropped += u64::from(record.dropped_packets);
        first_ts.get_or_insert(record.timestamp);
        last_ts = record.timestamp;
    }

    println!("{:<6} {:>10} {:>10}", "Type", "Incoming", "Outgoing");
    for (packet_type, (incoming, outgoing)) in &per_type {
        println!("{packet_type:<6} {incoming:>10} {outgoing:>10}");
    }
    println!();
    println!("Redacted records: {redacted}");
    println!("Dropped packets:  {dropped}");

    if let Some(first) = first_ts {
        let unix_us = first.saturating_sub(BTSNOOP_EPOCH_DELTA_US);
        println!("First packet:     {unix_us} us since Unix epoch");
        println!(
            "Span:             {:.3} s",
            last_ts.saturating_sub(first) as f64 / 1_000_000.0
        );
    }

    Ok(())
}
