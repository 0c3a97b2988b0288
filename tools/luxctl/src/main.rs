// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! luxctl - operator CLI for the LUXLINK DMX512 command link.
//!
//! ```bash
//! # Human-friendly output
//! luxctl enable
//! luxctl set 1 255,128,64
//!
//! # JSON output for scripts and the gateway subprocess invoker
//! luxctl status --json
//!
//! # Quiet mode: exit code only
//! luxctl blackout --quiet && echo ok
//! ```
//!
//! Exit codes: 0 on success, 1 on any failure. With `--json`, failures
//! emit `{"status":"error","error":"..."}` on stdout instead of a stderr
//! message.

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use luxlink_client::{DmxClient, DEFAULT_DEVICE};
use luxlink_proto::TimingParams;
use serde_json::json;
use std::path::PathBuf;
use std::time::Instant;

/// LUXLINK DMX512 client
#[derive(Parser, Debug)]
#[command(name = "luxctl")]
#[command(about = "DMX512 command-link client")]
#[command(version)]
struct Cli {
    /// Command-link tty endpoint
    #[arg(short, long, default_value = DEFAULT_DEVICE)]
    device: PathBuf,

    /// Emit JSON on stdout (for scripts and subprocess use)
    #[arg(long, global = true)]
    json: bool,

    /// No output; exit code only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enable DMX transmission
    Enable,
    /// Disable DMX transmission
    Disable,
    /// Set all channels to 0
    Blackout,
    /// Get engine status
    Status,
    /// Set one or more consecutive channels: set <slot> <v[,v,...]>
    Set {
        /// First DMX slot (1-512)
        slot: u16,
        /// Comma-separated values (0-255)
        values: String,
    },
    /// Get timing, or set it: timing [hz [break [mab]]] (0 = unchanged)
    Timing {
        hz: Option<u16>,
        break_us: Option<u16>,
        mab_us: Option<u16>,
    },
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if err.use_stderr() => {
            // Parse failures carry exit code 1 per the CLI contract.
            eprintln!("{err}");
            std::process::exit(1);
        }
        Err(err) => {
            // --help / --version.
            let _ = err.print();
            std::process::exit(0);
        }
    };

    let json = cli.json;
    let quiet = cli.quiet;
    match run(cli) {
        Ok(()) => {}
        Err(err) => {
            if json {
                println!("{}", json!({ "status": "error", "error": err.to_string() }));
            } else if !quiet {
                eprintln!("Error: {err:#}");
            }
            std::process::exit(1);
        }
    }
}

struct Output {
    json: bool,
    quiet: bool,
}

impl Output {
    fn emit(&self, human: &str, payload: serde_json::Value) {
        if self.quiet {
            return;
        }
        if self.json {
            println!("{payload}");
        } else {
            println!("{human}");
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let out = Output { json: cli.json, quiet: cli.quiet };
    let mut client = DmxClient::open(&cli.device)
        .map_err(|e| anyhow!("failed to open {}: {e}", cli.device.display()))?;

    let started = Instant::now();
    match cli.command {
        Command::Enable => {
            client.enable()?;
            let us = started.elapsed().as_micros() as u64;
            out.emit(
                &format!("DMX enabled (latency: {us} \u{b5}s)"),
                json!({ "status": "ok", "command": "enable", "latency_us": us }),
            );
        }

        Command::Disable => {
            client.disable()?;
            let us = started.elapsed().as_micros() as u64;
            out.emit(
                &format!("DMX disabled (latency: {us} \u{b5}s)"),
                json!({ "status": "ok", "command": "disable", "latency_us": us }),
            );
        }

        Command::Blackout => {
            client.blackout()?;
            let us = started.elapsed().as_micros() as u64;
            out.emit(
                &format!("Blackout applied (latency: {us} \u{b5}s)"),
                json!({ "status": "ok", "command": "blackout", "latency_us": us }),
            );
        }

        Command::Status => {
            let status = client.status()?;
            let us = started.elapsed().as_micros() as u64;
            let fps = f64::from(status.fps_x100) / 100.0;
            out.emit(
                &format!(
                    "DMX status (latency: {us} \u{b5}s):\n  Enabled:     {}\n  Frame count: {}\n  FPS:         {fps:.2} Hz",
                    if status.enabled { "yes" } else { "no" },
                    status.frame_count,
                ),
                json!({
                    "status": "ok",
                    "command": "get_status",
                    "enabled": status.enabled,
                    "frame_count": status.frame_count,
                    "fps": fps,
                    "latency_us": us,
                }),
            );
        }

        Command::Set { slot, values } => {
            if !(1..=512).contains(&slot) {
                bail!("channel must be 1-512");
            }
            let values = parse_values(&values)?;
            if slot as usize + values.len() - 1 > 512 {
                bail!("{} values starting at slot {slot} run past slot 512", values.len());
            }
            // 1-indexed on the CLI, 0-based start slot on the wire.
            client.set_channels(slot - 1, &values)?;
            let us = started.elapsed().as_micros() as u64;
            let last = slot as usize + values.len() - 1;
            out.emit(
                &format!("Channels {slot}-{last} set (latency: {us} \u{b5}s)"),
                json!({
                    "status": "ok",
                    "command": "set",
                    "start_channel": slot,
                    "count": values.len(),
                    "latency_us": us,
                }),
            );
        }

        Command::Timing { hz: None, break_us: None, mab_us: None } => {
            let timing = client.get_timing()?;
            let us = started.elapsed().as_micros() as u64;
            out.emit(
                &format!(
                    "DMX timing (latency: {us} \u{b5}s):\n  Refresh: {} Hz\n  BREAK:   {} \u{b5}s\n  MAB:     {} \u{b5}s",
                    timing.refresh_hz, timing.break_us, timing.mab_us,
                ),
                json!({
                    "status": "ok",
                    "command": "get_timing",
                    "refresh_hz": timing.refresh_hz,
                    "break_us": timing.break_us,
                    "mab_us": timing.mab_us,
                    "latency_us": us,
                }),
            );
        }

        Command::Timing { hz, break_us, mab_us } => {
            let timing = TimingParams {
                refresh_hz: hz.unwrap_or(0),
                break_us: break_us.unwrap_or(0),
                mab_us: mab_us.unwrap_or(0),
            };
            validate_timing(&timing)?;
            client.set_timing(timing)?;
            let us = started.elapsed().as_micros() as u64;
            out.emit(
                &format!(
                    "Timing set: {} Hz, BREAK={} \u{b5}s, MAB={} \u{b5}s (0 = unchanged) (latency: {us} \u{b5}s)",
                    timing.refresh_hz, timing.break_us, timing.mab_us,
                ),
                json!({
                    "status": "ok",
                    "command": "set_timing",
                    "refresh_hz": timing.refresh_hz,
                    "break_us": timing.break_us,
                    "mab_us": timing.mab_us,
                    "latency_us": us,
                }),
            );
        }
    }

    Ok(())
}

fn parse_values(raw: &str) -> Result<Vec<u8>> {
    let values: Vec<u8> = raw
        .split(',')
        .map(|part| part.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .map_err(|_| anyhow!("values must be 0-255, comma-separated"))?;
    if values.is_empty() {
        bail!("at least one value required");
    }
    Ok(values)
}

/// Mirror the firmware's ranges so obvious mistakes fail before the wire.
fn validate_timing(t: &TimingParams) -> Result<()> {
    if t.refresh_hz != 0 && !(1..=44).contains(&t.refresh_hz) {
        bail!("refresh must be 1-44 Hz (or 0 = unchanged)");
    }
    if t.break_us != 0 && !(88..=1000).contains(&t.break_us) {
        bail!("BREAK must be 88-1000 \u{b5}s (or 0 = unchanged)");
    }
    if t.mab_us != 0 && !(8..=100).contains(&t.mab_us) {
        bail!("MAB must be 8-100 \u{b5}s (or 0 = unchanged)");
    }
    Ok(())
}
