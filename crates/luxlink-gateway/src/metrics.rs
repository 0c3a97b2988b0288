// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Prometheus text-format metrics.
//!
//! A fixed registry of atomics, rendered on demand. Channel gauges are
//! pre-allocated from the catalogue at startup so the update path is
//! lock-free and allocation-free.

use crate::config::Config;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// Commands tracked by the per-command counters.
pub const COMMANDS: [&str; 8] =
    ["enable", "disable", "blackout", "set", "get", "status", "lights", "groups"];

struct ChannelGauge {
    group: String,
    light: String,
    color: String,
    value: AtomicU8,
}

/// Gateway metrics registry.
pub struct Metrics {
    enabled: AtomicU8,
    fps_x100: AtomicU64,
    commands: [AtomicU64; COMMANDS.len()],
    errors: [AtomicU64; COMMANDS.len()],
    /// One gauge per configured DMX slot (0-based), `None` when unused.
    channels: Vec<Option<ChannelGauge>>,
}

impl Metrics {
    /// Build the registry, pre-allocating a gauge per configured channel.
    pub fn new(cfg: &Config) -> Arc<Self> {
        let mut channels: Vec<Option<ChannelGauge>> = (0..512).map(|_| None).collect();
        for (group, lights) in &cfg.lights {
            for name in lights.keys() {
                for rc in cfg.light(group, name).unwrap_or_default() {
                    channels[usize::from(rc.ch) - 1] = Some(ChannelGauge {
                        group: group.clone(),
                        light: name.clone(),
                        color: rc.name.clone(),
                        value: AtomicU8::new(0),
                    });
                }
            }
        }
        Arc::new(Self {
            enabled: AtomicU8::new(0),
            fps_x100: AtomicU64::new(0),
            commands: Default::default(),
            errors: Default::default(),
            channels,
        })
    }

    fn index(cmd: &str) -> Option<usize> {
        COMMANDS.iter().position(|&c| c == cmd)
    }

    pub fn record_command(&self, cmd: &str) {
        if let Some(i) = Self::index(cmd) {
            self.commands[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_error(&self, cmd: &str) {
        if let Some(i) = Self::index(cmd) {
            self.errors[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(u8::from(enabled), Ordering::Relaxed);
    }

    pub fn set_fps(&self, fps: f64) {
        self.fps_x100.store((fps * 100.0) as u64, Ordering::Relaxed);
    }

    /// Update the gauge for a 1-based DMX slot, if it is configured.
    pub fn set_channel(&self, ch: u16, value: u8) {
        if !(1..=512).contains(&ch) {
            return;
        }
        if let Some(gauge) = &self.channels[usize::from(ch) - 1] {
            gauge.value.store(value, Ordering::Relaxed);
        }
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self, broadcast_drops: u64) -> String {
        let mut out = String::with_capacity(2048);

        let _ = writeln!(out, "# HELP dmx_enabled DMX output enabled (1) or disabled (0)");
        let _ = writeln!(out, "# TYPE dmx_enabled gauge");
        let _ = writeln!(out, "dmx_enabled {}", self.enabled.load(Ordering::Relaxed));

        let _ = writeln!(out, "# HELP dmx_fps DMX frames per second");
        let _ = writeln!(out, "# TYPE dmx_fps gauge");
        let fps = self.fps_x100.load(Ordering::Relaxed) as f64 / 100.0;
        let _ = writeln!(out, "dmx_fps {fps:.2}");

        let _ = writeln!(out, "# HELP dmx_commands_total Total DMX commands by type");
        let _ = writeln!(out, "# TYPE dmx_commands_total counter");
        for (i, cmd) in COMMANDS.iter().enumerate() {
            let _ = writeln!(
                out,
                "dmx_commands_total{{command=\"{cmd}\"}} {}",
                self.commands[i].load(Ordering::Relaxed)
            );
        }

        let _ = writeln!(out, "# HELP dmx_errors_total Total errors by type");
        let _ = writeln!(out, "# TYPE dmx_errors_total counter");
        for (i, cmd) in COMMANDS.iter().enumerate() {
            let _ = writeln!(
                out,
                "dmx_errors_total{{type=\"{cmd}\"}} {}",
                self.errors[i].load(Ordering::Relaxed)
            );
        }

        let _ = writeln!(
            out,
            "# HELP dmx_broadcast_drops_total State deltas dropped on full subscriber queues"
        );
        let _ = writeln!(out, "# TYPE dmx_broadcast_drops_total counter");
        let _ = writeln!(out, "dmx_broadcast_drops_total {broadcast_drops}");

        let _ = writeln!(out, "# HELP dmx_channel_value Current DMX channel value (0-255)");
        let _ = writeln!(out, "# TYPE dmx_channel_value gauge");
        for (slot, gauge) in self.channels.iter().enumerate() {
            if let Some(g) = gauge {
                let _ = writeln!(
                    out,
                    "dmx_channel_value{{channel=\"{}\",group=\"{}\",light=\"{}\",color=\"{}\"}} {}",
                    slot + 1,
                    g.group,
                    g.light,
                    g.color,
                    g.value.load(Ordering::Relaxed)
                );
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_config;

    #[test]
    fn test_render_contains_series() {
        let metrics = Metrics::new(&test_config());
        metrics.set_enabled(true);
        metrics.set_fps(44.0);
        metrics.record_command("enable");
        metrics.record_command("enable");
        metrics.record_error("set");
        metrics.set_channel(1, 200);

        let text = metrics.render(7);
        assert!(text.contains("dmx_enabled 1"));
        assert!(text.contains("dmx_fps 44.00"));
        assert!(text.contains("dmx_commands_total{command=\"enable\"} 2"));
        assert!(text.contains("dmx_errors_total{type=\"set\"} 1"));
        assert!(text.contains("dmx_broadcast_drops_total 7"));
        assert!(text.contains(
            "dmx_channel_value{channel=\"1\",group=\"rack1\",light=\"level1\",color=\"blue\"} 200"
        ));
    }

    #[test]
    fn test_unconfigured_channel_ignored() {
        let metrics = Metrics::new(&test_config());
        metrics.set_channel(400, 10);
        metrics.set_channel(0, 10);
        let text = metrics.render(0);
        assert!(!text.contains("channel=\"400\""));
    }
}
