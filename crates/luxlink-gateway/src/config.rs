// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Gateway configuration: one YAML file declaring endpoints, the DMX
//! client subprocess, the lights catalogue, and the optional Modbus /
//! MQTT / schedule blocks.
//!
//! Validation is fatal at startup only; nothing here runs in steady
//! state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Catalogue shape: group -> light -> channels.
pub type LightsConfig = BTreeMap<String, BTreeMap<String, Vec<Channel>>>;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dmx: DmxConfig,
    #[serde(default)]
    pub modbus: Option<ModbusConfig>,
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
    #[serde(default)]
    pub lights: LightsConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServerConfig {
    /// HTTP listen address, e.g. ":8080" or "0.0.0.0:8080".
    #[serde(default)]
    pub http: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DmxConfig {
    /// Path of the client subprocess.
    #[serde(default)]
    pub client: String,
    /// Command-link device passed to the client (empty = client default).
    #[serde(default)]
    pub device: String,
    /// Minimum interval between subprocess invocations.
    #[serde(default)]
    pub throttle_ms: u64,
    /// Wall-clock bound per subprocess invocation.
    #[serde(default)]
    pub timeout_ms: u64,
    /// Periodic state refresh; 0 disables it.
    #[serde(default)]
    pub refresh_ms: u64,
    /// Enable DMX output on startup.
    #[serde(default)]
    pub auto_enable: bool,
}

/// Presence of this section enables the Modbus TCP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ModbusConfig {
    /// Listen address, e.g. ":502" or ":5020".
    pub port: String,
}

/// Presence of this section enables the MQTT client.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker URL, e.g. "tcp://host:1883".
    pub broker: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub topic_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// IANA timezone name; empty means the host's local time.
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub events: Vec<ScheduleEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleEvent {
    /// "HH:MM" or "HH:MM:SS".
    pub time: String,
    /// target ("group" or "group/light") -> channel name -> value.
    #[serde(default)]
    pub set: BTreeMap<String, BTreeMap<String, u8>>,
    #[serde(default)]
    pub blackout: bool,
}

/// One DMX channel of a light.
#[derive(Debug, Clone, Deserialize)]
pub struct Channel {
    /// DMX slot, 1-512.
    pub ch: u16,
    /// Color tag, a palette name or "#RRGGBB".
    pub color: String,
    /// Display name; defaults to the color tag.
    #[serde(default)]
    pub name: String,
}

/// A channel with its color resolved to hex and its name defaulted.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub ch: u16,
    pub color: String,
    pub name: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("no lights defined")]
    NoLights,
    #[error("group {0:?} has no lights")]
    EmptyGroup(String),
    #[error("light {0:?} has no channels")]
    EmptyLight(String),
    #[error("light {light:?}: channel {ch} out of range (1-512)")]
    ChannelRange { light: String, ch: u16 },
    #[error("light {light:?}: channel {ch} missing color")]
    MissingColor { light: String, ch: u16 },
    #[error("channel {ch} used by both {first:?} and {second:?}")]
    DuplicateChannel { ch: u16, first: String, second: String },
}

impl Config {
    /// Read, parse, default and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    /// Parse and validate from YAML text.
    pub fn from_yaml(data: &str) -> Result<Self, ConfigError> {
        let mut cfg: Config = serde_yaml::from_str(data)?;
        cfg.apply_defaults();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_defaults(&mut self) {
        if self.server.http.is_empty() {
            self.server.http = ":8080".into();
        }
        if self.dmx.client.is_empty() {
            self.dmx.client = "/usr/bin/luxctl".into();
        }
        if self.dmx.throttle_ms == 0 {
            self.dmx.throttle_ms = 25;
        }
        if self.dmx.timeout_ms == 0 {
            self.dmx.timeout_ms = 500;
        }
        if let Some(mqtt) = &mut self.mqtt {
            if mqtt.topic_prefix.is_empty() {
                mqtt.topic_prefix = "dmx".into();
            }
            if mqtt.client_id.is_empty() {
                mqtt.client_id = "luxlink-gateway".into();
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.lights.is_empty() {
            return Err(ConfigError::NoLights);
        }

        let mut used: BTreeMap<u16, String> = BTreeMap::new();
        for (group, lights) in &self.lights {
            if lights.is_empty() {
                return Err(ConfigError::EmptyGroup(group.clone()));
            }
            for (light, channels) in lights {
                let full = light_key(group, light);
                if channels.is_empty() {
                    return Err(ConfigError::EmptyLight(full));
                }
                for ch in channels {
                    if !(1..=512).contains(&ch.ch) {
                        return Err(ConfigError::ChannelRange { light: full, ch: ch.ch });
                    }
                    if ch.color.is_empty() {
                        return Err(ConfigError::MissingColor { light: full, ch: ch.ch });
                    }
                    if let Some(first) = used.insert(ch.ch, full.clone()) {
                        return Err(ConfigError::DuplicateChannel {
                            ch: ch.ch,
                            first,
                            second: full,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Resolved channels for one light, or `None` if unknown.
    pub fn light(&self, group: &str, name: &str) -> Option<Vec<ResolvedChannel>> {
        let channels = self.lights.get(group)?.get(name)?;
        Some(channels.iter().map(resolve_channel).collect())
    }

    /// Names of the lights in a group, or `None` if unknown.
    pub fn group_lights(&self, group: &str) -> Option<Vec<String>> {
        Some(self.lights.get(group)?.keys().cloned().collect())
    }

    /// All group names.
    pub fn group_names(&self) -> Vec<String> {
        self.lights.keys().cloned().collect()
    }
}

fn resolve_channel(ch: &Channel) -> ResolvedChannel {
    let name = if ch.name.is_empty() { ch.color.clone() } else { ch.name.clone() };
    ResolvedChannel { ch: ch.ch, color: resolve_color(&ch.color).to_string(), name }
}

/// "group/light" key used throughout the coordinator and the APIs.
pub fn light_key(group: &str, light: &str) -> String {
    format!("{group}/{light}")
}

/// Color names to hex. Unknown names resolve to white; "#..." passes
/// through.
pub fn resolve_color(color: &str) -> &str {
    if color.starts_with('#') {
        return color;
    }
    match color {
        // Horticulture spectrum
        "uv" => "#7F00FF",
        "blue" => "#0047AB",
        "cyan" => "#00CED1",
        "green" => "#32CD32",
        "yellow" => "#FFD700",
        "red" => "#FF2400",
        "far_red" => "#8B0000",
        "ir" => "#300000",
        // White temperatures
        "warm" => "#FFE4B5",
        "white" => "#FFFAF0",
        "cool" => "#F0F8FF",
        // Stage basics
        "amber" => "#FFBF00",
        "magenta" => "#FF00FF",
        "pink" => "#FF69B4",
        _ => "#FFFFFF",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
lights:
  rack1:
    level1:
      - { ch: 1, color: blue }
      - { ch: 2, color: red, name: warm_red }
    level2:
      - { ch: 3, color: white }
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(cfg.server.http, ":8080");
        assert_eq!(cfg.dmx.client, "/usr/bin/luxctl");
        assert_eq!(cfg.dmx.throttle_ms, 25);
        assert_eq!(cfg.dmx.timeout_ms, 500);
        assert!(!cfg.dmx.auto_enable);
        assert!(cfg.modbus.is_none());
    }

    #[test]
    fn test_resolution_and_name_default() {
        let cfg = Config::from_yaml(MINIMAL).unwrap();
        let channels = cfg.light("rack1", "level1").unwrap();
        assert_eq!(channels[0], ResolvedChannel {
            ch: 1,
            color: "#0047AB".into(),
            name: "blue".into(),
        });
        assert_eq!(channels[1].name, "warm_red");
        assert!(cfg.light("rack1", "nope").is_none());
        assert_eq!(cfg.group_lights("rack1").unwrap().len(), 2);
        assert_eq!(cfg.group_names(), vec!["rack1".to_string()]);
    }

    #[test]
    fn test_unknown_color_is_white() {
        assert_eq!(resolve_color("chartreuse"), "#FFFFFF");
        assert_eq!(resolve_color("#123456"), "#123456");
        assert_eq!(resolve_color("blue"), "#0047AB");
    }

    #[test]
    fn test_no_lights_rejected() {
        let err = Config::from_yaml("server:\n  http: ':8080'\n").unwrap_err();
        assert!(matches!(err, ConfigError::NoLights));
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let yaml = r#"
lights:
  a:
    one:
      - { ch: 7, color: blue }
  b:
    two:
      - { ch: 7, color: red }
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateChannel { ch: 7, .. }));
    }

    #[test]
    fn test_channel_out_of_range_rejected() {
        let yaml = "lights:\n  a:\n    one:\n      - { ch: 513, color: blue }\n";
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::ChannelRange { ch: 513, .. }));

        let yaml = "lights:\n  a:\n    one:\n      - { ch: 0, color: blue }\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_empty_light_rejected() {
        let yaml = "lights:\n  a:\n    one: []\n";
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyLight(_)));
    }

    #[test]
    fn test_schedule_and_mqtt_blocks() {
        let yaml = r#"
mqtt:
  broker: tcp://localhost:1883
schedule:
  timezone: Europe/Paris
  events:
    - { time: "08:00", set: { rack1: { blue: 200 } } }
    - { time: "22:30:15", blackout: true }
lights:
  rack1:
    level1:
      - { ch: 1, color: blue }
"#;
        let cfg = Config::from_yaml(yaml).unwrap();
        let mqtt = cfg.mqtt.unwrap();
        assert_eq!(mqtt.topic_prefix, "dmx");
        assert_eq!(mqtt.client_id, "luxlink-gateway");
        let schedule = cfg.schedule.unwrap();
        assert_eq!(schedule.events.len(), 2);
        assert!(schedule.events[1].blackout);
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(MINIMAL.as_bytes()).unwrap();
        let cfg = Config::load(f.path()).unwrap();
        assert_eq!(cfg.lights.len(), 1);
    }
}
