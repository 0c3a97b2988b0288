// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DMX state coordinator.
//!
//! The single authoritative mirror of the universe on the Linux side:
//! 512 raw channels, the enabled flag, and the per-light view derived
//! from the catalogue. All mutations drive the downstream port first and
//! commit to the mirror only on success, so subscribers never observe a
//! state the engine refused.
//!
//! # Locking
//!
//! - `mirror`: one `RwLock`; writers commit, readers snapshot. Never held
//!   across an await - the subprocess call happens outside it.
//! - `subs`: separate `RwLock` on the subscriber set. Fan-out uses
//!   non-blocking sends; a slow subscriber loses deltas (counted), never
//!   blocks the mutator.
//!
//! # Pre-allocation
//!
//! Every light, channel and value map is built once at startup and
//! mutated in place afterwards. The broadcast payload is serialized once
//! per mutation under the read lock and shared by `Arc` to every queue;
//! per-subscriber work is a `try_send`, nothing more.

use crate::config::{light_key, Config};
use crate::port::{DmxPort, PortError, PortStatus};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Per-subscriber queue depth. Deltas beyond this are dropped for that
/// subscriber and counted.
pub const SUBSCRIBER_QUEUE: usize = 100;

/// One channel of a light, updated in place.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChannelState {
    pub ch: u16,
    pub color: String,
    pub name: String,
    pub value: u8,
}

/// A light and its current values. Allocated once at startup.
#[derive(Debug, Clone, Serialize)]
pub struct LightState {
    pub key: String,
    pub group: String,
    pub name: String,
    pub channels: Vec<ChannelState>,
    /// channel name -> value, for fast UI updates.
    pub values: BTreeMap<String, u8>,
}

/// Typed status response shared by every protocol surface.
#[derive(Debug, Clone, Copy, Serialize, Default)]
pub struct StatusResponse {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u64>,
}

struct Mirror {
    enabled: bool,
    channels: [u8; 512],
    lights: BTreeMap<String, LightState>,
    group_names: Vec<String>,
    /// Reverse map: 0-based slot -> (light key, channel index) pairs.
    channel_to_light: Vec<Vec<(String, usize)>>,
}

/// The coordinator. One instance per gateway.
pub struct DmxState {
    cfg: Arc<Config>,
    port: Arc<dyn DmxPort>,
    mirror: RwLock<Mirror>,
    subs: RwLock<BTreeMap<u64, mpsc::Sender<Arc<str>>>>,
    next_sub: AtomicU64,
    broadcast_drops: AtomicU64,
    refresh_stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl DmxState {
    /// Build the coordinator and pre-allocate every light structure from
    /// the resolved catalogue.
    pub fn new(cfg: Arc<Config>, port: Arc<dyn DmxPort>) -> Arc<Self> {
        let mut lights = BTreeMap::new();
        let mut channel_to_light: Vec<Vec<(String, usize)>> = vec![Vec::new(); 512];

        for (group, group_lights) in &cfg.lights {
            for name in group_lights.keys() {
                let key = light_key(group, name);
                let resolved = cfg.light(group, name).unwrap_or_default();

                let mut channels = Vec::with_capacity(resolved.len());
                let mut values = BTreeMap::new();
                for (idx, rc) in resolved.iter().enumerate() {
                    channels.push(ChannelState {
                        ch: rc.ch,
                        color: rc.color.clone(),
                        name: rc.name.clone(),
                        value: 0,
                    });
                    values.insert(rc.name.clone(), 0);
                    channel_to_light[usize::from(rc.ch) - 1].push((key.clone(), idx));
                }

                lights.insert(
                    key.clone(),
                    LightState {
                        key,
                        group: group.clone(),
                        name: name.clone(),
                        channels,
                        values,
                    },
                );
            }
        }

        let group_names = cfg.group_names();
        info!(lights = lights.len(), groups = group_names.len(), "lights cache built");

        Arc::new(Self {
            cfg,
            port,
            mirror: RwLock::new(Mirror {
                enabled: false,
                channels: [0; 512],
                lights,
                group_names,
                channel_to_light,
            }),
            subs: RwLock::new(BTreeMap::new()),
            next_sub: AtomicU64::new(1),
            broadcast_drops: AtomicU64::new(0),
            refresh_stop: Mutex::new(None),
        })
    }

    // ------------------------------------------------------------------
    // Mutations. Port first; mirror commit and broadcast only on success.
    // ------------------------------------------------------------------

    pub async fn enable(&self) -> Result<(), PortError> {
        self.port.enable().await?;
        self.mirror.write().enabled = true;
        self.broadcast();
        Ok(())
    }

    pub async fn disable(&self) -> Result<(), PortError> {
        self.port.disable().await?;
        self.mirror.write().enabled = false;
        self.broadcast();
        Ok(())
    }

    pub async fn blackout(&self) -> Result<(), PortError> {
        self.port.blackout().await?;
        {
            let mut m = self.mirror.write();
            m.channels.fill(0);
            for light in m.lights.values_mut() {
                for ch in &mut light.channels {
                    ch.value = 0;
                }
                for v in light.values.values_mut() {
                    *v = 0;
                }
            }
        }
        self.broadcast();
        Ok(())
    }

    /// Set a single 1-based DMX channel. Out-of-range slots are no-ops.
    pub async fn set_channel(&self, channel: u16, value: u8) -> Result<(), PortError> {
        if !(1..=512).contains(&channel) {
            return Ok(());
        }
        self.port.set_channel(channel, value).await?;
        self.commit_channel(channel, value);
        self.broadcast();
        Ok(())
    }

    /// Update the named channels of one light. Unknown lights and unknown
    /// channel names are no-ops; per-channel downstream failures leave
    /// those channels uncommitted.
    pub async fn set_light(
        &self,
        group: &str,
        name: &str,
        values: &BTreeMap<String, u8>,
    ) -> Result<(), PortError> {
        let key = light_key(group, name);

        // Resolve requested channels from the pre-allocated state.
        let targets: Vec<(u16, u8)> = {
            let m = self.mirror.read();
            let Some(light) = m.lights.get(&key) else {
                return Ok(());
            };
            light
                .channels
                .iter()
                .filter_map(|ch| values.get(&ch.name).map(|v| (ch.ch, *v)))
                .collect()
        };

        let mut committed = false;
        for (ch, value) in targets {
            match self.port.set_channel(ch, value).await {
                Ok(()) => {
                    self.commit_channel(ch, value);
                    committed = true;
                }
                Err(e) => warn!(ch, error = %e, "failed to set channel"),
            }
        }

        if committed {
            self.broadcast();
        }
        Ok(())
    }

    /// Update every light in a group. Per-light failures are logged, not
    /// fatal; unknown groups are no-ops.
    pub async fn set_group(
        &self,
        group: &str,
        values: &BTreeMap<String, u8>,
    ) -> Result<(), PortError> {
        let Some(names) = self.cfg.group_lights(group) else {
            return Ok(());
        };
        for name in names {
            if let Err(e) = self.set_light(group, &name, values).await {
                warn!(light = %name, error = %e, "failed to set light in group");
            }
        }
        Ok(())
    }

    /// Commit one successful channel write to the mirror, updating the
    /// raw array and every affected pre-allocated light in place.
    fn commit_channel(&self, channel: u16, value: u8) {
        let slot = usize::from(channel) - 1;
        let mut guard = self.mirror.write();
        let m = &mut *guard;
        m.channels[slot] = value;
        for (key, idx) in &m.channel_to_light[slot] {
            if let Some(light) = m.lights.get_mut(key) {
                light.channels[*idx].value = value;
                if let Some(v) = light.values.get_mut(&light.channels[*idx].name) {
                    *v = value;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Subscriptions and fan-out.
    // ------------------------------------------------------------------

    /// Register a subscriber. The receiver yields pre-serialized JSON
    /// state payloads.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id = self.next_sub.fetch_add(1, Ordering::Relaxed);
        self.subs.write().insert(id, tx);
        debug!(id, "subscriber added");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subs.write().remove(&id);
        debug!(id, "subscriber removed");
    }

    pub fn subscriber_count(&self) -> usize {
        self.subs.read().len()
    }

    /// Deltas dropped on full subscriber queues since startup.
    pub fn broadcast_drops(&self) -> u64 {
        self.broadcast_drops.load(Ordering::Relaxed)
    }

    /// Serialize the current state once and hand it to every subscriber
    /// queue without blocking.
    fn broadcast(&self) {
        if self.subs.read().is_empty() {
            return;
        }

        let payload: Arc<str> = {
            let m = self.mirror.read();
            serde_json::to_string(&StateUpdate { mirror: &*m })
                .unwrap_or_default()
                .into()
        };

        let subs = self.subs.read();
        for tx in subs.values() {
            if tx.try_send(Arc::clone(&payload)).is_err() {
                self.broadcast_drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    // ------------------------------------------------------------------
    // Read paths. References into pre-allocated structures; callers must
    // not hold the guards across awaits.
    // ------------------------------------------------------------------

    pub fn is_enabled(&self) -> bool {
        self.mirror.read().enabled
    }

    /// All 512 raw channel values.
    pub fn channels(&self) -> [u8; 512] {
        self.mirror.read().channels
    }

    /// All lights, by "group/light" key.
    pub fn lights(&self) -> parking_lot::MappedRwLockReadGuard<'_, BTreeMap<String, LightState>> {
        RwLockReadGuard::map(self.mirror.read(), |m| &m.lights)
    }

    /// One light, or `None` if unknown.
    pub fn light(
        &self,
        group: &str,
        name: &str,
    ) -> Option<parking_lot::MappedRwLockReadGuard<'_, LightState>> {
        let key = light_key(group, name);
        RwLockReadGuard::try_map(self.mirror.read(), |m| m.lights.get(&key)).ok()
    }

    /// All group names.
    pub fn groups(&self) -> parking_lot::MappedRwLockReadGuard<'_, Vec<String>> {
        RwLockReadGuard::map(self.mirror.read(), |m| &m.group_names)
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Mirror flag merged with a live engine query. The mirror stays
    /// authoritative for `enabled`; fps and frame count come from the
    /// engine when it answers.
    pub async fn status(&self) -> StatusResponse {
        let enabled = self.is_enabled();
        let mut resp = StatusResponse { enabled, ..Default::default() };
        if let Ok(PortStatus { fps, frame_count, .. }) = self.port.status().await {
            resp.fps = Some(fps);
            resp.frame_count = Some(frame_count);
        }
        resp
    }

    /// Full catalogue message sent once to each new WebSocket client.
    pub fn init_message(&self) -> String {
        let m = self.mirror.read();
        json!({
            "type": "init",
            "enabled": m.enabled,
            "groups": &m.group_names,
            "lights": &m.lights,
        })
        .to_string()
    }

    // ------------------------------------------------------------------
    // Periodic refresh.
    // ------------------------------------------------------------------

    /// Start the periodic refresh: re-broadcast state every tick, and
    /// while enabled re-push every configured channel downstream to heal
    /// a restarted peer.
    pub fn start_refresh(self: &Arc<Self>, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        let (tx, mut rx) = oneshot::channel::<()>();
        *self.refresh_stop.lock() = Some(tx);

        let state = Arc::clone(self);
        tokio::spawn(async move {
            info!(?interval, "dmx refresh started");
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => state.refresh().await,
                    _ = &mut rx => break,
                }
            }
            info!("dmx refresh stopped");
        });
    }

    pub fn stop_refresh(&self) {
        // Dropping the sender wakes the task's select arm.
        self.refresh_stop.lock().take();
    }

    async fn refresh(&self) {
        // Keep UIs synchronized even when nothing changed.
        self.broadcast();

        if !self.is_enabled() {
            return;
        }

        // Snapshot the configured channels, then push outside the lock.
        let pairs: Vec<(u16, u8)> = {
            let m = self.mirror.read();
            m.lights
                .values()
                .flat_map(|l| l.channels.iter().map(|c| (c.ch, c.value)))
                .collect()
        };
        for (ch, value) in pairs {
            if let Err(e) = self.port.set_channel(ch, value).await {
                warn!(ch, error = %e, "refresh push failed");
            }
        }
        debug!("dmx state refreshed");
    }
}

/// Broadcast payload, serialized borrowing the mirror:
/// `{"type":"state","enabled":...,"values":{key:{name:value}}}`.
struct StateUpdate<'a> {
    mirror: &'a Mirror,
}

impl Serialize for StateUpdate<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("type", "state")?;
        map.serialize_entry("enabled", &self.mirror.enabled)?;
        map.serialize_entry("values", &ValuesView { mirror: self.mirror })?;
        map.end()
    }
}

struct ValuesView<'a> {
    mirror: &'a Mirror,
}

impl Serialize for ValuesView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.mirror.lights.len()))?;
        for (key, light) in &self.mirror.lights {
            map.serialize_entry(key, &light.values)?;
        }
        map.end()
    }
}
