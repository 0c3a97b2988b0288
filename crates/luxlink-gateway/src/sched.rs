// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wall-clock event scheduler.
//!
//! Events are declared in the configuration as `HH:MM` or `HH:MM:SS` in a
//! chosen timezone, sorted by time-of-day, and checked by a 1-second
//! ticker. At most one event fires per wall-clock second; the label of
//! the last executed second guards against double fire when a tick lands
//! twice in the same second.

use crate::config::ScheduleConfig;
use crate::state::DmxState;
use chrono::{Local, Timelike, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// A parsed schedule entry.
#[derive(Debug, Clone)]
pub struct Event {
    hour: u32,
    minute: u32,
    second: u32,
    set: BTreeMap<String, BTreeMap<String, u8>>,
    blackout: bool,
}

impl Event {
    fn seconds(&self) -> u32 {
        self.hour * 3600 + self.minute * 60 + self.second
    }

    fn label(&self) -> String {
        format!("{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// Event summary for the HTTP API.
#[derive(Debug, Clone, Serialize)]
pub struct EventInfo {
    pub time: String,
    pub blackout: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
}

/// The next pending event, for `/api/schedule/next`.
#[derive(Debug, Clone, Serialize)]
pub struct NextEventInfo {
    pub time: String,
    pub in_secs: u64,
    pub blackout: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<String>,
}

pub struct Scheduler {
    events: Vec<Event>,
    state: Arc<DmxState>,
    tz: Option<Tz>,
    last_run: Mutex<String>,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl Scheduler {
    /// Parse and sort the configured events. Unparseable times are
    /// skipped with a warning; an invalid timezone is an error.
    pub fn new(cfg: &ScheduleConfig, state: Arc<DmxState>) -> anyhow::Result<Arc<Self>> {
        let tz = if cfg.timezone.is_empty() {
            None
        } else {
            Some(
                cfg.timezone
                    .parse::<Tz>()
                    .map_err(|e| anyhow::anyhow!("invalid timezone {:?}: {e}", cfg.timezone))?,
            )
        };

        let mut events = Vec::with_capacity(cfg.events.len());
        for entry in &cfg.events {
            match parse_time(&entry.time) {
                Some((hour, minute, second)) => events.push(Event {
                    hour,
                    minute,
                    second,
                    set: entry.set.clone(),
                    blackout: entry.blackout,
                }),
                None => warn!(time = %entry.time, "invalid schedule time, skipping"),
            }
        }
        events.sort_by_key(Event::seconds);

        Ok(Arc::new(Self {
            events,
            state,
            tz,
            last_run: Mutex::new(String::new()),
            stop: Mutex::new(None),
        }))
    }

    /// Start the 1-second ticker task.
    pub fn start(self: &Arc<Self>) {
        let (tx, mut rx) = oneshot::channel::<()>();
        *self.stop.lock() = Some(tx);

        let sched = Arc::clone(self);
        tokio::spawn(async move {
            info!(events = sched.events.len(), "scheduler started");
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => sched.check().await,
                    _ = &mut rx => break,
                }
            }
            info!("scheduler stopped");
        });
    }

    pub fn stop(&self) {
        self.stop.lock().take();
    }

    fn now_hms(&self) -> (u32, u32, u32) {
        match self.tz {
            Some(tz) => {
                let now = Utc::now().with_timezone(&tz);
                (now.hour(), now.minute(), now.second())
            }
            None => {
                let now = Local::now();
                (now.hour(), now.minute(), now.second())
            }
        }
    }

    async fn check(&self) {
        let (h, m, s) = self.now_hms();
        let label = format!("{h:02}:{m:02}:{s:02}");
        if *self.last_run.lock() == label {
            return;
        }

        for event in &self.events {
            if event.hour == h && event.minute == m && event.second == s {
                self.execute(event).await;
                *self.last_run.lock() = label;
                return;
            }
        }
    }

    async fn execute(&self, event: &Event) {
        info!(time = %event.label(), "executing scheduled event");

        if event.blackout {
            if let Err(e) = self.state.blackout().await {
                error!(error = %e, "scheduled blackout failed");
            }
            return;
        }

        for (target, values) in &event.set {
            let (group, light) = crate::api::parse_target(target);
            let result = if light.is_empty() {
                self.state.set_group(group, values).await
            } else {
                self.state.set_light(group, light, values).await
            };
            if let Err(e) = result {
                error!(target = %target, error = %e, "scheduled set failed");
            }
        }
    }

    /// All events in firing order.
    pub fn events(&self) -> Vec<EventInfo> {
        self.events
            .iter()
            .map(|e| EventInfo {
                time: e.label(),
                blackout: e.blackout,
                targets: e.set.keys().cloned().collect(),
            })
            .collect()
    }

    /// The nearest future event, wrapping to tomorrow's first event once
    /// all of today's have fired.
    pub fn next_event(&self) -> Option<NextEventInfo> {
        let first = self.events.first()?;
        let (h, m, s) = self.now_hms();
        let now_secs = h * 3600 + m * 60 + s;

        let (event, in_secs) = self
            .events
            .iter()
            .find(|e| e.seconds() > now_secs)
            .map(|e| (e, u64::from(e.seconds() - now_secs)))
            .unwrap_or_else(|| (first, u64::from(24 * 3600 - now_secs + first.seconds())));

        Some(NextEventInfo {
            time: event.label(),
            in_secs,
            blackout: event.blackout,
            targets: event.set.keys().cloned().collect(),
        })
    }
}

fn parse_time(value: &str) -> Option<(u32, u32, u32)> {
    let mut parts = value.split(':');
    let hour: u32 = parts.next()?.parse().ok()?;
    let minute: u32 = parts.next()?.parse().ok()?;
    let second: u32 = match parts.next() {
        Some(sec) => sec.parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() || hour > 23 || minute > 59 || second > 59 {
        return None;
    }
    Some((hour, minute, second))
}
