// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT bridge.
//!
//! Topics under the configured prefix:
//!
//! - `{prefix}/cmd` (subscribe, QoS 1) - unified API requests
//! - `{prefix}/response` (publish) - reply to each command
//! - `{prefix}/event` (publish) - state deltas
//! - `{prefix}/status` (publish, retained) - status document on connect
//!
//! The event loop reconnects on failure with a fixed backoff.

use crate::api::ApiHandler;
use crate::config::MqttConfig;
use crate::state::DmxState;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub struct MqttBridge {
    client: AsyncClient,
    tasks: Vec<JoinHandle<()>>,
}

impl MqttBridge {
    /// Connect to the broker and start the command and event-forwarding
    /// tasks.
    pub fn start(
        cfg: &MqttConfig,
        api: Arc<ApiHandler>,
        state: Arc<DmxState>,
    ) -> anyhow::Result<Self> {
        let (host, port) = parse_broker(&cfg.broker)?;
        let mut options = MqttOptions::new(&cfg.client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        if !cfg.username.is_empty() {
            options.set_credentials(&cfg.username, &cfg.password);
        }

        let (client, mut eventloop) = AsyncClient::new(options, 16);
        let prefix = cfg.topic_prefix.clone();
        let cmd_topic = format!("{prefix}/cmd");
        let resp_topic = format!("{prefix}/response");
        let status_topic = format!("{prefix}/status");

        // Command loop: drive the connection, answer commands.
        let loop_client = client.clone();
        let loop_state = Arc::clone(&state);
        let command_task = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(topic = %cmd_topic, "mqtt connected");
                        if let Err(e) =
                            loop_client.subscribe(&cmd_topic, QoS::AtLeastOnce).await
                        {
                            warn!(error = %e, "mqtt subscribe failed");
                        }
                        let status = json!({
                            "type": "status",
                            "data": loop_state.status().await,
                        })
                        .to_string();
                        let _ = loop_client
                            .publish(&status_topic, QoS::AtMostOnce, true, status)
                            .await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if publish.topic != cmd_topic {
                            continue;
                        }
                        debug!(topic = %publish.topic, "mqtt command");
                        let resp = api.handle_json(&publish.payload).await;
                        let _ = loop_client
                            .publish(&resp_topic, QoS::AtMostOnce, false, resp)
                            .await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt connection lost, retrying");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        // Event forwarder: state deltas to {prefix}/event.
        let event_client = client.clone();
        let event_topic = format!("{prefix}/event");
        let (sub_id, mut updates) = state.subscribe();
        let event_state = Arc::clone(&state);
        let event_task = tokio::spawn(async move {
            while let Some(payload) = updates.recv().await {
                let _ = event_client
                    .publish(&event_topic, QoS::AtMostOnce, false, payload.as_bytes())
                    .await;
            }
            event_state.unsubscribe(sub_id);
        });

        info!(broker = %cfg.broker, prefix = %prefix, "mqtt bridge started");
        Ok(Self { client, tasks: vec![command_task, event_task] })
    }

    pub async fn stop(self) {
        let _ = self.client.disconnect().await;
        for task in self.tasks {
            task.abort();
        }
        info!("mqtt bridge stopped");
    }
}

/// Accept "tcp://host:port", "mqtt://host:port" or bare "host:port".
fn parse_broker(broker: &str) -> anyhow::Result<(String, u16)> {
    let stripped = broker
        .strip_prefix("tcp://")
        .or_else(|| broker.strip_prefix("mqtt://"))
        .unwrap_or(broker);
    match stripped.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), port.parse()?)),
        None => Ok((stripped.to_string(), 1883)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker() {
        assert_eq!(parse_broker("tcp://mqtt.local:1883").unwrap(), ("mqtt.local".into(), 1883));
        assert_eq!(parse_broker("mqtt://h:2883").unwrap(), ("h".into(), 2883));
        assert_eq!(parse_broker("broker").unwrap(), ("broker".into(), 1883));
        assert!(parse_broker("tcp://h:notaport").is_err());
    }
}
