// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Unified request/response API shared by HTTP POST `/api`, WebSocket and
//! MQTT.
//!
//! Request: `{"cmd": "...", "target": "group[/light]", "values": {...}}`.
//! Response: `{"type": "ok|error|status|light|lights|groups", ...}`.

use crate::metrics::Metrics;
use crate::state::{DmxState, LightState};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Unified request.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub cmd: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub values: BTreeMap<String, u8>,
}

/// Unified response.
#[derive(Debug, Serialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    fn ok() -> Self {
        Self { kind: "ok", target: String::new(), data: None, error: None }
    }

    fn ok_for(target: &str) -> Self {
        Self { kind: "ok", target: target.into(), data: None, error: None }
    }

    fn error(message: impl Into<String>) -> Self {
        Self { kind: "error", target: String::new(), data: None, error: Some(message.into()) }
    }

    fn error_for(target: &str, message: impl Into<String>) -> Self {
        Self {
            kind: "error",
            target: target.into(),
            data: None,
            error: Some(message.into()),
        }
    }

    fn data(kind: &'static str, target: &str, data: Value) -> Self {
        Self { kind, target: target.into(), data: Some(data), error: None }
    }
}

/// Stateless handler over the coordinator.
pub struct ApiHandler {
    state: Arc<DmxState>,
    metrics: Arc<Metrics>,
}

impl ApiHandler {
    pub fn new(state: Arc<DmxState>, metrics: Arc<Metrics>) -> Self {
        Self { state, metrics }
    }

    /// Parse, dispatch and serialize in one step for the byte-oriented
    /// transports (WebSocket, MQTT).
    pub async fn handle_json(&self, data: &[u8]) -> String {
        let resp = match serde_json::from_slice::<Request>(data) {
            Ok(req) => self.handle(&req).await,
            Err(e) => Response::error(format!("invalid JSON: {e}")),
        };
        serde_json::to_string(&resp).unwrap_or_else(|_| r#"{"type":"error"}"#.into())
    }

    pub async fn handle(&self, req: &Request) -> Response {
        match req.cmd.as_str() {
            "enable" => self.exec("enable", self.state.enable()).await,
            "disable" => self.exec("disable", self.state.disable()).await,
            "blackout" => self.exec("blackout", self.state.blackout()).await,
            "set" => self.handle_set(req).await,
            "get" => self.handle_get(&req.target),
            "status" => self.handle_status().await,
            "lights" => {
                self.metrics.record_command("lights");
                Response::data("lights", "", self.lights_value())
            }
            "groups" => {
                self.metrics.record_command("groups");
                Response::data("groups", "", json!(&*self.state.groups()))
            }
            other => Response::error(format!("unknown command: {other}")),
        }
    }

    async fn exec(
        &self,
        cmd: &'static str,
        fut: impl std::future::Future<Output = Result<(), crate::port::PortError>>,
    ) -> Response {
        match fut.await {
            Ok(()) => {
                self.metrics.record_command(cmd);
                if cmd == "enable" || cmd == "disable" {
                    self.metrics.set_enabled(cmd == "enable");
                }
                Response::ok()
            }
            Err(e) => {
                self.metrics.record_error(cmd);
                Response::error(e.to_string())
            }
        }
    }

    async fn handle_set(&self, req: &Request) -> Response {
        if req.target.is_empty() {
            return Response::error("target required");
        }
        if req.values.is_empty() {
            return Response::error("values required");
        }

        let (group, light) = parse_target(&req.target);
        let result = if light.is_empty() {
            self.state.set_group(group, &req.values).await
        } else {
            self.state.set_light(group, light, &req.values).await
        };

        match result {
            Ok(()) => {
                self.metrics.record_command("set");
                self.update_channel_metrics(group, light, &req.values);
                Response::ok_for(&req.target)
            }
            Err(e) => {
                self.metrics.record_error("set");
                Response::error_for(&req.target, e.to_string())
            }
        }
    }

    fn handle_get(&self, target: &str) -> Response {
        self.metrics.record_command("get");
        if target.is_empty() {
            return Response::data("lights", "", self.lights_value());
        }

        let (group, light) = parse_target(target);
        if light.is_empty() {
            let Some(names) = self.state.config().group_lights(group) else {
                return Response::error_for(target, "group not found");
            };
            let lights = self.state.lights();
            let mut result = serde_json::Map::new();
            for name in names {
                let key = crate::config::light_key(group, &name);
                if let Some(ls) = lights.get(&key) {
                    result.insert(key, json!(ls));
                }
            }
            return Response::data("lights", target, Value::Object(result));
        }

        match self.state.light(group, light) {
            Some(ls) => Response::data("light", target, json!(&*ls)),
            None => Response::error_for(target, "light not found"),
        }
    }

    async fn handle_status(&self) -> Response {
        self.metrics.record_command("status");
        let status = self.state.status().await;
        if let Some(fps) = status.fps {
            self.metrics.set_fps(fps);
        }
        Response::data("status", "", json!(status))
    }

    fn lights_value(&self) -> Value {
        let lights = self.state.lights();
        json!(&*lights)
    }

    /// Mirror successful sets into the channel gauges.
    fn update_channel_metrics(&self, group: &str, light: &str, values: &BTreeMap<String, u8>) {
        let apply = |ls: &LightState| {
            for ch in &ls.channels {
                if let Some(v) = values.get(&ch.name) {
                    self.metrics.set_channel(ch.ch, *v);
                }
            }
        };

        if light.is_empty() {
            for ls in self.state.lights().values() {
                if ls.group == group {
                    apply(ls);
                }
            }
        } else if let Some(ls) = self.state.light(group, light) {
            apply(&ls);
        }
    }
}

/// Split "group/light" into its parts; a bare group yields an empty light.
pub fn parse_target(target: &str) -> (&str, &str) {
    match target.split_once('/') {
        Some((group, light)) => (group, light),
        None => (target, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;

    fn handler() -> (ApiHandler, Arc<crate::state::tests::RecordingPort>) {
        let (state, port) = test_state();
        let metrics = Metrics::new(state.config());
        (ApiHandler::new(state, metrics), port)
    }

    fn req(cmd: &str, target: &str, values: &[(&str, u8)]) -> Request {
        Request {
            cmd: cmd.into(),
            target: target.into(),
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[tokio::test]
    async fn test_enable_disable_roundtrip() {
        let (api, _) = handler();
        let resp = api.handle(&req("enable", "", &[])).await;
        assert_eq!(resp.kind, "ok");
        let resp = api.handle(&req("status", "", &[])).await;
        assert_eq!(resp.kind, "status");
        assert_eq!(resp.data.unwrap()["enabled"], true);
    }

    #[tokio::test]
    async fn test_set_light_and_get() {
        let (api, _) = handler();
        let resp = api.handle(&req("set", "rack1/level1", &[("blue", 128)])).await;
        assert_eq!(resp.kind, "ok");
        assert_eq!(resp.target, "rack1/level1");

        let resp = api.handle(&req("get", "rack1/level1", &[])).await;
        assert_eq!(resp.kind, "light");
        let data = resp.data.unwrap();
        assert_eq!(data["values"]["blue"], 128);
    }

    #[tokio::test]
    async fn test_set_requires_target_and_values() {
        let (api, _) = handler();
        let resp = api.handle(&req("set", "", &[("blue", 1)])).await;
        assert_eq!(resp.error.as_deref(), Some("target required"));
        let resp = api.handle(&req("set", "rack1", &[])).await;
        assert_eq!(resp.error.as_deref(), Some("values required"));
    }

    #[tokio::test]
    async fn test_get_group_and_unknowns() {
        let (api, _) = handler();
        let resp = api.handle(&req("get", "rack1", &[])).await;
        assert_eq!(resp.kind, "lights");
        let data = resp.data.unwrap();
        assert!(data.get("rack1/level1").is_some());
        assert!(data.get("rack1/level2").is_some());

        let resp = api.handle(&req("get", "ghost", &[])).await;
        assert_eq!(resp.kind, "error");
        let resp = api.handle(&req("get", "rack1/ghost", &[])).await;
        assert_eq!(resp.kind, "error");
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (api, _) = handler();
        let resp = api.handle(&req("warp", "", &[])).await;
        assert_eq!(resp.kind, "error");
        assert!(resp.error.unwrap().contains("unknown command"));
    }

    #[tokio::test]
    async fn test_handle_json_bad_input() {
        let (api, _) = handler();
        let out = api.handle_json(b"{not json").await;
        assert!(out.contains("\"type\":\"error\""));
        assert!(out.contains("invalid JSON"));
    }

    #[tokio::test]
    async fn test_lights_and_groups_listing() {
        let (api, _) = handler();
        let resp = api.handle(&req("lights", "", &[])).await;
        assert_eq!(resp.kind, "lights");
        let resp = api.handle(&req("groups", "", &[])).await;
        assert_eq!(resp.data.unwrap()[0], "rack1");
    }

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("rack1/level1"), ("rack1", "level1"));
        assert_eq!(parse_target("rack1"), ("rack1", ""));
        assert_eq!(parse_target("a/b/c"), ("a", "b/c"));
    }
}
