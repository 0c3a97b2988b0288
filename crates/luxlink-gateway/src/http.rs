// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP + WebSocket server.
//!
//! - `POST /api` - unified JSON API
//! - `GET /ws` - WebSocket: one `init` frame on connect, then state deltas
//! - `GET /metrics` - Prometheus text exposition
//! - REST conveniences under `/api/...`
//! - `/` - embedded web UI

use crate::api::{ApiHandler, Request};
use crate::metrics::Metrics;
use crate::sched::Scheduler;
use crate::state::DmxState;
use axum::{
    extract::ws::{Message, WebSocket},
    extract::{Path, State, WebSocketUpgrade},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rust_embed::RustEmbed;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

#[derive(RustEmbed)]
#[folder = "static/"]
struct Assets;

/// Shared context behind every handler.
pub struct AppCtx {
    pub state: Arc<DmxState>,
    pub api: ApiHandler,
    pub metrics: Arc<Metrics>,
    pub scheduler: Option<Arc<Scheduler>>,
    pub started: Instant,
}

/// Build the full router.
pub fn router(ctx: Arc<AppCtx>) -> Router {
    Router::new()
        .route("/api", post(unified))
        .route("/ws", get(ws_upgrade))
        .route("/metrics", get(metrics))
        .route("/api/status", get(status))
        .route("/api/enable", post(enable))
        .route("/api/disable", post(disable))
        .route("/api/blackout", post(blackout))
        .route("/api/lights", get(lights))
        .route("/api/lights/{group}/{light}", get(light_get).put(light_put))
        .route("/api/groups", get(groups))
        .route("/api/groups/{group}", get(group_get).put(group_put))
        .route("/api/schedule", get(schedule))
        .route("/api/schedule/next", get(schedule_next))
        .route("/api/health", get(health))
        .fallback(static_asset)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(ctx)
}

/// ":8080" style addresses bind all interfaces.
pub fn normalize_addr(addr: &str) -> String {
    if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        addr.to_string()
    }
}

async fn unified(State(ctx): State<Arc<AppCtx>>, body: axum::body::Bytes) -> Response {
    let out = ctx.api.handle_json(&body).await;
    ([(header::CONTENT_TYPE, "application/json")], out).into_response()
}

async fn ws_upgrade(State(ctx): State<Arc<AppCtx>>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| ws_session(socket, ctx))
}

/// One WebSocket session: subscribe, send the init frame, then interleave
/// client commands with broadcast deltas. All writes happen on this task,
/// so frames are never interleaved mid-message.
async fn ws_session(mut socket: WebSocket, ctx: Arc<AppCtx>) {
    let (id, mut updates) = ctx.state.subscribe();
    debug!(id, "websocket client connected");

    let init = ctx.state.init_message();
    if socket.send(Message::Text(init.into())).await.is_err() {
        ctx.state.unsubscribe(id);
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let resp = ctx.api.handle_json(text.as_bytes()).await;
                    if socket.send(Message::Text(resp.into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // ping/pong handled by axum, binary ignored
                Some(Err(e)) => {
                    debug!(id, error = %e, "websocket read error");
                    break;
                }
            },
            delta = updates.recv() => match delta {
                Some(payload) => {
                    if socket.send(Message::Text(payload.as_ref().to_owned().into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }

    ctx.state.unsubscribe(id);
    debug!(id, "websocket client disconnected");
}

async fn metrics(State(ctx): State<Arc<AppCtx>>) -> Response {
    let text = ctx.metrics.render(ctx.state.broadcast_drops());
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response()
}

async fn status(State(ctx): State<Arc<AppCtx>>) -> Response {
    Json(ctx.state.status().await).into_response()
}

async fn run_command(ctx: &AppCtx, cmd: &str) -> Response {
    let resp = ctx.api.handle(&Request {
        cmd: cmd.into(),
        target: String::new(),
        values: BTreeMap::new(),
    })
    .await;
    if resp.kind == "error" {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(resp)).into_response();
    }
    Json(json!({ "status": "ok" })).into_response()
}

async fn enable(State(ctx): State<Arc<AppCtx>>) -> Response {
    run_command(&ctx, "enable").await
}

async fn disable(State(ctx): State<Arc<AppCtx>>) -> Response {
    run_command(&ctx, "disable").await
}

async fn blackout(State(ctx): State<Arc<AppCtx>>) -> Response {
    run_command(&ctx, "blackout").await
}

async fn lights(State(ctx): State<Arc<AppCtx>>) -> Response {
    let body = serde_json::to_string(&*ctx.state.lights()).unwrap_or_default();
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

async fn light_get(
    State(ctx): State<Arc<AppCtx>>,
    Path((group, light)): Path<(String, String)>,
) -> Response {
    match ctx.state.light(&group, &light) {
        Some(ls) => {
            let body = serde_json::to_string(&*ls).unwrap_or_default();
            ([(header::CONTENT_TYPE, "application/json")], body).into_response()
        }
        None => (StatusCode::NOT_FOUND, "light not found").into_response(),
    }
}

async fn light_put(
    State(ctx): State<Arc<AppCtx>>,
    Path((group, light)): Path<(String, String)>,
    Json(values): Json<BTreeMap<String, u8>>,
) -> Response {
    match ctx.state.set_light(&group, &light, &values).await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn groups(State(ctx): State<Arc<AppCtx>>) -> Response {
    Json(json!(&*ctx.state.groups())).into_response()
}

async fn group_get(State(ctx): State<Arc<AppCtx>>, Path(group): Path<String>) -> Response {
    match ctx.state.config().group_lights(&group) {
        Some(lights) => Json(json!({ "name": group, "lights": lights })).into_response(),
        None => (StatusCode::NOT_FOUND, "group not found").into_response(),
    }
}

async fn group_put(
    State(ctx): State<Arc<AppCtx>>,
    Path(group): Path<String>,
    Json(values): Json<BTreeMap<String, u8>>,
) -> Response {
    match ctx.state.set_group(&group, &values).await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn schedule(State(ctx): State<Arc<AppCtx>>) -> Response {
    let events = ctx.scheduler.as_ref().map(|s| s.events()).unwrap_or_default();
    Json(json!({ "events": events })).into_response()
}

async fn schedule_next(State(ctx): State<Arc<AppCtx>>) -> Response {
    let next = ctx.scheduler.as_ref().and_then(|s| s.next_event());
    Json(json!(next)).into_response()
}

async fn health(State(ctx): State<Arc<AppCtx>>) -> Response {
    // Linux-only load average; zeros elsewhere.
    let mut load = [0.0f64; 3];
    if let Ok(text) = std::fs::read_to_string("/proc/loadavg") {
        for (slot, part) in load.iter_mut().zip(text.split_whitespace()) {
            *slot = part.parse().unwrap_or(0.0);
        }
    }

    let uptime = ctx.started.elapsed();
    Json(json!({
        "uptime_sec": uptime.as_secs(),
        "uptime_str": format!("{}s", uptime.as_secs()),
        "cpu_load_1m": load[0],
        "cpu_load_5m": load[1],
        "cpu_load_15m": load[2],
        "subscribers": ctx.state.subscriber_count(),
        "broadcast_drops": ctx.state.broadcast_drops(),
    }))
    .into_response()
}

async fn static_asset(uri: axum::http::Uri) -> Response {
    let path = uri.path().trim_start_matches('/');
    let path = if path.is_empty() { "index.html" } else { path };

    match Assets::get(path) {
        Some(content) => {
            let mime = mime_for(path);
            ([(header::CONTENT_TYPE, mime)], content.data.into_owned()).into_response()
        }
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

fn mime_for(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("ico") => "image/x-icon",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_addr() {
        assert_eq!(normalize_addr(":8080"), "0.0.0.0:8080");
        assert_eq!(normalize_addr("127.0.0.1:9000"), "127.0.0.1:9000");
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for("index.html"), "text/html; charset=utf-8");
        assert_eq!(mime_for("app.js"), "application/javascript");
        assert_eq!(mime_for("style.css"), "text/css");
        assert_eq!(mime_for("blob"), "application/octet-stream");
    }

    #[test]
    fn test_embedded_ui_present() {
        assert!(Assets::get("index.html").is_some());
        assert!(Assets::get("app.js").is_some());
        assert!(Assets::get("style.css").is_some());
    }
}
