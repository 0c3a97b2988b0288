// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LUXLINK Gateway - multi-protocol front end for a DMX512 universe.
//!
//! Exposes one DMX universe (driven by a remote real-time core through
//! the `luxctl` client) over HTTP, WebSocket, Modbus/TCP, MQTT and
//! Prometheus, with a wall-clock scheduler and an embedded web UI.
//!
//! # Usage
//!
//! ```bash
//! # Start with a config file
//! luxlink-gateway --config /etc/luxlink/gateway.yaml
//!
//! # Validate the configuration and exit
//! luxlink-gateway --config gateway.yaml --dry-run
//! ```

mod api;
mod config;
mod http;
mod metrics;
mod modbus;
mod mqtt;
mod port;
mod sched;
mod state;

use anyhow::Context;
use api::ApiHandler;
use clap::Parser;
use config::Config;
use metrics::Metrics;
use port::{CliPort, DmxPort};
use state::DmxState;
use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// LUXLINK DMX512 gateway
#[derive(Parser, Debug)]
#[command(name = "luxlink-gateway")]
#[command(about = "Multi-protocol gateway for a DMX512 universe")]
#[command(version)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Validate the configuration and exit
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone())),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "luxlink gateway starting");

    let cfg = Arc::new(
        Config::load(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?,
    );
    let total_lights: usize = cfg.lights.values().map(|g| g.len()).sum();
    info!(
        groups = cfg.lights.len(),
        lights = total_lights,
        http = %cfg.server.http,
        "configuration loaded"
    );

    if args.dry_run {
        info!("dry run: configuration is valid");
        return Ok(());
    }

    // Coordinator over the throttled subprocess port.
    let cli_port: Arc<dyn DmxPort> = Arc::new(CliPort::new(&cfg.dmx));
    let state = DmxState::new(Arc::clone(&cfg), cli_port);
    let metrics = Metrics::new(&cfg);

    if cfg.dmx.auto_enable {
        match state.enable().await {
            Ok(()) => {
                metrics.set_enabled(true);
                info!("dmx auto-enabled on startup");
            }
            Err(e) => warn!(error = %e, "failed to auto-enable dmx"),
        }
    }

    if cfg.dmx.refresh_ms > 0 {
        state.start_refresh(Duration::from_millis(cfg.dmx.refresh_ms));
    }

    // Optional scheduler.
    let scheduler = match &cfg.schedule {
        Some(sc) if !sc.events.is_empty() => {
            let sched = sched::Scheduler::new(sc, Arc::clone(&state))?;
            sched.start();
            Some(sched)
        }
        _ => None,
    };

    // HTTP + WebSocket.
    let ctx = Arc::new(http::AppCtx {
        state: Arc::clone(&state),
        api: ApiHandler::new(Arc::clone(&state), Arc::clone(&metrics)),
        metrics: Arc::clone(&metrics),
        scheduler: scheduler.clone(),
        started: Instant::now(),
    });
    let http_addr = http::normalize_addr(&cfg.server.http);
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("binding {http_addr}"))?;
    info!(addr = %http_addr, "http server listening");
    let http_task = tokio::spawn(axum::serve(listener, http::router(ctx)).into_future());

    // Optional Modbus/TCP.
    let modbus_task = cfg.modbus.as_ref().map(|mc| {
        let addr = mc.port.clone();
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = modbus::serve(&addr, state).await {
                error!(error = %e, "modbus server failed");
            }
        })
    });

    // Optional MQTT.
    let mqtt_bridge = match &cfg.mqtt {
        Some(mc) => {
            let api = Arc::new(ApiHandler::new(Arc::clone(&state), Arc::clone(&metrics)));
            Some(mqtt::MqttBridge::start(mc, api, Arc::clone(&state))?)
        }
        None => None,
    };

    info!(
        modbus = cfg.modbus.is_some(),
        mqtt = cfg.mqtt.is_some(),
        schedule = scheduler.is_some(),
        "luxlink gateway ready"
    );

    shutdown_signal().await;
    info!("shutting down");

    // Teardown order: scheduler, protocol handlers, refresh, then DMX.
    if let Some(sched) = &scheduler {
        sched.stop();
    }
    if let Some(bridge) = mqtt_bridge {
        bridge.stop().await;
    }
    if let Some(task) = modbus_task {
        task.abort();
    }
    state.stop_refresh();
    http_task.abort();

    if let Err(e) = state.disable().await {
        warn!(error = %e, "failed to disable dmx on shutdown");
    }

    info!("luxlink gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
