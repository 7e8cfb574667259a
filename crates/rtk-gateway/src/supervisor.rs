//! Gateway lifecycle: wiring, startup barrier, graceful shutdown.
//!
//! Owns the registry, session, correlator, and worker pool and injects
//! references into the tasks that need them. Shutdown stops intake,
//! drains workers under a deadline, flushes the correlator so every
//! open command reaches a terminal state, and closes the session.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;

use rtk_adapters::SiteDefaults;
use rtk_mqtt_channel::{Channel, MqttSession, run_publisher};
use rtk_protocol::topics;

use crate::config::GatewayConfig;
use crate::correlator::{Correlator, CorrelatorConfig};
use crate::metrics::Metrics;
use crate::pipeline::{Pipeline, PipelineConfig, WorkerPool};
use crate::status;

/// Per-worker queue depth between the dispatcher and each worker.
const WORKER_QUEUE_DEPTH: usize = 64;

/// Run the gateway until a fatal session error or shutdown signal.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    // ── Adapter registry ────────────────────────────────────────
    let registry = Arc::new(RwLock::new(config.build_registry()?));
    tracing::info!(
        profile_count = registry.read().unwrap().len(),
        "adapter registry initialized"
    );

    // ── MQTT session ────────────────────────────────────────────
    let mut mqtt_config = config.mqtt.clone();
    if mqtt_config.status_topic.is_none() {
        mqtt_config.status_topic = Some(topics::lwt(
            &config.default_tenant,
            &config.default_site,
            &config.gateway_id,
        ));
    }
    let (session, driver, inbox) = MqttSession::connect(&mqtt_config)?;
    let mut driver_handle = tokio::spawn(driver.run());
    tokio::spawn(run_publisher(session.clone()));

    // Subscriptions: every enabled profile's uplink filters plus the
    // RTK command topics (ack/res for correlation only).
    let uplink_filters = registry.read().unwrap().uplink_subscribe_filters();
    for filter in &uplink_filters {
        session.subscribe(filter, 1).await?;
    }
    session.subscribe(&topics::cmd_request_filter(), 2).await?;
    session.subscribe(&topics::cmd_ack_filter(), 1).await?;
    session.subscribe(&topics::cmd_result_filter(), 1).await?;
    tracing::info!(
        uplink_filter_count = uplink_filters.len(),
        "MQTT subscriptions registered"
    );

    // ── Startup barrier: connected and resubscribed ─────────────
    let mut healthy = session.healthy();
    tokio::select! {
        _ = async {
            while !*healthy.borrow_and_update() {
                if healthy.changed().await.is_err() {
                    break;
                }
            }
        } => {
            tracing::info!("session healthy");
        }
        fatal = &mut driver_handle => {
            anyhow::bail!("MQTT session failed during startup: {fatal:?}");
        }
    }

    // ── Pipeline, correlator, workers ───────────────────────────
    let metrics = Arc::new(Metrics::new());
    let correlator = Arc::new(Correlator::new(
        CorrelatorConfig {
            default_timeout_ms: config.command_timeout_ms,
            ack_grace_ms: config.ack_grace_ms,
            observation_window_ms: config.observation_window_ms,
            capacity: config.correlator_capacity,
            ..CorrelatorConfig::default()
        },
        metrics.clone(),
    ));
    let channel: Arc<dyn Channel> = session.clone();
    let pipeline = Arc::new(Pipeline::new(
        registry.clone(),
        channel.clone(),
        correlator.clone(),
        metrics.clone(),
        PipelineConfig {
            uplink_deadline: Duration::from_millis(config.uplink_deadline_ms),
            downlink_deadline: Duration::from_millis(config.downlink_deadline_ms),
            defaults: SiteDefaults {
                tenant: config.default_tenant.clone(),
                site: config.default_site.clone(),
            },
        },
    ));
    let pool = WorkerPool::spawn(pipeline, config.effective_workers(), WORKER_QUEUE_DEPTH);
    let correlator_handle = tokio::spawn(correlator.clone().run(channel.clone()));

    let status_handle = if config.status_interval_secs > 0 {
        Some(tokio::spawn(status::run(
            channel.clone(),
            metrics.clone(),
            topics::state(
                &config.default_tenant,
                &config.default_site,
                &config.gateway_id,
            ),
            config.gateway_id.clone(),
            Duration::from_secs(config.status_interval_secs),
        )))
    } else {
        None
    };

    // ── Dispatcher: inbox to per-topic workers ──────────────────
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let dispatcher = tokio::spawn(async move {
        let mut inbox = inbox;
        loop {
            tokio::select! {
                delivery = inbox.recv() => match delivery {
                    Some(raw) => pool.dispatch(raw).await,
                    None => break,
                },
                _ = shutdown_rx.changed() => break,
            }
        }
        pool
    });

    tracing::info!(
        workers = config.effective_workers(),
        "rtk-gateway ready"
    );

    // ── Wait for a reason to stop ───────────────────────────────
    let mut session_fatal = false;
    tokio::select! {
        fatal = &mut driver_handle => {
            session_fatal = true;
            tracing::error!(result = ?fatal, "MQTT session fatal");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    // ── Graceful shutdown ───────────────────────────────────────
    let _ = shutdown_tx.send(true);
    let pool = dispatcher.await?;

    let drain_deadline =
        tokio::time::Instant::now() + Duration::from_millis(config.drain_deadline_ms);
    for handle in pool.shutdown() {
        if tokio::time::timeout_at(drain_deadline, handle).await.is_err() {
            tracing::warn!("worker drain deadline exceeded");
            break;
        }
    }

    correlator_handle.abort();
    if let Some(handle) = status_handle {
        handle.abort();
    }

    // Every still-open command gets a synthesized terminal result.
    correlator.flush(channel.as_ref()).await;

    if let Err(e) = session.close().await {
        tracing::warn!(error = %e, "session close failed");
    }
    if !session_fatal {
        driver_handle.abort();
    }

    metrics.absorb_channel(channel.stats());
    metrics.log_snapshot();
    tracing::info!("rtk-gateway stopped");

    if session_fatal {
        anyhow::bail!("MQTT session fatal: reconnect attempts exhausted");
    }
    Ok(())
}
