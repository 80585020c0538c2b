use anyhow::{Context, Result};
use gatekeep_core::DescriptorRegistry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod evidence;
mod producers;
mod sink;
mod source;
mod store;

use config::Config;
use dbus_interface::{GatekeepService, BUS_NAME, OBJECT_PATH};
use producers::ChannelStatus;
use sink::{RetryPolicy, SqliteAccessLog};
use source::SpoolDescriptorSource;
use store::{EnrollmentStore, JsonFileStore};

/// Decisions buffered ahead of the access log writer.
const SINK_QUEUE_CAPACITY: usize = 256;

/// How often expired cooldown entries are dropped.
const COOLDOWN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gatekeepd starting");

    let config = Config::from_env();
    config.validate()?;

    let registry = Arc::new(DescriptorRegistry::new());
    let store: Arc<dyn EnrollmentStore> = Arc::new(JsonFileStore::new(&config.enrollment_path));
    match store::refresh_once(Arc::clone(&store), Arc::clone(&registry)).await {
        Ok(summary) => tracing::info!(
            identities = summary.identities,
            faces = summary.faces,
            path = %config.enrollment_path.display(),
            "enrolled set loaded"
        ),
        Err(e) => tracing::warn!(error = %e, "no enrolled set yet; starting empty"),
    }

    let log = SqliteAccessLog::open(&config.db_path)
        .with_context(|| format!("opening access log {}", config.db_path.display()))?;
    tracing::info!(path = %config.db_path.display(), "access log opened");
    let (sink, sink_thread) = sink::spawn_sink(
        log,
        RetryPolicy {
            attempts: config.sink_retries,
            delay: config.sink_retry_delay(),
        },
        SINK_QUEUE_CAPACITY,
    )?;
    let sink_stats = sink.stats();

    let (arbiter, arbiter_task) = engine::spawn_arbiter(
        &config.arbiter(),
        Arc::clone(&registry),
        sink,
        COOLDOWN_SWEEP_INTERVAL,
    );
    let refresh_task = store::spawn_refresh_task(
        Arc::clone(&store),
        Arc::clone(&registry),
        config.refresh_interval(),
    );

    let running = Arc::new(AtomicBool::new(true));
    let channels = Arc::new(ChannelStatus::default());

    if config.face_enabled {
        producers::spawn_facial_loop(
            SpoolDescriptorSource::new(&config.descriptor_spool),
            arbiter.clone(),
            config.poll_interval(),
            config.evidence_max_dim,
            Arc::clone(&running),
            Arc::clone(&channels),
        )?;
    } else {
        tracing::info!("facial channel disabled via GATEKEEP_FACE_ENABLED=0");
    }

    match &config.rfid_device {
        Some(device) => {
            producers::spawn_rfid_loop(
                device.clone(),
                config.rfid_baud,
                arbiter.clone(),
                Arc::clone(&running),
                Arc::clone(&channels),
            )?;
        }
        None => tracing::info!("RFID channel disabled; GATEKEEP_RFID_DEVICE not set"),
    }

    let service = GatekeepService::new(arbiter, registry, store, sink_stats, channels);
    let builder = if config.session_bus {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering on D-Bus")?;

    tracing::info!(bus = BUS_NAME, "gatekeepd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("gatekeepd shutting down");

    running.store(false, Ordering::Relaxed);
    refresh_task.abort();
    drop(connection);
    // Dropping the arbiter releases the last sink handle; the writer then
    // drains whatever is queued and exits.
    arbiter_task.abort();
    let _ = arbiter_task.await;
    if tokio::task::spawn_blocking(move || sink_thread.join())
        .await
        .is_err()
    {
        tracing::warn!("access log writer did not shut down cleanly");
    }

    Ok(())
}
