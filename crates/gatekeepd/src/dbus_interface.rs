use crate::engine::ArbiterHandle;
use crate::producers::ChannelStatus;
use crate::sink::SinkStats;
use crate::store::{refresh_once, EnrollmentStore};
use gatekeep_core::{AccessEvent, DescriptorRegistry};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use zbus::interface;

pub const BUS_NAME: &str = "org.gatekeep.Gatekeep1";
pub const OBJECT_PATH: &str = "/org/gatekeep/Gatekeep1";

/// D-Bus interface for the Gatekeep daemon.
///
/// Bus name: org.gatekeep.Gatekeep1
/// Object path: /org/gatekeep/Gatekeep1
pub struct GatekeepService {
    arbiter: ArbiterHandle,
    registry: Arc<DescriptorRegistry>,
    store: Arc<dyn EnrollmentStore>,
    sink_stats: Arc<SinkStats>,
    channels: Arc<ChannelStatus>,
}

impl GatekeepService {
    pub fn new(
        arbiter: ArbiterHandle,
        registry: Arc<DescriptorRegistry>,
        store: Arc<dyn EnrollmentStore>,
        sink_stats: Arc<SinkStats>,
        channels: Arc<ChannelStatus>,
    ) -> Self {
        Self {
            arbiter,
            registry,
            store,
            sink_stats,
            channels,
        }
    }
}

#[interface(name = "org.gatekeep.Gatekeep1")]
impl GatekeepService {
    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let stats = self
            .arbiter
            .stats()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        let snapshot = self.registry.snapshot();

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "registry": {
                "generation": snapshot.generation(),
                "identities": snapshot.len(),
                "faces": snapshot.face_count(),
                "loaded_at": snapshot.loaded_at().map(|t| t.to_rfc3339()),
            },
            "arbiter": stats,
            "access_log": {
                "written": self.sink_stats.written(),
                "retries": self.sink_stats.retries(),
                "write_faults": self.sink_stats.faults(),
            },
            "channels": {
                "facial": self.channels.facial_running.load(Ordering::Relaxed),
                "rfid": self.channels.rfid_connected.load(Ordering::Relaxed),
            },
        })
        .to_string())
    }

    /// Submit a credential code read outside the serial reader (phone NFC,
    /// kiosk QR). Returns the outcome label.
    async fn submit_code(&self, code: &str) -> zbus::fdo::Result<String> {
        tracing::info!("code submitted over D-Bus");
        let outcome = self
            .arbiter
            .submit_and_wait(AccessEvent::RfidRead {
                raw: code.to_string(),
            })
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(outcome.label().to_string())
    }

    /// Reload the enrolled set now. Returns the number of identities.
    async fn refresh(&self) -> zbus::fdo::Result<u32> {
        tracing::info!("registry refresh requested");
        let summary = refresh_once(Arc::clone(&self.store), Arc::clone(&self.registry))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        let identities = if summary.superseded {
            self.registry.snapshot().len()
        } else {
            summary.identities
        };
        Ok(identities as u32)
    }
}
