//! Enrollment store access and periodic registry refresh.

use gatekeep_core::{DescriptorRegistry, EnrolledIdentity, RefreshSummary};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read enrollment export {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed enrollment export: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("refresh task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Source of the current enrolled set.
pub trait EnrollmentStore: Send + Sync + 'static {
    fn fetch(&self) -> Result<Vec<EnrolledIdentity>, StoreError>;
}

/// Reads a JSON array of identities exported by the records service.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EnrollmentStore for JsonFileStore {
    fn fetch(&self) -> Result<Vec<EnrolledIdentity>, StoreError> {
        let raw = std::fs::read(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

/// Fetch from the store and swap the registry snapshot.
///
/// On failure the previous snapshot stays in effect.
pub async fn refresh_once(
    store: Arc<dyn EnrollmentStore>,
    registry: Arc<DescriptorRegistry>,
) -> Result<RefreshSummary, StoreError> {
    let records = tokio::task::spawn_blocking(move || store.fetch()).await??;
    Ok(registry.replace(records))
}

/// Refresh the registry every `interval` until the runtime shuts down.
pub fn spawn_refresh_task(
    store: Arc<dyn EnrollmentStore>,
    registry: Arc<DescriptorRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_count: Option<usize> = None;

        loop {
            ticker.tick().await;
            match refresh_once(Arc::clone(&store), Arc::clone(&registry)).await {
                Ok(summary) => {
                    if last_count != Some(summary.identities) {
                        tracing::info!(
                            generation = summary.generation,
                            identities = summary.identities,
                            faces = summary.faces,
                            rejected_codes = summary.rejected_codes,
                            "enrolled set loaded"
                        );
                    }
                    last_count = Some(summary.identities);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "registry refresh failed; keeping previous snapshot");
                }
            }
        }
    })
}
