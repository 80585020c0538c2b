use gatekeep_core::ArbiterConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON export of enrolled identities.
    pub enrollment_path: PathBuf,
    /// Path to the SQLite access log.
    pub db_path: PathBuf,
    /// Spool file written by the face pipeline.
    pub descriptor_spool: PathBuf,
    /// tty of the RFID reader; `None` leaves the RFID channel off.
    pub rfid_device: Option<String>,
    /// Baud override; otherwise the reader profile decides.
    pub rfid_baud: Option<u32>,
    /// Whether to start the facial polling loop.
    pub face_enabled: bool,
    /// Maximum Euclidean distance for a facial match.
    pub max_distance: f32,
    /// Minimum seconds between two grants for one subject.
    pub cooldown_secs: u64,
    /// Bound on subjects tracked by the cooldown cache.
    pub cooldown_capacity: usize,
    /// Facial loop poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Registry refresh interval in seconds.
    pub refresh_secs: u64,
    /// Attempts per access-log write.
    pub sink_retries: u32,
    /// Base delay between access-log write attempts, in milliseconds.
    pub sink_retry_delay_ms: u64,
    /// Write denied decisions to the access log.
    pub audit_denied: bool,
    /// Longest side of stored evidence images.
    pub evidence_max_dim: u32,
    /// Register on the session bus instead of the system bus (development).
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `GATEKEEP_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("gatekeep");

        let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir())
            .join("gatekeep");

        Self {
            enrollment_path: env_path("GATEKEEP_ENROLLMENT_PATH")
                .unwrap_or_else(|| data_dir.join("enrolled.json")),
            db_path: env_path("GATEKEEP_DB_PATH").unwrap_or_else(|| data_dir.join("access.db")),
            descriptor_spool: env_path("GATEKEEP_DESCRIPTOR_SPOOL")
                .unwrap_or_else(|| runtime_dir.join("descriptor.json")),
            rfid_device: std::env::var("GATEKEEP_RFID_DEVICE")
                .ok()
                .filter(|v| !v.is_empty()),
            rfid_baud: std::env::var("GATEKEEP_RFID_BAUD")
                .ok()
                .and_then(|v| v.parse().ok()),
            face_enabled: env_bool("GATEKEEP_FACE_ENABLED", true),
            max_distance: env_parse("GATEKEEP_MAX_DISTANCE", 0.5),
            cooldown_secs: env_parse("GATEKEEP_COOLDOWN_SECS", 5),
            cooldown_capacity: env_parse("GATEKEEP_COOLDOWN_CAPACITY", 4096),
            poll_interval_ms: env_parse("GATEKEEP_POLL_INTERVAL_MS", 500),
            refresh_secs: env_parse("GATEKEEP_REFRESH_SECS", 5),
            sink_retries: env_parse("GATEKEEP_SINK_RETRIES", 3),
            sink_retry_delay_ms: env_parse("GATEKEEP_SINK_RETRY_DELAY_MS", 200),
            audit_denied: env_bool("GATEKEEP_AUDIT_DENIED", true),
            evidence_max_dim: env_parse("GATEKEEP_EVIDENCE_MAX_DIM", 320),
            session_bus: env_bool("GATEKEEP_SESSION_BUS", false),
        }
    }

    /// Reject settings the daemon cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.max_distance.is_finite() && self.max_distance > 0.0,
            "GATEKEEP_MAX_DISTANCE must be a positive number, got {}",
            self.max_distance
        );
        anyhow::ensure!(self.cooldown_capacity > 0, "GATEKEEP_COOLDOWN_CAPACITY must be > 0");
        anyhow::ensure!(self.sink_retries >= 1, "GATEKEEP_SINK_RETRIES must be >= 1");
        anyhow::ensure!(self.poll_interval_ms > 0, "GATEKEEP_POLL_INTERVAL_MS must be > 0");
        anyhow::ensure!(self.refresh_secs > 0, "GATEKEEP_REFRESH_SECS must be > 0");
        anyhow::ensure!(
            self.face_enabled || self.rfid_device.is_some(),
            "no identification channel enabled (set GATEKEEP_RFID_DEVICE or GATEKEEP_FACE_ENABLED=1)"
        );
        Ok(())
    }

    pub fn arbiter(&self) -> ArbiterConfig {
        ArbiterConfig {
            max_distance: self.max_distance,
            cooldown_window: Duration::from_secs(self.cooldown_secs),
            cooldown_capacity: self.cooldown_capacity,
            audit_denied: self.audit_denied,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }

    pub fn sink_retry_delay(&self) -> Duration {
        Duration::from_millis(self.sink_retry_delay_ms)
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config {
            enrollment_path: "/tmp/enrolled.json".into(),
            db_path: "/tmp/access.db".into(),
            descriptor_spool: "/tmp/descriptor.json".into(),
            rfid_device: None,
            rfid_baud: None,
            face_enabled: true,
            max_distance: 0.5,
            cooldown_secs: 5,
            cooldown_capacity: 4096,
            poll_interval_ms: 500,
            refresh_secs: 5,
            sink_retries: 3,
            sink_retry_delay_ms: 200,
            audit_denied: true,
            evidence_max_dim: 320,
            session_bus: false,
        }
    }

    #[test]
    fn test_defaults_validate() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_distance() {
        let cfg = Config { max_distance: 0.0, ..base() };
        assert!(cfg.validate().is_err());
        let cfg = Config { max_distance: f32::NAN, ..base() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_no_channels() {
        let cfg = Config { face_enabled: false, ..base() };
        assert!(cfg.validate().is_err());
        let cfg = Config {
            face_enabled: false,
            rfid_device: Some("/dev/ttyUSB0".into()),
            ..base()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_arbiter_config_mapping() {
        let arbiter = Config { cooldown_secs: 8, ..base() }.arbiter();
        assert_eq!(arbiter.cooldown_window, Duration::from_secs(8));
        assert_eq!(arbiter.max_distance, 0.5);
        assert!(arbiter.audit_denied);
    }
}
