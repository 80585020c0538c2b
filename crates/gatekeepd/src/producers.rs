//! The two identification producers.
//!
//! Each runs on its own OS thread and feeds the arbiter independently;
//! losing one (camera pipeline gone, reader unplugged) never stops the other.

use crate::engine::ArbiterHandle;
use crate::evidence;
use crate::source::DescriptorSource;
use gatekeep_core::AccessEvent;
use gatekeep_hw::{profile_for_device, RfidReader, SerialSettings};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Delay before reopening a reader that failed or went away.
const RFID_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Liveness flags surfaced through `Status`.
#[derive(Debug, Default)]
pub struct ChannelStatus {
    pub facial_running: AtomicBool,
    pub rfid_connected: AtomicBool,
}

/// Poll `source` every `interval` and forward each capture to the arbiter.
pub fn spawn_facial_loop<S: DescriptorSource>(
    mut source: S,
    arbiter: ArbiterHandle,
    interval: Duration,
    evidence_max_dim: u32,
    running: Arc<AtomicBool>,
    status: Arc<ChannelStatus>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("gatekeep-facial".into())
        .spawn(move || {
            tracing::info!(interval_ms = interval.as_millis() as u64, "facial loop started");
            status.facial_running.store(true, Ordering::Relaxed);
            let mut failing = false;

            while running.load(Ordering::Relaxed) {
                match source.next_capture() {
                    Ok(Some(capture)) => {
                        failing = false;
                        let evidence =
                            evidence::load_evidence(capture.evidence.as_deref(), evidence_max_dim);
                        let event = AccessEvent::Facial {
                            probe: capture.descriptor,
                            evidence,
                        };
                        if arbiter.submit_blocking(event).is_err() {
                            tracing::warn!("arbiter gone; stopping facial loop");
                            break;
                        }
                    }
                    Ok(None) => failing = false,
                    Err(e) => {
                        // Log the first failure of a streak only.
                        if !failing {
                            tracing::warn!(error = %e, "descriptor source failed");
                        }
                        failing = true;
                    }
                }
                std::thread::sleep(interval);
            }

            status.facial_running.store(false, Ordering::Relaxed);
            tracing::info!("facial loop exiting");
        })
}

/// Reader settings: the device's profile if known, with an optional baud override.
pub fn reader_settings(device: &str, baud_override: Option<u32>) -> SerialSettings {
    let mut settings = match profile_for_device(device) {
        Some(profile) => {
            tracing::info!(device, reader = %profile.device.name, "reader profile found");
            profile.serial
        }
        None => {
            tracing::debug!(
                device,
                known_profiles = gatekeep_hw::list_profiles().len(),
                "no reader profile matched; using defaults"
            );
            SerialSettings::default()
        }
    };
    if let Some(baud) = baud_override {
        settings.baud = baud;
    }
    settings
}

/// Read lines from the RFID reader at `device`, reconnecting on failure.
pub fn spawn_rfid_loop(
    device: String,
    baud_override: Option<u32>,
    arbiter: ArbiterHandle,
    running: Arc<AtomicBool>,
    status: Arc<ChannelStatus>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("gatekeep-rfid".into())
        .spawn(move || {
            tracing::info!(device = %device, "RFID loop started");

            'reconnect: while running.load(Ordering::Relaxed) {
                let settings = reader_settings(&device, baud_override);
                let mut reader = match RfidReader::open(&device, settings) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(device = %device, error = %e, "RFID reader unavailable");
                        std::thread::sleep(RFID_RECONNECT_DELAY);
                        continue;
                    }
                };
                status.rfid_connected.store(true, Ordering::Relaxed);

                while running.load(Ordering::Relaxed) {
                    match reader.read_line() {
                        Ok(Some(raw)) => {
                            if arbiter.submit_blocking(AccessEvent::RfidRead { raw }).is_err() {
                                tracing::warn!("arbiter gone; stopping RFID loop");
                                break 'reconnect;
                            }
                        }
                        Ok(None) => {
                            tracing::warn!(device = %reader.path(), "RFID reader disconnected");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(device = %reader.path(), error = %e, "RFID read failed");
                            break;
                        }
                    }
                }

                status.rfid_connected.store(false, Ordering::Relaxed);
                std::thread::sleep(RFID_RECONNECT_DELAY);
            }

            status.rfid_connected.store(false, Ordering::Relaxed);
            tracing::info!("RFID loop exiting");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_arbiter;
    use crate::sink::{spawn_sink, AccessLog, RetryPolicy, SinkError};
    use crate::source::{Capture, SourceError};
    use gatekeep_core::{AccessDecision, ArbiterConfig, DescriptorRegistry};
    use std::sync::Mutex;

    struct NullLog;

    impl AccessLog for NullLog {
        fn record(&mut self, _: &AccessDecision) -> Result<(), SinkError> {
            Ok(())
        }
    }

    /// Yields a fixed script of results, then reports no face.
    struct ScriptedSource(Arc<Mutex<Vec<Result<Option<Capture>, SourceError>>>>);

    impl DescriptorSource for ScriptedSource {
        fn next_capture(&mut self) -> Result<Option<Capture>, SourceError> {
            self.0.lock().unwrap().pop().unwrap_or(Ok(None))
        }
    }

    #[test]
    fn test_baud_override_wins() {
        let settings = reader_settings("/dev/gatekeep-test-reader", Some(57600));
        assert_eq!(settings.baud, 57600);
        assert_eq!(settings.terminator, b'\n');
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_facial_loop_survives_source_errors() {
        let (sink, _sink_thread) = spawn_sink(
            NullLog,
            RetryPolicy { attempts: 1, delay: Duration::from_millis(1) },
            8,
        )
        .unwrap();
        let registry = Arc::new(DescriptorRegistry::new());
        let (arbiter, _task) =
            spawn_arbiter(&ArbiterConfig::default(), registry, sink, Duration::from_secs(30));

        // Popped from the back: an error, then a malformed probe, then nothing.
        let script = vec![
            Ok(Some(Capture { descriptor: vec![0.0; 3], evidence: None })),
            Err(SourceError::Read(std::io::Error::other("pipeline restarting"))),
        ];
        let running = Arc::new(AtomicBool::new(true));
        let status = Arc::new(ChannelStatus::default());
        let join = spawn_facial_loop(
            ScriptedSource(Arc::new(Mutex::new(script))),
            arbiter.clone(),
            Duration::from_millis(5),
            320,
            Arc::clone(&running),
            Arc::clone(&status),
        )
        .unwrap();

        let mut invalid = 0;
        for _ in 0..200 {
            invalid = arbiter.stats().await.unwrap().invalid;
            if invalid > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(invalid, 1);
        assert!(status.facial_running.load(Ordering::Relaxed));

        running.store(false, Ordering::Relaxed);
        tokio::task::spawn_blocking(move || join.join().unwrap())
            .await
            .unwrap();
        assert!(!status.facial_running.load(Ordering::Relaxed));
    }
}
