//! Access log sink.
//!
//! Decisions are queued with a non-blocking `submit` and written by a
//! dedicated thread, so a slow disk never stalls arbitration. Writes are
//! retried a bounded number of times; a decision that still fails is
//! reported as a fault and dropped. The physical grant is not reversed.

use gatekeep_core::{AccessDecision, Subject};
use rand::Rng;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("access log write failed: {0}")]
    Write(#[from] rusqlite::Error),
    #[error("failed to create access log directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("access log queue full")]
    QueueFull,
    #[error("access log writer stopped")]
    Closed,
    #[error("subject id {0} does not fit the access log schema")]
    SubjectId(u64),
}

impl SinkError {
    /// Whether writing the same decision again could succeed.
    fn is_retriable(&self) -> bool {
        !matches!(self, SinkError::SubjectId(_))
    }
}

/// Durable destination for access decisions.
pub trait AccessLog: Send + 'static {
    fn record(&mut self, decision: &AccessDecision) -> Result<(), SinkError>;
}

/// SQLite-backed access log.
pub struct SqliteAccessLog {
    conn: Connection,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS access_log (
    id            TEXT PRIMARY KEY,
    subject_kind  TEXT NOT NULL,
    subject_id    INTEGER NOT NULL,
    display_name  TEXT NOT NULL,
    method        TEXT NOT NULL,
    confidence    INTEGER,
    granted       INTEGER NOT NULL,
    decided_at    TEXT NOT NULL,
    evidence      BLOB
);
CREATE INDEX IF NOT EXISTS access_log_decided_at ON access_log (decided_at);
";

impl SqliteAccessLog {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, SinkError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, SinkError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    fn count(&self, granted: bool) -> i64 {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM access_log WHERE granted = ?1",
                params![granted],
                |row| row.get(0),
            )
            .unwrap()
    }
}

fn subject_columns(subject: Subject) -> Result<(&'static str, i64), SinkError> {
    let (kind, id) = match subject {
        Subject::Person(id) => ("person", id),
        Subject::Visitor(id) => ("visitor", id),
    };
    let id = i64::try_from(id).map_err(|_| SinkError::SubjectId(id))?;
    Ok((kind, id))
}

impl AccessLog for SqliteAccessLog {
    fn record(&mut self, d: &AccessDecision) -> Result<(), SinkError> {
        let (kind, id) = subject_columns(d.subject)?;
        // Retries may replay a write that actually landed; the id makes that a no-op.
        self.conn.execute(
            "INSERT OR IGNORE INTO access_log
                (id, subject_kind, subject_id, display_name, method, confidence, granted, decided_at, evidence)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                d.id.to_string(),
                kind,
                id,
                d.display_name,
                d.method.as_str(),
                d.confidence,
                d.granted,
                d.decided_at.to_rfc3339(),
                d.evidence.as_deref(),
            ],
        )?;
        Ok(())
    }
}

/// Bounded retry schedule: `delay * attempt` plus up to `delay / 2` of jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.delay * attempt;
        let jitter_ms = (self.delay.as_millis() / 2) as u64;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        base + Duration::from_millis(jitter)
    }
}

/// Writer-side counters, readable from the status surface.
#[derive(Debug, Default)]
pub struct SinkStats {
    written: AtomicU64,
    retries: AtomicU64,
    faults: AtomicU64,
}

impl SinkStats {
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }
}

/// Clone-safe handle to the writer thread.
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::Sender<AccessDecision>,
    stats: Arc<SinkStats>,
}

impl SinkHandle {
    /// Queue a decision without blocking. Success means the decision is emitted.
    pub fn submit(&self, decision: AccessDecision) -> Result<(), SinkError> {
        self.tx.try_send(decision).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }

    pub fn stats(&self) -> Arc<SinkStats> {
        Arc::clone(&self.stats)
    }
}

/// Write one decision, retrying per `policy`. Returns whether it landed.
fn write_with_retry<L: AccessLog>(
    log: &mut L,
    decision: &AccessDecision,
    policy: RetryPolicy,
    stats: &SinkStats,
) -> bool {
    for attempt in 1..=policy.attempts {
        match log.record(decision) {
            Ok(()) => {
                stats.written.fetch_add(1, Ordering::Relaxed);
                return true;
            }
            Err(e) if attempt < policy.attempts && e.is_retriable() => {
                stats.retries.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(decision = %decision.id, attempt, error = %e, "access log write failed; retrying");
                std::thread::sleep(policy.backoff(attempt));
            }
            Err(e) => {
                stats.faults.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    decision = %decision.id,
                    subject = %decision.subject,
                    granted = decision.granted,
                    attempt,
                    error = %e,
                    "access log write failed permanently; decision not recorded"
                );
                return false;
            }
        }
    }
    false
}

/// Spawn the writer on a dedicated OS thread.
///
/// The thread exits once every [`SinkHandle`] is dropped and the queue drained.
pub fn spawn_sink<L: AccessLog>(
    mut log: L,
    policy: RetryPolicy,
    capacity: usize,
) -> Result<(SinkHandle, std::thread::JoinHandle<()>), SinkError> {
    let (tx, mut rx) = mpsc::channel::<AccessDecision>(capacity.max(1));
    let stats = Arc::new(SinkStats::default());
    let thread_stats = Arc::clone(&stats);

    let join = std::thread::Builder::new()
        .name("gatekeep-sink".into())
        .spawn(move || {
            tracing::info!("access log writer started");
            while let Some(decision) = rx.blocking_recv() {
                write_with_retry(&mut log, &decision, policy, &thread_stats);
            }
            tracing::info!("access log writer exiting");
        })?;

    Ok((SinkHandle { tx, stats }, join))
}
