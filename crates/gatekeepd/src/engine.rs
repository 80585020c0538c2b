use crate::sink::SinkHandle;
use chrono::Utc;
use gatekeep_core::{AccessEvent, Arbiter, ArbiterConfig, ArbiterStats, DescriptorRegistry, Outcome};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Pending events from both producers and the bus.
const ARBITER_QUEUE_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("arbiter task exited")]
    ChannelClosed,
}

/// Messages sent from producers and D-Bus handlers to the arbiter task.
enum ArbiterRequest {
    Event {
        event: AccessEvent,
        reply: Option<oneshot::Sender<Outcome>>,
    },
    Stats {
        reply: oneshot::Sender<ArbiterStats>,
    },
}

/// Clone-safe handle to the arbiter task.
#[derive(Clone)]
pub struct ArbiterHandle {
    tx: mpsc::Sender<ArbiterRequest>,
}

impl ArbiterHandle {
    /// Queue an event from a producer thread. Blocks while the queue is full.
    pub fn submit_blocking(&self, event: AccessEvent) -> Result<(), EngineError> {
        self.tx
            .blocking_send(ArbiterRequest::Event { event, reply: None })
            .map_err(|_| EngineError::ChannelClosed)
    }

    /// Queue an event and wait for its outcome.
    pub async fn submit_and_wait(&self, event: AccessEvent) -> Result<Outcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ArbiterRequest::Event {
                event,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn stats(&self) -> Result<ArbiterStats, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(ArbiterRequest::Stats { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Spawn the single arbitration task.
///
/// The task owns the [`Arbiter`] and therefore the cooldown cache; every
/// event from either channel is serialized through it. Decisions go to the
/// sink with a non-blocking submit, so a slow log write never holds up the
/// next event.
pub fn spawn_arbiter(
    config: &ArbiterConfig,
    registry: Arc<DescriptorRegistry>,
    sink: SinkHandle,
    sweep_interval: Duration,
) -> (ArbiterHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ArbiterRequest>(ARBITER_QUEUE_CAPACITY);
    let mut arbiter = Arbiter::new(config);

    let task = tokio::spawn(async move {
        tracing::info!("arbiter task started");
        let mut sweep = tokio::time::interval(sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                req = rx.recv() => {
                    let Some(req) = req else { break };
                    match req {
                        ArbiterRequest::Event { event, reply } => {
                            let snapshot = registry.snapshot();
                            let outcome = arbiter.process(event, &snapshot, Utc::now(), |decision| {
                                sink.submit(decision.clone())
                            });
                            if let Some(reply) = reply {
                                let _ = reply.send(outcome);
                            }
                        }
                        ArbiterRequest::Stats { reply } => {
                            let _ = reply.send(arbiter.stats());
                        }
                    }
                }
                _ = sweep.tick() => {
                    let removed = arbiter.sweep(Utc::now());
                    if removed > 0 {
                        tracing::debug!(removed, "swept expired cooldown entries");
                    }
                }
            }
        }
        tracing::info!("arbiter task exiting");
    });

    (ArbiterHandle { tx }, task)
}
