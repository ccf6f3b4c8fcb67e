//! Supervising parent for the status aggregator.
//!
//! The aggregator never restarts itself. This parent watches its task, and
//! when the task fails or panics it decides, from the configured
//! [`RestartPolicy`], whether to start a fresh aggregator. A fresh aggregator
//! starts with an empty transfer map; upstream components repopulate it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{oneshot, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::config::{RestartPolicy, StatusConfig};
use crate::status::{
    AggregatorTask, DeltaBuffer, ProcessCounters, StatusError, StatusHandle,
    spawn_status_aggregator,
};

/// Parent of a status aggregator and owner of its restart policy.
#[derive(Debug)]
pub struct Supervisor {
    current: watch::Receiver<StatusHandle>,
    counters: Arc<ProcessCounters>,
    restarts: Arc<AtomicU32>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), StatusError>>,
}

impl Supervisor {
    /// Initializes process counters and starts a supervised aggregator.
    ///
    /// # Errors
    /// - `StatusError::Io` / `StatusError::InvalidSnapshot` - Resuming from an unreadable snapshot
    pub fn spawn(config: StatusConfig, buffer: DeltaBuffer) -> Result<Self, StatusError> {
        let counters = Arc::new(ProcessCounters::initialize(&config.persistence)?);
        let first = spawn_status_aggregator(&config, buffer.clone(), counters.clone());

        let (current_tx, current) = watch::channel(first.handle.clone());
        let (stop, stop_rx) = oneshot::channel();
        let restarts = Arc::new(AtomicU32::new(0));

        let supervision = Supervision {
            config,
            buffer,
            counters: counters.clone(),
            current: current_tx,
            restarts: restarts.clone(),
        };
        let task = tokio::spawn(supervision.run(first, stop_rx));

        Ok(Self {
            current,
            counters,
            restarts,
            stop: Some(stop),
            task,
        })
    }

    /// Handle of the aggregator currently running.
    ///
    /// After a restart, previously obtained handles report
    /// `StatusError::AggregatorShutdown`; fetch a new one here.
    pub fn handle(&self) -> StatusHandle {
        self.current.borrow().clone()
    }

    /// Receiver that observes every replacement aggregator handle.
    pub fn watch_handle(&self) -> watch::Receiver<StatusHandle> {
        self.current.clone()
    }

    /// Number of times a fresh aggregator was started after a failure.
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::Acquire)
    }

    pub fn counters(&self) -> &Arc<ProcessCounters> {
        &self.counters
    }

    /// Shuts the current aggregator down and ends supervision.
    ///
    /// # Errors
    /// Returns the last aggregator failure if supervision had already given
    /// up before the shutdown request.
    pub async fn shutdown(mut self) -> Result<(), StatusError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        join_supervision(self.task).await
    }

    /// Waits until supervision ends on its own: a clean aggregator exit or an
    /// exhausted restart budget.
    ///
    /// # Errors
    /// Returns the aggregator failure that ended supervision.
    pub async fn wait(mut self) -> Result<(), StatusError> {
        // Keep the stop channel open while waiting
        let _stop = self.stop.take();
        join_supervision(self.task).await
    }
}

async fn join_supervision(task: JoinHandle<Result<(), StatusError>>) -> Result<(), StatusError> {
    task.await.map_err(|error| StatusError::AggregatorPanicked {
        reason: error.to_string(),
    })?
}

struct Supervision {
    config: StatusConfig,
    buffer: DeltaBuffer,
    counters: Arc<ProcessCounters>,
    current: watch::Sender<StatusHandle>,
    restarts: Arc<AtomicU32>,
}

impl Supervision {
    async fn run(
        self,
        mut task: AggregatorTask,
        mut stop: oneshot::Receiver<()>,
    ) -> Result<(), StatusError> {
        loop {
            let outcome = tokio::select! {
                outcome = &mut task.join => outcome,
                _ = &mut stop => {
                    tracing::debug!("Supervisor stopping status aggregator");
                    let _ = task.handle.shutdown().await;
                    return match task.join.await {
                        Ok(result) => result,
                        Err(error) => Err(panic_error(error)),
                    };
                }
            };

            let failure = match outcome {
                Ok(Ok(())) => {
                    tracing::info!("Status aggregator exited cleanly");
                    return Ok(());
                }
                Ok(Err(error)) => error,
                Err(error) if error.is_cancelled() => {
                    tracing::info!("Status aggregator task was cancelled");
                    return Ok(());
                }
                Err(error) => panic_error(error),
            };

            let restarts = self.restarts.load(Ordering::Acquire);
            if !self.should_restart(restarts) {
                tracing::error!(
                    error = %failure,
                    restarts,
                    "Status aggregator failed, not restarting"
                );
                return Err(failure);
            }

            tracing::warn!(
                error = %failure,
                restart = restarts + 1,
                "Status aggregator failed, starting a fresh one"
            );
            task = spawn_status_aggregator(&self.config, self.buffer.clone(), self.counters.clone());
            self.restarts.fetch_add(1, Ordering::AcqRel);
            self.current.send_replace(task.handle.clone());
        }
    }

    fn should_restart(&self, restarts: u32) -> bool {
        match self.config.supervisor.restart_policy {
            RestartPolicy::Never => false,
            RestartPolicy::OnFailure { max_restarts } => restarts < max_restarts,
        }
    }
}

fn panic_error(error: JoinError) -> StatusError {
    let reason = match error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(error) => error.to_string(),
    };
    StatusError::AggregatorPanicked { reason }
}
