//! Self-rescheduling drain timer.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::commands::StatusCommand;

/// One-shot timer that enqueues [`StatusCommand::TimerTick`] after `period`.
///
/// Nothing ticks on its own: the aggregator re-arms the timer while handling
/// each tick, so a stalled aggregator accumulates at most one pending tick and
/// a stopped one stops ticking. Only a weak sender is held, which keeps the
/// timer from holding a dead aggregator's mailbox open.
#[derive(Debug)]
pub struct TickTimer {
    mailbox: mpsc::WeakUnboundedSender<StatusCommand>,
    period: Duration,
    pending: Option<JoinHandle<()>>,
}

impl TickTimer {
    pub fn new(mailbox: mpsc::WeakUnboundedSender<StatusCommand>, period: Duration) -> Self {
        Self {
            mailbox,
            period,
            pending: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Schedules the next tick, replacing any tick still pending.
    pub fn arm(&mut self) {
        if let Some(previous) = self.pending.take() {
            previous.abort();
        }

        let mailbox = self.mailbox.clone();
        let period = self.period;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(period).await;
            if let Some(sender) = mailbox.upgrade() {
                let _ = sender.send(StatusCommand::TimerTick);
            }
        }));
    }
}

impl Drop for TickTimer {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }
}
