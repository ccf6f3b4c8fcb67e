//! Handle for communicating with the status aggregator actor.

use std::collections::HashMap;

use tokio::sync::{broadcast, mpsc, oneshot};

use super::StatusError;
use super::commands::{StatsUpdate, StatusCommand, TrackerNotifier, TransferStatus};
use crate::torrent::InfoHash;

/// Handle for communicating with the status aggregator actor.
///
/// Cheap to clone and safe to share across tasks. Mutations are
/// fire-and-forget: they are queued on the unbounded mailbox and only fail
/// when the aggregator has stopped. Queries wait on a private reply slot.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    sender: mpsc::UnboundedSender<StatusCommand>,
}

impl StatusHandle {
    /// Creates a new handle with the given command sender.
    pub fn new(sender: mpsc::UnboundedSender<StatusCommand>) -> Self {
        Self { sender }
    }

    fn send(&self, command: StatusCommand) -> Result<(), StatusError> {
        self.sender
            .send(command)
            .map_err(|_| StatusError::AggregatorShutdown)
    }

    /// Starts tracking a transfer, replacing any existing status for it.
    ///
    /// `notifier` receives a completion signal each time the transfer is
    /// reported complete with no bytes left.
    ///
    /// # Errors
    /// - `StatusError::AggregatorShutdown` - Aggregator is no longer running
    pub fn insert_transfer(
        &self,
        info_hash: InfoHash,
        left: u64,
        notifier: TrackerNotifier,
    ) -> Result<(), StatusError> {
        self.send(StatusCommand::InsertTransfer {
            info_hash,
            left,
            notifier,
        })
    }

    /// Stops tracking a transfer. Pending deltas for it are dropped.
    ///
    /// # Errors
    /// - `StatusError::AggregatorShutdown` - Aggregator is no longer running
    pub fn remove_transfer(&self, info_hash: InfoHash) -> Result<(), StatusError> {
        self.send(StatusCommand::RemoveTransfer { info_hash })
    }

    /// Records peer counts from a tracker response.
    ///
    /// # Errors
    /// - `StatusError::AggregatorShutdown` - Aggregator is no longer running
    pub fn tracker_stat(
        &self,
        info_hash: InfoHash,
        incomplete: Option<u32>,
        complete: Option<u32>,
    ) -> Result<(), StatusError> {
        self.send(StatusCommand::TrackerStat {
            info_hash,
            incomplete,
            complete,
        })
    }

    /// Reports a verified piece of `bytes` length.
    ///
    /// # Errors
    /// - `StatusError::AggregatorShutdown` - Aggregator is no longer running
    pub fn completed_piece(&self, info_hash: InfoHash, bytes: u64) -> Result<(), StatusError> {
        self.send(StatusCommand::CompletedPiece { info_hash, bytes })
    }

    /// Reports that every piece of a transfer is done.
    ///
    /// The aggregator treats a completion with bytes still left, or for an
    /// unknown transfer, as a fatal accounting error and stops; the failure
    /// surfaces through the aggregator's join handle, not here.
    ///
    /// # Errors
    /// - `StatusError::AggregatorShutdown` - Aggregator is no longer running
    pub fn torrent_completed(&self, info_hash: InfoHash) -> Result<(), StatusError> {
        self.send(StatusCommand::TorrentCompleted { info_hash })
    }

    /// Gets the current status of a transfer.
    ///
    /// Asking for an untracked transfer is treated as a coordination bug:
    /// the caller gets `TransferNotFound` and the aggregator stops with the
    /// same error, leaving any restart to its supervisor.
    ///
    /// # Errors
    /// - `StatusError::TransferNotFound` - Info hash is not tracked
    /// - `StatusError::AggregatorShutdown` - Aggregator is no longer running
    pub async fn status(&self, info_hash: InfoHash) -> Result<TransferStatus, StatusError> {
        let (responder, rx) = oneshot::channel();
        self.send(StatusCommand::RequestStatus {
            info_hash,
            responder,
        })?;

        rx.await.map_err(|_| StatusError::AggregatorShutdown)?
    }

    /// Gets a snapshot of every tracked transfer.
    ///
    /// # Errors
    /// - `StatusError::AggregatorShutdown` - Aggregator is no longer running
    pub async fn all_transfers(&self) -> Result<HashMap<InfoHash, TransferStatus>, StatusError> {
        let (responder, rx) = oneshot::channel();
        self.send(StatusCommand::RequestAllTransfers { responder })?;

        rx.await.map_err(|_| StatusError::AggregatorShutdown)
    }

    /// Subscribes to the update broadcast sent after every drain.
    ///
    /// The receiver closes when the aggregator stops.
    ///
    /// # Errors
    /// - `StatusError::AggregatorShutdown` - Aggregator is no longer running
    pub async fn subscribe_stats(&self) -> Result<broadcast::Receiver<StatsUpdate>, StatusError> {
        let (responder, rx) = oneshot::channel();
        self.send(StatusCommand::SubscribeStats { responder })?;

        rx.await.map_err(|_| StatusError::AggregatorShutdown)
    }

    /// Shuts down the aggregator actor gracefully.
    ///
    /// Returns after the termination hook has run. Later operations fail
    /// with `StatusError::AggregatorShutdown`.
    ///
    /// # Errors
    /// - `StatusError::AggregatorShutdown` - Aggregator was already stopped
    pub async fn shutdown(&self) -> Result<(), StatusError> {
        let (responder, rx) = oneshot::channel();
        self.send(StatusCommand::Shutdown { responder })?;

        rx.await.map_err(|_| StatusError::AggregatorShutdown)
    }

    #[cfg(test)]
    pub(crate) fn panic(&self) -> Result<(), StatusError> {
        self.send(StatusCommand::Panic)
    }

    /// Checks if the aggregator actor is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}
