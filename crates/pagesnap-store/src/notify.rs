// ABOUTME: Fire-and-forget snapshot requests raised by content changes, and the worker draining them.
// ABOUTME: Requests travel over a bounded channel; the worker runs each one on a blocking task.

use pagesnap_core::{ContentChange, SnapshotRequest};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinError;

use crate::processor::{CancelToken, SnapshotProcessor};
use crate::store::Storage;

/// Receives snapshot requests. Implementations must not block the caller.
pub trait Notifier {
    fn notify(&self, request: SnapshotRequest);
}

/// A notifier backed by a bounded channel. Requests are dropped with a
/// warning when the channel is full or the worker has gone away.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<SnapshotRequest>,
}

impl ChannelNotifier {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SnapshotRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Forward the request a content change calls for, if any.
    pub fn content_changed(&self, change: &ContentChange) {
        if let Some(request) = change.snapshot_request() {
            self.notify(request);
        }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, request: SnapshotRequest) {
        match self.tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(request)) => {
                tracing::warn!("snapshot queue full, dropping {:?}", request);
            }
            Err(TrySendError::Closed(request)) => {
                tracing::warn!("snapshot worker gone, dropping {:?}", request);
            }
        }
    }
}

/// Errors that stop the worker loop.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("snapshot task panicked or was aborted: {0}")]
    Join(#[from] JoinError),
}

/// What a worker did before its channel closed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSummary {
    pub processed: usize,
    pub failed: usize,
}

/// Drains snapshot requests, one at a time, until every notifier is dropped.
pub struct SnapshotWorker<S> {
    processor: SnapshotProcessor<S>,
    cancel: CancelToken,
}

impl<S> SnapshotWorker<S>
where
    S: Storage + Send + 'static,
{
    pub fn new(processor: SnapshotProcessor<S>, cancel: CancelToken) -> Self {
        Self { processor, cancel }
    }

    pub async fn run(
        self,
        mut rx: mpsc::Receiver<SnapshotRequest>,
    ) -> Result<WorkerSummary, WorkerError> {
        let Self {
            mut processor,
            cancel,
        } = self;
        let mut summary = WorkerSummary::default();

        while let Some(request) = rx.recv().await {
            if cancel.is_cancelled() {
                tracing::warn!("worker cancelled, {:?} not processed", request);
                break;
            }

            let token = cancel.clone();
            let (returned, ok) = tokio::task::spawn_blocking(move || {
                let ok = handle(&mut processor, request, &token);
                (processor, ok)
            })
            .await?;
            processor = returned;

            summary.processed += 1;
            if !ok {
                summary.failed += 1;
            }
        }

        tracing::info!(
            "snapshot worker stopped after {} request(s), {} failed",
            summary.processed,
            summary.failed
        );
        Ok(summary)
    }
}

fn handle<S: Storage>(
    processor: &mut SnapshotProcessor<S>,
    request: SnapshotRequest,
    cancel: &CancelToken,
) -> bool {
    match request {
        SnapshotRequest::Page(page_id) => match processor.create_snapshot(&page_id) {
            Ok(snapshot) => {
                tracing::debug!("page {} published as {}", page_id, snapshot.snapshot_id);
                true
            }
            Err(e) => {
                tracing::error!("snapshot of page {} failed: {}", page_id, e);
                false
            }
        },
        SnapshotRequest::Site(site_id) => match processor.create_snapshots(&site_id, cancel) {
            Ok(report) => report.failed.is_empty(),
            Err(e) => {
                tracing::error!("snapshots of site {} failed: {}", site_id, e);
                false
            }
        },
    }
}
