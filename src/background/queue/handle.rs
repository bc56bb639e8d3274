use crate::common::errors::ProcessingError;
use log::warn;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

use super::job::ProcessingResult;

/// Receiving end of a submitted job.
///
/// Dropping the handle before a result arrives cancels the job: a queued job is skipped and a
/// running pipeline process is killed. The worker then removes the job's artifacts itself.
#[derive(Debug)]
pub struct JobHandle {
    id: Uuid,
    receiver: oneshot::Receiver<ProcessingResult>,
    guard: Option<DropGuard>,
}

impl JobHandle {
    pub(crate) fn new(
        id: Uuid,
        receiver: oneshot::Receiver<ProcessingResult>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            receiver,
            guard: Some(cancel.drop_guard()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits up to `timeout` for the job's result.
    ///
    /// On timeout the job is cancelled and [`ProcessingError::Timeout`] is returned, which callers
    /// must report differently from an execution failure.
    pub async fn wait(mut self, timeout: Duration) -> Result<ProcessingResult, ProcessingError> {
        match tokio::time::timeout(timeout, &mut self.receiver).await {
            Ok(Ok(result)) => {
                if let Some(guard) = self.guard.take() {
                    guard.disarm();
                }
                Ok(result)
            }
            Ok(Err(_)) => Err(ProcessingError::Internal(format!(
                "job {} was dropped without a result",
                self.id
            ))),
            Err(_) => match self.settle_after_deadline() {
                Some(result) => {
                    warn!("Job {} answered right at its {:?} deadline", self.id, timeout);
                    Ok(result)
                }
                None => {
                    warn!("Job {} timed out after {:?}; cancelling", self.id, timeout);
                    Err(ProcessingError::Timeout(timeout))
                }
            },
        }
    }

    /// Closes the channel so any later send fails and the worker reclaims the job's artifacts,
    /// then picks up a result that slipped in before the close.
    fn settle_after_deadline(&mut self) -> Option<ProcessingResult> {
        self.receiver.close();
        let result = self.receiver.try_recv().ok()?;
        if let Some(guard) = self.guard.take() {
            guard.disarm();
        }
        Some(result)
    }
}
