use super::CollectiveCall;
use crate::error::{BenchError, Result};
use std::collections::BTreeMap;
use std::future::Future;
use tokio::task::JoinHandle;

/// A handle to a non-blocking collective.
///
/// The collective runs in a spawned task. Call `wait()` to get the completed
/// call back, or check `is_finished()` to poll.
///
/// If dropped without calling `wait()`, the task is aborted so it cannot
/// keep writing into buffers the caller has moved on from.
pub struct WorkHandle {
    inner: Option<JoinHandle<Result<CollectiveCall>>>,
}

impl WorkHandle {
    pub fn spawn(fut: impl Future<Output = Result<CollectiveCall>> + Send + 'static) -> Self {
        Self {
            inner: Some(tokio::spawn(fut)),
        }
    }

    /// Wait for the collective and propagate its error, if any.
    pub async fn wait(mut self) -> Result<CollectiveCall> {
        let handle = self
            .inner
            .take()
            .ok_or_else(|| BenchError::TaskFailed("work handle already consumed".into()))?;
        handle
            .await
            .map_err(|e| BenchError::TaskFailed(format!("collective task panicked: {e}")))?
    }

    pub fn is_finished(&self) -> bool {
        self.inner.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Drop for WorkHandle {
    fn drop(&mut self) {
        if let Some(handle) = &self.inner {
            handle.abort();
        }
    }
}

/// Outstanding non-blocking collectives keyed by request id.
///
/// Ids increase monotonically; `wait_all` resolves requests in id order.
#[derive(Default)]
pub struct PendingOps {
    handles: BTreeMap<u64, WorkHandle>,
    next_req: u64,
}

impl PendingOps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `handle` and return its request id.
    pub fn track(&mut self, handle: WorkHandle) -> u64 {
        let req = self.next_req;
        self.next_req += 1;
        self.handles.insert(req, handle);
        req
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for one request.
    pub async fn wait(&mut self, req_id: u64) -> Result<CollectiveCall> {
        let handle = self
            .handles
            .remove(&req_id)
            .ok_or(BenchError::UnknownRequest { req_id })?;
        handle.wait().await
    }

    /// Wait for every outstanding request.
    ///
    /// Returns the call of the last request (highest id), or the first error
    /// encountered. All requests are awaited regardless of errors.
    pub async fn wait_all(&mut self) -> Result<Option<CollectiveCall>> {
        let mut first_err = None;
        let mut last = None;
        for (_, h) in std::mem::take(&mut self.handles) {
            match h.wait().await {
                Ok(call) => last = Some(call),
                Err(e) if first_err.is_none() => first_err = Some(e),
                Err(_) => {}
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(last),
        }
    }
}
