//! Structured concurrency (component C3): `Task` and `TaskGroup`.
//!
//! A `Task<T>` moves through `Ready -> Running -> Done | Aborted`. It is
//! backed by a plain `tokio::spawn`; a driver future awaits the spawned
//! handle, captures panics as a `Runtime` error (spec §7) rather than letting
//! them escape, and publishes the settled result through a
//! `tokio::sync::Notify` so every `wait`/`tryWait`/`waitFor` caller observes
//! the same outcome without busy-polling.
//!
//! Cancellation is cooperative: `abort()` cancels the Task's
//! [`CancellationToken`](tokio_util::sync::CancellationToken), which the
//! action closure is handed and expected to check. `TaskGroup` children hold
//! a child token of the group's token, so aborting the group aborts every
//! child — cancellation propagates parent to children only, never back up.

#![forbid(unsafe_code)]

use safescale_error::{ErrorKind, Result, SafeScaleError};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The lifecycle of a [`Task`] (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Ready,
    Running,
    Done,
    Aborted,
}

impl TaskStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskStatus::Ready,
            1 => TaskStatus::Running,
            2 => TaskStatus::Done,
            _ => TaskStatus::Aborted,
        }
    }
}

struct Settled<T> {
    cache: AsyncMutex<Option<Result<T>>>,
    notify: Notify,
}

/// A cancellable unit of async work with a settle-once result.
pub struct Task<T> {
    id: String,
    cancel: CancellationToken,
    status: Arc<AtomicU8>,
    settled: Arc<Settled<T>>,
}

impl<T: Clone + Send + 'static> Task<T> {
    /// Construct a `Ready` task. `parent`, if given, makes this a child
    /// whose cancellation token derives from the parent's — cancelling the
    /// parent cancels this task too, never the reverse.
    pub fn new(parent: Option<&CancellationToken>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            cancel: parent.map(|p| p.child_token()).unwrap_or_default(),
            status: Arc::new(AtomicU8::new(TaskStatus::Ready as u8)),
            settled: Arc::new(Settled {
                cache: AsyncMutex::new(None),
                notify: Notify::new(),
            }),
        }
    }

    /// Pin a deterministic id, overriding the random default. `TaskGroup`
    /// uses this to name children `"<parent-id>-<index>"`.
    pub fn force_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    /// The token `action` should poll to notice an abort request.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// `Ready -> Running`. `action` is handed this task's cancellation token
    /// and is expected to check it cooperatively; it is not forcibly killed.
    /// Returns immediately — the action runs on a spawned tokio task.
    pub fn start<F, Fut>(&self, action: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.status.store(TaskStatus::Running as u8, Ordering::SeqCst);
        let cancel_for_action = self.cancel.clone();
        let cancel_for_driver = self.cancel.clone();
        let status = self.status.clone();
        let settled = self.settled.clone();
        let id = self.id.clone();

        let inner = tokio::spawn(async move { action(cancel_for_action).await });
        tokio::spawn(async move {
            let outcome: Result<T> = match inner.await {
                Ok(result) => result,
                Err(join_err) if join_err.is_cancelled() => {
                    Err(SafeScaleError::aborted(format!("task {id} cancelled")))
                }
                Err(join_err) => Err(SafeScaleError::new(
                    ErrorKind::Runtime,
                    format!("task {id} panicked: {join_err}"),
                )),
            };

            let final_status = if cancel_for_driver.is_cancelled() && outcome.is_err() {
                TaskStatus::Aborted
            } else {
                TaskStatus::Done
            };
            if final_status == TaskStatus::Aborted {
                debug!(task = %id, "task settled as aborted");
            }
            status.store(final_status as u8, Ordering::SeqCst);
            *settled.cache.lock().await = Some(outcome);
            settled.notify.notify_waiters();
        });
    }

    /// Convenience: `new(parent)` immediately followed by `start(action)`.
    pub fn spawn<F, Fut>(parent: Option<&CancellationToken>, action: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let task = Self::new(parent);
        task.start(action);
        task
    }

    /// Request cancellation. Cooperative: has no effect unless `action`
    /// checks the token it was handed in `start`.
    pub fn abort(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }

    /// Block until `Done` or `Aborted`, returning the settled result.
    pub async fn wait(&self) -> Result<T> {
        loop {
            let notified = self.settled.notify.notified();
            {
                let guard = self.settled.cache.lock().await;
                if let Some(result) = guard.as_ref() {
                    return result.clone();
                }
            }
            notified.await;
        }
    }

    /// Non-blocking poll: `(ready, result)`. Never blocks on the driver.
    pub async fn try_wait(&self) -> (bool, Option<Result<T>>) {
        let guard = self.settled.cache.lock().await;
        match guard.as_ref() {
            Some(result) => (true, Some(result.clone())),
            None => (false, None),
        }
    }

    /// Bounded wait. A zero duration always times out — matching the spec's
    /// observation that the minimum practical wait is on the order of 1ms,
    /// so `waitFor(0)` can never observe a settled task.
    pub async fn wait_for(&self, d: Duration) -> Result<T> {
        if d.is_zero() {
            return Err(SafeScaleError::timeout(format!(
                "task {} did not settle within 0s",
                self.id
            )));
        }
        match tokio::time::timeout(d, self.wait()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(task = %self.id, timeout = ?d, "waitFor timed out");
                Err(SafeScaleError::timeout(format!(
                    "task {} did not settle within {:?}",
                    self.id, d
                )))
            }
        }
    }
}

/// A parent task plus an ordered set of children it spawned, named
/// `"<parent-id>-<index>"` (spec §4.3).
pub struct TaskGroup<T> {
    id: String,
    cancel: CancellationToken,
    children: Vec<Task<T>>,
}

impl<T: Clone + Send + 'static> TaskGroup<T> {
    pub fn new(id: impl Into<String>, parent: Option<&CancellationToken>) -> Self {
        Self {
            id: id.into(),
            cancel: parent.map(|p| p.child_token()).unwrap_or_default(),
            children: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Spawn a new child, returning its deterministic id.
    pub fn spawn<F, Fut>(&mut self, action: F) -> String
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let index = self.children.len();
        let child_id = format!("{}-{}", self.id, index);
        let child = Task::new(Some(&self.cancel)).force_id(child_id.clone());
        child.start(action);
        self.children.push(child);
        child_id
    }

    /// Abort the group: cancels the shared token, which every child's token
    /// derives from. Children still settle asynchronously; this does not
    /// wait for them.
    pub fn abort(&self) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }

    pub fn children(&self) -> &[Task<T>] {
        &self.children
    }

    /// Wait for every child, returning an id-to-value map on full success, or
    /// a `List` error aggregating every child that failed (spec §4.3 /
    /// §4.1 `list`).
    pub async fn wait_group(&self) -> Result<HashMap<String, T>> {
        let mut values = HashMap::with_capacity(self.children.len());
        let mut failures = Vec::new();
        for child in &self.children {
            match child.wait().await {
                Ok(value) => {
                    values.insert(child.id().to_string(), value);
                }
                Err(err) => failures.push((child.id().to_string(), err)),
            }
        }
        if failures.is_empty() {
            Ok(values)
        } else {
            Err(SafeScaleError::list(failures))
        }
    }

    /// Non-blocking: `None` unless every child has settled, in which case the
    /// same aggregate `Result` `wait_group` would return.
    pub async fn try_wait_group(&self) -> Option<Result<HashMap<String, T>>> {
        for child in &self.children {
            let (ready, _) = child.try_wait().await;
            if !ready {
                return None;
            }
        }
        Some(self.wait_group().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering as MemOrdering};
    use std::time::Duration;

    #[tokio::test]
    async fn start_then_wait_round_trips_the_result() {
        let task: Task<i32> = Task::spawn(None, |_cancel| async { Ok(7) });
        assert_eq!(task.wait().await.unwrap(), 7);
        assert_eq!(task.status(), TaskStatus::Done);
    }

    #[tokio::test]
    async fn try_wait_reports_not_ready_before_completion() {
        let task: Task<i32> = Task::spawn(None, |_cancel| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(1)
        });
        let (ready, result) = task.try_wait().await;
        assert!(!ready);
        assert!(result.is_none());
        assert_eq!(task.wait().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn wait_for_zero_always_times_out() {
        let task: Task<i32> = Task::spawn(None, |_cancel| async { Ok(1) });
        let err = task.wait_for(Duration::from_secs(0)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn wait_for_surfaces_timeout_before_settling() {
        let task: Task<i32> = Task::spawn(None, |_cancel| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(1)
        });
        let err = task
            .wait_for(Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn abort_propagates_to_every_child() {
        let mut group: TaskGroup<()> = TaskGroup::new("grp", None);
        for _ in 0..3 {
            group.spawn(|cancel| async move {
                cancel.cancelled().await;
                Err(SafeScaleError::aborted("cancelled by parent"))
            });
        }
        group.abort().unwrap();
        for child in group.children() {
            let result = child.wait().await;
            assert!(result.is_err());
            assert!(matches!(
                child.status(),
                TaskStatus::Aborted | TaskStatus::Done
            ));
        }
    }

    #[tokio::test]
    async fn wait_group_aggregates_mixed_success_and_failure() {
        let mut group: TaskGroup<i32> = TaskGroup::new("fleet", None);
        let ok_count = Arc::new(AtomicU32::new(0));
        group.spawn(|_cancel| async { Ok(10) });
        group.spawn(|_cancel| async { Err(SafeScaleError::not_found("host gone")) });
        group.spawn(|_cancel| async { Ok(20) });

        let err = group.wait_group().await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::List);
        assert!(err.message.contains("fleet-1"));
        assert!(err.message.contains("NotFound"));
        // both "fleet-0" and "fleet-2" succeeded and do not appear as failures
        assert!(!err.message.contains("fleet-0"));
        assert!(!err.message.contains("fleet-2"));
        let _ = ok_count.load(MemOrdering::SeqCst);
    }

    #[tokio::test]
    async fn try_wait_group_is_none_until_every_child_settles() {
        let mut group: TaskGroup<i32> = TaskGroup::new("grp", None);
        group.spawn(|_cancel| async { Ok(1) });
        group.spawn(|_cancel| async {
            tokio::time::sleep(Duration::from_millis(80)).await;
            Ok(2)
        });
        assert!(group.try_wait_group().await.is_none());
        tokio::time::sleep(Duration::from_millis(120)).await;
        let result = group.try_wait_group().await.unwrap().unwrap();
        assert_eq!(result.len(), 2);
    }
}
