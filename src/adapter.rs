use std::{
    collections::HashMap,
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{RequestConfig, Response, TransportError};

/// Pending outcome of one transport attempt.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<Response, TransportError>> + Send>>;

/// Pluggable transport bridging the dispatch engine to a networking API.
///
/// `send` starts one attempt and returns immediately. The returned
/// [`AdapterTask`] settles with the raw response (any status code) or a
/// [`TransportError`]. Aborting the task must make it settle with an error.
///
/// Closures `Fn(&RequestConfig) -> AdapterTask` implement this trait.
pub trait Adapter: Send + Sync {
    fn send(&self, req: &RequestConfig) -> AdapterTask;
}

impl<F> Adapter for F
where
    F: Fn(&RequestConfig) -> AdapterTask + Send + Sync,
{
    fn send(&self, req: &RequestConfig) -> AdapterTask {
        self(req)
    }
}

/// Cancellation handle for an in-flight attempt. Aborting a settled task is a no-op.
#[derive(Clone)]
pub struct TaskHandle {
    abort: Arc<dyn Fn() + Send + Sync>,
}

impl TaskHandle {
    pub fn new(abort: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            abort: Arc::new(abort),
        }
    }

    /// A handle for transports that cannot be cancelled.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    pub fn abort(&self) {
        (self.abort)();
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TaskHandle")
    }
}

/// A started transport attempt: its eventual outcome plus its cancellation handle.
pub struct AdapterTask {
    settled: TaskFuture,
    handle: TaskHandle,
}

impl AdapterTask {
    pub fn new<F>(settled: F, handle: TaskHandle) -> Self
    where
        F: Future<Output = Result<Response, TransportError>> + Send + 'static,
    {
        Self {
            settled: Box::pin(settled),
            handle,
        }
    }

    /// Runs `fut` on the current tokio runtime; aborting the handle cancels
    /// the spawned task and settles it with [`TransportError::aborted`].
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = Result<Response, TransportError>> + Send + 'static,
    {
        let join = tokio::spawn(fut);
        let abort = join.abort_handle();
        let settled = async move {
            match join.await {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => Err(TransportError::aborted()),
                Err(err) => Err(TransportError::new(format!("Request Error: {err}"))),
            }
        };
        Self::new(settled, TaskHandle::new(move || abort.abort()))
    }

    /// An attempt that has already settled.
    pub fn ready(result: Result<Response, TransportError>) -> Self {
        Self::new(std::future::ready(result), TaskHandle::noop())
    }

    pub fn handle(&self) -> TaskHandle {
        self.handle.clone()
    }

    pub(crate) fn into_parts(self) -> (TaskFuture, TaskHandle) {
        (self.settled, self.handle)
    }
}

impl fmt::Debug for AdapterTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterTask").finish_non_exhaustive()
    }
}

/// Identifier of one logical call, unique per client.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Live cancellation handles keyed by task id.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskId, TaskHandle>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, TaskHandle>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, id: TaskId, handle: TaskHandle) {
        self.lock().insert(id, handle);
    }

    pub fn remove(&self, id: TaskId) -> Option<TaskHandle> {
        self.lock().remove(&id)
    }

    pub fn get(&self, id: TaskId) -> Option<TaskHandle> {
        self.lock().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Aborts and removes every registered task, returning how many there were.
    pub fn abort_all(&self) -> usize {
        // Drain under the lock, abort outside it: abort callbacks may re-enter.
        let drained: Vec<TaskHandle> = self.lock().drain().map(|(_, handle)| handle).collect();
        for handle in &drained {
            handle.abort();
        }
        drained.len()
    }
}
