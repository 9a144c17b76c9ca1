//! Abortable background requests, at most one in flight per slot.

use futures::future::{AbortHandle, Abortable};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// What a coordinator did with a request.
#[derive(Debug)]
pub enum Dispatch {
    /// Empty input; nothing happened
    Ignored,
    /// Another request of the same kind is still running
    Busy,
    Started(RequestHandle),
}

impl Dispatch {
    pub fn into_handle(self) -> Option<RequestHandle> {
        match self {
            Dispatch::Started(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Owner-side handle to one background request.
#[derive(Debug)]
pub struct RequestHandle {
    join: JoinHandle<()>,
}

impl RequestHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the request, including its abort cleanup, to finish.
    pub async fn join(self) {
        if let Err(e) = self.join.await {
            tracing::warn!("request task ended abnormally: {}", e);
        }
    }
}

struct InFlight {
    abort: AbortHandle,
    finished: Arc<AtomicBool>,
}

/// Spawns work on a runtime and remembers the in-flight request.
pub(crate) struct TaskSlot {
    runtime: Handle,
    current: Mutex<Option<InFlight>>,
}

impl TaskSlot {
    pub(crate) fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            current: Mutex::new(None),
        }
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .map(|f| !f.finished.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Start `work` unless the slot is busy. `on_abort` runs on the worker
    /// if the request is cancelled before `work` completes.
    pub(crate) fn spawn<F, C>(&self, work: F, on_abort: C) -> Option<RequestHandle>
    where
        F: Future<Output = ()> + Send + 'static,
        C: FnOnce() + Send + 'static,
    {
        let mut current = self.current.lock();
        if current
            .as_ref()
            .map(|f| !f.finished.load(Ordering::Acquire))
            .unwrap_or(false)
        {
            return None;
        }

        let (abort, registration) = AbortHandle::new_pair();
        let finished = Arc::new(AtomicBool::new(false));
        let done = finished.clone();
        let work = Abortable::new(work, registration);
        let join = self.runtime.spawn(async move {
            if work.await.is_err() {
                on_abort();
            }
            done.store(true, Ordering::Release);
        });

        *current = Some(InFlight { abort, finished });
        Some(RequestHandle { join })
    }

    /// Abort the in-flight request. Returns false when there was none.
    pub(crate) fn cancel(&self) -> bool {
        match self.current.lock().as_ref() {
            Some(f) if !f.finished.load(Ordering::Acquire) => {
                f.abort.abort();
                true
            }
            _ => false,
        }
    }
}
