//! Pluggable backend/session capability traits, plus ambient backend context
//! and nested-call detection.
//!
//! Concrete backend implementations (distributed schedulers, process pools
//! tied to a specific cluster manager, ...) are out of scope for this crate;
//! see `local_backend` for the one reference implementation it ships. What
//! belongs here is the *contract* a backend must satisfy: a small pair of
//! trait objects for opening a session, preloading shared state, and
//! dispatching work, behind `Arc`-shared, lock-guarded handles.

use crate::named_args::NamedArguments;
use anyhow::Result;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::Duration;

/// A type-erased task result, downcast by the controller once it knows the
/// user function's concrete output type.
pub type TaskOutput = Box<dyn Any + Send + Sync>;

/// A worker task: the merged (non-partitioned + partitioned) arguments in,
/// a type-erased result out.
pub type TaskFn = dyn Fn(NamedArguments) -> Result<TaskOutput> + Send + Sync;

/// A handle to a value a session has preloaded, to be merged back into every
/// partition's arguments before invoking the task.
#[derive(Clone)]
pub struct Preloaded(pub Arc<NamedArguments>);

/// A submitted unit of work, tagged with its submission order so the session
/// can return results in that order even though rayon completes them out of
/// order.
pub struct PartitionJob {
    pub index: usize,
    pub payload: NamedArguments,
    pub partition_size: usize,
    pub partition_duration: Duration,
}

/// The result of one completed [`PartitionJob`].
pub struct JobResult {
    pub index: usize,
    pub output: Result<TaskOutput>,
    pub task_duration: Duration,
}

/// A backend capable of opening sessions that run partitioned work.
///
/// `Backend` is the long-lived handle: constructed once, potentially shared
/// across many `invoke` calls via [`configure`] or [`with_backend`], and
/// shut down once at the end of its owner's lifetime.
pub trait Backend: Send + Sync {
    /// Whether tasks submitted by this backend may themselves call a
    /// parallelized function. Most backends answer `false`: a worker
    /// recursively invoking `invoke` on the same backend would deadlock a
    /// bounded worker pool.
    fn allows_nested_tasks(&self) -> bool;

    /// Opens a session scoped to one `invoke` call.
    fn open_session(&self) -> Result<Box<dyn Session>>;

    /// Releases any resources the backend holds across its whole lifetime
    /// (thread pools, connections, ...). Idempotent.
    fn shutdown(&self);
}

/// A single `invoke` call's scoped interaction with a [`Backend`].
///
/// Sessions are not `Sync`/shared: the controller owns one session per
/// `invoke` call and drives it from a single thread, dispatching work to
/// whatever concurrency the backend provides internally.
pub trait Session {
    /// Makes `value` available to every worker task without re-sending it
    /// per partition. Implementations may materialize it once per worker;
    /// the reference backend shares it as an `Arc`, so no materialization
    /// cost is paid at all.
    fn preload(&mut self, value: NamedArguments) -> Result<Preloaded>;

    /// Submits one partition for processing. May block if the backend's
    /// internal queue is saturated, applying backpressure to the caller.
    fn submit(&mut self, task: Arc<TaskFn>, preloaded: &Preloaded, job: PartitionJob) -> Result<()>;

    /// Signals that no further partitions will be submitted.
    fn finish_submissions(&mut self);

    /// Blocks until the next completed job is available, or `None` once
    /// every submitted job has completed and `finish_submissions` was
    /// called.
    fn recv(&mut self) -> Option<JobResult>;

    /// Returns the next completed job without blocking, or `None` if none
    /// is available right now. Used by the adaptive partition loop to feed
    /// the estimator with whatever has completed so far without stalling
    /// partition generation on it: completions interleave with generation
    /// rather than gating it.
    fn try_recv(&mut self) -> Option<JobResult>;

    /// Releases session-scoped resources. Called on every exit path from
    /// `invoke`, including error returns, via `Drop`.
    fn close(&mut self) -> Result<()>;
}

/// Thread-local ambient backend and nested-call marker.
///
/// Detecting nested parallelism by inspecting the call stack is brittle --
/// it breaks under inlining, wrapping, or renaming. `IN_TASK` is an explicit
/// marker instead: the worker wrapper sets it for the duration of every task
/// it runs, on whatever thread runs that task, and nested `invoke` calls
/// check it before doing anything else.
pub mod ambient {
    use super::*;

    pub type BackendHandle = Arc<dyn Backend>;

    thread_local! {
        static CURRENT_BACKEND: RefCell<Option<BackendHandle>> = const { RefCell::new(None) };
        static IN_TASK: Cell<bool> = const { Cell::new(false) };
    }

    /// The backend installed as ambient context on this thread, if any.
    pub fn current_backend() -> Option<BackendHandle> {
        CURRENT_BACKEND.with(|cell| cell.borrow().clone())
    }

    /// Installs `backend` as the process-wide default. Unlike
    /// [`with_backend`], this has no automatic teardown -- it is meant to be
    /// called once at startup.
    pub fn configure(backend: BackendHandle) {
        CURRENT_BACKEND.with(|cell| *cell.borrow_mut() = Some(backend));
    }

    /// Scoped ambient backend. The previous value (if any) is restored when
    /// the returned guard drops, even if the scope panics or returns early
    /// via `?`.
    #[must_use]
    pub fn with_backend(backend: BackendHandle) -> BackendGuard {
        let previous = CURRENT_BACKEND.with(|cell| cell.replace(Some(backend)));
        BackendGuard { previous }
    }

    pub struct BackendGuard {
        previous: Option<BackendHandle>,
    }

    impl Drop for BackendGuard {
        fn drop(&mut self) {
            CURRENT_BACKEND.with(|cell| *cell.borrow_mut() = self.previous.take());
        }
    }

    /// Whether the calling thread is currently executing inside a worker
    /// task (i.e. whether an `invoke` call on this thread would be nested
    /// parallelism).
    pub fn is_nested_parallelism() -> bool {
        IN_TASK.with(Cell::get)
    }

    #[must_use]
    pub fn mark_in_task() -> TaskMarkerGuard {
        let previous = IN_TASK.with(|cell| cell.replace(true));
        TaskMarkerGuard { previous }
    }

    pub struct TaskMarkerGuard {
        previous: bool,
    }

    impl Drop for TaskMarkerGuard {
        fn drop(&mut self) {
            IN_TASK.with(|cell| cell.set(self.previous));
        }
    }
}
