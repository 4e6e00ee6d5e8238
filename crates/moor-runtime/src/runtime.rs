//! Thread-safe runtime owner and access arbiter
//!
//! A [`Runtime`] owns one worker thread, and that thread owns the Lua state.
//! Every operation on the engine is a unit of work handed to
//! [`Runtime::with_engine`]:
//!
//! - called from the worker thread itself (a host callback invoked by a
//!   running script), the work runs in place, so nesting never deadlocks;
//! - called from any other thread, the work is queued and the caller blocks
//!   until the worker has run it.
//!
//! # Example
//!
//! ```no_run
//! use moor_runtime::Runtime;
//!
//! let runtime = Runtime::new(0).unwrap();
//! let ctx = runtime.new_context().unwrap();
//! let value = ctx.eval("1 + 1").unwrap();
//! assert_eq!(value.as_integer(), Some(2));
//! runtime.dispose();
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, ThreadId};

use crossbeam_channel::{Sender, TrySendError, bounded};
use moor_core::HandleKind;
use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, error};

use crate::config::RuntimeConfig;
use crate::context::Context;
use crate::dispose::{DisposeQueues, dispose_queues};
use crate::error::{RuntimeError, RuntimeResult};
use crate::stats::RuntimeStats;
use crate::worker::{self, EngineScope, Job, WorkerSetup, run_worker};

/// Disposal state shared with the worker
#[derive(Default)]
pub(crate) struct Lifecycle {
    disposed: AtomicBool,
    /// Set when shutdown was requested from the worker itself and the work
    /// channel had no room for the shutdown message.
    pub(crate) shutdown_pending: AtomicBool,
    finished: Mutex<bool>,
    finished_cv: Condvar,
}

impl Lifecycle {
    pub(crate) fn finish(&self) {
        *self.finished.lock() = true;
        self.finished_cv.notify_all();
    }

    fn wait_finished(&self) {
        let mut finished = self.finished.lock();
        while !*finished {
            self.finished_cv.wait(&mut finished);
        }
    }
}

pub(crate) struct RuntimeShared {
    job_tx: Sender<Job>,
    pub(crate) dispose: DisposeQueues,
    pub(crate) stats: Arc<RuntimeStats>,
    lifecycle: Arc<Lifecycle>,
    worker_thread: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RuntimeShared {
    pub(crate) fn on_worker_thread(&self) -> bool {
        std::thread::current().id() == self.worker_thread
    }

    fn dispose(&self) {
        let first = self
            .lifecycle
            .disposed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        if first {
            debug!("Runtime dispose requested");
            match self.job_tx.try_send(Job::Shutdown) {
                Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                Err(TrySendError::Full(job)) => {
                    if self.on_worker_thread() {
                        self.lifecycle
                            .shutdown_pending
                            .store(true, Ordering::SeqCst);
                    } else {
                        let _ = self.job_tx.send(job);
                    }
                }
            }
        }

        // The worker finishes teardown once the current unit of work returns.
        if self.on_worker_thread() {
            return;
        }

        self.lifecycle.wait_finished();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RuntimeShared {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Owner of one engine instance and its worker thread
///
/// Cloning is cheap; all clones refer to the same runtime. The runtime is
/// disposed by [`Runtime::dispose`] or when the last clone (including the
/// ones held inside handles) is dropped.
#[derive(Clone)]
pub struct Runtime {
    shared: Arc<RuntimeShared>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("worker_thread", &self.shared.worker_thread)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Runtime {
    /// Create a runtime whose engine may use at most `max_bytes` (0 means
    /// unlimited)
    pub fn new(max_bytes: usize) -> RuntimeResult<Self> {
        Self::with_config(RuntimeConfig {
            max_bytes,
            ..RuntimeConfig::default()
        })
    }

    /// Create a builder for custom configuration
    pub fn builder() -> crate::config::RuntimeBuilder {
        RuntimeConfig::builder()
    }

    /// Start the worker thread and create the engine on it
    pub fn with_config(config: RuntimeConfig) -> RuntimeResult<Self> {
        let (job_tx, job_rx) = bounded::<Job>(config.work_queue_capacity.max(1));
        let (dispose, receivers) = dispose_queues(config.dispose_queue_capacity.max(1));
        let (ready_tx, ready_rx) = bounded(1);
        let lifecycle = Arc::new(Lifecycle::default());
        let stats = Arc::new(RuntimeStats::new());

        let setup = WorkerSetup {
            max_bytes: config.max_bytes,
            job_rx,
            receivers,
            lifecycle: lifecycle.clone(),
            stats: stats.clone(),
            ready: ready_tx,
        };

        let handle = std::thread::Builder::new()
            .name(config.thread_name.clone())
            .stack_size(config.stack_size)
            .spawn(move || run_worker(setup))
            .map_err(|e| RuntimeError::Spawn(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(RuntimeError::Core(e));
            }
            Err(_) => {
                let _ = handle.join();
                return Err(RuntimeError::Spawn(
                    "worker exited during startup".to_string(),
                ));
            }
        }

        debug!(thread = %config.thread_name, max_bytes = config.max_bytes, "Runtime started");

        Ok(Self {
            shared: Arc::new(RuntimeShared {
                job_tx,
                dispose,
                stats,
                lifecycle,
                worker_thread: handle.thread().id(),
                worker: Mutex::new(Some(handle)),
            }),
        })
    }

    pub(crate) fn shared(&self) -> &RuntimeShared {
        &self.shared
    }

    /// True if both values refer to the same runtime
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Run `work` with exclusive access to the engine.
    ///
    /// On the worker thread the work runs in place. Anywhere else it is queued
    /// behind earlier work and the caller blocks until it has run. Fails with
    /// [`RuntimeError::Disposed`] once the runtime is disposed, and with
    /// [`RuntimeError::WorkerPanicked`] if `work` panics.
    pub fn with_engine<F, T>(&self, work: F) -> RuntimeResult<T>
    where
        F: FnOnce(&EngineScope<'_>) -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.shared.on_worker_thread() {
            return self.run_in_place(work);
        }
        if self.is_disposed() {
            return Err(RuntimeError::Disposed);
        }

        let (tx, rx) = bounded(1);
        let runtime = self.clone();
        self.submit(Job::Run(Box::new(move |state| {
            let scope = EngineScope::new(state, &runtime);
            let _ = tx.send(run_guarded(|| work(&scope)));
        })))?;

        rx.recv().map_err(|_| RuntimeError::Disposed)?
    }

    /// Async version of [`Runtime::with_engine`]. The calling task is
    /// suspended instead of blocking its thread while the work waits.
    pub async fn with_engine_async<F, T>(&self, work: F) -> RuntimeResult<T>
    where
        F: FnOnce(&EngineScope<'_>) -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.shared.on_worker_thread() {
            return self.run_in_place(work);
        }
        if self.is_disposed() {
            return Err(RuntimeError::Disposed);
        }

        let (tx, rx) = oneshot::channel();
        let runtime = self.clone();
        self.submit(Job::Run(Box::new(move |state| {
            let scope = EngineScope::new(state, &runtime);
            let _ = tx.send(run_guarded(|| work(&scope)));
        })))?;

        rx.await.map_err(|_| RuntimeError::Disposed)?
    }

    /// [`Runtime::with_engine`] for work that can itself fail
    pub(crate) fn engine_call<F, T>(&self, work: F) -> RuntimeResult<T>
    where
        F: FnOnce(&EngineScope<'_>) -> RuntimeResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.with_engine(work)?
    }

    fn run_in_place<F, T>(&self, work: F) -> RuntimeResult<T>
    where
        F: FnOnce(&EngineScope<'_>) -> T,
    {
        // Teardown clears the worker state; nothing may touch the engine after.
        let state = worker::current().ok_or(RuntimeError::Disposed)?;
        RuntimeStats::bump(&self.shared.stats.reentrant_calls);
        let scope = EngineScope::new(&state, self);
        run_guarded(|| work(&scope))
    }

    fn submit(&self, job: Job) -> RuntimeResult<()> {
        RuntimeStats::bump(&self.shared.stats.jobs_submitted);
        self.shared
            .job_tx
            .send(job)
            .map_err(|_| RuntimeError::Disposed)
    }

    /// Create an isolated global environment
    pub fn new_context(&self) -> RuntimeResult<Context> {
        self.engine_call(|scope| {
            let env = scope.engine().new_environment()?;
            let env = moor_core::mlua::Value::Table(env);
            let rooted = scope.root(HandleKind::Context, env)?;
            Ok(Context::from_rooted(rooted))
        })
    }

    /// Shut the runtime down.
    ///
    /// Idempotent and safe to call from several threads at once: exactly one
    /// teardown runs, and every caller off the worker thread returns only
    /// after the engine is gone. Called from the worker thread (inside a unit
    /// of work) it only requests shutdown.
    pub fn dispose(&self) {
        self.shared.dispose();
    }

    /// Check if the runtime has been disposed
    pub fn is_disposed(&self) -> bool {
        self.shared.lifecycle.disposed.load(Ordering::SeqCst)
    }

    /// Get the runtime statistics
    pub fn stats(&self) -> &RuntimeStats {
        &self.shared.stats
    }

    /// Release requests posted by dropped handles and not yet taken by the
    /// worker
    pub fn pending_disposals(&self) -> usize {
        self.shared.dispose.pending()
    }

    /// Run a full engine collection cycle
    pub fn collect_garbage(&self) -> RuntimeResult<()> {
        self.engine_call(|scope| Ok(scope.engine().collect_garbage()?))
    }

    /// Bytes currently allocated by the engine
    pub fn used_memory(&self) -> RuntimeResult<usize> {
        self.with_engine(|scope| scope.engine().used_memory())
    }

    /// Number of values currently rooted for host handles
    pub fn root_count(&self) -> RuntimeResult<usize> {
        self.with_engine(|scope| scope.engine().root_count())
    }
}

/// Execute a closure with panic handling
fn run_guarded<T>(f: impl FnOnce() -> T) -> RuntimeResult<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => Ok(result),
        Err(panic) => {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown error".to_string()
            };
            error!("Worker panic: {}", message);
            Err(RuntimeError::WorkerPanicked(message))
        }
    }
}
