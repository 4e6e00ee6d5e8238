//! Worker thread implementation
//!
//! The worker creates the engine on its own thread and is the only thread
//! that ever calls into it. One loop selects over the work channel and the
//! five dispose channels; between items it releases roots whose handles were
//! dropped on the worker itself.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crossbeam_channel::{Receiver, Select, Sender};
use moor_core::mlua::{self, Lua, Table};
use moor_core::{CoreResult, Engine, HandleId, HandleKind, IdentityMap};
use tracing::{debug, error, info_span, trace, warn};

use crate::array::Array;
use crate::context::Context;
use crate::dispose::DisposeReceivers;
use crate::error::{RuntimeError, RuntimeResult};
use crate::handle::Rooted;
use crate::object::{Object, ObjectInner};
use crate::runtime::{Lifecycle, Runtime};
use crate::stats::RuntimeStats;
use crate::value::Value;

// Engine state of the worker running on this thread.
// Present from engine creation until teardown starts.
thread_local! {
    static CURRENT: RefCell<Option<Rc<WorkerState>>> = const { RefCell::new(None) };
}

/// Job submitted to the worker
pub(crate) enum Job {
    /// Run a unit of work against the engine
    Run(Box<dyn FnOnce(&WorkerState) + Send>),
    /// Shutdown signal
    Shutdown,
}

/// Everything the worker needs, moved onto its thread
pub(crate) struct WorkerSetup {
    pub(crate) max_bytes: usize,
    pub(crate) job_rx: Receiver<Job>,
    pub(crate) receivers: DisposeReceivers,
    pub(crate) lifecycle: Arc<Lifecycle>,
    pub(crate) stats: Arc<RuntimeStats>,
    pub(crate) ready: Sender<CoreResult<()>>,
}

/// Engine-side state owned by the worker thread
pub(crate) struct WorkerState {
    engine: Engine,
    objects: RefCell<IdentityMap<ObjectInner>>,
    backlog: RefCell<Vec<(HandleKind, HandleId)>>,
    stats: Arc<RuntimeStats>,
}

impl WorkerState {
    fn release(&self, kind: HandleKind, id: HandleId) {
        if kind == HandleKind::Object {
            self.objects.borrow_mut().forget(id);
        }
        if self.engine.unroot(id) {
            RuntimeStats::bump(&self.stats.handles_released);
            trace!(%kind, %id, "released");
        } else {
            warn!(%kind, %id, "Release of a handle that is not rooted");
        }
    }

    /// Release everything already posted to the dispose queues
    fn drain_queues(&self, receivers: &DisposeReceivers) -> usize {
        let pending = receivers.drain();
        let released = pending.len();
        for (kind, id) in pending {
            self.release(kind, id);
        }
        released
    }

    fn drain_backlog(&self) -> usize {
        let mut released = 0;
        loop {
            let pending = std::mem::take(&mut *self.backlog.borrow_mut());
            if pending.is_empty() {
                return released;
            }
            released += pending.len();
            for (kind, id) in pending {
                self.release(kind, id);
            }
        }
    }
}

/// The worker state for the current thread, if it is a live worker
pub(crate) fn current() -> Option<Rc<WorkerState>> {
    CURRENT
        .try_with(|slot| slot.try_borrow().ok().and_then(|state| state.clone()))
        .ok()
        .flatten()
}

/// Run `f` against the current worker's engine, if this is a live worker
pub(crate) fn with_current_engine<T>(f: impl FnOnce(&Engine) -> T) -> Option<T> {
    current().map(|state| f(&state.engine))
}

/// Queue a release for after the current unit of work. Returns `false` when
/// the engine is already being torn down.
pub(crate) fn defer_release(kind: HandleKind, id: HandleId) -> bool {
    match current() {
        Some(state) => {
            state.backlog.borrow_mut().push((kind, id));
            true
        }
        None => false,
    }
}

/// Run the worker loop until shutdown
pub(crate) fn run_worker(setup: WorkerSetup) {
    let WorkerSetup {
        max_bytes,
        job_rx,
        receivers,
        lifecycle,
        stats,
        ready,
    } = setup;

    let thread_name = std::thread::current()
        .name()
        .unwrap_or("moor-worker")
        .to_string();
    let _span = info_span!("worker", name = %thread_name).entered();

    // Waiters in `dispose` must wake up even if the loop panics.
    let _finished = scopeguard::guard(lifecycle.clone(), |lifecycle| lifecycle.finish());

    let engine = match Engine::new(max_bytes) {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "Failed to create engine");
            let _ = ready.send(Err(e));
            return;
        }
    };

    let state = Rc::new(WorkerState {
        engine,
        objects: RefCell::new(IdentityMap::new()),
        backlog: RefCell::new(Vec::new()),
        stats: stats.clone(),
    });
    CURRENT.with(|slot| *slot.borrow_mut() = Some(state.clone()));
    let _ = ready.send(Ok(()));
    debug!("Worker started");

    loop {
        // Releases are serviced between work items; `select` alone picks
        // among ready channels at random.
        state.drain_backlog();
        state.drain_queues(&receivers);
        state.drain_backlog();
        if lifecycle.shutdown_pending.load(Ordering::SeqCst) {
            debug!("Worker shutdown flag set");
            break;
        }

        let mut sel = Select::new();
        let job_idx = sel.recv(&job_rx);
        for kind in HandleKind::ALL {
            sel.recv(receivers.get(kind));
        }

        let oper = sel.select();
        let idx = oper.index();
        if idx == job_idx {
            match oper.recv(&job_rx) {
                Ok(Job::Run(work)) => {
                    work(&state);
                    RuntimeStats::bump(&stats.jobs_completed);
                }
                Ok(Job::Shutdown) => {
                    debug!("Received shutdown signal");
                    break;
                }
                Err(_) => {
                    debug!("Work channel disconnected");
                    break;
                }
            }
        } else {
            let kind = HandleKind::ALL[idx - 1];
            match oper.recv(receivers.get(kind)) {
                Ok(id) => state.release(kind, id),
                Err(_) => {
                    debug!(%kind, "Dispose channel disconnected");
                    break;
                }
            }
        }
    }

    // Work queued behind the shutdown is dropped unrun; its callers see
    // `Disposed`. Dropping it may release more handles, so it goes first.
    let rejected = job_rx.try_iter().filter(|job| matches!(job, Job::Run(_))).count();
    let mut released = state.drain_backlog();
    released += state.drain_queues(&receivers);
    released += state.drain_backlog();
    drop(job_rx);
    drop(receivers);
    debug!(
        rejected,
        released,
        live_roots = state.engine.root_count(),
        "Worker drained"
    );

    CURRENT.with(|slot| slot.borrow_mut().take());
    state.objects.borrow_mut().clear();
    // Closing the engine may drop host closures and the handles they
    // captured; with the thread-local state cleared those drops are no-ops.
    drop(state);

    debug!("Worker stopped");
}

/// The engine as seen by one unit of work
///
/// Only exists on the worker thread, for the duration of a call to
/// [`Runtime::with_engine`].
pub struct EngineScope<'a> {
    state: &'a WorkerState,
    runtime: &'a Runtime,
}

impl<'a> EngineScope<'a> {
    pub(crate) fn new(state: &'a WorkerState, runtime: &'a Runtime) -> Self {
        Self { state, runtime }
    }

    /// The thread-bound engine
    pub fn engine(&self) -> &Engine {
        &self.state.engine
    }

    /// The raw Lua state
    pub fn lua(&self) -> &Lua {
        self.state.engine.lua()
    }

    /// The runtime this work belongs to
    pub fn runtime(&self) -> &Runtime {
        self.runtime
    }

    /// Root `value` on behalf of a new handle of `kind`
    pub(crate) fn root(&self, kind: HandleKind, value: mlua::Value) -> RuntimeResult<Rooted> {
        let id = self.state.engine.root(value)?;
        RuntimeStats::bump(&self.state.stats.handles_rooted);
        Ok(Rooted::new(self.runtime.clone(), kind, id))
    }

    /// The engine value behind a handle of this runtime
    pub(crate) fn resolve(&self, rooted: &Rooted) -> RuntimeResult<mlua::Value> {
        if !rooted.runtime().ptr_eq(self.runtime) {
            return Err(RuntimeError::callback(
                "handle belongs to a different runtime",
            ));
        }
        Ok(self.state.engine.resolve(rooted.id())?)
    }

    pub(crate) fn resolve_table(&self, rooted: &Rooted) -> RuntimeResult<Table> {
        match self.resolve(rooted)? {
            mlua::Value::Table(table) => Ok(table),
            other => Err(RuntimeError::type_error("table", other.type_name())),
        }
    }

    pub(crate) fn resolve_function(&self, rooted: &Rooted) -> RuntimeResult<mlua::Function> {
        match self.resolve(rooted)? {
            mlua::Value::Function(func) => Ok(func),
            other => Err(RuntimeError::type_error("function", other.type_name())),
        }
    }

    /// Wrap any engine value as a [`Value`] handle
    pub fn wrap_value(&self, value: mlua::Value, context: &Context) -> RuntimeResult<Value> {
        let snapshot = (&value).into();
        let rooted = self.root(HandleKind::Value, value)?;
        Ok(Value::from_parts(rooted, context.clone(), snapshot))
    }

    /// Wrap a table as an [`Object`] handle.
    ///
    /// If a live handle already exists for this table, that handle is
    /// returned and no new root is taken.
    pub fn wrap_object(&self, table: Table, context: &Context) -> RuntimeResult<Object> {
        let address = Engine::address(&table);
        if let Some(existing) = self.state.objects.borrow().lookup(address) {
            return Ok(Object::from_inner(existing));
        }

        let private = self.state.engine.private(&table)?;
        let rooted = self.root(HandleKind::Object, mlua::Value::Table(table))?;
        let id = rooted.id();
        let object = Object::from_parts(rooted, context.clone(), private);
        self.state
            .objects
            .borrow_mut()
            .register(address, id, object.inner());
        Ok(object)
    }

    /// Wrap a table as an [`Array`] handle
    pub fn wrap_array(&self, table: Table, context: &Context) -> RuntimeResult<Array> {
        let rooted = self.root(HandleKind::Array, mlua::Value::Table(table))?;
        Ok(Array::from_parts(rooted, context.clone()))
    }

    /// Number of live object wrappers known to the identity map
    pub fn object_wrappers(&self) -> usize {
        self.state.objects.borrow().len()
    }
}
