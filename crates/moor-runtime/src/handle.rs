//! Root ownership shared by every handle kind
//!
//! A [`Rooted`] is created on the worker right after its value was rooted and
//! owns that root until it is dropped. Dropping never touches the engine:
//! off the worker it posts the id to the kind's dispose queue, on the worker
//! it defers the release until the current unit of work returns.

use moor_core::{HandleId, HandleKind};
use tracing::trace;

use crate::runtime::Runtime;
use crate::stats::RuntimeStats;
use crate::worker;

pub(crate) struct Rooted {
    runtime: Runtime,
    kind: HandleKind,
    id: HandleId,
}

impl Rooted {
    /// Must only be called with an id freshly returned by `Engine::root`.
    pub(crate) fn new(runtime: Runtime, kind: HandleKind, id: HandleId) -> Self {
        Self { runtime, kind, id }
    }

    pub(crate) fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub(crate) fn id(&self) -> HandleId {
        self.id
    }
}

impl std::fmt::Debug for Rooted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

impl Drop for Rooted {
    fn drop(&mut self) {
        let shared = self.runtime.shared();
        RuntimeStats::bump(&shared.stats.dispose_requests);

        if shared.on_worker_thread() {
            if !worker::defer_release(self.kind, self.id) {
                trace!(kind = %self.kind, id = %self.id, "engine already torn down");
            }
        } else if !shared.dispose.post(self.kind, self.id) {
            trace!(kind = %self.kind, id = %self.id, "worker gone, release skipped");
        }
    }
}
