//! Per-kind dispose queues
//!
//! Dropping a handle off the worker thread posts its id here; only the worker
//! drains the queues and releases the roots. Queues are bounded, and a full
//! queue blocks the dropping thread rather than losing the request.

use crossbeam_channel::{Receiver, Sender, bounded};
use moor_core::{HandleId, HandleKind};

/// Sending half, owned by the runtime
pub(crate) struct DisposeQueues {
    senders: [Sender<HandleId>; HandleKind::COUNT],
}

/// Receiving half, owned by the worker
pub(crate) struct DisposeReceivers {
    receivers: [Receiver<HandleId>; HandleKind::COUNT],
}

pub(crate) fn dispose_queues(capacity: usize) -> (DisposeQueues, DisposeReceivers) {
    let pairs = HandleKind::ALL.map(|_| bounded::<HandleId>(capacity));
    let senders = pairs.clone().map(|(tx, _)| tx);
    let receivers = pairs.map(|(_, rx)| rx);
    (DisposeQueues { senders }, DisposeReceivers { receivers })
}

impl DisposeQueues {
    /// Post a release request, blocking while the queue is full.
    ///
    /// Returns `false` once the worker has gone away.
    pub(crate) fn post(&self, kind: HandleKind, id: HandleId) -> bool {
        self.senders[kind.index()].send(id).is_ok()
    }

    /// Requests posted but not yet taken by the worker
    pub(crate) fn pending(&self) -> usize {
        self.senders.iter().map(Sender::len).sum()
    }
}

impl DisposeReceivers {
    pub(crate) fn get(&self, kind: HandleKind) -> &Receiver<HandleId> {
        &self.receivers[kind.index()]
    }

    /// Take everything currently queued, across all kinds
    pub(crate) fn drain(&self) -> Vec<(HandleKind, HandleId)> {
        HandleKind::ALL
            .iter()
            .flat_map(|&kind| self.get(kind).try_iter().map(move |id| (kind, id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queues_are_separate_per_kind() {
        let (queues, receivers) = dispose_queues(4);
        assert!(queues.post(HandleKind::Object, HandleId(1)));
        assert!(queues.post(HandleKind::Script, HandleId(2)));
        assert_eq!(queues.pending(), 2);

        assert!(receivers.get(HandleKind::Value).is_empty());
        assert_eq!(receivers.get(HandleKind::Object).len(), 1);

        let drained = receivers.drain();
        assert_eq!(
            drained,
            vec![
                (HandleKind::Object, HandleId(1)),
                (HandleKind::Script, HandleId(2))
            ]
        );
        assert_eq!(queues.pending(), 0);
    }

    #[test]
    fn post_fails_after_worker_exit() {
        let (queues, receivers) = dispose_queues(1);
        drop(receivers);
        assert!(!queues.post(HandleKind::Value, HandleId(1)));
    }
}
