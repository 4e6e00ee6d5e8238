//! Native object to host wrapper identity map
//!
//! Wrapping the same engine table twice must hand back the same wrapper
//! while that wrapper is alive, so per-object callback state stays attached
//! to one place. Entries hold only a `Weak` reference; the map never keeps a
//! wrapper alive by itself.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::roots::HandleId;

pub struct IdentityMap<W> {
    by_ptr: HashMap<usize, (HandleId, Weak<W>)>,
    by_id: HashMap<HandleId, usize>,
}

impl<W> Default for IdentityMap<W> {
    fn default() -> Self {
        Self {
            by_ptr: HashMap::new(),
            by_id: HashMap::new(),
        }
    }
}

impl<W> IdentityMap<W> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live wrapper registered for the native address, if any
    pub fn lookup(&self, ptr: usize) -> Option<Arc<W>> {
        self.by_ptr.get(&ptr).and_then(|(_, weak)| weak.upgrade())
    }

    /// Register `wrapper` (rooted as `id`) for the native address.
    ///
    /// A stale entry for the same address (its wrapper already dropped but its
    /// root not yet released) is replaced.
    pub fn register(&mut self, ptr: usize, id: HandleId, wrapper: &Arc<W>) {
        if let Some((old_id, _)) = self.by_ptr.insert(ptr, (id, Arc::downgrade(wrapper))) {
            self.by_id.remove(&old_id);
        }
        self.by_id.insert(id, ptr);
    }

    /// Drop the entry owned by `id`. Entries re-registered under a newer id
    /// are left alone.
    pub fn forget(&mut self, id: HandleId) {
        if let Some(ptr) = self.by_id.remove(&id)
            && self.by_ptr.get(&ptr).is_some_and(|(owner, _)| *owner == id)
        {
            self.by_ptr.remove(&ptr);
        }
    }

    pub fn len(&self) -> usize {
        self.by_ptr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ptr.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_ptr.clear();
        self.by_id.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_returns_same_wrapper() {
        let mut map = IdentityMap::new();
        let wrapper = Arc::new("obj");
        map.register(0x10, HandleId(1), &wrapper);

        let found = map.lookup(0x10).unwrap();
        assert!(Arc::ptr_eq(&found, &wrapper));
        assert!(map.lookup(0x20).is_none());
    }

    #[test]
    fn dead_wrapper_is_not_returned() {
        let mut map = IdentityMap::new();
        let wrapper = Arc::new(7u32);
        map.register(0x10, HandleId(1), &wrapper);
        drop(wrapper);
        assert!(map.lookup(0x10).is_none());
    }

    #[test]
    fn forget_ignores_superseded_ids() {
        let mut map = IdentityMap::new();
        let first = Arc::new(1u32);
        map.register(0x10, HandleId(1), &first);
        drop(first);

        let second = Arc::new(2u32);
        map.register(0x10, HandleId(2), &second);

        // Releasing the first root must not unlink the second wrapper.
        map.forget(HandleId(1));
        assert_eq!(map.lookup(0x10).as_deref(), Some(&2));

        map.forget(HandleId(2));
        assert!(map.is_empty());
    }
}
