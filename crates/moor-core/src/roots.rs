//! Explicit root tracking for values referenced from the host
//!
//! Every value the host holds a handle to is stored in the Lua registry under
//! a [`HandleId`], which keeps the engine's collector from reclaiming it.
//! Unrooting removes the registry entry; the value becomes collectable again
//! once nothing inside the engine references it.

use std::collections::HashMap;
use std::fmt;

use mlua::{Lua, RegistryKey};

use crate::error::{CoreError, CoreResult};

/// Root `value` in the registry of `lua`
pub fn registry_root(lua: &Lua, value: mlua::Value) -> CoreResult<RegistryKey> {
    lua.create_registry_value(value)
        .map_err(|e| CoreError::RootFailed(e.to_string()))
}

/// The five kinds of handle the host can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Value,
    Object,
    Array,
    Script,
    Context,
}

impl HandleKind {
    /// Number of handle kinds
    pub const COUNT: usize = 5;

    /// All kinds, in queue order
    pub const ALL: [HandleKind; Self::COUNT] = [
        HandleKind::Value,
        HandleKind::Object,
        HandleKind::Array,
        HandleKind::Script,
        HandleKind::Context,
    ];

    /// Position of this kind in [`HandleKind::ALL`]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Object => "object",
            Self::Array => "array",
            Self::Script => "script",
            Self::Context => "context",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifier of one rooted value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registry-backed root set
#[derive(Default)]
pub struct RootSet {
    next_id: u64,
    roots: HashMap<HandleId, RegistryKey>,
}

impl RootSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a registry key and return the id that now owns the root
    pub fn insert(&mut self, key: RegistryKey) -> HandleId {
        self.next_id += 1;
        let id = HandleId(self.next_id);
        self.roots.insert(id, key);
        id
    }

    /// Fetch the rooted value
    pub fn get(&self, lua: &Lua, id: HandleId) -> CoreResult<mlua::Value> {
        let key = self.roots.get(&id).ok_or(CoreError::UnknownHandle(id))?;
        Ok(lua.registry_value(key)?)
    }

    /// Stop tracking `id`, handing back its registry key for removal.
    /// Returns `None` if `id` was not rooted.
    pub fn remove(&mut self, id: HandleId) -> Option<RegistryKey> {
        self.roots.remove(&id)
    }

    pub fn contains(&self, id: HandleId) -> bool {
        self.roots.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_and_remove() {
        let lua = Lua::new();
        let mut roots = RootSet::new();

        let key = registry_root(&lua, mlua::Value::Integer(42)).unwrap();
        let id = roots.insert(key);
        assert!(roots.contains(id));
        assert_eq!(roots.len(), 1);
        assert_eq!(roots.get(&lua, id).unwrap().as_integer(), Some(42));

        assert!(roots.remove(id).is_some());
        assert!(!roots.contains(id));
        assert!(roots.remove(id).is_none(), "second removal must be reported");
        assert!(roots.is_empty());
        assert!(matches!(
            roots.get(&lua, id),
            Err(CoreError::UnknownHandle(_))
        ));
    }

    #[test]
    fn ids_are_not_reused() {
        let lua = Lua::new();
        let mut roots = RootSet::new();
        let a = roots.insert(registry_root(&lua, mlua::Value::Nil).unwrap());
        roots.remove(a);
        let b = roots.insert(registry_root(&lua, mlua::Value::Nil).unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn kind_indices_match_order() {
        for (i, kind) in HandleKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }
}
