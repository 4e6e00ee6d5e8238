//! Thread-bound engine wrapper
//!
//! [`Engine`] owns one Lua state together with the root set for every value
//! the host holds a handle to. It is `!Send`: all calls must come from the
//! thread that created it. `moor-runtime` provides the thread-safe layer on
//! top.

use std::cell::RefCell;

use mlua::{Function, Lua, Table, Value};
use tracing::trace;

use crate::error::{CoreError, CoreResult};
use crate::roots::{HandleId, RootSet, registry_root};

/// Lua-side helpers installed once per engine
const HELPERS: &str = r#"
local setmetatable, getmetatable, rawlen, next = setmetatable, getmetatable, rawlen, next

local helpers = {
    private = setmetatable({}, { __mode = "k" }),
    arrays = setmetatable({}, { __mode = "k" }),
    slots = setmetatable({}, { __mode = "k" }),
    environments = setmetatable({}, { __mode = "k" }),
}

function helpers.environment(global)
    local meta = { __index = global }
    local env = setmetatable({}, meta)
    helpers.environments[env] = meta
    return env
end

-- `index` returns whether it handled the key, then the value. Unhandled
-- keys of an environment fall through to the shared globals.
function helpers.attach(target, index, newindex)
    local meta = getmetatable(target)
    local fallback
    if meta ~= nil then
        if helpers.environments[target] ~= meta then
            return false
        end
        fallback = meta.__index
        helpers.environments[target] = nil
    end
    setmetatable(target, {
        __index = function(t, k)
            local handled, value = index(t, k)
            if handled or fallback == nil then
                return value
            end
            return fallback[k]
        end,
        __newindex = newindex,
        __metatable = false,
    })
    return true
end

function helpers.is_sequence(t)
    local n = rawlen(t)
    if n == 0 then
        return false
    end
    local count = 0
    for _ in next, t do
        count = count + 1
    end
    return count == n
end

return helpers
"#;

/// One Lua state plus its host root set
pub struct Engine {
    helpers: Table,
    roots: RefCell<RootSet>,
    lua: Lua,
}

impl Engine {
    /// Create an engine limited to `max_bytes` of memory (0 means unlimited)
    pub fn new(max_bytes: usize) -> CoreResult<Self> {
        let lua = Lua::new();
        if max_bytes > 0 {
            lua.set_memory_limit(max_bytes)?;
        }
        let helpers: Table = lua.load(HELPERS).set_name("=moor").call(())?;

        Ok(Self {
            helpers,
            roots: RefCell::new(RootSet::new()),
            lua,
        })
    }

    /// The underlying Lua state
    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// A fresh global environment. Writes stay in the environment; reads fall
    /// through to the shared standard library.
    pub fn new_environment(&self) -> CoreResult<Table> {
        let environment: Function = self.helpers.raw_get("environment")?;
        Ok(environment.call(self.lua.globals())?)
    }

    /// Compile `src` into a function that takes its environment as the only
    /// argument.
    ///
    /// Expressions are compiled so the function returns their value; anything
    /// else is compiled as a statement block. `first_line` shifts reported
    /// line numbers so they match the caller's file.
    pub fn compile(&self, src: &str, name: &str, first_line: u32) -> CoreResult<Function> {
        let padding = "\n".repeat(first_line.saturating_sub(1) as usize);
        let chunk_name = format!("={}", name);

        let expression = format!("{padding}local _ENV = ...; return {src}");
        if let Ok(func) = self
            .lua
            .load(expression)
            .set_name(chunk_name.clone())
            .into_function()
        {
            return Ok(func);
        }

        let block = format!("{padding}local _ENV = ...; {src}");
        self.lua
            .load(block)
            .set_name(chunk_name)
            .into_function()
            .map_err(CoreError::from_script)
    }

    /// Run a compiled function inside `env`, returning its first result
    pub fn execute(&self, func: &Function, env: &Table) -> CoreResult<Value> {
        func.call::<Value>(env.clone())
            .map_err(CoreError::from_script)
    }

    /// Compile and run `src` inside `env`
    pub fn eval_in(&self, env: &Table, src: &str, name: &str) -> CoreResult<Value> {
        let func = self.compile(src, name, 1)?;
        self.execute(&func, env)
    }

    /// Root `value` so the collector keeps it alive until [`Engine::unroot`]
    pub fn root(&self, value: Value) -> CoreResult<HandleId> {
        // Registering can run the collector (and finalizers), so the root set
        // is only borrowed once the key exists.
        let key = registry_root(&self.lua, value)?;
        let id = self.roots.borrow_mut().insert(key);
        trace!(id = %id, "rooted");
        Ok(id)
    }

    /// The value rooted under `id`
    pub fn resolve(&self, id: HandleId) -> CoreResult<Value> {
        self.roots.borrow().get(&self.lua, id)
    }

    /// Release the root held by `id`. Returns `false` if it was not rooted.
    pub fn unroot(&self, id: HandleId) -> bool {
        let key = self.roots.borrow_mut().remove(id);
        match key {
            Some(key) => {
                // Only fails for keys created by another state.
                let _ = self.lua.remove_registry_value(key);
                true
            }
            None => false,
        }
    }

    /// Number of live roots
    pub fn root_count(&self) -> usize {
        self.roots.borrow().len()
    }

    /// Attach host private data to `target`. The data lives as long as the
    /// table does.
    pub fn set_private<T: 'static>(&self, target: &Table, data: T) -> CoreResult<()> {
        let private: Table = self.helpers.raw_get("private")?;
        let userdata = self.lua.create_any_userdata(data)?;
        private.raw_set(target.clone(), userdata)?;
        Ok(())
    }

    /// Host private data previously attached to `target`
    pub fn private<T: Clone + 'static>(&self, target: &Table) -> CoreResult<Option<T>> {
        let private: Table = self.helpers.raw_get("private")?;
        match private.raw_get::<Value>(target.clone())? {
            Value::UserData(userdata) => Ok(Some((*userdata.borrow::<T>()?).clone())),
            _ => Ok(None),
        }
    }

    /// Value stored for accessor property `name` of `target`, nil if none
    pub fn stored_property(&self, target: &Table, name: &str) -> CoreResult<Value> {
        let slots: Table = self.helpers.raw_get("slots")?;
        match slots.raw_get::<Value>(target.clone())? {
            Value::Table(values) => Ok(values.raw_get(name)?),
            _ => Ok(Value::Nil),
        }
    }

    /// Store the value of accessor property `name` of `target`. Kept beside
    /// the table so the field itself stays empty and the metamethods fire.
    pub fn store_property(&self, target: &Table, name: &str, value: Value) -> CoreResult<()> {
        let slots: Table = self.helpers.raw_get("slots")?;
        let values = match slots.raw_get::<Value>(target.clone())? {
            Value::Table(values) => values,
            _ => {
                let values = self.lua.create_table()?;
                slots.raw_set(target.clone(), values.clone())?;
                values
            }
        };
        values.raw_set(name, value)?;
        Ok(())
    }

    /// Record that `target` was created as an array
    pub fn mark_array(&self, target: &Table) -> CoreResult<()> {
        let arrays: Table = self.helpers.raw_get("arrays")?;
        arrays.raw_set(target.clone(), true)?;
        Ok(())
    }

    /// True for tables created as arrays and for non-empty pure sequences
    pub fn is_array(&self, target: &Table) -> CoreResult<bool> {
        let arrays: Table = self.helpers.raw_get("arrays")?;
        if arrays.raw_get::<bool>(target.clone())? {
            return Ok(true);
        }
        let is_sequence: Function = self.helpers.raw_get("is_sequence")?;
        Ok(is_sequence.call(target.clone())?)
    }

    /// Install `index` / `newindex` metamethods on `target`.
    ///
    /// `index` returns `(handled, value)`; keys it does not handle read as
    /// nil, or from the shared globals when `target` is an environment.
    /// Fails with [`CoreError::ForeignMetatable`] if the table already has a
    /// metatable other than its environment metatable.
    pub fn attach_accessors(
        &self,
        target: &Table,
        index: Function,
        newindex: Function,
    ) -> CoreResult<()> {
        let attach: Function = self.helpers.raw_get("attach")?;
        if attach.call::<bool>((target.clone(), index, newindex))? {
            Ok(())
        } else {
            Err(CoreError::ForeignMetatable)
        }
    }

    /// Address identifying `target` for as long as it is alive
    pub fn address(target: &Table) -> usize {
        target.to_pointer() as usize
    }

    /// Run a full collection cycle
    pub fn collect_garbage(&self) -> CoreResult<()> {
        Ok(self.lua.gc_collect()?)
    }

    /// Bytes currently allocated by the engine
    pub fn used_memory(&self) -> usize {
        self.lua.used_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ReportKind;

    #[test]
    fn eval_expression_and_block() {
        let engine = Engine::new(0).unwrap();
        let env = engine.new_environment().unwrap();

        let value = engine.eval_in(&env, "1 + 2", "eval").unwrap();
        assert_eq!(value.as_integer(), Some(3));

        let value = engine.eval_in(&env, "x = 4\nreturn x * 2", "eval").unwrap();
        assert_eq!(value.as_integer(), Some(8));
    }

    #[test]
    fn environments_are_isolated() {
        let engine = Engine::new(0).unwrap();
        let a = engine.new_environment().unwrap();
        let b = engine.new_environment().unwrap();

        engine.eval_in(&a, "shared = 1", "a").unwrap();
        let seen = engine.eval_in(&b, "shared", "b").unwrap();
        assert!(seen.is_nil());

        // Standard library is visible everywhere.
        let len = engine.eval_in(&b, "string.len('abc')", "b").unwrap();
        assert_eq!(len.as_integer(), Some(3));
    }

    #[test]
    fn compiled_function_runs_in_any_environment() {
        let engine = Engine::new(0).unwrap();
        let a = engine.new_environment().unwrap();
        let b = engine.new_environment().unwrap();
        engine.eval_in(&a, "n = 1", "a").unwrap();
        engine.eval_in(&b, "n = 2", "b").unwrap();

        let func = engine.compile("n * 10", "script", 1).unwrap();
        assert_eq!(engine.execute(&func, &a).unwrap().as_integer(), Some(10));
        assert_eq!(engine.execute(&func, &b).unwrap().as_integer(), Some(20));
    }

    #[test]
    fn syntax_error_reports_shifted_line() {
        let engine = Engine::new(0).unwrap();
        let err = engine.compile("local = 1", "main.lua", 10).unwrap_err();
        let report = err.report().unwrap();
        assert_eq!(report.kind, ReportKind::Syntax);
        assert_eq!(report.file_name.as_deref(), Some("main.lua"));
        assert_eq!(report.line, Some(10));
    }

    #[test]
    fn runtime_error_is_reported() {
        let engine = Engine::new(0).unwrap();
        let env = engine.new_environment().unwrap();
        let err = engine.eval_in(&env, "error('boom')", "eval").unwrap_err();
        let report = err.report().unwrap();
        assert_eq!(report.kind, ReportKind::Runtime);
        assert_eq!(report.line, Some(1));
        assert_eq!(report.message, "boom");
    }

    #[test]
    fn roots_survive_collection() {
        let engine = Engine::new(0).unwrap();
        let table = engine.lua().create_table().unwrap();
        table.raw_set("k", 5).unwrap();
        let id = engine.root(Value::Table(table)).unwrap();

        engine.collect_garbage().unwrap();
        let Value::Table(back) = engine.resolve(id).unwrap() else {
            panic!("expected table");
        };
        assert_eq!(back.raw_get::<i64>("k").unwrap(), 5);

        assert!(engine.unroot(id));
        assert!(!engine.unroot(id));
        assert_eq!(engine.root_count(), 0);
    }

    #[test]
    fn private_data_roundtrip() {
        let engine = Engine::new(0).unwrap();
        let table = engine.lua().create_table().unwrap();
        assert_eq!(engine.private::<String>(&table).unwrap(), None);

        engine.set_private(&table, "host".to_string()).unwrap();
        assert_eq!(
            engine.private::<String>(&table).unwrap().as_deref(),
            Some("host")
        );
    }

    #[test]
    fn array_detection() {
        let engine = Engine::new(0).unwrap();
        let env = engine.new_environment().unwrap();

        let Value::Table(seq) = engine.eval_in(&env, "{1, 2, 3}", "eval").unwrap() else {
            panic!("expected table");
        };
        assert!(engine.is_array(&seq).unwrap());

        let Value::Table(map) = engine.eval_in(&env, "{1, a = 2}", "eval").unwrap() else {
            panic!("expected table");
        };
        assert!(!engine.is_array(&map).unwrap());

        let empty = engine.lua().create_table().unwrap();
        assert!(!engine.is_array(&empty).unwrap());
        engine.mark_array(&empty).unwrap();
        assert!(engine.is_array(&empty).unwrap());
    }

    #[test]
    fn stored_properties_stay_off_the_table() {
        let engine = Engine::new(0).unwrap();
        let table = engine.lua().create_table().unwrap();
        assert!(engine.stored_property(&table, "abc").unwrap().is_nil());

        engine
            .store_property(&table, "abc", Value::Integer(123))
            .unwrap();
        assert_eq!(
            engine.stored_property(&table, "abc").unwrap().as_integer(),
            Some(123)
        );
        assert!(table.raw_get::<Value>("abc").unwrap().is_nil());
    }

    #[test]
    fn accessors_refuse_foreign_metatable() {
        let engine = Engine::new(0).unwrap();
        let env = engine.new_environment().unwrap();
        let Value::Table(target) = engine
            .eval_in(&env, "setmetatable({}, {})", "eval")
            .unwrap()
        else {
            panic!("expected table");
        };
        let noop = engine.lua().create_function(|_, ()| Ok(())).unwrap();
        let err = engine
            .attach_accessors(&target, noop.clone(), noop)
            .unwrap_err();
        assert!(matches!(err, CoreError::ForeignMetatable));
    }

    #[test]
    fn accessors_chain_onto_environment() {
        let engine = Engine::new(0).unwrap();
        let env = engine.new_environment().unwrap();
        let index = engine
            .lua()
            .create_function(|_, (_, key): (Table, String)| {
                Ok(match key.as_str() {
                    "answer" => (true, Value::Integer(42)),
                    _ => (false, Value::Nil),
                })
            })
            .unwrap();
        let newindex = engine
            .lua()
            .create_function(|_, (t, k, v): (Table, Value, Value)| t.raw_set(k, v))
            .unwrap();
        engine.attach_accessors(&env, index.clone(), newindex.clone()).unwrap();

        let value = engine.eval_in(&env, "answer + math.max(1, 2)", "eval").unwrap();
        assert_eq!(value.as_integer(), Some(44));
        engine.eval_in(&env, "local_only = 7", "eval").unwrap();
        assert_eq!(env.raw_get::<i64>("local_only").unwrap(), 7);

        // The environment metatable is now protected.
        let err = engine.attach_accessors(&env, index, newindex).unwrap_err();
        assert!(matches!(err, CoreError::ForeignMetatable));
    }

    #[test]
    fn memory_limit_is_enforced() {
        let engine = Engine::new(256 * 1024).unwrap();
        let env = engine.new_environment().unwrap();
        let err = engine
            .eval_in(&env, "local t = {} for i = 1, 1e7 do t[i] = i end", "eval")
            .unwrap_err();
        assert_eq!(err.report().unwrap().kind, ReportKind::Memory);
    }
}
