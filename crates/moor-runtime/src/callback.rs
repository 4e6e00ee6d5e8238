//! Host callbacks reachable from scripts
//!
//! Host functions and property accessors are kept in a [`CallbackTable`]
//! keyed by name, one per context and one per object. The engine only ever
//! sees small dispatcher functions that capture the table, the name and a
//! weak reference to the owning context; at call time they look the closure
//! up, wrap the arguments as handles, run it, and translate its outcome back
//! into an engine result.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};

use moor_core::mlua;
use parking_lot::Mutex;

use crate::context::{Context, ContextInner};
use crate::error::{RuntimeError, RuntimeResult};
use crate::object::Object;
use crate::value::Value;
use crate::worker::{self, EngineScope};

/// A host function callable from scripts
pub type HostFunction = Arc<dyn Fn(&mut FunctionCall) -> RuntimeResult<()> + Send + Sync>;

/// Property getter: receives the object being read
pub type Getter = Arc<dyn Fn(&Object) -> RuntimeResult<Value> + Send + Sync>;

/// Property setter: receives the object being written and the new value
pub type Setter = Arc<dyn Fn(&Object, Value) -> RuntimeResult<()> + Send + Sync>;

/// Getter, setter and initial value for one property.
///
/// Reads run the getter, or return the stored value when there is none.
/// Writes run the setter, or replace the stored value when the property has
/// neither a getter nor the read-only flag.
#[derive(Clone, Default)]
pub struct Accessor {
    getter: Option<Getter>,
    setter: Option<Setter>,
    value: Option<Value>,
    read_only: bool,
}

impl Accessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn getter<F>(mut self, getter: F) -> Self
    where
        F: Fn(&Object) -> RuntimeResult<Value> + Send + Sync + 'static,
    {
        self.getter = Some(Arc::new(getter));
        self
    }

    pub fn setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(&Object, Value) -> RuntimeResult<()> + Send + Sync + 'static,
    {
        self.setter = Some(Arc::new(setter));
        self
    }

    /// Initial stored value of the property
    pub fn value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Reject every write from scripts, even when a setter is set
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.getter.is_none() && self.setter.is_none() && self.value.is_none()
    }

    /// Move the initial value out; the engine keeps its own copy
    pub(crate) fn take_value(&mut self) -> Option<Value> {
        self.value.take()
    }
}

enum Callback {
    Function(HostFunction),
    Accessor(Accessor),
}

/// Named host closures for one context or object
#[derive(Default)]
pub(crate) struct CallbackTable {
    entries: Mutex<HashMap<String, Callback>>,
    /// Set once the accessor metamethods are installed on the object
    pub(crate) accessors_installed: AtomicBool,
}

impl CallbackTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn define_function(&self, name: &str, function: HostFunction) {
        self.entries
            .lock()
            .insert(name.to_string(), Callback::Function(function));
    }

    pub(crate) fn define_accessor(&self, name: &str, accessor: Accessor) {
        self.entries
            .lock()
            .insert(name.to_string(), Callback::Accessor(accessor));
    }

    fn function(&self, name: &str) -> Option<HostFunction> {
        match self.entries.lock().get(name) {
            Some(Callback::Function(function)) => Some(function.clone()),
            _ => None,
        }
    }

    fn accessor(&self, name: &str) -> Option<Accessor> {
        match self.entries.lock().get(name) {
            Some(Callback::Accessor(accessor)) => Some(accessor.clone()),
            _ => None,
        }
    }
}

/// Private data attached to an engine table on behalf of its object handle.
/// Survives the handle, so re-wrapping the table finds the same callbacks.
#[derive(Clone, Default)]
pub(crate) struct ObjectPrivate {
    pub(crate) callbacks: Arc<CallbackTable>,
    pub(crate) host: Option<Arc<dyn Any + Send + Sync>>,
}

impl ObjectPrivate {
    pub(crate) fn with_host(host: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            callbacks: Arc::new(CallbackTable::new()),
            host: Some(host),
        }
    }
}

/// One invocation of a host function
pub struct FunctionCall {
    context: Context,
    name: String,
    args: Vec<Value>,
    result: Option<Value>,
}

impl FunctionCall {
    /// The context the function was defined in
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// The name the function was defined under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of arguments passed by the script
    pub fn argc(&self) -> usize {
        self.args.len()
    }

    /// Argument `n`, or `None` if the script passed fewer
    pub fn arg(&self, n: usize) -> Option<&Value> {
        self.args.get(n)
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Set the value returned to the script. Only the first call counts.
    pub fn ret(&mut self, value: Value) -> RuntimeResult<()> {
        if self.result.is_some() {
            return Err(RuntimeError::ResultAlreadySet);
        }
        self.result = Some(value);
        Ok(())
    }

    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }
}

/// Run `f` against the engine from inside a dispatcher. Dispatchers only
/// run on the worker thread, in the middle of a unit of work.
fn with_scope<T>(
    context: &Context,
    f: impl FnOnce(&EngineScope<'_>) -> RuntimeResult<T>,
) -> mlua::Result<T> {
    let state = worker::current().ok_or_else(shutting_down)?;
    let scope = EngineScope::new(&state, context.runtime());
    f(&scope).map_err(mlua::Error::external)
}

fn shutting_down() -> mlua::Error {
    mlua::Error::runtime("engine is shutting down")
}

fn stored_property(target: &mlua::Table, name: &str) -> mlua::Result<mlua::Value> {
    worker::with_current_engine(|engine| engine.stored_property(target, name))
        .ok_or_else(shutting_down)?
        .map_err(mlua::Error::external)
}

fn store_property(target: &mlua::Table, name: &str, value: mlua::Value) -> mlua::Result<()> {
    worker::with_current_engine(|engine| engine.store_property(target, name, value))
        .ok_or_else(shutting_down)?
        .map_err(mlua::Error::external)
}

fn read_only(name: &str) -> mlua::Error {
    mlua::Error::runtime(format!("property '{}' is read-only", name))
}

fn live_context(context: &Weak<ContextInner>, name: &str) -> mlua::Result<Context> {
    Context::upgrade(context).ok_or_else(|| {
        mlua::Error::runtime(format!("context of host callback '{}' was released", name))
    })
}

fn property_name(key: &mlua::Value) -> Option<String> {
    match key {
        mlua::Value::String(s) => Some(s.to_string_lossy()),
        _ => None,
    }
}

/// Engine function that dispatches to the host function `name` in `table`
pub(crate) fn function_dispatcher(
    lua: &mlua::Lua,
    table: Arc<CallbackTable>,
    name: String,
    context: Weak<ContextInner>,
) -> mlua::Result<mlua::Function> {
    lua.create_function(move |_, args: mlua::MultiValue| {
        let function = table.function(&name).ok_or_else(|| {
            mlua::Error::runtime(format!("host function '{}' is not defined", name))
        })?;
        let context = live_context(&context, &name)?;

        let args = with_scope(&context, |scope| {
            args.into_iter()
                .map(|arg| scope.wrap_value(arg, &context))
                .collect::<RuntimeResult<Vec<_>>>()
        })?;
        let mut call = FunctionCall {
            context: context.clone(),
            name: name.clone(),
            args,
            result: None,
        };

        function(&mut call).map_err(mlua::Error::external)?;

        match call.result.take() {
            Some(value) => with_scope(&context, |scope| scope.resolve(value.rooted())),
            None => Err(mlua::Error::runtime(format!(
                "host function '{}' produced no result",
                name
            ))),
        }
    })
}

/// `__index` / `__newindex` metamethods dispatching to the accessors in
/// `table`. `__index` returns `(handled, value)`; keys without an accessor
/// are left to the engine.
pub(crate) fn accessor_dispatchers(
    lua: &mlua::Lua,
    table: Arc<CallbackTable>,
    context: Weak<ContextInner>,
) -> mlua::Result<(mlua::Function, mlua::Function)> {
    let index = {
        let table = table.clone();
        let context = context.clone();
        lua.create_function(move |_, (target, key): (mlua::Table, mlua::Value)| {
            let accessor = property_name(&key)
                .and_then(|name| table.accessor(&name).map(|accessor| (name, accessor)));
            let Some((name, accessor)) = accessor else {
                return Ok((false, mlua::Value::Nil));
            };
            let Some(getter) = accessor.getter else {
                return Ok((true, stored_property(&target, &name)?));
            };
            let context = live_context(&context, &name)?;

            let object = with_scope(&context, |scope| scope.wrap_object(target, &context))?;
            let value = getter(&object).map_err(mlua::Error::external)?;
            let value = with_scope(&context, |scope| scope.resolve(value.rooted()))?;
            Ok((true, value))
        })?
    };

    let newindex = lua.create_function(
        move |_, (target, key, value): (mlua::Table, mlua::Value, mlua::Value)| {
            let name = property_name(&key);
            let accessor = name.as_deref().and_then(|name| table.accessor(name));
            let (Some(name), Some(accessor)) = (name, accessor) else {
                return target.raw_set(key, value);
            };
            if accessor.read_only {
                return Err(read_only(&name));
            }
            let Some(setter) = accessor.setter else {
                if accessor.getter.is_some() {
                    return Err(read_only(&name));
                }
                return store_property(&target, &name, value);
            };
            let context = live_context(&context, &name)?;

            let (object, value) = with_scope(&context, |scope| {
                Ok((
                    scope.wrap_object(target, &context)?,
                    scope.wrap_value(value, &context)?,
                ))
            })?;
            setter(&object, value).map_err(mlua::Error::external)
        },
    )?;

    Ok((index, newindex))
}
