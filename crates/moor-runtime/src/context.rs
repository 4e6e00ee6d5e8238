//! Script contexts
//!
//! A [`Context`] is an isolated global environment inside a runtime. Globals
//! written by its scripts stay in the context; reads fall through to the
//! shared standard library. Host functions defined on a context are visible
//! as globals to every script run in it.

use std::any::Any;
use std::sync::{Arc, Weak};

use moor_core::mlua;
use moor_core::{CoreError, ErrorReport, HandleKind};
use parking_lot::Mutex;
use tracing::debug;

use crate::array::Array;
use crate::callback::{CallbackTable, FunctionCall, ObjectPrivate, function_dispatcher};
use crate::error::{RuntimeError, RuntimeResult};
use crate::handle::Rooted;
use crate::object::Object;
use crate::runtime::Runtime;
use crate::script::Script;
use crate::value::Value;

/// Receives a structured report for every failed eval, compile or execute
pub type ErrorReporter = Arc<dyn Fn(&ErrorReport) + Send + Sync>;

pub(crate) struct ContextInner {
    rooted: Rooted,
    callbacks: Arc<CallbackTable>,
    reporter: Mutex<Option<ErrorReporter>>,
}

/// An isolated global environment
#[derive(Clone)]
pub struct Context(Arc<ContextInner>);

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Context({:?})", self.0.rooted)
    }
}

impl Context {
    pub(crate) fn from_rooted(rooted: Rooted) -> Self {
        Self(Arc::new(ContextInner {
            rooted,
            callbacks: Arc::new(CallbackTable::new()),
            reporter: Mutex::new(None),
        }))
    }

    pub(crate) fn rooted(&self) -> &Rooted {
        &self.0.rooted
    }

    pub(crate) fn downgrade(&self) -> Weak<ContextInner> {
        Arc::downgrade(&self.0)
    }

    pub(crate) fn upgrade(weak: &Weak<ContextInner>) -> Option<Self> {
        weak.upgrade().map(Self)
    }

    pub fn runtime(&self) -> &Runtime {
        self.0.rooted.runtime()
    }

    /// True if both handles refer to the same context
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Install the error reporter, replacing any previous one
    pub fn set_error_reporter<F>(&self, reporter: F)
    where
        F: Fn(&ErrorReport) + Send + Sync + 'static,
    {
        *self.0.reporter.lock() = Some(Arc::new(reporter));
    }

    /// Remove the error reporter
    pub fn clear_error_reporter(&self) {
        *self.0.reporter.lock() = None;
    }

    /// Hand a failed script result to the error reporter, then pass it on
    pub(crate) fn report_failure<T>(&self, result: RuntimeResult<T>) -> RuntimeResult<T> {
        if let Err(err) = &result
            && let Some(report) = err.report()
        {
            let reporter = self.0.reporter.lock().clone();
            match reporter {
                Some(reporter) => reporter(report),
                None => debug!(%report, "Script failed with no error reporter"),
            }
        }
        result
    }

    /// Compile and run `src` in this context.
    ///
    /// Expressions evaluate to their value; statement blocks evaluate to
    /// whatever they `return` (nil otherwise).
    pub fn eval(&self, src: &str) -> RuntimeResult<Value> {
        let ctx = self.clone();
        let src = src.to_string();
        let result = self.runtime().engine_call(move |scope| {
            let env = scope.resolve_table(ctx.rooted())?;
            let value = scope.engine().eval_in(&env, &src, "eval")?;
            scope.wrap_value(value, &ctx)
        });
        self.report_failure(result)
    }

    /// Compile `code` once for repeated execution. `line` is the line number
    /// of the first line of `code` within `file_name`.
    pub fn compile(&self, code: &str, file_name: &str, line: u32) -> RuntimeResult<Script> {
        let ctx = self.clone();
        let code = code.to_string();
        let file_name = file_name.to_string();
        let result = self.runtime().engine_call(move |scope| {
            let func = scope.engine().compile(&code, &file_name, line)?;
            let rooted = scope.root(HandleKind::Script, mlua::Value::Function(func))?;
            Ok(Script::from_parts(rooted, ctx))
        });
        self.report_failure(result)
    }

    /// Define a global host function visible to scripts in this context.
    ///
    /// The function is bound to this context: once every handle to the
    /// context (and to objects or values made from it) is dropped, calling
    /// it fails with a "was released" error, even from another context the
    /// function value was copied into. Keep a [`Context`] alive for as long
    /// as its functions are meant to be callable.
    pub fn define_function<F>(&self, name: &str, callback: F) -> RuntimeResult<()>
    where
        F: Fn(&mut FunctionCall) -> RuntimeResult<()> + Send + Sync + 'static,
    {
        self.0.callbacks.define_function(name, Arc::new(callback));
        let ctx = self.clone();
        let name = name.to_string();
        self.runtime().engine_call(move |scope| {
            let env = scope.resolve_table(ctx.rooted())?;
            let func = function_dispatcher(
                scope.lua(),
                ctx.0.callbacks.clone(),
                name.clone(),
                ctx.downgrade(),
            )?;
            env.raw_set(name, func)?;
            Ok(())
        })
    }

    /// The context's global environment as an object
    pub fn global(&self) -> RuntimeResult<Object> {
        let ctx = self.clone();
        self.runtime().engine_call(move |scope| {
            let env = scope.resolve_table(ctx.rooted())?;
            scope.wrap_object(env, &ctx)
        })
    }

    /// Set a global in this context
    pub fn set_global(&self, name: &str, value: &Value) -> RuntimeResult<()> {
        let ctx = self.clone();
        let name = name.to_string();
        let value = value.clone();
        self.runtime().engine_call(move |scope| {
            let env = scope.resolve_table(ctx.rooted())?;
            let value = scope.resolve(value.rooted())?;
            env.set(name, value).map_err(CoreError::from_script)?;
            Ok(())
        })
    }

    /// Read a global, falling through to the standard library
    pub fn get_global(&self, name: &str) -> RuntimeResult<Value> {
        let ctx = self.clone();
        let name = name.to_string();
        self.runtime().engine_call(move |scope| {
            let env = scope.resolve_table(ctx.rooted())?;
            let value: mlua::Value = env.get(name).map_err(CoreError::from_script)?;
            scope.wrap_value(value, &ctx)
        })
    }

    fn make_value<F>(&self, make: F) -> RuntimeResult<Value>
    where
        F: FnOnce(&mlua::Lua) -> mlua::Result<mlua::Value> + Send + 'static,
    {
        let ctx = self.clone();
        self.runtime().engine_call(move |scope| {
            let value = make(scope.lua())?;
            scope.wrap_value(value, &ctx)
        })
    }

    pub fn nil(&self) -> RuntimeResult<Value> {
        self.make_value(|_| Ok(mlua::Value::Nil))
    }

    pub fn boolean(&self, b: bool) -> RuntimeResult<Value> {
        self.make_value(move |_| Ok(mlua::Value::Boolean(b)))
    }

    pub fn integer(&self, i: i64) -> RuntimeResult<Value> {
        self.make_value(move |_| Ok(mlua::Value::Integer(i)))
    }

    pub fn number(&self, n: f64) -> RuntimeResult<Value> {
        self.make_value(move |_| Ok(mlua::Value::Number(n)))
    }

    pub fn string(&self, s: &str) -> RuntimeResult<Value> {
        let s = s.to_string();
        self.make_value(move |lua| lua.create_string(&s).map(mlua::Value::String))
    }

    /// Create an empty object
    pub fn new_object(&self) -> RuntimeResult<Object> {
        let ctx = self.clone();
        self.runtime().engine_call(move |scope| {
            let table = scope.lua().create_table()?;
            scope.wrap_object(table, &ctx)
        })
    }

    /// Create an empty object carrying host data, retrievable with
    /// [`Object::host_data`] from any handle to the same object
    pub fn new_object_with<T>(&self, data: T) -> RuntimeResult<Object>
    where
        T: Any + Send + Sync,
    {
        let ctx = self.clone();
        let private = ObjectPrivate::with_host(Arc::new(data));
        self.runtime().engine_call(move |scope| {
            let table = scope.lua().create_table()?;
            scope.engine().set_private(&table, private)?;
            scope.wrap_object(table, &ctx)
        })
    }

    /// Create an empty array
    pub fn new_array(&self) -> RuntimeResult<Array> {
        let ctx = self.clone();
        self.runtime().engine_call(move |scope| {
            let table = scope.lua().create_table()?;
            scope.engine().mark_array(&table)?;
            scope.wrap_array(table, &ctx)
        })
    }

    pub(crate) fn ensure_same_runtime(&self, other: &Context) -> RuntimeResult<()> {
        if self.runtime().ptr_eq(other.runtime()) {
            Ok(())
        } else {
            Err(RuntimeError::callback("context belongs to a different runtime"))
        }
    }
}
