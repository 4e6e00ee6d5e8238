//! Object handles
//!
//! There is at most one live [`Object`] per engine table: wrapping a table
//! that already has a live handle returns that handle. Callbacks defined on
//! an object are stored with the table itself, so they outlive the handle and
//! are found again when the table is wrapped later.

use std::any::Any;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};

use moor_core::{CoreError, mlua};

use crate::callback::{
    Accessor, FunctionCall, ObjectPrivate, accessor_dispatchers, function_dispatcher,
};
use crate::context::Context;
use crate::error::{RuntimeError, RuntimeResult};
use crate::handle::Rooted;
use crate::runtime::Runtime;
use crate::value::Value;
use crate::worker::EngineScope;

pub(crate) struct ObjectInner {
    rooted: Rooted,
    context: Context,
    private: OnceLock<ObjectPrivate>,
}

/// A rooted engine table with host-defined functions and properties
#[derive(Clone)]
pub struct Object(Arc<ObjectInner>);

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Object({:?})", self.0.rooted)
    }
}

impl Object {
    pub(crate) fn from_parts(
        rooted: Rooted,
        context: Context,
        private: Option<ObjectPrivate>,
    ) -> Self {
        let slot = OnceLock::new();
        if let Some(private) = private {
            let _ = slot.set(private);
        }
        Self(Arc::new(ObjectInner {
            rooted,
            context,
            private: slot,
        }))
    }

    pub(crate) fn from_inner(inner: Arc<ObjectInner>) -> Self {
        Self(inner)
    }

    pub(crate) fn inner(&self) -> &Arc<ObjectInner> {
        &self.0
    }

    pub(crate) fn rooted(&self) -> &Rooted {
        &self.0.rooted
    }

    pub fn context(&self) -> &Context {
        &self.0.context
    }

    pub fn runtime(&self) -> &Runtime {
        self.0.rooted.runtime()
    }

    /// True if both handles are the same wrapper
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Host data given to [`Context::new_object_with`], if it has type `T`
    pub fn host_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let host = self.0.private.get()?.host.clone()?;
        host.downcast::<T>().ok()
    }

    /// Private data for the table, created and attached on first use.
    /// Worker thread only.
    fn private(
        &self,
        scope: &EngineScope<'_>,
        table: &mlua::Table,
    ) -> RuntimeResult<ObjectPrivate> {
        if let Some(private) = self.0.private.get() {
            return Ok(private.clone());
        }
        let private = ObjectPrivate::default();
        scope.engine().set_private(table, private.clone())?;
        let _ = self.0.private.set(private.clone());
        Ok(private)
    }

    /// Read a property, running its getter if it has one
    pub fn get(&self, name: &str) -> RuntimeResult<Value> {
        let this = self.clone();
        let name = name.to_string();
        self.runtime().engine_call(move |scope| {
            let table = scope.resolve_table(this.rooted())?;
            let value = table
                .get::<mlua::Value>(name)
                .map_err(CoreError::from_script)?;
            scope.wrap_value(value, this.context())
        })
    }

    /// Write a property, running its setter if it has one
    pub fn set(&self, name: &str, value: &Value) -> RuntimeResult<()> {
        let this = self.clone();
        let name = name.to_string();
        let value = value.clone();
        self.runtime().engine_call(move |scope| {
            let table = scope.resolve_table(this.rooted())?;
            let value = scope.resolve(value.rooted())?;
            table.set(name, value).map_err(CoreError::from_script)?;
            Ok(())
        })
    }

    /// Define a host function as a field of this object
    pub fn define_function<F>(&self, name: &str, callback: F) -> RuntimeResult<()>
    where
        F: Fn(&mut FunctionCall) -> RuntimeResult<()> + Send + Sync + 'static,
    {
        let this = self.clone();
        let name = name.to_string();
        self.runtime().engine_call(move |scope| {
            let table = scope.resolve_table(this.rooted())?;
            let private = this.private(scope, &table)?;
            private.callbacks.define_function(&name, Arc::new(callback));

            let func = function_dispatcher(
                scope.lua(),
                private.callbacks.clone(),
                name.clone(),
                this.context().downgrade(),
            )?;
            table.raw_set(name, func)?;
            Ok(())
        })
    }

    /// Define a property backed by host accessors.
    ///
    /// Fails if the accessor has no getter, setter or initial value, if this
    /// object is an array, or if the table already carries a metatable that
    /// was not installed here. A context's global object accepts properties;
    /// other globals keep resolving to the standard library.
    pub fn define_property(&self, name: &str, mut accessor: Accessor) -> RuntimeResult<()> {
        if accessor.is_empty() {
            return Err(RuntimeError::property(format!(
                "property '{}' needs a getter, a setter or a value",
                name
            )));
        }

        let initial = accessor.take_value();
        let this = self.clone();
        let name = name.to_string();
        self.runtime().engine_call(move |scope| {
            let table = scope.resolve_table(this.rooted())?;
            if scope.engine().is_array(&table)? {
                return Err(RuntimeError::property(format!(
                    "cannot define property '{}' on an array",
                    name
                )));
            }

            let private = this.private(scope, &table)?;
            let callbacks = &private.callbacks;
            if !callbacks.accessors_installed.swap(true, Ordering::SeqCst) {
                let (index, newindex) = accessor_dispatchers(
                    scope.lua(),
                    callbacks.clone(),
                    this.context().downgrade(),
                )?;
                if let Err(e) = scope.engine().attach_accessors(&table, index, newindex) {
                    callbacks.accessors_installed.store(false, Ordering::SeqCst);
                    return Err(e.into());
                }
            }

            if let Some(initial) = initial {
                let value = scope.resolve(initial.rooted())?;
                scope.engine().store_property(&table, &name, value)?;
            }
            callbacks.define_accessor(&name, accessor);
            // A plain field would shadow the accessor.
            table.raw_set(name, mlua::Value::Nil)?;
            Ok(())
        })
    }

    /// A value handle for this object
    pub fn to_value(&self) -> RuntimeResult<Value> {
        let this = self.clone();
        self.runtime().engine_call(move |scope| {
            let value = scope.resolve(this.rooted())?;
            scope.wrap_value(value, this.context())
        })
    }
}
