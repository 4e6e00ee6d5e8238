//! Array handles
//!
//! Host-side indices are 0-based; the engine stores element `i` at key
//! `i + 1`.

use std::sync::Arc;

use moor_core::mlua;

use crate::context::Context;
use crate::error::{RuntimeError, RuntimeResult};
use crate::handle::Rooted;
use crate::runtime::Runtime;
use crate::value::Value;

struct ArrayInner {
    rooted: Rooted,
    context: Context,
}

/// A rooted engine sequence
#[derive(Clone)]
pub struct Array(Arc<ArrayInner>);

impl std::fmt::Debug for Array {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Array({:?})", self.0.rooted)
    }
}

impl Array {
    pub(crate) fn from_parts(rooted: Rooted, context: Context) -> Self {
        Self(Arc::new(ArrayInner { rooted, context }))
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

    pub fn len(&self) -> RuntimeResult<usize> {
        let this = self.clone();
        self.runtime().engine_call(move |scope| {
            Ok(scope.resolve_table(this.rooted())?.raw_len())
        })
    }

    pub fn is_empty(&self) -> RuntimeResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Element `index`; nil past the end
    pub fn get(&self, index: usize) -> RuntimeResult<Value> {
        let this = self.clone();
        self.runtime().engine_call(move |scope| {
            let table = scope.resolve_table(this.rooted())?;
            let value = match index.checked_add(1) {
                Some(key) => table.raw_get(key)?,
                None => mlua::Value::Nil,
            };
            scope.wrap_value(value, this.context())
        })
    }

    /// Replace element `index`, or append when `index == len`
    pub fn set(&self, index: usize, value: &Value) -> RuntimeResult<()> {
        let this = self.clone();
        let value = value.clone();
        self.runtime().engine_call(move |scope| {
            let table = scope.resolve_table(this.rooted())?;
            let len = table.raw_len();
            let key = index
                .checked_add(1)
                .filter(|_| index <= len)
                .ok_or_else(|| {
                    RuntimeError::property(format!(
                        "index {} out of bounds for array of length {}",
                        index, len
                    ))
                })?;
            table.raw_set(key, scope.resolve(value.rooted())?)?;
            Ok(())
        })
    }

    /// Append an element
    pub fn push(&self, value: &Value) -> RuntimeResult<()> {
        let this = self.clone();
        let value = value.clone();
        self.runtime().engine_call(move |scope| {
            let table = scope.resolve_table(this.rooted())?;
            let key = table
                .raw_len()
                .checked_add(1)
                .ok_or_else(|| RuntimeError::property("array is full"))?;
            table.raw_set(key, scope.resolve(value.rooted())?)?;
            Ok(())
        })
    }

    /// Shorten the array to `len` elements. No-op if it is already shorter.
    pub fn truncate(&self, len: usize) -> RuntimeResult<()> {
        let this = self.clone();
        self.runtime().engine_call(move |scope| {
            let table = scope.resolve_table(this.rooted())?;
            let current = table.raw_len();
            if len >= current {
                return Ok(());
            }
            for key in (len + 1..=current).rev() {
                table.raw_set(key, mlua::Value::Nil)?;
            }
            Ok(())
        })
    }

    /// Named field `name`, outside the element range
    pub fn get_property(&self, name: &str) -> RuntimeResult<Value> {
        let this = self.clone();
        let name = name.to_string();
        self.runtime().engine_call(move |scope| {
            let table = scope.resolve_table(this.rooted())?;
            let value: mlua::Value = table.raw_get(name)?;
            scope.wrap_value(value, this.context())
        })
    }

    /// Set named field `name`. Numeric keys go through [`Array::set`].
    pub fn set_property(&self, name: &str, value: &Value) -> RuntimeResult<()> {
        let this = self.clone();
        let name = name.to_string();
        let value = value.clone();
        self.runtime().engine_call(move |scope| {
            let table = scope.resolve_table(this.rooted())?;
            table.raw_set(name, scope.resolve(value.rooted())?)?;
            Ok(())
        })
    }

    /// A value handle for this array
    pub fn to_value(&self) -> RuntimeResult<Value> {
        let this = self.clone();
        self.runtime().engine_call(move |scope| {
            let value = scope.resolve(this.rooted())?;
            scope.wrap_value(value, this.context())
        })
    }
}
