//! Value handles
//!
//! A [`Value`] roots one engine value of any type. Scalars are also copied
//! into the handle when it is created, so type checks and scalar reads never
//! need a round trip to the worker.

use std::sync::Arc;

use moor_core::mlua::{self, LuaSerdeExt};

use crate::array::Array;
use crate::context::Context;
use crate::error::{RuntimeError, RuntimeResult};
use crate::handle::Rooted;
use crate::object::Object;
use crate::runtime::Runtime;

/// Type of a value as captured when its handle was created
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueKind {
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String,
    Table,
    Function,
    /// Threads, userdata and other engine-internal types
    Other(&'static str),
}

impl ValueKind {
    /// Engine type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) | Self::Number(_) => "number",
            Self::String => "string",
            Self::Table => "table",
            Self::Function => "function",
            Self::Other(name) => name,
        }
    }
}

impl From<&mlua::Value> for ValueKind {
    fn from(value: &mlua::Value) -> Self {
        match value {
            mlua::Value::Nil => Self::Nil,
            mlua::Value::Boolean(b) => Self::Boolean(*b),
            mlua::Value::Integer(i) => Self::Integer(*i),
            mlua::Value::Number(n) => Self::Number(*n),
            mlua::Value::String(_) => Self::String,
            mlua::Value::Table(_) => Self::Table,
            mlua::Value::Function(_) => Self::Function,
            other => Self::Other(other.type_name()),
        }
    }
}

struct ValueInner {
    rooted: Rooted,
    context: Context,
    kind: ValueKind,
}

/// A rooted engine value
///
/// Cloning is cheap and shares the root; the root is released once the last
/// clone is dropped.
#[derive(Clone)]
pub struct Value(Arc<ValueInner>);

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Value({:?}, {:?})", self.0.kind, self.0.rooted)
    }
}

impl Value {
    pub(crate) fn from_parts(rooted: Rooted, context: Context, kind: ValueKind) -> Self {
        Self(Arc::new(ValueInner {
            rooted,
            context,
            kind,
        }))
    }

    pub(crate) fn rooted(&self) -> &Rooted {
        &self.0.rooted
    }

    /// The context this value was produced in
    pub fn context(&self) -> &Context {
        &self.0.context
    }

    pub fn runtime(&self) -> &Runtime {
        self.0.rooted.runtime()
    }

    pub fn kind(&self) -> ValueKind {
        self.0.kind
    }

    pub fn type_name(&self) -> &'static str {
        self.0.kind.type_name()
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.0.kind, ValueKind::Nil)
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self.0.kind, ValueKind::Boolean(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.0.kind, ValueKind::Integer(_))
    }

    /// True for integers and floats
    pub fn is_number(&self) -> bool {
        matches!(self.0.kind, ValueKind::Integer(_) | ValueKind::Number(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self.0.kind, ValueKind::String)
    }

    /// True for tables, arrays included
    pub fn is_object(&self) -> bool {
        matches!(self.0.kind, ValueKind::Table)
    }

    pub fn is_function(&self) -> bool {
        matches!(self.0.kind, ValueKind::Function)
    }

    /// True for tables created as arrays and for non-empty sequences
    pub fn is_array(&self) -> RuntimeResult<bool> {
        if !self.is_object() {
            return Ok(false);
        }
        let this = self.clone();
        self.runtime().engine_call(move |scope| {
            let table = scope.resolve_table(this.rooted())?;
            Ok(scope.engine().is_array(&table)?)
        })
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self.0.kind {
            ValueKind::Boolean(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self.0.kind {
            ValueKind::Integer(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self.0.kind {
            ValueKind::Integer(i) => Some(i as f64),
            ValueKind::Number(n) => Some(n),
            _ => None,
        }
    }

    /// Script truthiness: only `nil` and `false` are false
    pub fn to_boolean(&self) -> bool {
        !matches!(self.0.kind, ValueKind::Nil | ValueKind::Boolean(false))
    }

    /// Integer value, converting numeric strings and integral floats
    pub fn coerce_integer(&self) -> RuntimeResult<i64> {
        if let ValueKind::Integer(i) = self.0.kind {
            return Ok(i);
        }
        let this = self.clone();
        self.runtime().engine_call(move |scope| {
            let value = scope.resolve(this.rooted())?;
            let type_name = value.type_name();
            scope
                .lua()
                .coerce_integer(value)?
                .ok_or_else(|| RuntimeError::type_error("integer", type_name))
        })
    }

    /// Float value, converting integers and numeric strings
    pub fn coerce_number(&self) -> RuntimeResult<f64> {
        if let Some(n) = self.as_number() {
            return Ok(n);
        }
        let this = self.clone();
        self.runtime().engine_call(move |scope| {
            let value = scope.resolve(this.rooted())?;
            let type_name = value.type_name();
            scope
                .lua()
                .coerce_number(value)?
                .ok_or_else(|| RuntimeError::type_error("number", type_name))
        })
    }

    /// String value, converting numbers
    pub fn coerce_string(&self) -> RuntimeResult<String> {
        let this = self.clone();
        self.runtime().engine_call(move |scope| {
            let value = scope.resolve(this.rooted())?;
            let type_name = value.type_name();
            match scope.lua().coerce_string(value)? {
                Some(s) => Ok(s.to_string_lossy()),
                None => Err(RuntimeError::type_error("string", type_name)),
            }
        })
    }

    /// The table behind this value as an [`Object`]. Returns the existing
    /// object handle if one is alive.
    pub fn to_object(&self) -> RuntimeResult<Object> {
        let this = self.clone();
        self.runtime().engine_call(move |scope| {
            let table = scope.resolve_table(this.rooted())?;
            scope.wrap_object(table, this.context())
        })
    }

    /// The table behind this value as an [`Array`]
    pub fn to_array(&self) -> RuntimeResult<Array> {
        let this = self.clone();
        self.runtime().engine_call(move |scope| {
            let table = scope.resolve_table(this.rooted())?;
            scope.wrap_array(table, this.context())
        })
    }

    /// Call this value as a function
    pub fn call(&self, args: &[Value]) -> RuntimeResult<Value> {
        let this = self.clone();
        let args = args.to_vec();
        let result = self.runtime().engine_call(move |scope| {
            let func = scope.resolve_function(this.rooted())?;
            let args = args
                .iter()
                .map(|arg| scope.resolve(arg.rooted()))
                .collect::<RuntimeResult<Vec<_>>>()?;
            let value = func
                .call::<mlua::Value>(mlua::MultiValue::from_vec(args))
                .map_err(moor_core::CoreError::from_script)?;
            scope.wrap_value(value, this.context())
        });
        self.context().report_failure(result)
    }

    /// Convert to JSON. Fails for functions and other non-data values.
    pub fn to_json(&self) -> RuntimeResult<serde_json::Value> {
        let this = self.clone();
        self.runtime().engine_call(move |scope| {
            let value = scope.resolve(this.rooted())?;
            Ok(scope.lua().from_value::<serde_json::Value>(value)?)
        })
    }
}
