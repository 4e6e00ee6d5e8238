//! Compiled scripts

use std::sync::Arc;

use crate::context::Context;
use crate::error::RuntimeResult;
use crate::handle::Rooted;
use crate::runtime::Runtime;
use crate::value::Value;

struct ScriptInner {
    rooted: Rooted,
    context: Context,
}

/// A script compiled once and executable many times, in any context of the
/// runtime that compiled it
#[derive(Clone)]
pub struct Script(Arc<ScriptInner>);

impl std::fmt::Debug for Script {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Script({:?})", self.0.rooted)
    }
}

impl Script {
    pub(crate) fn from_parts(rooted: Rooted, context: Context) -> Self {
        Self(Arc::new(ScriptInner { rooted, context }))
    }

    /// The context the script was compiled in
    pub fn context(&self) -> &Context {
        &self.0.context
    }

    pub fn runtime(&self) -> &Runtime {
        self.0.rooted.runtime()
    }

    /// Run in the context the script was compiled in
    pub fn execute(&self) -> RuntimeResult<Value> {
        self.execute_in(&self.0.context)
    }

    /// Run in another context of the same runtime
    pub fn execute_in(&self, context: &Context) -> RuntimeResult<Value> {
        self.0.context.ensure_same_runtime(context)?;

        let this = self.clone();
        let ctx = context.clone();
        let result = self.runtime().engine_call(move |scope| {
            let func = scope.resolve_function(&this.0.rooted)?;
            let env = scope.resolve_table(ctx.rooted())?;
            let value = scope.engine().execute(&func, &env)?;
            scope.wrap_value(value, &ctx)
        });
        context.report_failure(result)
    }
}
