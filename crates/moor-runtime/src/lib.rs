//! moor-runtime - thread-safe access to a single-threaded Lua engine.
//!
//! The engine may only be touched by the thread that created it. This crate
//! gives it a dedicated worker thread and lets any number of host threads use
//! it through `Send + Sync` handles.
//!
//! # Features
//!
//! - **Reentrant arbitration**: host callbacks invoked by a running script can
//!   call back into the runtime without deadlocking
//! - **Rooted handles**: values, objects, arrays, scripts and contexts stay
//!   alive while the host holds them and are released when dropped, from any
//!   thread
//! - **Object identity**: one live handle per engine table
//! - **Host callbacks**: functions and property accessors backed by Rust
//!   closures
//! - **Structured errors**: script failures carry kind, file and line
//!
//! # Example
//!
//! ```no_run
//! use moor_runtime::Runtime;
//!
//! let runtime = Runtime::new(0).unwrap();
//! let ctx = runtime.new_context().unwrap();
//!
//! ctx.define_function("add", |call| {
//!     let a = call.arg(0).and_then(|v| v.as_integer()).unwrap_or(0);
//!     let b = call.arg(1).and_then(|v| v.as_integer()).unwrap_or(0);
//!     let sum = call.context().integer(a + b)?;
//!     call.ret(sum)
//! })
//! .unwrap();
//!
//! let value = ctx.eval("add(10, 20)").unwrap();
//! assert_eq!(value.as_integer(), Some(30));
//!
//! runtime.dispose();
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │   host threads: Runtime / Context / Value / Object / ...    │
//! └─────────────────────────────────────────────────────────────┘
//!          │ with_engine (blocks)             │ drop
//!          ↓                                  ↓
//! ┌──────────────────────┐     ┌─────────────────────────────────┐
//! │  work queue (Job)    │     │  dispose queues, one per kind   │
//! └──────────────────────┘     └─────────────────────────────────┘
//!          │                                  │
//!          └───────────────┬──────────────────┘
//!                          ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     worker thread                            │
//! │  - owns the Engine (moor-core)                               │
//! │  - runs work; nested with_engine calls run in place          │
//! │  - releases roots of dropped handles                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod array;
mod callback;
mod config;
mod context;
mod dispose;
mod error;
mod handle;
mod object;
mod runtime;
mod script;
mod stats;
mod value;
mod worker;

pub use array::Array;
pub use callback::{Accessor, FunctionCall, Getter, HostFunction, Setter};
pub use config::{DEFAULT_STACK_SIZE, RuntimeBuilder, RuntimeConfig};
pub use context::{Context, ErrorReporter};
pub use error::{RuntimeError, RuntimeResult};
pub use object::Object;
pub use runtime::Runtime;
pub use script::Script;
pub use stats::{RuntimeStats, RuntimeStatsSnapshot};
pub use value::{Value, ValueKind};
pub use worker::EngineScope;

pub use moor_core::{CoreError, ErrorReport, HandleKind, ReportKind, mlua};
