//! Thread-bound safe wrappers over an embedded Lua engine.
//!
//! This crate owns the engine-facing half of moor: the Lua state, the
//! registry-backed root set that keeps host-referenced values alive, the
//! object identity map and structured error reports.
//!
//! # Example
//!
//! ```
//! use moor_core::Engine;
//!
//! let engine = Engine::new(0).unwrap();
//! let env = engine.new_environment().unwrap();
//! let value = engine.eval_in(&env, "1 + 1", "eval").unwrap();
//! assert_eq!(value.as_integer(), Some(2));
//! ```
//!
//! # Thread Safety
//!
//! [`Engine`] is `!Send` and `!Sync`: the Lua state must only be touched by
//! the thread that created it.
//!
//! ```compile_fail
//! use moor_core::Engine;
//!
//! let engine = Engine::new(0).unwrap();
//! std::thread::spawn(move || {
//!     let _ = engine.used_memory(); // Error: Engine is !Send
//! });
//! ```
//!
//! For multi-threaded use, go through `moor-runtime`, whose handles are
//! `Send + Sync` and marshal every operation onto the engine's worker thread.

mod engine;
mod error;
mod identity;
mod report;
mod roots;

pub use engine::Engine;
pub use error::{CoreError, CoreResult};
pub use identity::IdentityMap;
pub use report::{ErrorReport, ReportKind};
pub use roots::{HandleId, HandleKind, RootSet};

// Re-export mlua for callers that need raw engine access
pub use mlua;
