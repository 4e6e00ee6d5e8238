//! Compile-fail tests for thread safety
//!
//! The engine and the raw values it hands out are tied to the thread that
//! created the Lua state. These doc tests make sure they cannot be moved to
//! or shared with another thread.

/// ```compile_fail
/// use moor_core::Engine;
/// use std::thread;
///
/// let engine = Engine::new(0).unwrap();
/// thread::spawn(move || {
///     // This should fail to compile: Engine is !Send
///     let _ = engine.root_count();
/// });
/// ```
fn _engine_not_send() {}

/// ```compile_fail
/// use moor_core::Engine;
/// use std::sync::Arc;
///
/// let engine = Arc::new(Engine::new(0).unwrap());
/// let engine2 = engine.clone();
/// std::thread::spawn(move || {
///     // This should fail to compile: Engine is !Sync
///     let _ = engine2;
/// });
/// ```
fn _engine_not_sync() {}

/// ```compile_fail
/// use moor_core::Engine;
/// use std::thread;
///
/// let engine = Engine::new(0).unwrap();
/// let env = engine.new_environment().unwrap();
/// thread::spawn(move || {
///     // This should fail to compile: engine tables are !Send
///     let _ = env.raw_len();
/// });
/// ```
fn _table_not_send() {}

#[test]
fn engine_usable_on_its_own_thread() {
    let handle = std::thread::spawn(|| {
        let engine = moor_core::Engine::new(0).unwrap();
        let env = engine.new_environment().unwrap();
        engine
            .eval_in(&env, "40 + 2", "eval")
            .unwrap()
            .as_integer()
    });
    assert_eq!(handle.join().unwrap(), Some(42));
}
