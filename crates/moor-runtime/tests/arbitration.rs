//! Integration tests for engine access arbitration

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use moor_runtime::{Runtime, RuntimeError};

#[test]
fn test_work_is_mutually_exclusive() {
    let runtime = Runtime::new(0).unwrap();
    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let runtime = runtime.clone();
            let busy = busy.clone();
            let overlaps = overlaps.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let busy = busy.clone();
                    let overlaps = overlaps.clone();
                    runtime
                        .with_engine(move |_| {
                            if busy.swap(true, Ordering::SeqCst) {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::yield_now();
                            busy.store(false, Ordering::SeqCst);
                        })
                        .unwrap();
                }
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    runtime.dispose();
}

#[test]
fn test_concurrent_counter() {
    let runtime = Runtime::new(1 << 20).unwrap();
    let ctx = runtime.new_context().unwrap();
    ctx.eval("counter = 0").unwrap();

    let threads: Vec<_> = (0..50)
        .map(|_| {
            let ctx = ctx.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    ctx.eval("counter = counter + 1").unwrap();
                }
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(ctx.eval("counter").unwrap().as_integer(), Some(50_000));
    runtime.dispose();
}

fn nest(runtime: &Runtime, depth: usize) -> usize {
    if depth == 0 {
        return 0;
    }
    let inner = runtime.clone();
    runtime
        .with_engine(move |_| nest(&inner, depth - 1) + 1)
        .unwrap()
}

#[test]
fn test_reentrant_depth() {
    let runtime = Runtime::new(0).unwrap();
    assert_eq!(nest(&runtime, 1000), 1000);

    let stats = runtime.stats().snapshot();
    assert_eq!(stats.reentrant_calls, 999);
    runtime.dispose();
}

#[test]
fn test_reentrant_through_script() {
    let runtime = Runtime::new(0).unwrap();
    let ctx = runtime.new_context().unwrap();

    ctx.define_function("descend", |call| {
        let n = call.arg(0).and_then(|v| v.as_integer()).unwrap_or(0);
        let result = if n == 0 {
            call.context().integer(0)?
        } else {
            call.context().eval(&format!("descend({}) + 1", n - 1))?
        };
        call.ret(result)
    })
    .unwrap();

    let value = ctx.eval("descend(20)").unwrap();
    assert_eq!(value.as_integer(), Some(20));
    runtime.dispose();
}

#[test]
fn test_panic_is_contained() {
    let runtime = Runtime::new(0).unwrap();

    let err = runtime.with_engine(|_| -> i32 { panic!("boom") }).unwrap_err();
    assert!(matches!(err, RuntimeError::WorkerPanicked(ref m) if m == "boom"));

    let ctx = runtime.new_context().unwrap();
    assert_eq!(ctx.eval("1 + 1").unwrap().as_integer(), Some(2));
    runtime.dispose();
}

#[test]
fn test_worker_thread_name() {
    let runtime = Runtime::builder().thread_name("moor-test").build().unwrap();
    let name = runtime
        .with_engine(|_| thread::current().name().map(String::from))
        .unwrap();
    assert_eq!(name.as_deref(), Some("moor-test"));
    runtime.dispose();
}

#[test]
fn test_stats_count_jobs() {
    let runtime = Runtime::new(0).unwrap();
    for _ in 0..10 {
        runtime.with_engine(|_| ()).unwrap();
    }
    // Completion is counted after the reply is sent; the next job orders it.
    runtime.root_count().unwrap();

    let stats = runtime.stats().snapshot();
    assert_eq!(stats.jobs_submitted, 11);
    assert!(stats.jobs_completed >= 10);
    assert!(runtime.stats().jobs_in_flight() <= 1);
    runtime.dispose();
}

#[tokio::test]
async fn test_with_engine_async() {
    let runtime = Runtime::new(0).unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.with_engine_async(move |_| i * 2).await })
        })
        .collect();

    let mut total = 0;
    for task in tasks {
        total += task.await.unwrap().unwrap();
    }
    assert_eq!(total, (0..16).map(|i| i * 2).sum::<i32>());
    runtime.dispose();
}

#[tokio::test]
async fn test_with_engine_async_after_dispose() {
    let runtime = Runtime::new(0).unwrap();
    runtime.dispose();

    let err = runtime.with_engine_async(|_| ()).await.unwrap_err();
    assert!(err.is_disposed());
}
