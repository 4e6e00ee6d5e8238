//! Integration tests for evaluation, compiled scripts and error reports

use std::sync::{Arc, Mutex};

use moor_runtime::{ErrorReport, ReportKind, Runtime};

#[test]
fn test_eval_expression_and_block() {
    let runtime = Runtime::new(0).unwrap();
    let ctx = runtime.new_context().unwrap();

    assert_eq!(ctx.eval("2 * 21").unwrap().as_integer(), Some(42));
    assert!(ctx.eval("local x = 1").unwrap().is_nil());
    assert_eq!(
        ctx.eval("local x = 20\nreturn x + 1").unwrap().as_integer(),
        Some(21)
    );
    runtime.dispose();
}

#[test]
fn test_contexts_are_isolated() {
    let runtime = Runtime::new(0).unwrap();
    let first = runtime.new_context().unwrap();
    let second = runtime.new_context().unwrap();

    first.eval("shared = 'first'").unwrap();
    assert!(second.eval("shared").unwrap().is_nil());
    // The standard library is visible everywhere.
    assert_eq!(second.eval("math.max(1, 5)").unwrap().as_integer(), Some(5));
    runtime.dispose();
}

#[test]
fn test_compile_once_execute_many() {
    let runtime = Runtime::new(0).unwrap();
    let ctx = runtime.new_context().unwrap();
    let script = ctx
        .compile("hits = (hits or 0) + 1\nreturn hits", "counter.lua", 1)
        .unwrap();

    for expected in 1..=3 {
        assert_eq!(script.execute().unwrap().as_integer(), Some(expected));
    }
    runtime.dispose();
}

#[test]
fn test_execute_in_other_context() {
    let runtime = Runtime::new(0).unwrap();
    let first = runtime.new_context().unwrap();
    let second = runtime.new_context().unwrap();
    first.eval("x = 2").unwrap();
    second.eval("x = 5").unwrap();

    let script = first.compile("x * 2", "double.lua", 1).unwrap();
    assert_eq!(script.execute().unwrap().as_integer(), Some(4));
    assert_eq!(script.execute_in(&second).unwrap().as_integer(), Some(10));
    assert!(script.context().ptr_eq(&first));
    runtime.dispose();
}

#[test]
fn test_execute_in_foreign_runtime_fails() {
    let a = Runtime::new(0).unwrap();
    let b = Runtime::new(0).unwrap();
    let script = a.new_context().unwrap().compile("1", "one.lua", 1).unwrap();
    let other = b.new_context().unwrap();

    assert!(script.execute_in(&other).is_err());
    a.dispose();
    b.dispose();
}

fn collect_reports(ctx: &moor_runtime::Context) -> Arc<Mutex<Vec<ErrorReport>>> {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    ctx.set_error_reporter(move |report| sink.lock().unwrap().push(report.clone()));
    reports
}

#[test]
fn test_syntax_error_report() {
    let runtime = Runtime::new(0).unwrap();
    let ctx = runtime.new_context().unwrap();
    let reports = collect_reports(&ctx);

    let err = ctx.compile("local = 1", "broken.lua", 10).unwrap_err();
    let report = err.report().unwrap();
    assert_eq!(report.kind, ReportKind::Syntax);
    assert_eq!(report.file_name.as_deref(), Some("broken.lua"));
    assert_eq!(report.line, Some(10));

    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(&reports[0], report);
    runtime.dispose();
}

#[test]
fn test_runtime_error_report() {
    let runtime = Runtime::new(0).unwrap();
    let ctx = runtime.new_context().unwrap();
    let reports = collect_reports(&ctx);

    let script = ctx
        .compile("local a = nil\nreturn a.b", "script.lua", 5)
        .unwrap();
    let err = script.execute().unwrap_err();
    let report = err.report().unwrap();
    assert_eq!(report.kind, ReportKind::Runtime);
    assert_eq!(report.file_name.as_deref(), Some("script.lua"));
    assert_eq!(report.line, Some(6));

    ctx.eval("error('boom')").unwrap_err();
    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[1].message, "boom");
    assert_eq!(reports[1].file_name.as_deref(), Some("eval"));
    assert_eq!(reports[1].line, Some(1));
    runtime.dispose();
}

#[test]
fn test_reporter_can_be_cleared() {
    let runtime = Runtime::new(0).unwrap();
    let ctx = runtime.new_context().unwrap();
    let reports = collect_reports(&ctx);

    ctx.eval("error('first')").unwrap_err();
    ctx.clear_error_reporter();
    ctx.eval("error('second')").unwrap_err();

    assert_eq!(reports.lock().unwrap().len(), 1);
    runtime.dispose();
}

#[test]
fn test_memory_budget() {
    let runtime = Runtime::new(256 * 1024).unwrap();
    let ctx = runtime.new_context().unwrap();

    let err = ctx
        .eval("local t = {} for i = 1, 1e7 do t[i] = i end")
        .unwrap_err();
    assert_eq!(err.report().unwrap().kind, ReportKind::Memory);

    // Memory is reclaimed once the failed script's garbage is collected.
    runtime.collect_garbage().unwrap();
    assert_eq!(ctx.eval("1 + 1").unwrap().as_integer(), Some(2));
    runtime.dispose();
}
