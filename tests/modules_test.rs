mod common;

use std::fs;

use common::create_host_in;

#[test]
fn executed_modules_are_cached_until_invalidated() {
    let directory = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(directory.path().join("foo")).expect("mkdir");
    fs::create_dir_all(directory.path().join("baz")).expect("mkdir");
    fs::write(directory.path().join("foo/bar.js"), "globalThis.bar = 1;").expect("write");
    fs::write(directory.path().join("baz/qux.js"), "globalThis.qux = 1;").expect("write");

    let host = create_host_in(directory.path().to_path_buf());

    host.runtime.execute("foo/bar.js").expect("execute bar");
    host.runtime.execute("baz/qux.js").expect("execute qux");

    // Both modules changed on disk, but the cache still serves the old code.
    fs::write(directory.path().join("foo/bar.js"), "globalThis.bar = 2;").expect("rewrite");
    fs::write(directory.path().join("baz/qux.js"), "globalThis.qux = 2;").expect("rewrite");

    host.runtime.execute("foo/bar.js").expect("execute bar");
    host.runtime.execute("baz/qux.js").expect("execute qux");
    let values: String = host
        .runtime
        .eval_with("JSON.stringify([bar, qux])", "modules.js")
        .expect("read");
    assert_eq!(values, "[1,1]");

    // Prefix invalidation evicts foo/ but must not disturb baz/.
    host.runtime.clear_module_cache("foo/");

    host.runtime.execute("foo/bar.js").expect("execute bar");
    host.runtime.execute("baz/qux.js").expect("execute qux");
    let values: String = host
        .runtime
        .eval_with("JSON.stringify([bar, qux])", "modules.js")
        .expect("read");
    assert_eq!(values, "[2,1]");
}

#[test]
fn clear_module_cache_is_script_reachable() {
    let directory = tempfile::tempdir().expect("tempdir");
    fs::write(directory.path().join("reload.js"), "globalThis.loads = (globalThis.loads || 0) + 1;")
        .expect("write");

    let host = create_host_in(directory.path().to_path_buf());

    host.runtime.execute("reload.js").expect("execute");
    host.runtime.execute("reload.js").expect("execute");

    // An empty prefix clears everything, so the next execute re-reads disk.
    host.runtime
        .eval("clearModuleCache('');", "modules.js")
        .expect("clear");
    host.runtime.execute("reload.js").expect("execute");

    let loads: i32 = host
        .runtime
        .eval_with("loads", "modules.js")
        .expect("read");
    assert_eq!(loads, 3);
}

#[test]
fn module_exceptions_are_queued_not_fatal() {
    let directory = tempfile::tempdir().expect("tempdir");
    fs::write(
        directory.path().join("broken.js"),
        "throw new Error('broken module');",
    )
    .expect("write");

    let host = create_host_in(directory.path().to_path_buf());

    host.runtime.execute("broken.js").expect("execute");
    assert!(host.runtime.has_queued_exceptions());

    host.runtime.flush_exception_queue();
    let errors = host.delegate.errors.borrow();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].2.contains("broken module"));
}

#[test]
fn missing_modules_surface_a_load_error() {
    let directory = tempfile::tempdir().expect("tempdir");
    let host = create_host_in(directory.path().to_path_buf());

    assert!(host.runtime.execute("ghost.js").is_err());
}
