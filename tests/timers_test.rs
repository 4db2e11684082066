mod common;

use common::{create_host, pump_until};

#[test]
fn wait_resolves_in_ascending_deadline_order() {
    let host = create_host();

    host.runtime
        .eval(
            r#"
                globalThis.order = [];
                wait(30).then(() => order.push('30-first'));
                wait(10).then(() => order.push('10'));
                wait(30).then(() => order.push('30-second'));
                wait(20).then(() => order.push('20'));
            "#,
            "timers.js",
        )
        .expect("schedule waits");

    assert!(
        pump_until(&host, "order.length === 4", 100),
        "all waits should resolve"
    );

    let order: String = host
        .runtime
        .eval_with("order.join(',')", "timers.js")
        .expect("read order");
    assert_eq!(order, "10,20,30-first,30-second");
}

#[test]
fn wait_does_not_resolve_before_its_deadline() {
    let host = create_host();

    host.runtime
        .eval(
            "globalThis.resolved = 0; wait(60).then(() => resolved++);",
            "timers.js",
        )
        .expect("schedule wait");

    // An immediate frame is too early.
    host.runtime.on_frame();
    let resolved: i32 = host
        .runtime
        .eval_with("resolved", "timers.js")
        .expect("read");
    assert_eq!(resolved, 0);
    assert_eq!(host.runtime.statistics().timer_queue_size, 1);

    assert!(pump_until(&host, "resolved === 1", 100));
    assert_eq!(host.runtime.statistics().timer_queue_size, 0);

    // Settling is exactly-once: further frames change nothing.
    host.runtime.on_frame();
    let resolved: i32 = host
        .runtime
        .eval_with("resolved", "timers.js")
        .expect("read");
    assert_eq!(resolved, 1);
}

#[test]
fn late_frame_resolves_the_whole_backlog_in_order() {
    let host = create_host();

    host.runtime
        .eval(
            r#"
                globalThis.order = [];
                wait(5).then(() => order.push('first'));
                wait(6).then(() => order.push('second'));
                wait(7).then(() => order.push('third'));
            "#,
            "timers.js",
        )
        .expect("schedule waits");

    // Let all three deadlines lapse without a single frame in between.
    std::thread::sleep(std::time::Duration::from_millis(40));
    host.runtime.on_frame();

    let order: String = host
        .runtime
        .eval_with("order.join(',')", "timers.js")
        .expect("read order");
    assert_eq!(order, "first,second,third");
}

#[test]
fn zero_and_negative_waits_resolve_on_the_next_frame() {
    let host = create_host();

    host.runtime
        .eval(
            r#"
                globalThis.order = [];
                wait(0).then(() => order.push('zero'));
                wait(-5).then(() => order.push('negative'));
            "#,
            "timers.js",
        )
        .expect("schedule waits");

    host.runtime.on_frame();

    let order: String = host
        .runtime
        .eval_with("order.join(',')", "timers.js")
        .expect("read order");
    assert_eq!(order, "zero,negative");
}

#[test]
fn wait_validates_its_argument() {
    let host = create_host();

    let message: String = host
        .runtime
        .eval_with(
            r#"
                (() => {
                    try { wait('soon'); return 'no-throw'; } catch (e) { return String(e); }
                })()
            "#,
            "timers.js",
        )
        .expect("evaluate");
    assert!(message.contains("expected a number"), "got: {message}");
}
