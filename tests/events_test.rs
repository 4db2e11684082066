mod common;

use common::create_host;

#[test]
fn dispatch_without_listeners_returns_false() {
    let host = create_host();

    let dispatched: bool = host
        .runtime
        .eval_with("dispatchEvent('nobodylistens')", "events.js")
        .expect("dispatch");

    assert!(!dispatched);
    assert!(host.delegate.errors.borrow().is_empty());
}

#[test]
fn listeners_run_in_registration_order_with_duplicates() {
    let host = create_host();

    host.runtime
        .eval(
            r#"
                globalThis.order = [];
                const a = () => order.push('a');
                const b = () => order.push('b');
                addEventListener('roundtrip', a);
                addEventListener('roundtrip', b);
                addEventListener('roundtrip', a);
                dispatchEvent('roundtrip', {});
            "#,
            "events.js",
        )
        .expect("register and dispatch");

    let order: String = host
        .runtime
        .eval_with("order.join(',')", "events.js")
        .expect("read order");
    assert_eq!(order, "a,b,a");
}

#[test]
fn remove_event_listener_without_handler_clears_the_type() {
    let host = create_host();

    host.runtime
        .eval(
            r#"
                addEventListener('cleared', () => {});
                addEventListener('cleared', () => {});
                removeEventListener('cleared');
            "#,
            "events.js",
        )
        .expect("register and clear");

    let listening: bool = host
        .runtime
        .eval_with("hasEventListener('cleared')", "events.js")
        .expect("query");
    assert!(!listening);
}

#[test]
fn remove_event_listener_removes_every_occurrence_of_the_handler() {
    let host = create_host();

    host.runtime
        .eval(
            r#"
                globalThis.order = [];
                globalThis.a = () => order.push('a');
                globalThis.b = () => order.push('b');
                addEventListener('pruned', a);
                addEventListener('pruned', b);
                addEventListener('pruned', a);
                removeEventListener('pruned', a);
                dispatchEvent('pruned', {});
            "#,
            "events.js",
        )
        .expect("register, prune, dispatch");

    let order: String = host
        .runtime
        .eval_with("order.join(',')", "events.js")
        .expect("read order");
    assert_eq!(order, "b");

    let listening: bool = host
        .runtime
        .eval_with("hasEventListener('pruned')", "events.js")
        .expect("query");
    assert!(listening);
}

#[test]
fn listener_removal_during_dispatch_does_not_skip_the_pass() {
    let host = create_host();

    host.runtime
        .eval(
            r#"
                globalThis.order = [];
                globalThis.b = () => order.push('b');
                addEventListener('racing', () => {
                    order.push('a');
                    removeEventListener('racing', b);
                });
                addEventListener('racing', b);
                dispatchEvent('racing', {});
            "#,
            "events.js",
        )
        .expect("dispatch with mid-pass removal");

    // The snapshot taken before the pass still includes b this time around.
    let order: String = host
        .runtime
        .eval_with("order.join(',')", "events.js")
        .expect("read order");
    assert_eq!(order, "a,b");

    let listening: bool = host
        .runtime
        .eval_with("hasEventListener('racing')", "events.js")
        .expect("query");
    assert!(!listening);
}

#[test]
fn dispatch_reports_default_prevention() {
    let host = create_host();

    let prevented: bool = host
        .runtime
        .eval_with(
            r#"
                addEventListener('vetoed', (event) => { event.defaultPrevented = true; });
                dispatchEvent('vetoed', { defaultPrevented: false })
            "#,
            "events.js",
        )
        .expect("dispatch");
    assert!(prevented);
}

#[test]
fn connect_scenario_invokes_listener_once_without_prevention() {
    let host = create_host();

    let prevented: bool = host
        .runtime
        .eval_with(
            r#"
                globalThis.received = [];
                const fnA = (event) => received.push(event.ok);
                addEventListener('connect', fnA);
                dispatchEvent('connect', { ok: true })
            "#,
            "events.js",
        )
        .expect("dispatch");

    assert!(!prevented);

    let received: String = host
        .runtime
        .eval_with("JSON.stringify(received)", "events.js")
        .expect("read");
    assert_eq!(received, "[true]");
}

#[test]
fn throwing_listener_is_captured_and_later_listeners_still_run() {
    let host = create_host();

    host.runtime
        .eval(
            r#"
                globalThis.order = [];
                addEventListener('explosive', () => { throw new Error('listener broke'); });
                addEventListener('explosive', () => order.push('survivor'));
                dispatchEvent('explosive', {});
            "#,
            "events.js",
        )
        .expect("dispatch with throwing listener");

    let order: String = host
        .runtime
        .eval_with("order.join(',')", "events.js")
        .expect("read order");
    assert_eq!(order, "survivor");

    assert!(host.runtime.has_queued_exceptions());
    host.runtime.flush_exception_queue();
    assert!(!host.runtime.has_queued_exceptions());

    let errors = host.delegate.errors.borrow();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].2.contains("listener broke"));
    assert!(errors[0].2.contains("dispatched event `explosive`"));
}

#[test]
fn shutdown_audit_warns_but_keeps_leftover_listeners() {
    let host = create_host();

    host.runtime
        .eval("addEventListener('leaky', () => {});", "events.js")
        .expect("register");

    assert_eq!(host.runtime.verify_no_event_handlers_left(), 1);
    // The map stays intact so the leak is still visible afterwards.
    assert_eq!(host.runtime.statistics().event_handler_size, 1);

    host.runtime
        .eval("removeEventListener('leaky');", "events.js")
        .expect("clear");
    assert_eq!(host.runtime.verify_no_event_handlers_left(), 0);
    assert_eq!(host.runtime.statistics().event_handler_size, 0);
}
