//! Installation of the script-visible global functions.
//!
//! Every function validates its arguments before touching any subsystem:
//! wrong arity or types abort that call with a thrown error while the
//! surrounding script keeps running.

use std::rc::Rc;
use std::time::Duration;

use rquickjs::function::Rest;
use rquickjs::{Array, Ctx, Function, IntoJs, Object, Value};

use crate::pawn::{parse_signature, PawnKind, PawnValue};
use crate::promise::ScriptPromise;
use crate::runtime::RuntimeState;

pub(crate) fn throw_exception<'js>(ctx: &Ctx<'js>, message: String) -> rquickjs::Error {
    match message.into_js(ctx) {
        Ok(value) => ctx.throw(value),
        Err(err) => err,
    }
}

pub(crate) fn to_string(value: &Value<'_>) -> Option<String> {
    value.as_string().and_then(|string| string.to_string().ok())
}

pub(crate) fn to_number(value: &Value<'_>) -> Option<f64> {
    value.as_int().map(f64::from).or_else(|| value.as_float())
}

/// Installs the global bridge surface onto the context's global object.
pub(crate) fn install<'js>(ctx: &Ctx<'js>, state: &Rc<RuntimeState>) -> rquickjs::Result<()> {
    let global = ctx.globals();

    macro_rules! install_function {
        ($name:literal, $callback:ident) => {{
            let state = Rc::clone(state);
            let function = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
                $callback(&state, ctx, args.0)
            })?
            .with_name($name)?;
            global.set($name, function)?;
        }};
    }

    // The EventTarget-shaped listener functions. hasEventListener is not part
    // of that interface, but speculative native events make it matter for
    // performance.
    install_function!("addEventListener", add_event_listener_callback);
    install_function!("dispatchEvent", dispatch_event_callback);
    install_function!("hasEventListener", has_event_listeners_callback);
    install_function!("removeEventListener", remove_event_listener_callback);

    install_function!("clearModuleCache", clear_module_cache_callback);
    install_function!("frameCounter", frame_counter_callback);
    install_function!("flushExceptionQueue", flush_exception_queue_callback);
    install_function!("getDeferredEvents", get_deferred_events_callback);
    install_function!("getRuntimeStatistics", get_runtime_statistics_callback);
    install_function!("highResolutionTime", high_resolution_time_callback);
    install_function!("isPlayerMinimized", is_player_minimized_callback);
    install_function!("pawnInvoke", pawn_invoke_callback);
    install_function!("provideNative", provide_native_callback);
    install_function!("wait", wait_callback);

    install_function!("notifyReady", notify_ready_callback);
    install_function!("reportTestsFinished", report_tests_finished_callback);
    install_function!("killServer", kill_server_callback);

    Ok(())
}

// void addEventListener(string type, function listener);
fn add_event_listener_callback<'js>(
    state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<()> {
    if args.len() < 2 {
        return Err(throw_exception(
            &ctx,
            format!(
                "unable to execute addEventListener(): 2 arguments required, but only {} provided.",
                args.len()
            ),
        ));
    }

    let Some(event_type) = to_string(&args[0]) else {
        return Err(throw_exception(
            &ctx,
            "unable to execute addEventListener(): expected a string for argument 1.".to_string(),
        ));
    };

    let Some(listener) = args[1].as_function().cloned() else {
        return Err(throw_exception(
            &ctx,
            "unable to execute addEventListener(): expected a function for argument 2.".to_string(),
        ));
    };

    state.global.add_event_listener(&ctx, &event_type, listener);
    Ok(())
}

// boolean dispatchEvent(string type[, object event]);
fn dispatch_event_callback<'js>(
    state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<bool> {
    if args.is_empty() {
        return Err(throw_exception(
            &ctx,
            "unable to execute dispatchEvent(): 1 argument required, but only 0 provided."
                .to_string(),
        ));
    }

    let Some(event_type) = to_string(&args[0]) else {
        return Err(throw_exception(
            &ctx,
            "unable to execute dispatchEvent(): expected a string for argument 1.".to_string(),
        ));
    };

    let payload = match args.get(1) {
        Some(value) => value.clone(),
        None => Value::new_null(ctx.clone()),
    };

    Ok(state
        .global
        .dispatch_event(&ctx, &state.exceptions, &event_type, payload))
}

// boolean hasEventListener(string type);
fn has_event_listeners_callback<'js>(
    state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<bool> {
    if args.is_empty() {
        return Err(throw_exception(
            &ctx,
            "unable to execute hasEventListener(): 1 argument required, but only 0 provided."
                .to_string(),
        ));
    }

    let Some(event_type) = to_string(&args[0]) else {
        return Err(throw_exception(
            &ctx,
            "unable to execute hasEventListener(): expected a string for argument 1.".to_string(),
        ));
    };

    Ok(state.global.has_event_listeners(&event_type))
}

// void removeEventListener(string type[, function listener]);
fn remove_event_listener_callback<'js>(
    state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<()> {
    if args.is_empty() {
        return Err(throw_exception(
            &ctx,
            "unable to execute removeEventListener(): 1 argument required, but only 0 provided."
                .to_string(),
        ));
    }

    let Some(event_type) = to_string(&args[0]) else {
        return Err(throw_exception(
            &ctx,
            "unable to execute removeEventListener(): expected a string for argument 1."
                .to_string(),
        ));
    };

    let listener = args.get(1).and_then(|value| value.as_function().cloned());
    state.global.remove_event_listener(&ctx, &event_type, listener);
    Ok(())
}

// void clearModuleCache(string prefix);
fn clear_module_cache_callback<'js>(
    state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<()> {
    if args.is_empty() {
        return Err(throw_exception(
            &ctx,
            "unable to execute clearModuleCache(): 1 argument required, but none provided."
                .to_string(),
        ));
    }

    let Some(prefix) = to_string(&args[0]) else {
        return Err(throw_exception(
            &ctx,
            "unable to execute clearModuleCache(): expected a string for argument 1.".to_string(),
        ));
    };

    state.modulator.borrow_mut().clear_cache(&prefix);
    Ok(())
}

// object { duration, fps } frameCounter();
fn frame_counter_callback<'js>(
    state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    _args: Vec<Value<'js>>,
) -> rquickjs::Result<Object<'js>> {
    let (duration, fps) = state.get_and_reset_frame_counter();

    let object = Object::new(ctx)?;
    object.set("duration", duration)?;
    object.set("fps", fps)?;
    Ok(object)
}

// void flushExceptionQueue();
fn flush_exception_queue_callback<'js>(
    state: &Rc<RuntimeState>,
    _ctx: Ctx<'js>,
    _args: Vec<Value<'js>>,
) -> rquickjs::Result<()> {
    if state.exceptions.has_queued_messages() {
        state.exceptions.flush_message_queue(state.delegate.as_ref());
    }
    Ok(())
}

// sequence<object { type, event }> getDeferredEvents();
fn get_deferred_events_callback<'js>(
    state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    _args: Vec<Value<'js>>,
) -> rquickjs::Result<Array<'js>> {
    state.global.drain_deferred_events(&ctx)
}

// object getRuntimeStatistics();
fn get_runtime_statistics_callback<'js>(
    state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    _args: Vec<Value<'js>>,
) -> rquickjs::Result<Object<'js>> {
    let statistics = state.statistics();

    let object = Object::new(ctx)?;
    object.set(
        "deferred_event_queue_size",
        statistics.deferred_event_queue_size as f64,
    )?;
    object.set("event_handler_size", statistics.event_handler_size as f64)?;
    object.set(
        "exception_handler_queue_size",
        statistics.exception_handler_queue_size as f64,
    )?;
    object.set("timer_queue_size", statistics.timer_queue_size as f64)?;
    Ok(object)
}

// double highResolutionTime();
fn high_resolution_time_callback<'js>(
    state: &Rc<RuntimeState>,
    _ctx: Ctx<'js>,
    _args: Vec<Value<'js>>,
) -> rquickjs::Result<f64> {
    Ok(state.high_resolution_time())
}

// bool isPlayerMinimized(playerId [, currentTime]);
fn is_player_minimized_callback<'js>(
    state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<bool> {
    if args.is_empty() {
        return Err(throw_exception(
            &ctx,
            "unable to execute isPlayerMinimized(): 1 argument required, but only 0 provided."
                .to_string(),
        ));
    }

    let Some(player_id) = args[0].as_int() else {
        return Err(throw_exception(
            &ctx,
            "unable to execute isPlayerMinimized(): expected an integer for argument 1."
                .to_string(),
        ));
    };

    let current_time = args
        .get(1)
        .and_then(to_number)
        .unwrap_or_else(|| state.high_resolution_time());

    Ok(state.controller.is_player_minimized(player_id, current_time))
}

// any pawnInvoke(string name[, string signature[, ...]]);
fn pawn_invoke_callback<'js>(
    state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    if args.is_empty() {
        return Err(throw_exception(
            &ctx,
            "unable to execute pawnInvoke(): 1 argument required, but 0 provided.".to_string(),
        ));
    }

    let Some(name) = to_string(&args[0]) else {
        return Err(throw_exception(
            &ctx,
            "unable to execute pawnInvoke(): expected a string for argument 1.".to_string(),
        ));
    };

    let mut values = Vec::new();
    if args.len() >= 2 {
        let Some(signature) = to_string(&args[1]) else {
            return Err(throw_exception(
                &ctx,
                "unable to execute pawnInvoke(): expected a string for argument 2.".to_string(),
            ));
        };

        let kinds = parse_signature(&signature).map_err(|err| {
            throw_exception(&ctx, format!("unable to execute pawnInvoke(): {err}"))
        })?;

        if kinds.len() != args.len() - 2 {
            return Err(throw_exception(
                &ctx,
                format!(
                    "unable to execute pawnInvoke(): signature `{}` expects {} arguments, but {} provided.",
                    signature,
                    kinds.len(),
                    args.len() - 2
                ),
            ));
        }

        for (index, kind) in kinds.iter().enumerate() {
            let value = &args[index + 2];
            let position = index + 3;
            match kind {
                PawnKind::Int => {
                    let Some(int) = integer_from(value) else {
                        return Err(throw_exception(
                            &ctx,
                            format!(
                                "unable to execute pawnInvoke(): expected an integer for argument {position}."
                            ),
                        ));
                    };
                    values.push(PawnValue::Int(int));
                }
                PawnKind::Float => {
                    let Some(number) = to_number(value) else {
                        return Err(throw_exception(
                            &ctx,
                            format!(
                                "unable to execute pawnInvoke(): expected a number for argument {position}."
                            ),
                        ));
                    };
                    values.push(PawnValue::Float(number as f32));
                }
                PawnKind::String => {
                    let Some(string) = to_string(value) else {
                        return Err(throw_exception(
                            &ctx,
                            format!(
                                "unable to execute pawnInvoke(): expected a string for argument {position}."
                            ),
                        ));
                    };
                    values.push(PawnValue::String(string));
                }
            }
        }
    }

    match state.controller.invoke_native(&name, &values) {
        Some(PawnValue::Int(value)) => value.into_js(&ctx),
        Some(PawnValue::Float(value)) => f64::from(value).into_js(&ctx),
        Some(PawnValue::String(value)) => value.into_js(&ctx),
        None => Ok(Value::new_null(ctx.clone())),
    }
}

fn integer_from(value: &Value<'_>) -> Option<i32> {
    if let Some(int) = value.as_int() {
        return Some(int);
    }
    match value.as_float() {
        Some(number) if number.fract() == 0.0 && number.abs() <= i32::MAX as f64 => {
            Some(number as i32)
        }
        _ => None,
    }
}

// void provideNative(string name, string parameters, function handler);
fn provide_native_callback<'js>(
    state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<()> {
    if args.len() != 3 {
        return Err(throw_exception(
            &ctx,
            format!(
                "unable to execute provideNative(): 3 arguments required, but only {} provided.",
                args.len()
            ),
        ));
    }

    let Some(name) = to_string(&args[0]) else {
        return Err(throw_exception(
            &ctx,
            "unable to execute provideNative(): expected a string for argument 1.".to_string(),
        ));
    };

    let Some(parameters) = to_string(&args[1]) else {
        return Err(throw_exception(
            &ctx,
            "unable to execute provideNative(): expected a string for argument 2.".to_string(),
        ));
    };

    let Some(handler) = args[2].as_function().cloned() else {
        return Err(throw_exception(
            &ctx,
            "unable to execute provideNative(): expected a function for argument 3.".to_string(),
        ));
    };

    if let Err(err) = state
        .global
        .natives()
        .register(&ctx, &name, &parameters, handler)
    {
        tracing::warn!(target: "pawnhost", native = name.as_str(), error = %err, "native registration refused");
        return Err(throw_exception(
            &ctx,
            "unable to execute provideNative(): the native could not be registered.".to_string(),
        ));
    }

    Ok(())
}

// Promise<void> wait(unsigned long time);
fn wait_callback<'js>(
    state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<Value<'js>> {
    if args.is_empty() {
        return Err(throw_exception(
            &ctx,
            "unable to execute wait(): 1 argument required, but only 0 provided.".to_string(),
        ));
    }

    let Some(milliseconds) = to_number(&args[0]) else {
        return Err(throw_exception(
            &ctx,
            "unable to execute wait(): expected a number for argument 1.".to_string(),
        ));
    };

    let delay = if milliseconds.is_finite() && milliseconds > 0.0 {
        Duration::from_secs_f64(milliseconds / 1_000.0)
    } else {
        Duration::ZERO
    };

    let promise = ScriptPromise::new(&ctx)?;
    let value = promise.value(&ctx)?;
    state.timers.add(promise, delay);

    Ok(value)
}

// void notifyReady();
fn notify_ready_callback<'js>(
    state: &Rc<RuntimeState>,
    _ctx: Ctx<'js>,
    _args: Vec<Value<'js>>,
) -> rquickjs::Result<()> {
    state.set_ready();
    Ok(())
}

// void reportTestsFinished(int totalTests, int failedTests);
fn report_tests_finished_callback<'js>(
    state: &Rc<RuntimeState>,
    ctx: Ctx<'js>,
    args: Vec<Value<'js>>,
) -> rquickjs::Result<()> {
    if args.len() != 2 {
        return Err(throw_exception(
            &ctx,
            format!(
                "unable to execute reportTestsFinished(): 2 arguments required, but only {} provided.",
                args.len()
            ),
        ));
    }

    let (Some(total), Some(failed)) = (to_number(&args[0]), to_number(&args[1])) else {
        return Err(throw_exception(
            &ctx,
            "unable to execute reportTestsFinished(): expected numbers as arguments.".to_string(),
        ));
    };

    state.global.verify_no_event_handlers_left();
    state
        .delegate
        .on_script_tests_done(total as u32, failed as u32);
    Ok(())
}

// void killServer();
fn kill_server_callback<'js>(
    _state: &Rc<RuntimeState>,
    _ctx: Ctx<'js>,
    _args: Vec<Value<'js>>,
) -> rquickjs::Result<()> {
    if cfg!(windows) {
        std::process::abort();
    }
    std::process::exit(-1);
}
