use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};

use crate::bindings;
use crate::builtins;
use crate::console;
use crate::engine::{Engine, EvalOutcome};
use crate::event::Event;
use crate::exceptions::ExceptionQueue;
use crate::global_scope::GlobalScope;
use crate::modulator::Modulator;
use crate::pawn::{Arguments, BridgeError, HostController, PawnValue};
use crate::reactor::Reactor;
use crate::timer_queue::TimerQueue;

const GLOBAL_ALIASES: &str = r#"
if (typeof self === 'undefined') { globalThis.self = globalThis; }
if (typeof globalThis.global === 'undefined') { globalThis.global = globalThis; }
"#;

/// Lets the runtime pass script output, errors and test results back to the
/// embedder.
pub trait RuntimeDelegate {
    fn on_script_output(&self, message: &str);
    fn on_script_error(&self, filename: &str, line: u32, message: &str);
    fn on_script_tests_done(&self, total_tests: u32, failed_tests: u32);
}

/// Notified once per server frame, in registration order. Used by features
/// that need incremental asynchronous progress.
pub trait FrameObserver {
    fn on_frame(&self);
}

pub struct RuntimeOptions {
    /// Root directory the module cache resolves specifiers against.
    pub source_directory: PathBuf,
    /// How long `spin_until_ready` waits before giving up on the script.
    pub boot_deadline: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            source_directory: PathBuf::from("javascript"),
            boot_deadline: Duration::from_secs(30),
        }
    }
}

/// Point-in-time counters exposed to script as `getRuntimeStatistics()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStatistics {
    pub deferred_event_queue_size: usize,
    pub event_handler_size: usize,
    pub exception_handler_queue_size: usize,
    pub timer_queue_size: usize,
}

pub(crate) struct RuntimeState {
    pub(crate) delegate: Rc<dyn RuntimeDelegate>,
    pub(crate) controller: Rc<dyn HostController>,
    pub(crate) global: GlobalScope,
    pub(crate) timers: TimerQueue,
    pub(crate) exceptions: ExceptionQueue,
    pub(crate) modulator: RefCell<Modulator>,
    pub(crate) reactor: Reactor,
    ready: Cell<bool>,
    started: Instant,
    frame_counter_start: Cell<Instant>,
    frame_count: Cell<u64>,
}

impl RuntimeState {
    pub(crate) fn is_ready(&self) -> bool {
        self.ready.get()
    }

    /// One-way: once ready, the runtime never goes back.
    pub(crate) fn set_ready(&self) {
        if !self.ready.replace(true) {
            tracing::info!(target: "pawnhost", "script layer signalled readiness");
        }
    }

    /// Monotonic milliseconds since the runtime was created.
    pub(crate) fn high_resolution_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1_000.0
    }

    /// Elapsed milliseconds and average frames per second since the previous
    /// call, then resets both counters. Single-threaded by construction, so
    /// the read and the reset cannot race a frame tick.
    pub(crate) fn get_and_reset_frame_counter(&self) -> (f64, f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.frame_counter_start.get());
        let frames = self.frame_count.get();

        self.frame_counter_start.set(now);
        self.frame_count.set(0);

        let duration = elapsed.as_secs_f64() * 1_000.0;
        let fps = if elapsed.as_secs_f64() > 0.0 {
            frames as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        (duration, fps)
    }

    pub(crate) fn count_frame(&self) {
        self.frame_count.set(self.frame_count.get() + 1);
    }

    pub(crate) fn statistics(&self) -> RuntimeStatistics {
        RuntimeStatistics {
            deferred_event_queue_size: self.global.deferred_event_count(),
            event_handler_size: self.global.event_handler_count(),
            exception_handler_queue_size: self.exceptions.len(),
            timer_queue_size: self.timers.len(),
        }
    }
}

/// The runtime host: owns the engine, the global scope and every supporting
/// queue, and drives them once per server frame.
///
/// Everything that touches engine state, from promise resolution to event
/// dispatch, runs on the thread that created the runtime, either inside
/// [`Runtime::on_frame`] or inside a native call rooted in script execution.
/// That single-thread discipline is what makes the host correct without any
/// locking of engine state.
pub struct Runtime {
    state: Rc<RuntimeState>,
    engine: Engine,
    observers: RefCell<Vec<Weak<dyn FrameObserver>>>,
    boot_deadline: Duration,
    initialized: Cell<bool>,
}

impl Runtime {
    /// Builds the engine and every owned subsystem. Nothing executes until
    /// [`Runtime::initialize`] installs the bridge and a script is run.
    pub fn create(
        options: RuntimeOptions,
        delegate: Rc<dyn RuntimeDelegate>,
        controller: Rc<dyn HostController>,
    ) -> Result<Self> {
        let engine = Engine::new()?;
        let now = Instant::now();

        let state = Rc::new(RuntimeState {
            delegate,
            controller,
            global: GlobalScope::new(),
            timers: TimerQueue::new(),
            exceptions: ExceptionQueue::new(),
            modulator: RefCell::new(Modulator::new(options.source_directory)),
            reactor: Reactor::new()?,
            ready: Cell::new(false),
            started: now,
            frame_counter_start: Cell::new(now),
            frame_count: Cell::new(0),
        });

        Ok(Self {
            state,
            engine,
            observers: RefCell::new(Vec::new()),
            boot_deadline: options.boot_deadline,
            initialized: Cell::new(false),
        })
    }

    /// Registers the descriptor for an event type raised by native code.
    /// Registrations must be in place before [`Runtime::initialize`] runs.
    pub fn register_event(&self, event_type: impl Into<String>, event: Event) {
        self.state.global.register_event(event_type, event);
    }

    /// Installs the native bridge surface into the context. Call exactly
    /// once, after the event registrations are populated.
    pub fn initialize(&self) -> Result<()> {
        if self.initialized.replace(true) {
            bail!("the runtime has already been initialized");
        }

        self.engine.with(|ctx| {
            bindings::install(&ctx, &self.state)?;
            builtins::install(&ctx, &self.state)?;
            console::install(&ctx, Rc::clone(&self.state.delegate))?;
            ctx.eval::<(), _>(GLOBAL_ALIASES.as_bytes())
        })?;

        Ok(())
    }

    /// Loads `specifier` through the module cache and evaluates it. An
    /// uncaught script error lands in the exception queue rather than
    /// propagating: one broken script must not take the server down.
    pub fn execute(&self, specifier: &str) -> Result<()> {
        let (source, filename) = {
            let mut modulator = self.state.modulator.borrow_mut();
            let module = modulator.load(specifier)?;
            (module.source.clone(), module.path.display().to_string())
        };

        match self.engine.eval(&source, &filename)? {
            EvalOutcome::Completed => {}
            EvalOutcome::Exception(record) => self.state.exceptions.capture(record),
        }

        self.engine.drain_jobs(&self.state.exceptions);
        Ok(())
    }

    /// Evaluates a script chunk directly. Exceptions surface as errors;
    /// meant for tests and embedder tooling, not for module loading.
    pub fn eval(&self, source: &str, filename: &str) -> Result<()> {
        self.eval_with::<()>(source, filename)
    }

    /// Evaluates a script chunk and deserializes its completion value.
    pub fn eval_with<V>(&self, source: &str, filename: &str) -> Result<V>
    where
        V: for<'js> rquickjs::FromJs<'js>,
    {
        let value = self.engine.eval_with(source, filename)?;
        self.engine.drain_jobs(&self.state.exceptions);
        Ok(value)
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn set_ready(&self) {
        self.state.set_ready();
    }

    /// Cooperatively waits for the script layer to signal readiness,
    /// ticking the frame loop with a bounded sleep between passes. If the
    /// script never becomes ready within the boot deadline the host is not
    /// in a runnable state, and the process terminates.
    pub fn spin_until_ready(&self) {
        let deadline = Instant::now() + self.boot_deadline;

        while !self.is_ready() {
            self.on_frame();
            if self.is_ready() {
                break;
            }

            if Instant::now() >= deadline {
                tracing::error!(target: "pawnhost", "script never signalled readiness");
                self.state.delegate.on_script_error(
                    "unknown",
                    0,
                    "the script layer never signalled readiness; terminating",
                );
                std::process::exit(-1);
            }

            thread::sleep(Duration::from_millis(1));
        }
    }

    /// One server frame: a bounded pass over completed native work, the
    /// timer resolution pass, a microtask drain, then the frame observers in
    /// registration order.
    pub fn on_frame(&self) {
        let result = self.engine.with(|ctx| {
            self.state.reactor.poll(&ctx);
            self.state.timers.resolve_due(&ctx, Instant::now());
            Ok(())
        });
        if let Err(err) = result {
            tracing::error!(target: "pawnhost", error = %err, "frame pass failed");
        }

        self.engine.drain_jobs(&self.state.exceptions);

        let observers: Vec<Rc<dyn FrameObserver>> = {
            let mut observers = self.observers.borrow_mut();
            observers.retain(|weak| weak.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            observer.on_frame();
        }

        self.state.count_frame();
    }

    /// Set semantics: re-adding a registered observer is a no-op. The
    /// runtime holds no ownership; a dropped observer silently unregisters.
    pub fn add_frame_observer(&self, observer: &Rc<dyn FrameObserver>) {
        let candidate = Rc::downgrade(observer);
        let mut observers = self.observers.borrow_mut();
        if observers.iter().any(|existing| existing.ptr_eq(&candidate)) {
            return;
        }
        observers.push(candidate);
    }

    /// Removing an observer that was never added is a no-op.
    pub fn remove_frame_observer(&self, observer: &Rc<dyn FrameObserver>) {
        let candidate = Rc::downgrade(observer);
        self.observers
            .borrow_mut()
            .retain(|existing| !existing.ptr_eq(&candidate));
    }

    pub fn get_and_reset_frame_counter(&self) -> (f64, f64) {
        self.state.get_and_reset_frame_counter()
    }

    /// Raises an event from native code. Before readiness the event is
    /// deferred for later replay through `getDeferredEvents()`; afterwards
    /// it dispatches immediately. Returns whether any listener prevented
    /// the default action.
    pub fn dispatch_event(&self, event_type: &str, arguments: Arguments) -> bool {
        if !self.is_ready() {
            self.state.global.store_deferred_event(event_type, arguments);
            return false;
        }

        let dispatched = self.engine.with(|ctx| {
            let Some(instance) = self
                .state
                .global
                .new_event_instance(&ctx, event_type, &arguments)
            else {
                tracing::warn!(
                    target: "pawnhost",
                    event = event_type,
                    "dispatch of an unregistered event type"
                );
                return Ok(false);
            };

            Ok(self.state.global.dispatch_event(
                &ctx,
                &self.state.exceptions,
                event_type,
                instance?.into_value(),
            ))
        });

        self.engine.drain_jobs(&self.state.exceptions);

        dispatched.unwrap_or_else(|err| {
            tracing::error!(target: "pawnhost", error = %err, "event dispatch failed");
            false
        })
    }

    /// Queues an event for replay before the script layer is ready.
    pub fn store_deferred_event(&self, event_type: &str, arguments: Arguments) {
        self.state.global.store_deferred_event(event_type, arguments);
    }

    /// Calls a native the script provided through `provideNative`.
    pub fn call_native(
        &self,
        name: &str,
        arguments: &Arguments,
    ) -> Result<Option<PawnValue>, BridgeError> {
        let result = self
            .engine
            .with(|ctx| Ok(self.state.global.natives().call(&ctx, name, arguments)))
            .map_err(|err| BridgeError::Engine {
                name: name.to_string(),
                message: err.to_string(),
            })?;

        self.engine.drain_jobs(&self.state.exceptions);
        result
    }

    pub fn clear_module_cache(&self, prefix: &str) {
        self.state.modulator.borrow_mut().clear_cache(prefix);
    }

    pub fn has_queued_exceptions(&self) -> bool {
        self.state.exceptions.has_queued_messages()
    }

    /// Reports every queued exception through the delegate, oldest first.
    pub fn flush_exception_queue(&self) {
        self.state
            .exceptions
            .flush_message_queue(self.state.delegate.as_ref());
    }

    pub fn statistics(&self) -> RuntimeStatistics {
        self.state.statistics()
    }

    /// Shutdown audit: warns about leftover listeners, per event type.
    pub fn verify_no_event_handlers_left(&self) -> usize {
        self.state.global.verify_no_event_handlers_left()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.state.global.finalize();
        self.state.global.verify_no_event_handlers_left();

        // Persistent handles must not outlive the engine they point into.
        self.state.global.dispose();
        self.state.timers.clear();
        self.state.reactor.clear_pending();
    }
}
