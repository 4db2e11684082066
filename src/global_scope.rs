use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use rquickjs::{Array, Ctx, Function, Object, Persistent, Value};

use crate::event::Event;
use crate::exceptions::{ExceptionQueue, ScopedExceptionSource};
use crate::pawn::{Arguments, ProvidedNatives};

/// The script-visible global scope: the event-listener registry, the
/// deferred-event queue and the provided-natives surface.
///
/// Listener lists are ordered and may contain duplicates; dispatch walks a
/// snapshot so listeners can add or remove themselves without skipping or
/// re-invoking anyone else in the pass.
pub struct GlobalScope {
    listeners: RefCell<HashMap<String, Vec<Persistent<Function<'static>>>>>,
    events: RefCell<HashMap<String, Event>>,
    deferred: RefCell<Vec<(String, Arguments)>>,
    natives: ProvidedNatives,
    finalized: Cell<bool>,
}

impl GlobalScope {
    pub fn new() -> Self {
        Self {
            listeners: RefCell::new(HashMap::new()),
            events: RefCell::new(HashMap::new()),
            deferred: RefCell::new(Vec::new()),
            natives: ProvidedNatives::new(),
            finalized: Cell::new(false),
        }
    }

    /// Registers the descriptor used to build instances of `event_type` from
    /// native argument bags. Replaces any earlier registration.
    pub fn register_event(&self, event_type: impl Into<String>, event: Event) {
        self.events.borrow_mut().insert(event_type.into(), event);
    }

    /// Marks the scope as shut down; further dispatch becomes a no-op.
    pub fn finalize(&self) {
        self.finalized.set(true);
    }

    pub fn add_event_listener<'js>(&self, ctx: &Ctx<'js>, event_type: &str, listener: Function<'js>) {
        self.listeners
            .borrow_mut()
            .entry(event_type.to_string())
            .or_default()
            .push(Persistent::save(ctx, listener));
    }

    /// Removes listeners for `event_type`. Without a handler the whole list
    /// goes; with one, every occurrence of that handler goes while other
    /// listeners stay registered.
    pub fn remove_event_listener<'js>(
        &self,
        ctx: &Ctx<'js>,
        event_type: &str,
        listener: Option<Function<'js>>,
    ) {
        let Some(listener) = listener else {
            self.listeners.borrow_mut().remove(event_type);
            return;
        };

        let same_function: Function = match ctx.eval("Object.is") {
            Ok(function) => function,
            Err(err) => {
                tracing::error!(target: "pawnhost", error = %err, "failed to resolve Object.is");
                return;
            }
        };

        let mut listeners = self.listeners.borrow_mut();
        let Some(registered) = listeners.get_mut(event_type) else {
            return;
        };

        registered.retain(|persistent| {
            let Ok(candidate) = persistent.clone().restore(ctx) else {
                return false;
            };
            !same_function
                .call::<_, bool>((candidate, listener.clone()))
                .unwrap_or(false)
        });
    }

    pub fn has_event_listeners(&self, event_type: &str) -> bool {
        self.listeners
            .borrow()
            .get(event_type)
            .is_some_and(|listeners| !listeners.is_empty())
    }

    /// Invokes every current listener for `event_type` with `payload`, in
    /// registration order. Returns whether any listener prevented the
    /// default action. No listeners means `false`, not an error: native code
    /// raises events speculatively.
    ///
    /// A listener that throws is captured by the exception queue, tagged
    /// with the event type, and the remaining listeners still run.
    pub fn dispatch_event<'js>(
        &self,
        ctx: &Ctx<'js>,
        exceptions: &ExceptionQueue,
        event_type: &str,
        payload: Value<'js>,
    ) -> bool {
        if self.finalized.get() {
            return false;
        }

        let snapshot: Vec<Persistent<Function<'static>>> = {
            let listeners = self.listeners.borrow();
            match listeners.get(event_type) {
                Some(registered) if !registered.is_empty() => registered.clone(),
                _ => return false,
            }
        };

        let _source =
            ScopedExceptionSource::new(exceptions, format!("dispatched event `{event_type}`"));

        for persistent in snapshot {
            let listener = match persistent.restore(ctx) {
                Ok(listener) => listener,
                Err(err) => {
                    tracing::warn!(
                        target: "quickjs",
                        event = event_type,
                        error = %err,
                        "unable to restore a listener handle"
                    );
                    continue;
                }
            };

            match listener.call::<_, ()>((payload.clone(),)) {
                Ok(()) => {}
                Err(rquickjs::Error::Exception) => exceptions.capture_from_context(ctx),
                Err(err) => {
                    tracing::error!(
                        target: "quickjs",
                        event = event_type,
                        error = %err,
                        "listener invocation failed"
                    );
                }
            }
        }

        Event::default_prevented(&payload)
    }

    /// Queues an event raised before script listeners could exist, for
    /// replay once the script layer asks for it.
    pub fn store_deferred_event(&self, event_type: impl Into<String>, arguments: Arguments) {
        self.deferred.borrow_mut().push((event_type.into(), arguments));
    }

    /// Drains the deferred queue into an array of `{type, event}` records in
    /// original arrival order. Entries without a registered descriptor are
    /// dropped with a warning. Each entry is delivered at most once.
    pub fn drain_deferred_events<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Array<'js>> {
        let drained: Vec<(String, Arguments)> = self.deferred.borrow_mut().drain(..).collect();

        let events = Array::new(ctx.clone())?;
        let descriptors = self.events.borrow();

        let mut index = 0;
        for (event_type, arguments) in drained {
            let Some(descriptor) = descriptors.get(&event_type) else {
                tracing::warn!(
                    target: "pawnhost",
                    event = event_type.as_str(),
                    "unrecognized event name, dropping deferred event"
                );
                continue;
            };

            let record = Object::new(ctx.clone())?;
            record.set("type", event_type.as_str())?;
            record.set("event", descriptor.new_instance(ctx, &arguments)?)?;

            events.set(index, record)?;
            index += 1;
        }

        Ok(events)
    }

    /// Builds an instance of `event_type` from `arguments` using the
    /// registered descriptor.
    pub fn new_event_instance<'js>(
        &self,
        ctx: &Ctx<'js>,
        event_type: &str,
        arguments: &Arguments,
    ) -> Option<rquickjs::Result<Object<'js>>> {
        self.events
            .borrow()
            .get(event_type)
            .map(|descriptor| descriptor.new_instance(ctx, arguments))
    }

    /// Shutdown diagnostic. Logs a warning per event type that still has
    /// listeners and leaves the map intact so the leak stays visible; only
    /// clears the map when nothing is left anywhere.
    pub fn verify_no_event_handlers_left(&self) -> usize {
        let mut warnings = 0;

        {
            let listeners = self.listeners.borrow();
            for (event_type, registered) in listeners.iter() {
                if registered.is_empty() {
                    continue;
                }
                tracing::warn!(
                    target: "pawnhost",
                    event = event_type.as_str(),
                    count = registered.len(),
                    "event still has attached listeners"
                );
                warnings += 1;
            }
        }

        if warnings > 0 {
            tracing::warn!(target: "pawnhost", "not clearing the event listener map");
        } else {
            self.listeners.borrow_mut().clear();
        }

        warnings
    }

    pub fn event_handler_count(&self) -> usize {
        self.listeners
            .borrow()
            .values()
            .map(|registered| registered.len())
            .sum()
    }

    pub fn deferred_event_count(&self) -> usize {
        self.deferred.borrow().len()
    }

    pub fn natives(&self) -> &ProvidedNatives {
        &self.natives
    }

    /// Unconditionally drops every listener handle. Runs at teardown, after
    /// the leftover audit, so persistent handles never outlive the engine.
    pub(crate) fn dispose(&self) {
        self.listeners.borrow_mut().clear();
        self.deferred.borrow_mut().clear();
        self.natives.clear();
    }
}

impl Default for GlobalScope {
    fn default() -> Self {
        Self::new()
    }
}
