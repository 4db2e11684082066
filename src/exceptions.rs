use std::cell::RefCell;
use std::collections::VecDeque;

use rquickjs::{Coerced, Ctx, FromJs, Value};

use crate::runtime::RuntimeDelegate;

/// A captured uncaught script error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRecord {
    pub filename: String,
    pub line: u32,
    pub message: String,
    /// Dispatch context active when the error was captured, e.g.
    /// "dispatched event `playerconnect`".
    pub source: Option<String>,
}

/// FIFO queue of uncaught script errors.
///
/// This is the terminal sink for script errors: capturing never throws, so a
/// broken listener can never take the frame loop down with it. Entries stay
/// queued until explicitly flushed through the delegate.
#[derive(Default)]
pub struct ExceptionQueue {
    queue: RefCell<VecDeque<ExceptionRecord>>,
    sources: RefCell<Vec<String>>,
}

impl ExceptionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures the pending engine exception. Must be called with the
    /// exception still set on the context, i.e. right after a call returned
    /// `Error::Exception`.
    pub fn capture_from_context<'js>(&self, ctx: &Ctx<'js>) {
        let record = record_from_value(ctx, ctx.catch());
        self.capture(record);
    }

    pub fn capture(&self, mut record: ExceptionRecord) {
        record.source = self.sources.borrow().last().cloned();

        tracing::error!(
            target: "quickjs",
            filename = %record.filename,
            line = record.line,
            source = record.source.as_deref().unwrap_or("none"),
            "{}", record.message
        );

        self.queue.borrow_mut().push_back(record);
    }

    pub fn has_queued_messages(&self) -> bool {
        !self.queue.borrow().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Drains the queue, reporting every record through the delegate in
    /// arrival order.
    pub fn flush_message_queue(&self, delegate: &dyn RuntimeDelegate) {
        let drained: Vec<ExceptionRecord> = self.queue.borrow_mut().drain(..).collect();
        for record in drained {
            let message = match &record.source {
                Some(source) => format!("{} (while {})", record.message, source),
                None => record.message.clone(),
            };
            delegate.on_script_error(&record.filename, record.line, &message);
        }
    }

    fn push_source(&self, label: String) {
        self.sources.borrow_mut().push(label);
    }

    fn pop_source(&self) {
        self.sources.borrow_mut().pop();
    }
}

/// Tags every exception captured while it is alive with the named operation.
pub struct ScopedExceptionSource<'a> {
    queue: &'a ExceptionQueue,
}

impl<'a> ScopedExceptionSource<'a> {
    pub fn new(queue: &'a ExceptionQueue, label: impl Into<String>) -> Self {
        queue.push_source(label.into());
        Self { queue }
    }
}

impl Drop for ScopedExceptionSource<'_> {
    fn drop(&mut self) {
        self.queue.pop_source();
    }
}

/// Builds a structured record from a caught exception value. QuickJS error
/// objects carry `message`, `fileName`, `lineNumber` and `stack` properties;
/// anything else is coerced to a string.
pub(crate) fn record_from_value<'js>(ctx: &Ctx<'js>, caught: Value<'js>) -> ExceptionRecord {
    if let Some(object) = caught.as_object() {
        let message = object
            .get::<_, Option<Coerced<String>>>("message")
            .ok()
            .flatten()
            .map(|value| value.0);

        if let Some(message) = message {
            let filename = object
                .get::<_, Option<Coerced<String>>>("fileName")
                .ok()
                .flatten()
                .map(|value| value.0)
                .unwrap_or_else(|| "unknown".to_string());
            let line = object
                .get::<_, Option<Coerced<f64>>>("lineNumber")
                .ok()
                .flatten()
                .map(|value| value.0 as u32)
                .unwrap_or(0);

            return ExceptionRecord {
                filename,
                line,
                message,
                source: None,
            };
        }
    }

    let message = match Coerced::<String>::from_js(ctx, caught) {
        Ok(value) => value.0,
        Err(err) => format!("(failed to stringify exception: {err})"),
    };

    ExceptionRecord {
        filename: "unknown".to_string(),
        line: 0,
        message,
        source: None,
    }
}
