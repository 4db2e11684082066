use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;

use anyhow::{Context as AnyhowContext, Result};
use rquickjs::{Array, Ctx, IntoJs, Object, Value};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::promise::ScriptPromise;

/// Completions processed per frame. A burst of finished native work spreads
/// across several frames instead of stalling one.
const FRAME_BUDGET: usize = 64;

/// How a native asynchronous operation finished.
pub enum Outcome {
    Resolve(serde_json::Value),
    Reject(String),
}

struct Completion {
    token: u64,
    outcome: Outcome,
}

/// The host's asynchronous substrate.
///
/// Native async work runs on an owned tokio runtime; completions come back
/// as plain data over a channel and are only applied to engine state when
/// [`Reactor::poll`] runs on the owning thread, once per frame. That polling
/// point is the sole suspension point for script-visible async operations.
pub struct Reactor {
    runtime: tokio::runtime::Runtime,
    completions_tx: UnboundedSender<Completion>,
    completions_rx: RefCell<UnboundedReceiver<Completion>>,
    pending: RefCell<HashMap<u64, ScriptPromise>>,
    next_token: Cell<u64>,
}

impl Reactor {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .context("failed to start the reactor runtime")?;

        let (completions_tx, completions_rx) = unbounded_channel();

        Ok(Self {
            runtime,
            completions_tx,
            completions_rx: RefCell::new(completions_rx),
            pending: RefCell::new(HashMap::new()),
            next_token: Cell::new(1),
        })
    }

    /// Registers a promise awaiting a native completion. Returns the token
    /// the eventual completion must carry.
    pub fn register(&self, promise: ScriptPromise) -> u64 {
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        self.pending.borrow_mut().insert(token, promise);
        token
    }

    /// Spawns `work` onto the reactor runtime. Its outcome settles the
    /// promise registered under `token` on a later frame.
    pub fn spawn(&self, token: u64, work: impl Future<Output = Outcome> + Send + 'static) {
        let tx = self.completions_tx.clone();
        self.runtime.spawn(async move {
            let outcome = work.await;
            let _ = tx.send(Completion { token, outcome });
        });
    }

    /// One bounded, non-blocking pass over completed native work. Settles
    /// each matching promise on the calling (owning) thread.
    pub fn poll<'js>(&self, ctx: &Ctx<'js>) -> usize {
        let mut completions = Vec::new();
        {
            let mut rx = self.completions_rx.borrow_mut();
            while completions.len() < FRAME_BUDGET {
                match rx.try_recv() {
                    Ok(completion) => completions.push(completion),
                    Err(_) => break,
                }
            }
        }

        let mut settled = 0;
        for completion in completions {
            let Some(promise) = self.pending.borrow_mut().remove(&completion.token) else {
                tracing::warn!(
                    target: "pawnhost",
                    token = completion.token,
                    "completion for an unknown token"
                );
                continue;
            };

            let result = match completion.outcome {
                Outcome::Resolve(payload) => json_to_js(ctx, &payload)
                    .and_then(|value| promise.resolve(ctx, value)),
                Outcome::Reject(message) => reject_value(ctx, &message)
                    .and_then(|value| promise.reject(ctx, value)),
            };

            if let Err(err) = result {
                tracing::error!(target: "pawnhost", error = %err, "failed to settle a native promise");
            } else {
                settled += 1;
            }
        }

        settled
    }

    /// Drops every pending promise. Shutdown only.
    pub fn clear_pending(&self) {
        self.pending.borrow_mut().clear();
    }
}

fn reject_value<'js>(ctx: &Ctx<'js>, message: &str) -> rquickjs::Result<Value<'js>> {
    let error = Object::new(ctx.clone())?;
    error.set("message", message)?;
    Ok(error.into_value())
}

/// Converts a JSON payload into an engine value.
pub(crate) fn json_to_js<'js>(
    ctx: &Ctx<'js>,
    payload: &serde_json::Value,
) -> rquickjs::Result<Value<'js>> {
    match payload {
        serde_json::Value::Null => Ok(Value::new_null(ctx.clone())),
        serde_json::Value::Bool(value) => Ok(Value::new_bool(ctx.clone(), *value)),
        serde_json::Value::Number(value) => match value.as_i64().and_then(|i| i32::try_from(i).ok())
        {
            Some(int) => Ok(Value::new_int(ctx.clone(), int)),
            None => Ok(Value::new_float(ctx.clone(), value.as_f64().unwrap_or(0.0))),
        },
        serde_json::Value::String(value) => value.as_str().into_js(ctx),
        serde_json::Value::Array(items) => {
            let array = Array::new(ctx.clone())?;
            for (index, item) in items.iter().enumerate() {
                array.set(index, json_to_js(ctx, item)?)?;
            }
            Ok(array.into_value())
        }
        serde_json::Value::Object(map) => {
            let object = Object::new(ctx.clone())?;
            for (key, item) in map {
                object.set(key.as_str(), json_to_js(ctx, item)?)?;
            }
            Ok(object.into_value())
        }
    }
}
