use std::cell::Cell;

use rquickjs::{Ctx, Function, Object, Persistent, Value};

const PROMISE_CAPTURE: &str = r#"
(() => {
    const capture = {};
    capture.promise = new Promise((resolve, reject) => {
        capture.resolve = resolve;
        capture.reject = reject;
    });
    return capture;
})()
"#;

/// A single-resolution future visible to script.
///
/// The promise object and its resolver functions are captured from a JS
/// `new Promise` executor and held as persistent handles, so the promise can
/// outlive the stack frame that created it and settle on a later tick.
pub struct ScriptPromise {
    promise: Persistent<Value<'static>>,
    resolve: Persistent<Function<'static>>,
    reject: Persistent<Function<'static>>,
    settled: Cell<bool>,
}

impl ScriptPromise {
    pub fn new<'js>(ctx: &Ctx<'js>) -> rquickjs::Result<Self> {
        let capture: Object = ctx.eval(PROMISE_CAPTURE)?;
        let promise: Value = capture.get("promise")?;
        let resolve: Function = capture.get("resolve")?;
        let reject: Function = capture.get("reject")?;

        Ok(Self {
            promise: Persistent::save(ctx, promise),
            resolve: Persistent::save(ctx, resolve),
            reject: Persistent::save(ctx, reject),
            settled: Cell::new(false),
        })
    }

    /// The engine-visible promise object, for returning to script callers.
    pub fn value<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<Value<'js>> {
        self.promise.clone().restore(ctx)
    }

    /// Fulfills the promise. Settling twice is a programming error; the
    /// second call is dropped so script never observes a double delivery.
    pub fn resolve<'js>(&self, ctx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<()> {
        if self.settled.replace(true) {
            tracing::warn!(target: "pawnhost", "ignoring second resolution of a settled promise");
            return Ok(());
        }
        self.resolve.clone().restore(ctx)?.call::<_, ()>((value,))
    }

    /// Fulfills the promise with `undefined`.
    pub fn resolve_undefined<'js>(&self, ctx: &Ctx<'js>) -> rquickjs::Result<()> {
        if self.settled.replace(true) {
            tracing::warn!(target: "pawnhost", "ignoring second resolution of a settled promise");
            return Ok(());
        }
        self.resolve.clone().restore(ctx)?.call::<_, ()>(())
    }

    pub fn reject<'js>(&self, ctx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<()> {
        if self.settled.replace(true) {
            tracing::warn!(target: "pawnhost", "ignoring rejection of a settled promise");
            return Ok(());
        }
        self.reject.clone().restore(ctx)?.call::<_, ()>((value,))
    }
}
