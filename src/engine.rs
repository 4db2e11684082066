use anyhow::{Context as AnyhowContext, Result};
use rquickjs::{Context, Ctx, Error as JsError};

use crate::exceptions::{record_from_value, ExceptionQueue, ExceptionRecord};

/// QuickJS engine wrapper: one runtime, one context, for the lifetime of the
/// host. Every touch of engine state goes through [`Engine::with`], which
/// keeps all isolate access on the constructing thread by construction
/// (neither the runtime nor the context are `Send`).
pub struct Engine {
    runtime: rquickjs::Runtime,
    context: Context,
}

/// Outcome of evaluating a chunk of script.
pub enum EvalOutcome {
    Completed,
    /// The script threw and the error was captured as a structured record.
    Exception(ExceptionRecord),
}

impl Engine {
    pub fn new() -> Result<Self> {
        let runtime = rquickjs::Runtime::new().context("failed to create QuickJS runtime")?;
        let context = Context::full(&runtime).context("failed to create QuickJS context")?;
        Ok(Self { runtime, context })
    }

    /// Runs `f` with the live context. The single funnel for engine access.
    pub fn with<T, F>(&self, f: F) -> Result<T>
    where
        F: for<'js> FnOnce(Ctx<'js>) -> rquickjs::Result<T>,
    {
        self.context.with(f).map_err(anyhow::Error::from)
    }

    /// Evaluates `source`, annotated so stack traces point at `filename`.
    pub fn eval(&self, source: &str, filename: &str) -> Result<EvalOutcome> {
        let script = Self::with_source_url(source, filename);
        let result = self.context.with(|ctx| {
            match ctx.eval::<(), _>(script.as_bytes()) {
                Ok(()) => Ok(EvalOutcome::Completed),
                Err(JsError::Exception) => {
                    Ok(EvalOutcome::Exception(record_from_value(&ctx, ctx.catch())))
                }
                Err(err) => Err(err),
            }
        });
        result.map_err(anyhow::Error::from)
    }

    /// Evaluates `source` and deserializes the completion value into `V`.
    /// Script exceptions surface as errors; used by tests and tooling.
    pub fn eval_with<V>(&self, source: &str, filename: &str) -> Result<V>
    where
        V: for<'js> rquickjs::FromJs<'js>,
    {
        let script = Self::with_source_url(source, filename);
        let result = self.context.with(|ctx| {
            match ctx.eval::<V, _>(script.as_bytes()) {
                Ok(value) => Ok(Ok(value)),
                Err(JsError::Exception) => Ok(Err(record_from_value(&ctx, ctx.catch()))),
                Err(err) => Err(err),
            }
        });

        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(record)) => Err(anyhow::anyhow!(
                "{}:{}: {}",
                record.filename,
                record.line,
                record.message
            )),
            Err(err) => Err(anyhow::Error::from(err)),
        }
    }

    /// Executes pending promise continuations and other microtask jobs.
    ///
    /// Bounded per pass so a misbehaving job chain cannot wedge the frame.
    /// Job exceptions land in the exception queue and stop the pass; the
    /// remaining jobs get their turn on the next frame.
    pub fn drain_jobs(&self, exceptions: &ExceptionQueue) -> usize {
        const MAX_JOBS: usize = 1000;

        let mut executed = 0;
        while self.runtime.is_job_pending() {
            match self.runtime.execute_pending_job() {
                Ok(true) => {
                    executed += 1;
                    if executed >= MAX_JOBS {
                        tracing::warn!(
                            target: "quickjs",
                            "stopped processing jobs after {MAX_JOBS} iterations"
                        );
                        break;
                    }
                }
                Ok(false) => break,
                Err(job_exception) => {
                    tracing::error!(target: "quickjs", "job execution error: {job_exception:?}");
                    exceptions.capture(ExceptionRecord {
                        filename: "unknown".to_string(),
                        line: 0,
                        message: format!("uncaught error in a pending job: {job_exception:?}"),
                        source: None,
                    });
                    break;
                }
            }
        }

        executed
    }

    fn with_source_url(source: &str, filename: &str) -> String {
        let mut script = String::with_capacity(source.len() + filename.len() + 32);
        script.push_str(source);
        if !source.ends_with('\n') {
            script.push('\n');
        }
        script.push_str("//# sourceURL=");
        script.push_str(filename);
        script.push('\n');
        script
    }
}
