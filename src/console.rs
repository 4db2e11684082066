use std::rc::Rc;

use rquickjs::{Ctx, Function};

use crate::runtime::RuntimeDelegate;

const CONSOLE_BOOTSTRAP: &str = r#"
(() => {
    const global = globalThis;
    const stringify = (value) => {
        try {
            if (typeof value === 'string') {
                return value;
            }
            if (value === undefined) {
                return 'undefined';
            }
            if (value === null) {
                return 'null';
            }
            if (typeof value === 'object') {
                try {
                    return JSON.stringify(value);
                } catch (err) {
                    return String(value);
                }
            }
            return String(value);
        } catch (err) {
            return '[unprintable]';
        }
    };

    const makeLogger = (level) => (...args) => {
        try {
            global.__pawnhost_log(level, args.map(stringify).join(' '));
        } catch (err) {
            // The console must never throw.
        }
    };

    global.console = {
        log: makeLogger('log'),
        info: makeLogger('info'),
        warn: makeLogger('warn'),
        error: makeLogger('error'),
    };
})();
"#;

/// Installs the `console` object. Output flows to the embedder through the
/// delegate, with a copy on the tracing stream for local diagnostics.
pub(crate) fn install<'js>(
    ctx: &Ctx<'js>,
    delegate: Rc<dyn RuntimeDelegate>,
) -> rquickjs::Result<()> {
    let global = ctx.globals();

    let log_fn = Function::new(
        ctx.clone(),
        move |level: String, message: String| -> rquickjs::Result<()> {
            match level.as_str() {
                "warn" => tracing::warn!(target: "quickjs", "{message}"),
                "error" => tracing::error!(target: "quickjs", "{message}"),
                _ => tracing::info!(target: "quickjs", "{message}"),
            }
            delegate.on_script_output(&message);
            Ok(())
        },
    )?
    .with_name("__pawnhost_log")?;
    global.set("__pawnhost_log", log_fn)?;

    ctx.eval::<(), _>(CONSOLE_BOOTSTRAP.as_bytes())
}
