use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use rquickjs::{Ctx, Function, Persistent, Value};
use thiserror::Error;

/// A single value crossing the Pawn native-call boundary.
///
/// Pawn cells are 32 bits wide, so integers and floats keep that width here.
#[derive(Debug, Clone, PartialEq)]
pub enum PawnValue {
    Int(i32),
    Float(f32),
    String(String),
}

impl fmt::Display for PawnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PawnValue::Int(value) => write!(f, "{value}"),
            PawnValue::Float(value) => write!(f, "{value}"),
            PawnValue::String(value) => write!(f, "{value}"),
        }
    }
}

/// Declared parameter kind in a native signature string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PawnKind {
    Int,
    Float,
    String,
}

impl PawnKind {
    pub fn describe(self) -> &'static str {
        match self {
            PawnKind::Int => "an integer",
            PawnKind::Float => "a number",
            PawnKind::String => "a string",
        }
    }
}

/// Errors raised at the native bridge boundary.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("argument `{name}` is missing")]
    MissingArgument { name: String },

    #[error("argument `{name}` is not {expected}")]
    ArgumentType {
        name: String,
        expected: &'static str,
    },

    #[error("signature `{signature}` declares {expected} parameters, but {actual} were provided")]
    ArityMismatch {
        signature: String,
        expected: usize,
        actual: usize,
    },

    #[error("malformed signature `{signature}`: {reason}")]
    MalformedSignature { signature: String, reason: String },

    #[error("a native named `{name}` has already been provided")]
    DuplicateNative { name: String },

    #[error("no native named `{name}` has been provided")]
    UnknownNative { name: String },

    #[error("engine fault while invoking `{name}`: {message}")]
    Engine { name: String, message: String },
}

/// Ordered, named bag of native argument values.
///
/// Insertion order is significant: it mirrors the parameter order of the
/// originating callback, and positional marshaling relies on it.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: Vec<(String, PawnValue)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: PawnValue) {
        self.values.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&PawnValue> {
        self.values
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, value)| value)
    }

    pub fn get_integer(&self, name: &str) -> Result<i32, BridgeError> {
        match self.get(name) {
            Some(PawnValue::Int(value)) => Ok(*value),
            Some(_) => Err(BridgeError::ArgumentType {
                name: name.to_string(),
                expected: "an integer",
            }),
            None => Err(BridgeError::MissingArgument {
                name: name.to_string(),
            }),
        }
    }

    pub fn get_float(&self, name: &str) -> Result<f32, BridgeError> {
        match self.get(name) {
            Some(PawnValue::Float(value)) => Ok(*value),
            Some(PawnValue::Int(value)) => Ok(*value as f32),
            Some(_) => Err(BridgeError::ArgumentType {
                name: name.to_string(),
                expected: "a number",
            }),
            None => Err(BridgeError::MissingArgument {
                name: name.to_string(),
            }),
        }
    }

    pub fn get_string(&self, name: &str) -> Result<&str, BridgeError> {
        match self.get(name) {
            Some(PawnValue::String(value)) => Ok(value),
            Some(_) => Err(BridgeError::ArgumentType {
                name: name.to_string(),
                expected: "a string",
            }),
            None => Err(BridgeError::MissingArgument {
                name: name.to_string(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &PawnValue)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }
}

/// Parses a parameter-type signature such as `"iifs"`.
///
/// Only `i` (integer), `f` (float) and `s` (string) are understood; anything
/// else refuses the whole signature.
pub fn parse_signature(signature: &str) -> Result<Vec<PawnKind>, BridgeError> {
    signature
        .chars()
        .map(|ch| match ch {
            'i' => Ok(PawnKind::Int),
            'f' => Ok(PawnKind::Float),
            's' => Ok(PawnKind::String),
            other => Err(BridgeError::MalformedSignature {
                signature: signature.to_string(),
                reason: format!("unsupported parameter type `{other}`"),
            }),
        })
        .collect()
}

/// The server-side half of the native bridge. Implemented by the embedder.
pub trait HostController {
    /// Whether the given player's client is currently minimized. `current_time`
    /// is a monotonic timestamp in milliseconds.
    fn is_player_minimized(&self, player_id: i32, current_time: f64) -> bool;

    /// Synchronously invokes the named Pawn native with the marshaled
    /// arguments. Returns `None` when the native does not exist.
    fn invoke_native(&self, name: &str, arguments: &[PawnValue]) -> Option<PawnValue>;
}

struct ProvidedNative {
    signature: Vec<PawnKind>,
    handler: Persistent<Function<'static>>,
}

/// Registry of natives that script code provides back to the server.
///
/// Registration happens through `provideNative`; the server later calls the
/// handlers with an argument bag matching the declared signature.
#[derive(Default)]
pub struct ProvidedNatives {
    natives: RefCell<HashMap<String, ProvidedNative>>,
}

impl ProvidedNatives {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<'js>(
        &self,
        ctx: &Ctx<'js>,
        name: &str,
        signature: &str,
        handler: Function<'js>,
    ) -> Result<(), BridgeError> {
        if name.is_empty() {
            return Err(BridgeError::MalformedSignature {
                signature: signature.to_string(),
                reason: "the native name may not be empty".to_string(),
            });
        }

        let parsed = parse_signature(signature)?;

        let mut natives = self.natives.borrow_mut();
        if natives.contains_key(name) {
            return Err(BridgeError::DuplicateNative {
                name: name.to_string(),
            });
        }

        natives.insert(
            name.to_string(),
            ProvidedNative {
                signature: parsed,
                handler: Persistent::save(ctx, handler),
            },
        );

        tracing::debug!(target: "pawnhost", native = name, signature, "provided native registered");
        Ok(())
    }

    pub(crate) fn clear(&self) {
        self.natives.borrow_mut().clear();
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.natives.borrow().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.natives.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.natives.borrow().is_empty()
    }

    /// Calls a provided native with `arguments` marshaled positionally against
    /// the declared signature. The handler's return value is mapped back to a
    /// Pawn cell when possible.
    pub fn call<'js>(
        &self,
        ctx: &Ctx<'js>,
        name: &str,
        arguments: &Arguments,
    ) -> Result<Option<PawnValue>, BridgeError> {
        let (signature, handler) = {
            let natives = self.natives.borrow();
            let native = natives.get(name).ok_or_else(|| BridgeError::UnknownNative {
                name: name.to_string(),
            })?;
            (native.signature.clone(), native.handler.clone())
        };

        if signature.len() != arguments.len() {
            return Err(BridgeError::ArityMismatch {
                signature: signature_string(&signature),
                expected: signature.len(),
                actual: arguments.len(),
            });
        }

        let function = handler
            .restore(ctx)
            .map_err(|err| BridgeError::Engine {
                name: name.to_string(),
                message: err.to_string(),
            })?;

        let mut call_args = rquickjs::function::Args::new(ctx.clone(), arguments.len());
        for (kind, (arg_name, value)) in signature.iter().zip(arguments.iter()) {
            match (kind, value) {
                (PawnKind::Int, PawnValue::Int(v)) => push_arg(&mut call_args, *v, name)?,
                (PawnKind::Float, PawnValue::Float(v)) => push_arg(&mut call_args, *v as f64, name)?,
                (PawnKind::Float, PawnValue::Int(v)) => push_arg(&mut call_args, *v as f64, name)?,
                (PawnKind::String, PawnValue::String(v)) => {
                    push_arg(&mut call_args, v.clone(), name)?
                }
                (kind, _) => {
                    return Err(BridgeError::ArgumentType {
                        name: arg_name.to_string(),
                        expected: kind.describe(),
                    })
                }
            }
        }

        let result: Value = function
            .call_arg(call_args)
            .map_err(|err| BridgeError::Engine {
                name: name.to_string(),
                message: err.to_string(),
            })?;

        Ok(pawn_value_from_js(&result))
    }
}

fn push_arg<'js, T: rquickjs::IntoJs<'js>>(
    args: &mut rquickjs::function::Args<'js>,
    value: T,
    native: &str,
) -> Result<(), BridgeError> {
    args.push_arg(value).map_err(|err| BridgeError::Engine {
        name: native.to_string(),
        message: err.to_string(),
    })
}

fn signature_string(signature: &[PawnKind]) -> String {
    signature
        .iter()
        .map(|kind| match kind {
            PawnKind::Int => 'i',
            PawnKind::Float => 'f',
            PawnKind::String => 's',
        })
        .collect()
}

/// Maps a script return value back onto a Pawn cell. Whole numbers become
/// integers, other numbers become floats, strings stay strings; everything
/// else is dropped.
pub(crate) fn pawn_value_from_js(value: &Value<'_>) -> Option<PawnValue> {
    if let Some(int) = value.as_int() {
        return Some(PawnValue::Int(int));
    }
    if let Some(number) = value.as_float() {
        if number.fract() == 0.0 && number.abs() <= i32::MAX as f64 {
            return Some(PawnValue::Int(number as i32));
        }
        return Some(PawnValue::Float(number as f32));
    }
    if let Some(string) = value.as_string() {
        return string.to_string().ok().map(PawnValue::String);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_accessors_enforce_types() {
        let mut arguments = Arguments::new();
        arguments.push("playerid", PawnValue::Int(7));
        arguments.push("health", PawnValue::Float(99.5));
        arguments.push("name", PawnValue::String("Gunther".to_string()));

        assert_eq!(arguments.get_integer("playerid").unwrap(), 7);
        assert_eq!(arguments.get_float("health").unwrap(), 99.5);
        assert_eq!(arguments.get_string("name").unwrap(), "Gunther");

        // Integers widen to floats, but not the other way around.
        assert_eq!(arguments.get_float("playerid").unwrap(), 7.0);
        assert!(matches!(
            arguments.get_integer("health"),
            Err(BridgeError::ArgumentType { .. })
        ));
        assert!(matches!(
            arguments.get_string("missing"),
            Err(BridgeError::MissingArgument { .. })
        ));
    }

    #[test]
    fn arguments_preserve_insertion_order() {
        let mut arguments = Arguments::new();
        arguments.push("b", PawnValue::Int(2));
        arguments.push("a", PawnValue::Int(1));

        let names: Vec<&str> = arguments.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn signature_parsing() {
        assert_eq!(
            parse_signature("ifs").unwrap(),
            vec![PawnKind::Int, PawnKind::Float, PawnKind::String]
        );
        assert!(parse_signature("").unwrap().is_empty());
        assert!(matches!(
            parse_signature("ix"),
            Err(BridgeError::MalformedSignature { .. })
        ));
    }
}
