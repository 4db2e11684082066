use rquickjs::{Ctx, Function, Object, Value};

use crate::pawn::{Arguments, PawnKind, PawnValue};

const PREVENT_DEFAULT: &str = "(function () { this.defaultPrevented = true; })";

/// Statically registered descriptor for one event type: the named, typed
/// fields its instances carry. Instances are plain objects built from a
/// native argument bag, plus the `defaultPrevented` machinery listeners use
/// to veto default handling.
pub struct Event {
    fields: Vec<(String, PawnKind)>,
}

impl Event {
    pub fn new(fields: &[(&str, PawnKind)]) -> Self {
        Self {
            fields: fields
                .iter()
                .map(|(name, kind)| (name.to_string(), *kind))
                .collect(),
        }
    }

    /// Builds an engine-visible instance from `arguments`. Fields missing
    /// from the bag, or carrying the wrong type, become `null`.
    pub fn new_instance<'js>(
        &self,
        ctx: &Ctx<'js>,
        arguments: &Arguments,
    ) -> rquickjs::Result<Object<'js>> {
        let object = Object::new(ctx.clone())?;

        for (name, kind) in &self.fields {
            match (kind, arguments.get(name)) {
                (PawnKind::Int, Some(PawnValue::Int(value))) => object.set(name.as_str(), *value)?,
                (PawnKind::Float, Some(PawnValue::Float(value))) => {
                    object.set(name.as_str(), f64::from(*value))?
                }
                (PawnKind::Float, Some(PawnValue::Int(value))) => {
                    object.set(name.as_str(), f64::from(*value))?
                }
                (PawnKind::String, Some(PawnValue::String(value))) => {
                    object.set(name.as_str(), value.as_str())?
                }
                (_, provided) => {
                    tracing::warn!(
                        target: "pawnhost",
                        field = name.as_str(),
                        provided = provided.is_some(),
                        "event field missing or mistyped, substituting null"
                    );
                    object.set(name.as_str(), Value::new_null(ctx.clone()))?;
                }
            }
        }

        object.set("defaultPrevented", false)?;
        let prevent_default: Function = ctx.eval(PREVENT_DEFAULT)?;
        object.set("preventDefault", prevent_default)?;

        Ok(object)
    }

    /// Whether a listener marked the event's default action as prevented.
    pub fn default_prevented(value: &Value<'_>) -> bool {
        value
            .as_object()
            .and_then(|object| {
                object
                    .get::<_, Option<bool>>("defaultPrevented")
                    .ok()
                    .flatten()
            })
            .unwrap_or(false)
    }
}
