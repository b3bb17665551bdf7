//! Conditions: predicates over a run's shared context
//!
//! Persisted workflows use [`ConditionExpr`], a small serializable
//! expression tree. Hosts that need arbitrary logic inject a
//! [`ContextPredicate`] instead; those never survive a record round-trip
//! and come back as [`Condition::Detached`] until re-attached.

use dispatch_types::Payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Context key holding the run's charge
pub const CTX_CHARGE: &str = "charge";
/// Context key holding the run's tag list
pub const CTX_TAGS: &str = "tags";

// ── Expressions ──────────────────────────────────────────────────────

/// Serializable condition expression
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConditionExpr {
    Always,
    Never,
    /// `charge` in the context lies within `min..=max`
    ChargeRange { min: u8, max: u8 },
    /// `tags` in the context is a list containing `tag`
    TagPresent { tag: String },
    /// The field equals `value`. Dotted paths walk nested objects.
    FieldEquals { field: String, value: Value },
    /// The field is present and truthy
    FieldTruthy { field: String },
    All { conditions: Vec<ConditionExpr> },
    Any { conditions: Vec<ConditionExpr> },
    Not { condition: Box<ConditionExpr> },
}

impl ConditionExpr {
    pub fn charge_range(min: u8, max: u8) -> Self {
        ConditionExpr::ChargeRange { min, max }
    }

    pub fn tag_present(tag: impl Into<String>) -> Self {
        ConditionExpr::TagPresent { tag: tag.into() }
    }

    pub fn field_equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        ConditionExpr::FieldEquals {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn field_truthy(field: impl Into<String>) -> Self {
        ConditionExpr::FieldTruthy {
            field: field.into(),
        }
    }

    pub fn all(conditions: impl IntoIterator<Item = ConditionExpr>) -> Self {
        ConditionExpr::All {
            conditions: conditions.into_iter().collect(),
        }
    }

    pub fn any(conditions: impl IntoIterator<Item = ConditionExpr>) -> Self {
        ConditionExpr::Any {
            conditions: conditions.into_iter().collect(),
        }
    }

    pub fn negate(condition: ConditionExpr) -> Self {
        ConditionExpr::Not {
            condition: Box::new(condition),
        }
    }

    /// Evaluate against a context. Missing or mistyped fields are false.
    pub fn evaluate(&self, context: &Payload) -> bool {
        match self {
            ConditionExpr::Always => true,
            ConditionExpr::Never => false,
            ConditionExpr::ChargeRange { min, max } => context
                .get(CTX_CHARGE)
                .and_then(Value::as_f64)
                .map(|charge| charge >= f64::from(*min) && charge <= f64::from(*max))
                .unwrap_or(false),
            ConditionExpr::TagPresent { tag } => context
                .get(CTX_TAGS)
                .and_then(Value::as_array)
                .map(|tags| tags.iter().any(|t| t.as_str() == Some(tag.as_str())))
                .unwrap_or(false),
            ConditionExpr::FieldEquals { field, value } => {
                lookup(context, field).is_some_and(|found| found == value)
            }
            ConditionExpr::FieldTruthy { field } => lookup(context, field).is_some_and(is_truthy),
            ConditionExpr::All { conditions } => conditions.iter().all(|c| c.evaluate(context)),
            ConditionExpr::Any { conditions } => conditions.iter().any(|c| c.evaluate(context)),
            ConditionExpr::Not { condition } => !condition.evaluate(context),
        }
    }
}

/// Resolve a dotted path against the context
pub fn lookup<'a>(context: &'a Payload, path: &str) -> Option<&'a Value> {
    if let Some(value) = context.get(path) {
        return Some(value);
    }
    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Null, false, zero and empty values are falsy
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ── Injected Predicates ──────────────────────────────────────────────

/// Host-supplied predicate. An error counts as false.
pub trait ContextPredicate: Send + Sync {
    fn evaluate(&self, context: &Payload) -> anyhow::Result<bool>;
}

impl<F> ContextPredicate for F
where
    F: Fn(&Payload) -> anyhow::Result<bool> + Send + Sync,
{
    fn evaluate(&self, context: &Payload) -> anyhow::Result<bool> {
        self(context)
    }
}

// ── Condition ────────────────────────────────────────────────────────

/// A step or branch guard
#[derive(Clone)]
pub enum Condition {
    Expr(ConditionExpr),
    Predicate(Arc<dyn ContextPredicate>),
    /// A predicate lost in persistence. Always false until re-attached.
    Detached,
}

impl Condition {
    pub fn predicate<P>(predicate: P) -> Self
    where
        P: ContextPredicate + 'static,
    {
        Condition::Predicate(Arc::new(predicate))
    }

    /// Evaluate against a context. A predicate that errors or panics is false.
    pub fn evaluate(&self, context: &Payload) -> bool {
        match self {
            Condition::Expr(expr) => expr.evaluate(context),
            Condition::Predicate(predicate) => {
                panic::catch_unwind(AssertUnwindSafe(|| predicate.evaluate(context)))
                    .ok()
                    .and_then(Result::ok)
                    .unwrap_or(false)
            }
            Condition::Detached => false,
        }
    }

    /// The persistable form, if there is one
    pub fn as_expr(&self) -> Option<&ConditionExpr> {
        match self {
            Condition::Expr(expr) => Some(expr),
            _ => None,
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(self, Condition::Detached)
    }
}

impl From<ConditionExpr> for Condition {
    fn from(expr: ConditionExpr) -> Self {
        Condition::Expr(expr)
    }
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Condition::Expr(expr) => f.debug_tuple("Expr").field(expr).finish(),
            Condition::Predicate(_) => f.write_str("Predicate(..)"),
            Condition::Detached => f.write_str("Detached"),
        }
    }
}
