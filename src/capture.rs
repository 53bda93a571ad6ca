//! Binding call-site arguments to template holes.
//!
//! The logging macros hand the pipeline a parsed template and the positional arguments; this
//! module pairs them up. The i-th hole binds the i-th argument, applying the hole's capture hint:
//! `@` destructures (through serde, bounded depth), `$` forces the string form, no hint passes
//! primitives through as-is.
//!
//! Capture never fails a logging call. A panicking `Serialize` impl turns into a marker value, a
//! hole/argument count mismatch is recorded as an ordinary property on the event.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::Value;
use crate::template::{CaptureHint, Template};

/// Default bound on destructuring depth.
pub const DEFAULT_DEPTH: usize = 5;

/// The value substituted when capturing an argument fails.
pub const CAPTURE_ERROR: &str = "<capture-error>";

/// The property added when the number of arguments does not match the number of holes.
pub const MISMATCH_PROPERTY: &str = "ArgumentMismatch";

/// Something a logging call can pass as an argument.
///
/// Primitives and common scalar types implement this directly. Your own types opt in either by
/// implementing it (usually one line over [`serialize_value`]) or at the call site through the
/// [`Structured`] and [`Displayed`] wrappers.
pub trait Capture {
    /// Captures the argument under the given hint.
    fn capture(&self, hint: CaptureHint) -> Value;
}

macro_rules! capture_scalar {
    ($($ty: ty),+) => {
        $(
            impl Capture for $ty {
                fn capture(&self, hint: CaptureHint) -> Value {
                    match hint {
                        CaptureHint::Stringify => Value::Str(self.to_string()),
                        _ => Value::from(self.clone()),
                    }
                }
            }
        )+
    }
}

capture_scalar!(
    bool, i8, i16, i32, i64, u8, u16, u32, u64, usize, f32, f64, String, DateTime<Utc>
);

impl Capture for Duration {
    fn capture(&self, hint: CaptureHint) -> Value {
        match hint {
            CaptureHint::Stringify => Value::Str(humantime::format_duration(*self).to_string()),
            _ => Value::from(self.clone()),
        }
    }
}

impl Capture for &str {
    fn capture(&self, _hint: CaptureHint) -> Value {
        Value::Str((*self).to_owned())
    }
}

impl Capture for Value {
    fn capture(&self, hint: CaptureHint) -> Value {
        match hint {
            CaptureHint::Stringify => Value::Str(self.to_string()),
            _ => self.clone(),
        }
    }
}

impl<T: Capture> Capture for &T {
    fn capture(&self, hint: CaptureHint) -> Value {
        (*self).capture(hint)
    }
}

impl<T: Capture> Capture for Option<T> {
    fn capture(&self, hint: CaptureHint) -> Value {
        match self {
            Some(v) => v.capture(hint),
            None => Value::Null,
        }
    }
}

impl<T: Capture> Capture for Vec<T> {
    fn capture(&self, hint: CaptureHint) -> Value {
        Value::Seq(self.iter().map(|v| v.capture(hint)).collect())
    }
}

impl<T: Capture> Capture for [T] {
    fn capture(&self, hint: CaptureHint) -> Value {
        Value::Seq(self.iter().map(|v| v.capture(hint)).collect())
    }
}

/// Call-site wrapper that destructures any `Serialize` type, whatever the hint says.
///
/// ```rust
/// # use mtlog::capture::Structured;
/// # #[derive(serde::Serialize)] struct Order { id: u32 }
/// # let order = Order { id: 7 };
/// # let logger = mtlog::Logger::builder().build();
/// mtlog::info!(logger, "Accepted {@Order}", Structured(&order));
/// ```
pub struct Structured<'a, T: Serialize>(pub &'a T);

impl<'a, T: Serialize> Capture for Structured<'a, T> {
    fn capture(&self, hint: CaptureHint) -> Value {
        let value = serialize_value(self.0, DEFAULT_DEPTH);
        match hint {
            CaptureHint::Stringify => Value::Str(
                serde_json::to_string(&value).unwrap_or_else(|_| CAPTURE_ERROR.to_owned()),
            ),
            _ => value,
        }
    }
}

/// Call-site wrapper for types that only have a `Display` form.
pub struct Displayed<'a, T: Display>(pub &'a T);

impl<'a, T: Display> Capture for Displayed<'a, T> {
    fn capture(&self, _hint: CaptureHint) -> Value {
        Value::Str(self.0.to_string())
    }
}

/// Destructures a `Serialize` value into a [`Value`] tree, bounded to `depth` container levels.
///
/// Never panics; a failing or panicking `Serialize` impl produces the [`CAPTURE_ERROR`] marker.
/// Containers below the depth bound collapse into their compact JSON string.
pub fn serialize_value<T: Serialize>(value: &T, depth: usize) -> Value {
    let json = catch_unwind(AssertUnwindSafe(|| serde_json::to_value(value)));
    match json {
        Ok(Ok(json)) => bounded(json, depth),
        Ok(Err(e)) => {
            crate::selflog!("destructuring failed: {}", e);
            Value::Str(CAPTURE_ERROR.to_owned())
        }
        Err(_) => {
            crate::selflog!("destructuring panicked");
            Value::Str(CAPTURE_ERROR.to_owned())
        }
    }
}

fn bounded(json: serde_json::Value, depth: usize) -> Value {
    match json {
        serde_json::Value::Array(_) | serde_json::Value::Object(_) if depth == 0 => {
            Value::Str(json.to_string())
        }
        serde_json::Value::Array(items) => {
            Value::Seq(items.into_iter().map(|v| bounded(v, depth - 1)).collect())
        }
        serde_json::Value::Object(fields) => Value::Map(
            fields
                .into_iter()
                .map(|(k, v)| (k, bounded(v, depth - 1)))
                .collect(),
        ),
        scalar => Value::from_json(scalar),
    }
}

/// Binds positional arguments to a template's holes, in template order.
///
/// Duplicate hole names each consume their own argument (the later occurrence wins in the map).
/// A count mismatch adds the [`MISMATCH_PROPERTY`] instead of failing.
pub fn bind(template: &Template, args: &[&dyn Capture]) -> BTreeMap<String, Value> {
    let mut properties = BTreeMap::new();
    for (i, hole) in template.properties().enumerate() {
        if let Some(arg) = args.get(i) {
            let value = catch_unwind(AssertUnwindSafe(|| arg.capture(hole.hint)))
                .unwrap_or_else(|_| Value::Str(CAPTURE_ERROR.to_owned()));
            properties.insert(hole.name.clone(), value);
        }
    }
    let holes = template.properties().count();
    if holes != args.len() {
        properties.insert(
            MISMATCH_PROPERTY.to_owned(),
            Value::Str(format!("template has {} holes, {} args supplied", holes, args.len())),
        );
    }
    properties
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(text: &str) -> Template {
        Template::parse(text).unwrap()
    }

    #[test]
    fn positional_binding() {
        let t = template("User {UserId} from {IP}");
        let props = bind(&t, &[&123, &"192.168.1.1"]);
        assert_eq!(props.get("UserId"), Some(&Value::Int(123)));
        assert_eq!(props.get("IP"), Some(&Value::Str("192.168.1.1".into())));
        assert!(!props.contains_key(MISMATCH_PROPERTY));
    }

    #[test]
    fn mismatch_is_recorded_not_fatal() {
        let t = template("{A} {B} {C}");
        let props = bind(&t, &[&1]);
        assert_eq!(props.get("A"), Some(&Value::Int(1)));
        assert!(props.contains_key(MISMATCH_PROPERTY));
    }

    #[test]
    fn stringify_hint() {
        let t = template("{$Id}");
        let props = bind(&t, &[&42u32]);
        assert_eq!(props.get("Id"), Some(&Value::Str("42".into())));
    }

    #[derive(Serialize)]
    struct Order {
        id: u32,
        lines: Vec<String>,
    }

    #[test]
    fn destructure_hint() {
        let order = Order {
            id: 7,
            lines: vec!["a".into()],
        };
        let t = template("{@Order}");
        let props = bind(&t, &[&Structured(&order)]);
        match props.get("Order") {
            Some(Value::Map(fields)) => {
                assert_eq!(fields.get("id"), Some(&Value::Uint(7)));
                assert_eq!(
                    fields.get("lines"),
                    Some(&Value::Seq(vec![Value::Str("a".into())])),
                );
            }
            other => panic!("expected a map, got {:?}", other),
        }
    }

    #[test]
    fn depth_is_bounded() {
        let nested = serde_json::json!({"a": {"b": {"c": {"d": 1}}}});
        match serialize_value(&nested, 2) {
            Value::Map(a) => match a.get("a") {
                Some(Value::Map(b)) => match b.get("b") {
                    // Two levels in, the rest collapses to its JSON text.
                    Some(Value::Str(rest)) => assert!(rest.contains("\"c\"")),
                    other => panic!("expected collapsed string, got {:?}", other),
                },
                other => panic!("expected map, got {:?}", other),
            },
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_names_take_positional_args() {
        let t = template("{N} then {N}");
        let props = bind(&t, &[&1, &2]);
        // Each occurrence consumed its own argument; the map keeps the later one.
        assert_eq!(props.get("N"), Some(&Value::Int(2)));
        assert!(!props.contains_key(MISMATCH_PROPERTY));
    }
}
