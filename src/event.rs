//! The log event and its building blocks.
//!
//! Everything that flows through the pipeline is a [`LogEvent`] - a timestamp, a [`Level`], the
//! raw message template and a map of named [`Value`]s. Enrichers may add properties while the
//! event travels towards the sinks; once dispatched it is logically immutable.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use failure::Fail;
use itertools::Itertools;
use serde::de::Deserializer;
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

/// Severity of a log event.
///
/// The levels form a total order, `Verbose` being the least severe. The string forms accepted and
/// produced are the proper-case names (`"Information"`, `"Warning"`, …).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Level {
    /// Tracing-grade noise, usually off in production.
    Verbose,
    /// Internal flow useful when debugging.
    Debug,
    /// Normal operational messages.
    Information,
    /// Something suspicious, the application still works.
    Warning,
    /// An operation failed.
    Error,
    /// The application cannot continue.
    Fatal,
}

const LEVEL_NAMES: &[&str] = &[
    "Verbose",
    "Debug",
    "Information",
    "Warning",
    "Error",
    "Fatal",
];

impl Level {
    /// All levels, in ascending order of severity.
    pub const ALL: &'static [Level] = &[
        Level::Verbose,
        Level::Debug,
        Level::Information,
        Level::Warning,
        Level::Error,
        Level::Fatal,
    ];

    /// The proper-case name (`"Information"`).
    pub fn name(self) -> &'static str {
        LEVEL_NAMES[self as usize]
    }

    /// The fixed three-letter code (`VRB`, `DBG`, `INF`, `WRN`, `ERR`, `FTL`).
    pub fn code(self) -> &'static str {
        match self {
            Level::Verbose => "VRB",
            Level::Debug => "DBG",
            Level::Information => "INF",
            Level::Warning => "WRN",
            Level::Error => "ERR",
            Level::Fatal => "FTL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The error returned when parsing an unknown level name.
#[derive(Debug, Fail)]
#[fail(display = "Unknown log level {:?}", _0)]
pub struct ParseLevelError(String);

impl FromStr for Level {
    type Err = ParseLevelError;
    fn from_str(s: &str) -> Result<Level, ParseLevelError> {
        for l in Level::ALL {
            if l.name().eq_ignore_ascii_case(s) || l.code().eq_ignore_ascii_case(s) {
                return Ok(*l);
            }
        }
        Err(ParseLevelError(s.to_owned()))
    }
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Level, D::Error> {
        let s = String::deserialize(d)?;
        s.parse()
            .map_err(|_| serde::de::Error::unknown_variant(&s, LEVEL_NAMES))
    }
}

/// A captured property value.
///
/// Values are tagged at capture time, so the formatting code dispatches on the tag instead of
/// inspecting runtime types (important for the sinks, which format the same value many times).
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// An unsigned integer.
    Uint(u64),
    /// A floating-point number.
    Float(f64),
    /// A string.
    Str(String),
    /// A point in time.
    Time(DateTime<Utc>),
    /// A span of time.
    Duration(Duration),
    /// An ordered sequence of values.
    Seq(Vec<Value>),
    /// Destructured object - named fields, ordered by name.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Is this the `Null` value?
    pub fn is_null(&self) -> bool {
        match self {
            Value::Null => true,
            _ => false,
        }
    }

    /// A best-effort string view, used by sinks that need plain text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn from_json(v: serde_json::Value) -> Value {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::Uint(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(a) => Value::Seq(a.into_iter().map(Value::from_json).collect()),
            serde_json::Value::Object(o) => Value::Map(
                o.into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Uint(u) => write!(f, "{}", u),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => f.write_str(s),
            Value::Time(t) => write!(f, "{}", t.to_rfc3339()),
            Value::Duration(d) => write!(f, "{}", humantime::format_duration(*d)),
            Value::Seq(items) => write!(f, "[{}]", items.iter().join(", ")),
            Value::Map(fields) => write!(
                f,
                "{{{}}}",
                fields.iter().map(|(k, v)| format!("{}: {}", k, v)).join(", "),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => s.serialize_unit(),
            Value::Bool(b) => s.serialize_bool(*b),
            Value::Int(i) => s.serialize_i64(*i),
            Value::Uint(u) => s.serialize_u64(*u),
            Value::Float(v) => s.serialize_f64(*v),
            Value::Str(v) => s.serialize_str(v),
            Value::Time(t) => s.serialize_str(&t.to_rfc3339()),
            Value::Duration(d) => s.serialize_str(&humantime::format_duration(*d).to_string()),
            Value::Seq(items) => {
                let mut seq = s.serialize_seq(Some(items.len()))?;
                for i in items {
                    seq.serialize_element(i)?;
                }
                seq.end()
            }
            Value::Map(fields) => {
                let mut map = s.serialize_map(Some(fields.len()))?;
                for (k, v) in fields {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

// Buffered events travel through the JSON data model, so times and durations come back as the
// strings they were persisted as. Replay delivers the persisted form.
impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Value, D::Error> {
        let v = serde_json::Value::deserialize(d)?;
        Ok(Value::from_json(v))
    }
}

macro_rules! value_from {
    ($variant: ident, $($ty: ty),+) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Value {
                    Value::$variant(v.into())
                }
            }
        )+
    }
}

value_from!(Bool, bool);
value_from!(Int, i8, i16, i32, i64);
value_from!(Uint, u8, u16, u32, u64);
value_from!(Float, f32, f64);
value_from!(Str, String, &str);
value_from!(Time, DateTime<Utc>);
value_from!(Duration, Duration);

impl From<usize> for Value {
    fn from(v: usize) -> Value {
        Value::Uint(v as u64)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Value {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Value {
        Value::Seq(v.into_iter().map(Into::into).collect())
    }
}

/// One event travelling through the pipeline.
///
/// Events serialize to (and come back from) JSON, which is what the durable buffer and the wire
/// formats need.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEvent {
    /// Wall-clock instant the event was created.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: Level,
    /// The raw message template. Never rewritten.
    pub template: String,
    /// Named properties, captured from the call and added by enrichers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
    /// Stringified error chain, if the call attached one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogEvent {
    /// Creates an event stamped with the current time.
    pub fn new<T: Into<String>>(level: Level, template: T) -> Self {
        LogEvent {
            timestamp: Utc::now(),
            level,
            template: template.into(),
            properties: BTreeMap::new(),
            error: None,
        }
    }

    /// Adds a property unless one with the same name is already present.
    ///
    /// This is what enrichers use - properties captured from the call site win over enriched
    /// ones, and repeated enrichment of the same event stays idempotent.
    pub fn add_property<N: Into<String>, V: Into<Value>>(&mut self, name: N, value: V) {
        let name = name.into();
        self.properties.entry(name).or_insert_with(|| value.into());
    }

    /// Adds or replaces a property.
    pub fn set_property<N: Into<String>, V: Into<Value>>(&mut self, name: N, value: V) {
        self.properties.insert(name.into(), value.into());
    }

    /// Looks a property up.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Does the event carry the named property?
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    /// The logical logger name, if the event carries one.
    pub fn source_context(&self) -> Option<&str> {
        self.property("SourceContext").and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_order() {
        assert!(Level::Verbose < Level::Debug);
        assert!(Level::Error < Level::Fatal);
        assert_eq!(Level::ALL.len(), 6);
    }

    #[test]
    fn level_parse_roundtrip() {
        for l in Level::ALL {
            assert_eq!(*l, l.name().parse().unwrap());
            assert_eq!(*l, l.code().parse().unwrap());
            assert_eq!(*l, l.name().to_lowercase().parse().unwrap());
        }
        assert!("Chatty".parse::<Level>().is_err());
    }

    #[test]
    fn value_display() {
        assert_eq!(Value::from(42).to_string(), "42");
        assert_eq!(Value::from("abc").to_string(), "abc");
        assert_eq!(Value::from(true).to_string(), "true");
        assert_eq!(
            Value::Seq(vec![1.into(), 2.into(), 3.into()]).to_string(),
            "[1, 2, 3]",
        );
        assert_eq!(Value::Null.to_string(), "null");
    }

    #[test]
    fn event_roundtrip() {
        let mut event = LogEvent::new(Level::Warning, "Disk {Disk} almost full");
        event.set_property("Disk", "/dev/sda1");
        event.error = Some("io error".to_owned());
        let json = serde_json::to_string(&event).unwrap();
        let back: LogEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.level, Level::Warning);
        assert_eq!(back.template, "Disk {Disk} almost full");
        assert_eq!(back.property("Disk"), Some(&Value::Str("/dev/sda1".into())));
        assert_eq!(back.error.as_ref().map(|e| e.as_str()), Some("io error"));
    }

    #[test]
    fn add_property_keeps_existing() {
        let mut event = LogEvent::new(Level::Information, "t");
        event.add_property("A", 1);
        event.add_property("A", 2);
        assert_eq!(event.property("A"), Some(&Value::Int(1)));
    }
}
