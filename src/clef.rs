//! CLEF - compact log event format.
//!
//! One JSON object per line. Reserved keys are `@`-prefixed: `@t` timestamp, `@mt` the raw
//! message template, `@l` the level, `@m` the rendered message (optional), `@x` the error
//! (optional). Everything else is a property; a user property whose name itself starts with `@`
//! is escaped with a second `@` so it can never collide with a reserved key.

use chrono::{DateTime, Timelike, Utc};
use serde_json::{Map, Value as Json};

use crate::event::LogEvent;
use crate::template::output::render_message;

/// Formats a timestamp as ISO-8601 UTC with seven fractional digits, CLEF's native precision.
pub fn format_timestamp(t: &DateTime<Utc>) -> String {
    format!(
        "{}.{:07}Z",
        t.format("%Y-%m-%dT%H:%M:%S"),
        t.nanosecond() % 1_000_000_000 / 100,
    )
}

/// Encodes one event as a CLEF line (no trailing newline).
///
/// With `rendered` set, the line carries `@m` alongside `@mt`.
pub fn to_clef(event: &LogEvent, rendered: bool) -> String {
    let mut map = Map::new();
    map.insert("@t".to_owned(), Json::String(format_timestamp(&event.timestamp)));
    map.insert("@mt".to_owned(), Json::String(event.template.clone()));
    map.insert("@l".to_owned(), Json::String(event.level.name().to_owned()));
    if rendered {
        map.insert("@m".to_owned(), Json::String(render_message(event)));
    }
    if let Some(error) = &event.error {
        map.insert("@x".to_owned(), Json::String(error.clone()));
    }
    for (name, value) in &event.properties {
        let key = if name.starts_with('@') {
            format!("@{}", name)
        } else {
            name.clone()
        };
        map.insert(key, serde_json::to_value(value).unwrap_or(Json::Null));
    }
    Json::Object(map).to_string()
}
