//! Enrichers - components that add properties to events before dispatch.
//!
//! Enrichers run in registration order and must be idempotent: enriching the same event twice
//! leaves it unchanged, which [`LogEvent::add_property`] gives them for free (call-site
//! properties always win over enriched ones).

use std::env;

use lazy_static::lazy_static;

use crate::context;
use crate::event::{LogEvent, Value};

pub mod deadline;

pub use self::deadline::DeadlineEnricher;

/// A pipeline element that adds properties to events.
pub trait Enrich: Send + Sync {
    /// Adds whatever properties this enricher is responsible for.
    fn enrich(&self, event: &mut LogEvent);
}

impl<F: Fn(&mut LogEvent) + Send + Sync> Enrich for F {
    fn enrich(&self, event: &mut LogEvent) {
        self(event)
    }
}

/// Adds a fixed property to every event.
pub struct WithProperty {
    name: String,
    value: Value,
}

impl WithProperty {
    /// An enricher adding `name = value`.
    pub fn new<N: Into<String>, V: Into<Value>>(name: N, value: V) -> Self {
        WithProperty {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Enrich for WithProperty {
    fn enrich(&self, event: &mut LogEvent) {
        event.add_property(self.name.clone(), self.value.clone());
    }
}

lazy_static! {
    // Looked up once; the machine does not get renamed mid-process.
    static ref MACHINE_NAME: String = env::var("HOSTNAME")
        .or_else(|_| env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_owned());
}

/// Adds the `MachineName` property.
pub struct MachineName;

impl Enrich for MachineName {
    fn enrich(&self, event: &mut LogEvent) {
        event.add_property("MachineName", MACHINE_NAME.as_str());
    }
}

lazy_static! {
    static ref PROCESS_ID: u64 = u64::from(std::process::id());
}

/// Adds the `ProcessId` property.
pub struct ProcessId;

impl Enrich for ProcessId {
    fn enrich(&self, event: &mut LogEvent) {
        event.add_property("ProcessId", *PROCESS_ID);
    }
}

/// Adds the `ThreadId` property of the producing thread.
pub struct ThreadId;

impl Enrich for ThreadId {
    fn enrich(&self, event: &mut LogEvent) {
        // ThreadId has no stable numeric accessor; the debug form ("ThreadId(7)") is what we get.
        let id = format!("{:?}", std::thread::current().id());
        let id = id
            .trim_start_matches("ThreadId(")
            .trim_end_matches(')')
            .to_owned();
        event.add_property("ThreadId", id);
    }
}

/// Adds the `Caller` property (`file:line` of the logging call).
///
/// The location is captured by the logging macros; the enricher only decides whether it ends up
/// on the event.
pub struct CallerLocation;

impl Enrich for CallerLocation {
    fn enrich(&self, event: &mut LogEvent) {
        if let Some(site) = crate::pipeline::current_call_site() {
            event.add_property("Caller", format!("{}:{}", site.file, site.line));
        }
    }
}

/// Adds the `SourceContext` property from the logging call's module path, unless the logger
/// already bound one.
pub struct SourceContextFromCaller;

impl Enrich for SourceContextFromCaller {
    fn enrich(&self, event: &mut LogEvent) {
        if let Some(site) = crate::pipeline::current_call_site() {
            event.add_property("SourceContext", site.module);
        }
    }
}

/// Copies the ambient properties of [`crate::context`] onto the event.
pub struct FromLogContext;

impl Enrich for FromLogContext {
    fn enrich(&self, event: &mut LogEvent) {
        for (name, value) in context::snapshot() {
            event.add_property(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::event::Level;

    use super::*;

    fn event() -> LogEvent {
        LogEvent::new(Level::Information, "t")
    }

    #[test]
    fn with_property() {
        let mut e = event();
        WithProperty::new("App", "api").enrich(&mut e);
        assert_eq!(e.property("App"), Some(&Value::Str("api".into())));
    }

    #[test]
    fn machine_and_process() {
        let mut e = event();
        MachineName.enrich(&mut e);
        ProcessId.enrich(&mut e);
        assert!(e.has_property("MachineName"));
        assert!(e.has_property("ProcessId"));
    }

    #[test]
    fn thread_id_is_numeric() {
        let mut e = event();
        ThreadId.enrich(&mut e);
        let id = e.property("ThreadId").and_then(Value::as_str).unwrap();
        assert!(id.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn enrichment_is_idempotent() {
        let mut e = event();
        let enricher = WithProperty::new("A", 1);
        enricher.enrich(&mut e);
        enricher.enrich(&mut e);
        assert_eq!(e.properties.len(), 1);
    }

    #[test]
    fn call_site_properties_win() {
        let mut e = event();
        e.set_property("App", "from-call");
        WithProperty::new("App", "from-enricher").enrich(&mut e);
        assert_eq!(e.property("App"), Some(&Value::Str("from-call".into())));
    }

    #[test]
    fn from_log_context() {
        let _scope = context::push_property("RequestId", "r-1");
        let mut e = event();
        FromLogContext.enrich(&mut e);
        assert_eq!(e.property("RequestId"), Some(&Value::Str("r-1".into())));
    }
}
