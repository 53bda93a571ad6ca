//! The pipeline: capture → enrich → filter → dispatch.
//!
//! A [`Logger`] is a cheap handle over an immutable core assembled by the [`Builder`]. Logging
//! goes through one gate first - the effective minimum level - and events below it cost one
//! comparison, no allocation. Surviving calls parse the template through the cache, bind the
//! arguments, run the enrichers and filters and finally fan out to every sink.
//!
//! ```rust
//! use mtlog::{Logger, Level};
//! use mtlog::sink::MemorySink;
//!
//! let sink = MemorySink::new();
//! let logger = Logger::builder()
//!     .minimum_level(Level::Debug)
//!     .sink(sink.clone())
//!     .build();
//! mtlog::info!(logger, "User {UserId} logged in", 123);
//! assert_eq!(sink.len(), 1);
//! ```

use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::capture::{self, Capture};
use crate::enrich::Enrich;
use crate::event::{Level, LogEvent, Value};
use crate::filter::Filter;
use crate::sink::{Sink, SinkError};
use crate::template::cache;

/// Where a logging call happened. Captured by the macros, consumed by the caller-location and
/// source-context enrichers.
#[derive(Copy, Clone, Debug)]
pub struct CallSite {
    /// Source file.
    pub file: &'static str,
    /// Line number.
    pub line: u32,
    /// Module path of the call.
    pub module: &'static str,
}

thread_local! {
    static CALL_SITE: Cell<Option<CallSite>> = Cell::new(None);
}

/// The call site of the event currently being enriched on this thread, if any.
pub(crate) fn current_call_site() -> Option<CallSite> {
    CALL_SITE.with(Cell::get)
}

/// A runtime-adjustable minimum level, shared between the pipeline and whoever flips it.
///
/// ```rust
/// # use mtlog::{Level, LevelSwitch, Logger};
/// let switch = LevelSwitch::new(Level::Warning);
/// let logger = Logger::builder()
///     .minimum_level(Level::Debug)
///     .level_switch(switch.clone())
///     .build();
/// assert!(!logger.is_enabled(Level::Debug));
/// switch.set(Level::Debug); // takes effect immediately
/// assert!(logger.is_enabled(Level::Debug));
/// ```
#[derive(Clone)]
pub struct LevelSwitch(Arc<AtomicUsize>);

impl LevelSwitch {
    /// A switch starting at the given level.
    pub fn new(level: Level) -> Self {
        LevelSwitch(Arc::new(AtomicUsize::new(level as usize)))
    }

    /// Changes the level; all loggers sharing the switch see it on their next call.
    pub fn set(&self, level: Level) {
        self.0.store(level as usize, Ordering::SeqCst);
    }

    /// The current level.
    pub fn level(&self) -> Level {
        Level::ALL[self.0.load(Ordering::Relaxed).min(Level::ALL.len() - 1)]
    }
}

// Longest-prefix wins, so the prefixes are kept sorted by length, longest first.
struct Overrides {
    prefixes: Vec<(String, Level)>,
}

impl Overrides {
    fn lookup(&self, source: &str) -> Option<Level> {
        self.prefixes
            .iter()
            .find(|(prefix, _)| source.starts_with(prefix.as_str()))
            .map(|(_, level)| *level)
    }
}

struct Core {
    minimum: Level,
    switch: Option<LevelSwitch>,
    overrides: ArcSwap<Overrides>,
    enrichers: Vec<Box<dyn Enrich>>,
    filters: Vec<Box<dyn Filter>>,
    sinks: Vec<Box<dyn Sink>>,
}

impl Core {
    fn effective_minimum(&self, source: Option<&str>) -> Level {
        if let Some(source) = source {
            if let Some(level) = self.overrides.load().lookup(source) {
                return level;
            }
        }
        match &self.switch {
            Some(switch) => self.minimum.max(switch.level()),
            None => self.minimum,
        }
    }

    fn dispatch(&self, event: &LogEvent) {
        for sink in &self.sinks {
            // One misbehaving sink must not starve the others or reach the caller.
            match catch_unwind(AssertUnwindSafe(|| sink.emit(event))) {
                Ok(Ok(())) => (),
                Ok(Err(e)) => crate::selflog!("sink emit failed: {}", e),
                Err(_) => crate::selflog!("sink emit panicked"),
            }
        }
    }
}

/// A handle into the pipeline. Cloning is cheap; clones share the same core.
#[derive(Clone)]
pub struct Logger {
    core: Arc<Core>,
    bound: Arc<Vec<(String, Value)>>,
    // The bound SourceContext, pre-extracted so the level gate stays allocation-free.
    source: Option<Arc<str>>,
}

impl Logger {
    /// Starts assembling a pipeline.
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Would an event at this level pass the gate?
    pub fn is_enabled(&self, level: Level) -> bool {
        level >= self.core.effective_minimum(self.source.as_deref())
    }

    /// A child logger with one more bound property.
    ///
    /// Bound properties are added to every event the child logs (call-site properties still
    /// win). Binding `SourceContext` also feeds the per-source minimum-level overrides.
    pub fn for_context<N: Into<String>, V: Into<Value>>(&self, name: N, value: V) -> Logger {
        let name = name.into();
        let value = value.into();
        let mut bound = (*self.bound).clone();
        let source = if name == "SourceContext" {
            match &value {
                Value::Str(s) => Some(Arc::from(s.as_str())),
                _ => self.source.clone(),
            }
        } else {
            self.source.clone()
        };
        bound.retain(|(n, _)| n != &name);
        bound.push((name, value));
        Logger {
            core: Arc::clone(&self.core),
            bound: Arc::new(bound),
            source,
        }
    }

    /// A child logger whose `SourceContext` is the type name of `T`.
    pub fn for_source<T>(&self) -> Logger {
        self.for_context("SourceContext", std::any::type_name::<T>())
    }

    /// The full logging entry point; the macros call this.
    ///
    /// Below the effective minimum level this returns before allocating anything.
    pub fn log_with(
        &self,
        level: Level,
        template: &str,
        args: &[&dyn Capture],
        error: Option<String>,
        site: Option<CallSite>,
    ) {
        if !self.is_enabled(level) {
            return;
        }
        let parsed = cache::global().parse(template);
        let mut event = LogEvent::new(level, template);
        event.properties = capture::bind(&parsed, args);
        event.error = error;
        for (name, value) in self.bound.iter() {
            event.add_property(name.clone(), value.clone());
        }

        CALL_SITE.with(|s| s.set(site));
        for enricher in &self.core.enrichers {
            enricher.enrich(&mut event);
        }
        CALL_SITE.with(|s| s.set(None));

        for filter in &self.core.filters {
            if !filter.is_enabled(&event) {
                return;
            }
        }
        self.core.dispatch(&event);
    }

    /// Logs without caller information (the non-macro path).
    pub fn log(&self, level: Level, template: &str, args: &[&dyn Capture]) {
        self.log_with(level, template, args, None, None)
    }

    /// Installs or replaces a per-source-context minimum level override at runtime.
    pub fn override_level<P: Into<String>>(&self, prefix: P, level: Level) {
        let prefix = prefix.into();
        let current = self.core.overrides.load();
        let mut prefixes: Vec<_> = current
            .prefixes
            .iter()
            .filter(|(p, _)| p != &prefix)
            .cloned()
            .collect();
        prefixes.push((prefix, level));
        prefixes.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
        self.core.overrides.store(Arc::new(Overrides { prefixes }));
    }

    /// Flushes every sink.
    pub fn flush(&self) {
        for sink in &self.core.sinks {
            sink.flush();
        }
    }

    /// Closes every sink, waiting for their background work. The first failure is returned,
    /// but every sink gets its close call.
    pub fn close(&self) -> Result<(), SinkError> {
        let mut result = Ok(());
        for sink in &self.core.sinks {
            if let Err(e) = sink.close() {
                crate::selflog!("sink close failed: {}", e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

/// Assembles a [`Logger`], in the order things run: enrichers, then filters, then sinks.
pub struct Builder {
    minimum: Level,
    switch: Option<LevelSwitch>,
    overrides: Vec<(String, Level)>,
    enrichers: Vec<Box<dyn Enrich>>,
    filters: Vec<Box<dyn Filter>>,
    sinks: Vec<Box<dyn Sink>>,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            minimum: Level::Information,
            switch: None,
            overrides: Vec::new(),
            enrichers: Vec::new(),
            filters: Vec::new(),
            sinks: Vec::new(),
        }
    }
}

impl Builder {
    /// The static minimum level (default `Information`).
    pub fn minimum_level(mut self, level: Level) -> Self {
        self.minimum = level;
        self
    }

    /// Attaches a dynamic level switch; the effective minimum is the higher of the static
    /// minimum and the switch.
    pub fn level_switch(mut self, switch: LevelSwitch) -> Self {
        self.switch = Some(switch);
        self
    }

    /// A per-source-context minimum override; the longest matching prefix wins.
    pub fn override_level<P: Into<String>>(mut self, prefix: P, level: Level) -> Self {
        self.overrides.push((prefix.into(), level));
        self
    }

    /// Appends an enricher. Registration order is execution order.
    pub fn enrich<E: Enrich + 'static>(mut self, enricher: E) -> Self {
        self.enrichers.push(Box::new(enricher));
        self
    }

    /// Appends a filter. The first filter returning `false` drops the event.
    pub fn filter<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    /// Appends a sink. Events fan out to sinks in registration order.
    pub fn sink<S: Sink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Builds the logger.
    pub fn build(self) -> Logger {
        let mut prefixes = self.overrides;
        prefixes.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));
        Logger {
            core: Arc::new(Core {
                minimum: self.minimum,
                switch: self.switch,
                overrides: ArcSwap::from(Arc::new(Overrides { prefixes })),
                enrichers: self.enrichers,
                filters: self.filters,
                sinks: self.sinks,
            }),
            bound: Arc::new(Vec::new()),
            source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::enrich::WithProperty;
    use crate::sink::MemorySink;

    use super::*;

    fn logger_with(sink: MemorySink) -> Logger {
        Logger::builder()
            .minimum_level(Level::Debug)
            .sink(sink)
            .build()
    }

    #[test]
    fn below_minimum_is_dropped() {
        let sink = MemorySink::new();
        let logger = logger_with(sink.clone());
        logger.log(Level::Verbose, "too quiet", &[]);
        assert!(sink.is_empty());
        logger.log(Level::Debug, "loud enough", &[]);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn level_switch_raises_the_bar() {
        let sink = MemorySink::new();
        let switch = LevelSwitch::new(Level::Warning);
        let logger = Logger::builder()
            .minimum_level(Level::Debug)
            .level_switch(switch.clone())
            .sink(sink.clone())
            .build();
        logger.log(Level::Information, "muted", &[]);
        assert!(sink.is_empty());
        switch.set(Level::Verbose);
        logger.log(Level::Information, "audible", &[]);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn source_context_override_wins_longest_prefix() {
        let sink = MemorySink::new();
        let logger = Logger::builder()
            .minimum_level(Level::Information)
            .override_level("app", Level::Warning)
            .override_level("app.noisy", Level::Error)
            .sink(sink.clone())
            .build();

        let noisy = logger.for_context("SourceContext", "app.noisy.worker");
        noisy.log(Level::Warning, "dropped by the longer prefix", &[]);
        assert!(sink.is_empty());
        noisy.log(Level::Error, "kept", &[]);
        assert_eq!(sink.len(), 1);

        let quiet = logger.for_context("SourceContext", "app.other");
        quiet.log(Level::Warning, "kept by the short prefix", &[]);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn runtime_override_applies() {
        let sink = MemorySink::new();
        let logger = logger_with(sink.clone()).for_context("SourceContext", "chatty");
        logger.log(Level::Debug, "before", &[]);
        logger.override_level("chatty", Level::Error);
        logger.log(Level::Debug, "after", &[]);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn bound_properties_flow_and_call_site_wins() {
        let sink = MemorySink::new();
        let logger = logger_with(sink.clone())
            .for_context("App", "api")
            .for_context("Region", "eu");
        logger.log(Level::Information, "Deployed to {Region}", &[&"us"]);
        let event = &sink.events()[0];
        assert_eq!(event.property("App"), Some(&Value::Str("api".into())));
        assert_eq!(event.property("Region"), Some(&Value::Str("us".into())));
    }

    #[test]
    fn enrichers_then_filters() {
        let sink = MemorySink::new();
        let logger = Logger::builder()
            .minimum_level(Level::Debug)
            .enrich(WithProperty::new("Tagged", true))
            .filter(|e: &LogEvent| !e.has_property("DropMe"))
            .sink(sink.clone())
            .build();
        logger.log(Level::Information, "kept", &[]);
        logger.log(Level::Information, "gone {DropMe}", &[&1]);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0].property("Tagged"), Some(&Value::Bool(true)));
    }

    #[test]
    fn panicking_sink_does_not_stop_the_fan_out() {
        struct Bomb;
        impl Sink for Bomb {
            fn emit(&self, _: &LogEvent) -> Result<(), SinkError> {
                panic!("boom");
            }
        }
        let sink = MemorySink::new();
        let logger = Logger::builder()
            .minimum_level(Level::Debug)
            .sink(Bomb)
            .sink(sink.clone())
            .build();
        logger.log(Level::Information, "survives", &[]);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn for_source_sets_source_context() {
        struct Widget;
        let sink = MemorySink::new();
        let logger = logger_with(sink.clone()).for_source::<Widget>();
        logger.log(Level::Information, "made", &[]);
        let sc = sink.events()[0].source_context().unwrap().to_owned();
        assert!(sc.ends_with("Widget"));
    }
}
