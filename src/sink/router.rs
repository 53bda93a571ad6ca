//! A routing fan-out: events go to the first matching route, or to every matching one.
//!
//! Routes have a name, a priority (lower runs first) and a predicate. The route table can be
//! mutated at runtime - individually or in named groups - and stays sorted by priority, stably,
//! so two routes with the same priority keep their registration order. Per-route hit counters
//! (plus default/total/dropped) are kept under their own lock and exported as a snapshot or as
//! Prometheus text.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use itertools::Itertools;
use parking_lot::{Mutex, RwLock};

use crate::event::LogEvent;
use crate::filter::Pred;

use super::{Sink, SinkError};

/// Routing strategy.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RouterMode {
    /// The first matching route (by priority) receives the event.
    FirstMatch,
    /// Every matching route receives the event.
    AllMatch,
}

/// One route: a named, prioritized predicate in front of a sink.
pub struct Route {
    /// Route name; unique within a router. Group routes are named `group.route`.
    pub name: String,
    /// Lower priority runs earlier.
    pub priority: i32,
    /// The match condition.
    pub predicate: Pred,
    /// Where matching events go.
    pub sink: Box<dyn Sink>,
}

impl Route {
    /// A route with everything specified.
    pub fn new<N, S>(name: N, priority: i32, predicate: Pred, sink: S) -> Route
    where
        N: Into<String>,
        S: Sink + 'static,
    {
        Route {
            name: name.into(),
            priority,
            predicate,
            sink: Box::new(sink),
        }
    }
}

/// A snapshot of the router's counters.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RouterStats {
    /// Hits per route name.
    pub route_hits: BTreeMap<String, u64>,
    /// Events that fell through to the default sink.
    pub default_hits: u64,
    /// Everything that entered the router.
    pub total: u64,
    /// Events that matched nothing and had no default to go to.
    pub dropped: u64,
}

impl RouterStats {
    /// Renders the counters as Prometheus text exposition, using `prefix` for metric names.
    pub fn to_prometheus(&self, prefix: &str) -> String {
        let route_lines = self
            .route_hits
            .iter()
            .map(|(name, hits)| format!("{}_route_hits{{route=\"{}\"}} {}", prefix, name, hits))
            .join("\n");
        let mut out = String::new();
        out.push_str(&format!("# TYPE {}_route_hits counter\n", prefix));
        if !route_lines.is_empty() {
            out.push_str(&route_lines);
            out.push('\n');
        }
        out.push_str(&format!("# TYPE {}_default_hits counter\n", prefix));
        out.push_str(&format!("{}_default_hits {}\n", prefix, self.default_hits));
        out.push_str(&format!("# TYPE {}_events_total counter\n", prefix));
        out.push_str(&format!("{}_events_total {}\n", prefix, self.total));
        out.push_str(&format!("# TYPE {}_dropped_total counter\n", prefix));
        out.push_str(&format!("{}_dropped_total {}\n", prefix, self.dropped));
        out
    }
}

#[derive(Default)]
struct StatsInner {
    route_hits: BTreeMap<String, u64>,
    default_hits: u64,
    total: u64,
    dropped: u64,
}

/// The routing sink. See the module docs.
pub struct RouterSink {
    mode: RouterMode,
    routes: RwLock<Vec<Route>>,
    default_sink: Option<Box<dyn Sink>>,
    stats: Mutex<StatsInner>,
}

impl RouterSink {
    /// An empty router.
    pub fn new(mode: RouterMode) -> RouterSink {
        RouterSink {
            mode,
            routes: RwLock::new(Vec::new()),
            default_sink: None,
            stats: Mutex::new(StatsInner::default()),
        }
    }

    /// Adds a route at construction time (chainable).
    pub fn route(self, route: Route) -> Self {
        self.add_route(route);
        self
    }

    /// Sets the sink for events no route matched.
    pub fn default_sink<S: Sink + 'static>(mut self, sink: S) -> Self {
        self.default_sink = Some(Box::new(sink));
        self
    }

    /// Adds a route at runtime. The table is re-sorted by priority (stable).
    pub fn add_route(&self, route: Route) {
        let mut routes = self.routes.write();
        routes.push(route);
        routes.sort_by_key(|r| r.priority);
    }

    /// Removes a route by name, closing its sink. Returns whether it existed.
    pub fn remove_route(&self, name: &str) -> bool {
        let mut routes = self.routes.write();
        match routes.iter().position(|r| r.name == name) {
            Some(at) => {
                let route = routes.remove(at);
                drop(routes);
                if let Err(e) = route.sink.close() {
                    crate::selflog!("closing removed route {:?} failed: {}", name, e);
                }
                true
            }
            None => false,
        }
    }

    /// Adds a group of routes; each gets named `group.route`.
    pub fn add_route_group<G: Into<String>>(&self, group: G, routes: Vec<Route>) {
        let group = group.into();
        let mut table = self.routes.write();
        for mut route in routes {
            route.name = format!("{}.{}", group, route.name);
            table.push(route);
        }
        table.sort_by_key(|r| r.priority);
    }

    /// Removes every route of a group, closing their sinks. Returns how many went.
    pub fn remove_route_group(&self, group: &str) -> usize {
        let prefix = format!("{}.", group);
        let removed: Vec<Route> = {
            let mut routes = self.routes.write();
            let mut kept = Vec::with_capacity(routes.len());
            let mut gone = Vec::new();
            for route in routes.drain(..) {
                if route.name.starts_with(&prefix) {
                    gone.push(route);
                } else {
                    kept.push(route);
                }
            }
            *routes = kept;
            gone
        };
        let count = removed.len();
        for route in removed {
            if let Err(e) = route.sink.close() {
                crate::selflog!("closing removed route {:?} failed: {}", route.name, e);
            }
        }
        count
    }

    /// Names of the routes that would match, in evaluation order, without emitting or counting.
    pub fn test_event(&self, event: &LogEvent) -> Vec<String> {
        let routes = self.routes.read();
        let mut matched = Vec::new();
        for route in routes.iter() {
            if Self::matches(route, event) {
                matched.push(route.name.clone());
                if self.mode == RouterMode::FirstMatch {
                    break;
                }
            }
        }
        matched
    }

    /// A snapshot of the counters.
    pub fn stats(&self) -> RouterStats {
        let stats = self.stats.lock();
        RouterStats {
            route_hits: stats.route_hits.clone(),
            default_hits: stats.default_hits,
            total: stats.total,
            dropped: stats.dropped,
        }
    }

    /// Zeroes the counters.
    pub fn reset_stats(&self) {
        let mut stats = self.stats.lock();
        *stats = StatsInner::default();
    }

    fn matches(route: &Route, event: &LogEvent) -> bool {
        match catch_unwind(AssertUnwindSafe(|| route.predicate.test(event))) {
            Ok(matched) => matched,
            Err(_) => {
                crate::selflog!("route {:?} predicate panicked; skipping it", route.name);
                false
            }
        }
    }
}

impl Sink for RouterSink {
    fn emit(&self, event: &LogEvent) -> Result<(), SinkError> {
        self.stats.lock().total += 1;

        let routes = self.routes.read();
        let mut matched_any = false;
        let mut result = Ok(());
        for route in routes.iter() {
            if !Self::matches(route, event) {
                continue;
            }
            matched_any = true;
            *self
                .stats
                .lock()
                .route_hits
                .entry(route.name.clone())
                .or_insert(0) += 1;
            if let Err(e) = route.sink.emit(event) {
                crate::selflog!("route {:?} delivery failed: {}", route.name, e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
            if self.mode == RouterMode::FirstMatch {
                break;
            }
        }
        drop(routes);

        if !matched_any {
            match &self.default_sink {
                Some(sink) => {
                    self.stats.lock().default_hits += 1;
                    if let Err(e) = sink.emit(event) {
                        crate::selflog!("default route delivery failed: {}", e);
                        if result.is_ok() {
                            result = Err(e);
                        }
                    }
                }
                None => {
                    self.stats.lock().dropped += 1;
                }
            }
        }
        result
    }

    fn flush(&self) {
        for route in self.routes.read().iter() {
            route.sink.flush();
        }
        if let Some(sink) = &self.default_sink {
            sink.flush();
        }
    }

    fn close(&self) -> Result<(), SinkError> {
        let mut result = Ok(());
        for route in self.routes.read().iter() {
            if let Err(e) = route.sink.close() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        if let Some(sink) = &self.default_sink {
            if let Err(e) = sink.close() {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}
