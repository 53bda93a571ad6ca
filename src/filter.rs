//! Filters and composable event predicates.
//!
//! A filter decides whether an event continues down the pipeline. Filters run in registration
//! order and the first `false` wins; the minimum-level check happens before any of them (and
//! before any allocation). Filters must not mutate the event - the trait only hands them a
//! shared reference.

use crate::event::{Level, LogEvent, Value};

/// A pipeline element that can drop events.
pub trait Filter: Send + Sync {
    /// `true` keeps the event alive.
    fn is_enabled(&self, event: &LogEvent) -> bool;
}

impl<F: Fn(&LogEvent) -> bool + Send + Sync> Filter for F {
    fn is_enabled(&self, event: &LogEvent) -> bool {
        self(event)
    }
}

/// Keeps events at or above a level.
pub struct MinimumLevel(pub Level);

impl Filter for MinimumLevel {
    fn is_enabled(&self, event: &LogEvent) -> bool {
        event.level >= self.0
    }
}

/// A boxed, composable event predicate, used by the conditional sink and the router.
///
/// ```rust
/// # use mtlog::filter::Pred;
/// # use mtlog::Level;
/// let audit_errors = Pred::level(Level::Error).and(Pred::property("Audit"));
/// # let _ = &audit_errors;
/// ```
pub struct Pred(Box<dyn Fn(&LogEvent) -> bool + Send + Sync>);

impl Pred {
    /// Wraps a closure.
    pub fn new<F: Fn(&LogEvent) -> bool + Send + Sync + 'static>(f: F) -> Pred {
        Pred(Box::new(f))
    }

    /// Matches every event.
    pub fn always() -> Pred {
        Pred::new(|_| true)
    }

    /// Matches events at or above the level.
    pub fn level(min: Level) -> Pred {
        Pred::new(move |e| e.level >= min)
    }

    /// Matches events carrying the named property.
    pub fn property<N: Into<String>>(name: N) -> Pred {
        let name = name.into();
        Pred::new(move |e| e.has_property(&name))
    }

    /// Matches events whose named property equals the value.
    pub fn property_value<N: Into<String>, V: Into<Value>>(name: N, value: V) -> Pred {
        let name = name.into();
        let value = value.into();
        Pred::new(move |e| e.property(&name) == Some(&value))
    }

    /// Both predicates must match.
    pub fn and(self, other: Pred) -> Pred {
        Pred::new(move |e| self.test(e) && other.test(e))
    }

    /// Either predicate may match.
    pub fn or(self, other: Pred) -> Pred {
        Pred::new(move |e| self.test(e) || other.test(e))
    }

    /// Inverts the predicate.
    pub fn not(self) -> Pred {
        Pred::new(move |e| !self.test(e))
    }

    /// Evaluates the predicate. Panics propagate; the sinks that evaluate untrusted predicates
    /// wrap this in their own recovery.
    pub fn test(&self, event: &LogEvent) -> bool {
        (self.0)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(level: Level) -> LogEvent {
        LogEvent::new(level, "t")
    }

    #[test]
    fn minimum_level() {
        let f = MinimumLevel(Level::Warning);
        assert!(!f.is_enabled(&event(Level::Information)));
        assert!(f.is_enabled(&event(Level::Warning)));
        assert!(f.is_enabled(&event(Level::Fatal)));
    }

    #[test]
    fn closures_are_filters() {
        let f = |e: &LogEvent| !e.has_property("Noisy");
        assert!(f.is_enabled(&event(Level::Information)));
    }

    #[test]
    fn predicate_combinators() {
        let mut e = event(Level::Error);
        e.set_property("Audit", true);

        assert!(Pred::level(Level::Error).test(&e));
        assert!(Pred::property("Audit").test(&e));
        assert!(Pred::property_value("Audit", true).test(&e));
        assert!(!Pred::property_value("Audit", false).test(&e));
        assert!(Pred::level(Level::Error).and(Pred::property("Audit")).test(&e));
        assert!(Pred::level(Level::Fatal).or(Pred::property("Audit")).test(&e));
        assert!(!Pred::property("Audit").not().test(&e));
        assert!(Pred::always().test(&e));
    }
}
