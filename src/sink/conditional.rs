//! A predicate-gated sink.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::event::LogEvent;
use crate::filter::Pred;

use super::{Sink, SinkError};

/// Forwards events matching a predicate; everything else is dropped with no further cost.
///
/// Predicates come from [`Pred`]'s combinators or any closure. A panicking predicate counts as
/// "no match" and leaves a self-log entry; it never takes the pipeline down.
///
/// ```rust
/// # use mtlog::sink::{ConditionalSink, MemorySink};
/// # use mtlog::filter::Pred;
/// # use mtlog::Level;
/// let errors_only = ConditionalSink::new(Pred::level(Level::Error), MemorySink::new());
/// # let _ = &errors_only;
/// ```
pub struct ConditionalSink {
    predicate: Pred,
    inner: Box<dyn Sink>,
}

impl ConditionalSink {
    /// Gates `inner` behind `predicate`.
    pub fn new<S: Sink + 'static>(predicate: Pred, inner: S) -> ConditionalSink {
        ConditionalSink {
            predicate,
            inner: Box::new(inner),
        }
    }

    fn matches(&self, event: &LogEvent) -> bool {
        match catch_unwind(AssertUnwindSafe(|| self.predicate.test(event))) {
            Ok(matched) => matched,
            Err(_) => {
                crate::selflog!("conditional sink predicate panicked; treating as no match");
                false
            }
        }
    }
}

impl Sink for ConditionalSink {
    fn emit(&self, event: &LogEvent) -> Result<(), SinkError> {
        if self.matches(event) {
            self.inner.emit(event)
        } else {
            Ok(())
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }

    fn close(&self) -> Result<(), SinkError> {
        self.inner.close()
    }

    fn health_check(&self) -> Option<Result<(), SinkError>> {
        self.inner.health_check()
    }
}

#[cfg(test)]
mod tests {
    use crate::event::Level;
    use crate::sink::MemorySink;

    use super::*;

    fn event(level: Level) -> LogEvent {
        LogEvent::new(level, "t")
    }

    #[test]
    fn forwards_matches_only() {
        let memory = MemorySink::new();
        let sink = ConditionalSink::new(Pred::level(Level::Warning), memory.clone());
        sink.emit(&event(Level::Information)).unwrap();
        sink.emit(&event(Level::Error)).unwrap();
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.events()[0].level, Level::Error);
    }

    #[test]
    fn panicking_predicate_is_no_match() {
        let memory = MemorySink::new();
        let sink = ConditionalSink::new(
            Pred::new(|_| panic!("bad predicate")),
            memory.clone(),
        );
        sink.emit(&event(Level::Error)).unwrap();
        assert!(memory.is_empty());
    }
}
