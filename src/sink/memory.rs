//! An in-memory sink for tests and examples.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::event::LogEvent;

use super::{Sink, SinkError};

/// Collects events into a vector.
///
/// The handle is cheaply cloneable; tests keep one clone and hand the other to the pipeline.
/// The sink can be told to fail or to dawdle, which is how the wrapper sinks are exercised.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    events: Mutex<Vec<LogEvent>>,
    failing: AtomicBool,
    latency_ms: AtomicU64,
    emitted: AtomicU64,
    batches: AtomicU64,
    closed: AtomicBool,
}

impl MemorySink {
    /// A fresh, empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent emit fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Adds artificial latency to every emit.
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// A copy of everything collected so far.
    pub fn events(&self) -> Vec<LogEvent> {
        self.inner.events.lock().clone()
    }

    /// Number of events collected.
    pub fn len(&self) -> usize {
        self.inner.events.lock().len()
    }

    /// Has nothing arrived?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rendered messages of everything collected, in arrival order.
    pub fn messages(&self) -> Vec<String> {
        self.inner
            .events
            .lock()
            .iter()
            .map(crate::template::output::render_message)
            .collect()
    }

    /// How many times `emit` succeeded.
    pub fn emitted(&self) -> u64 {
        self.inner.emitted.load(Ordering::SeqCst)
    }

    /// How many batch calls arrived.
    pub fn batches(&self) -> u64 {
        self.inner.batches.load(Ordering::SeqCst)
    }

    /// Did anyone close the sink?
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Drops collected events.
    pub fn clear(&self) {
        self.inner.events.lock().clear();
    }
}

impl Sink for MemorySink {
    fn emit(&self, event: &LogEvent) -> Result<(), SinkError> {
        let latency = self.inner.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            std::thread::sleep(Duration::from_millis(latency));
        }
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("memory sink set to fail".to_owned()));
        }
        self.inner.events.lock().push(event.clone());
        self.inner.emitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn emit_batch(&self, events: &[LogEvent]) -> Result<(), SinkError> {
        self.inner.batches.fetch_add(1, Ordering::SeqCst);
        for event in events {
            self.emit(event)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<(), SinkError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::event::Level;

    use super::*;

    #[test]
    fn collects_and_fails_on_demand() {
        let sink = MemorySink::new();
        assert!(sink.emit(&LogEvent::new(Level::Information, "one")).is_ok());
        sink.set_failing(true);
        assert!(sink.emit(&LogEvent::new(Level::Information, "two")).is_err());
        sink.set_failing(false);
        assert!(sink.emit(&LogEvent::new(Level::Information, "three")).is_ok());
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.emitted(), 2);
        assert_eq!(sink.messages(), ["one", "three"]);
    }
}
