//! The output side of the pipeline: sinks and sink wrappers.
//!
//! A sink is anything that accepts events: a file, the console, an HTTP batcher, or a wrapper
//! that buffers, routes or protects another sink. Wrappers compose - a rolling file behind the
//! background wrapper behind a circuit breaker is three values deep and still just a [`Sink`].
//!
//! `emit` is fallible so wrappers can count and react; the dispatcher at the top swallows the
//! error after a self-log entry, because logging calls never fail observably.

use std::io;
use std::time::Duration;

use failure::Fail;

use crate::event::LogEvent;

pub mod background;
pub mod breaker;
pub mod conditional;
pub mod console;
pub mod durable;
pub mod file;
pub mod memory;
pub mod rolling;
pub mod router;

pub use self::background::{BackgroundSink, OverflowPolicy};
pub use self::breaker::CircuitBreakerSink;
pub use self::conditional::ConditionalSink;
pub use self::console::ConsoleSink;
pub use self::durable::DurableSink;
pub use self::file::FileSink;
pub use self::memory::MemorySink;
pub use self::rolling::{RollingFileSink, RollingInterval};
pub use self::router::{Route, RouterMode, RouterSink};

/// What can go wrong inside a sink.
#[derive(Debug, Fail)]
pub enum SinkError {
    /// An I/O failure; usually transient.
    #[fail(display = "sink I/O error: {}", _0)]
    Io(#[cause] io::Error),
    /// The downstream service refused or did not answer.
    #[fail(display = "sink unavailable: {}", _0)]
    Unavailable(String),
    /// The circuit breaker is open; the event went to the fallback (or was dropped).
    #[fail(display = "circuit open")]
    CircuitOpen,
    /// `close` did not finish within its budget.
    #[fail(display = "close timed out after {:?}", _0)]
    ShutdownTimeout(Duration),
    /// The sink is already closed.
    #[fail(display = "sink closed")]
    Closed,
}

impl From<io::Error> for SinkError {
    fn from(e: io::Error) -> SinkError {
        SinkError::Io(e)
    }
}

/// A destination or wrapper in the output pipeline.
pub trait Sink: Send + Sync {
    /// Accepts one event.
    fn emit(&self, event: &LogEvent) -> Result<(), SinkError>;

    /// Accepts a batch. The default just loops; sinks with a cheaper bulk path (HTTP bulk
    /// endpoints, the durable replay) override it. The default stops at the first failure so a
    /// caller replaying a buffer knows where it got to.
    fn emit_batch(&self, events: &[LogEvent]) -> Result<(), SinkError> {
        for event in events {
            self.emit(event)?;
        }
        Ok(())
    }

    /// Pushes buffered state down. Default: nothing to do.
    fn flush(&self) {}

    /// Shuts the sink down, waiting for background work up to the sink's own budget.
    ///
    /// Idempotent; a second call is a cheap no-op.
    fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// An explicit liveness probe, for sinks that can tell without emitting (HTTP sinks probe
    /// their service root). `None` means the sink has no better answer than "try an emit".
    fn health_check(&self) -> Option<Result<(), SinkError>> {
        None
    }
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    fn emit(&self, event: &LogEvent) -> Result<(), SinkError> {
        (**self).emit(event)
    }
    fn emit_batch(&self, events: &[LogEvent]) -> Result<(), SinkError> {
        (**self).emit_batch(events)
    }
    fn flush(&self) {
        (**self).flush()
    }
    fn close(&self) -> Result<(), SinkError> {
        (**self).close()
    }
    fn health_check(&self) -> Option<Result<(), SinkError>> {
        (**self).health_check()
    }
}

impl<S: Sink + ?Sized> Sink for std::sync::Arc<S> {
    fn emit(&self, event: &LogEvent) -> Result<(), SinkError> {
        (**self).emit(event)
    }
    fn emit_batch(&self, events: &[LogEvent]) -> Result<(), SinkError> {
        (**self).emit_batch(events)
    }
    fn flush(&self) {
        (**self).flush()
    }
    fn close(&self) -> Result<(), SinkError> {
        (**self).close()
    }
    fn health_check(&self) -> Option<Result<(), SinkError>> {
        (**self).health_check()
    }
}
