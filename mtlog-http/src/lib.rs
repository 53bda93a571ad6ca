#![doc(
    html_root_url = "https://docs.rs/mtlog-http/0.1.0/mtlog_http/",
    test(attr(deny(warnings)))
)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! HTTP batch sinks for the `mtlog` pipeline.
//!
//! Each log service gets the same treatment: events are queued on a bounded channel, a worker
//! thread accumulates them into batches (bounded by size and by a timeout), frames the batch in
//! the service's wire format and POSTs it with a blocking HTTP client. Transient failures are
//! retried up to three times with a linear back-off; what still fails is counted and reported
//! through the self-log. `close` flushes whatever is pending.
//!
//! The framing lives behind the [`Transport`] trait, so it is testable without a network - and
//! so the durable wrapper can probe connectivity explicitly: an HTTP sink accepts everything
//! locally, which makes a plain `emit` useless as a health signal. [`Transport::probe`] (a GET
//! against the service root with a two-second budget) is what
//! [`health_check`](mtlog::sink::Sink::health_check) answers with.
//!
//! ```rust,no_run
//! use mtlog::Logger;
//! use mtlog_http::seq::SeqSink;
//!
//! let seq = SeqSink::builder("http://localhost:5341")
//!     .api_key("secret")
//!     .build()
//!     .unwrap();
//! let logger = Logger::builder().sink(seq).build();
//! mtlog::info!(logger, "shipped to Seq");
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, tick, Receiver, RecvTimeoutError, Sender, TrySendError};
use failure::Fail;
use parking_lot::Mutex;

use mtlog::sink::{Sink, SinkError};
use mtlog::LogEvent;

// The per-service sinks all wrap an HttpBatchSink; the Sink impl is the same shuffle each time.
macro_rules! delegate_sink {
    ($ty: ty) => {
        impl mtlog::sink::Sink for $ty {
            fn emit(&self, event: &mtlog::LogEvent) -> Result<(), mtlog::sink::SinkError> {
                self.inner.emit(event)
            }
            fn flush(&self) {
                self.inner.flush()
            }
            fn close(&self) -> Result<(), mtlog::sink::SinkError> {
                self.inner.close()
            }
            fn health_check(&self) -> Option<Result<(), mtlog::sink::SinkError>> {
                self.inner.health_check()
            }
        }

        impl $ty {
            /// Current batcher counters.
            pub fn metrics(&self) -> crate::BatchMetrics {
                self.inner.metrics()
            }
        }
    };
}

/// Deserializes an optional humantime-formatted duration, e.g. `"500ms"` or absent/`null`.
pub(crate) mod humantime_option {
    use serde::Deserialize;
    use serde_humantime::De;
    use std::time::Duration;

    pub fn deserialize<'de, D>(d: D) -> Result<Option<Duration>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Option::<De<Duration>>::deserialize(d)?.map(De::into_inner))
    }
}

pub mod elastic;
pub mod seq;
pub mod splunk;

pub use crate::elastic::ElasticsearchSink;
pub use crate::seq::SeqSink;
pub use crate::splunk::SplunkSink;

/// Budget for the connectivity probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Default batch size.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default upper bound on how long a partial batch waits.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Default channel capacity in front of the worker.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Retry attempts for one batch.
const RETRY_ATTEMPTS: u32 = 3;

/// Base of the linear back-off between attempts.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// What can go wrong talking to a log service.
#[derive(Debug, Fail)]
pub enum HttpError {
    /// The sink was constructed with a bad URL or missing credentials.
    #[fail(display = "invalid configuration: {}", _0)]
    InvalidConfig(String),
    /// The request could not be sent or the connection failed.
    #[fail(display = "http transport error: {}", _0)]
    Transport(String),
    /// The service answered with a non-success status.
    #[fail(display = "http status {}", _0)]
    Status(u16),
}

impl From<reqwest::Error> for HttpError {
    fn from(e: reqwest::Error) -> HttpError {
        HttpError::Transport(e.to_string())
    }
}

impl From<HttpError> for SinkError {
    fn from(e: HttpError) -> SinkError {
        SinkError::Unavailable(e.to_string())
    }
}

/// One service's wire format and endpoints.
pub trait Transport: Send + Sync + 'static {
    /// A short name for diagnostics (`"seq"`, `"elasticsearch"`, …).
    fn name(&self) -> &'static str;
    /// Frames and sends one batch.
    fn send(&self, events: &[LogEvent]) -> Result<(), HttpError>;
    /// A cheap connectivity probe against the service, bounded by [`PROBE_TIMEOUT`].
    fn probe(&self) -> Result<(), HttpError>;
}

/// A snapshot of a batch sink's counters.
#[derive(Copy, Clone, Debug, Default)]
pub struct BatchMetrics {
    /// Events shipped successfully.
    pub shipped: u64,
    /// Events in batches that exhausted their retries.
    pub failed: u64,
    /// Events dropped at the channel.
    pub dropped: u64,
    /// Batches sent (including retries that eventually succeeded).
    pub batches: u64,
}

#[derive(Default)]
struct Counters {
    shipped: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    batches: AtomicU64,
}

enum Command {
    Event(LogEvent),
    Flush,
    Shutdown,
}

/// Tuning for the shared batcher.
#[derive(Copy, Clone, Debug)]
pub struct BatchOptions {
    /// Flush when this many events are pending.
    pub batch_size: usize,
    /// Flush a partial batch at the latest after this long.
    pub batch_timeout: Duration,
    /// Channel capacity; overflow drops with a counter.
    pub capacity: usize,
    /// How long `close` waits for the worker.
    pub shutdown_timeout: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            capacity: DEFAULT_CAPACITY,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// The shared batch sink: channel, worker, retries. The service specifics live in its
/// [`Transport`].
pub struct HttpBatchSink {
    transport: Arc<dyn Transport>,
    tx: Sender<Command>,
    counters: Arc<Counters>,
    shutdown_timeout: Duration,
    done: Receiver<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl HttpBatchSink {
    /// Spawns the worker for a transport. Fails when the OS refuses another thread.
    pub fn spawn<T: Transport>(transport: T, options: BatchOptions) -> Result<HttpBatchSink, HttpError> {
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let (tx, rx) = bounded(options.capacity.max(1));
        let (done_tx, done_rx) = bounded(1);
        let counters = Arc::new(Counters::default());

        let worker_transport = Arc::clone(&transport);
        let worker_counters = Arc::clone(&counters);
        let batch_size = options.batch_size.max(1);
        let batch_timeout = options.batch_timeout;
        let handle = thread::Builder::new()
            .name(format!("mtlog-http-{}", transport.name()))
            .spawn(move || {
                run_worker(worker_transport, rx, worker_counters, batch_size, batch_timeout);
                let _ = done_tx.send(());
            })
            .map_err(|e| HttpError::Transport(format!("spawning the sink worker: {}", e)))?;

        Ok(HttpBatchSink {
            transport,
            tx,
            counters,
            shutdown_timeout: options.shutdown_timeout,
            done: done_rx,
            worker: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
        })
    }

    /// Current counters.
    pub fn metrics(&self) -> BatchMetrics {
        BatchMetrics {
            shipped: self.counters.shipped.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
            dropped: self.counters.dropped.load(Ordering::SeqCst),
            batches: self.counters.batches.load(Ordering::SeqCst),
        }
    }
}

fn run_worker(
    transport: Arc<dyn Transport>,
    rx: Receiver<Command>,
    counters: Arc<Counters>,
    batch_size: usize,
    batch_timeout: Duration,
) {
    let mut batch: Vec<LogEvent> = Vec::new();
    let ticker = tick(batch_timeout);
    loop {
        crossbeam_channel::select! {
            recv(rx) -> cmd => match cmd {
                Ok(Command::Event(event)) => {
                    batch.push(event);
                    if batch.len() >= batch_size {
                        deliver(&transport, &counters, &mut batch);
                    }
                }
                Ok(Command::Flush) => deliver(&transport, &counters, &mut batch),
                Ok(Command::Shutdown) | Err(_) => {
                    while let Ok(Command::Event(event)) = rx.try_recv() {
                        batch.push(event);
                        if batch.len() >= batch_size {
                            deliver(&transport, &counters, &mut batch);
                        }
                    }
                    deliver(&transport, &counters, &mut batch);
                    break;
                }
            },
            recv(ticker) -> _ => {
                if !batch.is_empty() {
                    deliver(&transport, &counters, &mut batch);
                }
            }
        }
    }
}

fn deliver(transport: &Arc<dyn Transport>, counters: &Counters, batch: &mut Vec<LogEvent>) {
    if batch.is_empty() {
        return;
    }
    let events = std::mem::replace(batch, Vec::new());
    counters.batches.fetch_add(1, Ordering::SeqCst);
    for attempt in 1..=RETRY_ATTEMPTS {
        let result = catch_unwind(AssertUnwindSafe(|| transport.send(&events)));
        match result {
            Ok(Ok(())) => {
                counters.shipped.fetch_add(events.len() as u64, Ordering::SeqCst);
                return;
            }
            Ok(Err(e)) if attempt < RETRY_ATTEMPTS => {
                mtlog::selflog!(
                    "{} batch attempt {}/{} failed, retrying: {}",
                    transport.name(),
                    attempt,
                    RETRY_ATTEMPTS,
                    e,
                );
                thread::sleep(RETRY_BACKOFF * attempt);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(events.len() as u64, Ordering::SeqCst);
                mtlog::selflog!(
                    "{} batch of {} abandoned after {} attempts: {}",
                    transport.name(),
                    events.len(),
                    RETRY_ATTEMPTS,
                    e,
                );
            }
            Err(_) => {
                counters.failed.fetch_add(events.len() as u64, Ordering::SeqCst);
                mtlog::selflog!("{} transport panicked", transport.name());
                return;
            }
        }
    }
}

impl Sink for HttpBatchSink {
    fn emit(&self, event: &LogEvent) -> Result<(), SinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        match self.tx.try_send(Command::Event(event.clone())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let n = self.counters.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 || n % 1000 == 0 {
                    mtlog::selflog!("{} sink queue full, {} dropped", self.transport.name(), n);
                }
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(SinkError::Closed),
        }
    }

    fn flush(&self) {
        let _ = self.tx.try_send(Command::Flush);
    }

    fn close(&self) -> Result<(), SinkError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.tx.send(Command::Shutdown);
        let result = match self.done.recv_timeout(self.shutdown_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => Ok(()),
            Err(RecvTimeoutError::Timeout) => Err(SinkError::ShutdownTimeout(self.shutdown_timeout)),
        };
        if result.is_ok() {
            if let Some(handle) = self.worker.lock().take() {
                let _ = handle.join();
            }
        }
        result
    }

    /// The explicit connectivity probe; `emit` into a batching sink always "succeeds" locally,
    /// so this is what the durable wrapper has to trust.
    fn health_check(&self) -> Option<Result<(), SinkError>> {
        Some(self.transport.probe().map_err(SinkError::from))
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, HttpError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(HttpError::from)
}

pub(crate) fn check_status(response: &reqwest::Response) -> Result<(), HttpError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(HttpError::Status(response.status().as_u16()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use mtlog::Level;

    use super::*;

    struct MockTransport {
        sent: Arc<Mutex<Vec<Vec<LogEvent>>>>,
        fail_first: Arc<AtomicUsize>,
    }

    impl Transport for MockTransport {
        fn name(&self) -> &'static str {
            "mock"
        }
        fn send(&self, events: &[LogEvent]) -> Result<(), HttpError> {
            if self.fail_first.load(Ordering::SeqCst) > 0 {
                self.fail_first.fetch_sub(1, Ordering::SeqCst);
                return Err(HttpError::Status(503));
            }
            self.sent.lock().push(events.to_vec());
            Ok(())
        }
        fn probe(&self) -> Result<(), HttpError> {
            Ok(())
        }
    }

    fn event(n: usize) -> LogEvent {
        LogEvent::new(Level::Information, format!("event {}", n))
    }

    fn options() -> BatchOptions {
        BatchOptions {
            batch_size: 10,
            batch_timeout: Duration::from_millis(50),
            capacity: 100,
            shutdown_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn batches_by_size_and_flushes_on_close() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = MockTransport {
            sent: Arc::clone(&sent),
            fail_first: Arc::new(AtomicUsize::new(0)),
        };
        let sink = HttpBatchSink::spawn(transport, options()).unwrap();
        for n in 0..25 {
            sink.emit(&event(n)).unwrap();
        }
        sink.close().unwrap();

        let batches = sent.lock();
        let total: usize = batches.iter().map(|b| b.len()).sum();
        assert_eq!(total, 25);
        assert!(batches.len() >= 3);
        assert!(batches.iter().all(|b| b.len() <= 10));
        assert_eq!(sink.metrics().shipped, 25);
    }

    #[test]
    fn transient_failures_are_retried() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = MockTransport {
            sent: Arc::clone(&sent),
            fail_first: Arc::new(AtomicUsize::new(2)),
        };
        let sink = HttpBatchSink::spawn(transport, options()).unwrap();
        sink.emit(&event(1)).unwrap();
        sink.close().unwrap();

        assert_eq!(sent.lock().len(), 1);
        assert_eq!(sink.metrics().shipped, 1);
        assert_eq!(sink.metrics().failed, 0);
    }

    #[test]
    fn persistent_failures_are_counted() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = MockTransport {
            sent: Arc::clone(&sent),
            fail_first: Arc::new(AtomicUsize::new(100)),
        };
        let sink = HttpBatchSink::spawn(transport, options()).unwrap();
        sink.emit(&event(1)).unwrap();
        sink.close().unwrap();

        assert!(sent.lock().is_empty());
        assert_eq!(sink.metrics().failed, 1);
    }

    #[test]
    fn health_check_uses_the_probe() {
        let transport = MockTransport {
            sent: Arc::new(Mutex::new(Vec::new())),
            fail_first: Arc::new(AtomicUsize::new(0)),
        };
        let sink = HttpBatchSink::spawn(transport, options()).unwrap();
        assert!(matches!(sink.health_check(), Some(Ok(()))));
        sink.close().unwrap();
    }
}
