//! Asynchronous delivery: a bounded channel in front of a sink, drained by one worker thread.
//!
//! The producer pays one channel send; everything slow (disk, network, formatting in the
//! terminal) happens on the worker. What happens when the channel is full is the overflow
//! policy's call: block the producer, drop the new event, or drop the oldest queued one.
//!
//! With a batch size configured the worker accumulates and hands the wrapped sink whole batches
//! (its `emit_batch`), flushing on size, on a timer, and on shutdown.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, tick, Receiver, RecvTimeoutError, Sender, TrySendError};
use failure::Error;
use parking_lot::Mutex;

use crate::event::LogEvent;

use super::{Sink, SinkError};

/// Default channel capacity.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default flush interval for the batching worker.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Default budget for `close`.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// What to do with an event when the channel is full.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OverflowPolicy {
    /// Block the producer until there is room.
    Block,
    /// Drop the new event.
    Drop,
    /// Drop the oldest queued event to make room.
    DropOldest,
}

/// A snapshot of the wrapper's counters.
#[derive(Copy, Clone, Debug, Default)]
pub struct BackgroundMetrics {
    /// Events delivered to the wrapped sink.
    pub processed: u64,
    /// Events dropped (overflow or shutdown).
    pub dropped: u64,
    /// Delivery failures and panics.
    pub errors: u64,
    /// Events currently queued.
    pub len: usize,
    /// Channel capacity.
    pub capacity: usize,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    dropped: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn count_drop(&self) {
        let n = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
        if n == 1 || n % 1000 == 0 {
            crate::selflog!("background sink has dropped {} events", n);
        }
    }
}

enum Command {
    Event(LogEvent),
    Flush,
    Shutdown,
}

/// Configures a [`BackgroundSink`].
pub struct BackgroundBuilder {
    inner: Arc<dyn Sink>,
    capacity: usize,
    policy: OverflowPolicy,
    batch_size: usize,
    flush_interval: Duration,
    shutdown_timeout: Duration,
}

impl BackgroundBuilder {
    /// Channel capacity (default 1000).
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Overflow policy (default `Block`).
    pub fn policy(mut self, policy: OverflowPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Batch up to `size` events, flushing at the latest every `interval`. Zero disables
    /// batching.
    pub fn batch(mut self, size: usize, interval: Duration) -> Self {
        self.batch_size = size;
        self.flush_interval = interval;
        self
    }

    /// How long `close` waits for the worker to drain.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Spawns the worker and returns the sink. Fails when the OS refuses another thread.
    pub fn spawn(self) -> Result<BackgroundSink, Error> {
        let (tx, rx) = bounded(self.capacity);
        let (done_tx, done_rx) = bounded(1);
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            inner: Arc::clone(&self.inner),
            rx: rx.clone(),
            counters: Arc::clone(&counters),
            batch_size: self.batch_size,
            flush_interval: self.flush_interval,
        };
        let handle = thread::Builder::new()
            .name("mtlog-background".to_owned())
            .spawn(move || {
                worker.run();
                let _ = done_tx.send(());
            })?;

        Ok(BackgroundSink {
            inner: self.inner,
            tx,
            rx,
            policy: self.policy,
            capacity: self.capacity,
            shutdown_timeout: self.shutdown_timeout,
            counters,
            done: done_rx,
            worker: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
        })
    }
}

struct Worker {
    inner: Arc<dyn Sink>,
    rx: Receiver<Command>,
    counters: Arc<Counters>,
    batch_size: usize,
    flush_interval: Duration,
}

impl Worker {
    fn run(self) {
        let mut batch: Vec<LogEvent> = Vec::new();
        let ticker = tick(self.flush_interval);
        loop {
            crossbeam_channel::select! {
                recv(self.rx) -> cmd => match cmd {
                    Ok(Command::Event(event)) => {
                        if self.batch_size > 0 {
                            batch.push(event);
                            if batch.len() >= self.batch_size {
                                self.flush_batch(&mut batch);
                            }
                        } else {
                            self.emit_one(&event);
                        }
                    }
                    Ok(Command::Flush) => {
                        self.flush_batch(&mut batch);
                        self.inner.flush();
                    }
                    Ok(Command::Shutdown) | Err(_) => {
                        self.drain(&mut batch);
                        break;
                    }
                },
                recv(ticker) -> _ => {
                    if !batch.is_empty() {
                        self.flush_batch(&mut batch);
                    }
                }
            }
        }
    }

    // Shutdown: whatever is still queued gets processed, then one final flush.
    fn drain(&self, batch: &mut Vec<LogEvent>) {
        while let Ok(cmd) = self.rx.try_recv() {
            if let Command::Event(event) = cmd {
                if self.batch_size > 0 {
                    batch.push(event);
                    if batch.len() >= self.batch_size {
                        self.flush_batch(batch);
                    }
                } else {
                    self.emit_one(&event);
                }
            }
        }
        self.flush_batch(batch);
        self.inner.flush();
    }

    fn emit_one(&self, event: &LogEvent) {
        match catch_unwind(AssertUnwindSafe(|| self.inner.emit(event))) {
            Ok(Ok(())) => {
                self.counters.processed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Err(e)) => {
                self.counters.errors.fetch_add(1, Ordering::SeqCst);
                crate::selflog!("background delivery failed: {}", e);
            }
            Err(_) => {
                self.counters.errors.fetch_add(1, Ordering::SeqCst);
                crate::selflog!("wrapped sink panicked in background delivery");
            }
        }
    }

    fn flush_batch(&self, batch: &mut Vec<LogEvent>) {
        if batch.is_empty() {
            return;
        }
        let events = std::mem::replace(batch, Vec::new());
        match catch_unwind(AssertUnwindSafe(|| self.inner.emit_batch(&events))) {
            Ok(Ok(())) => {
                self.counters
                    .processed
                    .fetch_add(events.len() as u64, Ordering::SeqCst);
            }
            Ok(Err(e)) => {
                self.counters.errors.fetch_add(1, Ordering::SeqCst);
                crate::selflog!("background batch of {} failed: {}", events.len(), e);
            }
            Err(_) => {
                self.counters.errors.fetch_add(1, Ordering::SeqCst);
                crate::selflog!("wrapped sink panicked on a batch of {}", events.len());
            }
        }
    }
}

/// The asynchronous wrapper sink. See the module docs.
pub struct BackgroundSink {
    inner: Arc<dyn Sink>,
    tx: Sender<Command>,
    rx: Receiver<Command>,
    policy: OverflowPolicy,
    capacity: usize,
    shutdown_timeout: Duration,
    counters: Arc<Counters>,
    done: Receiver<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl BackgroundSink {
    /// Wraps a sink with the default configuration.
    pub fn wrap<S: Sink + 'static>(inner: S) -> Result<BackgroundSink, Error> {
        Self::builder(inner).spawn()
    }

    /// Starts configuring the wrapper.
    pub fn builder<S: Sink + 'static>(inner: S) -> BackgroundBuilder {
        BackgroundBuilder {
            inner: Arc::new(inner),
            capacity: DEFAULT_CAPACITY,
            policy: OverflowPolicy::Block,
            batch_size: 0,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Current counters.
    pub fn metrics(&self) -> BackgroundMetrics {
        BackgroundMetrics {
            processed: self.counters.processed.load(Ordering::SeqCst),
            dropped: self.counters.dropped.load(Ordering::SeqCst),
            errors: self.counters.errors.load(Ordering::SeqCst),
            len: self.rx.len(),
            capacity: self.capacity,
        }
    }
}

impl Sink for BackgroundSink {
    fn emit(&self, event: &LogEvent) -> Result<(), SinkError> {
        if self.closed.load(Ordering::SeqCst) {
            self.counters.count_drop();
            return Err(SinkError::Closed);
        }
        let cmd = Command::Event(event.clone());
        match self.policy {
            OverflowPolicy::Block => self.tx.send(cmd).map_err(|_| {
                self.counters.count_drop();
                SinkError::Closed
            }),
            OverflowPolicy::Drop => match self.tx.try_send(cmd) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.counters.count_drop();
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.counters.count_drop();
                    Err(SinkError::Closed)
                }
            },
            OverflowPolicy::DropOldest => match self.tx.try_send(cmd) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(cmd)) => {
                    // Steal the head of the queue; it is the oldest event.
                    if self.rx.try_recv().is_ok() {
                        self.counters.count_drop();
                    }
                    match self.tx.try_send(cmd) {
                        Ok(()) => Ok(()),
                        Err(_) => {
                            self.counters.count_drop();
                            Ok(())
                        }
                    }
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.counters.count_drop();
                    Err(SinkError::Closed)
                }
            },
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
            Err(RecvTimeoutError::Timeout) => {
                let remaining = self.rx.len() as u64;
                self.counters.dropped.fetch_add(remaining, Ordering::SeqCst);
                crate::selflog!(
                    "background sink close timed out, {} events abandoned",
                    remaining,
                );
                Err(SinkError::ShutdownTimeout(self.shutdown_timeout))
            }
        };
        if result.is_ok() {
            if let Some(handle) = self.worker.lock().take() {
                let _ = handle.join();
            }
            let _ = self.inner.close();
        }
        result
    }

    fn health_check(&self) -> Option<Result<(), SinkError>> {
        self.inner.health_check()
    }
}
