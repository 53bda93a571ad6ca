//! Durable delivery: persistent buffering across sink outages, with transparent recovery.
//!
//! While the wrapped sink is healthy, events are delivered directly (each attempt supervised by
//! a timeout, so a hung sink cannot wedge the worker forever). The first failure flips the sink
//! to unhealthy: from then on events are appended to NDJSON buffer files on disk. A retry worker
//! probes the wrapped sink periodically; once it answers again, the buffer files are replayed in
//! order and deleted as they complete. A batch failure mid-replay aborts the pass and keeps the
//! file - the next pass re-delivers it from the start, which makes replay at-least-once.
//!
//! Buffer files are named `buffer-NNNNNN.jsonl` and each line is
//! `{"event": …, "timestamp": <unix-ns>, "sequence": <n>}`.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, tick, Receiver, RecvTimeoutError, Sender, TrySendError};
use failure::Error;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::event::LogEvent;

use super::{Sink, SinkError};

/// Default in-memory channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// Default size bound of one buffer file.
pub const DEFAULT_MAX_BUFFER_SIZE: u64 = 10 * 1024 * 1024;

/// Default bound on the number of buffer files kept.
pub const DEFAULT_MAX_BUFFER_FILES: usize = 10;

/// Default interval between recovery probes.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Default replay batch size.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default fsync interval for the open buffer file.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Budget for one supervised delivery into the wrapped sink.
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// The on-disk record, one per NDJSON line.
#[derive(Debug, Serialize, Deserialize)]
struct BufferedLogEvent {
    event: LogEvent,
    /// Unix timestamp in nanoseconds at enqueue time.
    timestamp: i64,
    sequence: u64,
}

/// A snapshot of the sink's counters.
#[derive(Copy, Clone, Debug, Default)]
pub struct DurableMetrics {
    /// Events written to buffer files.
    pub buffered: u64,
    /// Events delivered to the wrapped sink (directly or by replay).
    pub delivered: u64,
    /// Events dropped (channel overflow, buffer-file cap).
    pub dropped: u64,
    /// Recovery probes attempted.
    pub retries: u64,
}

#[derive(Default)]
struct Counters {
    buffered: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    retries: AtomicU64,
}

enum Command {
    Event(LogEvent),
    Flush,
    Shutdown,
}

/// Configures a [`DurableSink`].
pub struct DurableBuilder {
    inner: Arc<dyn Sink>,
    buffer_path: PathBuf,
    channel_capacity: usize,
    max_buffer_size: u64,
    max_buffer_files: usize,
    retry_interval: Duration,
    batch_size: usize,
    flush_interval: Duration,
    delivery_timeout: Duration,
    shutdown_timeout: Duration,
}

impl DurableBuilder {
    /// Capacity of the in-memory channel (default 10 000). Overflow drops.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Size at which a buffer file rolls over.
    pub fn max_buffer_size(mut self, size: u64) -> Self {
        self.max_buffer_size = size.max(1);
        self
    }

    /// At most this many buffer files are kept; the oldest are deleted beyond it.
    pub fn max_buffer_files(mut self, files: usize) -> Self {
        self.max_buffer_files = files.max(1);
        self
    }

    /// How often to probe an unhealthy wrapped sink.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Replay batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// How often the open buffer file is fsynced.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Budget for one supervised delivery.
    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// How long `close` waits for the worker.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Creates the buffer directory, scans leftovers from previous runs and spawns the worker.
    pub fn build(self) -> Result<DurableSink, Error> {
        fs::create_dir_all(&self.buffer_path)?;
        let existing = buffer_files(&self.buffer_path)?;
        let next_file_seq = existing
            .iter()
            .filter_map(|p| file_seq(p))
            .max()
            .map(|n| n + 1)
            .unwrap_or(0);
        // Leftover buffers mean the last run went down during an outage; start unhealthy so the
        // first probe replays them before anything else.
        let healthy = Arc::new(AtomicBool::new(existing.is_empty()));

        let (tx, rx) = bounded(self.channel_capacity);
        let (done_tx, done_rx) = bounded(1);
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            inner: Arc::clone(&self.inner),
            rx,
            counters: Arc::clone(&counters),
            healthy: Arc::clone(&healthy),
            dir: self.buffer_path.clone(),
            max_buffer_size: self.max_buffer_size,
            max_buffer_files: self.max_buffer_files,
            retry_interval: self.retry_interval,
            batch_size: self.batch_size,
            flush_interval: self.flush_interval,
            delivery_timeout: self.delivery_timeout,
            current: None,
            next_file_seq,
            sequence: 0,
        };
        let handle = thread::Builder::new()
            .name("mtlog-durable".to_owned())
            .spawn(move || {
                worker.run();
                let _ = done_tx.send(());
            })?;

        Ok(DurableSink {
            inner: self.inner,
            tx,
            healthy,
            counters,
            shutdown_timeout: self.shutdown_timeout,
            done: done_rx,
            worker: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
        })
    }
}

fn buffer_files(dir: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| file_seq(p).is_some())
        .collect();
    files.sort();
    Ok(files)
}

fn file_seq(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let rest = name.strip_prefix("buffer-")?;
    let digits = rest.strip_suffix(".jsonl")?;
    if digits.len() != 6 {
        return None;
    }
    digits.parse().ok()
}

fn count_lines(path: &Path) -> u64 {
    fs::read_to_string(path)
        .map(|s| s.lines().count() as u64)
        .unwrap_or(0)
}

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Runs a delivery on a throwaway thread so a hung sink cannot wedge the worker.
fn supervised<F>(f: F, timeout: Duration) -> Result<(), SinkError>
where
    F: FnOnce() -> Result<(), SinkError> + Send + 'static,
{
    let (tx, rx) = bounded(1);
    let spawned = thread::Builder::new()
        .name("mtlog-durable-delivery".to_owned())
        .spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(f));
            let _ = tx.send(result);
        });
    if spawned.is_err() {
        return Err(SinkError::Unavailable("spawning delivery thread failed".to_owned()));
    }
    match rx.recv_timeout(timeout) {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(SinkError::Unavailable("wrapped sink panicked".to_owned())),
        Err(_) => Err(SinkError::Unavailable(format!(
            "delivery timed out after {:?}",
            timeout,
        ))),
    }
}

struct BufferFile {
    path: PathBuf,
    writer: BufWriter<File>,
    size: u64,
    dirty: bool,
}

struct Worker {
    inner: Arc<dyn Sink>,
    rx: Receiver<Command>,
    counters: Arc<Counters>,
    healthy: Arc<AtomicBool>,
    dir: PathBuf,
    max_buffer_size: u64,
    max_buffer_files: usize,
    retry_interval: Duration,
    batch_size: usize,
    flush_interval: Duration,
    delivery_timeout: Duration,
    current: Option<BufferFile>,
    next_file_seq: u64,
    sequence: u64,
}

impl Worker {
    fn run(mut self) {
        if !self.healthy.load(Ordering::SeqCst) {
            // Startup recovery: leftovers from a previous run are replayed before anything else.
            self.counters.retries.fetch_add(1, Ordering::SeqCst);
            self.try_recover();
        }
        let retry = tick(self.retry_interval);
        let fsync = tick(self.flush_interval);
        // The receiver is cloned out of self so the select's borrow does not fight the
        // `&mut self` the handlers need.
        let rx = self.rx.clone();
        loop {
            crossbeam_channel::select! {
                recv(rx) -> cmd => match cmd {
                    Ok(Command::Event(event)) => self.handle(event),
                    Ok(Command::Flush) => {
                        self.fsync_current();
                        self.inner.flush();
                    }
                    Ok(Command::Shutdown) | Err(_) => {
                        self.drain();
                        break;
                    }
                },
                recv(retry) -> _ => {
                    if !self.healthy.load(Ordering::SeqCst) {
                        self.counters.retries.fetch_add(1, Ordering::SeqCst);
                        self.try_recover();
                    }
                },
                recv(fsync) -> _ => self.fsync_current(),
            }
        }
        self.close_current();
    }

    fn drain(&mut self) {
        while let Ok(cmd) = self.rx.try_recv() {
            if let Command::Event(event) = cmd {
                self.handle(event);
            }
        }
        self.inner.flush();
    }

    fn handle(&mut self, event: LogEvent) {
        if self.healthy.load(Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            let to_send = event.clone();
            match supervised(move || inner.emit(&to_send), self.delivery_timeout) {
                Ok(()) => {
                    self.counters.delivered.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    crate::selflog!("durable direct delivery failed, buffering: {}", e);
                    self.healthy.store(false, Ordering::SeqCst);
                    self.buffer(event);
                }
            }
        } else {
            self.buffer(event);
        }
    }

    fn buffer(&mut self, event: LogEvent) {
        let record = BufferedLogEvent {
            event,
            timestamp: unix_nanos(),
            sequence: self.sequence,
        };
        self.sequence += 1;
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                crate::selflog!("buffering serialization failed: {}", e);
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };

        let line_len = line.len() as u64 + 1;
        let needs_roll = self
            .current
            .as_ref()
            .map_or(false, |c| c.size > 0 && c.size + line_len > self.max_buffer_size);
        if needs_roll {
            self.close_current();
        }
        if self.current.is_none() {
            match self.open_next() {
                Ok(file) => self.current = Some(file),
                Err(e) => {
                    crate::selflog!("opening buffer file failed: {}", e);
                    self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                    return;
                }
            }
            self.enforce_file_cap();
        }

        let current = self.current.as_mut().expect("buffer file just opened");
        match writeln!(current.writer, "{}", line) {
            Ok(()) => {
                current.size += line_len;
                current.dirty = true;
                self.counters.buffered.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => {
                crate::selflog!("buffer file write failed: {}", e);
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn open_next(&mut self) -> Result<BufferFile, std::io::Error> {
        let path = self
            .dir
            .join(format!("buffer-{:06}.jsonl", self.next_file_seq));
        self.next_file_seq += 1;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(BufferFile {
            path,
            writer: BufWriter::new(file),
            size: 0,
            dirty: false,
        })
    }

    fn enforce_file_cap(&mut self) {
        let files = match buffer_files(&self.dir) {
            Ok(files) => files,
            Err(_) => return,
        };
        if files.len() <= self.max_buffer_files {
            return;
        }
        let current = self.current.as_ref().map(|c| c.path.clone());
        let excess = files.len() - self.max_buffer_files;
        for path in files.into_iter().take(excess) {
            if Some(&path) == current.as_ref() {
                continue;
            }
            let lost = count_lines(&path);
            match fs::remove_file(&path) {
                Ok(()) => {
                    self.counters.dropped.fetch_add(lost, Ordering::SeqCst);
                    crate::selflog!("buffer cap reached, deleted {:?} ({} events)", path, lost);
                }
                Err(e) => crate::selflog!("deleting old buffer {:?} failed: {}", path, e),
            }
        }
    }

    fn fsync_current(&mut self) {
        if let Some(current) = self.current.as_mut() {
            if current.dirty {
                let _ = current.writer.flush();
                let _ = current.writer.get_ref().sync_data();
                current.dirty = false;
            }
        }
    }

    fn close_current(&mut self) {
        if let Some(mut current) = self.current.take() {
            let _ = current.writer.flush();
            let _ = current.writer.get_ref().sync_data();
        }
    }

    fn try_recover(&mut self) {
        let probe = match self.inner.health_check() {
            Some(result) => result,
            None => {
                // No explicit probe offered; a synthetic event has to do.
                let inner = Arc::clone(&self.inner);
                supervised(
                    move || inner.emit(&LogEvent::new(crate::event::Level::Debug, "health check")),
                    self.delivery_timeout,
                )
            }
        };
        if let Err(e) = probe {
            crate::selflog!("durable recovery probe failed: {}", e);
            return;
        }

        self.healthy.store(true, Ordering::SeqCst);
        crate::selflog!("durable sink recovered, replaying buffers");
        self.close_current();
        self.replay_all();
    }

    fn replay_all(&mut self) {
        let files = match buffer_files(&self.dir) {
            Ok(files) => files,
            Err(e) => {
                crate::selflog!("scanning buffer dir failed: {}", e);
                return;
            }
        };
        for path in files {
            match self.replay_file(&path) {
                Ok(replayed) => {
                    self.counters.delivered.fetch_add(replayed, Ordering::SeqCst);
                    if let Err(e) = fs::remove_file(&path) {
                        crate::selflog!("removing replayed buffer {:?} failed: {}", path, e);
                    }
                }
                Err(e) => {
                    // Abort the pass; this file is retried whole on the next probe.
                    crate::selflog!("replay of {:?} aborted: {}", path, e);
                    self.healthy.store(false, Ordering::SeqCst);
                    return;
                }
            }
        }
    }

    fn replay_file(&self, path: &Path) -> Result<u64, SinkError> {
        let file = File::open(path)?;
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BufferedLogEvent>(&line) {
                Ok(record) => events.push(record.event),
                Err(e) => {
                    crate::selflog!("skipping malformed buffer line in {:?}: {}", path, e);
                }
            }
        }
        let mut replayed = 0;
        for chunk in events.chunks(self.batch_size) {
            let inner = Arc::clone(&self.inner);
            let batch = chunk.to_vec();
            supervised(move || inner.emit_batch(&batch), self.delivery_timeout)?;
            replayed += chunk.len() as u64;
        }
        Ok(replayed)
    }
}

/// The durable wrapper sink. See the module docs.
pub struct DurableSink {
    inner: Arc<dyn Sink>,
    tx: Sender<Command>,
    healthy: Arc<AtomicBool>,
    counters: Arc<Counters>,
    shutdown_timeout: Duration,
    done: Receiver<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl DurableSink {
    /// Starts configuring a durable wrapper around `inner`, buffering under `buffer_path`.
    pub fn builder<S: Sink + 'static, P: AsRef<Path>>(inner: S, buffer_path: P) -> DurableBuilder {
        DurableBuilder {
            inner: Arc::new(inner),
            buffer_path: buffer_path.as_ref().to_path_buf(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            max_buffer_files: DEFAULT_MAX_BUFFER_FILES,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    /// Is the wrapped sink currently believed healthy?
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Current counters.
    pub fn metrics(&self) -> DurableMetrics {
        DurableMetrics {
            buffered: self.counters.buffered.load(Ordering::SeqCst),
            delivered: self.counters.delivered.load(Ordering::SeqCst),
            dropped: self.counters.dropped.load(Ordering::SeqCst),
            retries: self.counters.retries.load(Ordering::SeqCst),
        }
    }
}

impl Sink for DurableSink {
    fn emit(&self, event: &LogEvent) -> Result<(), SinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SinkError::Closed);
        }
        match self.tx.try_send(Command::Event(event.clone())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let n = self.counters.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 1 || n % 1000 == 0 {
                    crate::selflog!("durable sink channel full, {} events dropped", n);
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
            let _ = self.inner.close();
        }
        result
    }

    fn health_check(&self) -> Option<Result<(), SinkError>> {
        if self.is_healthy() {
            Some(Ok(()))
        } else {
            Some(Err(SinkError::Unavailable("buffering to disk".to_owned())))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;

    use crate::event::Level;
    use crate::sink::MemorySink;

    use super::*;

    fn event(n: usize) -> LogEvent {
        LogEvent::new(Level::Information, format!("event {}", n))
    }

    fn quick_builder(memory: &MemorySink, dir: &Path) -> DurableBuilder {
        DurableSink::builder(memory.clone(), dir)
            .retry_interval(Duration::from_millis(50))
            .flush_interval(Duration::from_millis(20))
            .delivery_timeout(Duration::from_millis(500))
            .batch_size(10)
    }

    // The synthetic recovery probe lands in the wrapped sink too; tests count real events only.
    fn real_events(memory: &MemorySink) -> Vec<String> {
        memory
            .messages()
            .into_iter()
            .filter(|m| m.starts_with("event "))
            .collect()
    }

    #[test]
    fn healthy_mode_delivers_directly() {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemorySink::new();
        let sink = quick_builder(&memory, dir.path()).build().unwrap();
        for n in 0..5 {
            sink.emit(&event(n)).unwrap();
        }
        sink.close().unwrap();
        assert_eq!(memory.len(), 5);
        assert_eq!(sink.metrics().delivered, 5);
        assert_eq!(sink.metrics().buffered, 0);
        assert!(buffer_files(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn outage_buffers_then_replays() {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemorySink::new();
        memory.set_failing(true);
        let sink = quick_builder(&memory, dir.path()).build().unwrap();

        for n in 0..4 {
            sink.emit(&event(n)).unwrap();
        }
        // Give the worker time to fail over and buffer.
        sleep(Duration::from_millis(300));
        assert!(!sink.is_healthy());
        let files = buffer_files(dir.path()).unwrap();
        assert!(!files.is_empty());
        let lines: usize = files
            .iter()
            .map(|p| std::fs::read_to_string(p).unwrap().lines().count())
            .sum();
        assert!(lines >= 3, "expected most events on disk, found {}", lines);

        memory.set_failing(false);
        // Within two retry intervals everything must be replayed.
        sleep(Duration::from_millis(300));
        assert!(sink.is_healthy());
        assert_eq!(real_events(&memory).len(), 4);
        assert!(buffer_files(dir.path()).unwrap().is_empty());

        let metrics = sink.metrics();
        assert_eq!(metrics.delivered, 4);
        assert!(metrics.buffered >= 3);
        assert_eq!(metrics.dropped, 0);
        sink.close().unwrap();
    }

    #[test]
    fn startup_replays_leftover_buffers() {
        let dir = tempfile::tempdir().unwrap();
        // A previous run left a buffer file behind.
        let record = BufferedLogEvent {
            event: event(99),
            timestamp: 1,
            sequence: 0,
        };
        std::fs::write(
            dir.path().join("buffer-000003.jsonl"),
            format!("{}\n", serde_json::to_string(&record).unwrap()),
        )
        .unwrap();

        let memory = MemorySink::new();
        let sink = quick_builder(&memory, dir.path()).build().unwrap();
        sleep(Duration::from_millis(200));
        assert_eq!(real_events(&memory).len(), 1);
        assert!(buffer_files(dir.path()).unwrap().is_empty());
        sink.close().unwrap();
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = BufferedLogEvent {
            event: event(1),
            timestamp: 1,
            sequence: 0,
        };
        std::fs::write(
            dir.path().join("buffer-000000.jsonl"),
            format!("not json at all\n{}\n", serde_json::to_string(&good).unwrap()),
        )
        .unwrap();

        let memory = MemorySink::new();
        let sink = quick_builder(&memory, dir.path()).build().unwrap();
        sleep(Duration::from_millis(200));
        assert_eq!(real_events(&memory).len(), 1);
        sink.close().unwrap();
    }

    #[test]
    fn buffer_files_roll_and_cap() {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemorySink::new();
        memory.set_failing(true);
        let sink = quick_builder(&memory, dir.path())
            .max_buffer_size(256)
            .max_buffer_files(2)
            .build()
            .unwrap();
        for n in 0..100 {
            sink.emit(&event(n)).unwrap();
        }
        sleep(Duration::from_millis(500));
        let files = buffer_files(dir.path()).unwrap();
        assert!(files.len() <= 3, "file cap not applied: {:?}", files);
        assert!(sink.metrics().dropped > 0);
        sink.close().unwrap();
    }

    #[test]
    fn file_seq_parsing() {
        assert_eq!(file_seq(Path::new("/x/buffer-000007.jsonl")), Some(7));
        assert_eq!(file_seq(Path::new("/x/buffer-7.jsonl")), None);
        assert_eq!(file_seq(Path::new("/x/other-000007.jsonl")), None);
    }
}
