//! The pipeline's own diagnostic channel.
//!
//! When a sink cannot write, a predicate panics or a buffer file is corrupt, the pipeline has to
//! say so *somewhere* - and it must not be the pipeline itself, or a failing sink would feed an
//! endless loop. This module is that somewhere: a single process-wide, opt-in writer.
//!
//! Disabled (the default) it costs one atomic load per call site and allocates nothing. Enable it
//! in development or when chasing a misbehaving sink:
//!
//! ```rust
//! mtlog::selflog::enable(std::io::stderr());
//! ```
//!
//! Lines are `ISO-8601 UTC timestamp, one space, the message, a newline`.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::fmt;

use chrono::{SecondsFormat, Utc};
use either::Either;
use lazy_static::lazy_static;
use parking_lot::{Mutex, RwLock};

// Fully qualified Sync: the wrapper type below shadows the marker trait in this module.
type WriterSlot =
    Either<Box<dyn Write + Send>, Box<dyn Fn(&str) + Send + std::marker::Sync>>;

static ENABLED: AtomicBool = AtomicBool::new(false);

lazy_static! {
    static ref OUTPUT: RwLock<Option<Mutex<WriterSlot>>> = RwLock::new(None);
}

/// Routes diagnostics into the given writer.
///
/// The writer is used from whatever thread happens to fail; wrap shared writers in [`Sync`] if
/// they are not already serialized. Replaces any previously installed output.
pub fn enable<W: Write + Send + 'static>(writer: W) {
    *OUTPUT.write() = Some(Mutex::new(Either::Left(Box::new(writer))));
    ENABLED.store(true, Ordering::SeqCst);
}

/// Routes diagnostics into a function, one formatted line per call (no trailing newline).
pub fn enable_fn<F: Fn(&str) + Send + std::marker::Sync + 'static>(f: F) {
    *OUTPUT.write() = Some(Mutex::new(Either::Right(Box::new(f))));
    ENABLED.store(true, Ordering::SeqCst);
}

/// Turns diagnostics off and drops the installed writer.
pub fn disable() {
    ENABLED.store(false, Ordering::SeqCst);
    *OUTPUT.write() = None;
}

/// Is a diagnostic output installed?
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// Formats and writes one diagnostic line. Prefer the `selflog!` macro, which skips the
/// formatting entirely when disabled.
pub fn report(args: fmt::Arguments) {
    let output = OUTPUT.read();
    let slot = match &*output {
        Some(slot) => slot,
        None => return,
    };
    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    let line = format!("{} {}", stamp, args);
    match &mut *slot.lock() {
        // Write failures here are swallowed; there is nowhere left to complain to.
        Either::Left(w) => {
            let _ = writeln!(w, "{}", line);
            let _ = w.flush();
        }
        Either::Right(f) => f(&line),
    };
}

/// A writer wrapper that serializes concurrent writes with an internal lock.
pub struct Sync<W>(Mutex<W>);

impl<W: Write> Sync<W> {
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Sync(Mutex::new(writer))
    }
}

impl<W: Write> Write for Sync<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().flush()
    }
}

/// Writes a diagnostic line if self-logging is enabled; a no-op otherwise.
///
/// Takes `format!`-style arguments. This is what the pipeline itself uses everywhere.
#[macro_export]
macro_rules! selflog {
    ($($arg:tt)*) => {
        if $crate::selflog::is_enabled() {
            $crate::selflog::report(format_args!($($arg)*));
        }
    };
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use super::*;

    // The output slot is process-global, so the tests here share one lock step.
    static SERIAL: StdMutex<()> = StdMutex::new(());

    #[test]
    fn disabled_is_silent() {
        let _guard = SERIAL.lock().unwrap();
        disable();
        assert!(!is_enabled());
        // Must not panic or write anywhere.
        crate::selflog!("nobody hears {}", "this");
    }

    #[test]
    fn captures_lines() {
        let _guard = SERIAL.lock().unwrap();
        let lines = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        enable_fn(move |line| sink.lock().unwrap().push(line.to_owned()));
        assert!(is_enabled());
        crate::selflog!("sink {} failed", "file");
        disable();
        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("sink file failed"));
        // ISO-8601 UTC stamp up front.
        assert!(lines[0].contains('T'));
        assert!(lines[0].split(' ').next().unwrap().ends_with('Z'));
    }

    #[test]
    fn sync_wrapper_serializes() {
        let mut w = Sync::new(Vec::new());
        w.write_all(b"abc").unwrap();
        w.flush().unwrap();
        assert_eq!(w.0.lock().as_slice(), b"abc");
    }
}
