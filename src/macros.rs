//! The logging macros.
//!
//! Each takes a [`Logger`][crate::Logger], a message template and the positional arguments for
//! its holes, and captures the call site (file, line, module) on the side:
//!
//! ```rust
//! # let logger = mtlog::Logger::builder().build();
//! mtlog::info!(logger, "User {UserId} logged in from {IP}", 123, "192.168.1.1");
//! ```
//!
//! `error!` and `fatal!` additionally accept an error before the template, separated by a
//! semicolon:
//!
//! ```rust
//! # let logger = mtlog::Logger::builder().build();
//! # let err = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
//! mtlog::error!(logger, err; "Writing {Path} failed", "/var/lib/db");
//! ```

/// Logs at an explicit level. The per-level macros expand to this.
#[macro_export]
macro_rules! log_event {
    ($logger:expr, $level:expr, $err:expr; $tmpl:expr $(, $arg:expr)* $(,)?) => {
        $logger.log_with(
            $level,
            $tmpl,
            &[$(&$arg as &dyn $crate::capture::Capture),*],
            Some(::std::string::ToString::to_string(&$err)),
            Some($crate::pipeline::CallSite {
                file: file!(),
                line: line!(),
                module: module_path!(),
            }),
        )
    };
    ($logger:expr, $level:expr, $tmpl:expr $(, $arg:expr)* $(,)?) => {
        $logger.log_with(
            $level,
            $tmpl,
            &[$(&$arg as &dyn $crate::capture::Capture),*],
            None,
            Some($crate::pipeline::CallSite {
                file: file!(),
                line: line!(),
                module: module_path!(),
            }),
        )
    };
}

/// Logs at `Verbose`.
#[macro_export]
macro_rules! verbose {
    ($logger:expr, $($rest:tt)+) => {
        $crate::log_event!($logger, $crate::Level::Verbose, $($rest)+)
    };
}

/// Logs at `Debug`.
#[macro_export]
macro_rules! debug {
    ($logger:expr, $($rest:tt)+) => {
        $crate::log_event!($logger, $crate::Level::Debug, $($rest)+)
    };
}

/// Logs at `Information`.
#[macro_export]
macro_rules! info {
    ($logger:expr, $($rest:tt)+) => {
        $crate::log_event!($logger, $crate::Level::Information, $($rest)+)
    };
}

/// Logs at `Warning`.
#[macro_export]
macro_rules! warn {
    ($logger:expr, $($rest:tt)+) => {
        $crate::log_event!($logger, $crate::Level::Warning, $($rest)+)
    };
}

/// Logs at `Error`. Accepts an optional `error;` before the template.
#[macro_export]
macro_rules! error {
    ($logger:expr, $($rest:tt)+) => {
        $crate::log_event!($logger, $crate::Level::Error, $($rest)+)
    };
}

/// Logs at `Fatal`. Accepts an optional `error;` before the template.
#[macro_export]
macro_rules! fatal {
    ($logger:expr, $($rest:tt)+) => {
        $crate::log_event!($logger, $crate::Level::Fatal, $($rest)+)
    };
}

#[cfg(test)]
mod tests {
    use crate::event::{Level, Value};
    use crate::sink::MemorySink;
    use crate::Logger;

    fn logger(sink: &MemorySink) -> Logger {
        Logger::builder()
            .minimum_level(Level::Verbose)
            .enrich(crate::enrich::CallerLocation)
            .sink(sink.clone())
            .build()
    }

    #[test]
    fn levels_and_arguments() {
        let sink = MemorySink::new();
        let logger = logger(&sink);
        crate::verbose!(logger, "v");
        crate::debug!(logger, "d");
        crate::info!(logger, "User {UserId} logged in", 123);
        crate::warn!(logger, "w");
        crate::error!(logger, "e");
        crate::fatal!(logger, "f");
        let events = sink.events();
        assert_eq!(events.len(), 6);
        assert_eq!(events[2].level, Level::Information);
        assert_eq!(events[2].property("UserId"), Some(&Value::Int(123)));
    }

    #[test]
    fn error_with_cause() {
        let sink = MemorySink::new();
        let logger = logger(&sink);
        let cause = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        crate::error!(logger, cause; "Writing {Path} failed", "/var/lib/db");
        let event = &sink.events()[0];
        assert_eq!(event.error.as_deref(), Some("disk on fire"));
        assert_eq!(event.property("Path"), Some(&Value::Str("/var/lib/db".into())));
    }

    #[test]
    fn call_site_is_captured() {
        let sink = MemorySink::new();
        let logger = logger(&sink);
        crate::info!(logger, "here");
        let caller = sink.events()[0]
            .property("Caller")
            .and_then(Value::as_str)
            .unwrap()
            .to_owned();
        assert!(caller.contains("macros.rs"));
    }

    #[test]
    fn trailing_comma_is_fine() {
        let sink = MemorySink::new();
        let logger = logger(&sink);
        crate::info!(logger, "pair {A} {B}", 1, 2,);
        assert_eq!(sink.len(), 1);
    }
}
