//! Bridging the `log` crate facade into the pipeline.
//!
//! Libraries all over the ecosystem log through [`log`]'s macros. Installing the bridge makes
//! those records flow through this pipeline like native events: the record's target becomes the
//! `SourceContext`, the formatted message becomes the template (such messages have no holes, so
//! they render as-is).
//!
//! ```rust,no_run
//! let logger = mtlog::Logger::builder().build();
//! mtlog::compat::install(logger, log::LevelFilter::Info).unwrap();
//! log::info!("this goes through the pipeline now");
//! ```

use log::{Log, Metadata, Record, SetLoggerError};

use crate::event::Level;
use crate::pipeline::Logger;

fn level_from(level: log::Level) -> Level {
    match level {
        log::Level::Trace => Level::Verbose,
        log::Level::Debug => Level::Debug,
        log::Level::Info => Level::Information,
        log::Level::Warn => Level::Warning,
        log::Level::Error => Level::Error,
    }
}

/// The adapter; implements [`log::Log`] over a [`Logger`].
pub struct LogBridge {
    logger: Logger,
}

impl LogBridge {
    /// Wraps a pipeline logger.
    pub fn new(logger: Logger) -> LogBridge {
        LogBridge { logger }
    }
}

impl Log for LogBridge {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.logger.is_enabled(level_from(metadata.level()))
    }

    fn log(&self, record: &Record) {
        let level = level_from(record.level());
        if !self.logger.is_enabled(level) {
            return;
        }
        let message = record.args().to_string();
        self.logger
            .for_context("SourceContext", record.target())
            .log(level, &message, &[]);
    }

    fn flush(&self) {
        self.logger.flush();
    }
}

/// Installs the bridge as the process-wide `log` logger.
///
/// Fails if something else already claimed the global logger slot.
pub fn install(logger: Logger, max_level: log::LevelFilter) -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(LogBridge::new(logger)))?;
    log::set_max_level(max_level);
    Ok(())
}
