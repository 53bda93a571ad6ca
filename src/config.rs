//! Configuration fragments for assembling a pipeline from deserialized config.
//!
//! The fragments only describe sinks; loading the file (TOML, YAML, whatever the host uses) and
//! handing the deserializer over is the application's business. A typical TOML slice:
//!
//! ```toml
//! minimum-level = "Debug"
//!
//! [[sinks]]
//! type = "console"
//!
//! [[sinks]]
//! type = "rolling-file"
//! filename = "/var/log/app/app.log"
//! max-file-size = 10485760
//! interval = "daily"
//! retain-files = 7
//! compress = true
//! level = "Information"
//!
//! [sinks.background]
//! capacity = 4096
//! overflow = "drop-oldest"
//! ```
//!
//! Each sink entry is the terminal destination plus optional wrapper sections; wrappers nest as
//! `background(durable(breaker(destination)))`, outermost first, so the producer always sees the
//! cheap channel send.

use std::path::PathBuf;
use std::time::Duration;

use failure::Error;
use serde::Deserialize;

use crate::event::Level;
use crate::filter::Pred;
use crate::pipeline::{Builder, Logger};
use crate::sink::background::{BackgroundSink, OverflowPolicy};
use crate::sink::breaker::CircuitBreakerSink;
use crate::sink::conditional::ConditionalSink;
use crate::sink::durable::DurableSink;
use crate::sink::rolling::{RollingFileSink, RollingInterval};
use crate::sink::{ConsoleSink, FileSink, MemorySink, Sink};
use crate::template::OutputTemplate;

/// Deserializes an optional humantime-formatted duration, e.g. `"500ms"` or absent/`null`.
mod humantime_option {
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

// A newtype to help us with serde and defaults; more convenient inside maps and such.
#[derive(Copy, Clone, Debug)]
pub(crate) struct LevelSerde(pub Level);

impl Default for LevelSerde {
    fn default() -> Self {
        LevelSerde(Level::Information)
    }
}

impl<'de> Deserialize<'de> for LevelSerde {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<LevelSerde, D::Error> {
        let s = String::deserialize(d)?;
        s.parse()
            .map(LevelSerde)
            .map_err(|_| serde::de::Error::custom(format!("unknown level {:?}", s)))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum SinkDestination {
    /// Writes themed lines to the terminal.
    Console {
        /// Use stderr instead of stdout.
        #[serde(default)]
        stderr: bool,
        /// Output template override.
        #[serde(default)]
        template: Option<String>,
    },

    /// Appends to a file, CLEF by default.
    File {
        /// The path of the file. Its directory is created if missing.
        filename: PathBuf,
        /// Output template override (the default writes CLEF).
        #[serde(default)]
        template: Option<String>,
    },

    /// A size/time rolling file.
    RollingFile {
        /// The path of the current file.
        filename: PathBuf,
        /// Roll when the file would exceed this many bytes.
        #[serde(default)]
        max_file_size: Option<u64>,
        /// Roll at time boundaries.
        #[serde(default)]
        interval: Option<IntervalSerde>,
        /// How many rolled files to keep.
        #[serde(default)]
        retain_files: Option<usize>,
        /// Gzip rolled files.
        #[serde(default)]
        compress: bool,
        /// Output template override (the default writes CLEF).
        #[serde(default)]
        template: Option<String>,
    },

    /// Collects events in memory. Useful in tests and demos only.
    Memory,
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum IntervalSerde {
    Never,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl From<IntervalSerde> for RollingInterval {
    fn from(i: IntervalSerde) -> RollingInterval {
        match i {
            IntervalSerde::Never => RollingInterval::Never,
            IntervalSerde::Hourly => RollingInterval::Hourly,
            IntervalSerde::Daily => RollingInterval::Daily,
            IntervalSerde::Weekly => RollingInterval::Weekly,
            IntervalSerde::Monthly => RollingInterval::Monthly,
        }
    }
}

#[derive(Copy, Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum OverflowSerde {
    Block,
    Drop,
    DropOldest,
}

impl From<OverflowSerde> for OverflowPolicy {
    fn from(o: OverflowSerde) -> OverflowPolicy {
        match o {
            OverflowSerde::Block => OverflowPolicy::Block,
            OverflowSerde::Drop => OverflowPolicy::Drop,
            OverflowSerde::DropOldest => OverflowPolicy::DropOldest,
        }
    }
}

/// The `background` wrapper section.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct BackgroundCfg {
    /// Channel capacity.
    #[serde(default)]
    capacity: Option<usize>,
    /// What to do when the channel is full.
    #[serde(default)]
    overflow: Option<OverflowSerde>,
    /// Batch size; zero or absent emits one by one.
    #[serde(default)]
    batch_size: Option<usize>,
    /// Latest flush of a partial batch, e.g. `500ms`.
    #[serde(default, deserialize_with = "humantime_option::deserialize")]
    flush_interval: Option<Duration>,
}

/// The `durable` wrapper section.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DurableCfg {
    /// Directory for the on-disk buffer files.
    buffer_path: PathBuf,
    /// How often to probe an unhealthy sink, e.g. `30s`.
    #[serde(default, deserialize_with = "humantime_option::deserialize")]
    retry_interval: Option<Duration>,
    /// Size bound of one buffer file.
    #[serde(default)]
    max_buffer_size: Option<u64>,
    /// Bound on the number of buffer files.
    #[serde(default)]
    max_buffer_files: Option<usize>,
    /// Replay batch size.
    #[serde(default)]
    batch_size: Option<usize>,
}

/// The `breaker` wrapper section.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct BreakerCfg {
    /// Consecutive failures before the circuit opens.
    #[serde(default)]
    failure_threshold: Option<u32>,
    /// Half-open successes before it closes.
    #[serde(default)]
    success_threshold: Option<u32>,
    /// How long it stays open before probing, e.g. `30s`.
    #[serde(default, deserialize_with = "humantime_option::deserialize")]
    reset_timeout: Option<Duration>,
}

/// One configured sink: a destination plus optional wrappers.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SinkCfg {
    #[serde(flatten)]
    destination: SinkDestination,

    /// Only events at or above this level reach the sink.
    #[serde(default)]
    level: Option<LevelSerde>,

    /// Asynchronous delivery through a bounded channel.
    #[serde(default)]
    background: Option<BackgroundCfg>,

    /// Persistent buffering across outages.
    #[serde(default)]
    durable: Option<DurableCfg>,

    /// Circuit-breaker protection.
    #[serde(default)]
    breaker: Option<BreakerCfg>,
}

impl SinkCfg {
    fn template(raw: &Option<String>) -> Result<Option<OutputTemplate>, Error> {
        match raw {
            Some(text) => Ok(Some(OutputTemplate::parse(text)?)),
            None => Ok(None),
        }
    }

    /// Builds the fully wrapped sink.
    pub fn build(&self) -> Result<Box<dyn Sink>, Error> {
        let mut sink: Box<dyn Sink> = match &self.destination {
            SinkDestination::Console { stderr, template } => {
                let mut console = if *stderr {
                    ConsoleSink::stderr()
                } else {
                    ConsoleSink::stdout()
                };
                if let Some(t) = Self::template(template)? {
                    console = console.with_template(t);
                }
                Box::new(console)
            }
            SinkDestination::File { filename, template } => match Self::template(template)? {
                Some(t) => Box::new(FileSink::with_format(
                    filename,
                    crate::sink::file::LineFormat::Template(t),
                )?),
                None => Box::new(FileSink::new(filename)?),
            },
            SinkDestination::RollingFile {
                filename,
                max_file_size,
                interval,
                retain_files,
                compress,
                template,
            } => {
                let mut builder = RollingFileSink::builder(filename).compress(*compress);
                if let Some(size) = max_file_size {
                    builder = builder.max_file_size(*size);
                }
                if let Some(interval) = interval {
                    builder = builder.interval((*interval).into());
                }
                if let Some(retain) = retain_files {
                    builder = builder.retain_files(*retain);
                }
                if let Some(t) = Self::template(template)? {
                    builder = builder.template(t);
                }
                Box::new(builder.build()?)
            }
            SinkDestination::Memory => Box::new(MemorySink::new()),
        };

        if let Some(breaker) = &self.breaker {
            let mut builder = CircuitBreakerSink::builder(sink);
            if let Some(f) = breaker.failure_threshold {
                builder = builder.failure_threshold(f);
            }
            if let Some(s) = breaker.success_threshold {
                builder = builder.success_threshold(s);
            }
            if let Some(r) = breaker.reset_timeout {
                builder = builder.reset_timeout(r);
            }
            sink = Box::new(builder.build());
        }

        if let Some(durable) = &self.durable {
            let mut builder = DurableSink::builder(sink, &durable.buffer_path);
            if let Some(r) = durable.retry_interval {
                builder = builder.retry_interval(r);
            }
            if let Some(s) = durable.max_buffer_size {
                builder = builder.max_buffer_size(s);
            }
            if let Some(f) = durable.max_buffer_files {
                builder = builder.max_buffer_files(f);
            }
            if let Some(b) = durable.batch_size {
                builder = builder.batch_size(b);
            }
            sink = Box::new(builder.build()?);
        }

        if let Some(background) = &self.background {
            let mut builder = BackgroundSink::builder(sink);
            if let Some(c) = background.capacity {
                builder = builder.capacity(c);
            }
            if let Some(o) = background.overflow {
                builder = builder.policy(o.into());
            }
            if let Some(size) = background.batch_size {
                builder = builder.batch(
                    size,
                    background
                        .flush_interval
                        .unwrap_or(crate::sink::background::DEFAULT_FLUSH_INTERVAL),
                );
            }
            sink = Box::new(builder.spawn()?);
        }

        if let Some(level) = self.level {
            sink = Box::new(ConditionalSink::new(Pred::level(level.0), sink));
        }
        Ok(sink)
    }
}

/// The top-level fragment: flatten this into the application's config structure.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cfg {
    /// Events below this level are discarded before any work happens.
    #[serde(default)]
    minimum_level: Option<LevelSerde>,

    /// The configured sinks.
    #[serde(default)]
    sinks: Vec<SinkCfg>,
}

impl Cfg {
    /// Builds the configured pipeline.
    pub fn build(&self) -> Result<Logger, Error> {
        let mut builder = Builder::default();
        if let Some(level) = self.minimum_level {
            builder = builder.minimum_level(level.0);
        }
        for sink in &self.sinks {
            builder = builder.sink(sink.build()?);
        }
        Ok(builder.build())
    }
}
