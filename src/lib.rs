#![doc(
    html_root_url = "https://docs.rs/mtlog/0.1.0/mtlog/",
    test(attr(deny(warnings)))
)]
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! A structured logging pipeline built around message templates.
//!
//! A logging call names its data instead of splicing it into a string: the template
//! `"User {UserId} logged in from {IP}"` plus the arguments `123, "192.168.1.1"` produce an
//! *event* carrying both the raw template and the typed properties. Sinks then render, ship or
//! store the event however they like - the console gets a colored line, a file gets CLEF NDJSON,
//! a log service gets batched HTTP - without ever losing the structure.
//!
//! The pipeline in one sentence: a call is level-gated (below the minimum it costs one
//! comparison and allocates nothing), the template is fetched from a process-wide parse cache,
//! arguments are bound to holes, enrichers add ambient properties, filters may drop the event,
//! and the dispatcher fans it out to every configured sink.
//!
//! # Example
//!
//! ```rust
//! use mtlog::{Level, Logger};
//! use mtlog::sink::MemorySink;
//!
//! let sink = MemorySink::new();
//! let logger = Logger::builder()
//!     .minimum_level(Level::Debug)
//!     .enrich(mtlog::enrich::MachineName)
//!     .sink(sink.clone())
//!     .build();
//!
//! mtlog::info!(logger, "User {UserId} logged in from {IP}", 123, "192.168.1.1");
//!
//! assert_eq!(sink.messages(), ["User 123 logged in from 192.168.1.1"]);
//! ```
//!
//! # Sinks
//!
//! Terminal sinks write somewhere: [`sink::ConsoleSink`], [`sink::FileSink`],
//! [`sink::RollingFileSink`], [`sink::MemorySink`] (tests). Wrapper sinks change *how* delivery
//! happens and compose freely:
//!
//! * [`sink::BackgroundSink`] - a bounded channel and a worker thread; overflow blocks, drops,
//!   or drops the oldest.
//! * [`sink::DurableSink`] - on-disk buffering across outages with automatic replay.
//! * [`sink::CircuitBreakerSink`] - stops hammering a failing sink, probes it back to health.
//! * [`sink::RouterSink`] / [`sink::ConditionalSink`] - predicate routing and gating.
//!
//! HTTP-batch sinks for log services (Seq, Elasticsearch, Splunk) live in the `mtlog-http`
//! crate, one worker and wire format per service.
//!
//! # Diagnostics
//!
//! The pipeline never lets a broken sink take the application down - failures are contained,
//! counted and reported through the opt-in [`selflog`] channel, which by design cannot re-enter
//! the pipeline.

pub mod capture;
pub mod clef;
pub mod compat;
pub mod config;
pub mod context;
pub mod enrich;
pub mod event;
pub mod filter;
mod macros;
pub mod pipeline;
pub mod selflog;
pub mod sink;
pub mod template;

pub use crate::event::{Level, LogEvent, Value};
pub use crate::pipeline::{Builder, CallSite, LevelSwitch, Logger};
pub use crate::template::{OutputTemplate, Template, TemplateCache};
