//! The console sink: an output template rendered with per-token colors.
//!
//! Color is decided once, at construction:
//!
//! * `MTLOG_FORCE_COLOR` overrides everything (`none`/`0`/`false`/`off` disable, `8`/`16` force
//!   the basic palette, `256` forces the extended one, `true`/`on` force color at the detected
//!   depth),
//! * otherwise color is on iff the stream is a TTY and `NO_COLOR` is unset,
//! * `TERM`/`COLORTERM` pick the depth; on Windows a modern terminal has to announce itself
//!   (`WT_SESSION`, `ConEmuPID`, `ANSICON`) or the sink stays monochrome,
//! * a 256-color theme degrades to its 8-color cousin when the terminal does not advertise 256.

use std::env;
use std::io::{self, Write};

use either::Either;

use crate::event::{Level, LogEvent};
use crate::template::output::{BuiltIn, OutputToken};
use crate::template::OutputTemplate;

use super::{Sink, SinkError};

/// How much color the terminal gets.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ColorMode {
    /// Monochrome.
    None,
    /// The classic 8/16-color SGR palette.
    Basic,
    /// 256-color SGR.
    Extended,
}

fn forced_mode() -> Option<ColorMode> {
    let force = env::var("MTLOG_FORCE_COLOR").ok()?;
    match force.to_lowercase().as_str() {
        "none" | "0" | "false" | "off" => Some(ColorMode::None),
        "8" | "16" => Some(ColorMode::Basic),
        "256" => Some(ColorMode::Extended),
        "true" | "on" => Some(terminal_depth()),
        _ => None,
    }
}

fn terminal_depth() -> ColorMode {
    if env::var_os("COLORTERM").is_some() {
        return ColorMode::Extended;
    }
    match env::var("TERM") {
        Ok(term) if term.contains("256color") => ColorMode::Extended,
        _ => ColorMode::Basic,
    }
}

/// Decides the color mode for a stream, honoring the environment contract above.
pub fn detect_color_mode(stream: atty::Stream) -> ColorMode {
    if let Some(forced) = forced_mode() {
        return forced;
    }
    if env::var_os("NO_COLOR").is_some() {
        return ColorMode::None;
    }
    if !atty::is(stream) {
        return ColorMode::None;
    }
    if cfg!(windows) {
        let modern = env::var_os("WT_SESSION").is_some()
            || env::var_os("ConEmuPID").is_some()
            || env::var_os("ANSICON").is_some();
        if !modern {
            return ColorMode::None;
        }
    }
    terminal_depth()
}

const RESET: &str = "\x1b[0m";

/// SGR styles per token category.
#[derive(Clone, Debug)]
pub struct Theme {
    /// Does the theme need 256-color support?
    extended: bool,
    timestamp: &'static str,
    message: &'static str,
    property: &'static str,
    text: &'static str,
    level_verbose: &'static str,
    level_debug: &'static str,
    level_information: &'static str,
    level_warning: &'static str,
    level_error: &'static str,
    level_fatal: &'static str,
}

impl Theme {
    /// The 8-color theme; works everywhere color works at all.
    pub fn basic() -> Theme {
        Theme {
            extended: false,
            timestamp: "\x1b[90m",
            message: "\x1b[37m",
            property: "\x1b[36m",
            text: "\x1b[90m",
            level_verbose: "\x1b[90m",
            level_debug: "\x1b[34m",
            level_information: "\x1b[32m",
            level_warning: "\x1b[33m",
            level_error: "\x1b[31m",
            level_fatal: "\x1b[35;1m",
        }
    }

    /// A softer 256-color theme.
    pub fn bright() -> Theme {
        Theme {
            extended: true,
            timestamp: "\x1b[38;5;242m",
            message: "\x1b[38;5;253m",
            property: "\x1b[38;5;81m",
            text: "\x1b[38;5;242m",
            level_verbose: "\x1b[38;5;242m",
            level_debug: "\x1b[38;5;75m",
            level_information: "\x1b[38;5;76m",
            level_warning: "\x1b[38;5;220m",
            level_error: "\x1b[38;5;196m",
            level_fatal: "\x1b[48;5;196;38;5;231m",
        }
    }

    fn level_style(&self, level: Level) -> &'static str {
        match level {
            Level::Verbose => self.level_verbose,
            Level::Debug => self.level_debug,
            Level::Information => self.level_information,
            Level::Warning => self.level_warning,
            Level::Error => self.level_error,
            Level::Fatal => self.level_fatal,
        }
    }
}

/// Writes themed lines to stdout or stderr.
pub struct ConsoleSink {
    writer: Either<io::Stdout, io::Stderr>,
    template: OutputTemplate,
    theme: Theme,
    mode: ColorMode,
}

impl ConsoleSink {
    /// A stdout sink with the default template and theme.
    pub fn stdout() -> ConsoleSink {
        Self::build(Either::Left(io::stdout()), atty::Stream::Stdout)
    }

    /// A stderr sink with the default template and theme.
    pub fn stderr() -> ConsoleSink {
        Self::build(Either::Right(io::stderr()), atty::Stream::Stderr)
    }

    fn build(writer: Either<io::Stdout, io::Stderr>, stream: atty::Stream) -> ConsoleSink {
        let mode = detect_color_mode(stream);
        ConsoleSink {
            writer,
            template: OutputTemplate::default_template(),
            theme: Theme::basic(),
            mode,
        }
        .with_theme(Theme::bright())
    }

    /// Replaces the output template.
    pub fn with_template(mut self, template: OutputTemplate) -> ConsoleSink {
        self.template = template;
        self
    }

    /// Replaces the theme; 256-color themes degrade to [`Theme::basic`] on lesser terminals.
    pub fn with_theme(mut self, theme: Theme) -> ConsoleSink {
        self.theme = if theme.extended && self.mode != ColorMode::Extended {
            Theme::basic()
        } else {
            theme
        };
        self
    }

    /// Overrides the detected color mode (tests and stubborn users).
    pub fn with_color_mode(mut self, mode: ColorMode) -> ConsoleSink {
        self.mode = mode;
        self
    }

    fn render(&self, event: &LogEvent) -> String {
        let mut out = String::new();
        for token in self.template.tokens() {
            let rendered = self.template.render_token(token, event);
            if self.mode == ColorMode::None || rendered.is_empty() {
                out.push_str(&rendered);
                continue;
            }
            let style = match token {
                OutputToken::Text(_) => self.theme.text,
                OutputToken::Property(_) => self.theme.property,
                OutputToken::BuiltIn(BuiltIn::Timestamp(_)) => self.theme.timestamp,
                OutputToken::BuiltIn(BuiltIn::Level(_)) => self.theme.level_style(event.level),
                OutputToken::BuiltIn(BuiltIn::Message) => self.theme.message,
                OutputToken::BuiltIn(BuiltIn::Exception) => self.theme.level_error,
                OutputToken::BuiltIn(BuiltIn::Properties) => self.theme.property,
                OutputToken::BuiltIn(BuiltIn::NewLine) => {
                    out.push_str(&rendered);
                    continue;
                }
            };
            out.push_str(style);
            out.push_str(&rendered);
            out.push_str(RESET);
        }
        out
    }
}

impl Sink for ConsoleSink {
    fn emit(&self, event: &LogEvent) -> Result<(), SinkError> {
        let mut line = self.render(event);
        if !line.ends_with('\n') {
            line.push('\n');
        }
        let result = match &self.writer {
            Either::Left(out) => out.lock().write_all(line.as_bytes()),
            Either::Right(err) => err.lock().write_all(line.as_bytes()),
        };
        result.map_err(|e| {
            crate::selflog!("console write failed: {}", e);
            SinkError::from(e)
        })
    }

    fn flush(&self) {
        let _ = match &self.writer {
            Either::Left(out) => out.lock().flush(),
            Either::Right(err) => err.lock().flush(),
        };
    }
}
