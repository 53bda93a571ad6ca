//! Output templates - what the text sinks render.
//!
//! On top of the message-template grammar, an output template knows built-in holes written as
//! `${Name}`: `${Timestamp}`, `${Level}`, `${Message}`, `${Exception}`, `${NewLine}` and
//! `${Properties}`. Properties of the event are still available as plain `{Name}` holes.

use crate::event::LogEvent;

use super::format::{render_level, TimeFormat};
use super::{parse_tokens, ParseError, PropertyToken, RawToken};

/// The default output template used by the console and file sinks.
pub const DEFAULT_TEMPLATE: &str =
    "[${Timestamp:yyyy-MM-dd HH:mm:ss.fff} ${Level:u3}] ${Message}${Exception}${NewLine}";

/// The built-in holes.
#[derive(Clone, Debug, PartialEq)]
pub enum BuiltIn {
    /// The event timestamp; the format is the time mini-language.
    Timestamp(Option<TimeFormat>),
    /// The event level; formats `u3`/`w3`/`u`/`w`/`l`.
    Level(Option<String>),
    /// The rendered message.
    Message,
    /// The attached error, prefixed with a newline when present.
    Exception,
    /// A platform newline.
    NewLine,
    /// Event properties that do not appear in the message template, as one JSON object.
    Properties,
}

/// One output template token.
#[derive(Clone, Debug, PartialEq)]
pub enum OutputToken {
    /// Literal text.
    Text(String),
    /// An event property hole.
    Property(PropertyToken),
    /// A built-in hole.
    BuiltIn(BuiltIn),
}

/// A parsed output template.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputTemplate {
    raw: String,
    tokens: Vec<OutputToken>,
}

impl OutputTemplate {
    /// Parses an output template.
    pub fn parse(text: &str) -> Result<OutputTemplate, ParseError> {
        let tokens = parse_tokens(text, true)?
            .into_iter()
            .map(|t| match t {
                RawToken::Text(t) => OutputToken::Text(t),
                RawToken::Property(p) => OutputToken::Property(p),
                RawToken::BuiltIn { name, format } => match Self::builtin(&name, format) {
                    Some(b) => OutputToken::BuiltIn(b),
                    // An unknown built-in renders as nothing rather than failing the sink.
                    None => OutputToken::Text(String::new()),
                },
            })
            .collect();
        Ok(OutputTemplate {
            raw: text.to_owned(),
            tokens,
        })
    }

    /// The default console/file template.
    pub fn default_template() -> OutputTemplate {
        OutputTemplate::parse(DEFAULT_TEMPLATE).expect("default output template must parse")
    }

    fn builtin(name: &str, format: Option<String>) -> Option<BuiltIn> {
        match name {
            "Timestamp" => Some(BuiltIn::Timestamp(format.as_deref().map(TimeFormat::parse))),
            "Level" => Some(BuiltIn::Level(format)),
            "Message" => Some(BuiltIn::Message),
            "Exception" => Some(BuiltIn::Exception),
            "NewLine" => Some(BuiltIn::NewLine),
            "Properties" => Some(BuiltIn::Properties),
            other => {
                crate::selflog!("unknown output template builtin ${{{}}}", other);
                None
            }
        }
    }

    /// The original template text.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The token list; the console sink walks this to colorize per token.
    pub fn tokens(&self) -> &[OutputToken] {
        &self.tokens
    }

    /// Renders a whole event to text.
    pub fn render(&self, event: &LogEvent) -> String {
        let mut out = String::new();
        for token in &self.tokens {
            out.push_str(&self.render_token(token, event));
        }
        out
    }

    /// Renders a single token; exposed so the console sink can interleave color codes.
    pub fn render_token(&self, token: &OutputToken, event: &LogEvent) -> String {
        match token {
            OutputToken::Text(t) => t.clone(),
            OutputToken::Property(p) => match event.properties.get(&p.name) {
                Some(v) => p.render(v),
                None => p.raw().to_owned(),
            },
            OutputToken::BuiltIn(b) => match b {
                BuiltIn::Timestamp(Some(fmt)) => fmt.render(&event.timestamp),
                BuiltIn::Timestamp(None) => {
                    event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
                }
                BuiltIn::Level(spec) => render_level(event.level, spec.as_deref()),
                BuiltIn::Message => render_message(event),
                BuiltIn::Exception => match &event.error {
                    Some(e) => format!("\n{}", e),
                    None => String::new(),
                },
                BuiltIn::NewLine => "\n".to_owned(),
                BuiltIn::Properties => render_rest(event),
            },
        }
    }
}

/// Renders the event's message: its template applied to its properties.
pub fn render_message(event: &LogEvent) -> String {
    super::cache::global()
        .parse(&event.template)
        .render(&event.properties)
}

/// Renders properties not referenced by the message template as a JSON object.
fn render_rest(event: &LogEvent) -> String {
    let template = super::cache::global().parse(&event.template);
    let mut rest = serde_json::Map::new();
    for (name, value) in &event.properties {
        if template.properties().any(|p| &p.name == name) {
            continue;
        }
        rest.insert(
            name.clone(),
            serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        );
    }
    if rest.is_empty() {
        return String::new();
    }
    serde_json::Value::Object(rest).to_string()
}

#[cfg(test)]
mod tests {
    use crate::event::{Level, LogEvent};

    use super::*;

    fn event() -> LogEvent {
        let mut e = LogEvent::new(Level::Information, "User {UserId} logged in");
        e.set_property("UserId", 123);
        e
    }

    #[test]
    fn renders_builtins() {
        let t = OutputTemplate::parse("${Level:u3}: ${Message}${NewLine}").unwrap();
        assert_eq!(t.render(&event()), "INF: User 123 logged in\n");
    }

    #[test]
    fn renders_event_properties() {
        let t = OutputTemplate::parse("[{UserId}] ${Message}").unwrap();
        assert_eq!(t.render(&event()), "[123] User 123 logged in");
    }

    #[test]
    fn exception_is_omitted_when_absent() {
        let t = OutputTemplate::parse("${Message}${Exception}").unwrap();
        assert_eq!(t.render(&event()), "User 123 logged in");
        let mut failed = event();
        failed.error = Some("boom".to_owned());
        assert_eq!(t.render(&failed), "User 123 logged in\nboom");
    }

    #[test]
    fn properties_builtin_renders_the_rest() {
        let t = OutputTemplate::parse("${Properties}").unwrap();
        let mut e = event();
        e.set_property("RequestId", "abc");
        let rendered = t.render(&e);
        assert!(rendered.contains("\"RequestId\":\"abc\""));
        assert!(!rendered.contains("UserId"));
    }

    #[test]
    fn timestamp_format() {
        let t = OutputTemplate::parse("${Timestamp:yyyy}").unwrap();
        let rendered = t.render(&event());
        assert_eq!(rendered.len(), 4);
        assert!(rendered.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn default_template_parses() {
        OutputTemplate::default_template();
    }

    #[test]
    fn unclosed_builtin_is_error() {
        assert!(OutputTemplate::parse("x ${Level").is_err());
    }
}
