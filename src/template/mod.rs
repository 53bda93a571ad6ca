//! Message template parsing and rendering.
//!
//! A message template is ordinary text with named holes: `User {UserId} logged in from {IP}`.
//! Holes may carry a capture hint (`@` destructures, `$` stringifies) and a format after a colon
//! (`{Count:000}`). `{{` and `}}` are literal braces. The parsed form is a flat token list; the
//! process-wide [`cache`] keeps parsed templates around so the hot path is a lookup by the
//! template text.
//!
//! Rendering substitutes properties by name. A hole whose property is absent renders as its
//! original placeholder text, so rendering with no properties round-trips the template.

use std::collections::BTreeMap;
use std::fmt;

use failure::Fail;

use crate::event::Value;

pub mod cache;
pub mod format;
pub mod output;

pub use self::cache::{CacheStats, TemplateCache};
pub use self::format::PropertyFormat;
pub use self::output::OutputTemplate;

/// How a hole captures its argument.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CaptureHint {
    /// Plain capture: primitives pass through.
    Default,
    /// `@` - destructure into a structured value.
    Destructure,
    /// `$` - force the argument's string form.
    Stringify,
}

/// A property hole inside a template.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyToken {
    /// The property name (identifier characters plus dots).
    pub name: String,
    /// The capture hint.
    pub hint: CaptureHint,
    /// Parsed format specifier, if the hole carried one.
    pub format: Option<PropertyFormat>,
    /// The original placeholder text, used when the property is absent at render time.
    raw: String,
}

impl PropertyToken {
    /// Renders this hole against a property value.
    pub fn render(&self, value: &Value) -> String {
        if let Some(format) = &self.format {
            return format.render(value);
        }
        match self.hint {
            // Structured values render in their JSON form, scalars as themselves.
            CaptureHint::Destructure => match value {
                Value::Seq(_) | Value::Map(_) => {
                    serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
                }
                _ => value.to_string(),
            },
            _ => value.to_string(),
        }
    }

    /// The original placeholder text, including braces, hint and format.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// One parsed template token.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    /// A literal text run.
    Text(String),
    /// A property hole.
    Property(PropertyToken),
}

/// A parse failure, with the byte position where it happened.
///
/// Callers are expected to fall back to treating the whole text as one literal token; the cache
/// does that for them.
#[derive(Clone, Debug, Fail, PartialEq)]
#[fail(display = "template parse error at byte {}: {}", position, message)]
pub struct ParseError {
    /// Byte offset into the template text.
    pub position: usize,
    /// What went wrong.
    pub message: String,
}

/// A parsed message template.
#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    raw: String,
    tokens: Vec<Token>,
}

impl Template {
    /// Parses a message template.
    pub fn parse(text: &str) -> Result<Template, ParseError> {
        let tokens = parse_tokens(text, false)?
            .into_iter()
            .map(|t| match t {
                RawToken::Text(t) => Token::Text(t),
                RawToken::Property(p) => Token::Property(p),
                // The tokenizer only produces built-ins when asked to.
                RawToken::BuiltIn { .. } => unreachable!("built-in token in a message template"),
            })
            .collect();
        Ok(Template {
            raw: text.to_owned(),
            tokens,
        })
    }

    /// Wraps arbitrary text as a single literal token (the parse-failure fallback).
    pub fn literal(text: &str) -> Template {
        Template {
            raw: text.to_owned(),
            tokens: vec![Token::Text(text.to_owned())],
        }
    }

    /// The original template text.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The parsed token list.
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// The property holes, in template order.
    pub fn properties(&self) -> impl Iterator<Item = &PropertyToken> {
        self.tokens.iter().filter_map(|t| match t {
            Token::Property(p) => Some(p),
            Token::Text(_) => None,
        })
    }

    /// Renders the template against a property map.
    ///
    /// Holes with no matching property render as their original placeholder text.
    pub fn render(&self, properties: &BTreeMap<String, Value>) -> String {
        let mut out = String::with_capacity(self.raw.len());
        for token in &self.tokens {
            match token {
                Token::Text(t) => out.push_str(t),
                Token::Property(p) => match properties.get(&p.name) {
                    Some(v) => out.push_str(&p.render(v)),
                    None => out.push_str(&p.raw),
                },
            }
        }
        out
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

/// The shared tokenizer. With `builtins` set, `${Name}` parses as a built-in hole - the output
/// template layer maps those to its own token kind.
pub(crate) fn parse_tokens(text: &str, builtins: bool) -> Result<Vec<RawToken>, ParseError> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if i + 1 < chars.len() && chars[i + 1] == '{' => {
                literal.push('{');
                i += 2;
            }
            '}' if i + 1 < chars.len() && chars[i + 1] == '}' => {
                literal.push('}');
                i += 2;
            }
            '$' if builtins && i + 1 < chars.len() && chars[i + 1] == '{' => {
                flush(&mut tokens, &mut literal);
                let (name, format, next) = parse_hole(&chars, i + 2, i)?;
                tokens.push(RawToken::BuiltIn { name, format });
                i = next;
            }
            '{' => {
                let start = i;
                let mut j = i + 1;
                let hint = match chars.get(j) {
                    Some('@') => {
                        j += 1;
                        CaptureHint::Destructure
                    }
                    Some('$') => {
                        j += 1;
                        CaptureHint::Stringify
                    }
                    _ => CaptureHint::Default,
                };
                match chars.get(j) {
                    Some(&c) if is_name_start(c) => {
                        let (name, format, next) = parse_hole(&chars, j, start)?;
                        let raw: String = chars[start..next].iter().collect();
                        flush(&mut tokens, &mut literal);
                        tokens.push(RawToken::Property(PropertyToken {
                            name,
                            hint,
                            format: format.as_deref().map(PropertyFormat::parse),
                            raw,
                        }));
                        i = next;
                    }
                    Some(&c) if c.is_ascii_digit() => {
                        // Permitted by the runtime: the whole hole becomes literal text. The
                        // analyzer-level warning is out of scope here.
                        let (_, _, next) = parse_hole(&chars, j, start)?;
                        let raw: String = chars[start..next].iter().collect();
                        literal.push_str(&raw);
                        i = next;
                    }
                    _ => {
                        // Not a hole at all (`{}`, `{ x}`, a lone trailing `{`…); the brace is
                        // literal text.
                        literal.push('{');
                        i += 1;
                    }
                }
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }
    flush(&mut tokens, &mut literal);
    Ok(tokens)
}

fn flush(tokens: &mut Vec<RawToken>, literal: &mut String) {
    if !literal.is_empty() {
        tokens.push(RawToken::Text(std::mem::replace(literal, String::new())));
    }
}

/// Scans `name[:format]}` starting at `from`; `open` is where the hole opened, for errors.
/// Returns the name, the optional raw format and the index just past the closing brace.
fn parse_hole(
    chars: &[char],
    from: usize,
    open: usize,
) -> Result<(String, Option<String>, usize), ParseError> {
    let mut name = String::new();
    let mut i = from;
    while i < chars.len() && is_name_char(chars[i]) {
        name.push(chars[i]);
        i += 1;
    }
    let format = if chars.get(i) == Some(&':') {
        i += 1;
        let mut fmt = String::new();
        while i < chars.len() && chars[i] != '}' {
            fmt.push(chars[i]);
            i += 1;
        }
        Some(fmt)
    } else {
        None
    };
    if chars.get(i) != Some(&'}') {
        return Err(ParseError {
            position: open,
            message: format!("unclosed property hole {:?}", name),
        });
    }
    Ok((name, format, i + 1))
}

/// Tokenizer output shared between message and output templates.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum RawToken {
    Text(String),
    Property(PropertyToken),
    BuiltIn {
        name: String,
        format: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    #[test]
    fn plain_text() {
        let t = Template::parse("nothing to see").unwrap();
        assert_eq!(t.tokens().len(), 1);
        assert_eq!(t.render(&BTreeMap::new()), "nothing to see");
    }

    #[test]
    fn renders_properties() {
        let t = Template::parse("User {UserId} logged in from {IP}").unwrap();
        let rendered = t.render(&props(&[
            ("UserId", Value::Int(123)),
            ("IP", Value::from("192.168.1.1")),
        ]));
        assert_eq!(rendered, "User 123 logged in from 192.168.1.1");
    }

    #[test]
    fn missing_property_keeps_placeholder() {
        let t = Template::parse("User {UserId} did {Action:u}").unwrap();
        assert_eq!(
            t.render(&props(&[("UserId", Value::Int(1))])),
            "User 1 did {Action:u}",
        );
    }

    #[test]
    fn escaped_braces() {
        let t = Template::parse("a {{literal}} {Name}").unwrap();
        assert_eq!(
            t.render(&props(&[("Name", Value::from("x"))])),
            "a {literal} x",
        );
    }

    #[test]
    fn hints() {
        let t = Template::parse("{@User} and {$Id}").unwrap();
        let holes: Vec<_> = t.properties().collect();
        assert_eq!(holes[0].hint, CaptureHint::Destructure);
        assert_eq!(holes[0].name, "User");
        assert_eq!(holes[1].hint, CaptureHint::Stringify);
    }

    #[test]
    fn dotted_names() {
        let t = Template::parse("{http.status_code} from {net.peer.name}").unwrap();
        let names: Vec<_> = t.properties().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["http.status_code", "net.peer.name"]);
    }

    #[test]
    fn leading_digit_is_literal() {
        let t = Template::parse("slot {0} taken").unwrap();
        assert!(t.properties().next().is_none());
        assert_eq!(t.render(&BTreeMap::new()), "slot {0} taken");
    }

    #[test]
    fn lone_brace_is_literal() {
        let t = Template::parse("a { b } c").unwrap();
        assert!(t.properties().next().is_none());
        assert_eq!(t.render(&BTreeMap::new()), "a { b } c");
    }

    #[test]
    fn unclosed_hole_is_error() {
        let err = Template::parse("abc {Name").unwrap_err();
        assert_eq!(err.position, 4);
    }

    #[test]
    fn round_trip_with_no_properties() {
        for text in &[
            "User {UserId} logged in from {IP}",
            "{@Order:j} and {$Raw} and {Count:000}",
            "plain text only",
        ] {
            let t = Template::parse(text).unwrap();
            let rendered = t.render(&BTreeMap::new());
            assert_eq!(Template::parse(&rendered).unwrap().tokens(), t.tokens());
        }
    }

    #[test]
    fn destructured_renders_as_json() {
        let mut fields = BTreeMap::new();
        fields.insert("Id".to_owned(), Value::Int(7));
        let t = Template::parse("{@User}").unwrap();
        assert_eq!(
            t.render(&props(&[("User", Value::Map(fields))])),
            r#"{"Id":7}"#,
        );
    }
}
