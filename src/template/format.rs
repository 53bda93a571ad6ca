//! Property and level format specifiers.
//!
//! A hole may carry a format after a colon (`{Count:000}`, `{Elapsed:F1}`, `{Due:HH:mm:ss}`).
//! The specifier is classified once at parse time; rendering dispatches on the parsed form.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::event::{Level, Value};

/// A parsed property format specifier.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyFormat {
    /// `000…` - zero-pad integers to the given width.
    ZeroPad(usize),
    /// `D<w>` - zero-pad integers to the given width.
    Decimal(usize),
    /// `F<n>` - fixed-point floats with `n` decimals.
    Fixed(usize),
    /// `P<n>` - `value * 100` with `n` decimals and a `%` suffix.
    Percent(usize),
    /// `l` - lower-case the rendered text.
    Lower,
    /// `u` - upper-case the rendered text.
    Upper,
    /// `j` - JSON-escape quotes and backslashes.
    Json,
    /// A time format, pre-parsed from the `yyyy-MM-dd`-style mini-language.
    Time(TimeFormat),
    /// Anything unrecognized; rendering falls back to the default form.
    Verbatim(String),
}

impl PropertyFormat {
    /// Classifies a raw specifier.
    pub fn parse(spec: &str) -> PropertyFormat {
        if !spec.is_empty() && spec.bytes().all(|b| b == b'0') {
            return PropertyFormat::ZeroPad(spec.len());
        }
        if let Some(rest) = spec.strip_prefix('D') {
            if let Ok(w) = rest.parse() {
                return PropertyFormat::Decimal(w);
            }
        }
        if let Some(rest) = spec.strip_prefix('F') {
            if rest.is_empty() {
                return PropertyFormat::Fixed(2);
            }
            if let Ok(n) = rest.parse() {
                return PropertyFormat::Fixed(n);
            }
        }
        if let Some(rest) = spec.strip_prefix('P') {
            if rest.is_empty() {
                return PropertyFormat::Percent(2);
            }
            if let Ok(n) = rest.parse() {
                return PropertyFormat::Percent(n);
            }
        }
        match spec {
            "l" => return PropertyFormat::Lower,
            "u" => return PropertyFormat::Upper,
            "j" => return PropertyFormat::Json,
            _ => (),
        }
        if TimeFormat::looks_like(spec) {
            return PropertyFormat::Time(TimeFormat::parse(spec));
        }
        PropertyFormat::Verbatim(spec.to_owned())
    }

    /// Renders a value through this specifier.
    pub fn render(&self, value: &Value) -> String {
        match self {
            PropertyFormat::ZeroPad(w) | PropertyFormat::Decimal(w) => match value {
                Value::Int(i) => format!("{:0width$}", i, width = *w),
                Value::Uint(u) => format!("{:0width$}", u, width = *w),
                _ => value.to_string(),
            },
            PropertyFormat::Fixed(n) => match numeric(value) {
                Some(f) => format!("{:.prec$}", f, prec = *n),
                None => value.to_string(),
            },
            PropertyFormat::Percent(n) => match numeric(value) {
                Some(f) => format!("{:.prec$}%", f * 100.0, prec = *n),
                None => value.to_string(),
            },
            PropertyFormat::Lower => value.to_string().to_lowercase(),
            PropertyFormat::Upper => value.to_string().to_uppercase(),
            PropertyFormat::Json => json_escape(&value.to_string()),
            PropertyFormat::Time(fmt) => match value {
                Value::Time(t) => fmt.render(t),
                _ => value.to_string(),
            },
            PropertyFormat::Verbatim(_) => value.to_string(),
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Float(f) => Some(*f),
        Value::Int(i) => Some(*i as f64),
        Value::Uint(u) => Some(*u as f64),
        _ => None,
    }
}

/// Escapes quotes and backslashes so the text can be embedded in a JSON string.
pub fn json_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
    out
}

/// One piece of a pre-parsed time format.
#[derive(Clone, Debug, PartialEq)]
enum TimeItem {
    Year4,
    Year2,
    Month2,
    Day2,
    Hour2,
    Minute2,
    Second2,
    /// Fractional seconds, 1 to 3 digits.
    Frac(usize),
    /// `zzz` - `+HH:MM` offset.
    OffsetFull,
    /// `zz` - `+HH` offset.
    OffsetHours,
    Literal(String),
}

/// A `yyyy-MM-dd HH:mm:ss.fff`-style format, parsed into items once.
///
/// The supported tokens are `yyyy`, `yy`, `MM`, `dd`, `HH`, `mm`, `ss`, `fff`, `ff`, `f`, `zzz`
/// and `zz`; everything else passes through as literal text. Event timestamps are UTC, so the
/// offset tokens render the zero offset.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeFormat {
    items: Vec<TimeItem>,
}

impl TimeFormat {
    fn looks_like(spec: &str) -> bool {
        ["yyyy", "yy", "MM", "dd", "HH", "mm", "ss", "fff", "ff", "zzz", "zz"]
            .iter()
            .any(|t| spec.contains(t))
    }

    /// Parses the mini-language into the internal item list.
    pub fn parse(spec: &str) -> TimeFormat {
        let mut items = Vec::new();
        let mut literal = String::new();
        let bytes = spec.as_bytes();
        let mut i = 0;
        let push = |items: &mut Vec<TimeItem>, literal: &mut String, item: TimeItem| {
            if !literal.is_empty() {
                items.push(TimeItem::Literal(std::mem::replace(literal, String::new())));
            }
            items.push(item);
        };
        fn run_len(bytes: &[u8], from: usize, c: u8) -> usize {
            bytes[from..].iter().take_while(|&&b| b == c).count()
        }
        while i < bytes.len() {
            let run = |c: u8| run_len(bytes, i, c);
            match bytes[i] {
                b'y' => {
                    let n = run(b'y');
                    push(&mut items, &mut literal, if n >= 4 { TimeItem::Year4 } else { TimeItem::Year2 });
                    i += n;
                }
                b'M' => {
                    let n = run(b'M');
                    push(&mut items, &mut literal, TimeItem::Month2);
                    i += n;
                }
                b'd' => {
                    let n = run(b'd');
                    push(&mut items, &mut literal, TimeItem::Day2);
                    i += n;
                }
                b'H' => {
                    let n = run(b'H');
                    push(&mut items, &mut literal, TimeItem::Hour2);
                    i += n;
                }
                b'm' => {
                    let n = run(b'm');
                    push(&mut items, &mut literal, TimeItem::Minute2);
                    i += n;
                }
                b's' => {
                    let n = run(b's');
                    push(&mut items, &mut literal, TimeItem::Second2);
                    i += n;
                }
                b'f' => {
                    let n = run(b'f');
                    push(&mut items, &mut literal, TimeItem::Frac(n.min(3)));
                    i += n;
                }
                b'z' => {
                    let n = run(b'z');
                    let item = if n >= 3 { TimeItem::OffsetFull } else { TimeItem::OffsetHours };
                    push(&mut items, &mut literal, item);
                    i += n;
                }
                b => {
                    literal.push(b as char);
                    i += 1;
                }
            }
        }
        if !literal.is_empty() {
            items.push(TimeItem::Literal(literal));
        }
        TimeFormat { items }
    }

    /// Renders a timestamp.
    pub fn render(&self, t: &DateTime<Utc>) -> String {
        let mut out = String::new();
        for item in &self.items {
            match item {
                TimeItem::Year4 => out.push_str(&format!("{:04}", t.year())),
                TimeItem::Year2 => out.push_str(&format!("{:02}", t.year() % 100)),
                TimeItem::Month2 => out.push_str(&format!("{:02}", t.month())),
                TimeItem::Day2 => out.push_str(&format!("{:02}", t.day())),
                TimeItem::Hour2 => out.push_str(&format!("{:02}", t.hour())),
                TimeItem::Minute2 => out.push_str(&format!("{:02}", t.minute())),
                TimeItem::Second2 => out.push_str(&format!("{:02}", t.second())),
                TimeItem::Frac(n) => {
                    let millis = t.timestamp_subsec_millis();
                    let digits = format!("{:03}", millis);
                    out.push_str(&digits[..*n]);
                }
                TimeItem::OffsetFull => out.push_str("+00:00"),
                TimeItem::OffsetHours => out.push_str("+00"),
                TimeItem::Literal(l) => out.push_str(l),
            }
        }
        out
    }
}

/// Renders a level through an output-template specifier.
///
/// `u3`/`w3` produce the upper/lower three-letter code, `u` the upper-case full name, `w` and `l`
/// the lower-case full name. Anything else (including no format) produces the proper-case name.
pub fn render_level(level: Level, spec: Option<&str>) -> String {
    match spec {
        Some("u3") => level.code().to_owned(),
        Some("w3") => level.code().to_lowercase(),
        Some("u") => level.name().to_uppercase(),
        Some("w") | Some("l") => level.name().to_lowercase(),
        _ => level.name().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn zero_pad() {
        let f = PropertyFormat::parse("000");
        assert_eq!(f, PropertyFormat::ZeroPad(3));
        assert_eq!(f.render(&Value::Int(42)), "042");
        assert_eq!(f.render(&Value::Int(-4)), "-04");
    }

    #[test]
    fn decimal_width() {
        assert_eq!(PropertyFormat::parse("D4").render(&Value::Uint(7)), "0007");
    }

    #[test]
    fn fixed_and_percent() {
        assert_eq!(PropertyFormat::parse("F1").render(&Value::Float(3.14159)), "3.1");
        assert_eq!(PropertyFormat::parse("F").render(&Value::Float(3.14159)), "3.14");
        assert_eq!(PropertyFormat::parse("P1").render(&Value::Float(0.85)), "85.0%");
        assert_eq!(PropertyFormat::parse("P0").render(&Value::Float(0.85)), "85%");
    }

    #[test]
    fn case_and_json() {
        assert_eq!(PropertyFormat::parse("u").render(&Value::from("abc")), "ABC");
        assert_eq!(PropertyFormat::parse("l").render(&Value::from("ABC")), "abc");
        assert_eq!(
            PropertyFormat::parse("j").render(&Value::from(r#"say "hi" \ bye"#)),
            r#"say \"hi\" \\ bye"#,
        );
    }

    #[test]
    fn time_format() {
        let t = Utc.ymd(2024, 3, 7).and_hms_milli(9, 5, 3, 42);
        let f = TimeFormat::parse("yyyy-MM-dd HH:mm:ss.fff zzz");
        assert_eq!(f.render(&t), "2024-03-07 09:05:03.042 +00:00");
        let f = TimeFormat::parse("yy/MM/dd");
        assert_eq!(f.render(&t), "24/03/07");
        let f = TimeFormat::parse("HH:mm:ss.ff");
        assert_eq!(f.render(&t), "09:05:03.04");
    }

    #[test]
    fn levels() {
        assert_eq!(render_level(Level::Information, Some("u3")), "INF");
        assert_eq!(render_level(Level::Warning, Some("w3")), "wrn");
        assert_eq!(render_level(Level::Error, Some("u")), "ERROR");
        assert_eq!(render_level(Level::Error, Some("w")), "error");
        assert_eq!(render_level(Level::Fatal, None), "Fatal");
    }
}
