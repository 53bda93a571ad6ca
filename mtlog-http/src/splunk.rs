//! The Splunk HEC sink.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{Map, Value as Json};
use url::Url;

use mtlog::template::output::render_message;
use mtlog::LogEvent;

use crate::{check_status, http_client, BatchOptions, HttpBatchSink, HttpError, Transport, PROBE_TIMEOUT};

const EVENT_ENDPOINT: &str = "services/collector/event";

/// Routing metadata sent with every HEC event.
#[derive(Clone, Debug, Default)]
pub struct HecMetadata {
    /// Target index.
    pub index: Option<String>,
    /// The `source` field.
    pub source: Option<String>,
    /// The `sourcetype` field. `json`/`_json` flatten fields into the event object.
    pub sourcetype: Option<String>,
    /// The `host` field.
    pub host: Option<String>,
}

fn flattens_fields(sourcetype: &Option<String>) -> bool {
    matches!(sourcetype.as_deref(), Some("json") | Some("_json"))
}

/// Builds one HEC line for an event.
///
/// Ordinarily `event` is the plain rendered message string, with the level, the template, the
/// error and the user properties riding along under `fields`. The `json`/`_json` sourcetypes
/// instead make `event` an object with everything flattened at its top level (and dotted keys
/// underscored, which those sourcetypes insist on).
pub fn hec_line(event: &LogEvent, meta: &HecMetadata) -> Json {
    let seconds = event.timestamp.timestamp() as f64
        + f64::from(event.timestamp.timestamp_subsec_millis()) / 1000.0;

    let mut line = Map::new();
    line.insert("time".to_owned(), Json::from(seconds));

    if flattens_fields(&meta.sourcetype) {
        let mut payload = Map::new();
        payload.insert("message".to_owned(), Json::String(render_message(event)));
        payload.insert(
            "level".to_owned(),
            Json::String(event.level.name().to_owned()),
        );
        payload.insert(
            "template".to_owned(),
            Json::String(event.template.clone()),
        );
        if let Some(error) = &event.error {
            payload.insert("error".to_owned(), Json::String(error.clone()));
        }
        for (name, value) in &event.properties {
            payload.insert(
                name.replace('.', "_"),
                serde_json::to_value(value).unwrap_or(Json::Null),
            );
        }
        line.insert("event".to_owned(), Json::Object(payload));
    } else {
        line.insert("event".to_owned(), Json::String(render_message(event)));
        let mut fields = Map::new();
        fields.insert(
            "level".to_owned(),
            Json::String(event.level.name().to_owned()),
        );
        fields.insert(
            "template".to_owned(),
            Json::String(event.template.clone()),
        );
        if let Some(error) = &event.error {
            fields.insert("error".to_owned(), Json::String(error.clone()));
        }
        for (name, value) in &event.properties {
            fields.insert(
                name.clone(),
                serde_json::to_value(value).unwrap_or(Json::Null),
            );
        }
        line.insert("fields".to_owned(), Json::Object(fields));
    }

    if let Some(index) = &meta.index {
        line.insert("index".to_owned(), Json::String(index.clone()));
    }
    if let Some(source) = &meta.source {
        line.insert("source".to_owned(), Json::String(source.clone()));
    }
    if let Some(sourcetype) = &meta.sourcetype {
        line.insert("sourcetype".to_owned(), Json::String(sourcetype.clone()));
    }
    if let Some(host) = &meta.host {
        line.insert("host".to_owned(), Json::String(host.clone()));
    }
    Json::Object(line)
}

/// Frames a batch as newline-delimited HEC objects.
pub fn hec_body(events: &[LogEvent], meta: &HecMetadata) -> String {
    let mut body = String::new();
    for event in events {
        body.push_str(&hec_line(event, meta).to_string());
        body.push('\n');
    }
    body
}

struct SplunkTransport {
    client: reqwest::Client,
    probe_client: reqwest::Client,
    endpoint: Url,
    root: Url,
    token: String,
    meta: HecMetadata,
}

impl Transport for SplunkTransport {
    fn name(&self) -> &'static str {
        "splunk"
    }

    fn send(&self, events: &[LogEvent]) -> Result<(), HttpError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, format!("Splunk {}", self.token))
            .header(CONTENT_TYPE, "application/json")
            .body(hec_body(events, &self.meta))
            .send()?;
        check_status(&response)
    }

    fn probe(&self) -> Result<(), HttpError> {
        let response = self.probe_client.get(self.root.clone()).send()?;
        check_status(&response)
    }
}

/// Configures a [`SplunkSink`].
pub struct SplunkBuilder {
    url: String,
    token: String,
    meta: HecMetadata,
    request_timeout: Duration,
    options: BatchOptions,
}

impl SplunkBuilder {
    /// Target index.
    pub fn index<I: Into<String>>(mut self, index: I) -> Self {
        self.meta.index = Some(index.into());
        self
    }

    /// The `source` field.
    pub fn source<S: Into<String>>(mut self, source: S) -> Self {
        self.meta.source = Some(source.into());
        self
    }

    /// The `sourcetype` field; `json` or `_json` flatten fields into the event object.
    pub fn sourcetype<S: Into<String>>(mut self, sourcetype: S) -> Self {
        self.meta.sourcetype = Some(sourcetype.into());
        self
    }

    /// The `host` field.
    pub fn host<H: Into<String>>(mut self, host: H) -> Self {
        self.meta.host = Some(host.into());
        self
    }

    /// Batch size and latest flush.
    pub fn batch(mut self, size: usize, timeout: Duration) -> Self {
        self.options.batch_size = size;
        self.options.batch_timeout = timeout;
        self
    }

    /// Builds the sink. An empty token or a bad URL fails here.
    pub fn build(self) -> Result<SplunkSink, HttpError> {
        if self.token.is_empty() {
            return Err(HttpError::InvalidConfig("splunk HEC token is empty".to_owned()));
        }
        let root = Url::parse(&self.url)
            .map_err(|e| HttpError::InvalidConfig(format!("splunk url {:?}: {}", self.url, e)))?;
        let endpoint = root
            .join(EVENT_ENDPOINT)
            .map_err(|e| HttpError::InvalidConfig(e.to_string()))?;
        let transport = SplunkTransport {
            client: http_client(self.request_timeout)?,
            probe_client: http_client(PROBE_TIMEOUT)?,
            endpoint,
            root,
            token: self.token,
            meta: self.meta,
        };
        Ok(SplunkSink {
            inner: HttpBatchSink::spawn(transport, self.options)?,
        })
    }
}

/// Ships batched events to a Splunk HTTP Event Collector.
pub struct SplunkSink {
    inner: HttpBatchSink,
}

impl SplunkSink {
    /// Starts configuring a sink for the collector at `url` with the given HEC token.
    pub fn builder<U: Into<String>, T: Into<String>>(url: U, token: T) -> SplunkBuilder {
        SplunkBuilder {
            url: url.into(),
            token: token.into(),
            meta: HecMetadata::default(),
            request_timeout: Duration::from_secs(30),
            options: BatchOptions::default(),
        }
    }
}

delegate_sink!(SplunkSink);

/// A config fragment for a Splunk sink.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cfg {
    /// Base URL of the collector.
    #[serde(with = "url_serde")]
    url: Url,
    /// The HEC token.
    token: String,
    /// Target index.
    #[serde(default)]
    index: Option<String>,
    /// The `source` field.
    #[serde(default)]
    source: Option<String>,
    /// The `sourcetype` field.
    #[serde(default)]
    sourcetype: Option<String>,
    /// The `host` field.
    #[serde(default)]
    host: Option<String>,
    /// Batch size.
    #[serde(default)]
    batch_size: Option<usize>,
    /// Latest flush of a partial batch.
    #[serde(default, deserialize_with = "crate::humantime_option::deserialize")]
    batch_timeout: Option<Duration>,
}

impl Cfg {
    /// Builds the configured sink.
    pub fn build(&self) -> Result<SplunkSink, HttpError> {
        let mut builder = SplunkSink::builder(self.url.as_str(), self.token.clone());
        if let Some(index) = &self.index {
            builder = builder.index(index.clone());
        }
        if let Some(source) = &self.source {
            builder = builder.source(source.clone());
        }
        if let Some(sourcetype) = &self.sourcetype {
            builder = builder.sourcetype(sourcetype.clone());
        }
        if let Some(host) = &self.host {
            builder = builder.host(host.clone());
        }
        if self.batch_size.is_some() || self.batch_timeout.is_some() {
            builder = builder.batch(
                self.batch_size.unwrap_or(crate::DEFAULT_BATCH_SIZE),
                self.batch_timeout.unwrap_or(crate::DEFAULT_BATCH_TIMEOUT),
            );
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use mtlog::Level;

    use super::*;

    fn event() -> LogEvent {
        let mut e = LogEvent::new(Level::Information, "User {UserId} logged in");
        e.set_property("UserId", 42);
        e.set_property("http.status_code", 200);
        e
    }

    #[test]
    fn default_framing_is_a_string_event_with_fields() {
        let line = hec_line(&event(), &HecMetadata::default());
        assert!(line["time"].as_f64().unwrap() > 0.0);
        assert_eq!(line["event"], "User 42 logged in");
        assert_eq!(line["fields"]["level"], "Information");
        assert_eq!(line["fields"]["template"], "User {UserId} logged in");
        assert_eq!(line["fields"]["UserId"], 42);
        assert_eq!(line["fields"]["http.status_code"], 200);
        assert!(line.get("index").is_none());
    }

    #[test]
    fn json_sourcetype_flattens_and_underscores() {
        let meta = HecMetadata {
            sourcetype: Some("json".to_owned()),
            ..HecMetadata::default()
        };
        let line = hec_line(&event(), &meta);
        assert_eq!(line["sourcetype"], "json");
        assert_eq!(line["event"]["message"], "User 42 logged in");
        assert_eq!(line["event"]["UserId"], 42);
        assert_eq!(line["event"]["http_status_code"], 200);
        assert!(line.get("fields").is_none());
    }

    #[test]
    fn error_rides_in_fields() {
        let mut e = event();
        e.error = Some("boom".to_owned());
        let line = hec_line(&e, &HecMetadata::default());
        assert_eq!(line["fields"]["error"], "boom");
    }

    #[test]
    fn metadata_fields_appear() {
        let meta = HecMetadata {
            index: Some("main".to_owned()),
            source: Some("api".to_owned()),
            sourcetype: Some("_json".to_owned()),
            host: Some("web-1".to_owned()),
        };
        let line = hec_line(&event(), &meta);
        assert_eq!(line["index"], "main");
        assert_eq!(line["source"], "api");
        assert_eq!(line["host"], "web-1");
    }

    #[test]
    fn body_is_newline_delimited() {
        let body = hec_body(&[event(), event()], &HecMetadata::default());
        assert_eq!(body.lines().count(), 2);
    }

    #[test]
    fn empty_token_fails_at_construction() {
        assert!(SplunkSink::builder("http://localhost:8088", "").build().is_err());
    }
}
