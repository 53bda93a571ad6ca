//! The Seq sink: CLEF batches against the raw-events ingestion endpoint.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use url::Url;

use mtlog::clef;
use mtlog::LogEvent;

use crate::{check_status, http_client, BatchOptions, HttpBatchSink, HttpError, Transport, PROBE_TIMEOUT};

const CLEF_CONTENT_TYPE: &str = "application/vnd.serilog.clef";
const API_KEY_HEADER: &str = "X-Seq-ApiKey";

/// Joins a CLEF batch: one event per line.
pub fn clef_body(events: &[LogEvent]) -> String {
    let mut body = String::new();
    for event in events {
        body.push_str(&clef::to_clef(event, false));
        body.push('\n');
    }
    body
}

struct SeqTransport {
    client: reqwest::Client,
    probe_client: reqwest::Client,
    endpoint: Url,
    root: Url,
    api_key: Option<String>,
}

impl Transport for SeqTransport {
    fn name(&self) -> &'static str {
        "seq"
    }

    fn send(&self, events: &[LogEvent]) -> Result<(), HttpError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, CLEF_CONTENT_TYPE)
            .body(clef_body(events));
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key.as_str());
        }
        let response = request.send()?;
        check_status(&response)
    }

    fn probe(&self) -> Result<(), HttpError> {
        let response = self.probe_client.get(self.root.clone()).send()?;
        check_status(&response)
    }
}

/// Configures a [`SeqSink`].
pub struct SeqBuilder {
    url: String,
    api_key: Option<String>,
    request_timeout: Duration,
    options: BatchOptions,
}

impl SeqBuilder {
    /// The API key sent with every batch.
    pub fn api_key<K: Into<String>>(mut self, key: K) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Timeout of one ingestion request.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Batch size and latest flush.
    pub fn batch(mut self, size: usize, timeout: Duration) -> Self {
        self.options.batch_size = size;
        self.options.batch_timeout = timeout;
        self
    }

    /// Builds the sink. Fails on an unparsable URL - misconfiguration surfaces here, not at
    /// emit time.
    pub fn build(self) -> Result<SeqSink, HttpError> {
        let root = Url::parse(&self.url)
            .map_err(|e| HttpError::InvalidConfig(format!("seq url {:?}: {}", self.url, e)))?;
        let endpoint = root
            .join("api/events/raw")
            .map_err(|e| HttpError::InvalidConfig(e.to_string()))?;
        let transport = SeqTransport {
            client: http_client(self.request_timeout)?,
            probe_client: http_client(PROBE_TIMEOUT)?,
            endpoint,
            root,
            api_key: self.api_key,
        };
        Ok(SeqSink {
            inner: HttpBatchSink::spawn(transport, self.options)?,
        })
    }
}

/// Ships CLEF batches to a [Seq](https://datalust.co/seq) server.
pub struct SeqSink {
    inner: HttpBatchSink,
}

impl SeqSink {
    /// Starts configuring a sink for the server at `url`.
    pub fn builder<U: Into<String>>(url: U) -> SeqBuilder {
        SeqBuilder {
            url: url.into(),
            api_key: None,
            request_timeout: Duration::from_secs(30),
            options: BatchOptions::default(),
        }
    }
}

delegate_sink!(SeqSink);

/// A config fragment for a Seq sink.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cfg {
    /// Base URL of the Seq server.
    #[serde(with = "url_serde")]
    url: Url,
    /// Optional API key.
    #[serde(default)]
    api_key: Option<String>,
    /// Batch size.
    #[serde(default)]
    batch_size: Option<usize>,
    /// Latest flush of a partial batch, e.g. `2s`.
    #[serde(default, deserialize_with = "crate::humantime_option::deserialize")]
    batch_timeout: Option<Duration>,
}

impl Cfg {
    /// Builds the configured sink.
    pub fn build(&self) -> Result<SeqSink, HttpError> {
        let mut builder = SeqSink::builder(self.url.as_str());
        if let Some(key) = &self.api_key {
            builder = builder.api_key(key.clone());
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
