//! The Elasticsearch sink: `_bulk` framing, dated indices or data streams.

use std::time::Duration;

use chrono::SecondsFormat;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{json, Map, Value as Json};
use url::Url;

use mtlog::template::output::render_message;
use mtlog::LogEvent;

use crate::{check_status, http_client, BatchOptions, HttpBatchSink, HttpError, Transport, PROBE_TIMEOUT};

const BULK_CONTENT_TYPE: &str = "application/x-ndjson";

/// Where documents land.
#[derive(Clone, Debug)]
pub enum IndexTarget {
    /// Classic dated indices: `<prefix>-YYYY.MM.DD`, with an optional ingest pipeline.
    Dated {
        /// Index name prefix.
        prefix: String,
        /// Optional ingest pipeline name.
        pipeline: Option<String>,
    },
    /// A data stream; documents are framed with `create`.
    DataStream(String),
}

/// Builds one event's document, ECS-adjacent fields included.
pub fn document(event: &LogEvent) -> Json {
    let timestamp = event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut doc = Map::new();
    doc.insert("@timestamp".to_owned(), Json::String(timestamp.clone()));
    doc.insert("level".to_owned(), Json::String(event.level.name().to_owned()));
    doc.insert("message".to_owned(), Json::String(render_message(event)));
    doc.insert(
        "messageTemplate".to_owned(),
        Json::String(event.template.clone()),
    );
    doc.insert("log.level".to_owned(), Json::String(event.level.name().to_owned()));
    doc.insert("event.created".to_owned(), Json::String(timestamp));
    if let Some(error) = &event.error {
        doc.insert("error.message".to_owned(), Json::String(error.clone()));
    }
    for (name, value) in &event.properties {
        doc.insert(
            name.clone(),
            serde_json::to_value(value).unwrap_or(Json::Null),
        );
    }
    Json::Object(doc)
}

/// Frames a batch as newline-delimited `{action}\n{document}\n` pairs.
pub fn bulk_body(events: &[LogEvent], target: &IndexTarget) -> String {
    let mut body = String::new();
    for event in events {
        let action = match target {
            IndexTarget::Dated { prefix, pipeline } => {
                let index = format!("{}-{}", prefix, event.timestamp.format("%Y.%m.%d"));
                match pipeline {
                    Some(p) => json!({"index": {"_index": index, "pipeline": p}}),
                    None => json!({"index": {"_index": index}}),
                }
            }
            IndexTarget::DataStream(stream) => json!({"create": {"_index": stream}}),
        };
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&document(event).to_string());
        body.push('\n');
    }
    body
}

struct ElasticTransport {
    client: reqwest::Client,
    probe_client: reqwest::Client,
    endpoint: Url,
    root: Url,
    target: IndexTarget,
    basic_auth: Option<(String, String)>,
}

impl Transport for ElasticTransport {
    fn name(&self) -> &'static str {
        "elasticsearch"
    }

    fn send(&self, events: &[LogEvent]) -> Result<(), HttpError> {
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, BULK_CONTENT_TYPE)
            .body(bulk_body(events, &self.target));
        if let Some((user, password)) = &self.basic_auth {
            request = request.basic_auth(user.clone(), Some(password.clone()));
        }
        let mut response = request.send()?;
        check_status(&response)?;

        // A 200 bulk response can still carry per-item failures; they are reported one by one.
        if let Ok(body) = response.json::<Json>() {
            if body["errors"].as_bool() == Some(true) {
                for item in body["items"].as_array().into_iter().flatten() {
                    let status = item["index"]["error"]
                        .as_object()
                        .or_else(|| item["create"]["error"].as_object());
                    if let Some(error) = status {
                        mtlog::selflog!(
                            "elasticsearch rejected a document: {}",
                            Json::Object(error.clone()),
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn probe(&self) -> Result<(), HttpError> {
        let response = self.probe_client.get(self.root.clone()).send()?;
        check_status(&response)
    }
}

/// Configures an [`ElasticsearchSink`].
pub struct ElasticsearchBuilder {
    url: String,
    target: IndexTarget,
    basic_auth: Option<(String, String)>,
    request_timeout: Duration,
    options: BatchOptions,
}

impl ElasticsearchBuilder {
    /// Uses classic dated indices under this prefix (the default is `logs`).
    pub fn index_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        let pipeline = match &self.target {
            IndexTarget::Dated { pipeline, .. } => pipeline.clone(),
            IndexTarget::DataStream(_) => None,
        };
        self.target = IndexTarget::Dated {
            prefix: prefix.into(),
            pipeline,
        };
        self
    }

    /// Routes documents through an ingest pipeline (dated indices only).
    pub fn pipeline<P: Into<String>>(mut self, pipeline: P) -> Self {
        let target = self.target.clone();
        if let IndexTarget::Dated { prefix, .. } = target {
            self.target = IndexTarget::Dated {
                prefix,
                pipeline: Some(pipeline.into()),
            };
        }
        self
    }

    /// Writes into a data stream instead of dated indices.
    pub fn data_stream<S: Into<String>>(mut self, stream: S) -> Self {
        self.target = IndexTarget::DataStream(stream.into());
        self
    }

    /// HTTP basic authentication.
    pub fn basic_auth<U: Into<String>, P: Into<String>>(mut self, user: U, password: P) -> Self {
        self.basic_auth = Some((user.into(), password.into()));
        self
    }

    /// Batch size and latest flush.
    pub fn batch(mut self, size: usize, timeout: Duration) -> Self {
        self.options.batch_size = size;
        self.options.batch_timeout = timeout;
        self
    }

    /// Builds the sink.
    pub fn build(self) -> Result<ElasticsearchSink, HttpError> {
        let root = Url::parse(&self.url)
            .map_err(|e| HttpError::InvalidConfig(format!("elasticsearch url {:?}: {}", self.url, e)))?;
        let endpoint = root
            .join("_bulk")
            .map_err(|e| HttpError::InvalidConfig(e.to_string()))?;
        let transport = ElasticTransport {
            client: http_client(self.request_timeout)?,
            probe_client: http_client(PROBE_TIMEOUT)?,
            endpoint,
            root,
            target: self.target,
            basic_auth: self.basic_auth,
        };
        Ok(ElasticsearchSink {
            inner: HttpBatchSink::spawn(transport, self.options)?,
        })
    }
}

/// Ships batched documents to Elasticsearch through the `_bulk` API.
pub struct ElasticsearchSink {
    inner: HttpBatchSink,
}

impl ElasticsearchSink {
    /// Starts configuring a sink for the cluster at `url`.
    pub fn builder<U: Into<String>>(url: U) -> ElasticsearchBuilder {
        ElasticsearchBuilder {
            url: url.into(),
            target: IndexTarget::Dated {
                prefix: "logs".to_owned(),
                pipeline: None,
            },
            basic_auth: None,
            request_timeout: Duration::from_secs(30),
            options: BatchOptions::default(),
        }
    }
}

delegate_sink!(ElasticsearchSink);

/// A config fragment for an Elasticsearch sink.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Cfg {
    /// Base URL of the cluster.
    #[serde(with = "url_serde")]
    url: Url,
    /// Index prefix for dated indices.
    #[serde(default)]
    index_prefix: Option<String>,
    /// Data stream name; takes precedence over `index-prefix`.
    #[serde(default)]
    data_stream: Option<String>,
    /// Ingest pipeline for dated indices.
    #[serde(default)]
    pipeline: Option<String>,
    /// Batch size.
    #[serde(default)]
    batch_size: Option<usize>,
    /// Latest flush of a partial batch.
    #[serde(default, deserialize_with = "crate::humantime_option::deserialize")]
    batch_timeout: Option<Duration>,
}

impl Cfg {
    /// Builds the configured sink.
    pub fn build(&self) -> Result<ElasticsearchSink, HttpError> {
        let mut builder = ElasticsearchSink::builder(self.url.as_str());
        if let Some(prefix) = &self.index_prefix {
            builder = builder.index_prefix(prefix.clone());
        }
        if let Some(pipeline) = &self.pipeline {
            builder = builder.pipeline(pipeline.clone());
        }
        if let Some(stream) = &self.data_stream {
            builder = builder.data_stream(stream.clone());
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
    use chrono::TimeZone;
    use mtlog::Level;

    use super::*;

    fn event() -> LogEvent {
        let mut e = LogEvent::new(Level::Warning, "Disk {Disk} filling up");
        e.timestamp = chrono::Utc.ymd(2024, 3, 7).and_hms(9, 0, 0);
        e.set_property("Disk", "/dev/sda1");
        e
    }

    #[test]
    fn dated_index_framing() {
        let target = IndexTarget::Dated {
            prefix: "app-logs".to_owned(),
            pipeline: None,
        };
        let body = bulk_body(&[event()], &target);
        let lines: Vec<_> = body.lines().collect();
        assert_eq!(lines.len(), 2);

        let action: Json = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "app-logs-2024.03.07");
        assert!(action["index"].get("pipeline").is_none());

        let doc: Json = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(doc["level"], "Warning");
        assert_eq!(doc["log.level"], "Warning");
        assert_eq!(doc["messageTemplate"], "Disk {Disk} filling up");
        assert_eq!(doc["message"], "Disk /dev/sda1 filling up");
        assert_eq!(doc["Disk"], "/dev/sda1");
        assert!(doc.get("@timestamp").is_some());
        assert!(doc.get("event.created").is_some());
    }

    #[test]
    fn pipeline_is_in_the_action() {
        let target = IndexTarget::Dated {
            prefix: "logs".to_owned(),
            pipeline: Some("geoip".to_owned()),
        };
        let body = bulk_body(&[event()], &target);
        let action: Json = serde_json::from_str(body.lines().next().unwrap()).unwrap();
        assert_eq!(action["index"]["pipeline"], "geoip");
    }

    #[test]
    fn data_stream_uses_create() {
        let target = IndexTarget::DataStream("logs-app-default".to_owned());
        let body = bulk_body(&[event()], &target);
        let action: Json = serde_json::from_str(body.lines().next().unwrap()).unwrap();
        assert_eq!(action["create"]["_index"], "logs-app-default");
    }

    #[test]
    fn error_property_becomes_ecs_field() {
        let mut e = event();
        e.error = Some("io timeout".to_owned());
        let doc = document(&e);
        assert_eq!(doc["error.message"], "io timeout");
    }
}
