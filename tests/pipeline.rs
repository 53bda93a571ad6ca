//! End-to-end scenarios: whole pipelines wired up the way applications do it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use mtlog::context::{push_deadline, OperationDeadline};
use mtlog::enrich::DeadlineEnricher;
use mtlog::filter::Pred;
use mtlog::sink::rolling::RollingFileSink;
use mtlog::sink::{DurableSink, MemorySink, Route, RouterMode, RouterSink};
use mtlog::template::OutputTemplate;
use mtlog::{Level, LogEvent, Logger, Value};

#[test]
fn template_rendering_end_to_end() {
    let sink = MemorySink::new();
    let logger = Logger::builder().sink(sink.clone()).build();
    mtlog::info!(logger, "User {UserId} logged in from {IP}", 123, "192.168.1.1");

    let event = &sink.events()[0];
    assert_eq!(event.template, "User {UserId} logged in from {IP}");
    assert_eq!(sink.messages(), ["User 123 logged in from 192.168.1.1"]);

    let clef = mtlog::clef::to_clef(event, true);
    let json: serde_json::Value = serde_json::from_str(&clef).unwrap();
    assert_eq!(json["@mt"], "User {UserId} logged in from {IP}");
    assert_eq!(json["@m"], "User 123 logged in from 192.168.1.1");
}

#[test]
fn format_specifiers_end_to_end() {
    let sink = MemorySink::new();
    let logger = Logger::builder().sink(sink.clone()).build();
    mtlog::info!(logger, "Progress: {Percent:P1}", 0.85);
    mtlog::info!(logger, "Count: {Count:000}", 42);
    assert_eq!(sink.messages(), ["Progress: 85.0%", "Count: 042"]);
}

#[test]
fn below_minimum_is_never_enriched() {
    let enriched = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&enriched);
    let sink = MemorySink::new();
    let logger = Logger::builder()
        .minimum_level(Level::Warning)
        .enrich(move |_: &mut LogEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .sink(sink.clone())
        .build();

    mtlog::debug!(logger, "nobody home");
    mtlog::info!(logger, "still nobody");
    assert_eq!(enriched.load(Ordering::SeqCst), 0);
    assert!(sink.is_empty());

    mtlog::error!(logger, "somebody");
    assert_eq!(enriched.load(Ordering::SeqCst), 1);
    assert_eq!(sink.len(), 1);
}

#[test]
fn router_first_match_scenario() {
    let (a, b, c) = (MemorySink::new(), MemorySink::new(), MemorySink::new());
    let router = RouterSink::new(RouterMode::FirstMatch)
        .route(Route::new("errors", 10, Pred::level(Level::Error), a.clone()))
        .route(Route::new("audit", 20, Pred::property("Audit"), b.clone()))
        .route(Route::new("catch-all", 30, Pred::always(), c.clone()));
    let stats_handle = Arc::new(router);
    let logger = Logger::builder().sink(Arc::clone(&stats_handle)).build();

    let audited = logger.for_context("Audit", true);
    mtlog::error!(audited, "payment failed");

    assert_eq!((a.len(), b.len(), c.len()), (1, 0, 0));
    let stats = stats_handle.stats();
    assert_eq!(stats.route_hits.get("errors"), Some(&1));
    assert_eq!(stats.route_hits.get("audit"), None);
    assert_eq!(stats.total, 1);
    assert_eq!(stats.dropped, 0);
}

#[test]
fn rolling_file_by_size_with_compression() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    let sink = RollingFileSink::builder(&path)
        .template(OutputTemplate::parse("${Message}${NewLine}").unwrap())
        .max_file_size(200)
        .retain_files(3)
        .compress(true)
        .build()
        .unwrap();
    let logger = Logger::builder().sink(sink).build();

    let payload = "x".repeat(75);
    for _ in 0..50 {
        mtlog::info!(logger, "{Payload}", payload);
    }
    logger.close().unwrap();

    let current = std::fs::metadata(&path).unwrap().len();
    assert!(current <= 200 + 80, "current file too big: {}", current);

    let gz: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".log.gz"))
        .collect();
    assert!(!gz.is_empty());
    assert!(gz.len() <= 3, "retention failed: {:?}", gz);
}

#[test]
fn durable_survives_an_outage() {
    let dir = tempfile::tempdir().unwrap();
    let memory = MemorySink::new();
    memory.set_failing(true);
    let durable = DurableSink::builder(memory.clone(), dir.path())
        .retry_interval(Duration::from_millis(100))
        .flush_interval(Duration::from_millis(20))
        .delivery_timeout(Duration::from_millis(500))
        .build()
        .unwrap();
    let metrics_handle = Arc::new(durable);
    let logger = Logger::builder().sink(Arc::clone(&metrics_handle)).build();

    for n in 0..4 {
        mtlog::info!(logger, "queued {N}", n);
    }
    sleep(Duration::from_millis(300));

    // The outage left NDJSON lines on disk.
    let lines: usize = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| std::fs::read_to_string(e.unwrap().path()).unwrap_or_default())
        .map(|content| content.lines().count())
        .sum();
    assert!(lines >= 4, "expected 4 buffered lines, found {}", lines);

    memory.set_failing(false);
    // A couple of retry intervals is plenty for the probe and the replay.
    sleep(Duration::from_millis(250));

    let delivered: Vec<LogEvent> = memory
        .events()
        .into_iter()
        .filter(|e| e.template.starts_with("queued"))
        .collect();
    assert_eq!(delivered.len(), 4);
    let metrics = metrics_handle.metrics();
    assert_eq!(metrics.delivered, 4);
    assert!(metrics.buffered >= 4);
    assert_eq!(metrics.dropped, 0);
    logger.close().unwrap();
}

#[test]
fn deadline_first_warning_survives_cache_eviction() {
    let sink = MemorySink::new();
    let logger = Logger::builder()
        .enrich(DeadlineEnricher::absolute(Duration::from_millis(100)).with_cache(3, Duration::from_secs(60)))
        .sink(sink.clone())
        .build();

    let handles: Vec<Arc<OperationDeadline>> = (0..6)
        .map(|i| OperationDeadline::starting_now(i, Duration::from_millis(400)))
        .collect();

    // Prime every operation while its budget is still comfortable.
    for handle in &handles {
        let _g = push_deadline(handle.clone());
        mtlog::info!(logger, "starting work");
    }
    assert!(sink
        .events()
        .iter()
        .all(|e| !e.has_property("deadline.first_warning")));
    sink.clear();

    sleep(Duration::from_millis(320));

    for handle in &handles {
        let _g = push_deadline(handle.clone());
        mtlog::info!(logger, "still working");
    }
    let warnings: Vec<LogEvent> = sink
        .events()
        .into_iter()
        .filter(|e| e.property("deadline.first_warning") == Some(&Value::Bool(true)))
        .collect();
    assert_eq!(warnings.len(), 6);
    assert!(warnings.iter().all(|e| e.level == Level::Warning));
    sink.clear();

    // The first three operations lost their cache slot along the way; they still must not warn
    // twice.
    for handle in handles.iter().take(3) {
        let _g = push_deadline(handle.clone());
        mtlog::info!(logger, "one more check");
    }
    for event in sink.events() {
        assert!(!event.has_property("deadline.first_warning"));
        assert_eq!(event.property("deadline.approaching"), Some(&Value::Bool(true)));
    }
}

#[test]
fn bound_context_and_filters_compose() {
    let sink = MemorySink::new();
    let logger = Logger::builder()
        .minimum_level(Level::Debug)
        .enrich(mtlog::enrich::FromLogContext)
        .filter(|e: &LogEvent| e.property("Tenant") != Some(&Value::Str("blocked".into())))
        .sink(sink.clone())
        .build();

    let _scope = mtlog::context::push_property("RequestId", "r-9");
    let tenant = logger.for_context("Tenant", "blocked");
    mtlog::info!(tenant, "dropped by the filter");
    assert!(sink.is_empty());

    let ok = logger.for_context("Tenant", "acme");
    mtlog::info!(ok, "kept");
    let event = &sink.events()[0];
    assert_eq!(event.property("RequestId"), Some(&Value::Str("r-9".into())));
    assert_eq!(event.property("Tenant"), Some(&Value::Str("acme".into())));
}
