//! Structured JSONL logging for the zone pipeline.
//!
//! Every record carries a run id, a monotonically increasing sequence
//! number and a domain so that a replay of the same input produces a
//! comparable log stream. Records go to stderr; when `LOG_DIR` is set they
//! are also appended to `<LOG_DIR>/<run_id>/events.jsonl` (trace/debug go
//! to `trace.jsonl`).
//!
//! Data-quality skips, band fallbacks and observer failures are never
//! surfaced as errors. They are visible here and through the event
//! counters (`agg_increment` / `counter`).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("error") => Level::Error,
            _ => Level::Warn,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

// =============================================================================
// Log Domains
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Ingest,  // Record normalisation, skipped rows
    Signal,  // Liquidation inference
    Cluster, // Zone merging
    Score,   // Bands, strength, quality
    Stream,  // Zone lifecycle
    Predict, // External predictor calls
    System,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Ingest => "ingest",
            Domain::Signal => "signal",
            Domain::Cluster => "cluster",
            Domain::Score => "score",
            Domain::Stream => "stream",
            Domain::Predict => "predict",
            Domain::System => "system",
        }
    }

    pub fn is_enabled(&self) -> bool {
        // LOG_DOMAINS: comma-separated list or "all"
        match std::env::var("LOG_DOMAINS").as_deref() {
            Ok("all") | Err(_) => true,
            Ok(domains) => domains.split(',').any(|d| d.trim() == self.as_str()),
        }
    }
}

// =============================================================================
// Run context
// =============================================================================

static LOG_SEQ: AtomicU64 = AtomicU64::new(0);
static RUN_CONTEXT: OnceLock<RunContext> = OnceLock::new();

fn next_seq() -> u64 {
    LOG_SEQ.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug)]
struct RunContext {
    run_id: String,
    sinks: Option<FileSinks>,
}

#[derive(Debug)]
struct FileSinks {
    events: Mutex<BufWriter<File>>,
    trace: Mutex<BufWriter<File>>,
}

fn ensure_run_context() -> &'static RunContext {
    RUN_CONTEXT.get_or_init(|| {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let sinks = std::env::var("LOG_DIR")
            .ok()
            .and_then(|base| open_sinks(PathBuf::from(base).join(&run_id)));
        RunContext { run_id, sinks }
    })
}

fn open_sinks(run_dir: PathBuf) -> Option<FileSinks> {
    if let Err(err) = create_dir_all(&run_dir) {
        eprintln!("[log] failed to create run dir: {}", err);
        return None;
    }
    let open = |name: &str| match File::create(run_dir.join(name)) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] failed to create {}: {}", name, err);
            None
        }
    };
    Some(FileSinks {
        events: open("events.jsonl")?,
        trace: open("trace.jsonl")?,
    })
}

fn split_fields(mut fields: Map<String, Value>) -> (Map<String, Value>, Map<String, Value>) {
    let mut top = Map::new();
    for key in ["symbol", "zone_id", "msg"] {
        if let Some(value) = fields.remove(key) {
            top.insert(key.to_string(), value);
        }
    }
    (top, fields)
}

fn write_line(writer: &Mutex<BufWriter<File>>, line: &str) {
    if let Ok(mut w) = writer.lock() {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
}

// =============================================================================
// Core logging functions
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

/// Emit a structured log entry
pub fn log(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    if level < Level::from_env() || !domain.is_enabled() {
        return;
    }
    emit_record(level, domain, event, fields);
}

fn emit_record(level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
    let ctx = ensure_run_context();
    let (mut top, data) = split_fields(fields);

    let msg = top.remove("msg").unwrap_or(Value::String(String::new()));
    let mut entry = Map::new();
    entry.insert("ts".to_string(), json!(ts_now()));
    entry.insert("run_id".to_string(), json!(ctx.run_id.clone()));
    entry.insert("seq".to_string(), json!(next_seq()));
    entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
    entry.insert("domain".to_string(), json!(domain.as_str()));
    entry.insert("event".to_string(), json!(event));
    entry.insert("msg".to_string(), msg);
    for (k, v) in top {
        entry.insert(k, v);
    }
    entry.insert("data".to_string(), Value::Object(data));

    let line = Value::Object(entry).to_string();
    if let Some(sinks) = &ctx.sinks {
        match level {
            Level::Trace | Level::Debug => write_line(&sinks.trace, &line),
            _ => write_line(&sinks.events, &line),
        }
    }
    eprintln!("{}", line);
}

// =============================================================================
// Domain-Specific Logging Helpers
// =============================================================================

/// A record was dropped at a normalisation or extraction boundary.
pub fn log_skipped_record(domain: Domain, kind: &str, reason: &str, ts_ms: u64) {
    agg_increment(&format!("skipped.{}", kind));
    log(
        Level::Debug,
        domain,
        "record_skipped",
        obj(&[
            ("kind", v_str(kind)),
            ("reason", v_str(reason)),
            ("record_ts", json!(ts_ms)),
        ]),
    );
}

/// ATR path unavailable, percentage band used instead.
pub fn log_band_fallback(reason: &str) {
    agg_increment("band_fallback");
    log(
        Level::Debug,
        Domain::Score,
        "band_fallback",
        obj(&[("reason", v_str(reason))]),
    );
}

pub fn log_zone_transition(event: &str, zone_id: u64, side: &str, price_mean: f64, total_usd: f64) {
    agg_increment(event);
    log(
        Level::Info,
        Domain::Stream,
        event,
        obj(&[
            ("zone_id", json!(zone_id)),
            ("side", v_str(side)),
            ("price_mean", v_num(price_mean)),
            ("total_usd", v_num(total_usd)),
        ]),
    );
}

pub fn log_observer_error(event: &str, observer: usize, error: &str) {
    agg_increment("observer_error");
    log(
        Level::Warn,
        Domain::Stream,
        "observer_error",
        obj(&[
            ("lifecycle_event", v_str(event)),
            ("observer", json!(observer)),
            ("error", v_str(error)),
        ]),
    );
}

pub fn log_predictor_error(predictor: &str, price_mean: f64, error: &str) {
    agg_increment("predictor_error");
    log(
        Level::Warn,
        Domain::Predict,
        "predict_failed",
        obj(&[
            ("predictor", v_str(predictor)),
            ("price_mean", v_num(price_mean)),
            ("error", v_str(error)),
        ]),
    );
}

pub fn log_pipeline_summary(symbol: Option<&str>, records: usize, events: usize, zones: usize) {
    log(
        Level::Debug,
        Domain::System,
        "pipeline_run",
        obj(&[
            ("symbol", symbol.map(v_str).unwrap_or(Value::Null)),
            ("records", json!(records)),
            ("events", json!(events)),
            ("zones", json!(zones)),
        ]),
    );
}

// =============================================================================
// Utility Functions
// =============================================================================

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

// =============================================================================
// Event counters
// =============================================================================

static COUNTERS: OnceLock<Mutex<BTreeMap<String, u64>>> = OnceLock::new();

fn counters() -> &'static Mutex<BTreeMap<String, u64>> {
    COUNTERS.get_or_init(|| Mutex::new(BTreeMap::new()))
}

/// Increment a process-wide event counter.
pub fn agg_increment(event: &str) {
    if let Ok(mut c) = counters().lock() {
        *c.entry(event.to_string()).or_insert(0) += 1;
    }
}

pub fn counter(event: &str) -> u64 {
    counters()
        .lock()
        .map(|c| c.get(event).copied().unwrap_or(0))
        .unwrap_or(0)
}

pub fn counter_snapshot() -> BTreeMap<String, u64> {
    counters().lock().map(|c| c.clone()).unwrap_or_default()
}

// =============================================================================
// Tests
// =============================================================================
