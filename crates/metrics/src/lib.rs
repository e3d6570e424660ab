//! Counters, latency histograms, and the JSONL request log behind
//! `GET /metrics` and the admission-control response headers.
//!
//! No teacher file tracks exactly this counter set, but the bounded
//! latency-sample window and the per-file append-only log both follow the
//! workspace's established pattern: a fixed-capacity ring rather than an
//! unbounded vector, and a single-writer JSONL file rather than a database
//! row per request.

use chrono::SecondsFormat;
use parking_lot::Mutex;
use sa_llm::WarmupStatus;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

const LATENCY_WINDOW: usize = 5_000;
const CHAT_WINDOW: usize = 2_000;

struct Inner {
    requests_total: u64,
    errors_total: u64,
    rate_limited_total: u64,
    by_path: HashMap<String, u64>,
    by_status: HashMap<String, u64>,
    latency_samples: VecDeque<u64>,
    chat_total_samples: VecDeque<u64>,
    chat_busy_total: u64,
    plans_saved_total: u64,
    last_plan_id: Option<String>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            requests_total: 0,
            errors_total: 0,
            rate_limited_total: 0,
            by_path: HashMap::new(),
            by_status: HashMap::new(),
            latency_samples: VecDeque::new(),
            chat_total_samples: VecDeque::new(),
            chat_busy_total: 0,
            plans_saved_total: 0,
            last_plan_id: None,
        }
    }
}

pub struct Metrics {
    started_at: Instant,
    max_chat_inflight: i64,
    chat_inflight: AtomicI64,
    inner: Mutex<Inner>,
}

/// RAII guard incrementing/decrementing the in-flight chat counter.
pub struct ChatInflightGuard<'a> {
    metrics: &'a Metrics,
}

impl Drop for ChatInflightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.chat_inflight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Metrics {
    pub fn new(max_chat_inflight: i64) -> Self {
        Self {
            started_at: Instant::now(),
            max_chat_inflight,
            chat_inflight: AtomicI64::new(0),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Attempt to enter the chat concurrency gate. Returns `None` (and bumps
    /// `chat_busy_total`) when already at the cap.
    pub fn try_enter_chat(&self) -> Option<ChatInflightGuard<'_>> {
        loop {
            let current = self.chat_inflight.load(Ordering::SeqCst);
            if current >= self.max_chat_inflight {
                self.inner.lock().chat_busy_total += 1;
                return None;
            }
            if self
                .chat_inflight
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Some(ChatInflightGuard { metrics: self });
            }
        }
    }

    pub fn record_request(&self, path: &str, status: u16, latency_ms: u64) {
        let mut inner = self.inner.lock();
        inner.requests_total += 1;
        if status >= 400 {
            inner.errors_total += 1;
        }
        *inner.by_path.entry(path.to_string()).or_insert(0) += 1;
        *inner.by_status.entry(status.to_string()).or_insert(0) += 1;
        push_capped(&mut inner.latency_samples, latency_ms, LATENCY_WINDOW);
    }

    pub fn record_rate_limited(&self) {
        self.inner.lock().rate_limited_total += 1;
    }

    pub fn record_chat_total(&self, ms: u64) {
        let mut inner = self.inner.lock();
        push_capped(&mut inner.chat_total_samples, ms, CHAT_WINDOW);
    }

    pub fn record_plan_saved(&self, plan_id: &str) {
        let mut inner = self.inner.lock();
        inner.plans_saved_total += 1;
        inner.last_plan_id = Some(plan_id.to_string());
    }

    pub fn snapshot(&self, warmup: WarmupStatus) -> Value {
        let inner = self.inner.lock();
        let uptime_s = self.started_at.elapsed().as_secs_f64();

        let mut obj = serde_json::json!({
            "ok": true,
            "uptime_s": uptime_s,
            "requests_total": inner.requests_total,
            "errors_total": inner.errors_total,
            "rate_limited_total": inner.rate_limited_total,
            "by_path": inner.by_path,
            "by_status": inner.by_status,
            "latency_ms_p50": percentile(&inner.latency_samples, 0.50),
            "latency_ms_p95": percentile(&inner.latency_samples, 0.95),
            "latency_ms_p99": percentile(&inner.latency_samples, 0.99),
            "latency_samples": inner.latency_samples.len(),
            "chat_p95_ms": percentile(&inner.chat_total_samples, 0.95),
            "chat_samples": inner.chat_total_samples.len(),
            "chat_inflight": self.chat_inflight.load(Ordering::SeqCst),
            "max_chat_inflight": self.max_chat_inflight,
            "chat_busy_total": inner.chat_busy_total,
            "warmup_started": warmup.started,
            "warmup_done": warmup.done,
            "warmup_ok": warmup.ok,
            "warmup_ms": warmup.ms,
            "warmup_error": warmup.error,
        });

        if inner.plans_saved_total > 0 {
            obj["plans_saved_total"] = serde_json::json!(inner.plans_saved_total);
            obj["last_plan_id"] = serde_json::json!(inner.last_plan_id);
        }

        obj
    }
}

fn push_capped(window: &mut VecDeque<u64>, value: u64, cap: usize) {
    window.push_back(value);
    if window.len() > cap {
        window.pop_front();
    }
}

fn percentile(samples: &VecDeque<u64>, pct: f64) -> u64 {
    if samples.is_empty() {
        return 0;
    }
    let mut sorted: Vec<u64> = samples.iter().copied().collect();
    sorted.sort_unstable();
    let rank = ((sorted.len() as f64 - 1.0) * pct).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

/// One JSONL record appended per completed HTTP request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLogRecord {
    pub ts: String,
    pub request_id: String,
    pub remote: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_total_ms: Option<u64>,
}

impl RequestLogRecord {
    pub fn now_ts() -> String {
        chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

pub struct RequestLogWriter {
    path: PathBuf,
}

impl RequestLogWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn append(&self, record: &RequestLogRecord) {
        let Some(parent) = self.path.parent() else { return };
        if std::fs::create_dir_all(parent).is_err() {
            return;
        }
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize request log record");
                return;
            }
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to append request log record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_empty_window_is_zero() {
        let window = VecDeque::new();
        assert_eq!(percentile(&window, 0.95), 0);
    }

    #[test]
    fn percentile_picks_expected_rank() {
        let window: VecDeque<u64> = (1..=100).collect();
        assert_eq!(percentile(&window, 0.50), 50);
        assert_eq!(percentile(&window, 0.99), 99);
    }

    #[test]
    fn record_request_updates_counters_and_histogram() {
        let metrics = Metrics::new(4);
        metrics.record_request("/chat", 200, 12);
        metrics.record_request("/chat", 500, 30);
        let snap = metrics.snapshot(WarmupStatus::default());
        assert_eq!(snap["requests_total"], 2);
        assert_eq!(snap["errors_total"], 1);
        assert_eq!(snap["by_path"]["/chat"], 2);
    }

    #[test]
    fn chat_inflight_gate_reports_busy_once_at_cap() {
        let metrics = Metrics::new(1);
        let _g1 = metrics.try_enter_chat().expect("first slot free");
        assert!(metrics.try_enter_chat().is_none());
        let snap = metrics.snapshot(WarmupStatus::default());
        assert_eq!(snap["chat_busy_total"], 1);
        assert_eq!(snap["chat_inflight"], 1);
    }

    #[test]
    fn dropping_guard_frees_the_slot() {
        let metrics = Metrics::new(1);
        {
            let _g = metrics.try_enter_chat().unwrap();
        }
        assert!(metrics.try_enter_chat().is_some());
    }

    #[test]
    fn plans_saved_total_only_appears_after_first_save() {
        let metrics = Metrics::new(4);
        let snap = metrics.snapshot(WarmupStatus::default());
        assert!(snap.get("plans_saved_total").is_none());

        metrics.record_plan_saved("plan-1");
        let snap = metrics.snapshot(WarmupStatus::default());
        assert_eq!(snap["plans_saved_total"], 1);
        assert_eq!(snap["last_plan_id"], "plan-1");
    }

    #[test]
    fn request_log_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.jsonl");
        let writer = RequestLogWriter::new(&path);
        writer.append(&RequestLogRecord {
            ts: RequestLogRecord::now_ts(),
            request_id: "r1".into(),
            remote: "127.0.0.1".into(),
            method: "POST".into(),
            path: "/chat".into(),
            status: 200,
            latency_ms: 10,
            session_id: Some("s1".into()),
            plan_id: None,
            chat_total_ms: Some(10),
        });
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.contains("\"request_id\":\"r1\""));
    }
}
