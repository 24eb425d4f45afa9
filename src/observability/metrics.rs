//! Metrics collection.
//!
//! # Responsibilities
//! - Define registry metrics (requests, GC activity, rate limiting)
//! - Emit through the `metrics` facade; the exporter is an extension
//!
//! # Metrics
//! - `registry_http_requests_total` (counter): requests by method, status
//! - `registry_http_request_duration_seconds` (histogram): latency distribution
//! - `registry_gc_runs_total` (counter): GC passes by store root
//! - `registry_gc_removed_total` (counter): abandoned uploads reclaimed
//! - `registry_rate_limited_total` (counter): rejected requests by limiter
//!
//! # Design Decisions
//! - Without an installed recorder every call is a cheap no-op
//! - Labels are low-cardinality (no repository names)

use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Register metric descriptions with the installed recorder.
pub fn describe() {
    describe_counter!("registry_http_requests_total", "HTTP requests served");
    describe_histogram!("registry_http_request_duration_seconds", "HTTP request latency");
    describe_counter!("registry_gc_runs_total", "Garbage collection passes");
    describe_counter!("registry_gc_removed_total", "Abandoned uploads removed by GC");
    describe_counter!("registry_rate_limited_total", "Requests rejected by rate limiting");
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let status = status.to_string();
    counter!("registry_http_requests_total", "method" => method.to_string(), "status" => status.clone())
        .increment(1);
    histogram!("registry_http_request_duration_seconds", "method" => method.to_string(), "status" => status)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_gc_run(root: &str, removed: usize) {
    counter!("registry_gc_runs_total", "root" => root.to_string()).increment(1);
    counter!("registry_gc_removed_total", "root" => root.to_string()).increment(removed as u64);
}

pub fn record_rate_limited(limiter: &'static str) {
    counter!("registry_rate_limited_total", "limiter" => limiter).increment(1);
}
