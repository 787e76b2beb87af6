//! Metrics instrumentation for mesos-dns.
//!
//! All metrics are prefixed with `mesos_dns.`

use std::time::Instant;

use metrics::{counter, gauge, histogram};

/// Outcome of a handled DNS query.
#[derive(Debug, Clone, Copy)]
pub enum QueryResult {
    /// Query answered with records.
    Success,
    /// Name not found.
    NxDomain,
    /// Query failed (upstream failure, send failure, handler panic).
    Failed,
}

fn result_str(result: QueryResult) -> &'static str {
    match result {
        QueryResult::Success => "success",
        QueryResult::NxDomain => "nxdomain",
        QueryResult::Failed => "failed",
    }
}

/// Record a query answered from the cluster zone.
pub fn record_cluster_query(result: QueryResult, duration: std::time::Duration) {
    counter!("mesos_dns.query.cluster.count", "result" => result_str(result)).increment(1);
    histogram!("mesos_dns.query.cluster.duration.seconds").record(duration.as_secs_f64());
}

/// Record a query forwarded to upstream resolvers.
pub fn record_forward_query(result: QueryResult, duration: std::time::Duration) {
    counter!("mesos_dns.query.forward.count", "result" => result_str(result)).increment(1);
    histogram!("mesos_dns.query.forward.duration.seconds").record(duration.as_secs_f64());
}

/// Record that a forwarded query followed at least one referral.
pub fn record_recursion() {
    counter!("mesos_dns.query.forward.recursed.count").increment(1);
}

/// Record the outcome of a refresh cycle.
pub fn record_refresh(success: bool, duration: std::time::Duration) {
    let result = if success { "success" } else { "failed" };
    counter!("mesos_dns.refresh.count", "result" => result).increment(1);
    histogram!("mesos_dns.refresh.duration.seconds").record(duration.as_secs_f64());
}

/// Record snapshot sizes (call after each publication or periodically).
pub fn record_snapshot_counts(a_names: usize, srv_names: usize, slaves: usize) {
    gauge!("mesos_dns.records.a.count").set(a_names as f64);
    gauge!("mesos_dns.records.srv.count").set(srv_names as f64);
    gauge!("mesos_dns.records.slaves.count").set(slaves as f64);
}

/// Record the published snapshot generation.
pub fn record_generation(generation: u32) {
    gauge!("mesos_dns.records.generation").set(f64::from(generation));
}

/// Helper for timing operations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
