use std::sync::OnceLock;

use anyhow::Result;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const TASK_RUNS_TOTAL: &str = "threadline_worker_task_runs_total";
const TASK_DURATION_MS: &str = "threadline_worker_task_duration_ms";
const SWEEP_MERGES_TOTAL: &str = "threadline_worker_sweep_merges_total";
const SWEEP_INTEGRITY_ISSUES: &str = "threadline_worker_sweep_integrity_issues";
const OUTBOX_RECONCILED_TOTAL: &str = "threadline_worker_outbox_reconciled_total";
const LOCKS_PURGED_TOTAL: &str = "threadline_worker_locks_purged_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn register_task_run(task: &'static str, result: &'static str, duration_ms: f64) {
    counter!(TASK_RUNS_TOTAL, "task" => task, "result" => result).increment(1);
    histogram!(TASK_DURATION_MS, "task" => task).record(duration_ms);
}

pub fn register_sweep(contact_merges: usize, conversation_merges: usize, integrity_issues: usize) {
    counter!(SWEEP_MERGES_TOTAL, "kind" => "contact").increment(contact_merges as u64);
    counter!(SWEEP_MERGES_TOTAL, "kind" => "conversation").increment(conversation_merges as u64);
    gauge!(SWEEP_INTEGRITY_ISSUES).set(integrity_issues as f64);
}

pub fn register_outbox_reconciled(count: usize) {
    counter!(OUTBOX_RECONCILED_TOTAL).increment(count as u64);
}

pub fn register_locks_purged(count: usize) {
    counter!(LOCKS_PURGED_TOTAL).increment(count as u64);
}
