//! Stage worker metrics.

use metrics::counter;

pub mod names {
    /// Stage runs by stage and outcome ("completed" or the failing step).
    pub const STAGE_RUNS_TOTAL: &str = "vpipe_worker_stage_runs_total";

    /// Completion notifications that could not be delivered.
    pub const NOTIFY_FAILURES_TOTAL: &str = "vpipe_worker_notify_failures_total";

    /// Inbound stage messages by handler decision.
    pub const DECISIONS_TOTAL: &str = "vpipe_worker_decisions_total";
}

pub fn record_stage_run(stage: &'static str, outcome: &'static str) {
    counter!(names::STAGE_RUNS_TOTAL, "stage" => stage, "outcome" => outcome).increment(1);
}

pub fn record_notify_failure(stage: &'static str) {
    counter!(names::NOTIFY_FAILURES_TOTAL, "stage" => stage).increment(1);
}

pub fn record_decision(stage: &'static str, decision: &'static str) {
    counter!(names::DECISIONS_TOTAL, "stage" => stage, "decision" => decision).increment(1);
}
