//! Orchestrator metrics.

use metrics::counter;

pub mod names {
    /// Stage transitions by completed stage ("start" for pipeline starts) and outcome.
    pub const TRANSITIONS_TOTAL: &str = "vpipe_orchestrator_transitions_total";

    /// Inbound messages by governor decision.
    pub const DECISIONS_TOTAL: &str = "vpipe_orchestrator_decisions_total";
}

pub fn record_transition(from: &'static str, outcome: &'static str) {
    counter!(names::TRANSITIONS_TOTAL, "from" => from, "outcome" => outcome).increment(1);
}

pub fn record_decision(decision: &'static str) {
    counter!(names::DECISIONS_TOTAL, "decision" => decision).increment(1);
}
