use serde::Serialize;

use crate::types::RunReport;

/// Emit a run report as a single JSON line to stdout.
pub fn report_run(report: &RunReport) {
    if let Ok(json) = serde_json::to_string(report) {
        println!("{json}");
    }
}

/// Outcome of a `--test-message` invocation.
#[derive(Debug, Clone, Serialize)]
pub struct TestMessageReport {
    pub timestamp: String,
    pub dry_run: bool,
    pub message: String,
    pub post_id: Option<String>,
}

/// Emit a test message report as a single JSON line to stdout.
pub fn report_test_message(report: &TestMessageReport) {
    if let Ok(json) = serde_json::to_string(report) {
        println!("{json}");
    }
}
