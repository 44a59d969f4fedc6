//! Run Classification
//!
//! Interprets a raw sandbox outcome: reads the runner markers to tell a
//! tool-load failure apart from a test failure, and folds timing into the
//! performance profile attached to provenance.

use crate::gauntlet::sandbox::{
    FailureKind, SandboxOutcome, MARKER_FAILED, MARKER_LOAD_ERROR, MARKER_PASSED,
};
use crate::models::PerformanceProfile;

/// What actually happened inside the sandbox, marker-level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Passed,
    /// Tool code raised while loading; the test never ran
    LoadError,
    /// Test case raised (assertion or otherwise)
    TestFailed,
    Timeout,
    LaunchError,
    /// Non-zero exit without a recognizable marker
    Unknown,
}

/// Classified result of one Gauntlet execution.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub kind: RunKind,
    pub performance: PerformanceProfile,
    /// Human-readable failure detail, empty on pass
    pub detail: String,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.kind == RunKind::Passed
    }
}

/// Classify a sandbox outcome using the runner markers.
pub fn classify(outcome: &SandboxOutcome) -> RunReport {
    let kind = match outcome.failure {
        None if outcome.stdout.contains(MARKER_PASSED) => RunKind::Passed,
        // Exit 0 without the marker means the runner was bypassed somehow;
        // treat it as a failure rather than trusting the exit code.
        None => RunKind::Unknown,
        Some(FailureKind::Timeout) => RunKind::Timeout,
        Some(FailureKind::LaunchError) => RunKind::LaunchError,
        Some(FailureKind::NonZeroExit) => {
            if outcome.stderr.contains(MARKER_LOAD_ERROR) {
                RunKind::LoadError
            } else if outcome.stderr.contains(MARKER_FAILED) {
                RunKind::TestFailed
            } else {
                RunKind::Unknown
            }
        }
    };

    let detail = match kind {
        RunKind::Passed => String::new(),
        RunKind::LoadError | RunKind::TestFailed => marker_line(&outcome.stderr)
            .unwrap_or_else(|| outcome.error_message.clone()),
        RunKind::Unknown if outcome.error_message.is_empty() => {
            "Execution finished without a test verdict".to_string()
        }
        _ => outcome.error_message.clone(),
    };

    let mut performance = outcome.to_performance_profile();
    performance.test_passed = kind == RunKind::Passed;
    if performance.error_message.is_empty() && !detail.is_empty() {
        performance.error_message = detail.clone();
    }

    RunReport {
        kind,
        performance,
        detail,
    }
}

/// First stderr line carrying a runner marker.
fn marker_line(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .find(|l| l.contains(MARKER_FAILED) || l.contains(MARKER_LOAD_ERROR))
        .map(|l| l.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(
        success: bool,
        stdout: &str,
        stderr: &str,
        failure: Option<FailureKind>,
    ) -> SandboxOutcome {
        SandboxOutcome {
            success,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code: if success { Some(0) } else { Some(1) },
            execution_time_ms: 5.0,
            error_message: String::new(),
            failure,
        }
    }

    #[test]
    fn pass_marker_classifies_as_passed() {
        let report = classify(&outcome(true, "TEST_PASSED\n", "", None));
        assert_eq!(report.kind, RunKind::Passed);
        assert!(report.passed());
        assert!(report.performance.test_passed);
        assert!(report.detail.is_empty());
    }

    #[test]
    fn assertion_failure_is_test_failed() {
        let report = classify(&outcome(
            false,
            "",
            "TEST_FAILED: Assertion: expected 5\n",
            Some(FailureKind::NonZeroExit),
        ));
        assert_eq!(report.kind, RunKind::TestFailed);
        assert!(report.detail.contains("Assertion"));
        assert!(!report.performance.test_passed);
    }

    #[test]
    fn load_error_is_distinguished_from_test_failure() {
        let report = classify(&outcome(
            false,
            "",
            "TOOL_LOAD_ERROR: NameError: undefined\n",
            Some(FailureKind::NonZeroExit),
        ));
        assert_eq!(report.kind, RunKind::LoadError);
        assert!(report.detail.contains("NameError"));
    }

    #[test]
    fn timeout_passes_through() {
        let mut o = outcome(false, "", "", Some(FailureKind::Timeout));
        o.error_message = "Execution timed out after 30s".to_string();
        let report = classify(&o);
        assert_eq!(report.kind, RunKind::Timeout);
        assert!(report.detail.contains("timed out"));
    }

    #[test]
    fn clean_exit_without_marker_is_not_trusted() {
        let report = classify(&outcome(true, "some output\n", "", None));
        assert_eq!(report.kind, RunKind::Unknown);
        assert!(!report.performance.test_passed);
    }
}
