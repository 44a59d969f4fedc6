//! The Gauntlet
//!
//! Verification gate every submission passes before activation. Stages run
//! in order and short-circuit on failure:
//!
//! 1. static security scan (no execution)
//! 2. sandboxed execution of code + test case
//! 3. run classification and performance profiling
//!
//! Each run gets a fresh run id; the signature binding that run to the
//! tool's content hash is derived by the caller via [`crate::hashing`].

pub mod analyzer;
pub mod profiler;
pub mod sandbox;

use anyhow::Result;
use tracing::info;
use uuid::Uuid;

use crate::config::GauntletConfig;
use crate::models::{PerformanceProfile, RejectionReason, SecurityVerdict};

pub use analyzer::{SecurityReport, StaticAnalyzer};
pub use profiler::{RunKind, RunReport};
pub use sandbox::Sandbox;

/// Full record of one Gauntlet run.
#[derive(Debug, Clone)]
pub struct GauntletReport {
    pub run_id: String,
    pub security: SecurityVerdict,
    pub security_summary: String,
    pub performance: PerformanceProfile,
    /// None when the security scan blocked execution
    pub run: Option<RunReport>,
    pub rejection: Option<Rejection>,
}

impl GauntletReport {
    pub fn passed(&self) -> bool {
        self.rejection.is_none()
    }
}

/// A rejection with its closed-set reason and detail for the submitter.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub details: String,
}

/// The verification gate itself.
pub struct Gauntlet {
    analyzer: StaticAnalyzer,
    sandbox: Sandbox,
    block_on_warning: bool,
}

impl Gauntlet {
    pub fn new(config: GauntletConfig) -> Self {
        Self {
            analyzer: StaticAnalyzer::new(&config),
            block_on_warning: config.block_on_warning,
            sandbox: Sandbox::new(config),
        }
    }

    /// Run a candidate through all stages. A failed scan means the code is
    /// never executed.
    pub async fn run(&self, code: &str, test_case: &str) -> Result<GauntletReport> {
        let run_id = Uuid::new_v4().to_string();

        let security = self.analyzer.scan(code);
        let blocked = security.verdict == SecurityVerdict::Fail
            || (self.block_on_warning && security.verdict == SecurityVerdict::Warning);
        if blocked {
            info!(run_id = %run_id, verdict = security.verdict.as_str(), "gauntlet: scan blocked execution");
            return Ok(GauntletReport {
                run_id,
                security: security.verdict,
                security_summary: security.summary(),
                performance: PerformanceProfile::default(),
                run: None,
                rejection: Some(Rejection {
                    reason: RejectionReason::SecurityScanFailed,
                    details: security.summary(),
                }),
            });
        }

        let outcome = self.sandbox.execute(code, test_case).await?;
        let run = profiler::classify(&outcome);

        let rejection = if run.passed() {
            None
        } else {
            Some(Rejection {
                reason: RejectionReason::TestFailed,
                details: run.detail.clone(),
            })
        };

        info!(
            run_id = %run_id,
            passed = run.passed(),
            execution_time_ms = run.performance.execution_time_ms,
            "gauntlet: run complete"
        );

        Ok(GauntletReport {
            run_id,
            security: security.verdict,
            security_summary: security.summary(),
            performance: run.performance.clone(),
            run: Some(run),
            rejection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GauntletConfig;

    fn gauntlet() -> Gauntlet {
        Gauntlet::new(GauntletConfig::default())
    }

    #[tokio::test]
    async fn scan_failure_short_circuits_execution() {
        // The interpreter is irrelevant here; the scan must block first.
        let g = Gauntlet::new(GauntletConfig {
            interpreter: "definitely-not-an-interpreter".to_string(),
            ..Default::default()
        });
        let report = g
            .run("import subprocess\nsubprocess.run(['ls'])", "pass")
            .await
            .unwrap();
        assert!(!report.passed());
        assert!(report.run.is_none());
        let rejection = report.rejection.unwrap();
        assert_eq!(rejection.reason, RejectionReason::SecurityScanFailed);
        assert!(rejection.details.contains("subprocess"));
    }

    #[tokio::test]
    async fn warning_blocks_only_when_configured() {
        let strict = Gauntlet::new(GauntletConfig {
            block_on_warning: true,
            interpreter: "definitely-not-an-interpreter".to_string(),
            ..Default::default()
        });
        let report = strict
            .run("f = open('out.txt', 'w')", "pass")
            .await
            .unwrap();
        assert!(!report.passed());
        assert_eq!(report.security, SecurityVerdict::Warning);
        assert_eq!(
            report.rejection.unwrap().reason,
            RejectionReason::SecurityScanFailed
        );
    }

    #[tokio::test]
    async fn passing_tool_produces_clean_report() {
        if !interpreter_available() {
            return;
        }
        let report = gauntlet()
            .run("def add(a, b):\n    return a + b", "assert add(2, 3) == 5")
            .await
            .unwrap();
        assert!(report.passed(), "rejection: {:?}", report.rejection);
        assert_eq!(report.security, SecurityVerdict::Pass);
        assert!(report.performance.test_passed);
        assert!(report.run.unwrap().passed());
    }

    #[tokio::test]
    async fn failing_assertion_is_test_failed() {
        if !interpreter_available() {
            return;
        }
        let report = gauntlet()
            .run("def add(a, b):\n    return a - b", "assert add(2, 3) == 5")
            .await
            .unwrap();
        assert!(!report.passed());
        let rejection = report.rejection.unwrap();
        assert_eq!(rejection.reason, RejectionReason::TestFailed);
        assert!(rejection.details.contains("Assertion"));
    }

    #[tokio::test]
    async fn broken_tool_code_is_test_failed_with_load_detail() {
        if !interpreter_available() {
            return;
        }
        let report = gauntlet()
            .run("def f():\n    return undefined_name()", "f()")
            .await
            .unwrap();
        assert!(!report.passed());
        assert_eq!(report.run.unwrap().kind, RunKind::TestFailed);
    }

    fn interpreter_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_ok()
    }
}
