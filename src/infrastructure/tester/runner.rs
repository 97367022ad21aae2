//! Thin `tokio::process::Command` wrapper over a configurable shell script,
//! invoked once per step (§6.6). Each step runs as
//! `<script_path> <step> <repository> <branch_name>` under its own timeout.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;

use crate::domain::models::TesterConfig;
use crate::domain::ports::tester::{TestCounts, TestRunResult, Tester};

const STEPS: [&str; 4] = ["install", "lint", "test", "build"];

pub struct ShellTester {
    script_path: String,
    install_timeout: Duration,
    lint_timeout: Duration,
    test_timeout: Duration,
    build_timeout: Duration,
}

impl ShellTester {
    pub fn new(config: &TesterConfig) -> Self {
        Self {
            script_path: config.script_path.clone(),
            install_timeout: config.install_timeout(),
            lint_timeout: config.lint_timeout(),
            test_timeout: config.test_timeout(),
            build_timeout: config.build_timeout(),
        }
    }

    fn timeout_for(&self, step: &str) -> Duration {
        match step {
            "install" => self.install_timeout,
            "lint" => self.lint_timeout,
            "test" => self.test_timeout,
            "build" => self.build_timeout,
            _ => self.test_timeout,
        }
    }

    async fn run_step(&self, step: &str, repository: &str, branch_name: &str) -> StepOutcome {
        let child = Command::new(&self.script_path)
            .arg(step)
            .arg(repository)
            .arg(branch_name)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        match timeout(self.timeout_for(step), child).await {
            Ok(Ok(output)) => StepOutcome {
                step: step.to_string(),
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(err)) => StepOutcome {
                step: step.to_string(),
                success: false,
                stdout: String::new(),
                stderr: format!("failed to spawn {step} step: {err}"),
            },
            Err(_) => StepOutcome {
                step: step.to_string(),
                success: false,
                stdout: String::new(),
                stderr: format!("{step} step timed out after {:?}", self.timeout_for(step)),
            },
        }
    }
}

struct StepOutcome {
    step: String,
    success: bool,
    stdout: String,
    stderr: String,
}

#[async_trait]
impl Tester for ShellTester {
    async fn run(&self, repository: &str, branch_name: &str) -> anyhow::Result<TestRunResult> {
        let mut combined_output = String::new();
        let mut errors = Vec::new();
        let mut test_counts = None;

        for step in STEPS {
            let outcome = self.run_step(step, repository, branch_name).await;
            combined_output.push_str(&format!("--- {step} ---\n{}\n", outcome.stdout));

            if step == "test" {
                test_counts = parse_test_counts(&outcome.stdout);
            }

            if !outcome.success {
                errors.push(format!("{step} failed: {}", outcome.stderr.trim()));
                return Ok(TestRunResult {
                    success: false,
                    output: combined_output,
                    errors,
                    test_counts,
                    coverage: None,
                    code_quality: None,
                });
            }
        }

        Ok(TestRunResult { success: true, output: combined_output, errors, test_counts, coverage: None, code_quality: None })
    }
}

/// Scans step output for a trailing `TEST_COUNTS passed=<n> total=<n>` marker
/// line. Scripts that don't emit one simply yield no counts.
fn parse_test_counts(output: &str) -> Option<TestCounts> {
    output.lines().rev().find_map(|line| {
        let rest = line.trim().strip_prefix("TEST_COUNTS ")?;
        let mut passed = None;
        let mut total = None;
        for field in rest.split_whitespace() {
            if let Some(v) = field.strip_prefix("passed=") {
                passed = v.parse::<u32>().ok();
            } else if let Some(v) = field.strip_prefix("total=") {
                total = v.parse::<u32>().ok();
            }
        }
        Some(TestCounts { passed: passed?, total: total? })
    })
}
