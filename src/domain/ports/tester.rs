//! Tester port (§6.6) — local git-checkout/test-runner utility. The
//! orchestrator only consumes this interface; the checkout/test-runner
//! implementation itself is an external collaborator (§1).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestCounts {
    pub passed: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRunResult {
    pub success: bool,
    pub output: String,
    pub errors: Vec<String>,
    pub test_counts: Option<TestCounts>,
    pub coverage: Option<f64>,
    pub code_quality: Option<f64>,
}

#[async_trait]
pub trait Tester: Send + Sync {
    /// Runs checkout -> install -> lint -> test -> build against `branch_name`,
    /// each step under its own timeout (install 5m, lint 2m, test 5m, build 5m).
    async fn run(&self, repository: &str, branch_name: &str) -> anyhow::Result<TestRunResult>;
}
