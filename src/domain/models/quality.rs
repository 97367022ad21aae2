//! Quality score input/output types (§4.7). The scoring algorithm itself
//! lives in `services::quality_scorer` — this module only defines the data.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityInputs {
    pub iterations: u32,
    pub max_iterations: u32,
    pub tests_passed: u32,
    pub tests_total: u32,
    pub errors_fixed: u32,
    pub errors_total: u32,
    pub code_quality: Option<f64>,
    pub test_coverage: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: u32) -> Self {
        match score {
            90..=u32::MAX => Self::A,
            80..=89 => Self::B,
            70..=79 => Self::C,
            60..=69 => Self::D,
            _ => Self::F,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityBreakdown {
    pub iterations_score: u32,
    pub tests_score: u32,
    pub errors_score: u32,
    pub quality_score: u32,
    pub total: u32,
    pub grade: Grade,
    pub recommendations: Vec<String>,
}

impl QualityBreakdown {
    pub fn meets_threshold(&self, threshold: u32) -> bool {
        self.total >= threshold
    }
}
