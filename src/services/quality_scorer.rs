//! Quality Scorer (§4.7) — deterministic completion-readiness score out of
//! 100, gating the Orchestrator's COMPLETE decision (§4.4).

use crate::domain::models::{Grade, QualityBreakdown, QualityInputs};

pub fn score(inputs: &QualityInputs) -> QualityBreakdown {
    let iterations_score = iterations_component(inputs);
    let tests_score = tests_component(inputs);
    let errors_score = errors_component(inputs);
    let quality_score = quality_component(inputs);

    let total = iterations_score + tests_score + errors_score + quality_score;
    let grade = Grade::from_score(total);
    let recommendations = recommendations(iterations_score, tests_score, errors_score, quality_score);

    QualityBreakdown { iterations_score, tests_score, errors_score, quality_score, total, grade, recommendations }
}

fn iterations_component(inputs: &QualityInputs) -> u32 {
    if inputs.max_iterations == 0 {
        return 0;
    }
    let ratio = inputs.iterations as f64 / inputs.max_iterations as f64;
    if ratio == 0.0 {
        0
    } else if ratio <= 0.2 {
        25
    } else if ratio <= 0.4 {
        20
    } else if ratio <= 0.6 {
        15
    } else if ratio <= 0.8 {
        10
    } else {
        5
    }
}

fn tests_component(inputs: &QualityInputs) -> u32 {
    if inputs.tests_total == 0 {
        15
    } else {
        (30.0 * inputs.tests_passed as f64 / inputs.tests_total as f64).round() as u32
    }
}

fn errors_component(inputs: &QualityInputs) -> u32 {
    if inputs.errors_total == 0 {
        25
    } else {
        (25.0 * inputs.errors_fixed as f64 / inputs.errors_total as f64).round() as u32
    }
}

fn quality_component(inputs: &QualityInputs) -> u32 {
    let code_quality_bonus = inputs.code_quality.unwrap_or(0.0) / 100.0 * 10.0;
    let coverage_bonus = inputs.test_coverage.unwrap_or(0.0) / 100.0 * 10.0;
    (10.0 + code_quality_bonus + coverage_bonus).clamp(0.0, 20.0).round() as u32
}

fn recommendations(iterations_score: u32, tests_score: u32, errors_score: u32, quality_score: u32) -> Vec<String> {
    let mut recs = Vec::new();
    if iterations_score < 15 {
        recs.push("Task required many iterations; consider breaking it into smaller units.".to_string());
    }
    if tests_score < 15 {
        recs.push("Test pass rate is low; review failing tests before completing.".to_string());
    }
    if errors_score < 15 {
        recs.push("Most encountered errors remain unfixed; investigate before completing.".to_string());
    }
    if quality_score < 15 {
        recs.push("Code quality and coverage signals are weak; consider a refinement pass.".to_string());
    }
    recs
}
