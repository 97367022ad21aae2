//! Task Planner — produces the frozen `TaskPlan` DAG consumed by the Task
//! Dispatcher's PIPELINE/BATCH/AUTO branches (§4.5).
//!
//! Deliberately rule-based rather than LLM-driven: §6.5 restricts the LLM
//! client's only use to the Analyzer, so decomposition here is a heuristic
//! line-based split with no cross-task dependencies — each task is
//! independently dispatchable, and the dispatcher's per-mode logic (take
//! one at a time for PIPELINE, up to the parallelism cap for BATCH/AUTO)
//! governs ordering rather than the plan's own dependency edges.

use regex::Regex;

use crate::domain::models::{PlanPriority, PlanTask, TaskPlan, TaskSizeHint};

/// Decompose `prompt` into a frozen task plan. `task_size_hint` adjusts the
/// base priority and estimated complexity assigned to each task.
pub fn plan(prompt: &str, task_size_hint: Option<TaskSizeHint>) -> TaskPlan {
    let items = split_into_items(prompt);
    let priority = base_priority(task_size_hint);

    let tasks = items
        .into_iter()
        .enumerate()
        .map(|(i, description)| {
            let title = summarize_title(&description);
            PlanTask {
                id: format!("task-{}", i + 1),
                title,
                estimated_complexity: estimate_complexity(&description, task_size_hint),
                description,
                priority,
                dependencies: Vec::new(),
            }
        })
        .collect();

    TaskPlan { project_description: prompt.trim().to_string(), tasks }
}

fn list_item_pattern() -> Regex {
    Regex::new(r"^(?:\d+[.)]|[-*])\s+(.*)$").unwrap()
}

/// Splits on numbered or bulleted list lines; falls back to a single task
/// covering the whole prompt when no such structure is present.
fn split_into_items(prompt: &str) -> Vec<String> {
    let pattern = list_item_pattern();
    let items: Vec<String> = prompt
        .lines()
        .filter_map(|line| pattern.captures(line.trim()).map(|c| c[1].trim().to_string()))
        .filter(|s| !s.is_empty())
        .collect();

    if items.is_empty() {
        vec![prompt.trim().to_string()]
    } else {
        items
    }
}

fn summarize_title(description: &str) -> String {
    const MAX_TITLE_CHARS: usize = 60;
    let first_sentence = description.split(['.', '\n']).next().unwrap_or(description).trim();
    if first_sentence.chars().count() <= MAX_TITLE_CHARS {
        first_sentence.to_string()
    } else {
        let truncated: String = first_sentence.chars().take(MAX_TITLE_CHARS).collect();
        format!("{}...", truncated.trim_end())
    }
}

fn base_priority(hint: Option<TaskSizeHint>) -> PlanPriority {
    match hint {
        Some(TaskSizeHint::Large) => PlanPriority::High,
        Some(TaskSizeHint::Small) => PlanPriority::Low,
        _ => PlanPriority::Medium,
    }
}

fn estimate_complexity(description: &str, hint: Option<TaskSizeHint>) -> u32 {
    let base = match hint {
        Some(TaskSizeHint::Small) => 1,
        Some(TaskSizeHint::Large) => 5,
        _ => 3,
    };
    let length_bonus = (description.chars().count() / 200) as u32;
    (base + length_bonus).min(10)
}
