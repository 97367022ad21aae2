//! TaskPlan — a frozen DAG of subtasks produced once by the Task Planner
//! and stored verbatim on the owning orchestration/agent state.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanPriority {
    Low,
    Medium,
    High,
}

impl PlanPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// A single node in the task plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: PlanPriority,
    pub estimated_complexity: u32,
    pub dependencies: Vec<String>,
}

/// The frozen output of a single planning pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub project_description: String,
    pub tasks: Vec<PlanTask>,
}

#[derive(Debug, thiserror::Error)]
pub enum TaskPlanError {
    #[error("task plan references unknown dependency id: {0}")]
    UnknownDependency(String),
    #[error("task plan dependency graph contains a cycle")]
    Cycle,
    #[error("task plan contains duplicate task id: {0}")]
    DuplicateId(String),
}

impl TaskPlan {
    pub fn empty(project_description: impl Into<String>) -> Self {
        Self {
            project_description: project_description.into(),
            tasks: Vec::new(),
        }
    }

    /// Validate that every dependency id exists and the graph is acyclic.
    pub fn validate(&self) -> Result<(), TaskPlanError> {
        let mut seen = HashSet::new();
        for t in &self.tasks {
            if !seen.insert(t.id.clone()) {
                return Err(TaskPlanError::DuplicateId(t.id.clone()));
            }
        }
        let ids: HashSet<&str> = self.tasks.iter().map(|t| t.id.as_str()).collect();
        for t in &self.tasks {
            for dep in &t.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(TaskPlanError::UnknownDependency(dep.clone()));
                }
            }
        }
        if self.has_cycle() {
            return Err(TaskPlanError::Cycle);
        }
        Ok(())
    }

    fn has_cycle(&self) -> bool {
        let by_id: HashMap<&str, &PlanTask> = self.tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut state: HashMap<&str, u8> = HashMap::new(); // 0=unvisited,1=visiting,2=done

        fn visit<'a>(
            id: &'a str,
            by_id: &HashMap<&'a str, &'a PlanTask>,
            state: &mut HashMap<&'a str, u8>,
        ) -> bool {
            match state.get(id) {
                Some(1) => return true,
                Some(2) => return false,
                _ => {}
            }
            state.insert(id, 1);
            if let Some(task) = by_id.get(id) {
                for dep in &task.dependencies {
                    if visit(dep.as_str(), by_id, state) {
                        return true;
                    }
                }
            }
            state.insert(id, 2);
            false
        }

        for t in &self.tasks {
            if visit(&t.id, &by_id, &mut state) {
                return true;
            }
        }
        false
    }

    /// Tasks whose dependencies are all present in `completed`, and which are
    /// not already in `completed` or `excluded` (e.g. already dispatched).
    pub fn ready_tasks<'a>(&'a self, completed: &HashSet<String>, excluded: &HashSet<String>) -> Vec<&'a PlanTask> {
        self.tasks
            .iter()
            .filter(|t| !completed.contains(&t.id) && !excluded.contains(&t.id))
            .filter(|t| t.dependencies.iter().all(|d| completed.contains(d)))
            .collect()
    }

    /// Topological order, used only to sanity-check plan shape in tests.
    pub fn topological_order(&self) -> Vec<String> {
        let mut indegree: HashMap<&str, usize> = self.tasks.iter().map(|t| (t.id.as_str(), 0)).collect();
        for t in &self.tasks {
            for _dep in &t.dependencies {
                *indegree.get_mut(t.id.as_str()).unwrap() += 1;
            }
        }
        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::new();
        let mut completed: HashSet<String> = HashSet::new();
        while let Some(id) = queue.pop_front() {
            order.push(id.to_string());
            completed.insert(id.to_string());
            for t in &self.tasks {
                if t.dependencies.iter().any(|d| d == id) && t.dependencies.iter().all(|d| completed.contains(d)) {
                    if !order.contains(&t.id) && !queue.contains(&t.id.as_str()) {
                        queue.push_back(&t.id);
                    }
                }
            }
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> PlanTask {
        PlanTask {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            priority: PlanPriority::Medium,
            estimated_complexity: 1,
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn validates_linear_plan() {
        let plan = TaskPlan {
            project_description: "x".into(),
            tasks: vec![task("t1", &[]), task("t2", &["t1"]), task("t3", &["t2"])],
        };
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_dependency() {
        let plan = TaskPlan {
            project_description: "x".into(),
            tasks: vec![task("t1", &["ghost"])],
        };
        assert!(matches!(plan.validate(), Err(TaskPlanError::UnknownDependency(_))));
    }

    #[test]
    fn rejects_cycle() {
        let plan = TaskPlan {
            project_description: "x".into(),
            tasks: vec![task("t1", &["t2"]), task("t2", &["t1"])],
        };
        assert!(matches!(plan.validate(), Err(TaskPlanError::Cycle)));
    }

    #[test]
    fn ready_tasks_respects_dependencies_and_exclusions() {
        let plan = TaskPlan {
            project_description: "x".into(),
            tasks: vec![task("t1", &[]), task("t2", &[]), task("t3", &["t1"])],
        };
        let completed = HashSet::new();
        let excluded: HashSet<String> = ["t2".to_string()].into_iter().collect();
        let ready: Vec<&str> = plan.ready_tasks(&completed, &excluded).into_iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ready, vec!["t1"]);
    }
}
