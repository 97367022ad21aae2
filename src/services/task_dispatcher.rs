//! Task Dispatcher (§4.5) — turns a planned or single-agent orchestration
//! into dispatched Cloud Agents, and reacts to subtask completion by
//! launching successors under each mode's concurrency rule.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use super::model_validator::ModelValidator;
use super::repository_normalizer::normalize_repository;
use super::state_store::StateStore;
use super::task_planner;
use crate::domain::classification::ClassifiedError;
use crate::domain::models::{
    AgentRunStatus, AgentState, OrchestrationMode, OrchestrationOptions, PlanTask, TaskPlan, TaskSizePriority,
    WebhookConfig,
};
use crate::domain::ports::agent_client::CreateAgentRequest;
use crate::domain::ports::ExternalAgentClient;

pub struct StartOutcome {
    pub master_agent_id: String,
    pub task_plan: Option<TaskPlan>,
    pub tasks_total: u32,
}

#[derive(Debug, Default)]
pub struct CompletionOutcome {
    pub dispatched_task_ids: Vec<String>,
    pub master_completed: bool,
    /// Set when `status` was ERROR: the master was moved into an error
    /// state rather than having the task counted as done (§4.4 step 3/4).
    pub master_errored: bool,
}

pub struct TaskDispatcher {
    agent_client: Arc<dyn ExternalAgentClient>,
    states: Arc<StateStore>,
    model_validator: Arc<ModelValidator>,
    webhook: WebhookConfig,
    default_max_parallel_agents: u32,
}

impl TaskDispatcher {
    pub fn new(
        agent_client: Arc<dyn ExternalAgentClient>,
        states: Arc<StateStore>,
        model_validator: Arc<ModelValidator>,
        webhook: WebhookConfig,
        default_max_parallel_agents: u32,
    ) -> Self {
        Self { agent_client, states, model_validator, webhook, default_max_parallel_agents }
    }

    /// Chooses a dispatch branch based on `options.mode` and dispatches the
    /// initial wave of work. Returns the id under which this run's
    /// `AgentState` is tracked, plus the frozen plan for non-SINGLE_AGENT modes.
    pub async fn start_orchestration(
        &self,
        prompt: &str,
        repository: &str,
        ref_name: &str,
        api_key: &str,
        requested_model: Option<&str>,
        options: &OrchestrationOptions,
    ) -> Result<StartOutcome, ClassifiedError> {
        let repository = normalize_repository(repository);

        match options.mode {
            OrchestrationMode::SingleAgent => {
                let agent_id =
                    self.create_subagent_prompted(prompt, &repository, ref_name, api_key, requested_model, None).await?;

                let mut state =
                    AgentState::new_master(agent_id.clone(), prompt.to_string(), repository.clone(), options.mode, options.clone());
                state.last_analysis.ref_name = ref_name.to_string();
                state.last_analysis.model = requested_model.map(str::to_string);
                self.states.create(&state).await?;

                Ok(StartOutcome { master_agent_id: agent_id, task_plan: None, tasks_total: 1 })
            }
            OrchestrationMode::Pipeline | OrchestrationMode::Batch | OrchestrationMode::Auto => {
                let plan = task_planner::plan(prompt, options.task_size);
                let master_id = Uuid::new_v4().to_string();

                let mut state =
                    AgentState::new_master(master_id.clone(), prompt.to_string(), repository.clone(), options.mode, options.clone());
                state.last_analysis.ref_name = ref_name.to_string();
                state.last_analysis.model = requested_model.map(str::to_string);
                state.last_analysis.plan = Some(plan.clone());
                state.tasks_remaining = plan.tasks.iter().map(|t| t.id.clone()).collect();

                let tasks_total = plan.tasks.len() as u32;

                if plan.tasks.is_empty() {
                    // §8 boundary behavior: an empty plan on a non-SINGLE_AGENT
                    // mode completes immediately rather than stalling forever
                    // with nothing left to dispatch.
                    state.status = AgentRunStatus::Completed;
                    self.states.create(&state).await?;
                    return Ok(StartOutcome { master_agent_id: master_id, task_plan: Some(plan), tasks_total });
                }

                self.states.create(&state).await?;

                let max_parallel = initial_parallelism(options.mode, options, self.default_max_parallel_agents);
                let completed = HashSet::new();
                let excluded = HashSet::new();
                let initial: Vec<PlanTask> =
                    plan.ready_tasks(&completed, &excluded).into_iter().take(max_parallel as usize).cloned().collect();

                // §4.5: BATCH/AUTO/PIPELINE's initial wave is dispatched in
                // parallel (a single-element wave for PIPELINE), not awaited
                // one at a time.
                let dispatches = initial
                    .iter()
                    .map(|task| self.dispatch_and_record(&master_id, task, &repository, ref_name, api_key, requested_model, options));
                futures::future::join_all(dispatches).await;

                Ok(StartOutcome { master_agent_id: master_id, task_plan: Some(plan), tasks_total })
            }
        }
    }

    /// Dispatches `task`, records the resulting agent id on `master_id`'s
    /// state under `states`'s per-agent lock. Errors are logged; a single
    /// failed dispatch doesn't abort the rest of the wave.
    async fn dispatch_and_record(
        &self,
        master_id: &str,
        task: &PlanTask,
        repository: &str,
        ref_name: &str,
        api_key: &str,
        requested_model: Option<&str>,
        options: &OrchestrationOptions,
    ) {
        match self.create_subagent_prompted(&task_prompt(task, options), repository, ref_name, api_key, requested_model, Some(task))
            .await
        {
            Ok(agent_id) => {
                let task_id = task.id.clone();
                let result = self
                    .states
                    .update_with(master_id, move |s| {
                        s.last_analysis.current_agent_id.insert(task_id, agent_id);
                    })
                    .await;
                if let Err(err) = result {
                    tracing::warn!(master_id, task = %task.id, error = %err, "failed to record dispatched subagent");
                }
            }
            Err(err) => {
                tracing::warn!(master_id, task = %task.id, error = %err, "failed to dispatch subagent for task");
            }
        }
    }

    async fn create_subagent_prompted(
        &self,
        prompt: &str,
        repository: &str,
        ref_name: &str,
        api_key: &str,
        requested_model: Option<&str>,
        _task: Option<&PlanTask>,
    ) -> Result<String, ClassifiedError> {
        let resolution = self.model_validator.resolve(api_key, requested_model).await;
        if let Some(warning) = &resolution.warning {
            tracing::warn!(warning, "model resolution fell back to Auto mode");
        }

        let webhook_secret = (!self.webhook.secret.is_empty()).then(|| self.webhook.secret.clone());
        let request = CreateAgentRequest {
            prompt: prompt.to_string(),
            repository: repository.to_string(),
            ref_name: ref_name.to_string(),
            auto_create_pr: true,
            model: resolution.model,
            webhook_url: self.webhook.public_endpoint(),
            webhook_secret,
        };

        self.agent_client.create_agent(api_key, request).await.map(|created| created.id)
    }

    /// §4.5 `handle_task_completion` — runs entirely under `master_id`'s
    /// shard lock so the completed-tasks set, active-subagent set, and
    /// dispatch decisions form one atomic step.
    pub async fn handle_task_completion(
        &self,
        master_id: &str,
        completed_task_id: &str,
        subagent_id: &str,
        status: &str,
        repository: &str,
        ref_name: &str,
        api_key: &str,
    ) -> Result<CompletionOutcome, ClassifiedError> {
        let default_max_parallel = self.default_max_parallel_agents;
        let agent_client = self.agent_client.clone();
        let model_validator = self.model_validator.clone();
        let webhook = self.webhook.clone();
        let status = status.to_string();

        self.states
            .with_lock(master_id, move |repo| async move {
                let Some(mut state) = repo.get(master_id).await? else {
                    return Ok(CompletionOutcome::default());
                };

                state.last_analysis.current_agent_id.retain(|_, v| v != subagent_id);

                // §4.4 step 3/4: an ERRORed subagent must not be folded into
                // `tasks_completed` or have its dependents unblocked as if it
                // had succeeded — it puts the whole master into an error
                // state instead, mirroring the SINGLE_AGENT ERROR branch.
                if status == "ERROR" {
                    state.status = AgentRunStatus::Error;
                    repo.update(&state).await?;
                    return Ok(CompletionOutcome {
                        dispatched_task_ids: Vec::new(),
                        master_completed: false,
                        master_errored: true,
                    });
                }

                state.tasks_remaining.retain(|t| t != completed_task_id);
                if !state.tasks_completed.iter().any(|t| t == completed_task_id) {
                    state.tasks_completed.push(completed_task_id.to_string());
                }

                let mode = state.last_analysis.mode;
                let options = state.last_analysis.options.clone();
                let model = state.last_analysis.model.clone();
                let active_count = state.last_analysis.current_agent_id.len() as u32;
                let max_parallel = initial_parallelism(mode, &options, default_max_parallel);

                let completed: HashSet<String> = state.tasks_completed.iter().cloned().collect();
                let excluded: HashSet<String> = state.last_analysis.current_agent_id.keys().cloned().collect();

                let next_tasks: Vec<PlanTask> = state
                    .last_analysis
                    .plan
                    .as_ref()
                    .map(|plan| {
                        let take = match mode {
                            OrchestrationMode::Pipeline => 1,
                            _ => max_parallel.saturating_sub(active_count) as usize,
                        };
                        plan.ready_tasks(&completed, &excluded).into_iter().take(take).cloned().collect()
                    })
                    .unwrap_or_default();

                let mut dispatched_task_ids = Vec::new();
                for task in &next_tasks {
                    let prompt = task_prompt(task, &options);
                    let resolution = model_validator.resolve(api_key, model.as_deref()).await;
                    let webhook_secret = (!webhook.secret.is_empty()).then(|| webhook.secret.clone());
                    let request = CreateAgentRequest {
                        prompt,
                        repository: repository.to_string(),
                        ref_name: ref_name.to_string(),
                        auto_create_pr: true,
                        model: resolution.model,
                        webhook_url: webhook.public_endpoint(),
                        webhook_secret,
                    };

                    match agent_client.create_agent(api_key, request).await {
                        Ok(created) => {
                            state.last_analysis.current_agent_id.insert(task.id.clone(), created.id);
                            dispatched_task_ids.push(task.id.clone());
                        }
                        Err(err) => {
                            tracing::warn!(master_id, task = %task.id, error = %err, "failed to dispatch successor task");
                        }
                    }
                }

                let master_completed =
                    state.tasks_remaining.is_empty() && state.last_analysis.current_agent_id.is_empty();
                if master_completed {
                    state.status = AgentRunStatus::Completed;
                }

                repo.update(&state).await?;

                Ok(CompletionOutcome { dispatched_task_ids, master_completed, master_errored: false })
            })
            .await
    }
}

fn initial_parallelism(mode: OrchestrationMode, options: &OrchestrationOptions, default_max_parallel: u32) -> u32 {
    match mode {
        OrchestrationMode::Pipeline => 1,
        _ => options.max_parallel_agents.unwrap_or(default_max_parallel),
    }
}

/// Builds a per-task prompt: title, description, priority, complexity, a
/// standard completion footer, plus any option-derived additions (§4.5).
fn task_prompt(task: &PlanTask, options: &OrchestrationOptions) -> String {
    let mut prompt = format!(
        "Task: {}\n\n{}\n\nPriority: {}\nEstimated complexity: {}/10\n\n\
Complete this task fully. Write and run tests for your changes. Follow the project's existing conventions and best practices. Do not introduce breaking changes.",
        task.title, task.description, task.priority.as_str(), task.estimated_complexity,
    );

    if options.enable_auto_fix {
        prompt.push_str("\nAutomatically fix any errors you encounter while completing this task.");
    }
    if options.enable_testing {
        prompt.push_str("\nRun the full test suite before considering this task complete.");
    }
    if options.enable_validation {
        prompt.push_str("\nValidate your changes against the task's acceptance criteria before finishing.");
    }
    if let Some(priority) = options.priority {
        let hint = match priority {
            TaskSizePriority::Speed => "Optimize for speed of delivery.",
            TaskSizePriority::Quality => "Optimize for code quality over speed.",
            TaskSizePriority::Balanced => "Balance speed of delivery and code quality.",
        };
        prompt.push('\n');
        prompt.push_str(hint);
    }

    prompt
}
