//! Orchestrator (§4.4) — the event reducer. Consumes a status-change event
//! for some `agent_id` and decides what happens next: route it to the Task
//! Dispatcher when it belongs to a PIPELINE/BATCH/AUTO subagent, or run the
//! analyze/decide/execute loop directly when it belongs to a master or a
//! standalone SINGLE_AGENT run.

use std::sync::Arc;

use uuid::Uuid;

use super::analyzer::{AnalysisDecision, Analyzer, AnalyzerAction};
use super::quality_scorer;
use super::state_store::StateStore;
use super::task_dispatcher::{StartOutcome, TaskDispatcher};
use crate::domain::classification::ClassifiedError;
use crate::domain::models::{
    AgentRunStatus, AgentState, Event, EventLevel, OrchestrationOptions, QualityInputs,
};
use crate::domain::ports::tester::TestRunResult;
use crate::domain::ports::{EventRepository, ExternalAgentClient, OrchestrationRepository, Tester};

pub struct Orchestrator {
    orchestrations: Arc<dyn OrchestrationRepository>,
    events: Arc<dyn EventRepository>,
    states: Arc<StateStore>,
    agent_client: Arc<dyn ExternalAgentClient>,
    analyzer: Arc<Analyzer>,
    dispatcher: Arc<TaskDispatcher>,
    tester: Option<Arc<dyn Tester>>,
    default_api_key: String,
    max_iterations: u32,
    quality_threshold: u32,
}

/// Outcome of the part of the reducer step that runs before the external
/// network calls, decided entirely under the agent's shard lock.
enum StepResult {
    UnknownAgent,
    MaxIterationsReached,
    FetchFailed,
    Decided { state: AgentState, decision: AnalysisDecision, pr_url: Option<String> },
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        orchestrations: Arc<dyn OrchestrationRepository>,
        events: Arc<dyn EventRepository>,
        states: Arc<StateStore>,
        agent_client: Arc<dyn ExternalAgentClient>,
        analyzer: Arc<Analyzer>,
        dispatcher: Arc<TaskDispatcher>,
        tester: Option<Arc<dyn Tester>>,
        default_api_key: String,
        max_iterations: u32,
        quality_threshold: u32,
    ) -> Self {
        Self {
            orchestrations,
            events,
            states,
            agent_client,
            analyzer,
            dispatcher,
            tester,
            default_api_key,
            max_iterations,
            quality_threshold,
        }
    }

    /// Thin delegate to the Task Dispatcher, called by the Outbox Processor
    /// for `start-orchestration` jobs. The orchestration row's own
    /// running/started bookkeeping belongs to the caller, which already
    /// holds that job's orchestration id.
    pub async fn start(
        &self,
        prompt: &str,
        repository: &str,
        ref_name: &str,
        api_key: &str,
        model: Option<&str>,
        options: &OrchestrationOptions,
    ) -> Result<StartOutcome, ClassifiedError> {
        self.dispatcher.start_orchestration(prompt, repository, ref_name, api_key, model, options).await
    }

    /// §4.4 reducer entry point, shared by the Outbox Processor's
    /// `process-webhook` jobs and the Broker Worker.
    pub async fn process_event(
        &self,
        agent_id: &str,
        status: &str,
        repository: Option<&str>,
        ref_name: Option<&str>,
        branch_name: Option<&str>,
        pr_url: Option<&str>,
        summary: Option<&str>,
    ) -> Result<(), ClassifiedError> {
        if let Some(master) = self.states.find_master_by_subagent(agent_id).await? {
            let Some(task_id) = master.is_subagent_of_master(agent_id) else {
                return Ok(());
            };

            return match master.last_analysis.mode {
                crate::domain::models::OrchestrationMode::SingleAgent => {
                    // SINGLE_AGENT masters never dispatch subagents in this
                    // implementation (the agent created at start *is* the
                    // master), so this path is unreachable in practice; if it
                    // ever is reached, treat it like any other master event.
                    self.run_master_loop(&master.agent_id, status, branch_name, pr_url, summary).await
                }
                _ => {
                    self.handle_subagent_event(&master.agent_id, &task_id, agent_id, status, repository, ref_name)
                        .await
                }
            };
        }

        match self.states.get(agent_id).await? {
            Some(_) => self.run_master_loop(agent_id, status, branch_name, pr_url, summary).await,
            None => {
                tracing::warn!(agent_id, "process_event: unknown agent id, no action taken");
                Ok(())
            }
        }
    }

    async fn handle_subagent_event(
        &self,
        master_id: &str,
        task_id: &str,
        subagent_id: &str,
        status: &str,
        repository: Option<&str>,
        ref_name: Option<&str>,
    ) -> Result<(), ClassifiedError> {
        let orchestration_id = self.orchestration_id_for(master_id).await;
        let repository = repository.unwrap_or_default();
        let ref_name = ref_name.unwrap_or("main");

        match self
            .dispatcher
            .handle_task_completion(master_id, task_id, subagent_id, status, repository, ref_name, &self.default_api_key)
            .await
        {
            Ok(outcome) => {
                if outcome.master_errored {
                    self.emit(
                        orchestration_id,
                        EventLevel::Error,
                        "task_failed",
                        format!("task {task_id} failed on subagent {subagent_id}; master {master_id} marked errored"),
                    )
                    .await;
                    if let Some(oid) = orchestration_id {
                        if let Ok(Some(mut orchestration)) = self.orchestrations.get(oid).await {
                            orchestration.mark_error("AGENT_ERROR", format!("subagent {subagent_id} reported ERROR for task {task_id}"), "reported by remote agent webhook");
                            self.orchestrations.update(&orchestration).await.ok();
                        }
                    }
                    return Ok(());
                }

                self.emit(
                    orchestration_id,
                    EventLevel::Info,
                    "task_completed",
                    format!(
                        "task {task_id} ({status}) completed by {subagent_id}; dispatched {:?}",
                        outcome.dispatched_task_ids
                    ),
                )
                .await;

                if outcome.master_completed {
                    self.finish_orchestration(orchestration_id).await;
                    self.emit(orchestration_id, EventLevel::Info, "master_completed", format!("master {master_id} has no remaining or active tasks")).await;
                }
                Ok(())
            }
            Err(err) => {
                tracing::warn!(master_id, task_id, error = %err, "handle_task_completion failed");
                self.emit(orchestration_id, EventLevel::Error, "task_completion_failed", err.to_string()).await;
                Ok(())
            }
        }
    }

    async fn run_master_loop(
        &self,
        agent_id: &str,
        status: &str,
        branch_name: Option<&str>,
        pr_url: Option<&str>,
        summary: Option<&str>,
    ) -> Result<(), ClassifiedError> {
        let orchestration_id = self.orchestration_id_for(agent_id).await;

        if status == "ERROR" {
            self.states.update_with(agent_id, |s| s.status = AgentRunStatus::Error).await?;
            self.emit(
                orchestration_id,
                EventLevel::Error,
                "agent_error",
                format!("agent {agent_id} reported ERROR: {}", summary.unwrap_or("no summary provided")),
            )
            .await;
            if let Some(oid) = orchestration_id {
                if let Ok(Some(mut orchestration)) = self.orchestrations.get(oid).await {
                    orchestration.mark_error("AGENT_ERROR", summary.unwrap_or("agent reported ERROR"), "reported by remote agent webhook");
                    self.orchestrations.update(&orchestration).await.ok();
                }
            }
            return Ok(());
        }

        let branch_name = branch_name.map(str::to_string);
        let pr_url = pr_url.map(str::to_string);
        let max_iterations = self.max_iterations;
        let agent_client = self.agent_client.clone();
        let analyzer = self.analyzer.clone();
        let default_api_key = self.default_api_key.clone();

        let step = self
            .states
            .with_lock(agent_id, move |repo| async move {
                let Some(mut state) = repo.get(agent_id).await? else {
                    return Ok::<StepResult, crate::domain::errors::DomainError>(StepResult::UnknownAgent);
                };

                state.iterations += 1;
                if let Some(branch) = &branch_name {
                    state.branch_name = Some(branch.clone());
                }

                if state.iterations >= max_iterations {
                    state.status = AgentRunStatus::MaxIterationsReached;
                    repo.update(&state).await?;
                    return Ok(StepResult::MaxIterationsReached);
                }

                let conversation = agent_client.get_conversation(&default_api_key, agent_id).await;
                let agent_status = agent_client.get_agent(&default_api_key, agent_id).await;
                let (conversation, agent_status) = match (conversation, agent_status) {
                    (Ok(c), Ok(s)) => (c, s),
                    _ => {
                        repo.update(&state).await?;
                        return Ok(StepResult::FetchFailed);
                    }
                };

                let model = state.last_analysis.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
                let decision = analyzer.analyze(&model, &conversation, &agent_status, &state).await;

                state.tasks_completed = decision.tasks_completed.clone();
                state.tasks_remaining = decision.tasks_remaining.clone();
                state.last_analysis.action = Some(format!("{:?}", decision.action));
                state.last_analysis.reasoning = Some(decision.reasoning.clone());
                state.last_analysis.confidence = Some(decision.confidence);

                repo.update(&state).await?;

                let pr_url = pr_url.or_else(|| agent_status.target.as_ref().and_then(|t| t.pr_url.clone()));
                Ok(StepResult::Decided { state, decision, pr_url })
            })
            .await?;

        match step {
            StepResult::UnknownAgent => Ok(()),
            StepResult::MaxIterationsReached => {
                self.emit(orchestration_id, EventLevel::Warn, "iteration_limit", format!("agent {agent_id} reached max iterations ({max_iterations})")).await;
                if let Some(oid) = orchestration_id {
                    if let Ok(Some(mut orchestration)) = self.orchestrations.get(oid).await {
                        orchestration.mark_error("MAX_ITERATIONS_REACHED", "agent exceeded the iteration budget", "no terminal decision reached before the iteration limit");
                        self.orchestrations.update(&orchestration).await.ok();
                    }
                }
                Ok(())
            }
            StepResult::FetchFailed => {
                self.emit(orchestration_id, EventLevel::Warn, "fetch_failed", format!("failed to fetch conversation/status for {agent_id}")).await;
                Ok(())
            }
            StepResult::Decided { state, decision, pr_url } => {
                self.emit(orchestration_id, EventLevel::Info, "analysis", format!("{:?}: {}", decision.action, decision.reasoning)).await;
                self.execute_decision(agent_id, orchestration_id, &state, &decision, pr_url.as_deref()).await
            }
        }
    }

    async fn execute_decision(
        &self,
        agent_id: &str,
        orchestration_id: Option<Uuid>,
        state: &AgentState,
        decision: &AnalysisDecision,
        _pr_url: Option<&str>,
    ) -> Result<(), ClassifiedError> {
        match decision.action {
            AnalyzerAction::Continue | AnalyzerAction::Fix => {
                let message = decision.followup_message.clone().unwrap_or_else(|| "Please continue working on the task.".to_string());
                if let Err(err) = self.agent_client.send_followup(&self.default_api_key, agent_id, &message).await {
                    tracing::warn!(agent_id, error = %err, "follow-up send failed");
                }
                Ok(())
            }
            AnalyzerAction::Test => {
                let Some(branch) = &state.branch_name else {
                    self.emit(orchestration_id, EventLevel::Warn, "test_skipped", "TEST decision with no known branch name, skipping").await;
                    return Ok(());
                };
                let Some(tester) = &self.tester else {
                    self.emit(orchestration_id, EventLevel::Warn, "test_skipped", "TEST decision but no tester is configured, skipping").await;
                    return Ok(());
                };

                match tester.run(&state.repository, branch).await {
                    Ok(result) if result.success => {
                        self.attempt_completion(agent_id, orchestration_id, state, Some(&result)).await
                    }
                    Ok(result) => {
                        let message = if result.errors.is_empty() {
                            "Tests failed. Please investigate and fix the failures, then continue.".to_string()
                        } else {
                            format!("Tests failed. Please fix the following and try again:\n{}", result.errors.join("\n"))
                        };
                        self.agent_client.send_followup(&self.default_api_key, agent_id, &message).await.ok();
                        Ok(())
                    }
                    Err(err) => {
                        tracing::warn!(agent_id, error = %err, "tester invocation failed");
                        self.emit(orchestration_id, EventLevel::Warn, "test_failed_to_run", err.to_string()).await;
                        Ok(())
                    }
                }
            }
            AnalyzerAction::Complete => self.attempt_completion(agent_id, orchestration_id, state, None).await,
        }
    }

    /// Shared COMPLETE gate for both the TEST-then-success path and a direct
    /// COMPLETE decision. Inputs default to neutral (0 tests/errors) absent a
    /// fresh `TestRunResult`, per the scorer's own neutral-score convention.
    async fn attempt_completion(
        &self,
        agent_id: &str,
        orchestration_id: Option<Uuid>,
        state: &AgentState,
        test_result: Option<&TestRunResult>,
    ) -> Result<(), ClassifiedError> {
        let counts = test_result.and_then(|r| r.test_counts.as_ref());
        let inputs = QualityInputs {
            iterations: state.iterations,
            max_iterations: self.max_iterations,
            tests_passed: counts.map(|c| c.passed).unwrap_or(0),
            tests_total: counts.map(|c| c.total).unwrap_or(0),
            errors_fixed: 0,
            errors_total: 0,
            code_quality: test_result.and_then(|r| r.code_quality),
            test_coverage: test_result.and_then(|r| r.coverage),
        };
        let breakdown = quality_scorer::score(&inputs);

        if breakdown.meets_threshold(self.quality_threshold) {
            self.states
                .update_with(agent_id, |s| {
                    s.status = AgentRunStatus::Completed;
                    s.last_analysis.quality_score = Some(breakdown.total);
                })
                .await?;
            self.emit(
                orchestration_id,
                EventLevel::Info,
                "completed",
                format!("quality score {} ({}), marking completed", breakdown.total, breakdown.grade.as_str()),
            )
            .await;
            self.finish_orchestration(orchestration_id).await;
        } else {
            self.states
                .update_with(agent_id, |s| {
                    s.last_analysis.quality_score = Some(breakdown.total);
                    s.last_analysis.needs_refinement = true;
                })
                .await?;
            let message = format!(
                "Quality score {}/100 ({}) is below the completion threshold of {}. Recommendations:\n{}",
                breakdown.total,
                breakdown.grade.as_str(),
                self.quality_threshold,
                breakdown.recommendations.join("\n")
            );
            self.agent_client.send_followup(&self.default_api_key, agent_id, &message).await.ok();
            self.emit(orchestration_id, EventLevel::Info, "refinement", format!("quality score {} below threshold, requested refinement", breakdown.total)).await;
        }
        Ok(())
    }

    async fn finish_orchestration(&self, orchestration_id: Option<Uuid>) {
        let Some(oid) = orchestration_id else { return };
        if let Ok(Some(mut orchestration)) = self.orchestrations.get(oid).await {
            orchestration.tasks_completed = orchestration.tasks_total;
            orchestration.mark_completed();
            self.orchestrations.update(&orchestration).await.ok();
        }
    }

    async fn orchestration_id_for(&self, master_agent_id: &str) -> Option<Uuid> {
        self.orchestrations.find_by_master_agent_id(master_agent_id).await.ok().flatten().map(|o| o.id)
    }

    async fn emit(&self, orchestration_id: Option<Uuid>, level: EventLevel, step_key: &str, message: impl Into<String>) {
        let Some(oid) = orchestration_id else { return };
        let event = Event::new(oid, level, step_key, None, message, None);
        if let Err(err) = self.events.append(&event).await {
            tracing::warn!(error = %err, "failed to append event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::classification::ClassifiedOutcome;
    use crate::domain::models::{OrchestrationMode, OrchestrationOptions, OrchestrationStatus, WebhookConfig};
    use crate::domain::ports::agent_client::*;
    use crate::domain::ports::llm_client::{ChatRequest, LlmClient};
    use crate::domain::ports::{AgentStateRepository, EventRepository as _};
    use crate::services::model_validator::ModelValidator;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct StubClient {
        conversation: Conversation,
        status: AgentStatusResponse,
        followups: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ExternalAgentClient for StubClient {
        async fn create_agent(&self, _api_key: &str, _request: CreateAgentRequest) -> ClassifiedOutcome<CreatedAgent> {
            unimplemented!()
        }
        async fn get_agent(&self, _api_key: &str, _agent_id: &str) -> ClassifiedOutcome<AgentStatusResponse> {
            Ok(self.status.clone())
        }
        async fn get_conversation(&self, _api_key: &str, _agent_id: &str) -> ClassifiedOutcome<Conversation> {
            Ok(self.conversation.clone())
        }
        async fn send_followup(&self, _api_key: &str, _agent_id: &str, text: &str) -> ClassifiedOutcome<()> {
            self.followups.lock().unwrap().push(text.to_string());
            Ok(())
        }
        async fn stop_agent(&self, _api_key: &str, _agent_id: &str) -> ClassifiedOutcome<()> {
            Ok(())
        }
        async fn delete_agent(&self, _api_key: &str, _agent_id: &str) -> ClassifiedOutcome<()> {
            Ok(())
        }
        async fn list_models(&self, _api_key: &str) -> ClassifiedOutcome<Vec<String>> {
            Ok(vec![])
        }
        async fn list_repositories(&self, _api_key: &str) -> ClassifiedOutcome<Vec<RepositoryInfo>> {
            Ok(vec![])
        }
    }

    struct StubLlm {
        response: String,
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn complete(&self, _request: ChatRequest) -> anyhow::Result<String> {
            Ok(self.response.clone())
        }
    }

    #[derive(Default)]
    struct InMemoryStates {
        states: StdMutex<HashMap<String, AgentState>>,
    }

    #[async_trait]
    impl AgentStateRepository for InMemoryStates {
        async fn create(&self, state: &AgentState) -> crate::domain::errors::DomainResult<()> {
            self.states.lock().unwrap().insert(state.agent_id.clone(), state.clone());
            Ok(())
        }
        async fn get(&self, agent_id: &str) -> crate::domain::errors::DomainResult<Option<AgentState>> {
            Ok(self.states.lock().unwrap().get(agent_id).cloned())
        }
        async fn update(&self, state: &AgentState) -> crate::domain::errors::DomainResult<()> {
            self.states.lock().unwrap().insert(state.agent_id.clone(), state.clone());
            Ok(())
        }
        async fn find_master_by_subagent(&self, subagent_id: &str) -> crate::domain::errors::DomainResult<Option<AgentState>> {
            Ok(self.states.lock().unwrap().values().find(|s| s.is_subagent_of_master(subagent_id).is_some()).cloned())
        }
        async fn list_active(&self) -> crate::domain::errors::DomainResult<Vec<AgentState>> {
            Ok(self.states.lock().unwrap().values().filter(|s| s.status == AgentRunStatus::Active).cloned().collect())
        }
        async fn list_by_status(&self, status: AgentRunStatus) -> crate::domain::errors::DomainResult<Vec<AgentState>> {
            Ok(self.states.lock().unwrap().values().filter(|s| s.status == status).cloned().collect())
        }
    }

    #[derive(Default)]
    struct InMemoryOrchestrations {
        rows: StdMutex<HashMap<Uuid, crate::domain::models::Orchestration>>,
    }

    #[async_trait]
    impl OrchestrationRepository for InMemoryOrchestrations {
        async fn create(&self, orchestration: &crate::domain::models::Orchestration) -> crate::domain::errors::DomainResult<()> {
            self.rows.lock().unwrap().insert(orchestration.id, orchestration.clone());
            Ok(())
        }
        async fn get(&self, id: Uuid) -> crate::domain::errors::DomainResult<Option<crate::domain::models::Orchestration>> {
            Ok(self.rows.lock().unwrap().get(&id).cloned())
        }
        async fn update(&self, orchestration: &crate::domain::models::Orchestration) -> crate::domain::errors::DomainResult<()> {
            self.rows.lock().unwrap().insert(orchestration.id, orchestration.clone());
            Ok(())
        }
        async fn list_by_status(&self, status: OrchestrationStatus) -> crate::domain::errors::DomainResult<Vec<crate::domain::models::Orchestration>> {
            Ok(self.rows.lock().unwrap().values().filter(|o| o.status == status).cloned().collect())
        }
        async fn find_by_master_agent_id(&self, master_agent_id: &str) -> crate::domain::errors::DomainResult<Option<crate::domain::models::Orchestration>> {
            Ok(self.rows.lock().unwrap().values().find(|o| o.master_agent_id.as_deref() == Some(master_agent_id)).cloned())
        }
    }

    #[derive(Default)]
    struct InMemoryEvents {
        rows: StdMutex<Vec<Event>>,
    }

    #[async_trait]
    impl EventRepository for InMemoryEvents {
        async fn append(&self, event: &Event) -> crate::domain::errors::DomainResult<()> {
            self.rows.lock().unwrap().push(event.clone());
            Ok(())
        }
        async fn list_for_orchestration(&self, orchestration_id: Uuid) -> crate::domain::errors::DomainResult<Vec<Event>> {
            Ok(self.rows.lock().unwrap().iter().filter(|e| e.orchestration_id == orchestration_id).cloned().collect())
        }
    }

    fn orchestrator(client: Arc<StubClient>, llm_response: &str) -> (Orchestrator, Arc<InMemoryStates>, Arc<InMemoryOrchestrations>) {
        let states_repo = Arc::new(InMemoryStates::default());
        let states = Arc::new(StateStore::new(states_repo.clone()));
        let orchestrations = Arc::new(InMemoryOrchestrations::default());
        let events = Arc::new(InMemoryEvents::default());
        let llm = Arc::new(StubLlm { response: llm_response.to_string() });
        let analyzer = Arc::new(Analyzer::new(llm));
        let model_validator = Arc::new(ModelValidator::new(client.clone()));
        let dispatcher = Arc::new(TaskDispatcher::new(client.clone(), states.clone(), model_validator, WebhookConfig::default(), 3));

        let orchestrator = Orchestrator::new(
            orchestrations.clone(),
            events,
            states.clone(),
            client,
            analyzer,
            dispatcher,
            None,
            "default-key".to_string(),
            20,
            70,
        );
        (orchestrator, states_repo, orchestrations)
    }

    #[tokio::test]
    async fn single_agent_master_finished_continue_sends_followup() {
        let c = Arc::new(StubClient {
            conversation: Conversation { messages: vec![] },
            status: AgentStatusResponse { id: "master-1".into(), status: "RUNNING".into(), target: None, summary: None },
            followups: StdMutex::new(Vec::new()),
        });
        let (orchestrator, states_repo, _orchestrations) = orchestrator(c.clone(), r#"{"action":"CONTINUE","reasoning":"keep going","confidence":0.8}"#);

        let mut state = AgentState::new_master("master-1".into(), "do the thing".into(), "owner/repo".into(), OrchestrationMode::SingleAgent, OrchestrationOptions::default());
        state.last_analysis.model = Some("gpt-4o-mini".into());
        states_repo.create(&state).await.unwrap();

        orchestrator.process_event("master-1", "FINISHED", None, None, None, None, None).await.unwrap();

        assert_eq!(c.followups.lock().unwrap().len(), 1);
        let updated = states_repo.get("master-1").await.unwrap().unwrap();
        assert_eq!(updated.iterations, 1);
    }

    #[tokio::test]
    async fn error_status_marks_master_error_without_calling_out() {
        let c = Arc::new(StubClient {
            conversation: Conversation { messages: vec![] },
            status: AgentStatusResponse { id: "master-1".into(), status: "RUNNING".into(), target: None, summary: None },
            followups: StdMutex::new(Vec::new()),
        });
        let (orchestrator, states_repo, _orchestrations) = orchestrator(c.clone(), "{}");

        let state = AgentState::new_master("master-1".into(), "do the thing".into(), "owner/repo".into(), OrchestrationMode::SingleAgent, OrchestrationOptions::default());
        states_repo.create(&state).await.unwrap();

        orchestrator.process_event("master-1", "ERROR", None, None, None, None, Some("boom")).await.unwrap();

        let updated = states_repo.get("master-1").await.unwrap().unwrap();
        assert_eq!(updated.status, AgentRunStatus::Error);
        assert!(c.followups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pipeline_subagent_error_marks_master_and_orchestration_errored() {
        let c = Arc::new(StubClient {
            conversation: Conversation { messages: vec![] },
            status: AgentStatusResponse { id: "master-1".into(), status: "RUNNING".into(), target: None, summary: None },
            followups: StdMutex::new(Vec::new()),
        });
        let (orchestrator, states_repo, orchestrations) = orchestrator(c.clone(), "{}");

        let mut state = AgentState::new_master(
            "master-1".into(),
            "do the thing".into(),
            "owner/repo".into(),
            OrchestrationMode::Pipeline,
            OrchestrationOptions::default(),
        );
        state.tasks_remaining = vec!["task-2".to_string()];
        state.last_analysis.current_agent_id.insert("task-1".to_string(), "sub-1".to_string());
        states_repo.create(&state).await.unwrap();

        let mut orchestration = crate::domain::models::Orchestration::new_queued(
            "do the thing".into(),
            "owner/repo".into(),
            "main".into(),
            None,
            OrchestrationOptions::default(),
        );
        orchestration.master_agent_id = Some("master-1".to_string());
        orchestrations.create(&orchestration).await.unwrap();

        orchestrator.process_event("sub-1", "ERROR", Some("owner/repo"), Some("main"), None, None, Some("boom")).await.unwrap();

        let updated = states_repo.get("master-1").await.unwrap().unwrap();
        assert_eq!(updated.status, AgentRunStatus::Error);
        // the failed task stays out of tasks_completed and no successor was dispatched
        assert!(!updated.tasks_completed.iter().any(|t| t == "task-1"));
        assert!(c.followups.lock().unwrap().is_empty());

        let updated_orchestration = orchestrations.get(orchestration.id).await.unwrap().unwrap();
        assert_eq!(updated_orchestration.status, OrchestrationStatus::Error);
        assert_eq!(updated_orchestration.error_code.as_deref(), Some("AGENT_ERROR"));
    }

    #[tokio::test]
    async fn max_iterations_reached_transitions_without_further_calls() {
        let c = Arc::new(StubClient {
            conversation: Conversation { messages: vec![] },
            status: AgentStatusResponse { id: "master-1".into(), status: "RUNNING".into(), target: None, summary: None },
            followups: StdMutex::new(Vec::new()),
        });
        let (orchestrator, states_repo, _orchestrations) = orchestrator(c.clone(), "{}");

        let mut state = AgentState::new_master("master-1".into(), "do the thing".into(), "owner/repo".into(), OrchestrationMode::SingleAgent, OrchestrationOptions::default());
        state.iterations = 19;
        states_repo.create(&state).await.unwrap();

        orchestrator.process_event("master-1", "FINISHED", None, None, None, None, None).await.unwrap();

        let updated = states_repo.get("master-1").await.unwrap().unwrap();
        assert_eq!(updated.status, AgentRunStatus::MaxIterationsReached);
        assert!(c.followups.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn complete_decision_above_threshold_marks_completed() {
        let c = Arc::new(StubClient {
            conversation: Conversation { messages: vec![] },
            status: AgentStatusResponse { id: "master-1".into(), status: "RUNNING".into(), target: None, summary: None },
            followups: StdMutex::new(Vec::new()),
        });
        let (orchestrator, states_repo, _orchestrations) = orchestrator(c.clone(), r#"{"action":"COMPLETE","reasoning":"done","confidence":0.9}"#);

        let state = AgentState::new_master("master-1".into(), "do the thing".into(), "owner/repo".into(), OrchestrationMode::SingleAgent, OrchestrationOptions::default());
        states_repo.create(&state).await.unwrap();

        orchestrator.process_event("master-1", "FINISHED", None, None, None, None, None).await.unwrap();

        let updated = states_repo.get("master-1").await.unwrap().unwrap();
        assert_eq!(updated.status, AgentRunStatus::Completed);
    }

    #[tokio::test]
    async fn complete_decision_below_threshold_requests_refinement() {
        let c = Arc::new(StubClient {
            conversation: Conversation { messages: vec![] },
            status: AgentStatusResponse { id: "master-1".into(), status: "RUNNING".into(), target: None, summary: None },
            followups: StdMutex::new(Vec::new()),
        });
        let (orchestrator, states_repo, _orchestrations) = orchestrator(c.clone(), r#"{"action":"COMPLETE","reasoning":"maybe done","confidence":0.4}"#);

        let mut state = AgentState::new_master("master-1".into(), "do the thing".into(), "owner/repo".into(), OrchestrationMode::SingleAgent, OrchestrationOptions::default());
        state.iterations = 18; // low iterations_score pulls the total below 70
        states_repo.create(&state).await.unwrap();

        orchestrator.process_event("master-1", "FINISHED", None, None, None, None, None).await.unwrap();

        let updated = states_repo.get("master-1").await.unwrap().unwrap();
        assert_eq!(updated.status, AgentRunStatus::Active);
        assert!(updated.last_analysis.needs_refinement);
        assert_eq!(c.followups.lock().unwrap().len(), 1);
    }
}
