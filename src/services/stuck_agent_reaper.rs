//! Stuck-Agent Reaper (§4.8) — a standalone timer loop distinct from the
//! outbox's own stuck-*job* reclaim sweep. Where the outbox reaper resets
//! abandoned queue rows back to pending, this one looks at `AgentState` rows
//! left `Active` long past `agent_timeout` (a Cloud Agent that silently
//! stopped posting webhooks) and retires them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::state_store::StateStore;
use crate::domain::models::AgentRunStatus;
use crate::domain::ports::ExternalAgentClient;

pub struct StuckAgentReaper {
    states: Arc<StateStore>,
    agent_client: Arc<dyn ExternalAgentClient>,
    api_key: String,
    agent_timeout: Duration,
    sweep_interval: Duration,
}

impl StuckAgentReaper {
    pub fn new(
        states: Arc<StateStore>,
        agent_client: Arc<dyn ExternalAgentClient>,
        api_key: String,
        agent_timeout: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self { states, agent_client, api_key, agent_timeout, sweep_interval }
    }

    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.sweep_interval);
        loop {
            ticker.tick().await;
            match self.sweep_once().await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "reaped timed-out agents"),
                Err(err) => tracing::warn!(error = %err, "stuck-agent reaper sweep failed"),
            }
        }
    }

    /// Stops and marks `Timeout` every `Active` agent whose state hasn't been
    /// touched in over `agent_timeout`. A failed `stop_agent` call is logged
    /// and does not block the state transition — the agent record must not
    /// stay `Active` forever regardless of whether the remote side confirms.
    pub async fn sweep_once(&self) -> anyhow::Result<u32> {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.agent_timeout).unwrap_or(chrono::Duration::zero());
        let active = self.states.list_active().await?;

        let mut reaped = 0;
        for state in active {
            if state.updated_at >= cutoff {
                continue;
            }

            if let Err(err) = self.agent_client.stop_agent(&self.api_key, &state.agent_id).await {
                tracing::warn!(agent_id = %state.agent_id, error = %err, "failed to stop timed-out agent, marking Timeout anyway");
            }

            self.states.update_with(&state.agent_id, |s| s.status = AgentRunStatus::Timeout).await?;
            reaped += 1;
        }

        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::classification::ClassifiedOutcome;
    use crate::domain::errors::DomainResult;
    use crate::domain::models::{AgentState, OrchestrationMode, OrchestrationOptions};
    use crate::domain::ports::agent_client::*;
    use crate::domain::ports::AgentStateRepository;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    struct StubClient {
        stop_calls: AtomicU32,
    }

    #[async_trait]
    impl ExternalAgentClient for StubClient {
        async fn create_agent(&self, _api_key: &str, _request: CreateAgentRequest) -> ClassifiedOutcome<CreatedAgent> {
            unimplemented!()
        }
        async fn get_agent(&self, _api_key: &str, _agent_id: &str) -> ClassifiedOutcome<AgentStatusResponse> {
            unimplemented!()
        }
        async fn get_conversation(&self, _api_key: &str, _agent_id: &str) -> ClassifiedOutcome<Conversation> {
            unimplemented!()
        }
        async fn send_followup(&self, _api_key: &str, _agent_id: &str, _text: &str) -> ClassifiedOutcome<()> {
            unimplemented!()
        }
        async fn stop_agent(&self, _api_key: &str, _agent_id: &str) -> ClassifiedOutcome<()> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn delete_agent(&self, _api_key: &str, _agent_id: &str) -> ClassifiedOutcome<()> {
            unimplemented!()
        }
        async fn list_models(&self, _api_key: &str) -> ClassifiedOutcome<Vec<String>> {
            Ok(vec![])
        }
        async fn list_repositories(&self, _api_key: &str) -> ClassifiedOutcome<Vec<RepositoryInfo>> {
            Ok(vec![])
        }
    }

    #[derive(Default)]
    struct InMemoryStates {
        states: StdMutex<HashMap<String, AgentState>>,
    }

    #[async_trait]
    impl AgentStateRepository for InMemoryStates {
        async fn create(&self, state: &AgentState) -> DomainResult<()> {
            self.states.lock().unwrap().insert(state.agent_id.clone(), state.clone());
            Ok(())
        }
        async fn get(&self, agent_id: &str) -> DomainResult<Option<AgentState>> {
            Ok(self.states.lock().unwrap().get(agent_id).cloned())
        }
        async fn update(&self, state: &AgentState) -> DomainResult<()> {
            self.states.lock().unwrap().insert(state.agent_id.clone(), state.clone());
            Ok(())
        }
        async fn find_master_by_subagent(&self, subagent_id: &str) -> DomainResult<Option<AgentState>> {
            Ok(self.states.lock().unwrap().values().find(|s| s.is_subagent_of_master(subagent_id).is_some()).cloned())
        }
        async fn list_active(&self) -> DomainResult<Vec<AgentState>> {
            Ok(self.states.lock().unwrap().values().filter(|s| s.status == AgentRunStatus::Active).cloned().collect())
        }
        async fn list_by_status(&self, status: AgentRunStatus) -> DomainResult<Vec<AgentState>> {
            Ok(self.states.lock().unwrap().values().filter(|s| s.status == status).cloned().collect())
        }
    }

    fn stale_master(agent_id: &str, age: chrono::Duration) -> AgentState {
        let mut state = AgentState::new_master(
            agent_id.into(),
            "do the thing".into(),
            "owner/repo".into(),
            OrchestrationMode::SingleAgent,
            OrchestrationOptions::default(),
        );
        state.updated_at = Utc::now() - age;
        state
    }

    #[tokio::test]
    async fn reaps_agents_idle_past_timeout() {
        let client = Arc::new(StubClient { stop_calls: AtomicU32::new(0) });
        let repo = Arc::new(InMemoryStates::default());
        repo.create(&stale_master("stale-agent", chrono::Duration::hours(5))).await.unwrap();
        repo.create(&stale_master("fresh-agent", chrono::Duration::minutes(1))).await.unwrap();
        let states = Arc::new(StateStore::new(repo.clone()));

        let reaper = StuckAgentReaper::new(
            states,
            client.clone(),
            "key".to_string(),
            Duration::from_secs(4 * 3600),
            Duration::from_secs(1800),
        );

        let reaped = reaper.sweep_once().await.unwrap();
        assert_eq!(reaped, 1);
        assert_eq!(client.stop_calls.load(Ordering::SeqCst), 1);

        let stale = repo.get("stale-agent").await.unwrap().unwrap();
        assert_eq!(stale.status, AgentRunStatus::Timeout);
        let fresh = repo.get("fresh-agent").await.unwrap().unwrap();
        assert_eq!(fresh.status, AgentRunStatus::Active);
    }

    #[tokio::test]
    async fn stop_agent_failure_still_marks_timeout() {
        struct FailingClient;
        #[async_trait]
        impl ExternalAgentClient for FailingClient {
            async fn create_agent(&self, _api_key: &str, _request: CreateAgentRequest) -> ClassifiedOutcome<CreatedAgent> {
                unimplemented!()
            }
            async fn get_agent(&self, _api_key: &str, _agent_id: &str) -> ClassifiedOutcome<AgentStatusResponse> {
                unimplemented!()
            }
            async fn get_conversation(&self, _api_key: &str, _agent_id: &str) -> ClassifiedOutcome<Conversation> {
                unimplemented!()
            }
            async fn send_followup(&self, _api_key: &str, _agent_id: &str, _text: &str) -> ClassifiedOutcome<()> {
                unimplemented!()
            }
            async fn stop_agent(&self, _api_key: &str, _agent_id: &str) -> ClassifiedOutcome<()> {
                Err(crate::domain::classification::ClassifiedError::network("unreachable"))
            }
            async fn delete_agent(&self, _api_key: &str, _agent_id: &str) -> ClassifiedOutcome<()> {
                unimplemented!()
            }
            async fn list_models(&self, _api_key: &str) -> ClassifiedOutcome<Vec<String>> {
                Ok(vec![])
            }
            async fn list_repositories(&self, _api_key: &str) -> ClassifiedOutcome<Vec<RepositoryInfo>> {
                Ok(vec![])
            }
        }

        let repo = Arc::new(InMemoryStates::default());
        repo.create(&stale_master("stale-agent", chrono::Duration::hours(5))).await.unwrap();
        let states = Arc::new(StateStore::new(repo.clone()));

        let reaper = StuckAgentReaper::new(
            states,
            Arc::new(FailingClient),
            "key".to_string(),
            Duration::from_secs(4 * 3600),
            Duration::from_secs(1800),
        );

        let reaped = reaper.sweep_once().await.unwrap();
        assert_eq!(reaped, 1);
        assert_eq!(repo.get("stale-agent").await.unwrap().unwrap().status, AgentRunStatus::Timeout);
    }
}
