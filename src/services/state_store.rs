//! State Store (§5 Shared-resource policy) — the only path through which
//! `AgentState` is mutated. Wraps `AgentStateRepository` with a sharded
//! lock keyed on `agent_id`, held for the full read-modify-write step so
//! concurrent reducer invocations for the same agent never interleave.
//! `handle_task_completion` (§4.5) reuses the same lock keyed on the
//! master's agent_id for master-level consistency, since masters and
//! subagents share the same `agent_id` keyspace.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentRunStatus, AgentState};
use crate::domain::ports::AgentStateRepository;

pub struct StateStore {
    repo: Arc<dyn AgentStateRepository>,
    locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl StateStore {
    pub fn new(repo: Arc<dyn AgentStateRepository>) -> Self {
        Self { repo, locks: AsyncMutex::new(HashMap::new()) }
    }

    async fn lock_for(&self, agent_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(agent_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    pub async fn create(&self, state: &AgentState) -> DomainResult<()> {
        let lock = self.lock_for(&state.agent_id).await;
        let _guard = lock.lock().await;
        self.repo.create(state).await
    }

    pub async fn get(&self, agent_id: &str) -> DomainResult<Option<AgentState>> {
        self.repo.get(agent_id).await
    }

    pub async fn find_master_by_subagent(&self, subagent_id: &str) -> DomainResult<Option<AgentState>> {
        self.repo.find_master_by_subagent(subagent_id).await
    }

    pub async fn list_active(&self) -> DomainResult<Vec<AgentState>> {
        self.repo.list_active().await
    }

    pub async fn list_by_status(&self, status: AgentRunStatus) -> DomainResult<Vec<AgentState>> {
        self.repo.list_by_status(status).await
    }

    /// Read-modify-write under `agent_id`'s shard lock. `f` mutates the
    /// state in place; the result is persisted before the lock releases.
    /// Returns `Ok(None)` if no state exists for `agent_id`.
    pub async fn update_with<F>(&self, agent_id: &str, f: F) -> DomainResult<Option<AgentState>>
    where
        F: FnOnce(&mut AgentState),
    {
        let lock = self.lock_for(agent_id).await;
        let _guard = lock.lock().await;

        let Some(mut state) = self.repo.get(agent_id).await? else {
            return Ok(None);
        };
        f(&mut state);
        self.repo.update(&state).await?;
        Ok(Some(state))
    }

    /// Holds `agent_id`'s shard lock for the duration of `f`, handing it
    /// direct repository access. Needed by the Task Dispatcher's
    /// `handle_task_completion`, which must perform external dispatch calls
    /// between reading and persisting a master's state, and so can't express
    /// its step as the synchronous closure `update_with` takes.
    pub async fn with_lock<F, Fut, T>(&self, agent_id: &str, f: F) -> T
    where
        F: FnOnce(Arc<dyn AgentStateRepository>) -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.lock_for(agent_id).await;
        let _guard = lock.lock().await;
        f(self.repo.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{OrchestrationMode, OrchestrationOptions};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct InMemoryAgentStateRepo {
        states: StdMutex<HashMap<String, AgentState>>,
    }

    #[async_trait]
    impl AgentStateRepository for InMemoryAgentStateRepo {
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

    fn master(agent_id: &str) -> AgentState {
        AgentState::new_master(agent_id.into(), "do the thing".into(), "owner/repo".into(), OrchestrationMode::SingleAgent, OrchestrationOptions::default())
    }

    #[tokio::test]
    async fn update_with_mutates_and_persists() {
        let store = StateStore::new(Arc::new(InMemoryAgentStateRepo::default()));
        store.create(&master("agent-1")).await.unwrap();

        let updated = store.update_with("agent-1", |s| s.iterations += 1).await.unwrap().unwrap();
        assert_eq!(updated.iterations, 1);

        let reloaded = store.get("agent-1").await.unwrap().unwrap();
        assert_eq!(reloaded.iterations, 1);
    }

    #[tokio::test]
    async fn update_with_missing_agent_returns_none() {
        let store = StateStore::new(Arc::new(InMemoryAgentStateRepo::default()));
        let result = store.update_with("ghost", |s| s.iterations += 1).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn concurrent_updates_to_same_agent_serialize() {
        let store = Arc::new(StateStore::new(Arc::new(InMemoryAgentStateRepo::default())));
        store.create(&master("agent-1")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.update_with("agent-1", |s| s.iterations += 1).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let state = store.get("agent-1").await.unwrap().unwrap();
        assert_eq!(state.iterations, 20);
    }

    #[tokio::test]
    async fn with_lock_grants_direct_repo_access() {
        let store = StateStore::new(Arc::new(InMemoryAgentStateRepo::default()));
        store.create(&master("agent-1")).await.unwrap();

        let iterations = store
            .with_lock("agent-1", |repo| async move {
                let mut state = repo.get("agent-1").await.unwrap().unwrap();
                state.iterations += 5;
                repo.update(&state).await.unwrap();
                state.iterations
            })
            .await;

        assert_eq!(iterations, 5);
        assert_eq!(store.get("agent-1").await.unwrap().unwrap().iterations, 5);
    }
}
