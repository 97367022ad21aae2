//! Model Validator (§4.5) — resolves a requested model name against the
//! external agent service's live model list, cached for one hour.
//!
//! Policy: empty/absent name is Auto mode (no `model` field sent at all);
//! a name close to a known model is fuzzily substituted; anything else
//! falls back to Auto mode with a warning.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::domain::ports::ExternalAgentClient;

const CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Minimum normalized similarity (0.0-1.0) for a fuzzy substitution to be
/// accepted as "high confidence" rather than falling back to Auto mode.
const FUZZY_MATCH_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelResolution {
    /// `None` means Auto mode: omit the `model` field from the outbound request.
    pub model: Option<String>,
    pub warning: Option<String>,
}

impl ModelResolution {
    fn auto(warning: impl Into<String>) -> Self {
        Self { model: None, warning: Some(warning.into()) }
    }

    fn exact(model: impl Into<String>) -> Self {
        Self { model: Some(model.into()), warning: None }
    }

    fn substituted(model: impl Into<String>, original: &str) -> Self {
        Self {
            model: Some(model.into()),
            warning: Some(format!("model \"{original}\" not recognized; substituted closest match")),
        }
    }
}

struct CachedModels {
    models: Vec<String>,
    fetched_at: Instant,
}

/// Caches the external service's model list behind a single-writer refresh
/// path (§5 Shared-resource policy).
pub struct ModelValidator {
    agent_client: Arc<dyn ExternalAgentClient>,
    cache: RwLock<Option<CachedModels>>,
}

impl ModelValidator {
    pub fn new(agent_client: Arc<dyn ExternalAgentClient>) -> Self {
        Self { agent_client, cache: RwLock::new(None) }
    }

    /// Resolve `requested` into a model-to-send decision, refreshing the
    /// cached model list from `api_key`'s service if it is stale or absent.
    pub async fn resolve(&self, api_key: &str, requested: Option<&str>) -> ModelResolution {
        let requested = requested.map(str::trim).filter(|s| !s.is_empty());
        let Some(requested) = requested else {
            return ModelResolution { model: None, warning: None };
        };

        let models = match self.live_models(api_key).await {
            Some(models) => models,
            None => return ModelResolution::auto(format!("could not verify model \"{requested}\"; using Auto mode")),
        };

        if models.iter().any(|m| m == requested) {
            return ModelResolution::exact(requested);
        }

        match best_fuzzy_match(requested, &models) {
            Some(candidate) => ModelResolution::substituted(candidate, requested),
            None => ModelResolution::auto(format!("unknown model \"{requested}\"; using Auto mode")),
        }
    }

    async fn live_models(&self, api_key: &str) -> Option<Vec<String>> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < CACHE_TTL {
                    return Some(cached.models.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;
        if let Some(cached) = cache.as_ref() {
            if cached.fetched_at.elapsed() < CACHE_TTL {
                return Some(cached.models.clone());
            }
        }

        let models = self.agent_client.list_models(api_key).await.ok()?;
        *cache = Some(CachedModels { models: models.clone(), fetched_at: Instant::now() });
        Some(models)
    }
}

fn best_fuzzy_match<'a>(requested: &str, candidates: &'a [String]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (c.as_str(), normalized_similarity(requested, c)))
        .filter(|(_, score)| *score >= FUZZY_MATCH_THRESHOLD)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
        .map(|(c, _)| c)
}

fn normalized_similarity(a: &str, b: &str) -> f64 {
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(&a, &b) as f64 / max_len as f64)
}

/// Textbook edit-distance, used only to rank fuzzy candidates above.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for i in 1..=a.len() {
        let mut prev_diag = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let temp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev_diag
            } else {
                1 + prev_diag.min(row[j]).min(row[j - 1])
            };
            prev_diag = temp;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::classification::ClassifiedOutcome;
    use crate::domain::ports::agent_client::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubClient {
        models: Vec<String>,
        call_count: AtomicU32,
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
            unimplemented!()
        }
        async fn delete_agent(&self, _api_key: &str, _agent_id: &str) -> ClassifiedOutcome<()> {
            unimplemented!()
        }
        async fn list_models(&self, _api_key: &str) -> ClassifiedOutcome<Vec<String>> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            Ok(self.models.clone())
        }
        async fn list_repositories(&self, _api_key: &str) -> ClassifiedOutcome<Vec<RepositoryInfo>> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn empty_model_is_auto_mode_without_warning() {
        let validator = ModelValidator::new(Arc::new(StubClient { models: vec![], call_count: AtomicU32::new(0) }));
        let resolution = validator.resolve("key", None).await;
        assert_eq!(resolution, ModelResolution { model: None, warning: None });
    }

    #[tokio::test]
    async fn known_model_resolves_exactly() {
        let validator = ModelValidator::new(Arc::new(StubClient {
            models: vec!["gpt-4o".to_string(), "gpt-4o-mini".to_string()],
            call_count: AtomicU32::new(0),
        }));
        let resolution = validator.resolve("key", Some("gpt-4o-mini")).await;
        assert_eq!(resolution.model.as_deref(), Some("gpt-4o-mini"));
        assert!(resolution.warning.is_none());
    }

    #[tokio::test]
    async fn near_miss_is_fuzzily_substituted() {
        let validator = ModelValidator::new(Arc::new(StubClient {
            models: vec!["gpt-4o-mini".to_string()],
            call_count: AtomicU32::new(0),
        }));
        let resolution = validator.resolve("key", Some("gpt-4o-min")).await;
        assert_eq!(resolution.model.as_deref(), Some("gpt-4o-mini"));
        assert!(resolution.warning.is_some());
    }

    #[tokio::test]
    async fn wildly_unknown_model_falls_back_to_auto() {
        let validator = ModelValidator::new(Arc::new(StubClient {
            models: vec!["gpt-4o-mini".to_string()],
            call_count: AtomicU32::new(0),
        }));
        let resolution = validator.resolve("key", Some("totally-made-up-model-xyz")).await;
        assert!(resolution.model.is_none());
        assert!(resolution.warning.is_some());
    }

    #[tokio::test]
    async fn model_list_is_cached_across_calls() {
        let client = Arc::new(StubClient { models: vec!["gpt-4o-mini".to_string()], call_count: AtomicU32::new(0) });
        let validator = ModelValidator::new(client.clone());
        validator.resolve("key", Some("gpt-4o-mini")).await;
        validator.resolve("key", Some("gpt-4o-mini")).await;
        assert_eq!(client.call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn levenshtein_matches_known_distances() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }
}
