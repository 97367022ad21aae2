//! Analyzer (§4.6) — the decision engine driving CONTINUE/TEST/FIX/COMPLETE.
//! Prefers an LLM-backed JSON decision; degrades to a deterministic
//! rule-based policy whenever the LLM is unreachable or its output can't
//! be trusted, since the decision loop drives external resource usage and
//! must keep advancing even when the LLM is down.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::domain::models::AgentState;
use crate::domain::ports::agent_client::{AgentStatusResponse, Conversation};
use crate::domain::ports::llm_client::{ChatMessage, ChatRequest, LlmClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerAction {
    Continue,
    Test,
    Fix,
    Complete,
}

impl AnalyzerAction {
    fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "CONTINUE" => Some(Self::Continue),
            "TEST" => Some(Self::Test),
            "FIX" => Some(Self::Fix),
            "COMPLETE" => Some(Self::Complete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisDecision {
    pub action: AnalyzerAction,
    pub reasoning: String,
    pub followup_message: Option<String>,
    pub confidence: f64,
    pub tasks_completed: Vec<String>,
    pub tasks_remaining: Vec<String>,
}

pub struct Analyzer {
    llm: Arc<dyn LlmClient>,
}

impl Analyzer {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn analyze(&self, model: &str, conversation: &Conversation, agent_status: &AgentStatusResponse, state: &AgentState) -> AnalysisDecision {
        let prompt = build_analysis_prompt(conversation, agent_status, state);

        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage { role: "user".to_string(), content: prompt }],
            temperature: 0.2,
            json_object_response: true,
        };

        match self.llm.complete(request).await {
            Ok(text) => parse_decision(&text, state).unwrap_or_else(|| rule_based_fallback(conversation, state)),
            Err(_) => rule_based_fallback(conversation, state),
        }
    }
}

fn build_analysis_prompt(conversation: &Conversation, agent_status: &AgentStatusResponse, state: &AgentState) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are analyzing an in-progress coding agent run. Respond with a single JSON object: ");
    prompt.push_str("{\"action\": \"CONTINUE\"|\"TEST\"|\"FIX\"|\"COMPLETE\", \"reasoning\": string, \"followupMessage\": string, \"confidence\": number}.\n\n");

    if let Some(target) = &agent_status.target {
        if let Some(branch) = &target.branch_name {
            prompt.push_str(&format!("Branch: {branch}\n"));
        }
        if let Some(pr_url) = &target.pr_url {
            prompt.push_str(&format!("PR: {pr_url}\n"));
        }
    }
    if let Some(summary) = &agent_status.summary {
        prompt.push_str(&format!("Summary: {summary}\n"));
    }
    prompt.push_str(&format!("Tasks completed: {}\n", state.tasks_completed.join(", ")));
    prompt.push_str(&format!("Tasks remaining: {}\n", state.tasks_remaining.join(", ")));
    prompt.push_str(&format!("Iteration: {}\n\n", state.iterations));

    prompt.push_str("Conversation:\n");
    for message in &conversation.messages {
        prompt.push_str(&format!("{}: {}\n", message.role, message.text));
    }

    prompt
}

#[derive(Deserialize)]
struct RawDecision {
    action: Option<String>,
    reasoning: Option<String>,
    #[serde(rename = "followupMessage")]
    followup_message: Option<String>,
    confidence: Option<f64>,
    #[serde(rename = "tasksCompleted")]
    tasks_completed: Option<Vec<String>>,
    #[serde(rename = "tasksRemaining")]
    tasks_remaining: Option<Vec<String>>,
}

/// Finds the outermost `{...}` block in `text`, parses it, and normalizes
/// missing/invalid fields. Returns `None` when no JSON object is found, it
/// doesn't parse, or `action` isn't one of the four allowed values.
fn parse_decision(text: &str, state: &AgentState) -> Option<AnalysisDecision> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    let candidate = &text[start..=end];
    let value: Value = serde_json::from_str(candidate).ok()?;
    let raw: RawDecision = serde_json::from_value(value).ok()?;

    let action = AnalyzerAction::from_str(raw.action.as_deref().unwrap_or(""))?;
    let confidence = raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0);

    Some(AnalysisDecision {
        action,
        reasoning: raw.reasoning.unwrap_or_default(),
        followup_message: raw.followup_message,
        confidence,
        tasks_completed: raw.tasks_completed.unwrap_or_else(|| state.tasks_completed.clone()),
        tasks_remaining: raw.tasks_remaining.unwrap_or_else(|| state.tasks_remaining.clone()),
    })
}

fn rule_based_fallback(conversation: &Conversation, state: &AgentState) -> AnalysisDecision {
    let last_assistant_content = conversation
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "assistant")
        .map(|m| m.text.to_lowercase())
        .unwrap_or_default();

    if last_assistant_content.contains("error") || last_assistant_content.contains("failed") {
        return AnalysisDecision {
            action: AnalyzerAction::Fix,
            reasoning: "rule-based fallback: last assistant message reports an error".to_string(),
            followup_message: Some("Please fix the errors encountered and continue.".to_string()),
            confidence: 0.6,
            tasks_completed: state.tasks_completed.clone(),
            tasks_remaining: state.tasks_remaining.clone(),
        };
    }

    if state.iterations >= 5 {
        return AnalysisDecision {
            action: AnalyzerAction::Test,
            reasoning: "rule-based fallback: iteration count reached the testing threshold".to_string(),
            followup_message: None,
            confidence: 0.7,
            tasks_completed: state.tasks_completed.clone(),
            tasks_remaining: state.tasks_remaining.clone(),
        };
    }

    AnalysisDecision {
        action: AnalyzerAction::Continue,
        reasoning: "rule-based fallback: no error signal and below testing threshold".to_string(),
        followup_message: Some("Please continue working on the task.".to_string()),
        confidence: 0.5,
        tasks_completed: state.tasks_completed.clone(),
        tasks_remaining: state.tasks_remaining.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{OrchestrationMode, OrchestrationOptions};
    use crate::domain::ports::agent_client::ConversationMessage;
    use async_trait::async_trait;

    struct StubLlm {
        response: Result<String, String>,
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn complete(&self, _request: ChatRequest) -> anyhow::Result<String> {
            self.response.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn state(iterations: u32) -> AgentState {
        let mut s = AgentState::new_master("master-1".into(), "do thing".into(), "owner/repo".into(), OrchestrationMode::SingleAgent, OrchestrationOptions::default());
        s.iterations = iterations;
        s
    }

    fn status() -> AgentStatusResponse {
        AgentStatusResponse { id: "master-1".into(), status: "RUNNING".into(), target: None, summary: None }
    }

    fn conversation(messages: Vec<(&str, &str)>) -> Conversation {
        Conversation {
            messages: messages
                .into_iter()
                .map(|(role, text)| ConversationMessage { id: None, role: role.to_string(), text: text.to_string(), created_at: None })
                .collect(),
        }
    }

    #[tokio::test]
    async fn valid_llm_json_is_used_directly() {
        let llm = Arc::new(StubLlm { response: Ok(r#"{"action":"TEST","reasoning":"ready","confidence":0.9}"#.to_string()) });
        let analyzer = Analyzer::new(llm);
        let decision = analyzer.analyze("gpt-4o-mini", &conversation(vec![]), &status(), &state(1)).await;
        assert_eq!(decision.action, AnalyzerAction::Test);
        assert_eq!(decision.confidence, 0.9);
    }

    #[tokio::test]
    async fn confidence_outside_range_is_clamped() {
        let llm = Arc::new(StubLlm { response: Ok(r#"{"action":"CONTINUE","confidence":5.0}"#.to_string()) });
        let analyzer = Analyzer::new(llm);
        let decision = analyzer.analyze("gpt-4o-mini", &conversation(vec![]), &status(), &state(1)).await;
        assert_eq!(decision.confidence, 1.0);
    }

    #[tokio::test]
    async fn unparseable_response_falls_back_to_rules() {
        let llm = Arc::new(StubLlm { response: Ok("not json at all".to_string()) });
        let analyzer = Analyzer::new(llm);
        let decision = analyzer.analyze("gpt-4o-mini", &conversation(vec![("assistant", "all good")]), &status(), &state(1)).await;
        assert_eq!(decision.action, AnalyzerAction::Continue);
    }

    #[tokio::test]
    async fn unknown_action_falls_back_to_rules() {
        let llm = Arc::new(StubLlm { response: Ok(r#"{"action":"DANCE"}"#.to_string()) });
        let analyzer = Analyzer::new(llm);
        let decision = analyzer.analyze("gpt-4o-mini", &conversation(vec![]), &status(), &state(6)).await;
        assert_eq!(decision.action, AnalyzerAction::Test);
    }

    #[tokio::test]
    async fn llm_error_triggers_rule_based_error_path() {
        let llm = Arc::new(StubLlm { response: Err("network down".to_string()) });
        let analyzer = Analyzer::new(llm);
        let decision = analyzer.analyze("gpt-4o-mini", &conversation(vec![("assistant", "build failed")]), &status(), &state(1)).await;
        assert_eq!(decision.action, AnalyzerAction::Fix);
        assert_eq!(decision.confidence, 0.6);
    }

    #[tokio::test]
    async fn rule_based_continue_below_iteration_threshold() {
        let llm = Arc::new(StubLlm { response: Err("down".to_string()) });
        let analyzer = Analyzer::new(llm);
        let decision = analyzer.analyze("gpt-4o-mini", &conversation(vec![("assistant", "looking good")]), &status(), &state(1)).await;
        assert_eq!(decision.action, AnalyzerAction::Continue);
        assert_eq!(decision.confidence, 0.5);
    }

    #[test]
    fn parse_decision_rejects_missing_closing_brace() {
        assert!(parse_decision("{\"action\":\"TEST\"", &state(0)).is_none());
    }
}
