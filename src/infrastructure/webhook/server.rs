//! The Webhook Gateway: an axum router mounted at `POST /webhooks/agent-status`
//! (§4.1, §4.1.1). Shares the process's `tokio` runtime with the outbox
//! processor and broker worker, consistent with the single-worker-process
//! model of §5.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::signature::{self, SignatureVerdict};
use crate::domain::models::{
    Event, OutboxJob, OutboxJobPayload, ReceivedSummary, RemoteAgentStatus, StatusChangeEvent, WebhookReceipt,
};
use crate::domain::ports::{
    AgentStateRepository, Broker, BrokerJobOptions, EventRepository, OrchestrationRepository, OutboxRepository,
};

/// Everything the gateway's handlers need, shared behind an `Arc`.
pub struct WebhookState {
    pub secret: String,
    pub orchestrations: Arc<dyn OrchestrationRepository>,
    pub agent_states: Arc<dyn AgentStateRepository>,
    pub events: Arc<dyn EventRepository>,
    pub outbox: Arc<dyn OutboxRepository>,
    pub outbox_max_attempts: u32,
    pub broker: Option<Arc<dyn Broker>>,
}

pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/webhooks/agent-status", post(handle_status_change))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

async fn handle_status_change(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<WebhookReceipt>, StatusCode> {
    let signature_header = headers.get("x-webhook-signature").and_then(|v| v.to_str().ok());

    match signature::verify(&state.secret, &body, signature_header) {
        SignatureVerdict::Invalid => {
            tracing::warn!("rejected webhook: signature missing or mismatched");
            return Err(StatusCode::UNAUTHORIZED);
        }
        SignatureVerdict::Unconfigured => {
            tracing::warn!("accepted webhook without signature verification: no secret configured");
        }
        SignatureVerdict::Valid => {}
    }

    let webhook_event_header = headers.get("x-webhook-event").and_then(|v| v.to_str().ok()).map(str::to_string);

    let payload: StatusChangeEvent = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(error = %err, "rejected webhook: malformed status-change body");
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    let is_known_event = payload.event.as_deref().is_none_or(|e| e == "statusChange");
    if !is_known_event {
        tracing::info!(event = ?payload.event, agent_id = %payload.id, "accepted webhook with unrecognized event kind, no action taken");
    }

    let mut processed = false;
    if is_known_event && payload.status.is_actionable() {
        processed = dispatch(&state, &payload).await;
    }

    Ok(Json(WebhookReceipt {
        ok: true,
        received: ReceivedSummary {
            event: payload.event.clone(),
            webhook_event: webhook_event_header,
            agent_id: payload.id,
            status: status_label(&payload.status).to_string(),
            processed,
        },
    }))
}

/// Resolves the owning orchestration, records an audit event, and attempts
/// broker delivery with outbox fallback (§4.1 step 5). Returns whether the
/// event was actually handed off somewhere.
async fn dispatch(state: &Arc<WebhookState>, payload: &StatusChangeEvent) -> bool {
    let orchestration_id = match resolve_orchestration_id(state, &payload.id).await {
        Some(id) => id,
        None => {
            tracing::warn!(agent_id = %payload.id, "webhook for unknown agent id, dropping");
            return false;
        }
    };

    let job_payload = OutboxJobPayload::ProcessWebhook {
        agent_id: payload.id.clone(),
        status: status_label(&payload.status).to_string(),
        repository: payload.source.repository.clone(),
        ref_name: payload.source.ref_name.clone(),
        branch_name: payload.target.branch_name.clone(),
        pr_url: payload.target.pr_url.clone(),
        summary: payload.summary.clone(),
    };

    if let Err(err) = state.events.append(&Event::info(
        orchestration_id,
        "webhook_received",
        format!("received {:?} for agent {}", payload.status, payload.id),
    )).await {
        tracing::warn!(error = %err, "failed to append webhook_received event");
    }

    if let Some(broker) = &state.broker {
        match broker.enqueue(job_payload.clone(), BrokerJobOptions::default()).await {
            Ok(()) => return true,
            Err(err) => {
                tracing::warn!(error = %err, "broker enqueue failed, falling back to outbox");
            }
        }
    }

    let job = OutboxJob::new(orchestration_id, job_payload, state.outbox_max_attempts);
    match state.outbox.create(&job).await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(error = %err, "outbox fallback write failed for webhook event");
            false
        }
    }
}

async fn resolve_orchestration_id(state: &Arc<WebhookState>, agent_id: &str) -> Option<uuid::Uuid> {
    if let Ok(Some(orchestration)) = state.orchestrations.find_by_master_agent_id(agent_id).await {
        return Some(orchestration.id);
    }

    let master = state.agent_states.find_master_by_subagent(agent_id).await.ok().flatten()?;
    state
        .orchestrations
        .find_by_master_agent_id(&master.agent_id)
        .await
        .ok()
        .flatten()
        .map(|o| o.id)
}

fn status_label(status: &RemoteAgentStatus) -> &'static str {
    match status {
        RemoteAgentStatus::Finished => "FINISHED",
        RemoteAgentStatus::Error => "ERROR",
        RemoteAgentStatus::Expired => "EXPIRED",
        RemoteAgentStatus::Other => "OTHER",
    }
}
