//! # Webhook Handlers
//!
//! GitHub `pull_request` deliveries. Multi-tenant deliveries arrive on
//! `/hook/{instance_id}` and are verified with that instance's stored secret;
//! `/hook` serves a single statically configured repository.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiError, ErrorType};
use crate::orchestrator::{HookTarget, Orchestrator, Outcome, PullRequestEvent};
use crate::server::AppState;
use crate::signature::{self, SIGNATURE_HEADER};
use crate::telemetry::{TraceContext, current_trace_id, with_trace_context};

/// Acknowledgement body for a processed delivery
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HookAccepted {
    #[schema(example = 200)]
    pub status: u16,
}

impl HookAccepted {
    fn ok() -> Json<Self> {
        Json(Self { status: 200 })
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct InstancePath {
    /// Broker service instance id the webhook was registered for
    pub instance_id: String,
}

fn reject(reason: &'static str, error: ErrorType) -> ApiError {
    counter!("review_apps_webhook_rejected_total", "reason" => reason).increment(1);
    error.into()
}

fn parse_event(body: &[u8]) -> Result<PullRequestEvent, ApiError> {
    serde_json::from_slice(body).map_err(|err| {
        warn!(error = %err, "Rejecting webhook with unparseable payload");
        reject("invalid_payload", ErrorType::InvalidPayload)
    })
}

fn presented_signature(headers: &HeaderMap) -> &str {
    headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

/// Runs the workflow on its own task so a dropped connection cannot cut it short.
async fn orchestrate(
    orchestrator: Orchestrator,
    event: PullRequestEvent,
    token: String,
    org_id: String,
) -> Result<Outcome, ApiError> {
    let context = current_trace_id()
        .map(|trace_id| TraceContext { trace_id })
        .unwrap_or_else(TraceContext::generate);

    let workflow = with_trace_context(context, async move {
        orchestrator
            .handle(
                &event,
                HookTarget {
                    token: &token,
                    org_id: &org_id,
                },
            )
            .await
    });
    let handle = tokio::spawn(workflow.in_current_span());

    match handle.await {
        Ok(result) => result.map_err(ApiError::from),
        Err(join_error) => {
            tracing::error!(error = %join_error, "Orchestration task aborted");
            Err(ErrorType::InternalServerError.into())
        }
    }
}

/// Multi-tenant webhook delivery
#[utoipa::path(
    post,
    path = "/hook/{instance_id}",
    params(InstancePath),
    request_body(content = String, description = "GitHub pull_request event", content_type = "application/json"),
    responses(
        (status = 200, description = "Event handled", body = HookAccepted),
        (status = 400, description = "Invalid payload", body = ApiError),
        (status = 401, description = "Invalid signature", body = ApiError),
        (status = 404, description = "Unknown instance", body = ApiError),
        (status = 500, description = "Orchestration failed", body = ApiError)
    ),
    tag = "hooks"
)]
pub async fn instance_hook(
    State(state): State<AppState>,
    Path(InstancePath { instance_id }): Path<InstancePath>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<HookAccepted>, ApiError> {
    let event = parse_event(&body)?;

    let registration = state.registry.get(&instance_id).await.map_err(|err| {
        if matches!(err, crate::registry::RegistryError::NotFound { .. }) {
            counter!("review_apps_webhook_rejected_total", "reason" => "unknown_instance").increment(1);
        }
        ApiError::from(err)
    })?;

    if !signature::verify(registration.secret.as_bytes(), &body, presented_signature(&headers)) {
        warn!(instance_id = %instance_id, "Rejecting webhook with invalid signature");
        return Err(reject("invalid_signature", ErrorType::InvalidSignature));
    }

    info!(
        instance_id = %instance_id,
        action = %event.action.as_str(),
        number = event.number,
        "Accepted pull request event"
    );
    orchestrate(
        state.orchestrator.clone(),
        event,
        registration.token,
        registration.org_id,
    )
    .await?;

    Ok(HookAccepted::ok())
}

/// Single-tenant webhook delivery, enabled by `HOOK_SECRET`, `GH_TOKEN` and `CF_ORG`
#[utoipa::path(
    post,
    path = "/hook",
    request_body(content = String, description = "GitHub pull_request event", content_type = "application/json"),
    responses(
        (status = 200, description = "Event handled", body = HookAccepted),
        (status = 400, description = "Invalid payload", body = ApiError),
        (status = 403, description = "Invalid signature", body = ApiError),
        (status = 404, description = "Single-tenant mode not configured", body = ApiError),
        (status = 500, description = "Orchestration failed", body = ApiError)
    ),
    tag = "hooks"
)]
pub async fn single_tenant_hook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<HookAccepted>, ApiError> {
    let Some(settings) = state.config.single_tenant() else {
        return Err(ErrorType::NotFound.into());
    };

    let event = parse_event(&body)?;

    if !signature::verify(settings.hook_secret.as_bytes(), &body, presented_signature(&headers)) {
        warn!("Rejecting single-tenant webhook with invalid signature");
        counter!("review_apps_webhook_rejected_total", "reason" => "invalid_signature").increment(1);
        return Err(ApiError::new(
            ErrorType::Forbidden.status_code(),
            ErrorType::InvalidSignature.to_string(),
        ));
    }

    orchestrate(
        state.orchestrator.clone(),
        event,
        settings.github_token,
        settings.org_id,
    )
    .await?;

    Ok(HookAccepted::ok())
}
