//! # Service Broker Handlers
//!
//! Open Service Broker v2 surface. Provisioning an instance registers a
//! webhook on the tenant's repository; deprovisioning removes it. Bindings and
//! plan updates are not supported. Every route requires HTTP basic auth with
//! the broker credentials.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::orchestrator::is_valid_name;
use crate::registry::{CreateHook, RegistryError};
use crate::server::AppState;

const CATALOG: &str = include_str!("../../catalog.json");

/// Broker error body, `{"description": ...}`
#[derive(Debug, Error)]
#[error("{description}")]
pub struct BrokerError {
    pub status: StatusCode,
    pub description: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BrokerErrorBody {
    pub description: String,
}

impl BrokerError {
    pub fn new(status: StatusCode, description: impl Into<String>) -> Self {
        Self {
            status,
            description: description.into(),
        }
    }

    fn unprocessable(description: &str) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, description)
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let mut response = (
            self.status,
            Json(BrokerErrorBody {
                description: self.description,
            }),
        )
            .into_response();
        if self.status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"review-apps\""),
            );
        }
        response
    }
}

/// Body of a provision request; only the fields this broker reads.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ProvisionRequest {
    #[serde(default)]
    pub organization_guid: String,
    #[serde(default)]
    pub service_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub parameters: Option<Value>,
}

/// Arbitrary parameters accepted by `cf create-service -c`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ProvisionOptions {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
}

impl ProvisionOptions {
    /// Names the missing fields in a fixed order.
    pub fn validate(&self) -> Result<(), BrokerError> {
        let missing: Vec<&str> = [
            ("token", &self.token),
            ("owner", &self.owner),
            ("repo", &self.repo),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(BrokerError::new(
                StatusCode::BAD_REQUEST,
                format!("Missing required fields: {}", missing.join(", ")),
            ));
        }

        if !is_valid_name(&self.owner) || !is_valid_name(&self.repo) {
            return Err(BrokerError::new(
                StatusCode::BAD_REQUEST,
                "Invalid repository name",
            ));
        }

        Ok(())
    }
}

fn invalid_options() -> BrokerError {
    BrokerError::new(StatusCode::BAD_REQUEST, "Invalid configuration options")
}

fn parse_options(body: &[u8]) -> Result<(String, ProvisionOptions), BrokerError> {
    let request: ProvisionRequest = serde_json::from_slice(body).map_err(|_| invalid_options())?;
    let options = match request.parameters {
        None | Some(Value::Null) => ProvisionOptions::default(),
        Some(parameters) => serde_json::from_value(parameters).map_err(|_| invalid_options())?,
    };
    Ok((request.organization_guid, options))
}

fn empty_object(status: StatusCode) -> Response {
    (status, Json(json!({}))).into_response()
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

/// Rejects requests without the broker's basic-auth credentials.
pub async fn broker_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, BrokerError> {
    let authorized = basic_credentials(request.headers()).is_some_and(|(user, pass)| {
        let user_ok = user
            .as_bytes()
            .ct_eq(state.config.broker_username.as_bytes());
        let pass_ok = pass
            .as_bytes()
            .ct_eq(state.config.broker_password.as_bytes());
        bool::from(user_ok & pass_ok)
    });

    if !authorized {
        warn!(path = %request.uri().path(), "Rejecting broker request with bad credentials");
        return Err(BrokerError::new(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }

    Ok(next.run(request).await)
}

/// Service catalog
#[utoipa::path(
    get,
    path = "/v2/catalog",
    responses(
        (status = 200, description = "Service catalog"),
        (status = 401, description = "Bad broker credentials", body = BrokerErrorBody)
    ),
    tag = "broker"
)]
pub async fn catalog() -> Response {
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        CATALOG,
    )
        .into_response()
}

/// Provision a service instance: register the repository webhook
#[utoipa::path(
    put,
    path = "/v2/service_instances/{instance_id}",
    params(("instance_id" = String, Path, description = "Service instance id")),
    request_body = ProvisionRequest,
    responses(
        (status = 201, description = "Webhook registered"),
        (status = 400, description = "Missing or invalid parameters", body = BrokerErrorBody),
        (status = 409, description = "Instance already exists", body = BrokerErrorBody),
        (status = 500, description = "Registration failed", body = BrokerErrorBody)
    ),
    tag = "broker"
)]
pub async fn provision(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    body: Bytes,
) -> Result<Response, BrokerError> {
    let (org_id, options) = parse_options(&body)?;
    options.validate()?;

    state
        .registry
        .create(CreateHook {
            org_id: &org_id,
            instance_id: &instance_id,
            token: &options.token,
            owner: &options.owner,
            repo: &options.repo,
        })
        .await
        .map_err(|err| match err {
            RegistryError::AlreadyExists { instance } => BrokerError::new(
                StatusCode::CONFLICT,
                format!("Service instance {instance} already exists"),
            ),
            RegistryError::SourceControl(source) => {
                error!(instance_id = %instance_id, error = %source, "Webhook registration failed");
                BrokerError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to register webhook: {source}"),
                )
            }
            other => {
                error!(instance_id = %instance_id, error = %other, "Provisioning failed");
                BrokerError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to provision service instance")
            }
        })?;

    info!(instance_id = %instance_id, owner = %options.owner, repo = %options.repo, "Provisioned service instance");
    Ok(empty_object(StatusCode::CREATED))
}

/// Deprovision a service instance: remove the repository webhook
#[utoipa::path(
    delete,
    path = "/v2/service_instances/{instance_id}",
    params(("instance_id" = String, Path, description = "Service instance id")),
    responses(
        (status = 200, description = "Webhook removed"),
        (status = 410, description = "Unknown instance"),
        (status = 500, description = "Removal failed", body = BrokerErrorBody)
    ),
    tag = "broker"
)]
pub async fn deprovision(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
) -> Result<Response, BrokerError> {
    match state.registry.delete(&instance_id).await {
        Ok(()) => {
            info!(instance_id = %instance_id, "Deprovisioned service instance");
            Ok(empty_object(StatusCode::OK))
        }
        Err(RegistryError::NotFound { .. }) => Ok(empty_object(StatusCode::GONE)),
        Err(err) => {
            error!(instance_id = %instance_id, error = %err, "Deprovisioning failed");
            Err(BrokerError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to deprovision service instance",
            ))
        }
    }
}

/// Provisioning is synchronous, so the last operation always succeeded
#[utoipa::path(
    get,
    path = "/v2/service_instances/{instance_id}/last_operation",
    params(("instance_id" = String, Path, description = "Service instance id")),
    responses((status = 200, description = "Operation state")),
    tag = "broker"
)]
pub async fn last_operation(Path(_instance_id): Path<String>) -> Json<Value> {
    Json(json!({"state": "succeeded"}))
}

#[utoipa::path(
    patch,
    path = "/v2/service_instances/{instance_id}",
    params(("instance_id" = String, Path, description = "Service instance id")),
    responses((status = 422, description = "Updates are not supported", body = BrokerErrorBody)),
    tag = "broker"
)]
pub async fn update(Path(_instance_id): Path<String>) -> BrokerError {
    BrokerError::unprocessable("Service does not support update")
}

#[utoipa::path(
    put,
    path = "/v2/service_instances/{instance_id}/service_bindings/{binding_id}",
    params(
        ("instance_id" = String, Path, description = "Service instance id"),
        ("binding_id" = String, Path, description = "Binding id")
    ),
    responses((status = 422, description = "Bindings are not supported", body = BrokerErrorBody)),
    tag = "broker"
)]
pub async fn bind(Path((_instance_id, _binding_id)): Path<(String, String)>) -> BrokerError {
    BrokerError::unprocessable("Service does not support bind")
}

#[utoipa::path(
    delete,
    path = "/v2/service_instances/{instance_id}/service_bindings/{binding_id}",
    params(
        ("instance_id" = String, Path, description = "Service instance id"),
        ("binding_id" = String, Path, description = "Binding id")
    ),
    responses((status = 422, description = "Bindings are not supported", body = BrokerErrorBody)),
    tag = "broker"
)]
pub async fn unbind(Path((_instance_id, _binding_id)): Path<(String, String)>) -> BrokerError {
    BrokerError::unprocessable("Service does not support bind")
}
