//! # Hook Registry
//!
//! Owns the lifecycle of per-instance webhook registrations: one webhook on
//! the source-control host and one stored row per broker service instance.
//! Registration is two-phase (remote hook, then row) and not atomic; a failed
//! insert is compensated by unregistering the hook on a best-effort basis.

use std::{fmt, sync::Arc};

use base64::{Engine as _, engine::general_purpose::URL_SAFE};
use chrono::{DateTime, Utc};
use rand::{RngCore, rngs::OsRng};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::repositories::{HookStore, NewHook, StoreError};
use crate::scm::{SourceControlError, SourceControlFactory};

const SECRET_BYTES: usize = 32;

/// A stored webhook registration with its credentials in the clear.
#[derive(Clone, PartialEq, Eq)]
pub struct HookRegistration {
    pub id: i32,
    pub instance_id: String,
    pub org_id: String,
    pub owner: String,
    pub repo: String,
    pub token: String,
    pub secret: String,
    pub hook_id: i64,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistration")
            .field("id", &self.id)
            .field("instance_id", &self.instance_id)
            .field("org_id", &self.org_id)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("token", &"[REDACTED]")
            .field("secret", &"[REDACTED]")
            .field("hook_id", &self.hook_id)
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no hook registered for instance {instance}")]
    NotFound { instance: String },
    #[error("a hook is already registered for instance {instance}")]
    AlreadyExists { instance: String },
    #[error("base url {0} cannot carry a callback path")]
    InvalidBaseUrl(String),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    SourceControl(#[from] SourceControlError),
}

impl From<StoreError> for RegistryError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::AlreadyExists { instance } => RegistryError::AlreadyExists { instance },
            other => RegistryError::Store(other),
        }
    }
}

/// Request to register a webhook for a new service instance.
#[derive(Clone)]
pub struct CreateHook<'a> {
    pub org_id: &'a str,
    pub instance_id: &'a str,
    pub token: &'a str,
    pub owner: &'a str,
    pub repo: &'a str,
}

/// 32 random bytes, URL-safe base64 with padding.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE.encode(bytes)
}

/// `{base}/hook/{instance}`, with the instance id percent-encoded as one segment.
pub fn callback_url(base: &Url, instance_id: &str) -> Result<Url, RegistryError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| RegistryError::InvalidBaseUrl(base.to_string()))?
        .pop_if_empty()
        .extend(["hook", instance_id]);
    Ok(url)
}

#[derive(Clone)]
pub struct HookRegistry {
    store: Arc<dyn HookStore>,
    scm: Arc<dyn SourceControlFactory>,
    base_url: Url,
}

impl HookRegistry {
    pub fn new(store: Arc<dyn HookStore>, scm: Arc<dyn SourceControlFactory>, base_url: Url) -> Self {
        Self {
            store,
            scm,
            base_url,
        }
    }

    pub async fn get(&self, instance_id: &str) -> Result<HookRegistration, RegistryError> {
        self.store
            .find_by_instance(instance_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound {
                instance: instance_id.to_string(),
            })
    }

    pub async fn create(&self, request: CreateHook<'_>) -> Result<HookRegistration, RegistryError> {
        if self.store.find_by_instance(request.instance_id).await?.is_some() {
            return Err(RegistryError::AlreadyExists {
                instance: request.instance_id.to_string(),
            });
        }

        let secret = generate_secret();
        let callback = callback_url(&self.base_url, request.instance_id)?;
        let client = self.scm.for_token(request.token)?;

        let hook_id = client
            .register_hook(request.owner, request.repo, callback.as_str(), &secret)
            .await?;

        let inserted = self
            .store
            .insert(NewHook {
                instance_id: request.instance_id.to_string(),
                org_id: request.org_id.to_string(),
                owner: request.owner.to_string(),
                repo: request.repo.to_string(),
                token: request.token.to_string(),
                secret,
                hook_id,
            })
            .await;

        match inserted {
            Ok(registration) => {
                info!(
                    instance_id = %registration.instance_id,
                    owner = %registration.owner,
                    repo = %registration.repo,
                    hook_id,
                    "Registered review app hook"
                );
                Ok(registration)
            }
            Err(err) => {
                if let Err(cleanup) = client
                    .unregister_hook(request.owner, request.repo, hook_id)
                    .await
                {
                    warn!(
                        instance_id = %request.instance_id,
                        hook_id,
                        error = %cleanup,
                        "Failed to remove webhook after persistence failure"
                    );
                }
                Err(err.into())
            }
        }
    }

    /// Removes the remote webhook, then the row. The row survives a failed
    /// unregistration so the call can be retried.
    pub async fn delete(&self, instance_id: &str) -> Result<(), RegistryError> {
        let registration = self.get(instance_id).await?;
        let client = self.scm.for_token(&registration.token)?;

        match client
            .unregister_hook(&registration.owner, &registration.repo, registration.hook_id)
            .await
        {
            Ok(()) => {}
            Err(SourceControlError::Api { status: 404, .. }) => {
                warn!(instance_id, hook_id = registration.hook_id, "Webhook already removed upstream");
            }
            Err(err) => return Err(err.into()),
        }

        self.store.delete_by_instance(instance_id).await?;
        info!(instance_id, "Removed review app hook");
        Ok(())
    }
}
