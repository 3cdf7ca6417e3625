//! # Source Control Gateway
//!
//! Webhook registration, source archives and deployment records on the
//! source-control host. [`GitHubClient`] is the production implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod archive;
pub mod github;

pub use github::{GitHubClient, GitHubClientFactory};

#[derive(Debug, Error)]
pub enum SourceControlError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("source control API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("failed to unpack source archive: {0}")]
    Archive(String),
}

/// State of a deployment record, as the host names it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Pending,
    InProgress,
    Success,
    Error,
    Failure,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: i64,
    #[serde(default)]
    pub sha: String,
    #[serde(default, rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub task: String,
    #[serde(default)]
    pub environment: String,
}

/// Parameters of a new deployment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentRequest<'a> {
    pub git_ref: &'a str,
    pub task: &'a str,
    pub environment: &'a str,
}

/// Filter for listing deployment records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploymentFilter<'a> {
    pub sha: &'a str,
    pub task: &'a str,
    pub environment: &'a str,
}

#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Creates a `pull_request` webhook; returns the host's hook id.
    async fn register_hook(
        &self,
        owner: &str,
        repo: &str,
        callback_url: &str,
        secret: &str,
    ) -> Result<i64, SourceControlError>;

    async fn unregister_hook(
        &self,
        owner: &str,
        repo: &str,
        hook_id: i64,
    ) -> Result<(), SourceControlError>;

    /// Downloads and unpacks the repository at `sha` under `dest`; returns the
    /// archive's top-level directory.
    async fn fetch_archive(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        dest: &Path,
    ) -> Result<PathBuf, SourceControlError>;

    async fn create_deployment(
        &self,
        owner: &str,
        repo: &str,
        request: DeploymentRequest<'_>,
    ) -> Result<i64, SourceControlError>;

    async fn create_deployment_status(
        &self,
        owner: &str,
        repo: &str,
        deployment_id: i64,
        state: DeploymentState,
        target_url: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), SourceControlError>;

    async fn list_deployments(
        &self,
        owner: &str,
        repo: &str,
        filter: DeploymentFilter<'_>,
    ) -> Result<Vec<Deployment>, SourceControlError>;
}

/// Builds a client acting with one tenant's credential.
pub trait SourceControlFactory: Send + Sync {
    fn for_token(&self, token: &str) -> Result<Box<dyn SourceControl>, SourceControlError>;
}
