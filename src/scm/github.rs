//! GitHub REST v3 client.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::{
    Deployment, DeploymentFilter, DeploymentRequest, DeploymentState, SourceControl,
    SourceControlError, SourceControlFactory, archive,
};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const ACCEPT: &str = "application/vnd.github.v3+json";
const USER_AGENT: &str = concat!("review-apps/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct CreateHookRequest<'a> {
    name: &'a str,
    active: bool,
    events: [&'a str; 1],
    config: HookConfig<'a>,
}

#[derive(Debug, Serialize)]
struct HookConfig<'a> {
    url: &'a str,
    secret: &'a str,
    content_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: i64,
}

#[derive(Debug, Serialize)]
struct CreateDeploymentRequest<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    task: &'a str,
    environment: &'a str,
    auto_merge: bool,
    required_contexts: [&'a str; 0],
}

#[derive(Debug, Serialize)]
struct CreateStatusRequest<'a> {
    state: DeploymentState,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

pub struct GitHubClient {
    http: Client,
    api_base: String,
    token: String,
}

impl GitHubClient {
    pub fn new(token: impl Into<String>) -> Result<Self, SourceControlError> {
        Self::new_with_api_base(token, DEFAULT_API_BASE)
    }

    /// Points the client at an alternative API root (GitHub Enterprise or a mock server).
    pub fn new_with_api_base(
        token: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Result<Self, SourceControlError> {
        let http = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", ACCEPT)
    }

    async fn check(response: Response) -> Result<Response, SourceControlError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or(body);
        Err(SourceControlError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl SourceControl for GitHubClient {
    #[instrument(skip(self, secret), fields(owner = %owner, repo = %repo))]
    async fn register_hook(
        &self,
        owner: &str,
        repo: &str,
        callback_url: &str,
        secret: &str,
    ) -> Result<i64, SourceControlError> {
        let body = CreateHookRequest {
            name: "web",
            active: true,
            events: ["pull_request"],
            config: HookConfig {
                url: callback_url,
                secret,
                content_type: "json",
            },
        };

        let response = self
            .request(Method::POST, &format!("/repos/{owner}/{repo}/hooks"))
            .json(&body)
            .send()
            .await?;
        let created: Created = Self::check(response).await?.json().await?;

        debug!(hook_id = created.id, "Registered webhook");
        Ok(created.id)
    }

    async fn unregister_hook(
        &self,
        owner: &str,
        repo: &str,
        hook_id: i64,
    ) -> Result<(), SourceControlError> {
        let response = self
            .request(
                Method::DELETE,
                &format!("/repos/{owner}/{repo}/hooks/{hook_id}"),
            )
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    #[instrument(skip(self, dest), fields(owner = %owner, repo = %repo))]
    async fn fetch_archive(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        dest: &Path,
    ) -> Result<PathBuf, SourceControlError> {
        // The endpoint answers with a redirect to codeload, which reqwest follows.
        let response = self
            .request(Method::GET, &format!("/repos/{owner}/{repo}/tarball/{sha}"))
            .send()
            .await?;
        let bytes = Self::check(response).await?.bytes().await?;
        debug!(size = bytes.len(), "Downloaded source archive");

        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || archive::unpack_tarball(&bytes, &dest))
            .await
            .map_err(|e| SourceControlError::Archive(format!("extraction task failed: {e}")))?
    }

    async fn create_deployment(
        &self,
        owner: &str,
        repo: &str,
        request: DeploymentRequest<'_>,
    ) -> Result<i64, SourceControlError> {
        let body = CreateDeploymentRequest {
            git_ref: request.git_ref,
            task: request.task,
            environment: request.environment,
            auto_merge: false,
            required_contexts: [],
        };

        let response = self
            .request(Method::POST, &format!("/repos/{owner}/{repo}/deployments"))
            .json(&body)
            .send()
            .await?;
        let created: Created = Self::check(response).await?.json().await?;
        Ok(created.id)
    }

    async fn create_deployment_status(
        &self,
        owner: &str,
        repo: &str,
        deployment_id: i64,
        state: DeploymentState,
        target_url: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), SourceControlError> {
        let body = CreateStatusRequest {
            state,
            target_url,
            description,
        };

        let response = self
            .request(
                Method::POST,
                &format!("/repos/{owner}/{repo}/deployments/{deployment_id}/statuses"),
            )
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn list_deployments(
        &self,
        owner: &str,
        repo: &str,
        filter: DeploymentFilter<'_>,
    ) -> Result<Vec<Deployment>, SourceControlError> {
        let response = self
            .request(Method::GET, &format!("/repos/{owner}/{repo}/deployments"))
            .query(&[
                ("sha", filter.sha),
                ("task", filter.task),
                ("environment", filter.environment),
            ])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }
}

/// Creates one [`GitHubClient`] per tenant credential against a fixed API root.
#[derive(Debug, Clone)]
pub struct GitHubClientFactory {
    api_base: String,
}

impl GitHubClientFactory {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
        }
    }
}

impl Default for GitHubClientFactory {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

impl SourceControlFactory for GitHubClientFactory {
    fn for_token(&self, token: &str) -> Result<Box<dyn SourceControl>, SourceControlError> {
        Ok(Box::new(GitHubClient::new_with_api_base(
            token,
            self.api_base.clone(),
        )?))
    }
}
