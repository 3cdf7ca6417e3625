//! # Pull Request Orchestrator
//!
//! Turns one `pull_request` event into the matching environment transition:
//! provision on open, reopen or synchronize; deprovision on close; nothing
//! otherwise. There is no local state: the deployment key derived from the
//! base repository and PR number ties provision and deprovision together.
//!
//! Each run owns a private temp directory holding the extracted archive and
//! the platform CLI home. Steps run strictly in order and a failure aborts the
//! rest without rolling back what already happened on the platform.

use std::{io, path::PathBuf, sync::Arc};

use metrics::counter;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::descriptor::{ApplicationDescriptor, DescriptorError};
use crate::manifest::{self, ManifestError};
use crate::platform::{Platform, PlatformContext, PlatformError, PlatformFactory};
use crate::scm::{
    DeploymentFilter, DeploymentRequest, DeploymentState, SourceControl, SourceControlError,
    SourceControlFactory,
};

pub mod event;

pub use event::{PullRequestAction, PullRequestEvent, deployment_key, is_valid_name};

pub const DEPLOYMENT_TASK: &str = "deploy:review";
pub const DEPLOYMENT_ENVIRONMENT: &str = "review";
const DEPLOYED_DESCRIPTION: &str = "Deployed review app";
const FAILED_DESCRIPTION: &str = "Failed to deploy review app";
const DELETED_DESCRIPTION: &str = "Deleted review app";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("failed to prepare workspace: {0}")]
    Workspace(#[source] io::Error),
    #[error(transparent)]
    SourceControl(#[from] SourceControlError),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Credentials and platform organization a workflow acts with.
#[derive(Clone, Copy)]
pub struct HookTarget<'a> {
    pub token: &'a str,
    pub org_id: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Provisioned { route: String },
    Deprovisioned { marked_inactive: bool },
    Ignored { action: String },
}

/// Private scratch space for one workflow, removed on drop.
struct Workspace {
    root: TempDir,
    cf_home: PathBuf,
}

impl Workspace {
    fn new() -> Result<Self, OrchestratorError> {
        let root = tempfile::Builder::new()
            .prefix("review-app-")
            .tempdir()
            .map_err(OrchestratorError::Workspace)?;
        let cf_home = root.path().join("cf-home");
        std::fs::create_dir_all(&cf_home).map_err(OrchestratorError::Workspace)?;
        Ok(Self { root, cf_home })
    }

    fn archive_dir(&self) -> Result<PathBuf, OrchestratorError> {
        let dir = self.root.path().join("archive");
        std::fs::create_dir_all(&dir).map_err(OrchestratorError::Workspace)?;
        Ok(dir)
    }

    fn context(&self, working_dir: PathBuf) -> PlatformContext {
        PlatformContext {
            working_dir,
            cf_home: self.cf_home.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    scm: Arc<dyn SourceControlFactory>,
    platform: Arc<dyn PlatformFactory>,
}

impl Orchestrator {
    pub fn new(scm: Arc<dyn SourceControlFactory>, platform: Arc<dyn PlatformFactory>) -> Self {
        Self { scm, platform }
    }

    #[instrument(
        skip_all,
        fields(action = %event.action.as_str(), key = %event.deployment_key())
    )]
    pub async fn handle(
        &self,
        event: &PullRequestEvent,
        target: HookTarget<'_>,
    ) -> Result<Outcome, OrchestratorError> {
        let outcome = match &event.action {
            PullRequestAction::Opened | PullRequestAction::Reopened | PullRequestAction::Synchronize => {
                let result = self.provision(event, target).await;
                let label = if result.is_ok() { "success" } else { "failure" };
                counter!("review_apps_provision_total", "outcome" => label).increment(1);
                result?
            }
            PullRequestAction::Closed => {
                let result = self.deprovision(event, target).await;
                let label = if result.is_ok() { "success" } else { "failure" };
                counter!("review_apps_deprovision_total", "outcome" => label).increment(1);
                result?
            }
            PullRequestAction::Other(action) => Outcome::Ignored {
                action: action.clone(),
            },
        };

        info!(outcome = ?outcome, "Pull request event handled");
        Ok(outcome)
    }

    async fn provision(
        &self,
        event: &PullRequestEvent,
        target: HookTarget<'_>,
    ) -> Result<Outcome, OrchestratorError> {
        event.validate().map_err(OrchestratorError::InvalidEvent)?;
        let (owner, repo, sha) = (event.owner(), event.repo(), event.head_sha());

        let scm = self.scm.for_token(target.token)?;
        let workspace = Workspace::new()?;

        let app_dir = scm
            .fetch_archive(owner, repo, sha, &workspace.archive_dir()?)
            .await?;
        let descriptor = ApplicationDescriptor::load(&app_dir)?;

        let deployment_id = scm
            .create_deployment(
                owner,
                repo,
                DeploymentRequest {
                    git_ref: sha,
                    task: DEPLOYMENT_TASK,
                    environment: DEPLOYMENT_ENVIRONMENT,
                },
            )
            .await?;

        let deployed = self
            .deploy(&workspace, app_dir, descriptor, event, target.org_id)
            .await;

        match deployed {
            Ok(route) => {
                let target_url = format!("https://{route}");
                scm.create_deployment_status(
                    owner,
                    repo,
                    deployment_id,
                    DeploymentState::Success,
                    Some(&target_url),
                    Some(DEPLOYED_DESCRIPTION),
                )
                .await?;
                Ok(Outcome::Provisioned { route })
            }
            Err(err) => {
                mark_failed(scm.as_ref(), owner, repo, deployment_id).await;
                Err(err)
            }
        }
    }

    /// Manifest rewrite and platform steps; everything after the deployment record exists.
    async fn deploy(
        &self,
        workspace: &Workspace,
        app_dir: PathBuf,
        mut descriptor: ApplicationDescriptor,
        event: &PullRequestEvent,
        org_id: &str,
    ) -> Result<String, OrchestratorError> {
        let source = descriptor.manifest_path(&app_dir)?;
        let destination = app_dir.join(format!("manifest-review-{}.yml", event.head_sha()));
        manifest::transform(&descriptor.name, &source, &destination)?;
        descriptor.manifest = destination;

        let platform = self.platform.create(workspace.context(app_dir));
        login(platform.as_ref(), org_id).await?;

        Ok(platform
            .create_environment(&descriptor, &event.deployment_key())
            .await?)
    }

    async fn deprovision(
        &self,
        event: &PullRequestEvent,
        target: HookTarget<'_>,
    ) -> Result<Outcome, OrchestratorError> {
        event.validate().map_err(OrchestratorError::InvalidEvent)?;
        let (owner, repo) = (event.owner(), event.repo());

        let workspace = Workspace::new()?;
        let platform = self
            .platform
            .create(workspace.context(workspace.root.path().to_path_buf()));
        login(platform.as_ref(), target.org_id).await?;
        platform.delete_environment(&event.deployment_key()).await?;

        let scm = self.scm.for_token(target.token)?;
        let deployments = scm
            .list_deployments(
                owner,
                repo,
                DeploymentFilter {
                    sha: event.head_sha(),
                    task: DEPLOYMENT_TASK,
                    environment: DEPLOYMENT_ENVIRONMENT,
                },
            )
            .await?;

        let Some(latest) = deployments.iter().max_by_key(|d| d.id) else {
            return Ok(Outcome::Deprovisioned {
                marked_inactive: false,
            });
        };

        scm.create_deployment_status(
            owner,
            repo,
            latest.id,
            DeploymentState::Inactive,
            None,
            Some(DELETED_DESCRIPTION),
        )
        .await?;

        Ok(Outcome::Deprovisioned {
            marked_inactive: true,
        })
    }
}

async fn login(platform: &dyn Platform, org_id: &str) -> Result<(), PlatformError> {
    platform.authenticate().await?;
    platform.target_org(org_id).await?;
    Ok(())
}

async fn mark_failed(scm: &dyn SourceControl, owner: &str, repo: &str, deployment_id: i64) {
    if let Err(err) = scm
        .create_deployment_status(
            owner,
            repo,
            deployment_id,
            DeploymentState::Error,
            None,
            Some(FAILED_DESCRIPTION),
        )
        .await
    {
        warn!(deployment_id, error = %err, "Failed to mark deployment as errored");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scm::Deployment;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct FakeScm {
        log: Log,
        deployments: Vec<Deployment>,
        manifest: &'static str,
    }

    struct FakeClient {
        log: Log,
        deployments: Vec<Deployment>,
        manifest: &'static str,
    }

    impl SourceControlFactory for FakeScm {
        fn for_token(&self, token: &str) -> Result<Box<dyn SourceControl>, SourceControlError> {
            assert_eq!(token, "ghp_token");
            Ok(Box::new(FakeClient {
                log: self.log.clone(),
                deployments: self.deployments.clone(),
                manifest: self.manifest,
            }))
        }
    }

    #[async_trait]
    impl SourceControl for FakeClient {
        async fn register_hook(&self, _: &str, _: &str, _: &str, _: &str) -> Result<i64, SourceControlError> {
            unimplemented!()
        }

        async fn unregister_hook(&self, _: &str, _: &str, _: i64) -> Result<(), SourceControlError> {
            unimplemented!()
        }

        async fn fetch_archive(
            &self,
            owner: &str,
            repo: &str,
            sha: &str,
            dest: &Path,
        ) -> Result<PathBuf, SourceControlError> {
            self.log.lock().unwrap().push(format!("fetch {owner}/{repo}@{sha}"));
            let dir = dest.join(format!("{owner}-{repo}-{}", &sha[..7]));
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("app.yml"), "name: widgets-pr\n").unwrap();
            std::fs::write(dir.join("manifest.yml"), self.manifest).unwrap();
            Ok(dir)
        }

        async fn create_deployment(
            &self,
            _: &str,
            _: &str,
            request: DeploymentRequest<'_>,
        ) -> Result<i64, SourceControlError> {
            self.log.lock().unwrap().push(format!(
                "deployment {} {} {}",
                request.git_ref, request.task, request.environment
            ));
            Ok(11)
        }

        async fn create_deployment_status(
            &self,
            _: &str,
            _: &str,
            id: i64,
            state: DeploymentState,
            target_url: Option<&str>,
            description: Option<&str>,
        ) -> Result<(), SourceControlError> {
            self.log.lock().unwrap().push(format!(
                "status {id} {state:?} {} {}",
                target_url.unwrap_or("-"),
                description.unwrap_or("-")
            ));
            Ok(())
        }

        async fn list_deployments(
            &self,
            _: &str,
            _: &str,
            filter: DeploymentFilter<'_>,
        ) -> Result<Vec<Deployment>, SourceControlError> {
            self.log.lock().unwrap().push(format!("list {}", filter.sha));
            Ok(self.deployments.clone())
        }
    }

    struct FakePlatform {
        log: Log,
        fail_create: bool,
    }

    struct FakeSession {
        log: Log,
        context: PlatformContext,
        fail_create: bool,
    }

    impl PlatformFactory for FakePlatform {
        fn create(&self, context: PlatformContext) -> Box<dyn Platform> {
            Box::new(FakeSession {
                log: self.log.clone(),
                context,
                fail_create: self.fail_create,
            })
        }
    }

    #[async_trait]
    impl Platform for FakeSession {
        async fn authenticate(&self) -> Result<(), PlatformError> {
            self.log.lock().unwrap().push("auth".to_string());
            Ok(())
        }

        async fn target_org(&self, org_id: &str) -> Result<String, PlatformError> {
            self.log.lock().unwrap().push(format!("target {org_id}"));
            Ok("acme-org".to_string())
        }

        async fn create_environment(
            &self,
            app: &ApplicationDescriptor,
            space: &str,
        ) -> Result<String, PlatformError> {
            assert!(self.context.working_dir.join("app.yml").exists());
            let manifest = std::fs::read_to_string(&app.manifest).unwrap();
            assert!(manifest.contains("random-route: true"));
            self.log.lock().unwrap().push(format!("create {space}"));
            if self.fail_create {
                return Err(PlatformError::ServiceTimeout {
                    service: "widgets-db".to_string(),
                });
            }
            Ok("widgets-pr-abc.apps.example.com".to_string())
        }

        async fn delete_environment(&self, space: &str) -> Result<(), PlatformError> {
            self.log.lock().unwrap().push(format!("delete {space}"));
            Ok(())
        }
    }

    const SHA: &str = "abc1234def5678abc1234def5678abc1234def56";
    const MANIFEST: &str = "applications:\n- name: widgets-pr\n  host: widgets\n";

    fn event(action: &str) -> PullRequestEvent {
        serde_json::from_value(serde_json::json!({
            "action": action,
            "number": 7,
            "pull_request": {
                "head": {"sha": SHA, "repo": {"name": "widgets", "full_name": "acme/widgets", "owner": {"login": "acme"}}},
                "base": {"sha": SHA, "repo": {"name": "widgets", "full_name": "acme/widgets", "owner": {"login": "acme"}}}
            }
        }))
        .unwrap()
    }

    fn orchestrator(log: &Log, fail_create: bool, deployments: Vec<Deployment>, manifest: &'static str) -> Orchestrator {
        Orchestrator::new(
            Arc::new(FakeScm {
                log: log.clone(),
                deployments,
                manifest,
            }),
            Arc::new(FakePlatform {
                log: log.clone(),
                fail_create,
            }),
        )
    }

    fn target() -> HookTarget<'static> {
        HookTarget {
            token: "ghp_token",
            org_id: "org-1",
        }
    }

    fn deployment(id: i64) -> Deployment {
        Deployment {
            id,
            sha: SHA.to_string(),
            git_ref: SHA.to_string(),
            task: DEPLOYMENT_TASK.to_string(),
            environment: DEPLOYMENT_ENVIRONMENT.to_string(),
        }
    }

    #[tokio::test]
    async fn test_provision_runs_steps_in_order() {
        let log = Log::default();
        let outcome = orchestrator(&log, false, vec![], MANIFEST)
            .handle(&event("opened"), target())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::Provisioned {
                route: "widgets-pr-abc.apps.example.com".to_string()
            }
        );
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                format!("fetch acme/widgets@{SHA}"),
                format!("deployment {SHA} deploy:review review"),
                "auth".to_string(),
                "target org-1".to_string(),
                "create acme-widgets-pull-7".to_string(),
                "status 11 Success https://widgets-pr-abc.apps.example.com Deployed review app".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_provision_failure_marks_deployment_errored() {
        let log = Log::default();
        let err = orchestrator(&log, true, vec![], MANIFEST)
            .handle(&event("synchronize"), target())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::Platform(PlatformError::ServiceTimeout { .. })
        ));
        assert_eq!(
            log.lock().unwrap().last().unwrap(),
            "status 11 Error - Failed to deploy review app"
        );
    }

    #[tokio::test]
    async fn test_missing_application_in_manifest_fails_before_platform() {
        let log = Log::default();
        let err = orchestrator(&log, false, vec![], "applications:\n- name: other\n")
            .handle(&event("opened"), target())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OrchestratorError::Manifest(ManifestError::NotFound { .. })
        ));
        let log = log.lock().unwrap();
        assert!(!log.iter().any(|entry| entry == "auth"));
        assert_eq!(log.last().unwrap(), "status 11 Error - Failed to deploy review app");
    }

    #[tokio::test]
    async fn test_close_marks_latest_deployment_inactive() {
        let log = Log::default();
        let outcome = orchestrator(&log, false, vec![deployment(3), deployment(9), deployment(5)], MANIFEST)
            .handle(&event("closed"), target())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Deprovisioned { marked_inactive: true });
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "auth".to_string(),
                "target org-1".to_string(),
                "delete acme-widgets-pull-7".to_string(),
                format!("list {SHA}"),
                "status 9 Inactive - Deleted review app".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_close_without_deployments_is_noop() {
        let log = Log::default();
        let outcome = orchestrator(&log, false, vec![], MANIFEST)
            .handle(&event("closed"), target())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Deprovisioned { marked_inactive: false });
        assert!(!log.lock().unwrap().iter().any(|e| e.starts_with("status")));
    }

    #[tokio::test]
    async fn test_other_actions_are_ignored() {
        let log = Log::default();
        let outcome = orchestrator(&log, false, vec![], MANIFEST)
            .handle(&event("labeled"), target())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            Outcome::Ignored {
                action: "labeled".to_string()
            }
        );
        assert!(log.lock().unwrap().is_empty());
    }
}
