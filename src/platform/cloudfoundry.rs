//! Cloud Foundry implementation of [`Platform`] on top of the `cf` CLI.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{
    CommandExecutor, CommandOutput, Invocation, Platform, PlatformContext, PlatformError,
    ServicePollPolicy, Sleeper,
};
use crate::descriptor::{ApplicationDescriptor, ServiceDeclaration};

const SERVICE_READY_MARKER: &str = "status: create succeeded";
const ROUTE_PREFIXES: &[&str] = &["urls:", "routes:"];

/// Login details for the platform API.
#[derive(Clone)]
pub struct PlatformCredentials {
    pub api_url: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for PlatformCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformCredentials")
            .field("api_url", &self.api_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct OrganizationResource {
    entity: Option<OrganizationEntity>,
}

#[derive(Debug, Deserialize)]
struct OrganizationEntity {
    name: Option<String>,
}

/// One CLI session, bound to a single workflow's working directory and `CF_HOME`.
pub struct CloudFoundry {
    credentials: PlatformCredentials,
    executor: Arc<dyn CommandExecutor>,
    context: PlatformContext,
    poll: ServicePollPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl CloudFoundry {
    pub fn new(
        credentials: PlatformCredentials,
        executor: Arc<dyn CommandExecutor>,
        context: PlatformContext,
        poll: ServicePollPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            credentials,
            executor,
            context,
            poll,
            sleeper,
        }
    }

    fn invocation<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Invocation::new(args, self.context.working_dir.clone())
            .with_env("CF_HOME", self.context.cf_home.display().to_string())
            .with_env("CF_COLOR", "false")
    }

    async fn run<I, S>(&self, args: I) -> Result<CommandOutput, PlatformError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.executor.run(self.invocation(args)).await
    }

    /// Runs a command and turns a non-zero exit into [`PlatformError::ExternalCommand`].
    async fn run_checked<I, S>(&self, args: I) -> Result<CommandOutput, PlatformError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let invocation = self.invocation(args);
        let verb = invocation.verb().to_string();
        let output = self.executor.run(invocation).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(PlatformError::ExternalCommand {
                verb,
                code: output.code,
                output: output.summary(),
            })
        }
    }

    async fn create_space(&self, space: &str) -> Result<(), PlatformError> {
        self.run_checked(["create-space", space]).await?;
        self.run_checked(["target", "-s", space]).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(service = %service.name))]
    async fn create_service(&self, service: &ServiceDeclaration) -> Result<(), PlatformError> {
        let mut args = vec![
            "create-service".to_string(),
            service.service.clone(),
            service.plan.clone(),
            service.name.clone(),
        ];
        if !service.tags.is_empty() {
            args.push("-t".to_string());
            args.push(service.tags.join(","));
        }
        if let Some(config) = service.config.as_ref().filter(|c| !c.is_empty()) {
            args.push("-c".to_string());
            args.push(serde_json::Value::Object(config.clone()).to_string());
        }

        self.run_checked(args).await?;
        self.wait_for_service(&service.name).await
    }

    async fn wait_for_service(&self, name: &str) -> Result<(), PlatformError> {
        let mut elapsed = Duration::ZERO;

        loop {
            let output = self.run(["service", name]).await?;
            if output.success() && service_ready(&output.stdout) {
                debug!(service = %name, waited_secs = elapsed.as_secs(), "Service ready");
                return Ok(());
            }

            elapsed += self.poll.interval;
            if self.poll.exhausted(elapsed) {
                warn!(service = %name, "Service did not become ready in time");
                return Err(PlatformError::ServiceTimeout {
                    service: name.to_string(),
                });
            }

            self.sleeper.sleep(self.poll.interval).await;
        }
    }

    async fn route(&self, app: &str) -> Result<String, PlatformError> {
        let output = self.run_checked(["app", app]).await?;
        parse_route(&output.stdout).ok_or_else(|| PlatformError::NotFound {
            resource: format!("route for app {app}"),
        })
    }
}

#[async_trait]
impl Platform for CloudFoundry {
    async fn authenticate(&self) -> Result<(), PlatformError> {
        let auth_error = |err: PlatformError| PlatformError::Auth {
            message: err.to_string(),
        };

        self.run_checked(["api", self.credentials.api_url.as_str()])
            .await
            .map_err(auth_error)?;
        self.run_checked([
            "auth",
            self.credentials.username.as_str(),
            self.credentials.password.as_str(),
        ])
        .await
        .map_err(auth_error)?;

        Ok(())
    }

    async fn target_org(&self, org_id: &str) -> Result<String, PlatformError> {
        let not_found = || PlatformError::NotFound {
            resource: format!("organization {org_id}"),
        };

        if org_id.is_empty()
            || !org_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(not_found());
        }

        let output = self
            .run(["curl", format!("/v2/organizations/{org_id}").as_str()])
            .await?;
        if !output.success() {
            return Err(not_found());
        }

        let name = serde_json::from_str::<OrganizationResource>(&output.stdout)
            .ok()
            .and_then(|resource| resource.entity)
            .and_then(|entity| entity.name)
            .filter(|name| !name.is_empty())
            .ok_or_else(not_found)?;

        self.run_checked(["target", "-o", name.as_str()]).await?;
        Ok(name)
    }

    #[instrument(skip_all, fields(app = %app.name, space = %space))]
    async fn create_environment(
        &self,
        app: &ApplicationDescriptor,
        space: &str,
    ) -> Result<String, PlatformError> {
        self.create_space(space).await?;

        for service in &app.services {
            self.create_service(service).await?;
        }

        let manifest = app.manifest.display().to_string();
        self.run_checked(["push", app.name.as_str(), "-f", manifest.as_str()])
            .await?;

        let route = self.route(&app.name).await?;
        info!(route = %route, "Review environment ready");
        Ok(route)
    }

    async fn delete_environment(&self, space: &str) -> Result<(), PlatformError> {
        self.run_checked(["delete-space", space, "-f"]).await?;
        Ok(())
    }
}

/// Matches the CLI's readiness line regardless of casing and column padding.
fn service_ready(output: &str) -> bool {
    output.lines().any(|line| {
        let normalized = line.split_whitespace().collect::<Vec<_>>().join(" ");
        normalized.eq_ignore_ascii_case(SERVICE_READY_MARKER)
    })
}

/// First route listed by `cf app`, from either the `urls:` or `routes:` line.
fn parse_route(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let line = line.trim_start();
        ROUTE_PREFIXES.iter().find_map(|prefix| {
            line.strip_prefix(prefix).and_then(|rest| {
                rest.split(',')
                    .map(str::trim)
                    .find(|route| !route.is_empty())
                    .map(str::to_string)
            })
        })
    })
}
