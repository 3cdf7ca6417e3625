//! # Deployment Platform Gateway
//!
//! Capability interface over the deployment platform: authenticate, target an
//! organization, create and delete isolated review spaces. The production
//! implementation drives the Cloud Foundry CLI through a [`CommandExecutor`].

use std::{io, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::config::AppConfig;
use crate::descriptor::ApplicationDescriptor;

pub mod cloudfoundry;
pub mod command;
pub mod poll;

pub use cloudfoundry::{CloudFoundry, PlatformCredentials};
pub use command::{CfExecutor, CommandExecutor, CommandOutput, Invocation};
pub use poll::{NoopSleeper, ServicePollPolicy, Sleeper, TokioSleeper};

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform authentication failed: {message}")]
    Auth { message: String },
    #[error("{resource} not found")]
    NotFound { resource: String },
    #[error("Service {service} incomplete")]
    ServiceTimeout { service: String },
    #[error("platform command '{verb}' failed with exit code {code:?}: {output}")]
    ExternalCommand {
        verb: String,
        code: Option<i32>,
        output: String,
    },
    #[error("platform command '{verb}' did not finish within {seconds}s")]
    Timeout { verb: String, seconds: u64 },
    #[error("failed to run platform command '{verb}': {source}")]
    Io { verb: String, source: io::Error },
}

/// Per-workflow execution context. Every command of one workflow runs in
/// `working_dir` with its own CLI home, so concurrent workflows never share
/// targeting state or session tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformContext {
    pub working_dir: PathBuf,
    pub cf_home: PathBuf,
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// Exchanges configured credentials for an active session.
    async fn authenticate(&self) -> Result<(), PlatformError>;

    /// Resolves `org_id` to its name and makes it the active organization.
    async fn target_org(&self, org_id: &str) -> Result<String, PlatformError>;

    /// Creates `space`, its backing services and the application; returns the
    /// route assigned to the application.
    async fn create_environment(
        &self,
        app: &ApplicationDescriptor,
        space: &str,
    ) -> Result<String, PlatformError>;

    /// Force-deletes `space` and everything in it.
    async fn delete_environment(&self, space: &str) -> Result<(), PlatformError>;
}

/// Builds a platform session bound to one workflow's context.
pub trait PlatformFactory: Send + Sync {
    fn create(&self, context: PlatformContext) -> Box<dyn Platform>;
}

/// Hands out [`CloudFoundry`] sessions sharing one executor and poll policy.
#[derive(Clone)]
pub struct CloudFoundryFactory {
    credentials: PlatformCredentials,
    executor: Arc<dyn CommandExecutor>,
    poll: ServicePollPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl CloudFoundryFactory {
    pub fn new(
        credentials: PlatformCredentials,
        executor: Arc<dyn CommandExecutor>,
        poll: ServicePollPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            credentials,
            executor,
            poll,
            sleeper,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            PlatformCredentials {
                api_url: config.cf_url.clone(),
                username: config.cf_username.clone(),
                password: config.cf_password.clone(),
            },
            Arc::new(CfExecutor::new(
                config.cf_binary.clone(),
                config.command_timeout(),
            )),
            ServicePollPolicy::new(config.service_poll_interval(), config.service_poll_timeout()),
            Arc::new(TokioSleeper),
        )
    }
}

impl PlatformFactory for CloudFoundryFactory {
    fn create(&self, context: PlatformContext) -> Box<dyn Platform> {
        Box::new(CloudFoundry::new(
            self.credentials.clone(),
            Arc::clone(&self.executor),
            context,
            self.poll,
            Arc::clone(&self.sleeper),
        ))
    }
}
