//! Shared fixtures for integration tests.
//!
//! In-memory SQLite with migrations applied, a scripted `cf` executor, an
//! in-memory tarball builder and an [`AppState`] wired against a mock GitHub.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use flate2::{Compression, write::GzEncoder};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use url::Url;

use review_apps::{
    config::AppConfig,
    crypto::CredentialCipher,
    orchestrator::Orchestrator,
    platform::{
        CloudFoundryFactory, CommandExecutor, CommandOutput, Invocation, NoopSleeper,
        PlatformCredentials, PlatformError, ServicePollPolicy,
    },
    registry::HookRegistry,
    repositories::HookRepository,
    scm::GitHubClientFactory,
    server::AppState,
};

pub const BROKER_USERNAME: &str = "broker";
pub const BROKER_PASSWORD: &str = "broker-pass";
pub const TEST_KEY: [u8; 32] = [42u8; 32];

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

/// Builds a gzipped tarball with every file under a single `prefix/` directory,
/// the way GitHub lays out repository archives.
pub fn tarball(prefix: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{prefix}/{name}"), contents.as_bytes())
            .expect("append tar entry");
    }

    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip")
}

pub const APP_DESCRIPTOR: &str = r#"
name: widgets-pr
manifest: manifest.yml
services:
  - name: widgets-db
    service: postgres
    plan: small
"#;

pub const APP_MANIFEST: &str = r#"
applications:
  - name: widgets-pr
    memory: 256M
    host: widgets
    services:
      - widgets-db
"#;

/// Archive for a repository that deploys the `widgets-pr` app with one service.
pub fn widgets_archive() -> Vec<u8> {
    tarball(
        "acme-widgets-abc1234",
        &[("app.yml", APP_DESCRIPTOR), ("manifest.yml", APP_MANIFEST)],
    )
}

/// Answers of a platform where every step succeeds.
pub fn healthy_response(invocation: &Invocation) -> CommandOutput {
    match invocation.verb() {
        "curl" => CommandOutput::ok(r#"{"entity":{"name":"acme-org"}}"#),
        "service" => CommandOutput::ok("name: widgets-db\nstatus:    create succeeded\n"),
        "app" => CommandOutput::ok("name:   widgets-pr\nroutes: widgets-pr-quiet-fox.apps.example.com\n"),
        _ => CommandOutput::ok(""),
    }
}

type Responder = Box<dyn Fn(&Invocation) -> CommandOutput + Send + Sync>;

/// Stands in for the `cf` binary: answers every call from a closure and
/// records what was asked.
pub struct ScriptedCf {
    calls: Mutex<Vec<Invocation>>,
    responder: Responder,
}

impl ScriptedCf {
    pub fn new(
        responder: impl Fn(&Invocation) -> CommandOutput + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        })
    }

    /// A platform where every step succeeds.
    pub fn healthy() -> Arc<Self> {
        Self::new(healthy_response)
    }

    /// Every recorded call, arguments joined by spaces.
    pub fn commands(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|call| call.args.join(" "))
            .collect()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedCf {
    async fn run(&self, invocation: Invocation) -> Result<CommandOutput, PlatformError> {
        let output = (self.responder)(&invocation);
        self.calls.lock().unwrap().push(invocation);
        Ok(output)
    }
}

pub fn test_config(github_api_base: &str) -> AppConfig {
    AppConfig {
        cf_url: "https://api.cf.example.com".to_string(),
        cf_username: "deployer".to_string(),
        cf_password: "cf-pass".to_string(),
        broker_username: BROKER_USERNAME.to_string(),
        broker_password: BROKER_PASSWORD.to_string(),
        database_url: "sqlite::memory:".to_string(),
        base_url: "https://review.example.com".to_string(),
        github_api_base: github_api_base.to_string(),
        crypto_key: Some(TEST_KEY.to_vec()),
        ..AppConfig::default()
    }
}

/// Application state backed by SQLite, a GitHub API at `github_api_base`
/// and the scripted `cf` executor.
pub async fn test_state(config: AppConfig, cf: Arc<ScriptedCf>) -> Result<AppState> {
    let db = setup_test_db_arc().await?;
    let cipher = CredentialCipher::from_key_bytes(config.crypto_key.clone())?;

    let scm = Arc::new(GitHubClientFactory::new(config.github_api_base.clone()));
    let store = Arc::new(HookRepository::new(db.clone(), cipher));
    let registry = HookRegistry::new(store, scm.clone(), Url::parse(&config.base_url)?);

    let platform = CloudFoundryFactory::new(
        PlatformCredentials {
            api_url: config.cf_url.clone(),
            username: config.cf_username.clone(),
            password: config.cf_password.clone(),
        },
        cf,
        ServicePollPolicy::new(
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(3),
        ),
        Arc::new(NoopSleeper),
    );
    let orchestrator = Orchestrator::new(scm, Arc::new(platform));

    Ok(AppState {
        config: Arc::new(config),
        db,
        registry,
        orchestrator,
    })
}

/// `Authorization` header value for the broker's basic auth.
pub fn broker_auth_header() -> String {
    use base64::{Engine as _, engine::general_purpose};
    format!(
        "Basic {}",
        general_purpose::STANDARD.encode(format!("{BROKER_USERNAME}:{BROKER_PASSWORD}"))
    )
}

/// A `pull_request` delivery for `acme/widgets#7` at commit `abc1234`.
pub fn pull_request_event(action: &str) -> serde_json::Value {
    serde_json::json!({
        "action": action,
        "number": 7,
        "pull_request": {
            "head": {
                "sha": "abc1234",
                "repo": {
                    "name": "widgets",
                    "full_name": "acme/widgets",
                    "owner": { "login": "acme" }
                }
            },
            "base": {
                "sha": "def5678",
                "repo": {
                    "name": "widgets",
                    "full_name": "acme/widgets",
                    "owner": { "login": "acme" }
                }
            }
        }
    })
}
