//! `pull_request` webhook payload.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PullRequestAction {
    Opened,
    Reopened,
    Synchronize,
    Closed,
    Other(String),
}

impl From<String> for PullRequestAction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "opened" => Self::Opened,
            "reopened" => Self::Reopened,
            "synchronize" => Self::Synchronize,
            "closed" => Self::Closed,
            _ => Self::Other(value),
        }
    }
}

impl From<PullRequestAction> for String {
    fn from(action: PullRequestAction) -> Self {
        action.as_str().to_string()
    }
}

impl PullRequestAction {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Opened => "opened",
            Self::Reopened => "reopened",
            Self::Synchronize => "synchronize",
            Self::Closed => "closed",
            Self::Other(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub action: PullRequestAction,
    pub number: u64,
    pub pull_request: PullRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub head: HeadRef,
    pub base: BaseRef,
}

/// The head repository is `null` once the fork behind the pull request is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadRef {
    pub sha: String,
    #[serde(default)]
    pub repo: Option<Repository>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseRef {
    pub sha: String,
    pub repo: Repository,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub full_name: String,
    pub owner: Owner,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub login: String,
}

/// Space name for a pull request; identical for every action on it.
pub fn deployment_key(owner: &str, repo: &str, number: u64) -> String {
    format!("{owner}-{repo}-pull-{number}")
}

/// GitHub owner and repository names: ASCII alphanumerics, `-`, `_` and `.`.
pub fn is_valid_name(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl PullRequestEvent {
    /// Base repository owner; environments belong to the target repository.
    pub fn owner(&self) -> &str {
        &self.pull_request.base.repo.owner.login
    }

    pub fn repo(&self) -> &str {
        &self.pull_request.base.repo.name
    }

    pub fn head_sha(&self) -> &str {
        &self.pull_request.head.sha
    }

    pub fn deployment_key(&self) -> String {
        deployment_key(self.owner(), self.repo(), self.number)
    }

    /// Checks the fields that end up in URLs, file names and CLI arguments.
    pub fn validate(&self) -> Result<(), String> {
        if !is_valid_name(self.owner()) || !is_valid_name(self.repo()) {
            return Err(format!(
                "invalid repository name {}/{}",
                self.owner(),
                self.repo()
            ));
        }
        let sha = self.head_sha();
        if sha.len() < 7 || !sha.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("invalid head sha {sha:?}"));
        }
        Ok(())
    }
}
