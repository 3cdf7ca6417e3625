//! `app.yml` application descriptor shipped inside the repository archive.

use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DESCRIPTOR_FILE: &str = "app.yml";

fn default_manifest() -> PathBuf {
    PathBuf::from("manifest.yml")
}

/// What to deploy for a review: the application and its backing services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDescriptor {
    pub name: String,
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
    #[serde(default)]
    pub services: Vec<ServiceDeclaration>,
}

/// A backing service created before the application is pushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDeclaration {
    /// Instance name, as referenced by the manifest's `services` list
    pub name: String,
    /// Marketplace offering
    pub service: String,
    pub plan: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("{path} not found in repository archive")]
    Missing { path: String },
    #[error("failed to read {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("invalid {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("manifest path {manifest} must stay inside the repository")]
    ManifestOutsideRepository { manifest: String },
}

impl ApplicationDescriptor {
    /// Loads `app.yml` from the root of an extracted application tree.
    pub fn load(app_dir: &Path) -> Result<Self, DescriptorError> {
        let path = app_dir.join(DESCRIPTOR_FILE);
        let display = path.display().to_string();

        let raw = fs::read_to_string(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => DescriptorError::Missing {
                path: DESCRIPTOR_FILE.to_string(),
            },
            _ => DescriptorError::Io {
                path: display.clone(),
                source,
            },
        })?;

        Self::parse(&raw).map_err(|source| DescriptorError::Parse {
            path: display,
            source,
        })
    }

    pub fn parse(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// Resolves the manifest path against the application directory.
    ///
    /// Absolute paths and `..` components are rejected, and so is a manifest
    /// that resolves outside `app_dir` through a symlink. A manifest that does
    /// not exist is returned as is and reported by the reader.
    pub fn manifest_path(&self, app_dir: &Path) -> Result<PathBuf, DescriptorError> {
        let outside = || DescriptorError::ManifestOutsideRepository {
            manifest: self.manifest.display().to_string(),
        };
        let escapes = self.manifest.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(outside());
        }

        let path = app_dir.join(&self.manifest);
        let resolved = match fs::canonicalize(&path) {
            Ok(resolved) => resolved,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(path),
            Err(source) => {
                return Err(DescriptorError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        let root = fs::canonicalize(app_dir).map_err(|source| DescriptorError::Io {
            path: app_dir.display().to_string(),
            source,
        })?;
        if !resolved.starts_with(&root) {
            return Err(outside());
        }
        Ok(path)
    }
}
