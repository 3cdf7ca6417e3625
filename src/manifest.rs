//! Review manifest generation.
//!
//! Takes the permanent deployment manifest of a repository and produces one
//! suitable for an ephemeral review deployment: document-level defaults are
//! folded into the named application, fixed routing is stripped and a random
//! route is requested instead.

use std::{fs, io, path::Path};

use serde_yaml::{Mapping, Value};
use thiserror::Error;

const APPLICATIONS_KEY: &str = "applications";
const RANDOM_ROUTE_KEY: &str = "random-route";
const ROUTING_KEYS: &[&str] = &["host", "hosts", "domain", "domains"];

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Application {application} not found")]
    NotFound { application: String },
    #[error("failed to access manifest {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}

/// Writes a review manifest for `application` derived from `source` to `destination`.
pub fn transform(application: &str, source: &Path, destination: &Path) -> Result<(), ManifestError> {
    let raw = fs::read_to_string(source).map_err(|source_err| ManifestError::Io {
        path: source.display().to_string(),
        source: source_err,
    })?;
    let document: Value = serde_yaml::from_str(&raw).map_err(|err| ManifestError::Parse {
        path: source.display().to_string(),
        source: err,
    })?;

    let merged = review_application(application, &document)?;

    let mut output = Mapping::new();
    output.insert(
        Value::from(APPLICATIONS_KEY),
        Value::Sequence(vec![Value::Mapping(merged)]),
    );
    let rendered =
        serde_yaml::to_string(&Value::Mapping(output)).map_err(|err| ManifestError::Parse {
            path: destination.display().to_string(),
            source: err,
        })?;

    write_manifest(destination, rendered.as_bytes())
}

/// Builds the merged application entry without touching the filesystem.
pub fn review_application(application: &str, document: &Value) -> Result<Mapping, ManifestError> {
    let not_found = || ManifestError::NotFound {
        application: application.to_string(),
    };

    let root = document.as_mapping().ok_or_else(not_found)?;
    let apps = root
        .get(APPLICATIONS_KEY)
        .and_then(Value::as_sequence)
        .ok_or_else(not_found)?;

    let defaults: Mapping = root
        .iter()
        .filter(|(key, _)| key.as_str() != Some(APPLICATIONS_KEY))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let entry = apps
        .iter()
        .filter_map(Value::as_mapping)
        .find(|app| app.get("name").and_then(Value::as_str) == Some(application))
        .ok_or_else(not_found)?;

    let mut merged = deep_merge(&defaults, entry);
    for key in ROUTING_KEYS {
        merged.shift_remove(*key);
    }
    merged.insert(Value::from(RANDOM_ROUTE_KEY), Value::Bool(true));

    Ok(merged)
}

/// Merges `overlay` on top of `base`. Maps merge recursively, sequences
/// concatenate and any other value from `overlay` replaces the base value.
fn deep_merge(base: &Mapping, overlay: &Mapping) -> Mapping {
    let mut merged = base.clone();

    for (key, value) in overlay {
        let combined = match (merged.get(key), value) {
            (Some(Value::Mapping(existing)), Value::Mapping(incoming)) => {
                Value::Mapping(deep_merge(existing, incoming))
            }
            (Some(Value::Sequence(existing)), Value::Sequence(incoming)) => {
                Value::Sequence(existing.iter().chain(incoming).cloned().collect())
            }
            _ => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }

    merged
}

fn write_manifest(path: &Path, contents: &[u8]) -> Result<(), ManifestError> {
    let io_err = |source| ManifestError::Io {
        path: path.display().to_string(),
        source,
    };

    fs::write(path, contents).map_err(io_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o644)).map_err(io_err)?;
    }

    Ok(())
}
