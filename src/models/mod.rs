//! # Data Models
//!
//! Persistent entities and shared response bodies.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod hook;

pub use hook::Entity as Hook;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "review-apps".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
