//! # Review Apps Library
//!
//! Per-pull-request review environments: GitHub webhooks in, Cloud Foundry
//! spaces out, plus a service broker that registers one webhook per instance.

pub mod config;
pub mod crypto;
pub mod db;
pub mod descriptor;
pub mod error;
pub mod handlers;
pub mod manifest;
pub mod models;
pub mod orchestrator;
pub mod platform;
pub mod registry;
pub mod repositories;
pub mod scm;
pub mod server;
pub mod signature;
pub mod telemetry;
pub use migration;
