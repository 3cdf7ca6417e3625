//! # Repository Layer
//!
//! SeaORM-backed storage behind narrow traits, so that callers can be tested
//! against in-memory or failing stores.

pub mod hook;

pub use hook::{HookRepository, HookStore, NewHook, StoreError};
