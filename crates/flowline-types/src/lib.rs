//! Shared domain types for Flowline.
//!
//! Workflow instances, their action history, executors, definition summaries,
//! query filters, engine configuration, and the error enums shared by every
//! layer.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod action;
pub mod config;
pub mod definition;
pub mod error;
pub mod executor;
pub mod instance;
pub mod query;
