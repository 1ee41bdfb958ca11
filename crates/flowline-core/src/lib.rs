//! Workflow engine and repository trait definitions for Flowline.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, the workflow-definition contract, and the engine that
//! claims, executes and recovers workflow instances. It depends only on
//! `flowline-types` -- never on `flowline-infra` or any database crate.

pub mod clock;
pub mod definition;
pub mod engine;
pub mod repository;
pub mod service;
