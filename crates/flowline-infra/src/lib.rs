//! Infrastructure layer for Flowline.
//!
//! Contains the SQLite implementations of the repository traits defined in
//! `flowline-core` and the loader for `flowline.toml`.

pub mod config;
pub mod sqlite;
