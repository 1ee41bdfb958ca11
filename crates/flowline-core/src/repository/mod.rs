//! Repository trait definitions (ports) for the instance store.
//!
//! These traits define the storage interface that the infrastructure layer
//! (flowline-infra) implements. Core engine logic depends only on these
//! traits, never on concrete database implementations.

pub mod definition;
pub mod executor;
pub mod instance;
