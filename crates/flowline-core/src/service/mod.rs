//! Service layer: the operations exposed to submitters and operators.

pub mod instance;
