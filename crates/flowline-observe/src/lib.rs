//! Logging and trace export setup shared by Flowline binaries.

pub mod tracing_setup;
