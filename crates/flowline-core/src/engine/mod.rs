//! The claim-dispatch-execute-recover loop.
//!
//! - [`claim::ClaimEngine`]: claims due instances for this executor
//! - [`recovery::RecoveryManager`]: heartbeat and dead-node recovery
//! - [`worker_pool::WorkerPool`]: bounded task pool with back-pressure
//! - [`processor::StateProcessor`]: runs one claimed instance
//! - [`dispatcher::Dispatcher`]: the control loop composing the above
//!
//! [`node::Engine`] validates configuration, registers the executor and
//! starts the dispatcher.

pub mod claim;
pub mod dispatcher;
#[cfg(test)]
pub(crate) mod mock;
pub mod node;
pub mod periodic_logger;
pub mod processor;
pub mod recovery;
pub mod retry;
pub mod worker_pool;
