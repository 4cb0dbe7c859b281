//! Notification ingestion pipeline
//!
//! The [`Router`] decodes each bus message and schedules it on the
//! [`HandlerChain`] of its route through a bounded [`TaskPool`]. Chains are
//! assembled at startup by the [`HandlerRegistry`].

pub mod chain;
pub mod handlers;
pub mod pool;
pub mod registry;
pub mod router;

pub use chain::{Handler, HandlerChain};
pub use pool::TaskPool;
pub use registry::{HandlerDeps, HandlerRegistry};
pub use router::Router;
