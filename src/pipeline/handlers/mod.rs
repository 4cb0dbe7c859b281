//! Concrete handlers, constructed by name through the
//! [`HandlerRegistry`](super::HandlerRegistry)

pub mod bi_log;
pub mod event_store;
pub mod log_error;
pub mod notifier;

pub use bi_log::{BiLogHandler, BiRecord, bi_log_callback};
pub use event_store::EventStoreHandler;
pub use log_error::LogErrorHandler;
pub use notifier::NotifierHandler;
