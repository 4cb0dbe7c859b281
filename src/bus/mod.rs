//! Message bus transport
//!
//! One topic exchange per source service, one queue per severity level. The
//! consumer acknowledges a delivery as soon as the router handed it to the
//! task pool, so work lost after that point is never redelivered.

pub mod consumer;
pub mod publisher;

pub use consumer::{BusConsumer, ConsumerHandle};
pub use publisher::{AmqpPublisher, FanoutPublisher};

/// AMQP URI of `host` (`host[:port]`)
pub fn amqp_uri(host: &str, userid: &str, password: &str, virtual_host: &str) -> String {
    let vhost = match virtual_host.trim_start_matches('/') {
        "" => "%2f",
        name => name,
    };
    format!("amqp://{userid}:{password}@{host}/{vhost}")
}
