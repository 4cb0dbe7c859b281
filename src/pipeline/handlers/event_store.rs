use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use crate::message::{Message, Priority};
use crate::pipeline::chain::Handler;
use crate::storage::{EventRow, StorageBackend};

/// Nova events that are not about one instance
const NOVA_UNBOUND_EVENTS: &[&str] = &[
    "scheduler.run_instance.start",
    "scheduler.run_instance.end",
    "aggregate.create.start",
    "aggregate.create.end",
    "aggregate.addhost.start",
    "aggregate.addhost.end",
    "aggregate.removehost.start",
    "aggregate.removehost.end",
    "aggregate.delete.start",
    "aggregate.delete.end",
    "aggregate.updatemetadata.start",
    "aggregate.updatemetadata.end",
    "aggregate.updateprop.start",
    "aggregate.updateprop.end",
    "network.floating_ip.allocate",
    "network.floating_ip.deallocate",
    "add_host_to_aggregate",
    "remove_host_from_aggregate",
    "create_aggregate",
    "delete_aggregate",
];

const NEUTRON_RESOURCES: &[&str] = &["network", "port", "router", "subnet"];

/// Persists every message of its route as an event row
pub struct EventStoreHandler {
    service: String,
    storage: Arc<dyn StorageBackend>,
}

impl EventStoreHandler {
    pub fn new(service: impl Into<String>, storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            service: service.into(),
            storage,
        }
    }
}

fn string_at(message: &Message, path: &[&str]) -> Option<String> {
    message
        .payload_at(path)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Id of the object `message` is about, resolved per source service
pub fn object_id(service: &str, message: &Message) -> Option<String> {
    let event_type = message.event_type.as_str();

    match service {
        "nova" => {
            if NOVA_UNBOUND_EVENTS.contains(&event_type) || message.priority == Priority::Error {
                return None;
            }
            string_at(message, &["instance_id"])
        }
        "cinder" => match event_type {
            "volume_type.delete" if message.priority == Priority::Error => {
                string_at(message, &["id"])
            }
            "volume_type.create" | "volume_type.delete" => None,
            _ => string_at(message, &["volume_id"]),
        },
        "glance" => string_at(message, &["id"]),
        "neutron" => NEUTRON_RESOURCES.iter().find_map(|&resource| {
            let key = format!("{resource}_id");
            string_at(message, &[key.as_str()]).or_else(|| string_at(message, &[resource, "id"]))
        }),
        _ => None,
    }
}

#[async_trait]
impl Handler for EventStoreHandler {
    fn name(&self) -> &str {
        "event_store"
    }

    async fn handle(&self, message: &Message) -> anyhow::Result<()> {
        // some publishers (e.g. `volumeType`) carry no hostname
        let (binary, hostname) = message
            .binary_and_hostname()
            .unwrap_or((message.publisher_id.as_str(), ""));

        let event = EventRow {
            service: self.service.clone(),
            event_type: message.event_type.clone(),
            message_id: message.message_id.clone(),
            request_id: message.request_id().map(str::to_string),
            tenant_id: message.tenant_id().map(str::to_string),
            object_id: object_id(&self.service, message),
            priority: message.priority,
            binary: binary.to_string(),
            hostname: hostname.to_string(),
            timestamp: message.parsed_timestamp(),
            raw: message.to_json_without_context(),
        };
        trace!("storing {} event {}", self.service, event.event_type);

        self.storage.insert_event(event).await?;
        Ok(())
    }
}
