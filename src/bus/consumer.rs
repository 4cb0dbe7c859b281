use std::sync::Arc;

use anyhow::{Context, Result};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use futures::{StreamExt, stream};
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use super::amqp_uri;
use crate::config::BusConfig;
use crate::message::RawMessage;
use crate::pipeline::Router;

/// Reconnect policy of the consumer; it never gives up
fn reconnect_backoff(config: &BusConfig) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(config.reconnect_initial())
        .with_max_interval(config.reconnect_max())
        .with_multiplier(2.0)
        .with_max_elapsed_time(None)
        .build()
}

/// Consumes every configured queue and hands deliveries to the router
pub struct BusConsumer {
    config: BusConfig,
    router: Arc<Router>,
}

impl BusConsumer {
    pub fn new(config: BusConfig, router: Arc<Router>) -> Self {
        Self { config, router }
    }

    /// Consume until `shutdown` flips, reconnecting on any transport error.
    #[instrument(skip_all)]
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if self.config.hosts.is_empty() {
            error!("no bus hosts configured, consumer not started");
            return;
        }

        let mut backoff = reconnect_backoff(&self.config);
        for host in self.config.hosts.iter().cycle() {
            match self.consume(host, &mut backoff, &mut shutdown).await {
                Ok(()) => break,
                Err(e) => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(backoff.max_interval);
                    warn!("bus connection to {host} lost: {e:#}, reconnecting in {delay:?}");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        debug!("bus consumer stopped");
    }

    /// One connection lifetime; `Ok` only when asked to shut down.
    async fn consume(
        &self,
        host: &str,
        backoff: &mut ExponentialBackoff,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let uri = amqp_uri(host, &self.config.userid, &self.config.password, &self.config.virtual_host);
        let connection = Connection::connect(&uri, ConnectionProperties::default())
            .await
            .with_context(|| format!("Connect to {host} failed"))?;
        let channel = connection.create_channel().await?;
        info!("Connected to bus at {host}");

        let mut streams = Vec::new();
        for service in &self.config.services {
            channel
                .exchange_declare(
                    &service.exchange,
                    ExchangeKind::Topic,
                    ExchangeDeclareOptions {
                        durable: service.durable,
                        auto_delete: service.auto_delete,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .with_context(|| format!("Declare exchange {} failed", service.exchange))?;

            for binding in &service.queues {
                if !self.router.has_route(&binding.route) {
                    warn!(
                        "queue of {} at {} routes to unknown chain '{}', not consuming it",
                        service.name, binding.level, binding.route
                    );
                    continue;
                }

                let queue = service.queue_name(binding);
                channel
                    .queue_declare(
                        &queue,
                        QueueDeclareOptions {
                            durable: service.durable,
                            auto_delete: service.auto_delete,
                            ..Default::default()
                        },
                        FieldTable::default(),
                    )
                    .await
                    .with_context(|| format!("Declare queue {queue} failed"))?;
                channel
                    .queue_bind(
                        &queue,
                        &service.exchange,
                        &queue,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .with_context(|| format!("Bind queue {queue} failed"))?;

                let consumer = channel
                    .basic_consume(
                        &queue,
                        &format!("stackwatch.{queue}"),
                        BasicConsumeOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .with_context(|| format!("Consume queue {queue} failed"))?;
                debug!("consuming {queue} into chain '{}'", binding.route);

                let route = binding.route.clone();
                streams.push(consumer.map(move |delivery| (route.clone(), delivery)).boxed());
            }
        }
        backoff.reset();

        let mut deliveries = stream::select_all(streams);
        loop {
            tokio::select! {
                next = deliveries.next() => match next {
                    Some((route, Ok(mut delivery))) => {
                        trace!(route = %route, "received delivery");
                        let data = std::mem::take(&mut delivery.data);
                        self.router.submit(&route, RawMessage::from(data)).await;
                        delivery
                            .ack(BasicAckOptions::default())
                            .await
                            .context("Ack delivery failed")?;
                    }
                    Some((_, Err(e))) => return Err(e).context("Consumer failed"),
                    None => anyhow::bail!("every consumer was cancelled"),
                },

                _ = shutdown.changed() => {
                    debug!("received shutdown signal");
                    if let Err(e) = connection.close(200, "shutdown").await {
                        debug!("closing bus connection failed: {e}");
                    }
                    return Ok(());
                }
            }
        }
    }
}

/// Handle to a running consumer task
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn spawn(consumer: BusConsumer) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(consumer.run(shutdown_rx));
        Self { shutdown, task }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!("bus consumer ended abnormally: {e}");
        }
    }
}
