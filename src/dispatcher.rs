// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Dispatcher
//!
//! This module routes deliveries to registered listeners and runs the consumers.
//!
//! - [`ListenerContainer`] is the registry of listener endpoints. For each delivery
//!   it looks up the listener by id, lets it process the message and performs the
//!   resulting ack or reject on the transport.
//! - [`RabbitMQDispatcher`] drives a container from lapin consumers, one per
//!   endpoint, and runs the reply consumer used by request/reply.
//!
//! Deliveries of one consumer are processed sequentially: the acknowledgement of
//! a delivery is decided before the next one is handled.

use crate::{
    config::ContainerConfigs,
    consumer::{consume, Acknowledgement, ListenerEndpoint},
    error_handler::ConditionalRejectingErrorHandler,
    errors::{AmqpError, HandlerError},
    handler::{MessageHandler, MessageListener, PayloadHandler},
    message::Message,
    template::RabbitTemplate,
    transport::Transport,
};
use futures_util::{future::join_all, StreamExt};
use lapin::{
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Channel, Consumer,
};
use opentelemetry::global;
use serde::{de::DeserializeOwned, Serialize};
use std::{collections::HashMap, future::Future, sync::Arc};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Registry of listener endpoints and the per-delivery entry point.
pub struct ListenerContainer {
    transport: Arc<dyn Transport>,
    template: Arc<RabbitTemplate>,
    error_handler: ConditionalRejectingErrorHandler,
    endpoints: HashMap<String, ListenerEndpoint>,
}

impl ListenerContainer {
    /// Creates an empty container.
    ///
    /// Replies are sent through `template`; acks and rejects go through `transport`.
    pub fn new(
        transport: Arc<dyn Transport>,
        template: Arc<RabbitTemplate>,
        cfg: &ContainerConfigs,
    ) -> Self {
        ListenerContainer {
            transport,
            template,
            error_handler: ConditionalRejectingErrorHandler::default()
                .default_requeue_rejected(cfg.default_requeue_rejected),
            endpoints: HashMap::default(),
        }
    }

    pub fn with_error_handler(mut self, error_handler: ConditionalRejectingErrorHandler) -> Self {
        self.error_handler = error_handler;
        self
    }

    /// Registers an endpoint. A second endpoint with the same id replaces the first.
    pub fn register(mut self, endpoint: ListenerEndpoint) -> Self {
        if self.endpoints.contains_key(endpoint.id()) {
            warn!(listener = endpoint.id(), "replacing listener");
        }

        self.endpoints.insert(endpoint.id().to_owned(), endpoint);
        self
    }

    /// Registers a payload handler converting with the template's converter.
    pub fn register_payload<F, Fut, I, O>(self, id: &str, queue: &str, handler: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, HandlerError>> + Send + 'static,
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
    {
        let listener = PayloadHandler::new(self.template.shared_converter(), handler);
        self.register(ListenerEndpoint::new(id, queue, Arc::new(listener)))
    }

    pub fn register_message<F, Fut>(self, id: &str, queue: &str, handler: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Message>, HandlerError>> + Send + 'static,
    {
        self.register(ListenerEndpoint::new(
            id,
            queue,
            Arc::new(MessageHandler::new(handler)),
        ))
    }

    pub fn register_listener(
        self,
        id: &str,
        queue: &str,
        listener: Arc<dyn MessageListener>,
    ) -> Self {
        self.register(ListenerEndpoint::new(id, queue, listener))
    }

    pub fn endpoint(&self, id: &str) -> Option<&ListenerEndpoint> {
        self.endpoints.get(id)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &ListenerEndpoint> {
        self.endpoints.values()
    }

    /// Decides the acknowledgement of `message` without touching the broker.
    ///
    /// A delivery for an unknown listener id is reported and rejected without requeue.
    pub async fn dispatch(&self, listener_id: &str, message: Message) -> Acknowledgement {
        let Some(endpoint) = self.endpoints.get(listener_id) else {
            self.error_handler
                .observer()
                .on_unknown_listener(listener_id, &message);
            return Acknowledgement::RejectNoRequeue;
        };

        consume(
            &global::tracer("amqp consumer"),
            message,
            endpoint,
            &self.template,
            &self.error_handler,
        )
        .await
    }

    /// Processes one delivery and acknowledges it on the transport.
    pub async fn on_delivery(
        &self,
        listener_id: &str,
        delivery_tag: u64,
        mut message: Message,
    ) -> Result<Acknowledgement, AmqpError> {
        message.properties.delivery_tag = Some(delivery_tag);

        let ack = self.dispatch(listener_id, message).await;
        debug!(listener = listener_id, delivery_tag, ?ack, "delivery processed");

        ack.apply(self.transport.as_ref(), delivery_tag).await?;
        Ok(ack)
    }
}

/// Runs a [`ListenerContainer`] from lapin consumers.
pub struct RabbitMQDispatcher {
    channel: Arc<Channel>,
    prefetch_count: u16,
    container: Arc<ListenerContainer>,
}

impl RabbitMQDispatcher {
    pub fn new(channel: Arc<Channel>, container: ListenerContainer, cfg: &ContainerConfigs) -> Self {
        RabbitMQDispatcher {
            channel,
            prefetch_count: cfg.prefetch_count,
            container: Arc::new(container),
        }
    }

    pub fn container(&self) -> &ListenerContainer {
        &self.container
    }

    /// Consumes every registered endpoint's queue until the consumers are cancelled.
    ///
    /// Each endpoint gets its own consumer, tagged with the listener id.
    pub async fn consume_blocking(&self) -> Result<(), AmqpError> {
        if self.container.endpoints.is_empty() {
            warn!("no listener registered, nothing to consume");
            return Ok(());
        }

        self.channel
            .basic_qos(self.prefetch_count, BasicQosOptions { global: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "failure to configure qos");
                AmqpError::QoSDeclarationError(self.prefetch_count.to_string())
            })?;

        let mut spawns = vec![];

        for endpoint in self.container.endpoints() {
            let mut consumer = self.basic_consume(endpoint.queue(), endpoint.id(), false).await?;

            let container = self.container.clone();
            let listener_id = endpoint.id().to_owned();

            spawns.push(tokio::spawn(async move {
                while let Some(result) = consumer.next().await {
                    match result {
                        Ok(delivery) => {
                            let message = Message::from_delivery(&delivery);
                            if let Err(err) = container
                                .on_delivery(&listener_id, delivery.delivery_tag, message)
                                .await
                            {
                                error!(error = err.to_string(), "error consume msg");
                            }
                        }

                        Err(err) => error!(error = err.to_string(), "errors consume msg"),
                    }
                }
            }));
        }

        let spawned = join_all(spawns).await;
        for res in spawned {
            if res.is_err() {
                error!("tokio process error");
                return Err(AmqpError::InternalError);
            }
        }

        Ok(())
    }

    /// Starts the consumer feeding replies to `template`.
    ///
    /// Must run before the first `send_and_receive`. Consumes the template's reply
    /// queue (`TemplateConfigs::reply_queue`), which must be a queue name; the reply
    /// address put on requests only has to route to it. Direct reply-to requires
    /// auto-ack, which is used for any reply queue.
    pub async fn consume_replies(
        &self,
        template: Arc<RabbitTemplate>,
    ) -> Result<JoinHandle<()>, AmqpError> {
        let queue = template.reply_queue().to_owned();
        let mut consumer = self.basic_consume(&queue, "reply-consumer", true).await?;

        Ok(tokio::spawn(async move {
            while let Some(result) = consumer.next().await {
                match result {
                    Ok(delivery) => {
                        template.handle_reply(Message::from_delivery(&delivery));
                    }
                    Err(err) => error!(error = err.to_string(), "errors consume reply"),
                }
            }
        }))
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        no_ack: bool,
    ) -> Result<Consumer, AmqpError> {
        self.channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), queue, "failure to create the consumer");
                AmqpError::BindingConsumerError(queue.to_owned())
            })
    }
}
