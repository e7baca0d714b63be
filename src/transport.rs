// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Transport
//!
//! The narrow interface the template and the dispatcher use to reach the broker:
//! publish a message, acknowledge or reject a delivery. `ChannelTransport` is the
//! lapin implementation; tests substitute their own.

use crate::{errors::AmqpError, message::Message};
use async_trait::async_trait;
use lapin::{
    options::{BasicAckOptions, BasicPublishOptions, BasicRejectOptions},
    Channel,
};
use std::sync::Arc;
use tracing::{debug, error};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publishes `message` to `exchange` with `routing_key`.
    ///
    /// Fails when the channel or connection can no longer be used. Callers
    /// surface the error; nothing here retries.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
    ) -> Result<(), AmqpError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;
}

/// lapin channel backed transport.
pub struct ChannelTransport {
    channel: Arc<Channel>,
}

impl ChannelTransport {
    pub fn new(channel: Arc<Channel>) -> Arc<ChannelTransport> {
        Arc::new(ChannelTransport { channel })
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &Message,
    ) -> Result<(), AmqpError> {
        debug!(exchange, routing_key, "publishing message");

        let into_err = |reason: String| AmqpError::PublishingError {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            reason,
        };

        let confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                message.body(),
                message.properties.to_amqp(),
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error publishing message");
                into_err(err.to_string())
            })?;

        confirm.await.map(|_| ()).map_err(|err| {
            error!(error = err.to_string(), "publish was not confirmed");
            into_err(err.to_string())
        })
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), delivery_tag, "error whiling ack msg");
                Err(AmqpError::AckMessageError(delivery_tag))
            }
            _ => Ok(()),
        }
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    delivery_tag, requeue, "error whiling reject msg"
                );
                Err(AmqpError::RejectMessageError(delivery_tag))
            }
            _ => Ok(()),
        }
    }
}
