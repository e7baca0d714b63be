// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Configuration
//!
//! Connection, template and listener-container settings. Every struct has a
//! `Default` and can be loaded from environment variables; instances are built
//! once at start-up and passed explicitly to the components that need them.

use crate::errors::AmqpError;
use config::{Config, Environment};
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;

/// Broker connection settings, read from `RABBITMQ_*` variables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    pub connection_name: String,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        RabbitMQConfigs {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: String::new(),
            connection_name: "amqp-template".to_owned(),
        }
    }
}

impl RabbitMQConfigs {
    pub fn from_env() -> Result<Self, AmqpError> {
        load("RABBITMQ")
    }

    pub fn uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.vhost
        )
    }
}

/// Defaults for [`RabbitTemplate`](crate::template::RabbitTemplate), read from
/// `RABBITMQ_TEMPLATE_*` variables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TemplateConfigs {
    /// Exchange used when a send names none
    pub exchange: String,
    /// Routing key used by `send_default`
    pub routing_key: String,
    /// Reply-to put on request messages
    pub reply_address: String,
    /// Queue consumed for replies; the reply address may route to it through an exchange
    pub reply_queue: String,
    pub reply_timeout_ms: u64,
}

/// RabbitMQ direct reply-to pseudo queue.
pub const DIRECT_REPLY_TO: &str = "amq.rabbitmq.reply-to";

impl Default for TemplateConfigs {
    fn default() -> Self {
        TemplateConfigs {
            exchange: String::new(),
            routing_key: String::new(),
            reply_address: DIRECT_REPLY_TO.to_owned(),
            reply_queue: DIRECT_REPLY_TO.to_owned(),
            reply_timeout_ms: 5000,
        }
    }
}

impl TemplateConfigs {
    pub fn from_env() -> Result<Self, AmqpError> {
        load("RABBITMQ_TEMPLATE")
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

/// Listener container settings, read from `RABBITMQ_LISTENER_*` variables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ContainerConfigs {
    pub prefetch_count: u16,
    /// When false every failed delivery is discarded, whatever its cause.
    pub default_requeue_rejected: bool,
}

impl Default for ContainerConfigs {
    fn default() -> Self {
        ContainerConfigs {
            prefetch_count: 250,
            default_requeue_rejected: true,
        }
    }
}

impl ContainerConfigs {
    pub fn from_env() -> Result<Self, AmqpError> {
        load("RABBITMQ_LISTENER")
    }
}

fn load<T>(prefix: &str) -> Result<T, AmqpError>
where
    T: DeserializeOwned,
{
    Config::builder()
        .add_source(Environment::with_prefix(prefix).try_parsing(true))
        .build()
        .and_then(|cfg| cfg.try_deserialize::<T>())
        .map_err(|err| AmqpError::ConfigurationError(err.to_string()))
}
