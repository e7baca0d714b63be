// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Definitions
//!
//! This module provides types for describing RabbitMQ exchanges. Exchanges are the
//! routing mechanism in RabbitMQ that determine how messages are distributed to
//! queues. An `ExchangeDefinition` is a plain value: it is declared on the broker
//! by an [`Admin`](crate::topology::Admin), never by this module.

use crate::errors::AmqpError;
use lapin::types::{AMQPValue, LongString, ShortString};
use std::{
    collections::BTreeMap,
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

/// Constant for the header field used to specify the delayed exchange type
pub const AMQP_HEADERS_DELAYED_EXCHANGE_TYPE: &str = "x-delayed-type";

/// Broker-specific argument map shared by exchanges, queues and bindings.
pub type Arguments = BTreeMap<ShortString, AMQPValue>;

/// Represents the types of exchanges available in RabbitMQ.
///
/// Each exchange type has specific routing behavior:
/// - Direct: Routes messages to queues based on an exact match of routing keys
/// - Fanout: Broadcasts messages to all bound queues regardless of routing keys
/// - Topic: Routes messages based on wildcard pattern matching of routing keys
/// - Headers: Routes based on message header values instead of routing keys
/// - XMessageDelayed: Extension for delayed message delivery (plugin required)
/// - Custom: Any other exchange type provided by a broker plugin
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
    XMessageDelayed,
    Custom(String),
}

impl ExchangeKind {
    /// The type token used on the wire and as the scheme of structured addresses.
    pub fn as_str(&self) -> &str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
            ExchangeKind::XMessageDelayed => "x-delayed-message",
            ExchangeKind::Custom(kind) => kind.as_str(),
        }
    }
}

impl FromStr for ExchangeKind {
    type Err = AmqpError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        match token {
            "direct" => Ok(ExchangeKind::Direct),
            "fanout" => Ok(ExchangeKind::Fanout),
            "topic" => Ok(ExchangeKind::Topic),
            "headers" => Ok(ExchangeKind::Headers),
            "x-delayed-message" => Ok(ExchangeKind::XMessageDelayed),
            "" => Err(AmqpError::InvalidExchangeKind(token.to_owned())),
            custom => Ok(ExchangeKind::Custom(custom.to_owned())),
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: &ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            other => lapin::ExchangeKind::Custom(other.as_str().to_owned()),
        }
    }
}

/// Definition of a RabbitMQ exchange with its configuration parameters.
///
/// Name and kind are fixed at construction. The argument map is the only part
/// that can change afterwards, through [`arguments_mut`](Self::arguments_mut);
/// it is not synchronized, so mutate it before sharing the definition across tasks.
///
/// Two definitions are equal when every field matches.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeDefinition {
    name: String,
    kind: ExchangeKind,
    pub(crate) delete: bool,
    pub(crate) durable: bool,
    pub(crate) passive: bool,
    pub(crate) internal: bool,
    pub(crate) no_wait: bool,
    pub(crate) params: Arguments,
}

impl ExchangeDefinition {
    /// Creates a new direct exchange definition with the given name.
    ///
    /// # Errors
    /// `AmqpError::InvalidName` if `name` is empty.
    pub fn new(name: &str) -> Result<ExchangeDefinition, AmqpError> {
        Self::with_kind(name, ExchangeKind::Direct)
    }

    /// Creates a new exchange definition of the given kind.
    ///
    /// # Errors
    /// `AmqpError::InvalidName` if `name` is empty,
    /// `AmqpError::InvalidExchangeKind` for an empty custom kind.
    pub fn with_kind(name: &str, kind: ExchangeKind) -> Result<ExchangeDefinition, AmqpError> {
        if name.is_empty() {
            return Err(AmqpError::InvalidName("exchange"));
        }

        if let ExchangeKind::Custom(custom) = &kind {
            if custom.is_empty() {
                return Err(AmqpError::InvalidExchangeKind(custom.clone()));
            }
        }

        let mut params = Arguments::default();
        if kind == ExchangeKind::XMessageDelayed {
            params.insert(
                ShortString::from(AMQP_HEADERS_DELAYED_EXCHANGE_TYPE),
                AMQPValue::LongString(LongString::from("direct")),
            );
        }

        Ok(ExchangeDefinition {
            name: name.to_owned(),
            kind,
            delete: false,
            durable: false,
            passive: false,
            internal: false,
            no_wait: false,
            params,
        })
    }

    /// Creates a delayed exchange that routes like `routing` once the delay expires.
    ///
    /// This requires the x-delayed-message plugin to be installed on the RabbitMQ server.
    pub fn delayed(name: &str, routing: &ExchangeKind) -> Result<ExchangeDefinition, AmqpError> {
        let mut def = Self::with_kind(name, ExchangeKind::XMessageDelayed)?;
        def.params.insert(
            ShortString::from(AMQP_HEADERS_DELAYED_EXCHANGE_TYPE),
            AMQPValue::LongString(LongString::from(routing.as_str())),
        );
        Ok(def)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ExchangeKind {
        &self.kind
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_auto_delete(&self) -> bool {
        self.delete
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn arguments(&self) -> &Arguments {
        &self.params
    }

    pub fn arguments_mut(&mut self) -> &mut Arguments {
        &mut self.params
    }

    /// Adds a single argument to the exchange.
    pub fn param(mut self, key: &str, value: AMQPValue) -> Self {
        self.params.insert(ShortString::from(key), value);
        self
    }

    /// Sets the exchange to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Makes the exchange passive, checking for existence without creating it.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Makes the exchange internal, preventing direct publishing.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }
}

// AMQPValue has no Hash impl; equal definitions always share their argument keys.
impl Hash for ExchangeDefinition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.kind.hash(state);
        self.delete.hash(state);
        self.durable.hash(state);
        self.passive.hash(state);
        self.internal.hash(state);
        self.no_wait.hash(state);
        for key in self.params.keys() {
            key.as_str().hash(state);
        }
    }
}
