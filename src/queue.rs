// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue and Binding Definitions
//!
//! This module provides types for describing RabbitMQ queues and the bindings that
//! connect them to exchanges. It includes helpers for the standard `x-*` queue
//! arguments and for Dead Letter Queues (DLQ), so that messages a listener rejects
//! without requeue are dead-lettered instead of dropped.

use crate::exchange::Arguments;
use lapin::types::{AMQPValue, LongInt, LongString, ShortString};
use std::hash::{Hash, Hasher};

/// Constant for the header field used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the header field used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Constant for the header field used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the header field used to specify maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Constant for the header field used to specify maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// Definition of a RabbitMQ queue with its configuration parameters.
///
/// An empty name marks an anonymous queue: the broker assigns the name when the
/// queue is declared. Anonymous definitions have no name to compare, so two of
/// them are only equal when they are the same instance.
///
/// The argument map is the only part that can change after construction and it is
/// not synchronized.
#[derive(Debug, Clone, Default)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) passive: bool,
    pub(crate) no_wait: bool,
    pub(crate) dlq_name: Option<String>,
    pub(crate) params: Arguments,
}

impl QueueDefinition {
    /// Creates a new queue definition with the given name.
    ///
    /// By default, the queue is created with standard settings (non-durable, non-exclusive, etc.)
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// Creates a queue whose name is assigned by the broker on declare.
    ///
    /// Like the broker's own server-named queues it is exclusive and auto-delete.
    pub fn anonymous() -> QueueDefinition {
        QueueDefinition::new("").exclusive().delete()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn is_auto_delete(&self) -> bool {
        self.delete
    }

    pub fn dlq_name(&self) -> Option<&str> {
        self.dlq_name.as_deref()
    }

    pub fn arguments(&self) -> &Arguments {
        &self.params
    }

    pub fn arguments_mut(&mut self) -> &mut Arguments {
        &mut self.params
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the queue to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    ///
    /// Exclusive queues are deleted when the connection closes.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Adds a single argument to the queue.
    pub fn param(mut self, key: &str, value: AMQPValue) -> Self {
        self.params.insert(ShortString::from(key), value);
        self
    }

    /// Sets the message Time-To-Live (TTL) for the queue, in milliseconds.
    pub fn ttl(self, ttl: i32) -> Self {
        self.param(AMQP_HEADERS_MESSAGE_TTL, AMQPValue::LongInt(LongInt::from(ttl)))
    }

    /// Sets the maximum number of messages the queue can hold.
    pub fn max_length(self, max: i32) -> Self {
        self.param(AMQP_HEADERS_MAX_LENGTH, AMQPValue::LongInt(LongInt::from(max)))
    }

    /// Sets the maximum size in bytes the queue can hold.
    pub fn max_length_bytes(self, max_bytes: i32) -> Self {
        self.param(
            AMQP_HEADERS_MAX_LENGTH_BYTES,
            AMQPValue::LongInt(LongInt::from(max_bytes)),
        )
    }

    /// Adds a Dead Letter Queue (DLQ) to the queue.
    ///
    /// Messages rejected without requeue, expired or overflowing are routed through
    /// the default exchange to `<name>-dlq`. Anonymous queues have no stable name to
    /// derive a DLQ from and are left unchanged.
    pub fn with_dlq(mut self) -> Self {
        if self.is_anonymous() {
            return self;
        }

        let dlq_name = format!("{}-dlq", self.name);
        self.params.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from("")),
        );
        self.params.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            AMQPValue::LongString(LongString::from(dlq_name.as_str())),
        );
        self.dlq_name = Some(dlq_name);
        self
    }
}

impl PartialEq for QueueDefinition {
    fn eq(&self, other: &Self) -> bool {
        if self.is_anonymous() || other.is_anonymous() {
            return std::ptr::eq(self, other);
        }

        self.name == other.name
            && self.durable == other.durable
            && self.delete == other.delete
            && self.exclusive == other.exclusive
            && self.passive == other.passive
            && self.no_wait == other.no_wait
            && self.dlq_name == other.dlq_name
            && self.params == other.params
    }
}

impl Hash for QueueDefinition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if self.is_anonymous() {
            std::ptr::hash(self, state);
            return;
        }

        self.name.hash(state);
        self.durable.hash(state);
        self.delete.hash(state);
        self.exclusive.hash(state);
        self.passive.hash(state);
        self.no_wait.hash(state);
        self.dlq_name.hash(state);
        for key in self.params.keys() {
            key.as_str().hash(state);
        }
    }
}

/// Routing rule connecting a queue to an exchange.
///
/// For headers exchanges the routing key is unused and the arguments carry the
/// match rules (`x-match` plus the header values).
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub(crate) queue_name: String,
    pub(crate) exchange_name: String,
    pub(crate) routing_key: String,
    pub(crate) params: Arguments,
}

impl Binding {
    /// Creates a new binding for the given queue.
    ///
    /// The exchange name and routing key start empty and are set with
    /// [`exchange`](Self::exchange) and [`routing_key`](Self::routing_key).
    /// An empty queue name is filled in with the broker-assigned name when the
    /// binding belongs to an anonymous queue of a [`Topology`](crate::topology::Topology).
    pub fn new(queue: &str) -> Binding {
        Binding {
            queue_name: queue.to_owned(),
            exchange_name: String::new(),
            routing_key: String::new(),
            params: Arguments::default(),
        }
    }

    /// Binding for a headers exchange, matched on `args` instead of a routing key.
    pub fn headers(queue: &str, exchange: &str, args: Arguments) -> Binding {
        Binding {
            queue_name: queue.to_owned(),
            exchange_name: exchange.to_owned(),
            routing_key: String::new(),
            params: args,
        }
    }

    pub fn exchange(mut self, exchange: &str) -> Self {
        self.exchange_name = exchange.to_owned();
        self
    }

    pub fn routing_key(mut self, key: &str) -> Self {
        self.routing_key = key.to_owned();
        self
    }

    pub fn param(mut self, key: &str, value: AMQPValue) -> Self {
        self.params.insert(ShortString::from(key), value);
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn key(&self) -> &str {
        &self.routing_key
    }

    pub fn arguments(&self) -> &Arguments {
        &self.params
    }

    pub(crate) fn for_queue(&self, queue: &str) -> Binding {
        Binding {
            queue_name: queue.to_owned(),
            ..self.clone()
        }
    }
}
