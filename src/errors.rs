// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types
//!
//! This module provides the error types used across the crate. `AmqpError` is
//! returned by every fallible operation that fails the originating call
//! (address parsing, outbound conversion, transport and topology failures).
//!
//! Listener failures are never returned to a caller. They are wrapped in a
//! [`ListenerExecutionFailed`] record whose `source()` chain keeps the
//! original [`HandlerError`] and, for conversion problems, the
//! [`ConversionError`] underneath, so an error strategy can inspect the
//! whole chain.

use crate::message::Message;
use std::error::Error as StdError;
use thiserror::Error;

/// Boxed error type used for application failures raised by handlers.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error binding a consumer to a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// The channel or connection refused a publish
    #[error("failure to publish to exchange `{exchange}` with key `{routing_key}`: {reason}")]
    PublishingError {
        exchange: String,
        routing_key: String,
        reason: String,
    },

    /// Error acknowledging a message
    #[error("failure to ack message `{0}`")]
    AckMessageError(u64),

    /// Error rejecting a message
    #[error("failure to reject message `{0}`")]
    RejectMessageError(u64),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Structured address text with a malformed scheme part
    #[error("malformed address `{0}`")]
    AddressFormatError(String),

    /// Empty or otherwise unusable exchange type token
    #[error("invalid exchange type `{0}`")]
    InvalidExchangeKind(String),

    /// Empty name where the broker requires one
    #[error("invalid {0} name: must not be empty")]
    InvalidName(&'static str),

    /// Payload codec failure
    #[error(transparent)]
    ConversionError(#[from] ConversionError),

    /// A reply wait was aborted before a reply or the timeout
    #[error("reply wait for correlation `{0}` was interrupted")]
    ReplyInterrupted(String),

    /// Another request is already waiting on this correlation id
    #[error("a reply for correlation `{0}` is already awaited")]
    DuplicateCorrelation(String),

    /// The request message already carried a reply-to
    #[error("send and receive requires a message without reply-to, found `{0}`")]
    ReplyToAlreadySet(String),

    /// Failure to load configuration values
    #[error("invalid configuration: {0}")]
    ConfigurationError(String),
}

/// Payload codec failure, raised both for outbound encoding and inbound decoding.
///
/// The message names the offending payload and the target type, e.g.
/// `Failed to convert message payload 'bar' to 'my_app::Date'`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ConversionError {
    message: String,
}

impl ConversionError {
    pub fn new(message: impl Into<String>) -> Self {
        ConversionError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure raised while a listener processes a single delivery.
#[derive(Error, Debug)]
pub enum HandlerError {
    /// The inbound payload could not be converted to the handler's input type,
    /// or the handler's result could not be converted to a reply.
    #[error("failed to convert message for listener")]
    Conversion(#[from] ConversionError),

    /// A handler argument (header, property) could not be bound from the message.
    #[error("failed to bind argument `{name}`: {reason}")]
    ArgumentBinding { name: String, reason: String },

    /// The handler's own logic failed.
    #[error("listener threw exception")]
    Execution(#[source] BoxError),

    /// The handler explicitly asks for the delivery to be discarded.
    #[error("listener rejected message: {0}")]
    RejectAndDontRequeue(String),
}

impl HandlerError {
    pub fn execution<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        HandlerError::Execution(err.into())
    }
}

/// Failure record for one failed delivery.
///
/// Produced once per failed invocation, handed to the error handler, then dropped.
#[derive(Error, Debug)]
#[error("listener `{listener_id}` failed to process message")]
pub struct ListenerExecutionFailed {
    pub listener_id: String,
    pub failed_message: Message,
    #[source]
    pub cause: HandlerError,
}

/// Iterates over `err` and every error reachable through `source()`.
pub fn error_chain<'a>(
    err: &'a (dyn StdError + 'static),
) -> impl Iterator<Item = &'a (dyn StdError + 'static)> {
    std::iter::successors(Some(err), |e| (*e).source())
}

/// The innermost error of the chain.
pub fn root_cause<'a>(err: &'a (dyn StdError + 'static)) -> &'a (dyn StdError + 'static) {
    error_chain(err).last().unwrap_or(err)
}
