// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Listeners
//!
//! A `MessageListener` processes one delivery and may answer with a reply message.
//! Two adapters cover the usual shapes:
//!
//! - [`PayloadHandler`] converts the body to `I`, calls `Fn(I) -> Result<O, _>` and
//!   converts `O` into the reply. Returning `()` means no reply.
//! - [`MessageHandler`] hands over the whole message and returns the reply as is,
//!   for handlers that read headers or shape their own reply properties.

use crate::{
    converter::{decode, encode, MessageConverter},
    errors::HandlerError,
    message::{Message, MessageProperties},
};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::{future::Future, marker::PhantomData, sync::Arc};

#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn on_message(&self, message: &Message) -> Result<Option<Message>, HandlerError>;
}

pub struct PayloadHandler<F, I, O> {
    converter: Arc<dyn MessageConverter>,
    handler: F,
    _types: PhantomData<fn(I) -> O>,
}

impl<F, I, O> PayloadHandler<F, I, O> {
    pub fn new<Fut>(converter: Arc<dyn MessageConverter>, handler: F) -> Self
    where
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<O, HandlerError>>,
    {
        PayloadHandler {
            converter,
            handler,
            _types: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut, I, O> MessageListener for PayloadHandler<F, I, O>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, HandlerError>> + Send + 'static,
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
{
    async fn on_message(&self, message: &Message) -> Result<Option<Message>, HandlerError> {
        let input = decode::<I>(self.converter.as_ref(), message)?;
        let output = (self.handler)(input).await?;

        Ok(encode(
            self.converter.as_ref(),
            &output,
            MessageProperties::default(),
        )?)
    }
}

pub struct MessageHandler<F> {
    handler: F,
}

impl<F> MessageHandler<F> {
    pub fn new<Fut>(handler: F) -> Self
    where
        F: Fn(Message) -> Fut,
        Fut: Future<Output = Result<Option<Message>, HandlerError>>,
    {
        MessageHandler { handler }
    }
}

#[async_trait]
impl<F, Fut> MessageListener for MessageHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Message>, HandlerError>> + Send + 'static,
{
    async fn on_message(&self, message: &Message) -> Result<Option<Message>, HandlerError> {
        (self.handler)(message.clone()).await
    }
}

/// Binds a string header, failing with `HandlerError::ArgumentBinding` when it is
/// missing or not a string.
pub fn required_header(message: &Message, name: &str) -> Result<String, HandlerError> {
    let value = message
        .properties
        .header(name)
        .ok_or_else(|| HandlerError::ArgumentBinding {
            name: name.to_owned(),
            reason: "missing header".to_owned(),
        })?;

    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| HandlerError::ArgumentBinding {
            name: name.to_owned(),
            reason: format!("expected a string header, found {value:?}"),
        })
}

/// Converts the message body, for [`MessageHandler`]s that still want a typed payload.
pub fn payload<T>(converter: &dyn MessageConverter, message: &Message) -> Result<T, HandlerError>
where
    T: DeserializeOwned,
{
    Ok(decode::<T>(converter, message)?)
}
