// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Template
//!
//! `RabbitTemplate` is the synchronous-style facade over a [`Transport`]: send a
//! message to an address, convert a payload and send it, or send a request and
//! wait for the correlated reply.
//!
//! The only shared state is [`PendingReplies`], the registry of correlation ids
//! still waiting for a reply. Every wait removes its entry on the way out, whether
//! it ended with a reply, a timeout, an interruption or the caller dropping the
//! future.

use crate::{
    address::Address,
    config::TemplateConfigs,
    converter::{decode, encode, MessageConverter, SimpleMessageConverter},
    errors::{AmqpError, ConversionError},
    message::{Message, MessageProperties},
    otel,
    transport::Transport,
};
use opentelemetry::Context;
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

/// Correlation ids awaiting a reply.
///
/// Each registration carries a token, so a finished wait only ever removes its own
/// entry, even when the same correlation id was registered again in the meantime.
#[derive(Debug, Default)]
pub struct PendingReplies {
    inner: Mutex<HashMap<String, Waiter>>,
    next_token: AtomicU64,
}

#[derive(Debug)]
struct Waiter {
    token: u64,
    sender: oneshot::Sender<Message>,
}

impl PendingReplies {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Waiter>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(
        &self,
        correlation_id: &str,
    ) -> Result<(PendingReply<'_>, oneshot::Receiver<Message>), AmqpError> {
        let mut pending = self.lock();
        if pending.contains_key(correlation_id) {
            return Err(AmqpError::DuplicateCorrelation(correlation_id.to_owned()));
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        pending.insert(correlation_id.to_owned(), Waiter { token, sender });

        Ok((
            PendingReply {
                registry: self,
                correlation_id: correlation_id.to_owned(),
                token,
            },
            receiver,
        ))
    }

    /// Hands `reply` to the waiter of `correlation_id`. Returns false when nobody waits.
    fn complete(&self, correlation_id: &str, reply: Message) -> bool {
        match self.lock().remove(correlation_id) {
            Some(waiter) => waiter.sender.send(reply).is_ok(),
            None => false,
        }
    }

    fn forget(&self, correlation_id: &str, token: u64) {
        let mut pending = self.lock();
        if pending.get(correlation_id).map(|w| w.token) == Some(token) {
            pending.remove(correlation_id);
        }
    }

    /// Aborts every outstanding wait; the waiters fail with `ReplyInterrupted`.
    pub fn cancel_all(&self) {
        self.lock().clear();
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.lock().contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Removes its own registry entry when the wait is over, however it ends.
struct PendingReply<'a> {
    registry: &'a PendingReplies,
    correlation_id: String,
    token: u64,
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        self.registry.forget(&self.correlation_id, self.token);
    }
}

pub struct RabbitTemplate {
    transport: Arc<dyn Transport>,
    converter: Arc<dyn MessageConverter>,
    cfg: TemplateConfigs,
    reply_address: Address,
    pending: PendingReplies,
}

impl RabbitTemplate {
    /// Creates a template using the [`SimpleMessageConverter`].
    ///
    /// # Errors
    /// `AmqpError::AddressFormatError` if the configured reply address is malformed.
    pub fn new(transport: Arc<dyn Transport>, cfg: TemplateConfigs) -> Result<Self, AmqpError> {
        let reply_address = Address::parse(&cfg.reply_address)?;

        Ok(RabbitTemplate {
            transport,
            converter: Arc::new(SimpleMessageConverter),
            cfg,
            reply_address,
            pending: PendingReplies::default(),
        })
    }

    pub fn with_converter(mut self, converter: Arc<dyn MessageConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn converter(&self) -> &dyn MessageConverter {
        self.converter.as_ref()
    }

    pub(crate) fn shared_converter(&self) -> Arc<dyn MessageConverter> {
        self.converter.clone()
    }

    pub fn reply_address(&self) -> &Address {
        &self.reply_address
    }

    /// Queue the reply consumer reads from.
    pub fn reply_queue(&self) -> &str {
        &self.cfg.reply_queue
    }

    pub fn pending_replies(&self) -> &PendingReplies {
        &self.pending
    }

    /// Sends to the exchange and routing key named by `address`.
    pub async fn send(&self, address: &Address, message: Message) -> Result<(), AmqpError> {
        self.send_to(address.exchange_name(), address.routing_key(), message)
            .await
    }

    /// Sends to the configured default exchange and routing key.
    pub async fn send_default(&self, message: Message) -> Result<(), AmqpError> {
        self.send_to(&self.cfg.exchange, &self.cfg.routing_key, message)
            .await
    }

    pub async fn send_to(
        &self,
        exchange: &str,
        routing_key: &str,
        mut message: Message,
    ) -> Result<(), AmqpError> {
        otel::inject_context(&Context::current(), &mut message);

        self.transport.publish(exchange, routing_key, &message).await
    }

    /// Converts `payload` with the template's converter and sends it.
    pub async fn convert_and_send<T>(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &T,
    ) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        let message = self.to_message(payload)?;
        self.send_to(exchange, routing_key, message).await
    }

    /// Sends `message` to `address` and waits up to `timeout` for the reply.
    ///
    /// Returns `Ok(None)` on timeout. The message keeps its correlation id when it
    /// has one, otherwise a new one is generated; its reply-to is set to the
    /// template's reply address and must not be set by the caller.
    pub async fn send_and_receive(
        &self,
        address: &Address,
        message: Message,
        timeout: Duration,
    ) -> Result<Option<Message>, AmqpError> {
        self.send_and_receive_to(
            address.exchange_name(),
            address.routing_key(),
            message,
            timeout,
        )
        .await
    }

    pub async fn send_and_receive_to(
        &self,
        exchange: &str,
        routing_key: &str,
        mut message: Message,
        timeout: Duration,
    ) -> Result<Option<Message>, AmqpError> {
        if let Some(reply_to) = &message.properties.reply_to {
            return Err(AmqpError::ReplyToAlreadySet(reply_to.clone()));
        }

        let correlation_id = message
            .properties
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        message.properties.correlation_id = Some(correlation_id.clone());
        message.properties.set_reply_to_address(&self.reply_address);

        let (pending, receiver) = self.pending.register(&correlation_id)?;

        self.send_to(exchange, routing_key, message).await?;

        let outcome = tokio::time::timeout(timeout, receiver).await;
        drop(pending);

        match outcome {
            Ok(Ok(reply)) => Ok(Some(reply)),
            Ok(Err(_)) => Err(AmqpError::ReplyInterrupted(correlation_id)),
            Err(_) => {
                debug!(correlation_id, "reply timed out");
                Ok(None)
            }
        }
    }

    /// Converts `payload`, sends it and converts the reply, waiting the configured
    /// reply timeout.
    ///
    /// Outbound conversion failures fail before anything is published; a reply that
    /// cannot be converted to `R` is the terminal error of the call.
    pub async fn convert_send_and_receive<T, R>(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &T,
    ) -> Result<Option<R>, AmqpError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let message = self.to_message(payload)?;

        let Some(reply) = self
            .send_and_receive_to(exchange, routing_key, message, self.cfg.reply_timeout())
            .await?
        else {
            return Ok(None);
        };

        Ok(Some(decode::<R>(self.converter(), &reply)?))
    }

    /// Routes an inbound reply to the request waiting on its correlation id.
    ///
    /// Returns false for replies nobody waits for any more (late or unknown).
    pub fn handle_reply(&self, reply: Message) -> bool {
        let Some(correlation_id) = reply.properties.correlation_id.clone() else {
            warn!("discarding reply without correlation id");
            return false;
        };

        if !self.pending.complete(&correlation_id, reply) {
            warn!(correlation_id, "reply received after timeout or for unknown request");
            return false;
        }

        true
    }

    /// Aborts every outstanding `send_and_receive`.
    pub fn cancel_pending_replies(&self) {
        self.pending.cancel_all();
    }

    fn to_message<T>(&self, payload: &T) -> Result<Message, AmqpError>
    where
        T: Serialize + ?Sized,
    {
        encode(self.converter(), payload, MessageProperties::default())?
            .ok_or_else(|| ConversionError::new("cannot send an empty payload").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{exchange::ExchangeKind, transport::MockTransport};
    use futures_util::FutureExt;
    use std::collections::HashMap as Map;
    use tokio::sync::mpsc;

    fn template(transport: MockTransport) -> Arc<RabbitTemplate> {
        Arc::new(RabbitTemplate::new(Arc::new(transport), TemplateConfigs::default()).unwrap())
    }

    /// Transport whose published messages are forwarded to the returned receiver.
    fn capturing_transport() -> (MockTransport, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut transport = MockTransport::new();
        transport.expect_publish().returning(move |_, _, msg| {
            let _ = tx.send(msg.clone());
            Ok(())
        });
        (transport, rx)
    }

    async fn wait_for_pending(template: &RabbitTemplate) {
        while template.pending_replies().is_empty() {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn should_keep_reply_queue_apart_from_reply_address() {
        let cfg = TemplateConfigs {
            reply_address: "direct://replies/client-1".to_owned(),
            reply_queue: "client-1.replies".to_owned(),
            ..TemplateConfigs::default()
        };

        let template = RabbitTemplate::new(Arc::new(MockTransport::new()), cfg).unwrap();

        assert_eq!(template.reply_address().routing_key(), "client-1");
        assert_eq!(template.reply_queue(), "client-1.replies");
    }

    #[tokio::test]
    async fn should_resolve_exchange_and_key_from_address() {
        let mut transport = MockTransport::new();
        transport
            .expect_publish()
            .withf(|exchange, key, msg| {
                exchange == "my-exchange" && key == "routing-key" && msg.body() == b"hi"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let address = Address::new(ExchangeKind::Direct, "my-exchange", "routing-key").unwrap();
        template(transport)
            .send(&address, Message::text("hi"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn should_surface_publish_failure() {
        let mut transport = MockTransport::new();
        transport.expect_publish().returning(|exchange, key, _| {
            Err(AmqpError::PublishingError {
                exchange: exchange.to_owned(),
                routing_key: key.to_owned(),
                reason: "channel closed".to_owned(),
            })
        });
        let template = template(transport);

        let result = template
            .send_and_receive(
                &Address::parse("test.simple").unwrap(),
                Message::text("foo"),
                Duration::from_secs(1),
            )
            .await;

        assert!(matches!(result, Err(AmqpError::PublishingError { .. })));
        assert!(template.pending_replies().is_empty());
    }

    #[tokio::test]
    async fn should_return_correlated_reply() {
        let (transport, mut published) = capturing_transport();
        let template = template(transport);

        let responder = {
            let template = template.clone();
            tokio::spawn(async move {
                let request = published.recv().await.unwrap();
                assert_eq!(
                    request.properties.reply_to.as_deref(),
                    Some("amq.rabbitmq.reply-to")
                );

                let mut reply = Message::text("FOO");
                reply.properties.correlation_id = request.properties.correlation_id.clone();
                assert!(template.handle_reply(reply));
            })
        };

        let reply = template
            .send_and_receive(
                &Address::parse("test.simple").unwrap(),
                Message::text("foo"),
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        responder.await.unwrap();
        assert_eq!(reply.unwrap().body(), b"FOO");
        assert!(template.pending_replies().is_empty());
    }

    #[tokio::test]
    async fn should_reuse_caller_correlation_id() {
        let (transport, mut published) = capturing_transport();
        let template = template(transport);

        let mut request = Message::text("foo");
        request.properties.correlation_id = Some("corr-1".to_owned());

        let waiter = {
            let template = template.clone();
            tokio::spawn(async move {
                template
                    .send_and_receive_to("", "q", request, Duration::from_secs(5))
                    .await
            })
        };

        let sent = published.recv().await.unwrap();
        assert_eq!(sent.properties.correlation_id.as_deref(), Some("corr-1"));
        assert!(template.pending_replies().contains("corr-1"));

        let mut reply = Message::text("ok");
        reply.properties.correlation_id = Some("corr-1".to_owned());
        assert!(template.handle_reply(reply));

        assert!(waiter.await.unwrap().unwrap().is_some());
        assert!(!template.pending_replies().contains("corr-1"));
    }

    #[tokio::test]
    async fn should_return_none_on_timeout_and_forget_correlation() {
        let (transport, mut published) = capturing_transport();
        let template = template(transport);

        let reply = template
            .send_and_receive_to("", "nobody", Message::text("foo"), Duration::from_millis(20))
            .await
            .unwrap();

        assert!(reply.is_none());
        assert!(template.pending_replies().is_empty());

        let request = published.recv().await.unwrap();
        let mut late = Message::text("late");
        late.properties.correlation_id = request.properties.correlation_id;
        assert!(!template.handle_reply(late));
    }

    #[tokio::test]
    async fn should_fail_interrupted_wait() {
        let (transport, _published) = capturing_transport();
        let template = template(transport);

        let waiter = {
            let template = template.clone();
            tokio::spawn(async move {
                template
                    .send_and_receive_to("", "q", Message::text("foo"), Duration::from_secs(30))
                    .await
            })
        };

        wait_for_pending(&template).await;
        template.cancel_pending_replies();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(AmqpError::ReplyInterrupted(_))));
        assert!(template.pending_replies().is_empty());
    }

    #[tokio::test]
    async fn should_forget_correlation_when_caller_gives_up() {
        let (transport, _published) = capturing_transport();
        let template = template(transport);

        let waiter = {
            let template = template.clone();
            tokio::spawn(async move {
                template
                    .send_and_receive_to("", "q", Message::text("foo"), Duration::from_secs(30))
                    .await
            })
        };

        wait_for_pending(&template).await;
        waiter.abort();
        let _ = waiter.await;

        assert!(template.pending_replies().is_empty());
    }

    #[tokio::test]
    async fn should_refuse_message_with_reply_to() {
        let mut transport = MockTransport::new();
        transport.expect_publish().never();
        let template = template(transport);

        let mut request = Message::text("foo");
        request.properties.reply_to = Some("elsewhere".to_owned());

        let result = template
            .send_and_receive_to("", "q", request, Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(AmqpError::ReplyToAlreadySet(_))));
    }

    #[tokio::test]
    async fn should_refuse_duplicate_correlation() {
        let (transport, _published) = capturing_transport();
        let template = template(transport);

        let first = {
            let template = template.clone();
            tokio::spawn(async move {
                let mut request = Message::text("a");
                request.properties.correlation_id = Some("same".to_owned());
                template
                    .send_and_receive_to("", "q", request, Duration::from_secs(30))
                    .await
            })
        };
        wait_for_pending(&template).await;

        let mut request = Message::text("b");
        request.properties.correlation_id = Some("same".to_owned());
        let second = template
            .send_and_receive_to("", "q", request, Duration::from_secs(1))
            .await;

        assert!(matches!(second, Err(AmqpError::DuplicateCorrelation(_))));
        assert!(template.pending_replies().contains("same"));

        template.cancel_pending_replies();
        assert!(first.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn should_keep_new_waiter_when_finished_wait_reuses_correlation() {
        let (transport, _published) = capturing_transport();
        let template = template(transport);

        let correlated = |body: &str| {
            let mut msg = Message::text(body);
            msg.properties.correlation_id = Some("same".to_owned());
            msg
        };

        let first = template.send_and_receive_to("", "q", correlated("a"), Duration::from_secs(5));
        tokio::pin!(first);
        assert!((&mut first).now_or_never().is_none());
        assert!(template.handle_reply(correlated("for a")));

        let second = template.send_and_receive_to("", "q", correlated("b"), Duration::from_secs(5));
        tokio::pin!(second);
        assert!((&mut second).now_or_never().is_none());
        assert!(template.pending_replies().contains("same"));

        assert_eq!(first.await.unwrap().unwrap().body(), b"for a");
        assert!(template.pending_replies().contains("same"));

        assert!(template.handle_reply(correlated("for b")));
        assert_eq!(second.await.unwrap().unwrap().body(), b"for b");
        assert!(template.pending_replies().is_empty());
    }

    #[tokio::test]
    async fn should_fail_fast_on_outbound_conversion() {
        let mut transport = MockTransport::new();
        transport.expect_publish().never();
        let template = template(transport);

        let mut payload = Map::new();
        payload.insert((1, 2), "tuple keys are not valid JSON object keys");

        let result = template
            .convert_send_and_receive::<_, String>("", "q", &payload)
            .await;

        assert!(matches!(result, Err(AmqpError::ConversionError(_))));
    }

    #[tokio::test]
    async fn should_surface_reply_conversion_failure() {
        let (transport, mut published) = capturing_transport();
        let template = template(transport);

        let responder = {
            let template = template.clone();
            tokio::spawn(async move {
                let request = published.recv().await.unwrap();
                let mut reply = Message::text("not a number");
                reply.properties.correlation_id = request.properties.correlation_id.clone();
                template.handle_reply(reply);
            })
        };

        let result = template
            .convert_send_and_receive::<_, u64>("", "q", "foo")
            .await;
        responder.await.unwrap();

        assert!(matches!(result, Err(AmqpError::ConversionError(_))));
        assert!(template.pending_replies().is_empty());
    }
}
