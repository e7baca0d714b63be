// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Processing
//!
//! This module runs one delivery through its listener and decides how the broker
//! should acknowledge it:
//!
//! 1. The listener is invoked with the message
//! 2. On success, a reply (if any) is sent to the request's reply-to, or to the
//!    endpoint's fixed reply address, and the delivery is acked
//! 3. On failure, the error is wrapped in a [`ListenerExecutionFailed`] record and
//!    classified by the error handler: requeue or discard
//!
//! A reply that cannot be sent is reported to the error observer and the delivery
//! is still acked.

use crate::{
    address::Address,
    error_handler::{ConditionalRejectingErrorHandler, Disposition},
    errors::{AmqpError, ListenerExecutionFailed},
    handler::MessageListener,
    message::Message,
    otel,
    template::RabbitTemplate,
    transport::Transport,
};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use std::{borrow::Cow, sync::Arc};
use tracing::{debug, warn};

/// Acknowledgement decided for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    Ack,
    RejectRequeue,
    RejectNoRequeue,
}

impl From<Disposition> for Acknowledgement {
    fn from(disposition: Disposition) -> Self {
        match disposition {
            Disposition::Requeue => Acknowledgement::RejectRequeue,
            Disposition::Discard => Acknowledgement::RejectNoRequeue,
        }
    }
}

impl Acknowledgement {
    /// Performs the acknowledgement on the broker.
    pub async fn apply(self, transport: &dyn Transport, delivery_tag: u64) -> Result<(), AmqpError> {
        match self {
            Acknowledgement::Ack => transport.ack(delivery_tag).await,
            Acknowledgement::RejectRequeue => transport.reject(delivery_tag, true).await,
            Acknowledgement::RejectNoRequeue => transport.reject(delivery_tag, false).await,
        }
    }
}

/// A listener bound to a queue under a listener id.
#[derive(Clone)]
pub struct ListenerEndpoint {
    pub(crate) id: String,
    pub(crate) queue: String,
    pub(crate) listener: Arc<dyn MessageListener>,
    pub(crate) send_to: Option<Address>,
}

impl ListenerEndpoint {
    pub fn new(id: &str, queue: &str, listener: Arc<dyn MessageListener>) -> Self {
        ListenerEndpoint {
            id: id.to_owned(),
            queue: queue.to_owned(),
            listener,
            send_to: None,
        }
    }

    /// Reply address used when a request carries no reply-to.
    pub fn send_to(mut self, address: Address) -> Self {
        self.send_to = Some(address);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }
}

/// Processes one delivery and returns its acknowledgement.
pub(crate) async fn consume(
    tracer: &BoxedTracer,
    message: Message,
    endpoint: &ListenerEndpoint,
    template: &RabbitTemplate,
    error_handler: &ConditionalRejectingErrorHandler,
) -> Acknowledgement {
    let (_ctx, mut span) = otel::new_span(&message, tracer, &endpoint.id);

    debug!(
        listener = endpoint.id,
        queue = endpoint.queue,
        redelivered = message.properties.redelivered,
        "received message"
    );

    match endpoint.listener.on_message(&message).await {
        Ok(reply) => {
            debug!("message successfully processed");
            if let Some(reply) = reply {
                if let Err(err) = send_reply(&message, reply, endpoint, template).await {
                    span.record_error(&err);
                    error_handler.observer().on_reply_failure(&endpoint.id, &err);
                }
            }

            span.set_status(Status::Ok);
            Acknowledgement::Ack
        }
        Err(cause) => {
            let failure = ListenerExecutionFailed {
                listener_id: endpoint.id.clone(),
                failed_message: message,
                cause,
            };

            span.record_error(&failure);
            span.set_status(Status::Error {
                description: Cow::from(failure.to_string()),
            });

            error_handler.handle(&failure).into()
        }
    }
}

async fn send_reply(
    request: &Message,
    mut reply: Message,
    endpoint: &ListenerEndpoint,
    template: &RabbitTemplate,
) -> Result<(), AmqpError> {
    let address = match &request.properties.reply_to {
        Some(reply_to) => Address::parse(reply_to)?,
        None => match &endpoint.send_to {
            Some(address) => address.clone(),
            None => {
                warn!(listener = endpoint.id, "dropping reply - reason: no reply-to");
                return Ok(());
            }
        },
    };

    reply.properties.correlation_id = request.properties.correlation_id.clone();

    template.send(&address, reply).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::TemplateConfigs,
        error_handler::testing::RecordingObserver,
        errors::HandlerError,
        handler::MessageHandler,
        transport::MockTransport,
    };
    use opentelemetry::global;

    fn endpoint<F, Fut>(handler: F) -> ListenerEndpoint
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Option<Message>, HandlerError>> + Send + 'static,
    {
        ListenerEndpoint::new("listener", "queue", Arc::new(MessageHandler::new(handler)))
    }

    fn request() -> Message {
        let mut msg = Message::text("foo");
        msg.properties.correlation_id = Some("corr".to_owned());
        msg.properties.reply_to = Some("replies".to_owned());
        msg
    }

    #[tokio::test]
    async fn should_ack_and_reply_with_correlation_id() {
        let mut transport = MockTransport::new();
        transport
            .expect_publish()
            .withf(|exchange, key, msg| {
                exchange.is_empty()
                    && key == "replies"
                    && msg.properties.correlation_id.as_deref() == Some("corr")
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let template = RabbitTemplate::new(Arc::new(transport), TemplateConfigs::default()).unwrap();

        let endpoint = endpoint(|msg: Message| async move {
            let text = String::from_utf8_lossy(msg.body()).to_uppercase();
            Ok::<_, HandlerError>(Some(Message::text(&text)))
        });

        let ack = consume(
            &global::tracer("test"),
            request(),
            &endpoint,
            &template,
            &ConditionalRejectingErrorHandler::default(),
        )
        .await;

        assert_eq!(ack, Acknowledgement::Ack);
    }

    #[tokio::test]
    async fn should_keep_ack_when_reply_fails() {
        let mut transport = MockTransport::new();
        transport.expect_publish().returning(|exchange, key, _| {
            Err(AmqpError::PublishingError {
                exchange: exchange.to_owned(),
                routing_key: key.to_owned(),
                reason: "channel closed".to_owned(),
            })
        });
        let template = RabbitTemplate::new(Arc::new(transport), TemplateConfigs::default()).unwrap();
        let observer = Arc::new(RecordingObserver::default());
        let handler = ConditionalRejectingErrorHandler::default().with_observer(observer.clone());

        let endpoint = endpoint(|_| async move { Ok::<_, HandlerError>(Some(Message::text("reply"))) });

        let ack = consume(&global::tracer("test"), request(), &endpoint, &template, &handler).await;

        assert_eq!(ack, Acknowledgement::Ack);
        assert_eq!(*observer.reply_failures.lock().unwrap(), vec!["listener".to_owned()]);
        assert!(observer.failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_use_fixed_reply_address_without_reply_to() {
        let mut transport = MockTransport::new();
        transport
            .expect_publish()
            .withf(|exchange, key, _| exchange.is_empty() && key == "test.sendTo.reply")
            .times(1)
            .returning(|_, _, _| Ok(()));
        let template = RabbitTemplate::new(Arc::new(transport), TemplateConfigs::default()).unwrap();

        let endpoint = endpoint(|_| async move { Ok::<_, HandlerError>(Some(Message::text("BAR"))) })
            .send_to(Address::parse("test.sendTo.reply").unwrap());

        let ack = consume(
            &global::tracer("test"),
            Message::text("bar"),
            &endpoint,
            &template,
            &ConditionalRejectingErrorHandler::default(),
        )
        .await;

        assert_eq!(ack, Acknowledgement::Ack);
    }

    #[tokio::test]
    async fn should_map_failures_to_rejections() {
        let template =
            RabbitTemplate::new(Arc::new(MockTransport::new()), TemplateConfigs::default()).unwrap();
        let handler = ConditionalRejectingErrorHandler::default();

        let transient = endpoint(|_| async move { Err(HandlerError::execution("timeout")) });
        let poison = endpoint(|_| async move {
            Err(HandlerError::RejectAndDontRequeue("poison".to_owned()))
        });

        let tracer = global::tracer("test");
        assert_eq!(
            consume(&tracer, request(), &transient, &template, &handler).await,
            Acknowledgement::RejectRequeue
        );
        assert_eq!(
            consume(&tracer, request(), &poison, &template, &handler).await,
            Acknowledgement::RejectNoRequeue
        );
    }

    #[tokio::test]
    async fn should_apply_acknowledgement_on_transport() {
        let mut transport = MockTransport::new();
        transport.expect_ack().withf(|tag| *tag == 1).times(1).returning(|_| Ok(()));
        transport
            .expect_reject()
            .withf(|tag, requeue| *tag == 2 && *requeue)
            .times(1)
            .returning(|_, _| Ok(()));
        transport
            .expect_reject()
            .withf(|tag, requeue| *tag == 3 && !*requeue)
            .times(1)
            .returning(|_, _| Ok(()));

        Acknowledgement::Ack.apply(&transport, 1).await.unwrap();
        Acknowledgement::RejectRequeue.apply(&transport, 2).await.unwrap();
        Acknowledgement::RejectNoRequeue.apply(&transport, 3).await.unwrap();
    }
}
