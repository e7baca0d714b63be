// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Listener Error Handling
//!
//! Decides what happens to a delivery whose listener failed: requeue it for another
//! attempt, or discard it (reject without requeue, which dead-letters the message
//! when the queue has a DLQ).
//!
//! A [`FatalExceptionStrategy`] holds an ordered list of predicates combined with OR
//! and applied to every error of the failure's cause chain. The default list marks
//! conversion errors and explicit reject requests as fatal, since redelivering such
//! a message can never succeed. Every decision is also reported to an
//! [`ErrorObserver`].

use crate::{
    errors::{error_chain, AmqpError, ConversionError, HandlerError, ListenerExecutionFailed},
    message::Message,
};
use std::{error::Error as StdError, sync::Arc};
use tracing::{error, warn};

/// Outcome of classifying a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Requeue,
    Discard,
}

pub type FatalPredicate = Arc<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>;

/// Payload conversion failed; the same payload will fail again.
pub fn is_conversion_error(cause: &(dyn StdError + 'static)) -> bool {
    cause.downcast_ref::<ConversionError>().is_some()
}

/// The listener asked for the message to be dropped.
pub fn is_reject_request(cause: &(dyn StdError + 'static)) -> bool {
    matches!(
        cause.downcast_ref::<HandlerError>(),
        Some(HandlerError::RejectAndDontRequeue(_))
    )
}

/// A handler argument could not be bound. Not fatal by default.
pub fn is_argument_binding_error(cause: &(dyn StdError + 'static)) -> bool {
    matches!(
        cause.downcast_ref::<HandlerError>(),
        Some(HandlerError::ArgumentBinding { .. })
    )
}

#[derive(Clone)]
pub struct FatalExceptionStrategy {
    predicates: Vec<FatalPredicate>,
}

impl Default for FatalExceptionStrategy {
    fn default() -> Self {
        FatalExceptionStrategy {
            predicates: vec![
                Arc::new(is_conversion_error) as FatalPredicate,
                Arc::new(is_reject_request) as FatalPredicate,
            ],
        }
    }
}

impl FatalExceptionStrategy {
    /// Adds a predicate, OR-ed with the ones already present.
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(Arc::new(predicate));
        self
    }

    pub fn is_fatal(&self, failure: &(dyn StdError + 'static)) -> bool {
        error_chain(failure).any(|cause| self.predicates.iter().any(|fatal| fatal(cause)))
    }
}

/// Receives every listener and reply failure, after the acknowledgement was decided.
pub trait ErrorObserver: Send + Sync {
    fn on_listener_failure(&self, failure: &ListenerExecutionFailed, disposition: Disposition);

    fn on_reply_failure(&self, listener_id: &str, error: &AmqpError);

    fn on_unknown_listener(&self, listener_id: &str, message: &Message);
}

/// Reports failures through `tracing`.
#[derive(Debug, Default)]
pub struct LoggingErrorObserver;

impl ErrorObserver for LoggingErrorObserver {
    fn on_listener_failure(&self, failure: &ListenerExecutionFailed, disposition: Disposition) {
        let causes = error_chain(failure)
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join(": ");

        match disposition {
            Disposition::Requeue => warn!(
                error = causes,
                listener = failure.listener_id,
                "listener failed, requeuing message"
            ),
            Disposition::Discard => error!(
                error = causes,
                listener = failure.listener_id,
                payload = failure.failed_message.describe_body(),
                "listener failed with a fatal error, discarding message"
            ),
        }
    }

    fn on_reply_failure(&self, listener_id: &str, err: &AmqpError) {
        error!(error = err.to_string(), listener = listener_id, "failure to send reply");
    }

    fn on_unknown_listener(&self, listener_id: &str, _message: &Message) {
        warn!(listener = listener_id, "removing message from queue - reason: unknown listener");
    }
}

/// Classifies failed deliveries.
pub struct ConditionalRejectingErrorHandler {
    strategy: FatalExceptionStrategy,
    default_requeue_rejected: bool,
    observer: Arc<dyn ErrorObserver>,
}

impl Default for ConditionalRejectingErrorHandler {
    fn default() -> Self {
        ConditionalRejectingErrorHandler::new(FatalExceptionStrategy::default())
    }
}

impl ConditionalRejectingErrorHandler {
    pub fn new(strategy: FatalExceptionStrategy) -> Self {
        ConditionalRejectingErrorHandler {
            strategy,
            default_requeue_rejected: true,
            observer: Arc::new(LoggingErrorObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ErrorObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// When false, non-fatal failures are discarded too.
    pub fn default_requeue_rejected(mut self, requeue: bool) -> Self {
        self.default_requeue_rejected = requeue;
        self
    }

    pub fn observer(&self) -> &dyn ErrorObserver {
        self.observer.as_ref()
    }

    /// Decides the fate of one failed delivery and reports it.
    pub fn handle(&self, failure: &ListenerExecutionFailed) -> Disposition {
        let disposition = if self.strategy.is_fatal(failure) || !self.default_requeue_rejected {
            Disposition::Discard
        } else {
            Disposition::Requeue
        };

        self.observer.on_listener_failure(failure, disposition);
        disposition
    }
}
