// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! Trace context travels in message headers: it is injected when the template
//! publishes and extracted into a consumer span when a delivery is dispatched.

use crate::message::{HeaderValue, Headers, Message};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::borrow::Cow;

/// Adapter between the propagator API and message headers.
pub(crate) struct MessageTracePropagator<'a> {
    headers: &'a mut Headers,
}

impl<'a> MessageTracePropagator<'a> {
    pub(crate) fn new(headers: &'a mut Headers) -> Self {
        Self { headers }
    }
}

impl Injector for MessageTracePropagator<'_> {
    fn set(&mut self, key: &str, value: String) {
        self.headers
            .insert(key.to_lowercase(), HeaderValue::String(value));
    }
}

impl Extractor for MessageTracePropagator<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(HeaderValue::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(String::as_str).collect()
    }
}

/// Writes the current trace context into the message headers.
pub(crate) fn inject_context(ctx: &Context, message: &mut Message) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(
            ctx,
            &mut MessageTracePropagator::new(&mut message.properties.headers),
        )
    });
}

/// Creates a consumer span whose parent is the context carried by the message.
pub(crate) fn new_span(message: &Message, tracer: &BoxedTracer, name: &str) -> (Context, BoxedSpan) {
    let mut headers = message.properties.headers.clone();
    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&MessageTracePropagator::new(&mut headers))
    });

    let span = tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx);

    (ctx, span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_store_injected_values_as_lowercase_string_headers() {
        let mut headers = Headers::new();
        let mut propagator = MessageTracePropagator::new(&mut headers);

        propagator.set("TraceParent", "00-abc-def-01".to_owned());

        assert_eq!(propagator.get("traceparent"), Some("00-abc-def-01"));
        assert_eq!(propagator.keys(), vec!["traceparent"]);
    }
}
