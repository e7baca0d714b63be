// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Envelope
//!
//! A `Message` is an immutable byte payload plus a mutable bag of properties.
//! It never refers back to the channel or connection that delivered it; the
//! broker metadata of an inbound delivery is copied into the properties.

use lapin::{
    message::Delivery,
    types::{AMQPValue, FieldTable, LongLongInt, LongString, ShortString},
    BasicProperties,
};
use std::collections::BTreeMap;
use tracing::debug;

use crate::address::Address;

pub const TEXT_PLAIN_CONTENT_TYPE: &str = "text/plain";
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const OCTET_STREAM_CONTENT_TYPE: &str = "application/octet-stream";

/// Header values carried in [`MessageProperties::headers`].
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl HeaderValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(value) => Some(value),
            _ => None,
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::String(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::String(value)
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Int(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Bool(value)
    }
}

impl From<&HeaderValue> for AMQPValue {
    fn from(value: &HeaderValue) -> Self {
        match value {
            HeaderValue::Bool(v) => AMQPValue::Boolean(*v),
            HeaderValue::Int(v) => AMQPValue::LongLongInt(LongLongInt::from(*v)),
            HeaderValue::Double(v) => AMQPValue::Double(*v),
            HeaderValue::String(v) => AMQPValue::LongString(LongString::from(v.as_str())),
        }
    }
}

impl TryFrom<&AMQPValue> for HeaderValue {
    type Error = ();

    fn try_from(value: &AMQPValue) -> Result<Self, Self::Error> {
        match value {
            AMQPValue::Boolean(v) => Ok(HeaderValue::Bool(*v)),
            AMQPValue::ShortShortInt(v) => Ok(HeaderValue::Int(i64::from(*v))),
            AMQPValue::ShortShortUInt(v) => Ok(HeaderValue::Int(i64::from(*v))),
            AMQPValue::ShortInt(v) => Ok(HeaderValue::Int(i64::from(*v))),
            AMQPValue::ShortUInt(v) => Ok(HeaderValue::Int(i64::from(*v))),
            AMQPValue::LongInt(v) => Ok(HeaderValue::Int(i64::from(*v))),
            AMQPValue::LongUInt(v) => Ok(HeaderValue::Int(i64::from(*v))),
            AMQPValue::LongLongInt(v) => Ok(HeaderValue::Int(*v)),
            AMQPValue::Float(v) => Ok(HeaderValue::Double(f64::from(*v))),
            AMQPValue::Double(v) => Ok(HeaderValue::Double(*v)),
            AMQPValue::ShortString(v) => Ok(HeaderValue::String(v.as_str().to_owned())),
            AMQPValue::LongString(v) => Ok(HeaderValue::String(
                String::from_utf8_lossy(v.as_bytes()).into_owned(),
            )),
            _ => Err(()),
        }
    }
}

pub type Headers = BTreeMap<String, HeaderValue>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    NonPersistent = 1,
    #[default]
    Persistent = 2,
}

/// Message metadata. Everything here may be changed by listener code; the
/// broker fields (`delivery_tag`, `redelivered`, `received_*`) are only set on
/// inbound messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub headers: Headers,
    pub delivery_mode: DeliveryMode,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub message_id: Option<String>,
    pub kind: Option<String>,
    pub priority: Option<u8>,
    pub expiration: Option<String>,
    pub delivery_tag: Option<u64>,
    pub redelivered: bool,
    pub received_exchange: Option<String>,
    pub received_routing_key: Option<String>,
}

impl MessageProperties {
    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<HeaderValue>) {
        self.headers.insert(name.to_owned(), value.into());
    }

    pub fn set_reply_to_address(&mut self, address: &Address) {
        self.reply_to = Some(address.to_string());
    }

    pub(crate) fn to_amqp(&self) -> BasicProperties {
        let headers: BTreeMap<ShortString, AMQPValue> = self
            .headers
            .iter()
            .map(|(key, value)| (ShortString::from(key.as_str()), AMQPValue::from(value)))
            .collect();

        let mut props = BasicProperties::default()
            .with_delivery_mode(self.delivery_mode as u8)
            .with_headers(FieldTable::from(headers));

        if let Some(value) = &self.content_type {
            props = props.with_content_type(ShortString::from(value.as_str()));
        }
        if let Some(value) = &self.content_encoding {
            props = props.with_content_encoding(ShortString::from(value.as_str()));
        }
        if let Some(value) = &self.correlation_id {
            props = props.with_correlation_id(ShortString::from(value.as_str()));
        }
        if let Some(value) = &self.reply_to {
            props = props.with_reply_to(ShortString::from(value.as_str()));
        }
        if let Some(value) = &self.message_id {
            props = props.with_message_id(ShortString::from(value.as_str()));
        }
        if let Some(value) = &self.kind {
            props = props.with_type(ShortString::from(value.as_str()));
        }
        if let Some(value) = self.priority {
            props = props.with_priority(value);
        }
        if let Some(value) = &self.expiration {
            props = props.with_expiration(ShortString::from(value.as_str()));
        }

        props
    }

    pub(crate) fn from_amqp(props: &BasicProperties) -> MessageProperties {
        let mut headers = Headers::new();
        if let Some(table) = props.headers() {
            for (key, value) in table.inner() {
                match HeaderValue::try_from(value) {
                    Ok(value) => {
                        headers.insert(key.to_string(), value);
                    }
                    Err(_) => debug!(header = key.as_str(), "skipping unsupported header value"),
                }
            }
        }

        let text = |value: &Option<ShortString>| value.as_ref().map(|v| v.to_string());

        MessageProperties {
            content_type: text(props.content_type()),
            content_encoding: text(props.content_encoding()),
            headers,
            delivery_mode: match props.delivery_mode() {
                Some(1) => DeliveryMode::NonPersistent,
                _ => DeliveryMode::Persistent,
            },
            correlation_id: text(props.correlation_id()),
            reply_to: text(props.reply_to()),
            message_id: text(props.message_id()),
            kind: text(props.kind()),
            priority: *props.priority(),
            expiration: text(props.expiration()),
            ..Default::default()
        }
    }
}

/// Payload plus properties.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    body: Vec<u8>,
    pub properties: MessageProperties,
}

impl Message {
    pub fn new(body: Vec<u8>) -> Message {
        Message {
            body,
            properties: MessageProperties::default(),
        }
    }

    pub fn with_properties(body: Vec<u8>, properties: MessageProperties) -> Message {
        Message { body, properties }
    }

    /// A `text/plain` message.
    pub fn text(body: &str) -> Message {
        let mut msg = Message::new(body.as_bytes().to_vec());
        msg.properties.content_type = Some(TEXT_PLAIN_CONTENT_TYPE.to_owned());
        msg
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Copies an inbound lapin delivery, including its broker metadata.
    pub fn from_delivery(delivery: &Delivery) -> Message {
        let mut properties = MessageProperties::from_amqp(&delivery.properties);
        properties.delivery_tag = Some(delivery.delivery_tag);
        properties.redelivered = delivery.redelivered;
        properties.received_exchange = Some(delivery.exchange.to_string());
        properties.received_routing_key = Some(delivery.routing_key.to_string());

        Message::with_properties(delivery.data.clone(), properties)
    }

    /// Short printable description of the payload, used in error messages.
    pub fn describe_body(&self) -> String {
        const MAX: usize = 64;

        match std::str::from_utf8(&self.body) {
            Ok(text) if text.chars().count() > MAX => {
                format!("{}...", text.chars().take(MAX).collect::<String>())
            }
            Ok(text) => text.to_owned(),
            Err(_) => format!("byte[{}]", self.body.len()),
        }
    }
}
