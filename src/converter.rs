// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Payload Conversion
//!
//! Converters turn application values into message bodies and back. They work on
//! `serde_json::Value` so a converter can be shared as `Arc<dyn MessageConverter>`;
//! [`encode`] and [`decode`] add the typed step on top with serde.

use crate::{
    errors::ConversionError,
    message::{Message, MessageProperties, JSON_CONTENT_TYPE, TEXT_PLAIN_CONTENT_TYPE},
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// Payload codec.
pub trait MessageConverter: Send + Sync {
    /// Builds a message from a payload. A `Value::Null` payload has no message form.
    fn to_message(
        &self,
        payload: Value,
        properties: MessageProperties,
    ) -> Result<Message, ConversionError>;

    fn from_message(&self, message: &Message) -> Result<Value, ConversionError>;
}

/// Text bodies for strings, JSON for everything else.
///
/// Inbound, `text/*` bodies become strings, `application/json` bodies are parsed
/// and any other content type is handed over as raw bytes.
#[derive(Debug, Default, Clone)]
pub struct SimpleMessageConverter;

impl MessageConverter for SimpleMessageConverter {
    fn to_message(
        &self,
        payload: Value,
        mut properties: MessageProperties,
    ) -> Result<Message, ConversionError> {
        match payload {
            Value::Null => Err(ConversionError::new("cannot convert an empty payload")),
            Value::String(text) => {
                properties.content_type = Some(TEXT_PLAIN_CONTENT_TYPE.to_owned());
                properties.content_encoding = Some("UTF-8".to_owned());
                Ok(Message::with_properties(text.into_bytes(), properties))
            }
            other => JsonMessageConverter.to_message(other, properties),
        }
    }

    fn from_message(&self, message: &Message) -> Result<Value, ConversionError> {
        let content_type = message.properties.content_type.as_deref().unwrap_or("");

        if content_type.starts_with("text/") {
            return std::str::from_utf8(message.body())
                .map(|text| Value::String(text.to_owned()))
                .map_err(|err| {
                    ConversionError::new(format!(
                        "Failed to convert message payload '{}' to text: {err}",
                        message.describe_body()
                    ))
                });
        }

        if content_type.contains("json") {
            return JsonMessageConverter.from_message(message);
        }

        Ok(Value::Array(
            message.body().iter().map(|b| Value::from(*b)).collect(),
        ))
    }
}

/// JSON bodies in both directions, whatever the content type says.
#[derive(Debug, Default, Clone)]
pub struct JsonMessageConverter;

impl MessageConverter for JsonMessageConverter {
    fn to_message(
        &self,
        payload: Value,
        mut properties: MessageProperties,
    ) -> Result<Message, ConversionError> {
        if payload.is_null() {
            return Err(ConversionError::new("cannot convert an empty payload"));
        }

        let body = serde_json::to_vec(&payload)
            .map_err(|err| ConversionError::new(format!("Failed to write JSON payload: {err}")))?;
        properties.content_type = Some(JSON_CONTENT_TYPE.to_owned());
        properties.content_encoding = Some("UTF-8".to_owned());

        Ok(Message::with_properties(body, properties))
    }

    fn from_message(&self, message: &Message) -> Result<Value, ConversionError> {
        serde_json::from_slice(message.body()).map_err(|err| {
            ConversionError::new(format!(
                "Failed to convert message payload '{}' from JSON: {err}",
                message.describe_body()
            ))
        })
    }
}

/// Serializes `payload` and lets `converter` build the message.
///
/// Returns `Ok(None)` for payloads that serialize to nothing (`()`, `None`).
pub fn encode<T>(
    converter: &dyn MessageConverter,
    payload: &T,
    properties: MessageProperties,
) -> Result<Option<Message>, ConversionError>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(payload).map_err(|err| {
        ConversionError::new(format!(
            "Failed to convert payload of type '{}': {err}",
            std::any::type_name::<T>()
        ))
    })?;

    if value.is_null() {
        return Ok(None);
    }

    converter.to_message(value, properties).map(Some)
}

/// Reads the message through `converter` into `T`.
pub fn decode<T>(converter: &dyn MessageConverter, message: &Message) -> Result<T, ConversionError>
where
    T: DeserializeOwned,
{
    let value = converter.from_message(message)?;

    serde_json::from_value(value).map_err(|err| {
        ConversionError::new(format!(
            "Failed to convert message payload '{}' to '{}': {err}",
            message.describe_body(),
            std::any::type_name::<T>()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::OCTET_STREAM_CONTENT_TYPE;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Order {
        id: u32,
        item: String,
    }

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Date {
        year: i32,
    }

    #[test]
    fn should_encode_strings_as_text() {
        let msg = encode(&SimpleMessageConverter, "foo", MessageProperties::default())
            .unwrap()
            .unwrap();

        assert_eq!(msg.body(), b"foo");
        assert_eq!(msg.properties.content_type.as_deref(), Some(TEXT_PLAIN_CONTENT_TYPE));
        assert_eq!(decode::<String>(&SimpleMessageConverter, &msg).unwrap(), "foo");
    }

    #[test]
    fn should_encode_structs_as_json() {
        let order = Order {
            id: 7,
            item: "book".to_owned(),
        };
        let msg = encode(&SimpleMessageConverter, &order, MessageProperties::default())
            .unwrap()
            .unwrap();

        assert_eq!(msg.properties.content_type.as_deref(), Some(JSON_CONTENT_TYPE));
        assert_eq!(decode::<Order>(&SimpleMessageConverter, &msg).unwrap(), order);
    }

    #[test]
    fn should_produce_no_message_for_unit() {
        let msg = encode(&SimpleMessageConverter, &(), MessageProperties::default()).unwrap();
        assert!(msg.is_none());
    }

    #[test]
    fn should_name_payload_and_target_type_on_mismatch() {
        let err = decode::<Date>(&SimpleMessageConverter, &Message::text("bar")).unwrap_err();

        assert!(err.message().contains("Failed to convert message payload 'bar' to '"));
        assert!(err.message().contains("Date"));
    }

    #[test]
    fn should_reject_invalid_json() {
        let mut msg = Message::new(b"{not json".to_vec());
        msg.properties.content_type = Some(JSON_CONTENT_TYPE.to_owned());

        assert!(decode::<Order>(&JsonMessageConverter, &msg).is_err());
    }

    #[test]
    fn should_hand_over_unknown_content_as_bytes() {
        let mut msg = Message::new(vec![1, 2, 3]);
        msg.properties.content_type = Some(OCTET_STREAM_CONTENT_TYPE.to_owned());

        assert_eq!(decode::<Vec<u8>>(&SimpleMessageConverter, &msg).unwrap(), vec![1, 2, 3]);
    }
}
