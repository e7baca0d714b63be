// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Addresses
//!
//! An `Address` names a send target as exchange type, exchange name and routing key.
//! Two textual forms are understood:
//!
//! - structured: `direct://my-exchange/routing-key`
//! - unstructured: `my-exchange/routing-key`, `/routing-key` or `routing-key`
//!
//! An address renders back in the form it was built from. The unstructured parser
//! splits on the last `/`, so a routing key that itself contains `/` only survives
//! a round trip in the structured form.

use crate::{errors::AmqpError, exchange::ExchangeKind};
use std::{fmt, str::FromStr};

const SCHEME_SEPARATOR: &str = "://";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Form {
    Structured,
    /// `exchange/key`, possibly with an empty exchange
    Qualified,
    /// routing key only
    Bare,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    exchange_type: ExchangeKind,
    exchange_name: String,
    routing_key: String,
    form: Form,
}

impl Address {
    /// Structured address, rendered as `type://exchange/key`.
    ///
    /// # Errors
    /// `AmqpError::AddressFormatError` when the rendered text would not parse back
    /// to the same address: an exchange name containing `/`, or a type that is not
    /// a scheme token. A custom type spelling a known kind is stored as that kind.
    pub fn new(
        exchange_type: ExchangeKind,
        exchange_name: &str,
        routing_key: &str,
    ) -> Result<Address, AmqpError> {
        let malformed = || {
            AmqpError::AddressFormatError(format!(
                "{exchange_type}{SCHEME_SEPARATOR}{exchange_name}/{routing_key}"
            ))
        };

        if exchange_name.contains('/') || !is_scheme_token(exchange_type.as_str()) {
            return Err(malformed());
        }

        let exchange_type = exchange_type
            .as_str()
            .parse::<ExchangeKind>()
            .map_err(|_| malformed())?;

        Ok(Address {
            exchange_type,
            exchange_name: exchange_name.to_owned(),
            routing_key: routing_key.to_owned(),
            form: Form::Structured,
        })
    }

    /// Unstructured address, rendered as `exchange/key`.
    pub fn unstructured(exchange_name: &str, routing_key: &str) -> Address {
        Address {
            exchange_type: ExchangeKind::Direct,
            exchange_name: exchange_name.to_owned(),
            routing_key: routing_key.to_owned(),
            form: Form::Qualified,
        }
    }

    /// Address on the default exchange, rendered as the bare routing key.
    pub fn routing_key_only(routing_key: &str) -> Address {
        Address {
            exchange_type: ExchangeKind::Direct,
            exchange_name: String::new(),
            routing_key: routing_key.to_owned(),
            form: Form::Bare,
        }
    }

    /// Parses either textual form.
    ///
    /// # Errors
    /// `AmqpError::AddressFormatError` when the text contains `://` but the scheme
    /// is empty or not a type token, or the exchange/routing-key separator is missing.
    /// Text without `://` always parses.
    pub fn parse(text: &str) -> Result<Address, AmqpError> {
        let Some((scheme, rest)) = text.split_once(SCHEME_SEPARATOR) else {
            return Ok(Self::parse_unstructured(text));
        };

        if !is_scheme_token(scheme) {
            return Err(AmqpError::AddressFormatError(text.to_owned()));
        }

        let Some((exchange_name, routing_key)) = rest.split_once('/') else {
            return Err(AmqpError::AddressFormatError(text.to_owned()));
        };

        let exchange_type = scheme
            .parse::<ExchangeKind>()
            .map_err(|_| AmqpError::AddressFormatError(text.to_owned()))?;

        Address::new(exchange_type, exchange_name, routing_key)
    }

    fn parse_unstructured(text: &str) -> Address {
        match text.rsplit_once('/') {
            Some((exchange_name, routing_key)) => Address::unstructured(exchange_name, routing_key),
            None => Address::routing_key_only(text),
        }
    }

    pub fn exchange_type(&self) -> &ExchangeKind {
        &self.exchange_type
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn is_structured(&self) -> bool {
        self.form == Form::Structured
    }
}

fn is_scheme_token(scheme: &str) -> bool {
    !scheme.is_empty()
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl FromStr for Address {
    type Err = AmqpError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Address::parse(text)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.form {
            Form::Structured => write!(
                f,
                "{}{}{}/{}",
                self.exchange_type, SCHEME_SEPARATOR, self.exchange_name, self.routing_key
            ),
            Form::Qualified => write!(f, "{}/{}", self.exchange_name, self.routing_key),
            Form::Bare => f.write_str(&self.routing_key),
        }
    }
}
