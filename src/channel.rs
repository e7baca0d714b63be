// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module handles the creation of AMQP connections and channels. The
//! connection and channel are created once at process start and shared as `Arc`s
//! with the transport, the admin and the dispatcher.

use crate::{config::RabbitMQConfigs, errors::AmqpError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error};

/// Creates a new AMQP channel for communication with RabbitMQ.
///
/// # Returns
/// The connection and channel on success, or an error on failure.
///
/// # Example
/// ```no_run
/// # async fn run() -> Result<(), amqp_template::errors::AmqpError> {
/// use amqp_template::{channel::new_amqp_channel, config::RabbitMQConfigs};
///
/// let (_conn, _channel) = new_amqp_channel(&RabbitMQConfigs::from_env()?).await?;
/// # Ok(())
/// # }
/// ```
pub async fn new_amqp_channel(
    cfg: &RabbitMQConfigs,
) -> Result<(Arc<Connection>, Arc<Channel>), AmqpError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.connection_name.clone()));

    let conn = match Connection::connect(&cfg.uri(), options).await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), host = cfg.host, "failure to connect");
            Err(AmqpError::ConnectionError)
        }
    }?;
    debug!("amqp connected");

    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok((Arc::new(conn), Arc::new(c)))
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError)
        }
    }
}
