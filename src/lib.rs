// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Template
//!
//! Client layer over RabbitMQ built on lapin: declarative topology, symbolic
//! addresses, a send/request-reply template with correlated replies, and listener
//! containers that turn handler failures into ack, requeue or discard decisions.

mod otel;

pub mod address;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod converter;
pub mod dispatcher;
pub mod error_handler;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod message;
pub mod queue;
pub mod template;
pub mod topology;
pub mod transport;
