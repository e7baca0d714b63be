// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module provides functionality for declaring RabbitMQ topology components:
//! exchanges, queues and the bindings between them.
//!
//! The main components are:
//! - `Admin` trait: the declare operations a broker connection offers
//! - `RabbitAdmin`: implementation of the Admin trait over a lapin channel
//! - `Topology`: the set of definitions installed together
//!
//! Anonymous queues are named by the broker on declaration; their bindings are
//! completed with the assigned name during [`Topology::install`].

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{Binding, QueueDefinition},
};
use async_trait::async_trait;
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Declare operations on a broker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Admin: Send + Sync {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    /// Declares the queue and returns its name, assigned by the broker for anonymous queues.
    async fn declare_queue(&self, def: &QueueDefinition) -> Result<String, AmqpError>;

    async fn declare_binding(&self, binding: &Binding) -> Result<(), AmqpError>;
}

/// lapin implementation of the Admin trait.
pub struct RabbitAdmin {
    channel: Arc<Channel>,
}

impl RabbitAdmin {
    pub fn new(channel: Arc<Channel>) -> RabbitAdmin {
        RabbitAdmin { channel }
    }
}

#[async_trait]
impl Admin for RabbitAdmin {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", def.name());

        match self
            .channel
            .exchange_declare(
                def.name(),
                def.kind().into(),
                ExchangeDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    auto_delete: def.delete,
                    internal: def.internal,
                    nowait: def.no_wait,
                },
                FieldTable::from(def.params.clone()),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name(),
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(def.name().to_owned()))
            }
            _ => {
                debug!("exchange: {} was created", def.name());
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<String, AmqpError> {
        debug!("creating queue: {}", def.name());

        match self
            .channel
            .queue_declare(
                def.name(),
                QueueDeclareOptions {
                    passive: def.passive,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: def.no_wait,
                },
                FieldTable::from(def.params.clone()),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name = def.name(), "error to declare the queue");
                Err(AmqpError::DeclareQueueError(def.name().to_owned()))
            }
            Ok(queue) => {
                debug!("queue: {} was created", queue.name());
                Ok(queue.name().to_string())
            }
        }
    }

    async fn declare_binding(&self, binding: &Binding) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            binding.queue_name, binding.exchange_name, binding.routing_key
        );

        match self
            .channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::from(binding.params.clone()),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");

                Err(AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                ))
            }
            _ => Ok(()),
        }
    }
}

struct QueueEntry {
    def: QueueDefinition,
    bindings: Vec<Binding>,
}

/// Exchanges, queues and bindings declared together.
#[derive(Default)]
pub struct Topology {
    exchanges: Vec<ExchangeDefinition>,
    queues: Vec<QueueEntry>,
    bindings: Vec<Binding>,
}

impl Topology {
    pub fn new() -> Topology {
        Topology::default()
    }

    /// Adds an exchange; an equal definition is only declared once.
    pub fn exchange(mut self, def: ExchangeDefinition) -> Self {
        if !self.exchanges.contains(&def) {
            self.exchanges.push(def);
        }
        self
    }

    /// Adds a named queue; an equal definition is only declared once.
    pub fn queue(mut self, def: QueueDefinition) -> Self {
        if !self.queues.iter().any(|entry| entry.def == def) {
            self.queues.push(QueueEntry {
                def,
                bindings: vec![],
            });
        }
        self
    }

    /// Adds an anonymous queue with the bindings to create once it is named.
    ///
    /// The queue name of each binding is replaced by the broker-assigned name.
    pub fn anonymous_queue(mut self, def: QueueDefinition, bindings: Vec<Binding>) -> Self {
        self.queues.push(QueueEntry { def, bindings });
        self
    }

    pub fn binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Declares exchanges, then queues (each dead-letter queue before its queue),
    /// then bindings.
    ///
    /// Returns the broker-assigned names of the anonymous queues, in the order they
    /// were added. Stops at the first failure.
    pub async fn install(&self, admin: &dyn Admin) -> Result<Vec<String>, AmqpError> {
        for exchange in &self.exchanges {
            admin.declare_exchange(exchange).await?;
        }

        let mut assigned = vec![];
        let mut bindings = vec![];

        for entry in &self.queues {
            if let Some(dlq_name) = entry.def.dlq_name() {
                let mut dlq = QueueDefinition::new(dlq_name);
                dlq.durable = entry.def.durable;
                admin.declare_queue(&dlq).await?;
            }

            let name = admin.declare_queue(&entry.def).await?;

            bindings.extend(entry.bindings.iter().map(|b| b.for_queue(&name)));
            if entry.def.is_anonymous() {
                assigned.push(name);
            }
        }

        for binding in bindings.iter().chain(&self.bindings) {
            if binding.exchange_name.is_empty() {
                debug!(
                    queue = binding.queue_name,
                    "skipping binding to the default exchange"
                );
                continue;
            }

            admin.declare_binding(binding).await?;
        }

        debug!("topology was installed");

        Ok(assigned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeKind;
    use mockall::Sequence;

    #[tokio::test]
    async fn should_declare_in_order() {
        let mut admin = MockAdmin::new();
        let mut seq = Sequence::new();

        admin
            .expect_declare_exchange()
            .withf(|def| def.name() == "orders")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        admin
            .expect_declare_queue()
            .withf(|def| def.name() == "orders.created-dlq")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|def| Ok(def.name().to_owned()));
        admin
            .expect_declare_queue()
            .withf(|def| def.name() == "orders.created")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|def| Ok(def.name().to_owned()));
        admin
            .expect_declare_binding()
            .withf(|b| {
                b.queue_name() == "orders.created"
                    && b.exchange_name() == "orders"
                    && b.key() == "created"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let topology = Topology::new()
            .exchange(ExchangeDefinition::with_kind("orders", ExchangeKind::Topic).unwrap())
            .queue(QueueDefinition::new("orders.created").durable().with_dlq())
            .binding(
                Binding::new("orders.created")
                    .exchange("orders")
                    .routing_key("created"),
            );

        let anonymous = topology.install(&admin).await.unwrap();
        assert!(anonymous.is_empty());
    }

    #[tokio::test]
    async fn should_bind_anonymous_queue_to_assigned_name() {
        let mut admin = MockAdmin::new();
        admin.expect_declare_exchange().returning(|_| Ok(()));
        admin
            .expect_declare_queue()
            .withf(|def| def.is_anonymous())
            .times(1)
            .returning(|_| Ok("amq.gen-abc123".to_owned()));
        admin
            .expect_declare_binding()
            .withf(|b| b.queue_name() == "amq.gen-abc123" && b.exchange_name() == "events")
            .times(1)
            .returning(|_| Ok(()));

        let topology = Topology::new()
            .exchange(ExchangeDefinition::with_kind("events", ExchangeKind::Fanout).unwrap())
            .anonymous_queue(
                QueueDefinition::anonymous(),
                vec![Binding::new("").exchange("events")],
            );

        let anonymous = topology.install(&admin).await.unwrap();
        assert_eq!(anonymous, vec!["amq.gen-abc123".to_owned()]);
    }

    #[tokio::test]
    async fn should_declare_equal_definitions_once() {
        let mut admin = MockAdmin::new();
        admin
            .expect_declare_exchange()
            .times(1)
            .returning(|_| Ok(()));
        admin
            .expect_declare_queue()
            .times(1)
            .returning(|def| Ok(def.name().to_owned()));

        let topology = Topology::new()
            .exchange(ExchangeDefinition::new("orders").unwrap())
            .exchange(ExchangeDefinition::new("orders").unwrap())
            .queue(QueueDefinition::new("orders.created"))
            .queue(QueueDefinition::new("orders.created"));

        topology.install(&admin).await.unwrap();
    }

    #[tokio::test]
    async fn should_skip_bindings_to_default_exchange() {
        let mut admin = MockAdmin::new();
        admin
            .expect_declare_queue()
            .returning(|def| Ok(def.name().to_owned()));
        admin.expect_declare_binding().never();

        let topology = Topology::new()
            .queue(QueueDefinition::new("test.simple"))
            .binding(Binding::new("test.simple").routing_key("test.simple"));

        topology.install(&admin).await.unwrap();
    }

    #[tokio::test]
    async fn should_stop_at_first_failure() {
        let mut admin = MockAdmin::new();
        admin
            .expect_declare_exchange()
            .returning(|def| Err(AmqpError::DeclareExchangeError(def.name().to_owned())));
        admin.expect_declare_queue().never();

        let topology = Topology::new()
            .exchange(ExchangeDefinition::new("orders").unwrap())
            .queue(QueueDefinition::new("orders.created"));

        let err = topology.install(&admin).await.unwrap_err();
        assert!(matches!(err, AmqpError::DeclareExchangeError(name) if name == "orders"));
    }
}
