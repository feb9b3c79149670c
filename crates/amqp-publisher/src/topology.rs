//! Broker topology.
//!
//! One direct exchange, one durable queue per event type bound by the event
//! type as routing key. Each queue dead-letters into `pos.events.dlx`, where a
//! matching `<queue>.dead` queue collects what consumers reject.

use bridge_core::EventType;
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};
use tracing::{debug, info};

pub const EVENTS_EXCHANGE: &str = "pos.events";
pub const DEAD_LETTER_EXCHANGE: &str = "pos.events.dlx";

/// One live queue and its dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub event_type: EventType,
    pub queue: String,
    pub routing_key: String,
    pub dead_letter_queue: String,
}

impl QueueBinding {
    fn for_event_type(event_type: EventType) -> Self {
        let queue = event_type.queue_name().to_string();
        Self {
            event_type,
            routing_key: event_type.as_str().to_string(),
            dead_letter_queue: format!("{queue}.dead"),
            queue,
        }
    }

    /// Queue arguments routing rejected messages to the dead-letter exchange
    /// under the queue's own routing key.
    pub fn queue_arguments(&self, dead_letter_exchange: &str) -> FieldTable {
        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(dead_letter_exchange.into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(self.routing_key.as_str().into()),
        );
        args
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub dead_letter_exchange: String,
    pub queues: Vec<QueueBinding>,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new(&EventType::ALL)
    }
}

impl Topology {
    pub fn new(event_types: &[EventType]) -> Self {
        let mut queues: Vec<QueueBinding> = Vec::new();
        for event_type in event_types {
            if !queues.iter().any(|q| q.event_type == *event_type) {
                queues.push(QueueBinding::for_event_type(*event_type));
            }
        }
        Self {
            exchange: EVENTS_EXCHANGE.to_string(),
            dead_letter_exchange: DEAD_LETTER_EXCHANGE.to_string(),
            queues,
        }
    }

    /// Routing key for `event_type`, `None` when it has no queue here.
    pub fn routing_key(&self, event_type: EventType) -> Option<&str> {
        self.queues
            .iter()
            .find(|q| q.event_type == event_type)
            .map(|q| q.routing_key.as_str())
    }
}

/// Declare exchanges, queues and bindings. Every declaration is idempotent.
pub async fn declare_topology(channel: &Channel, topology: &Topology) -> lapin::Result<()> {
    let durable_exchange = ExchangeDeclareOptions {
        durable: true,
        ..ExchangeDeclareOptions::default()
    };
    let durable_queue = QueueDeclareOptions {
        durable: true,
        ..QueueDeclareOptions::default()
    };

    channel
        .exchange_declare(
            &topology.exchange,
            ExchangeKind::Direct,
            durable_exchange,
            FieldTable::default(),
        )
        .await?;
    channel
        .exchange_declare(
            &topology.dead_letter_exchange,
            ExchangeKind::Direct,
            durable_exchange,
            FieldTable::default(),
        )
        .await?;

    for binding in &topology.queues {
        channel
            .queue_declare(
                &binding.queue,
                durable_queue,
                binding.queue_arguments(&topology.dead_letter_exchange),
            )
            .await?;
        channel
            .queue_bind(
                &binding.queue,
                &topology.exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_declare(
                &binding.dead_letter_queue,
                durable_queue,
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                &binding.dead_letter_queue,
                &topology.dead_letter_exchange,
                &binding.routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        debug!(
            "Declared {} (+ {}) on routing key {}",
            binding.queue, binding.dead_letter_queue, binding.routing_key
        );
    }

    info!(
        "Declared topology: exchange {} with {} queue(s), dead letters on {}",
        topology.exchange,
        topology.queues.len(),
        topology.dead_letter_exchange
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::ShortString;

    #[test]
    fn test_default_topology() {
        let topology = Topology::default();
        assert_eq!(topology.exchange, "pos.events");
        assert_eq!(topology.dead_letter_exchange, "pos.events.dlx");
        assert_eq!(topology.queues.len(), 4);

        let tickets = &topology.queues[0];
        assert_eq!(tickets.queue, "pos.tickets");
        assert_eq!(tickets.routing_key, "ticket");
        assert_eq!(tickets.dead_letter_queue, "pos.tickets.dead");
        assert_eq!(topology.routing_key(EventType::Payment), Some("payment"));
    }

    #[test]
    fn test_only_requested_event_types() {
        let topology = Topology::new(&[EventType::Shift, EventType::Shift]);
        assert_eq!(topology.queues.len(), 1);
        assert_eq!(topology.routing_key(EventType::Ticket), None);
    }

    #[test]
    fn test_dead_letter_arguments() {
        let topology = Topology::default();
        let args = topology.queues[2].queue_arguments(&topology.dead_letter_exchange);
        let inner = args.inner();
        assert_eq!(
            inner.get(&ShortString::from("x-dead-letter-exchange")),
            Some(&AMQPValue::LongString("pos.events.dlx".into()))
        );
        assert_eq!(
            inner.get(&ShortString::from("x-dead-letter-routing-key")),
            Some(&AMQPValue::LongString("payment".into()))
        );
    }
}
