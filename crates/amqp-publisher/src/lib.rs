//! AMQP side of the pos-event-bridge.
//!
//! [`Topology`] describes the exchange, the per-event-type queues and their
//! dead-letter counterparts; [`AmqpPublisher`] declares it on first use and
//! publishes every message on a confirm channel.

pub mod publisher;
pub mod topology;

pub use publisher::{AmqpOpts, AmqpPublisher};
pub use topology::{declare_topology, QueueBinding, Topology, DEAD_LETTER_EXCHANGE, EVENTS_EXCHANGE};
