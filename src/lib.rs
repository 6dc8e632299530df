//! `amqp-connector` bridges message flows to an AMQP 0-9-1 broker, built on top of [`lapin`].
//!
//! It manages a single broker connection (with ordered failover across candidate addresses),
//! lazily created channels that recover from broker-initiated shutdowns, a small pool of
//! channels for publishing and topology declarations, and local broker transactions.
//!
//! [`Connector`] is the best starting point to learn more about what `amqp-connector` provides.

pub mod amqp;
pub mod channel;
pub mod connection;
pub mod connector;
mod error;
pub mod lifecycle;
pub mod pool;
mod sink;
pub mod transaction;
pub mod transport;

pub use amqp::configuration::{AckMode, ConnectorSettings, DeliveryMode};
pub use connector::{Connector, ConnectorBuilder};
pub use error::{ConnectorError, TransactionError};
pub use sink::{ErrorSink, TracingErrorSink};
