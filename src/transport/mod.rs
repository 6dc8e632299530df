//! The narrow surface the connector needs from a broker client.
//!
//! [`TransportFactory`] dials a single broker address, [`Connection`] multiplexes channels over
//! the resulting socket and [`Channel`] carries the actual protocol operations.
//! The production implementation, on top of `lapin`, lives in [`rabbit_mq`] and is built by
//! [`ConnectionFactory`](crate::amqp::ConnectionFactory).
use crate::amqp::address::BrokerAddress;
use amq_protocol_types::{DeliveryTag, FieldTable, ShortString};
use futures_util::stream::BoxStream;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::{BasicProperties, ExchangeKind};
use std::sync::Arc;

pub mod rabbit_mq;

/// Why a connection or a channel went away.
#[derive(Debug)]
pub struct ShutdownSignal {
    /// `true` when the application asked for the shutdown itself.
    pub initiated_by_application: bool,
    pub reason: anyhow::Error,
}

impl ShutdownSignal {
    /// The peer (or the network) closed the connection or channel.
    pub fn by_broker(reason: impl Into<anyhow::Error>) -> Self {
        Self {
            initiated_by_application: false,
            reason: reason.into(),
        }
    }

    /// The application closed the connection or channel.
    pub fn by_application() -> Self {
        Self {
            initiated_by_application: true,
            reason: anyhow::anyhow!("Closed by the application"),
        }
    }
}

/// Callback fired when a connection or channel shuts down.
///
/// It runs on the broker client's own execution context, never on the thread that registered it.
pub type ShutdownObserver = Box<dyn Fn(ShutdownSignal) + Send + Sync + 'static>;

/// A message received from a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The delivery tag of the message.
    pub delivery_tag: DeliveryTag,
    /// The exchange of the message. May be an empty string
    /// if the default exchange is used.
    pub exchange: ShortString,
    /// The routing key of the message.
    pub routing_key: ShortString,
    /// Whether this message was redelivered
    pub redelivered: bool,
    /// Contains the properties and the headers of the message.
    pub properties: BasicProperties,
    /// The payload of the message in binary format.
    pub data: Vec<u8>,
}

/// A published message the broker could not route (or deliver) and sent back.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnedMessage {
    pub reply_code: u16,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
}

/// Receives the messages the broker returns on a channel.
pub trait ReturnHandler: Send + Sync + 'static {
    fn handle_return(&self, message: ReturnedMessage);
}

/// Stream of deliveries for a single consumer tag.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, anyhow::Error>>;

/// Dials broker addresses.
#[async_trait::async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    /// Open a new physical connection to `address`.
    ///
    /// Credentials and virtual host are a concern of the implementation.
    async fn connect(&self, address: &BrokerAddress) -> Result<Arc<dyn Connection>, anyhow::Error>;
}

/// A physical connection to a broker.
#[async_trait::async_trait]
pub trait Connection: Send + Sync + 'static {
    async fn create_channel(&self) -> Result<Arc<dyn Channel>, anyhow::Error>;

    fn is_open(&self) -> bool;

    /// Register the observer notified when the connection shuts down.
    fn on_shutdown(&self, observer: ShutdownObserver);

    async fn close(&self) -> Result<(), anyhow::Error>;
}

/// A channel multiplexed over a [`Connection`].
#[async_trait::async_trait]
pub trait Channel: Send + Sync + 'static {
    fn id(&self) -> u16;

    fn is_open(&self) -> bool;

    /// Register the observer notified when the channel shuts down.
    fn on_shutdown(&self, observer: ShutdownObserver);

    /// Route messages returned by the broker on this channel to `handler`.
    fn on_return(&self, handler: Arc<dyn ReturnHandler>);

    async fn close(&self) -> Result<(), anyhow::Error>;

    async fn basic_qos(
        &self,
        prefetch_size: u32,
        prefetch_count: u16,
        global: bool,
    ) -> Result<(), anyhow::Error>;

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, anyhow::Error>;

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), anyhow::Error>;

    async fn basic_ack(&self, delivery_tag: DeliveryTag) -> Result<(), anyhow::Error>;

    async fn basic_recover(&self, requeue: bool) -> Result<(), anyhow::Error>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), anyhow::Error>;

    /// Declare a queue, returning its name (the broker picks one when `queue` is empty).
    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<String, anyhow::Error>;

    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), anyhow::Error>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        options: QueueBindOptions,
        arguments: FieldTable,
    ) -> Result<(), anyhow::Error>;

    async fn tx_select(&self) -> Result<(), anyhow::Error>;

    async fn tx_commit(&self) -> Result<(), anyhow::Error>;

    async fn tx_rollback(&self) -> Result<(), anyhow::Error>;
}
