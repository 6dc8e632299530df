//! [`Connection`] and [`Channel`] on top of [`lapin`].
use super::{
    Channel, Connection, Delivery, DeliveryStream, ReturnHandler, ReturnedMessage,
    ShutdownObserver, ShutdownSignal,
};
use amq_protocol_types::{DeliveryTag, FieldTable};
use futures_util::StreamExt;
use lapin::message::BasicReturnMessage;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    BasicQosOptions, BasicRecoverOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::{BasicProperties, ChannelState, ConnectionState, ExchangeKind};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reply code sent along a normal `connection.close`/`channel.close`.
const REPLY_SUCCESS: u16 = 200;

/// A [`lapin::Connection`] behind the [`Connection`] trait.
pub struct RabbitMqConnection {
    inner: lapin::Connection,
}

impl RabbitMqConnection {
    pub fn new(inner: lapin::Connection) -> Self {
        Self { inner }
    }

    pub fn raw(&self) -> &lapin::Connection {
        &self.inner
    }
}

#[async_trait::async_trait]
impl Connection for RabbitMqConnection {
    async fn create_channel(&self) -> Result<Arc<dyn Channel>, anyhow::Error> {
        let channel = self.inner.create_channel().await?;
        Ok(Arc::new(RabbitMqChannel::new(channel)))
    }

    fn is_open(&self) -> bool {
        matches!(self.inner.status().state(), ConnectionState::Connected)
    }

    fn on_shutdown(&self, observer: ShutdownObserver) {
        // lapin only invokes the error handler for failures, a local `close` never reaches it.
        self.inner
            .on_error(move |e| observer(ShutdownSignal::by_broker(e)));
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        Ok(self.inner.close(REPLY_SUCCESS, "OK").await?)
    }
}

/// A [`lapin::Channel`] behind the [`Channel`] trait.
pub struct RabbitMqChannel {
    inner: lapin::Channel,
    returns: ReturnListener,
}

impl RabbitMqChannel {
    pub fn new(inner: lapin::Channel) -> Self {
        Self {
            inner,
            returns: ReturnListener::default(),
        }
    }

    pub fn raw(&self) -> &lapin::Channel {
        &self.inner
    }
}

/// Hands returned messages to the handler registered on a channel.
#[derive(Default)]
struct ReturnListener {
    handler: RwLock<Option<Arc<dyn ReturnHandler>>>,
}

impl ReturnListener {
    fn register(&self, handler: Arc<dyn ReturnHandler>) {
        *self.handler.write() = Some(handler);
    }

    fn dispatch(&self, channel_id: u16, returned: impl IntoIterator<Item = ReturnedMessage>) {
        let handler = self.handler.read().clone();
        for message in returned {
            match &handler {
                Some(handler) => handler.handle_return(message),
                None => warn!(
                    channel_id,
                    reply_code = message.reply_code,
                    "Dropping message returned by the broker: no return handler registered"
                ),
            }
        }
    }
}

impl From<BasicReturnMessage> for ReturnedMessage {
    fn from(returned: BasicReturnMessage) -> Self {
        Self {
            reply_code: returned.reply_code,
            reply_text: returned.reply_text.to_string(),
            exchange: returned.delivery.exchange.to_string(),
            routing_key: returned.delivery.routing_key.to_string(),
            properties: returned.delivery.properties,
            data: returned.delivery.data,
        }
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(value: lapin::message::Delivery) -> Self {
        Self {
            delivery_tag: value.delivery_tag,
            exchange: value.exchange,
            routing_key: value.routing_key,
            redelivered: value.redelivered,
            properties: value.properties,
            data: value.data,
        }
    }
}

#[async_trait::async_trait]
impl Channel for RabbitMqChannel {
    fn id(&self) -> u16 {
        self.inner.id()
    }

    fn is_open(&self) -> bool {
        matches!(self.inner.status().state(), ChannelState::Connected)
    }

    fn on_shutdown(&self, observer: ShutdownObserver) {
        self.inner
            .on_error(move |e| observer(ShutdownSignal::by_broker(e)));
    }

    fn on_return(&self, handler: Arc<dyn ReturnHandler>) {
        self.returns.register(handler);
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        Ok(self.inner.close(REPLY_SUCCESS, "OK").await?)
    }

    async fn basic_qos(
        &self,
        prefetch_size: u32,
        prefetch_count: u16,
        global: bool,
    ) -> Result<(), anyhow::Error> {
        if prefetch_size != 0 {
            // RabbitMq rejects a non-zero prefetch size and lapin does not expose it.
            debug!(prefetch_size, "Ignoring prefetch size");
        }
        Ok(self
            .inner
            .basic_qos(prefetch_count, BasicQosOptions { global })
            .await?)
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
    ) -> Result<DeliveryStream, anyhow::Error> {
        let consumer = self
            .inner
            .basic_consume(queue, consumer_tag, options, FieldTable::default())
            .await?;
        Ok(consumer
            .map(|delivery| delivery.map(Delivery::from).map_err(anyhow::Error::from))
            .boxed())
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), anyhow::Error> {
        Ok(self
            .inner
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await?)
    }

    async fn basic_ack(&self, delivery_tag: DeliveryTag) -> Result<(), anyhow::Error> {
        Ok(self
            .inner
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await?)
    }

    async fn basic_recover(&self, requeue: bool) -> Result<(), anyhow::Error> {
        Ok(self
            .inner
            .basic_recover(BasicRecoverOptions { requeue })
            .await?)
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), anyhow::Error> {
        let confirm = self
            .inner
            .basic_publish(exchange, routing_key, options, payload, properties)
            .await?
            .await?;

        if let Confirmation::Ack(Some(returned)) | Confirmation::Nack(Some(returned)) = confirm {
            self.returns.dispatch(self.id(), [ReturnedMessage::from(*returned)]);
        }
        // Without publisher confirms lapin parks returned messages until they are drained here.
        let parked = self.inner.wait_for_confirms().await?;
        self.returns
            .dispatch(self.id(), parked.into_iter().map(ReturnedMessage::from));
        Ok(())
    }

    async fn queue_declare(
        &self,
        queue: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<String, anyhow::Error> {
        let queue = self.inner.queue_declare(queue, options, arguments).await?;
        Ok(queue.name().to_string())
    }

    async fn exchange_declare(
        &self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<(), anyhow::Error> {
        Ok(self
            .inner
            .exchange_declare(exchange, kind, options, arguments)
            .await?)
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        options: QueueBindOptions,
        arguments: FieldTable,
    ) -> Result<(), anyhow::Error> {
        Ok(self
            .inner
            .queue_bind(queue, exchange, routing_key, options, arguments)
            .await?)
    }

    async fn tx_select(&self) -> Result<(), anyhow::Error> {
        Ok(self.inner.tx_select().await?)
    }

    async fn tx_commit(&self) -> Result<(), anyhow::Error> {
        Ok(self.inner.tx_commit().await?)
    }

    async fn tx_rollback(&self) -> Result<(), anyhow::Error> {
        Ok(self.inner.tx_rollback().await?)
    }
}
