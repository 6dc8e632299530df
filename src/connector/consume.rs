use super::Connector;
use crate::amqp::configuration::AckMode;
use crate::transport::{Channel, Delivery};
use crate::ConnectorError;
use futures_util::StreamExt;
use lapin::options::BasicConsumeOptions;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// A message pulled from a queue, along with the consumer tag it was delivered to.
#[derive(Debug, Clone, PartialEq)]
pub struct AmqpMessage {
    pub consumer_tag: String,
    pub delivery: Delivery,
}

impl Connector {
    /// Fetch a single message from `queue`, waiting at most `timeout` for one to arrive.
    ///
    /// A temporary consumer is registered for the duration of the call and cancelled
    /// afterwards, whether a message arrived or not. `Ok(None)` means nothing was delivered in
    /// time: callers are expected to try again.
    #[tracing::instrument(name = "consume_one", skip(self, channel), fields(channel_id = channel.id()))]
    pub async fn consume(
        &self,
        channel: &dyn Channel,
        queue: &str,
        auto_ack: bool,
        timeout: Duration,
    ) -> Result<Option<AmqpMessage>, ConnectorError> {
        let consumer_tag = Uuid::new_v4().to_string();
        let options = BasicConsumeOptions {
            no_local: self.settings.no_local,
            no_ack: auto_ack,
            exclusive: self.settings.exclusive_consumers,
            nowait: false,
        };
        let mut deliveries = channel
            .basic_consume(queue, &consumer_tag, options)
            .await
            .map_err(ConnectorError::Broker)?;

        let outcome = tokio::time::timeout(timeout, deliveries.next()).await;
        drop(deliveries);
        channel
            .basic_cancel(&consumer_tag)
            .await
            .map_err(ConnectorError::Broker)?;

        match outcome {
            Ok(Some(Ok(delivery))) => Ok(Some(AmqpMessage {
                consumer_tag,
                delivery,
            })),
            Ok(Some(Err(e))) => Err(ConnectorError::Broker(e)),
            // Either the wait timed out or the consumer was cancelled by the broker.
            Ok(None) | Err(_) => Ok(None),
        }
    }

    /// Acknowledge `message` if the connector is the one in charge of acknowledgements.
    ///
    /// A no-op when the broker acks on delivery or when the application acks itself.
    pub async fn ack_if_necessary(
        &self,
        channel: &dyn Channel,
        message: &AmqpMessage,
    ) -> Result<(), ConnectorError> {
        if self.settings.ack_mode != AckMode::ConnectorAuto {
            return Ok(());
        }
        channel
            .basic_ack(message.delivery.delivery_tag)
            .await
            .map_err(ConnectorError::Broker)?;
        debug!(
            delivery_tag = message.delivery.delivery_tag,
            channel_id = channel.id(),
            "Connector acknowledged message"
        );
        Ok(())
    }

    /// Close `channel`. Failures are logged and swallowed.
    pub async fn close_channel(&self, channel: Option<&dyn Channel>) {
        let Some(channel) = channel else { return };
        debug!(channel_id = channel.id(), "Closing channel");
        match channel.close().await {
            Ok(()) => debug!(channel_id = channel.id(), "Closed channel"),
            Err(e) => warn!(channel_id = channel.id(), error = ?e, "Failed to close channel"),
        }
    }
}
