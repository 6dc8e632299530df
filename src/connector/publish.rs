use super::{Connector, OutboundBinding};
use crate::ConnectorError;
use lapin::options::BasicPublishOptions;
use lapin::BasicProperties;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;
use uuid::Uuid;

/// A message to publish through an [`OutboundBinding`].
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub payload: Vec<u8>,
    pub properties: BasicProperties,
}

impl Connector {
    /// Publish `message` to the exchange and routing key of `binding`.
    ///
    /// Delivery mode and priority fall back to the connector settings when the message does not
    /// set them. The `mandatory` and `immediate` flags come from the settings: messages the
    /// broker returns are handed to the channel's return handler.
    #[tracing::instrument(
        level = "debug",
        skip(self, message),
        fields(exchange = %binding.exchange(), routing_key = %binding.routing_key())
    )]
    pub async fn publish(
        &self,
        binding: &OutboundBinding,
        message: OutboundMessage,
    ) -> Result<(), ConnectorError> {
        let channel = binding
            .channel()
            .get_channel()
            .await
            .ok_or(ConnectorError::ChannelUnavailable)?;

        let options = BasicPublishOptions {
            mandatory: self.settings.mandatory,
            immediate: self.settings.immediate,
        };
        let properties = self.default_properties(message.properties);

        channel
            .basic_publish(
                binding.exchange(),
                binding.routing_key(),
                options,
                &message.payload,
                properties,
            )
            .await
            .map_err(ConnectorError::Broker)
    }

    fn default_properties(&self, properties: BasicProperties) -> BasicProperties {
        let delivery_mode =
            (*properties.delivery_mode()).unwrap_or_else(|| self.settings.delivery_mode.as_amqp());
        let priority = (*properties.priority()).unwrap_or(self.settings.priority);
        let message_id = properties
            .message_id()
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string().into());

        let properties = properties
            .with_delivery_mode(delivery_mode)
            .with_priority(priority)
            .with_message_id(message_id);

        if properties.timestamp().is_some() {
            return properties;
        }
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(now) => properties.with_timestamp(now.as_secs()),
            Err(_) => {
                warn!("System time is before 1970");
                properties
            }
        }
    }
}
