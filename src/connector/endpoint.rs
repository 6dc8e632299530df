use crate::channel::ManagedChannel;
use crate::transport::Channel;
use std::collections::BTreeMap;
use std::fmt;

/// Endpoint property asking for a durable queue.
pub const QUEUE_DURABLE: &str = "queueDurable";
/// Endpoint property asking for an auto-deleted queue.
pub const QUEUE_AUTO_DELETE: &str = "queueAutoDelete";
/// Endpoint property asking for an exclusive queue.
pub const QUEUE_EXCLUSIVE: &str = "queueExclusive";

/// An inbound or outbound endpoint as configured in the surrounding runtime.
///
/// The connector never interprets `address`: that is the job of the [`Topology`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: String,
    pub properties: BTreeMap<String, String>,
}

impl EndpointDescriptor {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// `true` if any queue-specific property (durable, auto-delete, exclusive) is set.
    pub fn has_queue_properties(&self) -> bool {
        [QUEUE_DURABLE, QUEUE_AUTO_DELETE, QUEUE_EXCLUSIVE]
            .iter()
            .any(|key| self.properties.contains_key(*key))
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Resolves (and, unless told otherwise, declares) the exchanges and queues endpoints refer to.
#[async_trait::async_trait]
pub trait Topology: Send + Sync + 'static {
    /// Name of the queue behind `endpoint`, declaring it if needed.
    ///
    /// `active_only` suppresses the passive/active declaration distinction.
    async fn resolve_or_declare_queue(
        &self,
        channel: &dyn Channel,
        endpoint: &EndpointDescriptor,
        active_only: bool,
    ) -> Result<String, anyhow::Error>;

    /// Name of the exchange behind `endpoint`, declaring it if needed.
    /// An empty name stands for the default exchange.
    async fn resolve_or_declare_exchange(
        &self,
        channel: &dyn Channel,
        endpoint: &EndpointDescriptor,
        active_only: bool,
    ) -> Result<String, anyhow::Error>;

    fn routing_key_of(&self, endpoint: &EndpointDescriptor) -> String;

    /// The queue named by an endpoint address, or an empty string.
    fn queue_name_of(&self, address: &str) -> String;
}

/// The resolved source of an inbound endpoint.
///
/// It owns the dedicated channel its receiver consumes from.
#[derive(Clone)]
pub struct InboundBinding {
    queue: String,
    channel: ManagedChannel,
}

impl InboundBinding {
    pub(crate) fn new(queue: String, channel: ManagedChannel) -> Self {
        Self { queue, channel }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn channel(&self) -> &ManagedChannel {
        &self.channel
    }
}

impl fmt::Debug for InboundBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundBinding")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// The resolved target of an outbound endpoint.
///
/// An empty `exchange` is the default exchange, in which case `routing_key` is a queue name.
#[derive(Clone)]
pub struct OutboundBinding {
    exchange: String,
    routing_key: String,
    channel: ManagedChannel,
}

impl OutboundBinding {
    pub(crate) fn new(exchange: String, routing_key: String, channel: ManagedChannel) -> Self {
        Self {
            exchange,
            routing_key,
            channel,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn channel(&self) -> &ManagedChannel {
        &self.channel
    }
}

impl fmt::Debug for OutboundBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundBinding")
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .finish_non_exhaustive()
    }
}
