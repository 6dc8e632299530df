//! The connector: broker connection, channel pool and the operations message flows build on.
mod consume;
mod endpoint;
mod publish;
mod returns;

pub use consume::AmqpMessage;
pub use endpoint::{
    EndpointDescriptor, InboundBinding, OutboundBinding, Topology, QUEUE_AUTO_DELETE,
    QUEUE_DURABLE, QUEUE_EXCLUSIVE,
};
pub use publish::OutboundMessage;
pub use returns::{
    ConnectorContext, DispatchingReturnHandler, LoggingReturnHandler, ReturnProcessor,
};

use crate::amqp::configuration::ConnectorSettings;
use crate::amqp::ConnectionFactory;
use crate::channel::{ChannelContext, ManagedChannel, QosSettings};
use crate::connection::BrokerConnection;
use crate::lifecycle::Lifecycle;
use crate::pool::{ChannelManager, ChannelPool};
use crate::transport::{ReturnHandler, TransportFactory};
use crate::{ConnectorError, ErrorSink, TracingErrorSink};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Bridges message flows to an AMQP broker.
///
/// A `Connector` owns one physical connection and a small pool of channels used to declare
/// topology and publish. Inbound and outbound endpoints are resolved through
/// [`Connector::connect_inbound`] and [`Connector::connect_outbound`], each getting a dedicated
/// [`ManagedChannel`].
///
/// # Lifecycle
///
/// [`Connector::builder`] → [`Connector::connect`] → [`Connector::start`] → steady state →
/// [`Connector::stop`] → [`Connector::disconnect`] → [`Connector::dispose`].
///
/// `connect` and `disconnect` are not meant to race with steady-state traffic: sequencing them
/// is up to the caller.
pub struct Connector {
    settings: ConnectorSettings,
    connection: Arc<BrokerConnection>,
    channel_context: Arc<ChannelContext>,
    pool: ChannelPool,
    topology: Arc<dyn Topology>,
    lifecycle: Arc<Lifecycle>,
    return_processors: Vec<Arc<dyn ReturnProcessor>>,
}

impl Connector {
    /// Start building a [`Connector`].
    ///
    /// The topology collaborator resolves endpoint addresses into exchanges and queues.
    pub fn builder(
        settings: ConnectorSettings,
        topology: Arc<dyn Topology>,
    ) -> ConnectorBuilder {
        ConnectorBuilder::new(settings, topology)
    }

    pub fn settings(&self) -> &ConnectorSettings {
        &self.settings
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn connection(&self) -> &BrokerConnection {
        &self.connection
    }

    pub fn pool(&self) -> &ChannelPool {
        &self.pool
    }

    pub fn is_started(&self) -> bool {
        self.lifecycle.is_started()
    }

    /// Dial the configured brokers, primary first, and reset the channel pool.
    ///
    /// Channels pooled before a reconnection belong to the old connection and are discarded.
    #[tracing::instrument(name = "connector_connect", skip(self), fields(connector = %self.settings.name))]
    pub async fn connect(&self) -> Result<(), ConnectorError> {
        let addresses = self.settings.broker_addresses();
        self.connection.connect(&addresses).await?;

        self.configure_default_return_handler();
        self.pool.clear().await;
        Ok(())
    }

    pub fn start(&self) {
        self.lifecycle.mark_started();
        debug!(connector = %self.settings.name, "Connector started");
    }

    /// `true` while [`Connector::stop`] is draining the pool.
    pub fn is_stopping(&self) -> bool {
        self.lifecycle.is_stopping()
    }

    /// Stop the connector and drain the pool.
    ///
    /// Channels failing to open while the connector is stopping are not reported to the
    /// [`ErrorSink`].
    pub async fn stop(&self) {
        self.lifecycle.mark_stopping();
        self.pool.clear().await;
        self.lifecycle.mark_stopped();
        debug!(connector = %self.settings.name, "Connector stopped");
    }

    /// Drop the pooled channels and close the broker connection.
    ///
    /// Channels currently borrowed are not interrupted: they fail on their next use.
    #[tracing::instrument(name = "connector_disconnect", skip(self), fields(connector = %self.settings.name))]
    pub async fn disconnect(&self) -> Result<(), ConnectorError> {
        if self.lifecycle.is_started() {
            self.stop().await;
        } else {
            self.pool.clear().await;
        }
        self.connection.disconnect().await
    }

    /// Close the pool for good and forget the broker connection.
    pub async fn dispose(&self) {
        self.pool.close().await;
        self.connection.release();
    }

    /// A channel not managed by the pool, e.g. for a receiver or a requester.
    pub fn managed_channel(&self) -> ManagedChannel {
        ManagedChannel::new(Arc::clone(&self.channel_context))
    }

    /// Run `action` with a channel borrowed from the pool.
    ///
    /// The channel goes back to the pool once `action` succeeds. If `action` fails the channel is
    /// considered broken and destroyed instead, and the error is handed back unchanged.
    pub async fn run_with_pooled_channel<T, F, Fut>(&self, action: F) -> Result<T, anyhow::Error>
    where
        F: FnOnce(ManagedChannel) -> Fut,
        Fut: Future<Output = Result<T, anyhow::Error>>,
    {
        let member = self
            .pool
            .borrow()
            .await
            .map_err(|e| ConnectorError::PoolExhausted(e.into()))?;

        match action(member.clone()).await {
            Ok(value) => {
                self.pool.return_(member).await;
                Ok(value)
            }
            Err(e) => {
                debug!(error = ?e, "Invalidating pooled channel after a failed action");
                self.pool.invalidate(member).await;
                Err(e)
            }
        }
    }

    /// Resolve the queue an inbound endpoint consumes from, declaring it if needed.
    #[tracing::instrument(name = "connect_inbound", skip(self), fields(endpoint = %endpoint))]
    pub async fn connect_inbound(
        &self,
        endpoint: &EndpointDescriptor,
    ) -> Result<InboundBinding, ConnectorError> {
        let active_only = self.settings.active_declarations_only;
        self.run_with_pooled_channel(|member| async move {
            let channel = member
                .get_channel()
                .await
                .ok_or(ConnectorError::ChannelUnavailable)?;
            let queue = self
                .topology
                .resolve_or_declare_queue(channel.as_ref(), endpoint, active_only)
                .await?;
            Ok(InboundBinding::new(queue, self.managed_channel()))
        })
        .await
        .map_err(|e| {
            ConnectorError::connect(format!("Error when connecting inbound endpoint: {endpoint}"), e)
        })
    }

    /// Resolve the exchange and routing key an outbound endpoint publishes to, declaring the
    /// exchange (and the queue, when the endpoint describes one) if needed.
    ///
    /// With no exchange and no routing key, messages go through the default exchange straight
    /// to the queue named by the endpoint address.
    #[tracing::instrument(name = "connect_outbound", skip(self), fields(endpoint = %endpoint))]
    pub async fn connect_outbound(
        &self,
        endpoint: &EndpointDescriptor,
    ) -> Result<OutboundBinding, ConnectorError> {
        let active_only = self.settings.active_declarations_only;
        self.run_with_pooled_channel(|member| async move {
            let channel = member
                .get_channel()
                .await
                .ok_or(ConnectorError::ChannelUnavailable)?;
            let exchange = self
                .topology
                .resolve_or_declare_exchange(channel.as_ref(), endpoint, active_only)
                .await?;

            let queue_name = self.topology.queue_name_of(&endpoint.address);
            if !queue_name.is_empty() || endpoint.has_queue_properties() {
                self.topology
                    .resolve_or_declare_queue(channel.as_ref(), endpoint, active_only)
                    .await?;
            }

            let mut routing_key = self.topology.routing_key_of(endpoint);
            if exchange.trim().is_empty()
                && routing_key.trim().is_empty()
                && !queue_name.trim().is_empty()
            {
                routing_key = queue_name;
            }
            Ok(OutboundBinding::new(
                exchange,
                routing_key,
                self.managed_channel(),
            ))
        })
        .await
        .map_err(|e| {
            ConnectorError::connect(format!("Error when connecting outbound endpoint: {endpoint}"), e)
        })
    }

    fn configure_default_return_handler(&self) {
        let handler: Arc<dyn ReturnHandler> = if self.return_processors.is_empty() {
            Arc::new(LoggingReturnHandler)
        } else {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let handler = DispatchingReturnHandler::new(
                        self.return_processors.clone(),
                        ConnectorContext {
                            connector_name: self.settings.name.clone(),
                        },
                        runtime,
                    );
                    info!("Configured default return endpoint: {:?}", handler);
                    Arc::new(handler)
                }
                Err(e) => {
                    error!(error = ?e, "No runtime to dispatch returned messages on, logging them instead");
                    Arc::new(LoggingReturnHandler)
                }
            }
        };
        self.channel_context.set_return_handler(handler);
    }
}

/// A builder for [`Connector`].
///
/// Use [`Connector::builder`] as entrypoint.
pub struct ConnectorBuilder {
    settings: ConnectorSettings,
    topology: Arc<dyn Topology>,
    transport: Option<Arc<dyn TransportFactory>>,
    error_sink: Arc<dyn ErrorSink>,
    return_processors: Vec<Arc<dyn ReturnProcessor>>,
}

impl ConnectorBuilder {
    fn new(settings: ConnectorSettings, topology: Arc<dyn Topology>) -> Self {
        Self {
            settings,
            topology,
            transport: None,
            error_sink: Arc::new(TracingErrorSink),
            return_processors: Vec::new(),
        }
    }

    /// Dial brokers with `transport` instead of building a [`ConnectionFactory`] from the
    /// settings.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn TransportFactory>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Where asynchronous failures are reported. Defaults to [`TracingErrorSink`].
    #[must_use]
    pub fn with_error_sink(mut self, error_sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = error_sink;
        self
    }

    /// Send messages returned by the broker through `processor`.
    ///
    /// Without any processor, returned messages are only logged.
    #[must_use]
    pub fn with_default_return_processor<P: ReturnProcessor>(mut self, processor: P) -> Self {
        self.return_processors.push(Arc::new(processor));
        self
    }

    /// Finalise the builder and get an instance of [`Connector`].
    ///
    /// Fails if no transport was supplied and the settings do not describe a usable one
    /// (e.g. an invalid TLS certificate).
    pub fn build(self) -> Result<Connector, ConnectorError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ConnectionFactory::new_from_config(&self.settings)
                    .map_err(ConnectorError::Initialisation)?,
            ),
        };

        let connection = Arc::new(BrokerConnection::new(
            self.settings.name.clone(),
            transport,
            Arc::clone(&self.error_sink),
        ));
        let lifecycle = Arc::new(Lifecycle::default());
        let channel_context = Arc::new(ChannelContext::new(
            Arc::clone(&connection),
            QosSettings {
                prefetch_size: self.settings.prefetch_size,
                prefetch_count: self.settings.prefetch_count,
            },
            Arc::clone(&lifecycle),
            self.error_sink,
            Arc::new(LoggingReturnHandler),
        ));
        let pool = ChannelManager::new(Arc::clone(&channel_context)).into_pool();

        Ok(Connector {
            settings: self.settings,
            connection,
            channel_context,
            pool,
            topology: self.topology,
            lifecycle,
            return_processors: self.return_processors,
        })
    }
}
