//! The single physical connection shared by every channel of a connector.
use crate::amqp::address::BrokerAddress;
use crate::transport::{Connection, TransportFactory};
use crate::{ConnectorError, ErrorSink};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Owns the connection to the broker and knows how to (re)establish it.
pub struct BrokerConnection {
    name: String,
    transport: Arc<dyn TransportFactory>,
    error_sink: Arc<dyn ErrorSink>,
    handle: Mutex<Option<Arc<dyn Connection>>>,
}

impl BrokerConnection {
    /// `name` identifies the connector in asynchronous [`ConnectorError::ConnectionLost`] reports.
    pub fn new(
        name: impl Into<String>,
        transport: Arc<dyn TransportFactory>,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            name: name.into(),
            transport,
            error_sink,
            handle: Mutex::new(None),
        }
    }

    /// Dial `addresses` in order and keep the first connection that succeeds.
    ///
    /// Candidates are tried one at a time, never in parallel. If all of them fail the error of
    /// the last attempt is returned.
    #[tracing::instrument(name = "broker_connect", skip_all, fields(connector = %self.name))]
    pub async fn connect(
        &self,
        addresses: &[BrokerAddress],
    ) -> Result<Arc<dyn Connection>, ConnectorError> {
        let mut last_failure = None;

        for address in addresses {
            match self.transport.connect(address).await {
                Ok(connection) => {
                    self.observe_shutdown(connection.as_ref());
                    info!(%address, "Connected to broker");
                    self.install(Arc::clone(&connection)).await;
                    return Ok(connection);
                }
                Err(e) => {
                    warn!(%address, error = ?e, "Failed to connect to broker");
                    last_failure = Some((address, e));
                }
            }
        }

        Err(match last_failure {
            Some((address, e)) => {
                ConnectorError::connect(format!("Failed to connect to broker at {address}"), e)
            }
            None => ConnectorError::connect(
                "Failed to connect to broker",
                anyhow::anyhow!("No broker address to connect to"),
            ),
        })
    }

    /// The live connection, if any.
    pub fn current(&self) -> Result<Arc<dyn Connection>, ConnectorError> {
        self.handle.lock().clone().ok_or(ConnectorError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Close the physical connection.
    ///
    /// Any later use fails with [`ConnectorError::NotConnected`] until [`BrokerConnection::connect`]
    /// succeeds again.
    pub async fn disconnect(&self) -> Result<(), ConnectorError> {
        let connection = self.handle.lock().take();
        match connection {
            Some(connection) => connection.close().await.map_err(ConnectorError::Disconnect),
            None => Ok(()),
        }
    }

    /// Forget the connection without closing it.
    pub(crate) fn release(&self) {
        self.handle.lock().take();
    }

    async fn install(&self, connection: Arc<dyn Connection>) {
        let previous = self.handle.lock().replace(connection);
        if let Some(previous) = previous {
            if let Err(e) = previous.close().await {
                debug!(error = ?e, "Ignored failure closing the replaced connection");
            }
        }
    }

    fn observe_shutdown(&self, connection: &dyn Connection) {
        let name = self.name.clone();
        let error_sink = Arc::clone(&self.error_sink);
        connection.on_shutdown(Box::new(move |signal| {
            if signal.initiated_by_application {
                return;
            }
            error_sink.report(ConnectorError::ConnectionLost {
                connector: name.clone(),
                source: signal.reason,
            });
        }));
    }
}
