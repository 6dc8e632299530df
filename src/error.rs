/// Errors surfaced by the connector, its channels and its pool.
#[derive(thiserror::Error, Debug)]
pub enum ConnectorError {
    /// Dialing the broker or creating a channel failed.
    #[error("{context}")]
    Connect {
        context: String,
        #[source]
        source: anyhow::Error,
    },
    /// The broker (or the network) tore the connection down.
    ///
    /// Never returned from a call: it is pushed to the [`ErrorSink`](crate::ErrorSink).
    #[error("Connection shutdown detected for: {connector}")]
    ConnectionLost {
        connector: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("The connector is not connected to a broker")]
    NotConnected,
    #[error("Failed to obtain a usable channel from the pool")]
    PoolExhausted(#[source] anyhow::Error),
    #[error("No channel is currently available on the broker connection")]
    ChannelUnavailable,
    #[error("Failed to close the broker connection")]
    Disconnect(#[source] anyhow::Error),
    #[error("Failed to initialise the connector")]
    Initialisation(#[source] anyhow::Error),
    #[error("Generic error encountered when interacting with the RabbitMq broker")]
    Broker(#[source] anyhow::Error),
}

impl ConnectorError {
    pub(crate) fn connect(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::Connect {
            context: context.into(),
            source: source.into(),
        }
    }
}

/// Errors returned by [`AmqpTransaction`](crate::transaction::AmqpTransaction).
#[derive(thiserror::Error, Debug)]
pub enum TransactionError {
    #[error("A transaction can only bind to resources of type `Channel`, got `{0}`")]
    IllegalResourceType(&'static str),
    #[error("The transaction is already bound to a resource under key `{0}`")]
    AlreadyBound(String),
    #[error("The transaction has already been {0}")]
    AlreadyCompleted(&'static str),
    #[error("Failed to commit the broker transaction")]
    CommitFailed(#[source] anyhow::Error),
    #[error("Failed to roll back the broker transaction")]
    RollbackFailed(#[source] anyhow::Error),
}
