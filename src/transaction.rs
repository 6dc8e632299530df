//! Local broker transactions scoped to a single channel.
use crate::transport::Channel;
use crate::TransactionError;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// What to do with unacknowledged deliveries once a transaction has been rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverStrategy {
    /// Leave them alone.
    None,
    /// Redeliver them to the same consumer.
    NoRequeue,
    /// Put them back in their queue, possibly for another consumer.
    Requeue,
}

impl fmt::Display for RecoverStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::NoRequeue => write!(f, "no-requeue"),
            Self::Requeue => write!(f, "requeue"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Begun,
    Committed,
    RolledBack,
}

/// Wraps an AMQP local transaction: it holds a channel and decides when the work done on it is
/// committed or rolled back.
///
/// The channel is expected to be in transactional mode already (`tx.select`).
pub struct AmqpTransaction {
    recover_strategy: RecoverStrategy,
    state: TransactionState,
    resource: Option<(String, Arc<dyn Channel>)>,
}

impl AmqpTransaction {
    pub fn new(recover_strategy: RecoverStrategy) -> Self {
        Self {
            recover_strategy,
            state: TransactionState::Begun,
            resource: None,
        }
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn recover_strategy(&self) -> RecoverStrategy {
        self.recover_strategy
    }

    /// Bind the channel the transaction runs on.
    ///
    /// Any concrete channel works once coerced, e.g. an `Arc<RabbitMqChannel>` passed as
    /// `Arc<dyn Channel>`.
    pub fn bind_channel(
        &mut self,
        key: impl Into<String>,
        channel: Arc<dyn Channel>,
    ) -> Result<(), TransactionError> {
        if let Some((bound_key, _)) = &self.resource {
            return Err(TransactionError::AlreadyBound(bound_key.clone()));
        }
        self.resource = Some((key.into(), channel));
        Ok(())
    }

    /// Bind a resource handed over by a caller that does not know its type.
    ///
    /// Only an `Arc<dyn Channel>` is accepted: anything else, including a channel that has not
    /// been coerced to `Arc<dyn Channel>`, is rejected with
    /// [`TransactionError::IllegalResourceType`]. Prefer [`AmqpTransaction::bind_channel`].
    pub fn bind_resource<R: Any + Send + Sync>(
        &mut self,
        key: impl Into<String>,
        resource: R,
    ) -> Result<(), TransactionError> {
        let resource: Box<dyn Any + Send + Sync> = Box::new(resource);
        let channel = resource
            .downcast::<Arc<dyn Channel>>()
            .map_err(|_| TransactionError::IllegalResourceType(std::any::type_name::<R>()))?;
        self.bind_channel(key, *channel)
    }

    pub fn has_resource(&self) -> bool {
        self.resource.is_some()
    }

    /// Nothing to do: the bound channel is already transactional.
    pub fn begin(&mut self) {}

    /// Commit the work done on the bound channel.
    ///
    /// Without a bound channel there is nothing to commit: a warning is logged and the
    /// transaction is considered committed.
    pub async fn commit(&mut self) -> Result<(), TransactionError> {
        self.ensure_begun()?;
        let Some((_, channel)) = &self.resource else {
            warn!("Committing a transaction with no bound resource");
            self.state = TransactionState::Committed;
            return Ok(());
        };

        channel
            .tx_commit()
            .await
            .map_err(TransactionError::CommitFailed)?;
        self.state = TransactionState::Committed;
        debug!(channel_id = channel.id(), "Committed transaction");
        Ok(())
    }

    /// Roll back the work done on the bound channel, then apply the [`RecoverStrategy`].
    ///
    /// Once the broker acknowledged the rollback the transaction is rolled back: a failing
    /// recovery is only logged.
    pub async fn rollback(&mut self) -> Result<(), TransactionError> {
        self.ensure_begun()?;
        let Some((_, channel)) = &self.resource else {
            warn!("Rolling back a transaction with no bound resource");
            self.state = TransactionState::RolledBack;
            return Ok(());
        };

        channel
            .tx_rollback()
            .await
            .map_err(TransactionError::RollbackFailed)?;
        self.state = TransactionState::RolledBack;
        debug!(channel_id = channel.id(), "Rolled back transaction");

        let recovery = match self.recover_strategy {
            RecoverStrategy::None => return Ok(()),
            RecoverStrategy::NoRequeue => channel.basic_recover(false).await,
            RecoverStrategy::Requeue => channel.basic_recover(true).await,
        };
        if let Err(e) = recovery {
            warn!(
                channel_id = channel.id(),
                recover_strategy = %self.recover_strategy,
                error = ?e,
                "Failed to recover channel after rollback"
            );
        }
        Ok(())
    }

    fn ensure_begun(&self) -> Result<(), TransactionError> {
        match self.state {
            TransactionState::Begun => Ok(()),
            TransactionState::Committed => Err(TransactionError::AlreadyCompleted("committed")),
            TransactionState::RolledBack => Err(TransactionError::AlreadyCompleted("rolled back")),
        }
    }
}
