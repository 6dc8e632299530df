//! Implements [`Manager`] for [`ManagedChannel`].
use super::object_pool::{Manager, Pool};
use crate::channel::{ChannelContext, ManagedChannel};
use std::sync::Arc;
use tracing::debug;

/// Idle channels kept around for reuse: a single spare.
pub const MAX_IDLE_CHANNELS: usize = 1;

/// `ChannelPool` pools the [`ManagedChannel`]s used for publishing and topology declarations.
pub type ChannelPool = Pool<ChannelManager>;

/// `ChannelManager` implements [`Manager`] to manage a pool of [`ManagedChannel`]s.
///
/// Every channel it creates shares the connector's broker connection.
pub struct ChannelManager {
    context: Arc<ChannelContext>,
}

impl ChannelManager {
    pub fn new(context: Arc<ChannelContext>) -> Self {
        Self { context }
    }

    /// Build a [`ChannelPool`] holding at most [`MAX_IDLE_CHANNELS`] idle channels.
    pub fn into_pool(self) -> ChannelPool {
        Pool::new(self, MAX_IDLE_CHANNELS)
    }
}

#[async_trait::async_trait]
impl Manager for ChannelManager {
    type Type = ManagedChannel;

    async fn create(&self) -> Result<ManagedChannel, anyhow::Error> {
        // Fail fast rather than handing out a member that can never open a channel.
        self.context.connection.current()?;
        Ok(ManagedChannel::new(Arc::clone(&self.context)))
    }

    async fn validate(&self, obj: &ManagedChannel) -> bool {
        obj.get_channel()
            .await
            .map_or(false, |channel| channel.is_open())
    }

    async fn destroy(&self, obj: ManagedChannel) {
        debug!("Destroying pooled channel");
        obj.close().await;
    }
}
