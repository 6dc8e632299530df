//! Lazily created channels that heal themselves after the broker closes them.
use crate::connection::BrokerConnection;
use crate::lifecycle::Lifecycle;
use crate::transport::{Channel, ReturnHandler};
use crate::{ConnectorError, ErrorSink};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Quality of service applied to every channel right after it has been opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QosSettings {
    pub prefetch_size: u32,
    pub prefetch_count: u16,
}

/// Everything a [`ManagedChannel`] needs from its connector to open channels.
pub struct ChannelContext {
    pub(crate) connection: Arc<BrokerConnection>,
    pub(crate) qos: QosSettings,
    pub(crate) lifecycle: Arc<Lifecycle>,
    pub(crate) error_sink: Arc<dyn ErrorSink>,
    return_handler: RwLock<Arc<dyn ReturnHandler>>,
}

impl ChannelContext {
    pub fn new(
        connection: Arc<BrokerConnection>,
        qos: QosSettings,
        lifecycle: Arc<Lifecycle>,
        error_sink: Arc<dyn ErrorSink>,
        return_handler: Arc<dyn ReturnHandler>,
    ) -> Self {
        Self {
            connection,
            qos,
            lifecycle,
            error_sink,
            return_handler: RwLock::new(return_handler),
        }
    }

    /// The handler attached to channels created from now on.
    pub fn return_handler(&self) -> Arc<dyn ReturnHandler> {
        Arc::clone(&self.return_handler.read())
    }

    pub(crate) fn set_return_handler(&self, handler: Arc<dyn ReturnHandler>) {
        *self.return_handler.write() = handler;
    }
}

type ChannelSlot = Mutex<Option<Arc<dyn Channel>>>;

/// A logical channel bound to the connector's broker connection.
///
/// The underlying [`Channel`] is opened on first use and transparently reopened on the next
/// [`ManagedChannel::get_channel`] call after the broker shut it down.
///
/// Clones share the same underlying channel.
#[derive(Clone)]
pub struct ManagedChannel {
    context: Arc<ChannelContext>,
    slot: Arc<ChannelSlot>,
}

impl ManagedChannel {
    pub fn new(context: Arc<ChannelContext>) -> Self {
        Self {
            context,
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// The live channel, opening one if needed.
    ///
    /// Returns `None` when no channel can be opened right now: the failure has already been
    /// reported to the [`ErrorSink`] (unless the connector is shutting down) and the caller
    /// should treat the channel as temporarily unavailable.
    ///
    /// Concurrent callers racing to open the first channel all end up with the same one:
    /// the first to install its channel wins, the others close theirs and use the winner's.
    pub async fn get_channel(&self) -> Option<Arc<dyn Channel>> {
        loop {
            if let Some(channel) = self.current() {
                return Some(channel);
            }

            let channel = self.new_channel().await?;
            if self.install(&channel) {
                return Some(channel);
            }

            debug!(channel_id = channel.id(), "Lost channel creation race, closing orphan");
            if let Err(e) = channel.close().await {
                debug!(error = ?e, "Ignored failure closing orphaned channel");
            }
        }
    }

    /// The channel currently held, without opening a new one.
    ///
    /// A channel that no longer reports open is discarded here.
    pub fn current(&self) -> Option<Arc<dyn Channel>> {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(channel) if !channel.is_open() => {
                debug!(channel_id = channel.id(), "Discarding closed channel");
                *slot = None;
                None
            }
            channel => channel.cloned(),
        }
    }

    /// Close and forget the held channel, if any. Failures are logged, never returned.
    pub async fn close(&self) {
        let channel = self.slot.lock().take();
        if let Some(channel) = channel {
            debug!(channel_id = channel.id(), "Closing channel");
            if let Err(e) = channel.close().await {
                warn!(channel_id = channel.id(), error = ?e, "Failed to close channel");
            }
        }
    }

    /// `true` if both handles wrap the same underlying slot.
    pub fn same_as(&self, other: &ManagedChannel) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Store `channel` unless another one got there first.
    fn install(&self, channel: &Arc<dyn Channel>) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(Arc::clone(channel));
        true
    }

    async fn new_channel(&self) -> Option<Arc<dyn Channel>> {
        match self.open_channel().await {
            Ok(channel) => {
                debug!(channel_id = channel.id(), "Created and configured new channel");
                Some(channel)
            }
            Err(e) => {
                let lifecycle = &self.context.lifecycle;
                if !lifecycle.is_stopping() && lifecycle.is_started() {
                    self.context.error_sink.report(ConnectorError::connect(
                        "Impossible to create new channels on the broker connection",
                        e,
                    ));
                } else {
                    debug!(error = ?e, "Failed to create channel while the connector is not running");
                }
                None
            }
        }
    }

    async fn open_channel(&self) -> Result<Arc<dyn Channel>, anyhow::Error> {
        let connection = self.context.connection.current()?;
        let channel = connection.create_channel().await?;

        channel.on_shutdown(clear_on_broker_shutdown(
            Arc::downgrade(&self.slot),
            Arc::downgrade(&channel),
        ));
        channel.on_return(self.context.return_handler());

        let QosSettings {
            prefetch_size,
            prefetch_count,
        } = self.context.qos;
        if let Err(e) = channel.basic_qos(prefetch_size, prefetch_count, false).await {
            if let Err(close_error) = channel.close().await {
                debug!(error = ?close_error, "Ignored failure closing misconfigured channel");
            }
            return Err(e);
        }
        Ok(channel)
    }
}

/// Empty the slot when the broker terminates the channel it holds.
///
/// The layer holding a [`ManagedChannel`] cannot decide on a retry policy, so nothing is
/// reported: the next `get_channel` opens a fresh channel.
fn clear_on_broker_shutdown(
    slot: Weak<ChannelSlot>,
    channel: Weak<dyn Channel>,
) -> crate::transport::ShutdownObserver {
    Box::new(move |signal| {
        if signal.initiated_by_application {
            return;
        }
        let (Some(slot), Some(channel)) = (slot.upgrade(), channel.upgrade()) else {
            return;
        };
        let mut slot = slot.lock();
        if slot.as_ref().map_or(false, |held| same_channel(held, &channel)) {
            *slot = None;
            debug!(channel_id = channel.id(), reason = ?signal.reason, "Terminated dead channel");
        }
    })
}

/// Identity of two channel handles, ignoring which vtable each one carries.
fn same_channel(a: &Arc<dyn Channel>, b: &Arc<dyn Channel>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
