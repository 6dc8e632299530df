//! Pooling of the channels used for outbound and administrative work.
//!
//! The pool keeps a single spare [`ManagedChannel`](crate::channel::ManagedChannel): borrowers
//! beyond the first get a freshly created channel, which is closed again when it comes back
//! to a pool that already holds its spare.
//!
//! ```rust,no_run
//! use amqp_connector::amqp::ExchangeKind;
//! use amqp_connector::{ConnectorError, Connector};
//!
//! async fn declare_orders_exchange(connector: &Connector) -> anyhow::Result<()> {
//!     connector
//!         .run_with_pooled_channel(|member| async move {
//!             let channel = member
//!                 .get_channel()
//!                 .await
//!                 .ok_or(ConnectorError::ChannelUnavailable)?;
//!             channel
//!                 .exchange_declare("orders", ExchangeKind::Topic, Default::default(), Default::default())
//!                 .await
//!         })
//!         .await
//! }
//! ```

mod channel;
mod error;
mod object_pool;

pub use channel::{ChannelManager, ChannelPool, MAX_IDLE_CHANNELS};
pub use error::Error;
pub use object_pool::{Manager, Pool};
