//! What happens to the messages the broker sends back.
use crate::transport::{ReturnHandler, ReturnedMessage};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{error, warn};

/// Used when no default return endpoint is configured: returned messages are logged and dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReturnHandler;

impl ReturnHandler for LoggingReturnHandler {
    fn handle_return(&self, message: ReturnedMessage) {
        warn!(
            reply_code = message.reply_code,
            reply_text = %message.reply_text,
            exchange = %message.exchange,
            routing_key = %message.routing_key,
            "Message returned by the broker"
        );
    }
}

/// Stand-in for a flow when the connector dispatches messages on its own behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorContext {
    pub connector_name: String,
}

/// A step of the pipeline returned messages are funnelled through.
#[async_trait::async_trait]
pub trait ReturnProcessor: Send + Sync + 'static {
    async fn process(
        &self,
        context: &ConnectorContext,
        message: ReturnedMessage,
    ) -> Result<(), anyhow::Error>;
}

/// Sends every returned message through the configured processors, in order.
///
/// Return notifications arrive on the broker client's tasks: processing is spawned on the
/// runtime the handler was built on.
pub struct DispatchingReturnHandler {
    processors: Arc<Vec<Arc<dyn ReturnProcessor>>>,
    context: ConnectorContext,
    runtime: Handle,
}

impl DispatchingReturnHandler {
    pub fn new(
        processors: Vec<Arc<dyn ReturnProcessor>>,
        context: ConnectorContext,
        runtime: Handle,
    ) -> Self {
        Self {
            processors: Arc::new(processors),
            context,
            runtime,
        }
    }
}

impl ReturnHandler for DispatchingReturnHandler {
    fn handle_return(&self, message: ReturnedMessage) {
        let processors = Arc::clone(&self.processors);
        let context = self.context.clone();
        self.runtime.spawn(async move {
            for processor in processors.iter() {
                if let Err(e) = processor.process(&context, message.clone()).await {
                    error!(
                        connector = %context.connector_name,
                        error = ?e,
                        "Failed to dispatch a returned message"
                    );
                    return;
                }
            }
        });
    }
}

impl std::fmt::Debug for DispatchingReturnHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchingReturnHandler")
            .field("processors", &self.processors.len())
            .field("context", &self.context)
            .finish()
    }
}
