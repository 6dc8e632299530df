use crate::ConnectorError;

/// Destination for errors that cannot be returned to a caller.
///
/// Shutdown observers fire on the broker client's own tasks, far away from any call stack that
/// could handle a `Result`: whatever goes wrong there is reported here instead.
pub trait ErrorSink: Send + Sync + 'static {
    fn report(&self, error: ConnectorError);
}

/// The default [`ErrorSink`]: it logs every report at `ERROR` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, error: ConnectorError) {
        tracing::error!(error = ?anyhow::Error::from(error), "Asynchronous connector failure");
    }
}
