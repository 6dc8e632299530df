use std::sync::atomic::{AtomicBool, Ordering};

/// Started/stopping flags of a connector.
///
/// Channel creation consults them to tell real failures from the expected noise of a
/// connector being shut down.
#[derive(Debug, Default)]
pub struct Lifecycle {
    started: AtomicBool,
    stopping: AtomicBool,
}

impl Lifecycle {
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub(crate) fn mark_started(&self) {
        self.stopping.store(false, Ordering::Release);
        self.started.store(true, Ordering::Release);
    }

    pub(crate) fn mark_stopping(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    pub(crate) fn mark_stopped(&self) {
        self.started.store(false, Ordering::Release);
        self.stopping.store(false, Ordering::Release);
    }
}
