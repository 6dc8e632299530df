//! A generic pool keeping a bounded stack of idle objects.
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use super::Error;

/// Creates, validates and destroys the objects of a [`Pool`].
#[async_trait::async_trait]
pub trait Manager: Send + Sync + 'static {
    type Type: Send + Sync + 'static;

    /// Build a brand new object.
    async fn create(&self) -> Result<Self::Type, anyhow::Error>;

    /// `true` if `obj` can still be handed out.
    async fn validate(&self, obj: &Self::Type) -> bool;

    /// Release whatever `obj` holds. Must not fail: problems are logged by the implementation.
    async fn destroy(&self, obj: Self::Type);
}

/// A pool that caches at most `max_idle` objects and never limits how many are borrowed.
///
/// Idle objects are reused last-in first-out. Callers borrowing while the stack is empty get a
/// freshly created object; returning it once the stack is full destroys it.
pub struct Pool<M: Manager> {
    manager: M,
    max_idle: usize,
    idle: Mutex<Vec<M::Type>>,
    closed: AtomicBool,
}

impl<M: Manager> Pool<M> {
    pub fn new(manager: M, max_idle: usize) -> Self {
        Self {
            manager,
            max_idle,
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn manager(&self) -> &M {
        &self.manager
    }

    /// Number of objects currently waiting to be borrowed.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Take a valid object out of the pool, creating one if no idle object passes validation.
    pub async fn borrow(&self) -> Result<M::Type, Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        loop {
            let candidate = self.idle.lock().pop();
            let Some(obj) = candidate else { break };
            if self.manager.validate(&obj).await {
                return Ok(obj);
            }
            debug!("Destroying idle object that failed validation");
            self.manager.destroy(obj).await;
        }

        let obj = self.manager.create().await.map_err(Error::Backend)?;
        if self.manager.validate(&obj).await {
            Ok(obj)
        } else {
            self.manager.destroy(obj).await;
            Err(Error::Validation)
        }
    }

    /// Hand a borrowed object back.
    ///
    /// Objects failing validation, or exceeding the idle capacity, are destroyed.
    pub async fn return_(&self, obj: M::Type) {
        if self.is_closed() || !self.manager.validate(&obj).await {
            self.manager.destroy(obj).await;
            return;
        }

        let rejected = {
            let mut idle = self.idle.lock();
            if idle.len() < self.max_idle {
                idle.push(obj);
                None
            } else {
                Some(obj)
            }
        };
        if let Some(obj) = rejected {
            debug!("Idle capacity reached, destroying returned object");
            self.manager.destroy(obj).await;
        }
    }

    /// Take a borrowed object out of circulation for good.
    pub async fn invalidate(&self, obj: M::Type) {
        self.manager.destroy(obj).await;
    }

    /// Destroy every idle object.
    pub async fn clear(&self) {
        let idle = std::mem::take(&mut *self.idle.lock());
        for obj in idle {
            self.manager.destroy(obj).await;
        }
    }

    /// Clear the pool and destroy anything returned to it from now on.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.clear().await;
    }
}
