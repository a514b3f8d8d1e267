//! Request/response correlation over an asynchronous channel.
//!
//! The caller registers a slot under a correlation id *before* the request
//! is written, then waits on the returned [`Pending`]. The inbound reader
//! resolves the slot when the matching response arrives. Dropping a
//! [`Pending`] (timeout, caller cancelled) removes its slot, so abandoned
//! requests never leak.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;

/// Why a correlated wait ended without a value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("no response within {0:?}")]
    TimedOut(Duration),

    #[error("request cancelled: {0}")]
    Cancelled(String),

    #[error("correlation id {0:?} is already pending")]
    Duplicate(String),
}

type Slot<T> = oneshot::Sender<Result<T, CorrelationError>>;

/// A map of outstanding requests keyed by correlation id.
#[derive(Debug)]
pub struct Correlator<T> {
    slots: Mutex<HashMap<String, Slot<T>>>,
}

impl<T> Default for Correlator<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> Correlator<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot<T>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a pending slot for `id`.
    pub fn register(self: &Arc<Self>, id: impl Into<String>) -> Result<Pending<T>, CorrelationError> {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        {
            let mut slots = self.lock();
            if slots.contains_key(&id) {
                return Err(CorrelationError::Duplicate(id));
            }
            slots.insert(id.clone(), tx);
        }
        Ok(Pending {
            id,
            rx,
            owner: Arc::clone(self),
        })
    }

    /// Deliver `value` to the slot for `id`. Returns `false` if nobody is
    /// waiting (late response, unknown id).
    pub fn resolve(&self, id: &str, value: T) -> bool {
        let slot = self.lock().remove(id);
        match slot {
            Some(tx) => tx.send(Ok(value)).is_ok(),
            None => false,
        }
    }

    /// Fail a single slot.
    pub fn fail(&self, id: &str, error: CorrelationError) -> bool {
        let slot = self.lock().remove(id);
        match slot {
            Some(tx) => tx.send(Err(error)).is_ok(),
            None => false,
        }
    }

    /// Fail every outstanding slot with [`CorrelationError::Cancelled`].
    /// Returns the number of slots cancelled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<Slot<T>> = self.lock().drain().map(|(_, tx)| tx).collect();
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Err(CorrelationError::Cancelled(reason.to_string())));
        }
        count
    }

    /// Number of outstanding slots.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a slot is registered under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    fn remove(&self, id: &str) {
        self.lock().remove(id);
    }
}

/// A registered, not-yet-resolved request.
#[derive(Debug)]
pub struct Pending<T> {
    id: String,
    rx: oneshot::Receiver<Result<T, CorrelationError>>,
    owner: Arc<Correlator<T>>,
}

impl<T> Pending<T> {
    /// The correlation id this slot is registered under.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the response, at most `timeout`.
    pub async fn wait(mut self, timeout: Duration) -> Result<T, CorrelationError> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CorrelationError::Cancelled("correlator dropped".to_string())),
            Err(_) => Err(CorrelationError::TimedOut(timeout)),
        }
    }
}

impl<T> Drop for Pending<T> {
    fn drop(&mut self) {
        self.owner.remove(&self.id);
    }
}
