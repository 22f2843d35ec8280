//! Engine event and async-error callbacks
//!
//! Callbacks are injected per index through [`Callbacks`] rather than a
//! process-wide registry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CuttleError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Close has been requested
    CloseStart,
    /// Background loops have exited
    Closed,
    /// A batch is about to be handed to the introducer
    BatchIntroductionStart,
    /// A batch finished, successfully or not
    BatchIntroduction,
    /// The persister committed an epoch
    PersisterProgress,
    /// The merger finished a planning pass
    MergerProgress,
    /// A merge result was introduced into the root
    MergeIntroduction,
    /// A rollback installed an older snapshot
    Reverted,
}

#[derive(Clone, Debug)]
pub struct Event {
    pub kind: EventKind,
    pub duration: Duration,
}

pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;
pub type AsyncErrorCallback = Arc<dyn Fn(&CuttleError) + Send + Sync>;

/// Hooks an embedding application can install on an index
#[derive(Clone, Default)]
pub struct Callbacks {
    event: Option<EventCallback>,
    async_error: Option<AsyncErrorCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_callback(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event = Some(Arc::new(f));
        self
    }

    /// Called for errors raised by background work after open, e.g. a
    /// failed catalog commit
    pub fn with_async_error_callback(
        mut self,
        f: impl Fn(&CuttleError) + Send + Sync + 'static,
    ) -> Self {
        self.async_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn fire(&self, kind: EventKind, duration: Duration) {
        if let Some(cb) = &self.event {
            cb(&Event { kind, duration });
        }
    }

    pub(crate) fn async_error(&self, err: &CuttleError) {
        if let Some(cb) = &self.async_error {
            cb(err);
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("event", &self.event.is_some())
            .field("async_error", &self.async_error.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_callbacks_fire() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        let callbacks = {
            let seen = seen.clone();
            let errors = errors.clone();
            Callbacks::new()
                .with_event_callback(move |e| seen.lock().push(e.kind))
                .with_async_error_callback(move |e| errors.lock().push(e.to_string()))
        };

        callbacks.fire(EventKind::PersisterProgress, Duration::ZERO);
        callbacks.async_error(&CuttleError::Catalog("disk full".into()));

        assert_eq!(*seen.lock(), vec![EventKind::PersisterProgress]);
        assert_eq!(errors.lock().len(), 1);

        // no hooks installed is fine
        Callbacks::default().fire(EventKind::Closed, Duration::ZERO);
    }
}
