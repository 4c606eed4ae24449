//! Asynchronous events.
//!
//! An event is a named fan-out point: firing it releases every attached
//! handler once. Handlers may be attached to any number of events.

use core::fmt;
use std::sync::Arc;

use log::{trace, warn};
use parking_lot::Mutex;

use crate::error::ScheduleResult;
use crate::handler::AsyncEventHandler;

#[derive(Default)]
struct EventInner {
    name: String,
    handlers: Mutex<Vec<AsyncEventHandler>>,
}

/// Handle to an asynchronous event. Clones share the handler list.
#[derive(Clone, Default)]
pub struct AsyncEvent {
    inner: Arc<EventInner>,
}

impl AsyncEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventInner {
                name: name.into(),
                handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Attaches `handler`. Attaching a handler twice has no effect.
    pub fn add_handler(&self, handler: &AsyncEventHandler) {
        let mut handlers = self.inner.handlers.lock();
        if !handlers.contains(handler) {
            handlers.push(handler.clone());
        }
    }

    /// Detaches `handler`, returning whether it was attached.
    pub fn remove_handler(&self, handler: &AsyncEventHandler) -> bool {
        let mut handlers = self.inner.handlers.lock();
        let before = handlers.len();
        handlers.retain(|attached| attached != handler);
        handlers.len() != before
    }

    /// Replaces every attached handler with `handler`, or detaches all.
    pub fn set_handler(&self, handler: Option<&AsyncEventHandler>) {
        let mut handlers = self.inner.handlers.lock();
        handlers.clear();
        handlers.extend(handler.cloned());
    }

    pub fn handled_by(&self, handler: &AsyncEventHandler) -> bool {
        self.inner.handlers.lock().contains(handler)
    }

    pub fn handler_count(&self) -> usize {
        self.inner.handlers.lock().len()
    }

    /// Releases every attached handler once.
    ///
    /// All handlers are released even if some refuse; the first refusal is
    /// returned.
    pub fn fire(&self) -> ScheduleResult<()> {
        let handlers = self.inner.handlers.lock().clone();
        trace!("{} fired, {} handlers", self.name(), handlers.len());
        let mut first_error = None;
        for handler in &handlers {
            if let Err(err) = handler.release() {
                warn!("{}: {} not released: {err}", self.name(), handler.id());
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for AsyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncEvent")
            .field("name", &self.name())
            .field("handlers", &self.handler_count())
            .finish()
    }
}
