use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

mod reference;
mod scoped;

/// Counts drops so tests can observe reclamation.
#[derive(Debug)]
pub(crate) struct Tracked(pub(crate) Arc<AtomicUsize>);

impl Drop for Tracked {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}
