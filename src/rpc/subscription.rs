//! Subscription handles

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use super::router::Router;

/// Handle for one registered listener.
///
/// `end()` deregisters the listener and releases the broker subscription if
/// it was the last listener on the filter. Ending is idempotent, and
/// dropping the handle ends it.
pub struct Subscription {
    filter: String,
    id: u64,
    router: Weak<Router>,
    ended: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(filter: String, id: u64, router: Weak<Router>) -> Self {
        Self {
            filter,
            id,
            router,
            ended: AtomicBool::new(false),
        }
    }

    /// Topic filter this subscription listens on
    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    /// Deregister the listener
    pub fn end(&self) {
        if self.ended.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(router) = self.router.upgrade() {
            router.remove(&self.filter, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.end();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .field("id", &self.id)
            .field("ended", &self.is_ended())
            .finish()
    }
}
