//! Self-referential handle so the `sub_diagram` handler can recursively
//! drive `dipeo_core::scheduler::run` with the very [`HandlerRegistry`] it
//! is itself registered in, without a chicken-and-egg construction cycle:
//! the handle is created empty, threaded into every handler's constructor,
//! and filled in once after the full registry (including `sub_diagram`
//! itself) is built and wrapped in an `Arc`.

use std::sync::Arc;
use tokio::sync::OnceCell;

use dipeo_core::HandlerRegistry;

#[derive(Clone, Default)]
pub struct HandlerRegistryHandle(Arc<OnceCell<Arc<HandlerRegistry>>>);

impl HandlerRegistryHandle {
    pub fn new() -> Self {
        Self(Arc::new(OnceCell::new()))
    }

    /// Called once, after the registry this handle will resolve to has been
    /// fully populated. A second call is a programming error.
    pub fn set(&self, registry: Arc<HandlerRegistry>) {
        self.0.set(registry).ok();
    }

    /// Panics if called before `set` — every handler activation happens
    /// after registry construction completes, so this only fires on a
    /// wiring bug.
    pub fn get(&self) -> Arc<HandlerRegistry> {
        self.0.get().cloned().expect("HandlerRegistryHandle read before the registry was built")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_after_set() {
        let handle = HandlerRegistryHandle::new();
        handle.set(Arc::new(HandlerRegistry::new()));
        assert!(handle.get().kinds().next().is_none());
    }

    #[test]
    #[should_panic]
    fn panics_if_read_before_set() {
        let handle = HandlerRegistryHandle::new();
        let _ = handle.get();
    }
}
