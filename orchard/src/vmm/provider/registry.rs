//! Explicitly owned handle map.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Backend handles keyed by VM name.
///
/// Created by whoever builds the provider and passed in by `Arc`.
#[derive(Debug)]
pub struct HandleRegistry<H> {
    handles: Mutex<HashMap<String, H>>,
}

impl<H> Default for HandleRegistry<H> {
    fn default() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
        }
    }
}

impl<H> HandleRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a handle, returning the one it replaced.
    pub fn insert(&self, name: &str, handle: H) -> Option<H> {
        self.handles.lock().insert(name.to_string(), handle)
    }

    pub fn take(&self, name: &str) -> Option<H> {
        self.handles.lock().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.lock().contains_key(name)
    }

    /// Run `f` against the handle, if present, while holding the registry lock.
    pub fn with<R>(&self, name: &str, f: impl FnOnce(&mut H) -> R) -> Option<R> {
        self.handles.lock().get_mut(name).map(f)
    }
}
