//! Ownership slot for the displayed model's GPU resources.

/// Resources that must be released explicitly.
pub trait Disposable {
    fn dispose(&mut self);
}

/// Holds at most one displayed item. Replacing, clearing or dropping the
/// stage disposes the outgoing item exactly once.
pub struct Stage<M: Disposable> {
    current: Option<M>,
}

impl<M: Disposable> Default for Stage<M> {
    fn default() -> Self {
        Self { current: None }
    }
}

impl<M: Disposable> Stage<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show `item`, disposing whatever was shown before.
    pub fn attach(&mut self, item: M) {
        if let Some(mut previous) = self.current.replace(item) {
            previous.dispose();
        }
    }

    pub fn current(&self) -> Option<&M> {
        self.current.as_ref()
    }

    pub fn current_mut(&mut self) -> Option<&mut M> {
        self.current.as_mut()
    }

    pub fn clear(&mut self) {
        if let Some(mut previous) = self.current.take() {
            previous.dispose();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }
}

impl<M: Disposable> Drop for Stage<M> {
    fn drop(&mut self) {
        self.clear();
    }
}
