//! Scoped native handles
//!
//! Backends wrap raw API handles (GL object names, Vulkan framebuffers, query ids)
//! in [`Scoped`] so the release call runs exactly once when the owner goes away.

use std::fmt;

/// Owns a native handle and destroys it on drop
pub struct Scoped<H> {
    handle: Option<H>,
    destroy: Option<Box<dyn FnOnce(H)>>,
}

impl<H> Scoped<H> {
    /// Wrap `handle`, releasing it with `destroy` when dropped
    pub fn new(handle: H, destroy: impl FnOnce(H) + 'static) -> Self {
        Self { handle: Some(handle), destroy: Some(Box::new(destroy)) }
    }

    /// Borrow the handle
    ///
    /// # Panics
    /// Never in practice: the handle is only taken by `into_inner` and `drop`, which consume `self`.
    #[must_use]
    pub fn get(&self) -> &H {
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("scoped handle accessed after release"),
        }
    }

    /// Give up ownership without running the destroy function
    #[must_use]
    pub fn into_inner(mut self) -> H {
        self.destroy = None;
        match self.handle.take() {
            Some(handle) => handle,
            None => unreachable!("scoped handle released twice"),
        }
    }
}

impl<H: Copy> Scoped<H> {
    /// Copy of the handle
    #[must_use]
    pub fn raw(&self) -> H {
        *self.get()
    }
}

impl<H> Drop for Scoped<H> {
    fn drop(&mut self) {
        if let (Some(handle), Some(destroy)) = (self.handle.take(), self.destroy.take()) {
            destroy(handle);
        }
    }
}

impl<H: fmt::Debug> fmt::Debug for Scoped<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Scoped").field(&self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_destroy_runs_once_on_drop() {
        let released = Rc::new(RefCell::new(Vec::new()));
        {
            let log = Rc::clone(&released);
            let handle = Scoped::new(7u32, move |h| log.borrow_mut().push(h));
            assert_eq!(handle.raw(), 7);
        }
        assert_eq!(*released.borrow(), vec![7]);
    }

    #[test]
    fn test_into_inner_skips_destroy() {
        let released = Rc::new(RefCell::new(0));
        let log = Rc::clone(&released);
        let handle = Scoped::new(3u32, move |_| *log.borrow_mut() += 1);
        assert_eq!(handle.into_inner(), 3);
        assert_eq!(*released.borrow(), 0);
    }
}
