//! Deferred destruction of objects still referenced by frames in flight
//!
//! Every Vulkan wrapper destroys its native objects in `Drop`. Dropping one while the GPU may
//! still read it is a use-after-free, so owners hand it here instead: [`ReleaseQueue::retire`]
//! stamps it with the frame being recorded and [`ReleaseQueue::collect`] drops it once that
//! frame's fence has signaled.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use super::context::VulkanDevice;

/// Objects waiting for their last frame to complete
pub(crate) struct ReleaseQueue {
    device: Option<Rc<VulkanDevice>>,
    frame: Cell<u64>,
    pending: RefCell<VecDeque<(u64, Box<dyn Any>)>>,
}

impl ReleaseQueue {
    pub(crate) fn new(device: &Rc<VulkanDevice>) -> Rc<Self> {
        Rc::new(Self { device: Some(Rc::clone(device)), frame: Cell::new(0), pending: RefCell::new(VecDeque::new()) })
    }

    /// Device the queued objects belong to
    pub(crate) fn device(&self) -> Option<&Rc<VulkanDevice>> {
        self.device.as_ref()
    }

    /// Frame number new retirements are stamped with
    pub(crate) fn set_frame(&self, frame: u64) {
        self.frame.set(frame);
    }

    /// Destroy `object` once the current frame completed
    pub(crate) fn retire(&self, object: impl Any) {
        self.pending.borrow_mut().push_back((self.frame.get(), Box::new(object)));
    }

    /// Drop everything retired in frames up to and including `completed`
    pub(crate) fn collect(&self, completed: u64) -> usize {
        let released: Vec<Box<dyn Any>> = {
            let mut pending = self.pending.borrow_mut();
            let ready = pending.iter().take_while(|(frame, _)| *frame <= completed).count();
            pending.drain(..ready).map(|(_, object)| object).collect()
        };
        let count = released.len();
        drop(released);
        if count > 0 {
            log::trace!("Released {} objects of frames <= {}", count, completed);
        }
        count
    }

    /// Number of objects still waiting
    pub(crate) fn len(&self) -> usize {
        self.pending.borrow().len()
    }
}

impl Drop for ReleaseQueue {
    fn drop(&mut self) {
        if let Some(device) = &self.device {
            device.wait_idle();
        }
        let released: Vec<_> = self.pending.get_mut().drain(..).collect();
        drop(released);
    }
}

#[cfg(test)]
impl ReleaseQueue {
    fn detached() -> Self {
        Self { device: None, frame: Cell::new(0), pending: RefCell::new(VecDeque::new()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tracked(Rc<Cell<usize>>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_objects_outlive_their_frame() {
        let dropped = Rc::new(Cell::new(0));
        let queue = ReleaseQueue::detached();

        queue.set_frame(1);
        queue.retire(Tracked(Rc::clone(&dropped)));
        queue.set_frame(2);
        queue.retire(Tracked(Rc::clone(&dropped)));
        queue.retire(Tracked(Rc::clone(&dropped)));

        assert_eq!(queue.collect(0), 0);
        assert_eq!(dropped.get(), 0);
        assert_eq!(queue.collect(1), 1);
        assert_eq!(dropped.get(), 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.collect(5), 2);
        assert_eq!(dropped.get(), 3);
    }

    #[test]
    fn test_drop_releases_everything() {
        let dropped = Rc::new(Cell::new(0));
        {
            let queue = ReleaseQueue::detached();
            queue.set_frame(10);
            queue.retire(Tracked(Rc::clone(&dropped)));
        }
        assert_eq!(dropped.get(), 1);
    }
}
