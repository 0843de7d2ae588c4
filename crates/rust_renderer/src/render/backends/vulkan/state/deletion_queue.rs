//! Deferred destruction tied to a frame slot
//!
//! A resource whose last GPU use was recorded into a frame cannot be destroyed
//! until that frame's fence is waited. It is retired into the slot's queue
//! instead and destroyed on the slot's next wait, newest first.

use crate::render::backends::vulkan::resources::resource::{GpuResource, Owned};
use std::fmt;

type Deleter = Box<dyn FnOnce()>;

/// LIFO list of pending destructions
#[derive(Default)]
pub struct DeletionQueue {
    deleters: Vec<Deleter>,
}

impl DeletionQueue {
    /// Empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an arbitrary destruction routine
    pub fn push(&mut self, deleter: impl FnOnce() + 'static) {
        self.deleters.push(Box::new(deleter));
    }

    /// Queue an owned resource for destruction
    pub fn retire<R: GpuResource + 'static>(&mut self, mut resource: Owned<R>) {
        if resource.is_empty() {
            return;
        }
        self.push(move || resource.destroy());
    }

    /// Run every queued routine, most recent first
    pub fn flush(&mut self) {
        let count = self.deleters.len();
        while let Some(deleter) = self.deleters.pop() {
            deleter();
        }
        if count > 0 {
            log::trace!("Deletion queue flushed {} entries", count);
        }
    }

    /// Number of routines waiting for the next flush
    pub fn len(&self) -> usize {
        self.deleters.len()
    }

    /// True when a flush would do nothing
    pub fn is_empty(&self) -> bool {
        self.deleters.is_empty()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        self.flush();
    }
}

impl fmt::Debug for DeletionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletionQueue")
            .field("pending", &self.deleters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    struct Tracked {
        id: u32,
        log: Rc<RefCell<Vec<u32>>>,
    }

    impl GpuResource for Tracked {
        fn release(self) {
            self.log.borrow_mut().push(self.id);
        }
    }

    #[test]
    fn test_flush_runs_newest_first() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = DeletionQueue::new();
        for id in 1..=3 {
            queue.retire(Owned::new(Tracked { id, log: Rc::clone(&log) }));
        }
        assert_eq!(queue.len(), 3);
        assert!(log.borrow().is_empty());

        queue.flush();
        assert_eq!(*log.borrow(), vec![3, 2, 1]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_each_entry_runs_once() {
        let count = Rc::new(Cell::new(0));
        let mut queue = DeletionQueue::new();
        let counter = Rc::clone(&count);
        queue.push(move || counter.set(counter.get() + 1));

        queue.flush();
        queue.flush();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_empty_handles_are_not_queued() {
        let mut queue = DeletionQueue::new();
        queue.retire(Owned::<Tracked>::empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drop_flushes() {
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let mut queue = DeletionQueue::new();
            queue.retire(Owned::new(Tracked { id: 7, log: Rc::clone(&log) }));
        }
        assert_eq!(*log.borrow(), vec![7]);
    }
}
