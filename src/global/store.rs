use crate::alloc::Raw;
use crossbeam_queue::ArrayQueue;

/// The bounded lock-free store of idle objects shared by all threads. Pushes
/// and pops never block, each object comes out exactly once, and nothing is
/// promised about the order.
///
/// The store only moves pointers around. Destroying whatever is left in it
/// is the pool's job.
#[derive(Debug)]
pub(crate) struct Store<T> {
    queue: ArrayQueue<Raw<T>>,
}

impl<T> Store<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self { queue: ArrayQueue::new(capacity) }
    }

    /// park an object, or hand it back if the store is full
    pub(crate) fn try_push(&self, raw: Raw<T>) -> Result<(), Raw<T>> {
        self.queue.push(raw)
    }

    pub(crate) fn try_pop(&self) -> Option<Raw<T>> {
        self.queue.pop()
    }

    /// not a snapshot, only good for reporting and sizing batches
    pub(crate) fn approx_size(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{Global, alloc_object, free_object};
    use std::{
        collections::HashSet,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        thread,
    };

    #[test]
    fn rejects_when_full() {
        let store = Store::new(2);
        for i in 0..2u32 {
            assert!(store.try_push(alloc_object(&Global, i).unwrap()).is_ok());
        }
        let extra = store.try_push(alloc_object(&Global, 2u32).unwrap()).unwrap_err();
        unsafe { free_object(&Global, extra) };
        assert_eq!(store.approx_size(), 2);
        while let Some(raw) = store.try_pop() {
            unsafe { free_object(&Global, raw) };
        }
        assert!(store.try_pop().is_none());
    }

    #[test]
    fn concurrent_churn_stays_bounded_and_exact() {
        const CAP: usize = 8;
        const THREADS: usize = 8;
        const OBJECTS: usize = 4;
        let store = Arc::new(Store::<usize>::new(CAP));
        let overflows = Arc::new(AtomicUsize::new(0));
        let handles = (0..THREADS)
            .map(|t| {
                let store = Arc::clone(&store);
                let overflows = Arc::clone(&overflows);
                thread::spawn(move || {
                    let mut mine = (0..OBJECTS)
                        .map(|i| alloc_object(&Global, t * OBJECTS + i).unwrap())
                        .collect::<Vec<_>>();
                    for _ in 0..2000 {
                        while let Some(raw) = mine.pop() {
                            if let Err(raw) = store.try_push(raw) {
                                overflows.fetch_add(1, Ordering::Relaxed);
                                mine.push(raw);
                                break;
                            }
                            assert!(store.approx_size() <= CAP);
                        }
                        while mine.len() < OBJECTS {
                            match store.try_pop() {
                                Some(raw) => mine.push(raw),
                                None => break,
                            }
                        }
                    }
                    mine
                })
            })
            .collect::<Vec<_>>();
        let mut all = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect::<Vec<_>>();
        while let Some(raw) = store.try_pop() {
            all.push(raw);
        }
        // every object is still owned by exactly one party
        assert_eq!(all.len(), THREADS * OBJECTS);
        let values = all.iter().map(|r| unsafe { *r.as_ptr() }).collect::<HashSet<_>>();
        assert_eq!(values.len(), THREADS * OBJECTS);
        for raw in all {
            unsafe { free_object(&Global, raw) };
        }
    }
}
