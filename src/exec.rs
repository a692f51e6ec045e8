//! Task queue backing each member stream's worker thread.
//!
//! An unbounded MPSC blocking queue. Posting never blocks, which is what
//! makes it safe to fan out flush tasks to sibling streams while the group
//! mutex is held; the consumer side blocks until work arrives.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Unbounded blocking queue of tasks for a single worker.
pub(crate) struct TaskQueue<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> TaskQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    /// Enqueues a task. Never blocks.
    pub(crate) fn push(&self, task: T) {
        let mut items = self.items.lock().unwrap();
        items.push_back(task);
        self.available.notify_one();
    }

    /// Dequeues the next task, blocking until one is available.
    pub(crate) fn pop(&self) -> T {
        let mut items = self.items.lock().unwrap();
        loop {
            if let Some(task) = items.pop_front() {
                return task;
            }
            items = self.available.wait(items).unwrap();
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_order() {
        let q = TaskQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), 1);
        assert_eq!(q.pop(), 2);
        assert_eq!(q.pop(), 3);
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn pop_blocks_until_push() {
        let q = Arc::new(TaskQueue::new());
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop())
        };
        thread::sleep(std::time::Duration::from_millis(10));
        q.push(42u64);
        assert_eq!(consumer.join().unwrap(), 42);
    }

    #[test]
    fn many_producers_one_consumer() {
        let q = Arc::new(TaskQueue::new());
        let mut producers = Vec::new();
        for i in 0..4u64 {
            let q = Arc::clone(&q);
            producers.push(thread::spawn(move || {
                for j in 0..100u64 {
                    q.push(i * 100 + j);
                }
            }));
        }
        for p in producers {
            p.join().unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..400 {
            seen.push(q.pop());
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..400).collect::<Vec<_>>());
    }
}
