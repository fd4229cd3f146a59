//! Bounded blocking message queue with end-of-stream signaling.
//!
//! Strict FIFO. `put` blocks while the queue is at capacity and fails
//! once the queue has been ended; `get` blocks until a message arrives
//! or the end flag is set. A single put wakes one getter; ending the
//! queue wakes everyone and is sticky until [`MsgQueue::reset`].

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

use crate::Timeout;

struct Inner<T> {
    queue: VecDeque<T>,
    end_of_msg: bool,
    modified_generation: u64,
}

pub struct MsgQueue<T> {
    /// 0 means unbounded.
    max_messages: usize,
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    modified: Condvar,
}

impl<T> MsgQueue<T> {
    pub fn new(max_messages: usize) -> Self {
        MsgQueue {
            max_messages,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                end_of_msg: false,
                modified_generation: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            modified: Condvar::new(),
        }
    }

    /// Append a message, blocking while the queue is full. Returns
    /// false, dropping nothing into the queue, once the queue is ended.
    pub fn put(&self, msg: T) -> bool {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.end_of_msg {
                return false;
            }
            if self.max_messages == 0 || inner.queue.len() < self.max_messages {
                inner.queue.push_back(msg);
                self.touch(&mut inner);
                self.not_empty.notify_one();
                return true;
            }
            inner = self.not_full.wait(inner).unwrap();
        }
    }

    /// Take the oldest message, blocking up to `timeout`. `None` means
    /// the queue is ended and drained, or the timeout expired.
    pub fn get(&self, timeout: Timeout) -> Option<T> {
        let deadline = timeout.deadline();
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(msg) = inner.queue.pop_front() {
                self.touch(&mut inner);
                self.not_full.notify_one();
                return Some(msg);
            }
            if inner.end_of_msg {
                return None;
            }
            match deadline {
                None => inner = self.not_empty.wait(inner).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    let (guard, _) = self
                        .not_empty
                        .wait_timeout(inner, deadline - now)
                        .unwrap();
                    inner = guard;
                }
            }
        }
    }

    /// Drop every queued message.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.clear();
        self.touch(&mut inner);
        self.not_full.notify_all();
    }

    /// End the queue: pending and future `put`s fail, `get` drains the
    /// remainder and then reports end. Wakes all waiters.
    pub fn set_end_of_msg(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.end_of_msg = true;
        self.touch(&mut inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Clear the queue and re-arm it for use after an end.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.clear();
        inner.end_of_msg = false;
        self.touch(&mut inner);
        self.not_full.notify_all();
    }

    /// Block until the queue is modified in any way (put, get, clear,
    /// end). Returns false on timeout.
    pub fn wait_modified(&self, timeout: Timeout) -> bool {
        let deadline = timeout.deadline();
        let mut inner = self.inner.lock().unwrap();
        if inner.end_of_msg {
            return true;
        }
        let generation = inner.modified_generation;
        while inner.modified_generation == generation && !inner.end_of_msg {
            match deadline {
                None => inner = self.modified.wait(inner).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    let (guard, _) = self.modified.wait_timeout(inner, deadline - now).unwrap();
                    inner = guard;
                }
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_end(&self) -> bool {
        self.inner.lock().unwrap().end_of_msg
    }

    fn touch(&self, inner: &mut MutexGuard<'_, Inner<T>>) {
        inner.modified_generation += 1;
        self.modified.notify_all();
    }
}

impl<T> std::fmt::Debug for MsgQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("MsgQueue")
            .field("len", &inner.queue.len())
            .field("max_messages", &self.max_messages)
            .field("end_of_msg", &inner.end_of_msg)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fifo_ordering() {
        let queue = MsgQueue::new(0);
        for i in 0..10 {
            assert!(queue.put(i));
        }
        for i in 0..10 {
            assert_eq!(queue.get(Timeout::Forever), Some(i));
        }
    }

    #[test]
    fn get_times_out_when_empty() {
        let queue: MsgQueue<u32> = MsgQueue::new(0);
        assert_eq!(queue.get(Timeout::millis(50)), None);
    }

    #[test]
    fn bounded_put_blocks_until_get() {
        let queue = Arc::new(MsgQueue::new(1));
        assert!(queue.put(1u32));

        std::thread::scope(|scope| {
            let producer = {
                let queue = Arc::clone(&queue);
                scope.spawn(move || queue.put(2))
            };
            std::thread::sleep(Duration::from_millis(50));
            assert_eq!(queue.len(), 1);
            assert_eq!(queue.get(Timeout::Forever), Some(1));
            assert!(producer.join().unwrap());
        });
        assert_eq!(queue.get(Timeout::Forever), Some(2));
    }

    #[test]
    fn end_fails_put_and_drains_get() {
        let queue = MsgQueue::new(0);
        assert!(queue.put(1u32));
        queue.set_end_of_msg();
        assert!(!queue.put(2));
        assert_eq!(queue.get(Timeout::Forever), Some(1));
        assert_eq!(queue.get(Timeout::Forever), None);
    }

    #[test]
    fn end_wakes_blocked_getters() {
        let queue: Arc<MsgQueue<u32>> = Arc::new(MsgQueue::new(0));
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..3)
                .map(|_| {
                    let queue = Arc::clone(&queue);
                    scope.spawn(move || queue.get(Timeout::Forever))
                })
                .collect();
            std::thread::sleep(Duration::from_millis(50));
            queue.set_end_of_msg();
            for handle in handles {
                assert_eq!(handle.join().unwrap(), None);
            }
        });
    }

    #[test]
    fn reset_rearms_after_end() {
        let queue = MsgQueue::new(0);
        assert!(queue.put(1u32));
        queue.set_end_of_msg();
        queue.reset();
        assert!(queue.is_empty());
        assert!(!queue.is_end());
        assert!(queue.put(2));
        assert_eq!(queue.get(Timeout::Forever), Some(2));
    }

    #[test]
    fn clear_drops_messages() {
        let queue = MsgQueue::new(0);
        for i in 0..5u32 {
            assert!(queue.put(i));
        }
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.put(9));
    }

    #[test]
    fn wait_modified_sees_put() {
        let queue: Arc<MsgQueue<u32>> = Arc::new(MsgQueue::new(0));
        std::thread::scope(|scope| {
            let waiter = {
                let queue = Arc::clone(&queue);
                scope.spawn(move || queue.wait_modified(Timeout::After(Duration::from_secs(10))))
            };
            std::thread::sleep(Duration::from_millis(50));
            assert!(queue.put(1));
            assert!(waiter.join().unwrap());
        });
    }
}
