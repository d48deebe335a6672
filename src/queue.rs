//! Michael-Scott lock-free queue.
//!
//! Michael and Scott. Simple, Fast, and Practical Non-Blocking and Blocking
//! Concurrent Queue Algorithms. PODC 1996.
//! <http://dl.acm.org/citation.cfm?id=248106>

use core::mem::MaybeUninit;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_epoch::{self as epoch, unprotected, Atomic, Owned, Shared};
use crossbeam_utils::{Backoff, CachePadded};

/// A Michael-Scott lock-free FIFO queue.
///
/// The representation is a singly-linked list with a sentinel node at the
/// front: `head` always points at the sentinel and the true front of the
/// queue is the node after it. `tail` may lag behind the last node; whichever
/// thread observes the lag moves it forward.
///
/// # Examples
///
/// ```
/// use caslink::Queue;
///
/// let q = Queue::new();
/// q.push(1);
/// q.push(2);
/// assert_eq!(q.pop(), Some(1));
/// assert_eq!(q.pop(), Some(2));
/// assert_eq!(q.pop(), None);
/// ```
#[derive(Debug)]
pub struct Queue<T> {
    head: CachePadded<Atomic<Node<T>>>,
    tail: CachePadded<Atomic<Node<T>>>,
}

#[derive(Debug)]
struct Node<T> {
    /// The slot in which a value is stored.
    ///
    /// The sentinel's slot is always empty. Any other node starts its life
    /// with a value from `push` and loses it to the `pop` that unlinks the
    /// node's predecessor, at which point the node becomes the new sentinel.
    data: MaybeUninit<T>,
    next: Atomic<Node<T>>,
}

// A popped `T` is handed to exactly one thread, so `T: Send` suffices.
unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send> Sync for Queue<T> {}

impl<T> Queue<T> {
    /// Creates a new, empty queue.
    pub fn new() -> Queue<T> {
        let queue = Queue {
            head: CachePadded::new(Atomic::null()),
            tail: CachePadded::new(Atomic::null()),
        };

        let sentinel = Owned::new(Node {
            data: MaybeUninit::uninit(),
            next: Atomic::null(),
        });

        // The queue is not shared yet, so both ends can be set to the
        // sentinel without synchronization.
        let sentinel = sentinel.into_shared(unsafe { unprotected() });
        queue.head.store(sentinel, Relaxed);
        queue.tail.store(sentinel, Relaxed);
        queue
    }

    /// Appends a value at the back of the queue.
    pub fn push(&self, value: T) {
        let guard = epoch::pin();
        let backoff = Backoff::new();

        let new = Owned::new(Node {
            data: MaybeUninit::new(value),
            next: Atomic::null(),
        })
        .into_shared(&guard);

        loop {
            let tail = self.tail.load(Acquire, &guard);
            let t = unsafe { tail.deref() };
            let next = t.next.load(Acquire, &guard);

            // `tail` lags behind an append that already finished; helping it
            // forward is not this call's own completion.
            if !next.is_null() {
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Release, Relaxed, &guard);
                continue;
            }

            if t.next
                .compare_exchange(Shared::null(), new, Release, Relaxed, &guard)
                .is_ok()
            {
                // Advancing `tail` is best-effort; a failure means another
                // thread already helped.
                let _ = self.tail.compare_exchange(tail, new, Release, Relaxed, &guard);
                return;
            }
            backoff.spin();
        }
    }

    /// Removes the value at the front of the queue.
    ///
    /// Returns `None` if the queue is observed to be empty.
    pub fn pop(&self) -> Option<T> {
        let guard = epoch::pin();
        let backoff = Backoff::new();

        loop {
            let head = self.head.load(Acquire, &guard);
            let h = unsafe { head.deref() };
            let next = h.next.load(Acquire, &guard);

            let n = match unsafe { next.as_ref() } {
                Some(n) => n,
                None => return None,
            };

            // The node about to be taken is also the one `tail` points at;
            // move `tail` off it before it is unlinked.
            let tail = self.tail.load(Relaxed, &guard);
            if tail == head {
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Release, Relaxed, &guard);
            }

            if self
                .head
                .compare_exchange(head, next, Release, Relaxed, &guard)
                .is_ok()
            {
                // `next` is now the sentinel; its slot is emptied here,
                // exactly once, while the old sentinel goes to the collector.
                unsafe {
                    let value = n.data.assume_init_read();
                    guard.defer_destroy(head);
                    return Some(value);
                }
            }
            backoff.spin();
        }
    }

    /// Returns `true` if the queue is observed to be empty.
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        let head = self.head.load(Acquire, &guard);
        let next = unsafe { head.deref() }.next.load(Acquire, &guard);
        next.is_null()
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        // Values that were never popped are dropped here, then the nodes and
        // finally the sentinel itself are freed.
        unsafe {
            let guard = unprotected();
            let sentinel = self.head.load(Relaxed, guard);
            let mut curr = sentinel.deref().next.load(Relaxed, guard);

            while !curr.is_null() {
                let node = *curr.into_owned().into_box();
                curr = node.next.load(Relaxed, guard);
                drop(node.data.assume_init());
            }
            drop(sentinel.into_owned());
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Queue::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn is_empty_dont_pop() {
        let q: Queue<i64> = Queue::new();
        assert!(q.is_empty());
        q.push(20);
        q.push(20);
        assert!(!q.is_empty());
        assert!(!q.is_empty());
        assert!(q.pop().is_some());
        assert!(!q.is_empty());
        assert!(q.pop().is_some());
        assert!(q.is_empty());
        assert!(q.pop().is_none());
    }
}
