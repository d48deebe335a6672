use core::mem::ManuallyDrop;
use core::ptr;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_epoch::{self as epoch, Atomic, Owned};
use crossbeam_utils::Backoff;

/// Treiber's lock-free stack.
///
/// An unbounded LIFO stack over a singly-linked list, usable with any number
/// of producers and consumers.
///
/// # Examples
///
/// ```
/// use caslink::Stack;
///
/// let s = Stack::new();
/// s.push(1);
/// s.push(2);
/// assert_eq!(s.pop(), Some(2));
/// assert_eq!(s.pop(), Some(1));
/// assert_eq!(s.pop(), None);
/// ```
#[derive(Debug)]
pub struct Stack<T> {
    head: Atomic<Node<T>>,
}

#[derive(Debug)]
struct Node<T> {
    data: ManuallyDrop<T>,
    next: Atomic<Node<T>>,
}

// A popped `T` is handed to exactly one thread, so `T: Send` suffices.
unsafe impl<T: Send> Send for Stack<T> {}
unsafe impl<T: Send> Sync for Stack<T> {}

impl<T> Stack<T> {
    /// Creates a new, empty stack.
    pub fn new() -> Stack<T> {
        Stack {
            head: Atomic::null(),
        }
    }

    /// Pushes a value on top of the stack.
    pub fn push(&self, value: T) {
        let mut node = Owned::new(Node {
            data: ManuallyDrop::new(value),
            next: Atomic::null(),
        });

        let guard = epoch::pin();
        let backoff = Backoff::new();

        loop {
            let head = self.head.load(Relaxed, &guard);
            node.next.store(head, Relaxed);

            match self.head.compare_exchange(head, node, Release, Relaxed, &guard) {
                Ok(_) => return,
                Err(e) => {
                    node = e.new;
                    backoff.spin();
                }
            }
        }
    }

    /// Attempts to pop the top value off the stack.
    ///
    /// Returns `None` if the stack is observed to be empty.
    pub fn pop(&self) -> Option<T> {
        let guard = epoch::pin();
        let backoff = Backoff::new();

        loop {
            let head = self.head.load(Acquire, &guard);

            match unsafe { head.as_ref() } {
                Some(h) => {
                    let next = h.next.load(Relaxed, &guard);

                    if self
                        .head
                        .compare_exchange(head, next, Release, Relaxed, &guard)
                        .is_ok()
                    {
                        unsafe {
                            guard.defer_destroy(head);
                            return Some(ManuallyDrop::into_inner(ptr::read(&h.data)));
                        }
                    }
                    backoff.spin();
                }
                None => return None,
            }
        }
    }

    /// Returns a copy of the value on top of the stack without removing it.
    ///
    /// Returns `None` if the stack is observed to be empty.
    ///
    /// The pinned guard keeps the top node alive for the duration of the
    /// clone even if a concurrent `pop` unlinks it, so a single load is
    /// enough; no revalidation loop is needed.
    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        let guard = epoch::pin();
        let head = self.head.load(Acquire, &guard);
        unsafe { head.as_ref() }.map(|h| T::clone(&h.data))
    }

    /// Returns `true` if the stack is observed to be empty.
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        self.head.load(Acquire, &guard).is_null()
    }
}

impl<T> Drop for Stack<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Stack::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn is_empty() {
        let s: Stack<i64> = Stack::new();
        assert!(s.is_empty());
        s.push(20);
        s.push(20);
        assert!(!s.is_empty());
        assert!(!s.is_empty());
        assert!(s.pop().is_some());
        assert!(s.pop().is_some());
        assert!(s.is_empty());
        s.push(25);
        assert!(!s.is_empty());
    }

    #[test]
    fn peek_leaves_top_in_place() {
        let s: Stack<i64> = Stack::new();
        assert_eq!(s.peek(), None);
        s.push(7);
        s.push(8);
        assert_eq!(s.peek(), Some(8));
        assert_eq!(s.peek(), Some(8));
        assert_eq!(s.pop(), Some(8));
        assert_eq!(s.peek(), Some(7));
    }
}
