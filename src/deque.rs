//! A lock-free double-ended queue over a doubly-linked list.
//!
//! Every mutation is a CAS on one of the two anchors (`front`, `back`) or on
//! a node's link fields. An operation that observes a half-finished mutation
//! (a lagging anchor, an unpublished first node, an anchor naming a removed
//! node) repairs it itself before proceeding, so overall progress never
//! depends on any one thread being scheduled again.

use core::mem::ManuallyDrop;
use core::ptr;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use crossbeam_utils::{Backoff, CachePadded};

/// Tag bit set on a link of a node that has been removed.
///
/// A front-side pop commits by tagging the victim's `next` link while
/// keeping the pointer value; a back-side pop of the adjacent node must CAS
/// that same word, so the two sides can never both claim a pair. The open
/// (null) links of a removed node are tagged as well: a push attaches by
/// CAS-ing an open untagged link of an end node, so the tag makes a late
/// attach to a dead node fail and retry against the repaired anchors. An
/// anchor that names a removed node retreats through the pointer preserved
/// under the tag.
const DEAD: usize = 1;

/// A lock-free double-ended queue.
///
/// Supports push and pop at both ends from any number of threads. The deque
/// is a doubly-linked list; `back` is the authority for whether the deque is
/// empty, while `front` mirrors the other end and may briefly lag behind a
/// push or pop until the mutating thread or a helper catches it up.
///
/// # Examples
///
/// ```
/// use caslink::Deque;
///
/// let d = Deque::new();
/// d.push_back(1);
/// d.push_back(2);
/// d.push_front(0);
/// assert_eq!(d.pop_front(), Some(0));
/// assert_eq!(d.pop_back(), Some(2));
/// assert_eq!(d.pop_front(), Some(1));
/// assert_eq!(d.pop_front(), None);
/// ```
#[derive(Debug)]
pub struct Deque<T> {
    front: CachePadded<Atomic<Node<T>>>,
    back: CachePadded<Atomic<Node<T>>>,
}

#[derive(Debug)]
struct Node<T> {
    data: ManuallyDrop<T>,
    prev: Atomic<Node<T>>,
    next: Atomic<Node<T>>,
}

// A popped `T` is handed to exactly one thread, so `T: Send` suffices.
unsafe impl<T: Send> Send for Deque<T> {}
unsafe impl<T: Send> Sync for Deque<T> {}

impl<T> Deque<T> {
    /// Creates a new, empty deque.
    pub fn new() -> Deque<T> {
        Deque {
            front: CachePadded::new(Atomic::null()),
            back: CachePadded::new(Atomic::null()),
        }
    }

    /// Appends a value at the back of the deque.
    pub fn push_back(&self, value: T) {
        let guard = epoch::pin();
        let backoff = Backoff::new();

        let new = Owned::new(Node {
            data: ManuallyDrop::new(value),
            prev: Atomic::null(),
            next: Atomic::null(),
        })
        .into_shared(&guard);

        loop {
            let back = self.back.load(Acquire, &guard);
            let b = match unsafe { back.as_ref() } {
                Some(b) => b,
                None => {
                    if self.try_push_empty(new, &guard) {
                        return;
                    }
                    backoff.spin();
                    continue;
                }
            };

            let next = b.next.load(Acquire, &guard);
            if next.tag() == DEAD {
                // `back` names a node a pop already removed. A back-side
                // removal leaves the predecessor in `prev`; a front-side
                // removal preserves the successor under the mark itself.
                let target = if next.is_null() {
                    b.prev.load(Acquire, &guard).with_tag(0)
                } else {
                    next.with_tag(0)
                };
                let _ = self
                    .back
                    .compare_exchange(back, target, Release, Relaxed, &guard);
                backoff.spin();
                continue;
            }
            if !next.is_null() {
                // An append finished but `back` was not advanced yet.
                // Helping it forward is not this call's own completion.
                let _ = self.back.compare_exchange(back, next, Release, Relaxed, &guard);
                continue;
            }

            // The new node must name its predecessor before it becomes
            // reachable.
            unsafe { new.deref() }.prev.store(back, Relaxed);

            if back != self.back.load(Acquire, &guard) {
                backoff.spin();
                continue;
            }
            if b.next
                .compare_exchange(Shared::null(), new, Release, Relaxed, &guard)
                .is_ok()
            {
                let _ = self.back.compare_exchange(back, new, Release, Relaxed, &guard);
                return;
            }
            backoff.spin();
        }
    }

    /// Prepends a value at the front of the deque.
    pub fn push_front(&self, value: T) {
        let guard = epoch::pin();
        let backoff = Backoff::new();

        let new = Owned::new(Node {
            data: ManuallyDrop::new(value),
            prev: Atomic::null(),
            next: Atomic::null(),
        })
        .into_shared(&guard);

        loop {
            let front = self.front.load(Acquire, &guard);
            let f = match unsafe { front.as_ref() } {
                Some(f) => f,
                None => {
                    let back = self.back.load(Acquire, &guard);
                    let b = match unsafe { back.as_ref() } {
                        Some(b) => b,
                        None => {
                            if self.try_push_empty(new, &guard) {
                                return;
                            }
                            backoff.spin();
                            continue;
                        }
                    };

                    // Non-empty, but the first node is not published yet.
                    let bnext = b.next.load(Acquire, &guard);
                    if bnext.tag() == DEAD {
                        let target = if bnext.is_null() {
                            b.prev.load(Acquire, &guard).with_tag(0)
                        } else {
                            bnext.with_tag(0)
                        };
                        let _ = self
                            .back
                            .compare_exchange(back, target, Release, Relaxed, &guard);
                    } else {
                        let first = Self::first_from_back(back, &guard);
                        let _ = self.front.compare_exchange(
                            Shared::null(),
                            first,
                            Release,
                            Relaxed,
                            &guard,
                        );
                    }
                    backoff.spin();
                    continue;
                }
            };

            let prev = f.prev.load(Acquire, &guard);
            if prev.tag() == DEAD {
                // `front` names a node a pop already removed; retreat to the
                // successor recorded in it.
                let fnext = f.next.load(Acquire, &guard);
                let _ = self
                    .front
                    .compare_exchange(front, fnext.with_tag(0), Release, Relaxed, &guard);
                backoff.spin();
                continue;
            }
            if !prev.is_null() {
                // A prepend finished but `front` was not advanced yet; help.
                let _ = self.front.compare_exchange(front, prev, Release, Relaxed, &guard);
                continue;
            }

            // The new node must name its successor before it becomes
            // reachable.
            unsafe { new.deref() }.next.store(front, Relaxed);

            if front != self.front.load(Acquire, &guard) {
                backoff.spin();
                continue;
            }
            if f.prev
                .compare_exchange(Shared::null(), new, Release, Relaxed, &guard)
                .is_ok()
            {
                let _ = self.front.compare_exchange(front, new, Release, Relaxed, &guard);
                return;
            }
            backoff.spin();
        }
    }

    /// Removes the value at the back of the deque.
    ///
    /// Returns `None` if the deque is observed to be empty.
    pub fn pop_back(&self) -> Option<T> {
        let guard = epoch::pin();
        let backoff = Backoff::new();

        loop {
            let back = self.back.load(Acquire, &guard);
            let b = match unsafe { back.as_ref() } {
                Some(b) => b,
                None => return None,
            };

            let next = b.next.load(Acquire, &guard);
            if next.tag() == DEAD {
                let target = if next.is_null() {
                    b.prev.load(Acquire, &guard).with_tag(0)
                } else {
                    next.with_tag(0)
                };
                let _ = self
                    .back
                    .compare_exchange(back, target, Release, Relaxed, &guard);
                backoff.spin();
                continue;
            }
            if !next.is_null() {
                let _ = self.back.compare_exchange(back, next, Release, Relaxed, &guard);
                continue;
            }

            let prev = b.prev.load(Acquire, &guard);
            if prev.tag() == DEAD {
                backoff.spin();
                continue;
            }

            match unsafe { prev.as_ref() } {
                None => {
                    // Sole node. The empty transition is arbitrated through
                    // `back`, but the node must be published at `front`
                    // first so the clear below has a definite expected
                    // value.
                    let front = self.front.load(Acquire, &guard);
                    if front != back {
                        let _ = self.front.compare_exchange(front, back, Release, Relaxed, &guard);
                        continue;
                    }
                    if self
                        .back
                        .compare_exchange(back, Shared::null(), Release, Relaxed, &guard)
                        .is_ok()
                    {
                        let _ = self.front.compare_exchange(
                            back,
                            Shared::null(),
                            Release,
                            Relaxed,
                            &guard,
                        );
                        self.retire_sole(back, &guard);
                        unsafe {
                            let value = ManuallyDrop::into_inner(ptr::read(&b.data));
                            guard.defer_destroy(back);
                            return Some(value);
                        }
                    }
                }
                Some(p) => {
                    // Detach: the predecessor becomes the last node. This is
                    // the same word a front-side pop of the predecessor
                    // commits on, so the two sides cannot both claim the
                    // pair.
                    if p.next
                        .compare_exchange(back, Shared::null(), Release, Relaxed, &guard)
                        .is_ok()
                    {
                        let _ = self.back.compare_exchange(back, prev, Release, Relaxed, &guard);
                        // With one node plus a pending prepend, `front`
                        // still names the node being removed.
                        let _ = self.front.compare_exchange(back, prev, Release, Relaxed, &guard);

                        // Late appends must not attach behind the removed
                        // node; splice any chain that already did onto the
                        // new last node.
                        if let Err(e) = b.next.compare_exchange(
                            Shared::null(),
                            Shared::null().with_tag(DEAD),
                            Release,
                            Relaxed,
                            &guard,
                        ) {
                            let stray = e.current;
                            if let Some(s) = unsafe { stray.as_ref() } {
                                let _ =
                                    s.prev.compare_exchange(back, prev, Release, Relaxed, &guard);
                            }
                            let _ = p.next.compare_exchange(
                                Shared::null(),
                                stray.with_tag(0),
                                Release,
                                Relaxed,
                                &guard,
                            );
                            let _ = self.back.compare_exchange(
                                prev,
                                stray.with_tag(0),
                                Release,
                                Relaxed,
                                &guard,
                            );
                        }
                        unsafe {
                            let value = ManuallyDrop::into_inner(ptr::read(&b.data));
                            guard.defer_destroy(back);
                            return Some(value);
                        }
                    } else {
                        // The predecessor may itself have just been removed
                        // from the front side; unhook it so the next attempt
                        // sees the true predecessor.
                        let pnext = p.next.load(Acquire, &guard);
                        if pnext.tag() == DEAD {
                            let pprev = p.prev.load(Acquire, &guard);
                            let _ = b.prev.compare_exchange(
                                prev,
                                pprev.with_tag(0),
                                Release,
                                Relaxed,
                                &guard,
                            );
                        }
                    }
                }
            }
            backoff.spin();
        }
    }

    /// Removes the value at the front of the deque.
    ///
    /// Returns `None` if the deque is observed to be empty.
    pub fn pop_front(&self) -> Option<T> {
        let guard = epoch::pin();
        let backoff = Backoff::new();

        loop {
            let back = self.back.load(Acquire, &guard);
            let b = match unsafe { back.as_ref() } {
                Some(b) => b,
                None => {
                    // Authoritatively empty; a stale mirror is dropped on
                    // the way out.
                    let front = self.front.load(Acquire, &guard);
                    if !front.is_null() {
                        let _ = self.front.compare_exchange(
                            front,
                            Shared::null(),
                            Release,
                            Relaxed,
                            &guard,
                        );
                    }
                    return None;
                }
            };

            // Keep the back end sane first, so the front end always has a
            // live anchor to fall back on.
            let bnext = b.next.load(Acquire, &guard);
            if bnext.tag() == DEAD {
                let target = if bnext.is_null() {
                    b.prev.load(Acquire, &guard).with_tag(0)
                } else {
                    bnext.with_tag(0)
                };
                let _ = self
                    .back
                    .compare_exchange(back, target, Release, Relaxed, &guard);
                backoff.spin();
                continue;
            }
            if !bnext.is_null() {
                let _ = self.back.compare_exchange(back, bnext, Release, Relaxed, &guard);
                continue;
            }

            let front = self.front.load(Acquire, &guard);
            let f = match unsafe { front.as_ref() } {
                Some(f) => f,
                None => {
                    // Non-empty, but the first node is not published yet;
                    // find it from the back and help.
                    let first = Self::first_from_back(back, &guard);
                    let _ = self.front.compare_exchange(
                        Shared::null(),
                        first,
                        Release,
                        Relaxed,
                        &guard,
                    );
                    backoff.spin();
                    continue;
                }
            };

            let prev = f.prev.load(Acquire, &guard);
            if prev.tag() == DEAD {
                let fnext = f.next.load(Acquire, &guard);
                let _ = self
                    .front
                    .compare_exchange(front, fnext.with_tag(0), Release, Relaxed, &guard);
                backoff.spin();
                continue;
            }
            if !prev.is_null() {
                let _ = self.front.compare_exchange(front, prev, Release, Relaxed, &guard);
                continue;
            }

            let next = f.next.load(Acquire, &guard);
            if next.tag() == DEAD {
                // Another front-side pop already claimed this node; its
                // successor is preserved under the mark.
                let _ = self
                    .front
                    .compare_exchange(front, next.with_tag(0), Release, Relaxed, &guard);
                backoff.spin();
                continue;
            }

            match unsafe { next.as_ref() } {
                None => {
                    // Sole node; the same arbitration through `back` as on
                    // the other side.
                    if front != back {
                        backoff.spin();
                        continue;
                    }
                    if self
                        .back
                        .compare_exchange(back, Shared::null(), Release, Relaxed, &guard)
                        .is_ok()
                    {
                        let _ = self.front.compare_exchange(
                            front,
                            Shared::null(),
                            Release,
                            Relaxed,
                            &guard,
                        );
                        self.retire_sole(front, &guard);
                        unsafe {
                            let value = ManuallyDrop::into_inner(ptr::read(&f.data));
                            guard.defer_destroy(front);
                            return Some(value);
                        }
                    }
                }
                Some(nx) => {
                    // A node was appended behind this one after `back` was
                    // checked; move `back` off the node being removed.
                    if back == front {
                        let _ = self.back.compare_exchange(
                            back,
                            next.with_tag(0),
                            Release,
                            Relaxed,
                            &guard,
                        );
                    }
                    // Removal commits by marking the node's own forward
                    // link. A back-side pop of the successor must CAS this
                    // same word, so the two sides cannot both claim the
                    // pair.
                    if f.next
                        .compare_exchange(next, next.with_tag(DEAD), Release, Relaxed, &guard)
                        .is_ok()
                    {
                        // Unhook the successor, then advance `front` past
                        // the removed node.
                        let _ = nx.prev.compare_exchange(
                            front,
                            Shared::null(),
                            Release,
                            Relaxed,
                            &guard,
                        );
                        let _ = self.front.compare_exchange(
                            front,
                            next.with_tag(0),
                            Release,
                            Relaxed,
                            &guard,
                        );

                        // Late prepends must not attach behind the removed
                        // node; splice any chain that already did onto the
                        // new first node.
                        if let Err(e) = f.prev.compare_exchange(
                            Shared::null(),
                            Shared::null().with_tag(DEAD),
                            Release,
                            Relaxed,
                            &guard,
                        ) {
                            let stray = e.current;
                            if let Some(s) = unsafe { stray.as_ref() } {
                                let _ = s.next.compare_exchange(
                                    front,
                                    next.with_tag(0),
                                    Release,
                                    Relaxed,
                                    &guard,
                                );
                            }
                            let _ = nx.prev.compare_exchange(
                                Shared::null(),
                                stray.with_tag(0),
                                Release,
                                Relaxed,
                                &guard,
                            );
                            let _ = self.front.compare_exchange(
                                next.with_tag(0),
                                stray.with_tag(0),
                                Release,
                                Relaxed,
                                &guard,
                            );
                        }
                        unsafe {
                            let value = ManuallyDrop::into_inner(ptr::read(&f.data));
                            guard.defer_destroy(front);
                            return Some(value);
                        }
                    }
                }
            }
            backoff.spin();
        }
    }

    /// Returns `true` if the deque is observed to be empty.
    pub fn is_empty(&self) -> bool {
        let guard = epoch::pin();
        self.back.load(Acquire, &guard).is_null()
    }

    /// Installs `new` as the sole node of an empty deque.
    ///
    /// Returns `false` if the deque turned out not to be empty, in which
    /// case nothing was published and the caller retries.
    fn try_push_empty<'g>(&self, new: Shared<'g, Node<T>>, guard: &'g Guard) -> bool {
        let n = unsafe { new.deref() };
        // The node may carry links from earlier attempts in the caller's
        // retry loop.
        n.prev.store(Shared::null(), Relaxed);
        n.next.store(Shared::null(), Relaxed);

        if self
            .back
            .compare_exchange(Shared::null(), new, Release, Relaxed, guard)
            .is_err()
        {
            return false;
        }

        // The node is the entire deque now; it must also end up published at
        // `front`. Other threads help with the exact same CAS, and the duty
        // lapses once a pop has removed the node again.
        let backoff = Backoff::new();
        loop {
            let front = self.front.load(Acquire, guard);
            if front == new {
                return true;
            }
            if self.back.load(Acquire, guard).is_null() {
                return true;
            }
            if n.next.load(Acquire, guard).tag() == DEAD
                || n.prev.load(Acquire, guard).tag() == DEAD
            {
                return true;
            }
            if self
                .front
                .compare_exchange(front, new, Release, Relaxed, guard)
                .is_ok()
            {
                return true;
            }
            backoff.spin();
        }
    }

    /// Walks `prev` links from `back` to the first node of the deque.
    fn first_from_back<'g>(back: Shared<'g, Node<T>>, guard: &'g Guard) -> Shared<'g, Node<T>> {
        let mut first = back;
        loop {
            let prev = unsafe { first.deref() }.prev.load(Acquire, guard);
            if prev.is_null() {
                return first;
            }
            first = prev;
        }
    }

    /// Poisons both links of a node that was popped as the sole element.
    ///
    /// A push that won the race for one of the links before the poison
    /// landed has attached a live chain to the removed node; that chain is
    /// cut loose from it and reinstalled as the deque's contents.
    fn retire_sole<'g>(&self, node: Shared<'g, Node<T>>, guard: &'g Guard) {
        let n = unsafe { node.deref() };

        if let Err(e) = n.next.compare_exchange(
            Shared::null(),
            Shared::null().with_tag(DEAD),
            Release,
            Relaxed,
            guard,
        ) {
            let stray = e.current;
            if let Some(s) = unsafe { stray.as_ref() } {
                let _ = s
                    .prev
                    .compare_exchange(node, Shared::null(), Release, Relaxed, guard);
            }
            let _ = self
                .back
                .compare_exchange(Shared::null(), stray.with_tag(0), Release, Relaxed, guard);
        }

        if let Err(e) = n.prev.compare_exchange(
            Shared::null(),
            Shared::null().with_tag(DEAD),
            Release,
            Relaxed,
            guard,
        ) {
            let stray = e.current;
            if let Some(s) = unsafe { stray.as_ref() } {
                let _ = s
                    .next
                    .compare_exchange(node, Shared::null(), Release, Relaxed, guard);
            }
            let _ = self
                .back
                .compare_exchange(Shared::null(), stray.with_tag(0), Release, Relaxed, guard);
        }
    }
}

impl<T> Drop for Deque<T> {
    fn drop(&mut self) {
        while self.pop_back().is_some() {}
    }
}

impl<T> Default for Deque<T> {
    fn default() -> Self {
        Deque::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn is_empty() {
        let d: Deque<i64> = Deque::new();
        assert!(d.is_empty());
        d.push_back(1);
        assert!(!d.is_empty());
        assert_eq!(d.pop_front(), Some(1));
        assert!(d.is_empty());
    }

    #[test]
    fn single_node_transitions() {
        let d: Deque<i64> = Deque::new();
        d.push_back(1);
        assert_eq!(d.pop_back(), Some(1));
        d.push_back(2);
        assert_eq!(d.pop_front(), Some(2));
        d.push_front(3);
        assert_eq!(d.pop_back(), Some(3));
        d.push_front(4);
        assert_eq!(d.pop_front(), Some(4));
        assert_eq!(d.pop_back(), None);
        assert_eq!(d.pop_front(), None);
    }

    #[test]
    fn mixed_ends() {
        let d: Deque<i64> = Deque::new();
        d.push_back(2);
        d.push_front(1);
        d.push_back(3);
        d.push_front(0);
        assert_eq!(d.pop_front(), Some(0));
        assert_eq!(d.pop_back(), Some(3));
        assert_eq!(d.pop_front(), Some(1));
        assert_eq!(d.pop_back(), Some(2));
    }
}
