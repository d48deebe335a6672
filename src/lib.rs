//! Lock-free linked containers.
//!
//! This crate provides concurrent containers that can be shared among
//! threads. All of them are built from linked nodes that are mutated only
//! through atomic compare-and-swap, so no operation ever blocks on a lock:
//!
//! * [`Stack`], an unbounded LIFO stack (Treiber's algorithm).
//! * [`Queue`], an unbounded FIFO queue (the Michael-Scott algorithm).
//! * [`Deque`], an unbounded double-ended queue over a doubly-linked list.
//!
//! Removed nodes are reclaimed through [`crossbeam_epoch`]: a node is handed
//! to the collector only after it is unreachable, and destroyed only once no
//! pinned thread can still hold a reference into it.

#![no_std]
#![doc(test(
    no_crate_inject,
    attr(
        deny(warnings, rust_2018_idioms),
        allow(dead_code, unused_assignments, unused_variables)
    )
))]
#![warn(missing_docs, unsafe_op_in_unsafe_fn)]

#[cfg(all(feature = "alloc", target_has_atomic = "ptr"))]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

#[cfg(all(feature = "alloc", target_has_atomic = "ptr"))]
mod deque;
#[cfg(all(feature = "alloc", target_has_atomic = "ptr"))]
mod queue;
#[cfg(all(feature = "alloc", target_has_atomic = "ptr"))]
mod stack;

#[cfg(all(feature = "alloc", target_has_atomic = "ptr"))]
pub use crate::{deque::Deque, queue::Queue, stack::Stack};
