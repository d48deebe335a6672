use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use caslink::Stack;
use crossbeam_utils::thread::scope;

const CONC_COUNT: i64 = 200_000;

#[test]
fn push_pop_1() {
    let s: Stack<i64> = Stack::new();
    s.push(37);
    assert_eq!(s.pop(), Some(37));
}

#[test]
fn push_pop_2() {
    let s: Stack<i64> = Stack::new();
    s.push(37);
    s.push(48);
    assert_eq!(s.pop(), Some(48));
    assert_eq!(s.pop(), Some(37));
}

#[test]
fn pop_empty() {
    let s: Stack<i64> = Stack::new();
    assert_eq!(s.pop(), None);
    s.push(1);
    assert_eq!(s.pop(), Some(1));
    assert_eq!(s.pop(), None);
}

#[test]
fn push_pop_many_seq() {
    let s: Stack<i64> = Stack::new();
    for i in 0..200 {
        s.push(i)
    }
    for i in (0..200).rev() {
        assert_eq!(s.pop(), Some(i));
    }
    assert_eq!(s.pop(), None);
}

#[test]
fn peek_does_not_remove() {
    let s: Stack<i64> = Stack::new();
    assert_eq!(s.peek(), None);
    s.push(3);
    s.push(4);
    assert_eq!(s.peek(), Some(4));
    assert_eq!(s.peek(), Some(4));
    assert_eq!(s.pop(), Some(4));
    assert_eq!(s.peek(), Some(3));
    assert_eq!(s.pop(), Some(3));
    assert_eq!(s.peek(), None);
}

#[test]
fn push_pop_interleaved_stays_empty() {
    let s: Stack<i64> = Stack::new();
    for i in 0..10_000 {
        s.push(i);
        assert_eq!(s.pop(), Some(i));
    }
    assert_eq!(s.pop(), None);
    assert!(s.is_empty());
}

#[test]
fn push_concurrent_then_drain() {
    const THREADS: i64 = 8;
    const COUNT: i64 = CONC_COUNT / THREADS;

    let s: Stack<i64> = Stack::new();

    scope(|scope| {
        for t in 0..THREADS {
            let s = &s;
            scope.spawn(move |_| {
                for i in 0..COUNT {
                    s.push(t * COUNT + i);
                }
            });
        }
    })
    .unwrap();

    let mut popped = Vec::new();
    while let Some(v) = s.pop() {
        popped.push(v);
    }
    assert_eq!(s.pop(), None);

    popped.sort_unstable();
    let expected: Vec<i64> = (0..THREADS * COUNT).collect();
    assert_eq!(popped, expected);
}

#[test]
fn push_pop_many_mpmc_no_loss_no_dup() {
    const THREADS: usize = 4;
    const COUNT: usize = 50_000;

    let s: Stack<usize> = Stack::new();
    let popped = AtomicUsize::new(0);
    let collected: Mutex<Vec<usize>> = Mutex::new(Vec::new());

    scope(|scope| {
        for t in 0..THREADS {
            let s = &s;
            scope.spawn(move |_| {
                for i in 0..COUNT {
                    s.push(t * COUNT + i);
                }
            });
        }
        for _ in 0..THREADS {
            let s = &s;
            let popped = &popped;
            let collected = &collected;
            scope.spawn(move |_| {
                let mut local = Vec::new();
                while popped.load(Ordering::SeqCst) < THREADS * COUNT {
                    if let Some(v) = s.pop() {
                        popped.fetch_add(1, Ordering::SeqCst);
                        local.push(v);
                    }
                }
                collected.lock().unwrap().extend(local);
            });
        }
    })
    .unwrap();

    assert_eq!(s.pop(), None);

    let mut all = collected.into_inner().unwrap();
    all.sort_unstable();
    let expected: Vec<usize> = (0..THREADS * COUNT).collect();
    assert_eq!(all, expected);
}

#[test]
fn unpopped_values_drop_once() {
    static DROP_COUNT: AtomicUsize = AtomicUsize::new(0);

    struct Dropper;

    impl Drop for Dropper {
        fn drop(&mut self) {
            DROP_COUNT.fetch_add(1, Ordering::SeqCst);
        }
    }

    const N_THREADS: usize = 8;
    scope(|scope| {
        for _ in 0..N_THREADS {
            scope.spawn(|_| {
                let s: Stack<Dropper> = Stack::new();
                for _ in 0..4 {
                    s.push(Dropper);
                }
                drop(s);
            });
        }
    })
    .unwrap();

    assert_eq!(DROP_COUNT.load(Ordering::SeqCst), N_THREADS * 4);
}
