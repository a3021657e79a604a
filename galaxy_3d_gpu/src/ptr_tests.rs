//! Unit tests for ptr.rs

use crate::ptr::{Ref, WeakRef};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Counts how many times it has been dropped
struct DropProbe {
    drops: Arc<AtomicUsize>,
    value: u32,
}

impl Drop for DropProbe {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

fn probe(value: u32) -> (Ref<DropProbe>, Arc<AtomicUsize>) {
    let drops = Arc::new(AtomicUsize::new(0));
    (Ref::new(DropProbe { drops: drops.clone(), value }), drops)
}

// ============================================================================
// STRONG REFERENCES
// ============================================================================

#[test]
fn test_new_has_single_strong_reference() {
    let (strong, _) = probe(7);
    assert_eq!(Ref::strong_count(&strong), 1);
    assert_eq!(Ref::weak_count(&strong), 0);
    assert_eq!(strong.value, 7);
}

#[test]
fn test_clone_and_drop_adjust_count() {
    let (strong, drops) = probe(1);
    let second = strong.clone();
    assert_eq!(Ref::strong_count(&strong), 2);
    assert!(Ref::ptr_eq(&strong, &second));

    drop(second);
    assert_eq!(Ref::strong_count(&strong), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    drop(strong);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_self_assignment_keeps_object_alive() {
    let (mut strong, drops) = probe(3);
    strong = strong.clone();
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(strong.value, 3);
    assert_eq!(Ref::strong_count(&strong), 1);
}

#[test]
fn test_get_mut_requires_unique_reference() {
    let mut strong = Ref::new(10u32);
    *Ref::get_mut(&mut strong).expect("unique") += 5;
    assert_eq!(*strong, 15);

    let weak = Ref::downgrade(&strong);
    assert!(Ref::get_mut(&mut strong).is_none());
    drop(weak);

    let other = strong.clone();
    assert!(Ref::get_mut(&mut strong).is_none());
    drop(other);
    assert!(Ref::get_mut(&mut strong).is_some());
}

// ============================================================================
// WEAK REFERENCES
// ============================================================================

#[test]
fn test_lock_while_alive() {
    let (strong, _) = probe(5);
    let weak = Ref::downgrade(&strong);
    assert_eq!(Ref::weak_count(&strong), 1);

    let locked = weak.lock().expect("object is alive");
    assert!(Ref::ptr_eq(&strong, &locked));
    assert_eq!(Ref::strong_count(&strong), 2);
}

#[test]
fn test_lock_after_last_release_returns_none() {
    let (strong, drops) = probe(5);
    let weak = Ref::downgrade(&strong);
    drop(strong);

    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert!(weak.is_expired());
    assert!(weak.lock().is_none());
    assert_eq!(weak.strong_count(), 0);
}

#[test]
fn test_control_block_outlives_object() {
    let (strong, drops) = probe(9);
    let weak_a = Ref::downgrade(&strong);
    let weak_b = weak_a.clone();
    drop(strong);
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    // Both weak references still read the expired block safely.
    drop(weak_a);
    assert!(weak_b.lock().is_none());
    drop(weak_b);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_empty_weak_never_resolves() {
    let weak: WeakRef<u32> = WeakRef::new();
    assert!(weak.is_expired());
    assert!(weak.lock().is_none());
    let default: WeakRef<u32> = WeakRef::default();
    assert!(default.clone().lock().is_none());
}

// ============================================================================
// DETACH / ATTACH
// ============================================================================

#[test]
fn test_detach_keeps_reference_alive() {
    let (strong, drops) = probe(11);
    let weak = Ref::downgrade(&strong);

    let raw = Ref::detach(strong);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
    assert_eq!(weak.strong_count(), 1);
    assert_eq!(unsafe { (*raw).value }, 11);

    let back = unsafe { Ref::attach(raw) };
    assert_eq!(back.value, 11);
    drop(back);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert!(weak.lock().is_none());
}

// ============================================================================
// THREADING
// ============================================================================

#[test]
fn test_concurrent_clone_and_release() {
    let (strong, drops) = probe(0);
    let weak = Ref::downgrade(&strong);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let local = strong.clone();
            let weak = weak.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    let extra = local.clone();
                    let locked = weak.lock();
                    drop(extra);
                    drop(locked);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    assert_eq!(Ref::strong_count(&strong), 1);
    drop(strong);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert!(weak.lock().is_none());
}
