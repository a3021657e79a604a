//! Strong/weak reference counting for GPU-facing objects
//!
//! `Ref<T>` owns a strong reference, `WeakRef<T>` a non-owning one. Both point
//! at a single heap control block holding the object and its two counters.
//!
//! - The object is dropped exactly when the strong count reaches zero.
//! - The control block is freed when the weak count reaches zero. All strong
//!   references together hold one implicit weak reference.
//! - After the object is dropped the strong count is set to [`EXPIRED`], so
//!   `WeakRef::lock` never revives a destroyed object.

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{fence, AtomicIsize, AtomicUsize, Ordering};

/// Strong count stored once the object has been destroyed
const EXPIRED: isize = -1;

/// Upper bound before we consider the count corrupted (leaked in a loop)
const MAX_REFCOUNT: isize = isize::MAX / 2;

/// Out-of-line control block
///
/// `data` must stay the first field: `Ref::detach` hands out a pointer to it
/// and `Ref::attach` casts it back to the block.
#[repr(C)]
struct ControlBlock<T> {
    data: UnsafeCell<ManuallyDrop<T>>,
    strong: AtomicIsize,
    weak: AtomicUsize,
}

/// Owning reference
pub struct Ref<T> {
    ptr: NonNull<ControlBlock<T>>,
    _marker: PhantomData<ControlBlock<T>>,
}

/// Non-owning reference, upgraded with [`WeakRef::lock`]
pub struct WeakRef<T> {
    ptr: Option<NonNull<ControlBlock<T>>>,
}

unsafe impl<T: Send + Sync> Send for Ref<T> {}
unsafe impl<T: Send + Sync> Sync for Ref<T> {}
unsafe impl<T: Send + Sync> Send for WeakRef<T> {}
unsafe impl<T: Send + Sync> Sync for WeakRef<T> {}

impl<T> Ref<T> {
    /// Allocate a control block holding `value` with one strong reference
    pub fn new(value: T) -> Self {
        let block = Box::new(ControlBlock {
            data: UnsafeCell::new(ManuallyDrop::new(value)),
            strong: AtomicIsize::new(1),
            weak: AtomicUsize::new(1),
        });
        Self {
            ptr: NonNull::from(Box::leak(block)),
            _marker: PhantomData,
        }
    }

    fn block(&self) -> &ControlBlock<T> {
        unsafe { self.ptr.as_ref() }
    }

    /// Create a weak reference to the same object
    pub fn downgrade(this: &Self) -> WeakRef<T> {
        let previous = this.block().weak.fetch_add(1, Ordering::Relaxed);
        if previous > MAX_REFCOUNT as usize {
            std::process::abort();
        }
        WeakRef { ptr: Some(this.ptr) }
    }

    /// Number of strong references
    pub fn strong_count(this: &Self) -> usize {
        this.block().strong.load(Ordering::Relaxed).max(0) as usize
    }

    /// Number of explicit weak references (the implicit one is not counted)
    pub fn weak_count(this: &Self) -> usize {
        this.block().weak.load(Ordering::Relaxed).saturating_sub(1)
    }

    /// True when both references point at the same control block
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }

    /// Mutable access when this is the only reference (strong or weak)
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        let block = this.block();
        if block.strong.load(Ordering::Acquire) == 1 && block.weak.load(Ordering::Acquire) == 1 {
            fence(Ordering::Acquire);
            // Unique: no other Ref exists and no WeakRef can be created without one.
            let data: &mut ManuallyDrop<T> = unsafe { &mut *block.data.get() };
            Some(&mut **data)
        } else {
            None
        }
    }

    /// Give up this strong reference without releasing it
    ///
    /// The returned pointer carries exactly one strong reference. It must be
    /// handed back to [`Ref::attach`] or the object leaks.
    pub fn detach(this: Self) -> *const T {
        let data = this.block().data.get() as *const T;
        mem::forget(this);
        data
    }

    /// Take back a strong reference previously produced by [`Ref::detach`]
    ///
    /// # Safety
    ///
    /// `ptr` must come from `Ref::<T>::detach` and must be attached only once.
    pub unsafe fn attach(ptr: *const T) -> Self {
        Self {
            ptr: NonNull::new_unchecked(ptr as *mut ControlBlock<T>),
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        if self.block().strong.fetch_add(1, Ordering::Relaxed) > MAX_REFCOUNT {
            std::process::abort();
        }
        Self {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T> Deref for Ref<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.block().data.get() }
    }
}

impl<T> Drop for Ref<T> {
    fn drop(&mut self) {
        if self.block().strong.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            unsafe {
                ManuallyDrop::drop(&mut *self.block().data.get());
            }
            self.block().strong.store(EXPIRED, Ordering::Release);
            // Release the weak reference held by the strong references.
            drop(WeakRef { ptr: Some(self.ptr) });
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T> From<T> for Ref<T> {
    fn from(value: T) -> Self {
        Ref::new(value)
    }
}

impl<T> WeakRef<T> {
    /// A weak reference that never resolves
    pub fn new() -> Self {
        Self { ptr: None }
    }

    /// Upgrade to a strong reference if the object is still alive
    pub fn lock(&self) -> Option<Ref<T>> {
        let ptr = self.ptr?;
        let strong = unsafe { &ptr.as_ref().strong };
        let mut current = strong.load(Ordering::Relaxed);
        loop {
            if current <= 0 {
                return None;
            }
            assert!(current < MAX_REFCOUNT);
            match strong.compare_exchange_weak(current, current + 1, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => {
                    return Some(Ref {
                        ptr,
                        _marker: PhantomData,
                    })
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// True once the last strong reference has been released
    pub fn is_expired(&self) -> bool {
        match self.ptr {
            Some(ptr) => unsafe { ptr.as_ref().strong.load(Ordering::Acquire) <= 0 },
            None => true,
        }
    }

    /// Number of live strong references (0 when expired)
    pub fn strong_count(&self) -> usize {
        match self.ptr {
            Some(ptr) => unsafe { ptr.as_ref().strong.load(Ordering::Relaxed).max(0) as usize },
            None => 0,
        }
    }
}

impl<T> Default for WeakRef<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        if let Some(ptr) = self.ptr {
            if unsafe { ptr.as_ref().weak.fetch_add(1, Ordering::Relaxed) } > MAX_REFCOUNT as usize {
                std::process::abort();
            }
        }
        Self { ptr: self.ptr }
    }
}

impl<T> Drop for WeakRef<T> {
    fn drop(&mut self) {
        let Some(ptr) = self.ptr else {
            return;
        };
        if unsafe { ptr.as_ref().weak.fetch_sub(1, Ordering::Release) } == 1 {
            fence(Ordering::Acquire);
            // `data` is ManuallyDrop: freeing the block does not drop the object again.
            unsafe {
                drop(Box::from_raw(ptr.as_ptr()));
            }
        }
    }
}

impl<T> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(WeakRef)")
    }
}

#[cfg(test)]
#[path = "ptr_tests.rs"]
mod tests;
