//! Growable buffer of plain-data elements backed by an arena

use super::ArenaAllocator;
use std::alloc::{handle_alloc_error, Layout};
use std::fmt;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

/// Contiguous, growable buffer whose storage comes from an [`ArenaAllocator`].
///
/// Elements are `Copy`, so nothing is dropped element-wise; removal is by
/// swap-with-last like the rest of the particle storage.
pub struct ArenaVec<T: Copy, A: ArenaAllocator> {
    ptr: NonNull<T>,
    len: usize,
    cap: usize,
    alloc: A,
    _marker: PhantomData<T>,
}

// SAFETY: the buffer is uniquely owned; arenas are Send + Sync.
unsafe impl<T: Copy + Send, A: ArenaAllocator> Send for ArenaVec<T, A> {}
unsafe impl<T: Copy + Sync, A: ArenaAllocator> Sync for ArenaVec<T, A> {}

#[cold]
fn capacity_overflow() -> ! {
    panic!("capacity overflow");
}

impl<T: Copy, A: ArenaAllocator> ArenaVec<T, A> {
    const IS_ZST: bool = size_of::<T>() == 0;

    pub fn new_in(alloc: A) -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
            cap: if Self::IS_ZST { usize::MAX } else { 0 },
            alloc,
            _marker: PhantomData,
        }
    }

    pub fn with_capacity_in(capacity: usize, alloc: A) -> Self {
        let mut v = Self::new_in(alloc);
        v.reserve_exact(capacity);
        v
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Bytes reserved from the arena.
    pub fn capacity_bytes(&self) -> usize {
        if Self::IS_ZST {
            0
        } else {
            self.cap * size_of::<T>()
        }
    }

    /// Bytes occupied by live elements.
    pub fn len_bytes(&self) -> usize {
        self.len * size_of::<T>()
    }

    fn layout_for(&self, cap: usize) -> Layout {
        let align = align_of::<T>().max(self.alloc.min_align());
        size_of::<T>()
            .checked_mul(cap)
            .and_then(|size| Layout::from_size_align(size, align).ok())
            .unwrap_or_else(|| capacity_overflow())
    }

    fn set_capacity(&mut self, new_cap: usize) {
        debug_assert!(new_cap >= self.len);
        if Self::IS_ZST || new_cap == self.cap {
            return;
        }
        let new_ptr = if new_cap == 0 {
            NonNull::dangling()
        } else {
            let layout = self.layout_for(new_cap);
            let raw = match self.alloc.allocate(layout) {
                Ok(ptr) => ptr,
                Err(err) => {
                    tracing::error!(%err, "particle buffer allocation failed");
                    handle_alloc_error(layout)
                }
            };
            let typed = raw.cast::<T>();
            // SAFETY: both regions hold at least `len` elements and are distinct allocations.
            unsafe { ptr::copy_nonoverlapping(self.ptr.as_ptr(), typed.as_ptr(), self.len) };
            typed
        };
        self.release();
        self.ptr = new_ptr;
        self.cap = new_cap;
    }

    fn release(&mut self) {
        if !Self::IS_ZST && self.cap > 0 {
            let layout = self.layout_for(self.cap);
            // SAFETY: `ptr` was allocated by this arena with exactly this layout.
            unsafe { self.alloc.deallocate(self.ptr.cast(), layout) };
        }
    }

    /// Make room for at least `additional` more elements, growing geometrically.
    pub fn reserve(&mut self, additional: usize) {
        let needed = self.len.checked_add(additional).unwrap_or_else(|| capacity_overflow());
        if needed <= self.cap {
            return;
        }
        let new_cap = needed.max(self.cap.saturating_mul(2)).max(4);
        self.set_capacity(new_cap);
    }

    pub fn reserve_exact(&mut self, additional: usize) {
        let needed = self.len.checked_add(additional).unwrap_or_else(|| capacity_overflow());
        if needed > self.cap {
            self.set_capacity(needed);
        }
    }

    pub fn shrink_to_fit(&mut self) {
        self.set_capacity(self.len);
    }

    #[inline]
    pub fn push(&mut self, value: T) {
        if self.len == self.cap {
            self.reserve(1);
        }
        // SAFETY: len < cap after the reserve above.
        unsafe { ptr::write(self.ptr.as_ptr().add(self.len), value) };
        self.len += 1;
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        // SAFETY: the element at the old last index is initialized.
        Some(unsafe { ptr::read(self.ptr.as_ptr().add(self.len)) })
    }

    /// Remove element `index`, moving the last element into its slot.
    pub fn swap_remove(&mut self, index: usize) -> T {
        let len = self.len;
        assert!(index < len, "swap_remove index {index} out of bounds (len {len})");
        let value = self[index];
        let last = self[len - 1];
        self[index] = last;
        self.len -= 1;
        value
    }

    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn resize(&mut self, new_len: usize, value: T) {
        if new_len <= self.len {
            self.truncate(new_len);
            return;
        }
        self.reserve(new_len - self.len);
        while self.len < new_len {
            // SAFETY: capacity reserved above.
            unsafe { ptr::write(self.ptr.as_ptr().add(self.len), value) };
            self.len += 1;
        }
    }

    pub fn extend_from_slice(&mut self, values: &[T]) {
        self.reserve(values.len());
        // SAFETY: capacity reserved above; `values` cannot alias our spare capacity.
        unsafe {
            ptr::copy_nonoverlapping(values.as_ptr(), self.ptr.as_ptr().add(self.len), values.len());
        }
        self.len += values.len();
    }

    /// Reorder the first `order.len()` elements so slot `i` receives the
    /// element previously at `order[i]`. `order` must be a permutation.
    pub fn permute(&mut self, order: &[usize]) {
        assert!(order.len() <= self.len, "permutation longer than buffer");
        let src: Vec<T> = self[..order.len()].to_vec();
        for (slot, &from) in self.iter_mut().zip(order) {
            *slot = src[from];
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: elements 0..len are initialized; dangling is fine for len 0.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as above, and `&mut self` gives unique access.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: Copy, A: ArenaAllocator> Deref for ArenaVec<T, A> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: Copy, A: ArenaAllocator> DerefMut for ArenaVec<T, A> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T: Copy, A: ArenaAllocator> Drop for ArenaVec<T, A> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: Copy, A: ArenaAllocator> Clone for ArenaVec<T, A> {
    fn clone(&self) -> Self {
        let mut v = Self::with_capacity_in(self.len, self.alloc.clone());
        v.extend_from_slice(self);
        v
    }
}

impl<T: Copy, A: ArenaAllocator> Extend<T> for ArenaVec<T, A> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.reserve(iter.size_hint().0);
        for value in iter {
            self.push(value);
        }
    }
}

impl<T: Copy + fmt::Debug, A: ArenaAllocator> fmt::Debug for ArenaVec<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: Copy + PartialEq, A: ArenaAllocator> PartialEq for ArenaVec<T, A> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{DeviceArena, StdArena};

    #[test]
    fn push_pop_and_swap_remove() {
        let mut v = ArenaVec::new_in(StdArena);
        for i in 0..10 {
            v.push(i);
        }
        assert_eq!(v.len(), 10);
        assert_eq!(v.swap_remove(2), 2);
        assert_eq!(v[2], 9);
        assert_eq!(v.pop(), Some(8));
        assert_eq!(&v[..], &[0, 1, 9, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn resize_and_shrink() {
        let mut v: ArenaVec<f64, _> = ArenaVec::with_capacity_in(2, StdArena);
        v.resize(5, 1.5);
        assert_eq!(&v[..], &[1.5; 5]);
        v.truncate(3);
        v.shrink_to_fit();
        assert_eq!(v.capacity(), 3);
        assert_eq!(v.capacity_bytes(), 24);
        v.clear();
        v.shrink_to_fit();
        assert_eq!(v.capacity(), 0);
    }

    #[test]
    fn permute_reorders_prefix() {
        let mut v = ArenaVec::new_in(StdArena);
        v.extend_from_slice(&[10, 20, 30, 40]);
        v.permute(&[2, 0, 1]);
        assert_eq!(&v[..], &[30, 10, 20, 40]);
    }

    #[test]
    fn clone_is_deep_and_respects_arena_alignment() {
        let mut v = ArenaVec::new_in(DeviceArena);
        v.extend(0..100u32);
        let w = v.clone();
        v[0] = 7;
        assert_eq!(w[0], 0);
        assert_eq!(w.as_ptr() as usize % 256, 0);
        assert_eq!(w.len(), 100);
    }
}
