//! Host-side enforcement of sandbox limits.
//!
//! The heap ceiling is applied by the allocator the engine is created with,
//! and the deadline by its interrupt handler. Both record when they refuse
//! the engine, so a failure can be attributed to a limit without trusting
//! anything the sandboxed code threw.

use std::{
    ptr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use rquickjs::allocator::{Allocator, RustAllocator};

/// Bookkeeping bytes added to every block, matching the engine's own
/// accounting.
const BLOCK_OVERHEAD: usize = 8;

#[derive(Debug, Default)]
pub(crate) struct LimitSignals {
    refused_allocations: AtomicU64,
    interrupted: AtomicBool,
}

impl LimitSignals {
    /// Allocations refused so far.
    pub(crate) fn refusals(&self) -> u64 {
        self.refused_allocations.load(Ordering::Acquire)
    }

    pub(crate) fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_interrupted(&self) {
        self.interrupted.store(true, Ordering::Release);
    }

    fn refuse(&self) {
        self.refused_allocations.fetch_add(1, Ordering::AcqRel);
    }
}

/// Engine allocator that refuses to grow the heap past `limit` bytes.
pub(crate) struct BudgetAllocator {
    inner: RustAllocator,
    used: usize,
    limit: usize,
    signals: Arc<LimitSignals>,
}

impl BudgetAllocator {
    pub(crate) const fn new(limit: usize, signals: Arc<LimitSignals>) -> Self {
        Self {
            inner: RustAllocator,
            used: 0,
            limit,
            signals,
        }
    }

    fn admit(&self, extra: usize) -> bool {
        if self.used.saturating_add(extra).saturating_add(BLOCK_OVERHEAD) > self.limit {
            self.signals.refuse();
            return false;
        }
        true
    }

    /// Bytes charged for the live block at `ptr`.
    unsafe fn charge(ptr: *mut u8) -> usize {
        unsafe { RustAllocator::usable_size(ptr) + BLOCK_OVERHEAD }
    }
}

unsafe impl Allocator for BudgetAllocator {
    fn alloc(&mut self, size: usize) -> *mut u8 {
        if !self.admit(size) {
            return ptr::null_mut();
        }
        let block = self.inner.alloc(size);
        if !block.is_null() {
            self.used += unsafe { Self::charge(block) };
        }
        block
    }

    fn calloc(&mut self, count: usize, size: usize) -> *mut u8 {
        if !self.admit(count.saturating_mul(size)) {
            return ptr::null_mut();
        }
        let block = self.inner.calloc(count, size);
        if !block.is_null() {
            self.used += unsafe { Self::charge(block) };
        }
        block
    }

    unsafe fn dealloc(&mut self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        unsafe {
            self.used = self.used.saturating_sub(Self::charge(ptr));
            self.inner.dealloc(ptr);
        }
    }

    unsafe fn realloc(&mut self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        if ptr.is_null() {
            return self.alloc(new_size);
        }
        unsafe {
            let old = Self::charge(ptr);
            let grow = (new_size + BLOCK_OVERHEAD).saturating_sub(old);
            // The old block stays valid when growth is refused.
            if grow > 0 && !self.admit(grow.saturating_sub(BLOCK_OVERHEAD)) {
                return ptr::null_mut();
            }
            let block = self.inner.realloc(ptr, new_size);
            if !block.is_null() {
                self.used = self.used.saturating_sub(old) + Self::charge(block);
            }
            block
        }
    }

    unsafe fn usable_size(ptr: *mut u8) -> usize {
        unsafe { RustAllocator::usable_size(ptr) }
    }
}
