//! Bounds-checked atomic access over a raw, possibly shared, memory region.
//!
//! An [`AtomicBuffer`] is the only way the rest of the workspace touches mapped
//! memory. Offsets are byte offsets from the start of the region and every
//! accessor checks `offset + size <= capacity` before dereferencing.
//!
//! # Access classes
//!
//! | accessor                         | ordering             | use                                  |
//! |----------------------------------|----------------------|--------------------------------------|
//! | `get_*` / `put_*`                | none (plain)         | data already synchronised elsewhere  |
//! | `get_*_volatile`                 | `Acquire` load       | observing a publication point        |
//! | `put_*_ordered`                  | `Release` store      | publishing a value to other parties  |
//! | `compare_and_set_*`              | `SeqCst` CAS         | producer coordination                |
//! | `get_and_add_i64`                | `SeqCst` fetch-add   | counters (correlation ids, tails)    |
//!
//! The memory is usually shared with other processes, so the atomics here
//! lower to real hardware barriers, not compiler-only fences.
//!
//! # Faults
//!
//! An out-of-range offset, or a misaligned offset on an atomic accessor, means
//! the shared layout is corrupt or the caller computed a wrong index. Neither is
//! recoverable: the accessor panics before any memory is touched.

use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

/// A fixed-size view over raw memory with ordered and atomic accessors.
///
/// The buffer does not own the memory it points at. Whoever maps the region
/// (see `strand-mmap`) must keep the mapping alive for as long as the buffer
/// is used.
pub struct AtomicBuffer {
    /// Start of the viewed range. Not owned; never freed through this type.
    ptr: *mut u8,
    /// Bytes reachable from `ptr`. Every accessor checks against it.
    capacity: usize,
}

// SAFETY: all mutation goes through raw pointers into shared memory, and the
// accessor chosen at each call site decides the ordering.
unsafe impl Send for AtomicBuffer {}
unsafe impl Sync for AtomicBuffer {}

impl AtomicBuffer {
    /// Wraps `capacity` bytes starting at `ptr`.
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `capacity` bytes for the
    /// whole lifetime of the returned buffer, and must not be freed or
    /// unmapped while the buffer is in use.
    pub unsafe fn wrap(ptr: *mut u8, capacity: usize) -> Self {
        assert!(
            !ptr.is_null() || capacity == 0,
            "cannot wrap a null pointer with capacity {capacity}"
        );
        Self { ptr, capacity }
    }

    /// Creates a second view over `length` bytes starting at `offset`.
    ///
    /// # Safety
    /// The returned buffer aliases this one. The caller must ensure the
    /// underlying memory outlives both views.
    pub unsafe fn view(&self, offset: usize, length: usize) -> AtomicBuffer {
        self.bounds_check(offset, length);
        // SAFETY: range checked above; lifetime is the caller's obligation.
        unsafe { AtomicBuffer::wrap(self.ptr.add(offset), length) }
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    #[inline(always)]
    fn bounds_check(&self, offset: usize, size: usize) {
        match offset.checked_add(size) {
            Some(end) if end <= self.capacity => {}
            _ => out_of_bounds(offset, size, self.capacity),
        }
    }

    #[inline(always)]
    fn atomic_check(&self, offset: usize, size: usize) {
        self.bounds_check(offset, size);
        let addr = self.ptr as usize + offset;
        if addr % size != 0 {
            misaligned(offset, size);
        }
    }

    #[inline(always)]
    fn atomic_i32(&self, offset: usize) -> &AtomicI32 {
        self.atomic_check(offset, 4);
        // SAFETY: in bounds and 4-byte aligned; memory outlives `self` per `wrap`.
        unsafe { AtomicI32::from_ptr(self.ptr.add(offset).cast()) }
    }

    #[inline(always)]
    fn atomic_i64(&self, offset: usize) -> &AtomicI64 {
        self.atomic_check(offset, 8);
        // SAFETY: in bounds and 8-byte aligned; memory outlives `self` per `wrap`.
        unsafe { AtomicI64::from_ptr(self.ptr.add(offset).cast()) }
    }

    #[inline(always)]
    fn read<T: Copy>(&self, offset: usize) -> T {
        self.bounds_check(offset, size_of::<T>());
        // SAFETY: in bounds; unaligned read tolerates any offset.
        unsafe { ptr::read_unaligned(self.ptr.add(offset).cast::<T>()) }
    }

    #[inline(always)]
    fn write<T: Copy>(&self, offset: usize, value: T) {
        self.bounds_check(offset, size_of::<T>());
        // SAFETY: in bounds; unaligned write tolerates any offset.
        unsafe { ptr::write_unaligned(self.ptr.add(offset).cast::<T>(), value) }
    }

    // ─── Plain accessors ────────────────────────────────────────────────────

    #[inline]
    pub fn get_u8(&self, offset: usize) -> u8 {
        self.read(offset)
    }

    #[inline]
    pub fn put_u8(&self, offset: usize, value: u8) {
        self.write(offset, value)
    }

    #[inline]
    pub fn get_i8(&self, offset: usize) -> i8 {
        self.read(offset)
    }

    #[inline]
    pub fn put_i8(&self, offset: usize, value: i8) {
        self.write(offset, value)
    }

    #[inline]
    pub fn get_u16(&self, offset: usize) -> u16 {
        self.read(offset)
    }

    #[inline]
    pub fn put_u16(&self, offset: usize, value: u16) {
        self.write(offset, value)
    }

    #[inline]
    pub fn get_i32(&self, offset: usize) -> i32 {
        self.read(offset)
    }

    #[inline]
    pub fn put_i32(&self, offset: usize, value: i32) {
        self.write(offset, value)
    }

    #[inline]
    pub fn get_i64(&self, offset: usize) -> i64 {
        self.read(offset)
    }

    #[inline]
    pub fn put_i64(&self, offset: usize, value: i64) {
        self.write(offset, value)
    }

    // ─── Ordered accessors ──────────────────────────────────────────────────

    /// Acquire load. Pairs with [`put_i32_ordered`](Self::put_i32_ordered).
    #[inline]
    pub fn get_i32_volatile(&self, offset: usize) -> i32 {
        self.atomic_i32(offset).load(Ordering::Acquire)
    }

    /// Acquire load. Pairs with [`put_i64_ordered`](Self::put_i64_ordered).
    #[inline]
    pub fn get_i64_volatile(&self, offset: usize) -> i64 {
        self.atomic_i64(offset).load(Ordering::Acquire)
    }

    /// Release store: every write made before this call is visible to a
    /// reader that observes `value` with an acquire load.
    #[inline]
    pub fn put_i32_ordered(&self, offset: usize, value: i32) {
        self.atomic_i32(offset).store(value, Ordering::Release)
    }

    /// Release store, see [`put_i32_ordered`](Self::put_i32_ordered).
    #[inline]
    pub fn put_i64_ordered(&self, offset: usize, value: i64) {
        self.atomic_i64(offset).store(value, Ordering::Release)
    }

    // ─── Read-modify-write ──────────────────────────────────────────────────

    /// Atomically replaces `expected` with `update`. Returns `true` on success.
    #[inline]
    pub fn compare_and_set_i32(&self, offset: usize, expected: i32, update: i32) -> bool {
        self.atomic_i32(offset)
            .compare_exchange(expected, update, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Atomically replaces `expected` with `update`. Returns `true` on success.
    #[inline]
    pub fn compare_and_set_i64(&self, offset: usize, expected: i64, update: i64) -> bool {
        self.atomic_i64(offset)
            .compare_exchange(expected, update, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Atomically adds `delta` and returns the value held before the add.
    #[inline]
    pub fn get_and_add_i64(&self, offset: usize, delta: i64) -> i64 {
        self.atomic_i64(offset).fetch_add(delta, Ordering::SeqCst)
    }

    // ─── Bulk access ────────────────────────────────────────────────────────

    /// Copies `length` bytes from `src[src_offset..]` into `self[offset..]`.
    /// Both ranges are checked.
    pub fn put_bytes(&self, offset: usize, src: &AtomicBuffer, src_offset: usize, length: usize) {
        self.bounds_check(offset, length);
        src.bounds_check(src_offset, length);
        // SAFETY: both ranges checked; `copy` tolerates overlap when the two
        // views alias the same region.
        unsafe { ptr::copy(src.ptr.add(src_offset), self.ptr.add(offset), length) }
    }

    /// Copies `src` into the buffer starting at `offset`.
    pub fn put_slice(&self, offset: usize, src: &[u8]) {
        self.bounds_check(offset, src.len());
        // SAFETY: destination range checked; `src` is a distinct Rust slice.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.add(offset), src.len()) }
    }

    /// Copies `dst.len()` bytes starting at `offset` into `dst`.
    pub fn get_bytes(&self, offset: usize, dst: &mut [u8]) {
        self.bounds_check(offset, dst.len());
        // SAFETY: source range checked; `dst` is a distinct Rust slice.
        unsafe { ptr::copy_nonoverlapping(self.ptr.add(offset), dst.as_mut_ptr(), dst.len()) }
    }

    /// Borrows `length` bytes starting at `offset` without copying.
    ///
    /// Only use this on ranges that were published to the caller (e.g. a
    /// record whose length was observed with an acquire load) and that no
    /// writer will touch until the caller releases them.
    #[inline]
    pub fn as_slice(&self, offset: usize, length: usize) -> &[u8] {
        self.bounds_check(offset, length);
        // SAFETY: range checked; immutability is guaranteed by the caller's protocol.
        unsafe { slice::from_raw_parts(self.ptr.add(offset), length) }
    }

    /// Fills `length` bytes starting at `offset` with `value`.
    pub fn set_memory(&self, offset: usize, length: usize, value: u8) {
        self.bounds_check(offset, length);
        // SAFETY: range checked.
        unsafe { ptr::write_bytes(self.ptr.add(offset), value, length) }
    }
}

impl std::fmt::Debug for AtomicBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicBuffer")
            .field("ptr", &self.ptr)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cold]
#[inline(never)]
fn out_of_bounds(offset: usize, size: usize, capacity: usize) -> ! {
    panic!("index out of bounds: offset={offset} size={size} capacity={capacity}")
}

#[cold]
#[inline(never)]
fn misaligned(offset: usize, size: usize) -> ! {
    panic!("misaligned atomic access: offset={offset} size={size}")
}
