//! Host-allocation instrumentation for driver-side memory.
//!
//! Vulkan lets the application intercept every host allocation the driver makes
//! through a `vk::AllocationCallbacks` table. `HostAllocationTracker` provides a
//! pass-through implementation over the global allocator that counts
//! allocations, reallocations and frees, so the number of outstanding driver
//! allocations can be surfaced in a debug overlay. When the tracker is not
//! installed the renderer passes `None` everywhere and behaviour is identical.
//!
//! Only instance- and device-level creation routes the callbacks through the
//! driver; per-resource GPU memory goes through VMA instead (see `allocator`).

use ash::vk;
use log::{debug, warn};
use std::alloc::{alloc, dealloc, Layout};
use std::ffi::c_void;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of the tracker's counters, suitable for debug display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationStats {
    pub allocations: u64,
    pub reallocations: u64,
    pub frees: u64,
}

impl AllocationStats {
    /// Number of allocations that have not been freed yet.
    pub fn outstanding(&self) -> i64 {
        self.allocations as i64 - self.frees as i64
    }
}

#[derive(Debug, Default)]
struct Counters {
    allocations: AtomicU64,
    reallocations: AtomicU64,
    frees: AtomicU64,
}

/// Counting pass-through over the global allocator.
///
/// The tracker must outlive every Vulkan object created with its callbacks;
/// the `Kernel` guarantees this by declaring it after (and thus dropping it
/// after) the instance and device.
#[derive(Debug)]
pub struct HostAllocationTracker {
    // Boxed so the user-data pointer handed to the driver stays stable.
    counters: Box<Counters>,
}

impl HostAllocationTracker {
    pub fn new() -> Self {
        debug!("Host allocation tracking enabled.");
        Self { counters: Box::new(Counters::default()) }
    }

    /// Builds the callback table handed to instance/device creation.
    ///
    /// The returned struct borrows the tracker's counters through its
    /// user-data pointer; it must not be used after the tracker is dropped.
    pub fn callbacks(&self) -> vk::AllocationCallbacks {
        vk::AllocationCallbacks {
            p_user_data: &*self.counters as *const Counters as *mut c_void,
            pfn_allocation: Some(host_allocation),
            pfn_reallocation: Some(host_reallocation),
            pfn_free: Some(host_free),
            pfn_internal_allocation: None,
            pfn_internal_free: None,
        }
    }

    pub fn stats(&self) -> AllocationStats {
        AllocationStats {
            allocations: self.counters.allocations.load(Ordering::Relaxed),
            reallocations: self.counters.reallocations.load(Ordering::Relaxed),
            frees: self.counters.frees.load(Ordering::Relaxed),
        }
    }
}

impl Default for HostAllocationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HostAllocationTracker {
    fn drop(&mut self) {
        let stats = self.stats();
        if stats.outstanding() != 0 {
            warn!(
                "Host allocation tracker dropped with {} outstanding allocation(s) \
                 ({} allocated, {} freed).",
                stats.outstanding(),
                stats.allocations,
                stats.frees
            );
        } else {
            debug!(
                "Host allocation tracker dropped cleanly ({} allocations, {} reallocations).",
                stats.allocations, stats.reallocations
            );
        }
    }
}

// The driver only hands back the pointer on free, not the size or alignment,
// so each block carries a header recording the layout of the full allocation.
#[repr(C)]
struct BlockHeader {
    base: *mut u8,
    total_size: usize,
    align: usize,
    user_size: usize,
}

fn block_layout(size: usize, alignment: usize) -> Option<(Layout, usize)> {
    let align = alignment.max(mem::align_of::<BlockHeader>()).max(mem::size_of::<usize>());
    // The user pointer must land on an `align` boundary past the header.
    let offset = mem::size_of::<BlockHeader>().checked_next_multiple_of(align)?;
    let total = offset.checked_add(size)?;
    Layout::from_size_align(total, align).ok().map(|l| (l, offset))
}

unsafe fn raw_allocate(counters: &Counters, size: usize, alignment: usize) -> *mut c_void {
    if size == 0 {
        return std::ptr::null_mut();
    }
    let Some((layout, offset)) = block_layout(size, alignment) else {
        return std::ptr::null_mut();
    };
    let base = alloc(layout);
    if base.is_null() {
        return std::ptr::null_mut();
    }
    let user_ptr = base.add(offset);
    let header = user_ptr.sub(mem::size_of::<BlockHeader>()) as *mut BlockHeader;
    header.write(BlockHeader {
        base,
        total_size: layout.size(),
        align: layout.align(),
        user_size: size,
    });
    counters.allocations.fetch_add(1, Ordering::Relaxed);
    user_ptr as *mut c_void
}

unsafe fn raw_free(counters: &Counters, memory: *mut c_void) {
    if memory.is_null() {
        return;
    }
    let header_ptr = (memory as *mut u8).sub(mem::size_of::<BlockHeader>()) as *mut BlockHeader;
    let header = header_ptr.read();
    dealloc(header.base, Layout::from_size_align_unchecked(header.total_size, header.align));
    counters.frees.fetch_add(1, Ordering::Relaxed);
}

unsafe extern "system" fn host_allocation(
    p_user_data: *mut c_void,
    size: usize,
    alignment: usize,
    _allocation_scope: vk::SystemAllocationScope,
) -> *mut c_void {
    let counters = &*(p_user_data as *const Counters);
    raw_allocate(counters, size, alignment)
}

unsafe extern "system" fn host_reallocation(
    p_user_data: *mut c_void,
    p_original: *mut c_void,
    size: usize,
    alignment: usize,
    allocation_scope: vk::SystemAllocationScope,
) -> *mut c_void {
    let counters = &*(p_user_data as *const Counters);
    if p_original.is_null() {
        return host_allocation(p_user_data, size, alignment, allocation_scope);
    }
    if size == 0 {
        raw_free(counters, p_original);
        return std::ptr::null_mut();
    }

    let old_header =
        ((p_original as *mut u8).sub(mem::size_of::<BlockHeader>()) as *const BlockHeader).read();
    let new_ptr = raw_allocate(counters, size, alignment);
    if new_ptr.is_null() {
        // Per the Vulkan spec the original allocation stays valid on failure.
        return std::ptr::null_mut();
    }
    std::ptr::copy_nonoverlapping(
        p_original as *const u8,
        new_ptr as *mut u8,
        old_header.user_size.min(size),
    );
    raw_free(counters, p_original);
    counters.reallocations.fetch_add(1, Ordering::Relaxed);
    new_ptr
}

unsafe extern "system" fn host_free(p_user_data: *mut c_void, p_memory: *mut c_void) {
    let counters = &*(p_user_data as *const Counters);
    raw_free(counters, p_memory);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_and_free_balance_out() {
        let tracker = HostAllocationTracker::new();
        let callbacks = tracker.callbacks();
        let user_data = callbacks.p_user_data;

        let ptr = unsafe {
            host_allocation(user_data, 64, 16, vk::SystemAllocationScope::INSTANCE)
        };
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % 16, 0);
        unsafe { host_free(user_data, ptr) };

        let stats = tracker.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.outstanding(), 0);
    }

    #[test]
    fn reallocation_preserves_contents() {
        let tracker = HostAllocationTracker::new();
        let callbacks = tracker.callbacks();
        let user_data = callbacks.p_user_data;

        let ptr = unsafe {
            host_allocation(user_data, 8, 8, vk::SystemAllocationScope::OBJECT)
        };
        unsafe {
            std::ptr::copy_nonoverlapping(b"12345678".as_ptr(), ptr as *mut u8, 8);
        }
        let grown = unsafe {
            host_reallocation(user_data, ptr, 32, 8, vk::SystemAllocationScope::OBJECT)
        };
        assert!(!grown.is_null());
        let mut copied = [0u8; 8];
        unsafe {
            std::ptr::copy_nonoverlapping(grown as *const u8, copied.as_mut_ptr(), 8);
        }
        assert_eq!(&copied, b"12345678");
        unsafe { host_free(user_data, grown) };

        let stats = tracker.stats();
        assert_eq!(stats.reallocations, 1);
        assert_eq!(stats.outstanding(), 0);
    }

    #[test]
    fn zero_size_allocation_returns_null() {
        let tracker = HostAllocationTracker::new();
        let callbacks = tracker.callbacks();
        let ptr = unsafe {
            host_allocation(callbacks.p_user_data, 0, 8, vk::SystemAllocationScope::COMMAND)
        };
        assert!(ptr.is_null());
        assert_eq!(tracker.stats().allocations, 0);
    }

    #[test]
    fn freeing_null_is_a_no_op() {
        let tracker = HostAllocationTracker::new();
        let callbacks = tracker.callbacks();
        unsafe { host_free(callbacks.p_user_data, std::ptr::null_mut()) };
        assert_eq!(tracker.stats().frees, 0);
    }
}
