//! The process-lifetime allocator instance and its C-flavored surface.
//!
//! One [`PoolRouter`] over [`MmapProvider`] serves the whole process, built
//! on first use. Each thread gets its own [`CacheSet`] through thread-local
//! storage; when a thread exits, the set's drop handler hands every cached
//! block back to the central pools so nothing is stranded by short-lived
//! threads.

use core::cell::UnsafeCell;
use core::ptr::{null_mut, NonNull};
use std::sync::OnceLock;

use tracing::warn;

use crate::allocators::PoolRouter;
use crate::cache::CacheSet;
use crate::chunks::MmapProvider;

static ROUTER: OnceLock<PoolRouter<MmapProvider>> = OnceLock::new();

fn router() -> &'static PoolRouter<MmapProvider> {
    ROUTER.get_or_init(|| PoolRouter::new(MmapProvider))
}

/// The thread's cache set, plus the flush-on-exit hook.
struct LocalCaches(UnsafeCell<CacheSet>);

impl Drop for LocalCaches {
    fn drop(&mut self) {
        // Only a router that was actually built can own blocks.
        if let Some(router) = ROUTER.get() {
            router.flush_all(self.0.get_mut());
        }
    }
}

thread_local! {
    static CACHES: LocalCaches = LocalCaches(UnsafeCell::new(CacheSet::new()));
}

/// Runs `f` against the global router and this thread's caches. Returns
/// `None` if the thread is far enough into teardown that its TLS slot is
/// gone, in which case callers fall back to the cache-free direct paths.
fn with_caches<R>(f: impl FnOnce(&'static PoolRouter<MmapProvider>, &mut CacheSet) -> R) -> Option<R> {
    let router = router();
    CACHES.try_with(|caches| f(router, unsafe { &mut *caches.0.get() })).ok()
}

/// Allocates at least `size` writable bytes, for `size` in 1..=511.
/// Returns null for 0, for anything above 511, and on OS memory refusal.
pub fn malloc(size: usize) -> *mut u8 {
    match with_caches(|router, caches| router.allocate(caches, size)) {
        Some(ptr) => ptr.map_or(null_mut(), NonNull::as_ptr),
        None => router().allocate_direct(size).map_or(null_mut(), NonNull::as_ptr),
    }
}

/// Frees a pointer previously returned by this module. Null is a no-op.
///
/// # Safety
/// A non-null `ptr` must come from [`malloc`], [`calloc`] or [`realloc`] and
/// must not have been freed already.
pub unsafe fn free(ptr: *mut u8) {
    if with_caches(|router, caches| unsafe { router.deallocate(caches, ptr) }).is_none() {
        warn!(?ptr, "free after thread-cache teardown, returning to central pool");
        router().deallocate_direct(ptr);
    }
}

/// Allocates zeroed storage for `count` items of `size` bytes each.
/// Returns null on overflow of `count * size` or any [`malloc`] failure.
pub fn calloc(count: usize, size: usize) -> *mut u8 {
    with_caches(|router, caches| router.allocate_zeroed(caches, count, size))
        .flatten()
        .map_or(null_mut(), NonNull::as_ptr)
}

/// Resizes an allocation, malloc-style: null grows from nothing, size 0
/// frees, a size still fitting the block's class returns `ptr` unchanged,
/// anything else moves the payload. Returns null on failure with the
/// original block left intact.
///
/// # Safety
/// Same contract as [`free`] for non-null `ptr`.
pub unsafe fn realloc(ptr: *mut u8, new_size: usize) -> *mut u8 {
    with_caches(|router, caches| unsafe { router.reallocate(caches, ptr, new_size) })
        .flatten()
        .map_or(null_mut(), NonNull::as_ptr)
}
