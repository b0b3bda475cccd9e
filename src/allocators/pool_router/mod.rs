//! The size-class router and the batch refill/flush protocol.

use core::fmt::{self, Debug};
use core::ptr::{self, NonNull};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use tracing::{debug, error, instrument};

use crate::allocators::SlabPool;
use crate::cache::{CacheSet, ThreadCache};
use crate::chunks::ChunkProvider;
use crate::classes::{block_size, SizeLookup, CLASS_COUNT, CLASS_SIZES, MAX_ALLOC_SIZE};
use crate::header::{self, HEADER_SIZE};

/// Blocks moved between a thread cache and its central pool per mutex
/// acquisition. One lock round-trip is amortized over this many fast-path
/// operations.
pub const BATCH_SIZE: usize = 64;

/// Cache size at which a deallocation triggers a flush back to the central
/// pool. The flush leaves [`BATCH_SIZE`] blocks behind, so per-thread
/// per-class residency stays bounded by `HIGH_WATER_MARK - 1`.
pub const HIGH_WATER_MARK: usize = 2 * BATCH_SIZE;

/// Routes requests to one of fourteen slab pools by size, and stamps each
/// block so the free side needs no size at all.
///
/// The pools are stored inline, each behind its own cache-line-padded mutex;
/// there is no lock shared across classes. Threads rarely touch those
/// mutexes: the fast paths run entirely against the calling thread's
/// [`CacheSet`], and the pools are only visited to move whole batches.
///
/// Every operation takes the calling thread's `&mut CacheSet` explicitly.
/// The process-wide surface (`malloc` and friends) binds one set per thread
/// over thread-local storage; tests drive routers with plain local sets.
pub struct PoolRouter<P: ChunkProvider> {
    pools: [CachePadded<Mutex<SlabPool<P>>>; CLASS_COUNT],
    lookup: SizeLookup,
}

impl<P: ChunkProvider> PoolRouter<P> {
    /// Creates the router and all fourteen pools, each drawing chunks from a
    /// clone of `provider`. Every pool pre-acquires its first chunk here.
    pub fn new(provider: P) -> Self
    where
        P: Clone,
    {
        PoolRouter {
            pools: core::array::from_fn(|class| {
                CachePadded::new(Mutex::new(SlabPool::new(CLASS_SIZES[class], provider.clone())))
            }),
            lookup: SizeLookup::new(),
        }
    }

    /// Allocates at least `size` writable bytes, or `None` if `size` is 0,
    /// exceeds [`crate::classes::MAX_ALLOC_SIZE`], or the OS refuses memory.
    ///
    /// The returned pointer is one byte past the block's header; passing it
    /// to [`deallocate`](Self::deallocate) frees the block.
    pub fn allocate(&self, caches: &mut CacheSet, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || size > MAX_ALLOC_SIZE {
            return None;
        }

        let class = self.lookup.class_for(size + HEADER_SIZE);
        let cache = caches.class_mut(class);

        let block = match cache.pop() {
            Some(block) => block,
            None => {
                // Empty cache is not a failure yet: refill once and retry.
                self.refill(cache, class);
                cache.pop()?
            }
        };

        unsafe {
            header::stamp(block.as_ptr(), class as u8);
            Some(NonNull::new_unchecked(header::user_part(block.as_ptr())))
        }
    }

    /// Returns a block to the calling thread's cache, flushing a batch to the
    /// central pool if the cache hits its high-water mark. Null is a no-op.
    ///
    /// A block freed on a different thread than the one that allocated it
    /// simply lands on the freeing thread's cache.
    ///
    /// # Safety
    /// A non-null `ptr` must have come from an allocation method of this
    /// router and not have been freed since.
    pub unsafe fn deallocate(&self, caches: &mut CacheSet, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }

        let class = header::class_of(ptr) as usize;
        if class >= CLASS_COUNT {
            // Header corruption, most likely a double free or a buffer
            // underrun in the caller. The block is dropped, not trusted.
            error!(class, ?ptr, "header byte out of range on free, leaking block");
            return;
        }

        let cache = caches.class_mut(class);
        cache.push(NonNull::new_unchecked(header::block_start(ptr)));

        if cache.len() >= HIGH_WATER_MARK {
            self.flush(cache, class);
        }
    }

    /// Allocates zeroed memory for `count` items of `size` bytes each.
    /// Fails on multiplication overflow or any [`allocate`](Self::allocate)
    /// failure.
    pub fn allocate_zeroed(&self, caches: &mut CacheSet, count: usize, size: usize) -> Option<NonNull<u8>> {
        let total = count.checked_mul(size)?;
        let ptr = self.allocate(caches, total)?;
        // Recycled blocks carry old payloads; always clear.
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, total) };
        Some(ptr)
    }

    /// Resizes an allocation to `new_size` bytes.
    ///
    /// A null `ptr` behaves like [`allocate`](Self::allocate); `new_size` of
    /// 0 frees and returns `None`. If the new size stays within the block's
    /// class the same pointer is returned; otherwise the payload moves to a
    /// freshly allocated block. On failure the original block is untouched.
    ///
    /// # Safety
    /// Same contract as [`deallocate`](Self::deallocate) for non-null `ptr`.
    pub unsafe fn reallocate(
        &self,
        caches: &mut CacheSet,
        ptr: *mut u8,
        new_size: usize,
    ) -> Option<NonNull<u8>> {
        if ptr.is_null() {
            return self.allocate(caches, new_size);
        }
        if new_size == 0 {
            self.deallocate(caches, ptr);
            return None;
        }
        if new_size > MAX_ALLOC_SIZE {
            return None;
        }

        let class = header::class_of(ptr) as usize;
        if class >= CLASS_COUNT {
            error!(class, ?ptr, "header byte out of range on realloc");
            return None;
        }

        if self.lookup.class_for(new_size + HEADER_SIZE) == class {
            return NonNull::new(ptr);
        }

        let new_ptr = self.allocate(caches, new_size)?;
        let old_payload = block_size(class) - HEADER_SIZE;
        ptr::copy_nonoverlapping(ptr, new_ptr.as_ptr(), old_payload.min(new_size));
        self.deallocate(caches, ptr);
        Some(new_ptr)
    }

    /// Pulls up to [`BATCH_SIZE`] blocks from the central pool into `cache`
    /// under the class mutex. Stops early if the pool cannot grow; the cache
    /// keeps whatever was gathered, possibly nothing.
    #[instrument(level = "debug", skip(self))]
    fn refill(&self, cache: &mut ThreadCache, class: usize) {
        let mut pool = self.pools[class].lock();
        for _ in 0..BATCH_SIZE {
            match pool.allocate() {
                Some(block) => unsafe { cache.push(block) },
                None => break,
            }
        }
        debug!(gathered = cache.len(), "refilled thread cache");
    }

    /// Keeps the newest [`BATCH_SIZE`] blocks on `cache` and returns the rest
    /// to the central pool under the class mutex.
    #[instrument(level = "debug", skip(self))]
    fn flush(&self, cache: &mut ThreadCache, class: usize) {
        let mut pool = self.pools[class].lock();
        let mut tail = cache.split_off(BATCH_SIZE);
        while let Some(block) = tail.pop() {
            unsafe { pool.deallocate(block.cast().as_ptr()) };
        }
    }

    /// Returns every cached block in `caches` to its central pool. Called
    /// when a thread retires its cache set so no blocks are stranded.
    pub fn flush_all(&self, caches: &mut CacheSet) {
        for class in 0..CLASS_COUNT {
            let cache = caches.class_mut(class);
            if cache.is_empty() {
                continue;
            }
            let mut pool = self.pools[class].lock();
            let mut list = cache.split_off(0);
            while let Some(block) = list.pop() {
                unsafe { pool.deallocate(block.cast().as_ptr()) };
            }
        }
    }

    /// Allocates straight from the central pool, bypassing every cache.
    /// Same failure cases as [`allocate`](Self::allocate); used when the
    /// calling thread no longer has a cache set to work with.
    pub fn allocate_direct(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 || size > MAX_ALLOC_SIZE {
            return None;
        }

        let class = self.lookup.class_for(size + HEADER_SIZE);
        let block = self.pools[class].lock().allocate()?;
        unsafe {
            header::stamp(block.as_ptr(), class as u8);
            Some(NonNull::new_unchecked(header::user_part(block.as_ptr())))
        }
    }

    /// Returns a block straight to its central pool, bypassing every cache.
    ///
    /// # Safety
    /// Same contract as [`deallocate`](Self::deallocate).
    pub unsafe fn deallocate_direct(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        let class = header::class_of(ptr) as usize;
        if class >= CLASS_COUNT {
            error!(class, ?ptr, "header byte out of range on free, leaking block");
            return;
        }
        self.pools[class].lock().deallocate(header::block_start(ptr));
    }
}

impl<P: ChunkProvider> Debug for PoolRouter<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRouter")
            .field("classes", &CLASS_COUNT)
            .finish_non_exhaustive()
    }
}
