//! A single-size-class memory pool carved out of OS-backed chunks.

use core::fmt::{self, Debug};
use core::mem::size_of;
use core::ptr::{null_mut, NonNull};

use static_assertions::const_assert;
use tracing::{debug, instrument, Level};

use crate::chunks::{ChunkProvider, CHUNK_SIZE};
use crate::freelist::{FreeStack, NODE_ALIGN, NODE_SIZE};

/// Link written over the first bytes of every chunk, stitching all of a
/// pool's chunks into a list so teardown can walk and release them.
#[repr(C)]
struct ChunkLink {
    next: *mut ChunkLink,
}

/// Bytes at the start of each chunk consumed by the chunk link.
pub const CHUNK_HEADER_SIZE: usize = size_of::<ChunkLink>();

const_assert!(CHUNK_SIZE > CHUNK_HEADER_SIZE + NODE_SIZE);
const_assert!(CHUNK_HEADER_SIZE % NODE_ALIGN == 0);

/// A growable pool of equally-sized blocks.
///
/// The pool owns a central free list threaded through the blocks themselves
/// and a list of every chunk it ever acquired. It hands blocks out and takes
/// them back with no locking of its own; the router wraps each pool in a
/// per-class mutex and is the only caller on the shared path.
///
/// Blocks live exactly as long as their chunk: chunks are acquired on demand,
/// never returned mid-lifetime, and all released together when the pool is
/// dropped. Dropping the pool while callers still hold blocks from it is a
/// caller bug.
pub struct SlabPool<P: ChunkProvider> {
    free: FreeStack,
    chunks: *mut ChunkLink,
    block_size: usize,
    provider: P,
}

// The pool exclusively owns every chunk and block behind its raw pointers.
unsafe impl<P: ChunkProvider + Send> Send for SlabPool<P> {}

impl<P: ChunkProvider> SlabPool<P> {
    /// Creates a pool for blocks of `block_size` bytes, drawing chunks from
    /// `provider`.
    ///
    /// The pool grows once right away so the first allocation is served from
    /// the free list. If that initial growth fails it is retried on the first
    /// allocation instead.
    ///
    /// # Panics
    /// Panics if `block_size` cannot hold a free-list link; the size-class
    /// table guarantees this for every class.
    pub fn new(block_size: usize, provider: P) -> Self {
        assert!(block_size >= NODE_SIZE && block_size % NODE_ALIGN == 0);
        let mut pool = SlabPool {
            free: FreeStack::new(),
            chunks: null_mut(),
            block_size,
            provider,
        };
        let _ = pool.grow();
        pool
    }

    /// Width of the blocks this pool hands out.
    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks carved out of each chunk.
    #[inline]
    pub fn blocks_per_chunk(&self) -> usize {
        (CHUNK_SIZE - CHUNK_HEADER_SIZE) / self.block_size
    }

    /// Pops one block off the free list, growing the pool if it is empty.
    /// Returns `None` only if the chunk provider refuses to grow.
    pub fn allocate(&mut self) -> Option<NonNull<u8>> {
        if self.free.is_empty() {
            self.grow().ok()?;
        }
        self.free.pop().map(NonNull::cast)
    }

    /// Pushes a block back onto the free list. Null is a no-op.
    ///
    /// # Safety
    /// A non-null `block` must be the start of a block this pool handed out
    /// and that is not currently on any list.
    pub unsafe fn deallocate(&mut self, block: *mut u8) {
        if block.is_null() {
            return;
        }
        debug_assert_eq!(block as usize % NODE_ALIGN, 0);
        self.free.push(block.cast());
    }

    /// Acquires one chunk, links it into the chunk list and carves it into
    /// blocks on the free list. On provider refusal the pool is left exactly
    /// as it was.
    #[instrument(level = "debug", err(Debug, level = Level::DEBUG))]
    fn grow(&mut self) -> Result<(), ()> {
        let chunk = self.provider.acquire(CHUNK_SIZE).ok_or(())?.as_ptr();

        unsafe {
            let link: *mut ChunkLink = chunk.cast();
            (*link).next = self.chunks;
            self.chunks = link;

            let blocks = self.blocks_per_chunk();
            let mut block = chunk.add(CHUNK_HEADER_SIZE);
            for _ in 0..blocks {
                self.free.push(block.cast());
                block = block.add(self.block_size);
            }
            debug!(blocks, "carved a fresh chunk");
        }
        Ok(())
    }
}

impl<P: ChunkProvider> Drop for SlabPool<P> {
    fn drop(&mut self) {
        let mut chunk = self.chunks;
        while !chunk.is_null() {
            let next = unsafe { (*chunk).next };
            unsafe {
                self.provider.release(NonNull::new_unchecked(chunk.cast()), CHUNK_SIZE);
            }
            chunk = next;
        }
    }
}

impl<P: ChunkProvider> Debug for SlabPool<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlabPool")
            .field("block_size", &self.block_size)
            .finish_non_exhaustive()
    }
}
