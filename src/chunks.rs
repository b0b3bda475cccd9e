//! [`ChunkProvider`] trait and structures that implement it.
//!
//! The [`ChunkProvider`] trait is the allocator's only seam to the operating
//! system: everything above it deals in chunks it has already been handed.
//! Swapping the provider swaps the backing memory without touching any pool
//! logic, which is also how the test suite runs the pools over plain buffers.

use core::ptr::{null_mut, NonNull};

use tracing::error;

/// Size of every region requested from the provider.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// A source of large, independently-releasable memory regions.
///
/// # Safety
/// Implementors must hand out regions that are writable for their full
/// `size`, aligned at least to pointer width, zero-filled on first acquire,
/// and disjoint from every other live region. `acquire` and `release` must be
/// callable from any thread.
pub unsafe trait ChunkProvider {
    /// Acquires a writable region of exactly `size` bytes, or `None` if the
    /// underlying source refuses.
    fn acquire(&self, size: usize) -> Option<NonNull<u8>>;

    /// Returns a region to the source.
    ///
    /// # Safety
    /// `ptr` must come from `acquire` on this same provider, `size` must be
    /// the size it was acquired with, and the region must not be used again.
    unsafe fn release(&self, ptr: NonNull<u8>, size: usize);
}

/// The production provider: anonymous private mappings from the kernel.
///
/// Each chunk is its own mapping, so chunks are page-aligned, zero-filled
/// and releasable one by one.
#[derive(Clone, Copy, Debug, Default)]
pub struct MmapProvider;

unsafe impl ChunkProvider for MmapProvider {
    fn acquire(&self, size: usize) -> Option<NonNull<u8>> {
        let ptr = unsafe {
            libc::mmap(
                null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            error!(size, "mmap refused to back a chunk");
            return None;
        }
        NonNull::new(ptr.cast())
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
        if libc::munmap(ptr.as_ptr().cast(), size) != 0 {
            error!(?ptr, size, "munmap failed");
        }
    }
}

unsafe impl<P: ChunkProvider + ?Sized> ChunkProvider for &P {
    fn acquire(&self, size: usize) -> Option<NonNull<u8>> {
        (*self).acquire(size)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
        (*self).release(ptr, size)
    }
}
