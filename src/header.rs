//! The one-byte block header and associated constants and functions.

/// Size of the in-band header prepended to every allocation.
pub const HEADER_SIZE: usize = 1;

// The first byte of a block does double duty:
//
// * While the block is handed out to a caller, it holds the size-class index
//   of the pool that owns the block, so a free needs no size argument.
// * While the block sits on a free list, the same storage is the start of the
//   pointer-sized "next" link of that list (see [`crate::freelist`]).
//
// The two interpretations never overlap in time: a block is either in use or
// on exactly one free list. Reusing the byte like this is what forces every
// size class to be at least one pointer wide.

/// Writes `class` into the header byte of the block starting at `block`.
///
/// # Safety
/// `block` must point to the first byte of a live block that is not currently
/// threaded on any free list.
#[inline(always)]
pub unsafe fn stamp(block: *mut u8, class: u8) {
    block.write(class)
}

/// Reads the class index from the header byte preceding `user_ptr`.
///
/// # Safety
/// `user_ptr` must be a pointer previously produced by [`user_part`] for a
/// block that is still in use.
#[inline(always)]
pub unsafe fn class_of(user_ptr: *const u8) -> u8 {
    user_ptr.sub(HEADER_SIZE).read()
}

/// Returns the caller-visible part of a block: the byte just past the header.
///
/// # Safety
/// `block` must point to the first byte of a block of at least
/// `HEADER_SIZE + 1` bytes.
#[inline(always)]
pub unsafe fn user_part(block: *mut u8) -> *mut u8 {
    block.add(HEADER_SIZE)
}

/// Recovers the block start from a caller-visible pointer.
/// Inverse of [`user_part`].
///
/// # Safety
/// `user_ptr` must be a pointer previously produced by [`user_part`].
#[inline(always)]
pub unsafe fn block_start(user_ptr: *mut u8) -> *mut u8 {
    user_ptr.sub(HEADER_SIZE)
}
