//! A size-segregated, thread-caching slab allocator for small objects.
//!
//! This crate serves allocations of 1 to 511 bytes out of fixed-width block
//! pools, with a per-thread cache in front of them so that the vast majority
//! of calls never touch a lock. It is meant for workloads that churn through
//! large numbers of small, short-lived objects, where a general-purpose
//! allocator spends most of its time on locking and size dispatch. Anything
//! larger than 511 bytes is refused; callers route those to the system
//! allocator themselves.
//!
//! # Usage
//! The simplest entry point is the process-wide instance:
//! ```no_run
//! let p = magalloc::malloc(48);
//! assert!(!p.is_null());
//! unsafe { magalloc::free(p) };
//! ```
//!
//! Embedders that want their own instance, or a different chunk source, can
//! build a [`PoolRouter`] over any [`chunks::ChunkProvider`] and hand each
//! thread a [`cache::CacheSet`]:
//! ```no_run
//! use magalloc::{cache::CacheSet, chunks::MmapProvider, PoolRouter};
//!
//! let router = PoolRouter::new(MmapProvider);
//! let mut caches = CacheSet::new();
//! let p = router.allocate(&mut caches, 100).unwrap();
//! unsafe { router.deallocate(&mut caches, p.as_ptr()) };
//! ```
//!
//! # Mode of operation
//! Three layers cooperate on every allocation:
//!
//! ## Size classes
//! Requests are rounded up to one of fourteen block widths between 8 and 512
//! bytes (see [`classes::CLASS_SIZES`]). A 513-entry table maps any request
//! size to its class in one indexed load, so there is no size search at
//! allocation time.
//!
//! ## Blocks, headers and chunks
//! Each class is backed by a [`SlabPool`] that acquires 64 KiB chunks from
//! the operating system and carves them into blocks of that class's width.
//! The first byte of every block is a header: while the block is in use it
//! holds the class index, which is how [`free`] works without a size
//! argument, and while the block is free that same storage becomes the start
//! of an intrusive free-list link. The caller sees the bytes after the
//! header, which is why the largest request is 511 rather than 512.
//!
//! ## Thread caches and batch transfer
//! Every thread keeps a small stack of free blocks per class. Allocation
//! pops from it and deallocation pushes onto it with no atomics involved.
//! Only when a cache runs dry is a batch of 64 blocks pulled from the
//! central pool under that class's mutex, and only when a cache grows past
//! 128 blocks is a batch pushed back. One lock acquisition is thereby
//! amortized over 64 fast-path operations, and per-thread memory is bounded
//! per class. Caches flush themselves back to the pools when their thread
//! exits.
//!
//! Chunks are never returned to the operating system while the allocator is
//! alive; they are all released together when it is dropped.
//!
//! [`free`]: crate::free

pub use crate::allocators::PoolRouter;
pub use crate::allocators::SlabPool;
pub use crate::global::{calloc, free, malloc, realloc};

pub mod allocators;
pub mod cache;
pub mod chunks;
pub mod classes;
mod freelist;
mod global;
pub mod header;
