//! The [`SlabPool`] and [`PoolRouter`] allocator layers.

pub mod pool_router;
pub mod slab_pool;

pub use pool_router::PoolRouter;
pub use slab_pool::SlabPool;
