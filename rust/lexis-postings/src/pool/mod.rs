//! Fixed-size block arenas addressed by monotonically growing integer offsets.
//!
//! Two pools back every indexing stage:
//!
//! - [`IntBlockPool`] holds per-term stream cursors (absolute write positions
//!   into the byte pool).
//! - [`ByteBlockPool`] holds interned term text and the chained slices that
//!   carry each term's posting streams.
//!
//! A global offset splits into a block index and an in-block offset with a
//! fixed shift/mask. Offsets handed out are never invalidated by later
//! allocations; memory is reclaimed only by resetting the whole pool.

mod allocator;
mod byte_pool;
mod int_pool;
mod levels;
mod slice_reader;

pub use allocator::{BlockAllocator, DirectAllocator, RecyclingAllocator};
pub use byte_pool::ByteBlockPool;
pub use int_pool::IntBlockPool;
pub use levels::SliceLevels;
pub use slice_reader::ByteSliceReader;

pub const BYTE_BLOCK_SHIFT: usize = 15;
pub const BYTE_BLOCK_SIZE: usize = 1 << BYTE_BLOCK_SHIFT;
pub const BYTE_BLOCK_MASK: usize = BYTE_BLOCK_SIZE - 1;

pub const INT_BLOCK_SHIFT: usize = 13;
pub const INT_BLOCK_SIZE: usize = 1 << INT_BLOCK_SHIFT;
pub const INT_BLOCK_MASK: usize = INT_BLOCK_SIZE - 1;

/// Upper bound on the number of blocks a pool may hold. Global offsets are
/// stored as `u32` in the int pool and in slice forwarding addresses.
pub(crate) const MAX_BYTE_BLOCKS: usize = (u32::MAX as usize + 1) >> BYTE_BLOCK_SHIFT;
pub(crate) const MAX_INT_BLOCKS: usize = (u32::MAX as usize + 1) >> INT_BLOCK_SHIFT;
