use lexis_common::{Result, verify_arg};

use crate::pool::{BYTE_BLOCK_SIZE, SliceLevels};

/// Tuning knobs shared by every stage of a field pipeline.
#[derive(Debug, Clone)]
pub struct TermsHashConfig {
    /// Interner slot count at first use. Must be a power of two.
    pub initial_hash_size: usize,
    /// Geometric table of slice sizes used by the stream writer.
    pub slice_levels: SliceLevels,
    /// Arena volume (bytes) above which the pipeline reports that the
    /// in-memory segment should be flushed.
    pub flush_threshold_bytes: u64,
    /// Whether `reset` keeps the first block of every pool (zero-filled) for
    /// the next document instead of releasing all blocks.
    pub reuse_blocks_on_reset: bool,
    /// Number of released blocks each pool keeps for reuse.
    pub max_recycled_blocks: usize,
}

impl TermsHashConfig {
    pub const DEFAULT_INITIAL_HASH_SIZE: usize = 4;
    pub const DEFAULT_FLUSH_THRESHOLD_BYTES: u64 = 1 << 30;
    pub const DEFAULT_MAX_RECYCLED_BLOCKS: usize = 4;

    pub fn validate(&self) -> Result<()> {
        verify_arg!(
            initial_hash_size,
            self.initial_hash_size.is_power_of_two() && self.initial_hash_size >= 2
        );
        verify_arg!(
            flush_threshold_bytes,
            self.flush_threshold_bytes >= BYTE_BLOCK_SIZE as u64
        );
        Ok(())
    }

    pub fn with_initial_hash_size(mut self, size: usize) -> Self {
        self.initial_hash_size = size;
        self
    }

    pub fn with_slice_levels(mut self, levels: SliceLevels) -> Self {
        self.slice_levels = levels;
        self
    }

    pub fn with_flush_threshold_bytes(mut self, bytes: u64) -> Self {
        self.flush_threshold_bytes = bytes;
        self
    }

    pub fn with_reuse_blocks_on_reset(mut self, reuse: bool) -> Self {
        self.reuse_blocks_on_reset = reuse;
        self
    }
}

impl Default for TermsHashConfig {
    fn default() -> Self {
        TermsHashConfig {
            initial_hash_size: Self::DEFAULT_INITIAL_HASH_SIZE,
            slice_levels: SliceLevels::default(),
            flush_threshold_bytes: Self::DEFAULT_FLUSH_THRESHOLD_BYTES,
            reuse_blocks_on_reset: true,
            max_recycled_blocks: Self::DEFAULT_MAX_RECYCLED_BLOCKS,
        }
    }
}
