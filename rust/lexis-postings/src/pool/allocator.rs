use lexis_budget_tracker::{MemoryTracker, Reservation};

/// Source of fixed-size blocks for the block pools.
///
/// Blocks handed out by `allocate_block` must be zero-filled: the slice
/// writer relies on unused bytes being zero to detect slice end markers.
pub trait BlockAllocator<T>: Send {
    fn allocate_block(&mut self, len: usize) -> Box<[T]>;

    fn release_block(&mut self, block: Box<[T]>);
}

/// Allocates every block from the heap and drops released blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectAllocator;

impl<T: Copy + Default + Send> BlockAllocator<T> for DirectAllocator {
    fn allocate_block(&mut self, len: usize) -> Box<[T]> {
        vec![T::default(); len].into_boxed_slice()
    }

    fn release_block(&mut self, _block: Box<[T]>) {}
}

/// Keeps up to `max_free` released blocks for reuse and, optionally, records
/// the bytes of every block it holds (in use or free) on a memory tracker.
pub struct RecyclingAllocator<T> {
    free: Vec<Box<[T]>>,
    max_free: usize,
    reservation: Option<Reservation>,
}

impl<T: Copy + Default + Send> RecyclingAllocator<T> {
    pub fn new(max_free: usize) -> Self {
        RecyclingAllocator {
            free: Vec::new(),
            max_free,
            reservation: None,
        }
    }

    /// Creates an allocator that reports its block memory to `tracker`.
    pub fn tracked(max_free: usize, tracker: &MemoryTracker) -> Self {
        RecyclingAllocator {
            free: Vec::new(),
            max_free,
            reservation: Some(tracker.reserve(0)),
        }
    }

    /// Number of released blocks currently kept for reuse.
    pub fn free_blocks(&self) -> usize {
        self.free.len()
    }

    /// Bytes recorded on the tracker, or `0` for an untracked allocator.
    pub fn bytes_tracked(&self) -> u64 {
        self.reservation.as_ref().map_or(0, Reservation::amount)
    }

    fn block_bytes(len: usize) -> u64 {
        (len * std::mem::size_of::<T>()) as u64
    }
}

impl<T: Copy + Default + Send> BlockAllocator<T> for RecyclingAllocator<T> {
    fn allocate_block(&mut self, len: usize) -> Box<[T]> {
        if let Some(pos) = self.free.iter().rposition(|block| block.len() == len) {
            return self.free.swap_remove(pos);
        }
        if let Some(reservation) = self.reservation.as_mut() {
            reservation.grow(Self::block_bytes(len));
        }
        vec![T::default(); len].into_boxed_slice()
    }

    fn release_block(&mut self, mut block: Box<[T]>) {
        if self.free.len() < self.max_free {
            block.fill(T::default());
            self.free.push(block);
        } else if let Some(reservation) = self.reservation.as_mut() {
            let amount = reservation.amount() - Self::block_bytes(block.len());
            reservation.resize(amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_allocator_zeroed() {
        let mut allocator = DirectAllocator;
        let block: Box<[u8]> = allocator.allocate_block(64);
        assert_eq!(block.len(), 64);
        assert!(block.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_recycling_reuses_and_zeroes() {
        let mut allocator = RecyclingAllocator::<u8>::new(1);
        let mut block = allocator.allocate_block(16);
        block[3] = 7;
        allocator.release_block(block);
        assert_eq!(allocator.free_blocks(), 1);

        let block = allocator.allocate_block(16);
        assert_eq!(allocator.free_blocks(), 0);
        assert!(block.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_recycling_tracks_memory() {
        let tracker = MemoryTracker::new();
        let mut allocator = RecyclingAllocator::<u32>::tracked(1, &tracker);
        let a = allocator.allocate_block(8);
        let b = allocator.allocate_block(8);
        assert_eq!(tracker.bytes_used(), 64);

        allocator.release_block(a);
        // One block is kept for reuse, the other goes back to the heap.
        allocator.release_block(b);
        assert_eq!(tracker.bytes_used(), 32);
        assert_eq!(allocator.bytes_tracked(), 32);

        drop(allocator);
        assert_eq!(tracker.bytes_used(), 0);
    }
}
