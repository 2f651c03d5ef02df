use lexis_common::{Result, verify_arg};

use super::BYTE_BLOCK_SIZE;

/// Default slice sizes: short posting streams (the common case) start in a
/// 5-byte slice, long ones grow through progressively larger slices.
pub const DEFAULT_LEVEL_SIZES: [usize; 10] = [5, 14, 20, 30, 40, 40, 80, 80, 120, 200];

/// Every slice ends with a marker byte `LEVEL_MARKER | level`; the level is
/// kept in the low four bits.
pub(crate) const LEVEL_MARKER: u8 = 16;
pub(crate) const MAX_LEVELS: usize = 16;

/// Smallest usable slice: a forwarding address (4 bytes) plus one data byte.
pub(crate) const MIN_SLICE_SIZE: usize = 5;

/// The geometric table of slice sizes used by the slice stream writer.
///
/// Level `i` slices are `size(i)` bytes long; when a level `i` slice fills up,
/// the next slice is allocated at level `min(i + 1, len - 1)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceLevels {
    sizes: Vec<usize>,
}

impl SliceLevels {
    /// Creates a custom level table.
    ///
    /// The table must contain between 1 and 16 levels, and every size must be
    /// in `5..=BYTE_BLOCK_SIZE`.
    pub fn new(sizes: &[usize]) -> Result<SliceLevels> {
        verify_arg!(sizes, !sizes.is_empty() && sizes.len() <= MAX_LEVELS);
        verify_arg!(
            sizes,
            sizes
                .iter()
                .all(|&size| (MIN_SLICE_SIZE..=BYTE_BLOCK_SIZE).contains(&size))
        );
        Ok(SliceLevels {
            sizes: sizes.to_vec(),
        })
    }

    #[inline]
    pub fn size(&self, level: usize) -> usize {
        self.sizes[level]
    }

    #[inline]
    pub fn next_level(&self, level: usize) -> usize {
        (level + 1).min(self.sizes.len() - 1)
    }

    #[inline]
    pub fn first_size(&self) -> usize {
        self.sizes[0]
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    #[inline]
    pub(crate) fn marker(level: usize) -> u8 {
        LEVEL_MARKER | level as u8
    }

    #[inline]
    pub(crate) fn level_of(marker: u8) -> usize {
        (marker & 0x0f) as usize
    }
}

impl Default for SliceLevels {
    fn default() -> Self {
        SliceLevels {
            sizes: DEFAULT_LEVEL_SIZES.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_levels() {
        let levels = SliceLevels::default();
        assert_eq!(levels.len(), 10);
        assert_eq!(levels.first_size(), 5);
        assert_eq!(levels.next_level(0), 1);
        assert_eq!(levels.next_level(9), 9);
        assert_eq!(levels.size(levels.next_level(9)), 200);
    }

    #[test]
    fn test_invalid_levels() {
        assert!(SliceLevels::new(&[]).is_err());
        assert!(SliceLevels::new(&[4, 10]).is_err());
        assert!(SliceLevels::new(&[5, BYTE_BLOCK_SIZE + 1]).is_err());
        assert!(SliceLevels::new(&[5; 17]).is_err());
        assert!(SliceLevels::new(&[5; 16]).is_ok());
    }

    #[test]
    fn test_markers() {
        for level in 0..MAX_LEVELS {
            let marker = SliceLevels::marker(level);
            assert_ne!(marker, 0);
            assert_eq!(SliceLevels::level_of(marker), level);
        }
    }
}
