//! The term interner.
//!
//! [`BytesHash`] maps term byte sequences to dense [`TermId`]s. Keys are not
//! stored in the table: each id's text lives, length-prefixed, in a
//! [`ByteBlockPool`], and the table only keeps the id per slot together with
//! the slot's hash. Probing uses the hash supplied by the caller.

use std::cmp::Ordering;

use lexis_common::{Result, error::Error};

use crate::{TermId, pool::ByteBlockPool};

const EMPTY: u32 = u32::MAX;

/// Longest term the interner accepts: the text plus its two-byte length
/// prefix must fit one byte pool block.
pub const MAX_TERM_LENGTH: usize = crate::pool::BYTE_BLOCK_SIZE - 2;

/// Storage for the per-id text start offsets, owned by the interner.
///
/// The indexing stages back it with the [`PostingsTable`], so that the text
/// column grows in lock-step with the rest of the term metadata.
///
/// [`PostingsTable`]: crate::postings::PostingsTable
pub trait BytesStartArray {
    /// Allocates the initial capacity. Called before the first id is minted
    /// and again after every [`clear`](Self::clear).
    fn init(&mut self);

    /// Makes room for ids `0..count`.
    fn ensure(&mut self, count: usize);

    fn text_start(&self, id: TermId) -> usize;

    fn set_text_start(&mut self, id: TermId, start: usize);

    /// Drops every row. With `keep_capacity` the storage stays allocated
    /// for the next ids.
    fn clear(&mut self, keep_capacity: bool);
}

/// A plain growable text start column, for interners used on their own.
#[derive(Debug, Default)]
pub struct DirectBytesStartArray {
    starts: Vec<u32>,
}

impl BytesStartArray for DirectBytesStartArray {
    fn init(&mut self) {}

    fn ensure(&mut self, count: usize) {
        if self.starts.len() < count {
            self.starts.resize(count, 0);
        }
    }

    fn text_start(&self, id: TermId) -> usize {
        self.starts[id as usize] as usize
    }

    fn set_text_start(&mut self, id: TermId, start: usize) {
        self.starts[id as usize] = start as u32;
    }

    fn clear(&mut self, keep_capacity: bool) {
        self.starts.clear();
        if !keep_capacity {
            self.starts.shrink_to_fit();
        }
    }
}

/// Outcome of interning one term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interned {
    /// The term was not present; a fresh id was minted.
    New(TermId),
    Existing(TermId),
}

impl Interned {
    pub fn id(self) -> TermId {
        match self {
            Interned::New(id) | Interned::Existing(id) => id,
        }
    }

    pub fn is_new(self) -> bool {
        matches!(self, Interned::New(_))
    }
}

/// Open-addressing hash table from term bytes to [`TermId`].
///
/// Ids are assigned densely in insertion order. The slot array doubles once
/// half of it is occupied. After [`sort`](Self::sort) (or
/// [`compact`](Self::compact)) the slot array holds the ordered live ids and
/// the table must be cleared before new terms are added.
pub struct BytesHash<S: BytesStartArray> {
    /// Slot → id, `EMPTY` for a free slot.
    ids: Vec<u32>,
    /// Slot → hash of the id stored in the slot, reused when rehashing.
    hashes: Vec<u32>,
    count: usize,
    hash_mask: usize,
    initial_size: usize,
    compacted: bool,
    /// Whether `starts` holds its initial capacity.
    initialized: bool,
    starts: S,
}

impl<S: BytesStartArray> BytesHash<S> {
    /// Creates an interner with `initial_size` slots (a power of two).
    pub fn new(initial_size: usize, mut starts: S) -> BytesHash<S> {
        assert!(
            initial_size.is_power_of_two(),
            "interner size {initial_size} is not a power of two"
        );
        starts.init();
        BytesHash {
            ids: vec![EMPTY; initial_size],
            hashes: vec![0; initial_size],
            count: 0,
            hash_mask: initial_size - 1,
            initial_size,
            compacted: false,
            initialized: true,
            starts,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of slots in the table.
    pub fn slot_count(&self) -> usize {
        self.ids.len()
    }

    pub fn starts(&self) -> &S {
        &self.starts
    }

    pub fn starts_mut(&mut self) -> &mut S {
        &mut self.starts
    }

    /// Interns `bytes`, copying them into `pool` when the term is new.
    ///
    /// Fails with `AllocationExhausted` when the term cannot fit one pool
    /// block (longer than [`MAX_TERM_LENGTH`]); neither the table nor the
    /// pool are changed in that case.
    pub fn add(&mut self, pool: &mut ByteBlockPool, bytes: &[u8], hash: u32) -> Result<Interned> {
        self.verify_not_compacted("add")?;
        let slot = self.find_slot(|id, starts| term_at(pool, starts.text_start(id)) == bytes, hash);
        let id = self.ids[slot];
        if id != EMPTY {
            return Ok(Interned::Existing(id));
        }

        let prefix_len = if bytes.len() < 0x80 { 1 } else { 2 };
        if bytes.len() > MAX_TERM_LENGTH {
            return Err(Error::allocation_exhausted(
                bytes.len() + prefix_len,
                crate::pool::BYTE_BLOCK_SIZE,
            ));
        }
        let text_start = pool.allocate(prefix_len + bytes.len())?;
        if prefix_len == 1 {
            pool.write(text_start, &[bytes.len() as u8]);
        } else {
            pool.write(
                text_start,
                &[0x80 | (bytes.len() & 0x7f) as u8, (bytes.len() >> 7) as u8],
            );
        }
        pool.write(text_start + prefix_len, bytes);
        Ok(Interned::New(self.mint(slot, text_start, hash)))
    }

    /// Interns a term whose text already lives at `text_start` in the pool
    /// this interner shares with another one.
    ///
    /// Equal terms always share one text offset there, so the lookup compares
    /// offsets instead of bytes and nothing is copied.
    pub fn add_by_offset(&mut self, text_start: usize, hash: u32) -> Result<Interned> {
        self.verify_not_compacted("add_by_offset")?;
        let slot = self.find_slot(|id, starts| starts.text_start(id) == text_start, hash);
        let id = self.ids[slot];
        if id != EMPTY {
            return Ok(Interned::Existing(id));
        }
        Ok(Interned::New(self.mint(slot, text_start, hash)))
    }

    /// Looks up `bytes` without inserting.
    pub fn find(&self, pool: &ByteBlockPool, bytes: &[u8], hash: u32) -> Option<TermId> {
        if self.compacted {
            return None;
        }
        let slot = self.find_slot(|id, starts| term_at(pool, starts.text_start(id)) == bytes, hash);
        let id = self.ids[slot];
        (id != EMPTY).then_some(id)
    }

    /// Text of term `id`, read from `pool`.
    pub fn term<'p>(&self, pool: &'p ByteBlockPool, id: TermId) -> &'p [u8] {
        assert!((id as usize) < self.count, "term id {id} is not live");
        term_at(pool, self.starts.text_start(id))
    }

    /// Moves every live id to the front of the slot array, in slot order, and
    /// returns them. The table no longer accepts lookups or insertions until
    /// it is cleared.
    pub fn compact(&mut self) -> &[TermId] {
        if !self.compacted {
            let mut upto = 0;
            for slot in 0..self.ids.len() {
                if self.ids[slot] != EMPTY {
                    self.ids.swap(upto, slot);
                    upto += 1;
                }
            }
            debug_assert_eq!(upto, self.count);
            self.compacted = true;
        }
        &self.ids[..self.count]
    }

    /// Compacts the table and orders the live ids by their text, using the
    /// caller's comparator. Works in place on the slot array.
    pub fn sort<F>(&mut self, pool: &ByteBlockPool, mut compare: F) -> &[TermId]
    where
        F: FnMut(&[u8], &[u8]) -> Ordering,
    {
        self.compact();
        let starts = &self.starts;
        self.ids[..self.count].sort_unstable_by(|&a, &b| {
            compare(
                term_at(pool, starts.text_start(a)),
                term_at(pool, starts.text_start(b)),
            )
        });
        &self.ids[..self.count]
    }

    /// The live ids in the order established by the last
    /// [`sort`](Self::sort) or [`compact`](Self::compact).
    pub fn sorted_ids(&self) -> Option<&[TermId]> {
        self.compacted.then(|| &self.ids[..self.count])
    }

    /// Empties the table and drops every metadata row.
    ///
    /// With `keep_capacity` the slot array and the row storage keep their
    /// size; otherwise the slot array shrinks towards the number of terms the
    /// table just held and the rows are released.
    pub fn clear(&mut self, keep_capacity: bool) {
        let last_count = self.count;
        self.count = 0;
        self.compacted = false;
        self.starts.clear(keep_capacity);
        self.initialized = false;
        if !keep_capacity && self.shrink(last_count) {
            return;
        }
        self.ids.fill(EMPTY);
    }

    /// Restores the metadata rows' initial capacity after a
    /// [`clear`](Self::clear). A no-op when they are already allocated.
    pub fn reinit(&mut self) {
        if !self.initialized {
            self.starts.init();
            self.initialized = true;
        }
    }

    fn mint(&mut self, slot: usize, text_start: usize, hash: u32) -> TermId {
        self.reinit();
        let id = self.count as TermId;
        self.count += 1;
        self.starts.ensure(self.count);
        self.starts.set_text_start(id, text_start);
        self.ids[slot] = id;
        self.hashes[slot] = hash;
        if self.count == self.ids.len() / 2 {
            self.rehash(self.ids.len() * 2);
        }
        id
    }

    /// Returns the slot holding the matching id, or the empty slot where it
    /// would be inserted.
    #[inline]
    fn find_slot(&self, mut matches: impl FnMut(TermId, &S) -> bool, hash: u32) -> usize {
        let mut code = hash;
        let mut slot = code as usize & self.hash_mask;
        let inc = (code >> 8).wrapping_add(code) | 1;
        loop {
            let id = self.ids[slot];
            if id == EMPTY || (self.hashes[slot] == hash && matches(id, &self.starts)) {
                return slot;
            }
            code = code.wrapping_add(inc);
            slot = code as usize & self.hash_mask;
        }
    }

    fn rehash(&mut self, new_size: usize) {
        log::trace!(
            "rehashing interner from {} to {} slots ({} terms)",
            self.ids.len(),
            new_size,
            self.count
        );
        let new_mask = new_size - 1;
        let mut ids = vec![EMPTY; new_size];
        let mut hashes = vec![0u32; new_size];
        for (&id, &hash) in self.ids.iter().zip(self.hashes.iter()) {
            if id == EMPTY {
                continue;
            }
            let mut code = hash;
            let mut slot = code as usize & new_mask;
            let inc = (code >> 8).wrapping_add(code) | 1;
            while ids[slot] != EMPTY {
                code = code.wrapping_add(inc);
                slot = code as usize & new_mask;
            }
            ids[slot] = id;
            hashes[slot] = hash;
        }
        self.ids = ids;
        self.hashes = hashes;
        self.hash_mask = new_mask;
    }

    fn shrink(&mut self, target: usize) -> bool {
        let mut new_size = self.ids.len();
        while new_size >= 8 && new_size / 4 > target {
            new_size /= 2;
        }
        let new_size = new_size.max(self.initial_size);
        if new_size == self.ids.len() {
            return false;
        }
        self.ids = vec![EMPTY; new_size];
        self.hashes = vec![0; new_size];
        self.hash_mask = new_size - 1;
        true
    }

    fn verify_not_compacted(&self, operation: &str) -> Result<()> {
        if self.compacted {
            Err(Error::precondition(operation, "Compacted"))
        } else {
            Ok(())
        }
    }
}

impl<S: BytesStartArray> std::fmt::Debug for BytesHash<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BytesHash")
            .field("count", &self.count)
            .field("slots", &self.ids.len())
            .field("compacted", &self.compacted)
            .finish_non_exhaustive()
    }
}

/// Reads the length-prefixed term text stored at `start`.
pub(crate) fn term_at(pool: &ByteBlockPool, start: usize) -> &[u8] {
    let b0 = pool.byte(start);
    if b0 & 0x80 == 0 {
        pool.read(start + 1, b0 as usize)
    } else {
        let len = (b0 & 0x7f) as usize | (pool.byte(start + 1) as usize) << 7;
        pool.read(start + 2, len)
    }
}

#[cfg(test)]
mod tests {
    use lexis_common::error::ErrorKind;

    use super::*;
    use crate::attributes::hash_term;

    fn intern(
        hash: &mut BytesHash<DirectBytesStartArray>,
        pool: &mut ByteBlockPool,
        term: &[u8],
    ) -> Interned {
        hash.add(pool, term, hash_term(term)).unwrap()
    }

    #[test]
    fn test_add_and_lookup() {
        let mut pool = ByteBlockPool::default();
        let mut hash = BytesHash::new(4, DirectBytesStartArray::default());
        assert_eq!(intern(&mut hash, &mut pool, b"the"), Interned::New(0));
        assert_eq!(intern(&mut hash, &mut pool, b"quick"), Interned::New(1));
        assert_eq!(intern(&mut hash, &mut pool, b"the"), Interned::Existing(0));
        assert_eq!(hash.len(), 2);
        assert_eq!(hash.term(&pool, 1), b"quick");
        assert_eq!(hash.find(&pool, b"quick", hash_term(b"quick")), Some(1));
        assert_eq!(hash.find(&pool, b"fox", hash_term(b"fox")), None);
    }

    #[test]
    fn test_colliding_hashes() {
        let mut pool = ByteBlockPool::default();
        let mut hash = BytesHash::new(4, DirectBytesStartArray::default());
        for i in 0..50u32 {
            let term = format!("term{i}");
            assert_eq!(hash.add(&mut pool, term.as_bytes(), 7).unwrap(), Interned::New(i));
        }
        for i in 0..50u32 {
            let term = format!("term{i}");
            assert_eq!(
                hash.add(&mut pool, term.as_bytes(), 7).unwrap(),
                Interned::Existing(i)
            );
        }
    }

    #[test]
    fn test_rehash_keeps_ids() {
        let mut pool = ByteBlockPool::default();
        let mut hash = BytesHash::new(4, DirectBytesStartArray::default());
        for i in 0..1000u32 {
            intern(&mut hash, &mut pool, &i.to_le_bytes());
        }
        assert!(hash.slot_count() >= 2048);
        for i in 0..1000u32 {
            assert_eq!(intern(&mut hash, &mut pool, &i.to_le_bytes()), Interned::Existing(i));
            assert_eq!(hash.term(&pool, i), i.to_le_bytes());
        }
    }

    #[test]
    fn test_long_terms() {
        let mut pool = ByteBlockPool::default();
        let mut hash = BytesHash::new(4, DirectBytesStartArray::default());
        let long = vec![b'a'; 300];
        let max = vec![b'b'; MAX_TERM_LENGTH];
        let id = intern(&mut hash, &mut pool, &long).id();
        let max_id = intern(&mut hash, &mut pool, &max).id();
        assert_eq!(hash.term(&pool, id), &long[..]);
        assert_eq!(hash.term(&pool, max_id).len(), MAX_TERM_LENGTH);

        let too_long = vec![b'c'; MAX_TERM_LENGTH + 1];
        let err = hash.add(&mut pool, &too_long, hash_term(&too_long)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::AllocationExhausted { .. }));
        assert_eq!(hash.len(), 2);
    }

    #[test]
    fn test_sort() {
        let mut pool = ByteBlockPool::default();
        let mut hash = BytesHash::new(4, DirectBytesStartArray::default());
        for term in ["pear", "apple", "fig", "banana"] {
            intern(&mut hash, &mut pool, term.as_bytes());
        }
        let sorted = hash.sort(&pool, |a, b| a.cmp(b)).to_vec();
        let terms = sorted.iter().map(|&id| hash.term(&pool, id)).collect::<Vec<_>>();
        assert_eq!(terms, [
            b"apple".as_slice(),
            b"banana".as_slice(),
            b"fig".as_slice(),
            b"pear".as_slice()
        ]);
        assert_eq!(hash.sorted_ids(), Some(&sorted[..]));

        let err = hash.add(&mut pool, b"kiwi", hash_term(b"kiwi")).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::PreconditionViolation { .. }));

        hash.clear(true);
        assert!(hash.sorted_ids().is_none());
        assert_eq!(intern(&mut hash, &mut pool, b"kiwi"), Interned::New(0));
    }

    #[test]
    fn test_add_by_offset() {
        let mut pool = ByteBlockPool::default();
        let mut primary = BytesHash::new(4, DirectBytesStartArray::default());
        let mut secondary = BytesHash::new(4, DirectBytesStartArray::default());
        for term in ["b", "a", "b", "c"].map(str::as_bytes) {
            let hash = hash_term(term);
            let id = primary.add(&mut pool, term, hash).unwrap().id();
            let start = primary.starts().text_start(id);
            secondary.add_by_offset(start, hash).unwrap();
        }
        assert_eq!(secondary.len(), 3);
        assert_eq!(secondary.term(&pool, 0), b"b");
        assert_eq!(secondary.term(&pool, 2), b"c");
    }

    #[test]
    fn test_clear_shrinks() {
        let mut pool = ByteBlockPool::default();
        let mut hash = BytesHash::new(4, DirectBytesStartArray::default());
        for i in 0..500u32 {
            intern(&mut hash, &mut pool, &i.to_be_bytes());
        }
        let slots = hash.slot_count();
        hash.clear(true);
        assert_eq!(hash.slot_count(), slots);
        assert!(hash.is_empty());

        intern(&mut hash, &mut pool, b"x");
        hash.clear(false);
        assert!(hash.slot_count() < slots);
        assert!(hash.slot_count() >= 4);
        assert_eq!(hash.find(&pool, b"x", hash_term(b"x")), None);
    }
}
