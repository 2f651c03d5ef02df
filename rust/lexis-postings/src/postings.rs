//! The per-term metadata table.
//!
//! One row per live [`TermId`](crate::TermId), stored as parallel columns.
//! The three columns every stage needs (text, stream cursor and stream slice
//! starts) live in [`PostingsTable`]; consumers add their own columns through
//! a [`PostingsArray`].

use lexis_budget_tracker::{MemoryTracker, Reservation};

use crate::bytes_hash::BytesStartArray;

/// Consumer-specific columns of the metadata table.
///
/// The table resizes the consumer's columns together with its own, so every
/// column always has exactly the table's capacity.
pub trait PostingsArray: Send + 'static {
    /// Bytes one row occupies across these columns.
    fn bytes_per_posting(&self) -> usize;

    /// Resizes every column to exactly `capacity` rows. New rows are
    /// zero-initialized; resizing to zero releases the column memory.
    fn resize(&mut self, capacity: usize);
}

/// A stage whose consumer keeps no per-term state of its own.
impl PostingsArray for () {
    fn bytes_per_posting(&self) -> usize {
        0
    }

    fn resize(&mut self, _capacity: usize) {}
}

/// Resizes one column the way [`PostingsArray::resize`] expects.
pub fn resize_column<T: Copy + Default>(column: &mut Vec<T>, capacity: usize) {
    column.resize(capacity, T::default());
    if capacity == 0 {
        column.shrink_to_fit();
    }
}

/// Columns shared by every stage: three `u32` offsets and the announced flag.
const BASE_BYTES_PER_POSTING: usize = 3 * std::mem::size_of::<u32>() + 1;

/// Parallel arrays holding one metadata row per term id, plus the
/// consumer-specific columns `A`.
///
/// The table records `capacity × bytes_per_posting` on the memory tracker it
/// was created with and keeps that figure current across growth and release.
pub struct PostingsTable<A: PostingsArray> {
    capacity: usize,
    /// Byte pool offset of each term's length-prefixed text.
    text_starts: Vec<u32>,
    /// Int pool offset of each term's stream cursors.
    int_starts: Vec<u32>,
    /// Byte pool offset of each term's first slice (stream 0).
    byte_starts: Vec<u32>,
    /// Whether the consumer has received `new_term` for the row's term.
    announced: Vec<bool>,
    extra: A,
    reservation: Reservation,
}

impl<A: PostingsArray> PostingsTable<A> {
    /// Capacity allocated when the table is (re)initialized.
    pub const INITIAL_CAPACITY: usize = 2;

    /// Creates an empty table with zero capacity. The consumer's columns are
    /// sized together with the table's own from the first `init` on.
    pub fn new(mut extra: A, memory: &MemoryTracker) -> PostingsTable<A> {
        extra.resize(0);
        PostingsTable {
            capacity: 0,
            text_starts: Vec::new(),
            int_starts: Vec::new(),
            byte_starts: Vec::new(),
            announced: Vec::new(),
            extra,
            reservation: memory.reserve(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn bytes_per_posting(&self) -> usize {
        BASE_BYTES_PER_POSTING + self.extra.bytes_per_posting()
    }

    /// Bytes currently recorded on the memory tracker for this table.
    pub fn reserved_bytes(&self) -> u64 {
        self.reservation.amount()
    }

    /// Grows the table so that rows `0..min_capacity` exist.
    pub fn ensure_capacity(&mut self, min_capacity: usize) {
        if min_capacity <= self.capacity {
            return;
        }
        let new_capacity = oversize(min_capacity);
        log::trace!(
            "growing postings table from {} to {} rows",
            self.capacity,
            new_capacity
        );
        self.resize(new_capacity);
    }

    /// Drops every row and gives the memory back to the tracker.
    pub fn release(&mut self) {
        self.resize(0);
    }

    #[inline]
    pub fn text_start(&self, id: u32) -> usize {
        self.text_starts[id as usize] as usize
    }

    #[inline]
    pub fn int_start(&self, id: u32) -> usize {
        self.int_starts[id as usize] as usize
    }

    #[inline]
    pub fn byte_start(&self, id: u32) -> usize {
        self.byte_starts[id as usize] as usize
    }

    /// Records where the stream cursors and the first slice of term `id`
    /// live. Called once, right after the term is minted.
    /// Fills in the stream starts of a freshly minted row. The row counts as
    /// not yet announced to the consumer.
    pub fn set_stream_starts(&mut self, id: u32, int_start: usize, byte_start: usize) {
        self.int_starts[id as usize] = int_start as u32;
        self.byte_starts[id as usize] = byte_start as u32;
        self.announced[id as usize] = false;
    }

    /// Marks row `id` as announced to the consumer. Returns `true` if it was
    /// not announced before.
    pub fn announce(&mut self, id: u32) -> bool {
        !std::mem::replace(&mut self.announced[id as usize], true)
    }

    pub fn extra(&self) -> &A {
        &self.extra
    }

    pub fn extra_mut(&mut self) -> &mut A {
        &mut self.extra
    }

    fn resize(&mut self, capacity: usize) {
        resize_column(&mut self.text_starts, capacity);
        resize_column(&mut self.int_starts, capacity);
        resize_column(&mut self.byte_starts, capacity);
        resize_column(&mut self.announced, capacity);
        self.extra.resize(capacity);
        self.capacity = capacity;
        let bytes = (capacity * self.bytes_per_posting()) as u64;
        self.reservation.resize(bytes);
    }
}

impl<A: PostingsArray> BytesStartArray for PostingsTable<A> {
    fn init(&mut self) {
        self.ensure_capacity(Self::INITIAL_CAPACITY);
    }

    fn ensure(&mut self, count: usize) {
        self.ensure_capacity(count);
    }

    fn text_start(&self, id: u32) -> usize {
        PostingsTable::text_start(self, id)
    }

    fn set_text_start(&mut self, id: u32, start: usize) {
        self.text_starts[id as usize] = start as u32;
    }

    fn clear(&mut self, keep_capacity: bool) {
        if !keep_capacity {
            self.release();
        }
    }
}

impl<A: PostingsArray> std::fmt::Debug for PostingsTable<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostingsTable")
            .field("capacity", &self.capacity)
            .field("bytes_per_posting", &self.bytes_per_posting())
            .field("reserved_bytes", &self.reserved_bytes())
            .finish_non_exhaustive()
    }
}

/// Capacity to grow to when at least `min` rows are needed: about 1/8 extra,
/// so that repeated single-row growth stays amortized.
fn oversize(min: usize) -> usize {
    min + (min >> 3).max(3)
}
