//! One stage of a field pipeline: an interner, its metadata table, the
//! pools holding the term streams, and the consumer encoding them.

use std::any::Any;
use std::cmp::Ordering;

use lexis_budget_tracker::MemoryTracker;
use lexis_common::Result;

use crate::{
    TermId,
    attributes::AttributeSource,
    bytes_hash::BytesHash,
    config::TermsHashConfig,
    consumer::{PostingsConsumer, TermContext},
    field::{FieldInfo, FieldInvertState},
    pool::{BlockAllocator, ByteBlockPool, ByteSliceReader, IntBlockPool},
    postings::{PostingsArray, PostingsTable},
    stream::{StreamWriter, init_streams},
};

/// How a stage obtains the term of the current occurrence.
pub(crate) enum TermSource<'a> {
    /// Intern these bytes, copying them into the shared term pool when new.
    Bytes {
        pool: &'a mut ByteBlockPool,
        bytes: &'a [u8],
    },
    /// The term is already in the shared term pool at this offset.
    Offset(usize),
}

/// The type-erased face of a [`TermsHashStage`], as driven by the pipeline.
pub(crate) trait TermsStage: Send {
    fn start(&mut self, field: &FieldInfo, count: usize) -> Result<bool>;

    fn wants_tokens(&self) -> bool;

    fn start_field(&mut self, field: &FieldInfo, attrs: &dyn AttributeSource) -> Result<()>;

    /// Interns one occurrence and lets the consumer record it. Returns the
    /// term's offset in the shared term pool, or `None` if the term was
    /// skipped.
    fn add(
        &mut self,
        source: TermSource<'_>,
        hash: u32,
        field: &FieldInfo,
        state: &mut FieldInvertState,
        attrs: &dyn AttributeSource,
    ) -> Result<Option<usize>>;

    fn finish(
        &mut self,
        term_pool: &ByteBlockPool,
        field: &FieldInfo,
        state: &FieldInvertState,
        reuse_first: bool,
    ) -> Result<()>;

    /// Drops every term and resets the pools. With `keep_capacity` the
    /// interner keeps its slot array and each pool its first block.
    fn clear(&mut self, keep_capacity: bool);

    fn abort(&mut self);

    fn term_count(&self) -> usize;

    /// Bytes held by the stage's pools.
    fn bytes_allocated(&self) -> usize;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub(crate) struct TermsHashStage<C: PostingsConsumer> {
    consumer: C,
    hash: BytesHash<PostingsTable<C::Postings>>,
    int_pool: IntBlockPool,
    byte_pool: ByteBlockPool,
    stream_count: usize,
    wants_tokens: bool,
}

impl<C: PostingsConsumer> TermsHashStage<C> {
    pub fn new(
        consumer: C,
        config: &TermsHashConfig,
        memory: &MemoryTracker,
        int_allocator: Box<dyn BlockAllocator<u32>>,
        byte_allocator: Box<dyn BlockAllocator<u8>>,
    ) -> TermsHashStage<C> {
        let stream_count = consumer.stream_count();
        assert!(stream_count > 0, "a consumer needs at least one stream");
        let table = PostingsTable::new(consumer.create_postings_array(), memory);
        TermsHashStage {
            consumer,
            hash: BytesHash::new(config.initial_hash_size, table),
            int_pool: IntBlockPool::new(int_allocator),
            byte_pool: ByteBlockPool::new(config.slice_levels.clone(), byte_allocator),
            stream_count,
            wants_tokens: false,
        }
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    pub fn consumer_mut(&mut self) -> &mut C {
        &mut self.consumer
    }

    fn drop_terms(&mut self, keep_capacity: bool) {
        self.hash.clear(keep_capacity);
        self.int_pool.reset(false, keep_capacity);
        self.byte_pool.reset(true, keep_capacity);
    }

    pub fn terms<'a>(
        &'a mut self,
        term_pool: &'a ByteBlockPool,
        reuse_first: bool,
    ) -> StageTerms<'a, C::Postings> {
        StageTerms {
            hash: &mut self.hash,
            term_pool,
            int_pool: &mut self.int_pool,
            byte_pool: &mut self.byte_pool,
            stream_count: self.stream_count,
            reuse_first,
        }
    }
}

impl<C: PostingsConsumer> TermsStage for TermsHashStage<C> {
    fn start(&mut self, field: &FieldInfo, count: usize) -> Result<bool> {
        self.wants_tokens = self.consumer.start(field, count)?;
        self.hash.reinit();
        Ok(self.wants_tokens)
    }

    fn wants_tokens(&self) -> bool {
        self.wants_tokens
    }

    fn start_field(&mut self, field: &FieldInfo, attrs: &dyn AttributeSource) -> Result<()> {
        if self.wants_tokens {
            self.consumer.start_field(field, attrs)?;
        }
        Ok(())
    }

    fn add(
        &mut self,
        source: TermSource<'_>,
        hash: u32,
        field: &FieldInfo,
        state: &mut FieldInvertState,
        attrs: &dyn AttributeSource,
    ) -> Result<Option<usize>> {
        let interned = match source {
            TermSource::Bytes { pool, bytes } => match self.hash.add(pool, bytes, hash) {
                Ok(interned) => interned,
                Err(e) if e.is_recoverable() => {
                    log::warn!(
                        "skipping a term of {} bytes in field '{}': {}",
                        bytes.len(),
                        field.name,
                        e
                    );
                    state.record_skipped(bytes);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            },
            TermSource::Offset(text_start) => self.hash.add_by_offset(text_start, hash)?,
        };

        let term_id = interned.id();
        if interned.is_new() {
            let (int_start, byte_start) =
                init_streams(&mut self.int_pool, &mut self.byte_pool, self.stream_count);
            self.hash
                .starts_mut()
                .set_stream_starts(term_id, int_start, byte_start);
        }

        if self.wants_tokens {
            let table = self.hash.starts_mut();
            let first_seen = table.announce(term_id);
            let int_start = table.int_start(term_id);
            let ctx = TermContext {
                term_id,
                postings: table.extra_mut(),
                streams: StreamWriter::new(
                    &mut self.int_pool,
                    &mut self.byte_pool,
                    int_start,
                    self.stream_count,
                ),
                state,
                attrs,
            };
            if first_seen {
                self.consumer.new_term(ctx);
            } else {
                self.consumer.add_term(ctx);
            }
        }
        Ok(Some(self.hash.starts().text_start(term_id)))
    }

    fn finish(
        &mut self,
        term_pool: &ByteBlockPool,
        field: &FieldInfo,
        state: &FieldInvertState,
        reuse_first: bool,
    ) -> Result<()> {
        let terms = StageTerms {
            hash: &mut self.hash,
            term_pool,
            int_pool: &mut self.int_pool,
            byte_pool: &mut self.byte_pool,
            stream_count: self.stream_count,
            reuse_first,
        };
        self.consumer.finish(terms, field, state)
    }

    fn clear(&mut self, keep_capacity: bool) {
        self.drop_terms(keep_capacity);
        self.consumer.reset();
    }

    fn abort(&mut self) {
        self.drop_terms(false);
        self.wants_tokens = false;
        self.consumer.abort();
    }

    fn term_count(&self) -> usize {
        self.hash.len()
    }

    fn bytes_allocated(&self) -> usize {
        self.int_pool.bytes_allocated() + self.byte_pool.bytes_allocated()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Read access to the terms of one stage, handed to consumers on `finish`
/// and to the flush code through the pipeline.
pub struct StageTerms<'a, A: PostingsArray> {
    hash: &'a mut BytesHash<PostingsTable<A>>,
    /// Pool holding the term text, shared by all stages of the pipeline.
    term_pool: &'a ByteBlockPool,
    int_pool: &'a mut IntBlockPool,
    byte_pool: &'a mut ByteBlockPool,
    stream_count: usize,
    reuse_first: bool,
}

impl<'a, A: PostingsArray> StageTerms<'a, A> {
    pub fn len(&self) -> usize {
        self.hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hash.is_empty()
    }

    pub fn stream_count(&self) -> usize {
        self.stream_count
    }

    pub fn term_bytes(&self, id: TermId) -> &'a [u8] {
        self.hash.term(self.term_pool, id)
    }

    /// Orders the live term ids by text with `compare` and returns them.
    /// Afterwards the stage accepts no new terms until it is cleared.
    pub fn sort<F>(&mut self, compare: F) -> &[TermId]
    where
        F: FnMut(&[u8], &[u8]) -> Ordering,
    {
        self.hash.sort(self.term_pool, compare)
    }

    /// The ids ordered by the last [`sort`](Self::sort), if any.
    pub fn sorted_ids(&self) -> Option<&[TermId]> {
        self.hash.sorted_ids()
    }

    /// The metadata table, including the consumer's columns.
    pub fn table(&self) -> &PostingsTable<A> {
        self.hash.starts()
    }

    pub fn postings(&self) -> &A {
        self.hash.starts().extra()
    }

    pub fn text_start(&self, id: TermId) -> usize {
        self.hash.starts().text_start(id)
    }

    pub fn stream_cursor_start(&self, id: TermId) -> usize {
        self.hash.starts().int_start(id)
    }

    pub fn stream_slice_start(&self, id: TermId) -> usize {
        self.hash.starts().byte_start(id)
    }

    /// Reader over everything written so far to `stream` of term `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not live or `stream` is out of range.
    pub fn stream_reader(&self, id: TermId, stream: usize) -> ByteSliceReader<'_> {
        assert!((id as usize) < self.hash.len(), "term id {id} is not live");
        assert!(
            stream < self.stream_count,
            "stream index {stream} is outside [0, {})",
            self.stream_count
        );
        let table = self.hash.starts();
        let start = table.byte_start(id) + stream * self.byte_pool.levels().first_size();
        let end = self.int_pool.get(table.int_start(id) + stream) as usize;
        ByteSliceReader::new(self.byte_pool, start, end)
    }

    /// Drops every term of the stage and resets its stream pools. The slot
    /// array and the metadata rows are kept for reuse when the pools keep
    /// their first block.
    pub fn clear(&mut self) {
        self.hash.clear(self.reuse_first);
        self.int_pool.reset(false, self.reuse_first);
        self.byte_pool.reset(true, self.reuse_first);
        self.hash.reinit();
    }
}

impl<A: PostingsArray> std::fmt::Debug for StageTerms<'_, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageTerms")
            .field("len", &self.len())
            .field("stream_count", &self.stream_count)
            .finish_non_exhaustive()
    }
}
