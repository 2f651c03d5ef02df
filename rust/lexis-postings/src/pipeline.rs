//! The per-field processing pipeline.
//!
//! A [`FieldPipeline`] drives an ordered list of stages through the
//! lifecycle of one field across documents:
//!
//! ```text
//! Idle ──start──▶ FieldStarted ──start_field──▶ TokenLoop ──finish──▶ FieldFinished
//!   ▲                                          (add_occurrence)           │
//!   └──────────────────────────── reset ──────────────────────────────────┘
//! ```
//!
//! `start` may also be called from `FieldFinished` (the next document keeps
//! accumulating into the same terms) and from `Aborted`. `abort` is accepted
//! in every state.
//!
//! The first stage interns the token bytes into the pipeline's term pool.
//! Every later stage interns by the term's offset in that pool, so the bytes
//! are hashed and copied once per occurrence regardless of the number of
//! stages.

use lexis_budget_tracker::MemoryTracker;
use lexis_common::{Result, error::Error, verify_arg};

use crate::{
    DocId,
    attributes::AttributeSource,
    config::TermsHashConfig,
    consumer::PostingsConsumer,
    field::{FieldInfo, FieldInvertState},
    freq_prox::FreqProxConsumer,
    pool::{BlockAllocator, ByteBlockPool, RecyclingAllocator},
    stage::{StageTerms, TermSource, TermsHashStage, TermsStage},
    term_vectors::{TermVectorsConsumer, TermVectorsSink},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Idle,
    FieldStarted,
    TokenLoop,
    FieldFinished,
    Aborted,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Interns and records the tokens of one field.
pub struct FieldPipeline {
    field: FieldInfo,
    config: TermsHashConfig,
    /// Text of every term interned by the first stage.
    term_pool: ByteBlockPool,
    stages: Vec<Box<dyn TermsStage>>,
    state: PipelineState,
    /// Whether any stage wants the tokens of the current document.
    active: bool,
    invert_state: FieldInvertState,
    /// Document of the last `start` since the terms were last dropped.
    last_doc_id: Option<DocId>,
    /// Tracker of the metadata tables, consulted for its flush threshold.
    memory: MemoryTracker,
    flush_reported: bool,
}

impl FieldPipeline {
    pub fn builder(field: FieldInfo) -> FieldPipelineBuilder {
        FieldPipelineBuilder {
            field,
            config: TermsHashConfig::default(),
            memory: MemoryTracker::new(),
            arena_tracker: None,
            stages: Vec::new(),
        }
    }

    /// Builds the standard pipeline for `field`: a [`FreqProxConsumer`]
    /// stage, followed by a [`TermVectorsConsumer`] stage when the field
    /// stores term vectors. Term vectors go to `vectors` when given and are
    /// buffered in the consumer otherwise.
    pub fn for_field(
        field: FieldInfo,
        config: TermsHashConfig,
        memory: &MemoryTracker,
        vectors: Option<Box<dyn TermVectorsSink>>,
    ) -> Result<FieldPipeline> {
        let Some(index_options) = field.index_options else {
            return Err(Error::invalid_arg(
                "field",
                format!("field '{}' is not indexed", field.name),
            ));
        };
        let store_term_vectors = field.store_term_vectors;
        let mut builder = FieldPipeline::builder(field)
            .config(config)
            .memory(memory)
            .stage(FreqProxConsumer::new(index_options));
        if store_term_vectors {
            let consumer = match vectors {
                Some(sink) => TermVectorsConsumer::with_sink(sink),
                None => TermVectorsConsumer::new(),
            };
            builder = builder.stage(consumer);
        }
        builder.build()
    }

    pub fn field(&self) -> &FieldInfo {
        &self.field
    }

    pub fn config(&self) -> &TermsHashConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Whether the current document's tokens are being recorded.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn invert_state(&self) -> &FieldInvertState {
        &self.invert_state
    }

    pub fn invert_state_mut(&mut self) -> &mut FieldInvertState {
        &mut self.invert_state
    }

    /// Number of live terms in stage `stage`.
    pub fn term_count(&self, stage: usize) -> usize {
        self.stages[stage].term_count()
    }

    /// Starts `count` instances of the field in document `doc_id` and returns
    /// whether any stage wants their tokens. When none does, the field is
    /// skipped for this document: no term is interned and nothing is written.
    ///
    /// Document ids must not decrease until the next `reset` or `abort`.
    pub fn start(&mut self, doc_id: DocId, count: usize) -> Result<bool> {
        self.verify_state(
            "start",
            &[
                PipelineState::Idle,
                PipelineState::FieldFinished,
                PipelineState::Aborted,
            ],
        )?;
        if let Some(last) = self.last_doc_id.filter(|&last| doc_id < last) {
            return Err(Error::precondition(
                format!("start({doc_id})"),
                format!("{} after doc {last}", self.state),
            ));
        }
        self.last_doc_id = Some(doc_id);
        let mut active = false;
        for stage in &mut self.stages {
            active |= stage.start(&self.field, count)?;
        }
        self.active = active;
        self.invert_state.reset(doc_id);
        self.state = PipelineState::FieldStarted;
        Ok(active)
    }

    /// Starts one instance of the field. `attrs` is the attribute source of
    /// its token stream, which must expose the term bytes.
    pub fn start_field(&mut self, attrs: &dyn AttributeSource) -> Result<()> {
        self.verify_state(
            "start_field",
            &[PipelineState::FieldStarted, PipelineState::TokenLoop],
        )?;
        if self.active {
            if attrs.term().is_none() {
                return Err(Error::missing_attribute(&self.field.name, "term"));
            }
            for stage in &mut self.stages {
                stage.start_field(&self.field, attrs)?;
            }
        }
        self.state = PipelineState::TokenLoop;
        Ok(())
    }

    /// Records one token occurrence.
    ///
    /// A term too long to be stored is skipped (and counted in
    /// [`FieldInvertState::skipped_terms`]); the call still succeeds. The
    /// caller advances the positional fields of the invert state before each
    /// call, see [`invert_field`](crate::invert::invert_field).
    pub fn add_occurrence(&mut self, attrs: &dyn AttributeSource) -> Result<()> {
        self.verify_state("add_occurrence", &[PipelineState::TokenLoop])?;
        if !self.active {
            return Ok(());
        }
        let term = attrs
            .term()
            .ok_or_else(|| Error::missing_attribute(&self.field.name, "term"))?;
        let bytes = term.bytes();
        let hash = term.hash_code();

        let Some((primary, chained)) = self.stages.split_first_mut() else {
            return Ok(());
        };
        let source = TermSource::Bytes {
            pool: &mut self.term_pool,
            bytes,
        };
        let Some(text_start) =
            primary.add(source, hash, &self.field, &mut self.invert_state, attrs)?
        else {
            return Ok(());
        };
        for stage in chained.iter_mut().filter(|stage| stage.wants_tokens()) {
            stage.add(
                TermSource::Offset(text_start),
                hash,
                &self.field,
                &mut self.invert_state,
                attrs,
            )?;
        }
        Ok(())
    }

    /// Completes the field for the current document, notifying every stage
    /// in order.
    pub fn finish(&mut self) -> Result<()> {
        self.verify_state(
            "finish",
            &[PipelineState::FieldStarted, PipelineState::TokenLoop],
        )?;
        let reuse_first = self.config.reuse_blocks_on_reset;
        for stage in &mut self.stages {
            stage.finish(&self.term_pool, &self.field, &self.invert_state, reuse_first)?;
        }
        self.state = PipelineState::FieldFinished;
        if !self.flush_reported && self.needs_flush() {
            log::debug!(
                "field '{}' needs a flush: {} arena bytes (threshold {}), {} tracked bytes \
                 (threshold {:?})",
                self.field.name,
                self.bytes_allocated(),
                self.config.flush_threshold_bytes,
                self.memory.bytes_used(),
                self.memory.flush_threshold()
            );
            self.flush_reported = true;
        }
        Ok(())
    }

    /// Drops every term of every stage, typically after the in-memory segment
    /// was flushed, and returns to `Idle`.
    pub fn reset(&mut self) {
        let keep = self.config.reuse_blocks_on_reset;
        for stage in &mut self.stages {
            stage.clear(keep);
        }
        self.term_pool.reset(false, keep);
        self.invert_state = FieldInvertState::default();
        self.last_doc_id = None;
        self.active = false;
        self.flush_reported = false;
        self.state = PipelineState::Idle;
        log::debug!("reset pipeline of field '{}'", self.field.name);
    }

    /// Discards all state of every stage, releasing their blocks. Accepted in
    /// any state and safe to repeat; each call aborts every stage once.
    pub fn abort(&mut self) {
        for stage in &mut self.stages {
            stage.abort();
        }
        self.term_pool.reset(false, false);
        self.invert_state = FieldInvertState::default();
        self.last_doc_id = None;
        self.active = false;
        self.flush_reported = false;
        self.state = PipelineState::Aborted;
        log::debug!("aborted pipeline of field '{}'", self.field.name);
    }

    /// Bytes held by the term pool and the stream pools of every stage.
    pub fn bytes_allocated(&self) -> usize {
        self.term_pool.bytes_allocated()
            + self
                .stages
                .iter()
                .map(|stage| stage.bytes_allocated())
                .sum::<usize>()
    }

    /// Whether the arenas have grown past the configured flush threshold, or
    /// the metadata tracker has crossed its own.
    pub fn needs_flush(&self) -> bool {
        self.bytes_allocated() as u64 > self.config.flush_threshold_bytes
            || self.memory.exceeds_threshold()
    }

    /// The terms of stage `stage`, if that stage runs consumer `C`.
    pub fn stage_terms<C: PostingsConsumer>(
        &mut self,
        stage: usize,
    ) -> Option<StageTerms<'_, C::Postings>> {
        let reuse_first = self.config.reuse_blocks_on_reset;
        let stage = self
            .stages
            .get_mut(stage)?
            .as_any_mut()
            .downcast_mut::<TermsHashStage<C>>()?;
        Some(stage.terms(&self.term_pool, reuse_first))
    }

    /// The consumer of stage `stage`, if it is a `C`.
    pub fn consumer<C: PostingsConsumer>(&self, stage: usize) -> Option<&C> {
        self.stages
            .get(stage)?
            .as_any()
            .downcast_ref::<TermsHashStage<C>>()
            .map(TermsHashStage::consumer)
    }

    pub fn consumer_mut<C: PostingsConsumer>(&mut self, stage: usize) -> Option<&mut C> {
        self.stages
            .get_mut(stage)?
            .as_any_mut()
            .downcast_mut::<TermsHashStage<C>>()
            .map(TermsHashStage::consumer_mut)
    }

    fn verify_state(&self, operation: &str, allowed: &[PipelineState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::precondition(operation, self.state.to_string()))
        }
    }
}

impl std::fmt::Debug for FieldPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldPipeline")
            .field("field", &self.field.name)
            .field("state", &self.state)
            .field("active", &self.active)
            .field("stages", &self.stages.len())
            .finish_non_exhaustive()
    }
}

/// Assembles a [`FieldPipeline`] from an ordered list of consumers.
pub struct FieldPipelineBuilder {
    field: FieldInfo,
    config: TermsHashConfig,
    memory: MemoryTracker,
    arena_tracker: Option<MemoryTracker>,
    stages: Vec<Box<dyn PendingStage>>,
}

impl FieldPipelineBuilder {
    pub fn config(mut self, config: TermsHashConfig) -> Self {
        self.config = config;
        self
    }

    /// Tracker receiving the metadata table memory of every stage. When it
    /// has a flush threshold, crossing it also makes the pipeline report
    /// [`FieldPipeline::needs_flush`].
    pub fn memory(mut self, memory: &MemoryTracker) -> Self {
        self.memory = memory.clone();
        self
    }

    /// Tracker receiving the block memory of every pool.
    pub fn arena_tracker(mut self, tracker: &MemoryTracker) -> Self {
        self.arena_tracker = Some(tracker.clone());
        self
    }

    /// Appends a stage running `consumer`. The first stage interns the token
    /// bytes; later stages are chained behind it.
    pub fn stage<C: PostingsConsumer>(mut self, consumer: C) -> Self {
        self.stages.push(Box::new(consumer));
        self
    }

    pub fn build(self) -> Result<FieldPipeline> {
        self.config.validate()?;
        verify_arg!(stages, !self.stages.is_empty());
        let resources = StageResources {
            config: &self.config,
            memory: &self.memory,
            arena_tracker: self.arena_tracker.as_ref(),
        };
        let stages = self
            .stages
            .into_iter()
            .map(|pending| pending.build(&resources))
            .collect();
        let term_pool = ByteBlockPool::new(
            self.config.slice_levels.clone(),
            resources.allocator::<u8>(),
        );
        Ok(FieldPipeline {
            field: self.field,
            config: self.config,
            term_pool,
            stages,
            state: PipelineState::Idle,
            active: false,
            invert_state: FieldInvertState::default(),
            last_doc_id: None,
            memory: self.memory,
            flush_reported: false,
        })
    }
}

struct StageResources<'a> {
    config: &'a TermsHashConfig,
    memory: &'a MemoryTracker,
    arena_tracker: Option<&'a MemoryTracker>,
}

impl StageResources<'_> {
    fn allocator<T: Copy + Default + Send + 'static>(&self) -> Box<dyn BlockAllocator<T>> {
        let max_free = self.config.max_recycled_blocks;
        match self.arena_tracker {
            Some(tracker) => Box::new(RecyclingAllocator::<T>::tracked(max_free, tracker)),
            None => Box::new(RecyclingAllocator::<T>::new(max_free)),
        }
    }
}

/// A consumer waiting for the pipeline's configuration to become a stage.
trait PendingStage {
    fn build(self: Box<Self>, resources: &StageResources<'_>) -> Box<dyn TermsStage>;
}

impl<C: PostingsConsumer> PendingStage for C {
    fn build(self: Box<Self>, resources: &StageResources<'_>) -> Box<dyn TermsStage> {
        Box::new(TermsHashStage::new(
            *self,
            resources.config,
            resources.memory,
            resources.allocator::<u32>(),
            resources.allocator::<u8>(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use lexis_common::error::ErrorKind;

    use super::*;
    use crate::{attributes::Token, field::IndexOptions};

    fn pipeline() -> FieldPipeline {
        FieldPipeline::for_field(
            FieldInfo::new("body", 0),
            TermsHashConfig::default(),
            &MemoryTracker::new(),
            None,
        )
        .unwrap()
    }

    fn expect_precondition(result: Result<impl std::fmt::Debug>) {
        match result.unwrap_err().kind() {
            ErrorKind::PreconditionViolation { .. } => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut p = pipeline();
        assert_eq!(p.state(), PipelineState::Idle);
        assert!(p.start(0, 1).unwrap());
        assert_eq!(p.state(), PipelineState::FieldStarted);
        p.start_field(&Token::new("a")).unwrap();
        assert_eq!(p.state(), PipelineState::TokenLoop);
        p.add_occurrence(&Token::new("a")).unwrap();
        p.finish().unwrap();
        assert_eq!(p.state(), PipelineState::FieldFinished);
        assert!(p.start(1, 1).unwrap());
        p.finish().unwrap();
        p.reset();
        assert_eq!(p.state(), PipelineState::Idle);
        assert_eq!(p.term_count(0), 0);
    }

    #[test]
    fn test_invalid_transitions() {
        let mut p = pipeline();
        expect_precondition(p.add_occurrence(&Token::new("a")));
        expect_precondition(p.start_field(&Token::new("a")));
        expect_precondition(p.finish());
        p.start(0, 1).unwrap();
        expect_precondition(p.add_occurrence(&Token::new("a")));
        expect_precondition(p.start(0, 1));
    }

    #[test]
    fn test_rejects_unindexed_field() {
        let field = FieldInfo::new("stored", 1).with_index_options(None);
        let err = FieldPipeline::for_field(
            field,
            TermsHashConfig::default(),
            &MemoryTracker::new(),
            None,
        )
        .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    }

    #[test]
    fn test_for_field_stages() {
        let memory = MemoryTracker::new();
        let field = FieldInfo::new("title", 2)
            .with_index_options(Some(IndexOptions::DocsAndFreqs))
            .with_term_vectors(true, true);
        let p = FieldPipeline::for_field(field, TermsHashConfig::default(), &memory, None)
            .unwrap();
        assert_eq!(p.stage_count(), 2);
        assert!(p.consumer::<FreqProxConsumer>(0).is_some());
        assert!(p.consumer::<TermVectorsConsumer>(1).is_some());
        assert!(p.consumer::<TermVectorsConsumer>(0).is_none());
    }

    #[test]
    fn test_rejects_decreasing_doc_ids() {
        let mut p = FieldPipeline::builder(FieldInfo::new("body", 0))
            .stage(FreqProxConsumer::new(IndexOptions::DocsAndFreqs))
            .build()
            .unwrap();
        p.start(5, 1).unwrap();
        p.start_field(&Token::new("a")).unwrap();
        p.add_occurrence(&Token::new("a")).unwrap();
        p.finish().unwrap();

        match p.start(2, 1).unwrap_err().kind() {
            ErrorKind::PreconditionViolation { operation, state } => {
                assert_eq!(operation, "start(2)");
                assert_eq!(state, "FieldFinished after doc 5");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(p.state(), PipelineState::FieldFinished);
        // The same document may be started again.
        assert!(p.start(5, 1).unwrap());
        p.finish().unwrap();

        // Dropping the terms lifts the constraint.
        p.reset();
        assert!(p.start(0, 1).unwrap());
        p.abort();
        assert!(p.start(0, 1).unwrap());
    }

    #[test]
    fn test_needs_flush_on_tracker_threshold() {
        let memory = MemoryTracker::with_flush_threshold(500);
        let mut p = FieldPipeline::builder(FieldInfo::new("body", 0))
            .memory(&memory)
            .stage(FreqProxConsumer::new(IndexOptions::DocsAndFreqs))
            .build()
            .unwrap();
        p.start(0, 1).unwrap();
        p.start_field(&Token::new("t0")).unwrap();
        assert!(!p.needs_flush());
        for i in 0..100 {
            p.add_occurrence(&Token::new(format!("t{i}"))).unwrap();
        }
        p.finish().unwrap();
        assert!(memory.exceeds_threshold());
        assert!(p.needs_flush());
        p.abort();
        assert!(!p.needs_flush());
    }

    #[test]
    fn test_tables_reserve_on_first_start() {
        let memory = MemoryTracker::new();
        let mut p = FieldPipeline::builder(FieldInfo::new("body", 0))
            .memory(&memory)
            .stage(FreqProxConsumer::new(IndexOptions::DocsAndFreqs))
            .build()
            .unwrap();
        assert_eq!(memory.bytes_used(), 0);
        assert!(p.stage_terms::<FreqProxConsumer>(0).unwrap().postings().term_freqs.is_empty());

        p.start(0, 1).unwrap();
        let terms = p.stage_terms::<FreqProxConsumer>(0).unwrap();
        let table = terms.table();
        assert!(table.capacity() > 0);
        assert_eq!(terms.postings().term_freqs.len(), table.capacity());
        assert_eq!(
            memory.bytes_used(),
            (table.capacity() * table.bytes_per_posting()) as u64
        );
    }

    #[test]
    fn test_builder_requires_stage() {
        assert!(FieldPipeline::builder(FieldInfo::new("x", 0)).build().is_err());
    }

    #[test]
    fn test_needs_flush() {
        let config = TermsHashConfig::default()
            .with_flush_threshold_bytes(crate::pool::BYTE_BLOCK_SIZE as u64);
        let mut p = FieldPipeline::builder(FieldInfo::new("body", 0))
            .config(config)
            .stage(FreqProxConsumer::new(IndexOptions::DocsAndFreqs))
            .build()
            .unwrap();
        assert!(!p.needs_flush());
        p.start(0, 1).unwrap();
        p.start_field(&Token::new("a")).unwrap();
        p.add_occurrence(&Token::new("a")).unwrap();
        p.finish().unwrap();
        // Term pool, int pool and byte pool each hold one block now.
        assert!(p.needs_flush());
        p.abort();
        assert!(!p.needs_flush());
    }
}
