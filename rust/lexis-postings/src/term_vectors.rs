//! Per-document term vectors, collected by a chained stage.
//!
//! The stage sees every occurrence forwarded by the primary stage of the
//! field. Stream 0 holds position deltas, stream 1 pairs of (start offset
//! delta, token length). When the field finishes, the terms of the document
//! are sorted, decoded into [`TermVector`]s and handed to a
//! [`TermVectorsSink`], and the stage is cleared for the next document.

use lexis_common::Result;

use crate::{
    DocId,
    consumer::{PostingsConsumer, TermContext},
    field::{FieldInfo, FieldInvertState},
    postings::{PostingsArray, resize_column},
    stage::StageTerms,
};

const POSITION_STREAM: usize = 0;
const OFFSET_STREAM: usize = 1;

/// One term of a document's term vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermVector {
    pub term: Vec<u8>,
    pub freq: u32,
    /// Empty unless the field stores term vector positions.
    pub positions: Vec<u32>,
    /// Empty unless the field stores term vector offsets.
    pub offsets: Vec<(u32, u32)>,
}

/// The term vector of one field in one document, terms in byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldTermVectors {
    pub doc_id: DocId,
    pub field: String,
    pub terms: Vec<TermVector>,
}

/// Receives finished term vectors.
pub trait TermVectorsSink: Send {
    fn write_field(&mut self, vectors: FieldTermVectors) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct TermVectorsPostingsArray {
    pub freqs: Vec<u32>,
    pub last_positions: Vec<u32>,
    /// Start offset of the previous occurrence.
    pub last_offsets: Vec<u32>,
}

impl PostingsArray for TermVectorsPostingsArray {
    fn bytes_per_posting(&self) -> usize {
        3 * std::mem::size_of::<u32>()
    }

    fn resize(&mut self, capacity: usize) {
        resize_column(&mut self.freqs, capacity);
        resize_column(&mut self.last_positions, capacity);
        resize_column(&mut self.last_offsets, capacity);
    }
}

pub struct TermVectorsConsumer {
    sink: Option<Box<dyn TermVectorsSink>>,
    /// Finished vectors, kept when there is no sink.
    buffered: Vec<FieldTermVectors>,
    do_vectors: bool,
    do_positions: bool,
    do_offsets: bool,
}

impl TermVectorsConsumer {
    /// A consumer that buffers finished vectors until they are taken with
    /// [`take_buffered`](Self::take_buffered).
    pub fn new() -> TermVectorsConsumer {
        TermVectorsConsumer {
            sink: None,
            buffered: Vec::new(),
            do_vectors: false,
            do_positions: false,
            do_offsets: false,
        }
    }

    pub fn with_sink(sink: Box<dyn TermVectorsSink>) -> TermVectorsConsumer {
        TermVectorsConsumer {
            sink: Some(sink),
            ..TermVectorsConsumer::new()
        }
    }

    pub fn buffered(&self) -> &[FieldTermVectors] {
        &self.buffered
    }

    pub fn take_buffered(&mut self) -> Vec<FieldTermVectors> {
        std::mem::take(&mut self.buffered)
    }

    fn record(&self, ctx: &mut TermContext<'_, TermVectorsPostingsArray>, first: bool) {
        let id = ctx.term_id as usize;
        if self.do_offsets {
            let (start, end) = ctx.attrs.offsets().unwrap_or((0, 0));
            let start = ctx.state.offset + start;
            let end = ctx.state.offset + end;
            let base = if first { 0 } else { ctx.postings.last_offsets[id] };
            ctx.streams
                .write_vint(OFFSET_STREAM, start.saturating_sub(base));
            ctx.streams
                .write_vint(OFFSET_STREAM, end.saturating_sub(start));
            ctx.postings.last_offsets[id] = start;
        }
        if self.do_positions {
            let position = ctx.state.position;
            let base = if first { 0 } else { ctx.postings.last_positions[id] };
            ctx.streams.write_vint(POSITION_STREAM, position - base);
            ctx.postings.last_positions[id] = position;
        }
    }

    fn decode(&self, terms: &StageTerms<'_, TermVectorsPostingsArray>) -> Result<Vec<TermVector>> {
        let ids = terms.sorted_ids().unwrap_or_default();
        let mut vectors = Vec::with_capacity(ids.len());
        for &id in ids {
            let freq = terms.postings().freqs[id as usize];
            let mut positions = Vec::new();
            if self.do_positions {
                let mut reader = terms.stream_reader(id, POSITION_STREAM);
                let mut position = 0;
                for _ in 0..freq {
                    position += reader.read_vint()?;
                    positions.push(position);
                }
            }
            let mut offsets = Vec::new();
            if self.do_offsets {
                let mut reader = terms.stream_reader(id, OFFSET_STREAM);
                let mut start = 0;
                for _ in 0..freq {
                    start += reader.read_vint()?;
                    let end = start + reader.read_vint()?;
                    offsets.push((start, end));
                }
            }
            vectors.push(TermVector {
                term: terms.term_bytes(id).to_vec(),
                freq,
                positions,
                offsets,
            });
        }
        Ok(vectors)
    }
}

impl Default for TermVectorsConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TermVectorsConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TermVectorsConsumer")
            .field("has_sink", &self.sink.is_some())
            .field("buffered", &self.buffered.len())
            .field("do_vectors", &self.do_vectors)
            .finish_non_exhaustive()
    }
}

impl PostingsConsumer for TermVectorsConsumer {
    type Postings = TermVectorsPostingsArray;

    fn stream_count(&self) -> usize {
        2
    }

    fn create_postings_array(&self) -> TermVectorsPostingsArray {
        TermVectorsPostingsArray::default()
    }

    fn start(&mut self, field: &FieldInfo, _count: usize) -> Result<bool> {
        self.do_vectors = field.is_indexed() && field.store_term_vectors;
        self.do_positions = self.do_vectors && field.store_term_vector_positions;
        self.do_offsets = self.do_vectors && field.store_term_vector_offsets;
        Ok(self.do_vectors)
    }

    fn new_term(&mut self, mut ctx: TermContext<'_, TermVectorsPostingsArray>) {
        ctx.postings.freqs[ctx.term_id as usize] = 1;
        self.record(&mut ctx, true);
    }

    fn add_term(&mut self, mut ctx: TermContext<'_, TermVectorsPostingsArray>) {
        ctx.postings.freqs[ctx.term_id as usize] += 1;
        self.record(&mut ctx, false);
    }

    fn finish(
        &mut self,
        mut terms: StageTerms<'_, TermVectorsPostingsArray>,
        field: &FieldInfo,
        state: &FieldInvertState,
    ) -> Result<()> {
        if !self.do_vectors || terms.is_empty() {
            return Ok(());
        }
        terms.sort(|a, b| a.cmp(b));
        let vectors = self.decode(&terms);
        terms.clear();
        let vectors = FieldTermVectors {
            doc_id: state.doc_id,
            field: field.name.clone(),
            terms: vectors?,
        };
        match self.sink.as_mut() {
            Some(sink) => sink.write_field(vectors),
            None => {
                self.buffered.push(vectors);
                Ok(())
            }
        }
    }

    fn reset(&mut self) {
        self.do_vectors = false;
    }

    fn abort(&mut self) {
        self.do_vectors = false;
        self.buffered.clear();
    }
}
