//! Document, frequency and position postings.
//!
//! [`FreqProxConsumer`] is the primary stage consumer of an indexed field.
//! Per term it keeps:
//!
//! - stream 0: one entry per completed document, `doc_delta << 1 | 1` when
//!   the term occurred once there, otherwise `doc_delta << 1` followed by the
//!   frequency. Fields without frequencies write plain doc deltas. The entry
//!   of the term's most recent document is written lazily, when the term
//!   shows up in a later document, so readers take it from the postings
//!   columns instead.
//! - stream 1 (fields with positions): per occurrence the position delta
//!   `delta << 1 | has_payload`, the payload (length, then bytes) and, with
//!   offsets, the start offset delta and the token length.

use std::io;

use lexis_common::Result;

use crate::{
    DocId, TermId,
    consumer::{PostingsConsumer, TermContext},
    field::{FieldInfo, FieldInvertState, IndexOptions},
    pool::ByteSliceReader,
    postings::{PostingsArray, resize_column},
    stage::StageTerms,
};

const DOC_STREAM: usize = 0;
const PROX_STREAM: usize = 1;

/// Per-term columns of [`FreqProxConsumer`]. Columns the index options do not
/// need stay empty.
#[derive(Debug)]
pub struct FreqProxPostingsArray {
    options: IndexOptions,
    /// Occurrences in the term's most recent document.
    pub term_freqs: Vec<u32>,
    /// The term's most recent document.
    pub last_doc_ids: Vec<DocId>,
    /// Pending stream 0 code of the most recent document.
    pub last_doc_codes: Vec<u32>,
    pub last_positions: Vec<u32>,
    pub last_offsets: Vec<u32>,
}

impl FreqProxPostingsArray {
    pub fn new(options: IndexOptions) -> FreqProxPostingsArray {
        FreqProxPostingsArray {
            options,
            term_freqs: Vec::new(),
            last_doc_ids: Vec::new(),
            last_doc_codes: Vec::new(),
            last_positions: Vec::new(),
            last_offsets: Vec::new(),
        }
    }

    pub fn options(&self) -> IndexOptions {
        self.options
    }
}

impl PostingsArray for FreqProxPostingsArray {
    fn bytes_per_posting(&self) -> usize {
        let mut columns = 2;
        if self.options.has_freqs() {
            columns += 1;
        }
        if self.options.has_positions() {
            columns += 1;
        }
        if self.options.has_offsets() {
            columns += 1;
        }
        columns * std::mem::size_of::<u32>()
    }

    fn resize(&mut self, capacity: usize) {
        resize_column(&mut self.last_doc_ids, capacity);
        resize_column(&mut self.last_doc_codes, capacity);
        if self.options.has_freqs() {
            resize_column(&mut self.term_freqs, capacity);
        }
        if self.options.has_positions() {
            resize_column(&mut self.last_positions, capacity);
        }
        if self.options.has_offsets() {
            resize_column(&mut self.last_offsets, capacity);
        }
    }
}

/// Aggregate statistics of a field since the stage was last cleared.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldStats {
    /// Documents in which the field produced at least one recorded term.
    pub doc_count: u32,
    /// Sum over terms of the number of documents containing them.
    pub sum_doc_freq: u64,
    /// Number of recorded occurrences.
    pub sum_total_term_freq: u64,
    pub saw_payloads: bool,
}

#[derive(Debug)]
pub struct FreqProxConsumer {
    options: IndexOptions,
    wants_tokens: bool,
    stats: FieldStats,
    doc_terms: u32,
    doc_occurrences: u32,
}

impl FreqProxConsumer {
    pub fn new(options: IndexOptions) -> FreqProxConsumer {
        FreqProxConsumer {
            options,
            wants_tokens: false,
            stats: FieldStats::default(),
            doc_terms: 0,
            doc_occurrences: 0,
        }
    }

    pub fn options(&self) -> IndexOptions {
        self.options
    }

    pub fn stats(&self) -> FieldStats {
        self.stats
    }

    fn write_prox(&mut self, ctx: &mut TermContext<'_, FreqProxPostingsArray>, delta: u32) {
        let attrs = ctx.attrs;
        match attrs.payload().filter(|payload| !payload.is_empty()) {
            Some(payload) => {
                ctx.streams.write_vint(PROX_STREAM, delta << 1 | 1);
                ctx.streams.write_vint(PROX_STREAM, payload.len() as u32);
                ctx.streams.write_bytes(PROX_STREAM, payload);
                self.stats.saw_payloads = true;
            }
            None => ctx.streams.write_vint(PROX_STREAM, delta << 1),
        }
        ctx.postings.last_positions[ctx.term_id as usize] = ctx.state.position;
    }

    fn write_offsets(ctx: &mut TermContext<'_, FreqProxPostingsArray>) {
        let (start, end) = ctx.attrs.offsets().unwrap_or((0, 0));
        let start = ctx.state.offset + start;
        let end = ctx.state.offset + end;
        let id = ctx.term_id as usize;
        ctx.streams
            .write_vint(PROX_STREAM, start.saturating_sub(ctx.postings.last_offsets[id]));
        ctx.streams.write_vint(PROX_STREAM, end.saturating_sub(start));
        ctx.postings.last_offsets[id] = start;
    }

    /// Records the first occurrence of a term in the current document.
    fn first_in_doc(&mut self, ctx: &mut TermContext<'_, FreqProxPostingsArray>) {
        let id = ctx.term_id as usize;
        if self.options.has_freqs() {
            ctx.postings.term_freqs[id] = 1;
        }
        ctx.state.max_term_frequency = ctx.state.max_term_frequency.max(1);
        ctx.state.unique_term_count += 1;
        self.doc_terms += 1;
        if self.options.has_positions() {
            let position = ctx.state.position;
            self.write_prox(ctx, position);
            if self.options.has_offsets() {
                ctx.postings.last_offsets[id] = 0;
                Self::write_offsets(ctx);
            }
        }
    }
}

impl PostingsConsumer for FreqProxConsumer {
    type Postings = FreqProxPostingsArray;

    fn stream_count(&self) -> usize {
        if self.options.has_positions() { 2 } else { 1 }
    }

    fn create_postings_array(&self) -> FreqProxPostingsArray {
        FreqProxPostingsArray::new(self.options)
    }

    fn start(&mut self, field: &FieldInfo, _count: usize) -> Result<bool> {
        self.wants_tokens = field.is_indexed();
        self.doc_terms = 0;
        self.doc_occurrences = 0;
        Ok(self.wants_tokens)
    }

    fn new_term(&mut self, mut ctx: TermContext<'_, FreqProxPostingsArray>) {
        let id = ctx.term_id as usize;
        let doc_id = ctx.state.doc_id;
        ctx.postings.last_doc_ids[id] = doc_id;
        ctx.postings.last_doc_codes[id] = if self.options.has_freqs() {
            doc_id << 1
        } else {
            doc_id
        };
        self.doc_occurrences += 1;
        self.first_in_doc(&mut ctx);
    }

    fn add_term(&mut self, mut ctx: TermContext<'_, FreqProxPostingsArray>) {
        let id = ctx.term_id as usize;
        let doc_id = ctx.state.doc_id;
        self.doc_occurrences += 1;
        let last_doc_id = ctx.postings.last_doc_ids[id];

        if doc_id != last_doc_id {
            // First occurrence in this document: flush the previous one.
            let code = ctx.postings.last_doc_codes[id];
            if !self.options.has_freqs() {
                ctx.streams.write_vint(DOC_STREAM, code);
                ctx.postings.last_doc_codes[id] = doc_id - last_doc_id;
            } else {
                let freq = ctx.postings.term_freqs[id];
                if freq == 1 {
                    ctx.streams.write_vint(DOC_STREAM, code | 1);
                } else {
                    ctx.streams.write_vint(DOC_STREAM, code);
                    ctx.streams.write_vint(DOC_STREAM, freq);
                }
                ctx.postings.last_doc_codes[id] = (doc_id - last_doc_id) << 1;
            }
            ctx.postings.last_doc_ids[id] = doc_id;
            self.first_in_doc(&mut ctx);
            return;
        }

        if self.options.has_freqs() {
            ctx.postings.term_freqs[id] += 1;
            let freq = ctx.postings.term_freqs[id];
            ctx.state.max_term_frequency = ctx.state.max_term_frequency.max(freq);
        }
        if self.options.has_positions() {
            let delta = ctx.state.position - ctx.postings.last_positions[id];
            self.write_prox(&mut ctx, delta);
            if self.options.has_offsets() {
                Self::write_offsets(&mut ctx);
            }
        }
    }

    fn finish(
        &mut self,
        _terms: StageTerms<'_, FreqProxPostingsArray>,
        _field: &FieldInfo,
        _state: &FieldInvertState,
    ) -> Result<()> {
        if self.doc_occurrences > 0 {
            self.stats.doc_count += 1;
            self.stats.sum_doc_freq += self.doc_terms as u64;
            self.stats.sum_total_term_freq += self.doc_occurrences as u64;
        }
        self.doc_terms = 0;
        self.doc_occurrences = 0;
        Ok(())
    }

    fn reset(&mut self) {
        self.stats = FieldStats::default();
        self.doc_terms = 0;
        self.doc_occurrences = 0;
    }
}

/// One decoded position of a term within a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionEntry {
    pub position: u32,
    pub payload: Option<Vec<u8>>,
    pub offsets: Option<(u32, u32)>,
}

/// One decoded document of a term's postings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub doc_id: DocId,
    /// Occurrences in the document; `1` for fields without frequencies.
    pub freq: u32,
    /// Empty for fields without positions.
    pub positions: Vec<PositionEntry>,
}

/// Decodes the postings of one term, document by document.
pub struct FreqProxPostings<'r> {
    options: IndexOptions,
    docs: ByteSliceReader<'r>,
    prox: Option<ByteSliceReader<'r>>,
    doc_id: DocId,
    /// The lazily written entry of the term's most recent document.
    pending: Option<(DocId, u32)>,
}

impl<'r> FreqProxPostings<'r> {
    pub fn new(terms: &'r StageTerms<'_, FreqProxPostingsArray>, id: TermId) -> Self {
        let postings = terms.postings();
        let options = postings.options();
        let freq = if options.has_freqs() {
            postings.term_freqs[id as usize]
        } else {
            1
        };
        FreqProxPostings {
            options,
            docs: terms.stream_reader(id, DOC_STREAM),
            prox: options
                .has_positions()
                .then(|| terms.stream_reader(id, PROX_STREAM)),
            doc_id: 0,
            pending: Some((postings.last_doc_ids[id as usize], freq)),
        }
    }

    fn next_posting(&mut self) -> io::Result<Option<Posting>> {
        let (doc_id, freq) = if self.docs.eof() {
            match self.pending.take() {
                Some(pending) => pending,
                None => return Ok(None),
            }
        } else {
            let code = self.docs.read_vint()?;
            if self.options.has_freqs() {
                self.doc_id += code >> 1;
                let freq = if code & 1 != 0 {
                    1
                } else {
                    self.docs.read_vint()?
                };
                (self.doc_id, freq)
            } else {
                self.doc_id += code;
                (self.doc_id, 1)
            }
        };

        let mut positions = Vec::new();
        if let Some(prox) = self.prox.as_mut() {
            let mut position = 0;
            let mut start_offset = 0;
            positions.reserve(freq as usize);
            for _ in 0..freq {
                let code = prox.read_vint()?;
                position += code >> 1;
                let payload = if code & 1 != 0 {
                    let len = prox.read_vint()? as usize;
                    Some(prox.read_vec(len)?)
                } else {
                    None
                };
                let offsets = if self.options.has_offsets() {
                    start_offset += prox.read_vint()?;
                    let len = prox.read_vint()?;
                    Some((start_offset, start_offset + len))
                } else {
                    None
                };
                positions.push(PositionEntry {
                    position,
                    payload,
                    offsets,
                });
            }
        }
        Ok(Some(Posting {
            doc_id,
            freq,
            positions,
        }))
    }
}

impl Iterator for FreqProxPostings<'_> {
    type Item = Result<Posting>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_posting().map_err(Into::into).transpose()
    }
}

#[cfg(test)]
mod tests {
    use lexis_budget_tracker::MemoryTracker;

    use super::*;
    use crate::{
        attributes::Token, config::TermsHashConfig, invert::invert_field, pipeline::FieldPipeline,
    };

    fn pipeline(options: IndexOptions) -> FieldPipeline {
        FieldPipeline::for_field(
            FieldInfo::new("body", 0).with_index_options(Some(options)),
            TermsHashConfig::default(),
            &MemoryTracker::new(),
            None,
        )
        .unwrap()
    }

    fn index_doc(pipeline: &mut FieldPipeline, doc_id: DocId, tokens: Vec<Token>) {
        pipeline.start(doc_id, 1).unwrap();
        invert_field(pipeline, tokens).unwrap();
        pipeline.finish().unwrap();
    }

    fn postings_of(pipeline: &mut FieldPipeline, term: &str) -> Vec<Posting> {
        let terms = pipeline.stage_terms::<FreqProxConsumer>(0).unwrap();
        let id = (0..terms.len() as TermId)
            .find(|&id| terms.term_bytes(id) == term.as_bytes())
            .unwrap();
        FreqProxPostings::new(&terms, id)
            .collect::<Result<Vec<_>>>()
            .unwrap()
    }

    fn tokens(text: &str) -> Vec<Token> {
        text.split(' ').map(Token::new).collect()
    }

    #[test]
    fn test_positions_across_docs() {
        let mut p = pipeline(IndexOptions::DocsAndFreqsAndPositions);
        index_doc(&mut p, 0, tokens("a b a"));
        index_doc(&mut p, 3, tokens("c"));
        index_doc(&mut p, 7, tokens("b b b a"));

        let a = postings_of(&mut p, "a");
        assert_eq!(a.len(), 2);
        assert_eq!((a[0].doc_id, a[0].freq), (0, 2));
        let positions = a[0].positions.iter().map(|e| e.position).collect::<Vec<_>>();
        assert_eq!(positions, vec![0, 2]);
        assert_eq!((a[1].doc_id, a[1].freq), (7, 1));
        assert_eq!(a[1].positions[0].position, 3);

        let b = postings_of(&mut p, "b");
        assert_eq!(b.iter().map(|p| p.doc_id).collect::<Vec<_>>(), vec![0, 7]);
        assert_eq!(b[1].freq, 3);

        let stats = p.consumer::<FreqProxConsumer>(0).unwrap().stats();
        assert_eq!(stats.doc_count, 3);
        assert_eq!(stats.sum_total_term_freq, 8);
        assert_eq!(stats.sum_doc_freq, 5);
        assert!(!stats.saw_payloads);
    }

    #[test]
    fn test_docs_only() {
        let mut p = pipeline(IndexOptions::Docs);
        index_doc(&mut p, 1, tokens("x x"));
        index_doc(&mut p, 4, tokens("x"));
        index_doc(&mut p, 9, tokens("y x"));
        let x = postings_of(&mut p, "x");
        assert_eq!(x.iter().map(|p| p.doc_id).collect::<Vec<_>>(), vec![1, 4, 9]);
        assert!(x.iter().all(|p| p.freq == 1 && p.positions.is_empty()));
    }

    #[test]
    fn test_payloads_and_offsets() {
        let mut p = pipeline(IndexOptions::DocsAndFreqsAndPositionsAndOffsets);
        let doc = vec![
            Token::new("fox").with_offsets(0, 3).with_payload(vec![9, 9]),
            Token::new("ran").with_offsets(4, 7),
            Token::new("fox").with_offsets(8, 11),
        ];
        index_doc(&mut p, 0, doc);
        let fox = postings_of(&mut p, "fox");
        assert_eq!(fox.len(), 1);
        assert_eq!(
            fox[0].positions,
            vec![
                PositionEntry {
                    position: 0,
                    payload: Some(vec![9, 9]),
                    offsets: Some((0, 3)),
                },
                PositionEntry {
                    position: 2,
                    payload: None,
                    offsets: Some((8, 11)),
                },
            ]
        );
        assert!(p.consumer::<FreqProxConsumer>(0).unwrap().stats().saw_payloads);
    }

    #[test]
    fn test_reset_clears_stats() {
        let mut p = pipeline(IndexOptions::DocsAndFreqs);
        index_doc(&mut p, 0, tokens("a b"));
        p.reset();
        assert_eq!(
            p.consumer::<FreqProxConsumer>(0).unwrap().stats(),
            FieldStats::default()
        );
    }

    #[test]
    fn test_bytes_per_posting() {
        assert_eq!(FreqProxPostingsArray::new(IndexOptions::Docs).bytes_per_posting(), 8);
        assert_eq!(
            FreqProxPostingsArray::new(IndexOptions::DocsAndFreqsAndPositionsAndOffsets)
                .bytes_per_posting(),
            20
        );
    }

    #[test]
    fn test_stream_count() {
        assert_eq!(FreqProxConsumer::new(IndexOptions::DocsAndFreqs).stream_count(), 1);
        assert_eq!(
            FreqProxConsumer::new(IndexOptions::DocsAndFreqsAndPositions).stream_count(),
            2
        );
    }
}
