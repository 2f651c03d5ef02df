//! Field descriptors and the per-document field state.

use crate::DocId;

/// How much posting detail an indexed field records. Variants are ordered:
/// each level includes everything recorded by the previous ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexOptions {
    Docs,
    DocsAndFreqs,
    DocsAndFreqsAndPositions,
    DocsAndFreqsAndPositionsAndOffsets,
}

impl IndexOptions {
    pub fn has_freqs(self) -> bool {
        self >= IndexOptions::DocsAndFreqs
    }

    pub fn has_positions(self) -> bool {
        self >= IndexOptions::DocsAndFreqsAndPositions
    }

    pub fn has_offsets(self) -> bool {
        self >= IndexOptions::DocsAndFreqsAndPositionsAndOffsets
    }
}

/// Per-field configuration, consulted when the pipeline for a field is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub number: u32,
    /// `None` for fields that are not inverted.
    pub index_options: Option<IndexOptions>,
    pub store_term_vectors: bool,
    pub store_term_vector_positions: bool,
    pub store_term_vector_offsets: bool,
    pub omit_norms: bool,
}

impl FieldInfo {
    /// An indexed field recording documents, frequencies and positions.
    pub fn new(name: impl Into<String>, number: u32) -> FieldInfo {
        FieldInfo {
            name: name.into(),
            number,
            index_options: Some(IndexOptions::DocsAndFreqsAndPositions),
            store_term_vectors: false,
            store_term_vector_positions: false,
            store_term_vector_offsets: false,
            omit_norms: false,
        }
    }

    pub fn with_index_options(mut self, options: Option<IndexOptions>) -> FieldInfo {
        self.index_options = options;
        self
    }

    pub fn with_term_vectors(mut self, positions: bool, offsets: bool) -> FieldInfo {
        self.store_term_vectors = true;
        self.store_term_vector_positions = positions;
        self.store_term_vector_offsets = offsets;
        self
    }

    pub fn with_omit_norms(mut self, omit: bool) -> FieldInfo {
        self.omit_norms = omit;
        self
    }

    pub fn is_indexed(&self) -> bool {
        self.index_options.is_some()
    }
}

/// Ephemeral statistics of the field being inverted in the current document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldInvertState {
    pub doc_id: DocId,
    /// Position of the current token once the inverter has applied its
    /// increment; the position of the next token's base afterwards.
    pub position: u32,
    /// Number of tokens consumed.
    pub length: u32,
    /// Tokens stacked on the previous position (increment 0).
    pub num_overlap: u32,
    /// Base character offset of the current field instance.
    pub offset: u32,
    pub last_start_offset: u32,
    pub max_term_frequency: u32,
    pub unique_term_count: u32,
    /// Occurrences dropped because their term could not fit an arena block.
    pub skipped_terms: u32,
    /// Leading bytes of the first skipped term, kept for diagnostics.
    pub max_term_prefix: Option<Vec<u8>>,
}

impl FieldInvertState {
    pub const MAX_TERM_PREFIX_LEN: usize = 30;

    pub fn new(doc_id: DocId) -> FieldInvertState {
        FieldInvertState {
            doc_id,
            ..Default::default()
        }
    }

    pub fn reset(&mut self, doc_id: DocId) {
        *self = FieldInvertState::new(doc_id);
    }

    pub(crate) fn record_skipped(&mut self, term: &[u8]) {
        self.skipped_terms += 1;
        if self.max_term_prefix.is_none() {
            let len = term.len().min(Self::MAX_TERM_PREFIX_LEN);
            self.max_term_prefix = Some(term[..len].to_vec());
        }
    }
}
