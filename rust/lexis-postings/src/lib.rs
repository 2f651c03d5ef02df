//! In-memory postings construction.
//!
//! This crate turns the token stream of an indexed field into interned terms
//! and compact per-term posting streams, ready to be serialized by a format
//! writer once the in-memory segment is flushed.
//!
//! # Overview
//!
//! The building blocks, leaf first:
//!
//! 1. [`pool`]: fixed-size block arenas (`u32` and byte) addressed by global
//!    offsets, plus the chained slice scheme and [`pool::ByteSliceReader`].
//! 2. [`bytes_hash`]: the open-addressing term interner whose keys live in a
//!    byte arena.
//! 3. [`postings`]: the per-term metadata table that grows in lock-step with
//!    the interner and carries consumer-specific columns.
//! 4. [`stream`]: the slice stream writer used by consumers to append bytes
//!    and variable-length integers to a term's streams.
//! 5. [`pipeline`]: the per-field state machine that drives a list of
//!    [`stage`]s, each pairing an interner with a [`consumer::PostingsConsumer`].
//!
//! Two consumers ship with the crate: [`freq_prox::FreqProxConsumer`] writes
//! doc/frequency and position streams, [`term_vectors::TermVectorsConsumer`]
//! collects per-document term vectors as a secondary stage.
//!
//! # Example
//!
//! ```rust
//! use lexis_budget_tracker::MemoryTracker;
//! use lexis_postings::{
//!     attributes::Token, config::TermsHashConfig, field::FieldInfo,
//!     freq_prox::FreqProxConsumer, invert::invert_field, pipeline::FieldPipeline,
//! };
//!
//! let memory = MemoryTracker::new();
//! let mut pipeline = FieldPipeline::for_field(
//!     FieldInfo::new("body", 0),
//!     TermsHashConfig::default(),
//!     &memory,
//!     None,
//! )
//! .unwrap();
//!
//! pipeline.start(0, 1).unwrap();
//! let tokens = ["the", "quick", "the"].map(Token::new);
//! invert_field(&mut pipeline, tokens).unwrap();
//! pipeline.finish().unwrap();
//!
//! let terms = pipeline.stage_terms::<FreqProxConsumer>(0).unwrap();
//! assert_eq!(terms.len(), 2);
//! ```

pub mod attributes;
pub mod bytes_hash;
pub mod config;
pub mod consumer;
pub mod field;
pub mod freq_prox;
pub mod invert;
pub mod pipeline;
pub mod pool;
pub mod postings;
pub mod stage;
pub mod stream;
pub mod term_vectors;

/// Identifier of an interned term, dense in `[0, len)` for one interner.
pub type TermId = u32;

/// Identifier of a document within the in-memory segment.
pub type DocId = u32;

pub use config::TermsHashConfig;
pub use pipeline::{FieldPipeline, PipelineState};
