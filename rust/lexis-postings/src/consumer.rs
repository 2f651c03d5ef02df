//! The format-specific side of an indexing stage.

use lexis_common::Result;

use crate::{
    TermId,
    attributes::AttributeSource,
    field::{FieldInfo, FieldInvertState},
    postings::PostingsArray,
    stage::StageTerms,
    stream::StreamWriter,
};

/// Everything a consumer may touch while handling one term occurrence.
pub struct TermContext<'a, A> {
    pub term_id: TermId,
    /// The consumer's columns; row `term_id` belongs to this term.
    pub postings: &'a mut A,
    /// Writer over this term's streams.
    pub streams: StreamWriter<'a>,
    pub state: &'a mut FieldInvertState,
    /// Attributes of the current token.
    pub attrs: &'a dyn AttributeSource,
}

/// Decides what a stage records for each term.
///
/// The stage interns every occurrence and allocates the term's streams; the
/// consumer only encodes. For one occurrence exactly one of
/// [`new_term`](Self::new_term) (first occurrence the consumer sees since the
/// stage was last cleared) or [`add_term`](Self::add_term) (every later one)
/// is called, and only while the consumer wants tokens for the current field.
/// A term the stage interned while the consumer did not want tokens still
/// reaches the consumer through `new_term` first.
pub trait PostingsConsumer: Send + 'static {
    type Postings: PostingsArray;

    /// Number of independent streams per term. Fixed for the consumer's
    /// lifetime.
    fn stream_count(&self) -> usize;

    /// Creates the consumer's columns of the metadata table, empty. The table
    /// sizes them from then on.
    fn create_postings_array(&self) -> Self::Postings;

    /// Called when a document starts providing `count` instances of `field`.
    /// Returns whether the consumer wants to see their tokens.
    fn start(&mut self, field: &FieldInfo, count: usize) -> Result<bool>;

    /// Called before the tokens of each field instance.
    fn start_field(&mut self, _field: &FieldInfo, _attrs: &dyn AttributeSource) -> Result<()> {
        Ok(())
    }

    fn new_term(&mut self, ctx: TermContext<'_, Self::Postings>);

    fn add_term(&mut self, ctx: TermContext<'_, Self::Postings>);

    /// Called once all instances of the field in the current document have
    /// been inverted.
    fn finish(
        &mut self,
        terms: StageTerms<'_, Self::Postings>,
        field: &FieldInfo,
        state: &FieldInvertState,
    ) -> Result<()>;

    /// Called when the stage drops all of its terms, for example once the
    /// in-memory segment has been flushed.
    fn reset(&mut self) {}

    /// Called when the pipeline is aborted. Must not fail.
    fn abort(&mut self) {
        self.reset();
    }
}
