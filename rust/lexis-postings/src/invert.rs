use lexis_common::{Result, error::Error};

use crate::{attributes::AttributeSource, pipeline::FieldPipeline};

/// Feeds the tokens of one field instance through `pipeline`, keeping the
/// field's invert state in step: positions follow the tokens' increments,
/// stacked tokens (increment 0) count as overlaps, and the instance's end
/// offset becomes the offset base of the next instance.
///
/// The pipeline must have been started for the current document. Call once
/// per instance, then [`FieldPipeline::finish`] once per document.
pub fn invert_field<I>(pipeline: &mut FieldPipeline, tokens: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: AttributeSource,
{
    let mut started = false;
    let mut end_offset = 0;
    for token in tokens {
        if !started {
            pipeline.start_field(&token)?;
            started = true;
        }

        let increment = token.position_increment();
        let state = pipeline.invert_state_mut();
        if increment == 0 && state.position == 0 && state.length == 0 {
            return Err(Error::invalid_arg(
                "position_increment",
                "the first token of a field must have a position increment above 0",
            ));
        }
        let position = state.position.checked_add(increment).ok_or_else(|| {
            Error::invalid_arg("position_increment", "position overflows u32")
        })?;
        state.position = position.saturating_sub(1);
        if increment == 0 {
            state.num_overlap += 1;
        }
        if let Some((start, end)) = token.offsets() {
            if start < state.last_start_offset || end < start {
                return Err(Error::invalid_arg(
                    "offsets",
                    format!(
                        "offsets must not go backwards: start {start}, end {end}, \
                         last start {}",
                        state.last_start_offset
                    ),
                ));
            }
            state.last_start_offset = start;
            end_offset = end_offset.max(end);
        }

        pipeline.add_occurrence(&token)?;

        let state = pipeline.invert_state_mut();
        state.length += 1;
        state.position += 1;
    }

    let state = pipeline.invert_state_mut();
    state.offset += end_offset;
    state.last_start_offset = 0;
    Ok(())
}

#[cfg(test)]
mod tests {
    use lexis_budget_tracker::MemoryTracker;
    use lexis_common::error::ErrorKind;

    use super::*;
    use crate::{
        attributes::Token,
        config::TermsHashConfig,
        field::FieldInfo,
        term_vectors::TermVectorsConsumer,
    };

    fn pipeline() -> FieldPipeline {
        FieldPipeline::for_field(
            FieldInfo::new("body", 0).with_term_vectors(true, true),
            TermsHashConfig::default(),
            &MemoryTracker::new(),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_positions_and_overlaps() {
        let mut p = pipeline();
        p.start(0, 1).unwrap();
        let tokens = vec![
            Token::new("quick"),
            Token::new("fast").with_position_increment(0),
            Token::new("fox").with_position_increment(2),
        ];
        invert_field(&mut p, tokens).unwrap();
        let state = p.invert_state();
        assert_eq!(state.length, 3);
        assert_eq!(state.num_overlap, 1);
        // quick=0, fast=0, fox=2; the next token would start from 3.
        assert_eq!(state.position, 3);
        p.finish().unwrap();

        let vectors = p
            .consumer_mut::<TermVectorsConsumer>(1)
            .unwrap()
            .take_buffered();
        let positions = vectors[0]
            .terms
            .iter()
            .map(|v| (v.term.clone(), v.positions.clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            positions,
            vec![
                (b"fast".to_vec(), vec![0]),
                (b"fox".to_vec(), vec![2]),
                (b"quick".to_vec(), vec![0]),
            ]
        );
    }

    #[test]
    fn test_multiple_instances() {
        let mut p = pipeline();
        p.start(0, 2).unwrap();
        invert_field(&mut p, vec![Token::new("a").with_offsets(0, 1)]).unwrap();
        invert_field(&mut p, vec![Token::new("a").with_offsets(0, 1)]).unwrap();
        assert_eq!(p.invert_state().offset, 2);
        assert_eq!(p.invert_state().length, 2);
        p.finish().unwrap();

        let vectors = p
            .consumer_mut::<TermVectorsConsumer>(1)
            .unwrap()
            .take_buffered();
        let a = &vectors[0].terms[0];
        assert_eq!(a.positions, vec![0, 1]);
        assert_eq!(a.offsets, vec![(0, 1), (1, 2)]);
    }

    #[test]
    fn test_rejects_leading_zero_increment() {
        let mut p = pipeline();
        p.start(0, 1).unwrap();
        let err = invert_field(&mut p, vec![Token::new("a").with_position_increment(0)])
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidArgument { .. }));
    }

    #[test]
    fn test_rejects_backwards_offsets() {
        let mut p = pipeline();
        p.start(0, 1).unwrap();
        let tokens = vec![
            Token::new("a").with_offsets(5, 6),
            Token::new("b").with_offsets(2, 3),
        ];
        assert!(invert_field(&mut p, tokens).is_err());
    }

    #[test]
    fn test_empty_instance() {
        let mut p = pipeline();
        p.start(0, 1).unwrap();
        invert_field(&mut p, Vec::<Token>::new()).unwrap();
        p.finish().unwrap();
        assert_eq!(p.term_count(0), 0);
    }
}
