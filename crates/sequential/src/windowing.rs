//! Sequence windowing
//!
//! Turns per-user chronological rating lists into fixed-length
//! `(context, label)` training windows, and prepares serving-time contexts
//! with the same padding layout.
//!
//! Layout: contexts are chronological and right-padded. For
//! `MAX_CONTEXT_LENGTH = 5`, history `[m1, m2]` becomes `[m1, m2, 0, 0, 0]`.

use crate::types::{TrainingExample, UserSequence};
use movierec_core::{ItemId, RatingEvent, UserId, PADDING_ITEM_ID};
use std::collections::BTreeMap;

pub const DEFAULT_MAX_CONTEXT_LENGTH: usize = 10;
pub const DEFAULT_MIN_SEQUENCE_LENGTH: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct SequenceWindower {
    max_context_length: usize,
    min_sequence_length: usize,
}

impl Default for SequenceWindower {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONTEXT_LENGTH, DEFAULT_MIN_SEQUENCE_LENGTH)
    }
}

impl SequenceWindower {
    pub fn new(max_context_length: usize, min_sequence_length: usize) -> Self {
        Self {
            max_context_length: max_context_length.max(1),
            min_sequence_length,
        }
    }

    pub fn max_context_length(&self) -> usize {
        self.max_context_length
    }

    pub fn min_sequence_length(&self) -> usize {
        self.min_sequence_length
    }

    /// Group rating events by user and sort each user's events by timestamp.
    ///
    /// Sorting is stable, so events sharing a timestamp keep their store order.
    /// Events naming the padding id are dropped: id 0 never denotes a movie.
    pub fn group_user_sequences(
        &self,
        events: impl IntoIterator<Item = RatingEvent>,
    ) -> BTreeMap<UserId, UserSequence> {
        let mut sequences: BTreeMap<UserId, UserSequence> = BTreeMap::new();
        let mut dropped = 0usize;

        for event in events {
            if event.item_id == PADDING_ITEM_ID {
                dropped += 1;
                continue;
            }
            sequences
                .entry(event.user_id)
                .or_insert_with(|| UserSequence {
                    user_id: event.user_id,
                    events: Vec::new(),
                })
                .events
                .push(event);
        }

        if dropped > 0 {
            tracing::warn!(
                dropped,
                "Dropped rating events referencing the reserved padding id"
            );
        }

        for sequence in sequences.values_mut() {
            sequence.events.sort_by_key(|e| e.timestamp);
        }

        sequences
    }

    /// Generate training examples for every user with enough history.
    ///
    /// A retained sequence of length `n` yields exactly `n - 1` examples.
    pub fn generate_examples<'a>(
        &self,
        sequences: impl IntoIterator<Item = &'a UserSequence>,
    ) -> Vec<TrainingExample> {
        let mut examples = Vec::new();
        let mut skipped_users = 0usize;

        for sequence in sequences {
            if sequence.len() < self.min_sequence_length {
                skipped_users += 1;
                continue;
            }
            let items: Vec<ItemId> = sequence.item_ids().collect();
            examples.extend(self.examples_for_sequence(&items));
        }

        tracing::debug!(
            examples = examples.len(),
            skipped_users,
            min_sequence_length = self.min_sequence_length,
            "Generated training examples"
        );

        examples
    }

    /// Examples for one chronological item list; no length gate applied.
    pub fn examples_for_sequence(&self, items: &[ItemId]) -> Vec<TrainingExample> {
        (1..items.len())
            .map(|label_idx| {
                let start = label_idx.saturating_sub(self.max_context_length);
                TrainingExample {
                    context: self.pad(&items[start..label_idx]),
                    label: items[label_idx],
                }
            })
            .collect()
    }

    /// Serving-time context: the most recent `max_context_length` items of a
    /// chronological history, right-padded.
    pub fn prediction_context(&self, history: &[ItemId]) -> Vec<ItemId> {
        let start = history.len().saturating_sub(self.max_context_length);
        self.pad(&history[start..])
    }

    fn pad(&self, window: &[ItemId]) -> Vec<ItemId> {
        let mut context = Vec::with_capacity(self.max_context_length);
        context.extend_from_slice(window);
        context.resize(self.max_context_length, PADDING_ITEM_ID);
        context
    }
}
