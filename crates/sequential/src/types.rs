//! Core types for the sequential recommender

use movierec_core::{ItemId, Movie, RatingEvent, UserId, PADDING_ITEM_ID};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One user's ratings in ascending timestamp order
#[derive(Debug, Clone, PartialEq)]
pub struct UserSequence {
    pub user_id: UserId,
    pub events: Vec<RatingEvent>,
}

impl UserSequence {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn item_ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.events.iter().map(|e| e.item_id)
    }
}

/// A fixed-length context window and the item that followed it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrainingExample {
    /// Chronological item ids, right-padded with `PADDING_ITEM_ID`
    pub context: Vec<ItemId>,
    pub label: ItemId,
}

impl TrainingExample {
    /// Largest id referenced by the context or the label
    pub fn max_item_id(&self) -> ItemId {
        self.context
            .iter()
            .copied()
            .chain(std::iter::once(self.label))
            .max()
            .unwrap_or(PADDING_ITEM_ID)
    }
}

/// A candidate id with its retrieval score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredItem {
    pub item_id: ItemId,
    pub score: f32,
}

/// Display metadata for one catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDetails {
    pub item_id: ItemId,
    pub title: String,
    pub genres: Option<String>,
    pub resource_url: Option<String>,
    pub external_id: Option<i32>,
}

impl From<&Movie> for ItemDetails {
    fn from(movie: &Movie) -> Self {
        Self {
            item_id: movie.id,
            title: movie.title.clone(),
            genres: movie.genres.clone(),
            resource_url: movie.resource_url.clone(),
            external_id: movie.movie_lens_id,
        }
    }
}

/// Item id -> details lookup, rebuilt in full on every model load
#[derive(Debug, Clone, Default)]
pub struct ItemDetailCache {
    entries: HashMap<ItemId, ItemDetails>,
}

impl ItemDetailCache {
    /// Build from the full catalog. Always contains a synthetic entry for the
    /// padding id.
    pub fn from_catalog(movies: &[Movie]) -> Self {
        let mut entries: HashMap<ItemId, ItemDetails> =
            movies.iter().map(|m| (m.id, ItemDetails::from(m))).collect();

        entries.insert(
            PADDING_ITEM_ID,
            ItemDetails {
                item_id: PADDING_ITEM_ID,
                title: "Padding Token".to_string(),
                genres: None,
                resource_url: None,
                external_id: None,
            },
        );

        Self { entries }
    }

    pub fn get(&self, item_id: ItemId) -> Option<&ItemDetails> {
        self.entries.get(&item_id)
    }

    /// Number of real catalog entries (the padding entry is not counted)
    pub fn catalog_len(&self) -> usize {
        self.entries.len().saturating_sub(1)
    }
}

/// A single assembled recommendation, in model rank order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub item_id: ItemId,
    pub external_id: Option<i32>,
    pub title: String,
    pub genres: Option<String>,
    pub resource_url: Option<String>,
}

impl From<&ItemDetails> for Recommendation {
    fn from(details: &ItemDetails) -> Self {
        Self {
            item_id: details.item_id,
            external_id: details.external_id,
            title: details.title.clone(),
            genres: details.genres.clone(),
            resource_url: details.resource_url.clone(),
        }
    }
}
