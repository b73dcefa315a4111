//! Catalog entries

use super::ItemId;
use serde::{Deserialize, Serialize};

/// A movie as the catalog exposes it to the recommender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movie {
    /// Internal id; also the row index into every embedding table
    pub id: ItemId,
    pub title: String,
    /// Pipe-separated genre list, e.g. `"Adventure|Comedy"`
    pub genres: Option<String>,
    pub resource_url: Option<String>,
    /// Id in the MovieLens dataset the catalog was seeded from
    pub movie_lens_id: Option<i32>,
}
