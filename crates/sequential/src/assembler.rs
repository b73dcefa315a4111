//! Recommendation assembly
//!
//! Turns a ranked id list into display-ready recommendations.

use crate::types::{ItemDetailCache, Recommendation};
use movierec_core::{ItemId, PADDING_ITEM_ID};
use std::collections::HashSet;

pub struct RecommendationAssembler;

impl RecommendationAssembler {
    /// Walk `ranked` in order and keep the first `count` usable ids.
    ///
    /// Skips the padding id, ids in `seen` when `exclude_watched` is set, and
    /// ids with no catalog entry.
    pub fn execute(
        ranked: impl IntoIterator<Item = ItemId>,
        seen: &HashSet<ItemId>,
        exclude_watched: bool,
        count: usize,
        details: &ItemDetailCache,
    ) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();
        if count == 0 {
            return recommendations;
        }

        for item_id in ranked {
            if item_id == PADDING_ITEM_ID {
                continue;
            }
            if exclude_watched && seen.contains(&item_id) {
                continue;
            }

            match details.get(item_id) {
                Some(entry) => recommendations.push(Recommendation::from(entry)),
                None => {
                    tracing::warn!(item_id, "Recommended item missing from detail cache");
                }
            }

            if recommendations.len() >= count {
                break;
            }
        }

        recommendations
    }
}
