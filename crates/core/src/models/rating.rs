//! Rating events

use super::{ItemId, UserId};
use serde::{Deserialize, Serialize};

/// One user's rating of one movie. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingEvent {
    pub user_id: UserId,
    pub item_id: ItemId,
    /// Star rating, 0.5..=5.0
    pub rating: f32,
    /// Seconds since the Unix epoch
    pub timestamp: i64,
}

impl RatingEvent {
    pub fn new(user_id: UserId, item_id: ItemId, rating: f32, timestamp: i64) -> Self {
        Self {
            user_id,
            item_id,
            rating,
            timestamp,
        }
    }
}
