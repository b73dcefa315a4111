//! Catalog and rating records shared by training and serving

pub mod movie;
pub mod rating;

pub use movie::Movie;
pub use rating::RatingEvent;

/// Internal catalog id. Ids are small contiguous integers assigned by the
/// catalog; `0` is reserved and never names a real movie.
pub type ItemId = u32;

/// Internal user id
pub type UserId = i64;

/// Item id reserved for "no item" in an under-full context window
pub const PADDING_ITEM_ID: ItemId = 0;
