//! Catalog and rating stores
//!
//! Schema:
//! - movies(id, title, genres, resource_url, movie_lens_id)
//! - ratings(user_id, movie_id, rating, timestamp)

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use movierec_core::{ItemId, Movie, RatingEvent, UserId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Read access to the movie catalog
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Every catalog entry, ordered by id
    async fn all_items(&self) -> Result<Vec<Movie>>;

    /// Largest catalog id, or `None` for an empty catalog
    async fn max_item_id(&self) -> Result<Option<ItemId>>;
}

/// Read access to rating events
#[async_trait]
pub trait RatingStore: Send + Sync {
    /// Every rating with `rating >= min_rating`
    async fn ratings_for_training(&self, min_rating: f32) -> Result<Vec<RatingEvent>>;

    /// A user's most recent `limit` ratings, newest first
    async fn recent_ratings_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<RatingEvent>>;
}

fn item_id_from_db(raw: i32) -> Result<ItemId> {
    ItemId::try_from(raw).map_err(|_| anyhow!("Invalid movie id {} in store", raw))
}

fn rating_from_row(row: &PgRow) -> Result<RatingEvent> {
    let user_id: i32 = row.try_get("user_id")?;
    let movie_id: i32 = row.try_get("movie_id")?;
    let rating: f64 = row.try_get("rating")?;
    let timestamp: i64 = row.try_get("timestamp")?;

    Ok(RatingEvent::new(
        UserId::from(user_id),
        item_id_from_db(movie_id)?,
        rating as f32,
        timestamp,
    ))
}

/// PostgreSQL implementation of CatalogStore
pub struct PostgresCatalogStore {
    pool: PgPool,
}

impl PostgresCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogStore for PostgresCatalogStore {
    async fn all_items(&self) -> Result<Vec<Movie>> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, genres, resource_url, movie_lens_id
            FROM movies
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load movie catalog")?;

        rows.iter()
            .map(|row| -> Result<Movie> {
                Ok(Movie {
                    id: item_id_from_db(row.try_get("id")?)?,
                    title: row.try_get("title")?,
                    genres: row.try_get("genres")?,
                    resource_url: row.try_get("resource_url")?,
                    movie_lens_id: row.try_get("movie_lens_id")?,
                })
            })
            .collect()
    }

    async fn max_item_id(&self) -> Result<Option<ItemId>> {
        let max: Option<i32> = sqlx::query_scalar("SELECT MAX(id) FROM movies")
            .fetch_one(&self.pool)
            .await
            .context("Failed to query max movie id")?;

        max.map(item_id_from_db).transpose()
    }
}

/// PostgreSQL implementation of RatingStore
pub struct PostgresRatingStore {
    pool: PgPool,
}

impl PostgresRatingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RatingStore for PostgresRatingStore {
    async fn ratings_for_training(&self, min_rating: f32) -> Result<Vec<RatingEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, movie_id, rating::FLOAT8 AS rating, "timestamp"::BIGINT AS "timestamp"
            FROM ratings
            WHERE rating >= $1
            ORDER BY user_id, "timestamp"
            "#,
        )
        .bind(min_rating as f64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load ratings for training")?;

        tracing::debug!(rows = rows.len(), min_rating, "Loaded training ratings");

        rows.iter().map(rating_from_row).collect()
    }

    async fn recent_ratings_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<RatingEvent>> {
        let user_id =
            i32::try_from(user_id).map_err(|_| anyhow!("User id {} out of range", user_id))?;

        let rows = sqlx::query(
            r#"
            SELECT user_id, movie_id, rating::FLOAT8 AS rating, "timestamp"::BIGINT AS "timestamp"
            FROM ratings
            WHERE user_id = $1
            ORDER BY "timestamp" DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to load recent ratings for user {}", user_id))?;

        rows.iter().map(rating_from_row).collect()
    }
}

/// In-process store holding both catalog and ratings. Used by tests and
/// local tooling.
#[derive(Default)]
pub struct InMemoryStore {
    movies: RwLock<Vec<Movie>>,
    ratings: RwLock<Vec<RatingEvent>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(movies: Vec<Movie>, ratings: Vec<RatingEvent>) -> Self {
        Self {
            movies: RwLock::new(movies),
            ratings: RwLock::new(ratings),
            unavailable: AtomicBool::new(false),
        }
    }

    pub async fn add_movie(&self, movie: Movie) {
        self.movies.write().await.push(movie);
    }

    pub async fn add_rating(&self, rating: RatingEvent) {
        self.ratings.write().await.push(rating);
    }

    /// Make every subsequent read fail until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("Store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for InMemoryStore {
    async fn all_items(&self) -> Result<Vec<Movie>> {
        self.check_available()?;
        let mut movies = self.movies.read().await.clone();
        movies.sort_by_key(|m| m.id);
        Ok(movies)
    }

    async fn max_item_id(&self) -> Result<Option<ItemId>> {
        self.check_available()?;
        Ok(self.movies.read().await.iter().map(|m| m.id).max())
    }
}

#[async_trait]
impl RatingStore for InMemoryStore {
    async fn ratings_for_training(&self, min_rating: f32) -> Result<Vec<RatingEvent>> {
        self.check_available()?;
        Ok(self
            .ratings
            .read()
            .await
            .iter()
            .filter(|r| r.rating >= min_rating)
            .copied()
            .collect())
    }

    async fn recent_ratings_for_user(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<RatingEvent>> {
        self.check_available()?;
        let mut events: Vec<RatingEvent> = self
            .ratings
            .read()
            .await
            .iter()
            .filter(|r| r.user_id == user_id)
            .copied()
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(limit);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movie(id: ItemId) -> Movie {
        Movie {
            id,
            title: format!("Movie {}", id),
            genres: None,
            resource_url: None,
            movie_lens_id: Some(id as i32 * 10),
        }
    }

    #[tokio::test]
    async fn test_training_ratings_filter_inclusive() {
        let store = InMemoryStore::with_data(
            vec![],
            vec![
                RatingEvent::new(1, 1, 1.5, 1),
                RatingEvent::new(1, 2, 2.0, 2),
                RatingEvent::new(1, 3, 4.5, 3),
            ],
        );

        let ratings = store.ratings_for_training(2.0).await.unwrap();
        let ids: Vec<ItemId> = ratings.iter().map(|r| r.item_id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_recent_ratings_newest_first() {
        let store = InMemoryStore::new();
        for (item, ts) in [(1, 10), (2, 30), (3, 20), (4, 40)] {
            store.add_rating(RatingEvent::new(7, item, 3.0, ts)).await;
        }
        store.add_rating(RatingEvent::new(8, 9, 3.0, 50)).await;

        let recent = store.recent_ratings_for_user(7, 3).await.unwrap();
        let ids: Vec<ItemId> = recent.iter().map(|r| r.item_id).collect();
        assert_eq!(ids, vec![4, 2, 3]);
    }

    #[tokio::test]
    async fn test_catalog_max_id_and_unavailable() {
        let store = InMemoryStore::new();
        assert_eq!(store.max_item_id().await.unwrap(), None);

        store.add_movie(movie(5)).await;
        store.add_movie(movie(2)).await;
        assert_eq!(store.max_item_id().await.unwrap(), Some(5));
        assert_eq!(store.all_items().await.unwrap()[0].id, 2);

        store.set_unavailable(true);
        assert!(store.all_items().await.is_err());
    }

    #[test]
    fn test_recent_ratings_limit_larger_than_history() {
        let store = InMemoryStore::with_data(vec![], vec![RatingEvent::new(3, 1, 4.0, 5)]);
        let recent = tokio_test::block_on(store.recent_ratings_for_user(3, 20)).unwrap();
        assert_eq!(recent.len(), 1);
    }
}
