use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::Card;

/// Persistence contract for cards. Every lookup and mutation is scoped to
/// the owning user.
#[async_trait]
pub trait CardRepository: Send + Sync {
    async fn create(&self, card: &Card) -> Result<Card>;

    async fn get_by_id(&self, id: Uuid, user_id: &str) -> Result<Option<Card>>;

    async fn get_by_user(&self, user_id: &str, skip: i64, limit: i64) -> Result<Vec<Card>>;

    /// Persist title, content, tags and `updated_at`. Fails when the card
    /// does not exist for its owner.
    async fn update(&self, card: &Card) -> Result<Card>;

    /// Returns whether a card was removed
    async fn delete(&self, id: Uuid, user_id: &str) -> Result<bool>;

    async fn count_by_user(&self, user_id: &str) -> Result<i64>;

    /// Substring match on title, front or back
    async fn search(&self, user_id: &str, query: &str, skip: i64, limit: i64) -> Result<Vec<Card>>;

    /// Cards carrying at least one of `tags`
    async fn get_by_tags(&self, user_id: &str, tags: &[String], skip: i64, limit: i64) -> Result<Vec<Card>>;
}
