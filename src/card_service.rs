use anyhow::Result;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::*;
use crate::repository::CardRepository;
use crate::{log_service_start, log_service_success};

#[derive(Clone)]
pub struct CardService {
    repository: Arc<dyn CardRepository>,
}

impl CardService {
    pub fn new(repository: Arc<dyn CardRepository>) -> Self {
        Self { repository }
    }

    pub fn repository(&self) -> Arc<dyn CardRepository> {
        Arc::clone(&self.repository)
    }

    // Card CRUD operations
    pub async fn create_card(&self, user_id: &str, request: CreateCardRequest) -> Result<Card> {
        log_service_start!("card_service", "create_card", user_id = user_id);

        let content = CardContent::from_value(request.card_type, request.content)?;
        let card = Card::new(
            user_id,
            request.title,
            request.card_type,
            content,
            request.tags.unwrap_or_default(),
        )?;

        let card = self.repository.create(&card).await?;
        log_service_success!("card_service", "create_card", card_id = card.id());
        Ok(card)
    }

    pub async fn get_card(&self, id: Uuid, user_id: &str) -> Result<Option<Card>> {
        self.repository.get_by_id(id, user_id).await
    }

    /// One page of the user's cards together with the user's total card count
    pub async fn get_user_cards(&self, user_id: &str, skip: i64, limit: i64) -> Result<(Vec<Card>, i64)> {
        let cards = self.repository.get_by_user(user_id, skip, limit).await?;
        let total = self.repository.count_by_user(user_id).await?;
        Ok((cards, total))
    }

    pub async fn update_card(&self, id: Uuid, user_id: &str, request: UpdateCardRequest) -> Result<Option<Card>> {
        log_service_start!("card_service", "update_card", user_id = user_id);

        let mut card = match self.repository.get_by_id(id, user_id).await? {
            Some(card) => card,
            None => return Ok(None),
        };

        if let Some(title) = request.title {
            card.update_title(title);
        }

        if let Some(content) = request.content {
            let content = CardContent::from_value(card.card_type(), content)?;
            card.update_content(content)?;
        }

        if let Some(tags) = request.tags {
            card.replace_tags(tags);
        }

        let card = self.repository.update(&card).await?;
        log_service_success!("card_service", "update_card", card_id = card.id());
        Ok(Some(card))
    }

    pub async fn delete_card(&self, id: Uuid, user_id: &str) -> Result<bool> {
        self.repository.delete(id, user_id).await
    }

    pub async fn search_cards(&self, user_id: &str, query: &str, skip: i64, limit: i64) -> Result<Vec<Card>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(CardError::InvalidRecord("search query must not be empty".to_string()).into());
        }
        self.repository.search(user_id, query, skip, limit).await
    }

    pub async fn get_cards_by_tags(&self, user_id: &str, tags: &[String], skip: i64, limit: i64) -> Result<Vec<Card>> {
        if tags.is_empty() {
            return Ok(Vec::new());
        }
        self.repository.get_by_tags(user_id, tags, skip, limit).await
    }
}
