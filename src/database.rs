use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Instant;
use uuid::Uuid;

use crate::log_db_operation;
use crate::models::*;
use crate::repository::CardRepository;

const CARD_COLUMNS: &str = "id, user_id, title, card_type, content, tags, created_at, updated_at";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to an in-memory database sees its own empty
        // database, so those are pinned to one long-lived connection.
        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        let db = Database { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cards (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                card_type TEXT NOT NULL,
                content TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_cards_user_id ON cards(user_id)")
            .execute(&self.pool)
            .await?;

        log_db_operation!(info, "migrate", "cards schema ready");
        Ok(())
    }

    fn rows_to_cards(&self, rows: Vec<SqliteRow>) -> Result<Vec<Card>> {
        rows.iter().map(row_to_card).collect()
    }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    // Fixed width keeps lexical order equal to chronological order
    timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn row_to_card(row: &SqliteRow) -> Result<Card> {
    let card_type = CardType::from_str(&row.get::<String, _>("card_type"))?;
    let content_json: serde_json::Value = serde_json::from_str(&row.get::<String, _>("content"))?;
    let tags: Vec<String> = serde_json::from_str(&row.get::<String, _>("tags"))?;

    let card = Card::restore(
        Uuid::parse_str(&row.get::<String, _>("id"))?,
        row.get("user_id"),
        row.get("title"),
        card_type,
        CardContent::from_value(card_type, content_json)?,
        tags,
        parse_timestamp(&row.get::<String, _>("created_at"))?,
        parse_timestamp(&row.get::<String, _>("updated_at"))?,
    )?;

    Ok(card)
}

/// Escape LIKE wildcards so the query is matched literally
fn like_pattern(query: &str) -> String {
    let escaped = query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    format!("%{}%", escaped)
}

#[async_trait]
impl CardRepository for Database {
    async fn create(&self, card: &Card) -> Result<Card> {
        let start = Instant::now();

        sqlx::query(
            r#"
            INSERT INTO cards (id, user_id, title, card_type, content, tags, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(card.id().to_string())
        .bind(card.user_id())
        .bind(card.title())
        .bind(card.card_type().as_str())
        .bind(card.content().to_value().to_string())
        .bind(serde_json::to_string(card.tags())?)
        .bind(format_timestamp(card.created_at()))
        .bind(format_timestamp(card.updated_at()))
        .execute(&self.pool)
        .await?;

        log_db_operation!(
            debug,
            "insert_card",
            card_id = card.id(),
            duration_ms = start.elapsed().as_millis() as u64
        );
        Ok(card.clone())
    }

    async fn get_by_id(&self, id: Uuid, user_id: &str) -> Result<Option<Card>> {
        let start = Instant::now();
        let row = sqlx::query(&format!("SELECT {} FROM cards WHERE id = ?1 AND user_id = ?2", CARD_COLUMNS))
            .bind(id.to_string())
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        log_db_operation!(
            debug,
            "select_card",
            card_id = id,
            duration_ms = start.elapsed().as_millis() as u64
        );
        row.as_ref().map(row_to_card).transpose()
    }

    async fn get_by_user(&self, user_id: &str, skip: i64, limit: i64) -> Result<Vec<Card>> {
        let start = Instant::now();
        let rows = sqlx::query(&format!(
            "SELECT {} FROM cards WHERE user_id = ?1 ORDER BY created_at DESC, id LIMIT ?2 OFFSET ?3",
            CARD_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;

        log_db_operation!(
            debug,
            "list_cards",
            count = rows.len(),
            duration_ms = start.elapsed().as_millis() as u64
        );
        self.rows_to_cards(rows)
    }

    async fn update(&self, card: &Card) -> Result<Card> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE cards
            SET title = ?1, content = ?2, tags = ?3, updated_at = ?4
            WHERE id = ?5 AND user_id = ?6
            "#,
        )
        .bind(card.title())
        .bind(card.content().to_value().to_string())
        .bind(serde_json::to_string(card.tags())?)
        .bind(format_timestamp(card.updated_at()))
        .bind(card.id().to_string())
        .bind(card.user_id())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(anyhow!("Card {} not found for user {}", card.id(), card.user_id()));
        }

        log_db_operation!(
            debug,
            "update_card",
            card_id = card.id(),
            duration_ms = start.elapsed().as_millis() as u64
        );
        Ok(card.clone())
    }

    async fn delete(&self, id: Uuid, user_id: &str) -> Result<bool> {
        let start = Instant::now();
        let result = sqlx::query("DELETE FROM cards WHERE id = ?1 AND user_id = ?2")
            .bind(id.to_string())
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        log_db_operation!(
            debug,
            "delete_card",
            card_id = id,
            duration_ms = start.elapsed().as_millis() as u64
        );
        Ok(result.rows_affected() > 0)
    }

    async fn count_by_user(&self, user_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM cards WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("total"))
    }

    async fn search(&self, user_id: &str, query: &str, skip: i64, limit: i64) -> Result<Vec<Card>> {
        let start = Instant::now();
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM cards
            WHERE user_id = ?1
              AND (title LIKE ?2 ESCAPE '\'
                   OR json_extract(content, '$.front') LIKE ?2 ESCAPE '\'
                   OR json_extract(content, '$.back') LIKE ?2 ESCAPE '\')
            ORDER BY created_at DESC, id
            LIMIT ?3 OFFSET ?4
            "#,
            CARD_COLUMNS
        ))
        .bind(user_id)
        .bind(like_pattern(query))
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;

        log_db_operation!(
            debug,
            "search_cards",
            count = rows.len(),
            duration_ms = start.elapsed().as_millis() as u64
        );
        self.rows_to_cards(rows)
    }

    async fn get_by_tags(&self, user_id: &str, tags: &[String], skip: i64, limit: i64) -> Result<Vec<Card>> {
        let start = Instant::now();
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM cards
            WHERE user_id = ?1
              AND EXISTS (
                  SELECT 1 FROM json_each(cards.tags) AS card_tag
                  JOIN json_each(?2) AS wanted ON card_tag.value = wanted.value
              )
            ORDER BY created_at DESC, id
            LIMIT ?3 OFFSET ?4
            "#,
            CARD_COLUMNS
        ))
        .bind(user_id)
        .bind(serde_json::to_string(tags)?)
        .bind(limit)
        .bind(skip)
        .fetch_all(&self.pool)
        .await?;

        log_db_operation!(
            debug,
            "cards_by_tags",
            count = rows.len(),
            duration_ms = start.elapsed().as_millis() as u64
        );
        self.rows_to_cards(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn basic_card(user_id: &str, title: &str, front: &str, tags: &[&str]) -> Card {
        let content = CardContent::from_value(CardType::Basic, json!({"front": front, "back": "answer"})).unwrap();
        Card::new(
            user_id,
            title,
            CardType::Basic,
            content,
            tags.iter().map(|t| t.to_string()).collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_and_get_roundtrip() {
        let db = memory_db().await;
        let card = basic_card("alice", "Rust", "What is ownership?", &["rust", "memory"]);
        db.create(&card).await.unwrap();

        let stored = db.get_by_id(card.id(), "alice").await.unwrap().unwrap();
        assert_eq!(stored, card);
    }

    #[tokio::test]
    async fn test_queries_are_scoped_to_owner() {
        let db = memory_db().await;
        let card = basic_card("alice", "Private", "front", &[]);
        db.create(&card).await.unwrap();

        assert!(db.get_by_id(card.id(), "bob").await.unwrap().is_none());
        assert!(!db.delete(card.id(), "bob").await.unwrap());
        assert_eq!(db.count_by_user("bob").await.unwrap(), 0);
        assert_eq!(db.count_by_user("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let db = memory_db().await;
        let mut card = basic_card("alice", "Old", "front", &["a"]);
        db.create(&card).await.unwrap();

        card.update_title("New");
        card.add_tag("b");
        db.update(&card).await.unwrap();

        let stored = db.get_by_id(card.id(), "alice").await.unwrap().unwrap();
        assert_eq!(stored.title(), "New");
        assert_eq!(stored.tags(), ["a".to_string(), "b".to_string()]);
        assert_eq!(stored.updated_at(), card.updated_at());

        assert!(db.delete(card.id(), "alice").await.unwrap());
        assert!(db.get_by_id(card.id(), "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_card_fails() {
        let db = memory_db().await;
        let card = basic_card("alice", "Never stored", "front", &[]);
        let err = db.update(&card).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_pagination() {
        let db = memory_db().await;
        for i in 0..5 {
            db.create(&basic_card("alice", &format!("Card {}", i), "front", &[])).await.unwrap();
        }

        assert_eq!(db.get_by_user("alice", 0, 2).await.unwrap().len(), 2);
        assert_eq!(db.get_by_user("alice", 4, 10).await.unwrap().len(), 1);
        assert_eq!(db.get_by_user("alice", 0, 100).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_search_matches_title_front_and_back() {
        let db = memory_db().await;
        db.create(&basic_card("alice", "Borrow checker", "front", &[])).await.unwrap();
        db.create(&basic_card("alice", "Other", "What does the borrow checker do?", &[])).await.unwrap();
        db.create(&basic_card("alice", "Unrelated", "lifetimes", &[])).await.unwrap();
        db.create(&basic_card("bob", "Borrow", "front", &[])).await.unwrap();

        let found = db.search("alice", "borrow", 0, 100).await.unwrap();
        assert_eq!(found.len(), 2);

        let by_back = db.search("alice", "answer", 0, 100).await.unwrap();
        assert_eq!(by_back.len(), 3);

        let literal = db.search("alice", "100%", 0, 100).await.unwrap();
        assert!(literal.is_empty());
    }

    #[tokio::test]
    async fn test_get_by_tags_matches_any_overlap() {
        let db = memory_db().await;
        db.create(&basic_card("alice", "A", "f", &["rust", "async"])).await.unwrap();
        db.create(&basic_card("alice", "B", "f", &["python"])).await.unwrap();
        db.create(&basic_card("alice", "C", "f", &[])).await.unwrap();

        let tags = vec!["async".to_string(), "python".to_string()];
        let found = db.get_by_tags("alice", &tags, 0, 100).await.unwrap();
        let mut titles: Vec<&str> = found.iter().map(|c| c.title()).collect();
        titles.sort();
        assert_eq!(titles, vec!["A", "B"]);

        let none = db.get_by_tags("alice", &["go".to_string()], 0, 100).await.unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
