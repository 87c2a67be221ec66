//! Turns raw model output into validated cards.
//!
//! The first greedy `{...}` span is decoded as the response object. A
//! response that cannot be decoded fails the whole batch; a single record
//! that does not fit the requested card type is skipped and reported.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::errors::LLMError;
use crate::models::{Card, CardContent, CardError, CardType, SkippedRecord};

static JSON_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").expect("static pattern compiles"));

/// Cards recovered from one response, plus the records that were dropped
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedBatch {
    pub cards: Vec<Card>,
    pub skipped: Vec<SkippedRecord>,
}

/// Greedy span from the first `{` to the last `}`, or the trimmed input
/// when there is none.
pub fn extract_json_object(raw: &str) -> &str {
    JSON_OBJECT
        .find(raw)
        .map(|m| m.as_str())
        .unwrap_or_else(|| raw.trim())
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationParser;

impl GenerationParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_generated_cards(&self, raw: &str, user_id: &str, card_type: CardType) -> Result<ParsedBatch, LLMError> {
        let candidate = extract_json_object(raw);

        let data: Value = serde_json::from_str(candidate).map_err(|e| LLMError::Parse(e.to_string()))?;
        let Value::Object(mut root) = data else {
            return Err(LLMError::Parse("response is not a JSON object".to_string()));
        };

        let records = match root.remove("cards") {
            Some(Value::Array(records)) => records,
            other => {
                debug!(cards_field = ?other.as_ref().map(value_kind), "No card array in generated content");
                return Ok(ParsedBatch::default());
            }
        };

        let mut batch = ParsedBatch::default();
        for (index, record) in records.into_iter().enumerate() {
            match build_card(record, user_id, card_type) {
                Ok(card) => batch.cards.push(card),
                Err(e) => {
                    warn!(
                        record_index = index,
                        card_type = %card_type,
                        error = %e,
                        "Skipping invalid generated card"
                    );
                    batch.skipped.push(SkippedRecord {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }

        debug!(
            parsed = batch.cards.len(),
            skipped = batch.skipped.len(),
            "Parsed generated cards"
        );

        Ok(batch)
    }
}

fn build_card(record: Value, user_id: &str, card_type: CardType) -> Result<Card, CardError> {
    let Value::Object(mut record) = record else {
        return Err(CardError::InvalidRecord("card entry is not an object".to_string()));
    };

    let content = record
        .remove("content")
        .ok_or_else(|| CardError::InvalidRecord("missing 'content'".to_string()))?;
    let content = CardContent::from_value(card_type, content)?;

    let title = match record.remove("title") {
        Some(Value::String(title)) => title,
        Some(_) => return Err(CardError::InvalidRecord("'title' must be a string".to_string())),
        None => return Err(CardError::InvalidRecord("missing 'title'".to_string())),
    };

    let tags = match record.remove("tags") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(tag) => Ok(tag),
                _ => Err(CardError::InvalidRecord("'tags' must contain only strings".to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(CardError::InvalidRecord("'tags' must be an array".to_string())),
    };

    Card::new(user_id, title, card_type, content, tags)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
