use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Validation failures for card types, card content and card construction
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CardError {
    #[error("Unsupported card type: {0}")]
    UnsupportedType(String),

    #[error("Invalid {card_type} content: {reason}")]
    InvalidContent { card_type: CardType, reason: String },

    #[error("Content shape '{actual}' does not match card type '{expected}'")]
    ContentMismatch { expected: CardType, actual: CardType },

    #[error("Invalid card record: {0}")]
    InvalidRecord(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardType {
    Basic,
    Cloze,
    #[serde(rename = "qna")]
    QnA,
    Concept,
}

impl CardType {
    pub const ALL: [CardType; 4] = [CardType::Basic, CardType::Cloze, CardType::QnA, CardType::Concept];

    pub fn as_str(&self) -> &'static str {
        match self {
            CardType::Basic => "basic",
            CardType::Cloze => "cloze",
            CardType::QnA => "qna",
            CardType::Concept => "concept",
        }
    }

    /// Content fields a record of this type must carry
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            CardType::Basic => &["front", "back"],
            CardType::Cloze => &["front", "back", "cloze_text", "cloze_answer"],
            CardType::QnA => &["front", "back", "question", "answer"],
            CardType::Concept => &["front", "back", "concept", "definition", "examples"],
        }
    }
}

impl fmt::Display for CardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardType {
    type Err = CardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "basic" => Ok(CardType::Basic),
            "cloze" => Ok(CardType::Cloze),
            "qna" => Ok(CardType::QnA),
            "concept" => Ok(CardType::Concept),
            other => Err(CardError::UnsupportedType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicContent {
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClozeContent {
    pub front: String,
    pub back: String,
    pub cloze_text: String,
    pub cloze_answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QnAContent {
    pub front: String,
    pub back: String,
    pub question: String,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptContent {
    pub front: String,
    pub back: String,
    pub concept: String,
    pub definition: String,
    #[serde(default)]
    pub examples: Vec<String>,
}

/// Card content keyed by card type. Serializes as the flat field object of
/// its variant; deserialization is always driven by a known `CardType`
/// through [`CardContent::from_value`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CardContent {
    Basic(BasicContent),
    Cloze(ClozeContent),
    QnA(QnAContent),
    Concept(ConceptContent),
}

impl CardContent {
    /// Validate untyped JSON into the content shape of `card_type`.
    /// Unknown keys are ignored, missing or mistyped required fields fail.
    pub fn from_value(card_type: CardType, value: Value) -> Result<Self, CardError> {
        if !value.is_object() {
            return Err(CardError::InvalidContent {
                card_type,
                reason: "content must be a JSON object".to_string(),
            });
        }

        let invalid = |e: serde_json::Error| CardError::InvalidContent {
            card_type,
            reason: e.to_string(),
        };

        let content = match card_type {
            CardType::Basic => CardContent::Basic(serde_json::from_value(value).map_err(invalid)?),
            CardType::Cloze => CardContent::Cloze(serde_json::from_value(value).map_err(invalid)?),
            CardType::QnA => CardContent::QnA(serde_json::from_value(value).map_err(invalid)?),
            CardType::Concept => CardContent::Concept(serde_json::from_value(value).map_err(invalid)?),
        };

        Ok(content)
    }

    pub fn card_type(&self) -> CardType {
        match self {
            CardContent::Basic(_) => CardType::Basic,
            CardContent::Cloze(_) => CardType::Cloze,
            CardContent::QnA(_) => CardType::QnA,
            CardContent::Concept(_) => CardType::Concept,
        }
    }

    pub fn front(&self) -> &str {
        match self {
            CardContent::Basic(c) => &c.front,
            CardContent::Cloze(c) => &c.front,
            CardContent::QnA(c) => &c.front,
            CardContent::Concept(c) => &c.front,
        }
    }

    pub fn back(&self) -> &str {
        match self {
            CardContent::Basic(c) => &c.back,
            CardContent::Cloze(c) => &c.back,
            CardContent::QnA(c) => &c.back,
            CardContent::Concept(c) => &c.back,
        }
    }

    pub fn to_value(&self) -> Value {
        // Every variant is a plain struct of strings and JSON values.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A study card owned by a single user.
///
/// Fields are private so that ownership stays immutable, tags stay
/// de-duplicated and every mutation moves `updated_at` forward.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Card {
    id: Uuid,
    user_id: String,
    title: String,
    card_type: CardType,
    content: CardContent,
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Card {
    pub fn new(
        user_id: impl Into<String>,
        title: impl Into<String>,
        card_type: CardType,
        content: CardContent,
        tags: Vec<String>,
    ) -> Result<Self, CardError> {
        ensure_matching_type(card_type, &content)?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            title: title.into(),
            card_type,
            content,
            tags: dedup_tags(tags),
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuild a card from stored fields, keeping its id and timestamps
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: Uuid,
        user_id: String,
        title: String,
        card_type: CardType,
        content: CardContent,
        tags: Vec<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, CardError> {
        ensure_matching_type(card_type, &content)?;

        Ok(Self {
            id,
            user_id,
            title,
            card_type,
            content,
            tags: dedup_tags(tags),
            created_at,
            updated_at,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn card_type(&self) -> CardType {
        self.card_type
    }

    pub fn content(&self) -> &CardContent {
        &self.content
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn update_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    pub fn update_content(&mut self, content: CardContent) -> Result<(), CardError> {
        ensure_matching_type(self.card_type, &content)?;
        self.content = content;
        self.touch();
        Ok(())
    }

    /// Adds a tag unless already present. Returns whether the card changed.
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        if self.tags.contains(&tag) {
            return false;
        }
        self.tags.push(tag);
        self.touch();
        true
    }

    /// Removes a tag if present. Returns whether the card changed.
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        let before = self.tags.len();
        self.tags.retain(|t| t != tag);
        if self.tags.len() == before {
            return false;
        }
        self.touch();
        true
    }

    pub fn replace_tags(&mut self, tags: Vec<String>) {
        self.tags = dedup_tags(tags);
        self.touch();
    }

    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        self.tags.iter().any(|t| tags.contains(t))
    }

    // Strictly monotonic even when the clock has not advanced since the last write.
    fn touch(&mut self) {
        let now = Utc::now();
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + Duration::microseconds(1)
        };
    }
}

fn ensure_matching_type(card_type: CardType, content: &CardContent) -> Result<(), CardError> {
    let actual = content.card_type();
    if actual != card_type {
        return Err(CardError::ContentMismatch {
            expected: card_type,
            actual,
        });
    }
    Ok(())
}

fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        if !unique.contains(&tag) {
            unique.push(tag);
        }
    }
    unique
}

// Request / response DTOs

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCardRequest {
    pub title: String,
    pub card_type: CardType,
    pub content: Value,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateCardRequest {
    pub title: Option<String>,
    pub content: Option<Value>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardListResponse {
    pub cards: Vec<Card>,
    pub total: i64,
    pub skip: i64,
    pub limit: i64,
}

fn default_card_type() -> CardType {
    CardType::Basic
}

fn default_provider() -> String {
    "siliconflow".to_string()
}

fn default_max_cards() -> usize {
    5
}

fn default_auto_save() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateCardsRequest {
    pub text: String,
    #[serde(default = "default_card_type")]
    pub card_type: CardType,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_max_cards")]
    pub max_cards: usize,
    #[serde(default = "default_auto_save")]
    pub auto_save: bool,
}

/// A generated record that could not be turned into a card
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRecord {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateCardsResponse {
    pub generated_cards: Vec<Card>,
    pub saved_cards: Vec<Card>,
    pub total_generated: usize,
    pub total_saved: usize,
    pub skipped: Vec<SkippedRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn basic_card() -> Card {
        let content = CardContent::from_value(CardType::Basic, json!({"front": "Q", "back": "A"})).unwrap();
        Card::new("user-1", "Title", CardType::Basic, content, vec!["x".to_string()]).unwrap()
    }

    #[test]
    fn test_card_type_parsing() {
        assert_eq!("basic".parse::<CardType>().unwrap(), CardType::Basic);
        assert_eq!("Cloze".parse::<CardType>().unwrap(), CardType::Cloze);
        assert_eq!("qna".parse::<CardType>().unwrap(), CardType::QnA);
        assert_eq!(" concept ".parse::<CardType>().unwrap(), CardType::Concept);
        assert!(matches!("flash".parse::<CardType>(), Err(CardError::UnsupportedType(_))));
    }

    #[test]
    fn test_card_type_serde_names() {
        assert_eq!(serde_json::to_value(CardType::QnA).unwrap(), json!("qna"));
        let parsed: CardType = serde_json::from_value(json!("concept")).unwrap();
        assert_eq!(parsed, CardType::Concept);
    }

    #[test]
    fn test_content_requires_variant_fields() {
        let missing = CardContent::from_value(CardType::Cloze, json!({"front": "f", "back": "b"}));
        assert!(matches!(missing, Err(CardError::InvalidContent { .. })));

        let cloze = CardContent::from_value(
            CardType::Cloze,
            json!({"front": "f", "back": "b", "cloze_text": "The {{c1}}", "cloze_answer": "sun", "extra": 1}),
        )
        .unwrap();
        assert_eq!(cloze.card_type(), CardType::Cloze);
        assert!(cloze.to_value().get("extra").is_none());
    }

    #[test]
    fn test_content_optional_fields() {
        let qna = CardContent::from_value(
            CardType::QnA,
            json!({"front": "f", "back": "b", "question": "q", "answer": "a"}),
        )
        .unwrap();
        assert!(qna.to_value().get("follow_up").is_none());

        let concept = CardContent::from_value(
            CardType::Concept,
            json!({"front": "f", "back": "b", "concept": "c", "definition": "d"}),
        )
        .unwrap();
        match concept {
            CardContent::Concept(c) => assert!(c.examples.is_empty()),
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn test_content_rejects_non_object() {
        let result = CardContent::from_value(CardType::Basic, json!(["front", "back"]));
        assert!(matches!(result, Err(CardError::InvalidContent { .. })));
    }

    #[test]
    fn test_card_rejects_mismatched_content() {
        let content = CardContent::from_value(CardType::Basic, json!({"front": "Q", "back": "A"})).unwrap();
        let result = Card::new("user-1", "T", CardType::Concept, content, vec![]);
        assert!(matches!(result, Err(CardError::ContentMismatch { .. })));
    }

    #[test]
    fn test_tags_are_deduplicated_on_creation() {
        let content = CardContent::from_value(CardType::Basic, json!({"front": "Q", "back": "A"})).unwrap();
        let card = Card::new(
            "user-1",
            "T",
            CardType::Basic,
            content,
            vec!["a".to_string(), "b".to_string(), "a".to_string()],
        )
        .unwrap();
        assert_eq!(card.tags(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_add_tag_is_idempotent() {
        let mut card = basic_card();

        assert!(card.add_tag("rust"));
        let after_first = card.updated_at();
        assert!(!card.add_tag("rust"));

        assert_eq!(card.tags(), &["x".to_string(), "rust".to_string()]);
        assert_eq!(card.updated_at(), after_first);
    }

    #[test]
    fn test_mutations_advance_updated_at() {
        let mut card = basic_card();
        let mut previous = card.updated_at();

        card.update_title("New title");
        assert!(card.updated_at() > previous);
        previous = card.updated_at();

        card.add_tag("new");
        assert!(card.updated_at() > previous);
        previous = card.updated_at();

        assert!(card.remove_tag("new"));
        assert!(card.updated_at() > previous);
        previous = card.updated_at();

        let content = CardContent::from_value(CardType::Basic, json!({"front": "Q2", "back": "A2"})).unwrap();
        card.update_content(content).unwrap();
        assert!(card.updated_at() > previous);
        assert_eq!(card.content().front(), "Q2");
        assert!(card.created_at() < card.updated_at());
    }

    #[test]
    fn test_update_content_rejects_other_type() {
        let mut card = basic_card();
        let before = card.clone();
        let concept = CardContent::from_value(
            CardType::Concept,
            json!({"front": "f", "back": "b", "concept": "c", "definition": "d"}),
        )
        .unwrap();

        assert!(card.update_content(concept).is_err());
        assert_eq!(card, before);
    }

    #[test]
    fn test_remove_missing_tag_is_noop() {
        let mut card = basic_card();
        let before = card.updated_at();
        assert!(!card.remove_tag("absent"));
        assert_eq!(card.updated_at(), before);
    }

    #[test]
    fn test_ownership() {
        let card = basic_card();
        assert!(card.is_owned_by("user-1"));
        assert!(!card.is_owned_by("user-2"));
    }

    #[test]
    fn test_card_serializes_flat_content() {
        let card = basic_card();
        let value = serde_json::to_value(&card).unwrap();
        assert_eq!(value["card_type"], "basic");
        assert_eq!(value["content"]["front"], "Q");
        assert_eq!(value["content"]["back"], "A");
        assert_eq!(value["tags"], json!(["x"]));
    }

    #[test]
    fn test_generate_request_defaults() {
        let request: GenerateCardsRequest = serde_json::from_value(json!({"text": "Some text"})).unwrap();
        assert_eq!(request.card_type, CardType::Basic);
        assert_eq!(request.provider, "siliconflow");
        assert_eq!(request.max_cards, 5);
        assert!(request.auto_save);
    }
}
