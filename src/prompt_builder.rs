use crate::models::CardType;

/// Render the card-generation instruction for `card_type`.
///
/// The text is embedded verbatim together with the card limit and a JSON
/// example whose `content` object carries the fields of that card type.
pub fn build_generation_prompt(text: &str, card_type: CardType, max_cards: usize) -> String {
    match card_type {
        CardType::Basic => format!(
            r#"Based on the following text, generate at most {max_cards} study cards. Each card contains one question and one answer.

Text:
{text}

Please respond with a JSON object in this exact format:
{{
    "cards": [
        {{
            "title": "Card title",
            "content": {{
                "front": "Question",
                "back": "Answer"
            }},
            "tags": ["tag1", "tag2"]
        }}
    ]
}}

Guidelines:
1. Questions should target the important concepts in the text
2. Answers must be accurate and concise
3. Tags should reflect the main topic of the card
4. Respond strictly in the JSON format above"#
        ),
        CardType::Cloze => format!(
            r#"Based on the following text, generate at most {max_cards} cloze deletion cards.

Text:
{text}

Please respond with a JSON object in this exact format:
{{
    "cards": [
        {{
            "title": "Card title",
            "content": {{
                "front": "Cloze prompt",
                "back": "Answer",
                "cloze_text": "Text with a {{blank}} to fill in",
                "cloze_answer": "Answer for the blank"
            }},
            "tags": ["tag1", "tag2"]
        }}
    ]
}}

Guidelines:
1. Choose key information from the text as the blank
2. Each blank should test understanding of an important concept
3. Respond strictly in the JSON format above"#
        ),
        CardType::QnA => format!(
            r#"Based on the following text, generate at most {max_cards} question and answer cards.

Text:
{text}

Please respond with a JSON object in this exact format:
{{
    "cards": [
        {{
            "title": "Card title",
            "content": {{
                "front": "Question and answer",
                "back": "Question and answer",
                "question": "Question",
                "answer": "Answer"
            }},
            "tags": ["tag1", "tag2"]
        }}
    ]
}}

Guidelines:
1. Questions should cover the core content of the text
2. Answers should be complete and accurate
3. Respond strictly in the JSON format above"#
        ),
        CardType::Concept => format!(
            r#"Based on the following text, generate at most {max_cards} concept cards.

Text:
{text}

Please respond with a JSON object in this exact format:
{{
    "cards": [
        {{
            "title": "Card title",
            "content": {{
                "front": "Concept",
                "back": "Concept",
                "concept": "Concept name",
                "definition": "Concept definition",
                "examples": ["Example 1", "Example 2"]
            }},
            "tags": ["tag1", "tag2"]
        }}
    ]
}}

Guidelines:
1. Identify the important concepts in the text
2. Provide a clear definition and concrete examples
3. Respond strictly in the JSON format above"#
        ),
    }
}
