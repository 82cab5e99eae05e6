//! Card Data Generator
//!
//! Asks the text service for a card, decodes the answer strictly, and falls
//! back to the synthesizer on any failure. Never returns an error: the
//! outcome is a `GenerationResult` that is either `Success` or `Fallback`.

use std::sync::Arc;

use indexmap::IndexMap;
use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::card::{CardRecord, Origin, Stats};
use crate::fallback::synthesize_card;
use crate::services::{ServiceError, TextService};

/// Why a service answer could not become a card.
#[derive(Debug, Error)]
pub enum GenerationFailure {
    #[error("text service failed: {0}")]
    Service(#[from] ServiceError),

    #[error("response is not a card object: {0}")]
    Decode(String),

    #[error("response is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is unusable: {reason}")]
    Coercion { field: String, reason: String },
}

#[derive(Debug)]
pub enum GenerationResult {
    Success(CardRecord),
    Fallback { record: CardRecord, cause: GenerationFailure },
}

impl GenerationResult {
    pub fn record(&self) -> &CardRecord {
        match self {
            GenerationResult::Success(record) => record,
            GenerationResult::Fallback { record, .. } => record,
        }
    }

    pub fn into_parts(self) -> (CardRecord, Option<GenerationFailure>) {
        match self {
            GenerationResult::Success(record) => (record, None),
            GenerationResult::Fallback { record, cause } => (record, Some(cause)),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, GenerationResult::Fallback { .. })
    }
}

/// One card to generate.
#[derive(Debug, Clone, Copy)]
pub struct CardRequest<'a> {
    pub theme: &'a str,
    pub card_type: &'a str,
    pub stat_keys: &'a [String],
    /// 1-based slot number
    pub ordinal: usize,
}

pub struct CardDataGenerator {
    service: Arc<dyn TextService>,
}

impl CardDataGenerator {
    pub fn new(service: Arc<dyn TextService>) -> Self {
        Self { service }
    }

    /// Single attempt, no retries. Timeouts are enforced by the service client.
    pub fn generate(&self, request: &CardRequest<'_>) -> GenerationResult {
        match self.request_card(request) {
            Ok(record) => {
                info!("card {}: generated \"{}\" ({})", request.ordinal, record.name, record.card_type);
                GenerationResult::Success(record)
            }
            Err(cause) => {
                warn!(
                    "card {}: falling back to generic {} card: {}",
                    request.ordinal, request.card_type, cause
                );
                let record =
                    synthesize_card(request.theme, request.card_type, request.stat_keys, request.ordinal);
                GenerationResult::Fallback { record, cause }
            }
        }
    }

    fn request_card(&self, request: &CardRequest<'_>) -> Result<CardRecord, GenerationFailure> {
        let prompt = build_prompt(request.theme, request.card_type, request.stat_keys);
        let content = self.service.complete(&prompt)?;
        decode_card(&content, request.card_type)
    }
}

pub fn build_prompt(theme: &str, card_type: &str, stat_keys: &[String]) -> String {
    let schema = serde_json::json!({
        "name": "string",
        "description": "string",
        "image_prompt": "string",
        "stats": {"stat_name": "integer"},
        "card_type": "string"
    });
    format!(
        "You are a creative assistant for a trading card game designer. \
         Generate a unique card concept for the theme '{theme}' and card type '{card_type}'. \
         Provide a name, a short description (max 100 characters), an image prompt for AI \
         image generation, and balanced stats using these stat names: {stats}. \
         Stat values must be small positive integers. Also include the card_type. \
         Your entire response MUST be a single valid JSON object with no text or markdown \
         before or after it, following this schema: {schema}.",
        theme = theme,
        card_type = card_type,
        stats = stat_keys.join(", "),
        schema = schema,
    )
}

#[derive(Deserialize)]
struct RawCard {
    name: Option<Value>,
    description: Option<Value>,
    image_prompt: Option<Value>,
    stats: Option<IndexMap<String, Value>>,
    card_type: Option<Value>,
}

/// Decodes a completion into a record of type `card_type`.
pub fn decode_card(content: &str, card_type: &str) -> Result<CardRecord, GenerationFailure> {
    let body = strip_code_fence(content);
    let raw: RawCard =
        serde_json::from_str(body).map_err(|e| GenerationFailure::Decode(e.to_string()))?;

    let name = coerce_text("name", required(raw.name, "name")?)?;
    if name.trim().is_empty() {
        return Err(GenerationFailure::Coercion {
            field: "name".to_string(),
            reason: "empty".to_string(),
        });
    }
    let description = coerce_text("description", required(raw.description, "description")?)?;
    let image_prompt = coerce_text("image_prompt", required(raw.image_prompt, "image_prompt")?)?;
    let raw_stats = raw.stats.ok_or(GenerationFailure::MissingField("stats"))?;
    // The record keeps the orchestrator's choice; the field only has to be present.
    required(raw.card_type, "card_type")?;

    let mut stats = Stats::with_capacity(raw_stats.len());
    for (key, value) in raw_stats {
        let v = coerce_stat(&key, &value)?;
        stats.insert(key, v);
    }

    Ok(CardRecord {
        name: name.trim().to_string(),
        description,
        image_prompt,
        stats,
        card_type: card_type.to_string(),
        origin: Origin::Service,
        rendered_image: None,
    })
}

fn required(value: Option<Value>, field: &'static str) -> Result<Value, GenerationFailure> {
    match value {
        Some(Value::Null) | None => Err(GenerationFailure::MissingField(field)),
        Some(v) => Ok(v),
    }
}

fn coerce_text(field: &str, value: Value) -> Result<String, GenerationFailure> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(GenerationFailure::Coercion {
            field: field.to_string(),
            reason: format!("expected text, got {}", json_kind(&other)),
        }),
    }
}

fn coerce_stat(key: &str, value: &Value) -> Result<u32, GenerationFailure> {
    let fail = |reason: String| GenerationFailure::Coercion {
        field: format!("stats.{}", key),
        reason,
    };

    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_u64() {
                u32::try_from(v).map_err(|_| fail(format!("{} is out of range", v)))
            } else if let Some(v) = n.as_i64() {
                Err(fail(format!("{} is negative", v)))
            } else {
                let f = n.as_f64().unwrap_or(f64::NAN);
                if f.is_finite() && f.fract() == 0.0 && f >= 0.0 && f <= f64::from(u32::MAX) {
                    Ok(f as u32)
                } else {
                    Err(fail(format!("{} is not a whole number", n)))
                }
            }
        }
        Value::String(s) => s
            .trim()
            .parse::<u32>()
            .map_err(|_| fail(format!("\"{}\" is not an integer", s))),
        other => Err(fail(format!("expected integer, got {}", json_kind(other)))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Removes a surrounding markdown code fence, if any.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let without_open = match trimmed.find('\n') {
        Some(pos) => &trimmed[pos + 1..],
        None => return trimmed,
    };
    without_open
        .trim_end()
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedText {
        reply: Result<String, ()>,
        calls: AtomicUsize,
    }

    impl CannedText {
        fn ok(reply: &str) -> Self {
            Self { reply: Ok(reply.to_string()), calls: AtomicUsize::new(0) }
        }

        fn failing() -> Self {
            Self { reply: Err(()), calls: AtomicUsize::new(0) }
        }
    }

    impl TextService for CannedText {
        fn complete(&self, _prompt: &str) -> Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map_err(|_| ServiceError::Timeout)
        }
    }

    fn keys() -> Vec<String> {
        vec!["Attack".into(), "Defense".into()]
    }

    fn request<'a>(keys: &'a [String]) -> CardRequest<'a> {
        CardRequest { theme: "Fantasy", card_type: "creature", stat_keys: keys, ordinal: 1 }
    }

    #[test]
    fn decodes_well_formed_card() {
        let card = decode_card(
            r#"{"name": "Ember Drake", "description": "Breathes fire.", "image_prompt": "a red drake",
                "stats": {"Attack": 5, "Defense": "3", "Mana": 2.0}, "card_type": "dragon"}"#,
            "creature",
        )
        .unwrap();
        assert_eq!(card.name, "Ember Drake");
        assert_eq!(card.card_type, "creature");
        assert_eq!(card.origin, Origin::Service);
        let stats: Vec<_> = card.stats.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        assert_eq!(stats, vec![("Attack", 5), ("Defense", 3), ("Mana", 2)]);
    }

    #[test]
    fn strips_markdown_fence() {
        let card = decode_card(
            "```json\n{\"name\": \"X\", \"description\": \"\", \"image_prompt\": \"p\", \"stats\": {}, \"card_type\": \"t\"}\n```",
            "spell",
        )
        .unwrap();
        assert_eq!(card.name, "X");
    }

    #[test]
    fn missing_field_is_a_failure() {
        let err = decode_card(
            r#"{"name": "X", "description": "", "stats": {}, "card_type": "t"}"#,
            "spell",
        )
        .unwrap_err();
        assert!(matches!(err, GenerationFailure::MissingField("image_prompt")));
    }

    #[test]
    fn uncoercible_stat_is_a_failure() {
        let err = decode_card(
            r#"{"name": "X", "description": "", "image_prompt": "p", "stats": {"Attack": "lots"}, "card_type": "t"}"#,
            "spell",
        )
        .unwrap_err();
        assert!(matches!(err, GenerationFailure::Coercion { .. }));

        let err = decode_card(
            r#"{"name": "X", "description": "", "image_prompt": "p", "stats": {"Attack": -2}, "card_type": "t"}"#,
            "spell",
        )
        .unwrap_err();
        assert!(err.to_string().contains("negative"));
    }

    #[test]
    fn non_text_name_is_a_failure() {
        let err = decode_card(
            r#"{"name": ["X"], "description": "", "image_prompt": "p", "stats": {}, "card_type": "t"}"#,
            "spell",
        )
        .unwrap_err();
        assert!(matches!(err, GenerationFailure::Coercion { .. }));
    }

    #[test]
    fn prose_reply_is_a_decode_failure() {
        let err = decode_card("Sure! Here is your card: Ember Drake", "spell").unwrap_err();
        assert!(matches!(err, GenerationFailure::Decode(_)));
    }

    #[test]
    fn service_failure_falls_back_after_one_call() {
        let service = Arc::new(CannedText::failing());
        let generator = CardDataGenerator::new(service.clone());
        let keys = keys();
        let result = generator.generate(&request(&keys));

        assert!(result.is_fallback());
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
        let record = result.record();
        assert_eq!(record.origin, Origin::Fallback);
        assert_eq!(record.card_type, "creature");
        assert!(record.name.contains("Fantasy"));
    }

    #[test]
    fn good_reply_is_success() {
        let service = Arc::new(CannedText::ok(
            r#"{"name": "Ember Drake", "description": "d", "image_prompt": "p", "stats": {"Attack": 1}, "card_type": "creature"}"#,
        ));
        let generator = CardDataGenerator::new(service);
        let keys = keys();
        let (record, cause) = generator.generate(&request(&keys)).into_parts();
        assert!(cause.is_none());
        assert_eq!(record.name, "Ember Drake");
    }

    #[test]
    fn prompt_names_theme_type_and_stats() {
        let prompt = build_prompt("Pirates", "location", &["Power".into(), "Cost".into()]);
        assert!(prompt.contains("'Pirates'"));
        assert!(prompt.contains("'location'"));
        assert!(prompt.contains("Power, Cost"));
        assert!(prompt.contains("\"image_prompt\""));
    }
}
