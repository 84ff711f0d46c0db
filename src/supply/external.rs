//! External problem generator seam
//!
//! The generator speaks a JSON array of `{question, answer, operation}`
//! objects, but replies are often wrapped in prose or markdown fences and
//! sometimes cut off mid-array. `parse_response` recovers every complete
//! object it can find.

use serde_json::Value;

use crate::error::GeneratorError;

/// Host-provided content source (HTTP, model API, fixture...)
pub trait ExternalGenerator {
    /// Raw response text for a batch request
    fn generate(&mut self, topic: &str, level: u32, count: usize) -> Result<String, GeneratorError>;
}

/// Request text matching the response contract
pub fn build_prompt(topic: &str, level: u32, count: usize) -> String {
    format!(
        "Generate {count} {topic} practice problems for difficulty level {level} of 10. \
         Reply with only a JSON array of objects with string fields \
         \"question\", \"answer\" and \"operation\" (the operation name, e.g. \"{topic}\")."
    )
}

/// One usable item from a generator reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedItem {
    pub question: String,
    pub answer: String,
    pub operation: String,
}

impl GeneratedItem {
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let question = object.get("question")?.as_str()?.trim().to_string();
        let answer = match object.get("answer")? {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => number_text(n),
            _ => return None,
        };
        let operation = object
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();

        if question.is_empty() || answer.is_empty() {
            return None;
        }
        Some(Self {
            question,
            answer,
            operation,
        })
    }
}

/// `12.0` should read as "12", the way a player would type it
fn number_text(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => (f as i64).to_string(),
        _ => n.to_string(),
    }
}

/// Drop a leading ```json fence and its closing fence
fn strip_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Skip the info string ("json") up to the first newline
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Extract generated items from a reply
pub fn parse_response(text: &str) -> Result<Vec<GeneratedItem>, GeneratorError> {
    let body = strip_fences(text);
    let start = body
        .find('[')
        .ok_or_else(|| GeneratorError::Malformed("no JSON array in reply".to_string()))?;
    let body = &body[start..];

    // Happy path: one complete array
    if let Some(end) = body.rfind(']') {
        if let Ok(Value::Array(values)) = serde_json::from_str::<Value>(&body[..=end]) {
            let items: Vec<GeneratedItem> = values.iter().filter_map(GeneratedItem::from_value).collect();
            if items.is_empty() {
                return Err(GeneratorError::Malformed("array held no usable items".to_string()));
            }
            return Ok(items);
        }
    }

    // Truncated or noisy array: salvage complete top-level objects
    let items: Vec<GeneratedItem> = object_slices(&body[1..])
        .into_iter()
        .filter_map(|slice| serde_json::from_str::<Value>(slice).ok())
        .filter_map(|value| GeneratedItem::from_value(&value))
        .collect();

    if items.is_empty() {
        Err(GeneratorError::Malformed("no complete objects in reply".to_string()))
    } else {
        log::debug!("Salvaged {} items from a partial reply", items.len());
        Ok(items)
    }
}

/// Balanced `{...}` spans at nesting depth zero, string-aware
fn object_slices(text: &str) -> Vec<&str> {
    let mut slices = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        slices.push(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    slices
}
