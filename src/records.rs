//! Structured extraction from medical documents via the hosted model.
//!
//! Two fixed prompts:
//! - [`extract_surgical_data`] backs `/api/scan`: surgery type and date,
//!   medication list, and pre-op restrictions, returned as the model's JSON.
//! - [`digitize_discharge_summary`] backs `/api/digitize-record`: a fuller
//!   discharge-summary extraction normalized to the fields the dashboard
//!   shows (`procedure`, `doctor`, `follow_up_date`, `medications`).
//!
//! Both requests use JSON response mode. Document text is sent to the model
//! but never logged.

use serde::Serialize;
use serde_json::Value;
use surgisense_core::error::UpstreamError;
use surgisense_core::llm::{ChatMessage, ChatModel, ChatRequest};
use tracing::{info, warn};

const SCAN_SYSTEM_PROMPT: &str = "You are a medical data extractor. Extract the following into JSON: \
surgery_type, surgery_date, medication_list (with name, dosage, frequency), and pre_op_restrictions. \
Output ONLY valid JSON.";

fn discharge_prompt(raw_text: &str) -> String {
    format!(
        "You are a medical AI assistant.\n\
         \n\
         Extract structured information from the following hospital discharge summary.\n\
         Return ONLY valid JSON. No explanations.\n\
         \n\
         Required fields:\n\
         - patient (name, age, gender)\n\
         - admission_date\n\
         - discharge_date\n\
         - procedure\n\
         - medications (name, dosage, frequency, duration)\n\
         - follow_up (date, doctor)\n\
         - red_flags (list)\n\
         \n\
         Discharge Summary:\n\
         {}\n",
        raw_text
    )
}

/// Run the `/api/scan` extraction and return the model's JSON object.
///
/// # Errors
///
/// Returns [`UpstreamError::InvalidResponse`] when the model's reply is not
/// a JSON object.
pub async fn extract_surgical_data(
    llm: &dyn ChatModel,
    model: &str,
    text: &str,
) -> Result<Value, UpstreamError> {
    let request = ChatRequest::new(vec![
        ChatMessage::system(SCAN_SYSTEM_PROMPT),
        ChatMessage::user(format!("Extract data from this medical text: {}", text)),
    ])
    .with_model(model)
    .json();

    let content = llm.complete(&request).await?;
    let parsed: Value =
        serde_json::from_str(strip_code_fence(&content)).map_err(|e| UpstreamError::InvalidResponse {
            operation: "structured extraction",
            message: format!("model returned invalid JSON: {}", e),
        })?;
    if !parsed.is_object() {
        return Err(UpstreamError::InvalidResponse {
            operation: "structured extraction",
            message: "model returned JSON that is not an object".to_string(),
        });
    }
    info!(fields = parsed.as_object().map(|o| o.len()).unwrap_or(0), "surgical data extracted");
    Ok(parsed)
}

/// Normalized discharge-summary fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigitizedRecord {
    pub procedure: Value,
    pub doctor: Value,
    pub follow_up_date: Value,
    pub medications: Value,
}

/// Result of `/api/digitize-record`: either the normalized record or the
/// reason the model's reply could not be used.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DigitizeOutcome {
    Record(DigitizedRecord),
    Unparsed {
        error: String,
        raw_output: Option<String>,
    },
}

/// Run the discharge-summary extraction on already-extracted text.
pub async fn digitize_discharge_summary(
    llm: &dyn ChatModel,
    model: &str,
    raw_text: &str,
) -> Result<DigitizeOutcome, UpstreamError> {
    let request = ChatRequest::new(vec![ChatMessage::user(discharge_prompt(raw_text))])
        .with_model(model)
        .with_temperature(0.0)
        .json();

    let content = llm.complete(&request).await?;
    Ok(interpret_discharge_reply(&content))
}

/// Turn the model's raw reply into a [`DigitizeOutcome`].
pub fn interpret_discharge_reply(content: &str) -> DigitizeOutcome {
    let content = content.trim();
    if content.is_empty() {
        warn!("discharge extraction returned empty content");
        return DigitizeOutcome::Unparsed {
            error: "Empty response from LLM".to_string(),
            raw_output: None,
        };
    }

    match serde_json::from_str::<Value>(strip_code_fence(content)) {
        Ok(ai_json) if ai_json.is_object() => DigitizeOutcome::Record(normalize(&ai_json)),
        _ => {
            warn!(chars = content.len(), "discharge extraction returned invalid JSON");
            DigitizeOutcome::Unparsed {
                error: "Invalid JSON from LLM".to_string(),
                raw_output: Some(content.to_string()),
            }
        }
    }
}

fn normalize(ai_json: &Value) -> DigitizedRecord {
    let follow_up = ai_json.get("follow_up");
    let field = |v: Option<&Value>| v.cloned().unwrap_or(Value::Null);

    DigitizedRecord {
        procedure: field(ai_json.get("procedure")),
        doctor: field(follow_up.and_then(|f| f.get("doctor"))),
        follow_up_date: field(follow_up.and_then(|f| f.get("date"))),
        medications: ai_json
            .get("medications")
            .filter(|m| !m.is_null())
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new())),
    }
}

/// Remove a surrounding Markdown code fence (```json … ```), if present.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
