//! Wound-image assessment via a hosted vision model.
//!
//! The image is sent inline as a base64 `data:` URL alongside a fixed
//! surgical-specialist prompt that asks for a trailing `X/10` severity
//! score, which is parsed out of the reply when present.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use surgisense_core::error::UpstreamError;
use surgisense_core::llm::{ChatMessage, ChatModel, ChatRequest};
use tracing::info;

const WOUND_PROMPT: &str = "Act as a surgical specialist. Analyze this wound image. \
Identify signs of redness (Erythema), swelling, or infection. \
Provide a severity score from 1-10. You must format the score exactly as 'X/10' at the very end of your response.";

/// Returned when the model produced no text.
pub const NO_ANALYSIS: &str = "Analysis could not be generated.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WoundAssessment {
    pub analysis: String,
    /// The trailing `X/10` score, when the model followed the format.
    pub severity_score: Option<u8>,
}

/// Build the `data:` URL for an uploaded image.
///
/// Non-image content types fall back to `image/jpeg`.
pub fn image_data_url(image: &[u8], content_type: Option<&str>) -> String {
    let mime = content_type
        .filter(|ct| ct.starts_with("image/"))
        .unwrap_or("image/jpeg");
    format!("data:{};base64,{}", mime, STANDARD.encode(image))
}

pub async fn analyze_wound(
    llm: &dyn ChatModel,
    model: &str,
    image: &[u8],
    content_type: Option<&str>,
) -> Result<WoundAssessment, UpstreamError> {
    let request = ChatRequest::new(vec![ChatMessage::user_with_image(
        WOUND_PROMPT,
        image_data_url(image, content_type),
    )])
    .with_model(model);

    let content = llm.complete(&request).await?;
    let analysis = if content.trim().is_empty() {
        NO_ANALYSIS.to_string()
    } else {
        content
    };
    let severity_score = parse_severity(&analysis);
    info!(bytes = image.len(), severity = ?severity_score, "wound image analyzed");

    Ok(WoundAssessment {
        analysis,
        severity_score,
    })
}

/// Parse the last `N/10` (1 ≤ N ≤ 10, optional spaces around `/`) in `text`.
pub fn parse_severity(text: &str) -> Option<u8> {
    let bytes = text.as_bytes();
    let mut search_end = text.len();

    while let Some(slash) = text[..search_end].rfind('/') {
        search_end = slash;

        let after = text[slash + 1..].trim_start();
        let denominator_ok = after.starts_with("10")
            && !after[2..].starts_with(|c: char| c.is_ascii_digit());
        if !denominator_ok {
            continue;
        }

        let mut end = slash;
        while end > 0 && bytes[end - 1] == b' ' {
            end -= 1;
        }
        let mut start = end;
        while start > 0 && bytes[start - 1].is_ascii_digit() {
            start -= 1;
        }
        if start == end || end - start > 2 {
            continue;
        }
        if let Ok(score) = text[start..end].parse::<u8>() {
            if (1..=10).contains(&score) {
                return Some(score);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use surgisense_core::llm::{ContentPart, MessageContent};

    struct Vision {
        reply: &'static str,
        seen: Mutex<Option<ChatRequest>>,
    }

    #[async_trait]
    impl ChatModel for Vision {
        fn model_name(&self) -> &str {
            "vision"
        }
        async fn complete(&self, request: &ChatRequest) -> Result<String, UpstreamError> {
            *self.seen.lock().unwrap() = Some(request.clone());
            Ok(self.reply.to_string())
        }
    }

    #[test]
    fn severity_parsing() {
        assert_eq!(parse_severity("Mild erythema, no pus. Severity: 3/10"), Some(3));
        assert_eq!(parse_severity("Severity 10 / 10"), Some(10));
        assert_eq!(parse_severity("Scale 1-10 used; score 7/10."), Some(7));
        assert_eq!(parse_severity("Swelling 2/10 earlier, now 6/10"), Some(6));
        assert_eq!(parse_severity("No score given"), None);
        assert_eq!(parse_severity("ratio 15/100"), None);
        assert_eq!(parse_severity("0/10"), None);
    }

    #[test]
    fn data_url_uses_image_mime() {
        assert_eq!(image_data_url(b"abc", Some("image/png")), "data:image/png;base64,YWJj");
        assert_eq!(
            image_data_url(b"abc", Some("application/octet-stream")),
            "data:image/jpeg;base64,YWJj"
        );
    }

    #[tokio::test]
    async fn sends_image_and_parses_score() {
        let llm = Vision {
            reply: "Localized erythema around sutures, no discharge. 4/10",
            seen: Mutex::new(None),
        };
        let result = analyze_wound(&llm, "vision-model", b"img", Some("image/jpeg"))
            .await
            .unwrap();
        assert_eq!(result.severity_score, Some(4));

        let seen = llm.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.model.as_deref(), Some("vision-model"));
        let MessageContent::Parts(parts) = &seen.messages[0].content else {
            panic!("expected multi-part content");
        };
        assert!(matches!(&parts[1], ContentPart::ImageUrl { image_url } if image_url.url.starts_with("data:image/jpeg;base64,")));
    }

    #[tokio::test]
    async fn empty_reply_falls_back() {
        let llm = Vision {
            reply: "",
            seen: Mutex::new(None),
        };
        let result = analyze_wound(&llm, "m", b"img", None).await.unwrap();
        assert_eq!(result.analysis, NO_ANALYSIS);
        assert_eq!(result.severity_score, None);
    }
}
