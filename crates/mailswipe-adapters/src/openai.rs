//! Chat-completions categorizer.

use async_trait::async_trait;
use mailswipe_core::Categorization;
use mailswipe_storage::HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{CategorizationRequest, CategorizeError, Categorizer};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const TEMPERATURE: f32 = 0.3;

const SYSTEM_PROMPT: &str = "You are an expert email marketing analyst. Analyze emails and extract \
structured information in JSON format. Be precise and consistent with your categorization.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage; 2],
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

pub fn build_prompt(request: &CategorizationRequest) -> String {
    format!(
        r#"Analyze this email and extract the following information in JSON format:

EMAIL DATA:
Sender: {sender}
Subject: {subject}
Body Preview: {body}
Snippet: {snippet}

Please provide a JSON response with these fields:

{{
  "notes": "Brief summary or key insights about the email (1-2 sentences)",
  "email_type": "One of: marketing, transactional, promotion, personal, recruiting, product education, onboarding, retention",
  "campaign_type": "One of: marketing, promo, seasonal, abandoned checkout, win-back, recruitment, retention, transactional, personal, product education, onboarding, or more specific",
  "pricing_extract": "Any pricing info, discounts, or offers mentioned (e.g., '20% off', '$50 credit', 'Free shipping'). Leave empty if none.",
  "target_audience": "Who is this email targeting? (e.g., 'prospective customers', 'existing subscribers', 'cart abandoners')",
  "product_mentioned": "Main product or service mentioned in the email. Be specific.",
  "retention": "Is this a retention/re-engagement email? Leave empty if no, or describe the retention strategy",
  "funnel_stage": "One of: awareness, consideration, conversion, onboarding, retention"
}}

Return valid JSON only."#,
        sender = request.sender,
        subject = request.subject,
        body = request.body_preview,
        snippet = request.snippet,
    )
}

fn field(object: &serde_json::Map<String, Value>, key: &str) -> String {
    match object.get(key) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.trim().to_string(),
        Some(other) => other.to_string(),
    }
}

/// Maps the service's JSON object onto a [`Categorization`]. Missing keys become empty strings.
pub fn parse_categorization(content: &str) -> Result<Categorization, CategorizeError> {
    let value: Value = serde_json::from_str(content)
        .map_err(|e| CategorizeError::Malformed(format!("invalid json: {e}")))?;
    let Value::Object(object) = value else {
        return Err(CategorizeError::Malformed("expected a json object".into()));
    };

    Ok(Categorization {
        notes: field(&object, "notes"),
        category: field(&object, "email_type"),
        subcategory: field(&object, "campaign_type"),
        price_signal: field(&object, "pricing_extract"),
        target_audience: field(&object, "target_audience"),
        product_mentioned: field(&object, "product_mentioned"),
        retention_signal: field(&object, "retention"),
        funnel_stage: field(&object, "funnel_stage"),
    })
}

#[derive(Debug, Clone)]
pub struct OpenAiCategorizer {
    http: HttpClient,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCategorizer {
    pub fn new(
        http: HttpClient,
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            model: model.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl Categorizer for OpenAiCategorizer {
    async fn categorize(&self, request: &CategorizationRequest) -> Result<Categorization, CategorizeError> {
        let api_key = self.api_key.as_deref().ok_or(CategorizeError::NotConfigured)?;
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_prompt(request),
                },
            ],
            temperature: TEMPERATURE,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response: ChatResponse = self.http.post_json(&url, Some(api_key), &body).await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CategorizeError::Malformed("response carried no content".into()))?;
        debug!(chars = content.len(), "categorization reply received");
        parse_categorization(&content)
    }
}
