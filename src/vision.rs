// Vision model client
// One request per scan: two images (yesterday/today) or one image on first run.

use crate::config::Config;
use crate::error::{PantryError, PantryResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// USD per million tokens
pub const INPUT_COST_PER_MILLION: f64 = 3.0;
pub const OUTPUT_COST_PER_MILLION: f64 = 15.0;

pub const COMPARISON_PROMPT: &str = "Compare these two images of the same pantry shelf. \
IMAGE 1 was taken yesterday and IMAGE 2 today.

Report the differences using exactly these sections, one item per line starting with a dash (-):

ADDED ITEMS:
- items visible today that were not there yesterday

REMOVED ITEMS:
- items that were there yesterday and are gone today

QUANTITY CHANGED:
- items still present whose amount visibly changed

For each item give a SHORT name with brand and product type first \
(e.g. \"Kellogg's Froot Loops\"), then optional detail after \" - \".
Write \"- None detected\" for an empty section. Ignore lighting and camera angle differences.";

pub const INVENTORY_PROMPT: &str = "Analyze this pantry/storage image and list ALL visible food items, beverages, and household products.

For each item, provide a SHORT description with brand name and product type.
Format: \"Brand Name Product Type\" (e.g., \"Kellogg's Froot Loops\", \"Poland Spring water bottle\", \"Germ-X hand sanitizer\")

List each item on a separate line starting with a dash (-).
Only list items you can clearly identify. Do not include furniture or background objects.";

// ============================================================================
// CORE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Linear in token counts at fixed per-million rates
    pub fn cost_usd(&self) -> f64 {
        (self.input_tokens as f64 / 1_000_000.0) * INPUT_COST_PER_MILLION
            + (self.output_tokens as f64 / 1_000_000.0) * OUTPUT_COST_PER_MILLION
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisionResponse {
    pub text: String,
    pub usage: TokenUsage,
}

/// Anything that can look at pantry photos and describe them
pub trait VisionModel {
    /// Describe what changed between two JPEG frames
    fn compare(&self, previous_jpeg: &[u8], current_jpeg: &[u8]) -> PantryResult<VisionResponse>;

    /// List everything visible in one JPEG frame
    fn list_inventory(&self, jpeg: &[u8]) -> PantryResult<VisionResponse>;
}

// ============================================================================
// ANTHROPIC MESSAGES CLIENT
// ============================================================================

pub struct AnthropicClient {
    http: HttpClient,
    api_key: String,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> PantryResult<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PantryError::Vision(format!("failed to build HTTP client: {}", e)))?;

        Ok(AnthropicClient {
            http,
            api_key: api_key.to_string(),
            endpoint: format!("{}/v1/messages", base_url.trim_end_matches('/')),
            model: model.to_string(),
            max_tokens,
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = Self::new(
            config.require_api_key()?,
            &config.api_base_url,
            &config.model,
            config.max_tokens,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(client)
    }

    fn image_block(jpeg: &[u8]) -> Value {
        json!({
            "type": "image",
            "source": {
                "type": "base64",
                "media_type": "image/jpeg",
                "data": BASE64.encode(jpeg),
            }
        })
    }

    fn text_block(text: &str) -> Value {
        json!({ "type": "text", "text": text })
    }

    fn payload(&self, content: Vec<Value>) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{
                "role": "user",
                "content": content,
            }]
        })
    }

    pub fn comparison_payload(&self, previous_jpeg: &[u8], current_jpeg: &[u8]) -> Value {
        self.payload(vec![
            Self::text_block("IMAGE 1 - YESTERDAY:"),
            Self::image_block(previous_jpeg),
            Self::text_block("IMAGE 2 - TODAY:"),
            Self::image_block(current_jpeg),
            Self::text_block(COMPARISON_PROMPT),
        ])
    }

    pub fn inventory_payload(&self, jpeg: &[u8]) -> Value {
        self.payload(vec![Self::image_block(jpeg), Self::text_block(INVENTORY_PROMPT)])
    }

    fn send(&self, payload: &Value) -> PantryResult<VisionResponse> {
        debug!(endpoint = %self.endpoint, model = %self.model, "sending vision request");

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(payload)
            .send()
            .map_err(|e| PantryError::Vision(format!("request failed ({}): {}", self.endpoint, e)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| PantryError::Vision(format!("failed to read response body: {}", e)))?;

        if !status.is_success() {
            return Err(PantryError::Vision(format!("HTTP {}: {}", status, body)));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| PantryError::Vision(format!("response is not JSON: {}", e)))?;
        let parsed = parse_messages_response(&value)?;

        info!(
            input_tokens = parsed.usage.input_tokens,
            output_tokens = parsed.usage.output_tokens,
            cost_usd = parsed.usage.cost_usd(),
            "vision request complete"
        );
        Ok(parsed)
    }
}

impl VisionModel for AnthropicClient {
    fn compare(&self, previous_jpeg: &[u8], current_jpeg: &[u8]) -> PantryResult<VisionResponse> {
        self.send(&self.comparison_payload(previous_jpeg, current_jpeg))
    }

    fn list_inventory(&self, jpeg: &[u8]) -> PantryResult<VisionResponse> {
        self.send(&self.inventory_payload(jpeg))
    }
}

/// Join the text blocks of a Messages API response and read its usage
pub fn parse_messages_response(body: &Value) -> PantryResult<VisionResponse> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| PantryError::Vision("response has no content array".to_string()))?;

    let text = blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("\n");

    if text.trim().is_empty() {
        return Err(PantryError::Vision("response contained no text".to_string()));
    }

    let usage = body.get("usage");
    let tokens = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };

    Ok(VisionResponse {
        text,
        usage: TokenUsage {
            input_tokens: tokens("input_tokens"),
            output_tokens: tokens("output_tokens"),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AnthropicClient {
        AnthropicClient::new(
            "sk-test",
            "https://api.example.test/",
            "test-model",
            512,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_cost_is_linear_in_tokens() {
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
        };
        assert!((usage.cost_usd() - 18.0).abs() < 1e-9);

        let usage = TokenUsage {
            input_tokens: 3000,
            output_tokens: 400,
        };
        assert!((usage.cost_usd() - 0.015).abs() < 1e-9);
        assert_eq!(TokenUsage::default().cost_usd(), 0.0);
    }

    #[test]
    fn test_comparison_payload_orders_images() {
        let payload = client().comparison_payload(b"prev", b"curr");

        assert_eq!(payload["model"], "test-model");
        assert_eq!(payload["max_tokens"], 512);
        let content = payload["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 5);
        assert_eq!(content[0]["text"], "IMAGE 1 - YESTERDAY:");
        assert_eq!(content[1]["source"]["data"], BASE64.encode(b"prev"));
        assert_eq!(content[1]["source"]["media_type"], "image/jpeg");
        assert_eq!(content[2]["text"], "IMAGE 2 - TODAY:");
        assert_eq!(content[3]["source"]["data"], BASE64.encode(b"curr"));
        assert_eq!(content[4]["text"], COMPARISON_PROMPT);
    }

    #[test]
    fn test_inventory_payload_has_single_image() {
        let payload = client().inventory_payload(b"img");
        let content = payload["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[1]["text"], INVENTORY_PROMPT);
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        assert_eq!(client().endpoint, "https://api.example.test/v1/messages");
    }

    #[test]
    fn test_parse_messages_response() {
        let body = json!({
            "content": [
                {"type": "text", "text": "ADDED ITEMS:"},
                {"type": "text", "text": "- Ritz crackers"}
            ],
            "usage": {"input_tokens": 2100, "output_tokens": 85}
        });

        let parsed = parse_messages_response(&body).unwrap();

        assert_eq!(parsed.text, "ADDED ITEMS:\n- Ritz crackers");
        assert_eq!(parsed.usage.input_tokens, 2100);
        assert_eq!(parsed.usage.output_tokens, 85);
    }

    #[test]
    fn test_parse_rejects_empty_response() {
        assert!(parse_messages_response(&json!({"error": "overloaded"})).is_err());
        assert!(parse_messages_response(&json!({"content": []})).is_err());
    }
}
