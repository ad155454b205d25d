//! Gemini `generateContent` client for screenshot extraction.

use async_trait::async_trait;
use base64::Engine as _;
use log::{debug, warn};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::parse::parse_extraction_response;
use super::ExtractionGateway;
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::images::ImageData;
use crate::job::ExtractedRecord;
use crate::secrets::{resolve_secret, SecretError};

/// Maximum length of an error body carried into a job's error detail.
const MAX_ERROR_BODY_LENGTH: usize = 200;

fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
        Some((idx, _)) => format!("{}... (truncated)", &body[..idx]),
        None => body.to_string(),
    }
}

/// Instructions sent next to every image. `today` fills in missing dates.
pub fn build_prompt(today: &str) -> String {
    format!(
        "Analyze this game screenshot.\n\
         \n\
         The image may contain a ranking, a score history or a member list with \
         several rows. Extract every visible row, not only the first one.\n\
         \n\
         For each row extract:\n\
         1. account: the player name or ID. If the text contains a colon \
         (\":\" or \"\u{ff1a}\"), as in \"Invite: Taro\", keep only the part after \
         the colon and drop the label.\n\
         2. time: the timestamp shown on screen as an ISO string \
         (YYYY-MM-DDTHH:mm:ss). If no date is visible use today's date ({today}).\n\
         3. score: the main number (score, points or damage), digits only.\n\
         \n\
         If no text can be read return \"Unknown\". If no score can be read return 0.\n\
         Answer with JSON that follows the response schema, with all rows inside \
         the items array."
    )
}

fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "items": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "account": { "type": "STRING", "description": "Player account name" },
                        "time": { "type": "STRING", "description": "Timestamp (ISO 8601)" },
                        "score": { "type": "NUMBER", "description": "Score" }
                    },
                    "required": ["account", "time", "score"]
                }
            }
        },
        "required": ["items"]
    })
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: String,
    },
}

#[derive(Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(rename = "responseMimeType")]
    response_mime_type: &'static str,
    #[serde(rename = "responseSchema")]
    response_schema: Value,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateResponse {
    fn text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().filter_map(|p| p.text).collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

pub struct GeminiGateway {
    client: Client,
    api_key: SecretString,
    endpoint: String,
    model: String,
}

impl GeminiGateway {
    pub fn new(api_key: SecretString, endpoint: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self, SecretError> {
        let api_key = resolve_secret(
            config.api_key.as_deref(),
            config.api_key_file.as_deref(),
            config.api_key_env.as_deref(),
        )?;
        Ok(Self::new(api_key, &config.endpoint, &config.model))
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }

    fn build_request(&self, image: &ImageData) -> GenerateRequest {
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: image.mime_type.clone(),
                            data: base64::engine::general_purpose::STANDARD.encode(&image.bytes),
                        },
                    },
                    Part::Text {
                        text: build_prompt(&today),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                response_schema: response_schema(),
            },
        }
    }
}

#[async_trait]
impl ExtractionGateway for GeminiGateway {
    async fn extract(&self, image: &ImageData) -> Result<Vec<ExtractedRecord>, GatewayError> {
        debug!(
            "Sending {} ({}, {} bytes) to {}",
            image.file_name,
            image.mime_type,
            image.bytes.len(),
            self.model
        );

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&self.build_request(image))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout
                } else {
                    GatewayError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Extraction of {} failed with {}", image.file_name, status);
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

        let text = body.text().ok_or(GatewayError::EmptyResponse)?;
        parse_extraction_response(&text)
    }
}
