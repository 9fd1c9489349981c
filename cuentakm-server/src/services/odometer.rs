//! Odometer extraction adapter
//!
//! Sends the photo to a vision model and turns its free-text answer into an
//! odometer value. The model is asked for a bare integer but is not
//! contractually structured, so the answer goes through
//! [`normalize_odometer_text`] before the range check.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use cuentakm_common::config::ExtractionConfig;
use cuentakm_common::db::MAX_ODOMETER_KM;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const USER_AGENT: &str = concat!("cuentakm/", env!("CARGO_PKG_VERSION"));

const SYSTEM_PROMPT: &str = "Eres un sistema OCR especializado en leer CUENTAKILÓMETROS de coches/motos. \
    Devuelve SOLO el valor del odómetro como ENTERO (sin puntos, sin comas, sin espacios). \
    No devuelvas texto adicional.";

const USER_PROMPT: &str =
    "Lee el CUENTAKILÓMETROS (odómetro total) de la imagen y devuelve SOLO el número entero.";

/// Extraction failures; all map to a 500 at the HTTP boundary
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Vision API key is not configured")]
    NotConfigured,

    #[error("Vision service unreachable: {0}")]
    Unavailable(String),

    #[error("Vision service timed out after {0:?}")]
    Timeout(Duration),

    #[error("Vision service error {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Malformed vision service response: {0}")]
    MalformedResponse(String),

    #[error("Empty answer from vision model")]
    EmptyAnswer,

    #[error("No digits found in model answer: {0:?}")]
    NoDigits(String),

    #[error("Odometer value out of range: {value} (model answer: {text:?})")]
    OutOfRange { value: u64, text: String },
}

/// Turns a photo into an odometer value in `0..=9_999_999`
#[async_trait]
pub trait OdometerExtractor: Send + Sync {
    async fn extract(&self, photo: &[u8]) -> Result<u32, ExtractionError>;
}

static ALL_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{3,8}$").expect("valid regex"));
static GROUPED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[0-9]{1,3}(?:[ .,][0-9]{3})+\b").expect("valid regex"));
static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").expect("valid regex"));
static DECIMAL_LIKE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]+(?:[.,][0-9]+)+").expect("valid regex"));

fn digits_only(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// Runs longer than u64 saturate; the range check rejects them anyway
fn to_value(digits: &str) -> u64 {
    digits.parse().unwrap_or(u64::MAX)
}

/// Pick the most plausible odometer value from free text
///
/// Ordered preference:
/// 1. the whole answer is 3-8 digits;
/// 2. thousands-grouped numbers (`235.977`, `235 977`, `1,234,567`): the
///    longest match, groups concatenated, if it yields 3-8 digits;
/// 3. digit runs of 4-8 digits, longest then largest;
/// 4. last resort among short runs: the largest value, also considering
///    decimal-looking tokens whose joined digits number 3-8 (`79.1` → 791).
///    This is a guess, not a reliable reading.
pub fn normalize_odometer_text(text: &str) -> Result<u64, ExtractionError> {
    let t = text.trim();
    if t.is_empty() {
        return Err(ExtractionError::EmptyAnswer);
    }

    if ALL_DIGITS.is_match(t) {
        return Ok(to_value(t));
    }

    // max_by_key keeps the last maximum; the first longest match is wanted
    let mut best_group: Option<&str> = None;
    for m in GROUPED.find_iter(t) {
        if best_group.map_or(true, |b| m.as_str().len() > b.len()) {
            best_group = Some(m.as_str());
        }
    }
    if let Some(group) = best_group {
        let digits = digits_only(group);
        if (3..=8).contains(&digits.len()) {
            return Ok(to_value(&digits));
        }
    }

    let runs: Vec<&str> = DIGIT_RUN.find_iter(t).map(|m| m.as_str()).collect();
    if runs.is_empty() {
        return Err(ExtractionError::NoDigits(text.to_string()));
    }

    if let Some(best) = runs
        .iter()
        .filter(|r| (4..=8).contains(&r.len()))
        .max_by_key(|r| (r.len(), to_value(r)))
    {
        return Ok(to_value(best));
    }

    let joined = DECIMAL_LIKE
        .find_iter(t)
        .map(|m| digits_only(m.as_str()))
        .filter(|digits| (3..=8).contains(&digits.len()))
        .map(|digits| to_value(&digits));
    let best = runs
        .iter()
        .map(|r| to_value(r))
        .chain(joined)
        .max()
        .unwrap_or_default();
    Ok(best)
}

/// Normalize then range-check a model answer
pub fn parse_odometer(text: &str) -> Result<u32, ExtractionError> {
    let value = normalize_odometer_text(text)?;
    u32::try_from(value)
        .ok()
        .filter(|km| *km <= MAX_ODOMETER_KM)
        .ok_or_else(|| ExtractionError::OutOfRange {
            value,
            text: text.to_string(),
        })
}

#[derive(Debug, Deserialize)]
struct ResponsesApiResponse {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl ResponsesApiResponse {
    fn output_text(&self) -> String {
        self.output
            .iter()
            .flat_map(|item| item.content.iter())
            .filter(|part| part.kind == "output_text")
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }
}

/// Vision model client (OpenAI Responses API)
pub struct VisionApiExtractor {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl VisionApiExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self, ExtractionError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ExtractionError::Unavailable(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
        })
    }

    /// Ask the model for the odometer value; returns its raw answer
    async fn ask_model(&self, photo: &[u8]) -> Result<String, ExtractionError> {
        let api_key = self.api_key.as_deref().ok_or(ExtractionError::NotConfigured)?;

        let mime = infer::get(photo)
            .map(|t| t.mime_type())
            .unwrap_or("image/jpeg");
        let data_url = format!("data:{};base64,{}", mime, BASE64.encode(photo));

        let body = json!({
            "model": self.model,
            "input": [
                { "role": "system", "content": SYSTEM_PROMPT },
                {
                    "role": "user",
                    "content": [
                        { "type": "input_text", "text": USER_PROMPT },
                        { "type": "input_image", "image_url": data_url },
                    ],
                },
            ],
        });

        debug!(model = %self.model, bytes = photo.len(), "Querying vision model");

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ResponsesApiResponse = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        Ok(parsed.output_text().trim().to_string())
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ExtractionError {
        if e.is_timeout() {
            ExtractionError::Timeout(self.timeout)
        } else if e.is_decode() {
            ExtractionError::MalformedResponse(e.to_string())
        } else {
            ExtractionError::Unavailable(e.to_string())
        }
    }
}

#[async_trait]
impl OdometerExtractor for VisionApiExtractor {
    async fn extract(&self, photo: &[u8]) -> Result<u32, ExtractionError> {
        let answer = self.ask_model(photo).await?;
        let km = parse_odometer(&answer)?;
        info!(km, answer = %answer, "Odometer value extracted");
        Ok(km)
    }
}
