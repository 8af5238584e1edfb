//! OCR.space provider (multipart upload to `parse/image`).

use super::{OcrProvider, NO_TEXT_FOUND};
use crate::config::OcrConfig;
use crate::error::{PipelineError, StageResult};
use crate::intake::UploadedImage;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

const SERVICE: &str = "OCR service";

pub struct OcrSpaceProvider {
    api_key: String,
    config: OcrConfig,
    client: reqwest::Client,
}

impl OcrSpaceProvider {
    pub fn new(client: reqwest::Client, config: OcrConfig, api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            config,
            client,
        }
    }

    fn build_form(&self, image: &UploadedImage) -> Result<reqwest::multipart::Form, PipelineError> {
        use reqwest::multipart::{Form, Part};

        let part = Part::bytes(image.data.clone())
            .file_name(image.filename.clone())
            .mime_str(image.mime)
            .map_err(|e| PipelineError::network(SERVICE, e))?;

        let mut form = Form::new()
            .part("file", part)
            .text("apikey", self.api_key.clone());

        if let Some(language) = &self.config.language {
            form = form.text("language", language.clone());
        }
        if let Some(engine) = self.config.engine {
            form = form.text("OCREngine", engine.to_string());
        }
        if let Some(scale) = self.config.scale {
            form = form.text("scale", scale.to_string());
        }
        if let Some(detect) = self.config.detect_orientation {
            form = form.text("detectOrientation", detect.to_string());
        }

        Ok(form)
    }
}

// ── OCR.space response envelope ─────────────────────────────────────────────

#[derive(Deserialize)]
struct OcrSpaceResponse {
    // Absent flag counts as errored.
    #[serde(rename = "IsErroredOnProcessing", default = "default_true")]
    is_errored_on_processing: bool,
    #[serde(rename = "ErrorMessage", default)]
    error_message: Option<ErrorMessage>,
    #[serde(rename = "ParsedResults", default)]
    parsed_results: Option<Vec<ParsedResult>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorMessage {
    List(Vec<serde_json::Value>),
    Other(serde_json::Value),
}

#[derive(Deserialize)]
struct ParsedResult {
    #[serde(rename = "ParsedText", default)]
    parsed_text: Option<String>,
}

fn default_true() -> bool {
    true
}

fn value_to_message(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ErrorMessage {
    fn first(&self) -> Option<String> {
        match self {
            ErrorMessage::List(items) => items.first().map(value_to_message),
            ErrorMessage::Other(serde_json::Value::Null) => None,
            ErrorMessage::Other(value) => Some(value_to_message(value)),
        }
    }
}

/// Interpret the body of a successful HTTP response.
pub fn parse_envelope(body: &str) -> StageResult {
    let envelope: OcrSpaceResponse = serde_json::from_str(body)
        .map_err(|_| PipelineError::response_format(SERVICE, body))?;

    if envelope.is_errored_on_processing {
        let message = envelope
            .error_message
            .as_ref()
            .and_then(ErrorMessage::first)
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(PipelineError::ServiceReported(message));
    }

    match envelope.parsed_results {
        Some(results) if !results.is_empty() => Ok(results
            .into_iter()
            .next()
            .and_then(|r| r.parsed_text)
            .unwrap_or_default()),
        _ => Ok(NO_TEXT_FOUND.to_string()),
    }
}

// ── Provider implementation ─────────────────────────────────────────────────

#[async_trait::async_trait]
impl OcrProvider for OcrSpaceProvider {
    fn name(&self) -> &str {
        "ocr_space"
    }

    async fn extract_text(&self, image: &UploadedImage) -> StageResult {
        let form = self.build_form(image)?;

        info!(
            "OcrSpaceProvider: uploading {} ({} bytes, {})",
            image.filename,
            image.size(),
            image.mime
        );

        let mut request = self.client.post(&self.config.endpoint).multipart(form);
        if let Some(secs) = self.config.timeout_secs {
            request = request.timeout(Duration::from_secs(secs));
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::network(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("OcrSpaceProvider: HTTP {}", status);
            return Err(PipelineError::network(SERVICE, format!("HTTP {}: {}", status, text)));
        }

        let raw_text = response
            .text()
            .await
            .map_err(|e| PipelineError::network(SERVICE, e))?;
        debug!(
            "OcrSpaceProvider: raw response ({} bytes): {}",
            raw_text.len(),
            raw_text.chars().take(500).collect::<String>()
        );

        parse_envelope(&raw_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::intake::tests::PNG_MAGIC;
    use crate::test_support::spawn_mock;
    use axum::{extract::Multipart, extract::State, http::StatusCode, routing::post, Router};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[test]
    fn test_first_result_text_is_returned() {
        let body = r#"{"IsErroredOnProcessing": false, "ParsedResults":[{"ParsedText":"def f(x)\n  return x+1"},{"ParsedText":"other"}]}"#;
        assert_eq!(parse_envelope(body).unwrap(), "def f(x)\n  return x+1");
    }

    #[test]
    fn test_empty_results_yield_no_text_literal() {
        let body = r#"{"IsErroredOnProcessing": false, "ParsedResults": []}"#;
        assert_eq!(parse_envelope(body).unwrap(), "No text found in image.");

        let body = r#"{"IsErroredOnProcessing": false}"#;
        assert_eq!(parse_envelope(body).unwrap(), NO_TEXT_FOUND);
    }

    #[test]
    fn test_error_list_uses_first_element() {
        let body = r#"{"IsErroredOnProcessing": true, "ErrorMessage": ["E216: Unable to detect the file extension", "second"]}"#;
        let err = parse_envelope(body).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceReported);
        assert_eq!(err.to_string(), "Error: E216: Unable to detect the file extension");
    }

    #[test]
    fn test_error_string_form() {
        let body = r#"{"IsErroredOnProcessing": true, "ErrorMessage": "Timed out waiting for results"}"#;
        assert_eq!(
            parse_envelope(body).unwrap_err().to_string(),
            "Error: Timed out waiting for results"
        );
    }

    #[test]
    fn test_missing_flag_counts_as_errored() {
        let body = r#"{"ParsedResults":[{"ParsedText":"x"}]}"#;
        assert_eq!(parse_envelope(body).unwrap_err().to_string(), "Error: Unknown error");
    }

    #[test]
    fn test_non_json_body_is_response_format_error() {
        let err = parse_envelope("You may only perform this action upto maximum 10 times").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResponseFormat);
        assert!(err.to_string().contains("upto maximum 10 times"));
    }

    type Captured = Arc<Mutex<HashMap<String, String>>>;

    async fn capture_form(State(captured): State<Captured>, mut multipart: Multipart) -> &'static str {
        let mut fields = captured.lock().await;
        while let Ok(Some(field)) = multipart.next_field().await {
            let name = field.name().unwrap_or_default().to_string();
            if name == "file" {
                fields.insert("file.name".into(), field.file_name().unwrap_or_default().to_string());
                fields.insert("file.type".into(), field.content_type().unwrap_or_default().to_string());
                let bytes = field.bytes().await.unwrap_or_default();
                fields.insert("file.len".into(), bytes.len().to_string());
            } else {
                fields.insert(name, field.text().await.unwrap_or_default());
            }
        }
        r#"{"IsErroredOnProcessing": false, "ParsedResults":[{"ParsedText":"print(1)"}]}"#
    }

    fn png_upload() -> UploadedImage {
        UploadedImage::from_upload(Some("code.png"), Some("image/png"), PNG_MAGIC.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_sends_multipart_fields() {
        let captured: Captured = Arc::default();
        let app = Router::new()
            .route("/parse/image", post(capture_form))
            .with_state(captured.clone());
        let base = spawn_mock(app).await;

        let config = OcrConfig {
            endpoint: format!("{}/parse/image", base),
            language: Some("eng".into()),
            engine: Some(2),
            ..OcrConfig::default()
        };
        let provider = OcrSpaceProvider::new(reqwest::Client::new(), config, "secret-key");

        let text = provider.extract_text(&png_upload()).await.unwrap();
        assert_eq!(text, "print(1)");

        let fields = captured.lock().await;
        assert_eq!(fields.get("apikey").map(String::as_str), Some("secret-key"));
        assert_eq!(fields.get("file.name").map(String::as_str), Some("code.png"));
        assert_eq!(fields.get("file.type").map(String::as_str), Some("image/png"));
        assert_eq!(fields.get("file.len"), Some(&PNG_MAGIC.len().to_string()));
        assert_eq!(fields.get("language").map(String::as_str), Some("eng"));
        assert_eq!(fields.get("OCREngine").map(String::as_str), Some("2"));
        assert!(!fields.contains_key("scale"));
    }

    #[tokio::test]
    async fn test_non_success_status_is_network_error() {
        let app = Router::new().route(
            "/parse/image",
            post(|| async { (StatusCode::FORBIDDEN, "invalid api key") }),
        );
        let base = spawn_mock(app).await;
        let config = OcrConfig {
            endpoint: format!("{}/parse/image", base),
            ..OcrConfig::default()
        };
        let provider = OcrSpaceProvider::new(reqwest::Client::new(), config, "");

        let err = provider.extract_text(&png_upload()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("invalid api key"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let config = OcrConfig {
            endpoint: "http://127.0.0.1:1/parse/image".into(),
            ..OcrConfig::default()
        };
        let provider = OcrSpaceProvider::new(reqwest::Client::new(), config, "");
        let err = provider.extract_text(&png_upload()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }
}
