use crate::config::Config;
use crate::error::ServiceError;
use crate::gemini::{GeminiGenerationConfig, GeminiInlineData, GeminiRequest, GeminiResponse};
use crate::input::{Question, UploadedImage};
use crate::request_id::RequestId;
use reqwest::header::HeaderValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// The text answer plus what the service reported about producing it.
#[derive(Debug, Clone)]
pub struct ExtractionResponse {
    pub text: String,
    pub model_version: Option<String>,
    pub finish_reason: Option<String>,
    pub total_tokens: Option<u32>,
}

#[derive(Debug)]
pub struct ExtractionClient {
    http_client: Arc<reqwest::Client>,
    config: Arc<Config>,
}

impl ExtractionClient {
    pub fn new(http_client: Arc<reqwest::Client>, config: Arc<Config>) -> Self {
        Self { http_client, config }
    }

    fn build_target_url(config: &Config) -> String {
        let api_base = &config.api_base;
        let path = format!("models/{}:generateContent", config.model);
        if api_base.ends_with('/') { format!("{}{}", api_base, path) } else { format!("{}/{}", api_base, path) }
    }

    pub fn build_request(question: &Question, image: &UploadedImage, instruction: &str, temperature: Option<f64>) -> GeminiRequest {
        let inline_data = GeminiInlineData::from_bytes(image.mime_type.clone(), &image.bytes);
        GeminiRequest::extraction(instruction, question.as_str(), inline_data)
            .with_generation_config(GeminiGenerationConfig { temperature })
    }

    /// Sends one `generateContent` call and returns the model's text verbatim.
    ///
    /// Single attempt; the configured timeout covers the whole exchange.
    pub async fn extract(
        &self,
        question: &Question,
        image: &UploadedImage,
        instruction: &str,
        request_id: &RequestId,
    ) -> Result<ExtractionResponse, ServiceError> {
        let body = Self::build_request(question, image, instruction, self.config.temperature);
        let target_url = Self::build_target_url(&self.config);

        let mut api_key = HeaderValue::from_str(&self.config.api_key)
            .map_err(|_| ServiceError::InvalidApiKey)?;
        api_key.set_sensitive(true);

        let mut target_request = self
            .http_client
            .post(&target_url)
            .header(API_KEY_HEADER, api_key)
            .header("Content-Type", "application/json")
            .timeout(self.config.request_timeout);

        // Propagate request id upstream
        if let Ok(val) = HeaderValue::from_str(&request_id.0) {
            target_request = target_request.header("x-request-id", val);
        }

        info!("Forwarding extraction to: {}", target_url);
        debug!(
            "question: {:?}, image: {} ({} bytes, {} base64 chars)",
            question.as_str(),
            image.mime_type,
            image.bytes.len(),
            body.inline_data_len()
        );

        let started = Instant::now();
        let response = target_request.json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            warn!("Extraction failed with status {}: {}", status, error_text);
            return Err(ServiceError::from_status(status.as_u16(), error_text));
        }

        let raw = response.bytes().await?;
        let gemini: GeminiResponse = serde_json::from_slice(&raw)?;
        debug!("Model replied in {} ms", started.elapsed().as_millis());

        if let Some(reason) = gemini.block_reason() {
            return Err(ServiceError::Blocked { reason: format!("{:?}", reason) });
        }
        let finish_reason = gemini.finish_reason().map(|r| format!("{:?}", r));
        let Some(text) = gemini.text() else {
            return Err(ServiceError::EmptyAnswer {
                finish_reason: finish_reason.unwrap_or_else(|| "none".to_string()),
            });
        };

        Ok(ExtractionResponse {
            text,
            model_version: gemini.model_version,
            finish_reason,
            total_tokens: gemini.usage_metadata.and_then(|u| u.total_token_count),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfig;
    use crate::input::{FileHandle, Submission};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use mockito::Matcher;
    use serde_json::{Value, json};

    const PATH: &str = "/models/gemini-2.0-flash:generateContent";

    fn client_for(url: &str) -> ExtractionClient {
        client_with(FileConfig {
            api_key: Some("test-key".to_string()),
            api_base: Some(url.to_string()),
            ..Default::default()
        })
    }

    fn client_with(file: FileConfig) -> ExtractionClient {
        let config = Config::resolve(file, |_| None).unwrap();
        ExtractionClient::new(Arc::new(reqwest::Client::new()), Arc::new(config))
    }

    fn invoice_png(len: usize) -> Vec<u8> {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        bytes.extend((0..len - 8).map(|i| (i * 31 % 251) as u8));
        bytes
    }

    fn valid(bytes: Vec<u8>, question: &str) -> (Question, UploadedImage) {
        let submission = Submission {
            image: Some(FileHandle::new(Some("invoice.png".to_string()), Some("image/png".to_string()), bytes)),
            question: question.to_string(),
        };
        let v = submission.validate().unwrap();
        (v.question, v.image)
    }

    fn reply(text: &str) -> String {
        json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": "STOP",
                "index": 0
            }],
            "usageMetadata": {"promptTokenCount": 1290, "candidatesTokenCount": 9, "totalTokenCount": 1299},
            "modelVersion": "gemini-2.0-flash"
        })
        .to_string()
    }

    #[test]
    fn test_build_target_url() {
        let client = client_for("https://example.test/v1beta/");
        assert_eq!(
            ExtractionClient::build_target_url(&client.config),
            "https://example.test/v1beta/models/gemini-2.0-flash:generateContent"
        );
        let client = client_for("https://example.test/v1beta");
        assert_eq!(
            ExtractionClient::build_target_url(&client.config),
            "https://example.test/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[tokio::test]
    async fn test_total_amount_scenario() {
        let mut server = mockito::Server::new_async().await;
        let png = invoice_png(10 * 1024);
        let expected_body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {"text": crate::config::DEFAULT_INSTRUCTION},
                    {"text": "What is the total amount?"},
                    {"inlineData": {"mimeType": "image/png", "data": STANDARD.encode(&png)}}
                ]
            }]
        });
        let m = server
            .mock("POST", PATH)
            .match_header("x-goog-api-key", "test-key")
            .match_query(Matcher::Any)
            .match_header("x-request-id", "req-1")
            .match_body(Matcher::Json(expected_body))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(reply("The total amount is $42.00"))
            .expect(1)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let (question, image) = valid(png, "What is the total amount?");
        let answer = client
            .extract(&question, &image, crate::config::DEFAULT_INSTRUCTION, &RequestId("req-1".to_string()))
            .await
            .unwrap();

        m.assert_async().await;
        assert_eq!(answer.text, "The total amount is $42.00");
        assert_eq!(answer.total_tokens, Some(1299));
        assert_eq!(answer.model_version.as_deref(), Some("gemini-2.0-flash"));
        assert_eq!(answer.finish_reason.as_deref(), Some("Stop"));
    }

    #[tokio::test]
    async fn test_inline_data_round_trips() {
        let mut server = mockito::Server::new_async().await;
        let png = invoice_png(4096);
        let m = server
            .mock("POST", PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(reply("ok"))
            .create_async()
            .await;

        let client = client_for(&server.url());
        let (question, image) = valid(png.clone(), "Due date?");
        let request = ExtractionClient::build_request(&question, &image, "instruction", None);
        let sent: Value = serde_json::to_value(&request).unwrap();
        let data = sent["contents"][0]["parts"][2]["inlineData"]["data"].as_str().unwrap();
        assert_eq!(STANDARD.decode(data).unwrap(), png);

        client.extract(&question, &image, "instruction", &RequestId("r".to_string())).await.unwrap();
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_answer_is_verbatim() {
        let mut server = mockito::Server::new_async().await;
        let text = "\n  **Total:** 1.234,56 €\n\n| Item | Qty |\n|---|---|\n";
        let _m = server
            .mock("POST", PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(reply(text))
            .create_async()
            .await;

        let client = client_for(&server.url());
        let (question, image) = valid(invoice_png(64), "Total?");
        let answer = client.extract(&question, &image, "i", &RequestId("r".to_string())).await.unwrap();
        assert_eq!(answer.text, text);
    }

    #[tokio::test]
    async fn test_http_failures_are_service_errors() {
        for (status, check) in [
            (401, "unauthorized"),
            (403, "unauthorized"),
            (429, "rate_limited"),
            (500, "status"),
        ] {
            let mut server = mockito::Server::new_async().await;
            let _m = server
                .mock("POST", PATH)
                .match_query(Matcher::Any)
                .with_status(status)
                .with_body(r#"{"error": {"code": 0, "message": "nope"}}"#)
                .create_async()
                .await;

            let client = client_for(&server.url());
            let (question, image) = valid(invoice_png(64), "Total?");
            let err = client.extract(&question, &image, "i", &RequestId("r".to_string())).await.unwrap_err();
            let matched = match (&err, check) {
                (ServiceError::Unauthorized { body, .. }, "unauthorized") => body.contains("nope"),
                (ServiceError::RateLimited { .. }, "rate_limited") => true,
                (ServiceError::Status { status: 500, .. }, "status") => true,
                _ => false,
            };
            assert!(matched, "status {} gave {:?}", status, err);
        }
    }

    #[tokio::test]
    async fn test_network_failure() {
        // Bind and drop a listener so nothing accepts on that port.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client_with(FileConfig {
            api_key: Some("SECRET-KEY-123".to_string()),
            api_base: Some(format!("http://{}", addr)),
            ..Default::default()
        });
        let (question, image) = valid(invoice_png(64), "Total?");
        let err = client.extract(&question, &image, "i", &RequestId("r".to_string())).await.unwrap_err();
        assert!(matches!(err, ServiceError::Transport(_)), "{:?}", err);
        assert!(!err.to_string().contains("SECRET-KEY-123"), "{}", err);
        assert!(!format!("{:?}", err).contains("SECRET-KEY-123"));
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out_after_one_attempt() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        // Accepts connections and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });

        let client = client_with(FileConfig {
            api_key: Some("test-key".to_string()),
            api_base: Some(format!("http://{}", addr)),
            request_timeout_secs: Some(1),
            ..Default::default()
        });
        let (question, image) = valid(invoice_png(64), "Total?");
        let started = Instant::now();
        let err = client.extract(&question, &image, "i", &RequestId("r".to_string())).await.unwrap_err();

        match &err {
            ServiceError::Transport(e) => assert!(e.is_timeout(), "{:?}", e),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_malformed_and_empty_replies() {
        let cases = [
            ("not json", "decode"),
            (r#"{"candidates": []}"#, "empty"),
            (r#"{"candidates": [{"finishReason": "SAFETY", "index": 0}]}"#, "empty"),
            (r#"{"promptFeedback": {"blockReason": "PROHIBITED_CONTENT"}}"#, "blocked"),
        ];
        for (body, kind) in cases {
            let mut server = mockito::Server::new_async().await;
            let _m = server
                .mock("POST", PATH)
                .match_query(Matcher::Any)
                .with_status(200)
                .with_body(body)
                .create_async()
                .await;

            let client = client_for(&server.url());
            let (question, image) = valid(invoice_png(64), "Total?");
            let err = client.extract(&question, &image, "i", &RequestId("r".to_string())).await.unwrap_err();
            let matched = match (&err, kind) {
                (ServiceError::Decode(_), "decode") => true,
                (ServiceError::EmptyAnswer { .. }, "empty") => true,
                (ServiceError::Blocked { reason }, "blocked") => reason == "ProhibitedContent",
                _ => false,
            };
            assert!(matched, "{} gave {:?}", body, err);
        }
    }

    #[tokio::test]
    async fn test_safety_stop_reports_finish_reason() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", PATH)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"candidates": [{"finishReason": "SAFETY", "index": 0}]}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let (question, image) = valid(invoice_png(64), "Total?");
        let err = client.extract(&question, &image, "i", &RequestId("r".to_string())).await.unwrap_err();
        assert_eq!(err.to_string(), "the model returned no text (finish reason: Safety)");
    }
}
