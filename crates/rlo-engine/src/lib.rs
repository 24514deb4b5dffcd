use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use rlo_contracts::chat::{compose_prompt, replies, GenerationOutcome, Style};
use rlo_contracts::events::{ChatEvent, EventWriter};
use rlo_contracts::images::ImagePayload;
use serde_json::{json, Map, Value};

mod save;
mod worker;

pub use save::{save_image, SavedImage};
pub use worker::spawn_generation;

pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.0-flash-preview-image-generation";
const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const ERROR_LOG_MAX_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct ProviderGenerateRequest {
    pub prompt: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct ProviderGenerateResponse {
    pub provider_response: Map<String, Value>,
    pub image: Option<ImagePayload>,
    pub text: Vec<String>,
}

pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &ProviderGenerateRequest) -> Result<ProviderGenerateResponse>;
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub request_timeout_s: f64,
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        Self {
            api_base: non_empty_env("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_GEMINI_API_BASE.to_string()),
            api_key: non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY")),
            request_timeout_s: clamp_timeout(
                non_empty_env("RLO_REQUEST_TIMEOUT_S").and_then(|raw| raw.parse::<f64>().ok()),
            ),
        }
    }
}

fn clamp_timeout(raw: Option<f64>) -> f64 {
    raw.filter(|value| value.is_finite())
        .unwrap_or(90.0)
        .clamp(15.0, 300.0)
}

pub struct GeminiProvider {
    config: GeminiConfig,
    http: HttpClient,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Self {
        Self::with_client(config, HttpClient::new())
    }

    fn with_client(config: GeminiConfig, http: HttpClient) -> Self {
        Self { config, http }
    }

    pub fn from_env() -> Self {
        Self::new(GeminiConfig::from_env())
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!(
            "{}/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            model_path
        )
    }

    fn build_payload(prompt: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }],
            }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
            },
        })
    }

    fn first_candidate_parts(response_payload: &Value) -> Vec<Value> {
        response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    }

    fn extract_first_image(response_payload: &Value) -> Result<Option<ImagePayload>> {
        for part in Self::first_candidate_parts(response_payload) {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or("image/png");
            if !mime_type.starts_with("image/") {
                continue;
            }
            let bytes = BASE64
                .decode(data.as_bytes())
                .context("Gemini image base64 decode failed")?;
            if bytes.is_empty() {
                continue;
            }
            return Ok(Some(ImagePayload::new(mime_type, BASE64.encode(bytes))));
        }
        Ok(None)
    }

    fn extract_text_parts(response_payload: &Value) -> Vec<String> {
        Self::first_candidate_parts(response_payload)
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &ProviderGenerateRequest) -> Result<ProviderGenerateResponse> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = Self::build_payload(&request.prompt);

        let response = self
            .http
            .post(&endpoint)
            .header("x-goog-api-key", api_key)
            .timeout(Duration::from_secs_f64(self.config.request_timeout_s))
            .json(&payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Gemini", response)?;
        let image = Self::extract_first_image(&response_payload)?;
        let text = Self::extract_text_parts(&response_payload);

        Ok(ProviderGenerateResponse {
            provider_response: map_object(json!({
                "candidates": response_payload
                    .get("candidates")
                    .and_then(Value::as_array)
                    .map(|rows| rows.len())
                    .unwrap_or(0),
                "finish_reason": response_payload
                    .pointer("/candidates/0/finishReason")
                    .cloned()
                    .unwrap_or(Value::Null),
                "block_reason": response_payload
                    .pointer("/promptFeedback/blockReason")
                    .cloned()
                    .unwrap_or(Value::Null),
                "usage_metadata": response_payload.get("usageMetadata").cloned().unwrap_or(Value::Null),
            })),
            image,
            text,
        })
    }
}

pub struct GenerationClient {
    provider: Arc<dyn ImageProvider>,
    model: String,
    events: Option<EventWriter>,
}

impl GenerationClient {
    pub fn new(provider: Arc<dyn ImageProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            events: None,
        }
    }

    pub fn gemini_from_env(model: Option<String>) -> Self {
        let model = model
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| non_empty_env("RLO_IMAGE_MODEL"))
            .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string());
        Self::new(Arc::new(GeminiProvider::from_env()), model)
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn generate(
        &self,
        message_id: Option<u64>,
        prompt_text: &str,
        style: Style,
    ) -> GenerationOutcome {
        let request = ProviderGenerateRequest {
            prompt: compose_prompt(style, prompt_text),
            model: self.model.clone(),
        };
        let started = Instant::now();
        let result = self.provider.generate(&request);
        let latency_s = started.elapsed().as_secs_f64();

        match result {
            Ok(ProviderGenerateResponse {
                provider_response,
                image: Some(image),
                ..
            }) => {
                self.record(ChatEvent::GenerationCompleted {
                    message_id,
                    provider: self.provider.name().to_string(),
                    model: self.model.clone(),
                    style,
                    mime_type: image.mime_type.clone(),
                    latency_s,
                    provider_response,
                });
                GenerationOutcome::Image(image)
            }
            Ok(ProviderGenerateResponse {
                provider_response,
                text,
                ..
            }) => {
                self.record(ChatEvent::GenerationNoImage {
                    message_id,
                    provider: self.provider.name().to_string(),
                    model: self.model.clone(),
                    style,
                    latency_s,
                    text_parts: text,
                    provider_response,
                });
                GenerationOutcome::Failed(replies::NO_IMAGE_GENERATED.to_string())
            }
            Err(err) => {
                let detail = error_chain_text(&err, ERROR_LOG_MAX_CHARS);
                if self.events.is_none() {
                    eprintln!("rlo warning: image generation failed: {detail}");
                }
                self.record(ChatEvent::GenerationFailed {
                    message_id,
                    model: self.model.clone(),
                    style,
                    latency_s: Some(latency_s),
                    error: detail,
                });
                GenerationOutcome::Failed(replies::GENERATION_FAILED.to_string())
            }
        }
    }

    fn record(&self, event: ChatEvent) {
        if let Some(events) = self.events.as_ref() {
            events.record_quiet(event);
        }
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::{mpsc, Arc, Mutex};
    use std::thread;

    use anyhow::{anyhow, bail, Context};
    use rlo_contracts::chat::{replies, GenerationOutcome, Style};
    use rlo_contracts::events::EventWriter;
    use rlo_contracts::images::ImagePayload;
    use serde_json::{json, Map, Value};

    use super::{
        clamp_timeout, error_chain_text, GeminiConfig, GeminiProvider, GenerationClient,
        ImageProvider, ProviderGenerateRequest, ProviderGenerateResponse,
    };

    struct RecordingProvider {
        prompts: Mutex<Vec<String>>,
        image: Option<ImagePayload>,
    }

    impl ImageProvider for RecordingProvider {
        fn name(&self) -> &str {
            "recording"
        }

        fn generate(
            &self,
            request: &ProviderGenerateRequest,
        ) -> anyhow::Result<ProviderGenerateResponse> {
            self.prompts
                .lock()
                .map_err(|_| anyhow!("prompt log poisoned"))?
                .push(request.prompt.clone());
            Ok(ProviderGenerateResponse {
                provider_response: Map::new(),
                image: self.image.clone(),
                text: vec!["here you go".to_string()],
            })
        }
    }

    struct FailingProvider;

    impl ImageProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        fn generate(
            &self,
            _request: &ProviderGenerateRequest,
        ) -> anyhow::Result<ProviderGenerateResponse> {
            Err(anyhow!("connection reset")).context("Gemini request failed (test)")
        }
    }

    fn provider_with_base(api_base: &str, api_key: Option<&str>) -> GeminiProvider {
        GeminiProvider::new(GeminiConfig {
            api_base: api_base.to_string(),
            api_key: api_key.map(str::to_string),
            request_timeout_s: 15.0,
        })
    }

    #[test]
    fn gemini_endpoint_and_payload_shape() {
        let provider = provider_with_base("https://example.test/v1beta/", Some("k"));
        assert_eq!(
            provider.endpoint_for_model("gemini-2.0-flash-preview-image-generation"),
            "https://example.test/v1beta/models/gemini-2.0-flash-preview-image-generation:generateContent"
        );
        assert_eq!(
            provider.endpoint_for_model(" models/custom "),
            "https://example.test/v1beta/models/custom:generateContent"
        );

        let payload = GeminiProvider::build_payload("Natural style, a red bicycle");
        assert_eq!(
            payload["contents"][0]["parts"][0]["text"],
            json!("Natural style, a red bicycle")
        );
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["TEXT", "IMAGE"])
        );
    }

    #[test]
    fn extract_first_image_wins_over_later_parts() -> anyhow::Result<()> {
        let payload = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        {"text": "Here is your image"},
                        {"inlineData": {"mimeType": "application/pdf", "data": "AAAA"}},
                        {"inline_data": {"mime_type": "image/jpeg", "data": "AAEC"}},
                        {"inlineData": {"mimeType": "image/png", "data": "AwQF"}},
                    ]
                }
            }]
        });
        let image = GeminiProvider::extract_first_image(&payload)?;
        assert_eq!(image, Some(ImagePayload::new("image/jpeg", "AAEC")));
        assert_eq!(
            GeminiProvider::extract_text_parts(&payload),
            vec!["Here is your image".to_string()]
        );
        Ok(())
    }

    #[test]
    fn extract_first_image_handles_missing_images() -> anyhow::Result<()> {
        let text_only = json!({
            "candidates": [{"content": {"parts": [{"text": "I can't draw that."}]}}]
        });
        assert_eq!(GeminiProvider::extract_first_image(&text_only)?, None);

        let blocked = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        assert_eq!(GeminiProvider::extract_first_image(&blocked)?, None);

        let second_candidate_only = json!({
            "candidates": [
                {"content": {"parts": [{"text": "no"}]}},
                {"content": {"parts": [{"inlineData": {"mimeType": "image/png", "data": "AAEC"}}]}}
            ]
        });
        assert_eq!(
            GeminiProvider::extract_first_image(&second_candidate_only)?,
            None
        );
        Ok(())
    }

    #[test]
    fn extract_first_image_rejects_corrupt_base64() {
        let payload = json!({
            "candidates": [{"content": {"parts": [
                {"inlineData": {"mimeType": "image/png", "data": "not base64!!"}}
            ]}}]
        });
        let err = GeminiProvider::extract_first_image(&payload)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert_eq!(err, "Gemini image base64 decode failed");
    }

    #[test]
    fn gemini_without_key_fails_before_network() {
        let provider = provider_with_base("http://127.0.0.1:9", None);
        let err = provider
            .generate(&ProviderGenerateRequest {
                prompt: "x".to_string(),
                model: "m".to_string(),
            })
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert_eq!(err, "GEMINI_API_KEY or GOOGLE_API_KEY not set");
    }

    #[test]
    fn gemini_round_trip_against_local_server() -> anyhow::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel::<String>();
        let server = thread::spawn(move || -> anyhow::Result<()> {
            let (mut stream, _) = listener.accept()?;
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            let header_end = loop {
                let read = stream.read(&mut buf)?;
                if read == 0 {
                    bail!("client closed before headers");
                }
                raw.extend_from_slice(&buf[..read]);
                if let Some(pos) = raw.windows(4).position(|window| window == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let headers = String::from_utf8_lossy(&raw[..header_end]).to_string();
            let content_length = headers
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            while raw.len() < header_end + content_length {
                let read = stream.read(&mut buf)?;
                if read == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..read]);
            }
            tx.send(String::from_utf8_lossy(&raw).to_string())?;

            let body = json!({
                "candidates": [{
                    "content": {"parts": [
                        {"text": "done"},
                        {"inlineData": {"mimeType": "image/png", "data": "AAEC"}}
                    ]},
                    "finishReason": "STOP"
                }]
            })
            .to_string();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes())?;
            stream.flush()?;
            Ok(())
        });

        let provider = GeminiProvider::with_client(
            GeminiConfig {
                api_base: format!("http://{addr}/v1beta"),
                api_key: Some("secret-key".to_string()),
                request_timeout_s: 15.0,
            },
            reqwest::blocking::Client::builder().no_proxy().build()?,
        );
        let response = provider.generate(&ProviderGenerateRequest {
            prompt: "Natural style, a red bicycle".to_string(),
            model: "gemini-test".to_string(),
        })?;
        server
            .join()
            .map_err(|_| anyhow!("server thread panicked"))??;

        let request = rx.recv()?;
        assert!(request.starts_with("POST /v1beta/models/gemini-test:generateContent "));
        assert!(request.to_ascii_lowercase().contains("x-goog-api-key: secret-key"));
        assert!(!request.contains("key=secret-key"));
        assert!(request.contains("Natural style, a red bicycle"));

        assert_eq!(response.image, Some(ImagePayload::new("image/png", "AAEC")));
        assert_eq!(response.text, vec!["done".to_string()]);
        assert_eq!(response.provider_response["candidates"], json!(1));
        assert_eq!(response.provider_response["finish_reason"], json!("STOP"));
        Ok(())
    }

    #[test]
    fn client_prefixes_style_phrase() -> anyhow::Result<()> {
        let provider = Arc::new(RecordingProvider {
            prompts: Mutex::new(Vec::new()),
            image: Some(ImagePayload::new("image/png", "AAEC")),
        });
        let client = GenerationClient::new(provider.clone(), "gemini-test");

        let outcome = client.generate(None, "a red bicycle", Style::Natural);
        assert_eq!(
            outcome,
            GenerationOutcome::Image(ImagePayload::new("image/png", "AAEC"))
        );
        let prompts = provider
            .prompts
            .lock()
            .map_err(|_| anyhow!("prompt log poisoned"))?
            .clone();
        assert_eq!(prompts, vec!["Natural style, a red bicycle".to_string()]);
        Ok(())
    }

    #[test]
    fn client_maps_missing_image_to_fixed_reason() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let provider = Arc::new(RecordingProvider {
            prompts: Mutex::new(Vec::new()),
            image: None,
        });
        let client = GenerationClient::new(provider, "gemini-test")
            .with_events(EventWriter::new(&events_path, "s-1"));

        let outcome = client.generate(Some(5), "قطة", Style::Anime);
        assert_eq!(
            outcome,
            GenerationOutcome::Failed(replies::NO_IMAGE_GENERATED.to_string())
        );

        let raw = std::fs::read_to_string(&events_path)?;
        let event: Value = serde_json::from_str(raw.lines().next().unwrap_or(""))?;
        assert_eq!(event["type"], json!("generation_no_image"));
        assert_eq!(event["message_id"], json!(5));
        assert_eq!(event["style"], json!("Anime"));
        assert_eq!(event["model"], json!("gemini-test"));
        assert_eq!(event["session_id"], json!("s-1"));
        assert_eq!(event["text_parts"], json!(["here you go"]));
        Ok(())
    }

    #[test]
    fn client_hides_transport_errors_from_users() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let client = GenerationClient::new(Arc::new(FailingProvider), "gemini-test")
            .with_events(EventWriter::new(&events_path, "s-1"));

        let outcome = client.generate(None, "a red bicycle", Style::Natural);
        assert_eq!(
            outcome,
            GenerationOutcome::Failed(replies::GENERATION_FAILED.to_string())
        );

        let raw = std::fs::read_to_string(&events_path)?;
        let event: Value = serde_json::from_str(raw.lines().next().unwrap_or(""))?;
        assert_eq!(event["type"], json!("generation_failed"));
        assert!(event.get("message_id").is_none());
        assert_eq!(
            event["error"],
            json!("Gemini request failed (test) | caused by: connection reset")
        );
        Ok(())
    }

    #[test]
    fn error_chain_text_truncates_long_chains() {
        let err = anyhow!("x".repeat(20)).context("outer");
        assert_eq!(error_chain_text(&err, 10), "outer | ca…");
    }

    #[test]
    fn request_timeout_is_clamped() {
        assert_eq!(clamp_timeout(None), 90.0);
        assert_eq!(clamp_timeout(Some(1.0)), 15.0);
        assert_eq!(clamp_timeout(Some(1_000.0)), 300.0);
        assert_eq!(clamp_timeout(Some(f64::NAN)), 90.0);
        assert_eq!(clamp_timeout(Some(42.0)), 42.0);
    }
}
