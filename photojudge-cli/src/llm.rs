/// OpenAI-compatible vision client: scores photos and photo sets.
use crate::parse::{parse_photo_evaluation, parse_set_evaluation};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use photojudge_core::{Criterion, PhotoEvaluation, Scorer, ScorerError, SetEvaluation, SetScorer};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Configuration for the LLM endpoint.
pub struct LlmConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f64,
    /// Retries per request on transport errors and 5xx responses.
    pub max_retries: usize,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: Option<String>,
}

/// Why one HTTP attempt failed.
#[derive(Debug)]
enum RequestError {
    Transport(reqwest::Error),
    Status(StatusCode, String),
    Body(String),
}

impl RequestError {
    /// Transport errors other than timeouts, and server-side 5xx, are worth
    /// another attempt.
    fn is_retryable(&self) -> bool {
        match self {
            RequestError::Transport(e) => !e.is_timeout(),
            RequestError::Status(status, _) => status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS,
            RequestError::Body(_) => false,
        }
    }

    fn into_scorer_error(self, timeout: Duration) -> ScorerError {
        match self {
            RequestError::Transport(e) if e.is_timeout() => ScorerError::Timeout(timeout),
            RequestError::Transport(e) if e.is_connect() => ScorerError::Unreachable(e.to_string()),
            RequestError::Transport(e) => ScorerError::Failed(Box::new(e)),
            RequestError::Status(status, body)
                if matches!(
                    status,
                    StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
                ) =>
            {
                ScorerError::Unreachable(format!("LLM API returned {status}: {body}"))
            }
            RequestError::Status(status, body) => ScorerError::failed(format!("LLM API returned {status}: {body}")),
            RequestError::Body(msg) => ScorerError::failed(msg),
        }
    }
}

/// Vision-model client shared by the `analyze` and `sets` commands.
pub struct VisionClient {
    client: Client,
    config: LlmConfig,
    criteria: Vec<Criterion>,
    set_criteria: Vec<Criterion>,
}

impl VisionClient {
    pub fn new(config: LlmConfig, criteria: Vec<Criterion>, set_criteria: Vec<Criterion>) -> Self {
        VisionClient { client: Client::new(), config, criteria, set_criteria }
    }

    /// Send one chat completion with retries, returning the reply text.
    ///
    /// Retries up to `max_retries` times with a jittered one-second delay.
    /// Timeouts are never retried: the batch driver records them instead.
    async fn complete(&self, content: Vec<ContentPart>, timeout: Duration) -> Result<String, ScorerError> {
        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![ChatMessage { role: "user", content }],
            temperature: self.config.temperature,
            max_tokens: 1500,
        };
        let url = format!("{}/v1/chat/completions", self.config.endpoint.trim_end_matches('/'));
        let deadline = Instant::now() + timeout;

        let mut attempt = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ScorerError::Timeout(timeout));
            }
            match self.send(&url, &request, remaining).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(attempt, max = self.config.max_retries, error = ?e, "Retrying LLM request");
                    tokio::time::sleep(retry_delay()).await;
                }
                Err(e) => return Err(e.into_scorer_error(timeout)),
            }
        }
    }

    async fn send(&self, url: &str, request: &ChatCompletionRequest<'_>, timeout: Duration) -> Result<String, RequestError> {
        let mut req_builder = self.client.post(url).json(request).timeout(timeout);
        if let Some(ref key) = self.config.api_key {
            req_builder = req_builder.bearer_auth(key);
        }

        let resp = req_builder.send().await.map_err(RequestError::Transport)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(RequestError::Status(status, snippet));
        }

        let data: ChatCompletionResponse = resp
            .json()
            .await
            .map_err(|e| RequestError::Body(format!("Failed to parse LLM response JSON: {e}")))?;
        data.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RequestError::Body("No content in LLM response".to_string()))
    }
}

/// One second plus up to 250 ms of jitter.
fn retry_delay() -> Duration {
    let jitter: u64 = rand::rng().random_range(0..250);
    Duration::from_millis(1000 + jitter)
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/jpeg",
    }
}

/// Read a photo into a `data:` URL. I/O errors keep their type so the
/// classifier can tell a missing file from a dead backend.
async fn data_url(path: &Path) -> Result<String, ScorerError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| ScorerError::Failed(Box::new(e)))?;
    Ok(format!("data:{};base64,{}", mime_for(path), BASE64.encode(bytes)))
}

#[async_trait]
impl Scorer for VisionClient {
    async fn analyze(&self, photo: &Path, criteria_prompt: &str, timeout: Duration) -> Result<PhotoEvaluation, ScorerError> {
        let content = vec![
            ContentPart::Text { text: criteria_prompt.to_string() },
            ContentPart::ImageUrl { image_url: ImageUrl { url: data_url(photo).await? } },
        ];
        let reply = self.complete(content, timeout).await?;
        debug!(photo = %photo.display(), chars = reply.len(), "Model replied");
        parse_photo_evaluation(&reply, &self.criteria).map_err(ScorerError::failed)
    }
}

#[async_trait]
impl SetScorer for VisionClient {
    async fn evaluate_set(&self, photos: &[PathBuf], set_prompt: &str, timeout: Duration) -> Result<SetEvaluation, ScorerError> {
        let mut content = vec![ContentPart::Text { text: set_prompt.to_string() }];
        for photo in photos {
            content.push(ContentPart::ImageUrl { image_url: ImageUrl { url: data_url(photo).await? } });
        }
        let reply = self.complete(content, timeout).await?;
        parse_set_evaluation(&reply, &self.set_criteria).map_err(ScorerError::failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = ChatCompletionRequest {
            model: "vl-model",
            messages: vec![ChatMessage {
                role: "user",
                content: vec![
                    ContentPart::Text { text: "Score it".to_string() },
                    ContentPart::ImageUrl { image_url: ImageUrl { url: "data:image/png;base64,AAAA".to_string() } },
                ],
            }],
            temperature: 0.2,
            max_tokens: 1500,
        };
        let json = serde_json::to_value(&request).unwrap();
        let content = &json["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "Score it");
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_status_mapping() {
        let timeout = Duration::from_secs(60);
        let err = RequestError::Status(StatusCode::SERVICE_UNAVAILABLE, String::new()).into_scorer_error(timeout);
        assert!(matches!(err, ScorerError::Unreachable(_)));

        let err = RequestError::Status(StatusCode::BAD_REQUEST, "bad image".into()).into_scorer_error(timeout);
        assert!(matches!(err, ScorerError::Failed(_)));

        assert!(RequestError::Status(StatusCode::INTERNAL_SERVER_ERROR, String::new()).is_retryable());
        assert!(!RequestError::Status(StatusCode::UNAUTHORIZED, String::new()).is_retryable());
        assert!(!RequestError::Body("x".into()).is_retryable());
    }

    #[test]
    fn test_mime_for() {
        assert_eq!(mime_for(Path::new("a.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("b.jpeg")), "image/jpeg");
        assert_eq!(mime_for(Path::new("c.webp")), "image/webp");
    }

    #[tokio::test]
    async fn test_missing_photo_is_filesystem_error() {
        let err = data_url(Path::new("/definitely/not/here.jpg")).await.unwrap_err();
        let classification = photojudge_core::classify(&err);
        assert_eq!(classification.kind, photojudge_core::ErrorKind::Filesystem);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let client = VisionClient::new(
            LlmConfig {
                endpoint: "http://127.0.0.1:9".to_string(),
                model: "m".to_string(),
                api_key: None,
                temperature: 0.0,
                max_retries: 0,
            },
            vec![],
            vec![],
        );
        let err = client
            .complete(vec![ContentPart::Text { text: "hi".into() }], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ScorerError::Unreachable(_)), "{err:?}");
    }
}
