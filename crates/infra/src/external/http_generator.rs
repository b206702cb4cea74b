//! OpenAI-compatible chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use coursegen_ai::{ContentGenerator, GenerationRequest, UpstreamError};

const SYSTEM_PROMPT: &str = "You write structured online course material. Follow the requested output format exactly.";
const JSON_HINT: &str = "Answer with a single JSON document and nothing else.";

/// Calls `POST {base_url}/chat/completions` with the route's model.
///
/// Failures come back unclassified: HTTP status, `retry-after` header and the
/// provider's error message are passed through for the classifier.
#[derive(Debug, Clone)]
pub struct HttpGenerator {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl HttpGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

fn transport_error(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::timeout(err.to_string())
    } else {
        UpstreamError::transport(err.to_string())
    }
}

/// Provider message from an error body, falling back to the raw text.
fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[async_trait]
impl ContentGenerator for HttpGenerator {
    #[instrument(skip(self, request), fields(interaction = %request.interaction, model = %request.route.model))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String, UpstreamError> {
        let system = if request.interaction.expects_json() {
            format!("{SYSTEM_PROMPT} {JSON_HINT}")
        } else {
            SYSTEM_PROMPT.to_string()
        };
        let body = ChatRequest {
            model: &request.route.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
        };

        let mut call = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }
        let response = call.send().await.map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let text = response.text().await.unwrap_or_default();
            let mut err = UpstreamError::response(status.as_u16(), error_message(status, &text));
            if let Some(value) = retry_after {
                err = err.with_retry_after(value);
            }
            debug!(status = status.as_u16(), error = %err, "generator returned an error");
            return Err(err);
        }

        let parsed: ChatResponse = response.json().await.map_err(transport_error)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| UpstreamError::message("completion contained no text"))
    }
}

#[cfg(test)]
mod tests {
    use coursegen_ai::{InteractionType, ModelRoute, UpstreamErrorKind};
    use serde_json::json;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest::new(
            InteractionType::Outline,
            ModelRoute::new("openai", "gpt-4o-mini"),
            "Plan a course on Rust",
        )
    }

    async fn generator(server: &MockServer) -> HttpGenerator {
        HttpGenerator::new(
            format!("{}/v1/", server.uri()),
            Some("sk-test".into()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn returns_first_choice_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(bearer_token("sk-test"))
            .and(body_partial_json(json!({ "model": "gpt-4o-mini" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "{\"sections\": []}" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = generator(&server).await.generate(&request()).await.unwrap();
        assert_eq!(text, "{\"sections\": []}");
    }

    #[tokio::test]
    async fn rate_limit_responses_carry_status_and_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "12")
                    .set_body_json(json!({
                        "error": { "message": "Rate limit reached for gpt-4o-mini", "type": "requests" }
                    })),
            )
            .mount(&server)
            .await;

        let err = generator(&server).await.generate(&request()).await.unwrap_err();
        assert_eq!(err.kind, UpstreamErrorKind::Response);
        assert_eq!(err.status, Some(429));
        assert_eq!(err.retry_after.as_deref(), Some("12"));
        assert_eq!(err.message, "Rate limit reached for gpt-4o-mini");
    }

    #[tokio::test]
    async fn plain_error_bodies_are_passed_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream overloaded"))
            .mount(&server)
            .await;

        let err = generator(&server).await.generate(&request()).await.unwrap_err();
        assert_eq!(err.status, Some(503));
        assert_eq!(err.retry_after, None);
        assert_eq!(err.message, "upstream overloaded");
    }

    #[tokio::test]
    async fn empty_completion_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = generator(&server).await.generate(&request()).await.unwrap_err();
        assert_eq!(err.status, None);
    }

    #[tokio::test]
    async fn slow_responses_time_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let generator =
            HttpGenerator::new(server.uri(), None, Duration::from_millis(50)).unwrap();
        let err = generator.generate(&request()).await.unwrap_err();
        assert_eq!(err.kind, UpstreamErrorKind::Timeout);
    }
}
