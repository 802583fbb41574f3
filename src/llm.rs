use std::pin::Pin;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::{Config, HistoryMode};
use crate::error::StreamError;
use crate::events::{Citation, Message, Role};

/// Partial result of a streamed answer.
///
/// `text` is cumulative: every chunk carries the full answer so far, so callers
/// replace what they display instead of appending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    pub text: String,
    pub done: bool,
    pub citations: Vec<Citation>,
}

/// Lazy, forward-only sequence of chunks; ends after a `done` chunk or an error
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, StreamError>> + Send>>;

/// Request to send to the model
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub history: Vec<Message>,
    pub user_text: String,
    pub use_search_grounding: bool,
    pub history_mode: HistoryMode,
}

impl ChatRequest {
    pub fn new(history: Vec<Message>, user_text: impl Into<String>) -> Self {
        Self {
            history,
            user_text: user_text.into(),
            use_search_grounding: false,
            history_mode: HistoryMode::default(),
        }
    }

    pub fn with_search_grounding(mut self, enabled: bool) -> Self {
        self.use_search_grounding = enabled;
        self
    }

    pub fn with_history_mode(mut self, mode: HistoryMode) -> Self {
        self.history_mode = mode;
        self
    }

    /// Prior turns that will actually be transmitted
    pub fn transmitted_history(&self) -> impl Iterator<Item = &Message> {
        let send = self.history_mode == HistoryMode::Full;
        self.history.iter().filter(move |m| {
            send && !m.is_error && !m.content.trim().is_empty() && m.role != Role::System
        })
    }
}

/// A hosted model that can stream an answer to a prompt
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChunkStream, StreamError>;
}

/// Client for the Gemini `streamGenerateContent` endpoint
#[derive(Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
    system_instruction: String,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key(),
            api_key_env: config.api_key_env.clone(),
            system_instruction: config.system_instruction.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:streamGenerateContent", self.base_url, self.model)
    }

    fn request_body(&self, request: &ChatRequest) -> GenerateContentRequest {
        let mut contents: Vec<Content> = request
            .transmitted_history()
            .map(|m| Content::text(gemini_role(m.role), &m.content))
            .collect();
        contents.push(Content::text("user", &request.user_text));

        GenerateContentRequest {
            contents,
            system_instruction: (!self.system_instruction.is_empty()).then(|| SystemInstruction {
                parts: vec![Part {
                    text: self.system_instruction.clone(),
                }],
            }),
            tools: if request.use_search_grounding {
                vec![Tool {
                    google_search: GoogleSearch {},
                }]
            } else {
                Vec::new()
            },
        }
    }
}

#[async_trait]
impl ChatProvider for GeminiClient {
    async fn stream_chat(&self, request: ChatRequest) -> Result<ChunkStream, StreamError> {
        let api_key = self.api_key.clone().ok_or_else(|| StreamError::MissingApiKey {
            env_var: self.api_key_env.clone(),
        })?;

        let body = self.request_body(&request);
        debug!(
            model = %self.model,
            turns = body.contents.len(),
            grounding = request.use_search_grounding,
            "sending streamGenerateContent request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("alt", "sse")])
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, %body, "Gemini API error");
            return Err(StreamError::Status { status, body });
        }

        Ok(Box::pin(decode_stream(response)))
    }
}

fn decode_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<StreamChunk, StreamError>> + Send {
    try_stream! {
        let mut bytes = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut answer = AnswerAccumulator::default();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            for data in decoder.push(&chunk) {
                yield answer.apply(parse_event(&data)?);
            }
        }

        for data in decoder.finish() {
            yield answer.apply(parse_event(&data)?);
        }

        yield answer.finish();
    }
}

/// Decode one SSE payload; an in-band `error` object ends the stream
fn parse_event(data: &str) -> Result<GenerateContentResponse, StreamError> {
    let mut parsed: GenerateContentResponse = serde_json::from_str(data)?;
    if let Some(api_error) = parsed.error.take() {
        error!(
            code = api_error.code,
            status = %api_error.status,
            message = %api_error.message,
            "Gemini reported an error mid-stream"
        );
        return Err(StreamError::Provider {
            code: api_error.code,
            message: api_error.message,
        });
    }
    Ok(parsed)
}

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::Assistant => "model",
        Role::User | Role::System => "user",
    }
}

/// Incremental Server-Sent Events parser.
///
/// Fed raw network bytes, it returns the `data` payload of every event
/// completed so far. Lines may be split across pushes.
#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut events = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                let line = std::mem::take(&mut self.line);
                if let Some(event) = self.process_line(&line) {
                    events.push(event);
                }
            } else {
                self.line.push(byte);
            }
        }
        events
    }

    /// Flush a trailing line and any event not closed by a blank line
    pub fn finish(&mut self) -> Vec<String> {
        let mut events = Vec::new();
        let line = std::mem::take(&mut self.line);
        if let Some(event) = self.process_line(&line) {
            events.push(event);
        }
        if let Some(event) = self.dispatch() {
            events.push(event);
        }
        events
    }

    fn process_line(&mut self, raw: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches('\r');

        if line.is_empty() {
            return self.dispatch();
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data.push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        // Comments, event names and ids carry nothing we use.
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let data = self.data.join("\n");
        self.data.clear();
        Some(data)
    }
}

/// Folds provider responses into cumulative chunks
#[derive(Debug, Default)]
struct AnswerAccumulator {
    text: String,
    citations: Vec<Citation>,
}

impl AnswerAccumulator {
    fn apply(&mut self, response: GenerateContentResponse) -> StreamChunk {
        if let Some(candidate) = response.candidates.into_iter().next() {
            if let Some(content) = candidate.content {
                for part in content.parts.into_iter().filter(|p| !p.thought) {
                    if let Some(text) = part.text {
                        self.text.push_str(&text);
                    }
                }
            }
            if let Some(metadata) = candidate.grounding_metadata {
                let citations = metadata.citations();
                if !citations.is_empty() {
                    self.citations = citations;
                }
            }
        }
        self.chunk(false)
    }

    fn finish(self) -> StreamChunk {
        StreamChunk {
            text: self.text,
            done: true,
            citations: self.citations,
        }
    }

    fn chunk(&self, done: bool) -> StreamChunk {
        StreamChunk {
            text: self.text.clone(),
            done,
            citations: self.citations.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

impl Content {
    fn text(role: &'static str, text: &str) -> Self {
        Self {
            role,
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Debug, Serialize)]
struct GoogleSearch {}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

impl GroundingMetadata {
    fn citations(self) -> Vec<Citation> {
        self.grounding_chunks
            .into_iter()
            .filter_map(|chunk| chunk.web)
            .filter_map(|web| {
                let uri = web.uri?;
                let title = web.title.filter(|t| !t.is_empty()).unwrap_or_else(|| uri.clone());
                Some(Citation { title, uri })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
struct WebSource {
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn response(value: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(value).unwrap()
    }

    fn text_event(text: &str) -> String {
        format!(
            "data: {}\r\n\r\n",
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]})
        )
    }

    fn test_config(base_url: &str) -> Config {
        Config {
            base_url: base_url.to_string(),
            model: "test-model".to_string(),
            api_key: Some("test-key".to_string()),
            system_instruction: "Be brief.".to_string(),
            ..Config::default()
        }
    }

    fn message(role: Role, content: &str) -> Message {
        Message::new(role, content)
    }

    #[test]
    fn decoder_handles_lines_split_across_pushes() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert!(decoder.push(b":1}\n").is_empty());
        assert_eq!(decoder.push(b"\ndata: 2\n\n"), vec!["{\"a\":1}", "2"]);
    }

    #[test]
    fn decoder_handles_crlf_and_ignores_comments() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b": keep-alive\r\n\r\nevent: message\r\ndata: x\r\n\r\n");
        assert_eq!(events, vec!["x"]);
    }

    #[test]
    fn decoder_joins_multi_line_data() {
        let mut decoder = SseDecoder::default();
        assert_eq!(decoder.push(b"data: a\ndata: b\n\n"), vec!["a\nb"]);
    }

    #[test]
    fn decoder_flushes_trailing_event_without_newline() {
        let mut decoder = SseDecoder::default();
        assert_eq!(decoder.push(b"data: first\n\ndata: last"), vec!["first"]);
        assert_eq!(decoder.finish(), vec!["last"]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn decoder_keeps_multibyte_characters_split_across_pushes() {
        let mut decoder = SseDecoder::default();
        let bytes = "data: héllo\n\n".as_bytes();
        let split = 8; // inside the two-byte 'é'
        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec!["héllo"]);
    }

    #[test]
    fn accumulator_yields_cumulative_text() {
        let mut answer = AnswerAccumulator::default();
        let first = answer.apply(response(json!({"candidates": [{"content": {"parts": [{"text": "Hel"}]}}]})));
        let second = answer.apply(response(json!({"candidates": [{"content": {"parts": [{"text": "lo"}, {"text": "!"}]}}]})));
        assert_eq!(first.text, "Hel");
        assert_eq!(second.text, "Hello!");
        assert!(!second.done);

        let last = answer.finish();
        assert_eq!(last.text, "Hello!");
        assert!(last.done);
    }

    #[test]
    fn accumulator_skips_thought_parts_and_empty_candidates() {
        let mut answer = AnswerAccumulator::default();
        answer.apply(response(json!({"candidates": [{"content": {"parts": [
            {"text": "thinking...", "thought": true},
            {"text": "Answer"}
        ]}}]})));
        let chunk = answer.apply(response(json!({"usageMetadata": {"totalTokenCount": 3}})));
        assert_eq!(chunk.text, "Answer");
    }

    #[test]
    fn citations_are_typed_and_persist() {
        let mut answer = AnswerAccumulator::default();
        let grounded = answer.apply(response(json!({"candidates": [{
            "content": {"parts": [{"text": "Rust 1.0 shipped in 2015."}]},
            "groundingMetadata": {"groundingChunks": [
                {"web": {"uri": "https://blog.rust-lang.org", "title": "Rust Blog"}},
                {"retrievedContext": {"uri": "ignored"}},
                {"web": {"uri": "https://example.com"}}
            ]}
        }]})));
        let expected = vec![
            Citation {
                title: "Rust Blog".into(),
                uri: "https://blog.rust-lang.org".into(),
            },
            Citation {
                title: "https://example.com".into(),
                uri: "https://example.com".into(),
            },
        ];
        assert_eq!(grounded.citations, expected);

        let later = answer.apply(response(json!({"candidates": [{"content": {"parts": [{"text": " More."}]}}]})));
        assert_eq!(later.citations, expected);
        assert_eq!(answer.finish().citations, expected);
    }

    #[test]
    fn request_body_includes_history_in_full_mode() {
        let client = GeminiClient::new(&test_config("http://localhost")).unwrap();
        let mut failed = message(Role::Assistant, "Sorry");
        failed.is_error = true;
        let history = vec![
            message(Role::System, "setup"),
            message(Role::User, "Hi"),
            message(Role::Assistant, "Hello!"),
            message(Role::User, "Again"),
            failed,
            message(Role::Assistant, ""),
        ];

        let request = ChatRequest::new(history, "Third");
        let body = serde_json::to_value(client.request_body(&request)).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "Hi"}]},
                    {"role": "model", "parts": [{"text": "Hello!"}]},
                    {"role": "user", "parts": [{"text": "Again"}]},
                    {"role": "user", "parts": [{"text": "Third"}]}
                ],
                "systemInstruction": {"parts": [{"text": "Be brief."}]}
            })
        );
    }

    #[test]
    fn request_body_without_history_and_with_grounding() {
        let client = GeminiClient::new(&test_config("http://localhost")).unwrap();
        let request = ChatRequest::new(vec![message(Role::User, "Hi")], "Fresh")
            .with_history_mode(HistoryMode::None)
            .with_search_grounding(true);
        let body = serde_json::to_value(client.request_body(&request)).unwrap();

        assert_eq!(body["contents"], json!([{"role": "user", "parts": [{"text": "Fresh"}]}]));
        assert_eq!(body["tools"], json!([{"google_search": {}}]));
    }

    #[tokio::test]
    async fn streams_cumulative_chunks_over_http() {
        let server = MockServer::start().await;
        let body = format!("{}{}", text_event("Hello"), text_event(", world"));
        Mock::given(method("POST"))
            .and(path("/models/test-model:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .and(header("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({"contents": [{"role": "user", "parts": [{"text": "Hello"}]}]})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new(&test_config(&server.uri())).unwrap();
        let stream = client.stream_chat(ChatRequest::new(Vec::new(), "Hello")).await.unwrap();
        let chunks: Vec<StreamChunk> = stream.map(|c| c.unwrap()).collect().await;

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["Hello", "Hello, world", "Hello, world"]);
        assert!(chunks[..2].iter().all(|c| !c.done));
        assert!(chunks[2].done);
        assert!(chunks.iter().all(|c| c.citations.is_empty()));
    }

    #[tokio::test]
    async fn grounding_request_sends_search_tool() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"tools": [{"google_search": {}}]})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(text_event("ok"), "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let client = GeminiClient::new(&test_config(&server.uri())).unwrap();
        let request = ChatRequest::new(Vec::new(), "news").with_search_grounding(true);
        let stream = client.stream_chat(request).await.unwrap();
        let last = stream.fold(None, |_, c| async move { Some(c.unwrap()) }).await;
        assert_eq!(last.unwrap().text, "ok");
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
            .mount(&server)
            .await;

        let client = GeminiClient::new(&test_config(&server.uri())).unwrap();
        let err = match client.stream_chat(ChatRequest::new(Vec::new(), "Hello")).await {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        match err {
            StreamError::Status { status, body } => {
                assert_eq!(status.as_u16(), 403);
                assert_eq!(body, "API key not valid");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn malformed_event_aborts_after_earlier_chunks() {
        let server = MockServer::start().await;
        let body = format!("{}data: {{not json\n\n", text_event("Partial"));
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = GeminiClient::new(&test_config(&server.uri())).unwrap();
        let mut stream = client.stream_chat(ChatRequest::new(Vec::new(), "Hello")).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().text, "Partial");
        assert!(matches!(stream.next().await, Some(Err(StreamError::Decode(_)))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn in_band_error_aborts_after_earlier_chunks() {
        let server = MockServer::start().await;
        let error_event = json!({
            "error": {"code": 500, "message": "Internal error encountered.", "status": "INTERNAL"}
        });
        let body = format!("{}data: {}\n\n{}", text_event("Part"), error_event, text_event("never"));
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let client = GeminiClient::new(&test_config(&server.uri())).unwrap();
        let mut stream = client.stream_chat(ChatRequest::new(Vec::new(), "Hello")).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().text, "Part");
        match stream.next().await {
            Some(Err(StreamError::Provider { code, message })) => {
                assert_eq!(code, 500);
                assert_eq!(message, "Internal error encountered.");
            }
            other => panic!("unexpected item: {other:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_sending() {
        let mut client = GeminiClient::new(&test_config("http://127.0.0.1:9")).unwrap();
        client.api_key = None;
        let result = client.stream_chat(ChatRequest::new(Vec::new(), "Hello")).await;
        assert!(matches!(result, Err(StreamError::MissingApiKey { .. })));
    }
}
