//! LLM-backed summarizer.
//!
//! Renders the post into a prompt template, sends it through the Messages
//! API behind a [`RetryExecutor`], and extracts the JSON object from the
//! reply. The reply may wrap the object in prose or a ```json fence.
//!
//! ```toml
//! [processors.summary]
//! type = "llm-summary"
//! model = "claude-haiku-4-5"
//! max_tokens = 512
//! prompt = "Summarize for a researcher: {content}"
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::anthropic::{AnthropicClient, AnthropicError, Message, MessageSender, MessagesRequest, MessagesResponse};
use crate::error::{AutomatonError, Result};
use crate::plugins::{PluginConfig, PluginContext, Processor, ProcessorOutput};
use crate::post::Post;
use crate::retry::RetryExecutor;

pub const DEFAULT_MODEL: &str = "claude-haiku-4-5";
pub const DEFAULT_MAX_TOKENS: u32 = 512;
pub const CONTENT_PLACEHOLDER: &str = "{content}";

/// Upper bound on how long a `retry-after` header can hold up one attempt.
pub const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

pub const DEFAULT_PROMPT: &str = "You triage incoming research content. Reply with ONLY a JSON object:\n\
{\"summary\": \"<two sentences>\", \"keywords\": [\"<keyword>\", ...], \"relevance\": <0.0 to 1.0>}\n\
\n\
{content}";

pub struct LlmSummary<S> {
    id: String,
    sender: S,
    model: String,
    max_tokens: u32,
    template: String,
    retry: Mutex<RetryExecutor>,
}

impl LlmSummary<AnthropicClient> {
    /// `api_key` and `base_url` in the plugin settings override the global
    /// key and the public endpoint.
    pub fn from_config(config: &PluginConfig, context: &PluginContext) -> Result<Self> {
        let api_key = config
            .str_setting("api_key")
            .map(str::to_string)
            .or_else(|| context.api_key.clone())
            .ok_or_else(|| {
                AutomatonError::Plugin(format!("`{}` (llm-summary) needs an API key", config.id))
            })?;
        let client = match config.str_setting("base_url") {
            Some(url) => AnthropicClient::with_base_url(api_key, context.http.clone(), url.to_string()),
            None => AnthropicClient::new(api_key, context.http.clone()),
        };
        debug!(processor = %config.id, endpoint = client.base_url(), "LLM summary configured");

        let max_tokens = match config.settings.get("max_tokens") {
            None => DEFAULT_MAX_TOKENS,
            Some(value) => value
                .as_integer()
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    AutomatonError::Plugin(format!("`{}` has an invalid max_tokens: {value}", config.id))
                })?,
        };

        let template = config.str_setting("prompt").unwrap_or(DEFAULT_PROMPT);
        if !template.contains(CONTENT_PLACEHOLDER) {
            return Err(AutomatonError::Plugin(format!(
                "`{}` prompt must contain {CONTENT_PLACEHOLDER}",
                config.id
            )));
        }

        Ok(Self::new(
            &config.id,
            client,
            config.str_setting("model").unwrap_or(DEFAULT_MODEL),
            max_tokens,
            template,
            RetryExecutor::new(context.retry.policy()),
        ))
    }
}

impl<S: MessageSender> LlmSummary<S> {
    pub fn new(
        id: &str,
        sender: S,
        model: &str,
        max_tokens: u32,
        template: &str,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            id: id.to_string(),
            sender,
            model: model.to_string(),
            max_tokens,
            template: template.to_string(),
            retry: Mutex::new(retry),
        }
    }

    fn request_for(&self, post: &Post) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: None,
            messages: vec![Message::user(
                self.template.replace(CONTENT_PLACEHOLDER, &post.to_prompt()),
            )],
        }
    }

    /// One request. Rate limits wait out `retry-after` (capped) before the
    /// failure is handed to the executor; empty replies count as failures.
    async fn attempt(&self, request: &MessagesRequest) -> std::result::Result<MessagesResponse, AnthropicError> {
        match self.sender.send_message(request).await {
            Err(AnthropicError::RateLimited { retry_after_ms }) => {
                let wait = Duration::from_millis(retry_after_ms).min(MAX_RATE_LIMIT_WAIT);
                warn!(processor = %self.id, wait_ms = wait.as_millis() as u64, "Rate limited");
                sleep(wait).await;
                Err(AnthropicError::RateLimited { retry_after_ms })
            }
            Ok(response) if response.text().is_empty() => Err(AnthropicError::EmptyResponse {
                model: response.model,
            }),
            other => other,
        }
    }
}

#[async_trait]
impl<S> Processor for LlmSummary<S>
where
    S: MessageSender + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn process(&self, post: &Post) -> Result<ProcessorOutput> {
        let request = self.request_for(post);
        let response = {
            let mut retry = self.retry.lock().await;
            retry.call(&self.id, || self.attempt(&request)).await?
        };

        let text = response.text();
        debug!(
            processor = %self.id,
            post = post.id(),
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "LLM reply received"
        );
        Ok(interpret(&text))
    }
}

/// Turn the model's reply into processor output. Replies without a JSON
/// object are kept verbatim as the summary.
fn interpret(text: &str) -> ProcessorOutput {
    let Some(object) = extract_json_object(text) else {
        let mut data = Map::new();
        data.insert("summary".into(), Value::String(text.to_string()));
        return ProcessorOutput {
            relevance: None,
            data: Value::Object(data),
        };
    };

    let relevance = object.get("relevance").and_then(relevance_of);
    ProcessorOutput {
        relevance,
        data: Value::Object(object),
    }
}

/// Numbers are clamped to `[0, 1]`; coarse ratings map to fixed scores.
fn relevance_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().map(|r| r.clamp(0.0, 1.0)),
        Value::String(rating) => match rating.to_lowercase().as_str() {
            "high" => Some(0.9),
            "medium" => Some(0.5),
            "low" => Some(0.2),
            _ => None,
        },
        _ => None,
    }
}

fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let candidate = fenced_block(text).unwrap_or(text);
    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if end < start {
        return None;
    }
    match serde_json::from_str(&candidate[start..=end]) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anthropic::{ContentBlock, Usage};
    use crate::plugins::test_context;
    use crate::post::fixtures::paper;
    use crate::retry::RetryPolicy;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails `failures` times, then answers with `reply`.
    struct ScriptedSender {
        failures: u32,
        failure: fn() -> AnthropicError,
        calls: AtomicU32,
        reply: String,
    }

    fn overloaded() -> AnthropicError {
        AnthropicError::ApiError {
            status: 529,
            message: "overloaded".into(),
        }
    }

    impl ScriptedSender {
        fn new(failures: u32, reply: &str) -> Self {
            Self {
                failures,
                failure: overloaded,
                calls: AtomicU32::new(0),
                reply: reply.to_string(),
            }
        }

        fn failing_with(mut self, failure: fn() -> AnthropicError) -> Self {
            self.failure = failure;
            self
        }
    }

    impl MessageSender for ScriptedSender {
        async fn send_message(
            &self,
            req: &MessagesRequest,
        ) -> std::result::Result<MessagesResponse, AnthropicError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err((self.failure)());
            }
            Ok(MessagesResponse {
                id: "msg".into(),
                content: vec![ContentBlock {
                    content_type: "text".into(),
                    text: self.reply.clone(),
                }],
                model: req.model.clone(),
                stop_reason: Some("end_turn".into()),
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 10,
                },
            })
        }
    }

    fn executor(max_attempts: u32) -> RetryExecutor {
        RetryExecutor::new(RetryPolicy {
            max_attempts,
            growth_factor: 2.0,
            decrement: Duration::from_millis(10),
            initial_delay: Duration::from_millis(10),
        })
    }

    fn processor(sender: ScriptedSender, max_attempts: u32) -> LlmSummary<ScriptedSender> {
        LlmSummary::new(
            "summary",
            sender,
            DEFAULT_MODEL,
            DEFAULT_MAX_TOKENS,
            "Summarize: {content}",
            executor(max_attempts),
        )
    }

    #[test]
    fn prompt_substitutes_content() {
        let processor = processor(ScriptedSender::new(0, "{}"), 1);
        let request = processor.request_for(&paper("p1", "Sparse attention"));
        assert_eq!(
            request.messages[0].content,
            "Summarize: # Sparse attention\nWe study Sparse attention."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_through_the_executor() {
        let processor = processor(
            ScriptedSender::new(2, r#"{"summary": "Faster attention.", "relevance": 0.85}"#),
            5,
        );
        let output = processor.process(&paper("p1", "Sparse attention")).await.unwrap();

        assert_eq!(processor.sender.calls.load(Ordering::SeqCst), 3);
        assert_eq!(output.relevance, Some(0.85));
        assert_eq!(output.data["summary"], "Faster attention.");
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_becomes_retry_exhausted() {
        let processor = processor(ScriptedSender::new(u32::MAX, ""), 3);
        let err = processor.process(&paper("p1", "t")).await.unwrap_err();

        assert_eq!(processor.sender.calls.load(Ordering::SeqCst), 3);
        match err {
            AutomatonError::RetryExhausted { attempts, failures } => {
                assert_eq!(attempts, 3);
                assert_eq!(failures.len(), 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn empty_replies_are_retried_then_reported() {
        let processor = processor(ScriptedSender::new(0, ""), 3);
        let err = processor.process(&paper("p1", "t")).await.unwrap_err();

        assert_eq!(processor.sender.calls.load(Ordering::SeqCst), 3);
        match err {
            AutomatonError::RetryExhausted { failures, .. } => {
                assert!(failures.iter().all(|f| f == "empty response from claude-haiku-4-5"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_for_retry_after() {
        let sender = ScriptedSender::new(1, r#"{"relevance": 0.4}"#)
            .failing_with(|| AnthropicError::RateLimited { retry_after_ms: 30_000 });
        let processor = processor(sender, 3);

        let started = tokio::time::Instant::now();
        let output = processor.process(&paper("p1", "t")).await.unwrap();

        assert_eq!(output.relevance, Some(0.4));
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_wait_is_capped() {
        let sender = ScriptedSender::new(1, r#"{"relevance": 0.4}"#)
            .failing_with(|| AnthropicError::RateLimited { retry_after_ms: u64::MAX });
        let processor = processor(sender, 3);

        let started = tokio::time::Instant::now();
        processor.process(&paper("p1", "t")).await.unwrap();

        // The capped wait plus one 20ms backoff.
        let elapsed = started.elapsed();
        assert!(elapsed >= MAX_RATE_LIMIT_WAIT + Duration::from_millis(20));
        assert!(elapsed < MAX_RATE_LIMIT_WAIT + Duration::from_secs(1));
    }

    #[test]
    fn fenced_and_bare_json_replies_are_understood() {
        let fenced = "Here you go\n\n```json\n{\"summary\": \"Short\", \"relevance\": \"high\"}\n```\n";
        let output = interpret(fenced);
        assert_eq!(output.relevance, Some(0.9));
        assert_eq!(output.data["summary"], "Short");

        let bare = "Result: {\"keywords\": [\"llm\"], \"relevance\": 4}";
        let output = interpret(bare);
        assert_eq!(output.relevance, Some(1.0));
        assert_eq!(output.data["keywords"], json!(["llm"]));
    }

    #[test]
    fn prose_reply_is_kept_as_summary() {
        let output = interpret("A paper about attention.");
        assert_eq!(output.relevance, None);
        assert_eq!(output.data, json!({"summary": "A paper about attention."}));
    }

    fn plugin(src: &str) -> PluginConfig {
        PluginConfig::from_value("summary", &toml::Value::Table(src.parse().unwrap())).unwrap()
    }

    #[test]
    fn construction_requires_a_key_and_placeholder() {
        let context = test_context();
        assert!(LlmSummary::from_config(&plugin(r#"type = "llm-summary""#), &context).is_err());

        let keyed = plugin("type = \"llm-summary\"\napi_key = \"k\"\nprompt = \"no slot\"");
        assert!(LlmSummary::from_config(&keyed, &context).is_err());

        let ok = plugin("type = \"llm-summary\"\napi_key = \"k\"\nmax_tokens = 128");
        let processor = LlmSummary::from_config(&ok, &context).unwrap();
        assert_eq!(processor.max_tokens, 128);
        assert_eq!(processor.model, DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn talks_to_the_messages_endpoint() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "msg_1",
                "content": [{"type": "text", "text": "{\"summary\": \"ok\", \"relevance\": 0.3}"}],
                "model": DEFAULT_MODEL,
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 1, "output_tokens": 1}
            })))
            .mount(&server)
            .await;

        let mut context = test_context();
        context.retry.initial_delay_ms = 1;
        context.retry.decrement_ms = 1;
        let config = plugin(&format!(
            "type = \"llm-summary\"\napi_key = \"k\"\nbase_url = \"{}\"",
            server.uri()
        ));
        let processor = LlmSummary::from_config(&config, &context).unwrap();

        let output = processor.process(&paper("p1", "t")).await.unwrap();
        assert_eq!(output.relevance, Some(0.3));
    }
}
