use std::collections::VecDeque;
use std::sync::Mutex;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
    CreateChatCompletionRequestArgs, ResponseFormat,
};
use async_trait::async_trait;
use common::error::AppError;

/// Abstraction over "ask the model a question, get text back", with a
/// provider-backed implementation and a queue-backed stub — mirroring
/// `common::utils::embedding::Embedder`'s `OpenAiEmbedder`/`HashedEmbedder`
/// split, so the full pipeline is exercisable without a network call.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, AppError>;

    /// Like `complete`, but binds JSON-object output mode where the
    /// provider supports it.
    async fn complete_json(&self, system: &str, user: &str) -> Result<String, AppError>;
}

pub struct OpenAiLlmClient {
    client: async_openai::Client<OpenAIConfig>,
    model: String,
}

impl OpenAiLlmClient {
    pub fn new(client: async_openai::Client<OpenAIConfig>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    async fn chat(&self, system: &str, user: &str, response_format: Option<ResponseFormat>) -> Result<String, AppError> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).messages([
            ChatCompletionRequestSystemMessage::from(system).into(),
            ChatCompletionRequestUserMessage::from(user).into(),
        ]);
        if let Some(format) = response_format {
            builder.response_format(format);
        }
        let request = builder.build()?;

        let response = self.client.chat().create(request).await?;
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::Backend("no content in LLM response".into()))
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, AppError> {
        self.chat(system, user, None).await
    }

    async fn complete_json(&self, system: &str, user: &str) -> Result<String, AppError> {
        self.chat(system, user, Some(ResponseFormat::JsonObject)).await
    }
}

/// Network-free `LlmClient` used by tests: responses are queued up front in
/// the exact order the pipeline under test is expected to call them.
pub struct StubLlmClient {
    responses: Mutex<VecDeque<String>>,
}

impl StubLlmClient {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
        }
    }
}

#[async_trait]
impl LlmClient for StubLlmClient {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, AppError> {
        self.responses
            .lock()
            .expect("stub llm mutex poisoned")
            .pop_front()
            .ok_or_else(|| AppError::Backend("stub llm client ran out of queued responses".into()))
    }

    async fn complete_json(&self, system: &str, user: &str) -> Result<String, AppError> {
        self.complete(system, user).await
    }
}
