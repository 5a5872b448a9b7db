use super::{ChatModel, Embedder};
use crate::config::Config;
use crate::error::ExternalServiceError;
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
        CreateEmbeddingRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// OpenAI-compatible client (OpenRouter by default) for chat and embeddings.
pub struct LlmClient {
    chat_client: Client<OpenAIConfig>,
    embedding_client: Client<OpenAIConfig>,
    chat_model: String,
    embedding_model: String,
    chat_timeout: Duration,
    embedding_timeout: Duration,
}

impl LlmClient {
    pub fn new(config: &Config) -> Self {
        let chat_config = OpenAIConfig::new()
            .with_api_base(&config.llm_url)
            .with_api_key(config.llm_api_key.as_deref().unwrap_or("unused"));

        let embedding_config = OpenAIConfig::new()
            .with_api_base(&config.embedding_url)
            .with_api_key(config.embedding_api_key.as_deref().unwrap_or("unused"));

        Self {
            chat_client: Client::with_config(chat_config),
            embedding_client: Client::with_config(embedding_config),
            chat_model: config.llm_model.clone().unwrap_or_default(),
            embedding_model: config.embedding_model.clone(),
            chat_timeout: Duration::from_secs(config.llm_timeout_secs),
            embedding_timeout: Duration::from_secs(config.embedding_timeout_secs),
        }
    }

    pub async fn chat(
        &self,
        messages: Vec<ChatCompletionRequestMessage>,
    ) -> Result<String, ExternalServiceError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .messages(messages)
            .build()
            .map_err(|e| ExternalServiceError::Completion(e.to_string()))?;

        let response = with_timeout("language model", self.chat_timeout, async {
            self.chat_client
                .chat()
                .create(request)
                .await
                .map_err(|e| ExternalServiceError::Completion(e.to_string()))
        })
        .await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();
        debug!("LLM returned {} characters", content.len());
        Ok(content)
    }

    pub async fn get_embeddings(&self, text: &str) -> Result<Vec<f32>, ExternalServiceError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.embedding_model)
            .input(text)
            .build()
            .map_err(|e| ExternalServiceError::Embedding(e.to_string()))?;

        let response = with_timeout("embedding", self.embedding_timeout, async {
            self.embedding_client
                .embeddings()
                .create(request)
                .await
                .map_err(|e| ExternalServiceError::Embedding(e.to_string()))
        })
        .await?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .filter(|v| !v.is_empty())
            .ok_or(ExternalServiceError::EmptyEmbedding)?;
        Ok(embedding)
    }
}

async fn with_timeout<T>(
    service: &'static str,
    limit: Duration,
    fut: impl Future<Output = Result<T, ExternalServiceError>>,
) -> Result<T, ExternalServiceError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ExternalServiceError::Timeout {
            service,
            secs: limit.as_secs(),
        })?
}

#[async_trait]
impl Embedder for LlmClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ExternalServiceError> {
        self.get_embeddings(text).await
    }
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ExternalServiceError> {
        let build_err = |e: async_openai::error::OpenAIError| {
            ExternalServiceError::Completion(e.to_string())
        };
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(build_err)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(build_err)?
                .into(),
        ];
        self.chat(messages).await
    }
}
