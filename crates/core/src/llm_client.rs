use crate::error::CompletionError;
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, ResponseFormat,
        ResponseFormatJsonSchema,
    },
};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// A JSON schema that a structured completion must satisfy.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    /// Name of the schema, e.g. `FlashcardOutput`.
    pub name: String,
    /// The JSON schema document.
    pub schema: serde_json::Value,
}

impl OutputSchema {
    /// Derives the schema of `T` from its `JsonSchema` implementation.
    pub fn of<T: JsonSchema>() -> Self {
        let schema = schemars::schema_for!(T);
        Self {
            name: T::schema_name().into_owned(),
            schema: serde_json::to_value(&schema).unwrap_or_default(),
        }
    }
}

/// A client that sends a prompt to a language model and returns its reply.
///
/// Implementations do not retry; retry policy belongs to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Returns the model's reply as unstructured text.
    async fn complete_free_text(&self, prompt: &str) -> Result<String, CompletionError>;

    /// Returns the model's reply parsed as JSON, constrained by `schema`.
    ///
    /// The returned value is only guaranteed to be JSON; use
    /// [`complete_structured`] to validate it into a typed value.
    async fn complete_json(
        &self,
        prompt: &str,
        schema: &OutputSchema,
    ) -> Result<serde_json::Value, CompletionError>;
}

/// Runs a structured completion and validates the reply into `T`.
///
/// A reply that does not deserialize into `T` yields
/// [`CompletionError::Validation`].
pub async fn complete_structured<T>(
    client: &dyn CompletionClient,
    prompt: &str,
) -> Result<T, CompletionError>
where
    T: DeserializeOwned + JsonSchema,
{
    complete_structured_with_raw(client, prompt)
        .await
        .map(|(parsed, _)| parsed)
}

/// Like [`complete_structured`], but also returns the reply as received.
pub async fn complete_structured_with_raw<T>(
    client: &dyn CompletionClient,
    prompt: &str,
) -> Result<(T, serde_json::Value), CompletionError>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = OutputSchema::of::<T>();
    let raw = client.complete_json(prompt, &schema).await?;
    let parsed = serde_json::from_value(raw.clone())
        .map_err(|e| CompletionError::validation(&schema.name, e.to_string()))?;
    Ok((parsed, raw))
}

/// Extracts the JSON document from a reply that may be wrapped in a
/// markdown code fence.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(after_ticks) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string (e.g. `json`) on the opening fence line.
    let body = after_ticks
        .split_once('\n')
        .map(|(_, body)| body)
        .unwrap_or("");
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// An implementation of `CompletionClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
    system_prompt: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The specific model identifier to use for chat completions (e.g., "gpt-4o").
    /// * `timeout` - Upper bound on a single request, including model latency.
    pub fn new(config: OpenAIConfig, model: String, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client: Client::with_config(config).with_http_client(http_client),
            model,
            system_prompt: "You are an expert language teacher who writes precise, level-appropriate exercises.".to_string(),
        }
    }

    /// Replaces the system message sent ahead of every prompt.
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    fn messages(&self, prompt: &str) -> Result<Vec<ChatCompletionRequestMessage>, CompletionError> {
        Ok(vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.system_prompt.as_str())
                .build()
                .map_err(transport)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(transport)?
                .into(),
        ])
    }

    async fn send(
        &self,
        prompt: &str,
        response_format: Option<ResponseFormat>,
    ) -> Result<Option<String>, CompletionError> {
        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(&self.model).messages(self.messages(prompt)?);
        if let Some(format) = response_format {
            request.response_format(format);
        }
        let request = request.build().map_err(transport)?;

        let response = self.client.chat().create(request).await.map_err(transport)?;
        debug!(model = %self.model, usage = ?response.usage, "Completion received");

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content))
    }
}

fn transport(err: async_openai::error::OpenAIError) -> CompletionError {
    CompletionError::Transport(err.to_string())
}

#[async_trait]
impl CompletionClient for OpenAICompatibleClient {
    async fn complete_free_text(&self, prompt: &str) -> Result<String, CompletionError> {
        self.send(prompt, None)
            .await?
            .ok_or_else(|| CompletionError::validation("text", "no content in LLM response"))
    }

    async fn complete_json(
        &self,
        prompt: &str,
        schema: &OutputSchema,
    ) -> Result<serde_json::Value, CompletionError> {
        let format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: None,
                name: schema_identifier(&schema.name),
                schema: Some(schema.schema.clone()),
                strict: None,
            },
        };
        let content = self
            .send(prompt, Some(format))
            .await?
            .ok_or_else(|| CompletionError::validation(&schema.name, "no content in LLM response"))?;

        serde_json::from_str(strip_code_fence(&content))
            .map_err(|e| CompletionError::validation(&schema.name, format!("invalid JSON: {e}")))
    }
}

/// OpenAI only accepts `[A-Za-z0-9_-]` in response format names.
fn schema_identifier(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
