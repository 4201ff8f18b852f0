//! Shared primitives for provider-agnostic LLM capability clients.
//!
//! The core interacts with language models exclusively through the
//! [`ModelClient`] trait and the lightweight data types defined in this
//! module. The trait abstracts over concrete vendor implementations while the
//! supporting structs describe a single invocation, its response, and token
//! accounting. Conversation bookkeeping lives elsewhere (see
//! [`ConversationMemory`](crate::ConversationMemory)); a `ModelClient` is a
//! stateless pipe to one provider model.
//!
//! # Basic request/response
//!
//! ```rust,no_run
//! use agentmesh::model_client::{ModelClient, ModelRequest};
//! use std::time::Duration;
//!
//! # async fn example(client: std::sync::Arc<dyn ModelClient>) {
//! let request = ModelRequest::new("gpt-4o", "You are a support specialist.", "Who are you?")
//!     .with_temperature(0.4)
//!     .with_max_tokens(1024)
//!     .with_timeout(Duration::from_secs(30));
//!
//! let response = client.invoke(&request).await.unwrap();
//! println!("{} ({} tokens out)", response.text, response.tokens_out);
//! # }
//! ```
//!
//! All implementations **must** be thread-safe (`Send + Sync`) so they can be
//! shared between async tasks. Implementations map provider failures onto the
//! stable [`ErrorKind`](crate::ErrorKind) tags: `rate_limited` for
//! backpressure, `timeout` for deadline overruns, `provider_error` for
//! everything non-retriable.

use crate::agentmesh::error::MeshError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Represents the possible roles for a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message (frequently a mirror of a human end-user request).
    User,
    /// An assistant authored message (model responses or agent outputs).
    Assistant,
}

impl Role {
    /// Display label used in context projection, e.g. `"User"` / `"Assistant"`.
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// How many tokens were spent on prompt vs. completion?
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of prompt/input tokens billed by the provider.
    pub input_tokens: usize,
    /// Number of generated/output tokens billed by the provider.
    pub output_tokens: usize,
    /// Convenience total equal to `input_tokens + output_tokens`.
    pub total_tokens: usize,
}

impl TokenUsage {
    /// Build a usage record from the two billed directions.
    pub fn new(input_tokens: usize, output_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// A single invocation request forwarded to a provider model.
///
/// Carries everything the provider needs; the pool fills `model_id`,
/// `temperature`, and `max_tokens` from the selected capability before the
/// call.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Provider model identifier (e.g. `"gpt-4o-mini"`).
    pub model_id: String,
    /// System priming for this call.
    pub system_prompt: String,
    /// The user-visible prompt, already assembled with context and knowledge.
    pub user_prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Output-token ceiling for this call.
    pub max_tokens: usize,
    /// Deadline for this call. The pool also enforces it externally, so
    /// implementations that cannot plumb a timeout through may ignore it.
    pub timeout: Duration,
}

impl ModelRequest {
    /// Create a request with default sampling (temperature 0.7, 4096 output
    /// tokens, 30 s deadline).
    pub fn new(
        model_id: impl Into<String>,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
            temperature: 0.7,
            max_tokens: 4096,
            timeout: Duration::from_secs(30),
        }
    }

    /// Override the sampling temperature (builder pattern).
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Override the output-token ceiling (builder pattern).
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Override the call deadline (builder pattern).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// The provider's answer to a [`ModelRequest`].
#[derive(Debug, Clone)]
pub struct ModelResponse {
    /// Generated text.
    pub text: String,
    /// Prompt tokens billed, or `0` when the provider does not report usage.
    pub tokens_in: usize,
    /// Completion tokens billed, or `0` when the provider does not report usage.
    pub tokens_out: usize,
    /// Provider-specific completion status (e.g. `"stop"`, `"length"`).
    pub finish_reason: String,
}

impl ModelResponse {
    /// Token accounting for this response.
    pub fn usage(&self) -> TokenUsage {
        TokenUsage::new(self.tokens_in, self.tokens_out)
    }
}

/// Trait-driven abstraction for a concrete LLM provider model.
///
/// A [`ModelClient`] instance translates a [`ModelRequest`] into the provider
/// specific wire format and returns the response in a uniform shape. The
/// abstraction deliberately excludes conversation bookkeeping and selection
/// logic — those belong to [`ConversationMemory`](crate::ConversationMemory)
/// and [`LlmPool`](crate::LlmPool).
///
/// Invocations must be cancellable: callers race `invoke` against a
/// cancellation signal with `tokio::select!`, so implementations should not
/// spawn detached work that outlives the returned future.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Send one request/response style completion.
    ///
    /// Failures map to stable error kinds: `rate_limited` (retriable
    /// backpressure), `timeout` (deadline exceeded), `provider_error`
    /// (anything non-retriable).
    async fn invoke(&self, request: &ModelRequest) -> Result<ModelResponse, MeshError>;

    /// Return the identifier used to select the upstream model (e.g. `"gpt-4.1"`).
    fn model_name(&self) -> &str;
}
