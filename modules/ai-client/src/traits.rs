use anyhow::Result;
use async_trait::async_trait;

// --- Message types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

// --- Completion request ---

/// One completion call. Providers map this onto their own wire format.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub temperature: f32,
    /// Ask the provider to constrain output to a single JSON object.
    pub json_output: bool,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: 0.0,
            json_output: false,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_output = true;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

// --- CompletionClient trait ---

/// Black-box completion collaborator. No latency bound is guaranteed;
/// callers impose their own timeout and treat expiry as a stage failure.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}
