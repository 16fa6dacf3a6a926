//! Upstream text-generation providers.
//!
//! All supported backends speak an OpenAI-compatible chat-completions
//! protocol and differ only in endpoint, credential variable, and default
//! model, so they share one parametrized [`ProviderClient`] instead of one
//! client type per vendor. Handlers depend on the [`Generator`] trait so
//! tests can substitute a stub for the network.

use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 2000;

/// Capability contract for a text-generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Transform `text` according to `prompt`, returning the generated text.
    async fn generate(&self, text: &str, prompt: &str) -> Result<String>;
}

/// The supported upstream backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    ModelScope,
    OpenAi,
    Kimi,
    Zhipu,
    Tongyi,
}

impl ProviderKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "modelscope" => Some(Self::ModelScope),
            "openai" => Some(Self::OpenAi),
            "kimi" => Some(Self::Kimi),
            "zhipu" => Some(Self::Zhipu),
            "tongyi" => Some(Self::Tongyi),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ModelScope => "modelscope",
            Self::OpenAi => "openai",
            Self::Kimi => "kimi",
            Self::Zhipu => "zhipu",
            Self::Tongyi => "tongyi",
        }
    }

    fn key_var(&self) -> &'static str {
        match self {
            Self::ModelScope => "MODELSCOPE_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Kimi => "KIMI_API_KEY",
            Self::Zhipu => "ZHIPU_API_KEY",
            Self::Tongyi => "TONGYI_API_KEY",
        }
    }

    fn model_var(&self) -> &'static str {
        match self {
            Self::ModelScope => "MODELSCOPE_MODEL",
            Self::OpenAi => "OPENAI_MODEL",
            Self::Kimi => "KIMI_MODEL",
            Self::Zhipu => "ZHIPU_MODEL",
            Self::Tongyi => "TONGYI_MODEL",
        }
    }

    fn endpoint_var(&self) -> &'static str {
        match self {
            Self::ModelScope => "MODELSCOPE_ENDPOINT",
            Self::OpenAi => "OPENAI_ENDPOINT",
            Self::Kimi => "KIMI_ENDPOINT",
            Self::Zhipu => "ZHIPU_ENDPOINT",
            Self::Tongyi => "TONGYI_ENDPOINT",
        }
    }

    fn default_endpoint(&self) -> &'static str {
        match self {
            Self::ModelScope => "https://api-inference.modelscope.cn/v1/chat/completions",
            Self::OpenAi => "https://api.openai.com/v1/chat/completions",
            Self::Kimi => "https://api.moonshot.cn/v1/chat/completions",
            Self::Zhipu => "https://api.bigmodel.cn/api/paas/v4/chat/completions",
            Self::Tongyi => "https://dashscope.aliyuncs.com/compatible-mode/v1/chat/completions",
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            Self::ModelScope => "Qwen/Qwen2.5-7B-Instruct",
            Self::OpenAi => "gpt-3.5-turbo",
            Self::Kimi => "moonshot-v1-8k",
            Self::Zhipu => "glm-4",
            Self::Tongyi => "qwen-turbo",
        }
    }
}

/// Fully resolved configuration for the active provider.
#[derive(Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl ProviderConfig {
    /// Resolve the active provider from the environment. An unrecognized
    /// provider name or a missing API key is fatal — the process must not
    /// begin serving.
    pub fn resolve(config: &Config) -> Result<Self> {
        Self::resolve_with(&config.provider, |var| std::env::var(var).ok())
    }

    /// The registry lookup, with the environment abstracted out for tests.
    pub fn resolve_with<F>(name: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind = ProviderKind::parse(name)
            .ok_or_else(|| Error::Configuration(format!("不支持的模型提供商: {}", name)))?;

        let api_key = lookup(kind.key_var())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "缺少 {} 提供商的 API Key。请在 .env 文件中配置 {}",
                    kind.name(),
                    kind.key_var()
                ))
            })?;

        Ok(ProviderConfig {
            kind,
            api_key,
            model: lookup(kind.model_var()).unwrap_or_else(|| kind.default_model().to_string()),
            endpoint: lookup(kind.endpoint_var())
                .unwrap_or_else(|| kind.default_endpoint().to_string()),
        })
    }
}

/// Frame the instruction and source text as a single user prompt.
///
/// The trailing label cues the model to emit only the transformed text.
pub fn compose_prompt(text: &str, prompt: &str) -> String {
    format!(
        "{}\n\n==========\n待优化文本：\n{}\n==========\n\n优化后的文本：",
        prompt, text
    )
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

/// One parametrized client for every supported backend.
pub struct ProviderClient {
    http: reqwest::Client,
    config: ProviderConfig,
}

impl ProviderClient {
    pub fn new(config: ProviderConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }
}

#[async_trait]
impl Generator for ProviderClient {
    async fn generate(&self, text: &str, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: compose_prompt(text, prompt),
            }],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        tracing::debug!(
            provider = self.config.kind.name(),
            model = %self.config.model,
            "calling upstream provider"
        );

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Upstream {
                status: None,
                body: None,
                message: if e.is_timeout() {
                    format!("provider request timed out: {}", e)
                } else {
                    format!("provider request failed: {}", e)
                },
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| Error::Upstream {
            status: Some(status.as_u16()),
            body: None,
            message: format!("failed to read provider response: {}", e),
        })?;

        if !status.is_success() {
            return Err(Error::Upstream {
                status: Some(status.as_u16()),
                body: Some(body),
                message: format!("provider returned HTTP {}", status.as_u16()),
            });
        }

        extract_content(&body)
    }
}

/// Pull the first completion's message content out of a chat response body.
fn extract_content(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| Error::Upstream {
        status: None,
        body: Some(body.to_string()),
        message: format!("malformed provider response: {}", e),
    })?;

    let choice = parsed.choices.into_iter().next().ok_or_else(|| Error::Upstream {
        status: None,
        body: Some(body.to_string()),
        message: "provider response contained no choices".to_string(),
    })?;

    Ok(choice.message.content.trim().to_string())
}
