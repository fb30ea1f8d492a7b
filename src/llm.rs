//! Language model adapters
//!
//! [`ResponseGenerator`] turns conversation history plus an optional module
//! result into reply text. [`IntentExtractor`] is the slower routing fallback
//! asked only when no trigger pattern matched.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::conversation::ConversationContext;
use crate::modules::{ModuleDescriptor, ModuleResult};
use crate::{Error, Result};

/// Generates reply text from the conversation so far
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Generate a reply to `prompt`
    ///
    /// `module` carries grounding produced by a capability module, if one ran.
    ///
    /// # Errors
    ///
    /// Returns `Error::Inference` if the engine fails
    async fn generate(
        &self,
        context: &ConversationContext,
        prompt: &str,
        module: Option<&ModuleResult>,
    ) -> Result<String>;
}

/// Picks a module for text no trigger pattern matched
#[async_trait]
pub trait IntentExtractor: Send + Sync {
    /// Return the id of the module that should handle `text`, or `None` for general chat
    ///
    /// # Errors
    ///
    /// Returns `Error::Inference` if the engine fails
    async fn extract(&self, text: &str, modules: &[ModuleDescriptor]) -> Result<Option<String>>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

impl ChatMessage {
    fn new(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
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

/// Client for an OpenAI-compatible `/v1/chat/completions` endpoint
///
/// Ollama, llama.cpp's server and `OpenAI` all speak this protocol.
pub struct ChatCompletionGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
    temperature: f32,
    system_prompt: String,
}

impl ChatCompletionGenerator {
    /// Create a generator for the configured endpoint
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is empty or the HTTP client cannot be built
    pub fn new(config: &LlmConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(Error::Config("llm.base_url is required".to_string()));
        }

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/v1/chat/completions",
                config.base_url.trim_end_matches('/')
            ),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            system_prompt: config.system_prompt.clone(),
        })
    }

    async fn complete(&self, messages: Vec<ChatMessage>, max_tokens: u32) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens,
            temperature: self.temperature,
            stream: false,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Inference(format!("LLM request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!("LLM API error {status}: {body}")));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("invalid LLM response: {e}")))?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if content.is_empty() {
            return Err(Error::Inference("empty completion".to_string()));
        }
        Ok(content)
    }
}

/// Build the chat transcript for a reply
fn build_messages(
    system_prompt: &str,
    context: &ConversationContext,
    prompt: &str,
    module: Option<&ModuleResult>,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(context.len() * 2 + 3);
    messages.push(ChatMessage::new("system", system_prompt));

    for turn in context.turns() {
        messages.push(ChatMessage::new("user", turn.text.as_str()));
        messages.push(ChatMessage::new("assistant", turn.response.as_str()));
    }

    if let Some(result) = module {
        messages.push(ChatMessage::new(
            "system",
            format!(
                "Result from the {} module. Use it to answer:\n{}",
                result.module_id, result.text
            ),
        ));
    }

    messages.push(ChatMessage::new("user", prompt));
    messages
}

#[async_trait]
impl ResponseGenerator for ChatCompletionGenerator {
    async fn generate(
        &self,
        context: &ConversationContext,
        prompt: &str,
        module: Option<&ModuleResult>,
    ) -> Result<String> {
        let messages = build_messages(&self.system_prompt, context, prompt, module);
        tracing::debug!(
            messages = messages.len(),
            model = %self.model,
            "requesting completion"
        );
        self.complete(messages, self.max_tokens).await
    }
}

#[async_trait]
impl IntentExtractor for ChatCompletionGenerator {
    async fn extract(&self, text: &str, modules: &[ModuleDescriptor]) -> Result<Option<String>> {
        if modules.is_empty() {
            return Ok(None);
        }

        let mut catalogue = String::new();
        for module in modules {
            catalogue.push_str(&format!("- {}: {}\n", module.id, module.description));
        }

        let messages = vec![
            ChatMessage::new(
                "system",
                format!(
                    "You route voice commands. Modules:\n{catalogue}\
                     Answer with exactly one module id, or none if no module applies."
                ),
            ),
            ChatMessage::new("user", text),
        ];

        let answer = self.complete(messages, 16).await?;
        let choice = parse_module_choice(&answer, modules);
        tracing::debug!(answer = %answer, choice = ?choice, "intent extracted");
        Ok(choice)
    }
}

/// Map a free-form model answer onto a known module id
fn parse_module_choice(answer: &str, modules: &[ModuleDescriptor]) -> Option<String> {
    let normalized: String = answer
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
        .to_lowercase();

    modules
        .iter()
        .find(|m| m.id.eq_ignore_ascii_case(&normalized))
        .map(|m| m.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationTurn;

    fn descriptors() -> Vec<ModuleDescriptor> {
        vec![ModuleDescriptor {
            id: "home_control".to_string(),
            description: "Control lights and switches".to_string(),
        }]
    }

    #[test]
    fn test_parse_module_choice() {
        let modules = descriptors();
        assert_eq!(
            parse_module_choice(" home_control.\n", &modules),
            Some("home_control".to_string())
        );
        assert_eq!(parse_module_choice("none", &modules), None);
        assert_eq!(parse_module_choice("weather", &modules), None);
    }

    #[test]
    fn test_messages_include_history_and_grounding() {
        let mut context = ConversationContext::new(4);
        context.push(ConversationTurn::now("hi", None, "hello"));
        let result = ModuleResult::context("home_control", "bedroom light is on");

        let messages = build_messages("be brief", &context, "is it on?", Some(&result));
        let roles: Vec<&str> = messages.iter().map(|m| m.role).collect();

        assert_eq!(roles, vec!["system", "user", "assistant", "system", "user"]);
        assert!(messages[3].content.contains("bedroom light is on"));
        assert_eq!(messages[4].content, "is it on?");
    }
}
