//! Capability modules and intent routing
//!
//! Each module exposes trigger patterns checked before any model is asked.
//! The registry keeps modules in registration order and the first pattern
//! match wins, so routing is deterministic for a given module order.

pub mod home_control;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;

use crate::llm::IntentExtractor;
use crate::{Error, Result};

pub use home_control::HomeControlModule;

/// Compiled, case-insensitive trigger patterns of one module
#[derive(Debug, Clone, Default)]
pub struct TriggerPatterns {
    patterns: Vec<Regex>,
}

impl TriggerPatterns {
    /// Compile patterns, matching case-insensitively
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a pattern is not a valid regex
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                Regex::new(&format!("(?i){}", p.as_ref()))
                    .map_err(|e| Error::Config(format!("invalid trigger pattern: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { patterns })
    }

    /// Match `text`, returning named captures of the first matching pattern
    #[must_use]
    pub fn matches(&self, text: &str) -> Option<ModuleArgs> {
        self.patterns.iter().find_map(|pattern| {
            let captures = pattern.captures(text)?;
            let named = pattern
                .capture_names()
                .flatten()
                .filter_map(|name| {
                    captures
                        .name(name)
                        .map(|m| (name.to_string(), m.as_str().trim().to_string()))
                })
                .collect();

            Some(ModuleArgs {
                text: text.to_string(),
                captures: named,
            })
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Arguments extracted while routing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleArgs {
    /// The routed text
    pub text: String,
    /// Named captures from the matching trigger pattern
    pub captures: HashMap<String, String>,
}

impl ModuleArgs {
    /// Args carrying only the raw text
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            captures: HashMap::new(),
        }
    }

    #[must_use]
    pub fn capture(&self, name: &str) -> Option<&str> {
        self.captures.get(name).map(String::as_str)
    }
}

/// How a routing decision was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    /// A trigger pattern matched
    Pattern,
    /// The language model picked the module
    Intent,
    /// Nothing matched; general chat
    Fallback,
}

/// Outcome of routing one piece of text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    /// Chosen module, or `None` for general chat
    pub module_id: Option<String>,
    pub args: ModuleArgs,
    pub source: RouteSource,
}

impl RoutingDecision {
    /// The general chat branch
    #[must_use]
    pub fn general(text: &str) -> Self {
        Self {
            module_id: None,
            args: ModuleArgs::from_text(text),
            source: RouteSource::Fallback,
        }
    }

    #[must_use]
    pub const fn is_general(&self) -> bool {
        self.module_id.is_none()
    }
}

/// How the orchestrator should use a module's text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    /// Speak the text as-is
    Final,
    /// Hand the text to the response generator as grounding
    Context,
}

/// State changed by a module call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SideEffect {
    /// A device's cached status was updated
    DeviceStatus {
        device_id: String,
        status: serde_json::Value,
    },
}

/// Output of a capability module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleResult {
    pub module_id: String,
    pub text: String,
    pub kind: ReplyKind,
    /// False when the module handled the request but the action failed
    pub success: bool,
    pub effects: Vec<SideEffect>,
}

impl ModuleResult {
    /// A successful reply to speak directly
    #[must_use]
    pub fn reply(module_id: &str, text: impl Into<String>) -> Self {
        Self {
            module_id: module_id.to_string(),
            text: text.into(),
            kind: ReplyKind::Final,
            success: true,
            effects: Vec::new(),
        }
    }

    /// Grounding for the response generator
    #[must_use]
    pub fn context(module_id: &str, text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Context,
            ..Self::reply(module_id, text)
        }
    }

    /// A failure message to speak directly
    #[must_use]
    pub fn failure(module_id: &str, text: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::reply(module_id, text)
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: SideEffect) -> Self {
        self.effects.push(effect);
        self
    }
}

/// Id and description offered to the intent extractor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleDescriptor {
    pub id: String,
    pub description: String,
}

/// A pluggable handler for one class of user intents
#[async_trait]
pub trait CapabilityModule: Send + Sync {
    /// Unique module id
    fn id(&self) -> &str;

    /// One-line description used for intent extraction
    fn description(&self) -> &str;

    /// Trigger patterns checked before any model is consulted
    fn patterns(&self) -> &TriggerPatterns;

    /// Match text against this module's patterns
    fn matches(&self, text: &str) -> Option<ModuleArgs> {
        self.patterns().matches(text)
    }

    /// Handle a routed request
    ///
    /// Domain failures should come back as a failed [`ModuleResult`];
    /// an `Err` is treated like any other adapter failure.
    ///
    /// # Errors
    ///
    /// Returns error if the module cannot produce a result at all
    async fn handle(&self, args: &ModuleArgs) -> Result<ModuleResult>;
}

/// Ordered list of capability modules
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn CapabilityModule>>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.ids())
            .finish()
    }
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a module; earlier modules take precedence
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if a module with the same id is registered
    pub fn register(&mut self, module: Arc<dyn CapabilityModule>) -> Result<()> {
        if self.get(module.id()).is_some() {
            return Err(Error::Config(format!(
                "module {} registered twice",
                module.id()
            )));
        }
        tracing::info!(
            module = module.id(),
            patterns = module.patterns().len(),
            "module registered"
        );
        self.modules.push(module);
        Ok(())
    }

    /// Look up a module by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<dyn CapabilityModule>> {
        self.modules.iter().find(|m| m.id() == id)
    }

    /// Module ids in registration order
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.id()).collect()
    }

    #[must_use]
    pub fn descriptors(&self) -> Vec<ModuleDescriptor> {
        self.modules
            .iter()
            .map(|m| ModuleDescriptor {
                id: m.id().to_string(),
                description: m.description().to_string(),
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Route text by trigger patterns alone
    ///
    /// The first module in registration order whose pattern matches wins.
    /// No match is the general chat branch, never an error.
    #[must_use]
    pub fn route(&self, text: &str) -> RoutingDecision {
        for module in &self.modules {
            if let Some(args) = module.matches(text) {
                tracing::debug!(module = module.id(), "trigger pattern matched");
                return RoutingDecision {
                    module_id: Some(module.id().to_string()),
                    args,
                    source: RouteSource::Pattern,
                };
            }
        }
        RoutingDecision::general(text)
    }

    /// Route by patterns, then ask `extractor` when nothing matched
    ///
    /// Extractor failures and unknown answers fall back to general chat.
    pub async fn route_with_fallback(
        &self,
        text: &str,
        extractor: Option<&dyn IntentExtractor>,
    ) -> RoutingDecision {
        let decision = self.route(text);
        let Some(extractor) = extractor else {
            return decision;
        };
        if !decision.is_general() || text.trim().is_empty() || self.is_empty() {
            return decision;
        }

        match extractor.extract(text, &self.descriptors()).await {
            Ok(Some(id)) if self.get(&id).is_some() => {
                tracing::debug!(module = %id, "intent extractor picked module");
                RoutingDecision {
                    module_id: Some(id),
                    args: ModuleArgs::from_text(text),
                    source: RouteSource::Intent,
                }
            }
            Ok(_) => decision,
            Err(e) => {
                tracing::warn!(error = %e, "intent extraction failed, using general chat");
                decision
            }
        }
    }

    /// Invoke the module chosen by `decision`
    ///
    /// Returns `None` for the general chat branch.
    ///
    /// # Errors
    ///
    /// Returns error if the module fails outright
    pub async fn dispatch(&self, decision: &RoutingDecision) -> Result<Option<ModuleResult>> {
        let Some(id) = decision.module_id.as_deref() else {
            return Ok(None);
        };
        let module = self
            .get(id)
            .ok_or_else(|| Error::Config(format!("routed to unknown module {id}")))?;
        module.handle(&decision.args).await.map(Some)
    }
}
