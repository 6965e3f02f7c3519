//! Model provider trait, request/response shapes and provider selection.

pub mod http;

#[cfg(feature = "google")]
pub mod google;
#[cfg(feature = "openai")]
pub mod openai;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::StrandError;
use crate::models::{ModelSelector, ProviderKind};
use crate::types::{FinishReason, GenerationSettings, RequestedCall, Turn, Usage};

/// A request sent to a model provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// Name of the agent whose conversation this is.
    pub agent: String,
    pub model: ModelSelector,
    pub instructions: String,
    pub turns: Vec<Turn>,
    pub actions: Vec<ActionDefinition>,
    pub settings: GenerationSettings,
    /// JSON Schema the final answer must satisfy, if declared.
    pub response_schema: Option<serde_json::Value>,
}

/// One callable (function or sub-agent) advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Response from a provider: free text, calls, or both.
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    pub text: String,
    pub calls: Vec<RequestedCall>,
    pub usage: Usage,
    pub finish_reason: Option<FinishReason>,
}

impl ProviderResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: Some(FinishReason::Stop),
            ..Default::default()
        }
    }

    pub fn calls(calls: Vec<RequestedCall>) -> Self {
        Self {
            calls,
            finish_reason: Some(FinishReason::ToolCalls),
            ..Default::default()
        }
    }
}

/// Core trait implemented by all model providers.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name (e.g., "openai", "google").
    fn provider_name(&self) -> &str;

    /// The model ID this provider instance serves.
    fn model_id(&self) -> &str;

    /// Produce one model response.
    async fn generate(&self, request: &ProviderRequest) -> Result<ProviderResponse, StrandError>;
}

/// Resolves the provider serving a given agent's model.
pub trait ProviderFactory: Send + Sync {
    fn provider_for(&self, model: &ModelSelector) -> Result<Arc<dyn ModelProvider>, StrandError>;
}

/// Serves every agent with the same provider regardless of its selector.
#[derive(Clone)]
pub struct SingleProvider(pub Arc<dyn ModelProvider>);

impl ProviderFactory for SingleProvider {
    fn provider_for(&self, _model: &ModelSelector) -> Result<Arc<dyn ModelProvider>, StrandError> {
        Ok(self.0.clone())
    }
}

/// Builds HTTP providers from [`ProviderConfig`], caching one per selector.
pub struct ConfiguredProviders {
    config: ProviderConfig,
    cache: Mutex<HashMap<ModelSelector, Arc<dyn ModelProvider>>>,
}

impl ConfiguredProviders {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

impl ProviderFactory for ConfiguredProviders {
    fn provider_for(&self, model: &ModelSelector) -> Result<Arc<dyn ModelProvider>, StrandError> {
        if let Some(hit) = self.cache.lock().ok().and_then(|c| c.get(model).cloned()) {
            return Ok(hit);
        }
        let provider = create_provider(model, &self.config)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(model.clone(), provider.clone());
        }
        Ok(provider)
    }
}

/// Create a provider for the given model, using the provided config.
#[allow(unused_variables)]
pub fn create_provider(
    model: &ModelSelector,
    config: &ProviderConfig,
) -> Result<Arc<dyn ModelProvider>, StrandError> {
    match model.provider {
        #[cfg(feature = "openai")]
        ProviderKind::OpenAi => {
            let api_key = config
                .get_api_key(ProviderKind::OpenAi)
                .ok_or_else(|| StrandError::Authentication("Missing OPENAI_API_KEY".into()))?;
            Ok(Arc::new(openai::OpenAiProvider::new(
                model.model_id.clone(),
                api_key,
                config.get_base_url(ProviderKind::OpenAi),
            )))
        }
        #[cfg(feature = "google")]
        ProviderKind::Google => {
            let api_key = config
                .get_api_key(ProviderKind::Google)
                .ok_or_else(|| StrandError::Authentication("Missing GOOGLE_API_KEY".into()))?;
            Ok(Arc::new(google::GoogleProvider::new(
                model.model_id.clone(),
                api_key,
                config.get_base_url(ProviderKind::Google),
            )))
        }
        #[allow(unreachable_patterns)]
        other => Err(StrandError::ModelConfiguration(format!(
            "Provider '{other}' is not enabled in this build"
        ))),
    }
}
