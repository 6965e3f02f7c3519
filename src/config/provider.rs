//! Provider credentials and endpoint overrides.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::models::ProviderKind;

/// API keys and base URLs per provider, shareable across threads.
#[derive(Clone, Default)]
pub struct ProviderConfig {
    api_keys: Arc<RwLock<HashMap<ProviderKind, String>>>,
    base_urls: Arc<RwLock<HashMap<ProviderKind, String>>>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<ProviderKind> = self
            .api_keys
            .read()
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();
        f.debug_struct("ProviderConfig")
            .field("api_keys", &keys)
            .field("base_urls", &self.base_urls)
            .finish()
    }
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables (OPENAI_API_KEY, GEMINI_API_KEY, etc.).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let config = Self::new();

        let key_mappings = [
            ("OPENAI_API_KEY", ProviderKind::OpenAi),
            ("GOOGLE_API_KEY", ProviderKind::Google),
            ("GEMINI_API_KEY", ProviderKind::Google),
        ];
        for (env_var, provider) in key_mappings {
            if let Ok(key) = std::env::var(env_var) {
                config.set_api_key(provider, key);
            }
        }

        let url_mappings = [
            ("OPENAI_BASE_URL", ProviderKind::OpenAi),
            ("GOOGLE_BASE_URL", ProviderKind::Google),
        ];
        for (env_var, provider) in url_mappings {
            if let Ok(url) = std::env::var(env_var) {
                config.set_base_url(provider, url);
            }
        }

        config
    }

    pub fn with_api_key(self, provider: ProviderKind, key: impl Into<String>) -> Self {
        self.set_api_key(provider, key.into());
        self
    }

    pub fn with_base_url(self, provider: ProviderKind, url: impl Into<String>) -> Self {
        self.set_base_url(provider, url.into());
        self
    }

    pub fn set_api_key(&self, provider: ProviderKind, key: String) {
        if let Ok(mut keys) = self.api_keys.write() {
            keys.insert(provider, key);
        }
    }

    pub fn get_api_key(&self, provider: ProviderKind) -> Option<String> {
        self.api_keys.read().ok()?.get(&provider).cloned()
    }

    pub fn set_base_url(&self, provider: ProviderKind, url: String) {
        if let Ok(mut urls) = self.base_urls.write() {
            urls.insert(provider, url);
        }
    }

    pub fn get_base_url(&self, provider: ProviderKind) -> Option<String> {
        self.base_urls.read().ok()?.get(&provider).cloned()
    }

    pub fn has_credentials(&self, provider: ProviderKind) -> bool {
        self.get_api_key(provider).is_some()
    }
}
