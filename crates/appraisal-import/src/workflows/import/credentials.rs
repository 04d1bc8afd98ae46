use serde::{Deserialize, Serialize};

/// AI providers the extraction service can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiProvider {
    OpenAi,
    Anthropic,
    Gemini,
}

impl AiProvider {
    pub const fn ordered() -> [Self; 3] {
        [Self::OpenAi, Self::Anthropic, Self::Gemini]
    }

    pub const fn code(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }

    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => "gpt-4o-mini",
            Self::Anthropic => "claude-3-5-haiku-latest",
            Self::Gemini => "gemini-1.5-flash",
        }
    }

    pub fn from_code(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ordered()
            .into_iter()
            .find(|provider| provider.code().eq_ignore_ascii_case(value))
    }
}

/// Provider, key and model handed through to the extraction gateway unchanged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub provider: AiProvider,
    pub api_key: String,
    pub model: String,
}

impl ProviderCredentials {
    pub fn uses_shared_key(&self) -> bool {
        self.api_key.is_empty()
    }
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("provider", &self.provider)
            .field("shared_key", &self.uses_shared_key())
            .field("model", &self.model)
            .finish()
    }
}

/// Decides which provider and key an extraction uses.
pub trait CredentialPolicy: Send + Sync {
    fn resolve_provider_and_key(&self) -> ProviderCredentials;
}

/// Per-provider user settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProviderSetting {
    pub api_key: Option<String>,
    pub model: Option<String>,
}

/// Picks the first provider in priority order.
///
/// Personal keys are only used when the user opted in and the provider has one;
/// otherwise an empty key is passed so the server falls back to shared credentials.
#[derive(Debug, Clone)]
pub struct PriorityCredentialPolicy {
    priority: Vec<AiProvider>,
    use_personal_keys: bool,
    settings: Vec<(AiProvider, ProviderSetting)>,
}

impl PriorityCredentialPolicy {
    pub fn new(priority: Vec<AiProvider>, use_personal_keys: bool) -> Self {
        let priority = if priority.is_empty() {
            AiProvider::ordered().to_vec()
        } else {
            priority
        };
        Self {
            priority,
            use_personal_keys,
            settings: Vec::new(),
        }
    }

    pub fn with_setting(mut self, provider: AiProvider, setting: ProviderSetting) -> Self {
        self.settings.retain(|(existing, _)| *existing != provider);
        self.settings.push((provider, setting));
        self
    }

    fn setting(&self, provider: AiProvider) -> Option<&ProviderSetting> {
        self.settings
            .iter()
            .find(|(candidate, _)| *candidate == provider)
            .map(|(_, setting)| setting)
    }

    fn personal_key(&self, provider: AiProvider) -> Option<&str> {
        self.setting(provider)
            .and_then(|setting| setting.api_key.as_deref())
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    fn model_for(&self, provider: AiProvider) -> String {
        self.setting(provider)
            .and_then(|setting| setting.model.clone())
            .unwrap_or_else(|| provider.default_model().to_string())
    }
}

impl CredentialPolicy for PriorityCredentialPolicy {
    fn resolve_provider_and_key(&self) -> ProviderCredentials {
        if self.use_personal_keys {
            let keyed = self
                .priority
                .iter()
                .copied()
                .find_map(|provider| self.personal_key(provider).map(|key| (provider, key)));
            if let Some((provider, key)) = keyed {
                return ProviderCredentials {
                    provider,
                    api_key: key.to_string(),
                    model: self.model_for(provider),
                };
            }
        }

        let provider = self.priority[0];
        ProviderCredentials {
            provider,
            api_key: String::new(),
            model: self.model_for(provider),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed(key: &str) -> ProviderSetting {
        ProviderSetting {
            api_key: Some(key.to_string()),
            model: None,
        }
    }

    #[test]
    fn passes_empty_key_when_personal_keys_disabled() {
        let policy = PriorityCredentialPolicy::new(vec![AiProvider::Anthropic], false)
            .with_setting(AiProvider::Anthropic, keyed("sk-user"));

        let resolved = policy.resolve_provider_and_key();
        assert_eq!(resolved.provider, AiProvider::Anthropic);
        assert!(resolved.uses_shared_key());
        assert_eq!(resolved.model, "claude-3-5-haiku-latest");
    }

    #[test]
    fn first_provider_with_personal_key_wins() {
        let policy = PriorityCredentialPolicy::new(
            vec![AiProvider::OpenAi, AiProvider::Anthropic, AiProvider::Gemini],
            true,
        )
        .with_setting(AiProvider::OpenAi, keyed("  "))
        .with_setting(
            AiProvider::Gemini,
            ProviderSetting {
                api_key: Some("g-key".to_string()),
                model: Some("gemini-1.5-pro".to_string()),
            },
        );

        let resolved = policy.resolve_provider_and_key();
        assert_eq!(resolved.provider, AiProvider::Gemini);
        assert_eq!(resolved.api_key, "g-key");
        assert_eq!(resolved.model, "gemini-1.5-pro");
    }

    #[test]
    fn opted_in_without_keys_falls_back_to_shared() {
        let policy = PriorityCredentialPolicy::new(Vec::new(), true);
        let resolved = policy.resolve_provider_and_key();
        assert_eq!(resolved.provider, AiProvider::OpenAi);
        assert!(resolved.uses_shared_key());
    }

    #[test]
    fn debug_output_hides_the_key() {
        let credentials = ProviderCredentials {
            provider: AiProvider::OpenAi,
            api_key: "sk-secret".to_string(),
            model: "gpt-4o-mini".to_string(),
        };
        assert!(!format!("{credentials:?}").contains("sk-secret"));
    }
}
