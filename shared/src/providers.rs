//! Central registry of selectable LLM providers and their model lineups.

use serde::Serialize;

use crate::config::Settings;

#[derive(Debug, Clone, Copy, Serialize)]
/// A selectable model offered by a provider.
pub struct ModelOption {
    pub id: &'static str,
    pub name: &'static str,
}

#[derive(Debug, Clone, Copy, Serialize)]
/// Configuration describing a selectable assessment provider.
pub struct ProviderOption {
    pub id: &'static str,
    pub name: &'static str,
    pub models: &'static [ModelOption],
}

/// Placeholder value treated the same as a missing key.
const PLACEHOLDER_KEY: &str = "YOUR_API_KEY_HERE";

/// All supported providers including their model metadata.
pub const PROVIDER_OPTIONS: &[ProviderOption] = &[
    ProviderOption {
        id: "openai",
        name: "OpenAI",
        models: &[
            ModelOption { id: "gpt-5.2", name: "GPT-5.2 (New)" },
            ModelOption { id: "gpt-5", name: "GPT-5" },
            ModelOption { id: "gpt-4o", name: "GPT-4o (Stable)" },
            ModelOption { id: "gpt-4o-mini", name: "GPT-4o Mini" },
        ],
    },
    ProviderOption {
        id: "anthropic",
        name: "Anthropic",
        models: &[
            ModelOption { id: "claude-opus-4-5", name: "Claude 4.5 Opus" },
            ModelOption { id: "claude-sonnet-4-5", name: "Claude 4.5 Sonnet" },
            ModelOption { id: "claude-haiku-4-5", name: "Claude 4.5 Haiku" },
        ],
    },
    ProviderOption {
        id: "google",
        name: "Google",
        models: &[
            ModelOption { id: "gemini-3-pro", name: "Gemini 3 Pro" },
            ModelOption { id: "gemini-3-flash-preview", name: "Gemini 3 Flash (Preview)" },
            ModelOption { id: "gemini-3-flash", name: "Gemini 3 Flash" },
            ModelOption { id: "gemini-2.5-pro", name: "Gemini 2.5 Pro" },
        ],
    },
    ProviderOption {
        id: "xai",
        name: "Grok (xAI)",
        models: &[
            ModelOption { id: "grok-4.1", name: "Grok 4.1" },
            ModelOption { id: "grok-4-vision", name: "Grok 4 Vision" },
        ],
    },
];

/// Returns the [`ProviderOption`] for the given id, if supported.
pub fn provider_for(id: &str) -> Option<&'static ProviderOption> {
    PROVIDER_OPTIONS.iter().find(|p| p.id == id)
}

/// Returns true when the model id belongs to the provider's lineup.
pub fn is_valid_model(provider_id: &str, model_id: &str) -> bool {
    provider_for(provider_id)
        .map(|p| p.models.iter().any(|m| m.id == model_id))
        .unwrap_or(false)
}

/// Returns the configured API key for the provider, if one is set.
pub fn api_key_for<'a>(settings: &'a Settings, provider_id: &str) -> Option<&'a str> {
    let key = match provider_id {
        "openai" => settings.openai_api_key.as_str(),
        "anthropic" => settings.anthropic_api_key.as_str(),
        "google" => settings.google_api_key.as_str(),
        "xai" => settings.xai_api_key.as_str(),
        _ => return None,
    };
    if key.is_empty() || key == PLACEHOLDER_KEY {
        None
    } else {
        Some(key)
    }
}

/// Providers whose API key is configured in the current settings.
pub fn available(settings: &Settings) -> Vec<&'static ProviderOption> {
    PROVIDER_OPTIONS
        .iter()
        .filter(|p| api_key_for(settings, p.id).is_some())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_unconfigured_providers() {
        let mut settings = Settings::default();
        assert!(available(&settings).is_empty());

        settings.openai_api_key = "sk-test".into();
        settings.google_api_key = PLACEHOLDER_KEY.into();
        let ids: Vec<&str> = available(&settings).iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["openai"]);
    }

    #[test]
    fn model_membership() {
        assert!(is_valid_model("anthropic", "claude-opus-4-5"));
        assert!(!is_valid_model("anthropic", "gpt-4o"));
        assert!(!is_valid_model("nope", "gpt-4o"));
    }
}
