//! Builds a [`ChatModel`] for a provider selection.

use crate::anthropic::{self, AnthropicModel};
use crate::gemini::{self, GeminiModel};
use crate::http::HttpBackend;
use crate::openai::{DEEPSEEK_BASE_URL, OPENAI_BASE_URL, OpenAiModel};
use mcpchat_types::{ApiError, ChatModel, ConfigError, LlmProvider, ModelFactory, ModelSpec};
use std::collections::HashMap;
use std::sync::Arc;

/// Production [`ModelFactory`]: one shared HTTP client, per-provider
/// credentials read at startup.
#[derive(Clone)]
pub struct BackendFactory {
    http: HttpBackend,
    keys: HashMap<LlmProvider, String>,
}

impl BackendFactory {
    pub fn new() -> Result<Self, ApiError> {
        Ok(Self {
            http: HttpBackend::new()?,
            keys: HashMap::new(),
        })
    }

    /// Configure the startup credential for a provider. Blank keys are ignored.
    pub fn with_key(mut self, provider: LlmProvider, key: impl Into<String>) -> Self {
        let key = key.into();
        if !key.trim().is_empty() {
            self.keys.insert(provider, key);
        }
        self
    }
}

/// Validate a caller-supplied endpoint.
fn validate_base_url(raw: &str) -> Result<String, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: "base_url".into(),
        message,
    };
    let url = reqwest::Url::parse(raw).map_err(|e| invalid(format!("'{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(raw.trim_end_matches('/').to_string()),
        other => Err(invalid(format!("unsupported scheme '{other}'"))),
    }
}

impl ModelFactory for BackendFactory {
    fn build(&self, spec: &ModelSpec) -> Result<Arc<dyn ChatModel>, ConfigError> {
        if spec.credential.trim().is_empty() {
            return Err(ConfigError::MissingKey {
                key: format!("credential for provider '{}'", spec.provider),
            });
        }

        let custom_base = match spec.base_url.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                if !spec.provider.is_openai_compatible() {
                    tracing::debug!("Ignoring base_url for provider '{}'", spec.provider);
                    None
                } else {
                    Some(validate_base_url(raw)?)
                }
            }
            _ => None,
        };

        let http = self.http.clone();
        let key = spec.credential.clone();
        let model: Arc<dyn ChatModel> = match spec.provider {
            LlmProvider::Openai => Arc::new(OpenAiModel::new(
                http,
                "openai",
                key,
                custom_base.unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            )),
            LlmProvider::Deepseek => Arc::new(OpenAiModel::new(
                http,
                "deepseek",
                key,
                custom_base.unwrap_or_else(|| DEEPSEEK_BASE_URL.to_string()),
            )),
            LlmProvider::Anthropic => {
                Arc::new(AnthropicModel::new(http, key, anthropic::DEFAULT_BASE_URL))
            }
            LlmProvider::Gemini => Arc::new(GeminiModel::new(http, key, gemini::DEFAULT_BASE_URL)),
        };
        tracing::debug!("Built {} model '{}'", model.name(), spec.model);
        Ok(model)
    }

    fn default_credential(&self, provider: LlmProvider) -> Option<String> {
        self.keys.get(&provider).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(provider: LlmProvider, credential: &str, base_url: Option<&str>) -> ModelSpec {
        ModelSpec {
            provider,
            model: "m".into(),
            credential: credential.into(),
            base_url: base_url.map(str::to_string),
        }
    }

    #[test]
    fn builds_every_provider() {
        let factory = BackendFactory::new().unwrap();
        for (provider, name) in [
            (LlmProvider::Openai, "openai"),
            (LlmProvider::Deepseek, "deepseek"),
            (LlmProvider::Anthropic, "anthropic"),
            (LlmProvider::Gemini, "gemini"),
        ] {
            let model = factory.build(&spec(provider, "sk-test", None)).unwrap();
            assert_eq!(model.name(), name);
        }
    }

    #[test]
    fn empty_credential_is_missing_key() {
        let factory = BackendFactory::new().unwrap();
        let err = factory
            .build(&spec(LlmProvider::Openai, "  ", None))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::MissingKey { .. }));
    }

    #[test]
    fn invalid_base_url_is_rejected_for_openai_compatible() {
        let factory = BackendFactory::new().unwrap();
        for bad in ["not a url", "ftp://example.com"] {
            let err = factory
                .build(&spec(LlmProvider::Deepseek, "k", Some(bad)))
                .err()
                .unwrap();
            assert!(matches!(err, ConfigError::InvalidValue { .. }), "{bad}");
        }
        assert!(
            factory
                .build(&spec(LlmProvider::Openai, "k", Some("http://localhost:11434/v1/")))
                .is_ok()
        );
    }

    #[test]
    fn base_url_ignored_for_other_providers() {
        let factory = BackendFactory::new().unwrap();
        assert!(
            factory
                .build(&spec(LlmProvider::Anthropic, "k", Some("not a url")))
                .is_ok()
        );
    }

    #[test]
    fn default_credentials_skip_blank_keys() {
        let factory = BackendFactory::new()
            .unwrap()
            .with_key(LlmProvider::Gemini, "g-key")
            .with_key(LlmProvider::Openai, "");
        assert_eq!(
            factory.default_credential(LlmProvider::Gemini).as_deref(),
            Some("g-key")
        );
        assert!(factory.default_credential(LlmProvider::Openai).is_none());
    }
}
