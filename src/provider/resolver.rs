// src/provider/resolver.rs — Provider discovery from the environment and model selection

use std::sync::Arc;

use super::anthropic::AnthropicProvider;
use super::openai::OpenAIProvider;
use super::retry::{RetryPolicy, RetryProvider};
use super::{CompletionProvider, ModelRef};
use crate::infra::errors::RlmError;

/// Discover providers whose API keys are present in the environment.
pub fn discover_providers() -> Vec<Arc<dyn CompletionProvider>> {
    discover_with(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
}

fn discover_with(env: impl Fn(&str) -> Option<String>) -> Vec<Arc<dyn CompletionProvider>> {
    let mut providers: Vec<Arc<dyn CompletionProvider>> = Vec::new();

    if let Some(key) = env("ANTHROPIC_API_KEY") {
        providers.push(Arc::new(AnthropicProvider::new(key)));
    }
    if let Some(key) = env("OPENAI_API_KEY") {
        let provider = match env("OPENAI_BASE_URL") {
            Some(url) => OpenAIProvider::with_base_url(key, url),
            None => OpenAIProvider::new(key),
        };
        providers.push(Arc::new(provider));
    }

    tracing::debug!(count = providers.len(), "Discovered providers");
    providers
}

/// Pick the best default model from available providers.
pub fn pick_default_model(providers: &[Arc<dyn CompletionProvider>]) -> Option<ModelRef> {
    let priority = [
        ("anthropic", "claude-sonnet-4-20250514"),
        ("openai", "gpt-4.1"),
        ("scripted", "scripted"),
    ];

    priority.iter().find_map(|(provider_id, model_id)| {
        providers
            .iter()
            .any(|p| p.id() == *provider_id)
            .then(|| ModelRef::new(*provider_id, *model_id))
    })
}

/// Find a specific provider by ID.
pub fn find_provider<'a>(
    providers: &'a [Arc<dyn CompletionProvider>],
    provider_id: &str,
) -> Option<&'a Arc<dyn CompletionProvider>> {
    providers.iter().find(|p| p.id() == provider_id)
}

/// Resolve the provider and model for a run, wrapping the provider with retry.
///
/// `requested` is `provider/model`, a bare model id (matched against the
/// providers' catalogs), or `None` for the default.
pub fn resolve(
    providers: &[Arc<dyn CompletionProvider>],
    requested: Option<&str>,
    retry: RetryPolicy,
) -> Result<(Arc<dyn CompletionProvider>, ModelRef), RlmError> {
    let model_ref = match requested {
        Some(spec) => match ModelRef::parse(spec) {
            Some(r) => r,
            None => providers
                .iter()
                .find(|p| p.models().iter().any(|m| m.id == spec))
                .map(|p| ModelRef::new(p.id(), spec))
                .ok_or_else(|| {
                    RlmError::Config(format!(
                        "model '{}' is not provider/model and no provider lists it",
                        spec
                    ))
                })?,
        },
        None => pick_default_model(providers).ok_or(RlmError::NoProvider)?,
    };

    let provider = find_provider(providers, &model_ref.provider)
        .cloned()
        .ok_or_else(|| {
            RlmError::Config(format!(
                "provider '{}' is not available (missing API key?)",
                model_ref.provider
            ))
        })?;

    // Local replay needs no retry layer.
    let provider: Arc<dyn CompletionProvider> = if provider.id() == "scripted" {
        provider
    } else {
        Arc::new(RetryProvider::new(provider, retry))
    };

    Ok((provider, model_ref))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::scripted::ScriptedProvider;

    #[test]
    fn test_discover_with_keys() {
        let providers = discover_with(|name| match name {
            "ANTHROPIC_API_KEY" => Some("a".into()),
            "OPENAI_API_KEY" => Some("o".into()),
            _ => None,
        });
        let ids: Vec<&str> = providers.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["anthropic", "openai"]);
        assert_eq!(
            pick_default_model(&providers),
            Some(ModelRef::new("anthropic", "claude-sonnet-4-20250514"))
        );
    }

    #[test]
    fn test_discover_without_keys() {
        let providers = discover_with(|_| None);
        assert!(providers.is_empty());
        assert!(matches!(
            resolve(&providers, None, RetryPolicy::default()),
            Err(RlmError::NoProvider)
        ));
    }

    #[test]
    fn test_resolve_bare_model_id() {
        let providers = discover_with(|name| (name == "OPENAI_API_KEY").then(|| "o".into()));
        let (provider, model) = resolve(&providers, Some("gpt-4.1-mini"), RetryPolicy::default()).unwrap();
        assert_eq!(provider.id(), "openai");
        assert_eq!(model, ModelRef::new("openai", "gpt-4.1-mini"));
    }

    #[test]
    fn test_resolve_unknown_provider() {
        let providers: Vec<Arc<dyn CompletionProvider>> =
            vec![Arc::new(ScriptedProvider::new(["x"]))];
        assert!(resolve(&providers, Some("anthropic/claude"), RetryPolicy::default()).is_err());
        let (provider, model) = resolve(&providers, None, RetryPolicy::default()).unwrap();
        assert_eq!(provider.id(), "scripted");
        assert_eq!(model.model, "scripted");
    }
}
