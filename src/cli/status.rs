// src/cli/status.rs — `rlm models` and `rlm config`

use std::sync::Arc;

use crate::infra::config::Config;
use crate::infra::paths;
use crate::provider::CompletionProvider;

/// List discovered providers, their models and prices.
pub fn show_models(providers: &[Arc<dyn CompletionProvider>]) -> anyhow::Result<()> {
    if providers.is_empty() {
        println!("No providers found. Set ANTHROPIC_API_KEY or OPENAI_API_KEY.");
        return Ok(());
    }
    for provider in providers {
        println!("{} ({})", provider.name(), provider.id());
        for model in provider.models() {
            println!("{}", format_model_line(provider.id(), &model));
        }
    }
    Ok(())
}

fn format_model_line(provider_id: &str, model: &crate::provider::ModelInfo) -> String {
    format!(
        "  {}/{:<32} ctx {:>7}  ${:.2} in / ${:.2} out per Mtok",
        provider_id,
        model.id,
        model.context_window,
        model.input_price_per_mtok,
        model.output_price_per_mtok,
    )
}

/// Print the effective configuration and where it came from.
pub fn show_config(config: &Config, source: Option<&str>) -> anyhow::Result<()> {
    let default_path = paths::config_file_path();
    match source {
        Some(path) => println!("# loaded from {path}"),
        None if default_path.exists() => println!("# loaded from {}", default_path.display()),
        None => println!("# defaults (no {} found)", default_path.display()),
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ModelInfo;

    #[test]
    fn test_format_model_line() {
        let model = ModelInfo {
            id: "m1".into(),
            name: "Model One".into(),
            context_window: 200_000,
            max_output_tokens: 8192,
            input_price_per_mtok: 3.0,
            output_price_per_mtok: 15.0,
        };
        let line = format_model_line("anthropic", &model);
        assert!(line.starts_with("  anthropic/m1"));
        assert!(line.contains("200000"));
        assert!(line.ends_with("$3.00 in / $15.00 out per Mtok"));
    }

    #[test]
    fn test_config_serializes_to_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(text.contains("[run]"));
        assert!(text.contains("max_iterations = 10"));
    }
}
