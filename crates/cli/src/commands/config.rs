use std::env;
use std::fs;
use std::path::Path;

use pricepoint_core::config::{resolve_config_path, AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: override > env > file > default):".to_string()];
    for (key_path, value, env_key) in effective_values(&config) {
        let source = field_source(
            key_path,
            env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(key_path, &value, source));
    }

    lines.join("\n")
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String, &'static str)> {
    let api_token = if config.quote_service.api_token.is_some() { "<redacted>" } else { "<unset>" };

    vec![
        (
            "quote_service.endpoint",
            config.quote_service.endpoint.clone(),
            "PRICEPOINT_QUOTE_SERVICE_ENDPOINT",
        ),
        ("quote_service.api_token", api_token.to_string(), "PRICEPOINT_QUOTE_SERVICE_API_TOKEN"),
        (
            "quote_service.timeout_secs",
            config.quote_service.timeout_secs.to_string(),
            "PRICEPOINT_QUOTE_SERVICE_TIMEOUT_SECS",
        ),
        (
            "pricing.debounce_ms",
            config.pricing.debounce_ms.to_string(),
            "PRICEPOINT_PRICING_DEBOUNCE_MS",
        ),
        (
            "pricing.team_quantity_limit",
            config.pricing.team_quantity_limit.to_string(),
            "PRICEPOINT_PRICING_TEAM_QUANTITY_LIMIT",
        ),
        (
            "pricing.team_default_quantity",
            config.pricing.team_default_quantity.to_string(),
            "PRICEPOINT_PRICING_TEAM_DEFAULT_QUANTITY",
        ),
        (
            "pricing.fetch_timeout_ms",
            config.pricing.fetch_timeout_ms.to_string(),
            "PRICEPOINT_PRICING_FETCH_TIMEOUT_MS",
        ),
        (
            "checkout.cancel_url",
            config.checkout.cancel_url.clone(),
            "PRICEPOINT_CHECKOUT_CANCEL_URL",
        ),
        ("logging.level", config.logging.level.clone(), "PRICEPOINT_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "PRICEPOINT_LOGGING_FORMAT"),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var(env_key).is_ok_and(|value| !value.trim().is_empty()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
