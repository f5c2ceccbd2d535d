use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["pricepoint.toml", "config/pricepoint.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub quote_service: QuoteServiceConfig,
    pub pricing: PricingConfig,
    pub checkout: CheckoutConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct QuoteServiceConfig {
    pub endpoint: String,
    pub api_token: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PricingConfig {
    pub debounce_ms: u64,
    pub team_quantity_limit: u32,
    pub team_default_quantity: u32,
    pub fetch_timeout_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckoutConfig {
    pub cancel_url: String,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub quote_endpoint: Option<String>,
    pub quote_api_token: Option<String>,
    pub debounce_ms: Option<u64>,
    pub team_quantity_limit: Option<u32>,
    pub cancel_url: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            quote_service: QuoteServiceConfig {
                endpoint: "http://127.0.0.1:3000/api/products/quote".to_string(),
                api_token: None,
                timeout_secs: 10,
            },
            pricing: PricingConfig::default(),
            checkout: CheckoutConfig { cancel_url: "http://127.0.0.1:3000/products".to_string() },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 350,
            team_quantity_limit: 100,
            team_default_quantity: 5,
            fetch_timeout_ms: 10_000,
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = resolve_config_path(options.config_path.as_deref()) {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(CONFIG_FILE_CANDIDATES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(quote_service) = patch.quote_service {
            if let Some(endpoint) = quote_service.endpoint {
                self.quote_service.endpoint = endpoint;
            }
            if let Some(token) = quote_service.api_token {
                self.quote_service.api_token = Some(SecretString::from(token));
            }
            if let Some(timeout_secs) = quote_service.timeout_secs {
                self.quote_service.timeout_secs = timeout_secs;
            }
        }

        if let Some(pricing) = patch.pricing {
            if let Some(debounce_ms) = pricing.debounce_ms {
                self.pricing.debounce_ms = debounce_ms;
            }
            if let Some(limit) = pricing.team_quantity_limit {
                self.pricing.team_quantity_limit = limit;
            }
            if let Some(quantity) = pricing.team_default_quantity {
                self.pricing.team_default_quantity = quantity;
            }
            if let Some(fetch_timeout_ms) = pricing.fetch_timeout_ms {
                self.pricing.fetch_timeout_ms = fetch_timeout_ms;
            }
        }

        if let Some(checkout) = patch.checkout {
            if let Some(cancel_url) = checkout.cancel_url {
                self.checkout.cancel_url = cancel_url;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("PRICEPOINT_QUOTE_SERVICE_ENDPOINT") {
            self.quote_service.endpoint = value;
        }
        if let Some(value) = read_env("PRICEPOINT_QUOTE_SERVICE_API_TOKEN") {
            self.quote_service.api_token = Some(SecretString::from(value));
        }
        if let Some(value) = read_env("PRICEPOINT_QUOTE_SERVICE_TIMEOUT_SECS") {
            self.quote_service.timeout_secs =
                parse_number("PRICEPOINT_QUOTE_SERVICE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("PRICEPOINT_PRICING_DEBOUNCE_MS") {
            self.pricing.debounce_ms = parse_number("PRICEPOINT_PRICING_DEBOUNCE_MS", &value)?;
        }
        if let Some(value) = read_env("PRICEPOINT_PRICING_TEAM_QUANTITY_LIMIT") {
            self.pricing.team_quantity_limit =
                parse_number("PRICEPOINT_PRICING_TEAM_QUANTITY_LIMIT", &value)?;
        }
        if let Some(value) = read_env("PRICEPOINT_PRICING_TEAM_DEFAULT_QUANTITY") {
            self.pricing.team_default_quantity =
                parse_number("PRICEPOINT_PRICING_TEAM_DEFAULT_QUANTITY", &value)?;
        }
        if let Some(value) = read_env("PRICEPOINT_PRICING_FETCH_TIMEOUT_MS") {
            self.pricing.fetch_timeout_ms =
                parse_number("PRICEPOINT_PRICING_FETCH_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("PRICEPOINT_CHECKOUT_CANCEL_URL") {
            self.checkout.cancel_url = value;
        }

        let log_level =
            read_env("PRICEPOINT_LOGGING_LEVEL").or_else(|| read_env("PRICEPOINT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("PRICEPOINT_LOGGING_FORMAT").or_else(|| read_env("PRICEPOINT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(endpoint) = overrides.quote_endpoint {
            self.quote_service.endpoint = endpoint;
        }
        if let Some(token) = overrides.quote_api_token {
            self.quote_service.api_token = Some(SecretString::from(token));
        }
        if let Some(debounce_ms) = overrides.debounce_ms {
            self.pricing.debounce_ms = debounce_ms;
        }
        if let Some(limit) = overrides.team_quantity_limit {
            self.pricing.team_quantity_limit = limit;
        }
        if let Some(cancel_url) = overrides.cancel_url {
            self.checkout.cancel_url = cancel_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_quote_service(&self.quote_service)?;
        validate_pricing(&self.pricing)?;
        validate_checkout(&self.checkout)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// Returns the config file that [`AppConfig::load`] would read, if any.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn is_http_url(value: &str) -> bool {
    let value = value.trim();
    value.starts_with("http://") || value.starts_with("https://")
}

fn validate_quote_service(quote_service: &QuoteServiceConfig) -> Result<(), ConfigError> {
    if !is_http_url(&quote_service.endpoint) {
        return Err(ConfigError::Validation(
            "quote_service.endpoint must start with http:// or https://".to_string(),
        ));
    }

    if quote_service.timeout_secs == 0 || quote_service.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "quote_service.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    let blank_token = quote_service
        .api_token
        .as_ref()
        .is_some_and(|token| token.expose_secret().trim().is_empty());
    if blank_token {
        return Err(ConfigError::Validation(
            "quote_service.api_token is set but empty; remove it or provide a token".to_string(),
        ));
    }

    Ok(())
}

fn validate_pricing(pricing: &PricingConfig) -> Result<(), ConfigError> {
    if pricing.debounce_ms > 10_000 {
        return Err(ConfigError::Validation(
            "pricing.debounce_ms must be in range 0..=10000".to_string(),
        ));
    }

    if !(1..=10_000).contains(&pricing.team_quantity_limit) {
        return Err(ConfigError::Validation(
            "pricing.team_quantity_limit must be in range 1..=10000".to_string(),
        ));
    }

    if pricing.team_default_quantity == 0
        || pricing.team_default_quantity > pricing.team_quantity_limit
    {
        return Err(ConfigError::Validation(format!(
            "pricing.team_default_quantity must be in range 1..={}",
            pricing.team_quantity_limit
        )));
    }

    if pricing.fetch_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "pricing.fetch_timeout_ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_checkout(checkout: &CheckoutConfig) -> Result<(), ConfigError> {
    if !is_http_url(&checkout.cancel_url) {
        return Err(ConfigError::Validation(
            "checkout.cancel_url must start with http:// or https://".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    quote_service: Option<QuoteServicePatch>,
    pricing: Option<PricingPatch>,
    checkout: Option<CheckoutPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteServicePatch {
    endpoint: Option<String>,
    api_token: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingPatch {
    debounce_ms: Option<u64>,
    team_quantity_limit: Option<u32>,
    team_default_quantity: Option<u32>,
    fetch_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CheckoutPatch {
    cancel_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_pricing_rules() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.pricing.debounce_ms == 350, "debounce defaults to 350ms")?;
        ensure(config.pricing.team_quantity_limit == 100, "team limit defaults to 100")?;
        ensure(config.pricing.team_default_quantity == 5, "team default quantity is 5")?;
        ensure(config.pricing.fetch_timeout_ms == 10_000, "fetch timeout defaults to 10s")?;
        ensure(config.quote_service.api_token.is_none(), "no token by default")?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "compact logging by default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_PRICEPOINT_TOKEN", "pp-token-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("pricepoint.toml");
            fs::write(
                &path,
                r#"
[quote_service]
endpoint = "https://shop.example.test/api/products/quote"
api_token = "${TEST_PRICEPOINT_TOKEN}"

[pricing]
team_quantity_limit = 50
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.quote_service.api_token.as_ref().map(|token| token.expose_secret())
                    == Some("pp-token-from-env"),
                "api token should be interpolated from environment",
            )?;
            ensure(config.pricing.team_quantity_limit == 50, "file sets the team limit")?;
            Ok(())
        })();

        clear_vars(&["TEST_PRICEPOINT_TOKEN"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("pricepoint.toml");
        fs::write(&path, "[quote_service]\napi_token = \"${PRICEPOINT_TEST_UNSET_VAR}\"\n")
            .map_err(|err| err.to_string())?;

        let error =
            match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
            {
                Ok(_) => return Err("expected interpolation failure".to_string()),
                Err(error) => error,
            };
        ensure(
            matches!(error, ConfigError::MissingEnvInterpolation { ref var } if var == "PRICEPOINT_TEST_UNSET_VAR"),
            "interpolation error should name the variable",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PRICEPOINT_LOG_LEVEL", "warn");
        env::set_var("PRICEPOINT_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["PRICEPOINT_LOG_LEVEL", "PRICEPOINT_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PRICEPOINT_QUOTE_SERVICE_ENDPOINT", "https://env.example.test/quote");
        env::set_var("PRICEPOINT_PRICING_DEBOUNCE_MS", "500");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("pricepoint.toml");
            fs::write(
                &path,
                r#"
[quote_service]
endpoint = "https://file.example.test/quote"

[pricing]
debounce_ms = 200
team_default_quantity = 3

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    debounce_ms: Some(50),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.quote_service.endpoint == "https://env.example.test/quote",
                "env endpoint should win over file and defaults",
            )?;
            ensure(config.pricing.debounce_ms == 50, "override debounce should win")?;
            ensure(config.pricing.team_default_quantity == 3, "file value kept when not overridden")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            Ok(())
        })();

        clear_vars(&["PRICEPOINT_QUOTE_SERVICE_ENDPOINT", "PRICEPOINT_PRICING_DEBOUNCE_MS"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PRICEPOINT_PRICING_TEAM_QUANTITY_LIMIT", "lots");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "PRICEPOINT_PRICING_TEAM_QUANTITY_LIMIT"),
                "error should name the offending variable",
            )
        })();

        clear_vars(&["PRICEPOINT_PRICING_TEAM_QUANTITY_LIMIT"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PRICEPOINT_PRICING_TEAM_QUANTITY_LIMIT", "20000");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("pricing.team_quantity_limit")
            );
            ensure(has_message, "validation failure should mention pricing.team_quantity_limit")
        })();

        clear_vars(&["PRICEPOINT_PRICING_TEAM_QUANTITY_LIMIT"]);
        result
    }

    #[test]
    fn relative_cancel_url_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let error = match AppConfig::load(LoadOptions {
            overrides: ConfigOverrides {
                cancel_url: Some("/products/rust".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected validation failure".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(error, ConfigError::Validation(ref message) if message.contains("checkout.cancel_url")),
            "validation failure should mention checkout.cancel_url",
        )
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("PRICEPOINT_QUOTE_SERVICE_API_TOKEN", "pp-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("pp-secret-value"), "debug output should not contain the token")?;
            ensure(config.quote_service.api_token.is_some(), "token should be loaded from env")?;
            Ok(())
        })();

        clear_vars(&["PRICEPOINT_QUOTE_SERVICE_API_TOKEN"]);
        result
    }

    #[test]
    fn missing_required_file_is_reported() -> Result<(), String> {
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("absent.toml");

        let error = match AppConfig::load(LoadOptions {
            config_path: Some(path.clone()),
            require_file: true,
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected missing file error".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(error, ConfigError::MissingConfigFile(ref missing) if *missing == path),
            "missing file error should carry the expected path",
        )
    }
}
