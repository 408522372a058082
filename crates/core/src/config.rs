use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::NaiveDateTime;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::booking::parse_departure;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub booking: BookingPolicyConfig,
    pub faq: FaqConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Business constants for trip changes and invoices. Amounts are whole VND.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingPolicyConfig {
    pub cutoff_hours: u32,
    pub same_day_fee: i64,
    pub different_day_fee: i64,
    pub fallback_base_price: i64,
    /// Pins "now" for demos and reproducible runs. `None` uses the system clock.
    pub reference_time: Option<NaiveDateTime>,
}

impl Default for BookingPolicyConfig {
    fn default() -> Self {
        Self {
            cutoff_hours: 2,
            same_day_fee: 50_000,
            different_day_fee: 100_000,
            fallback_base_price: 250_000,
            reference_time: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FaqConfig {
    pub knowledge_base_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// Deterministic keyword extraction, no network calls.
    Rules,
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
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
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub server_port: Option<u16>,
    pub reference_time: Option<NaiveDateTime>,
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
            database: DatabaseConfig {
                url: "sqlite://rebook.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Rules,
                api_key: None,
                base_url: None,
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 30,
                max_retries: 2,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            booking: BookingPolicyConfig::default(),
            faq: FaqConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rules" => Ok(Self::Rules),
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected rules|openai|ollama)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
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
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("rebook.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        let ConfigPatch { database, llm, server, booking, faq, logging } = patch;

        if let Some(patch) = database {
            overlay(&mut self.database.url, patch.url);
            overlay(&mut self.database.max_connections, patch.max_connections);
            overlay(&mut self.database.timeout_secs, patch.timeout_secs);
        }

        if let Some(patch) = llm {
            overlay(&mut self.llm.provider, patch.provider);
            overlay(&mut self.llm.model, patch.model);
            overlay(&mut self.llm.timeout_secs, patch.timeout_secs);
            overlay(&mut self.llm.max_retries, patch.max_retries);
            if patch.api_key.is_some() {
                self.llm.api_key = patch.api_key.map(secret_value);
            }
            if patch.base_url.is_some() {
                self.llm.base_url = patch.base_url;
            }
        }

        if let Some(patch) = server {
            overlay(&mut self.server.bind_address, patch.bind_address);
            overlay(&mut self.server.port, patch.port);
            overlay(&mut self.server.graceful_shutdown_secs, patch.graceful_shutdown_secs);
        }

        if let Some(patch) = booking {
            let policy = &mut self.booking;
            overlay(&mut policy.cutoff_hours, patch.cutoff_hours);
            overlay(&mut policy.same_day_fee, patch.same_day_fee);
            overlay(&mut policy.different_day_fee, patch.different_day_fee);
            overlay(&mut policy.fallback_base_price, patch.fallback_base_price);
            if let Some(raw) = patch.reference_time {
                policy.reference_time = Some(parse_reference_time("booking.reference_time", &raw)?);
            }
        }

        if let Some(path) = faq.and_then(|patch| patch.knowledge_base_path) {
            self.faq.knowledge_base_path = Some(path);
        }

        if let Some(patch) = logging {
            overlay(&mut self.logging.level, patch.level);
            overlay(&mut self.logging.format, patch.format);
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        overlay(&mut self.database.url, read_env("REBOOK_DATABASE_URL"));
        overlay(
            &mut self.database.max_connections,
            env_parsed("REBOOK_DATABASE_MAX_CONNECTIONS")?,
        );
        overlay(&mut self.database.timeout_secs, env_parsed("REBOOK_DATABASE_TIMEOUT_SECS")?);

        if let Some(raw) = read_env("REBOOK_LLM_PROVIDER") {
            self.llm.provider = raw.parse()?;
        }
        if let Some(raw) = read_env("REBOOK_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(raw));
        }
        if let Some(raw) = read_env("REBOOK_LLM_BASE_URL") {
            self.llm.base_url = Some(raw);
        }
        overlay(&mut self.llm.model, read_env("REBOOK_LLM_MODEL"));
        overlay(&mut self.llm.timeout_secs, env_parsed("REBOOK_LLM_TIMEOUT_SECS")?);
        overlay(&mut self.llm.max_retries, env_parsed("REBOOK_LLM_MAX_RETRIES")?);

        overlay(&mut self.server.bind_address, read_env("REBOOK_SERVER_BIND_ADDRESS"));
        overlay(&mut self.server.port, env_parsed("REBOOK_SERVER_PORT")?);
        overlay(
            &mut self.server.graceful_shutdown_secs,
            env_parsed("REBOOK_SERVER_GRACEFUL_SHUTDOWN_SECS")?,
        );

        let policy = &mut self.booking;
        overlay(&mut policy.cutoff_hours, env_parsed("REBOOK_BOOKING_CUTOFF_HOURS")?);
        overlay(&mut policy.same_day_fee, env_parsed("REBOOK_BOOKING_SAME_DAY_FEE")?);
        overlay(&mut policy.different_day_fee, env_parsed("REBOOK_BOOKING_DIFFERENT_DAY_FEE")?);
        overlay(
            &mut policy.fallback_base_price,
            env_parsed("REBOOK_BOOKING_FALLBACK_BASE_PRICE")?,
        );
        if let Some(raw) = read_env("REBOOK_BOOKING_REFERENCE_TIME") {
            policy.reference_time =
                Some(parse_reference_time("REBOOK_BOOKING_REFERENCE_TIME", &raw)?);
        }

        if let Some(raw) = read_env("REBOOK_FAQ_KNOWLEDGE_BASE_PATH") {
            self.faq.knowledge_base_path = Some(PathBuf::from(raw));
        }

        let level = read_env("REBOOK_LOGGING_LEVEL").or_else(|| read_env("REBOOK_LOG_LEVEL"));
        overlay(&mut self.logging.level, level);
        if let Some(raw) =
            read_env("REBOOK_LOGGING_FORMAT").or_else(|| read_env("REBOOK_LOG_FORMAT"))
        {
            self.logging.format = raw.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        overlay(&mut self.database.url, overrides.database_url);
        overlay(&mut self.logging.level, overrides.log_level);
        overlay(&mut self.llm.provider, overrides.llm_provider);
        overlay(&mut self.llm.model, overrides.llm_model);
        overlay(&mut self.server.port, overrides.server_port);
        if overrides.reference_time.is_some() {
            self.booking.reference_time = overrides.reference_time;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_booking(&self.booking)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("rebook.toml"), PathBuf::from("config/rebook.toml")]
        .into_iter()
        .find(|path| path.exists())
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

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::Rules => {}
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider (set REBOOK_LLM_API_KEY)"
                        .to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for the ollama provider".to_string(),
                ));
            }
        }
    }

    if let Some(base_url) = &llm.base_url {
        let trimmed = base_url.trim();
        if !trimmed.is_empty()
            && !trimmed.starts_with("http://")
            && !trimmed.starts_with("https://")
        {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_booking(booking: &BookingPolicyConfig) -> Result<(), ConfigError> {
    if booking.cutoff_hours == 0 {
        return Err(ConfigError::Validation(
            "booking.cutoff_hours must be greater than zero".to_string(),
        ));
    }

    if booking.same_day_fee < 0 || booking.different_day_fee < 0 {
        return Err(ConfigError::Validation("booking fees must not be negative".to_string()));
    }

    if booking.same_day_fee >= booking.different_day_fee {
        return Err(ConfigError::Validation(
            "booking.same_day_fee must be lower than booking.different_day_fee".to_string(),
        ));
    }

    if booking.fallback_base_price < 0 {
        return Err(ConfigError::Validation(
            "booking.fallback_base_price must not be negative".to_string(),
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

fn overlay<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn env_parsed<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    read_env(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
                key: key.to_string(),
                value,
            })
        })
        .transpose()
}

fn parse_reference_time(key: &str, value: &str) -> Result<NaiveDateTime, ConfigError> {
    parse_departure(value).ok_or_else(|| {
        ConfigError::Validation(format!(
            "{key} must use the YYYY-MM-DDTHH:MM:SS format, got `{value}`"
        ))
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    booking: Option<BookingPatch>,
    faq: Option<FaqPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct BookingPatch {
    cutoff_hours: Option<u32>,
    same_day_fee: Option<i64>,
    different_day_fee: Option<i64>,
    fallback_base_price: Option<i64>,
    reference_time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FaqPatch {
    knowledge_base_path: Option<PathBuf>,
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

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

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

    fn write_config(dir: &TempDir, contents: &str) -> Result<std::path::PathBuf, String> {
        let path = dir.path().join("rebook.toml");
        fs::write(&path, contents).map_err(|err| err.to_string())?;
        Ok(path)
    }

    #[test]
    fn defaults_match_booking_constants() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.booking.cutoff_hours == 2, "cutoff should default to two hours")?;
        ensure(config.booking.same_day_fee == 50_000, "same-day fee default")?;
        ensure(config.booking.different_day_fee == 100_000, "different-day fee default")?;
        ensure(config.booking.fallback_base_price == 250_000, "fallback base price default")?;
        ensure(config.booking.reference_time.is_none(), "system clock by default")?;
        ensure(config.llm.provider == LlmProvider::Rules, "rule-based extraction by default")?;
        ensure(config.server.port == 8080, "default port")?;
        Ok(())
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_REBOOK_OPENAI_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = write_config(
                &dir,
                r#"
[llm]
provider = "openai"
api_key = "${TEST_REBOOK_OPENAI_KEY}"
"#,
            )?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::OpenAi, "provider should come from file")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string())
                    == Some("sk-from-env".to_string()),
                "api key should be interpolated from environment",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_REBOOK_OPENAI_KEY"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = write_config(&dir, "[database]\nurl = \"${REBOOK_TEST_UNSET_DB}\"\n")?;

        match AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() }) {
            Err(ConfigError::MissingEnvInterpolation { var }) => {
                ensure(var == "REBOOK_TEST_UNSET_DB", "error should name the variable")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected interpolation failure".to_string()),
        }
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REBOOK_LOG_LEVEL", "warn");
        env::set_var("REBOOK_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["REBOOK_LOG_LEVEL", "REBOOK_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REBOOK_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("REBOOK_BOOKING_SAME_DAY_FEE", "60000");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = write_config(
                &dir,
                r#"
[database]
url = "sqlite://from-file.db"

[booking]
same_day_fee = 40000
different_day_fee = 120000
reference_time = "2025-09-02T09:00:00"

[logging]
level = "warn"
"#,
            )?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.booking.same_day_fee == 60_000, "env fee should win over file")?;
            ensure(
                config.booking.different_day_fee == 120_000,
                "file fee should win over default",
            )?;
            ensure(
                config.booking.reference_time.map(|at| at.to_string())
                    == Some("2025-09-02 09:00:00".to_string()),
                "reference time should be parsed from file",
            )?;
            Ok(())
        })();

        clear_vars(&["REBOOK_DATABASE_URL", "REBOOK_BOOKING_SAME_DAY_FEE"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REBOOK_LLM_PROVIDER", "openai");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(&["REBOOK_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn inverted_fee_tiers_are_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REBOOK_BOOKING_SAME_DAY_FEE", "150000");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::Validation(message)) => {
                ensure(message.contains("booking.same_day_fee"), "message should name the key")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected fee validation failure".to_string()),
        };

        clear_vars(&["REBOOK_BOOKING_SAME_DAY_FEE"]);
        result
    }

    #[test]
    fn invalid_numeric_env_value_is_reported_with_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REBOOK_SERVER_PORT", "eighty");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "REBOOK_SERVER_PORT", "error should name the variable")
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected env override failure".to_string()),
        };

        clear_vars(&["REBOOK_SERVER_PORT"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("REBOOK_LLM_PROVIDER", "openai");
        env::set_var("REBOOK_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["REBOOK_LLM_PROVIDER", "REBOOK_LLM_API_KEY"]);
        result
    }
}
