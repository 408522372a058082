use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rebook_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::CommandResult;

/// One effective setting: dotted key, rendered value, and the env vars that can set it.
struct Entry {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: override > env > file > default):".to_string()];
    for entry in entries(&config) {
        let source = field_source(
            entry.key,
            entry.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(entry.key, &entry.value, source));
    }

    CommandResult::success("config", lines.join("\n"))
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let llm_api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_token(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    let reference_time = config
        .booking
        .reference_time
        .map(|time| time.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_else(|| "<system clock>".to_string());
    let knowledge_base = config
        .faq
        .knowledge_base_path
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "<builtin>".to_string());

    vec![
        Entry {
            key: "database.url",
            value: config.database.url.clone(),
            env_keys: &["REBOOK_DATABASE_URL"],
        },
        Entry {
            key: "database.max_connections",
            value: config.database.max_connections.to_string(),
            env_keys: &["REBOOK_DATABASE_MAX_CONNECTIONS"],
        },
        Entry {
            key: "database.timeout_secs",
            value: config.database.timeout_secs.to_string(),
            env_keys: &["REBOOK_DATABASE_TIMEOUT_SECS"],
        },
        Entry {
            key: "llm.provider",
            value: format!("{:?}", config.llm.provider),
            env_keys: &["REBOOK_LLM_PROVIDER"],
        },
        Entry {
            key: "llm.model",
            value: config.llm.model.clone(),
            env_keys: &["REBOOK_LLM_MODEL"],
        },
        Entry {
            key: "llm.base_url",
            value: config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            env_keys: &["REBOOK_LLM_BASE_URL"],
        },
        Entry { key: "llm.api_key", value: llm_api_key, env_keys: &["REBOOK_LLM_API_KEY"] },
        Entry {
            key: "llm.timeout_secs",
            value: config.llm.timeout_secs.to_string(),
            env_keys: &["REBOOK_LLM_TIMEOUT_SECS"],
        },
        Entry {
            key: "server.bind_address",
            value: config.server.bind_address.clone(),
            env_keys: &["REBOOK_SERVER_BIND_ADDRESS"],
        },
        Entry {
            key: "server.port",
            value: config.server.port.to_string(),
            env_keys: &["REBOOK_SERVER_PORT"],
        },
        Entry {
            key: "booking.cutoff_hours",
            value: config.booking.cutoff_hours.to_string(),
            env_keys: &["REBOOK_BOOKING_CUTOFF_HOURS"],
        },
        Entry {
            key: "booking.same_day_fee",
            value: config.booking.same_day_fee.to_string(),
            env_keys: &["REBOOK_BOOKING_SAME_DAY_FEE"],
        },
        Entry {
            key: "booking.different_day_fee",
            value: config.booking.different_day_fee.to_string(),
            env_keys: &["REBOOK_BOOKING_DIFFERENT_DAY_FEE"],
        },
        Entry {
            key: "booking.fallback_base_price",
            value: config.booking.fallback_base_price.to_string(),
            env_keys: &["REBOOK_BOOKING_FALLBACK_BASE_PRICE"],
        },
        Entry {
            key: "booking.reference_time",
            value: reference_time,
            env_keys: &["REBOOK_BOOKING_REFERENCE_TIME"],
        },
        Entry {
            key: "faq.knowledge_base_path",
            value: knowledge_base,
            env_keys: &["REBOOK_FAQ_KNOWLEDGE_BASE_PATH"],
        },
        Entry {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["REBOOK_LOGGING_LEVEL", "REBOOK_LOG_LEVEL"],
        },
        Entry {
            key: "logging.format",
            value: format!("{:?}", config.logging.format),
            env_keys: &["REBOOK_LOGGING_FORMAT", "REBOOK_LOG_FORMAT"],
        },
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("rebook.toml"), PathBuf::from("config/rebook.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
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

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
