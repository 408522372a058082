use std::env;
use std::sync::{Mutex, OnceLock};

use rebook_cli::commands::chat::{self, ChatOptions};
use rebook_cli::commands::{config, migrate, seed};
use serde_json::Value;

const MEMORY_DB: (&str, &str) = ("REBOOK_DATABASE_URL", "sqlite::memory:");
const REFERENCE_TIME: (&str, &str) = ("REBOOK_BOOKING_REFERENCE_TIME", "2025-09-02T09:00:00");

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&[MEMORY_DB], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("REBOOK_DATABASE_URL", "postgres://localhost/rebook")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_returns_reservation_summary() {
    with_env(&[MEMORY_DB], || {
        let result = seed::run(false);
        assert_eq!(result.exit_code, 0, "expected deterministic seed success");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");

        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("5 bookings"));
        assert!(message.contains("VX123456"));
        assert!(message.contains("33 trips"));
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    with_env(&[MEMORY_DB], || {
        let first = seed::run(false);
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);

        let second = seed::run(true);
        assert_eq!(second.exit_code, 0, "expected reset seed invocation success");
        let second_payload = parse_payload(&second.output);

        assert_eq!(first_payload["message"], second_payload["message"]);
    });
}

#[test]
fn config_reports_env_sources_and_redacts_keys() {
    with_env(
        &[
            MEMORY_DB,
            ("REBOOK_LLM_PROVIDER", "openai"),
            ("REBOOK_LLM_API_KEY", "sk-secret-value"),
            ("REBOOK_LOG_LEVEL", "debug"),
        ],
        || {
            let result = config::run();
            assert_eq!(result.exit_code, 0);

            let payload = parse_payload(&result.output);
            let message = payload["message"].as_str().unwrap_or("");
            assert!(message
                .contains("- database.url = sqlite::memory: (source: env (REBOOK_DATABASE_URL))"));
            assert!(message.contains("- llm.api_key = sk-*** (source: env (REBOOK_LLM_API_KEY))"));
            assert!(message.contains("- logging.level = debug (source: env (REBOOK_LOG_LEVEL))"));
            assert!(message.contains("- booking.same_day_fee = 50000 (source: default)"));
            assert!(!message.contains("secret-value"));
        },
    );
}

#[test]
fn config_returns_failure_when_openai_key_is_missing() {
    with_env(&[MEMORY_DB, ("REBOOK_LLM_PROVIDER", "openai")], || {
        let result = config::run();
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or("").contains("llm.api_key"));
    });
}

#[test]
fn chat_answers_a_single_message_against_seeded_data() {
    with_env(&[MEMORY_DB, REFERENCE_TIME], || {
        let result = chat::run(ChatOptions {
            thread_id: "cli-test".to_string(),
            message: Some("check booking VX123456".to_string()),
            seed: true,
        });
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "chat");
        let reply = payload["message"].as_str().unwrap_or("");
        assert!(reply.contains("VX123456"));
        assert!(reply.contains("HCM → Da Lat"));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "REBOOK_DATABASE_URL",
        "REBOOK_DATABASE_MAX_CONNECTIONS",
        "REBOOK_DATABASE_TIMEOUT_SECS",
        "REBOOK_LLM_PROVIDER",
        "REBOOK_LLM_API_KEY",
        "REBOOK_LLM_BASE_URL",
        "REBOOK_LLM_MODEL",
        "REBOOK_LLM_TIMEOUT_SECS",
        "REBOOK_LLM_MAX_RETRIES",
        "REBOOK_SERVER_BIND_ADDRESS",
        "REBOOK_SERVER_PORT",
        "REBOOK_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "REBOOK_BOOKING_CUTOFF_HOURS",
        "REBOOK_BOOKING_SAME_DAY_FEE",
        "REBOOK_BOOKING_DIFFERENT_DAY_FEE",
        "REBOOK_BOOKING_FALLBACK_BASE_PRICE",
        "REBOOK_BOOKING_REFERENCE_TIME",
        "REBOOK_FAQ_KNOWLEDGE_BASE_PATH",
        "REBOOK_LOGGING_LEVEL",
        "REBOOK_LOGGING_FORMAT",
        "REBOOK_LOG_LEVEL",
        "REBOOK_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
