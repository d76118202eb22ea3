use std::{str::FromStr, time::Duration};

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MAX_MEMORY: usize = 128 * 1024 * 1024;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_DEMO_URL: &str = "https://jsonplaceholder.typicode.com/todos/1";

/// Server settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    /// Heap ceiling per sandbox; requests may lower it but never raise it.
    pub max_memory: usize,
    /// Default wall-clock budget per request. `None` when set to `0`.
    pub timeout: Option<Duration>,
    pub demo_url: String,
    pub fetch_deny_private: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_memory: DEFAULT_MAX_MEMORY,
            timeout: Some(Duration::from_millis(DEFAULT_TIMEOUT_MS)),
            demo_url: DEFAULT_DEMO_URL.to_string(),
            fetch_deny_private: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = parse_or(&lookup, "PORT", DEFAULT_PORT);
        let max_memory = parse_or(&lookup, "SANDBOX_MAX_MEMORY", DEFAULT_MAX_MEMORY);
        let timeout = match parse_or(&lookup, "SANDBOX_TIMEOUT_MS", DEFAULT_TIMEOUT_MS) {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let demo_url = match lookup("DEMO_URL") {
            Some(value) if !value.trim().is_empty() => value,
            _ => DEFAULT_DEMO_URL.to_string(),
        };
        let fetch_deny_private = parse_or(&lookup, "FETCH_DENY_PRIVATE", false);

        let config = Self {
            port,
            max_memory,
            timeout,
            demo_url,
            fetch_deny_private,
        };
        tracing::info!(
            port = config.port,
            max_memory = config.max_memory,
            timeout = ?config.timeout,
            demo_url = %config.demo_url,
            fetch_deny_private = config.fetch_deny_private,
            "resolved server config"
        );
        config
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Debug,
{
    let Some(raw) = lookup(name) else {
        return default;
    };
    match raw.trim().parse::<T>() {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(%raw, ?err, "Invalid {name}; falling back to default");
            default
        }
    }
}
