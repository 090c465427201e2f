use std::env;
use std::fmt;

use paintbytext_contracts::predictions::MAX_UPLOAD_BYTES;

pub const TOKEN_ENV: &str = "REPLICATE_API_TOKEN";
pub const DEFAULT_API_BASE: &str = "https://api.replicate.com/v1";
pub const DEFAULT_MODEL: &str = "black-forest-labs/flux-kontext-pro";
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Proxy settings. Read from the environment, then adjusted by CLI flags.
#[derive(Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub api_base: String,
    pub api_token: Option<String>,
    pub model: String,
    pub body_limit: usize,
    pub user_agent: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            bind: non_empty("PAINTBYTEXT_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            api_base: non_empty("REPLICATE_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_token: non_empty(TOKEN_ENV),
            model: non_empty("PAINTBYTEXT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            body_limit: MAX_UPLOAD_BYTES,
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind", &self.bind)
            .field("api_base", &self.api_base)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("body_limit", &self.body_limit)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = ServerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.bind, DEFAULT_BIND);
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.api_token, None);
        assert_eq!(config.body_limit, 10 * 1024 * 1024);
    }

    #[test]
    fn blank_token_counts_as_missing() {
        let config = ServerConfig::from_lookup(lookup(&[(TOKEN_ENV, "   ")]));
        assert_eq!(config.api_token, None);
    }

    #[test]
    fn overrides_are_trimmed() {
        let config = ServerConfig::from_lookup(lookup(&[
            (TOKEN_ENV, " r8_secret "),
            ("REPLICATE_API_BASE", "http://localhost:9000/v1/"),
            ("PAINTBYTEXT_MODEL", "owner/other-model"),
        ]));
        assert_eq!(config.api_token.as_deref(), Some("r8_secret"));
        assert_eq!(config.api_base, "http://localhost:9000/v1");
        assert_eq!(config.model, "owner/other-model");
    }

    #[test]
    fn debug_output_hides_token() {
        let config = ServerConfig::from_lookup(lookup(&[(TOKEN_ENV, "r8_secret")]));
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("r8_secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
