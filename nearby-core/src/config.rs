//! Client configuration: TOML with defaults, then environment overrides.

use serde::Deserialize;

use crate::protocol::StatusCodes;

/// Client settings.
/// Env overrides: NEARBY_SERVICE_ID.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Advertisers and discoverers only see each other under the same service id.
    #[serde(default = "default_service_id")]
    pub service_id: String,
    /// Replaces the backend's status code table when set.
    #[serde(default)]
    pub status_codes: Option<StatusCodes>,
}

fn default_service_id() -> String {
    "io.mego.nearby".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_id: default_service_id(),
            status_codes: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn apply_env(&mut self) {
        if let Ok(s) = std::env::var("NEARBY_SERVICE_ID") {
            if !s.trim().is_empty() {
                self.service_id = s;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let c = Config::from_toml_str("").unwrap();
        assert_eq!(c, Config::default());
        assert_eq!(c.service_id, "io.mego.nearby");
    }

    #[test]
    fn status_code_override() {
        let c = Config::from_toml_str(
            r#"
            service_id = "demo"

            [status_codes]
            connection_ok = 0
            connection_rejected = 1
            connection_error = 2
            transfer_success = 10
            transfer_failure = 11
            transfer_in_progress = 12
            transfer_canceled = 13
            "#,
        )
        .unwrap();
        assert_eq!(c.service_id, "demo");
        assert_eq!(c.status_codes.unwrap().transfer_success, 10);
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(matches!(
            Config::from_toml_str("proxy_port = 3128"),
            Err(ConfigError::Parse(_))
        ));
    }
}
