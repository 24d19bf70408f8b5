pub mod tracing;

use std::env;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },

    #[error("No configuration found for '{0}'")]
    NotFound(String),
}

/// Application environment (dev = local/kind, prod = full k8s)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Environment {
    Development, // Local dev or kind cluster
    Production,  // Full k8s cluster
}

impl Environment {
    pub fn from_env() -> Self {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        if app_env.eq_ignore_ascii_case("production") {
            Environment::Production
        } else {
            Environment::Development
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn is_development(&self) -> bool {
        matches!(self, Environment::Development)
    }
}

/// Trait for configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Helper to load and parse environment variable with a default value
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Helper to load and parse environment variable or return error
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse an environment variable into `T`, falling back to `default` when unset.
///
/// A variable that is set but fails to parse is an error, not a silent default.
pub fn env_parse_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Split a comma-separated environment variable into trimmed, non-empty items.
///
/// Returns `None` when the variable is unset.
pub fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_defaults_to_development() {
        temp_env::with_var_unset("APP_ENV", || {
            let env = Environment::from_env();
            assert_eq!(env, Environment::Development);
            assert!(env.is_development());
            assert!(!env.is_production());
        });
    }

    #[test]
    fn test_environment_production_case_insensitive() {
        temp_env::with_var("APP_ENV", Some("PRODUCTION"), || {
            assert_eq!(Environment::from_env(), Environment::Production);
        });

        temp_env::with_var("APP_ENV", Some("staging"), || {
            assert_eq!(Environment::from_env(), Environment::Development);
        });
    }

    #[test]
    fn test_env_or_default() {
        temp_env::with_var("TEST_VAR", Some("test_value"), || {
            assert_eq!(env_or_default("TEST_VAR", "default"), "test_value");
        });

        temp_env::with_var_unset("MISSING_VAR", || {
            assert_eq!(env_or_default("MISSING_VAR", "default_value"), "default_value");
        });
    }

    #[test]
    fn test_env_required_missing() {
        temp_env::with_var_unset("MISSING_REQUIRED", || {
            let err = env_required("MISSING_REQUIRED").unwrap_err();
            assert!(err.to_string().contains("MISSING_REQUIRED"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_env_parse_or_uses_default_when_unset() {
        temp_env::with_var_unset("POOL_SIZE", || {
            assert_eq!(env_parse_or("POOL_SIZE", 4usize), Ok(4));
        });
    }

    #[test]
    fn test_env_parse_or_rejects_garbage() {
        temp_env::with_var("POOL_SIZE", Some("lots"), || {
            let err = env_parse_or("POOL_SIZE", 4usize).unwrap_err();
            assert!(matches!(err, ConfigError::ParseError { ref key, .. } if key == "POOL_SIZE"));
        });

        temp_env::with_var("POOL_SIZE", Some(" 8 "), || {
            assert_eq!(env_parse_or("POOL_SIZE", 4usize), Ok(8));
        });
    }

    #[test]
    fn test_env_list_splits_and_trims() {
        temp_env::with_var("HOSTS", Some("10.0.0.1, 10.0.0.2,,10.0.0.3 "), || {
            assert_eq!(
                env_list("HOSTS"),
                Some(vec![
                    "10.0.0.1".to_string(),
                    "10.0.0.2".to_string(),
                    "10.0.0.3".to_string()
                ])
            );
        });

        temp_env::with_var_unset("HOSTS", || {
            assert_eq!(env_list("HOSTS"), None);
        });
    }
}
