//! Environment-driven configuration shared by the mail dispatch crates.
//!
//! Every config struct in the workspace implements [`FromEnv`] and is built
//! from the helpers below, so a missing or malformed variable always surfaces
//! as a [`ConfigError`] naming the offending key.

pub mod tracing;

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable '{0}' is required but not set")]
    MissingEnvVar(String),

    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },
}

/// Application environment (development = pretty logs, production = JSON logs)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn from_env() -> Self {
        let app_env = env_or_default("APP_ENV", "development");

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

/// Load an environment variable, falling back to `default` when unset
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Load an environment variable or return [`ConfigError::MissingEnvVar`]
pub fn env_required(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Load the first of `keys` that is set, if any
pub fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| env::var(key).ok())
}

/// Parse an environment variable into `T`, using `default` when unset.
///
/// A variable that is set but does not parse is an error rather than a
/// silent fallback.
pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Parse a boolean flag (`true`/`1`/`yes`/`on`, case-insensitive).
pub fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
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
        temp_env::with_var("MAILQ_TEST_VAR", Some("value"), || {
            assert_eq!(env_or_default("MAILQ_TEST_VAR", "default"), "value");
        });
        temp_env::with_var_unset("MAILQ_TEST_VAR", || {
            assert_eq!(env_or_default("MAILQ_TEST_VAR", "default"), "default");
        });
    }

    #[test]
    fn test_env_required_missing() {
        temp_env::with_var_unset("MAILQ_MISSING_REQUIRED", || {
            let err = env_required("MAILQ_MISSING_REQUIRED").unwrap_err();
            assert!(err.to_string().contains("MAILQ_MISSING_REQUIRED"));
            assert!(err.to_string().contains("required"));
        });
    }

    #[test]
    fn test_env_first_prefers_earlier_keys() {
        temp_env::with_vars(
            [("MAILQ_FIRST", Some("first")), ("MAILQ_SECOND", Some("second"))],
            || {
                assert_eq!(
                    env_first(&["MAILQ_FIRST", "MAILQ_SECOND"]).as_deref(),
                    Some("first")
                );
            },
        );
        temp_env::with_vars(
            [("MAILQ_FIRST", None), ("MAILQ_SECOND", Some("second"))],
            || {
                assert_eq!(
                    env_first(&["MAILQ_FIRST", "MAILQ_SECOND"]).as_deref(),
                    Some("second")
                );
            },
        );
    }

    #[test]
    fn test_env_parse() {
        temp_env::with_var("MAILQ_PARSE", Some(" 250 "), || {
            assert_eq!(env_parse("MAILQ_PARSE", 10u64).unwrap(), 250);
        });
        temp_env::with_var_unset("MAILQ_PARSE", || {
            assert_eq!(env_parse("MAILQ_PARSE", 10u64).unwrap(), 10);
        });
        temp_env::with_var("MAILQ_PARSE", Some("soon"), || {
            let err = env_parse("MAILQ_PARSE", 10u64).unwrap_err();
            assert!(matches!(err, ConfigError::ParseError { ref key, .. } if key == "MAILQ_PARSE"));
        });
    }

    #[test]
    fn test_env_flag() {
        temp_env::with_var("MAILQ_FLAG", Some("Yes"), || {
            assert!(env_flag("MAILQ_FLAG", false));
        });
        temp_env::with_var("MAILQ_FLAG", Some("0"), || {
            assert!(!env_flag("MAILQ_FLAG", true));
        });
        temp_env::with_var_unset("MAILQ_FLAG", || {
            assert!(env_flag("MAILQ_FLAG", true));
        });
    }
}
