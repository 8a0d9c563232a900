//! Process configuration shared by the stream engine and its workers.
//!
//! Configuration is read once at startup into explicit structs that are then
//! passed by value into the components that need them. Nothing here keeps
//! global state besides the tracing subscriber.

pub mod tracing;

use std::env;
use std::fmt::Display;
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

/// Application environment (dev = local/kind, prod = full k8s)
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

/// Configuration that can be loaded from environment variables
pub trait FromEnv: Sized {
    fn from_env() -> Result<Self, ConfigError>;
}

/// Read an environment variable, falling back to `default` when unset
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read and parse an environment variable, using `default` when unset.
///
/// A variable that is set but does not parse is an error rather than a
/// silent fallback.
pub fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
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

/// Name and version of the running binary
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
}

/// [`AppInfo`] from the calling crate's Cargo metadata
#[macro_export]
macro_rules! app_info {
    () => {
        $crate::AppInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    };
}

/// Read the first set variable among `keys`.
pub fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| env::var(key).ok())
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
        temp_env::with_var("CFG_TEST_VAR", Some("set"), || {
            assert_eq!(env_or_default("CFG_TEST_VAR", "fallback"), "set");
        });
        temp_env::with_var_unset("CFG_TEST_VAR", || {
            assert_eq!(env_or_default("CFG_TEST_VAR", "fallback"), "fallback");
        });
    }

    #[test]
    fn test_env_parse_default_and_value() {
        temp_env::with_var_unset("CFG_PARSE_U64", || {
            assert_eq!(env_parse("CFG_PARSE_U64", 42u64).unwrap(), 42);
        });
        temp_env::with_var("CFG_PARSE_U64", Some(" 7 "), || {
            assert_eq!(env_parse("CFG_PARSE_U64", 42u64).unwrap(), 7);
        });
    }

    #[test]
    fn test_env_parse_invalid_is_error() {
        temp_env::with_var("CFG_PARSE_BAD", Some("seven"), || {
            let err = env_parse("CFG_PARSE_BAD", 1usize).unwrap_err();
            assert!(matches!(err, ConfigError::ParseError { ref key, .. } if key == "CFG_PARSE_BAD"));
        });
    }

    #[test]
    fn test_app_info_from_cargo() {
        let info = crate::app_info!();
        assert_eq!(info.name, "core_config");
        assert!(!info.version.is_empty());
    }

    #[test]
    fn test_env_first_prefers_earlier_keys() {
        temp_env::with_vars(
            [("CFG_FIRST_A", Some("a")), ("CFG_FIRST_B", Some("b"))],
            || {
                assert_eq!(env_first(&["CFG_FIRST_A", "CFG_FIRST_B"]).as_deref(), Some("a"));
            },
        );
        temp_env::with_vars(
            [("CFG_FIRST_A", None::<&str>), ("CFG_FIRST_B", Some("b"))],
            || {
                assert_eq!(env_first(&["CFG_FIRST_A", "CFG_FIRST_B"]).as_deref(), Some("b"));
            },
        );
    }
}
