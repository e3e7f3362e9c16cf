//! Environment variable loading utilities

use crate::{Result, ToolingError};
use std::env;
use std::str::FromStr;

/// Read an environment variable.
///
/// Returns `Ok(None)` when unset and an error when the value is not valid UTF-8.
pub fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ToolingError::Config(format!(
            "{} is not valid UTF-8",
            key
        ))),
    }
}

/// Read and parse an environment variable.
///
/// A set-but-unparsable value is an error rather than silently ignored.
pub fn get_env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key)?
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ToolingError::Config(format!("{}={:?}: {}", key, raw, e)))
        })
        .transpose()
}

/// Read and parse an environment variable, falling back to `default` when unset
pub fn get_env_parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(get_env_parse(key)?.unwrap_or(default))
}

/// `build_env_key("RESCUEGRAPH_", "max_instances")` is `RESCUEGRAPH_MAX_INSTANCES`
pub fn build_env_key(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name.to_ascii_uppercase())
}
