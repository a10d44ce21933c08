//! # Config Loader
//!
//! Reads `deployx.toml` once at startup and turns it into the read-only
//! snapshot the run works from: the base context layer and the host registry.
//! Selecting a target merges its tables over the top-level ones.

use crate::{
    constants::{CONFIG_ENV_VAR, DEFAULT_CONFIG_FILENAME},
    core::context::{Key, Layer},
    models::{DeployConfig, Value},
};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read configuration file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse '{path}': {source}")]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Unknown target '{0}'. Known targets: {1}")]
    UnknownTarget(String, String),
    #[error("Invalid assignment '{0}': expected key=value.")]
    InvalidAssignment(String),
}

/// Picks the configuration file: explicit path, then `$DEPLOYX_CONFIG`, then
/// `deployx.toml` in the working directory. `~` and `$VARS` are expanded.
pub fn resolve_config_path(explicit: Option<&str>) -> PathBuf {
    let raw = explicit
        .map(str::to_string)
        .or_else(|| env::var(CONFIG_ENV_VAR).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_FILENAME.to_string());
    let expanded = shellexpand::full(&raw)
        .map(|s| s.into_owned())
        .unwrap_or(raw);
    PathBuf::from(expanded)
}

pub fn load_config(path: &Path) -> Result<DeployConfig, ConfigError> {
    log::debug!("Loading configuration from {}", path.display());
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(path, &content)
}

pub fn parse_config(path: &Path, content: &str) -> Result<DeployConfig, ConfigError> {
    toml::from_str(content).map_err(|source| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Merges target `name` over the top-level tables. Roles are replaced
/// whole; host attributes and vars are merged key by key.
pub fn apply_target(config: &mut DeployConfig, name: &str) -> Result<(), ConfigError> {
    let Some(target) = config.targets.get(name).cloned() else {
        let known: Vec<&str> = config.targets.keys().map(String::as_str).collect();
        return Err(ConfigError::UnknownTarget(name.to_string(), known.join(", ")));
    };
    log::debug!("Applying target '{}'", name);
    config.roles.extend(target.roles);
    for (host, attributes) in target.hosts {
        config.hosts.entry(host).or_default().extend(attributes);
    }
    config.vars.extend(target.vars);
    Ok(())
}

/// Parses a `--set key=value` assignment. Booleans, integers, arrays and
/// inline tables are read as TOML literals (`workers=4`, `debug=true`,
/// `pkgs=["a","b"]`); anything else, floats included, stays the exact
/// string given so versions like `9.10` keep their digits.
pub fn parse_assignment(raw: &str) -> Result<(String, Value), ConfigError> {
    let (key, value) = raw
        .split_once('=')
        .filter(|(k, _)| !k.trim().is_empty())
        .ok_or_else(|| ConfigError::InvalidAssignment(raw.to_string()))?;
    let parsed = toml::from_str::<toml::Table>(&format!("v = {}", value))
        .ok()
        .and_then(|mut table| table.remove("v"))
        .filter(|v| {
            matches!(
                v,
                Value::Boolean(_) | Value::Integer(_) | Value::Array(_) | Value::Table(_)
            )
        })
        .unwrap_or_else(|| Value::String(value.to_string()));
    Ok((key.trim().to_string(), parsed))
}

/// The outermost context layer: global vars, the selected target, then
/// command-line overrides.
pub fn base_layer(config: &DeployConfig, target: Option<&str>, sets: &[(String, Value)]) -> Layer {
    let mut layer = Layer::new();
    layer.extend_vars(&config.vars);
    if let Some(target) = target {
        layer.set(Key::Target, target);
    }
    for (key, value) in sets {
        layer.set(key.as_str(), value.clone());
    }
    layer
}
