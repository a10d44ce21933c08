// src/models.rs

use crate::constants::{
    DEFAULT_SHELL, DEFAULT_SSH_PROGRAM, DEFAULT_TEMPLATE_CONFIG, DEFAULT_TEMPLATE_DIR,
    LOCAL_HOST_ID,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A free-form context value. Configuration, host attributes and template
/// variables all share the TOML value model.
pub type Value = toml::Value;

// --- `deployx.toml` MODELS (What is read from the configuration file) ---

/// Represents the deserialized structure of a `deployx.toml` file.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct DeployConfig {
    #[serde(default)]
    pub options: OptionsConfig,
    #[serde(default)]
    pub roles: BTreeMap<String, RoleConfig>,
    #[serde(default)]
    pub hosts: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OptionsConfig {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_ssh_program")]
    pub ssh_program: String,
    #[serde(default)]
    pub ssh_options: Vec<String>,
    #[serde(default = "default_true")]
    pub use_ssh_config: bool,
    #[serde(default = "default_template_dir")]
    pub template_dir: String,
    #[serde(default = "default_template_config")]
    pub template_config: String,
    #[serde(default)]
    pub parallel: bool,
}

impl Default for OptionsConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            ssh_program: default_ssh_program(),
            ssh_options: Vec::new(),
            use_ssh_config: true,
            template_dir: default_template_dir(),
            template_config: default_template_config(),
            parallel: false,
        }
    }
}

fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}

fn default_ssh_program() -> String {
    DEFAULT_SSH_PROGRAM.to_string()
}

fn default_template_dir() -> String {
    DEFAULT_TEMPLATE_DIR.to_string()
}

fn default_template_config() -> String {
    DEFAULT_TEMPLATE_CONFIG.to_string()
}

fn default_true() -> bool {
    true
}

/// A role in `deployx.toml`. Uses `untagged` for flexible syntax:
/// `app = ["a1", "a2"]` or `[roles.app] hosts = [...] vars = {...}`.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum RoleConfig {
    Hosts(Vec<String>),
    Detailed {
        hosts: Vec<String>,
        #[serde(default)]
        vars: BTreeMap<String, Value>,
    },
}

impl RoleConfig {
    pub fn hosts(&self) -> &[String] {
        match self {
            RoleConfig::Hosts(hosts) | RoleConfig::Detailed { hosts, .. } => hosts,
        }
    }

    pub fn vars(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            RoleConfig::Hosts(_) => None,
            RoleConfig::Detailed { vars, .. } => Some(vars),
        }
    }
}

/// A named deployment target whose tables are merged over the top-level ones.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct TargetConfig {
    #[serde(default)]
    pub roles: BTreeMap<String, RoleConfig>,
    #[serde(default)]
    pub hosts: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,
}

// --- RUNTIME MODELS ---

/// A target machine: an identifier (address or ssh_config alias) plus its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Host {
    pub id: String,
    pub attributes: BTreeMap<String, Value>,
}

impl Host {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// The pseudo-host standing for the controlling machine.
    pub fn local() -> Self {
        Self::new(LOCAL_HOST_ID)
    }

    pub fn is_local(&self) -> bool {
        self.id == LOCAL_HOST_ID
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }

    /// Network address to connect to; falls back to the identifier so that
    /// ssh_config aliases keep working.
    pub fn address(&self) -> &str {
        self.attr_str("address").unwrap_or(&self.id)
    }

    pub fn user(&self) -> Option<&str> {
        self.attr_str("user")
    }

    pub fn port(&self) -> Option<i64> {
        self.attributes.get("port").and_then(Value::as_integer)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// How often a task body may execute within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OncePolicy {
    None,
    OncePerHost,
    OnceGlobally,
}

impl fmt::Display for OncePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OncePolicy::None => "none",
            OncePolicy::OncePerHost => "once-per-host",
            OncePolicy::OnceGlobally => "once-globally",
        })
    }
}

/// The hosts a task targets when invoked without an explicit override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetRoles {
    /// Every configured role.
    All,
    Roles(Vec<String>),
    /// No declared roles: the enclosing scope's host, or the controlling machine.
    Unbound,
}

/// Flags accepted by the remote command executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandOptions {
    pub privileged: bool,
    pub quiet: bool,
    pub warn_only: bool,
    pub capture: bool,
}

impl CommandOptions {
    pub fn privileged() -> Self {
        Self {
            privileged: true,
            ..Default::default()
        }
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn warn_only(mut self) -> Self {
        self.warn_only = true;
        self
    }

    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }
}

/// Outcome of a single command on a single host.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub host: String,
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandResult {
    /// Trimmed stdout, which is what callers compare against most of the time.
    pub fn output(&self) -> &str {
        self.stdout.trim()
    }
}
