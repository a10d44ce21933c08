// src/constants.rs

/// The configuration file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILENAME: &str = "deployx.toml";

/// Environment variable that overrides the default configuration path.
pub const CONFIG_ENV_VAR: &str = "DEPLOYX_CONFIG";

/// Shell used to wrap every remote command unless `options.shell` says otherwise.
pub const DEFAULT_SHELL: &str = "/bin/bash -l -c";

/// SSH client binary used by the default transport.
pub const DEFAULT_SSH_PROGRAM: &str = "ssh";

/// Directory (relative to the config file) holding template sources.
pub const DEFAULT_TEMPLATE_DIR: &str = "templates";

/// Template catalog file name, inside the template directory.
pub const DEFAULT_TEMPLATE_CONFIG: &str = "templates.toml";

/// Gate/host identifier used when a task runs on the controlling machine.
pub const LOCAL_HOST_ID: &str = "<local>";

/// Prompt passed to `sudo -p` so password requests are recognisable in output.
pub const SUDO_PROMPT: &str = "sudo password:";
