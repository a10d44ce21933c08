use crate::core::context::ContextError;
use thiserror::Error;

/// Every way a run can halt. Unless a caller opts into tolerating a failure
/// (`warn_only`), any of these unwinds all pending tasks on all hosts.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Unknown {kind} '{name}'.")]
    UnknownTarget { kind: &'static str, name: String },
    #[error("Task '{0}' is not registered.")]
    UnknownTask(String),
    #[error("Task '{0}' is registered twice.")]
    DuplicateTask(String),
    #[error("Required setting '{key}' is missing{}.", provided_by_hint(.provided_by))]
    MissingConfig {
        key: String,
        provided_by: Option<String>,
    },
    #[error(
        "Command '{command}' failed on {host} with exit code {}{}",
        .exit_code.map(|c| c.to_string()).unwrap_or_else(|| "<signal>".to_string()),
        stderr_hint(.stderr)
    )]
    RemoteCommandFailed {
        host: String,
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("Gave up waiting for {what} after {attempts} attempt(s).")]
    PollTimeout { what: String, attempts: u32 },
    #[error("{0}")]
    UserAborted(String),
    #[error("{0}")]
    ExplicitAbort(String),
    #[error("Run already aborted: {0}")]
    Aborted(String),
    #[error("Could not reach {host} to run '{command}': {source}")]
    Transport {
        host: String,
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Command could not be quoted for the remote shell: {0}")]
    CommandParse(String),
    #[error("Configuration error: {0}")]
    Config(#[from] crate::core::config_loader::ConfigError),
    #[error("Template error: {0}")]
    Template(#[from] crate::system::templates::TemplateError),
    #[error("Confirmation prompt failed: {0}")]
    Prompt(String),
    #[error("Context scope error: {0}")]
    Scope(ContextError),
}

fn provided_by_hint(provided_by: &Option<String>) -> String {
    match provided_by {
        Some(task) => format!(" (provided by '{}')", task),
        None => String::new(),
    }
}

fn stderr_hint(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        ".".to_string()
    } else {
        format!(":\n{}", trimmed)
    }
}

impl From<ContextError> for RunError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::MissingKey(key) => RunError::MissingConfig {
                key,
                provided_by: None,
            },
            other => RunError::Scope(other),
        }
    }
}

pub type RunResult<T> = Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_maps_to_missing_config() {
        let err: RunError = ContextError::MissingKey("target".to_string()).into();
        assert!(matches!(err, RunError::MissingConfig { ref key, .. } if key == "target"));
        assert_eq!(err.to_string(), "Required setting 'target' is missing.");
    }

    #[test]
    fn test_remote_failure_message_names_command_host_and_code() {
        let err = RunError::RemoteCommandFailed {
            host: "a1".to_string(),
            command: "false".to_string(),
            exit_code: Some(1),
            stderr: String::new(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'false'"));
        assert!(msg.contains("a1"));
        assert!(msg.contains("exit code 1"));
    }
}
