// src/system/executor.rs

use crate::{
    constants::SUDO_PROMPT,
    core::{
        abort::AbortHandle,
        failure::{RunError, RunResult},
    },
    models::{CommandOptions, CommandResult, Host},
    system::transport::{LocalTransport, OutputMode, Transport},
};
use colored::*;
use std::sync::Arc;

/// Issues shell commands on target hosts (or locally) and turns non-zero
/// exits into run aborts unless the caller tolerates them with `warn_only`.
#[derive(Clone)]
pub struct RemoteExecutor {
    remote: Arc<dyn Transport>,
    local: Arc<dyn Transport>,
    shell: String,
    abort: AbortHandle,
    dry_run: bool,
}

impl RemoteExecutor {
    pub fn new(remote: Arc<dyn Transport>, shell: impl Into<String>, abort: AbortHandle) -> Self {
        Self {
            remote,
            local: Arc::new(LocalTransport),
            shell: shell.into(),
            abort,
            dry_run: false,
        }
    }

    pub fn with_local(mut self, local: Arc<dyn Transport>) -> Self {
        self.local = local;
        self
    }

    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Runs `command` on `host`.
    pub fn run(&self, host: &Host, command: &str, opts: CommandOptions) -> RunResult<CommandResult> {
        let line = self.wrap(command, opts.privileged)?;
        let verb = if opts.privileged { "sudo" } else { "run" };
        self.dispatch(&*self.remote, host, verb, command, &line, None, opts)
    }

    /// Runs `command` on the controlling machine, with the same options.
    pub fn run_local(&self, command: &str, opts: CommandOptions) -> RunResult<CommandResult> {
        let line = if opts.privileged {
            format!("sudo {}", command)
        } else {
            command.to_string()
        };
        self.dispatch(&*self.local, &Host::local(), "local", command, &line, None, opts)
    }

    /// Writes `bytes` to `path` on `host` by streaming them to `cat`/`tee`.
    pub fn put(&self, host: &Host, path: &str, bytes: &[u8], privileged: bool) -> RunResult<CommandResult> {
        let quoted = quote_path(path)?;
        let command = if privileged {
            format!("tee {} >/dev/null", quoted)
        } else {
            format!("cat > {}", quoted)
        };
        let line = self.wrap(&command, privileged)?;
        let opts = CommandOptions {
            privileged,
            quiet: true,
            ..Default::default()
        };
        println!("[{}] {}: {}", host.id.cyan(), "put".bold(), path);
        self.dispatch(&*self.remote, host, "put", &command, &line, Some(bytes), opts)
    }

    /// `/bin/bash -l -c '<command>'`, optionally under `sudo`.
    fn wrap(&self, command: &str, privileged: bool) -> RunResult<String> {
        let wrapped = format!("{} {}", self.shell, quote(command)?);
        if privileged {
            Ok(format!("sudo -S -p {} {}", quote(SUDO_PROMPT)?, wrapped))
        } else {
            Ok(wrapped)
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch(
        &self,
        transport: &dyn Transport,
        host: &Host,
        verb: &str,
        command: &str,
        line: &str,
        input: Option<&[u8]>,
        opts: CommandOptions,
    ) -> RunResult<CommandResult> {
        if self.abort.is_triggered() {
            return Err(RunError::Aborted(self.abort.message().unwrap_or_default()));
        }
        if !opts.quiet {
            println!("[{}] {}: {}", host.id.cyan(), verb.bold(), command.green());
        }
        if self.dry_run {
            return Ok(CommandResult {
                host: host.id.clone(),
                command: command.to_string(),
                exit_code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
                success: true,
            });
        }

        let mode = match (opts.capture, opts.quiet) {
            (true, _) => OutputMode::Capture,
            (false, false) => OutputMode::Inherit,
            // Quiet callers still get stderr for the failure message.
            (false, true) => OutputMode::Capture,
        };
        let raw = transport
            .exec(host, line, input, mode)
            .map_err(|source| RunError::Transport {
                host: host.id.clone(),
                command: command.to_string(),
                source,
            })?;

        let result = CommandResult {
            host: host.id.clone(),
            command: command.to_string(),
            exit_code: raw.exit_code,
            success: raw.success(),
            stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
        };
        if opts.capture && !opts.quiet && !result.stdout.trim().is_empty() {
            for line in result.stdout.lines() {
                println!("[{}] out: {}", host.id.cyan(), line);
            }
        }

        if result.success {
            return Ok(result);
        }
        if opts.warn_only {
            match tolerated_failure_warning(&result, opts) {
                Some(warning) => eprintln!("{}", warning),
                None => log::debug!("[{}] tolerated failure of '{}'", host.id, command),
            }
            return Ok(result);
        }

        let err = RunError::RemoteCommandFailed {
            host: host.id.clone(),
            command: command.to_string(),
            exit_code: result.exit_code,
            stderr: result.stderr,
        };
        self.abort.trigger(err.to_string());
        Err(err)
    }
}

/// Single-word shell quoting for paths and arguments.
pub(crate) fn quote(text: &str) -> RunResult<String> {
    shlex::try_quote(text)
        .map(|q| q.into_owned())
        .map_err(|_| RunError::CommandParse(text.to_string()))
}

/// Like `quote`, but leaves a leading `~/` outside the quotes so the remote
/// shell still expands it.
pub(crate) fn quote_path(path: &str) -> RunResult<String> {
    match path.strip_prefix("~/") {
        Some(rest) => Ok(format!("~/{}", quote(rest)?)),
        None => quote(path),
    }
}

/// The operator-facing line for a failure the caller tolerates. Quiet
/// commands (checks like `test -e` or `cat`) fail silently.
fn tolerated_failure_warning(result: &CommandResult, opts: CommandOptions) -> Option<String> {
    (!opts.quiet).then(|| {
        format!(
            "[{}] {}: '{}' exited with {}",
            result.host.cyan(),
            "Warning".yellow().bold(),
            result.command,
            describe_code(result.exit_code)
        )
    })
}

fn describe_code(code: Option<i32>) -> String {
    code.map(|c| format!("code {}", c))
        .unwrap_or_else(|| "a signal".to_string())
}
