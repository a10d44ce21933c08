// src/system/transport.rs

//! Process plumbing for reaching hosts. The engine only sees the `Transport`
//! trait; `SshTransport` shells out to the system `ssh` client (so
//! `~/.ssh/config` aliases, agents and keys all apply) and `LocalTransport`
//! runs on the controlling machine.

use crate::models::{Host, OptionsConfig};
use std::io::{self, Write};
use std::process::{Command as StdCommand, Stdio};

/// What to do with the child's output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Pipe stdout and stderr back to the caller.
    Capture,
    /// Stream straight to the operator's terminal.
    Inherit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RawOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// The capability to run an already-shell-wrapped command line on a host.
pub trait Transport: Send + Sync {
    fn exec(
        &self,
        host: &Host,
        command_line: &str,
        input: Option<&[u8]>,
        mode: OutputMode,
    ) -> io::Result<RawOutput>;
}

#[derive(Debug, Clone)]
pub struct SshTransport {
    program: String,
    options: Vec<String>,
    use_ssh_config: bool,
}

impl SshTransport {
    pub fn from_options(options: &OptionsConfig) -> Self {
        Self {
            program: options.ssh_program.clone(),
            options: options.ssh_options.clone(),
            use_ssh_config: options.use_ssh_config,
        }
    }

    pub fn ssh_args(&self, host: &Host, command_line: &str) -> Vec<String> {
        let mut args = Vec::new();
        if !self.use_ssh_config {
            args.push("-F".to_string());
            args.push("/dev/null".to_string());
        }
        args.extend(self.options.iter().cloned());
        if let Some(port) = host.port() {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(user) = host.user() {
            args.push("-l".to_string());
            args.push(user.to_string());
        }
        args.push(host.address().to_string());
        args.push(command_line.to_string());
        args
    }
}

impl Transport for SshTransport {
    fn exec(
        &self,
        host: &Host,
        command_line: &str,
        input: Option<&[u8]>,
        mode: OutputMode,
    ) -> io::Result<RawOutput> {
        let mut command = StdCommand::new(&self.program);
        command.args(self.ssh_args(host, command_line));
        log::trace!("Spawning {} for {}: {}", self.program, host, command_line);
        run_process(command, input, mode)
    }
}

/// Runs commands on the controlling machine through `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn exec(
        &self,
        _host: &Host,
        command_line: &str,
        input: Option<&[u8]>,
        mode: OutputMode,
    ) -> io::Result<RawOutput> {
        let mut command = StdCommand::new("sh");
        command.arg("-c").arg(command_line);
        log::trace!("Spawning local shell: {}", command_line);
        run_process(command, input, mode)
    }
}

fn run_process(mut command: StdCommand, input: Option<&[u8]>, mode: OutputMode) -> io::Result<RawOutput> {
    let (out, err) = match mode {
        OutputMode::Capture => (Stdio::piped(), Stdio::piped()),
        OutputMode::Inherit => (Stdio::inherit(), Stdio::inherit()),
    };
    command
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(out)
        .stderr(err);

    let mut child = command.spawn()?;
    if let Some(bytes) = input
        && let Some(mut stdin) = child.stdin.take()
    {
        stdin.write_all(bytes)?;
        // Dropping stdin closes the pipe so the remote `cat`/`tee` sees EOF.
    }
    let output = child.wait_with_output()?;
    Ok(RawOutput {
        exit_code: output.status.code(),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

#[cfg(test)]
pub(crate) mod fake {
    //! Scripted transport for engine tests: records every command line and
    //! answers from a list of (substring, exit code, stdout) rules.

    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Issued {
        pub host: String,
        pub command_line: String,
        pub input: Option<Vec<u8>>,
    }

    #[derive(Debug, Default)]
    pub struct FakeTransport {
        rules: Mutex<Vec<(String, i32, String)>>,
        issued: Mutex<Vec<Issued>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Any command line containing `needle` exits with `code` and prints `stdout`.
        /// Later rules win.
        pub fn on(&self, needle: &str, code: i32, stdout: &str) {
            self.rules
                .lock()
                .unwrap()
                .push((needle.to_string(), code, stdout.to_string()));
        }

        pub fn issued(&self) -> Vec<Issued> {
            self.issued.lock().unwrap().clone()
        }

        pub fn issued_on(&self, host: &str) -> Vec<String> {
            self.issued()
                .into_iter()
                .filter(|i| i.host == host)
                .map(|i| i.command_line)
                .collect()
        }
    }

    impl Transport for FakeTransport {
        fn exec(
            &self,
            host: &Host,
            command_line: &str,
            input: Option<&[u8]>,
            _mode: OutputMode,
        ) -> io::Result<RawOutput> {
            self.issued.lock().unwrap().push(Issued {
                host: host.id.clone(),
                command_line: command_line.to_string(),
                input: input.map(<[u8]>::to_vec),
            });
            let rules = self.rules.lock().unwrap();
            let (code, stdout) = rules
                .iter()
                .rev()
                .find(|(needle, _, _)| command_line.contains(needle.as_str()))
                .map(|(_, code, out)| (*code, out.clone()))
                .unwrap_or((0, String::new()));
            Ok(RawOutput {
                exit_code: Some(code),
                stdout: stdout.into_bytes(),
                stderr: Vec::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;

    #[test]
    fn test_ssh_args_use_host_attributes() {
        let options = OptionsConfig {
            ssh_options: vec!["-o".into(), "BatchMode=yes".into()],
            use_ssh_config: false,
            ..Default::default()
        };
        let transport = SshTransport::from_options(&options);
        let mut host = Host::new("app1");
        host.attributes.insert("address".into(), Value::from("10.0.0.5"));
        host.attributes.insert("user".into(), Value::from("ubuntu"));
        host.attributes.insert("port".into(), Value::Integer(2222));

        let args = transport.ssh_args(&host, "uptime");
        assert_eq!(
            args,
            vec![
                "-F", "/dev/null", "-o", "BatchMode=yes", "-p", "2222", "-l", "ubuntu",
                "10.0.0.5", "uptime"
            ]
        );
    }

    #[test]
    fn test_ssh_args_fall_back_to_alias() {
        let transport = SshTransport::from_options(&OptionsConfig::default());
        let args = transport.ssh_args(&Host::new("web-alias"), "true");
        assert_eq!(args, vec!["web-alias", "true"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_local_transport_captures_and_feeds_stdin() {
        let out = LocalTransport
            .exec(&Host::local(), "cat; exit 3", Some(b"hello"), OutputMode::Capture)
            .unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout, b"hello");
        assert!(!out.success());
    }
}
