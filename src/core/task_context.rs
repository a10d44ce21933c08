//! The handle a task body works through: current host, scoped context,
//! remote commands, sub-task invocation and the collaborators (templates,
//! confirmation). Every operation targets the host currently in scope.

use crate::{
    constants::LOCAL_HOST_ID,
    core::{
        context::{ContextStore, Key, Layer},
        dispatcher::Dispatcher,
        failure::{RunError, RunResult},
        poll::{self, PollPolicy},
        registry::HostRegistry,
        task::{InvocationReport, Overrides, TaskArgs},
    },
    models::{CommandOptions, CommandResult, Host, Value},
    system::{
        executor::{quote, quote_path},
        templates::{self, value_to_text},
    },
};
use colored::*;

/// Flags for placing a file on the current host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaceOptions {
    /// Command to run after the file changed (e.g. `service nginx reload`).
    pub reload: Option<String>,
    /// Overwrite a differing remote file without asking.
    pub force: bool,
    pub privileged: bool,
}

/// Flags for `upload_template`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateOptions {
    pub reload: bool,
    pub force: bool,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            reload: true,
            force: false,
        }
    }
}

impl TemplateOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Default::default()
        }
    }

    pub fn no_reload(mut self) -> Self {
        self.reload = false;
        self
    }
}

pub struct TaskContext<'a> {
    dispatcher: &'a Dispatcher,
    store: &'a ContextStore,
    task: &'a str,
    host: Host,
    args: &'a TaskArgs,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(
        dispatcher: &'a Dispatcher,
        store: &'a ContextStore,
        task: &'a str,
        host: Host,
        args: &'a TaskArgs,
    ) -> Self {
        Self {
            dispatcher,
            store,
            task,
            host,
            args,
        }
    }

    // --- Identity & arguments ---

    pub fn task_id(&self) -> &str {
        self.task
    }

    /// The host this invocation was dispatched to.
    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn host_id(&self) -> &str {
        &self.host.id
    }

    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name)
    }

    pub fn arg_flag(&self, name: &str) -> bool {
        self.args.flag(name)
    }

    pub fn registry(&self) -> &HostRegistry {
        self.dispatcher.registry()
    }

    /// Commands are only echoed and always report success with no output.
    pub fn is_dry_run(&self) -> bool {
        self.dispatcher.executor().is_dry_run()
    }

    // --- Context ---

    pub fn get(&self, key: impl Into<Key>) -> Option<Value> {
        self.store.get(&key.into())
    }

    pub fn get_str(&self, key: impl Into<Key>) -> Option<String> {
        self.store.get_str(&key.into())
    }

    pub fn require(&self, key: impl Into<Key>) -> RunResult<Value> {
        Ok(self.store.require(&key.into())?)
    }

    pub fn require_str(&self, key: impl Into<Key>) -> RunResult<String> {
        self.require(key).map(|v| value_to_text(&v))
    }

    /// Like `require`, naming the task that would have provided the setting.
    pub fn require_from(&self, key: impl Into<Key>, provided_by: &str) -> RunResult<Value> {
        let key = key.into();
        self.store.get(&key).ok_or_else(|| RunError::MissingConfig {
            key: key.name().to_string(),
            provided_by: Some(provided_by.to_string()),
        })
    }

    /// A setting as a list of strings; a scalar becomes a one-element list.
    pub fn get_list(&self, key: impl Into<Key>) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(items)) => items.iter().map(value_to_text).collect(),
            Some(other) => vec![value_to_text(&other)],
            None => Vec::new(),
        }
    }

    /// Fills `{{ key }}` tokens in `text` from the current context.
    pub fn render(&self, text: &str) -> RunResult<String> {
        Ok(templates::render_str(self.task, text, &self.store.snapshot())?)
    }

    // --- Scopes ---

    pub fn with_scope<T>(
        &mut self,
        overrides: Layer,
        f: impl FnOnce(&mut Self) -> RunResult<T>,
    ) -> RunResult<T> {
        let store = self.store;
        store
            .with_scope(overrides, || f(self))
            .map_err(RunError::from)
            .and_then(|result| result)
    }

    /// Operates as if filtered to `role`: sets the role and applies the
    /// role's own settings for the duration of `f`.
    pub fn with_role<T>(&mut self, role: &str, f: impl FnOnce(&mut Self) -> RunResult<T>) -> RunResult<T> {
        let mut layer = Layer::new();
        if let Some(vars) = self.registry().role_vars(role)? {
            layer.extend_vars(vars);
        }
        layer.set(Key::Role, role);
        self.with_scope(layer, f)
    }

    /// Re-targets commands issued inside `f` at `host`, with its attributes
    /// visible as settings.
    pub fn with_host<T>(&mut self, host: &str, f: impl FnOnce(&mut Self) -> RunResult<T>) -> RunResult<T> {
        let mut layer = Layer::new();
        layer.extend_vars(&self.registry().host(host)?.attributes);
        layer.set(Key::Host, host);
        self.with_scope(layer, f)
    }

    /// Runs every command inside `f` from `dir`.
    pub fn cd<T>(&mut self, dir: &str, f: impl FnOnce(&mut Self) -> RunResult<T>) -> RunResult<T> {
        self.with_scope(Layer::new().with(Key::Cwd, dir), f)
    }

    /// Prepends `command &&` to every command inside `f`. Prefixes nest.
    pub fn prefix<T>(&mut self, command: &str, f: impl FnOnce(&mut Self) -> RunResult<T>) -> RunResult<T> {
        self.with_scope(Layer::new().with(Key::Prefix, command), f)
    }

    /// Command failures inside `f` become warnings instead of aborting.
    pub fn warn_only<T>(&mut self, f: impl FnOnce(&mut Self) -> RunResult<T>) -> RunResult<T> {
        self.with_scope(Layer::new().with(Key::WarnOnly, true), f)
    }

    // --- Commands ---

    /// The host commands currently go to (honours `with_host`).
    pub fn current_host(&self) -> RunResult<Host> {
        match self.store.get_str(&Key::Host) {
            Some(id) if id == self.host.id => Ok(self.host.clone()),
            Some(id) if id != LOCAL_HOST_ID => self.registry().host(&id).cloned(),
            _ => Ok(Host::local()),
        }
    }

    fn compose(&self, command: &str) -> String {
        let mut parts = Vec::new();
        if let Some(dir) = self.store.get_str(&Key::Cwd) {
            parts.push(format!("cd {}", dir));
        }
        parts.extend(self.store.prefixes());
        parts.push(command.to_string());
        parts.join(" && ")
    }

    pub fn run(&self, command: &str) -> RunResult<CommandResult> {
        self.run_with(command, CommandOptions::default())
    }

    pub fn sudo(&self, command: &str) -> RunResult<CommandResult> {
        self.run_with(command, CommandOptions::privileged())
    }

    pub fn run_with(&self, command: &str, mut opts: CommandOptions) -> RunResult<CommandResult> {
        opts.warn_only |= self.store.is_true(&Key::WarnOnly);
        let composed = self.compose(command);
        let host = self.current_host()?;
        let executor = self.dispatcher.executor();
        if host.is_local() {
            executor.run_local(&composed, opts)
        } else {
            executor.run(&host, &composed, opts)
        }
    }

    /// Runs on the controlling machine regardless of the current host.
    pub fn local(&self, command: &str, mut opts: CommandOptions) -> RunResult<CommandResult> {
        opts.warn_only |= self.store.is_true(&Key::WarnOnly);
        self.dispatcher.executor().run_local(command, opts)
    }

    pub fn exists(&self, path: &str) -> RunResult<bool> {
        let result = self.run_with(
            &format!("test -e {}", quote_path(path)?),
            CommandOptions::default().quiet().warn_only(),
        )?;
        Ok(result.success)
    }

    /// Appends each line of `text` to `path` unless the file already has it.
    pub fn append(&self, path: &str, text: &str, privileged: bool) -> RunResult<()> {
        let path = quote_path(path)?;
        for line in text.lines() {
            let line = quote(line)?;
            let command = format!(
                "grep -qxF -- {line} {path} 2>/dev/null || echo {line} >> {path}"
            );
            self.run_with(
                &command,
                CommandOptions {
                    privileged,
                    quiet: true,
                    ..Default::default()
                },
            )?;
        }
        Ok(())
    }

    // --- Sub-tasks & run control ---

    pub fn invoke(&self, task_id: &str, overrides: &Overrides) -> RunResult<InvocationReport> {
        self.dispatcher.invoke_in(self.store, task_id, overrides)
    }

    /// Halts the whole run. Returns the error for the body to propagate:
    /// `return Err(ctx.abort("..."))`.
    pub fn abort(&self, message: &str) -> RunError {
        self.dispatcher.abort(message);
        RunError::ExplicitAbort(message.to_string())
    }

    pub fn confirm(&self, prompt: &str) -> RunResult<bool> {
        self.dispatcher.confirmer().confirm(prompt)
    }

    /// Asks `prompt`; a "no" halts the run with `UserAborted`.
    pub fn confirm_or_abort(&self, prompt: &str, message: &str) -> RunResult<()> {
        if self.confirm(prompt)? {
            return Ok(());
        }
        self.dispatcher.abort(message);
        Err(RunError::UserAborted(message.to_string()))
    }

    pub fn await_condition(
        &mut self,
        what: &str,
        policy: &PollPolicy,
        mut probe: impl FnMut(&mut Self) -> RunResult<bool>,
    ) -> RunResult<u32> {
        poll::await_condition(what, policy, || probe(self))
    }

    // --- Files ---

    /// Writes `bytes` to `path` on the current host. Without `force`, a
    /// differing existing file is only replaced after confirmation; an
    /// identical one is left alone and no reload happens.
    pub fn place(&self, path: &str, bytes: &[u8], opts: &PlaceOptions) -> RunResult<bool> {
        let host = self.current_host()?;
        let executor = self.dispatcher.executor();
        if !opts.force && !executor.is_dry_run() {
            let existing = self.run_with(
                &format!("cat {}", quote_path(path)?),
                CommandOptions {
                    privileged: opts.privileged,
                    quiet: true,
                    warn_only: true,
                    capture: true,
                },
            )?;
            if existing.success {
                if existing.stdout.as_bytes() == bytes {
                    println!("[{}] {} unchanged", host.id.cyan(), path);
                    return Ok(false);
                }
                let prompt = format!("{} on {} differs from the new version; overwrite?", path, host);
                self.confirm_or_abort(&prompt, &format!("not overwriting {} on {}", path, host))?;
            }
        }
        executor.put(&host, path, bytes, opts.privileged)?;
        if let Some(reload) = &opts.reload {
            self.run_with(
                reload,
                CommandOptions {
                    privileged: opts.privileged,
                    ..Default::default()
                },
            )?;
        }
        Ok(true)
    }

    /// Renders catalog template `name` against the current context and
    /// places it at the catalog's destination.
    pub fn upload_template(&self, name: &str, opts: TemplateOptions) -> RunResult<bool> {
        let renderer = self.dispatcher.templates();
        let spec = renderer.spec(name)?;
        let snapshot = self.store.snapshot();
        let bytes = renderer.render(name, &snapshot)?;
        let remote = templates::render_str(name, &spec.remote, &snapshot)?;
        let reload = match (&spec.reload, opts.reload) {
            (Some(cmd), true) => Some(templates::render_str(name, cmd, &snapshot)?),
            _ => None,
        };
        self.place(
            &remote,
            &bytes,
            &PlaceOptions {
                reload,
                force: opts.force,
                privileged: spec.sudo,
            },
        )
    }
}
