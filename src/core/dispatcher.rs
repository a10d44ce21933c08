//! # Dispatcher
//!
//! Resolves the hosts a task runs on, opens a host-scoped context for each,
//! and passes the body through the execution gate. Bodies may invoke other
//! tasks through their `TaskContext`; nested invocations share the same
//! context stack, gate and abort signal.

use crate::{
    constants::LOCAL_HOST_ID,
    core::{
        abort::AbortHandle,
        context::{ContextStore, Key, Layer},
        failure::{RunError, RunResult},
        gate::{ExecutionGate, Gated},
        registry::HostRegistry,
        task::{InvocationReport, Outcome, Overrides, TaskArgs, TaskDef, TaskState, TaskTable},
        task_context::TaskContext,
    },
    models::{Host, TargetRoles},
    system::{
        confirm::{Confirmer, PromptConfirmer},
        executor::RemoteExecutor,
        templates::{FsTemplates, TemplateRenderer},
    },
};
use rayon::prelude::*;
use std::sync::Arc;

pub struct Dispatcher {
    tasks: TaskTable,
    registry: Arc<HostRegistry>,
    gate: Arc<ExecutionGate>,
    executor: RemoteExecutor,
    context: ContextStore,
    templates: Arc<dyn TemplateRenderer>,
    confirmer: Arc<dyn Confirmer>,
    abort: AbortHandle,
    parallel: bool,
}

impl Dispatcher {
    /// The abort signal is taken from the executor so that command failures
    /// and task-initiated aborts halt the same run.
    pub fn new(
        tasks: TaskTable,
        registry: HostRegistry,
        executor: RemoteExecutor,
        context: ContextStore,
    ) -> Self {
        let abort = executor.abort_handle().clone();
        Self {
            tasks,
            registry: Arc::new(registry),
            gate: Arc::new(ExecutionGate::new()),
            executor,
            context,
            templates: Arc::new(FsTemplates::default()),
            confirmer: Arc::new(PromptConfirmer),
            abort,
            parallel: false,
        }
    }

    pub fn with_templates(mut self, templates: Arc<dyn TemplateRenderer>) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_confirmer(mut self, confirmer: Arc<dyn Confirmer>) -> Self {
        self.confirmer = confirmer;
        self
    }

    /// One worker per host for every invocation with more than one target.
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &ExecutionGate {
        &self.gate
    }

    pub fn context(&self) -> &ContextStore {
        &self.context
    }

    pub(crate) fn executor(&self) -> &RemoteExecutor {
        &self.executor
    }

    pub(crate) fn templates(&self) -> &dyn TemplateRenderer {
        &*self.templates
    }

    pub(crate) fn confirmer(&self) -> &dyn Confirmer {
        &*self.confirmer
    }

    pub fn abort_handle(&self) -> &AbortHandle {
        &self.abort
    }

    /// Stops all further task execution for this run. Idempotent.
    pub fn abort(&self, message: &str) {
        self.abort.trigger(message);
    }

    pub fn invoke(&self, task_id: &str, overrides: &Overrides) -> RunResult<InvocationReport> {
        self.invoke_in(&self.context, task_id, overrides)
    }

    pub(crate) fn invoke_in(
        &self,
        store: &ContextStore,
        task_id: &str,
        overrides: &Overrides,
    ) -> RunResult<InvocationReport> {
        self.ensure_not_aborted()?;
        log::debug!("[{}] {}", task_id, TaskState::Pending);
        let task = self
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| RunError::UnknownTask(task_id.to_string()))?;

        log::debug!("[{}] {}", task_id, TaskState::ResolvingTargets);
        let targets = self.resolve_targets(store, &task, overrides)?;
        log::debug!(
            "[{}] targets: {:?}",
            task_id,
            targets.iter().map(|h| h.id.as_str()).collect::<Vec<_>>()
        );

        let mut report = InvocationReport::new(task_id);
        if self.parallel && targets.len() > 1 {
            let results: Vec<RunResult<(String, Outcome)>> = targets
                .par_iter()
                .map(|host| {
                    let worker = store.fork();
                    self.ensure_not_aborted()?;
                    self.run_on(&worker, &task, host, overrides)
                        .map(|outcome| (host.id.clone(), outcome))
                })
                .collect();
            for result in results {
                report.outcomes.push(result?);
            }
        } else {
            for host in &targets {
                self.ensure_not_aborted()?;
                let outcome = self.run_on(store, &task, host, overrides)?;
                report.outcomes.push((host.id.clone(), outcome));
            }
        }
        Ok(report)
    }

    fn ensure_not_aborted(&self) -> RunResult<()> {
        if self.abort.is_triggered() {
            return Err(RunError::Aborted(self.abort.message().unwrap_or_default()));
        }
        Ok(())
    }

    fn resolve_targets(
        &self,
        store: &ContextStore,
        task: &TaskDef,
        overrides: &Overrides,
    ) -> RunResult<Vec<Host>> {
        if let Some(host) = &overrides.host {
            if host == LOCAL_HOST_ID {
                return Ok(vec![Host::local()]);
            }
            return Ok(vec![self.registry.host(host)?.clone()]);
        }
        if let Some(role) = &overrides.role {
            return Ok(self.registry.resolve(role)?.into_iter().cloned().collect());
        }
        let hosts = match &task.roles {
            TargetRoles::All => self.registry.resolve_all(),
            TargetRoles::Roles(roles) => {
                let names: Vec<&str> = roles.iter().map(String::as_str).collect();
                self.registry.resolve_many(&names)?
            }
            TargetRoles::Unbound => {
                return match store.get_str(&Key::Host) {
                    Some(id) if id != LOCAL_HOST_ID => Ok(vec![self.registry.host(&id)?.clone()]),
                    _ => Ok(vec![Host::local()]),
                };
            }
        };
        Ok(hosts.into_iter().cloned().collect())
    }

    fn host_layer(&self, host: &Host, overrides: &Overrides) -> Layer {
        let mut layer = Layer::new();
        layer.extend_vars(&host.attributes);
        layer.set(Key::Host, host.id.as_str());
        let role = overrides
            .role
            .as_deref()
            .or_else(|| self.registry.role_of(&host.id));
        if let Some(role) = role {
            layer.set(Key::Role, role);
        }
        layer
    }

    fn run_on(
        &self,
        store: &ContextStore,
        task: &TaskDef,
        host: &Host,
        overrides: &Overrides,
    ) -> RunResult<Outcome> {
        let args: &TaskArgs = &overrides.args;
        let layer = self.host_layer(host, overrides);
        let gated = self.gate.run_once(&task.id, &host.id, task.policy, || {
            log::debug!("[{}@{}] {}", task.id, host.id, TaskState::Running);
            let scoped = store.with_scope(layer, || {
                let mut ctx = TaskContext::new(self, store, &task.id, host.clone(), args);
                (task.body)(&mut ctx)
            });
            scoped.map_err(RunError::from).and_then(|result| result)
        });

        match gated {
            Ok(Gated::Ran(value)) => {
                log::debug!("[{}@{}] {}", task.id, host.id, TaskState::Succeeded);
                Ok(Outcome::Ran(value))
            }
            Ok(Gated::Skipped) => {
                log::debug!("[{}@{}] {}", task.id, host.id, TaskState::Skipped);
                Ok(Outcome::Skipped)
            }
            Err(err) => {
                log::debug!("[{}@{}] {}: {}", task.id, host.id, TaskState::Aborted, err);
                // A halt raised elsewhere belongs to the site that raised it.
                if !matches!(err, RunError::Aborted(_)) {
                    self.abort.trigger(err.to_string());
                    let host_id = (!host.is_local()).then_some(host.id.as_str());
                    self.abort.locate(&task.id, host_id);
                }
                Err(err)
            }
        }
    }
}
