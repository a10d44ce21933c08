//! Task registration records: identity, targeting and once-policy, built at
//! startup and never changed during a run.

use crate::core::failure::{RunError, RunResult};
use crate::core::task_context::TaskContext;
use crate::models::{OncePolicy, TargetRoles};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// What a task body hands back: an optional value for the invoking parent.
pub type TaskResult = RunResult<Option<String>>;

pub type TaskBody = Arc<dyn Fn(&mut TaskContext<'_>) -> TaskResult + Send + Sync>;

#[derive(Clone, Serialize)]
pub struct TaskDef {
    pub id: String,
    pub roles: TargetRoles,
    pub policy: OncePolicy,
    pub group: Option<String>,
    pub description: String,
    /// Names given to positional CLI arguments, in order.
    pub params: Vec<String>,
    #[serde(skip)]
    pub body: TaskBody,
}

impl TaskDef {
    pub fn new(
        id: impl Into<String>,
        roles: TargetRoles,
        policy: OncePolicy,
        body: impl Fn(&mut TaskContext<'_>) -> TaskResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            roles,
            policy,
            group: None,
            description: String::new(),
            params: Vec::new(),
            body: Arc::new(body),
        }
    }

    pub fn group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn params(mut self, names: &[&str]) -> Self {
        self.params = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

impl fmt::Debug for TaskDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDef")
            .field("id", &self.id)
            .field("roles", &self.roles)
            .field("policy", &self.policy)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// All tasks known to the run, by id.
#[derive(Debug, Clone, Default)]
pub struct TaskTable {
    tasks: BTreeMap<String, Arc<TaskDef>>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        id: &str,
        roles: TargetRoles,
        policy: OncePolicy,
        body: impl Fn(&mut TaskContext<'_>) -> TaskResult + Send + Sync + 'static,
    ) -> RunResult<()> {
        self.insert(TaskDef::new(id, roles, policy, body))
    }

    pub fn insert(&mut self, def: TaskDef) -> RunResult<()> {
        if self.tasks.contains_key(&def.id) {
            return Err(RunError::DuplicateTask(def.id));
        }
        self.tasks.insert(def.id.clone(), Arc::new(def));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Arc<TaskDef>> {
        self.tasks.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskDef> {
        self.tasks.values().map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Free-form `key=value` arguments given to an invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskArgs(BTreeMap<String, String>);

impl TaskArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// `y`, `yes`, `true` and `1` (any case) count as set.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| {
            matches!(v.to_ascii_lowercase().as_str(), "y" | "yes" | "true" | "1")
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-invocation targeting. An explicit host or role wins over the task's
/// declared roles; host wins over role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub host: Option<String>,
    pub role: Option<String>,
    pub args: TaskArgs,
}

impl Overrides {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            ..Default::default()
        }
    }

    pub fn role(role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            ..Default::default()
        }
    }

    pub fn arg(mut self, key: &str, value: &str) -> Self {
        self.args.insert(key, value);
        self
    }
}

/// Lifecycle of one task invocation on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    ResolvingTargets,
    Skipped,
    Running,
    Succeeded,
    Aborted,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TaskState::Pending => "pending",
            TaskState::ResolvingTargets => "resolving-targets",
            TaskState::Skipped => "skipped",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Aborted => "aborted",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ran(Option<String>),
    Skipped,
}

/// Per-host outcomes of one `invoke`, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationReport {
    pub task: String,
    pub outcomes: Vec<(String, Outcome)>,
}

impl InvocationReport {
    pub fn new(task: &str) -> Self {
        Self {
            task: task.to_string(),
            outcomes: Vec::new(),
        }
    }

    /// The value returned by the body on `host`, if it ran and returned one.
    pub fn value(&self, host: &str) -> Option<&str> {
        self.outcomes.iter().find_map(|(h, outcome)| match outcome {
            Outcome::Ran(Some(v)) if h == host => Some(v.as_str()),
            _ => None,
        })
    }

    pub fn ran_on(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, Outcome::Ran(_)))
            .map(|(h, _)| h.as_str())
            .collect()
    }

    pub fn skipped_on(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == Outcome::Skipped)
            .map(|(h, _)| h.as_str())
            .collect()
    }
}
