// src/cli/args.rs

use crate::core::{
    failure::RunError,
    task::{Overrides, TaskTable},
};
use anyhow::{Result, bail};

/// One `task[:value,key=value,...]` item from the command line.
///
/// - Bare values fill the task's declared parameters in order.
/// - `host=<id>` and `role=<name>` target this invocation only.
/// - `\,` and `\=` keep a literal comma or equals sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInvocation {
    pub task: String,
    pub overrides: Overrides,
}

pub fn parse_invocation(spec: &str, tasks: &TaskTable) -> Result<TaskInvocation> {
    let (name, raw_args) = match spec.split_once(':') {
        Some((name, rest)) => (name, Some(rest)),
        None => (spec, None),
    };
    let def = tasks
        .get(name)
        .ok_or_else(|| RunError::UnknownTask(name.to_string()))?;

    let mut overrides = Overrides::none();
    let mut positional = 0;
    for item in raw_args.map(split_items).unwrap_or_default() {
        if item.is_empty() {
            continue;
        }
        match split_key_value(&item) {
            (Some(key), value) if key == "host" => overrides.host = Some(value),
            (Some(key), value) if key == "role" => overrides.role = Some(value),
            (Some(key), value) => overrides.args.insert(key, value),
            (None, value) => {
                let Some(param) = def.params.get(positional) else {
                    bail!(
                        "Task '{}' takes {} positional argument(s), got '{}' as argument #{}.",
                        name,
                        def.params.len(),
                        value,
                        positional + 1
                    );
                };
                overrides.args.insert(param.clone(), value);
                positional += 1;
            }
        }
    }
    if overrides.host.is_some() && overrides.role.is_some() {
        bail!("Task '{}' was given both host= and role=; pick one.", name);
    }
    log::trace!("Parsed '{}' into {:?}", spec, overrides);
    Ok(TaskInvocation {
        task: name.to_string(),
        overrides,
    })
}

/// Splits on unescaped commas. Other escapes are left for `split_key_value`.
fn split_items(raw: &str) -> Vec<String> {
    let mut items = vec![String::new()];
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        let current = items.last_mut().expect("items is never empty");
        match c {
            '\\' => match chars.next() {
                Some(',') => current.push(','),
                Some(next) => {
                    current.push('\\');
                    current.push(next);
                }
                None => current.push('\\'),
            },
            ',' => items.push(String::new()),
            other => current.push(other),
        }
    }
    items
}

/// Splits on the first unescaped `=`, unescaping `\=` on both sides.
fn split_key_value(item: &str) -> (Option<String>, String) {
    let mut key = None;
    let mut current = String::new();
    let mut chars = item.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('=') => current.push('='),
                Some(next) => {
                    current.push('\\');
                    current.push(next);
                }
                None => current.push('\\'),
            },
            '=' if key.is_none() => key = Some(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    (key, current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook;

    fn table() -> TaskTable {
        let mut table = TaskTable::new();
        playbook::register_all(&mut table).unwrap();
        table
    }

    #[test]
    fn test_bare_task() {
        let inv = parse_invocation("deploy_app", &table()).unwrap();
        assert_eq!(inv.task, "deploy_app");
        assert_eq!(inv.overrides, Overrides::none());
    }

    #[test]
    fn test_positional_values_fill_params_in_order() {
        let inv = parse_invocation("service:nginx,start", &table()).unwrap();
        assert_eq!(inv.overrides.args.get("script"), Some("nginx"));
        assert_eq!(inv.overrides.args.get("command"), Some("start"));
        assert_eq!(inv.overrides.args.get("maxwait"), None);
    }

    #[test]
    fn test_named_values_and_targeting() {
        let inv = parse_invocation("wipe_db:wipe=y,host=a2", &table()).unwrap();
        assert!(inv.overrides.args.flag("wipe"));
        assert_eq!(inv.overrides.host.as_deref(), Some("a2"));

        let inv = parse_invocation("install_packages:role=db", &table()).unwrap();
        assert_eq!(inv.overrides.role.as_deref(), Some("db"));
        assert!(inv.overrides.args.is_empty());
    }

    #[test]
    fn test_escapes() {
        let inv = parse_invocation(r"runcmd:cmd=echo a\,b c=d", &table()).unwrap();
        assert_eq!(inv.overrides.args.get("cmd"), Some("echo a,b c=d"));

        let inv = parse_invocation(r"runcmd:FOO\=1 env", &table()).unwrap();
        assert_eq!(inv.overrides.args.get("cmd"), Some("FOO=1 env"));
    }

    #[test]
    fn test_too_many_positional_values() {
        let err = parse_invocation("runcmd:uptime,extra", &table()).unwrap_err();
        assert!(err.to_string().contains("takes 1 positional argument(s)"));
    }

    #[test]
    fn test_host_and_role_together_rejected() {
        let err = parse_invocation("reboot:host=a1,role=app", &table()).unwrap_err();
        assert!(err.to_string().contains("both host= and role="));
    }

    #[test]
    fn test_unknown_task() {
        let err = parse_invocation("deploy_everything:now", &table()).unwrap_err();
        assert_eq!(err.to_string(), "Task 'deploy_everything' is not registered.");
    }
}
