//! # Playbook
//!
//! The built-in task set for a fleet of load balancers (`lb`), application
//! servers (`app`) and a database server (`db`). Every task is a plain
//! function over a `TaskContext`; `PLAYBOOK` is the single table that
//! declares their targeting, once-policy and listing metadata.

pub mod build;
pub mod deploy;
pub mod install;
pub mod setup;
pub mod utils;
pub mod wipe;

use crate::{
    core::{
        context::Key,
        failure::{RunError, RunResult},
        task::{TaskDef, TaskResult, TaskTable},
        task_context::TaskContext,
    },
    models::{CommandOptions, OncePolicy, TargetRoles},
    system::templates::value_to_text,
};
use colored::*;

pub const ALL_ROLES: &[&str] = &["lb", "app", "db"];

/// One playbook entry. An empty `roles` list declares a host-less task.
struct PlaybookTask {
    name: &'static str,
    roles: &'static [&'static str],
    policy: OncePolicy,
    group: Option<&'static str>,
    description: &'static str,
    params: &'static [&'static str],
    body: fn(&mut TaskContext<'_>) -> TaskResult,
}

static PLAYBOOK: &[PlaybookTask] = &[
    // --- setup ---
    PlaybookTask {
        name: "setup_hostname",
        roles: ALL_ROLES,
        policy: OncePolicy::OncePerHost,
        group: Some("setup"),
        description: "Set the hostname",
        params: &[],
        body: setup::setup_hostname,
    },
    PlaybookTask {
        name: "setup_timezone",
        roles: ALL_ROLES,
        policy: OncePolicy::OncePerHost,
        group: Some("setup"),
        description: "Set the target's timezone",
        params: &[],
        body: setup::setup_timezone,
    },
    PlaybookTask {
        name: "setup_locale",
        roles: ALL_ROLES,
        policy: OncePolicy::OncePerHost,
        group: Some("setup"),
        description: "Check/set the preferred system locale",
        params: &[],
        body: setup::setup_locale,
    },
    PlaybookTask {
        name: "setup_etc_hosts",
        roles: ALL_ROLES,
        policy: OncePolicy::OncePerHost,
        group: Some("setup"),
        description: "Write the fleet's private addresses into /etc/hosts",
        params: &[],
        body: setup::setup_etc_hosts,
    },
    PlaybookTask {
        name: "setup_sshkey",
        roles: ALL_ROLES,
        policy: OncePolicy::OncePerHost,
        group: Some("setup"),
        description: "Generate an ssh key and print it",
        params: &[],
        body: setup::setup_sshkey,
    },
    // --- install ---
    PlaybookTask {
        name: "install_upgrades",
        roles: ALL_ROLES,
        policy: OncePolicy::OncePerHost,
        group: Some("install"),
        description: "Refresh the package index",
        params: &[],
        body: install::install_upgrades,
    },
    PlaybookTask {
        name: "install_packages",
        roles: ALL_ROLES,
        policy: OncePolicy::None,
        group: Some("install"),
        description: "Install system packages",
        params: &[],
        body: install::install_packages,
    },
    PlaybookTask {
        name: "install_pips",
        roles: ALL_ROLES,
        policy: OncePolicy::None,
        group: Some("install"),
        description: "Install system-wide python packages",
        params: &[],
        body: install::install_pips,
    },
    // --- build ---
    PlaybookTask {
        name: "service",
        roles: &[],
        policy: OncePolicy::OncePerHost,
        group: None,
        description: "Run `service <script> <command>` and wait for a start",
        params: &["script", "command", "maxwait"],
        body: build::service,
    },
    PlaybookTask {
        name: "build_lb",
        roles: &["lb"],
        policy: OncePolicy::None,
        group: Some("build"),
        description: "Build the nginx load balancer / app server proxy",
        params: &[],
        body: build::build_lb,
    },
    PlaybookTask {
        name: "build_lb_cert",
        roles: &["lb"],
        policy: OncePolicy::None,
        group: None,
        description: "Add ssl to nginx, replacing any existing certificate",
        params: &["reload", "force"],
        body: build::build_lb_cert,
    },
    PlaybookTask {
        name: "build_app",
        roles: &["app"],
        policy: OncePolicy::None,
        group: Some("build"),
        description: "Set up the virtualenv, clone the repo and install requirements",
        params: &[],
        body: build::build_app,
    },
    PlaybookTask {
        name: "build_db",
        roles: &["db"],
        policy: OncePolicy::None,
        group: Some("build"),
        description: "One-time database server setup",
        params: &[],
        body: build::build_db,
    },
    PlaybookTask {
        name: "create_db",
        roles: &["app"],
        policy: OncePolicy::OnceGlobally,
        group: None,
        description: "Create the database user and schema",
        params: &[],
        body: build::create_db,
    },
    PlaybookTask {
        name: "reset_test_db",
        roles: &["app"],
        policy: OncePolicy::OnceGlobally,
        group: None,
        description: "Reset the test database",
        params: &[],
        body: build::reset_test_db,
    },
    PlaybookTask {
        name: "load_db",
        roles: &["app"],
        policy: OncePolicy::OnceGlobally,
        group: None,
        description: "Load a local SQL dump (.sql or .sql.gz) into the database",
        params: &["sql_file"],
        body: build::load_db,
    },
    // --- wipe ---
    PlaybookTask {
        name: "wipe_db",
        roles: &["app"],
        policy: OncePolicy::OnceGlobally,
        group: Some("wipe"),
        description: "Drop the entire database",
        params: &["wipe"],
        body: wipe::wipe_db,
    },
    PlaybookTask {
        name: "wipe_app",
        roles: &["app"],
        policy: OncePolicy::OnceGlobally,
        group: Some("wipe"),
        description: "Remove the app and its virtualenv",
        params: &["wipe"],
        body: wipe::wipe_app,
    },
    // --- deploy ---
    PlaybookTask {
        name: "deploy_lb",
        roles: &["lb"],
        policy: OncePolicy::None,
        group: Some("deploy"),
        description: "Deploy config changes to the load balancer",
        params: &[],
        body: deploy::deploy_lb,
    },
    PlaybookTask {
        name: "deploy_app",
        roles: &["app"],
        policy: OncePolicy::None,
        group: Some("deploy"),
        description: "Pull, install requirements, migrate and restart the app",
        params: &["force"],
        body: deploy::deploy_app,
    },
    PlaybookTask {
        name: "deploy_solo",
        roles: &["app"],
        policy: OncePolicy::OnceGlobally,
        group: Some("deploy"),
        description: "Migrate and collect static assets (once per run)",
        params: &[],
        body: deploy::deploy_solo,
    },
    PlaybookTask {
        name: "scrub_npm",
        roles: &["app"],
        policy: OncePolicy::None,
        group: None,
        description: "Remove the frontend's node modules and clean the npm cache",
        params: &[],
        body: deploy::scrub_npm,
    },
    PlaybookTask {
        name: "deploy_fixtures",
        roles: &["app"],
        policy: OncePolicy::OnceGlobally,
        group: None,
        description: "Create the site record for the domain (after the first deploy)",
        params: &[],
        body: deploy::deploy_fixtures,
    },
    // --- utilities ---
    PlaybookTask {
        name: "reboot",
        roles: ALL_ROLES,
        policy: OncePolicy::OncePerHost,
        group: None,
        description: "Reboot",
        params: &[],
        body: utils::reboot,
    },
    PlaybookTask {
        name: "poweroff",
        roles: ALL_ROLES,
        policy: OncePolicy::OncePerHost,
        group: None,
        description: "Power off",
        params: &[],
        body: utils::poweroff,
    },
    PlaybookTask {
        name: "runcmd",
        roles: ALL_ROLES,
        policy: OncePolicy::OncePerHost,
        group: None,
        description: "Run a command",
        params: &["cmd"],
        body: utils::runcmd,
    },
    PlaybookTask {
        name: "sudocmd",
        roles: ALL_ROLES,
        policy: OncePolicy::OncePerHost,
        group: None,
        description: "Run a command with sudo",
        params: &["cmd"],
        body: utils::sudocmd,
    },
    PlaybookTask {
        name: "getsshkey",
        roles: &[],
        policy: OncePolicy::None,
        group: None,
        description: "Print the host's public ssh key",
        params: &[],
        body: utils::getsshkey,
    },
    PlaybookTask {
        name: "pullsshkey",
        roles: ALL_ROLES,
        policy: OncePolicy::OncePerHost,
        group: None,
        description: "Authorize the host's key on this machine",
        params: &[],
        body: utils::pullsshkey,
    },
];

/// Registers every playbook task into `table`.
pub fn register_all(table: &mut TaskTable) -> RunResult<()> {
    for entry in PLAYBOOK {
        let roles = if entry.roles.is_empty() {
            TargetRoles::Unbound
        } else {
            TargetRoles::Roles(entry.roles.iter().map(|r| r.to_string()).collect())
        };
        let mut def = TaskDef::new(entry.name, roles, entry.policy, entry.body)
            .describe(entry.description)
            .params(entry.params);
        if let Some(group) = entry.group {
            def = def.group(group);
        }
        table.insert(def)?;
    }
    Ok(())
}

// --- Shared helpers ---

/// Tasks that change a fleet refuse to run without a selected target.
pub(crate) fn require_target(ctx: &TaskContext<'_>) -> RunResult<String> {
    ctx.require_from(Key::Target, "--target")
        .map(|v| value_to_text(&v))
}

/// A task argument that has no sensible default.
pub(crate) fn required_arg(ctx: &TaskContext<'_>, name: &str) -> RunResult<String> {
    ctx.arg(name)
        .map(str::to_string)
        .ok_or_else(|| RunError::MissingConfig {
            key: name.to_string(),
            provided_by: Some(format!("{}:{}=...", ctx.task_id(), name)),
        })
}

pub(crate) fn flag_or(ctx: &TaskContext<'_>, name: &str, default: bool) -> bool {
    match ctx.arg(name) {
        Some(_) => ctx.arg_flag(name),
        None => default,
    }
}

/// True when the setting exists and is neither `false` nor empty.
pub(crate) fn is_set(ctx: &TaskContext<'_>, key: &str) -> bool {
    match ctx.get(key) {
        Some(toml::Value::Boolean(b)) => b,
        Some(toml::Value::String(s)) => !s.is_empty(),
        Some(toml::Value::Array(a)) => !a.is_empty(),
        Some(_) => true,
        None => false,
    }
}

pub(crate) fn warn(ctx: &TaskContext<'_>, message: &str) {
    eprintln!(
        "[{}] {}: {}",
        ctx.host_id().cyan(),
        "Warning".yellow().bold(),
        message
    );
}

/// Activates the project's virtualenv (and optionally changes into `cd_to`)
/// for every command issued inside `f`.
pub(crate) fn workon<'a, T>(
    ctx: &mut TaskContext<'a>,
    cd_to: Option<&str>,
    f: impl FnOnce(&mut TaskContext<'a>) -> RunResult<T>,
) -> RunResult<T> {
    let project = ctx.require_str("project_name")?;
    let command = match cd_to {
        Some(dir) => format!("workon {} && cd {}", project, dir),
        None => format!("workon {}", project),
    };
    ctx.prefix(&command, f)
}

/// Runs `f`, then reinstalls every `requirements_txt` file whose content
/// changed meanwhile (all of them when `force` is set).
pub(crate) fn with_pip_install<'a, T>(
    ctx: &mut TaskContext<'a>,
    force: bool,
    f: impl FnOnce(&mut TaskContext<'a>) -> RunResult<T>,
) -> RunResult<T> {
    let files = ctx.get_list("requirements_txt");
    let mut before = Vec::with_capacity(files.len());
    for file in &files {
        if !ctx.exists(file)? && !ctx.is_dry_run() {
            return Err(ctx.abort(&format!("pip requirements {} not found", file)));
        }
        before.push(read_quietly(ctx, file)?);
    }
    let result = f(ctx)?;
    for (file, old) in files.iter().zip(before) {
        if force || old != read_quietly(ctx, file)? {
            ctx.run(&format!("pip install --upgrade -r {}", file))?;
        }
    }
    Ok(result)
}

fn read_quietly(ctx: &TaskContext<'_>, path: &str) -> RunResult<String> {
    let result = ctx.run_with(
        &format!("cat {}", path),
        CommandOptions::default().quiet().capture().warn_only(),
    )?;
    Ok(result.stdout)
}

/// Pulls from upstream and updates to `rev`. Assumes the working directory
/// is a checkout.
pub(crate) fn pull_and_update(ctx: &TaskContext<'_>, rev: Option<&str>, clean: bool) -> RunResult<()> {
    let vcs = ctx.get_str("vcs").unwrap_or_else(|| "git".to_string());
    if vcs == "git" {
        let rev = rev.unwrap_or("master");
        if clean {
            ctx.run("git clean -d -f")?;
        }
        ctx.run(&format!("git pull origin master -f && git checkout {}", rev))?;
    } else {
        let rev = rev.unwrap_or("default");
        let clean = if clean { "-C " } else { "" };
        ctx.run(&format!("hg pull && hg up {}{}", clean, rev))?;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::{fleet, staging};
    use super::*;
    use crate::core::task::Overrides;

    #[test]
    fn test_register_all() {
        let mut table = TaskTable::new();
        register_all(&mut table).unwrap();
        assert_eq!(table.len(), PLAYBOOK.len());
        assert_eq!(table.get("getsshkey").unwrap().roles, TargetRoles::Unbound);
        assert_eq!(table.get("create_db").unwrap().policy, OncePolicy::OnceGlobally);
        assert_eq!(table.get("deploy_app").unwrap().group.as_deref(), Some("deploy"));
        assert_eq!(table.get("service").unwrap().params, ["script", "command", "maxwait"]);
        assert_eq!(table.get("load_db").unwrap().params, ["sql_file"]);
        assert_eq!(table.get("deploy_fixtures").unwrap().policy, OncePolicy::OnceGlobally);
        assert_eq!(table.get("scrub_npm").unwrap().roles, TargetRoles::Roles(vec!["app".into()]));

        let err = register_all(&mut table).unwrap_err();
        assert!(matches!(err, RunError::DuplicateTask(_)));
    }

    #[test]
    fn test_fleet_tasks_require_a_target() {
        let (d, fake) = fleet(crate::core::context::Layer::new().with("project_name", "shop"), true);
        let err = d.invoke("setup_hostname", &Overrides::none()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Required setting 'target' is missing (provided by '--target')."
        );
        assert!(fake.issued().is_empty());
        let report = d.abort_handle().report().unwrap();
        assert_eq!(report.task.as_deref(), Some("setup_hostname"));
        assert_eq!(report.host.as_deref(), Some("lb1"));
    }

    #[test]
    fn test_deploy_app_migrates_once_and_restarts_everywhere() {
        let (d, fake) = fleet(staging(), true);
        let report = d.invoke("deploy_app", &Overrides::none()).unwrap();
        assert_eq!(report.ran_on(), vec!["a1", "a2"]);

        let a1 = fake.issued_on("a1");
        let a2 = fake.issued_on("a2");
        assert_eq!(a1.iter().filter(|c| c.contains("manage.py migrate")).count(), 1);
        assert!(a2.iter().all(|c| !c.contains("manage.py migrate")));
        for commands in [&a1, &a2] {
            assert!(commands.iter().any(|c| c.contains("git pull origin master")));
            assert!(commands.iter().any(|c| c.contains("supervisorctl restart shop-uwsgi")));
            assert!(commands.iter().any(|c| c.contains("workon shop && ./manage.py compile_pyc")));
        }
        // local_settings is uploaded without a reload, supervisord-uwsgi with one.
        assert!(a1.iter().all(|c| !c.contains("reload local_settings")));
        assert!(a1.iter().any(|c| c.contains("reload supervisord-uwsgi")));
    }

    #[test]
    fn test_service_polls_until_up() {
        let (d, fake) = fleet(staging(), true);
        fake.on("status", 0, "up\n");
        let overrides = Overrides::host("a1")
            .arg("script", "nginx")
            .arg("command", "start");
        d.invoke("service", &overrides).unwrap();
        let a1 = fake.issued_on("a1");
        assert!(a1[0].contains("service nginx start"));
        assert_eq!(a1.iter().filter(|c| c.contains("service nginx status")).count(), 1);
    }

    #[test]
    fn test_service_that_never_starts_times_out() {
        let (d, fake) = fleet(staging(), true);
        fake.on("status", 0, "down\n");
        let overrides = Overrides::host("a1")
            .arg("script", "uwsgi")
            .arg("command", "restart")
            .arg("maxwait", "1");
        // `restart` ends with `start`, so it is polled as well.
        let err = d.invoke("service", &overrides).unwrap_err();
        assert!(matches!(err, RunError::PollTimeout { attempts: 1, .. }));
        assert!(d.abort_handle().is_triggered());
    }

    #[test]
    fn test_service_without_script_names_the_argument() {
        let (d, _) = fleet(staging(), true);
        let err = d.invoke("service", &Overrides::host("a1")).unwrap_err();
        assert!(matches!(err, RunError::MissingConfig { ref key, .. } if key == "script"));
    }

    #[test]
    fn test_pullsshkey_authorizes_key_locally() {
        let (d, fake) = fleet(staging(), true);
        fake.on("id_rsa.pub", 0, "ssh-rsa AAAA deploy@a1\n");
        let report = d.invoke("pullsshkey", &Overrides::host("a1")).unwrap();
        assert_eq!(report.value("a1"), Some("ssh-rsa AAAA deploy@a1"));
        let local = fake.issued_on(crate::constants::LOCAL_HOST_ID);
        assert_eq!(local.len(), 1);
        assert!(local[0].contains("ssh-rsa AAAA deploy@a1"));
        assert!(local[0].contains("~/.ssh/authorized_keys"));
    }
}
