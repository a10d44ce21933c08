// src/cli/handlers/run.rs

use crate::{
    cli::{
        Cli,
        args::{TaskInvocation, parse_invocation},
    },
    core::{
        abort::AbortHandle,
        config_loader,
        context::ContextStore,
        dispatcher::Dispatcher,
        registry::HostRegistry,
        task::{Outcome, TaskTable},
    },
    playbook,
    system::{
        confirm::{AssumeAnswer, Confirmer, PromptConfirmer},
        executor::RemoteExecutor,
        templates::FsTemplates,
        transport::SshTransport,
    },
};
use anyhow::{Context, Result, bail};
use colored::*;
use std::path::Path;
use std::sync::Arc;

/// Main entry point for running tasks: loads the configuration once, builds
/// the dispatcher and invokes every task given on the command line in order.
/// The first failure halts the run.
pub fn handle(cli: &Cli) -> Result<()> {
    if cli.tasks.is_empty() {
        bail!("No tasks given. Use --list to see the available tasks.");
    }

    let config_path = config_loader::resolve_config_path(cli.config.as_deref());
    let mut config = config_loader::load_config(&config_path)?;
    if let Some(target) = &cli.target {
        config_loader::apply_target(&mut config, target)?;
    }
    let sets = cli
        .set
        .iter()
        .map(|raw| config_loader::parse_assignment(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let mut tasks = TaskTable::new();
    playbook::register_all(&mut tasks)?;
    // Parse everything up front so a typo fails before any host is touched.
    let invocations = cli
        .tasks
        .iter()
        .map(|spec| parse_invocation(spec, &tasks))
        .collect::<Result<Vec<_>>>()?;

    let base_dir = config_path.parent().unwrap_or(Path::new("."));
    let templates = FsTemplates::load(
        base_dir.join(&config.options.template_dir),
        &config.options.template_config,
    )
    .context("Failed to load the template catalog")?;
    let confirmer: Arc<dyn Confirmer> = if cli.yes {
        Arc::new(AssumeAnswer(true))
    } else {
        Arc::new(PromptConfirmer)
    };

    let executor = RemoteExecutor::new(
        Arc::new(SshTransport::from_options(&config.options)),
        config.options.shell.clone(),
        AbortHandle::new(),
    )
    .dry_run(cli.dry_run);
    let context = ContextStore::new(config_loader::base_layer(
        &config,
        cli.target.as_deref(),
        &sets,
    ));
    let dispatcher = Dispatcher::new(tasks, HostRegistry::from_config(&config), executor, context)
        .with_templates(Arc::new(templates))
        .with_confirmer(confirmer)
        .parallel(cli.parallel || config.options.parallel);

    for invocation in invocations {
        run_one(&dispatcher, cli, invocation)?;
    }
    println!("\n{}", "Done.".green().bold());
    Ok(())
}

fn run_one(dispatcher: &Dispatcher, cli: &Cli, mut invocation: TaskInvocation) -> Result<()> {
    // Per-task targeting wins over the global flags.
    if invocation.overrides.host.is_none() && invocation.overrides.role.is_none() {
        invocation.overrides.host = cli.host.clone();
        invocation.overrides.role = cli.role.clone();
    }
    log::info!("Executing task '{}'", invocation.task);

    match dispatcher.invoke(&invocation.task, &invocation.overrides) {
        Ok(report) => {
            for (host, outcome) in &report.outcomes {
                if let Outcome::Ran(Some(value)) = outcome {
                    println!("[{}] {} => {}", host.cyan(), report.task, value);
                }
            }
            Ok(())
        }
        Err(err) => {
            let site = match dispatcher.abort_handle().report() {
                Some(report) => describe_site(report.task.as_deref(), report.host.as_deref()),
                None => format!("while running '{}'", invocation.task),
            };
            Err(anyhow::Error::new(err).context(format!("Run aborted {}", site)))
        }
    }
}

fn describe_site(task: Option<&str>, host: Option<&str>) -> String {
    match (task, host) {
        (Some(task), Some(host)) => format!("in task '{}' on {}", task, host),
        (Some(task), None) => format!("in task '{}' on the local machine", task),
        (None, _) => "before any task started".to_string(),
    }
}
