use clap::Parser;

pub mod args;
pub mod handlers;

/// deployx: role-targeted deployment tasks over ssh.
#[derive(Parser, Debug, Default)]
#[command(
    author,
    version,
    about,
    after_help = "Tasks take arguments as `task:value,key=value`, e.g. `service:nginx,start` or `wipe_db:wipe=y`.",
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Configuration file. Defaults to $DEPLOYX_CONFIG, then ./deployx.toml.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<String>,

    /// Deployment target from the `[targets]` table.
    #[arg(short, long)]
    pub target: Option<String>,

    /// Run every task on this host only.
    #[arg(short = 'H', long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Run every task on this role's hosts only.
    #[arg(short = 'R', long = "role", value_name = "ROLE", conflicts_with = "host")]
    pub role: Option<String>,

    /// Override a setting (`--set key=value`, repeatable).
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Answer yes to every confirmation.
    #[arg(short, long)]
    pub yes: bool,

    /// Print the commands without running them.
    #[arg(long)]
    pub dry_run: bool,

    /// Run each task on its hosts concurrently.
    #[arg(short = 'P', long)]
    pub parallel: bool,

    /// List the available tasks and exit.
    #[arg(short, long)]
    pub list: bool,

    /// With --list, print JSON.
    #[arg(long, requires = "list")]
    pub json: bool,

    /// Tasks to run, in order.
    #[arg(value_name = "TASK")]
    pub tasks: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_flags_and_tasks() {
        let cli = Cli::try_parse_from([
            "deployx", "-t", "staging", "--set", "revision=v2", "-y", "setup_hostname", "deploy_app:force=y",
        ])
        .unwrap();
        assert_eq!(cli.target.as_deref(), Some("staging"));
        assert_eq!(cli.set, vec!["revision=v2"]);
        assert!(cli.yes);
        assert_eq!(cli.tasks, vec!["setup_hostname", "deploy_app:force=y"]);
    }

    #[test]
    fn test_host_and_role_conflict() {
        assert!(Cli::try_parse_from(["deployx", "-H", "a1", "-R", "app", "reboot"]).is_err());
    }

    #[test]
    fn test_json_requires_list() {
        assert!(Cli::try_parse_from(["deployx", "--json"]).is_err());
        assert!(Cli::try_parse_from(["deployx", "--list", "--json"]).is_ok());
    }
}
