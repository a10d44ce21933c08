// src/playbook/utils.rs

use super::required_arg;
use crate::{
    core::{
        failure::RunResult,
        task::{Overrides, TaskResult},
        task_context::TaskContext,
    },
    models::CommandOptions,
    system::executor::quote,
};

pub fn reboot(ctx: &mut TaskContext<'_>) -> TaskResult {
    ctx.sudo("reboot")?;
    Ok(None)
}

pub fn poweroff(ctx: &mut TaskContext<'_>) -> TaskResult {
    ctx.sudo("poweroff")?;
    Ok(None)
}

pub fn runcmd(ctx: &mut TaskContext<'_>) -> TaskResult {
    let cmd = required_arg(ctx, "cmd")?;
    ctx.run(&cmd)?;
    Ok(None)
}

pub fn sudocmd(ctx: &mut TaskContext<'_>) -> TaskResult {
    let cmd = required_arg(ctx, "cmd")?;
    ctx.sudo(&cmd)?;
    Ok(None)
}

/// Returns the host's public key to the caller.
pub fn getsshkey(ctx: &mut TaskContext<'_>) -> TaskResult {
    let result = ctx.run_with("cat ~/.ssh/id_rsa.pub", CommandOptions::default().capture())?;
    Ok(Some(result.output().to_string()))
}

pub fn pullsshkey(ctx: &mut TaskContext<'_>) -> TaskResult {
    let host = ctx.host_id().to_string();
    let pubkey = fetch_sshkey(ctx, &host)?;
    let quoted = quote(&pubkey)?;
    ctx.local(
        &format!(
            "grep -qF {0} ~/.ssh/authorized_keys || echo {0} >>~/.ssh/authorized_keys",
            quoted
        ),
        CommandOptions::default(),
    )?;
    Ok(Some(pubkey))
}

/// Runs `getsshkey` on `host` and reads its result; no key halts the run.
pub(crate) fn fetch_sshkey(ctx: &TaskContext<'_>, host: &str) -> RunResult<String> {
    let report = ctx.invoke("getsshkey", &Overrides::host(host))?;
    match report.value(host) {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ if ctx.is_dry_run() => Ok(format!("<public key of {}>", host)),
        _ => Err(ctx.abort(&format!("failed to get ssh key from host {}", host))),
    }
}

#[cfg(test)]
mod tests {
    use crate::core::{failure::RunError, task::Overrides};
    use crate::playbook::testing::{fleet, staging};

    #[test]
    fn test_runcmd_runs_once_per_host() {
        let (d, fake) = fleet(staging(), true);
        let args = Overrides::none().arg("cmd", "uptime");
        d.invoke("runcmd", &args).unwrap();
        let second = d.invoke("runcmd", &args).unwrap();
        assert_eq!(second.skipped_on(), vec!["lb1", "a1", "a2", "db1"]);
        assert_eq!(fake.issued().len(), 4);
    }

    #[test]
    fn test_empty_key_aborts_with_host() {
        let (d, _) = fleet(staging(), true);
        let err = d.invoke("pullsshkey", &Overrides::host("db1")).unwrap_err();
        assert!(matches!(err, RunError::ExplicitAbort(ref m) if m == "failed to get ssh key from host db1"));
    }
}
