// src/playbook/install.rs

use super::warn;
use crate::{
    core::{task::TaskResult, task_context::TaskContext},
    models::CommandOptions,
};

const APT: &str = "DEBIAN_FRONTEND=noninteractive apt-get";

pub fn install_upgrades(ctx: &mut TaskContext<'_>) -> TaskResult {
    ctx.sudo(&format!("{} -y update", APT))?;
    Ok(None)
}

pub fn install_packages(ctx: &mut TaskContext<'_>) -> TaskResult {
    let packages = ctx.get_list("packages");
    if packages.is_empty() {
        warn(ctx, "no packages in target");
        return Ok(None);
    }
    ctx.sudo(&format!("{} install --yes {}", APT, packages.join(" ")))?;
    Ok(None)
}

pub fn install_pips(ctx: &mut TaskContext<'_>) -> TaskResult {
    let pips = ctx.get_list("pips");
    if pips.is_empty() {
        return Ok(None);
    }
    // apt's pip is usually behind.
    ctx.sudo("pip install --upgrade pip")?;
    ctx.sudo(&format!("pip install {}", pips.join(" ")))?;
    ctx.run_with(
        "chown --recursive -v $SUDO_USER:root ~/.pip ~/.rnd && chmod -v 770 ~/.pip && chmod -v 660 ~/.rnd",
        CommandOptions::privileged().quiet(),
    )?;
    Ok(None)
}
