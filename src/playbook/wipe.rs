// src/playbook/wipe.rs

use super::require_target;
use crate::core::{
    task::TaskResult,
    task_context::{TaskContext, TemplateOptions},
};

/// Drops the database. Asks first unless called with `wipe=y`.
pub fn wipe_db(ctx: &mut TaskContext<'_>) -> TaskResult {
    require_target(ctx)?;
    if !ctx.arg_flag("wipe") {
        ctx.confirm_or_abort(
            "This will delete the entire database, are you sure?",
            "aborting wipe task",
        )?;
    }
    ctx.with_role("app", |ctx| {
        ctx.upload_template("dbwipe.sql", TemplateOptions::forced())?;
        Ok(None)
    })
}

pub fn wipe_app(ctx: &mut TaskContext<'_>) -> TaskResult {
    require_target(ctx)?;
    if !ctx.arg_flag("wipe") {
        ctx.confirm_or_abort(
            "This will delete the entire app and virtualenv, are you sure?",
            "aborting wipe task",
        )?;
    }
    let project = ctx.require_str("project_name")?;
    ctx.run(&format!("rmvirtualenv {}", project))?;
    Ok(None)
}
