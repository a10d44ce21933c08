// src/cli/handlers/list.rs

use crate::{
    core::task::{TaskDef, TaskTable},
    models::TargetRoles,
    playbook,
};
use anyhow::Result;
use colored::*;
use std::fmt::Write;

/// Display order of task groups; ungrouped tasks come last.
const GROUP_ORDER: &[&str] = &["setup", "install", "build", "deploy", "wipe"];

/// The handler for `--list`.
pub fn handle(json: bool) -> Result<()> {
    let mut tasks = TaskTable::new();
    playbook::register_all(&mut tasks)?;
    if json {
        let defs: Vec<&TaskDef> = tasks.iter().collect();
        println!("{}", serde_json::to_string_pretty(&defs)?);
    } else {
        print!("{}", render_listing(&tasks));
    }
    Ok(())
}

pub fn render_listing(tasks: &TaskTable) -> String {
    let mut out = String::new();
    let mut sections: Vec<(&str, Vec<&TaskDef>)> = GROUP_ORDER
        .iter()
        .map(|group| {
            let members = tasks
                .iter()
                .filter(|t| t.group.as_deref() == Some(*group))
                .collect();
            (*group, members)
        })
        .collect();
    sections.push((
        "other",
        tasks.iter().filter(|t| t.group.is_none()).collect(),
    ));

    for (group, members) in sections.into_iter().filter(|(_, m)| !m.is_empty()) {
        let _ = writeln!(out, "\n--- {} ---", group.yellow().bold());
        for task in members {
            let _ = writeln!(
                out,
                "  {:<18} {:<14} {}",
                signature(task).cyan(),
                describe_roles(&task.roles).blue(),
                task.description
            );
        }
    }
    out
}

fn signature(task: &TaskDef) -> String {
    if task.params.is_empty() {
        task.id.clone()
    } else {
        format!("{}:{}", task.id, task.params.join(","))
    }
}

fn describe_roles(roles: &TargetRoles) -> String {
    match roles {
        TargetRoles::All => "all".to_string(),
        TargetRoles::Roles(names) => names.join(","),
        TargetRoles::Unbound => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_groups_in_order() {
        colored::control::set_override(false);
        let mut tasks = TaskTable::new();
        playbook::register_all(&mut tasks).unwrap();
        let listing = render_listing(&tasks);

        let setup = listing.find("--- setup ---").unwrap();
        let deploy = listing.find("--- deploy ---").unwrap();
        let other = listing.find("--- other ---").unwrap();
        assert!(setup < deploy && deploy < other);
        assert!(listing.contains("service:script,command,maxwait"));
        assert!(listing.contains("lb,app,db"));
    }

    #[test]
    fn test_json_listing_carries_metadata() {
        let mut tasks = TaskTable::new();
        playbook::register_all(&mut tasks).unwrap();
        let defs: Vec<&TaskDef> = tasks.iter().collect();
        let json: serde_json::Value = serde_json::to_value(&defs).unwrap();
        let wipe = json
            .as_array()
            .unwrap()
            .iter()
            .find(|t| t["id"] == "wipe_db")
            .unwrap();
        assert_eq!(wipe["group"], "wipe");
        assert_eq!(wipe["params"][0], "wipe");
        assert!(wipe.get("body").is_none());
    }
}
