// src/playbook/setup.rs

use super::{require_target, warn};
use crate::{
    core::{task::TaskResult, task_context::TaskContext},
    models::CommandOptions,
    playbook::utils::fetch_sshkey,
};

const HOSTS_START_MARKER: &str = "#### deployx start marker: edit at own peril! ####";
const HOSTS_END_MARKER: &str = "#### deployx end marker: edit at own peril! ####";

pub fn setup_hostname(ctx: &mut TaskContext<'_>) -> TaskResult {
    require_target(ctx)?;
    let host = ctx.host_id().to_string();
    ctx.sudo(&format!("hostname {}", host))?;
    ctx.sudo(&format!("echo {} >/etc/hostname", host))?;
    Ok(None)
}

pub fn setup_timezone(ctx: &mut TaskContext<'_>) -> TaskResult {
    require_target(ctx)?;
    match ctx.get_str("timezone") {
        Some(timezone) => {
            ctx.sudo(&format!("timedatectl set-timezone {}", timezone))?;
            ctx.sudo("timedatectl status")?;
        }
        None => warn(ctx, "no timezone in target"),
    }
    Ok(None)
}

pub fn setup_locale(ctx: &mut TaskContext<'_>) -> TaskResult {
    require_target(ctx)?;
    let Some(locale) = ctx.get_str("locale") else {
        warn(ctx, "no locale in target");
        return Ok(None);
    };
    let current = ctx.run_with(
        "cat /etc/default/locale",
        CommandOptions::privileged().quiet().capture().warn_only(),
    )?;
    if current.stdout.contains(&locale) {
        warn(ctx, &format!("locale seems to be already set to {}", locale));
        return Ok(None);
    }
    let language = ctx.get_str("language").unwrap_or_else(|| locale.clone());
    ctx.sudo(&format!("update-locale LANG={} LANGUAGE={}", locale, language))?;
    ctx.sudo("dpkg-reconfigure -f noninteractive locales")?;
    ctx.sudo("locale")?;
    Ok(None)
}

/// Replaces the generated block of `/etc/hosts` with every host that has a
/// private `ip` attribute.
pub fn setup_etc_hosts(ctx: &mut TaskContext<'_>) -> TaskResult {
    require_target(ctx)?;
    let mut lines = vec![HOSTS_START_MARKER.to_string()];
    lines.extend(
        ctx.registry()
            .hosts()
            .filter_map(|host| host.attr_str("ip").map(|ip| format!("{}\t{}", ip, host.id))),
    );
    lines.push(HOSTS_END_MARKER.to_string());

    ctx.sudo(&format!(
        "sed -i '/{}/,/{}/d' /etc/hosts",
        HOSTS_START_MARKER, HOSTS_END_MARKER
    ))?;
    ctx.append("/etc/hosts", &lines.join("\n"), true)?;
    Ok(None)
}

pub fn setup_sshkey(ctx: &mut TaskContext<'_>) -> TaskResult {
    require_target(ctx)?;
    if ctx.exists("~/.ssh/id_rsa")? {
        println!("~/.ssh/id_rsa exists, skipping ssh key setup");
    } else {
        ctx.run("ssh-keygen -t rsa -N '' -f ~/.ssh/id_rsa")?;
    }
    let host = ctx.host_id().to_string();
    let pubkey = fetch_sshkey(ctx, &host)?;
    println!(
        "*** Make sure this key provides access to the vcs repo ***\n\n{}\n\n{}",
        pubkey,
        "*".repeat(58)
    );
    Ok(Some(pubkey))
}

#[cfg(test)]
mod tests {
    use crate::core::task::Overrides;
    use crate::playbook::testing::{fleet, staging};

    #[test]
    fn test_etc_hosts_lists_every_private_ip() {
        let (d, fake) = fleet(staging(), true);
        d.invoke("setup_etc_hosts", &Overrides::host("a1")).unwrap();
        let a1 = fake.issued_on("a1");
        assert!(a1[0].contains("sed -i"));
        let appended: Vec<&String> = a1.iter().filter(|c| c.contains("grep -qxF")).collect();
        // Two markers plus four hosts.
        assert_eq!(appended.len(), 6);
        assert!(appended.iter().any(|c| c.contains("10.0.0.21") && c.contains("db1")));
    }

    #[test]
    fn test_missing_timezone_only_warns() {
        let (d, fake) = fleet(staging(), true);
        d.invoke("setup_timezone", &Overrides::role("db")).unwrap();
        assert!(fake.issued_on("db1").is_empty());

        let (d, fake) = fleet(staging().with("timezone", "Europe/Berlin"), true);
        d.invoke("setup_timezone", &Overrides::role("db")).unwrap();
        let db1 = fake.issued_on("db1");
        assert!(db1[0].contains("timedatectl set-timezone Europe/Berlin"));
    }

    #[test]
    fn test_locale_already_set_is_left_alone() {
        let (d, fake) = fleet(staging().with("locale", "en_US.UTF-8"), true);
        fake.on("/etc/default/locale", 0, "LANG=en_US.UTF-8\n");
        d.invoke("setup_locale", &Overrides::host("a1")).unwrap();
        assert!(fake.issued_on("a1").iter().all(|c| !c.contains("update-locale")));
    }

    #[test]
    fn test_sshkey_setup_skips_existing_key() {
        let (d, fake) = fleet(staging(), true);
        fake.on("test -e", 0, "");
        fake.on("id_rsa.pub", 0, "ssh-rsa BBBB deploy@a2\n");
        let report = d.invoke("setup_sshkey", &Overrides::host("a2")).unwrap();
        assert_eq!(report.value("a2"), Some("ssh-rsa BBBB deploy@a2"));
        assert!(fake.issued_on("a2").iter().all(|c| !c.contains("ssh-keygen")));
    }
}
