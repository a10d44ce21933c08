// src/playbook/build.rs

use super::{flag_or, is_set, require_target, required_arg, with_pip_install, workon};
use crate::{
    core::{
        context::Layer,
        poll::{Backoff, PollPolicy},
        task::{Overrides, TaskResult},
        task_context::{PlaceOptions, TaskContext, TemplateOptions},
    },
    models::CommandOptions,
    playbook::utils::fetch_sshkey,
    system::executor::quote,
};
use std::fs;
use std::time::Duration;

const SSL_PATH: &str = "/etc/nginx/ssl";

/// `service <script> <command>`. Anything ending in `start` is then polled
/// until the service reports itself up, waiting 1s, 2s, 3s... in between.
pub fn service(ctx: &mut TaskContext<'_>) -> TaskResult {
    let script = required_arg(ctx, "script")?;
    let command = required_arg(ctx, "command")?;
    let maxwait = ctx
        .arg("maxwait")
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(4);

    ctx.sudo(&format!("service {} {}", script, command))?;
    if command.ends_with("start") && maxwait > 0 {
        let policy = PollPolicy::new(maxwait, Backoff::Linear(Duration::from_secs(1)));
        let probe = format!("service {} status >/dev/null && echo up || echo down", script);
        ctx.await_condition(&format!("{} to start", script), &policy, |ctx| {
            let status = ctx.run_with(&probe, CommandOptions::privileged().quiet().capture())?;
            Ok(status.output() == "up")
        })?;
    }
    Ok(None)
}

pub fn build_lb(ctx: &mut TaskContext<'_>) -> TaskResult {
    require_target(ctx)?;
    ctx.sudo("mkdir -v -p /etc/nginx/conf.d /etc/nginx/sites-enabled /etc/nginx/sites-available")?;
    ctx.sudo("rm -f /etc/nginx/sites-enabled/default")?;

    // App servers rsync static files here.
    let appservers: Vec<String> = ctx
        .registry()
        .resolve("app")?
        .into_iter()
        .map(|h| h.id.clone())
        .collect();
    for appserver in &appservers {
        let pubkey = fetch_sshkey(ctx, appserver)?;
        ctx.append("~/.ssh/authorized_keys", &pubkey, false)?;
    }

    let host = ctx.host_id().to_string();
    ctx.invoke(
        "build_lb_cert",
        &Overrides::host(host).arg("reload", "n").arg("force", "n"),
    )?;
    Ok(None)
}

/// Generates a self-signed certificate when the target asks for one, then
/// uploads the nginx config. Asks before replacing an existing certificate.
pub fn build_lb_cert(ctx: &mut TaskContext<'_>) -> TaskResult {
    require_target(ctx)?;
    let reload = flag_or(ctx, "reload", true);
    let force = flag_or(ctx, "force", true);

    if !is_set(ctx, "ssl_cert") {
        println!("This target doesn't ask for an ssl_cert build, so skipping");
    } else {
        ctx.sudo(&format!("mkdir -v -p {0} && chmod 750 {0}", SSL_PATH))?;
        ctx.cd(SSL_PATH, |ctx| {
            if ctx.exists("https.crt")? && ctx.exists("https.key")? {
                ctx.confirm_or_abort(
                    "An ssl cert is already in place, are you sure?",
                    "build aborted",
                )?;
            }
            let domain = ctx.require_str("domain")?;
            let altnames: Vec<String> = ctx
                .get_list("ssl_altnames")
                .iter()
                .enumerate()
                .map(|(i, name)| format!("subjectAltName=DNS.{}={}", i + 1, name))
                .collect();
            let mut subject = format!(
                "{}/CN={}",
                ctx.get_str("ssl_subject").unwrap_or_default(),
                domain
            );
            if !altnames.is_empty() {
                subject = format!("{}/{}", subject, altnames.join(","));
            }
            ctx.sudo(&format!(
                "openssl req -new -x509 -out https.crt -keyout https.key -sha256 -nodes -subj {}",
                quote(&subject)?
            ))?;
            Ok(())
        })?;
    }
    ctx.upload_template("nginx.conf", TemplateOptions { reload, force })?;
    Ok(None)
}

pub fn build_app(ctx: &mut TaskContext<'_>) -> TaskResult {
    require_target(ctx)?;
    let project = ctx.require_str("project_name")?;
    let workon_home = ctx.require_str("workon_home")?;
    let repo_name = ctx.require_str("repo_name")?;

    ctx.upload_template("virtualenvrc", TemplateOptions::default())?;
    ctx.append(".bashrc", "source $HOME/.virtualenvrc", false)?;
    if !ctx.exists(&workon_home)? {
        ctx.run(&format!("mkdir -v -p {}", workon_home))?;
    }
    ctx.cd(&workon_home, |ctx| {
        if ctx.exists(&project)? {
            println!("virtualenv {} exists; leaving as-is", project);
        } else {
            let python = ctx
                .get_str("python")
                .map(|p| format!("--python={} ", p))
                .unwrap_or_default();
            ctx.run(&format!("mkvirtualenv {}{}", python, project))?;
        }
        Ok(())
    })?;

    if let Some(key) = ctx.get_str("repo_host_key") {
        ctx.append("~/.ssh/known_hosts", &key, false)?;
    }
    ctx.prefix(&format!("workon {} && cdvirtualenv", project), |ctx| {
        ctx.run("mkdir -v -p log run")?;
        if !ctx.exists(&repo_name)? {
            let vcs = ctx.get_str("vcs").unwrap_or_else(|| "git".to_string());
            let url = ctx.require_str("repo_url")?;
            ctx.run(&format!("{} clone {} {}", vcs, url, repo_name))?;
        }
        ctx.run(&format!(
            "echo {}/{}/{} >.project",
            workon_home, project, repo_name
        ))?;
        Ok(())
    })?;

    // First install: everything, regardless of what changed.
    let requirements_dir = ctx.get_str("requirements_dir");
    workon(ctx, requirements_dir.as_deref(), |ctx| {
        with_pip_install(ctx, true, |_| Ok(()))
    })?;
    let static_prefix = ctx.require_str("static_prefix")?;
    let media_prefix = ctx.require_str("media_prefix")?;
    ctx.sudo(&format!(
        "mkdir -p -v {}/{project}/static {}/{project}/media",
        static_prefix,
        media_prefix,
        project = project
    ))?;

    // Not started by the package on install.
    ctx.sudo("service supervisor start")?;

    if is_set(ctx, "build_frontend") {
        let node_version = ctx.require_str("node_version")?;
        ctx.run("curl -o- https://raw.githubusercontent.com/creationix/nvm/v0.32.0/install.sh | bash")?;
        ctx.run(&format!("nvm install {}", node_version))?;
        ctx.run(&format!("nvm use {}", node_version))?;
        for pkg in ctx.get_list("npm_global") {
            ctx.run(&format!("npm install --silent {} -g", pkg))?;
        }
        let frontend_dir = ctx.get_str("frontend_dir");
        workon(ctx, frontend_dir.as_deref(), |ctx| {
            ctx.run("npm install --silent")?;
            Ok(())
        })?;
    }
    Ok(None)
}

/// Opens postgres to the private network, then creates the database from
/// the first app server.
pub fn build_db(ctx: &mut TaskContext<'_>) -> TaskResult {
    require_target(ctx)?;
    let pg_version = ctx.require_str("pg_version")?;
    let pg_conf = format!("/etc/postgresql/{}/main/postgresql.conf", pg_version);
    let hba_conf = format!("/etc/postgresql/{}/main/pg_hba.conf", pg_version);
    let pg_address = ctx
        .registry()
        .resolve("db")?
        .first()
        .and_then(|h| h.attr_str("ip"))
        .map(str::to_string);
    let Some(pg_address) = pg_address else {
        return Err(ctx.abort("cannot infer db server private ip address"));
    };

    ctx.sudo(&format!(
        "chmod g+w {0} {1} && chgrp root {0} {1}",
        pg_conf, hba_conf
    ))?;
    ctx.append(
        &pg_conf,
        &format!("listen_addresses = 'localhost, {}'", pg_address),
        true,
    )?;
    ctx.append(
        &hba_conf,
        &format!(
            "host    all             all             {}/24         md5",
            pg_address
        ),
        true,
    )?;
    ctx.sudo("service postgresql restart")?;

    let settings = Layer::new()
        .with("pg_address", pg_address)
        .with("pg_conf", pg_conf)
        .with("hba_conf", hba_conf);
    ctx.with_scope(settings, |ctx| ctx.invoke("create_db", &Overrides::none()))?;
    Ok(None)
}

pub fn create_db(ctx: &mut TaskContext<'_>) -> TaskResult {
    ctx.with_role("app", |ctx| {
        ctx.warn_only(|ctx| {
            ctx.upload_template("dbuser.sql", TemplateOptions::forced())?;
            ctx.upload_template("dbinit.sql", TemplateOptions::forced())?;
            Ok(None)
        })
    })
}

pub fn reset_test_db(ctx: &mut TaskContext<'_>) -> TaskResult {
    ctx.with_role("app", |ctx| {
        ctx.warn_only(|ctx| {
            ctx.upload_template("test_dbreset.sql", TemplateOptions::forced())?;
            Ok(None)
        })
    })
}

/// Loads a local SQL dump (plain or `.gz`) into the project database,
/// uploading it to `/tmp` only when the copy there differs.
pub fn load_db(ctx: &mut TaskContext<'_>) -> TaskResult {
    let sql_file = required_arg(ctx, "sql_file")?;
    let file_name = sql_file.rsplit('/').next().unwrap_or(&sql_file);
    let remote_sql = format!("/tmp/{}", file_name);
    let cat = if sql_file.ends_with(".gz") { "zcat" } else { "cat" };

    let mut upload = true;
    if ctx.exists(&remote_sql)? {
        let quiet = CommandOptions::default().quiet().capture();
        let local_md5 = ctx.local(&format!("md5sum {}", quote(&sql_file)?), quiet)?;
        let remote_md5 = ctx.run_with(&format!("md5sum {}", quote(&remote_sql)?), quiet)?;
        upload = checksum(&local_md5.stdout) != checksum(&remote_md5.stdout);
    }
    if upload {
        let bytes = match fs::read(&sql_file) {
            Ok(bytes) => bytes,
            Err(_) if ctx.is_dry_run() => Vec::new(),
            Err(e) => return Err(ctx.abort(&format!("cannot read {}: {}", sql_file, e))),
        };
        ctx.place(&remote_sql, &bytes, &PlaceOptions { force: true, ..Default::default() })?;
    } else {
        log::info!("{} is already up to date on {}", remote_sql, ctx.host_id());
    }

    let db_name = ctx.require_str("db_name")?;
    let db_port = ctx.get_str("db_port").unwrap_or_else(|| "5432".to_string());
    ctx.sudo(&format!(
        "{} {} | sudo -u postgres psql --port={} {}",
        cat,
        quote(&remote_sql)?,
        db_port,
        db_name
    ))?;
    Ok(None)
}

fn checksum(md5sum_output: &str) -> Option<&str> {
    md5sum_output.split_whitespace().next()
}
