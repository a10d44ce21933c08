// src/playbook/deploy.rs

use super::{is_set, pull_and_update, require_target, with_pip_install, workon};
use crate::core::{
    context::Layer,
    task::{Overrides, TaskResult},
    task_context::{TaskContext, TemplateOptions},
};

pub fn deploy_lb(ctx: &mut TaskContext<'_>) -> TaskResult {
    require_target(ctx)?;
    ctx.with_role("app", |ctx| {
        if is_set(ctx, "htpasswd_file") {
            ctx.upload_template("nginx-htpasswd", TemplateOptions::default())?;
        }
        let port = ctx.require_str("wsgi_port")?;
        let upstream: Vec<String> = ctx
            .registry()
            .resolve("app")?
            .into_iter()
            .map(|h| format!("server {}:{};", h.address(), port))
            .collect();
        let servers = Layer::new().with("upstream_uwsgi_servers", upstream.join("\n    "));
        ctx.with_scope(servers, |ctx| {
            ctx.upload_template("nginx-site.conf", TemplateOptions::default())
        })?;
        ctx.upload_template("nginx.conf", TemplateOptions::default())?;
        Ok(None)
    })
}

/// Updates the checkout, reinstalls changed requirements, migrates once for
/// the whole fleet and restarts the app server.
pub fn deploy_app(ctx: &mut TaskContext<'_>) -> TaskResult {
    let force = ctx.arg_flag("force");
    let requirements_dir = ctx.get_str("requirements_dir");
    let revision = ctx.get_str("revision").or_else(|| ctx.get_str("branch"));
    workon(ctx, requirements_dir.as_deref(), |ctx| {
        with_pip_install(ctx, force, |ctx| {
            pull_and_update(ctx, revision.as_deref(), true)
        })
    })?;

    ctx.upload_template("local_settings", TemplateOptions::default().no_reload())?;
    ctx.upload_template("uwsgi.ini", TemplateOptions::default().no_reload())?;

    // Migrations run before any other manage command.
    let host = ctx.host_id().to_string();
    ctx.invoke("deploy_solo", &Overrides::host(host))?;
    workon(ctx, None, |ctx| {
        ctx.run("./manage.py clean_pyc")?;
        ctx.run("./manage.py compile_pyc")?;
        Ok(())
    })?;

    ctx.upload_template("supervisord-uwsgi", TemplateOptions::default())?;
    let project = ctx.require_str("project_name")?;
    ctx.sudo(&format!("supervisorctl restart {}-uwsgi", project))?;
    Ok(None)
}

pub fn deploy_solo(ctx: &mut TaskContext<'_>) -> TaskResult {
    workon(ctx, None, |ctx| {
        ctx.run("./manage.py migrate --noinput")?;
        ctx.run("./manage.py collectstatic -v0 --noinput --clear")?;
        Ok(())
    })?;

    if is_set(ctx, "build_frontend") {
        let node_version = ctx.require_str("node_version")?;
        let static_dest = ctx.require_str("static_dest")?;
        let frontend_dir = ctx.get_str("frontend_dir");
        workon(ctx, frontend_dir.as_deref(), |ctx| {
            ctx.run(&format!("nvm use {}", node_version))?;
            ctx.run("npm --silent update")?;
            ctx.run("ng build --environment=prod")?;
            ctx.run(&format!(
                "rsync -e 'ssh -o StrictHostKeyChecking=no' -az dist {}",
                static_dest
            ))?;
            Ok(())
        })?;
    }
    Ok(None)
}

/// Clears the frontend's installed node modules and the npm cache.
pub fn scrub_npm(ctx: &mut TaskContext<'_>) -> TaskResult {
    if !is_set(ctx, "build_frontend") {
        return Ok(None);
    }
    let frontend_dir = ctx.get_str("frontend_dir");
    workon(ctx, frontend_dir.as_deref(), |ctx| {
        ctx.run("rm -rf node_modules/ && npm cache clean")?;
        Ok(None)
    })
}

/// Makes sure the `Site` row for `domain` exists. Only needed once, after
/// the first deploy.
pub fn deploy_fixtures(ctx: &mut TaskContext<'_>) -> TaskResult {
    let domain = ctx.require_str("domain")?;
    let script = format!(
        "import django;\
         from django.conf import settings;\
         from account.models import Site;\
         site, _ = Site.objects.get_or_create(domain=\"{0}\");\
         site.name = site.name or \"{0}\".split(\".\")[0];\
         site.save();",
        domain
    );
    workon(ctx, None, |ctx| {
        ctx.run(&format!("./manage.py shell <<<'{}'", script))?;
        Ok(None)
    })
}

#[cfg(test)]
mod tests {
    use crate::core::failure::RunError;
    use crate::core::task::Overrides;
    use crate::models::Value;
    use crate::playbook::testing::{fleet, staging};

    #[test]
    fn test_scrub_npm_only_touches_frontend_builds() {
        let (d, fake) = fleet(staging(), true);
        d.invoke("scrub_npm", &Overrides::none()).unwrap();
        assert!(fake.issued().is_empty());

        let base = staging()
            .with("build_frontend", true)
            .with("frontend_dir", "frontend");
        let (d, fake) = fleet(base, true);
        d.invoke("scrub_npm", &Overrides::none()).unwrap();
        for host in ["a1", "a2"] {
            let issued = fake.issued_on(host);
            assert_eq!(issued.len(), 1);
            assert!(issued[0].contains("workon shop && cd frontend && rm -rf node_modules/ && npm cache clean"));
        }
    }

    #[test]
    fn test_deploy_fixtures_runs_once_for_the_fleet() {
        let (d, fake) = fleet(staging().with("domain", "shop.example.com"), true);
        let report = d.invoke("deploy_fixtures", &Overrides::none()).unwrap();
        assert_eq!(report.ran_on(), vec!["a1"]);
        d.invoke("deploy_fixtures", &Overrides::none()).unwrap();

        let a1 = fake.issued_on("a1");
        assert_eq!(a1.len(), 1);
        assert!(a1[0].contains("./manage.py shell <<<"));
        assert!(a1[0].contains("Site.objects.get_or_create"));
        assert!(a1[0].contains("shop.example.com"));
        assert!(fake.issued_on("a2").is_empty());
    }

    #[test]
    fn test_deploy_fixtures_requires_a_domain() {
        let (d, _) = fleet(staging(), true);
        let err = d.invoke("deploy_fixtures", &Overrides::none()).unwrap_err();
        assert!(matches!(err, RunError::MissingConfig { ref key, .. } if key == "domain"));
    }

    #[test]
    fn test_deploy_lb_renders_upstream_servers() {
        let (d, fake) = fleet(staging(), true);
        d.invoke("deploy_lb", &Overrides::none()).unwrap();
        let lb1 = fake.issued_on("lb1");
        for name in ["nginx-site.conf", "nginx.conf"] {
            assert!(lb1.iter().any(|c| c.contains(&format!("tee /etc/deployx/{}", name))));
        }
        assert!(lb1.iter().all(|c| !c.contains("nginx-htpasswd")));
    }

    #[test]
    fn test_requirements_reinstall_only_when_changed() {
        let base = staging().with(
            "requirements_txt",
            Value::Array(vec![Value::from("requirements.txt")]),
        );
        let (d, fake) = fleet(base, true);
        fake.on("cat requirements.txt", 0, "django==4.2\n");
        d.invoke("deploy_app", &Overrides::host("a1")).unwrap();
        assert!(fake.issued_on("a1").iter().all(|c| !c.contains("pip install")));

        let (d, fake) = fleet(
            staging().with("requirements_txt", "requirements.txt"),
            true,
        );
        d.invoke("deploy_app", &Overrides::host("a1").arg("force", "y"))
            .unwrap();
        assert!(fake
            .issued_on("a1")
            .iter()
            .any(|c| c.contains("pip install --upgrade -r requirements.txt")));
    }

    #[test]
    fn test_missing_requirements_file_aborts() {
        let base = staging().with("requirements_txt", "requirements.txt");
        let (d, fake) = fleet(base, true);
        fake.on("test -e requirements.txt", 1, "");
        let err = d.invoke("deploy_app", &Overrides::none()).unwrap_err();
        assert!(err.to_string().contains("pip requirements requirements.txt not found"));
        assert!(fake.issued_on("a2").is_empty());
    }
}
