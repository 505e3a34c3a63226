use anyhow::Result;
use stack_deploy::core::consistency::Rule;
use stack_deploy::{
    ArtifactSet, ConsistencyChecker, DeployConfig, DeployError, LocalStorage, RenderEngine,
    RenderOptions,
};
use std::path::Path;
use tempfile::TempDir;

fn write_config(dir: &Path, extra: &str) -> Result<std::path::PathBuf> {
    let config_content = format!(
        r#"
[project]
repo_name = "blog"
project_name = "mysite"
working_dir = "/home/deploy/blog"
domain = "example.com"

[service]
user = "deploy"
workers = 4

[requirements]
file = "requirements.txt"
{}
"#,
        extra
    );

    std::fs::write(
        dir.join("requirements.txt"),
        "asgiref==3.7.2\nDjango==4.2.7\ngunicorn==21.2.0\nsqlparse==0.4.4\n",
    )?;
    let config_path = dir.join("deploy.toml");
    std::fs::write(&config_path, config_content)?;
    Ok(config_path)
}

/// Files rendered from one config must agree with each other
#[tokio::test]
async fn test_render_then_check_round_trip() -> Result<()> {
    let config_dir = TempDir::new()?;
    let out_dir = TempDir::new()?;
    let config_path = write_config(config_dir.path(), "")?;

    let names = DeployConfig::from_file(&config_path)?.resolve()?;
    let engine = RenderEngine::new(LocalStorage::new(out_dir.path()));
    let written = engine.run(&names).await?;
    assert_eq!(written.len(), 5);

    for file in ["blog.service", "blog.socket", "blog", "requirements.txt", "blog.env"] {
        assert!(out_dir.path().join(file).exists(), "{} was not written", file);
    }

    let service = std::fs::read_to_string(out_dir.path().join("blog.service"))?;
    assert!(service.contains("--workers 4"));

    let storage = LocalStorage::new(out_dir.path());
    let set = ArtifactSet::load(&storage, "blog").await?;
    let report = ConsistencyChecker::new().check(&set, Some(&names));
    assert!(report.findings.is_empty(), "{}", report.render_text());

    // without a config only cross-file agreement is checked
    let report = ConsistencyChecker::new().check(&set, None);
    assert!(report.is_ok());

    Ok(())
}

#[tokio::test]
async fn test_hand_edited_socket_path_is_caught() -> Result<()> {
    let config_dir = TempDir::new()?;
    let out_dir = TempDir::new()?;
    let config_path = write_config(config_dir.path(), "")?;

    let names = DeployConfig::from_file(&config_path)?.resolve()?;
    RenderEngine::new(LocalStorage::new(out_dir.path()))
        .run(&names)
        .await?;

    // someone renames the socket in the proxy only
    let site_path = out_dir.path().join("blog");
    let site = std::fs::read_to_string(&site_path)?;
    std::fs::write(&site_path, site.replace("/run/blog.sock", "/run/gunicorn.sock"))?;

    let set = ArtifactSet::load(&LocalStorage::new(out_dir.path()), "blog").await?;
    let report = ConsistencyChecker::new().check(&set, None);
    assert!(!report.is_ok());
    assert!(report.has_rule(Rule::SocketPath));

    let err = report.into_result().unwrap_err();
    assert!(matches!(err, DeployError::ConsistencyError { ref violations } if violations.len() == 1));
    assert_eq!(err.exit_code(), 1);

    Ok(())
}

#[tokio::test]
async fn test_certbot_rewritten_site_still_checks() -> Result<()> {
    let config_dir = TempDir::new()?;
    let out_dir = TempDir::new()?;
    let config_path = write_config(config_dir.path(), "")?;

    let names = DeployConfig::from_file(&config_path)?.resolve()?;
    RenderEngine::new(LocalStorage::new(out_dir.path()))
        .run(&names)
        .await?;

    let site_path = out_dir.path().join("blog");
    let site = std::fs::read_to_string(&site_path)?;
    let certbot = site.replace(
        "    listen 80;\n",
        "    listen 443 ssl; # managed by Certbot\n    ssl_certificate /etc/letsencrypt/live/example.com/fullchain.pem; # managed by Certbot\n",
    ) + r#"
server {
    if ($host = www.example.com) {
        return 301 https://$host$request_uri;
    } # managed by Certbot

    listen 80;
    server_name example.com www.example.com;
    return 404; # managed by Certbot
}
"#;
    std::fs::write(&site_path, certbot)?;

    let set = ArtifactSet::load(&LocalStorage::new(out_dir.path()), "blog").await?;
    let report = ConsistencyChecker::new().check(&set, Some(&names));
    assert!(report.is_ok(), "{}", report.render_text());

    Ok(())
}

#[tokio::test]
async fn test_missing_directory_reports_every_artifact() -> Result<()> {
    let empty = TempDir::new()?;
    let set = ArtifactSet::load(&LocalStorage::new(empty.path()), "blog").await?;
    let report = ConsistencyChecker::new().check(&set, None);

    let syntax = report.errors().filter(|f| f.rule == Rule::Syntax).count();
    assert_eq!(syntax, 5);
    Ok(())
}

#[tokio::test]
async fn test_render_refuses_to_overwrite_without_force() -> Result<()> {
    let config_dir = TempDir::new()?;
    let out_dir = TempDir::new()?;
    let config_path = write_config(config_dir.path(), "")?;
    let names = DeployConfig::from_file(&config_path)?.resolve()?;

    RenderEngine::new(LocalStorage::new(out_dir.path()))
        .run(&names)
        .await?;
    let second = RenderEngine::new(LocalStorage::new(out_dir.path()))
        .run(&names)
        .await;
    assert!(matches!(second, Err(DeployError::ArtifactExists { .. })));

    let forced = RenderEngine::with_options(
        LocalStorage::new(out_dir.path()),
        RenderOptions {
            force: true,
            bundle: Some("bundle.zip".to_string()),
        },
    )
    .run(&names)
    .await?;
    assert_eq!(forced.len(), 6);

    let data = std::fs::read(out_dir.path().join("bundle.zip"))?;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(data))?;
    let mut entries: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).map(|f| f.name().to_string()))
        .collect::<std::result::Result<_, _>>()?;
    entries.sort();
    assert_eq!(
        entries,
        vec![
            "etc/nginx/sites-available/blog",
            "etc/systemd/system/blog.service",
            "etc/systemd/system/blog.socket",
            "home/deploy/blog/blog.env",
            "home/deploy/blog/requirements.txt",
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_existing_bundle_leaves_output_untouched() -> Result<()> {
    let config_dir = TempDir::new()?;
    let out_dir = TempDir::new()?;
    let config_path = write_config(config_dir.path(), "")?;
    let names = DeployConfig::from_file(&config_path)?.resolve()?;
    std::fs::write(out_dir.path().join("b.zip"), b"previous bundle")?;

    let result = RenderEngine::with_options(
        LocalStorage::new(out_dir.path()),
        RenderOptions {
            force: false,
            bundle: Some("b.zip".to_string()),
        },
    )
    .run(&names)
    .await;

    assert!(matches!(result, Err(DeployError::ArtifactExists { ref path }) if path == "b.zip"));
    assert!(!out_dir.path().join("blog.service").exists());
    assert_eq!(std::fs::read(out_dir.path().join("b.zip"))?, b"previous bundle");

    Ok(())
}

#[tokio::test]
async fn test_proxy_drift_caught_when_socket_unit_is_gone() -> Result<()> {
    let config_dir = TempDir::new()?;
    let out_dir = TempDir::new()?;
    let config_path = write_config(config_dir.path(), "")?;
    let names = DeployConfig::from_file(&config_path)?.resolve()?;
    RenderEngine::new(LocalStorage::new(out_dir.path()))
        .run(&names)
        .await?;

    std::fs::remove_file(out_dir.path().join("blog.socket"))?;
    let site_path = out_dir.path().join("blog");
    let site = std::fs::read_to_string(&site_path)?;
    std::fs::write(&site_path, site.replace("/run/blog.sock", "/run/other.sock"))?;

    let set = ArtifactSet::load(&LocalStorage::new(out_dir.path()), "blog").await?;
    let report = ConsistencyChecker::new().check(&set, None);
    assert!(report.errors().any(|f| f.rule == Rule::SocketPath
        && f.message == "proxy_pass targets /run/other.sock but the socket is /run/blog.sock"));

    Ok(())
}

#[test]
fn test_unpinned_requirements_file_blocks_render() -> Result<()> {
    let config_dir = TempDir::new()?;
    let config_path = write_config(config_dir.path(), "")?;
    std::fs::write(
        config_dir.path().join("requirements.txt"),
        "Django>=4.2\ngunicorn==21.2.0\n",
    )?;

    let names = DeployConfig::from_file(&config_path)?.resolve()?;
    let engine = RenderEngine::new(LocalStorage::new(config_dir.path().join("out")));
    let err = engine.render_all(&names).unwrap_err();
    assert!(matches!(err, DeployError::ConsistencyError { .. }));
    assert!(err.user_friendly_message().contains("Django>=4.2"));

    Ok(())
}

#[test]
fn test_custom_socket_and_static_root_flow_through() -> Result<()> {
    let config_dir = TempDir::new()?;
    let config_path = write_config(
        config_dir.path(),
        r#"
[socket]
path = "/run/gunicorn/blog.sock"

[proxy]
listen_port = 8080
static_root = "/var/www/blog"
"#,
    )?;

    let names = DeployConfig::from_file(&config_path)?.resolve()?;
    let artifacts = RenderEngine::new(LocalStorage::new(config_dir.path())).render_all(&names)?;

    let by_name = |name: &str| {
        artifacts
            .iter()
            .find(|a| a.file_name == name)
            .map(|a| a.contents.clone())
            .unwrap_or_default()
    };
    assert!(by_name("blog.socket").contains("ListenStream=/run/gunicorn/blog.sock"));
    assert!(by_name("blog").contains("proxy_pass http://unix:/run/gunicorn/blog.sock;"));
    assert!(by_name("blog").contains("listen 8080;"));
    assert!(by_name("blog.env").contains("DJANGO_STATIC_ROOT=/var/www/blog/static"));

    Ok(())
}
