use crate::core::consistency::{ALLOWED_HOSTS_KEY, DEBUG_KEY, STATIC_ROOT_KEY};
use crate::domain::model::{
    Artifact, ArtifactKind, DeploymentNames, NGINX_SITES_AVAILABLE, SYSTEMD_UNIT_DIR,
};
use crate::domain::ports::ArtifactTemplate;
use crate::utils::error::{DeployError, Result};
use std::fmt::Write;

const HEADER: &str = "Rendered by stack-deploy, edit the deploy config instead";

fn template_error(kind: ArtifactKind, message: impl Into<String>) -> DeployError {
    DeployError::TemplateError {
        artifact: kind.label().to_string(),
        message: message.into(),
    }
}

fn artifact(kind: ArtifactKind, names: &DeploymentNames, install_dir: String, contents: String) -> Artifact {
    Artifact {
        kind,
        file_name: kind.file_name(&names.repo_name),
        install_dir,
        contents,
    }
}

/// Values are written unquoted, so a stray newline would inject a directive.
fn ensure_single_line(kind: ArtifactKind, names: &DeploymentNames) -> Result<()> {
    let fields = [
        &names.repo_name,
        &names.project_name,
        &names.working_dir,
        &names.domain,
        &names.socket_path,
        &names.user,
        &names.group,
        &names.venv_dir,
        &names.static_root,
    ];
    if let Some(bad) = fields.iter().find(|f| f.contains(['\n', '\r'])) {
        return Err(template_error(kind, format!("value {:?} spans several lines", bad)));
    }
    Ok(())
}

pub struct ServiceUnitTemplate;

impl ArtifactTemplate for ServiceUnitTemplate {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::ServiceUnit
    }

    fn render(&self, names: &DeploymentNames) -> Result<Artifact> {
        ensure_single_line(self.kind(), names)?;
        let socket_unit = names.socket_unit_name();

        let mut exec = vec![names.gunicorn_bin()];
        if names.access_log {
            exec.push("--access-logfile -".to_string());
        }
        exec.push(format!("--workers {}", names.workers));
        exec.push(format!("--bind unix:{}", names.socket_path));
        exec.push(names.wsgi_module());

        let mut out = String::new();
        // writing to a String cannot fail
        let _ = writeln!(out, "# {}", HEADER);
        let _ = writeln!(out, "[Unit]");
        let _ = writeln!(out, "Description=gunicorn daemon for {}", names.repo_name);
        let _ = writeln!(out, "Requires={}", socket_unit);
        let _ = writeln!(out, "After=network.target {}", socket_unit);
        let _ = writeln!(out);
        let _ = writeln!(out, "[Service]");
        let _ = writeln!(out, "User={}", names.user);
        let _ = writeln!(out, "Group={}", names.group);
        let _ = writeln!(out, "WorkingDirectory={}", names.working_dir);
        let _ = writeln!(out, "EnvironmentFile={}", names.env_file_path());
        let _ = writeln!(out, "ExecStart={}", exec.join(" \\\n          "));
        let _ = writeln!(out);
        let _ = writeln!(out, "[Install]");
        let _ = writeln!(out, "WantedBy=multi-user.target");

        Ok(artifact(self.kind(), names, SYSTEMD_UNIT_DIR.to_string(), out))
    }
}

pub struct SocketUnitTemplate;

impl ArtifactTemplate for SocketUnitTemplate {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::SocketUnit
    }

    fn render(&self, names: &DeploymentNames) -> Result<Artifact> {
        ensure_single_line(self.kind(), names)?;

        let out = format!(
            "# {header}\n\
             [Unit]\n\
             Description=gunicorn socket for {repo}\n\
             \n\
             [Socket]\n\
             ListenStream={socket}\n\
             \n\
             [Install]\n\
             WantedBy=sockets.target\n",
            header = HEADER,
            repo = names.repo_name,
            socket = names.socket_path,
        );

        Ok(artifact(self.kind(), names, SYSTEMD_UNIT_DIR.to_string(), out))
    }
}

pub struct SiteBlockTemplate;

impl ArtifactTemplate for SiteBlockTemplate {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::SiteBlock
    }

    fn render(&self, names: &DeploymentNames) -> Result<Artifact> {
        ensure_single_line(self.kind(), names)?;
        if names.server_names.first() != Some(&names.domain) {
            return Err(template_error(
                self.kind(),
                "server names must start with the domain",
            ));
        }

        let out = format!(
            "# {header}\n\
             server {{\n\
             \x20   listen {port};\n\
             \x20   server_name {server_names};\n\
             \n\
             \x20   location = /favicon.ico {{ access_log off; log_not_found off; }}\n\
             \x20   location /static/ {{\n\
             \x20       root {static_root};\n\
             \x20   }}\n\
             \n\
             \x20   location / {{\n\
             \x20       include proxy_params;\n\
             \x20       proxy_pass http://unix:{socket};\n\
             \x20   }}\n\
             }}\n",
            header = HEADER,
            port = names.listen_port,
            server_names = names.server_names.join(" "),
            static_root = names.static_root,
            socket = names.socket_path,
        );

        Ok(artifact(self.kind(), names, NGINX_SITES_AVAILABLE.to_string(), out))
    }
}

pub struct RequirementsTemplate;

impl ArtifactTemplate for RequirementsTemplate {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Requirements
    }

    fn render(&self, names: &DeploymentNames) -> Result<Artifact> {
        if names.requirements.is_empty() {
            return Err(template_error(self.kind(), "no packages to pin"));
        }

        let mut requirements = names.requirements.clone();
        requirements.sort_by_key(|r| r.normalized_name());

        let mut out = format!("# {}\n", HEADER);
        for requirement in &requirements {
            out.push_str(&requirement.to_string());
            out.push('\n');
        }

        Ok(artifact(self.kind(), names, names.working_dir.clone(), out))
    }
}

pub struct EnvFileTemplate;

impl ArtifactTemplate for EnvFileTemplate {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::EnvFile
    }

    fn render(&self, names: &DeploymentNames) -> Result<Artifact> {
        ensure_single_line(self.kind(), names)?;

        let out = format!(
            "# {}\n{}={}\n{}=False\n{}={}\n",
            HEADER,
            ALLOWED_HOSTS_KEY,
            names.server_names.join(","),
            DEBUG_KEY,
            STATIC_ROOT_KEY,
            names.django_static_root(),
        );

        Ok(artifact(self.kind(), names, names.working_dir.clone(), out))
    }
}

pub fn default_templates() -> Vec<Box<dyn ArtifactTemplate>> {
    vec![
        Box::new(ServiceUnitTemplate),
        Box::new(SocketUnitTemplate),
        Box::new(SiteBlockTemplate),
        Box::new(RequirementsTemplate),
        Box::new(EnvFileTemplate),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Requirement;

    fn names() -> DeploymentNames {
        DeploymentNames {
            repo_name: "blog".to_string(),
            project_name: "mysite".to_string(),
            working_dir: "/home/deploy/blog".to_string(),
            domain: "example.com".to_string(),
            server_names: vec!["example.com".to_string(), "www.example.com".to_string()],
            socket_path: "/run/blog.sock".to_string(),
            user: "deploy".to_string(),
            group: "www-data".to_string(),
            venv_dir: "/home/deploy/blog/env".to_string(),
            workers: 3,
            access_log: true,
            listen_port: 80,
            static_root: "/home/deploy/blog".to_string(),
            requirements: vec![
                Requirement::pinned("gunicorn", "21.2.0"),
                Requirement::pinned("Django", "4.2.7"),
                Requirement::pinned("asgiref", "3.7.2"),
            ],
            tls_email: None,
        }
    }

    #[test]
    fn test_service_unit() {
        let artifact = ServiceUnitTemplate.render(&names()).unwrap();
        assert_eq!(artifact.install_path(), "/etc/systemd/system/blog.service");
        let text = artifact.contents;
        assert!(text.contains("Requires=blog.socket\n"));
        assert!(text.contains("After=network.target blog.socket\n"));
        assert!(text.contains("WorkingDirectory=/home/deploy/blog\n"));
        assert!(text.contains("EnvironmentFile=/home/deploy/blog/blog.env\n"));
        assert!(text.contains(
            "ExecStart=/home/deploy/blog/env/bin/gunicorn \\\n          --access-logfile - \\\n"
        ));
        assert!(text.contains("--bind unix:/run/blog.sock \\\n          mysite.wsgi:application\n"));
    }

    #[test]
    fn test_service_unit_without_access_log() {
        let mut names = names();
        names.access_log = false;
        names.workers = 5;
        let text = ServiceUnitTemplate.render(&names).unwrap().contents;
        assert!(!text.contains("--access-logfile"));
        assert!(text.contains("--workers 5"));
    }

    #[test]
    fn test_socket_unit() {
        let artifact = SocketUnitTemplate.render(&names()).unwrap();
        assert_eq!(artifact.file_name, "blog.socket");
        assert!(artifact.contents.contains("[Socket]\nListenStream=/run/blog.sock\n"));
        assert!(artifact.contents.ends_with("[Install]\nWantedBy=sockets.target\n"));
    }

    #[test]
    fn test_site_block() {
        let artifact = SiteBlockTemplate.render(&names()).unwrap();
        assert_eq!(artifact.install_path(), "/etc/nginx/sites-available/blog");
        let text = artifact.contents;
        assert!(text.contains("    listen 80;\n"));
        assert!(text.contains("    server_name example.com www.example.com;\n"));
        assert!(text.contains("        root /home/deploy/blog;\n"));
        assert!(text.contains("        proxy_pass http://unix:/run/blog.sock;\n"));
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn test_site_block_requires_domain_first() {
        let mut names = names();
        names.server_names.reverse();
        assert!(matches!(
            SiteBlockTemplate.render(&names),
            Err(DeployError::TemplateError { .. })
        ));
    }

    #[test]
    fn test_requirements_sorted() {
        let artifact = RequirementsTemplate.render(&names()).unwrap();
        assert_eq!(artifact.install_path(), "/home/deploy/blog/requirements.txt");
        let lines: Vec<&str> = artifact.contents.lines().skip(1).collect();
        assert_eq!(lines, vec!["asgiref==3.7.2", "Django==4.2.7", "gunicorn==21.2.0"]);
    }

    #[test]
    fn test_env_file() {
        let artifact = EnvFileTemplate.render(&names()).unwrap();
        assert_eq!(artifact.install_path(), "/home/deploy/blog/blog.env");
        assert!(artifact
            .contents
            .contains("DJANGO_ALLOWED_HOSTS=example.com,www.example.com\n"));
        assert!(artifact.contents.contains("DJANGO_DEBUG=False\n"));
        assert!(artifact
            .contents
            .contains("DJANGO_STATIC_ROOT=/home/deploy/blog/static\n"));
    }

    #[test]
    fn test_multiline_values_rejected() {
        let mut names = names();
        names.user = "deploy\nExecStartPre=/bin/true".to_string();
        assert!(ServiceUnitTemplate.render(&names).is_err());
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let names = names();
        for template in default_templates() {
            assert_eq!(
                template.render(&names).unwrap(),
                template.render(&names).unwrap(),
                "{} differs between renders",
                template.kind()
            );
        }
    }
}
