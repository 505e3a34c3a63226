use serde::{Deserialize, Serialize};
use std::fmt;

pub const SYSTEMD_UNIT_DIR: &str = "/etc/systemd/system";
pub const NGINX_SITES_AVAILABLE: &str = "/etc/nginx/sites-available";
pub const NGINX_SITES_ENABLED: &str = "/etc/nginx/sites-enabled";
pub const REQUIREMENTS_FILE_NAME: &str = "requirements.txt";

/// Every identifier the artifacts share, resolved and validated once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentNames {
    pub repo_name: String,
    pub project_name: String,
    pub working_dir: String,
    pub domain: String,
    /// `domain` first, then aliases such as `www.<domain>`.
    pub server_names: Vec<String>,
    pub socket_path: String,
    pub user: String,
    pub group: String,
    pub venv_dir: String,
    pub workers: u32,
    pub access_log: bool,
    pub listen_port: u16,
    pub static_root: String,
    pub requirements: Vec<Requirement>,
    pub tls_email: Option<String>,
}

impl DeploymentNames {
    pub fn service_unit_name(&self) -> String {
        format!("{}.service", self.repo_name)
    }

    pub fn socket_unit_name(&self) -> String {
        format!("{}.socket", self.repo_name)
    }

    pub fn site_file_name(&self) -> String {
        self.repo_name.clone()
    }

    pub fn env_file_name(&self) -> String {
        format!("{}.env", self.repo_name)
    }

    pub fn env_file_path(&self) -> String {
        join_path(&self.working_dir, &self.env_file_name())
    }

    pub fn gunicorn_bin(&self) -> String {
        join_path(&self.venv_dir, "bin/gunicorn")
    }

    pub fn wsgi_module(&self) -> String {
        format!("{}.wsgi:application", self.project_name)
    }

    /// Directory Django collects static files into; nginx serves `/static/`
    /// from `static_root`, so the two must line up.
    pub fn django_static_root(&self) -> String {
        join_path(&self.static_root, "static")
    }
}

pub fn join_path(base: &str, tail: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), tail)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    ServiceUnit,
    SocketUnit,
    SiteBlock,
    Requirements,
    EnvFile,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 5] = [
        ArtifactKind::ServiceUnit,
        ArtifactKind::SocketUnit,
        ArtifactKind::SiteBlock,
        ArtifactKind::Requirements,
        ArtifactKind::EnvFile,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ArtifactKind::ServiceUnit => "service unit",
            ArtifactKind::SocketUnit => "socket unit",
            ArtifactKind::SiteBlock => "site block",
            ArtifactKind::Requirements => "requirements",
            ArtifactKind::EnvFile => "environment file",
        }
    }

    /// Conventional file name for a repository.
    pub fn file_name(&self, repo_name: &str) -> String {
        match self {
            ArtifactKind::ServiceUnit => format!("{}.service", repo_name),
            ArtifactKind::SocketUnit => format!("{}.socket", repo_name),
            ArtifactKind::SiteBlock => repo_name.to_string(),
            ArtifactKind::Requirements => REQUIREMENTS_FILE_NAME.to_string(),
            ArtifactKind::EnvFile => format!("{}.env", repo_name),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub file_name: String,
    /// Absolute directory on the host the file belongs in.
    pub install_dir: String,
    pub contents: String,
}

impl Artifact {
    pub fn install_path(&self) -> String {
        join_path(&self.install_dir, &self.file_name)
    }
}

/// One line of a pip requirements file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    /// Comparison operator and version, e.g. `("==", "4.2.7")`.
    pub specifier: Option<(String, String)>,
    pub marker: Option<String>,
}

impl Requirement {
    pub fn pinned(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            specifier: Some(("==".to_string(), version.into())),
            marker: None,
        }
    }

    /// PEP 503 normalized name.
    pub fn normalized_name(&self) -> String {
        normalize_package_name(&self.name)
    }

    pub fn pinned_version(&self) -> Option<&str> {
        match &self.specifier {
            Some((op, version)) if op == "==" => Some(version.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some((op, version)) = &self.specifier {
            write!(f, "{}{}", op, version)?;
        }
        if let Some(marker) = &self.marker {
            write!(f, "; {}", marker)?;
        }
        Ok(())
    }
}

pub fn normalize_package_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                normalized.push('-');
            }
            in_separator = true;
        } else {
            normalized.push(c.to_ascii_lowercase());
            in_separator = false;
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_package_name() {
        assert_eq!(normalize_package_name("Django"), "django");
        assert_eq!(normalize_package_name("python_dotenv"), "python-dotenv");
        assert_eq!(normalize_package_name("zope.interface"), "zope-interface");
        assert_eq!(normalize_package_name("A__b-.C"), "a-b-c");
    }

    #[test]
    fn test_requirement_display() {
        let pin = Requirement::pinned("gunicorn", "21.2.0");
        assert_eq!(pin.to_string(), "gunicorn==21.2.0");
        assert_eq!(pin.pinned_version(), Some("21.2.0"));

        let ranged = Requirement {
            name: "psycopg2-binary".to_string(),
            specifier: Some((">=".to_string(), "2.9".to_string())),
            marker: Some("python_version >= \"3.8\"".to_string()),
        };
        assert_eq!(
            ranged.to_string(),
            "psycopg2-binary>=2.9; python_version >= \"3.8\""
        );
        assert_eq!(ranged.pinned_version(), None);
    }

    #[test]
    fn test_artifact_file_names() {
        assert_eq!(ArtifactKind::ServiceUnit.file_name("blog"), "blog.service");
        assert_eq!(ArtifactKind::SocketUnit.file_name("blog"), "blog.socket");
        assert_eq!(ArtifactKind::SiteBlock.file_name("blog"), "blog");
        assert_eq!(ArtifactKind::Requirements.file_name("blog"), "requirements.txt");
        assert_eq!(ArtifactKind::EnvFile.file_name("blog"), "blog.env");
    }

    #[test]
    fn test_join_path_trims_trailing_slash() {
        assert_eq!(join_path("/srv/blog/", "env"), "/srv/blog/env");
        assert_eq!(join_path("/srv/blog", "bin/gunicorn"), "/srv/blog/bin/gunicorn");
    }
}
