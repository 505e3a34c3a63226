use crate::core::manifest::{self, parse_requirements};
use crate::domain::model::{join_path, DeploymentNames, Requirement};
use crate::utils::error::{DeployError, Result};
use crate::utils::validation::{self, Validate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_WORKERS: u32 = 3;
pub const DEFAULT_GROUP: &str = "www-data";
pub const DEFAULT_LISTEN_PORT: u16 = 80;
pub const MAX_WORKERS: u32 = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    pub project: ProjectConfig,
    pub service: ServiceConfig,
    pub socket: Option<SocketConfig>,
    pub proxy: Option<ProxyConfig>,
    pub requirements: RequirementsConfig,
    pub tls: Option<TlsConfig>,
    /// Directory relative paths in the config resolve against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub repo_name: String,
    pub project_name: String,
    pub working_dir: String,
    pub domain: String,
    pub include_www: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub user: String,
    pub group: Option<String>,
    pub venv_dir: Option<String>,
    pub workers: Option<u32>,
    pub access_log: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub listen_port: Option<u16>,
    pub static_root: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequirementsConfig {
    pub packages: Option<Vec<PackagePin>>,
    /// `pip freeze` style file.
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagePin {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    pub email: Option<String>,
}

impl DeployConfig {
    /// Loads a deploy config from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(DeployError::IoError)?;
        let mut config = Self::from_toml_str(&content)?;
        config.base_dir = path.as_ref().parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| DeployError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` references (e.g. `${DEPLOY_DOMAIN}`); unset variables are left as written
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| DeployError::ConfigValidationError {
            field: "env_substitution".to_string(),
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn include_www(&self) -> bool {
        self.project.include_www.unwrap_or(true)
    }

    pub fn workers(&self) -> u32 {
        self.service.workers.unwrap_or(DEFAULT_WORKERS)
    }

    pub fn group(&self) -> &str {
        self.service.group.as_deref().unwrap_or(DEFAULT_GROUP)
    }

    pub fn venv_dir(&self) -> String {
        self.service
            .venv_dir
            .clone()
            .unwrap_or_else(|| join_path(&self.project.working_dir, "env"))
    }

    pub fn socket_path(&self) -> String {
        self.socket
            .as_ref()
            .and_then(|s| s.path.clone())
            .unwrap_or_else(|| format!("/run/{}.sock", self.project.repo_name))
    }

    pub fn listen_port(&self) -> u16 {
        self.proxy
            .as_ref()
            .and_then(|p| p.listen_port)
            .unwrap_or(DEFAULT_LISTEN_PORT)
    }

    pub fn static_root(&self) -> String {
        self.proxy
            .as_ref()
            .and_then(|p| p.static_root.clone())
            .unwrap_or_else(|| self.project.working_dir.clone())
    }

    pub fn server_names(&self) -> Vec<String> {
        let mut names = vec![self.project.domain.clone()];
        if self.include_www() {
            names.push(format!("www.{}", self.project.domain));
        }
        names
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_repo_name("project.repo_name", &self.project.repo_name)?;
        validation::validate_python_identifier("project.project_name", &self.project.project_name)?;
        validation::validate_absolute_path("project.working_dir", &self.project.working_dir)?;
        validation::validate_domain("project.domain", &self.project.domain)?;

        if self.include_www() && self.project.domain.starts_with("www.") {
            return Err(DeployError::InvalidConfigValueError {
                field: "project.domain".to_string(),
                value: self.project.domain.clone(),
                reason: "Use the bare domain when include_www is enabled".to_string(),
            });
        }

        validation::validate_single_token("service.user", &self.service.user)?;
        validation::validate_single_token("service.group", self.group())?;
        validation::validate_absolute_path("service.venv_dir", &self.venv_dir())?;
        validation::validate_range("service.workers", self.workers(), 1, MAX_WORKERS)?;

        let socket_path = self.socket_path();
        validation::validate_absolute_path("socket.path", &socket_path)?;
        if !socket_path.ends_with(".sock") {
            return Err(DeployError::InvalidConfigValueError {
                field: "socket.path".to_string(),
                value: socket_path,
                reason: "Socket path must end in .sock".to_string(),
            });
        }

        validation::validate_range("proxy.listen_port", self.listen_port(), 1, u16::MAX)?;
        validation::validate_absolute_path("proxy.static_root", &self.static_root())?;

        if let Some(email) = self.tls.as_ref().and_then(|t| t.email.as_deref()) {
            validation::validate_single_token("tls.email", email)?;
            if !email.contains('@') {
                return Err(DeployError::InvalidConfigValueError {
                    field: "tls.email".to_string(),
                    value: email.to_string(),
                    reason: "Not an email address".to_string(),
                });
            }
        }

        match (&self.requirements.packages, &self.requirements.file) {
            (Some(_), Some(_)) => Err(DeployError::ConfigValidationError {
                field: "requirements".to_string(),
                message: "Set either 'packages' or 'file', not both".to_string(),
            }),
            (None, None) => Err(DeployError::MissingConfigError {
                field: "requirements.packages or requirements.file".to_string(),
            }),
            (Some(packages), None) => {
                for pin in packages {
                    validation::validate_non_empty_string("requirements.packages.name", &pin.name)?;
                    if !manifest::is_valid_package_name(&pin.name) {
                        return Err(DeployError::InvalidConfigValueError {
                            field: "requirements.packages.name".to_string(),
                            value: pin.name.clone(),
                            reason: "Not a valid Python package name".to_string(),
                        });
                    }
                    validation::validate_single_token(
                        "requirements.packages.version",
                        &pin.version,
                    )?;
                    if !pin
                        .version
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '!' | '*' | '_' | '-'))
                    {
                        return Err(DeployError::InvalidConfigValueError {
                            field: "requirements.packages.version".to_string(),
                            value: pin.version.clone(),
                            reason: "Expected a single exact version such as 4.2.7".to_string(),
                        });
                    }
                }
                Ok(())
            }
            (None, Some(file)) => validation::validate_non_empty_string("requirements.file", file),
        }
    }

    fn requirements_path(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn load_requirements(&self) -> Result<Vec<Requirement>> {
        if let Some(packages) = &self.requirements.packages {
            return Ok(packages
                .iter()
                .map(|pin| Requirement::pinned(pin.name.trim(), pin.version.trim()))
                .collect());
        }

        let file = validation::validate_required_field("requirements.file", &self.requirements.file)?;
        let path = self.requirements_path(file);
        tracing::debug!("Reading requirements from {}", path.display());
        let content = std::fs::read_to_string(&path)?;
        parse_requirements(&content)
    }

    /// Validates, then derives every default into the names the templates use.
    pub fn resolve(&self) -> Result<DeploymentNames> {
        self.validate()?;

        Ok(DeploymentNames {
            repo_name: self.project.repo_name.clone(),
            project_name: self.project.project_name.clone(),
            working_dir: self.project.working_dir.trim_end_matches('/').to_string(),
            domain: self.project.domain.clone(),
            server_names: self.server_names(),
            socket_path: self.socket_path(),
            user: self.service.user.clone(),
            group: self.group().to_string(),
            venv_dir: self.venv_dir().trim_end_matches('/').to_string(),
            workers: self.workers(),
            access_log: self.service.access_log.unwrap_or(true),
            listen_port: self.listen_port(),
            static_root: self.static_root().trim_end_matches('/').to_string(),
            requirements: self.load_requirements()?,
            tls_email: self.tls.as_ref().and_then(|t| t.email.clone()),
        })
    }
}

impl Validate for DeployConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
