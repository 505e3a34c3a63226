use crate::utils::error::{DeployError, Result};
use regex::Regex;
use std::sync::OnceLock;
use url::Host;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

fn invalid(field_name: &str, value: &str, reason: impl Into<String>) -> DeployError {
    DeployError::InvalidConfigValueError {
        field: field_name.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn repo_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]*$").expect("valid regex"))
}

fn python_identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid regex"))
}

/// Unit and site file names are derived from the repository name, so it has to
/// be usable as a bare file name.
pub fn validate_repo_name(field_name: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid(field_name, name, "Repository name cannot be empty"));
    }
    if !repo_name_pattern().is_match(name) {
        return Err(invalid(
            field_name,
            name,
            "Only letters, digits, '_', '.' and '-' are allowed, and it cannot start with '.' or '-'",
        ));
    }
    Ok(())
}

pub fn validate_python_identifier(field_name: &str, name: &str) -> Result<()> {
    if !python_identifier_pattern().is_match(name) {
        return Err(invalid(
            field_name,
            name,
            "Must be an importable Python package name",
        ));
    }
    Ok(())
}

/// Paths end up unquoted in unit and site files.
pub fn validate_absolute_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(invalid(field_name, path, "Path cannot be empty"));
    }

    if path.contains('\0') {
        return Err(invalid(field_name, path, "Path contains null bytes"));
    }

    if path.chars().any(char::is_whitespace) {
        return Err(invalid(field_name, path, "Path cannot contain whitespace"));
    }

    if !path.starts_with('/') {
        return Err(invalid(field_name, path, "Path must be absolute"));
    }

    Ok(())
}

pub fn validate_domain(field_name: &str, domain: &str) -> Result<()> {
    if domain.trim().is_empty() {
        return Err(invalid(field_name, domain, "Domain cannot be empty"));
    }

    match Host::parse(domain) {
        Ok(Host::Domain(parsed)) => {
            if parsed != domain {
                return Err(invalid(
                    field_name,
                    domain,
                    format!("Domain is not in canonical form, expected '{}'", parsed),
                ));
            }
            if !parsed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
            {
                return Err(invalid(
                    field_name,
                    domain,
                    "Only letters, digits, '-' and '.' are allowed in a DNS name",
                ));
            }
            if !parsed.contains('.') {
                return Err(invalid(field_name, domain, "Domain needs at least one dot"));
            }
            Ok(())
        }
        Ok(_) => Err(invalid(
            field_name,
            domain,
            "IP addresses cannot be used as a server name for certificate issuance",
        )),
        Err(e) => Err(invalid(field_name, domain, format!("Invalid domain: {}", e))),
    }
}

pub fn validate_required_field<'a, T>(field_name: &str, value: &'a Option<T>) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| DeployError::MissingConfigError {
        field: field_name.to_string(),
    })
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(
            field_name,
            value,
            "Value cannot be empty or whitespace-only",
        ));
    }
    Ok(())
}

pub fn validate_single_token(field_name: &str, value: &str) -> Result<()> {
    validate_non_empty_string(field_name, value)?;
    if value.chars().any(char::is_whitespace) {
        return Err(invalid(field_name, value, "Value cannot contain whitespace"));
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(invalid(
            field_name,
            &value.to_string(),
            format!("Value must be between {} and {}", min, max),
        ));
    }
    Ok(())
}
