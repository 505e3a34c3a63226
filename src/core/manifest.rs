use crate::core::consistency::{Finding, Rule};
use crate::domain::model::{ArtifactKind, Requirement};
use crate::utils::error::{DeployError, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

const OPERATORS: [&str; 8] = ["===", "==", "!=", "~=", ">=", "<=", ">", "<"];

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9._-]*[A-Za-z0-9])?(\[[A-Za-z0-9._,\s-]*\])?$")
            .expect("valid regex")
    })
}

/// Whether `name` is a distribution name (optionally with extras) pip accepts.
pub fn is_valid_package_name(name: &str) -> bool {
    name_pattern().is_match(name)
}

/// Parses a flat `pip freeze` style file. Options such as `-r` and `-e` and
/// direct URL references are rejected since they cannot be pinned reproducibly.
pub fn parse_requirements(content: &str) -> Result<Vec<Requirement>> {
    let mut requirements = Vec::new();

    for raw in content.lines() {
        let line = match raw.find(" #") {
            Some(idx) => &raw[..idx],
            None => raw,
        }
        .trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.starts_with('-') || line.contains(" @ ") || line.contains("://") {
            return Err(DeployError::UnsupportedRequirement {
                line: line.to_string(),
            });
        }

        requirements.push(parse_requirement_line(line)?);
    }

    Ok(requirements)
}

fn parse_requirement_line(line: &str) -> Result<Requirement> {
    let (spec, marker) = match line.split_once(';') {
        Some((spec, marker)) => (spec.trim(), Some(marker.trim().to_string())),
        None => (line, None),
    };

    let op_start = spec.find(|c: char| matches!(c, '=' | '!' | '~' | '>' | '<'));
    let (name, specifier) = match op_start {
        Some(idx) => {
            let rest = &spec[idx..];
            let op = OPERATORS
                .iter()
                .find(|op| rest.starts_with(*op))
                .ok_or_else(|| DeployError::UnsupportedRequirement {
                    line: line.to_string(),
                })?;
            let version = rest[op.len()..].trim();
            if version.is_empty() || version.contains(',') {
                return Err(DeployError::UnsupportedRequirement {
                    line: line.to_string(),
                });
            }
            (spec[..idx].trim(), Some((op.to_string(), version.to_string())))
        }
        None => (spec.trim(), None),
    };

    if !is_valid_package_name(name) {
        return Err(DeployError::UnsupportedRequirement {
            line: line.to_string(),
        });
    }

    Ok(Requirement {
        name: name.to_string(),
        specifier,
        marker: marker.filter(|m| !m.is_empty()),
    })
}

/// Every entry must be pinned with `==`, listed once, and the list must carry
/// gunicorn because the service unit executes it.
pub fn validate_pins(requirements: &[Requirement]) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut seen: HashMap<String, &str> = HashMap::new();

    for requirement in requirements {
        if requirement.pinned_version().is_none() {
            findings.push(Finding::error(
                Rule::Manifest,
                ArtifactKind::Requirements,
                format!("'{}' is not pinned with ==", requirement),
            ));
        }

        let normalized = requirement.normalized_name();
        if let Some(previous) = seen.insert(normalized, &requirement.name) {
            findings.push(Finding::error(
                Rule::Manifest,
                ArtifactKind::Requirements,
                format!(
                    "'{}' is listed more than once (also as '{}')",
                    requirement.name, previous
                ),
            ));
        }
    }

    if !seen.contains_key("gunicorn") {
        findings.push(Finding::error(
            Rule::Manifest,
            ArtifactKind::Requirements,
            "gunicorn is missing, the service unit cannot start without it",
        ));
    }

    findings
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VersionMismatch {
    pub name: String,
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestDiff {
    pub only_left: Vec<String>,
    pub only_right: Vec<String>,
    pub version_mismatch: Vec<VersionMismatch>,
}

impl ManifestDiff {
    pub fn is_reproducible(&self) -> bool {
        self.only_left.is_empty() && self.only_right.is_empty() && self.version_mismatch.is_empty()
    }

    pub fn render_text(&self) -> String {
        if self.is_reproducible() {
            return "✅ Manifests resolve to the same package set\n".to_string();
        }

        let mut out = String::new();
        for name in &self.only_left {
            out.push_str(&format!("- {} (left only)\n", name));
        }
        for name in &self.only_right {
            out.push_str(&format!("+ {} (right only)\n", name));
        }
        for mismatch in &self.version_mismatch {
            out.push_str(&format!(
                "~ {}: {} != {}\n",
                mismatch.name, mismatch.left, mismatch.right
            ));
        }
        out
    }
}

fn version_map(requirements: &[Requirement]) -> BTreeMap<String, String> {
    requirements
        .iter()
        .map(|r| {
            let version = match &r.specifier {
                Some((op, version)) => format!("{}{}", op, version),
                None => "*".to_string(),
            };
            (r.normalized_name(), version)
        })
        .collect()
}

/// Two manifests are reproducible when their normalized name to version maps
/// are equal.
pub fn compare(left: &[Requirement], right: &[Requirement]) -> ManifestDiff {
    let left = version_map(left);
    let right = version_map(right);
    let mut diff = ManifestDiff::default();

    for (name, left_version) in &left {
        match right.get(name) {
            None => diff.only_left.push(name.clone()),
            Some(right_version) if right_version != left_version => {
                diff.version_mismatch.push(VersionMismatch {
                    name: name.clone(),
                    left: left_version.clone(),
                    right: right_version.clone(),
                })
            }
            Some(_) => {}
        }
    }

    diff.only_right = right
        .keys()
        .filter(|name| !left.contains_key(*name))
        .cloned()
        .collect();

    diff
}
