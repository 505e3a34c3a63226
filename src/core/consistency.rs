use crate::core::manifest::{parse_requirements, validate_pins};
use crate::core::parse::{EnvFile, ExecStart, SiteBlock, UnitFile};
use crate::core::Storage;
use crate::domain::model::{Artifact, ArtifactKind, DeploymentNames};
use crate::utils::error::{DeployError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

pub const ALLOWED_HOSTS_KEY: &str = "DJANGO_ALLOWED_HOSTS";
pub const STATIC_ROOT_KEY: &str = "DJANGO_STATIC_ROOT";
pub const DEBUG_KEY: &str = "DJANGO_DEBUG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rule {
    SocketPath,
    Host,
    UnitLink,
    Paths,
    Manifest,
    Syntax,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Rule::SocketPath => "socket-path",
            Rule::Host => "host",
            Rule::UnitLink => "unit-link",
            Rule::Paths => "paths",
            Rule::Manifest => "manifest",
            Rule::Syntax => "syntax",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub rule: Rule,
    pub severity: FindingSeverity,
    pub artifact: ArtifactKind,
    pub message: String,
}

impl Finding {
    pub fn error(rule: Rule, artifact: ArtifactKind, message: impl Into<String>) -> Self {
        Self {
            rule,
            severity: FindingSeverity::Error,
            artifact,
            message: message.into(),
        }
    }

    pub fn warning(rule: Rule, artifact: ArtifactKind, message: impl Into<String>) -> Self {
        Self {
            rule,
            severity: FindingSeverity::Warning,
            artifact,
            message: message.into(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.rule, self.artifact, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub findings: Vec<Finding>,
}

impl Report {
    pub fn is_ok(&self) -> bool {
        !self
            .findings
            .iter()
            .any(|f| f.severity == FindingSeverity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == FindingSeverity::Error)
    }

    pub fn has_rule(&self, rule: Rule) -> bool {
        self.errors().any(|f| f.rule == rule)
    }

    pub fn render_text(&self) -> String {
        if self.findings.is_empty() {
            return "✅ All artifacts agree\n".to_string();
        }
        let mut out = String::new();
        for finding in &self.findings {
            let icon = match finding.severity {
                FindingSeverity::Error => "❌",
                FindingSeverity::Warning => "⚠️",
            };
            out.push_str(&format!("{} {}\n", icon, finding));
        }
        out
    }

    pub fn render_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_ok() {
            return Ok(());
        }
        Err(DeployError::ConsistencyError {
            violations: self.errors().map(Finding::to_string).collect(),
        })
    }
}

/// Raw text of each artifact; a missing entry is reported, not an error.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSet {
    pub repo_name: String,
    texts: BTreeMap<ArtifactKind, String>,
}

impl ArtifactSet {
    pub fn new(repo_name: impl Into<String>) -> Self {
        Self {
            repo_name: repo_name.into(),
            texts: BTreeMap::new(),
        }
    }

    pub fn from_artifacts(repo_name: impl Into<String>, artifacts: &[Artifact]) -> Self {
        let mut set = Self::new(repo_name);
        for artifact in artifacts {
            set.insert(artifact.kind, artifact.contents.clone());
        }
        set
    }

    pub fn insert(&mut self, kind: ArtifactKind, text: impl Into<String>) {
        self.texts.insert(kind, text.into());
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<&str> {
        self.texts.get(&kind).map(String::as_str)
    }

    /// Reads the artifacts by their conventional file names.
    pub async fn load<S: Storage>(storage: &S, repo_name: &str) -> Result<Self> {
        let mut set = Self::new(repo_name);
        for kind in ArtifactKind::ALL {
            let file_name = kind.file_name(repo_name);
            if !storage.exists(&file_name).await {
                tracing::debug!("{} not found at {}", kind, file_name);
                continue;
            }
            let bytes = storage.read_file(&file_name).await?;
            let text = String::from_utf8(bytes).map_err(|e| DeployError::ParseError {
                artifact: kind.label().to_string(),
                line: 0,
                message: format!("not valid UTF-8: {}", e),
            })?;
            set.insert(kind, text);
        }
        Ok(set)
    }
}

/// What could be read out of the artifacts before the rules run.
#[derive(Default)]
struct Parsed {
    service: Option<UnitFile>,
    exec: Option<ExecStart>,
    socket: Option<UnitFile>,
    site: Option<SiteBlock>,
    env: Option<EnvFile>,
}

#[derive(Debug, Clone, Default)]
pub struct ConsistencyChecker;

impl ConsistencyChecker {
    pub fn new() -> Self {
        Self
    }

    /// Runs every rule; with `expected` the artifacts are also held to the
    /// values of a deploy config, otherwise only to each other.
    pub fn check(&self, set: &ArtifactSet, expected: Option<&DeploymentNames>) -> Report {
        let mut findings = Vec::new();
        let parsed = self.parse_all(set, &mut findings);

        self.check_socket_path(&parsed, expected, &mut findings);
        self.check_hosts(&parsed, expected, &mut findings);
        self.check_unit_link(&parsed, &set.repo_name, &mut findings);
        self.check_paths(&parsed, expected, &mut findings);
        self.check_manifest(set, &mut findings);

        for finding in &findings {
            tracing::debug!("{}", finding);
        }
        Report { findings }
    }

    fn parse_all(&self, set: &ArtifactSet, findings: &mut Vec<Finding>) -> Parsed {
        let mut parsed = Parsed::default();

        for kind in ArtifactKind::ALL {
            let Some(text) = set.get(kind) else {
                findings.push(Finding::error(
                    Rule::Syntax,
                    kind,
                    format!("{} is missing", kind.file_name(&set.repo_name)),
                ));
                continue;
            };

            let outcome = match kind {
                ArtifactKind::ServiceUnit => {
                    UnitFile::parse(kind, text).map(|unit| parsed.service = Some(unit))
                }
                ArtifactKind::SocketUnit => {
                    UnitFile::parse(kind, text).map(|unit| parsed.socket = Some(unit))
                }
                ArtifactKind::SiteBlock => SiteBlock::parse(text).map(|site| parsed.site = Some(site)),
                ArtifactKind::EnvFile => EnvFile::parse(text).map(|env| parsed.env = Some(env)),
                // parsed again by the manifest rule
                ArtifactKind::Requirements => parse_requirements(text).map(|_| ()),
            };

            if let Err(e) = outcome {
                findings.push(Finding::error(Rule::Syntax, kind, e.to_string()));
            }
        }

        for (unit, kind, section) in [
            (&parsed.service, ArtifactKind::ServiceUnit, "Service"),
            (&parsed.socket, ArtifactKind::SocketUnit, "Socket"),
        ] {
            if unit.as_ref().is_some_and(|unit| !unit.has_section(section)) {
                findings.push(Finding::error(
                    Rule::Syntax,
                    kind,
                    format!("no [{}] section", section),
                ));
            }
        }

        if let Some(service) = &parsed.service {
            match service.get("Service", "ExecStart") {
                Some(exec) if !exec.is_empty() => parsed.exec = Some(ExecStart::parse(exec)),
                _ => findings.push(Finding::error(
                    Rule::Syntax,
                    ArtifactKind::ServiceUnit,
                    "[Service] has no ExecStart=",
                )),
            }
        }

        parsed
    }

    fn check_socket_path(
        &self,
        parsed: &Parsed,
        expected: Option<&DeploymentNames>,
        findings: &mut Vec<Finding>,
    ) {
        let mut anchor: Option<String> = expected.map(|names| names.socket_path.clone());

        if let Some(socket) = &parsed.socket {
            let listen = socket.get_all("Socket", "ListenStream");
            match listen.as_slice() {
                [path] => {
                    if let Some(want) = &anchor {
                        if path != want {
                            findings.push(Finding::error(
                                Rule::SocketPath,
                                ArtifactKind::SocketUnit,
                                format!("ListenStream={} but the config says {}", path, want),
                            ));
                        }
                    }
                    if !path.starts_with('/') {
                        findings.push(Finding::error(
                            Rule::SocketPath,
                            ArtifactKind::SocketUnit,
                            format!("ListenStream={} is not a filesystem path", path),
                        ));
                    }
                    anchor.get_or_insert_with(|| path.to_string());
                }
                [] => findings.push(Finding::error(
                    Rule::SocketPath,
                    ArtifactKind::SocketUnit,
                    "[Socket] has no ListenStream=",
                )),
                many => findings.push(Finding::error(
                    Rule::SocketPath,
                    ArtifactKind::SocketUnit,
                    format!("expected one ListenStream=, found {}", many.len()),
                )),
            }
        }

        let binds: Vec<&str> = parsed
            .exec
            .as_ref()
            .map(ExecStart::unix_binds)
            .unwrap_or_default();
        // without a config or a usable socket unit, the service is the reference
        if anchor.is_none() {
            if let [first, rest @ ..] = binds.as_slice() {
                if rest.iter().all(|bind| bind == first) {
                    anchor = Some(first.to_string());
                }
            }
        }

        if let Some(exec) = &parsed.exec {
            if binds.is_empty() {
                findings.push(Finding::error(
                    Rule::SocketPath,
                    ArtifactKind::ServiceUnit,
                    format!(
                        "gunicorn does not bind a unix socket (bind: {})",
                        if exec.bind.is_empty() {
                            "none".to_string()
                        } else {
                            exec.bind.join(", ")
                        }
                    ),
                ));
            }
            match &anchor {
                Some(anchor) => {
                    for bind in binds.iter().filter(|bind| *bind != anchor) {
                        findings.push(Finding::error(
                            Rule::SocketPath,
                            ArtifactKind::ServiceUnit,
                            format!("--bind unix:{} does not match socket {}", bind, anchor),
                        ));
                    }
                }
                None if binds.len() > 1 => findings.push(Finding::error(
                    Rule::SocketPath,
                    ArtifactKind::ServiceUnit,
                    format!("gunicorn binds {} different unix sockets", binds.len()),
                )),
                None => {}
            }
        }

        if let Some(site) = &parsed.site {
            let targets = site.proxy_targets();
            if targets.is_empty() {
                findings.push(Finding::error(
                    Rule::SocketPath,
                    ArtifactKind::SiteBlock,
                    "no location proxies to the application socket",
                ));
            }
            for target in targets {
                if let Some(other) = target.strip_prefix('!') {
                    findings.push(Finding::warning(
                        Rule::SocketPath,
                        ArtifactKind::SiteBlock,
                        format!("proxy_pass {} does not go through a unix socket", other),
                    ));
                    continue;
                }
                match &anchor {
                    Some(anchor) if target != *anchor => findings.push(Finding::error(
                        Rule::SocketPath,
                        ArtifactKind::SiteBlock,
                        format!("proxy_pass targets {} but the socket is {}", target, anchor),
                    )),
                    None if !binds.is_empty() && !binds.contains(&target.as_str()) => {
                        findings.push(Finding::error(
                            Rule::SocketPath,
                            ArtifactKind::SiteBlock,
                            format!(
                                "proxy_pass targets {} but gunicorn binds {}",
                                target,
                                binds.join(", ")
                            ),
                        ))
                    }
                    _ => {}
                }
            }
        }
    }

    fn check_hosts(
        &self,
        parsed: &Parsed,
        expected: Option<&DeploymentNames>,
        findings: &mut Vec<Finding>,
    ) {
        let site_names = parsed.site.as_ref().map(SiteBlock::server_names);
        let allowed = parsed.env.as_ref().map(|env| env.list(ALLOWED_HOSTS_KEY));

        if let Some(names) = expected {
            if let Some(site_names) = &site_names {
                if site_names.first() != Some(&names.domain) {
                    findings.push(Finding::error(
                        Rule::Host,
                        ArtifactKind::SiteBlock,
                        format!(
                            "primary server_name is {} but the domain is {}",
                            site_names.first().map(String::as_str).unwrap_or("unset"),
                            names.domain
                        ),
                    ));
                }
                let ports = parsed
                    .site
                    .as_ref()
                    .map(SiteBlock::listen_ports)
                    .unwrap_or_default();
                if !ports.contains(&names.listen_port.to_string()) {
                    findings.push(Finding::error(
                        Rule::Host,
                        ArtifactKind::SiteBlock,
                        format!(
                            "no server listens on port {} (found: {})",
                            names.listen_port,
                            ports.join(", ")
                        ),
                    ));
                }
                for missing in names.server_names.iter().filter(|n| !site_names.contains(n)) {
                    findings.push(Finding::error(
                        Rule::Host,
                        ArtifactKind::SiteBlock,
                        format!("server_name is missing {}", missing),
                    ));
                }
                for extra in site_names.iter().filter(|n| !names.server_names.contains(n)) {
                    findings.push(Finding::error(
                        Rule::Host,
                        ArtifactKind::SiteBlock,
                        format!("server_name {} is not configured for {}", extra, names.domain),
                    ));
                }
            }
            if let Some(allowed) = &allowed {
                if allowed.first() != Some(&names.domain) {
                    findings.push(Finding::error(
                        Rule::Host,
                        ArtifactKind::EnvFile,
                        format!(
                            "first allowed host is {} but the domain is {}",
                            allowed.first().map(String::as_str).unwrap_or("unset"),
                            names.domain
                        ),
                    ));
                }
                for extra in allowed.iter().filter(|h| !names.server_names.contains(h)) {
                    findings.push(Finding::error(
                        Rule::Host,
                        ArtifactKind::EnvFile,
                        format!("allowed host {} is not configured for {}", extra, names.domain),
                    ));
                }
            }
        }

        if let (Some(site_names), Some(allowed)) = (&site_names, &allowed) {
            if allowed.is_empty() {
                findings.push(Finding::error(
                    Rule::Host,
                    ArtifactKind::EnvFile,
                    format!("{} is not set", ALLOWED_HOSTS_KEY),
                ));
                return;
            }
            if site_names.first() != allowed.first() {
                findings.push(Finding::error(
                    Rule::Host,
                    ArtifactKind::EnvFile,
                    format!(
                        "first allowed host {} differs from primary server_name {}",
                        allowed[0],
                        site_names.first().map(String::as_str).unwrap_or("unset")
                    ),
                ));
            }
            for host in allowed.iter().filter(|h| !site_names.contains(h)) {
                findings.push(Finding::error(
                    Rule::Host,
                    ArtifactKind::SiteBlock,
                    format!("allowed host {} is not a server_name", host),
                ));
            }
            for name in site_names.iter().filter(|n| !allowed.contains(n)) {
                findings.push(Finding::error(
                    Rule::Host,
                    ArtifactKind::EnvFile,
                    format!("server_name {} is not an allowed host", name),
                ));
            }
        }
    }

    fn check_unit_link(&self, parsed: &Parsed, repo_name: &str, findings: &mut Vec<Finding>) {
        let socket_unit = format!("{}.socket", repo_name);

        if let Some(service) = &parsed.service {
            for key in ["Requires", "After"] {
                if !service.get_list("Unit", key).contains(&socket_unit.as_str()) {
                    findings.push(Finding::error(
                        Rule::UnitLink,
                        ArtifactKind::ServiceUnit,
                        format!("{}= does not name {}", key, socket_unit),
                    ));
                }
            }
            if service.get("Install", "WantedBy").is_none() {
                findings.push(Finding::warning(
                    Rule::UnitLink,
                    ArtifactKind::ServiceUnit,
                    "[Install] has no WantedBy=, the service cannot be enabled",
                ));
            }
        }

        if let Some(socket) = &parsed.socket {
            if !socket.get_list("Install", "WantedBy").contains(&"sockets.target") {
                findings.push(Finding::error(
                    Rule::UnitLink,
                    ArtifactKind::SocketUnit,
                    "WantedBy= does not name sockets.target, the socket is not bound at boot",
                ));
            }
            if let Some(service) = socket.get("Socket", "Service") {
                let own = format!("{}.service", repo_name);
                if service != own {
                    findings.push(Finding::error(
                        Rule::UnitLink,
                        ArtifactKind::SocketUnit,
                        format!("Service={} but the service unit is {}", service, own),
                    ));
                }
            }
        }
    }

    fn check_paths(
        &self,
        parsed: &Parsed,
        expected: Option<&DeploymentNames>,
        findings: &mut Vec<Finding>,
    ) {
        if let Some(service) = &parsed.service {
            match (service.get("Service", "WorkingDirectory"), expected) {
                (None, _) => findings.push(Finding::error(
                    Rule::Paths,
                    ArtifactKind::ServiceUnit,
                    "[Service] has no WorkingDirectory=",
                )),
                (Some(dir), Some(names)) if dir.trim_end_matches('/') != names.working_dir => {
                    findings.push(Finding::error(
                        Rule::Paths,
                        ArtifactKind::ServiceUnit,
                        format!(
                            "WorkingDirectory={} but the project lives in {}",
                            dir, names.working_dir
                        ),
                    ))
                }
                _ => {}
            }

            match (service.get("Service", "EnvironmentFile"), expected) {
                (None, _) => findings.push(Finding::warning(
                    Rule::Paths,
                    ArtifactKind::ServiceUnit,
                    "no EnvironmentFile=, allowed hosts come from elsewhere",
                )),
                (Some(file), Some(names)) if file.trim_start_matches('-') != names.env_file_path() => {
                    findings.push(Finding::error(
                        Rule::Paths,
                        ArtifactKind::ServiceUnit,
                        format!("EnvironmentFile={} but expected {}", file, names.env_file_path()),
                    ))
                }
                _ => {}
            }
        }

        if let Some(exec) = &parsed.exec {
            if !exec.binary.ends_with("/bin/gunicorn") {
                findings.push(Finding::error(
                    Rule::Paths,
                    ArtifactKind::ServiceUnit,
                    format!("ExecStart runs {} instead of a virtualenv gunicorn", exec.binary),
                ));
            }
            match &exec.app_module {
                None => findings.push(Finding::error(
                    Rule::Paths,
                    ArtifactKind::ServiceUnit,
                    "ExecStart names no WSGI application",
                )),
                Some(module) if !module.ends_with(".wsgi:application") => {
                    findings.push(Finding::warning(
                        Rule::Paths,
                        ArtifactKind::ServiceUnit,
                        format!("WSGI application {} is not a <project>.wsgi:application entry", module),
                    ))
                }
                _ => {}
            }

            if let Some(names) = expected {
                if exec.binary != names.gunicorn_bin() {
                    findings.push(Finding::error(
                        Rule::Paths,
                        ArtifactKind::ServiceUnit,
                        format!("ExecStart runs {} but expected {}", exec.binary, names.gunicorn_bin()),
                    ));
                }
                if exec.app_module.as_deref().is_some_and(|m| m != names.wsgi_module()) {
                    findings.push(Finding::error(
                        Rule::Paths,
                        ArtifactKind::ServiceUnit,
                        format!(
                            "WSGI application {} but expected {}",
                            exec.app_module.as_deref().unwrap_or_default(),
                            names.wsgi_module()
                        ),
                    ));
                }
                let workers = names.workers.to_string();
                if exec.workers.as_deref() != Some(workers.as_str()) {
                    findings.push(Finding::error(
                        Rule::Paths,
                        ArtifactKind::ServiceUnit,
                        format!(
                            "--workers is {} but expected {}",
                            exec.workers.as_deref().unwrap_or("unset"),
                            workers
                        ),
                    ));
                }
            }
        }

        let served = parsed
            .site
            .as_ref()
            .and_then(SiteBlock::static_location)
            .map(|location| location.served_dir());
        let collected = parsed
            .env
            .as_ref()
            .and_then(|env| env.get(STATIC_ROOT_KEY))
            .map(|dir| dir.trim_end_matches('/').to_string());

        if parsed.site.is_some() && served.is_none() {
            findings.push(Finding::warning(
                Rule::Paths,
                ArtifactKind::SiteBlock,
                "no location serves /static/, the application will serve its own assets",
            ));
        }
        if let (Some(served), Some(collected)) = (&served, &collected) {
            if served != collected {
                findings.push(Finding::error(
                    Rule::Paths,
                    ArtifactKind::EnvFile,
                    format!(
                        "{}={} but nginx serves /static/ from {}",
                        STATIC_ROOT_KEY, collected, served
                    ),
                ));
            }
        }
        if let (Some(served), Some(names)) = (&served, expected) {
            if *served != names.django_static_root() {
                findings.push(Finding::error(
                    Rule::Paths,
                    ArtifactKind::SiteBlock,
                    format!(
                        "/static/ is served from {} but expected {}",
                        served,
                        names.django_static_root()
                    ),
                ));
            }
        }

        if let Some(env) = &parsed.env {
            if env
                .get(DEBUG_KEY)
                .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
            {
                findings.push(Finding::warning(
                    Rule::Paths,
                    ArtifactKind::EnvFile,
                    format!("{} is enabled on a public host", DEBUG_KEY),
                ));
            }
        }
    }

    fn check_manifest(&self, set: &ArtifactSet, findings: &mut Vec<Finding>) {
        let Some(text) = set.get(ArtifactKind::Requirements) else {
            return;
        };
        if let Ok(requirements) = parse_requirements(text) {
            findings.extend(validate_pins(&requirements));
        }
    }
}
