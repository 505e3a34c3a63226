//! Readers for the three text formats the artifacts use: systemd unit files,
//! nginx site blocks and `KEY=VALUE` environment files.
//!
//! Each reader understands only the subset the rendered artifacts and the
//! usual hand edits (certbot included) produce.

use crate::domain::model::ArtifactKind;
use crate::utils::error::{DeployError, Result};

fn parse_error(kind: ArtifactKind, line: usize, message: impl Into<String>) -> DeployError {
    DeployError::ParseError {
        artifact: kind.label().to_string(),
        line,
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSection {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitFile {
    pub sections: Vec<UnitSection>,
}

impl UnitFile {
    pub fn parse(kind: ArtifactKind, text: &str) -> Result<Self> {
        let mut sections: Vec<UnitSection> = Vec::new();
        let mut pending: Option<(usize, String)> = None;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let trimmed = raw.trim();

            // backslash continuations join with a single space
            let (start_line, joined) = match pending.take() {
                Some((start, mut acc)) => {
                    if trimmed.starts_with('#') || trimmed.starts_with(';') {
                        pending = Some((start, acc));
                        continue;
                    }
                    acc.push(' ');
                    acc.push_str(trimmed);
                    (start, acc)
                }
                None => {
                    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                        continue;
                    }
                    (line_no, trimmed.to_string())
                }
            };

            if let Some(stripped) = joined.strip_suffix('\\') {
                pending = Some((start_line, stripped.trim_end().to_string()));
                continue;
            }

            if joined.starts_with('[') {
                let name = joined
                    .strip_prefix('[')
                    .and_then(|s| s.strip_suffix(']'))
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| parse_error(kind, start_line, "malformed section header"))?;
                sections.push(UnitSection {
                    name: name.to_string(),
                    entries: Vec::new(),
                });
                continue;
            }

            let (key, value) = joined
                .split_once('=')
                .ok_or_else(|| parse_error(kind, start_line, format!("expected Key=Value, got '{}'", joined)))?;
            let section = sections
                .last_mut()
                .ok_or_else(|| parse_error(kind, start_line, "assignment outside of any section"))?;
            section
                .entries
                .push((key.trim().to_string(), value.trim().to_string()));
        }

        if let Some((start, _)) = pending {
            return Err(parse_error(kind, start, "continuation runs past end of file"));
        }

        Ok(Self { sections })
    }

    /// All values of `key` in every `[section]` of that name, in file order.
    pub fn get_all(&self, section: &str, key: &str) -> Vec<&str> {
        self.sections
            .iter()
            .filter(|s| s.name == section)
            .flat_map(|s| s.entries.iter())
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Last assignment wins, as systemd reads single-valued keys.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.get_all(section, key).into_iter().last()
    }

    /// Space separated list keys such as `Requires=` and `After=`, an empty
    /// assignment resets the list.
    pub fn get_list(&self, section: &str, key: &str) -> Vec<&str> {
        let mut items = Vec::new();
        for value in self.get_all(section, key) {
            if value.is_empty() {
                items.clear();
            } else {
                items.extend(value.split_whitespace());
            }
        }
        items
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.sections.iter().any(|s| s.name == section)
    }
}

/// The parts of a gunicorn `ExecStart=` line the checks care about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecStart {
    pub binary: String,
    pub bind: Vec<String>,
    pub workers: Option<String>,
    pub app_module: Option<String>,
}

impl ExecStart {
    pub fn parse(value: &str) -> Self {
        let mut tokens = value.split_whitespace();
        let binary = tokens
            .next()
            .map(|b| b.trim_start_matches(['-', '@', ':', '+', '!']).to_string())
            .unwrap_or_default();

        let mut exec = ExecStart {
            binary,
            ..Default::default()
        };
        let rest: Vec<&str> = tokens.collect();
        let mut i = 0;
        while i < rest.len() {
            let token = rest[i];
            match token {
                "-b" | "--bind" => {
                    if let Some(next) = rest.get(i + 1) {
                        exec.bind.push(next.to_string());
                        i += 1;
                    }
                }
                "-w" | "--workers" => {
                    if let Some(next) = rest.get(i + 1) {
                        exec.workers = Some(next.to_string());
                        i += 1;
                    }
                }
                // flags that take a value, skipped so the value is not taken as the app
                "--access-logfile" | "--error-logfile" | "--log-level" | "-k"
                | "--worker-class" | "-t" | "--timeout" | "-c" | "--config" | "--chdir"
                | "--env" | "-e" | "--threads" | "--pid" | "-u" | "--user" | "-g"
                | "--group" | "--umask" | "--name" | "-n" => {
                    i += 1;
                }
                _ => {
                    if let Some(value) = token.strip_prefix("--bind=") {
                        exec.bind.push(value.to_string());
                    } else if let Some(value) = token.strip_prefix("--workers=") {
                        exec.workers = Some(value.to_string());
                    } else if !token.starts_with('-') {
                        exec.app_module = Some(token.to_string());
                    }
                }
            }
            i += 1;
        }
        exec
    }

    pub fn unix_binds(&self) -> Vec<&str> {
        self.bind
            .iter()
            .filter_map(|b| b.strip_prefix("unix:"))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
    pub line: usize,
    pub block: Option<Vec<Directive>>,
}

impl Directive {
    pub fn children(&self) -> &[Directive] {
        self.block.as_deref().unwrap_or(&[])
    }

    pub fn find<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Directive> + 'a {
        self.children().iter().filter(move |d| d.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Semicolon,
    Open,
    Close,
}

fn tokenize(text: &str) -> Result<Vec<(Token, usize)>> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1;
    let mut word = String::new();

    fn flush(word: &mut String, tokens: &mut Vec<(Token, usize)>, line: usize) {
        if !word.is_empty() {
            tokens.push((Token::Word(std::mem::take(word)), line));
        }
    }

    while let Some(c) = chars.next() {
        match c {
            '\n' => {
                flush(&mut word, &mut tokens, line);
                line += 1;
            }
            c if c.is_whitespace() => flush(&mut word, &mut tokens, line),
            '#' if word.is_empty() => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        line += 1;
                        break;
                    }
                }
            }
            ';' => {
                flush(&mut word, &mut tokens, line);
                tokens.push((Token::Semicolon, line));
            }
            '{' => {
                flush(&mut word, &mut tokens, line);
                tokens.push((Token::Open, line));
            }
            '}' => {
                flush(&mut word, &mut tokens, line);
                tokens.push((Token::Close, line));
            }
            '"' | '\'' => {
                let quote = c;
                let start = line;
                let mut closed = false;
                while let Some(next) = chars.next() {
                    match next {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                word.push(escaped);
                            }
                        }
                        n if n == quote => {
                            closed = true;
                            break;
                        }
                        n => {
                            if n == '\n' {
                                line += 1;
                            }
                            word.push(n);
                        }
                    }
                }
                if !closed {
                    return Err(parse_error(ArtifactKind::SiteBlock, start, "unterminated quote"));
                }
            }
            c => word.push(c),
        }
    }
    flush(&mut word, &mut tokens, line);
    Ok(tokens)
}

fn parse_block(
    tokens: &[(Token, usize)],
    pos: &mut usize,
    nested: Option<usize>,
) -> Result<Vec<Directive>> {
    let mut directives = Vec::new();

    loop {
        let Some((token, line)) = tokens.get(*pos) else {
            if let Some(open_line) = nested {
                return Err(parse_error(
                    ArtifactKind::SiteBlock,
                    open_line,
                    "block opened here is never closed",
                ));
            }
            return Ok(directives);
        };

        match token {
            Token::Close => {
                if nested.is_none() {
                    return Err(parse_error(ArtifactKind::SiteBlock, *line, "unexpected '}'"));
                }
                *pos += 1;
                return Ok(directives);
            }
            Token::Semicolon | Token::Open => {
                return Err(parse_error(
                    ArtifactKind::SiteBlock,
                    *line,
                    "expected a directive name",
                ));
            }
            Token::Word(name) => {
                let start_line = *line;
                let mut args = Vec::new();
                *pos += 1;
                loop {
                    match tokens.get(*pos) {
                        Some((Token::Word(arg), _)) => {
                            args.push(arg.clone());
                            *pos += 1;
                        }
                        Some((Token::Semicolon, _)) => {
                            *pos += 1;
                            directives.push(Directive {
                                name: name.clone(),
                                args,
                                line: start_line,
                                block: None,
                            });
                            break;
                        }
                        Some((Token::Open, open_line)) => {
                            let open_line = *open_line;
                            *pos += 1;
                            let block = parse_block(tokens, pos, Some(open_line))?;
                            directives.push(Directive {
                                name: name.clone(),
                                args,
                                line: start_line,
                                block: Some(block),
                            });
                            break;
                        }
                        Some((Token::Close, close_line)) => {
                            return Err(parse_error(
                                ArtifactKind::SiteBlock,
                                *close_line,
                                format!("missing ';' after '{}'", name),
                            ));
                        }
                        None => {
                            return Err(parse_error(
                                ArtifactKind::SiteBlock,
                                start_line,
                                format!("missing ';' after '{}'", name),
                            ));
                        }
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteBlock {
    pub directives: Vec<Directive>,
}

impl SiteBlock {
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = tokenize(text)?;
        let mut pos = 0;
        let directives = parse_block(&tokens, &mut pos, None)?;
        Ok(Self { directives })
    }

    pub fn servers(&self) -> impl Iterator<Item = &Directive> {
        self.directives.iter().filter(|d| d.name == "server" && d.block.is_some())
    }

    /// Server names across every server block, first block first, `_` and
    /// duplicates dropped.
    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for server in self.servers() {
            for directive in server.find("server_name") {
                for name in &directive.args {
                    if name != "_" && !names.contains(name) {
                        names.push(name.clone());
                    }
                }
            }
        }
        names
    }

    pub fn listen_ports(&self) -> Vec<String> {
        self.servers()
            .flat_map(|s| s.find("listen"))
            .filter_map(|d| d.args.first())
            .map(|addr| addr.rsplit(':').next().unwrap_or(addr).to_string())
            .collect()
    }

    fn upstream_sockets(&self, upstream: &str) -> Vec<String> {
        self.directives
            .iter()
            .filter(|d| d.name == "upstream" && d.args.first().map(String::as_str) == Some(upstream))
            .flat_map(|d| d.find("server"))
            .filter_map(|d| d.args.first())
            .filter_map(|addr| addr.strip_prefix("unix:"))
            .map(|path| path.trim_end_matches(':').to_string())
            .collect()
    }

    /// Socket paths reached by every `proxy_pass`, through `upstream` blocks
    /// where the target names one. Non-socket targets are returned as given,
    /// prefixed with `!`.
    pub fn proxy_targets(&self) -> Vec<String> {
        let mut targets = Vec::new();
        for server in self.servers() {
            for location in server.find("location") {
                for proxy in location.find("proxy_pass") {
                    let Some(target) = proxy.args.first() else {
                        continue;
                    };
                    let rest = target
                        .strip_prefix("http://")
                        .or_else(|| target.strip_prefix("https://"))
                        .unwrap_or(target);
                    if let Some(socket) = rest.strip_prefix("unix:") {
                        let path = socket.split(':').next().unwrap_or(socket);
                        targets.push(path.to_string());
                        continue;
                    }
                    let host = rest.split(['/', ':']).next().unwrap_or(rest);
                    let upstream = self.upstream_sockets(host);
                    if upstream.is_empty() {
                        targets.push(format!("!{}", target));
                    } else {
                        targets.extend(upstream);
                    }
                }
            }
        }
        targets
    }

    /// `root` or `alias` of the first location serving `/static/`.
    pub fn static_location(&self) -> Option<StaticLocation> {
        self.servers()
            .flat_map(|s| s.find("location"))
            .find(|l| l.args.last().map(|p| p.trim_end_matches('/')) == Some("/static"))
            .and_then(|location| {
                if let Some(root) = location.find("root").next().and_then(|d| d.args.first()) {
                    Some(StaticLocation::Root(root.trim_end_matches('/').to_string()))
                } else {
                    location
                        .find("alias")
                        .next()
                        .and_then(|d| d.args.first())
                        .map(|alias| StaticLocation::Alias(alias.trim_end_matches('/').to_string()))
                }
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticLocation {
    Root(String),
    Alias(String),
}

impl StaticLocation {
    /// Directory `/static/` requests are read from.
    pub fn served_dir(&self) -> String {
        match self {
            StaticLocation::Root(root) => format!("{}/static", root),
            StaticLocation::Alias(alias) => alias.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    pub entries: Vec<(String, String)>,
}

impl EnvFile {
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=').ok_or_else(|| {
                parse_error(ArtifactKind::EnvFile, idx + 1, format!("expected KEY=VALUE, got '{}'", line))
            })?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            entries.push((key.trim().to_string(), value.to_string()));
        }
        Ok(Self { entries })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}
