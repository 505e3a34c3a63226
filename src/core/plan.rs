use crate::domain::model::{
    join_path, ArtifactKind, DeploymentNames, NGINX_SITES_AVAILABLE, NGINX_SITES_ENABLED,
    SYSTEMD_UNIT_DIR,
};
use serde::Serialize;
use std::fmt;

/// One manual step; the commands are printed for the operator, never run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub title: String,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}

fn step(title: &str, commands: Vec<String>) -> Step {
    Step {
        title: title.to_string(),
        commands,
    }
}

impl Plan {
    pub fn for_names(names: &DeploymentNames) -> Self {
        let service = names.service_unit_name();
        let socket = names.socket_unit_name();
        let site = names.site_file_name();
        let venv_python = join_path(&names.venv_dir, "bin/python");
        let site_available = join_path(NGINX_SITES_AVAILABLE, &site);

        let mut certbot = String::from("sudo certbot --nginx");
        for name in &names.server_names {
            certbot.push_str(&format!(" -d {}", name));
        }
        if let Some(email) = &names.tls_email {
            certbot.push_str(&format!(" --email {} --agree-tos", email));
        }

        let steps = vec![
            step(
                "Install the application dependencies",
                vec![
                    format!("python3 -m venv {}", names.venv_dir),
                    format!(
                        "{} -m pip install -r {}",
                        venv_python,
                        join_path(&names.working_dir, &ArtifactKind::Requirements.file_name(&names.repo_name))
                    ),
                    format!("cd {} && {} manage.py migrate", names.working_dir, venv_python),
                    format!(
                        "cd {} && {} manage.py collectstatic --noinput",
                        names.working_dir, venv_python
                    ),
                ],
            ),
            step(
                "Install the systemd units",
                vec![
                    format!("sudo cp {} {} {}/", service, socket, SYSTEMD_UNIT_DIR),
                    "sudo systemctl daemon-reload".to_string(),
                ],
            ),
            step(
                "Start the socket before anything connects to it",
                vec![
                    format!("sudo systemctl start {}", socket),
                    format!("sudo systemctl enable {}", socket),
                    format!("sudo systemctl status {}", socket),
                    format!("file {}", names.socket_path),
                ],
            ),
            step(
                "Verify socket activation starts the service",
                vec![
                    format!("curl --unix-socket {} localhost", names.socket_path),
                    format!("sudo systemctl status {}", service),
                ],
            ),
            step(
                "Enable the nginx site",
                vec![
                    format!("sudo cp {} {}", site, site_available),
                    format!("sudo ln -s {} {}/", site_available, NGINX_SITES_ENABLED),
                    "sudo nginx -t".to_string(),
                    "sudo systemctl restart nginx".to_string(),
                ],
            ),
            step(
                "Open the firewall for nginx",
                vec!["sudo ufw allow 'Nginx Full'".to_string()],
            ),
            step(
                "Point DNS at this host",
                names
                    .server_names
                    .iter()
                    .map(|name| format!("dig +short {}", name))
                    .collect(),
            ),
            step("Provision the TLS certificate", vec![certbot]),
        ];

        Self { steps }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, step) in self.steps.iter().enumerate() {
            writeln!(f, "{}. {}", idx + 1, step.title)?;
            for command in &step.commands {
                writeln!(f, "   $ {}", command)?;
            }
        }
        Ok(())
    }
}
