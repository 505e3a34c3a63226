use crate::config::toml_config::{DeployConfig, SocketConfig};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "stack-deploy")]
#[command(about = "Render and cross-check the service, socket, proxy and manifest files of a WSGI deployment")]
pub struct CliConfig {
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines on stderr")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Render every artifact from a deploy config
    Render(RenderArgs),
    /// Check artifacts in a directory for cross-file consistency
    Check(CheckArgs),
    /// Print the manual steps that install the rendered artifacts
    Plan(PlanArgs),
    /// Compare two requirements files for reproducibility
    Compare(CompareArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RenderArgs {
    /// Path to TOML deploy config
    #[arg(short, long, default_value = "deploy.toml")]
    pub config: PathBuf,

    #[arg(short, long, default_value = "./deploy-out")]
    pub output_dir: PathBuf,

    /// Overwrite artifacts that already exist
    #[arg(long)]
    pub force: bool,

    /// Print artifacts and the plan without writing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Also write a zip bundle laid out by install path
    #[arg(long)]
    pub bundle: Option<String>,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Clone, Args)]
#[command(group = clap::ArgGroup::new("expected").required(true).args(["config", "repo"]))]
pub struct CheckArgs {
    /// Deploy config holding the expected values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Repository name, checks cross-file agreement only
    #[arg(long)]
    pub repo: Option<String>,

    /// Directory holding the artifacts
    #[arg(short, long, default_value = "./deploy-out")]
    pub dir: PathBuf,

    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Clone, Args)]
pub struct PlanArgs {
    #[arg(short, long, default_value = "deploy.toml")]
    pub config: PathBuf,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Clone, Args)]
pub struct CompareArgs {
    pub left: PathBuf,
    pub right: PathBuf,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// Override project.domain
    #[arg(long)]
    pub domain: Option<String>,

    /// Override service.workers
    #[arg(long)]
    pub workers: Option<u32>,

    /// Override socket.path
    #[arg(long)]
    pub socket_path: Option<String>,
}

impl Overrides {
    pub fn apply(&self, config: &mut DeployConfig) {
        if let Some(domain) = &self.domain {
            tracing::info!("🔧 Domain overridden to: {}", domain);
            config.project.domain = domain.clone();
        }
        if let Some(workers) = self.workers {
            tracing::info!("🔧 Workers overridden to: {}", workers);
            config.service.workers = Some(workers);
        }
        if let Some(socket_path) = &self.socket_path {
            tracing::info!("🔧 Socket path overridden to: {}", socket_path);
            config.socket = Some(SocketConfig {
                path: Some(socket_path.clone()),
            });
        }
    }
}
