pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use crate::config::CliConfig;

pub use crate::config::{cli::LocalStorage, toml_config::DeployConfig};
pub use crate::core::{
    consistency::{ArtifactSet, ConsistencyChecker, Report},
    plan::Plan,
    render::{RenderEngine, RenderOptions},
};
pub use crate::utils::error::{DeployError, Result};
