pub mod bundle;
pub mod consistency;
pub mod manifest;
pub mod parse;
pub mod plan;
pub mod render;
pub mod templates;

pub use crate::domain::model::{Artifact, ArtifactKind, DeploymentNames, Requirement};
pub use crate::domain::ports::{ArtifactTemplate, Storage};
pub use crate::utils::error::Result;
