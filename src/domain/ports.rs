use crate::domain::model::{Artifact, ArtifactKind, DeploymentNames};
use crate::utils::error::Result;

pub trait Storage: Send + Sync {
    fn exists(&self, path: &str) -> impl std::future::Future<Output = bool> + Send;
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

pub trait ArtifactTemplate: Send + Sync {
    fn kind(&self) -> ArtifactKind;
    fn render(&self, names: &DeploymentNames) -> Result<Artifact>;
}
