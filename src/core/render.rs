use crate::core::bundle;
use crate::core::consistency::{ArtifactSet, ConsistencyChecker};
use crate::core::templates::default_templates;
use crate::core::{ArtifactTemplate, Storage};
use crate::domain::model::{Artifact, DeploymentNames};
use crate::utils::error::{DeployError, Result};

#[derive(Debug, Clone, Default)]
pub struct RenderOptions {
    pub force: bool,
    pub bundle: Option<String>,
}

pub struct RenderEngine<S: Storage> {
    storage: S,
    templates: Vec<Box<dyn ArtifactTemplate>>,
    options: RenderOptions,
}

impl<S: Storage> RenderEngine<S> {
    pub fn new(storage: S) -> Self {
        Self::with_options(storage, RenderOptions::default())
    }

    pub fn with_options(storage: S, options: RenderOptions) -> Self {
        Self {
            storage,
            templates: default_templates(),
            options,
        }
    }

    /// Renders every artifact and refuses to hand back a set that fails its
    /// own consistency check.
    pub fn render_all(&self, names: &DeploymentNames) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::with_capacity(self.templates.len());
        for template in &self.templates {
            tracing::debug!("Rendering {}", template.kind());
            artifacts.push(template.render(names)?);
        }

        let set = ArtifactSet::from_artifacts(&names.repo_name, &artifacts);
        let report = ConsistencyChecker::new().check(&set, Some(names));
        if !report.is_ok() {
            // the manifest comes from user input, everything else is ours
            let template_bug = report
                .errors()
                .any(|f| f.rule != crate::core::consistency::Rule::Manifest);
            if template_bug {
                return Err(DeployError::TemplateError {
                    artifact: "artifact set".to_string(),
                    message: report.render_text(),
                });
            }
            return report.into_result().map(|_| artifacts);
        }

        tracing::info!("✅ Rendered {} artifacts for {}", artifacts.len(), names.repo_name);
        Ok(artifacts)
    }

    pub async fn write(&self, artifacts: &[Artifact]) -> Result<Vec<String>> {
        if !self.options.force {
            let targets = artifacts
                .iter()
                .map(|artifact| &artifact.file_name)
                .chain(self.options.bundle.as_ref());
            for path in targets {
                if self.storage.exists(path).await {
                    return Err(DeployError::ArtifactExists { path: path.clone() });
                }
            }
        }

        let mut written = Vec::with_capacity(artifacts.len() + 1);
        for artifact in artifacts {
            tracing::debug!(
                "Writing {} ({} bytes), installs to {}",
                artifact.file_name,
                artifact.contents.len(),
                artifact.install_path()
            );
            self.storage
                .write_file(&artifact.file_name, artifact.contents.as_bytes())
                .await?;
            written.push(artifact.file_name.clone());
        }

        if let Some(bundle_name) = &self.options.bundle {
            let data = bundle::bundle(artifacts)?;
            tracing::debug!("Writing bundle {} ({} bytes)", bundle_name, data.len());
            self.storage.write_file(bundle_name, &data).await?;
            written.push(bundle_name.clone());
        }

        Ok(written)
    }

    pub async fn run(&self, names: &DeploymentNames) -> Result<Vec<String>> {
        tracing::info!("Rendering deployment for {} ({})", names.repo_name, names.domain);
        let artifacts = self.render_all(names)?;
        let written = self.write(&artifacts).await?;
        tracing::info!("📁 Wrote {} files", written.len());
        Ok(written)
    }
}
