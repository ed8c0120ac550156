//! Materializes backend outputs into the local output directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use vprompt_comfyui::backend::GenerationBackend;
use vprompt_comfyui::history::OutputDescriptor;
use vprompt_core::job::Artifact;
use vprompt_core::types::JobId;

/// File name prefix the backend gives its outputs by default.
const BACKEND_FILE_PREFIX: &str = "ComfyUI_";

/// Local storage for generated files.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    output_dir: PathBuf,
    public_path: String,
    prefix: String,
}

impl ArtifactStore {
    /// * `output_dir` - directory the files are written to
    /// * `public_path` - URL path `output_dir` is served under, e.g. `/outputs`
    /// * `prefix` - local file name prefix, e.g. `vPrompt_`
    pub fn new(output_dir: PathBuf, public_path: &str, prefix: &str) -> Self {
        Self {
            output_dir,
            public_path: public_path.trim_end_matches('/').to_string(),
            prefix: prefix.to_string(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Local name for a backend file name.
    ///
    /// Directory components are stripped. A leading `ComfyUI_` is replaced
    /// by the prefix; any other name gets the prefix prepended.
    pub fn local_name(&self, filename: &str) -> String {
        let base = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(filename);
        match base.strip_prefix(BACKEND_FILE_PREFIX) {
            Some(rest) => format!("{}{rest}", self.prefix),
            None => format!("{}{base}", self.prefix),
        }
    }

    /// Public URL for a local file name.
    pub fn public_url(&self, local_name: &str) -> String {
        format!("{}/{local_name}", self.public_path)
    }

    /// Fetch and store every output, in order.
    ///
    /// A failed fetch or write is logged and skipped; the returned list
    /// holds only the artifacts that made it to disk. A download that takes
    /// longer than `fetch_timeout` counts as failed.
    pub async fn materialize(
        &self,
        backend: &dyn GenerationBackend,
        job_id: JobId,
        outputs: &[OutputDescriptor],
        fetch_timeout: Duration,
    ) -> Vec<Artifact> {
        if let Err(e) = tokio::fs::create_dir_all(&self.output_dir).await {
            tracing::error!(
                job_id = %job_id,
                dir = %self.output_dir.display(),
                error = %e,
                "Failed to create output directory",
            );
            return Vec::new();
        }

        let mut artifacts = Vec::with_capacity(outputs.len());
        for output in outputs {
            match self.store_one(backend, output, fetch_timeout).await {
                Ok(artifact) => {
                    tracing::debug!(
                        job_id = %job_id,
                        filename = %output.filename,
                        local_path = %artifact.local_path,
                        "Artifact stored",
                    );
                    artifacts.push(artifact);
                }
                Err(e) => {
                    tracing::warn!(
                        job_id = %job_id,
                        filename = %output.filename,
                        error = %e,
                        "Failed to materialize artifact",
                    );
                }
            }
        }
        artifacts
    }

    async fn store_one(
        &self,
        backend: &dyn GenerationBackend,
        output: &OutputDescriptor,
        fetch_timeout: Duration,
    ) -> Result<Artifact, String> {
        let bytes = tokio::time::timeout(fetch_timeout, backend.fetch_artifact(output))
            .await
            .map_err(|_| format!("fetch timed out after {}s", fetch_timeout.as_secs()))?
            .map_err(|e| format!("fetch failed: {e}"))?;

        let local_name = self.local_name(&output.filename);
        let local_path = self.output_dir.join(&local_name);
        tokio::fs::write(&local_path, &bytes)
            .await
            .map_err(|e| format!("write failed: {e}"))?;

        Ok(Artifact {
            filename: output.filename.clone(),
            subfolder: output.subfolder.clone(),
            category: output.category.clone(),
            local_path: local_path.display().to_string(),
            url: self.public_url(&local_name),
        })
    }
}
