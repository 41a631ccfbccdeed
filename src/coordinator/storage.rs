use std::path::PathBuf;

use crate::error::{FleetError, Result};

/// Reduce a client-supplied filename to a single safe path component.
pub fn sanitize_filename(name: &str) -> Result<String> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return Err(FleetError::InvalidFilename(name.to_string()));
    }
    Ok(base.to_string())
}

/// Flat directory of artifacts uploaded by nodes.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Store `bytes` under the sanitized `name`, replacing any previous file.
    pub async fn save(&self, name: &str, bytes: &[u8]) -> Result<String> {
        let name = sanitize_filename(name)?;
        tokio::fs::write(self.dir.join(&name), bytes).await?;
        tracing::info!(file = %name, size = bytes.len(), "Artifact saved");
        Ok(name)
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let name = sanitize_filename(name)?;
        match tokio::fs::read(self.dir.join(&name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FleetError::ArtifactNotFound(name))
            }
            Err(e) => Err(e.into()),
        }
    }
}
