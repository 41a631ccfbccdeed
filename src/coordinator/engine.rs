use std::path::{Path, PathBuf};

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::sha256_hex;
use crate::error::Result;

const ENGINE_FILE: &str = "engine.bin";

/// The engine binary currently served to nodes.
#[derive(Debug, Clone)]
pub struct EngineArtifact {
    pub bytes: Bytes,
    /// SHA-256 over `bytes`, lowercase hex
    pub hash: String,
    pub uploaded_at: DateTime<Utc>,
}

impl EngineArtifact {
    pub fn new(bytes: Bytes) -> Self {
        Self {
            hash: sha256_hex(&bytes),
            bytes,
            uploaded_at: Utc::now(),
        }
    }
}

/// Metadata nodes use to decide whether to download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineInfo {
    pub hash: Option<String>,
    pub size: Option<u64>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// Holds the current engine binary, replaced wholesale on upload.
#[derive(Debug, Default)]
pub struct ArtifactRegistry {
    current: Option<EngineArtifact>,
    dir: Option<PathBuf>,
}

impl ArtifactRegistry {
    /// An in-memory registry with no engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry mirrored to `dir`, restoring any previously uploaded engine.
    pub fn persistent(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(ENGINE_FILE);
        let current = if path.is_file() {
            let artifact = EngineArtifact::new(Bytes::from(std::fs::read(&path)?));
            tracing::info!(hash = %artifact.hash, size = artifact.bytes.len(), "Restored engine binary");
            Some(artifact)
        } else {
            None
        };
        Ok(Self {
            current,
            dir: Some(dir),
        })
    }

    /// Register the binary at `path` as the current engine.
    pub fn load_file(&mut self, path: &Path) -> Result<&EngineArtifact> {
        let bytes = std::fs::read(path)?;
        self.replace(Bytes::from(bytes))
    }

    /// Replace the current engine binary.
    pub fn replace(&mut self, bytes: Bytes) -> Result<&EngineArtifact> {
        let artifact = EngineArtifact::new(bytes);
        if let Some(dir) = &self.dir {
            persist_engine(dir, &artifact)?;
        }
        Ok(self.install(artifact))
    }

    /// Where replacements are mirrored, if anywhere.
    pub fn persist_dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Swap in an artifact that is already hashed and persisted.
    pub fn install(&mut self, artifact: EngineArtifact) -> &EngineArtifact {
        tracing::info!(hash = %artifact.hash, size = artifact.bytes.len(), "Engine binary replaced");
        self.current.insert(artifact)
    }

    pub fn current(&self) -> Option<&EngineArtifact> {
        self.current.as_ref()
    }

    pub fn info(&self) -> EngineInfo {
        match &self.current {
            Some(artifact) => EngineInfo {
                hash: Some(artifact.hash.clone()),
                size: Some(artifact.bytes.len() as u64),
                uploaded_at: Some(artifact.uploaded_at),
            },
            None => EngineInfo {
                hash: None,
                size: None,
                uploaded_at: None,
            },
        }
    }
}

/// Write `artifact` into `dir`, replacing the stored engine atomically.
/// Blocking; async callers run it on the blocking pool.
pub fn persist_engine(dir: &Path, artifact: &EngineArtifact) -> Result<()> {
    let tmp = dir.join(format!("{ENGINE_FILE}.tmp"));
    std::fs::write(&tmp, &artifact.bytes)?;
    std::fs::rename(&tmp, dir.join(ENGINE_FILE))?;
    Ok(())
}
