use std::path::Path;

use crate::error::Result;
use crate::node::client::CoordinatorApi;

/// Read a persisted node identity, if any.
pub async fn read_identity(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => {
            let id = raw.trim();
            Ok((!id.is_empty()).then(|| id.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Return the persisted identity, registering and persisting a new one
/// when none exists.
pub async fn ensure_identity(path: &Path, name: &str, api: &dyn CoordinatorApi) -> Result<String> {
    if let Some(id) = read_identity(path).await? {
        tracing::debug!(node_id = %id, "Using persisted node identity");
        return Ok(id);
    }

    let id = api.register(name).await?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, &id).await?;
    tracing::info!(name, node_id = %id, "Registered with coordinator");
    Ok(id)
}

/// Delete local state files, ignoring ones that do not exist.
pub async fn discard_state(paths: &[&Path]) -> Result<()> {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::info!(path = %path.display(), "Discarded local state"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
