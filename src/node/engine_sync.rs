//! Keeping the local engine binary in step with the coordinator.
//!
//! The node caches the hash of the last applied binary together with the
//! time of the last successful sync decision in a one-line state file:
//!
//! ```text
//! <sha256 hex>|<RFC 3339 timestamp>
//! ```
//!
//! How often the coordinator is consulted depends on [`UpdateFrequency`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::SystemTime;

use chrono::{DateTime, Duration, Utc};

use crate::digest::sha256_hex;
use crate::error::{FleetError, Result};
use crate::node::client::CoordinatorApi;

/// Minimum age, in seconds, of the last sync before `once_a_day` checks again.
pub const ONCE_A_DAY_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateFrequency {
    /// Never download; the local binary must already exist.
    Never,
    /// Compare hashes on every sync.
    #[default]
    Always,
    /// Skip the comparison while the last sync is recent and the local
    /// binary is intact.
    OnceADay,
}

impl fmt::Display for UpdateFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateFrequency::Never => write!(f, "never"),
            UpdateFrequency::Always => write!(f, "always"),
            UpdateFrequency::OnceADay => write!(f, "once_a_day"),
        }
    }
}

impl FromStr for UpdateFrequency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(UpdateFrequency::Never),
            "always" => Ok(UpdateFrequency::Always),
            "once_a_day" => Ok(UpdateFrequency::OnceADay),
            other => Err(format!("unrecognized update frequency {other:?}")),
        }
    }
}

impl UpdateFrequency {
    /// Parse a configured value, falling back to `Always` when unset or
    /// unrecognized.
    pub fn from_config(raw: Option<&str>) -> Self {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None => UpdateFrequency::default(),
            Some(value) => value.parse().unwrap_or_else(|e| {
                tracing::warn!(value, error = %e, "Falling back to update frequency \"always\"");
                UpdateFrequency::default()
            }),
        }
    }
}

/// Hash of the last applied engine and when it was last confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEngineState {
    pub hash: String,
    pub synced_at: DateTime<Utc>,
}

impl LocalEngineState {
    pub fn new(hash: impl Into<String>, synced_at: DateTime<Utc>) -> Self {
        Self {
            hash: hash.into(),
            synced_at,
        }
    }

    pub fn encode(&self) -> String {
        format!("{}|{}", self.hash, self.synced_at.to_rfc3339())
    }

    pub fn decode(raw: &str) -> std::result::Result<Self, String> {
        let (hash, ts) = raw
            .trim()
            .split_once('|')
            .ok_or_else(|| "missing '|' separator".to_string())?;
        let hash = hash.trim();
        if hash.is_empty() || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("invalid hash {hash:?}"));
        }
        let synced_at = DateTime::parse_from_rfc3339(ts.trim())
            .map_err(|e| format!("invalid timestamp {ts:?}: {e}"))?
            .with_timezone(&Utc);
        Ok(Self::new(hash.to_ascii_lowercase(), synced_at))
    }

    /// Load the state file. A missing file is `None`; a malformed one is
    /// logged and treated as missing.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match Self::decode(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(reason) => {
                let err = FleetError::MalformedState {
                    path: path.to_path_buf(),
                    reason,
                };
                tracing::warn!(error = %err, "Ignoring engine state");
                Ok(None)
            }
        }
    }

    pub async fn store(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, self.encode()).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// What a sync call decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A new binary was fetched and installed.
    Downloaded { hash: String },
    /// The local binary already matches the coordinator.
    UpToDate { hash: String },
    /// `once_a_day` skipped the check.
    Skipped,
    /// `never`: the local binary is used as is.
    Pinned,
    /// The coordinator could not supply a binary; the local one is kept.
    KeptLocal { reason: String },
}

/// Size and mtime of the installed binary when its hash was last computed.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

impl Fingerprint {
    fn of(meta: &std::fs::Metadata) -> Self {
        Self {
            len: meta.len(),
            modified: meta.modified().ok(),
        }
    }
}

pub struct EngineSync {
    engine_path: PathBuf,
    state_path: PathBuf,
    policy: UpdateFrequency,
    verified: Mutex<Option<(String, Fingerprint)>>,
}

impl EngineSync {
    pub fn new(
        engine_path: impl Into<PathBuf>,
        state_path: impl Into<PathBuf>,
        policy: UpdateFrequency,
    ) -> Self {
        Self {
            engine_path: engine_path.into(),
            state_path: state_path.into(),
            policy,
            verified: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> UpdateFrequency {
        self.policy
    }

    /// Make sure a usable engine binary is installed.
    ///
    /// Fails only when no binary can be made available at all. Local
    /// bookkeeping failures are logged while a binary is present.
    pub async fn sync(&self, api: &dyn CoordinatorApi) -> Result<SyncOutcome> {
        let local_exists = tokio::fs::metadata(&self.engine_path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);

        if self.policy == UpdateFrequency::Never {
            if !local_exists {
                return Err(
                    self.unavailable("update frequency is never and no local binary exists")
                );
            }
            self.ensure_executable().await;
            return Ok(SyncOutcome::Pinned);
        }

        let cached = self.load_cached().await;

        if self.policy == UpdateFrequency::OnceADay && local_exists {
            if let Some(state) = &cached {
                let fresh = Utc::now() - state.synced_at < Duration::seconds(ONCE_A_DAY_SECS);
                if fresh && self.local_hash_matches(&state.hash).await {
                    tracing::debug!(hash = %state.hash, "Engine checked within the last day, skipping");
                    return Ok(SyncOutcome::Skipped);
                }
            }
        }

        let server_hash = match api.engine_hash().await {
            Ok(Some(hash)) => hash,
            Ok(None) => {
                return self
                    .keep_local(local_exists, "coordinator has no engine registered")
                    .await
            }
            Err(e) => {
                tracing::warn!(error = %e, "Engine hash lookup failed");
                return self
                    .keep_local(local_exists, &format!("hash lookup failed: {e}"))
                    .await;
            }
        };

        let cached_matches = cached.as_ref().is_some_and(|s| s.hash == server_hash);
        if cached_matches && local_exists {
            self.record(&server_hash).await;
            self.ensure_executable().await;
            return Ok(SyncOutcome::UpToDate { hash: server_hash });
        }

        match self.download(api, &server_hash).await {
            Ok(()) => {
                tracing::info!(hash = %server_hash, path = %self.engine_path.display(), "Engine binary updated");
                Ok(SyncOutcome::Downloaded { hash: server_hash })
            }
            Err(e) => {
                tracing::warn!(error = %e, "Engine download failed");
                self.keep_local(local_exists, &format!("download failed: {e}")).await
            }
        }
    }

    async fn download(&self, api: &dyn CoordinatorApi, expected: &str) -> Result<()> {
        let bytes = api.download_engine().await?;
        let actual = sha256_hex(&bytes);
        if actual != expected {
            return Err(FleetError::Internal(format!(
                "engine hash mismatch: expected {expected}, got {actual}"
            )));
        }

        if let Some(parent) = self.engine_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.engine_path.with_extension("download");
        tokio::fs::write(&tmp, &bytes).await?;
        set_executable(&tmp).await?;
        tokio::fs::rename(&tmp, &self.engine_path).await?;

        self.record(expected).await;
        Ok(())
    }

    async fn keep_local(&self, local_exists: bool, reason: &str) -> Result<SyncOutcome> {
        if !local_exists {
            return Err(self.unavailable(reason));
        }
        self.ensure_executable().await;
        tracing::info!(reason, path = %self.engine_path.display(), "Using existing engine binary");
        Ok(SyncOutcome::KeptLocal {
            reason: reason.to_string(),
        })
    }

    async fn load_cached(&self) -> Option<LocalEngineState> {
        match LocalEngineState::load(&self.state_path).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(path = %self.state_path.display(), error = %e, "Cannot read engine state");
                None
            }
        }
    }

    async fn record(&self, hash: &str) {
        if let Err(e) = LocalEngineState::new(hash, Utc::now())
            .store(&self.state_path)
            .await
        {
            tracing::warn!(path = %self.state_path.display(), error = %e, "Cannot write engine state");
        }
    }

    async fn ensure_executable(&self) {
        if let Err(e) = set_executable(&self.engine_path).await {
            tracing::warn!(path = %self.engine_path.display(), error = %e, "Cannot mark engine executable");
        }
    }

    /// Compare the installed binary against `expected`. The file is only
    /// rehashed when its size or mtime moved since the last match.
    async fn local_hash_matches(&self, expected: &str) -> bool {
        let current = match tokio::fs::metadata(&self.engine_path).await {
            Ok(meta) => Fingerprint::of(&meta),
            Err(e) => {
                tracing::warn!(path = %self.engine_path.display(), error = %e, "Cannot stat engine binary");
                return false;
            }
        };
        if self.verified_as(expected, &current) {
            return true;
        }

        let bytes = match tokio::fs::read(&self.engine_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(path = %self.engine_path.display(), error = %e, "Cannot read engine binary");
                return false;
            }
        };
        let matches = sha256_hex(&bytes) == expected;
        self.remember(matches.then(|| (expected.to_string(), current)));
        matches
    }

    fn verified_as(&self, expected: &str, current: &Fingerprint) -> bool {
        self.verified.lock().is_ok_and(|verified| {
            verified
                .as_ref()
                .is_some_and(|(hash, fingerprint)| hash == expected && fingerprint == current)
        })
    }

    fn remember(&self, entry: Option<(String, Fingerprint)>) {
        if let Ok(mut verified) = self.verified.lock() {
            *verified = entry;
        }
    }

    fn unavailable(&self, reason: &str) -> FleetError {
        FleetError::EngineUnavailable {
            path: self.engine_path.clone(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(unix)]
async fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_frequencies() {
        assert_eq!("never".parse(), Ok(UpdateFrequency::Never));
        assert_eq!(" ALWAYS ".parse(), Ok(UpdateFrequency::Always));
        assert_eq!("once_a_day".parse(), Ok(UpdateFrequency::OnceADay));
        assert!("hourly".parse::<UpdateFrequency>().is_err());
    }

    #[test]
    fn from_config_defaults_to_always() {
        assert_eq!(UpdateFrequency::from_config(None), UpdateFrequency::Always);
        assert_eq!(UpdateFrequency::from_config(Some("")), UpdateFrequency::Always);
        assert_eq!(
            UpdateFrequency::from_config(Some("weekly")),
            UpdateFrequency::Always
        );
        assert_eq!(
            UpdateFrequency::from_config(Some("never")),
            UpdateFrequency::Never
        );
    }

    #[test]
    fn state_encoding_is_hash_pipe_timestamp() {
        let ts = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let state = LocalEngineState::new("abc123", ts);
        assert_eq!(state.encode(), "abc123|2026-01-02T03:04:05+00:00");
        assert_eq!(LocalEngineState::decode(&state.encode()).unwrap(), state);
    }

    #[test]
    fn decode_rejects_malformed_lines() {
        assert!(LocalEngineState::decode("").is_err());
        assert!(LocalEngineState::decode("abc").is_err());
        assert!(LocalEngineState::decode("|2026-01-02T03:04:05Z").is_err());
        assert!(LocalEngineState::decode("xyz|2026-01-02T03:04:05Z").is_err());
        assert!(LocalEngineState::decode("abc|yesterday").is_err());
    }
}
