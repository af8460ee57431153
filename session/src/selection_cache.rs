use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{SessionError, SessionResult};

const CACHE_VERSION: u16 = 1;

/// The provider option a previous session was established with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedSelection {
    pub provider_id: String,
    pub selected_at: DateTime<Utc>,
}

impl CachedSelection {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            selected_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEnvelope {
    version: u16,
    checksum: [u8; 32],
    payload: CachedSelection,
    modified_at_unix: i64,
}

/// Persists the last used provider so a restarted application can reconnect silently.
#[derive(Debug, Clone)]
pub struct SelectionCache {
    path: PathBuf,
}

impl SelectionCache {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> SessionResult<Option<CachedSelection>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&self.path)?;
        let envelope: CacheEnvelope = serde_json::from_slice(&bytes)?;
        if envelope.version != CACHE_VERSION {
            return Err(SessionError::ValidationError(format!(
                "Unsupported selection cache version {}",
                envelope.version
            )));
        }

        if checksum(&envelope.payload)? != envelope.checksum {
            return Err(SessionError::ValidationError(
                "Selection cache integrity verification failed".to_string(),
            ));
        }

        Ok(Some(envelope.payload))
    }

    pub fn save(&self, provider_id: &str) -> SessionResult<CachedSelection> {
        let payload = CachedSelection::new(provider_id);
        let envelope = CacheEnvelope {
            version: CACHE_VERSION,
            checksum: checksum(&payload)?,
            modified_at_unix: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map_err(|e| SessionError::StorageError(e.to_string()))?
                .as_secs() as i64,
            payload: payload.clone(),
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        let tmp_path = self.path.with_extension("new");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        fs::rename(tmp_path, &self.path)?;
        Ok(payload)
    }

    /// Forget the cached provider. A missing cache is already clear.
    pub fn clear(&self) -> SessionResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum(selection: &CachedSelection) -> SessionResult<[u8; 32]> {
    let mut hasher = Blake3::new();
    let encoded = serde_json::to_vec(selection)?;
    hasher.update(&encoded);
    let mut output = [0u8; 32];
    output.copy_from_slice(hasher.finalize().as_bytes());
    Ok(output)
}
