//! Per-role on-disk memoization of temporary credentials.
//!
//! Entries live at `<user cache dir>/gcp2aws/<hex(sha256(role ARN))>.json`
//! and hold the same JSON the broker prints. The directory is owner-only
//! (0700) and each file is 0600 since it contains live session credentials.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::credential::{TemporaryCredential, CREDENTIAL_PROCESS_VERSION};
use crate::error::CacheError;

/// Name of the subdirectory created under the user cache directory.
pub const CACHE_SUBDIR: &str = "gcp2aws";

/// Returns the cache key for a role ARN: lowercase hex of its SHA-256 digest.
pub fn cache_key(role_arn: &str) -> String {
    hex::encode(Sha256::digest(role_arn.as_bytes()))
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: Option<PathBuf>,
}

impl CacheStore {
    /// Creates a store rooted at `dir` (the directory holding the entries).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// Creates a store under the platform user cache directory
    /// (`$XDG_CACHE_HOME` or `$HOME/.cache` on Linux).
    ///
    /// If no cache directory can be resolved the store is still returned;
    /// every load and store then fails with [`CacheError::NoCacheDir`].
    pub fn user_default() -> Self {
        Self {
            dir: dirs::cache_dir().map(|dir| dir.join(CACHE_SUBDIR)),
        }
    }

    /// Returns the cache file path for `role_arn`.
    pub fn path_for(&self, role_arn: &str) -> Result<PathBuf, CacheError> {
        let dir = self.dir.as_ref().ok_or(CacheError::NoCacheDir)?;
        Ok(dir.join(format!("{}.json", cache_key(role_arn))))
    }

    /// Loads the cached credential for `role_arn`, rejecting it if expired now.
    pub fn load(&self, role_arn: &str) -> Result<TemporaryCredential, CacheError> {
        self.load_at(role_arn, Utc::now())
    }

    /// Loads the cached credential for `role_arn`, rejecting it if `now` is at
    /// or after its expiration.
    pub fn load_at(
        &self,
        role_arn: &str,
        now: DateTime<Utc>,
    ) -> Result<TemporaryCredential, CacheError> {
        let path = self.path_for(role_arn)?;
        let data = fs::read(&path).map_err(|source| CacheError::NotFoundOrUnreadable {
            path: path.clone(),
            source,
        })?;

        let cred: TemporaryCredential =
            serde_json::from_slice(&data).map_err(|e| CacheError::Malformed {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if cred.version != CREDENTIAL_PROCESS_VERSION {
            return Err(CacheError::Malformed {
                path,
                reason: format!("unsupported version {}", cred.version),
            });
        }

        if cred.is_expired_at(now) {
            return Err(CacheError::Expired {
                expiration: cred.expiration,
            });
        }

        debug!(path = %path.display(), expiration = %cred.expiration, "cache hit");
        Ok(cred)
    }

    /// Persists `cred` for `role_arn`.
    ///
    /// The record is written to a sibling temporary file and renamed into
    /// place so a reader never observes a partial entry.
    pub fn store(&self, role_arn: &str, cred: &TemporaryCredential) -> Result<PathBuf, CacheError> {
        let path = self.path_for(role_arn)?;
        let data = serde_json::to_vec(cred)?;

        if let Some(dir) = path.parent() {
            create_private_dir(dir)?;
        }

        let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
        let written = write_private_file(&tmp, &data).and_then(|()| fs::rename(&tmp, &path));
        if let Err(source) = written {
            let _ = fs::remove_file(&tmp);
            return Err(CacheError::Write { path, source });
        }

        debug!(path = %path.display(), expiration = %cred.expiration, "cache updated");
        Ok(path)
    }
}

fn create_private_dir(dir: &Path) -> Result<(), CacheError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir).map_err(|source| CacheError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

fn write_private_file(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()
}
