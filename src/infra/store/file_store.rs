// File-backed credential store: one JSON file per credential id under the
// data directory, with the previous contents preserved as `<id>.json.bak` on
// every overwrite. This is the on-disk token format the automation scripts
// share; keeping it a flat readable file makes manual recovery trivial.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::auth::{AuthError, CredentialRecord, CredentialStore};

pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn backup_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json.bak"))
    }

    fn temp_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json.tmp"))
    }

    /// Credential ids become file names, so reject anything that could
    /// escape the data directory.
    fn validate_id(id: &str) -> Result<(), AuthError> {
        let ok = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if ok && !id.starts_with('.') {
            Ok(())
        } else {
            Err(AuthError::Storage(format!(
                "invalid credential id '{id}': use alphanumerics, '-' and '_'"
            )))
        }
    }

    /// Token files hold long-lived secrets; keep them private to the owner.
    fn restrict_permissions(path: &Path) -> Result<(), AuthError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .map_err(|e| AuthError::Storage(e.to_string()))?;
        }
        #[cfg(not(unix))]
        {
            let _ = path;
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, id: &str) -> Result<Option<CredentialRecord>, AuthError> {
        Self::validate_id(id)?;
        let path = self.record_path(id);
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path).map_err(|e| AuthError::Storage(e.to_string()))?;
        let record = serde_json::from_str(&contents).map_err(|e| {
            AuthError::Storage(format!("corrupt credential file {}: {e}", path.display()))
        })?;
        Ok(Some(record))
    }

    async fn save(&self, id: &str, record: &CredentialRecord) -> Result<(), AuthError> {
        Self::validate_id(id)?;
        fs::create_dir_all(&self.dir).map_err(|e| AuthError::Storage(e.to_string()))?;

        let path = self.record_path(id);

        // Keep the previous token file around; a bad refresh response should
        // never be able to destroy the only copy of a refresh token.
        if path.exists() {
            fs::copy(&path, self.backup_path(id)).map_err(|e| AuthError::Storage(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| AuthError::Storage(e.to_string()))?;

        // Write to a sibling temp file and rename it into place. A crash
        // mid-write must never leave a half-written token file as the
        // current copy.
        let tmp = self.temp_path(id);
        fs::write(&tmp, json).map_err(|e| AuthError::Storage(e.to_string()))?;
        Self::restrict_permissions(&tmp)?;
        fs::rename(&tmp, &path).map_err(|e| AuthError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), AuthError> {
        Self::validate_id(id)?;
        let path = self.record_path(id);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| AuthError::Storage(e.to_string()))?;
        }
        let backup = self.backup_path(id);
        if backup.exists() {
            fs::remove_file(&backup).map_err(|e| AuthError::Storage(e.to_string()))?;
        }
        // A temp file can only linger after a crash mid-save; clean it up too.
        let tmp = self.temp_path(id);
        if tmp.exists() {
            fs::remove_file(&tmp).map_err(|e| AuthError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<String>, AuthError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| AuthError::Storage(e.to_string()))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| AuthError::Storage(e.to_string()))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // Skip backups and anything that isn't a credential file.
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
