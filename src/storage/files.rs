//! Uploaded-file storage.
//!
//! Files land under `<root>/uploads/csv/<user_id>/<upload_id>_<name>`
//! and the returned path is stable for later reads. Filenames are
//! flattened to a safe character set so a crafted name cannot escape
//! the namespace, and prefixed with the upload id so a reused client
//! filename never overwrites an earlier upload.

use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::store::Result;

/// Stores uploaded CSV files namespaced by owning user.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Creates storage rooted at `root`.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Returns the directory for one user's uploads.
    #[must_use]
    pub fn user_dir(&self, user_id: Uuid) -> PathBuf {
        self.root
            .join("uploads")
            .join("csv")
            .join(user_id.to_string())
    }

    /// Writes `bytes` under the user's namespace and returns the
    /// stable path. The upload id keys the stored name, so each upload
    /// gets its own file even when clients reuse a filename.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written.
    pub fn save(
        &self,
        user_id: Uuid,
        upload_id: Uuid,
        filename: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let dir = self.user_dir(user_id);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{upload_id}_{}", sanitize_filename(filename)));
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Reads a previously stored file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub fn load(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(std::fs::read(path)?)
    }
}

/// Flattens a client-supplied filename to `[A-Za-z0-9._-]`, dropping
/// any directory components.
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches(['.', '_']).is_empty() {
        "upload.csv".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_directories_and_odd_characters() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("répondants 2024.csv"), "r_pondants_2024.csv");
        assert_eq!(sanitize_filename("data.csv"), "data.csv");
        assert_eq!(sanitize_filename("...."), "upload.csv");
        assert_eq!(sanitize_filename(""), "upload.csv");
    }

    #[test]
    fn save_namespaces_by_user() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().to_path_buf());
        let user = Uuid::new_v4();

        let path = storage
            .save(user, Uuid::new_v4(), "data.csv", b"a,b\n1,2\n")
            .unwrap();
        assert!(path.starts_with(storage.user_dir(user)));
        assert_eq!(storage.load(&path).unwrap(), b"a,b\n1,2\n");
    }

    #[test]
    fn reused_filenames_get_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().to_path_buf());
        let user = Uuid::new_v4();

        let first = storage
            .save(user, Uuid::new_v4(), "data.csv", b"x,y\n1,2\n")
            .unwrap();
        let second = storage
            .save(user, Uuid::new_v4(), "data.csv", b"a,b\n3,4\n")
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(storage.load(&first).unwrap(), b"x,y\n1,2\n");
        assert_eq!(storage.load(&second).unwrap(), b"a,b\n3,4\n");
    }
}
