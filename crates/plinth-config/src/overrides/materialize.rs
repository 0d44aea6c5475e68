//! Temporary files for materialized override values
//!
//! Some consumers expect a file path (CA bundles, kubeconfigs) rather than an
//! inline value. The value is written to an owner-only temporary file and the
//! path is substituted. Files live exactly as long as the [`MaterializedFiles`]
//! guard owned by the reconciliation pass.

use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Prefix for materialized temp files
const FILE_PREFIX: &str = "plinth-override-";

/// Owner of the temp files created during one pass; removes them on drop.
#[derive(Debug, Default)]
pub struct MaterializedFiles {
    files: Vec<NamedTempFile>,
}

impl MaterializedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `contents` to a fresh owner-only file and return its path.
    pub fn materialize(&mut self, contents: &str) -> std::io::Result<PathBuf> {
        let mut file = tempfile::Builder::new().prefix(FILE_PREFIX).tempfile()?;
        restrict_to_owner(file.path())?;

        file.write_all(contents.as_bytes())?;
        file.as_file().sync_all()?;

        let path = file.path().to_path_buf();
        debug!(path = ?path, "Materialized override value");
        self.files.push(file);
        Ok(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(NamedTempFile::path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Stable fingerprint of a materialized value, used in place of its temp path
pub fn fingerprint(contents: &str) -> String {
    hex::encode(Sha256::digest(contents.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_materialize_writes_contents() {
        let mut files = MaterializedFiles::new();
        let path = files.materialize("-----BEGIN CERTIFICATE-----").unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "-----BEGIN CERTIFICATE-----"
        );
        assert_eq!(files.len(), 1);
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(FILE_PREFIX));
    }

    #[cfg(unix)]
    #[test]
    fn test_materialize_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let mut files = MaterializedFiles::new();
        let path = files.materialize("secret").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_files_removed_on_drop() {
        let mut files = MaterializedFiles::new();
        let first = files.materialize("one").unwrap();
        let second = files.materialize("two").unwrap();
        assert!(first.exists() && second.exists());

        drop(files);

        assert!(!first.exists());
        assert!(!second.exists());
    }

    #[test]
    fn test_fingerprint_stable() {
        assert_eq!(fingerprint("abc"), fingerprint("abc"));
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
        assert_eq!(fingerprint("abc").len(), 64);
    }
}
