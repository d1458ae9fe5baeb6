//! Crash-safe file replacement shared by the credential store, the completion
//! ledger and the metadata sidecars.

use std::io::Write;
use std::path::{Path, PathBuf};

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `bytes` to `path` by writing a sibling `.tmp` file, flushing it to
/// disk and renaming it over the destination. Readers observe either the old
/// or the new content, never a truncated file.
///
/// With `owner_only` the file is created with mode 0600 on Unix.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8], owner_only: bool) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_path_for(path);
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    if owner_only {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let result = (|| {
        let mut file = options.open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result?;

    #[cfg(unix)]
    if owner_only {
        // The destination may predate this write with looser permissions.
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = owner_only;

    Ok(())
}

/// Async wrapper running [`write_atomic`] on the blocking pool.
pub(crate) async fn write_atomic_async(
    path: PathBuf,
    bytes: Vec<u8>,
    owner_only: bool,
) -> std::io::Result<()> {
    tokio::task::spawn_blocking(move || write_atomic(&path, &bytes, owner_only))
        .await
        .map_err(std::io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("flickr_backup_tests")
            .join("persist")
            .join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = test_dir("replace");
        let path = dir.join("data.json");
        write_atomic(&path, b"first", false).unwrap();
        write_atomic(&path, b"second", false).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn test_write_atomic_creates_parent() {
        let dir = test_dir("parent");
        let path = dir.join("nested").join("deeper").join("file.txt");
        write_atomic(&path, b"x", false).unwrap();
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = test_dir("perms");
        let path = dir.join("secret.json");
        std::fs::write(&path, b"old").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        write_atomic(&path, b"new", true).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_async_wrapper() {
        let dir = test_dir("async");
        let path = dir.join("a.txt");
        write_atomic_async(path.clone(), b"hello".to_vec(), false)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let p = Path::new("/a/b/tracker.json");
        assert_eq!(temp_path_for(p), PathBuf::from("/a/b/tracker.json.tmp"));
    }
}
