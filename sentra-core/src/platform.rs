//! Platform-specific utilities: the `~/.sentra` home and private file writes.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Directory name under the user's home holding all client state.
pub const SENTRA_DIR: &str = ".sentra";

/// Get the Sentra state directory (`~/.sentra`).
///
/// Returns `None` when no home directory can be resolved.
pub fn sentra_home() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(SENTRA_DIR))
}

/// Same as [`sentra_home`] but as an io error when home is unknown.
pub fn require_sentra_home() -> std::io::Result<PathBuf> {
    sentra_home().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "could not resolve home directory",
        )
    })
}

/// Default scan root when nothing is configured (`~/dev`).
pub fn default_scan_root() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join("dev"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Create a directory readable only by the current user.
pub fn ensure_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Write `data` to `<path>.tmp` with mode 0600, then rename it over `path`.
///
/// Readers never observe a partially written file.
pub fn write_private_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    {
        let mut opts = fs::OpenOptions::new();
        opts.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let mut file = opts.open(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentra_home_suffix() {
        if let Some(home) = sentra_home() {
            assert!(home.ends_with(SENTRA_DIR));
        }
    }

    #[test]
    fn test_atomic_write_replaces_and_cleans_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("state.json");

        write_private_atomic(&target, b"{\"a\":1}").unwrap();
        write_private_atomic(&target, b"{\"a\":2}").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "{\"a\":2}");
        assert!(!dir.path().join("nested").join("state.json.tmp").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&target).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
