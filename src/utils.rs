//! Directory helpers following the XDG Base Directory specification
//!
//! - Data: `~/.local/share/fwadm/` - config and the default snapshot
//! - State: `~/.local/state/fwadm/` - audit log and diagnostic log
//!
//! # Example
//!
//! ```no_run
//! use fwadm::utils::{ensure_dirs, get_state_dir};
//!
//! ensure_dirs().expect("Failed to create directories");
//! let audit_log = get_state_dir().map(|dir| dir.join("audit.log"));
//! ```

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "fwadm", "fwadm")
}

pub fn get_data_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.data_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    project_dirs().and_then(|pd| pd.state_dir().map(Path::to_path_buf))
}

/// Where `--save` writes when neither `--file` nor the config names a path
pub fn default_snapshot_path() -> PathBuf {
    get_data_dir().map_or_else(
        || PathBuf::from("firewall_snapshot.json"),
        |dir| dir.join("firewall_snapshot.json"),
    )
}

/// Creates the data and state directories with mode 0700.
///
/// # Errors
///
/// Returns any error from creating the directories.
pub fn ensure_dirs() -> std::io::Result<()> {
    for dir in [get_data_dir(), get_state_dir()].into_iter().flatten() {
        create_private_dir(&dir)?;
    }
    Ok(())
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::fs::DirBuilder;
        use std::os::unix::fs::DirBuilderExt;

        DirBuilder::new().mode(0o700).recursive(true).create(dir)
    }

    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)
    }
}
