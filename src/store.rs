use std::fs;
use std::io;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::{Builder, TempDir};

use crate::domain::TabledapUrl;
use crate::error::BagitifyError;

/// Marker file whose presence makes a directory a bag.
pub const BAG_DECLARATION: &str = "bagit.txt";
pub const PAYLOAD_DIR: &str = "data";
pub const DEFAULT_ARCHIVE_ROOT: &str = "bagit_archives";
pub const DEFAULT_STAGING_PARENT: &str = ".tmp-bagitify";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveState {
    NotYetArchive,
    ExistingArchive,
}

impl ArchiveState {
    pub fn detect(archive_dir: &Utf8Path) -> Self {
        if archive_dir.join(BAG_DECLARATION).as_std_path().is_file() {
            ArchiveState::ExistingArchive
        } else {
            ArchiveState::NotYetArchive
        }
    }
}

/// How a staging directory is reconciled into the payload directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Staging directory is renamed to become the payload directory.
    Rename,
    /// Staged files are moved one by one, other payload files stay.
    PerFile,
    /// Payload is emptied, then replaced by the staging directory.
    Replace,
}

impl MergeMode {
    pub fn plan(state: ArchiveState, payload_exists: bool, force: bool) -> Self {
        match (state, payload_exists, force) {
            (ArchiveState::NotYetArchive, false, _) => MergeMode::Rename,
            (ArchiveState::ExistingArchive, true, false) => MergeMode::PerFile,
            (ArchiveState::ExistingArchive, true, true) => MergeMode::Replace,
            // payload left behind by a run that never finalized
            (ArchiveState::NotYetArchive, true, false) => MergeMode::PerFile,
            (ArchiveState::NotYetArchive, true, true) => MergeMode::Replace,
            (ArchiveState::ExistingArchive, false, _) => MergeMode::Rename,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Store {
    archive_dir: Utf8PathBuf,
    staging_parent: Utf8PathBuf,
}

impl Store {
    pub fn new(
        url: &TabledapUrl,
        archive_dir: Option<Utf8PathBuf>,
        staging_parent: Option<Utf8PathBuf>,
    ) -> Result<Self, BagitifyError> {
        let archive_dir = match archive_dir {
            Some(dir) => dir,
            None => {
                let cwd =
                    std::env::current_dir().map_err(|err| BagitifyError::Filesystem(err.to_string()))?;
                Utf8PathBuf::from_path_buf(cwd)
                    .map_err(|_| BagitifyError::Filesystem("non-utf8 working directory".to_string()))?
                    .join(DEFAULT_ARCHIVE_ROOT)
                    .join(url.dataset_name())
            }
        };
        let staging_parent = match staging_parent {
            Some(dir) => dir,
            None => archive_dir
                .parent()
                .map(|parent| parent.join(DEFAULT_STAGING_PARENT))
                .ok_or_else(|| {
                    BagitifyError::Filesystem(format!("bag directory {archive_dir} has no parent"))
                })?,
        };
        Ok(Self::new_with_paths(archive_dir, staging_parent))
    }

    pub fn new_with_paths(archive_dir: Utf8PathBuf, staging_parent: Utf8PathBuf) -> Self {
        Self {
            archive_dir,
            staging_parent,
        }
    }

    pub fn archive_dir(&self) -> &Utf8Path {
        &self.archive_dir
    }

    pub fn staging_parent(&self) -> &Utf8Path {
        &self.staging_parent
    }

    pub fn payload_dir(&self) -> Utf8PathBuf {
        self.archive_dir.join(PAYLOAD_DIR)
    }

    pub fn state(&self) -> ArchiveState {
        ArchiveState::detect(&self.archive_dir)
    }

    pub fn ensure_dirs(&self) -> Result<(), BagitifyError> {
        for dir in [&self.archive_dir, &self.staging_parent] {
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| BagitifyError::Filesystem(format!("create {dir}: {err}")))?;
        }
        Ok(())
    }

    /// Whole-directory renames need staging and archive on one device.
    pub fn check_same_filesystem(&self) -> Result<(), BagitifyError> {
        let same = same_filesystem(
            self.staging_parent.as_std_path(),
            self.archive_dir.as_std_path(),
        )
        .map_err(|err| BagitifyError::Filesystem(err.to_string()))?;
        if !same {
            return Err(BagitifyError::DifferentFilesystems {
                staging: self.staging_parent.clone().into_std_path_buf(),
                archive: self.archive_dir.clone().into_std_path_buf(),
            });
        }
        Ok(())
    }

    pub fn create_staging(&self, prefix: &str) -> Result<TempDir, BagitifyError> {
        Builder::new()
            .prefix(&format!("{prefix}-"))
            .tempdir_in(self.staging_parent.as_std_path())
            .map_err(|err| BagitifyError::Filesystem(err.to_string()))
    }

    pub fn merge_staging(
        &self,
        staging: &Path,
        state: ArchiveState,
        force: bool,
    ) -> Result<MergeReport, BagitifyError> {
        let payload = self.payload_dir();
        let mode = MergeMode::plan(state, payload.as_std_path().is_dir(), force);
        let (moved, removed) = match mode {
            MergeMode::Rename => {
                let moved = list_files(staging)?.len();
                rename_dir(staging, payload.as_std_path())?;
                (moved, 0)
            }
            MergeMode::PerFile => (move_files(staging, payload.as_std_path())?, 0),
            MergeMode::Replace => {
                let removed = clear_dir(payload.as_std_path())?;
                let moved = list_files(staging)?.len();
                rename_dir(staging, payload.as_std_path())?;
                (moved, removed)
            }
        };
        Ok(MergeReport {
            mode,
            moved,
            removed,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub mode: MergeMode,
    pub moved: usize,
    pub removed: usize,
}

#[cfg(unix)]
pub fn same_filesystem(a: &Path, b: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    Ok(fs::metadata(a)?.dev() == fs::metadata(b)?.dev())
}

#[cfg(not(unix))]
pub fn same_filesystem(a: &Path, b: &Path) -> io::Result<bool> {
    fs::metadata(a)?;
    fs::metadata(b)?;
    Ok(true)
}

fn list_files(dir: &Path) -> Result<Vec<std::path::PathBuf>, BagitifyError> {
    let entries = fs::read_dir(dir)
        .map_err(|err| BagitifyError::Filesystem(format!("read {}: {err}", dir.display())))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| BagitifyError::Filesystem(err.to_string()))?;
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}

fn move_files(from: &Path, to: &Path) -> Result<usize, BagitifyError> {
    let files = list_files(from)?;
    for file in &files {
        let Some(name) = file.file_name() else {
            continue;
        };
        let target = to.join(name);
        fs::rename(file, &target).map_err(|err| {
            BagitifyError::Filesystem(format!(
                "move {} to {}: {err}",
                file.display(),
                target.display()
            ))
        })?;
    }
    Ok(files.len())
}

fn clear_dir(dir: &Path) -> Result<usize, BagitifyError> {
    let entries = list_files(dir)?;
    for entry in &entries {
        let result = if entry.is_dir() {
            fs::remove_dir_all(entry)
        } else {
            fs::remove_file(entry)
        };
        result.map_err(|err| {
            BagitifyError::Filesystem(format!("remove {}: {err}", entry.display()))
        })?;
    }
    Ok(entries.len())
}

/// Renames `from` onto `to`, which must be absent or empty. Staging
/// directories are created owner-only, so the result is opened up to 0o755.
fn rename_dir(from: &Path, to: &Path) -> Result<(), BagitifyError> {
    #[cfg(not(unix))]
    if to.exists() {
        fs::remove_dir(to).map_err(|err| BagitifyError::Filesystem(err.to_string()))?;
    }
    fs::rename(from, to).map_err(|err| {
        BagitifyError::Filesystem(format!(
            "rename {} to {}: {err}",
            from.display(),
            to.display()
        ))
    })?;
    normalize_permissions(to).map_err(|err| BagitifyError::Filesystem(err.to_string()))
}

#[cfg(unix)]
pub(crate) fn normalize_permissions(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
pub(crate) fn normalize_permissions(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_covers_every_state() {
        use ArchiveState::*;
        assert_eq!(MergeMode::plan(NotYetArchive, false, false), MergeMode::Rename);
        assert_eq!(MergeMode::plan(NotYetArchive, false, true), MergeMode::Rename);
        assert_eq!(MergeMode::plan(ExistingArchive, true, false), MergeMode::PerFile);
        assert_eq!(MergeMode::plan(ExistingArchive, true, true), MergeMode::Replace);
        assert_eq!(MergeMode::plan(NotYetArchive, true, false), MergeMode::PerFile);
        assert_eq!(MergeMode::plan(ExistingArchive, false, false), MergeMode::Rename);
    }

    #[test]
    fn default_layout() {
        let url: TabledapUrl = "https://example.org/erddap/tabledap/station_42".parse().unwrap();
        let store = Store::new(&url, None, None).unwrap();
        assert!(store.archive_dir().ends_with("bagit_archives/station_42"));
        assert!(store.staging_parent().ends_with("bagit_archives/.tmp-bagitify"));
        assert!(store.payload_dir().ends_with("station_42/data"));
    }

    #[test]
    fn detects_bag_declaration() {
        let temp = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        assert_eq!(ArchiveState::detect(&dir), ArchiveState::NotYetArchive);
        fs::write(dir.join(BAG_DECLARATION), "BagIt-Version: 0.97\n").unwrap();
        assert_eq!(ArchiveState::detect(&dir), ArchiveState::ExistingArchive);
    }

    #[test]
    fn same_filesystem_for_siblings() {
        let temp = tempfile::tempdir().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::create_dir(&a).unwrap();
        fs::create_dir(&b).unwrap();
        assert!(same_filesystem(&a, &b).unwrap());
        assert!(same_filesystem(&a, &temp.path().join("missing")).is_err());
    }
}
