use std::fs;
use std::path::Path;

use camino::Utf8PathBuf;
use tempfile::TempDir;

use bagitify::store::{ArchiveState, BAG_DECLARATION, MergeMode, Store};

fn layout() -> (TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let store = Store::new_with_paths(root.join("station"), root.join(".tmp-bagitify"));
    store.ensure_dirs().unwrap();
    (temp, store)
}

fn make_existing_archive(store: &Store, files: &[(&str, &str)]) {
    fs::create_dir_all(store.payload_dir().as_std_path()).unwrap();
    fs::write(
        store.archive_dir().join(BAG_DECLARATION).as_std_path(),
        "BagIt-Version: 0.97\nTag-File-Character-Encoding: UTF-8\n",
    )
    .unwrap();
    for (name, content) in files {
        fs::write(store.payload_dir().join(name).as_std_path(), content).unwrap();
    }
}

fn stage(store: &Store, files: &[(&str, &str)]) -> TempDir {
    let staging = store.create_staging("station").unwrap();
    for (name, content) in files {
        fs::write(staging.path().join(name), content).unwrap();
    }
    staging
}

fn payload_listing(store: &Store) -> Vec<(String, String)> {
    let mut files = fs::read_dir(store.payload_dir().as_std_path())
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            (
                path.file_name().unwrap().to_string_lossy().into_owned(),
                fs::read_to_string(&path).unwrap(),
            )
        })
        .collect::<Vec<_>>();
    files.sort();
    files
}

fn owned(files: &[(&str, &str)]) -> Vec<(String, String)> {
    files
        .iter()
        .map(|(name, content)| (name.to_string(), content.to_string()))
        .collect()
}

#[test]
fn new_archive_takes_the_staging_directory() {
    let (_temp, store) = layout();
    let staged = [
        ("station_2022-05.nc", "may"),
        ("station_2022-06.nc", "june"),
        ("station_2022-07.nc", "july"),
    ];
    let staging = stage(&store, &staged);
    let staging_path = staging.path().to_path_buf();

    let report = store
        .merge_staging(&staging_path, ArchiveState::NotYetArchive, false)
        .unwrap();
    drop(staging);

    assert_eq!(report.mode, MergeMode::Rename);
    assert_eq!(report.moved, 3);
    assert!(!staging_path.exists());
    assert_eq!(payload_listing(&store), owned(&staged));
}

#[cfg(unix)]
#[test]
fn renamed_payload_is_world_readable() {
    use std::os::unix::fs::PermissionsExt;

    let (_temp, store) = layout();
    let staging = stage(&store, &[("station_2022-05.nc", "may")]);
    store
        .merge_staging(staging.path(), ArchiveState::NotYetArchive, false)
        .unwrap();

    let mode = fs::metadata(store.payload_dir().as_std_path())
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[test]
fn existing_archive_merges_file_by_file() {
    let (_temp, store) = layout();
    make_existing_archive(
        &store,
        &[("station_2022-05.nc", "old may"), ("station_2022-06.nc", "old june")],
    );
    let staging = stage(
        &store,
        &[("station_2022-06.nc", "new june"), ("station_2022-07.nc", "july")],
    );

    let report = store
        .merge_staging(staging.path(), store.state(), false)
        .unwrap();

    assert_eq!(report.mode, MergeMode::PerFile);
    assert_eq!(report.moved, 2);
    assert_eq!(
        payload_listing(&store),
        owned(&[
            ("station_2022-05.nc", "old may"),
            ("station_2022-06.nc", "new june"),
            ("station_2022-07.nc", "july"),
        ])
    );
    assert!(store.archive_dir().join(BAG_DECLARATION).as_std_path().exists());
}

#[test]
fn forced_merge_replaces_the_payload() {
    let (_temp, store) = layout();
    make_existing_archive(&store, &[("station_2022-05.nc", "old may")]);
    let staging = stage(&store, &[("station_2022-06.nc", "june")]);

    let report = store
        .merge_staging(staging.path(), store.state(), true)
        .unwrap();

    assert_eq!(report.mode, MergeMode::Replace);
    assert_eq!(report.removed, 1);
    assert_eq!(
        payload_listing(&store),
        owned(&[("station_2022-06.nc", "june")])
    );
}

#[test]
fn failed_per_file_merge_keeps_moved_files() {
    let (_temp, store) = layout();
    make_existing_archive(&store, &[]);
    let staging = stage(&store, &[("a_2022-05.nc", "may")]);
    // a directory cannot replace a file, so the second move fails
    fs::create_dir(staging.path().join("b_2022-06.nc")).unwrap();
    fs::write(store.payload_dir().join("b_2022-06.nc").as_std_path(), "old").unwrap();

    let result = store.merge_staging(staging.path(), store.state(), false);

    assert!(result.is_err());
    assert_eq!(
        payload_listing(&store),
        owned(&[("a_2022-05.nc", "may"), ("b_2022-06.nc", "old")])
    );
}

#[test]
fn staging_lives_under_the_staging_parent() {
    let (_temp, store) = layout();
    let staging = store.create_staging("station").unwrap();
    assert!(staging.path().starts_with(store.staging_parent()));
    let name = staging.path().file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("station-"));
    store.check_same_filesystem().unwrap();

    let path = staging.path().to_path_buf();
    drop(staging);
    assert!(!Path::new(&path).exists());
}
