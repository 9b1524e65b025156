//! Minimal BagIt writer: declaration, bag-info, payload and tag manifests.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::BagitifyError;
use crate::store::{BAG_DECLARATION, PAYLOAD_DIR, normalize_permissions};

pub const BAGIT_VERSION: &str = "0.97";
pub const BAG_INFO: &str = "bag-info.txt";
pub const MANIFEST: &str = "manifest-sha256.txt";
pub const TAG_MANIFEST: &str = "tagmanifest-sha256.txt";

/// bag-info.txt fields; a key may repeat, so every key maps to a list.
pub type BagInfo = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub digest: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct Bag {
    dir: Utf8PathBuf,
}

impl Bag {
    /// Turns `dir` into a bag. Payload already under `data/` is kept in place,
    /// otherwise every top-level entry is moved into a new `data/`.
    pub fn create(dir: &Utf8Path, info: &BagInfo) -> Result<Self, BagitifyError> {
        let bag = Self {
            dir: dir.to_path_buf(),
        };
        let payload = bag.payload_dir();
        if !payload.as_std_path().is_dir() {
            bag.gather_payload()?;
        }

        let mut info = info.clone();
        info.entry("Bagging-Date".to_string())
            .or_insert_with(|| vec![Utc::now().format("%Y-%m-%d").to_string()]);
        info.insert(
            "Bag-Software-Agent".to_string(),
            vec![format!("bagitify/{}", env!("CARGO_PKG_VERSION"))],
        );

        write_atomic(
            &dir.join(BAG_DECLARATION),
            format!("BagIt-Version: {BAGIT_VERSION}\nTag-File-Character-Encoding: UTF-8\n")
                .as_bytes(),
        )?;
        bag.save(info)?;
        Ok(bag)
    }

    pub fn open(dir: &Utf8Path) -> Result<Self, BagitifyError> {
        if !dir.join(BAG_DECLARATION).as_std_path().is_file() {
            return Err(BagitifyError::Filesystem(format!("{dir} is not a bag")));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// Overlays `info` onto the existing bag-info and rewrites every manifest.
    pub fn update(&self, info: &BagInfo) -> Result<(), BagitifyError> {
        let mut merged = self.info()?;
        for (key, values) in info {
            merged.insert(key.clone(), values.clone());
        }
        merged
            .entry("Bagging-Date".to_string())
            .or_insert_with(|| vec![Utc::now().format("%Y-%m-%d").to_string()]);
        self.save(merged)
    }

    pub fn payload_dir(&self) -> Utf8PathBuf {
        self.dir.join(PAYLOAD_DIR)
    }

    pub fn info(&self) -> Result<BagInfo, BagitifyError> {
        let path = self.dir.join(BAG_INFO);
        if !path.as_std_path().exists() {
            return Ok(BagInfo::new());
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| BagitifyError::Filesystem(format!("read {path}: {err}")))?;
        Ok(parse_bag_info(&content))
    }

    pub fn manifest(&self) -> Result<Vec<ManifestEntry>, BagitifyError> {
        let path = self.dir.join(MANIFEST);
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| BagitifyError::Filesystem(format!("read {path}: {err}")))?;
        Ok(content
            .lines()
            .filter_map(|line| line.split_once(char::is_whitespace))
            .map(|(digest, path)| ManifestEntry {
                digest: digest.to_string(),
                path: path.trim_start().to_string(),
            })
            .collect())
    }

    fn save(&self, mut info: BagInfo) -> Result<(), BagitifyError> {
        let payload = self.payload_entries()?;
        let bytes: u64 = payload.iter().map(|(_, _, size)| size).sum();
        info.insert(
            "Payload-Oxum".to_string(),
            vec![format!("{bytes}.{}", payload.len())],
        );
        write_atomic(&self.dir.join(BAG_INFO), render_bag_info(&info).as_bytes())?;

        let mut manifest = String::new();
        for (relative, path, _) in &payload {
            manifest.push_str(&format!("{}  {PAYLOAD_DIR}/{relative}\n", sha256_file(path)?));
        }
        write_atomic(&self.dir.join(MANIFEST), manifest.as_bytes())?;

        let mut tag_manifest = String::new();
        for name in [BAG_DECLARATION, BAG_INFO, MANIFEST] {
            let path = self.dir.join(name);
            tag_manifest.push_str(&format!("{} {name}\n", sha256_file(path.as_std_path())?));
        }
        write_atomic(&self.dir.join(TAG_MANIFEST), tag_manifest.as_bytes())
    }

    fn gather_payload(&self) -> Result<(), BagitifyError> {
        let staging = tempfile::Builder::new()
            .prefix(".bagitify-payload-")
            .tempdir_in(self.dir.as_std_path())
            .map_err(|err| BagitifyError::Filesystem(err.to_string()))?;
        let entries = fs::read_dir(self.dir.as_std_path())
            .map_err(|err| BagitifyError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| BagitifyError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path == staging.path() {
                continue;
            }
            fs::rename(&path, staging.path().join(entry.file_name()))
                .map_err(|err| BagitifyError::Filesystem(err.to_string()))?;
        }
        let staged = staging.keep();
        let payload = self.payload_dir();
        fs::rename(&staged, payload.as_std_path())
            .map_err(|err| BagitifyError::Filesystem(err.to_string()))?;
        normalize_permissions(payload.as_std_path())
            .map_err(|err| BagitifyError::Filesystem(err.to_string()))
    }

    /// `(relative path, absolute path, size)` of every payload file, sorted.
    fn payload_entries(&self) -> Result<Vec<(String, PathBuf, u64)>, BagitifyError> {
        let root = self.payload_dir();
        let mut entries = Vec::new();
        let mut stack = vec![root.as_std_path().to_path_buf()];
        while let Some(dir) = stack.pop() {
            let listing =
                fs::read_dir(&dir).map_err(|err| BagitifyError::Filesystem(err.to_string()))?;
            for entry in listing {
                let entry = entry.map_err(|err| BagitifyError::Filesystem(err.to_string()))?;
                let path = entry.path();
                let metadata = entry
                    .metadata()
                    .map_err(|err| BagitifyError::Filesystem(err.to_string()))?;
                if metadata.is_dir() {
                    stack.push(path);
                    continue;
                }
                let relative = path
                    .strip_prefix(root.as_std_path())
                    .map_err(|err| BagitifyError::Filesystem(err.to_string()))?
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                entries.push((relative, path, metadata.len()));
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

pub fn parse_bag_info(content: &str) -> BagInfo {
    let mut info = BagInfo::new();
    let mut last_key: Option<String> = None;
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        // folded continuation of the previous value
        if line.starts_with([' ', '\t']) {
            if let Some(value) = last_key
                .as_ref()
                .and_then(|key| info.get_mut(key))
                .and_then(|values| values.last_mut())
            {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_string();
            info.entry(key.clone())
                .or_default()
                .push(value.trim().to_string());
            last_key = Some(key);
        }
    }
    info
}

pub fn render_bag_info(info: &BagInfo) -> String {
    let mut out = String::new();
    for (key, values) in info {
        for value in values {
            let value = value.replace(['\r', '\n'], " ");
            out.push_str(&format!("{key}: {value}\n"));
        }
    }
    out
}

pub fn sha256_file(path: &Path) -> Result<String, BagitifyError> {
    let mut file = File::open(path)
        .map_err(|err| BagitifyError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(BagitifyError::Filesystem(err.to_string())),
        };
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), BagitifyError> {
    let tmp_path = path.with_extension("tmp");
    fs::write(tmp_path.as_std_path(), content)
        .map_err(|err| BagitifyError::Filesystem(format!("write {tmp_path}: {err}")))?;
    fs::rename(tmp_path.as_std_path(), path.as_std_path())
        .map_err(|err| BagitifyError::Filesystem(format!("rename {tmp_path}: {err}")))
}
