use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tracing::warn;
use crate::core::error::{Error, Result};
use crate::core::types::Locator;
use crate::storage::layout::{version_file_name, VERSION_FILE_PREFIX};
use crate::storage::segment::SegmentId;

pub const INVALID_VERSION_ID: i64 = -1;

/// Format 2 lets the incremental build win timestamp ties; format 1 keeps an
/// unbroken realtime chain at the tie timestamp.
pub const DEFAULT_VERSION_FORMAT: u32 = 2;

/// One consistent on-disk state: an ordered pointer set over segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub version_id: i64,
    pub segment_ids: Vec<SegmentId>,
    pub schema_version_id: i32,
    pub timestamp: i64,
    #[serde(default)]
    pub locator: Option<Locator>,
    #[serde(default = "default_format")]
    pub format_version: u32,
}

fn default_format() -> u32 {
    DEFAULT_VERSION_FORMAT
}

impl Version {
    pub fn new(version_id: i64, segment_ids: Vec<SegmentId>, schema_version_id: i32, timestamp: i64) -> Self {
        Version {
            version_id,
            segment_ids,
            schema_version_id,
            timestamp,
            locator: None,
            format_version: DEFAULT_VERSION_FORMAT,
        }
    }

    /// The version served before any offline build exists.
    pub fn empty() -> Self {
        Version::new(INVALID_VERSION_ID, Vec::new(), 0, i64::MIN)
    }

    pub fn is_valid(&self) -> bool {
        self.version_id != INVALID_VERSION_ID
    }

    pub fn contains(&self, id: SegmentId) -> bool {
        self.segment_ids.binary_search(&id).is_ok()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(id) = self.segment_ids.iter().find(|id| !id.is_well_formed()) {
            return Err(Error::inconsistent(format!(
                "version {} lists segment id {} outside the segment id space",
                self.version_id, id
            )));
        }
        for pair in self.segment_ids.windows(2) {
            if pair[0] >= pair[1] {
                return Err(Error::inconsistent(format!(
                    "version {} segment ids not ascending: {} then {}",
                    self.version_id, pair[0], pair[1]
                )));
            }
        }
        Ok(())
    }

    pub fn store(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(version_file_name(self.version_id));
        let tmp = dir.join(format!("{}.tmp", version_file_name(self.version_id)));
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, &path)?;
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let version: Version = serde_json::from_slice(&data)?;
        version.validate()?;
        Ok(version)
    }

    pub fn load_id(dir: &Path, version_id: i64) -> Result<Self> {
        let path = dir.join(version_file_name(version_id));
        if !path.exists() {
            return Err(Error::not_found(format!("version {} under {}", version_id, dir.display())));
        }
        Self::load(&path)
    }
}

/// Version ids with a marker file under `dir`, ascending.
pub fn list_version_ids(dir: &Path) -> Result<Vec<i64>> {
    let mut ids = Vec::new();
    if !dir.exists() {
        return Ok(ids);
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(id) = name
            .to_str()
            .and_then(|n| n.strip_prefix(VERSION_FILE_PREFIX))
            .and_then(|n| n.parse::<i64>().ok())
        {
            ids.push(id);
        }
    }
    ids.sort();
    Ok(ids)
}

/// Newest loadable version under `dir`, skipping markers that fail to load.
pub fn load_latest(dir: &Path) -> Result<Option<Version>> {
    for id in list_version_ids(dir)?.into_iter().rev() {
        match Version::load_id(dir, id) {
            Ok(version) => return Ok(Some(version)),
            Err(e) => warn!(version_id = id, dir = %dir.display(), error = %e, "skipping unreadable version"),
        }
    }
    Ok(None)
}

/// Picks the root holding the numerically highest loadable version.
///
/// Roots that cannot be read are skipped; when none holds a version the
/// first root is returned with no version.
pub fn resolve_latest(roots: &[PathBuf]) -> Result<(PathBuf, Option<Version>)> {
    let first = roots
        .first()
        .cloned()
        .ok_or_else(|| Error::invalid_argument("no index root"))?;

    let mut best: Option<(PathBuf, Version)> = None;
    for root in roots {
        match load_latest(root) {
            Ok(Some(version)) => {
                let newer = best
                    .as_ref()
                    .map(|(_, b)| version.version_id > b.version_id)
                    .unwrap_or(true);
                if newer {
                    best = Some((root.clone(), version));
                }
            }
            Ok(None) => {}
            Err(e) => warn!(root = %root.display(), error = %e, "index root unreadable"),
        }
    }

    Ok(match best {
        Some((root, version)) => (root, Some(version)),
        None => (first, None),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::segment::REALTIME_SEGMENT_MASK;

    #[test]
    fn highest_version_across_roots_wins() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        Version::new(1, vec![SegmentId(0)], 0, 10).store(a.path()).unwrap();
        Version::new(3, vec![SegmentId(0), SegmentId(1)], 0, 20).store(b.path()).unwrap();

        let roots = vec![a.path().to_path_buf(), b.path().to_path_buf()];
        let (root, version) = resolve_latest(&roots).unwrap();
        assert_eq!(root, b.path());
        assert_eq!(version.unwrap().version_id, 3);
    }

    #[test]
    fn corrupt_marker_falls_back_to_previous() {
        let dir = tempfile::tempdir().unwrap();
        Version::new(1, vec![SegmentId(0)], 0, 10).store(dir.path()).unwrap();
        fs::write(dir.path().join("version.2"), b"not json").unwrap();

        let version = load_latest(dir.path()).unwrap().unwrap();
        assert_eq!(version.version_id, 1);
    }

    #[test]
    fn unordered_segments_are_rejected() {
        let version = Version::new(1, vec![SegmentId(2), SegmentId(1)], 0, 0);
        assert!(version.validate().is_err());
    }

    #[test]
    fn ids_outside_the_segment_space_are_rejected() {
        let tagged_twice = SegmentId(REALTIME_SEGMENT_MASK << 1);
        assert!(Version::new(1, vec![SegmentId(0), tagged_twice], 0, 0).validate().is_err());
        assert!(Version::new(1, vec![SegmentId(-1), SegmentId(0)], 0, 0).validate().is_err());

        let marker = Version::new(2, vec![SegmentId(0), SegmentId::realtime(4)], 0, 0);
        assert!(marker.validate().is_ok());

        let dir = tempfile::tempdir().unwrap();
        Version::new(1, vec![SegmentId(0)], 0, 10).store(dir.path()).unwrap();
        Version::new(2, vec![SegmentId(0), tagged_twice], 0, 20).store(dir.path()).unwrap();
        assert_eq!(load_latest(dir.path()).unwrap().unwrap().version_id, 1);
    }

    #[test]
    fn no_version_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (_, version) = resolve_latest(&[dir.path().to_path_buf()]).unwrap();
        assert!(version.is_none());
    }
}
