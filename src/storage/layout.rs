use std::path::{Path, PathBuf};
use std::fs;
use crate::core::error::Result;
use crate::storage::segment::SegmentId;

pub const VERSION_FILE_PREFIX: &str = "version.";
pub const REALTIME_DIR_NAME: &str = "rt_index_partition";
pub const SUB_SEGMENT_DIR_NAME: &str = "sub_segment";

/// Directory structure of one partition root.
///
/// ```text
/// <root>/version.<id>
/// <root>/segment_<id>_level_0/{segment_info,data,deletions,sub_segment/}
/// <root>/rt_index_partition/version.<id>
/// <root>/rt_index_partition/segment_<rt id>_level_0/{...,operation_log}
/// ```
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub root: PathBuf,          // Offline build output
    pub realtime_root: PathBuf, // Linked realtime segments
}

impl StorageLayout {
    pub fn new(root: PathBuf) -> Result<Self> {
        let realtime_root = root.join(REALTIME_DIR_NAME);
        fs::create_dir_all(&root)?;
        fs::create_dir_all(&realtime_root)?;

        Ok(StorageLayout {
            root,
            realtime_root,
        })
    }

    pub fn version_path(&self, version_id: i64) -> PathBuf {
        self.root.join(version_file_name(version_id))
    }

    pub fn segment_path(&self, id: SegmentId) -> PathBuf {
        self.root.join(segment_dir_name(id))
    }

    pub fn realtime_version_path(&self, version_id: i64) -> PathBuf {
        self.realtime_root.join(version_file_name(version_id))
    }

    pub fn realtime_segment_path(&self, id: SegmentId) -> PathBuf {
        self.realtime_root.join(segment_dir_name(id))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.realtime_root.join(".lock")
    }

    /// Segment ids that have a directory under `dir`.
    pub fn list_segment_dirs(dir: &Path) -> Result<Vec<SegmentId>> {
        let mut ids = Vec::new();
        if !dir.exists() {
            return Ok(ids);
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(parse_segment_dir_name) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

pub fn version_file_name(version_id: i64) -> String {
    format!("{}{}", VERSION_FILE_PREFIX, version_id)
}

pub fn segment_dir_name(id: SegmentId) -> String {
    format!("segment_{}_level_0", id.0)
}

pub fn parse_segment_dir_name(name: &str) -> Option<SegmentId> {
    let rest = name.strip_prefix("segment_")?;
    let id = rest.strip_suffix("_level_0")?;
    id.parse::<i64>().ok().map(SegmentId)
}

pub fn sub_segment_path(segment_dir: &Path) -> PathBuf {
    segment_dir.join(SUB_SEGMENT_DIR_NAME)
}
