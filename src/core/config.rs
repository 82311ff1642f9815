use std::fs;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, Result};

/// Online partition configuration.
///
/// Every field has a default so a JSON file only needs to name what it
/// overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub index_roots: Vec<PathBuf>,              // Candidate primary roots
    pub cluster_name: String,
    pub keep_version_count: usize,              // On-disk versions kept by GC
    pub max_realtime_memory: usize,             // Realtime quota in bytes
    pub max_reopen_memory: usize,               // Reopen quota in bytes
    pub realtime_link_watermark: Option<usize>, // Link realtime segments above this
    pub max_building_doc_count: usize,          // Seal the building segment at this size
    pub async_dump: bool,
    pub disable_load_customized_index: bool,
    pub lazy_load_attributes: bool,
    pub version_format: Option<u32>,            // Overrides the version's format
    pub refresh_reader_on_build: bool,
    pub auto_garbage_collect: bool,
    pub reader_build_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            index_roots: vec![PathBuf::from("./data")],
            cluster_name: "cluster".to_string(),
            keep_version_count: 2,
            max_realtime_memory: 1024 * 1024 * 1024,   // 1GB
            max_reopen_memory: 4 * 1024 * 1024 * 1024, // 4GB
            realtime_link_watermark: None,
            max_building_doc_count: 10_000,
            async_dump: false,
            disable_load_customized_index: false,
            lazy_load_attributes: false,
            version_format: None,
            refresh_reader_on_build: true,
            auto_garbage_collect: true,
            reader_build_threads: num_cpus::get(),
        }
    }
}

impl Config {
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        Config {
            index_roots: vec![root.as_ref().to_path_buf()],
            ..Config::default()
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path)?;
        let config: Config = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.index_roots.is_empty() {
            return Err(Error::invalid_argument("no index root configured"));
        }
        if self.max_building_doc_count == 0 {
            return Err(Error::invalid_argument("max_building_doc_count must be positive"));
        }
        if let Some(format) = self.version_format {
            if format != 1 && format != 2 {
                return Err(Error::invalid_argument(format!("unknown version format {}", format)));
            }
        }
        Ok(())
    }

    /// The root the partition writes its realtime data under and cleans up.
    pub fn primary_root(&self) -> &Path {
        &self.index_roots[0]
    }
}
