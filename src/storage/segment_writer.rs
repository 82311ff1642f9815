use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use crc32fast::Hasher;
use tracing::debug;
use crate::core::error::Result;
use crate::storage::layout::sub_segment_path;
use crate::storage::segment::{DeleteRecord, SegmentData, StoredDocument};

pub const SEGMENT_INFO_FILE: &str = "segment_info";
pub const DATA_FILE: &str = "data";
pub const DELETIONS_FILE: &str = "deletions";
pub const JOIN_OFFSETS_FILE: &str = "join_offsets";

pub const DATA_MAGIC: u32 = 0x5345_474D; // "SEGM"
pub const DATA_FORMAT_VERSION: u32 = 1;

/// Fixed header at byte 0 of the `data` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub magic: u32,
    pub format_version: u32,
    pub doc_count: u64,
    pub checksum: u32, // crc32 of everything after the header
}

impl DataHeader {
    pub const SIZE: usize = 20;

    pub fn new(doc_count: u64) -> Self {
        DataHeader {
            magic: DATA_MAGIC,
            format_version: DATA_FORMAT_VERSION,
            doc_count,
            checksum: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        buf[8..16].copy_from_slice(&self.doc_count.to_le_bytes());
        buf[16..20].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        Some(DataHeader {
            magic: u32::from_le_bytes(buf[0..4].try_into().ok()?),
            format_version: u32::from_le_bytes(buf[4..8].try_into().ok()?),
            doc_count: u64::from_le_bytes(buf[8..16].try_into().ok()?),
            checksum: u32::from_le_bytes(buf[16..20].try_into().ok()?),
        })
    }
}

/// Streams documents into a segment's `data` file.
///
/// ```text
/// [ HEADER (magic, version, doc_count, crc32) ] <- byte 0
/// [ len | lz4(bincode(doc 0)) ]
/// [ len | lz4(bincode(doc 1)) ]
/// ```
pub struct SegmentWriter {
    pub file: File,
    pub buffer: Vec<u8>,
    pub hasher: Hasher,
    pub doc_count: u64,
}

impl SegmentWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let mut file = File::create(path)?;
        file.write_all(&[0u8; DataHeader::SIZE])?;

        Ok(SegmentWriter {
            file,
            buffer: Vec::with_capacity(1024 * 1024), // 1MB buffer
            hasher: Hasher::new(),
            doc_count: 0,
        })
    }

    pub fn write_document(&mut self, doc: &StoredDocument) -> Result<()> {
        let data = bincode::serialize(doc)?;
        let compressed = lz4_flex::compress_prepend_size(&data);

        self.buffer.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        self.buffer.extend_from_slice(&compressed);
        self.doc_count += 1;

        if self.buffer.len() > 1024 * 1024 {
            self.flush()?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.hasher.update(&self.buffer);
            self.file.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }

    pub fn finish(mut self) -> Result<u64> {
        self.flush()?;

        let mut header = DataHeader::new(self.doc_count);
        header.checksum = self.hasher.finalize();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.to_bytes())?;
        self.file.sync_all()?;

        Ok(self.doc_count)
    }
}

/// Writes a whole segment directory.
///
/// The directory is staged next to `dir` and renamed into place, so a crash
/// never leaves a half-written segment under its final name.
pub fn write_segment_dir(dir: &Path, segment: &SegmentData) -> Result<()> {
    let staging = staging_path(dir);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;
    write_segment_contents(&staging, segment)?;

    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::rename(&staging, dir)?;

    debug!(segment = %segment.id(), docs = segment.doc_count(), path = %dir.display(), "segment written");
    Ok(())
}

fn write_segment_contents(dir: &Path, segment: &SegmentData) -> Result<()> {
    fs::write(dir.join(SEGMENT_INFO_FILE), serde_json::to_vec_pretty(&segment.info)?)?;

    let mut writer = SegmentWriter::create(&dir.join(DATA_FILE))?;
    for doc in segment.documents.iter() {
        writer.write_document(doc)?;
    }
    writer.finish()?;

    write_deletions(&dir.join(DELETIONS_FILE), &segment.deletions)?;

    if let Some(sub) = &segment.sub_segment {
        let sub_dir = sub_segment_path(dir);
        fs::create_dir_all(&sub_dir)?;
        write_segment_contents(&sub_dir, sub)?;
        fs::write(sub_dir.join(JOIN_OFFSETS_FILE), bincode::serialize(&segment.sub_doc_ends)?)?;
    }
    Ok(())
}

fn write_deletions(path: &Path, deletions: &[DeleteRecord]) -> Result<()> {
    fs::write(path, bincode::serialize(deletions)?)?;
    Ok(())
}

fn staging_path(dir: &Path) -> PathBuf {
    let mut name = dir.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    dir.with_file_name(name)
}
