use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;
use memmap2::Mmap;
use crate::core::error::{Error, Result};
use crate::core::types::LocalDocId;
use crate::storage::layout::sub_segment_path;
use crate::storage::segment::{DeleteRecord, SegmentData, SegmentInfo, StoredDocument};
use crate::storage::segment_writer::{
    DataHeader, DATA_FILE, DATA_FORMAT_VERSION, DATA_MAGIC, DELETIONS_FILE, JOIN_OFFSETS_FILE,
    SEGMENT_INFO_FILE,
};

/// Loads a segment directory written by `write_segment_dir`.
pub fn read_segment_dir(dir: &Path) -> Result<SegmentData> {
    let info_bytes = fs::read(dir.join(SEGMENT_INFO_FILE))
        .map_err(|e| Error::not_found(format!("segment info in {}: {}", dir.display(), e)))?;
    let info: SegmentInfo = serde_json::from_slice(&info_bytes)?;

    let documents = read_documents(&dir.join(DATA_FILE))?;
    if documents.len() as u64 != info.doc_count {
        return Err(Error::inconsistent(format!(
            "segment {} declares {} docs but data holds {}",
            info.id, info.doc_count, documents.len()
        )));
    }

    let deletions_path = dir.join(DELETIONS_FILE);
    let deletions: Vec<DeleteRecord> = if deletions_path.exists() {
        bincode::deserialize(&fs::read(deletions_path)?)?
    } else {
        Vec::new()
    };

    let sub_dir = sub_segment_path(dir);
    let (sub_segment, sub_doc_ends) = if sub_dir.exists() {
        let sub = read_segment_dir(&sub_dir)?;
        let ends: Vec<LocalDocId> = bincode::deserialize(&fs::read(sub_dir.join(JOIN_OFFSETS_FILE))?)?;
        if ends.len() != documents.len() {
            return Err(Error::inconsistent(format!(
                "segment {} join offsets cover {} of {} docs",
                info.id, ends.len(), documents.len()
            )));
        }
        (Some(Arc::new(sub)), ends)
    } else {
        (None, Vec::new())
    };

    Ok(SegmentData::new(info, documents, deletions, sub_segment, sub_doc_ends))
}

/// Decodes every record of a `data` file through a read-only mapping.
pub fn read_documents(path: &Path) -> Result<Vec<StoredDocument>> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };

    let header = DataHeader::from_bytes(&mmap)
        .ok_or_else(|| Error::inconsistent(format!("truncated segment header in {}", path.display())))?;
    if header.magic != DATA_MAGIC || header.format_version != DATA_FORMAT_VERSION {
        return Err(Error::inconsistent(format!("incompatible segment data in {}", path.display())));
    }

    let body = &mmap[DataHeader::SIZE..];
    if crc32fast::hash(body) != header.checksum {
        return Err(Error::inconsistent(format!("checksum mismatch in {}", path.display())));
    }

    let mut documents = Vec::with_capacity(header.doc_count as usize);
    let mut pos = 0usize;
    while pos < body.len() {
        if pos + 4 > body.len() {
            return Err(Error::inconsistent(format!("truncated record in {}", path.display())));
        }
        let len = u32::from_le_bytes([body[pos], body[pos + 1], body[pos + 2], body[pos + 3]]) as usize;
        pos += 4;
        let end = pos + len;
        if end > body.len() {
            return Err(Error::inconsistent(format!("truncated record in {}", path.display())));
        }
        let raw = lz4_flex::decompress_size_prepended(&body[pos..end])
            .map_err(|e| Error::inconsistent(format!("corrupt record in {}: {}", path.display(), e)))?;
        documents.push(bincode::deserialize(&raw)?);
        pos = end;
    }

    if documents.len() as u64 != header.doc_count {
        return Err(Error::inconsistent(format!(
            "segment header declares {} docs, found {}",
            header.doc_count, documents.len()
        )));
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use crate::core::types::FieldValue;
    use crate::core::error::ErrorKind;
    use crate::storage::segment::{SegmentId, SegmentKind};
    use crate::storage::segment_writer::write_segment_dir;

    fn doc(pk: &str, ts: i64) -> StoredDocument {
        let mut fields = HashMap::new();
        fields.insert("title".to_string(), FieldValue::Text(format!("title of {}", pk)));
        StoredDocument {
            primary_key: pk.to_string(),
            timestamp: ts,
            fields,
        }
    }

    #[test]
    fn segment_dir_survives_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment_0_level_0");

        let sub_info = SegmentInfo::new(SegmentId::built(0), SegmentKind::Built, 0);
        let sub = SegmentData::new(sub_info, vec![doc("s1", 1), doc("s2", 1)], Vec::new(), None, Vec::new());
        let info = SegmentInfo::new(SegmentId::built(0), SegmentKind::Built, 0);
        let deletions = vec![DeleteRecord { primary_key: "old".to_string(), timestamp: 3 }];
        let segment = SegmentData::new(info, vec![doc("a", 1), doc("b", 2)], deletions, Some(Arc::new(sub)), vec![2, 2]);

        write_segment_dir(&path, &segment).unwrap();
        let loaded = read_segment_dir(&path).unwrap();

        assert_eq!(loaded.documents, segment.documents);
        assert_eq!(loaded.deletions, segment.deletions);
        assert_eq!(loaded.sub_doc_ends, vec![2, 2]);
        assert_eq!(loaded.sub_segment.unwrap().doc_count(), 2);
    }

    #[test]
    fn corrupted_data_is_inconsistent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segment_1_level_0");
        let info = SegmentInfo::new(SegmentId::built(1), SegmentKind::Built, 0);
        write_segment_dir(&path, &SegmentData::new(info, vec![doc("a", 1)], Vec::new(), None, Vec::new())).unwrap();

        let data_path = path.join(DATA_FILE);
        let mut bytes = fs::read(&data_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&data_path, bytes).unwrap();

        let err = read_segment_dir(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InconsistentState);
    }
}
