use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::Path;
use serde::{Deserialize, Serialize};
use tracing::warn;
use crate::core::error::{Error, Result};
use crate::core::types::{LocalDocId, Locator};
use crate::storage::segment::SegmentId;

pub const OPERATION_LOG_FILE: &str = "operation_log";

const MAX_ENTRY_SIZE: usize = 10_000_000; // 10MB max per entry

/// One realtime write, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEntry {
    pub sequence: u64,
    pub locator: Locator,
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Add {
        primary_key: String,
        timestamp: i64,
        segment_id: SegmentId,
        local_doc_id: LocalDocId,
    },
    Delete {
        primary_key: String,
        timestamp: i64,
    },
}

impl Operation {
    pub fn primary_key(&self) -> &str {
        match self {
            Operation::Add { primary_key, .. } | Operation::Delete { primary_key, .. } => primary_key,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Operation::Add { timestamp, .. } | Operation::Delete { timestamp, .. } => *timestamp,
        }
    }
}

/// Append-only file of operations hosted by one linked realtime segment.
pub struct OperationLog {
    pub file: File,
    pub position: u64,
}

impl OperationLog {
    pub fn create(dir: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dir.join(OPERATION_LOG_FILE))?;

        Ok(OperationLog { file, position: 0 })
    }

    pub fn append(&mut self, entry: &OperationEntry) -> Result<()> {
        let data = bincode::serialize(entry)?;
        let len = data.len() as u32;

        self.file.write_all(&len.to_le_bytes())?;
        self.file.write_all(&data)?;
        self.position += 4 + data.len() as u64;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Writes `entries` as the complete log of the segment in `dir`.
    pub fn write_all(dir: &Path, entries: &[OperationEntry]) -> Result<()> {
        let mut log = OperationLog::create(dir)?;
        for entry in entries {
            log.append(entry)?;
        }
        log.sync()
    }

    /// Reads every entry of the log in `dir`. A missing log reads as empty; a
    /// torn tail (crash mid-append) is dropped with a warning.
    pub fn read_entries(dir: &Path) -> Result<Vec<OperationEntry>> {
        let path = dir.join(OPERATION_LOG_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = BufReader::new(File::open(&path)?);
        let mut entries = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_ENTRY_SIZE {
                return Err(Error::inconsistent(format!(
                    "operation log entry too large in {}", path.display()
                )));
            }

            let mut data = vec![0u8; len];
            if let Err(e) = reader.read_exact(&mut data) {
                warn!(path = %path.display(), error = %e, "dropping torn operation log tail");
                break;
            }
            entries.push(bincode::deserialize::<OperationEntry>(&data)?);
        }

        Ok(entries)
    }
}
