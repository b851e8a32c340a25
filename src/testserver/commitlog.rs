//! Append-only commit log
//!
//! One JSON record per line, each carrying a CRC32 of its serialized
//! operation. An operation is durable once its line is fsynced; replay
//! discards a torn final line and halts on any earlier damage.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::store::LogOp;
use super::{EngineError, EngineResult};

pub const LOG_FILE: &str = "commit.log";

#[derive(Debug, Serialize, Deserialize)]
struct LogRecord {
    crc: u32,
    op: LogOp,
}

fn checksum(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Writer half of the commit log. Replay happens once, at open.
pub struct CommitLog {
    file: File,
}

impl CommitLog {
    /// Open the log for appending, creating it if absent.
    pub fn open(data_dir: &Path) -> EngineResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(data_dir.join(LOG_FILE))?;
        Ok(CommitLog { file })
    }

    /// Replay every committed operation in order.
    ///
    /// A final line that does not parse or fails its checksum is a torn tail
    /// from a crash mid-append and is dropped. The same damage anywhere
    /// earlier means the log itself is broken, and startup must halt rather
    /// than replay around it.
    pub fn replay(data_dir: &Path) -> EngineResult<Vec<LogOp>> {
        let path = data_dir.join(LOG_FILE);
        let contents = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&[u8]> = contents
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .collect();
        let mut ops = Vec::with_capacity(lines.len());

        for (i, line) in lines.iter().enumerate() {
            let last = i + 1 == lines.len();
            match Self::decode(line) {
                Ok(op) => ops.push(op),
                Err(reason) if last => {
                    tracing::warn!(record = i, %reason, "dropping torn commit-log tail");
                    break;
                }
                Err(reason) => return Err(EngineError::Corrupt { record: i, reason }),
            }
        }
        Ok(ops)
    }

    fn decode(line: &[u8]) -> Result<LogOp, String> {
        let record: LogRecord =
            serde_json::from_slice(line).map_err(|e| format!("unparseable record: {}", e))?;
        let payload = serde_json::to_vec(&record.op).map_err(|e| e.to_string())?;
        let crc = checksum(&payload);
        if crc != record.crc {
            return Err(format!("checksum mismatch: stored {}, computed {}", record.crc, crc));
        }
        Ok(record.op)
    }

    /// Append one operation and fsync before returning. The caller applies
    /// the operation to in-memory state only after this succeeds.
    pub fn append(&mut self, op: &LogOp) -> EngineResult<()> {
        let payload = serde_json::to_vec(op)?;
        let record = LogRecord {
            crc: checksum(&payload),
            op: serde_json::from_slice(&payload)?,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_all()?;
        Ok(())
    }
}
