//! Write-Ahead Log (WAL) for durability.
//!
//! A log file is one segment: a 6-byte header (`QKWAL1`) followed by
//! entry frames of `[u32 LE payload length][JSON payload][u32 LE CRC32]`.
//! Opening a segment recovers every frame whose checksum holds and cuts
//! the file back to the last good frame boundary, so a write torn by a
//! crash never poisons later appends. Compaction rewrites a segment
//! through the same open/append path and swaps it in with a rename.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Segment header: magic plus format version.
const MAGIC: &[u8; 6] = b"QKWAL1";

#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("WAL serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Fsync policy for the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// Fsync after every write.
    Always,
    /// Fsync periodically (caller controls).
    Batch,
    /// Never explicitly fsync (OS decides).
    None,
}

impl FsyncPolicy {
    pub fn from_str_config(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "always" => Self::Always,
            "none" => Self::None,
            _ => Self::Batch,
        }
    }
}

/// One durable log entry: the full value written for a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    pub key: Vec<u8>,
    pub value: Value,
}

/// An append-only log segment.
#[derive(Debug)]
pub struct Wal {
    writer: BufWriter<std::fs::File>,
    path: PathBuf,
    fsync: FsyncPolicy,
    entries_written: u64,
}

impl Wal {
    /// Open the segment at `path`, recovering whatever survives.
    ///
    /// Returns the log positioned for appends together with the
    /// recovered entries. A torn or corrupt tail is truncated away; a
    /// missing file or an unrecognized header starts an empty segment.
    pub fn open(path: &Path, fsync: FsyncPolicy) -> Result<(Self, Vec<WalEntry>), WalError> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(WalError::Io(err)),
        };

        let (entries, keep) = if raw.is_empty() {
            (Vec::new(), 0)
        } else if raw.len() < MAGIC.len() || &raw[..MAGIC.len()] != MAGIC {
            tracing::warn!("wal at {:?} has an unrecognized header; starting over", path);
            (Vec::new(), 0)
        } else {
            let (entries, valid) = Self::scan(&raw[MAGIC.len()..]);
            let keep = MAGIC.len() + valid;
            if keep < raw.len() {
                tracing::warn!(
                    "wal at {:?}: cutting {} trailing bytes after entry {}",
                    path,
                    raw.len() - keep,
                    entries.len()
                );
            }
            (entries, keep)
        };

        let mut file = OpenOptions::new().create(true).write(true).open(path)?;
        file.set_len(keep as u64)?;
        file.seek(SeekFrom::Start(keep as u64))?;
        let mut writer = BufWriter::new(file);
        if keep == 0 {
            writer.write_all(MAGIC)?;
            writer.flush()?;
        }

        let wal = Self {
            writer,
            path: path.to_path_buf(),
            fsync,
            entries_written: 0,
        };
        Ok((wal, entries))
    }

    /// Walk the entry frames after the header. Returns the decoded
    /// entries and the byte length of the prefix that checks out;
    /// whatever follows is a torn or corrupt tail.
    fn scan(body: &[u8]) -> (Vec<WalEntry>, usize) {
        let mut entries = Vec::new();
        let mut offset = 0usize;

        while let Some(len_bytes) = body.get(offset..offset + 4) {
            let len = u32::from_le_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
                as usize;
            let payload_end = offset + 4 + len;
            let Some(payload) = body.get(offset + 4..payload_end) else {
                break;
            };
            let Some(crc_bytes) = body.get(payload_end..payload_end + 4) else {
                break;
            };
            let stored =
                u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
            if crc32fast::hash(payload) != stored {
                tracing::warn!("wal entry at byte {} fails its checksum", offset);
                break;
            }
            match serde_json::from_slice(payload) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    tracing::warn!("wal entry at byte {} does not decode: {}", offset, err);
                    break;
                }
            }
            offset = payload_end + 4;
        }

        (entries, offset)
    }

    /// Append an entry frame.
    pub fn append(&mut self, entry: &WalEntry) -> Result<(), WalError> {
        let payload = serde_json::to_vec(entry)?;
        self.writer
            .write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer
            .write_all(&crc32fast::hash(&payload).to_le_bytes())?;
        self.writer.flush()?;

        if self.fsync == FsyncPolicy::Always {
            self.writer.get_ref().sync_all()?;
        }

        self.entries_written += 1;
        Ok(())
    }

    /// Explicitly fsync the WAL (for batch mode).
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Number of entries written since open.
    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    /// Rewrite the segment at `path` down to exactly `entries`.
    ///
    /// The replacement is built beside the old segment through the same
    /// open/append path as any live log, fsynced, then renamed into
    /// place. An interrupted rewrite leaves the old segment untouched.
    pub fn rewrite(
        path: &Path,
        entries: impl Iterator<Item = WalEntry>,
        fsync: FsyncPolicy,
    ) -> Result<Self, WalError> {
        let tmp_path = path.with_extension("compact");

        // A stale sibling from an interrupted rewrite must not leak its
        // entries into the new segment.
        match std::fs::remove_file(&tmp_path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(WalError::Io(err)),
        }

        {
            let (mut tmp, _) = Self::open(&tmp_path, FsyncPolicy::None)?;
            for entry in entries {
                tmp.append(&entry)?;
            }
            tmp.sync()?;
        }
        std::fs::rename(&tmp_path, path)?;

        let (wal, _) = Self::open(path, fsync)?;
        Ok(wal)
    }
}
