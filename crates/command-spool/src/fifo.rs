//! The persistent FIFO over a single backing file.

use crate::error::{SpoolError, SpoolResult};
use crate::record::{
    self, SpoolRecord, LENGTH_PREFIX_SIZE, RECORD_HEADER_SIZE, RECORD_STATE_CONSUMED,
    RECORD_STATE_UNREAD, STATE_BYTE_OFFSET,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Configuration for a [`PersistentFifo`].
#[derive(Debug, Clone)]
pub struct SpoolConfig {
    /// Path of the backing file (created lazily on first put).
    pub path: PathBuf,
    /// Maximum size of the backing file in bytes.
    pub max_size_bytes: u64,
    /// Percentage (0-100) of the oldest surviving records discarded per
    /// compaction pass while the file is still over budget.
    pub purge_percentage: u8,
    /// Whether to zlib-compress record payloads.
    pub compress: bool,
}

/// Outcome of a put, letting callers observe the degraded condition where
/// old records had to be purged to make room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The record was appended without discarding anything.
    Stored,
    /// The record was appended after a compaction pass discarded `purged`
    /// not-yet-consumed records.
    StoredAfterPurge {
        /// Number of unread records discarded to make room.
        purged: usize,
    },
}

impl PutOutcome {
    /// Number of unread records discarded by this put (zero if none).
    pub fn purged_records(&self) -> usize {
        match self {
            Self::Stored => 0,
            Self::StoredAfterPurge { purged } => *purged,
        }
    }
}

/// Record header as read back from the backing file.
struct RecordHeader {
    total_len: u32,
    state: u8,
    flags: u8,
    payload_len: u32,
}

impl RecordHeader {
    /// Offset of the record that follows this one.
    fn next_offset(&self, offset: u64) -> u64 {
        offset + LENGTH_PREFIX_SIZE as u64 + u64::from(self.total_len)
    }
}

/// Mutable spool state, serialized behind one lock per backing file.
struct SpoolState {
    /// Backing file handle, opened lazily.
    file: Option<File>,
    /// Current length of the valid region of the file.
    file_len: u64,
    /// Offset of the oldest unread record (== `file_len` when none).
    head_offset: u64,
    /// Number of unread records.
    unread: usize,
}

impl SpoolState {
    fn empty() -> Self {
        Self {
            file: None,
            file_len: 0,
            head_offset: 0,
            unread: 0,
        }
    }
}

/// An on-disk, size-bounded, compacting FIFO of opaque records.
///
/// All operations are synchronous and internally serialized per backing
/// file; none of them ever blocks on network activity.
pub struct PersistentFifo {
    config: SpoolConfig,
    state: Mutex<SpoolState>,
}

impl PersistentFifo {
    /// Open a spool over `config.path`.
    ///
    /// If the file already exists its records are scanned to recover the
    /// unread count and head position; a torn trailing record is cut off.
    /// Open errors are tolerated: the spool proceeds logically empty and
    /// the backing file is recreated on the next put.
    pub fn open(config: SpoolConfig) -> Self {
        let state = match Self::scan_existing(&config.path) {
            Ok(Some(state)) => state,
            Ok(None) => SpoolState::empty(),
            Err(e) => {
                warn!(
                    path = %config.path.display(),
                    error = %e,
                    "Failed to open existing spool file, proceeding with empty spool"
                );
                SpoolState::empty()
            }
        };

        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Number of unread records.
    pub fn count(&self) -> usize {
        self.state.lock().unwrap().unread
    }

    /// Whether there are no unread records.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Append a byte record.
    pub fn put(&self, payload: &[u8]) -> SpoolResult<PutOutcome> {
        let mut state = self.state.lock().unwrap();

        let (stored, compressed) = if self.config.compress {
            (record::compress(payload)?, true)
        } else {
            (payload.to_vec(), false)
        };
        let record = SpoolRecord::unread(stored, compressed);
        let encoded = record.encode();
        let record_len = encoded.len() as u64;

        if record_len > self.config.max_size_bytes {
            return Err(SpoolError::RecordTooLarge {
                size: record_len,
                max: self.config.max_size_bytes,
            });
        }

        let mut purged = 0;
        if state.file_len + record_len > self.config.max_size_bytes {
            purged = self.compact(&mut state, record_len)?;
        }

        if state.file.is_none() {
            state.file = Some(self.create_backing_file()?);
        }

        let SpoolState {
            file,
            file_len,
            head_offset,
            unread,
        } = &mut *state;
        let file = file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("spool backing file unavailable"))?;

        file.seek(SeekFrom::Start(*file_len))?;
        file.write_all(&encoded)?;

        if *unread == 0 {
            *head_offset = *file_len;
        }
        *file_len += record_len;
        *unread += 1;

        debug!(
            path = %self.config.path.display(),
            record_len,
            unread = *unread,
            "Spooled record"
        );

        Ok(if purged > 0 {
            PutOutcome::StoredAfterPurge { purged }
        } else {
            PutOutcome::Stored
        })
    }

    /// Append a JSON object record.
    pub fn put_object<T: Serialize>(&self, value: &T) -> SpoolResult<PutOutcome> {
        let bytes = serde_json::to_vec(value)?;
        self.put(&bytes)
    }

    /// Remove and return the oldest unread byte record, or `None` when
    /// the spool is empty.
    pub fn take(&self) -> SpoolResult<Option<Vec<u8>>> {
        let mut state = self.state.lock().unwrap();
        if state.unread == 0 {
            return Ok(None);
        }

        let SpoolState {
            file,
            file_len,
            head_offset,
            unread,
        } = &mut *state;
        let Some(file) = file.as_mut() else {
            return Ok(None);
        };

        let mut offset = *head_offset;
        while offset < *file_len {
            let header = read_header(file, offset, *file_len)?;
            let next = header.next_offset(offset);

            if header.state != RECORD_STATE_UNREAD {
                // Dead space left by an earlier take; skip past it.
                offset = next;
                continue;
            }

            let mut payload = vec![0u8; header.payload_len as usize];
            file.seek(SeekFrom::Start(
                offset + (LENGTH_PREFIX_SIZE + RECORD_HEADER_SIZE) as u64,
            ))?;
            file.read_exact(&mut payload)?;

            // Persist the consumed state in place so a reopened spool
            // never replays this record.
            file.seek(SeekFrom::Start(offset + STATE_BYTE_OFFSET))?;
            file.write_all(&[RECORD_STATE_CONSUMED])?;

            *head_offset = next;
            *unread -= 1;

            if *unread == 0 {
                // Nothing live left; reclaim the file.
                file.set_len(0)?;
                *file_len = 0;
                *head_offset = 0;
            }

            let payload = if header.flags & record::RECORD_FLAG_COMPRESSED != 0 {
                record::decompress(&payload)?
            } else {
                payload
            };
            return Ok(Some(payload));
        }

        // The unread counter disagreed with the file contents; trust the file.
        warn!(
            path = %self.config.path.display(),
            expected = *unread,
            "Spool counter out of sync with backing file, resetting"
        );
        *unread = 0;
        *head_offset = *file_len;
        Ok(None)
    }

    /// Remove and return the oldest unread JSON object record.
    pub fn take_object<T: DeserializeOwned>(&self) -> SpoolResult<Option<T>> {
        match self.take()? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Atomically reset the spool to empty, discarding all records.
    pub fn initialize_empty_file(&self) -> SpoolResult<()> {
        let mut state = self.state.lock().unwrap();

        if state.file.is_none() {
            state.file = Some(self.create_backing_file()?);
        }
        let SpoolState {
            file,
            file_len,
            head_offset,
            unread,
        } = &mut *state;
        let file = file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("spool backing file unavailable"))?;

        file.set_len(0)?;
        file.sync_data()?;
        *file_len = 0;
        *head_offset = 0;
        *unread = 0;

        debug!(path = %self.config.path.display(), "Spool reset to empty");
        Ok(())
    }

    /// Create (or truncate-open) the backing file, including parent
    /// directories.
    fn create_backing_file(&self) -> SpoolResult<File> {
        if let Some(parent) = self.config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.config.path)?;
        Ok(file)
    }

    /// Scan an existing backing file, recovering head/count state and
    /// truncating any torn tail.
    fn scan_existing(path: &Path) -> SpoolResult<Option<SpoolState>> {
        if !path.exists() {
            return Ok(None);
        }

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len();

        let mut offset = 0u64;
        let mut unread = 0usize;
        let mut head: Option<u64> = None;

        while offset + LENGTH_PREFIX_SIZE as u64 <= file_len {
            let header = match read_header(&mut file, offset, file_len) {
                Ok(h) => h,
                Err(SpoolError::CorruptRecord { reason, .. }) => {
                    warn!(
                        path = %path.display(),
                        offset,
                        reason,
                        "Torn or corrupt spool tail, truncating"
                    );
                    break;
                }
                Err(e) => return Err(e),
            };

            if header.state == RECORD_STATE_UNREAD {
                unread += 1;
                if head.is_none() {
                    head = Some(offset);
                }
            }
            offset = header.next_offset(offset);
        }

        if offset < file_len {
            // Everything past the last complete record is a torn tail.
            file.set_len(offset)?;
            file.sync_data()?;
        }

        debug!(
            path = %path.display(),
            unread,
            file_len = offset,
            "Recovered existing spool file"
        );

        Ok(Some(SpoolState {
            file: Some(file),
            file_len: offset,
            head_offset: head.unwrap_or(offset),
            unread,
        }))
    }

    /// Rewrite the backing file keeping only records that fit the size
    /// budget, discarding consumed records for free and then the oldest
    /// unread records per the purge percentage.
    ///
    /// Returns the number of unread records discarded.
    fn compact(&self, state: &mut SpoolState, incoming_len: u64) -> SpoolResult<usize> {
        let Some(file) = state.file.as_mut() else {
            return Ok(0);
        };

        // Collect the surviving unread records, still in their encoded
        // (possibly compressed) form.
        let mut survivors: Vec<Vec<u8>> = Vec::new();
        let mut offset = state.head_offset;
        while offset < state.file_len {
            let header = read_header(file, offset, state.file_len)?;
            let next = header.next_offset(offset);
            if header.state == RECORD_STATE_UNREAD {
                let record_len = (next - offset) as usize;
                let mut encoded = vec![0u8; record_len];
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(&mut encoded)?;
                survivors.push(encoded);
            }
            offset = next;
        }

        let budget = self.config.max_size_bytes.saturating_sub(incoming_len);
        let mut total: u64 = survivors.iter().map(|r| r.len() as u64).sum();
        let mut purged = 0usize;

        while total > budget && !survivors.is_empty() {
            let drop_count = (survivors.len() * usize::from(self.config.purge_percentage) / 100)
                .clamp(1, survivors.len());
            for encoded in survivors.drain(..drop_count) {
                total -= encoded.len() as u64;
                purged += 1;
            }
        }

        // Rewrite through a temp file and atomic rename.
        let tmp_path = self.config.path.with_extension("tmp");
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        for encoded in &survivors {
            tmp.write_all(encoded)?;
        }
        tmp.sync_data()?;
        std::fs::rename(&tmp_path, &self.config.path)?;

        state.file = Some(tmp);
        state.file_len = total;
        state.head_offset = 0;
        state.unread = survivors.len();

        if purged > 0 {
            warn!(
                path = %self.config.path.display(),
                purged,
                retained = survivors.len(),
                "Spool exceeded maximum size, purged oldest records"
            );
        } else {
            debug!(
                path = %self.config.path.display(),
                retained = survivors.len(),
                "Compacted spool file"
            );
        }

        Ok(purged)
    }
}

/// Read and validate a record header at `offset`.
///
/// Returns `CorruptRecord` when the header or the record body would run
/// past the end of the valid region.
fn read_header(file: &mut File, offset: u64, file_len: u64) -> SpoolResult<RecordHeader> {
    let header_end = offset + (LENGTH_PREFIX_SIZE + RECORD_HEADER_SIZE) as u64;
    if header_end > file_len {
        return Err(SpoolError::CorruptRecord {
            offset,
            reason: "record header runs past end of file".to_string(),
        });
    }

    let mut buf = [0u8; LENGTH_PREFIX_SIZE + RECORD_HEADER_SIZE];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf)?;

    let total_len = u32::from_le_bytes(buf[0..4].try_into().map_err(|_| {
        SpoolError::CorruptRecord {
            offset,
            reason: "invalid length prefix".to_string(),
        }
    })?);
    let state = buf[4];
    let flags = buf[5];
    // Reserved bytes at [6..8] are ignored
    let payload_len = u32::from_le_bytes(buf[8..12].try_into().map_err(|_| {
        SpoolError::CorruptRecord {
            offset,
            reason: "invalid payload_len".to_string(),
        }
    })?);

    if u64::from(total_len) != (RECORD_HEADER_SIZE as u64) + u64::from(payload_len) {
        return Err(SpoolError::CorruptRecord {
            offset,
            reason: format!(
                "length prefix {} disagrees with payload length {}",
                total_len, payload_len
            ),
        });
    }
    if state != RECORD_STATE_UNREAD && state != RECORD_STATE_CONSUMED {
        return Err(SpoolError::CorruptRecord {
            offset,
            reason: format!("unknown state byte {:#04x}", state),
        });
    }
    if offset + u64::from(total_len) + LENGTH_PREFIX_SIZE as u64 > file_len {
        return Err(SpoolError::CorruptRecord {
            offset,
            reason: "record body runs past end of file".to_string(),
        });
    }

    Ok(RecordHeader {
        total_len,
        state,
        flags,
        payload_len,
    })
}
