use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::batch::WriteBatch;
use crate::error::{StoreError, StoreResult};

/// Flush/sync strategy for the turn log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// `fsync` after every committed turn (safest, highest latency).
    EveryWrite,
    /// Flush to the OS and rely on page-cache buffering.
    #[default]
    OsDefault,
}

/// Configuration for the turn log.
#[derive(Clone, Debug, Default)]
pub struct WalConfig {
    /// Sync/flush strategy.
    pub sync_mode: SyncMode,
}

/// Header size: 4 bytes length + 4 bytes CRC.
pub(crate) const HEADER_SIZE: usize = 8;

/// Result of scanning the log front-to-back.
#[derive(Debug, Default)]
pub struct Recovery {
    /// Every intact batch, in commit order.
    pub batches: Vec<WriteBatch>,
    /// Byte length of the intact prefix of the file.
    pub valid_len: u64,
    /// Bytes past the intact prefix (torn or corrupt tail).
    pub discarded: u64,
}

struct WalWriter {
    writer: BufWriter<File>,
    /// Current write offset in the log file.
    offset: u64,
}

/// Append-only log of committed turns.
///
/// Each record is one [`WriteBatch`] serialized with bincode and framed
/// with a length prefix and a CRC32 checksum:
///
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized WriteBatch)]
/// ```
///
/// Recovery stops at the first record that is truncated or fails its
/// checksum. Later records may depend on the one that was lost, so
/// replaying past it could expose a manifest pointing at nodes that were
/// never written.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    config: WalConfig,
    #[cfg(test)]
    inject_failure: std::sync::atomic::AtomicBool,
}

impl WriteAheadLog {
    /// Open (or create) a log file at the given path.
    pub fn open(path: &Path, config: WalConfig) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let offset = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                writer: BufWriter::new(file),
                offset,
            }),
            config,
            #[cfg(test)]
            inject_failure: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Append one committed batch. Returns the byte offset of the record.
    ///
    /// A failed append leaves the log exactly as it was: any bytes of the
    /// record already written are cut off and the unflushed rest is thrown
    /// away, so the rejected turn can never reach the file later.
    pub fn append(&self, batch: &WriteBatch) -> StoreResult<u64> {
        let payload = bincode::serialize(batch)?;
        let length = u32::try_from(payload.len()).map_err(|_| {
            StoreError::Serialization(format!("turn of {} bytes exceeds log record limit", payload.len()))
        })?;
        let crc = crc32fast::hash(&payload);

        let mut record = Vec::with_capacity(HEADER_SIZE + payload.len());
        record.extend_from_slice(&length.to_le_bytes());
        record.extend_from_slice(&crc.to_le_bytes());
        record.extend_from_slice(&payload);

        let mut w = self.lock_writer()?;
        let record_offset = w.offset;

        if let Err(e) = self.write_record(&mut w, &record) {
            warn!(offset = record_offset, error = %e, "turn log append failed; rolling back");
            self.roll_back(&mut w)?;
            return Err(e.into());
        }

        w.offset += record.len() as u64;

        debug!(offset = record_offset, len = payload.len(), ops = batch.len(), "turn log append");
        Ok(record_offset)
    }

    fn write_record(&self, w: &mut WalWriter, record: &[u8]) -> io::Result<()> {
        #[cfg(test)]
        {
            if self
                .inject_failure
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                // Half the record reaches the file, the rest stays buffered.
                let (head, tail) = record.split_at(record.len() / 2);
                w.writer.write_all(head)?;
                w.writer.flush()?;
                w.writer.write_all(tail)?;
                return Err(io::Error::other("injected append failure"));
            }
        }

        w.writer.write_all(record)?;
        w.writer.flush()?;
        if self.config.sync_mode == SyncMode::EveryWrite {
            w.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Discard buffered bytes and cut the file back to the last good record.
    fn roll_back(&self, w: &mut WalWriter) -> StoreResult<()> {
        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        let stale = std::mem::replace(&mut w.writer, BufWriter::new(file));
        // `into_parts` hands back the buffer instead of flushing it on drop.
        let (_, _unflushed) = stale.into_parts();

        let file = w.writer.get_ref();
        file.set_len(w.offset).map_err(|e| StoreError::CorruptLog {
            offset: w.offset,
            reason: format!("cannot roll back failed append: {e}"),
        })?;
        file.sync_data()?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn fail_next_append(&self) {
        self.inject_failure
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Scan the log and return every intact batch.
    pub fn recover(&self) -> StoreResult<Recovery> {
        let mut file = BufReader::new(File::open(&self.path)?);
        let file_len = file.get_ref().metadata()?.len();
        let mut recovery = Recovery::default();
        let mut offset: u64 = 0;

        while offset + HEADER_SIZE as u64 <= file_len {
            file.seek(SeekFrom::Start(offset))?;

            let mut header = [0u8; HEADER_SIZE];
            match file.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

            if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
                warn!(offset, length, file_len, "torn turn log record; stopping recovery");
                break;
            }

            let mut payload = vec![0u8; length as usize];
            match file.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(offset, "truncated turn log record; stopping recovery");
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                warn!(
                    offset,
                    expected = expected_crc,
                    actual = actual_crc,
                    "CRC mismatch; stopping recovery"
                );
                break;
            }

            match bincode::deserialize::<WriteBatch>(&payload) {
                Ok(batch) => recovery.batches.push(batch),
                Err(e) => {
                    warn!(offset, error = %e, "undecodable turn log record; stopping recovery");
                    break;
                }
            }

            offset += HEADER_SIZE as u64 + length as u64;
        }

        recovery.valid_len = offset;
        recovery.discarded = file_len - offset;
        debug!(
            recovered = recovery.batches.len(),
            discarded = recovery.discarded,
            "turn log recovery complete"
        );
        Ok(recovery)
    }

    /// Cut the file back to `len` bytes, dropping a damaged tail so new
    /// records are not appended behind it.
    pub fn truncate_to(&self, len: u64) -> StoreResult<()> {
        let mut w = self.lock_writer()?;
        if len > w.offset {
            return Err(StoreError::CorruptLog {
                offset: len,
                reason: format!("cannot truncate beyond write position {}", w.offset),
            });
        }
        w.writer.flush()?;

        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        file.set_len(len)?;
        w.writer = BufWriter::new(file);
        w.offset = len;

        debug!(len, "turn log truncated");
        Ok(())
    }

    /// Replace the whole log with a single record holding `batch`.
    ///
    /// The new log is written beside the old one and renamed over it, so a
    /// crash leaves either the old log or the new one.
    pub fn rewrite(&self, batch: &WriteBatch) -> StoreResult<()> {
        let payload = bincode::serialize(batch)?;
        let length = u32::try_from(payload.len()).map_err(|_| {
            StoreError::Serialization(format!("snapshot of {} bytes exceeds log record limit", payload.len()))
        })?;
        let crc = crc32fast::hash(&payload);

        let mut w = self.lock_writer()?;
        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            if !batch.is_empty() {
                tmp.write_all(&length.to_le_bytes())?;
                tmp.write_all(&crc.to_le_bytes())?;
                tmp.write_all(&payload)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        let file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        w.offset = file.metadata()?.len();
        w.writer = BufWriter::new(file);

        debug!(entries = batch.len(), offset = w.offset, "turn log rewritten");
        Ok(())
    }

    /// Current write offset.
    pub fn offset(&self) -> StoreResult<u64> {
        Ok(self.lock_writer()?.offset)
    }

    /// Path to the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_writer(&self) -> StoreResult<MutexGuard<'_, WalWriter>> {
        self.writer
            .lock()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

impl std::fmt::Debug for WriteAheadLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteAheadLog")
            .field("path", &self.path)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::StateKey;

    fn make_batch(seq: u64) -> WriteBatch {
        let mut batch = WriteBatch::new();
        batch.put(StateKey::root("q"), seq.to_le_bytes().to_vec());
        batch.put(StateKey::element("q", seq), vec![seq as u8; 4]);
        batch
    }

    #[test]
    fn append_and_recover_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(&dir.path().join("turns.wal"), WalConfig::default()).unwrap();

        for seq in 1..=3 {
            wal.append(&make_batch(seq)).unwrap();
        }

        let recovery = wal.recover().unwrap();
        assert_eq!(recovery.batches, vec![make_batch(1), make_batch(2), make_batch(3)]);
        assert_eq!(recovery.valid_len, wal.offset().unwrap());
        assert_eq!(recovery.discarded, 0);
    }

    #[test]
    fn recover_empty_log() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(&dir.path().join("empty.wal"), WalConfig::default()).unwrap();

        let recovery = wal.recover().unwrap();
        assert!(recovery.batches.is_empty());
        assert_eq!(recovery.valid_len, 0);
    }

    #[test]
    fn crc_mismatch_stops_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.wal");
        let wal = WriteAheadLog::open(&path, WalConfig::default()).unwrap();

        wal.append(&make_batch(1)).unwrap();
        let second = wal.append(&make_batch(2)).unwrap();
        wal.append(&make_batch(3)).unwrap();
        drop(wal);

        // Flip the first payload byte of the second record.
        {
            let mut file = OpenOptions::new().write(true).read(true).open(&path).unwrap();
            let at = second + HEADER_SIZE as u64;
            file.seek(SeekFrom::Start(at)).unwrap();
            let mut buf = [0u8; 1];
            file.read_exact(&mut buf).unwrap();
            buf[0] ^= 0xFF;
            file.seek(SeekFrom::Start(at)).unwrap();
            file.write_all(&buf).unwrap();
            file.sync_all().unwrap();
        }

        let wal = WriteAheadLog::open(&path, WalConfig::default()).unwrap();
        let recovery = wal.recover().unwrap();

        // Record 3 is not replayed even though it is intact.
        assert_eq!(recovery.batches, vec![make_batch(1)]);
        assert_eq!(recovery.valid_len, second);
        assert!(recovery.discarded > 0);
    }

    #[test]
    fn recovery_survives_truncated_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tail.wal");
        let wal = WriteAheadLog::open(&path, WalConfig::default()).unwrap();

        wal.append(&make_batch(1)).unwrap();
        let second = wal.append(&make_batch(2)).unwrap();
        let total_len = wal.offset().unwrap();
        drop(wal);

        {
            let file = OpenOptions::new().write(true).open(&path).unwrap();
            file.set_len(total_len - 4).unwrap();
        }

        let wal = WriteAheadLog::open(&path, WalConfig::default()).unwrap();
        let recovery = wal.recover().unwrap();
        assert_eq!(recovery.batches, vec![make_batch(1)]);
        assert_eq!(recovery.valid_len, second);
    }

    #[test]
    fn truncate_to_drops_tail_and_appends_after_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.wal");
        let wal = WriteAheadLog::open(&path, WalConfig::default()).unwrap();

        let first_end = {
            wal.append(&make_batch(1)).unwrap();
            wal.offset().unwrap()
        };
        wal.append(&make_batch(2)).unwrap();

        wal.truncate_to(first_end).unwrap();
        assert_eq!(wal.offset().unwrap(), first_end);

        wal.append(&make_batch(5)).unwrap();
        let recovery = wal.recover().unwrap();
        assert_eq!(recovery.batches, vec![make_batch(1), make_batch(5)]);
    }

    #[test]
    fn failed_append_leaves_no_trace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollback.wal");
        let wal = WriteAheadLog::open(&path, WalConfig::default()).unwrap();

        wal.append(&make_batch(1)).unwrap();
        let good_len = wal.offset().unwrap();

        wal.fail_next_append();
        assert!(matches!(wal.append(&make_batch(2)), Err(StoreError::Io(_))));
        assert_eq!(wal.offset().unwrap(), good_len);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);

        wal.append(&make_batch(3)).unwrap();
        drop(wal);

        let wal = WriteAheadLog::open(&path, WalConfig::default()).unwrap();
        let recovery = wal.recover().unwrap();
        assert_eq!(recovery.batches, vec![make_batch(1), make_batch(3)]);
        assert_eq!(recovery.discarded, 0);
    }

    #[test]
    fn truncate_beyond_offset_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(&dir.path().join("bad.wal"), WalConfig::default()).unwrap();
        assert!(matches!(
            wal.truncate_to(100),
            Err(StoreError::CorruptLog { .. })
        ));
    }

    #[test]
    fn rewrite_replaces_history() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(&dir.path().join("compact.wal"), WalConfig::default()).unwrap();

        for seq in 1..=4 {
            wal.append(&make_batch(seq)).unwrap();
        }
        let before = wal.offset().unwrap();

        wal.rewrite(&make_batch(9)).unwrap();
        assert!(wal.offset().unwrap() < before);

        wal.append(&make_batch(10)).unwrap();
        let recovery = wal.recover().unwrap();
        assert_eq!(recovery.batches, vec![make_batch(9), make_batch(10)]);
    }

    #[test]
    fn rewrite_with_empty_snapshot_empties_log() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WriteAheadLog::open(&dir.path().join("e.wal"), WalConfig::default()).unwrap();
        wal.append(&make_batch(1)).unwrap();

        wal.rewrite(&WriteBatch::new()).unwrap();
        assert_eq!(wal.offset().unwrap(), 0);
        assert!(wal.recover().unwrap().batches.is_empty());
    }

    #[test]
    fn sync_every_write_mode() {
        let dir = tempfile::tempdir().unwrap();
        let config = WalConfig {
            sync_mode: SyncMode::EveryWrite,
        };
        let wal = WriteAheadLog::open(&dir.path().join("sync.wal"), config).unwrap();

        wal.append(&make_batch(1)).unwrap();
        assert_eq!(wal.recover().unwrap().batches.len(), 1);
    }
}
