//! The durable log abstraction (C1): an append-only, crash-safe record of
//! promises (acceptor) and chosen values (learner) per sequence number.
//!
//! Persistence *format* is out of scope; what matters is the contract:
//! `write_and_flush` returns only once the record is durable, `read`
//! returns the last durable record or none, and recovery after a crash
//! yields a state indistinguishable from the last flush.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::LeaderElectionError;
use crate::types::Seq;

/// A durable, per-`seq` append-only record store. Implementations must
/// serialize concurrent writers and must not return from `write_and_flush`
/// until the record is safe against a crash.
pub trait DurableLog<R>: Send + Sync
where
    R: Clone + Send + 'static,
{
    fn write_and_flush(&self, seq: Seq, record: R) -> Result<(), LeaderElectionError>;

    fn read(&self, seq: Seq) -> Result<Option<R>, LeaderElectionError>;

    /// All records with `seq' >= seq`, ordered by `seq'`. Used for
    /// catch-up and for `latest_sequence_prepared_or_accepted`-style
    /// high-water-mark scans.
    fn read_since(&self, seq: Seq) -> Result<Vec<(Seq, R)>, LeaderElectionError>;

    fn greatest_seq(&self) -> Result<Option<Seq>, LeaderElectionError>;

    /// Reads the current record for `seq` (`None` if absent) and, under
    /// the same lock acquisition, writes back whatever `f` returns as the
    /// new record (or leaves the log untouched if `f` returns `None`).
    /// This is the single-writer-per-log primitive the acceptor and
    /// learner build their check-then-act logic on: two concurrent
    /// callers for the same `seq` are serialized rather than both reading
    /// a stale record and racing to write.
    fn read_modify_write<T, F>(&self, seq: Seq, f: F) -> Result<T, LeaderElectionError>
    where
        F: FnOnce(Option<R>) -> (Option<R>, T);
}

/// An in-memory log, sufficient for a single process and for tests. Crash
/// recovery is not meaningful here: the process dying loses the log.
#[derive(Default)]
pub struct InMemoryLog<R> {
    records: Mutex<BTreeMap<Seq, R>>,
}

impl<R> InMemoryLog<R> {
    pub fn new() -> Self {
        InMemoryLog {
            records: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<R> DurableLog<R> for InMemoryLog<R>
where
    R: Clone + Send + 'static,
{
    fn write_and_flush(&self, seq: Seq, record: R) -> Result<(), LeaderElectionError> {
        let mut records = self.records.lock().expect("durable log mutex poisoned");
        records.insert(seq, record);
        Ok(())
    }

    fn read(&self, seq: Seq) -> Result<Option<R>, LeaderElectionError> {
        let records = self.records.lock().expect("durable log mutex poisoned");
        Ok(records.get(&seq).cloned())
    }

    fn read_since(&self, seq: Seq) -> Result<Vec<(Seq, R)>, LeaderElectionError> {
        let records = self.records.lock().expect("durable log mutex poisoned");
        Ok(records
            .range(seq..)
            .map(|(seq, record)| (*seq, record.clone()))
            .collect())
    }

    fn greatest_seq(&self) -> Result<Option<Seq>, LeaderElectionError> {
        let records = self.records.lock().expect("durable log mutex poisoned");
        Ok(records.keys().next_back().copied())
    }

    fn read_modify_write<T, F>(&self, seq: Seq, f: F) -> Result<T, LeaderElectionError>
    where
        F: FnOnce(Option<R>) -> (Option<R>, T),
    {
        let mut records = self.records.lock().expect("durable log mutex poisoned");
        let (new_record, result) = f(records.get(&seq).cloned());
        if let Some(record) = new_record {
            records.insert(seq, record);
        }
        Ok(result)
    }
}

/// A file-backed append-only log: every `write_and_flush` appends a
/// bincode-encoded `(seq, record)` pair and calls `sync_all` before
/// returning, so a crash mid-write leaves only the last complete record
/// readable. Recovery replays the file and keeps the last record seen per
/// `seq` (later writes for the same `seq` supersede earlier ones, which is
/// required for the promised-ballot field to only ever move forward).
pub struct FileLog<R> {
    path: PathBuf,
    cache: Mutex<BTreeMap<Seq, R>>,
}

impl<R> FileLog<R>
where
    R: Clone + Send + 'static + serde::Serialize + serde::de::DeserializeOwned,
{
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LeaderElectionError> {
        let path = path.as_ref().to_path_buf();
        let cache = Mutex::new(Self::replay(&path)?);
        Ok(FileLog { path, cache })
    }

    fn replay(path: &Path) -> Result<BTreeMap<Seq, R>, LeaderElectionError> {
        let mut map = BTreeMap::new();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(map),
            Err(e) => {
                return Err(LeaderElectionError::LogCorruption {
                    seq: crate::types::NO_LOG_ENTRY,
                    detail: format!("could not open log file: {}", e),
                })
            }
        };
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).map_err(|e| LeaderElectionError::LogCorruption {
            seq: crate::types::NO_LOG_ENTRY,
            detail: format!("could not read log file: {}", e),
        })?;
        let mut cursor = &buf[..];
        while !cursor.is_empty() {
            let (seq, record): (Seq, R) = bincode::deserialize_from(&mut cursor).map_err(|e| {
                LeaderElectionError::LogCorruption {
                    seq: crate::types::NO_LOG_ENTRY,
                    detail: format!("corrupt log record: {}", e),
                }
            })?;
            map.insert(seq, record);
        }
        Ok(map)
    }
}

impl<R> FileLog<R>
where
    R: Clone + Send + 'static + serde::Serialize + serde::de::DeserializeOwned,
{
    /// Appends `(seq, record)` to the file and calls `sync_all`, then
    /// updates `cache`. Callers must already hold `cache`'s lock.
    fn append_and_flush(&self, cache: &mut BTreeMap<Seq, R>, seq: Seq, record: R) -> Result<(), LeaderElectionError> {
        let encoded = bincode::serialize(&(seq, record.clone())).map_err(|e| {
            LeaderElectionError::LogCorruption {
                seq,
                detail: format!("could not serialize record: {}", e),
            }
        })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| LeaderElectionError::LogCorruption {
                seq,
                detail: format!("could not open log file for append: {}", e),
            })?;
        file.write_all(&encoded).map_err(|e| LeaderElectionError::LogCorruption {
            seq,
            detail: format!("could not append to log file: {}", e),
        })?;
        file.sync_all().map_err(|e| LeaderElectionError::LogCorruption {
            seq,
            detail: format!("could not flush log file: {}", e),
        })?;
        cache.insert(seq, record);
        Ok(())
    }
}

impl<R> DurableLog<R> for FileLog<R>
where
    R: Clone + Send + 'static + serde::Serialize + serde::de::DeserializeOwned,
{
    fn write_and_flush(&self, seq: Seq, record: R) -> Result<(), LeaderElectionError> {
        let mut cache = self.cache.lock().expect("durable log mutex poisoned");
        self.append_and_flush(&mut cache, seq, record)
    }

    fn read(&self, seq: Seq) -> Result<Option<R>, LeaderElectionError> {
        let cache = self.cache.lock().expect("durable log mutex poisoned");
        Ok(cache.get(&seq).cloned())
    }

    fn read_since(&self, seq: Seq) -> Result<Vec<(Seq, R)>, LeaderElectionError> {
        let cache = self.cache.lock().expect("durable log mutex poisoned");
        Ok(cache.range(seq..).map(|(seq, record)| (*seq, record.clone())).collect())
    }

    fn greatest_seq(&self) -> Result<Option<Seq>, LeaderElectionError> {
        let cache = self.cache.lock().expect("durable log mutex poisoned");
        Ok(cache.keys().next_back().copied())
    }

    fn read_modify_write<T, F>(&self, seq: Seq, f: F) -> Result<T, LeaderElectionError>
    where
        F: FnOnce(Option<R>) -> (Option<R>, T),
    {
        let mut cache = self.cache.lock().expect("durable log mutex poisoned");
        let (new_record, result) = f(cache.get(&seq).cloned());
        if let Some(record) = new_record {
            self.append_and_flush(&mut cache, seq, record)?;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_log_round_trips() {
        let log: InMemoryLog<u32> = InMemoryLog::new();
        assert_eq!(log.read(0).unwrap(), None);
        log.write_and_flush(0, 7).unwrap();
        log.write_and_flush(1, 9).unwrap();
        assert_eq!(log.read(0).unwrap(), Some(7));
        assert_eq!(log.greatest_seq().unwrap(), Some(1));
        assert_eq!(log.read_since(1).unwrap(), vec![(1, 9)]);
    }

    #[test]
    fn file_log_recovers_last_write_per_seq() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.bin");
        {
            let log: FileLog<u32> = FileLog::open(&path).unwrap();
            log.write_and_flush(0, 1).unwrap();
            log.write_and_flush(0, 2).unwrap();
            log.write_and_flush(1, 3).unwrap();
        }
        let reopened: FileLog<u32> = FileLog::open(&path).unwrap();
        assert_eq!(reopened.read(0).unwrap(), Some(2));
        assert_eq!(reopened.read(1).unwrap(), Some(3));
        assert_eq!(reopened.greatest_seq().unwrap(), Some(1));
    }
}
