//! Spent-nullifier registry.
//!
//! The set only grows. [`NullifierRegistry::try_record`] is the single atomic
//! check-and-insert the verifier relies on; there is no way to unspend.

use crate::error::{RegistryError, RegistryResult};
use crate::proof::NullifierHash;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// What the registry remembers about an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptanceRecord {
    pub signal: Vec<u8>,
    /// Unix seconds.
    pub timestamp: u64,
}

impl AcceptanceRecord {
    #[must_use]
    pub fn new(signal: &[u8]) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            signal: signal.to_vec(),
            timestamp,
        }
    }

    #[must_use]
    pub fn signal_text(&self) -> String {
        String::from_utf8_lossy(&self.signal).into_owned()
    }
}

pub trait NullifierRegistry: Send + Sync {
    fn is_spent(&self, nullifier: &NullifierHash) -> bool;

    /// Inserts `nullifier` if absent. Returns `false`, leaving the registry
    /// untouched, if it was already spent.
    ///
    /// # Errors
    /// Returns a [`RegistryError`] if the backing store cannot be updated; the
    /// nullifier is then not recorded.
    fn try_record(&self, nullifier: NullifierHash, record: AcceptanceRecord)
        -> RegistryResult<bool>;

    fn record(&self, nullifier: &NullifierHash) -> Option<AcceptanceRecord>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-local registry.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    spent: Mutex<HashMap<[u8; 32], AcceptanceRecord>>,
}

impl InMemoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NullifierRegistry for InMemoryRegistry {
    fn is_spent(&self, nullifier: &NullifierHash) -> bool {
        lock(&self.spent).contains_key(&nullifier.to_bytes())
    }

    fn try_record(
        &self,
        nullifier: NullifierHash,
        record: AcceptanceRecord,
    ) -> RegistryResult<bool> {
        let mut spent = lock(&self.spent);
        let key = nullifier.to_bytes();
        if spent.contains_key(&key) {
            return Ok(false);
        }
        spent.insert(key, record);
        debug!("Recorded nullifier {nullifier}");
        Ok(true)
    }

    fn record(&self, nullifier: &NullifierHash) -> Option<AcceptanceRecord> {
        lock(&self.spent).get(&nullifier.to_bytes()).cloned()
    }

    fn len(&self) -> usize {
        lock(&self.spent).len()
    }
}

/// Registry persisted as an append-only text file, one
/// `nullifier_hex|timestamp|signal_hex` line per accepted submission.
///
/// Every [`NullifierRegistry::try_record`] takes an exclusive lock on the
/// file, re-reads it and only then appends, so registries opened on the same
/// path (in this process or another) never accept one nullifier twice. A
/// final line without its newline is a write that never completed; it is
/// ignored on load and cut off before the next append.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    spent: Mutex<HashMap<[u8; 32], AcceptanceRecord>>,
}

fn io_error(context: &str) -> impl FnOnce(std::io::Error) -> RegistryError + '_ {
    move |e| RegistryError::Io(format!("{context}: {e}"))
}

fn parse_line(line: &str, number: usize) -> RegistryResult<(NullifierHash, AcceptanceRecord)> {
    let corrupted = |reason: String| RegistryError::Corrupted {
        line: number,
        reason,
    };

    let mut parts = line.split('|');
    let (Some(nullifier), Some(timestamp), Some(signal), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(corrupted("expected 3 '|'-separated fields".to_string()));
    };

    let nullifier = NullifierHash::from_hex(nullifier).map_err(|e| corrupted(e.to_string()))?;
    let timestamp = timestamp
        .parse::<u64>()
        .map_err(|e| corrupted(format!("bad timestamp: {e}")))?;
    let signal = hex::decode(signal).map_err(|e| corrupted(format!("bad signal hex: {e}")))?;

    Ok((nullifier, AcceptanceRecord { signal, timestamp }))
}

/// Contents of the registry file up to its last complete line.
struct Scan {
    spent: HashMap<[u8; 32], AcceptanceRecord>,
    complete_len: u64,
}

fn scan(file: &mut File) -> RegistryResult<Scan> {
    let mut contents = Vec::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut contents))
        .map_err(io_error("failed to read registry"))?;

    let complete_len = contents
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1);
    if complete_len < contents.len() {
        warn!(
            "Ignoring {} bytes of an incomplete registry line",
            contents.len() - complete_len
        );
    }

    let mut spent = HashMap::new();
    for (i, line) in contents[..complete_len].split(|&b| b == b'\n').enumerate() {
        let number = i + 1;
        let line = std::str::from_utf8(line)
            .map_err(|e| RegistryError::Corrupted {
                line: number,
                reason: format!("not UTF-8: {e}"),
            })?
            .trim();
        if line.is_empty() {
            continue;
        }
        let (nullifier, record) = parse_line(line, number)?;
        if spent.insert(nullifier.to_bytes(), record).is_some() {
            return Err(RegistryError::Corrupted {
                line: number,
                reason: format!("nullifier {nullifier} recorded twice"),
            });
        }
    }

    Ok(Scan {
        spent,
        complete_len: complete_len as u64,
    })
}

impl FileRegistry {
    /// Opens (or creates) the registry file and loads every recorded
    /// nullifier.
    ///
    /// # Errors
    /// - [`RegistryError::Io`] if the file cannot be created, locked or read
    /// - [`RegistryError::Corrupted`] on a malformed or duplicated line
    pub fn open(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = Self::open_file(&path)?;
        file.lock_shared()
            .map_err(io_error("failed to lock registry"))?;
        let Scan { spent, .. } = scan(&mut file)?;

        info!(
            "Loaded {} spent nullifiers from {}",
            spent.len(),
            path.display()
        );
        Ok(Self {
            path,
            spent: Mutex::new(spent),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_file(path: &Path) -> RegistryResult<File> {
        fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| RegistryError::Io(format!("failed to open {}: {e}", path.display())))
    }

    /// Writes one line at `offset`, cutting off anything after it first.
    /// On failure the file is truncated back to `offset`.
    fn append_at(
        file: &mut File,
        offset: u64,
        nullifier: NullifierHash,
        record: &AcceptanceRecord,
    ) -> RegistryResult<()> {
        let line = format!(
            "{}|{}|{}\n",
            nullifier.to_hex(),
            record.timestamp,
            hex::encode(&record.signal)
        );
        let written = file
            .set_len(offset)
            .and_then(|()| file.seek(SeekFrom::Start(offset)))
            .and_then(|_| file.write_all(line.as_bytes()))
            .and_then(|()| file.sync_data());

        written.map_err(|e| {
            if let Err(rollback) = file.set_len(offset).and_then(|()| file.sync_data()) {
                error!("Failed to roll back partial registry write: {rollback}");
            }
            RegistryError::Io(format!("failed to write nullifier: {e}"))
        })
    }
}

impl NullifierRegistry for FileRegistry {
    /// Answers from the records seen so far; [`NullifierRegistry::try_record`]
    /// re-reads the file before deciding.
    fn is_spent(&self, nullifier: &NullifierHash) -> bool {
        lock(&self.spent).contains_key(&nullifier.to_bytes())
    }

    fn try_record(
        &self,
        nullifier: NullifierHash,
        record: AcceptanceRecord,
    ) -> RegistryResult<bool> {
        let mut spent = lock(&self.spent);
        let key = nullifier.to_bytes();
        if spent.contains_key(&key) {
            return Ok(false);
        }

        let mut file = Self::open_file(&self.path)?;
        file.lock().map_err(io_error("failed to lock registry"))?;
        let Scan {
            spent: on_disk,
            complete_len,
        } = scan(&mut file)?;
        spent.extend(on_disk);
        if spent.contains_key(&key) {
            debug!("Nullifier {nullifier} was recorded by another registry handle");
            return Ok(false);
        }

        Self::append_at(&mut file, complete_len, nullifier, &record)?;
        spent.insert(key, record);
        debug!("Recorded nullifier {nullifier} to {}", self.path.display());
        Ok(true)
    }

    fn record(&self, nullifier: &NullifierHash) -> Option<AcceptanceRecord> {
        lock(&self.spent).get(&nullifier.to_bytes()).cloned()
    }

    fn len(&self) -> usize {
        lock(&self.spent).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pasta_curves::pallas;
    use tempfile::TempDir;

    fn nullifier(i: u64) -> NullifierHash {
        NullifierHash(pallas::Base::from(i))
    }

    #[test]
    fn test_in_memory_insert_once() {
        let registry = InMemoryRegistry::new();
        assert!(!registry.is_spent(&nullifier(1)));
        assert!(registry
            .try_record(nullifier(1), AcceptanceRecord::new(b"hello"))
            .unwrap());
        assert!(registry.is_spent(&nullifier(1)));
        assert!(!registry
            .try_record(nullifier(1), AcceptanceRecord::new(b"again"))
            .unwrap());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.record(&nullifier(1)).unwrap().signal_text(), "hello");
    }

    #[test]
    fn test_in_memory_concurrent_inserts_accept_exactly_one() {
        let registry = std::sync::Arc::new(InMemoryRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    registry
                        .try_record(nullifier(42), AcceptanceRecord::new(b"race"))
                        .unwrap()
                })
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(accepted, 1);
    }

    #[test]
    fn test_file_registry_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nullifiers.txt");

        {
            let registry = FileRegistry::open(&path).unwrap();
            assert!(registry.is_empty());
            assert!(registry
                .try_record(nullifier(7), AcceptanceRecord::new(b"gm"))
                .unwrap());
        }

        let reopened = FileRegistry::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.is_spent(&nullifier(7)));
        assert_eq!(reopened.record(&nullifier(7)).unwrap().signal, b"gm");
        assert!(!reopened
            .try_record(nullifier(7), AcceptanceRecord::new(b"gm"))
            .unwrap());
    }

    #[test]
    fn test_file_registry_rejects_corrupted_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nullifiers.txt");
        std::fs::write(&path, "not-a-nullifier|1|00\n").unwrap();

        assert!(matches!(
            FileRegistry::open(&path),
            Err(RegistryError::Corrupted { line: 1, .. })
        ));
    }

    #[test]
    fn test_file_registry_rejects_duplicate_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nullifiers.txt");
        let line = format!("{}|1|6869\n", nullifier(3).to_hex());
        std::fs::write(&path, format!("{line}\n{line}")).unwrap();

        assert!(matches!(
            FileRegistry::open(&path),
            Err(RegistryError::Corrupted { line: 3, .. })
        ));
    }

    #[test]
    fn test_file_registry_ignores_and_repairs_torn_tail() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nullifiers.txt");
        let complete = format!("{}|1|6869\n", nullifier(1).to_hex());
        let torn = nullifier(2).to_hex();
        std::fs::write(&path, format!("{complete}{}", &torn[..20])).unwrap();

        let registry = FileRegistry::open(&path).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_spent(&nullifier(2)));
        assert!(registry
            .try_record(nullifier(2), AcceptanceRecord::new(b"gm"))
            .unwrap());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.ends_with('\n'));
        let reopened = FileRegistry::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.record(&nullifier(2)).unwrap().signal, b"gm");
    }

    #[test]
    fn test_file_registries_on_same_path_share_spent_set() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nullifiers.txt");
        let first = FileRegistry::open(&path).unwrap();
        let second = FileRegistry::open(&path).unwrap();

        assert!(first
            .try_record(nullifier(5), AcceptanceRecord::new(b"one"))
            .unwrap());
        assert!(!second
            .try_record(nullifier(5), AcceptanceRecord::new(b"two"))
            .unwrap());
        assert!(second.is_spent(&nullifier(5)));
        assert_eq!(second.record(&nullifier(5)).unwrap().signal, b"one");
        assert!(second
            .try_record(nullifier(6), AcceptanceRecord::new(b"three"))
            .unwrap());

        assert_eq!(FileRegistry::open(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_file_registries_race_on_same_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nullifiers.txt");
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = FileRegistry::open(&path).unwrap();
                std::thread::spawn(move || {
                    registry
                        .try_record(nullifier(9), AcceptanceRecord::new(b"race"))
                        .unwrap()
                })
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(accepted, 1);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }
}
