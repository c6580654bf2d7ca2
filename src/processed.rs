use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, params};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{info, warn};

/// Identity of a file as it was when handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    pub day: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: i64,
}

impl FileIdentity {
    pub fn from_path(path: &Path, day: &str) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Ok(Self {
            day: day.to_string(),
            path: path.to_path_buf(),
            size: meta.len(),
            modified,
        })
    }

    /// Stable fingerprint over day, path, size and mtime.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.day.as_bytes());
        hasher.update(self.path.to_string_lossy().as_bytes());
        hasher.update(self.size.to_le_bytes());
        hasher.update(self.modified.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// SQLite record of files already submitted, so a restart does not resubmit them.
pub struct ProcessedStore {
    conn: Connection,
}

impl ProcessedStore {
    pub fn open<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn in_memory() -> SqliteResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> SqliteResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS processed_files (
                fingerprint TEXT PRIMARY KEY,
                day TEXT NOT NULL,
                path TEXT NOT NULL,
                size INTEGER NOT NULL,
                modified INTEGER NOT NULL,
                processed_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_processed_files_day ON processed_files(day)",
            [],
        )?;

        info!("Processed-file store initialized");
        Ok(Self { conn })
    }

    pub fn is_recorded(&self, identity: &FileIdentity) -> SqliteResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM processed_files WHERE fingerprint = ?1",
                params![identity.fingerprint()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn record(&self, identity: &FileIdentity) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO processed_files (fingerprint, day, path, size, modified)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                identity.fingerprint(),
                identity.day,
                identity.path.to_string_lossy(),
                identity.size as i64,
                identity.modified,
            ],
        )?;
        Ok(())
    }

    pub fn count_for_day(&self, day: &str) -> SqliteResult<i64> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM processed_files WHERE day = ?1",
            params![day],
            |row| row.get(0),
        )
    }
}

/// Paths already handed to the pipeline during the current watch period.
///
/// Memory is authoritative; the optional store only adds knowledge carried
/// over from earlier runs.
#[derive(Default)]
pub struct ProcessedSet {
    seen: HashSet<PathBuf>,
    store: Option<ProcessedStore>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(store: ProcessedStore) -> Self {
        Self {
            seen: HashSet::new(),
            store: Some(store),
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.seen.contains(path)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Claim `path` for processing. Returns false if it was already claimed,
    /// in this run or (with a store) in an earlier one.
    pub fn claim(&mut self, path: &Path, day: &str) -> bool {
        if self.contains(path) {
            return false;
        }

        if let Some(store) = &self.store {
            match FileIdentity::from_path(path, day) {
                Ok(identity) => match store.is_recorded(&identity) {
                    Ok(true) => {
                        info!(file = %path.display(), "Already processed in an earlier run");
                        self.seen.insert(path.to_path_buf());
                        return false;
                    }
                    Ok(false) => {
                        if let Err(e) = store.record(&identity) {
                            warn!(file = %path.display(), error = %e, "Could not persist processed file");
                        }
                    }
                    Err(e) => {
                        warn!(file = %path.display(), error = %e, "Processed-file lookup failed");
                    }
                },
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Could not stat file for dedupe store");
                }
            }
        }

        self.seen.insert(path.to_path_buf());
        true
    }

    /// Forget every path. Persisted records are day-scoped, so they stay.
    pub fn clear(&mut self) {
        self.seen.clear();
    }
}
