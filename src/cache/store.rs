//! Filesystem cache store.
//!
//! One body artifact per key (`<dir>/<key>`) plus a `<key>_headers.json`
//! sibling. No index, no nesting: existence and age come from `stat`.
//!
//! # Write protocol
//! ```text
//! writer task: <key>.<uuid>.tmp          ← body chunks streamed in
//!              <key>_headers.json.<uuid>.tmp → rename → <key>_headers.json
//!              <key>.<uuid>.tmp          → rename → <key>   (commit point)
//! ```
//! The body rename is the commit point. Aborted or failed writes remove the
//! temp file, so `exists()` never reports a partial body.
//!
//! Both renames, `read` and `delete` run under a per-key commit lock, so two
//! writers racing on one key never leave one's headers beside the other's body.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use bytes::Bytes;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::cache::key::CacheKey;
use crate::observability::metrics;

/// Suffix of the header artifact next to each body artifact.
pub const HEADERS_SUFFIX: &str = "_headers.json";
/// Suffix of in-progress artifacts.
pub const TEMP_SUFFIX: &str = ".tmp";
/// Number of commit lock stripes. Keys are spread by their leading hex digits.
const COMMIT_STRIPES: usize = 64;

/// Errors raised by cache lookups. All of them are recoverable as a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache entry not found")]
    NotFound,

    #[error("cache I/O error: {0}")]
    Io(io::Error),

    #[error("corrupt cache entry: {0}")]
    Corrupt(String),
}

impl From<io::Error> for CacheError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::NotFound {
            CacheError::NotFound
        } else {
            CacheError::Io(e)
        }
    }
}

/// Serialized form of a header map: name → values, in insertion order per name.
type HeaderRecord = BTreeMap<String, Vec<String>>;

fn to_record(headers: &HeaderMap) -> HeaderRecord {
    let mut record = HeaderRecord::new();
    for name in headers.keys() {
        let values: Vec<String> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_owned))
            .collect();
        if !values.is_empty() {
            record.insert(name.as_str().to_owned(), values);
        }
    }
    record
}

fn from_record(record: HeaderRecord) -> Result<HeaderMap, CacheError> {
    let mut headers = HeaderMap::new();
    for (name, values) in record {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| CacheError::Corrupt(format!("header name {:?}: {}", name, e)))?;
        for value in values {
            let value = HeaderValue::from_str(&value)
                .map_err(|e| CacheError::Corrupt(format!("header {}: {}", name, e)))?;
            headers.append(name.clone(), value);
        }
    }
    Ok(headers)
}

fn age(modified: SystemTime) -> Duration {
    SystemTime::now().duration_since(modified).unwrap_or_default()
}

/// A committed entry opened for replay.
#[derive(Debug)]
pub struct CachedEntry {
    pub headers: HeaderMap,
    pub body: File,
    /// Size of the body artifact at open time.
    pub len: u64,
}

/// Summary of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Directory entries examined.
    pub scanned: usize,
    /// Stale cache entries deleted.
    pub removed: usize,
    /// Abandoned temp files and orphaned header artifacts deleted.
    pub leftovers: usize,
    /// Entries that could not be examined or deleted.
    pub failed: usize,
}

/// Striped locks serializing the header and body renames of one key.
#[derive(Debug)]
struct CommitLocks {
    stripes: Vec<Mutex<()>>,
}

impl CommitLocks {
    fn new() -> Self {
        Self {
            stripes: (0..COMMIT_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    fn for_key(&self, key: &CacheKey) -> &Mutex<()> {
        let prefix = key.as_str().get(..4).unwrap_or_default();
        let index = usize::from_str_radix(prefix, 16).unwrap_or_default();
        &self.stripes[index % self.stripes.len()]
    }
}

/// Filesystem key → artifact store.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    write_buffer: usize,
    locks: Arc<CommitLocks>,
}

impl CacheStore {
    /// Open (and create if needed) the cache directory.
    pub async fn open(root: impl Into<PathBuf>, write_buffer: usize) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        tracing::info!(path = %root.display(), "Cache directory ready");
        Ok(Self {
            root,
            write_buffer: write_buffer.max(1),
            locks: Arc::new(CommitLocks::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn body_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    pub fn headers_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}{}", key, HEADERS_SUFFIX))
    }

    /// Whether a committed body exists for `key`.
    pub async fn exists(&self, key: &CacheKey) -> bool {
        fs::metadata(self.body_path(key)).await.is_ok()
    }

    /// Whether the entry is at least `ttl` old.
    pub async fn is_stale(&self, key: &CacheKey, ttl: Duration) -> Result<bool, CacheError> {
        let modified = fs::metadata(self.body_path(key)).await?.modified()?;
        Ok(age(modified) >= ttl)
    }

    /// Open an entry for replay.
    pub async fn read(&self, key: &CacheKey) -> Result<CachedEntry, CacheError> {
        let _commit = self.locks.for_key(key).lock().await;
        let body = File::open(self.body_path(key)).await?;
        let len = body.metadata().await?.len();

        let raw = match fs::read(self.headers_path(key)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CacheError::Corrupt("header artifact missing".into()));
            }
            Err(e) => return Err(CacheError::Io(e)),
        };
        let record: HeaderRecord =
            serde_json::from_slice(&raw).map_err(|e| CacheError::Corrupt(e.to_string()))?;

        Ok(CachedEntry {
            headers: from_record(record)?,
            body,
            len,
        })
    }

    /// Start writing an entry. The returned sink feeds a background writer task.
    pub fn write(&self, key: &CacheKey, headers: &HeaderMap) -> CacheSink {
        let (tx, rx) = mpsc::channel(self.write_buffer);
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let job = WriteJob {
            key: key.clone(),
            body_path: self.body_path(key),
            headers_path: self.headers_path(key),
            body_temp: self.root.join(format!("{}.{}{}", key, nonce, TEMP_SUFFIX)),
            headers_temp: self
                .root
                .join(format!("{}{}.{}{}", key, HEADERS_SUFFIX, nonce, TEMP_SUFFIX)),
            headers: to_record(headers),
            locks: self.locks.clone(),
        };

        CacheSink {
            tx,
            task: tokio::spawn(job.run(rx)),
        }
    }

    /// Remove an entry. Missing artifacts are not an error.
    pub async fn delete(&self, key: &CacheKey) -> Result<(), CacheError> {
        let _commit = self.locks.for_key(key).lock().await;
        // Body first: it is the existence signal.
        remove_if_present(&self.body_path(key)).await?;
        remove_if_present(&self.headers_path(key)).await?;
        Ok(())
    }

    /// Delete every entry at least `ttl` old, one at a time.
    ///
    /// Also clears temp files and orphaned header artifacts older than `ttl`,
    /// which are what a crashed or cancelled writer leaves behind.
    pub async fn sweep(&self, ttl: Duration) -> SweepReport {
        let mut report = SweepReport::default();

        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) => {
                tracing::warn!(path = %self.root.display(), error = %e, "Cannot list cache directory");
                report.failed += 1;
                return report;
            }
        };

        loop {
            let entry = match dir.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Cache directory listing interrupted");
                    report.failed += 1;
                    break;
                }
            };
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            report.scanned += 1;

            if let Some(key) = CacheKey::from_file_name(name) {
                match self.sweep_entry(&key, ttl).await {
                    Ok(true) => report.removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Failed to sweep cache entry");
                        report.failed += 1;
                    }
                }
            } else if name.ends_with(TEMP_SUFFIX) || name.ends_with(HEADERS_SUFFIX) {
                match self.sweep_leftover(&entry.path(), name, ttl).await {
                    Ok(true) => report.leftovers += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(file = %name, error = %e, "Failed to sweep cache leftover");
                        report.failed += 1;
                    }
                }
            }
        }

        metrics::record_sweep(&report);
        report
    }

    async fn sweep_entry(&self, key: &CacheKey, ttl: Duration) -> Result<bool, CacheError> {
        match self.is_stale(key, ttl).await {
            Ok(true) => {
                self.delete(key).await?;
                tracing::debug!(key = %key, "Swept stale cache entry");
                Ok(true)
            }
            Ok(false) => Ok(false),
            // Deleted concurrently by a request that found it stale.
            Err(CacheError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn sweep_leftover(&self, path: &Path, name: &str, ttl: Duration) -> Result<bool, CacheError> {
        if let Some(key) = name.strip_suffix(HEADERS_SUFFIX).and_then(CacheKey::from_file_name) {
            if self.exists(&key).await {
                return Ok(false);
            }
        }

        let modified = match fs::metadata(path).await {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(CacheError::Io(e)),
        };
        if age(modified) < ttl {
            return Ok(false);
        }

        remove_if_present(path).await?;
        tracing::debug!(file = %name, "Swept cache leftover");
        Ok(true)
    }
}

async fn remove_if_present(path: &Path) -> Result<(), CacheError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::Io(e)),
    }
}

/// How a cache write ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Entry committed.
    Stored,
    /// Sink dropped before the end of the body; nothing committed.
    Aborted,
    /// I/O error; nothing committed.
    Failed,
}

impl WriteOutcome {
    fn as_str(self) -> &'static str {
        match self {
            WriteOutcome::Stored => "stored",
            WriteOutcome::Aborted => "aborted",
            WriteOutcome::Failed => "failed",
        }
    }
}

enum SinkMessage {
    Chunk(Bytes),
    Finish,
}

/// Handle feeding body chunks to a background cache writer.
///
/// Dropping the sink without calling [`CacheSink::finish`] aborts the write.
#[derive(Debug)]
pub struct CacheSink {
    tx: mpsc::Sender<SinkMessage>,
    task: JoinHandle<WriteOutcome>,
}

impl CacheSink {
    /// Queue a chunk without waiting. Returns `false` when the writer cannot
    /// keep up or has already failed; the caller should drop the sink.
    pub fn offer(&mut self, chunk: Bytes) -> bool {
        self.tx.try_send(SinkMessage::Chunk(chunk)).is_ok()
    }

    /// Signal end of body. The entry is committed once queued chunks are written.
    pub fn finish(self) -> JoinHandle<WriteOutcome> {
        match self.tx.try_send(SinkMessage::Finish) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(message)) => {
                let tx = self.tx;
                tokio::spawn(async move {
                    let _ = tx.send(message).await;
                });
            }
        }
        self.task
    }

    /// Abandon the write. Equivalent to dropping the sink.
    pub fn abort(self) -> JoinHandle<WriteOutcome> {
        drop(self.tx);
        self.task
    }
}

struct WriteJob {
    key: CacheKey,
    body_path: PathBuf,
    headers_path: PathBuf,
    body_temp: PathBuf,
    headers_temp: PathBuf,
    headers: HeaderRecord,
    locks: Arc<CommitLocks>,
}

impl WriteJob {
    async fn run(self, mut rx: mpsc::Receiver<SinkMessage>) -> WriteOutcome {
        let outcome = match self.stream_body(&mut rx).await {
            Ok(true) => match self.commit().await {
                Ok(()) => {
                    tracing::debug!(key = %self.key, "Cache entry stored");
                    WriteOutcome::Stored
                }
                Err(e) => {
                    tracing::warn!(key = %self.key, error = %e, "Failed to commit cache entry");
                    WriteOutcome::Failed
                }
            },
            Ok(false) => {
                tracing::debug!(key = %self.key, "Cache write aborted");
                WriteOutcome::Aborted
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to write cache entry");
                WriteOutcome::Failed
            }
        };

        // Close the channel before cleanup so the tee stops offering chunks.
        drop(rx);
        if outcome != WriteOutcome::Stored {
            let _ = fs::remove_file(&self.body_temp).await;
            let _ = fs::remove_file(&self.headers_temp).await;
        }
        metrics::record_cache_write(outcome.as_str());
        outcome
    }

    /// Returns `Ok(true)` once the whole body is on disk, `Ok(false)` if the
    /// sink went away first.
    async fn stream_body(&self, rx: &mut mpsc::Receiver<SinkMessage>) -> io::Result<bool> {
        let mut file = File::create(&self.body_temp).await?;
        while let Some(message) = rx.recv().await {
            match message {
                SinkMessage::Chunk(chunk) => file.write_all(&chunk).await?,
                SinkMessage::Finish => {
                    file.flush().await?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    async fn commit(&self) -> io::Result<()> {
        let json = serde_json::to_vec(&self.headers)?;
        fs::write(&self.headers_temp, json).await?;
        let _commit = self.locks.for_key(&self.key).lock().await;
        fs::rename(&self.headers_temp, &self.headers_path).await?;
        fs::rename(&self.body_temp, &self.body_path).await?;
        Ok(())
    }
}
