//! Content-keyed cache for remote lookup payloads.
//!
//! **L1** – [`DashMap`] in-memory map (lock-free concurrent reads).
//! **L2** – Optional SQLite database on disk (persists across restarts).
//!
//! Keys are the *normalized* lookup query ([`LookupRequest::cache_key`]),
//! never the raw occurrence text, so textual variants of the same citation
//! share one entry. Entries are immutable once written; a re-fetch for the
//! same key overwrites. [`get`](LookupCache::get) returns the entry's age
//! alongside the payload and callers decide whether the hit is fresh enough;
//! [`prune`](LookupCache::prune) removes entries past a cutoff. There is no
//! capacity-based eviction.
//!
//! Time flows through an injectable [`Clock`] so TTL behavior is
//! deterministic under test.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use rusqlite::{Connection, OpenFlags, params};

use crate::CoreError;
use crate::sources::Payload;

/// Default time-to-live for cache entries: 7 days.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Source of wall-clock time, in whole seconds since the epoch.
pub trait Clock: Send + Sync {
    fn now_epoch(&self) -> u64;
}

/// The real clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

/// A hand-cranked clock for deterministic TTL tests.
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_epoch: u64) -> Self {
        Self {
            now: AtomicU64::new(start_epoch),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_secs(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A cache hit: the stored payload plus its age at lookup time.
#[derive(Debug, Clone)]
pub struct CachedLookup {
    pub payload: Payload,
    pub age: Duration,
}

impl CachedLookup {
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.age <= ttl
    }
}

#[derive(Clone)]
struct L1Entry {
    payload: Payload,
    inserted_at: u64,
}

fn open_sqlite(path: &Path) -> Result<Connection, rusqlite::Error> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS lookup_cache (
             query_key    TEXT PRIMARY KEY,
             payload_json TEXT NOT NULL,
             inserted_at  INTEGER NOT NULL
         );",
    )?;
    Ok(conn)
}

/// Thread-safe lookup cache. L1 serves concurrent readers; L2 writes are
/// serialized behind a single connection, last writer wins per key.
pub struct LookupCache {
    entries: DashMap<String, L1Entry>,
    sqlite: Option<Mutex<Connection>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for LookupCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl LookupCache {
    /// In-memory-only cache.
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// In-memory-only cache with an explicit clock.
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            sqlite: None,
            ttl,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Persistent cache backed by SQLite at `path`.
    ///
    /// Entries older than the TTL are evicted on open. A file that exists
    /// but cannot be opened as a cache database is a fatal error: the run
    /// must not start over a corrupt store.
    pub fn open(path: &Path, ttl: Duration) -> Result<Self, CoreError> {
        Self::open_with_clock(path, ttl, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        path: &Path,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = open_sqlite(path).map_err(|e| {
            CoreError::Cache(format!("cannot open cache at {}: {}", path.display(), e))
        })?;

        let cutoff = clock.now_epoch().saturating_sub(ttl.as_secs());
        let evicted = conn
            .execute("DELETE FROM lookup_cache WHERE inserted_at < ?1", [cutoff])
            .map_err(|e| CoreError::Cache(e.to_string()))?;
        if evicted > 0 {
            tracing::debug!(evicted, path = %path.display(), "evicted expired cache entries");
        }

        Ok(Self {
            entries: DashMap::new(),
            sqlite: Some(Mutex::new(conn)),
            ttl,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Look up a payload by normalized query key.
    ///
    /// Returns the stored payload with its age; entries are returned even
    /// past the TTL (freshness is the caller's policy via
    /// [`CachedLookup::is_fresh`]). L2 hits are promoted into L1.
    pub fn get(&self, key: &str) -> Option<CachedLookup> {
        let now = self.clock.now_epoch();

        if let Some(entry) = self.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key, "cache L1 hit");
            return Some(CachedLookup {
                payload: entry.payload.clone(),
                age: Duration::from_secs(now.saturating_sub(entry.inserted_at)),
            });
        }

        if let Some(ref sqlite) = self.sqlite
            && let Ok(conn) = sqlite.lock()
            && let Ok((json, inserted_at)) = conn.query_row(
                "SELECT payload_json, inserted_at FROM lookup_cache WHERE query_key = ?1",
                params![key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)),
            )
            && let Ok(payload) = serde_json::from_str::<Payload>(&json)
        {
            tracing::trace!(key, "cache L2 hit, promoting to L1");
            self.entries.insert(
                key.to_string(),
                L1Entry {
                    payload: payload.clone(),
                    inserted_at,
                },
            );
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(CachedLookup {
                payload,
                age: Duration::from_secs(now.saturating_sub(inserted_at)),
            });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(key, "cache miss");
        None
    }

    /// Insert a payload, overwriting any previous entry for the key.
    /// Write-through: L1 and L2 both updated.
    pub fn insert(&self, key: &str, payload: &Payload) {
        let now = self.clock.now_epoch();
        tracing::trace!(key, "cache insert");

        self.entries.insert(
            key.to_string(),
            L1Entry {
                payload: payload.clone(),
                inserted_at: now,
            },
        );

        if let Some(ref sqlite) = self.sqlite
            && let Ok(conn) = sqlite.lock()
            && let Ok(json) = serde_json::to_string(payload)
        {
            let _ = conn.execute(
                "INSERT OR REPLACE INTO lookup_cache (query_key, payload_json, inserted_at)
                 VALUES (?1, ?2, ?3)",
                params![key, json, now],
            );
        }
    }

    /// Remove entries older than `older_than` from both tiers. Returns how
    /// many entries were removed (L1 + L2; write-through makes double
    /// counting of the same key expected).
    pub fn prune(&self, older_than: Duration) -> usize {
        let cutoff = self.clock.now_epoch().saturating_sub(older_than.as_secs());

        let mut removed = 0usize;
        self.entries.retain(|_, entry| {
            if entry.inserted_at < cutoff {
                removed += 1;
                false
            } else {
                true
            }
        });

        if let Some(ref sqlite) = self.sqlite
            && let Ok(conn) = sqlite.lock()
        {
            removed += conn
                .execute("DELETE FROM lookup_cache WHERE inserted_at < ?1", [cutoff])
                .unwrap_or(0);
        }

        removed
    }

    /// Remove everything from both tiers.
    pub fn clear(&self) {
        self.entries.clear();
        if let Some(ref sqlite) = self.sqlite
            && let Ok(conn) = sqlite.lock()
        {
            let _ = conn.execute("DELETE FROM lookup_cache", []);
            let _ = conn.execute_batch("VACUUM");
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Entries currently in L1.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in the persistent tier (0 without persistence).
    pub fn disk_len(&self) -> usize {
        if let Some(ref sqlite) = self.sqlite
            && let Ok(conn) = sqlite.lock()
        {
            conn.query_row("SELECT COUNT(*) FROM lookup_cache", [], |row| row.get(0))
                .unwrap_or(0)
        } else {
            0
        }
    }

    pub fn has_persistence(&self) -> bool {
        self.sqlite.is_some()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl std::fmt::Debug for LookupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LookupCache")
            .field("l1_entries", &self.entries.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .field("ttl", &self.ttl)
            .field("persistent", &self.has_persistence())
            .finish()
    }
}
