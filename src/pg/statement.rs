//! Prepared statement management and caching.
//!
//! This module provides:
//! - `PreparedStatement`: a server-side statement with its parameter encoders
//!   and row description
//! - `StatementCache`: O(1) LRU cache keyed by SQL text and parameter types

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use smallvec::SmallVec;

use super::protocol::{FieldDescription, Format};
use super::types::{ColumnDecoder, Oid, ParamEncoder};

/// Prefix of every server-side statement name. The full name is
/// `<prefix>_<pid>_<sequence>`; servers and tooling match on it, so it
/// must not change between releases.
pub const STATEMENT_NAME_PREFIX: &str = "redshift_wire_statement";

/// Process-wide statement sequence; never reused while the process lives.
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Ordered `(type OID, format)` of each parameter of one call.
pub type ParamSignature = SmallVec<[(Oid, Format); 8]>;

/// Cache key: rewritten SQL plus the inferred parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementKey {
    pub sql: String,
    pub signature: ParamSignature,
}

impl StatementKey {
    pub fn new(sql: impl Into<String>, encoders: &[ParamEncoder]) -> Self {
        Self {
            sql: sql.into(),
            signature: encoders.iter().map(|e| (e.oid, e.format)).collect(),
        }
    }
}

/// A result column together with the decoder chosen for it.
#[derive(Debug, Clone)]
pub struct Column {
    pub field: FieldDescription,
    pub decoder: ColumnDecoder,
}

// ============================================================================
// Prepared Statement
// ============================================================================

/// A statement that has been parsed and described by the server.
///
/// Built only once its Describe response has arrived, so the row
/// description is always populated before the first Bind.
#[derive(Debug)]
pub struct PreparedStatement {
    /// Server-side name; empty for the unnamed statement.
    pub name: String,
    /// Source of `name`; orders statements by creation.
    pub sequence: u64,
    /// One encoder per placeholder.
    pub encoders: Vec<ParamEncoder>,
    /// Parameter types as the server resolved them.
    pub param_types: Vec<Oid>,
    /// Empty when the statement returns no rows (NoData).
    pub columns: Vec<Column>,
}

impl PreparedStatement {
    pub fn new(
        name: String,
        sequence: u64,
        encoders: Vec<ParamEncoder>,
        param_types: Vec<Oid>,
        columns: Vec<Column>,
    ) -> Self {
        Self {
            name,
            sequence,
            encoders,
            param_types,
            columns,
        }
    }

    pub fn returns_rows(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn is_unnamed(&self) -> bool {
        self.name.is_empty()
    }

    /// Result format per column, as sent in Bind.
    pub fn result_formats(&self) -> Vec<Format> {
        self.columns.iter().map(|c| c.decoder.format).collect()
    }
}

/// Allocate the next sequence number and the server name derived from it.
pub fn next_statement_name() -> (u64, String) {
    let sequence = NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let name = format!(
        "{}_{}_{}",
        STATEMENT_NAME_PREFIX,
        std::process::id(),
        sequence
    );
    (sequence, name)
}

// ============================================================================
// Statement Cache (O(1) LRU)
// ============================================================================

/// Result of [`StatementCache::get_or_create`].
#[derive(Debug)]
pub struct CacheLookup {
    pub statement: Arc<PreparedStatement>,
    /// `false` when the builder ran.
    pub hit: bool,
    /// Entry pushed out to make room; its server name must be closed.
    pub evicted: Option<Arc<PreparedStatement>>,
}

/// Bounded LRU map of live server-side statements for one connection.
///
/// Statements are stored as `Arc<PreparedStatement>`; cursors only keep a
/// `Weak` to the entry that produced their rows.
pub struct StatementCache {
    /// `None` when caching is disabled (capacity 0).
    cache: Option<LruCache<StatementKey, Arc<PreparedStatement>>>,
}

impl StatementCache {
    /// Create a cache holding at most `capacity` statements; 0 disables it.
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: NonZeroUsize::new(capacity).map(LruCache::new),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub fn capacity(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.cap().get())
    }

    /// Look up without touching LRU order.
    pub fn peek(&self, key: &StatementKey) -> Option<Arc<PreparedStatement>> {
        self.cache.as_ref()?.peek(key).map(Arc::clone)
    }

    pub fn contains(&self, key: &StatementKey) -> bool {
        self.cache.as_ref().is_some_and(|c| c.contains(key))
    }

    /// Return the cached statement for `key`, marking it most recently used,
    /// or build one with `builder` and insert it.
    ///
    /// With caching disabled the builder always runs and nothing is stored.
    pub fn get_or_create<F, E>(&mut self, key: &StatementKey, builder: F) -> Result<CacheLookup, E>
    where
        F: FnOnce() -> Result<PreparedStatement, E>,
    {
        let Some(cache) = self.cache.as_mut() else {
            return Ok(CacheLookup {
                statement: Arc::new(builder()?),
                hit: false,
                evicted: None,
            });
        };

        if let Some(found) = cache.get(key) {
            return Ok(CacheLookup {
                statement: Arc::clone(found),
                hit: true,
                evicted: None,
            });
        }

        let statement = Arc::new(builder()?);
        let evicted = cache
            .push(key.clone(), Arc::clone(&statement))
            .filter(|(evicted_key, _)| evicted_key != key)
            .map(|(_, stmt)| stmt);

        Ok(CacheLookup {
            statement,
            hit: false,
            evicted,
        })
    }

    /// Remove every entry, returning them so their names can be closed.
    pub fn drain(&mut self) -> Vec<Arc<PreparedStatement>> {
        let Some(cache) = self.cache.as_mut() else {
            return Vec::new();
        };
        let mut drained = Vec::with_capacity(cache.len());
        while let Some((_, stmt)) = cache.pop_lru() {
            drained.push(stmt);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached keys from most to least recently used.
    pub fn keys(&self) -> Vec<StatementKey> {
        self.cache
            .as_ref()
            .map(|c| c.iter().map(|(k, _)| k.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for StatementCache {
    fn default() -> Self {
        Self::new(1000)
    }
}
