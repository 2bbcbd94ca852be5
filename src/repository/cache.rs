//! Result cache for repository reads, and the memory valve that flushes
//! caches under memory pressure.
//!
//! Results found while an outer load is still mapping its rows are staged and
//! only become visible once the outermost load finishes, so a half-built
//! graph is never served from the cache.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::graph::{Handle, KeyHasher};
use crate::query::QueryBuilder;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Shape {
    One,
    Many,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub repository: String,
    pub fingerprint: u64,
    pub shape: Shape,
}

impl CacheKey {
    pub fn new(repository: &str, query: &QueryBuilder, shape: Shape) -> Self {
        Self {
            repository: repository.to_owned(),
            fingerprint: query.fingerprint(),
            shape,
        }
    }
}

/// A cached read. Many-results keep the member handles only; every hit
/// builds its own set around them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cached {
    One(Option<Handle>),
    Many(Vec<Handle>),
}

#[derive(Debug, Default)]
pub struct ResultCache {
    entries: HashMap<CacheKey, Cached, KeyHasher>,
    pending: Vec<(CacheKey, Cached)>,
    depth: usize,
    hits: u64,
    misses: u64,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }
    /// `Some(Cached::One(None))` is a cached empty result.
    pub fn get(&mut self, key: &CacheKey) -> Option<Cached> {
        match self.entries.get(key) {
            Some(hit) => {
                self.hits += 1;
                Some(hit.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }
    pub fn stage(&mut self, key: CacheKey, result: Cached) {
        if self.depth == 0 {
            self.entries.insert(key, result);
        } else {
            self.pending.push((key, result));
        }
    }
    pub fn begin(&mut self) {
        self.depth += 1;
    }
    /// Leaves a load; leaving the outermost one commits everything staged.
    pub fn end(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 && !self.pending.is_empty() {
            debug!(entries = self.pending.len(), "committing staged cache entries");
            self.entries.extend(self.pending.drain(..));
        }
    }
    /// True while some load is still mapping rows.
    pub fn is_loading(&self) -> bool {
        self.depth > 0
    }
    pub fn invalidate(&mut self, repository: &str) {
        self.entries.retain(|k, _| k.repository != repository);
        self.pending.retain(|(k, _)| k.repository != repository);
    }
    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending.clear();
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn hits(&self) -> u64 {
        self.hits
    }
    pub fn misses(&self) -> u64 {
        self.misses
    }
}

// ------------- Memory valve -------------
pub trait MemoryProbe: Send {
    /// Resident memory of the process, when it can be measured.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Reads resident pages from `/proc/self/statm`, which counts in pages of
/// the kernel's page size.
#[derive(Clone, Copy, Debug)]
pub struct StatmProbe {
    page_size: u64,
}

impl StatmProbe {
    pub fn new(page_size: u64) -> Self {
        Self { page_size }
    }
    fn bytes(&self, statm: &str) -> Option<u64> {
        let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        pages.checked_mul(self.page_size)
    }
}

impl Default for StatmProbe {
    fn default() -> Self {
        Self::new(4096)
    }
}

impl MemoryProbe for StatmProbe {
    fn resident_bytes(&self) -> Option<u64> {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        self.bytes(&statm)
    }
}

/// Decides when resident memory has grown past the configured share of the
/// limit, at which point caches are released.
pub struct MemoryValve {
    limit: Option<u64>,
    ratio: f64,
    probe: Box<dyn MemoryProbe>,
    trips: u64,
}

impl MemoryValve {
    pub fn new(limit: Option<u64>, ratio: f64, probe: Box<dyn MemoryProbe>) -> Self {
        Self {
            limit,
            ratio,
            probe,
            trips: 0,
        }
    }
    pub fn should_release(&mut self) -> bool {
        let Some(limit) = self.limit else {
            return false;
        };
        let Some(resident) = self.probe.resident_bytes() else {
            return false;
        };
        let threshold = (limit as f64 * self.ratio) as u64;
        if resident >= threshold {
            self.trips += 1;
            warn!(resident, threshold, "memory pressure, releasing caches");
            true
        } else {
            false
        }
    }
    pub fn trips(&self) -> u64 {
        self.trips
    }
}
