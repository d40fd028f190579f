use serde::{Deserialize, Serialize};

/// Default retention of unobserved entries: five minutes.
pub const DEFAULT_CACHE_TIME_MS: u64 = 5 * 60 * 1_000;

/// How long fetched data is considered fresh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StaleTime {
    /// Data becomes stale once the provided number of milliseconds has
    /// elapsed since it was fetched.
    Millis(u64),
    /// Data never becomes stale by the passage of time.
    Never,
}

impl StaleTime {
    /// Whether data that was fetched `elapsed_millis` ago is stale.
    pub fn is_elapsed(&self, elapsed_millis: u64) -> bool {
        match self {
            StaleTime::Millis(stale_time) => elapsed_millis >= *stale_time,
            StaleTime::Never => false,
        }
    }
}

impl Default for StaleTime {
    fn default() -> Self {
        StaleTime::Millis(0)
    }
}

/// Configuration of a [`QueryClient`](crate::QueryClient).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryClientConfig {
    /// Stale time of queries that don't specify one.
    pub default_stale_time: StaleTime,
    /// Retention of unobserved entries for queries that don't specify one.
    pub default_cache_time_ms: u64,
    /// If set, unobserved entries are swept in the background at this
    /// interval.
    pub gc_interval_ms: Option<u64>,
}

impl Default for QueryClientConfig {
    fn default() -> Self {
        Self {
            default_stale_time: StaleTime::default(),
            default_cache_time_ms: DEFAULT_CACHE_TIME_MS,
            gc_interval_ms: None,
        }
    }
}

impl QueryClientConfig {
    /// Resolves the cache policy of a query, falling back to the client's
    /// defaults for unspecified options.
    pub fn resolve_policy(&self, options: &ReadOptions) -> CachePolicy {
        CachePolicy {
            stale_time: options.stale_time.unwrap_or(self.default_stale_time),
            cache_time_ms: options.cache_time_ms.unwrap_or(self.default_cache_time_ms),
            // Watching is driven by block notifications, so it implies block scoping.
            block_scoped: options.block_scoped || options.watch,
        }
    }
}

/// Per-query options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadOptions {
    /// Whether the query may fetch. A disabled query only serves cached data.
    pub enabled: bool,
    /// Overrides the client's default stale time.
    pub stale_time: Option<StaleTime>,
    /// Overrides the client's default retention of unobserved entries.
    pub cache_time_ms: Option<u64>,
    /// Whether freshness is tied to block progression instead of wall-clock
    /// time.
    pub block_scoped: bool,
    /// Whether the query is refetched as soon as a new block makes it stale,
    /// as long as it has subscribers.
    pub watch: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_time: None,
            cache_time_ms: None,
            block_scoped: false,
            watch: false,
        }
    }
}

/// The resolved caching policy of an entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicy {
    /// How long data is fresh. Ignored for block-scoped entries.
    pub stale_time: StaleTime,
    /// How long an unobserved entry is retained.
    pub cache_time_ms: u64,
    /// Whether freshness is tied to block progression.
    pub block_scoped: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        QueryClientConfig::default().resolve_policy(&ReadOptions::default())
    }
}

impl CachePolicy {
    /// Combines the policies of two consumers of the same entry. The result
    /// is block-scoped if either is, uses the shorter stale time and the
    /// longer retention.
    pub fn merge(self, other: Self) -> Self {
        let stale_time = match (self.stale_time, other.stale_time) {
            (StaleTime::Millis(first), StaleTime::Millis(second)) => {
                StaleTime::Millis(first.min(second))
            }
            (StaleTime::Millis(millis), StaleTime::Never)
            | (StaleTime::Never, StaleTime::Millis(millis)) => StaleTime::Millis(millis),
            (StaleTime::Never, StaleTime::Never) => StaleTime::Never,
        };

        Self {
            stale_time,
            cache_time_ms: self.cache_time_ms.max(other.cache_time_ms),
            block_scoped: self.block_scoped || other.block_scoped,
        }
    }
}
