/// Bumped whenever the cached value layout changes; older caches are dropped on open.
pub const CACHE_BUSTER: i64 = 1;

pub const SCHEMA: &str = r#"
-- Small key/value table for client state (session tokens, schema markers)
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Query cache entries keyed by the encoded query key (timestamps in unix millis)
CREATE TABLE IF NOT EXISTS query_cache (
    cache_key TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    fetched_at INTEGER NOT NULL,
    stale_after INTEGER NOT NULL,
    last_used_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_query_cache_last_used ON query_cache(last_used_at);
"#;
