/// Schema for the cache generations, their entries and the durable queue.
///
/// All three live in one database file so a single WAL covers them.
pub const SCHEMA: &str = r#"
-- One row per cache generation; at most one is current per namespace
CREATE TABLE IF NOT EXISTS generations (
    namespace TEXT NOT NULL,
    tag TEXT NOT NULL,
    is_current INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, tag)
);

-- Cached responses, one per request identity per generation
CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    tag TEXT NOT NULL,
    identity_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (namespace, tag, identity_hash),
    FOREIGN KEY (namespace, tag) REFERENCES generations(namespace, tag) ON DELETE CASCADE
);

-- Deferred actions and state snapshots (seq preserves insertion order)
CREATE TABLE IF NOT EXISTS queue_items (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    enqueued_at TEXT NOT NULL
);
"#;
