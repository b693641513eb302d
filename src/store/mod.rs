// src/store/mod.rs
//! The only durable state. One SQLite database behind a coarse lock.
//!
//! Writes are serialized by the connection mutex; the lock is never held
//! across an `.await` point. Counters for `stats()` live in memory and are
//! materialized lazily from the tables on first call.

pub mod models;

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use once_cell::sync::OnceCell;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value as Json;

pub use models::{
    Channel, ChannelKind, ChannelStatus, ContentItem, Sentiment, Signal, SignalFilter, Stats,
};

/// Epoch milliseconds now.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug)]
struct Counters {
    items: AtomicI64,
    signals: AtomicI64,
    channels: AtomicI64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: String,
    pub inserted: bool,
}

pub struct Store {
    conn: Mutex<Connection>,
    counters: OnceCell<Counters>,
}

impl Store {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create db directory {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("open sqlite db {}", path.as_ref().display()))?;
        Self::init(conn)
    }

    /// Throwaway in-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("open in-memory sqlite db")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        let _ = conn.pragma_update(None, "journal_mode", "WAL");
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("set synchronous pragma")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("set busy timeout")?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            counters: OnceCell::new(),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A poisoned store lock is unrecoverable; the writer must not outlive
        // a panicking peer.
        self.conn.lock().expect("store lock poisoned")
    }

    // ---- content items ------------------------------------------------

    /// Dedupes on `content_hash`: on conflict the existing id is returned
    /// untouched and nothing is overwritten.
    pub fn upsert_content_item(&self, item: &ContentItem) -> Result<UpsertOutcome> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "INSERT INTO content_items
                   (id, source_id, source_name, raw_text, content_hash, created_at,
                    processed_json, is_signal, last_analyzed_at, retry_count, last_error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(content_hash) DO NOTHING",
                params![
                    item.id,
                    item.source_id,
                    item.source_name,
                    item.raw_text,
                    item.content_hash,
                    item.created_at,
                    item.processed_json,
                    item.is_signal,
                    item.last_analyzed_at,
                    item.retry_count,
                    item.last_error,
                ],
            )
            .context("insert content item")?;

        if changed == 1 {
            if let Some(c) = self.counters.get() {
                c.items.fetch_add(1, Ordering::Relaxed);
                if item.is_signal == 1 {
                    c.signals.fetch_add(1, Ordering::Relaxed);
                }
            }
            return Ok(UpsertOutcome {
                id: item.id.clone(),
                inserted: true,
            });
        }

        let id: String = conn
            .query_row(
                "SELECT id FROM content_items WHERE content_hash = ?1",
                params![item.content_hash],
                |row| row.get(0),
            )
            .context("resolve existing item id after dedupe")?;
        Ok(UpsertOutcome {
            id,
            inserted: false,
        })
    }

    pub fn exists_by_hash(&self, hash: &str) -> Result<Option<String>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id FROM content_items WHERE content_hash = ?1",
            params![hash],
            |row| row.get(0),
        )
        .optional()
        .context("lookup by hash")
    }

    /// The most recent analysis for `hash` whose `last_analyzed_at` is inside
    /// the window, together with the id of the item that carries it.
    pub fn recent_analysis_by_hash(
        &self,
        hash: &str,
        within_ms: i64,
        now: i64,
    ) -> Result<Option<(String, String)>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, processed_json FROM content_items
             WHERE content_hash = ?1
               AND processed_json IS NOT NULL
               AND last_analyzed_at IS NOT NULL
               AND last_analyzed_at > ?2
             ORDER BY last_analyzed_at DESC
             LIMIT 1",
            params![hash, now - within_ms],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .context("recent analysis lookup")
    }

    /// Up to `limit` unanalyzed items under the retry cap, oldest first.
    /// Non-destructive: callers write results back.
    pub fn take_pending_batch(&self, limit: usize, max_retries: u32) -> Result<Vec<ContentItem>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, source_id, source_name, raw_text, content_hash, created_at,
                        processed_json, is_signal, last_analyzed_at, retry_count, last_error
                 FROM content_items
                 WHERE processed_json IS NULL AND retry_count < ?1
                 ORDER BY created_at ASC
                 LIMIT ?2",
            )
            .context("prepare pending batch")?;
        let rows = stmt
            .query_map(params![max_retries, limit as i64], item_from_row)
            .context("query pending batch")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("read pending batch")?;
        Ok(rows)
    }

    pub fn count_pending(&self, max_retries: u32) -> Result<i64> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*) FROM content_items
             WHERE processed_json IS NULL AND retry_count < ?1",
            params![max_retries],
            |row| row.get(0),
        )
        .context("count pending")
    }

    pub fn write_analysis(
        &self,
        item_id: &str,
        processed_json: &str,
        is_signal: i64,
        last_analyzed_at: i64,
    ) -> Result<()> {
        let conn = self.conn();
        let old: Option<i64> = conn
            .query_row(
                "SELECT is_signal FROM content_items WHERE id = ?1",
                params![item_id],
                |row| row.get(0),
            )
            .optional()
            .context("read prior signal state")?;
        let changed = conn
            .execute(
                "UPDATE content_items
                 SET processed_json = ?2, is_signal = ?3, last_analyzed_at = ?4, last_error = NULL
                 WHERE id = ?1",
                params![item_id, processed_json, is_signal, last_analyzed_at],
            )
            .context("write analysis")?;
        if changed == 1 {
            self.adjust_signal_counter(old.unwrap_or(0), is_signal);
        }
        Ok(())
    }

    /// Promote an item. `is_signal = 1` always implies `processed_json` is
    /// already present, so this only flips the flag.
    pub fn mark_item_signal(&self, item_id: &str) -> Result<()> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE content_items SET is_signal = 1
                 WHERE id = ?1 AND is_signal = 0 AND processed_json IS NOT NULL",
                params![item_id],
            )
            .context("mark item as signal")?;
        if changed == 1 {
            if let Some(c) = self.counters.get() {
                c.signals.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Increment the retry counter and record the error. At the cap the item
    /// is moved to the terminal `-1` state and never offered again.
    pub fn bump_retry(&self, item_id: &str, error: &str, max_retries: u32) -> Result<u32> {
        let conn = self.conn();
        conn.execute(
            "UPDATE content_items
             SET retry_count = retry_count + 1, last_error = ?2
             WHERE id = ?1",
            params![item_id, error],
        )
        .context("bump retry")?;
        let count: u32 = conn
            .query_row(
                "SELECT retry_count FROM content_items WHERE id = ?1",
                params![item_id],
                |row| row.get(0),
            )
            .context("read retry count")?;
        if count >= max_retries {
            conn.execute(
                "UPDATE content_items SET is_signal = -1 WHERE id = ?1 AND is_signal = 0",
                params![item_id],
            )
            .context("mark item failed")?;
        }
        Ok(count)
    }

    pub fn content_item(&self, id: &str) -> Result<Option<ContentItem>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, source_id, source_name, raw_text, content_hash, created_at,
                    processed_json, is_signal, last_analyzed_at, retry_count, last_error
             FROM content_items WHERE id = ?1",
            params![id],
            item_from_row,
        )
        .optional()
        .context("load content item")
    }

    /// Items created since `since_ms` that never produced a signal. Digest
    /// synthesis input.
    pub fn items_without_signal_since(&self, since_ms: i64) -> Result<Vec<ContentItem>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT id, source_id, source_name, raw_text, content_hash, created_at,
                        processed_json, is_signal, last_analyzed_at, retry_count, last_error
                 FROM content_items
                 WHERE created_at > ?1 AND is_signal = 0
                 ORDER BY created_at ASC",
            )
            .context("prepare digest select")?;
        let rows = stmt
            .query_map(params![since_ms], item_from_row)
            .context("query digest items")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("read digest items")?;
        Ok(rows)
    }

    /// Clear analysis state for the given items so the next analyzer pass
    /// picks them up again. Returns how many rows were requeued.
    pub fn reset_items_for_reanalysis(&self, ids: &[String]) -> Result<usize> {
        let mut requeued = 0usize;
        let conn = self.conn();
        for id in ids {
            let old: Option<i64> = conn
                .query_row(
                    "SELECT is_signal FROM content_items WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()
                .context("read item for requeue")?;
            let Some(old) = old else { continue };
            conn.execute(
                "UPDATE content_items
                 SET processed_json = NULL, last_analyzed_at = NULL,
                     retry_count = 0, is_signal = 0, last_error = NULL
                 WHERE id = ?1",
                params![id],
            )
            .context("requeue item")?;
            self.adjust_signal_counter(old, 0);
            requeued += 1;
        }
        Ok(requeued)
    }

    fn adjust_signal_counter(&self, old: i64, new: i64) {
        if old == new {
            return;
        }
        if let Some(c) = self.counters.get() {
            if old == 1 {
                c.signals.fetch_sub(1, Ordering::Relaxed);
            }
            if new == 1 {
                c.signals.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    // ---- signals ------------------------------------------------------

    pub fn save_signal(&self, s: &Signal, fingerprint: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO signals
               (id, source_item_ids, summary, analysis, fact_check, sentiment,
                relevance_score, urgent, tickers, tags, source_name, fingerprint, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                s.id,
                serde_json::to_string(&s.source_item_ids)?,
                s.summary,
                s.analysis,
                s.fact_check,
                s.sentiment.as_str(),
                s.relevance_score,
                s.urgent as i64,
                serde_json::to_string(&s.tickers)?,
                serde_json::to_string(&s.tags)?,
                s.source_name,
                fingerprint,
                s.created_at,
            ],
        )
        .context("insert signal")?;
        Ok(())
    }

    /// True when a signal with this fingerprint exists inside the window.
    pub fn signal_fingerprint_seen(
        &self,
        fingerprint: &str,
        within_ms: i64,
        now: i64,
    ) -> Result<bool> {
        let conn = self.conn();
        let hit: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM signals WHERE fingerprint = ?1 AND created_at > ?2 LIMIT 1",
                params![fingerprint, now - within_ms],
                |row| row.get(0),
            )
            .optional()
            .context("fingerprint lookup")?;
        Ok(hit.is_some())
    }

    pub fn list_signals(
        &self,
        filter: &SignalFilter,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Signal>, i64)> {
        let mut clauses: Vec<&'static str> = Vec::new();
        let mut args: Vec<rusqlite::types::Value> = Vec::new();
        if let Some(source) = &filter.source {
            clauses.push("source_name = ?");
            args.push(source.clone().into());
        }
        if let Some(sentiment) = filter.sentiment {
            clauses.push("sentiment = ?");
            args.push(sentiment.as_str().to_string().into());
        }
        if let Some(urgent) = filter.urgent {
            clauses.push("urgent = ?");
            args.push((urgent as i64).into());
        }
        if let Some(from) = filter.from {
            clauses.push("created_at >= ?");
            args.push(from.into());
        }
        if let Some(to) = filter.to {
            clauses.push("created_at <= ?");
            args.push(to.into());
        }
        if let Some(q) = &filter.q {
            clauses.push("(summary LIKE ? OR analysis LIKE ?)");
            let like = format!("%{q}%");
            args.push(like.clone().into());
            args.push(like.into());
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let conn = self.conn();
        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM signals {where_sql}"),
                params_from_iter(args.iter()),
                |row| row.get(0),
            )
            .context("count signals")?;

        let sql = format!(
            "SELECT id, source_item_ids, summary, analysis, fact_check, sentiment,
                    relevance_score, urgent, tickers, tags, source_name, created_at
             FROM signals {where_sql}
             ORDER BY created_at DESC
             LIMIT ? OFFSET ?"
        );
        args.push((limit as i64).into());
        args.push((offset as i64).into());
        let mut stmt = conn.prepare(&sql).context("prepare signals list")?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), signal_from_row)
            .context("query signals")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("read signals")?;
        Ok((rows, total))
    }

    pub fn distinct_signal_sources(&self) -> Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT DISTINCT source_name FROM signals ORDER BY source_name ASC")
            .context("prepare sources")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .context("query sources")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("read sources")?;
        Ok(rows.into_iter().filter(|s| !s.is_empty()).collect())
    }

    // ---- channels -----------------------------------------------------

    /// Insert or refresh a channel. Name, feed url and status are updated
    /// in place; counters and poll bookkeeping are left alone.
    pub fn upsert_channel(&self, ch: &Channel) -> Result<()> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "INSERT INTO channels
                   (id, name, kind, feed_url, last_polled_at, success_count, failure_count, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   feed_url = excluded.feed_url,
                   status = excluded.status",
                params![
                    ch.id,
                    ch.name,
                    ch.kind.as_str(),
                    ch.feed_url,
                    ch.last_polled_at,
                    ch.success_count,
                    ch.failure_count,
                    ch.status.as_str(),
                ],
            )
            .context("upsert channel")?;
        // rusqlite reports 1 for both upsert arms, so refresh the counter
        // from the table instead of guessing insert vs update.
        if changed == 1 {
            if let Some(c) = self.counters.get() {
                let total: i64 = conn
                    .query_row("SELECT COUNT(*) FROM channels", [], |row| row.get(0))
                    .context("count channels after upsert")?;
                c.channels.store(total, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    pub fn get_channel(&self, id: &str) -> Result<Option<Channel>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, name, kind, feed_url, last_polled_at, success_count, failure_count, status
             FROM channels WHERE id = ?1",
            params![id],
            channel_from_row,
        )
        .optional()
        .context("load channel")
    }

    pub fn list_channels(&self, kind: Option<ChannelKind>) -> Result<Vec<Channel>> {
        let conn = self.conn();
        let (sql, args): (&str, Vec<rusqlite::types::Value>) = match kind {
            Some(k) => (
                "SELECT id, name, kind, feed_url, last_polled_at, success_count, failure_count, status
                 FROM channels WHERE kind = ? ORDER BY name ASC",
                vec![k.as_str().to_string().into()],
            ),
            None => (
                "SELECT id, name, kind, feed_url, last_polled_at, success_count, failure_count, status
                 FROM channels ORDER BY name ASC",
                vec![],
            ),
        };
        let mut stmt = conn.prepare(sql).context("prepare channels list")?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), channel_from_row)
            .context("query channels")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("read channels")?;
        Ok(rows)
    }

    pub fn touch_channel(
        &self,
        id: &str,
        success_delta: i64,
        failure_delta: i64,
        last_polled_at: Option<i64>,
    ) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "UPDATE channels
             SET success_count = success_count + ?2,
                 failure_count = failure_count + ?3,
                 last_polled_at = COALESCE(?4, last_polled_at)
             WHERE id = ?1",
            params![id, success_delta, failure_delta, last_polled_at],
        )
        .context("touch channel")?;
        Ok(())
    }

    pub fn set_channel_status(&self, id: &str, status: ChannelStatus) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute(
                "UPDATE channels SET status = ?2 WHERE id = ?1",
                params![id, status.as_str()],
            )
            .context("set channel status")?;
        Ok(changed == 1)
    }

    pub fn delete_channel(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        let changed = conn
            .execute("DELETE FROM channels WHERE id = ?1", params![id])
            .context("delete channel")?;
        if changed == 1 {
            if let Some(c) = self.counters.get() {
                c.channels.fetch_sub(1, Ordering::Relaxed);
            }
        }
        Ok(changed == 1)
    }

    // ---- internal logs & settings -------------------------------------

    pub fn log_state(&self, module: &str, message: &str, context: Option<&Json>) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO internal_logs (created_at, module, message, context)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                now_ms(),
                module,
                message,
                context.map(|c| c.to_string()),
            ],
        )
        .context("insert internal log")?;
        Ok(())
    }

    pub fn prune_internal_logs_older_than(&self, ts_ms: i64) -> Result<usize> {
        let conn = self.conn();
        let pruned = conn
            .execute(
                "DELETE FROM internal_logs WHERE created_at < ?1",
                params![ts_ms],
            )
            .context("prune internal logs")?;
        Ok(pruned)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .context("read setting")
    }

    pub fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .context("write setting")?;
        Ok(())
    }

    // ---- stats & raw queries ------------------------------------------

    /// O(1) after the first call: counters are materialized once from the
    /// tables and kept in sync on every write path.
    pub fn stats(&self) -> Result<Stats> {
        let counters = match self.counters.get() {
            Some(c) => c,
            None => {
                let fresh = {
                    let conn = self.conn();
                    let items: i64 = conn
                        .query_row("SELECT COUNT(*) FROM content_items", [], |row| row.get(0))
                        .context("count items")?;
                    let signals: i64 = conn
                        .query_row(
                            "SELECT COUNT(*) FROM content_items WHERE is_signal = 1",
                            [],
                            |row| row.get(0),
                        )
                        .context("count signal items")?;
                    let channels: i64 = conn
                        .query_row("SELECT COUNT(*) FROM channels", [], |row| row.get(0))
                        .context("count channels")?;
                    Counters {
                        items: AtomicI64::new(items),
                        signals: AtomicI64::new(signals),
                        channels: AtomicI64::new(channels),
                    }
                };
                // Another caller may have won the race; either value is the
                // same snapshot.
                let _ = self.counters.set(fresh);
                self.counters.get().expect("counters just set")
            }
        };
        Ok(Stats {
            items: counters.items.load(Ordering::Relaxed),
            signals: counters.signals.load(Ordering::Relaxed),
            channels: counters.channels.load(Ordering::Relaxed),
        })
    }

    /// Read-only escape hatch: a single SELECT, capped at `max_rows`.
    pub fn select_rows(&self, sql: &str, max_rows: usize) -> Result<Vec<Json>> {
        let trimmed = sql.trim();
        if !trimmed
            .get(..6)
            .map(|p| p.eq_ignore_ascii_case("select"))
            .unwrap_or(false)
        {
            bail!("only SELECT statements are allowed");
        }
        if trimmed.contains(';') {
            bail!("multiple statements are not allowed");
        }
        let conn = self.conn();
        let mut stmt = conn.prepare(trimmed).context("prepare query")?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([]).context("run query")?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().context("read row")? {
            if out.len() >= max_rows {
                break;
            }
            let mut obj = serde_json::Map::new();
            for (i, name) in columns.iter().enumerate() {
                let value = match row.get_ref(i).context("read column")? {
                    rusqlite::types::ValueRef::Null => Json::Null,
                    rusqlite::types::ValueRef::Integer(v) => Json::from(v),
                    rusqlite::types::ValueRef::Real(v) => {
                        serde_json::Number::from_f64(v).map(Json::Number).unwrap_or(Json::Null)
                    }
                    rusqlite::types::ValueRef::Text(v) => {
                        Json::from(String::from_utf8_lossy(v).to_string())
                    }
                    rusqlite::types::ValueRef::Blob(_) => Json::from("<blob>"),
                };
                obj.insert(name.clone(), value);
            }
            out.push(Json::Object(obj));
        }
        Ok(out)
    }
}

/// Idempotent schema setup: CREATE IF NOT EXISTS everywhere, additive
/// columns guarded by try/ignore so re-running on an old database is safe.
fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS content_items (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            source_name TEXT NOT NULL DEFAULT '',
            raw_text TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            processed_json TEXT,
            is_signal INTEGER NOT NULL DEFAULT 0,
            last_analyzed_at INTEGER,
            retry_count INTEGER NOT NULL DEFAULT 0
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_items_hash ON content_items(content_hash);
        CREATE INDEX IF NOT EXISTS idx_items_created ON content_items(created_at);

        CREATE TABLE IF NOT EXISTS signals (
            id TEXT PRIMARY KEY,
            source_item_ids TEXT NOT NULL,
            summary TEXT NOT NULL,
            analysis TEXT NOT NULL DEFAULT '',
            fact_check TEXT,
            sentiment TEXT NOT NULL DEFAULT 'neutral',
            relevance_score INTEGER NOT NULL DEFAULT 0,
            urgent INTEGER NOT NULL DEFAULT 0,
            tickers TEXT NOT NULL DEFAULT '[]',
            tags TEXT NOT NULL DEFAULT '[]',
            source_name TEXT NOT NULL DEFAULT '',
            fingerprint TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_signals_created ON signals(created_at);
        CREATE INDEX IF NOT EXISTS idx_signals_fingerprint ON signals(fingerprint);

        CREATE TABLE IF NOT EXISTS channels (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            feed_url TEXT,
            last_polled_at INTEGER,
            success_count INTEGER NOT NULL DEFAULT 0,
            failure_count INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active'
        );

        CREATE TABLE IF NOT EXISTS internal_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at INTEGER NOT NULL,
            module TEXT NOT NULL,
            message TEXT NOT NULL,
            context TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_logs_created ON internal_logs(created_at);

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )
    .context("create tables")?;

    // Additive columns for databases created before the column existed.
    let _ = conn.execute(
        "ALTER TABLE content_items ADD COLUMN last_error TEXT",
        [],
    );
    Ok(())
}

fn item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContentItem> {
    Ok(ContentItem {
        id: row.get(0)?,
        source_id: row.get(1)?,
        source_name: row.get(2)?,
        raw_text: row.get(3)?,
        content_hash: row.get(4)?,
        created_at: row.get(5)?,
        processed_json: row.get(6)?,
        is_signal: row.get(7)?,
        last_analyzed_at: row.get(8)?,
        retry_count: row.get(9)?,
        last_error: row.get(10)?,
    })
}

fn signal_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Signal> {
    let ids: String = row.get(1)?;
    let tickers: String = row.get(8)?;
    let tags: String = row.get(9)?;
    let sentiment: String = row.get(5)?;
    Ok(Signal {
        id: row.get(0)?,
        source_item_ids: serde_json::from_str(&ids).unwrap_or_default(),
        summary: row.get(2)?,
        analysis: row.get(3)?,
        fact_check: row.get(4)?,
        sentiment: Sentiment::parse(&sentiment),
        relevance_score: row.get(6)?,
        urgent: row.get::<_, i64>(7)? != 0,
        tickers: serde_json::from_str(&tickers).unwrap_or_default(),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        source_name: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn channel_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    let kind: String = row.get(2)?;
    let status: String = row.get(7)?;
    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: ChannelKind::parse(&kind),
        feed_url: row.get(3)?,
        last_polled_at: row.get(4)?,
        success_count: row.get(5)?,
        failure_count: row.get(6)?,
        status: ChannelStatus::parse(&status),
    })
}
