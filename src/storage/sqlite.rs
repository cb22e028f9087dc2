use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, ToSql};
use std::path::{Path, PathBuf};

use crate::config::{baseline_file_weight, WorkspaceConfig};
use crate::types::{
    ArchivedChunk, Chunk, ChunkType, Contradiction, EntityRecord, FileMeta, NewChunk, ScoredChunk,
    StoreStats, TypeCount,
};

/// Filters for an FTS search against the store.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub include_stale: bool,
    /// Inclusive lower bound on `created_at` (epoch ms).
    pub since: Option<i64>,
    /// Exclusive upper bound on `created_at` (epoch ms).
    pub until: Option<i64>,
    pub chunk_type: Option<ChunkType>,
    pub min_confidence: Option<f64>,
    /// When set, matched rows do not get their access counters bumped.
    pub skip_tracking: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            include_stale: false,
            since: None,
            until: None,
            chunk_type: None,
            min_confidence: None,
            skip_tracking: false,
        }
    }
}

/// Chunk and FTS storage using SQLite. Owns every persisted row; all other
/// components hold only transient query results.
pub struct Store {
    conn: Connection,
    db_path: PathBuf,
}

impl Store {
    /// Open (or create) the store for a workspace at `.memory/index.sqlite`.
    pub fn open(workspace: &Path) -> Result<Self> {
        let dir = WorkspaceConfig::memory_dir(workspace);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Self::open_at(&WorkspaceConfig::db_path(workspace))
    }

    /// Open a store at an explicit database path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let store = Self {
            conn,
            db_path: path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY,
                file_path TEXT NOT NULL,
                heading TEXT,
                content TEXT NOT NULL,
                line_start INTEGER NOT NULL,
                line_end INTEGER NOT NULL,
                entities TEXT NOT NULL DEFAULT '[]',
                chunk_type TEXT NOT NULL DEFAULT 'raw',
                confidence REAL NOT NULL DEFAULT 1.0,
                created_at INTEGER NOT NULL,
                indexed_at INTEGER NOT NULL,
                file_weight REAL NOT NULL DEFAULT 1.0,
                access_count INTEGER NOT NULL DEFAULT 0,
                last_accessed INTEGER,
                stale INTEGER NOT NULL DEFAULT 0,
                embedding BLOB
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_file ON chunks(file_path);
            CREATE INDEX IF NOT EXISTS idx_chunks_created ON chunks(created_at);

            CREATE TABLE IF NOT EXISTS files (
                file_path TEXT PRIMARY KEY,
                mtime_ms INTEGER NOT NULL,
                chunk_count INTEGER NOT NULL,
                indexed_at INTEGER NOT NULL
            );

            CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
                content, heading, entities,
                content='chunks',
                content_rowid='id'
            );

            CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
                INSERT INTO chunks_fts(rowid, content, heading, entities)
                VALUES (new.id, new.content, new.heading, new.entities);
            END;

            CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, content, heading, entities)
                VALUES ('delete', old.id, old.content, old.heading, old.entities);
            END;

            -- Scoped to the mirrored columns so Reflect's confidence/access
            -- updates cause no FTS churn.
            CREATE TRIGGER IF NOT EXISTS chunks_au
            AFTER UPDATE OF content, heading, entities ON chunks BEGIN
                INSERT INTO chunks_fts(chunks_fts, rowid, content, heading, entities)
                VALUES ('delete', old.id, old.content, old.heading, old.entities);
                INSERT INTO chunks_fts(rowid, content, heading, entities)
                VALUES (new.id, new.content, new.heading, new.entities);
            END;

            CREATE TABLE IF NOT EXISTS contradictions (
                id INTEGER PRIMARY KEY,
                chunk_id_old INTEGER NOT NULL,
                chunk_id_new INTEGER NOT NULL,
                reason TEXT NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                UNIQUE(chunk_id_old, chunk_id_new)
            );

            CREATE TABLE IF NOT EXISTS archived_chunks (
                id INTEGER PRIMARY KEY,
                file_path TEXT NOT NULL,
                heading TEXT,
                content TEXT NOT NULL,
                line_start INTEGER NOT NULL,
                line_end INTEGER NOT NULL,
                entities TEXT NOT NULL,
                chunk_type TEXT NOT NULL,
                confidence REAL NOT NULL,
                created_at INTEGER NOT NULL,
                file_weight REAL NOT NULL,
                access_count INTEGER NOT NULL,
                archived_at INTEGER NOT NULL,
                archive_reason TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entity_index (
                entity TEXT PRIMARY KEY,
                chunk_ids TEXT NOT NULL,
                co_entities TEXT NOT NULL,
                mention_count INTEGER NOT NULL,
                last_seen INTEGER NOT NULL
            );
        "#,
        )?;

        // Columns added after the original schema shipped. Re-running the
        // ALTER on an up-to-date database is not an error.
        self.ensure_column("chunks", "embedding BLOB")?;
        self.ensure_column("chunks", "stale INTEGER NOT NULL DEFAULT 0")?;
        Ok(())
    }

    fn ensure_column(&self, table: &str, decl: &str) -> Result<()> {
        let sql = format!("ALTER TABLE {table} ADD COLUMN {decl}");
        match self.conn.execute(&sql, []) {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("duplicate column name") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_file_meta(&self, path: &str) -> Result<Option<FileMeta>> {
        self.conn
            .query_row(
                "SELECT file_path, mtime_ms, chunk_count, indexed_at FROM files WHERE file_path = ?1",
                [path],
                |row| {
                    Ok(FileMeta {
                        file_path: row.get(0)?,
                        mtime_ms: row.get(1)?,
                        chunk_count: row.get(2)?,
                        indexed_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    /// Delete a file's chunks and its file record.
    pub fn delete_file_chunks(&mut self, path: &str) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let deleted = tx.execute("DELETE FROM chunks WHERE file_path = ?1", [path])?;
        tx.execute("DELETE FROM files WHERE file_path = ?1", [path])?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Replace a file's chunks with a new set and upsert its file record,
    /// all in one transaction. `created_at_hint` (a path-embedded date)
    /// wins over the file mtime for `created_at`.
    pub fn insert_chunks(
        &mut self,
        path: &str,
        mtime_ms: i64,
        chunks: &[NewChunk],
        created_at_hint: Option<i64>,
    ) -> Result<usize> {
        let now = now_ms();
        let created_at = created_at_hint.unwrap_or(mtime_ms);
        let file_weight = baseline_file_weight(path);

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM chunks WHERE file_path = ?1", [path])?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO chunks
                   (file_path, heading, content, line_start, line_end, entities,
                    chunk_type, confidence, created_at, indexed_at, file_weight)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
            )?;
            for chunk in chunks {
                stmt.execute(params![
                    path,
                    chunk.heading,
                    chunk.content,
                    chunk.line_start,
                    chunk.line_end,
                    serde_json::to_string(&chunk.entities)?,
                    chunk.chunk_type.as_str(),
                    chunk.confidence,
                    created_at,
                    now,
                    file_weight,
                ])?;
            }
        }
        tx.execute(
            r#"INSERT INTO files (file_path, mtime_ms, chunk_count, indexed_at)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(file_path) DO UPDATE SET
                   mtime_ms = excluded.mtime_ms,
                   chunk_count = excluded.chunk_count,
                   indexed_at = excluded.indexed_at"#,
            params![path, mtime_ms, chunks.len() as i64, now],
        )?;
        tx.commit()?;
        Ok(chunks.len())
    }

    /// Run an FTS5 MATCH with the given filters, ordered by rank ascending
    /// (more negative = better). A malformed query surfaces as an error;
    /// retrieval callers treat that as an empty result set.
    ///
    /// Unless `skip_tracking` is set, every returned row gets
    /// `access_count += 1` and a fresh `last_accessed` in one transaction.
    /// This is the only feedback signal the index learns from queries.
    pub fn search(&mut self, query: &str, opts: &SearchOptions) -> Result<Vec<ScoredChunk>> {
        let mut sql = String::from(
            r#"SELECT c.id, c.file_path, c.heading, c.content, c.line_start, c.line_end,
                      c.entities, c.chunk_type, c.confidence, c.created_at, c.indexed_at,
                      c.file_weight, c.access_count, c.last_accessed, c.stale, c.embedding,
                      chunks_fts.rank
               FROM chunks_fts
               JOIN chunks c ON chunks_fts.rowid = c.id
               WHERE chunks_fts MATCH ?"#,
        );
        let mut binds: Vec<Box<dyn ToSql>> = vec![Box::new(query.to_string())];
        if !opts.include_stale {
            sql.push_str(" AND c.stale = 0");
        }
        if let Some(since) = opts.since {
            sql.push_str(" AND c.created_at >= ?");
            binds.push(Box::new(since));
        }
        if let Some(until) = opts.until {
            sql.push_str(" AND c.created_at < ?");
            binds.push(Box::new(until));
        }
        if let Some(ty) = opts.chunk_type {
            sql.push_str(" AND c.chunk_type = ?");
            binds.push(Box::new(ty.as_str().to_string()));
        }
        if let Some(min) = opts.min_confidence {
            sql.push_str(" AND c.confidence >= ?");
            binds.push(Box::new(min));
        }
        sql.push_str(" ORDER BY chunks_fts.rank LIMIT ?");
        binds.push(Box::new(opts.limit as i64));

        let results = {
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(
                params_from_iter(binds.iter().map(|b| b.as_ref() as &dyn ToSql)),
                |row| {
                    Ok(ScoredChunk {
                        chunk: chunk_from_row(row)?,
                        rank: row.get(16)?,
                    })
                },
            )?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        if !opts.skip_tracking && !results.is_empty() {
            self.track_access(&results.iter().map(|r| r.chunk.id).collect::<Vec<_>>())?;
        }

        Ok(results)
    }

    fn track_access(&mut self, ids: &[i64]) -> Result<()> {
        let now = now_ms();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE chunks SET access_count = access_count + 1, last_accessed = ?1 WHERE id = ?2",
            )?;
            for id in ids {
                stmt.execute(params![now, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Neighbors of the chunk whose span matches (`line_start`, `line_end`)
    /// exactly: up to `n` chunks before and `n` after, in file order.
    pub fn get_adjacent_chunks(
        &self,
        path: &str,
        line_start: u32,
        line_end: u32,
        n: usize,
    ) -> Result<Vec<Chunk>> {
        let all = self.chunks_for_file(path)?;
        let Some(pos) = all
            .iter()
            .position(|c| c.line_start == line_start && c.line_end == line_end)
        else {
            return Ok(vec![]);
        };
        let from = pos.saturating_sub(n);
        let to = (pos + n + 1).min(all.len());
        Ok(all[from..to]
            .iter()
            .filter(|c| c.id != all[pos].id)
            .cloned()
            .collect())
    }

    fn chunks_for_file(&self, path: &str) -> Result<Vec<Chunk>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CHUNK_COLUMNS} FROM chunks WHERE file_path = ?1 ORDER BY line_start"
        ))?;
        let rows = stmt.query_map([path], |row| chunk_from_row(row))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// All chunks whose `file_path` contains the given substring.
    pub fn get_chunks_by_file(&self, path_substring: &str) -> Result<Vec<Chunk>> {
        let pattern = format!("%{path_substring}%");
        let mut stmt = self.conn.prepare(&format!(
            "{CHUNK_COLUMNS} FROM chunks WHERE file_path LIKE ?1 ORDER BY file_path, line_start"
        ))?;
        let rows = stmt.query_map([pattern], |row| chunk_from_row(row))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn get_chunk(&self, id: i64) -> Result<Option<Chunk>> {
        self.conn
            .query_row(
                &format!("{CHUNK_COLUMNS} FROM chunks WHERE id = ?1"),
                [id],
                |row| chunk_from_row(row),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_all_file_paths(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT file_path FROM files ORDER BY file_path")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn get_stats(&self) -> Result<StoreStats> {
        let total_files: u64 =
            self.conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        let total_chunks: u64 =
            self.conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        let stale_chunks: u64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM chunks WHERE stale = 1", [], |r| r.get(0))?;
        let embedded_chunks: u64 = self.conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        let archived_chunks: u64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM archived_chunks", [], |r| r.get(0))?;
        let open_contradictions: u64 = self.conn.query_row(
            "SELECT COUNT(*) FROM contradictions WHERE resolved = 0",
            [],
            |r| r.get(0),
        )?;
        let last_indexed: Option<i64> =
            self.conn
                .query_row("SELECT MAX(indexed_at) FROM files", [], |r| r.get(0))?;

        let mut stmt = self
            .conn
            .prepare("SELECT chunk_type, COUNT(*) FROM chunks GROUP BY chunk_type ORDER BY 2 DESC")?;
        let chunks_by_type = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|(label, count)| {
                ChunkType::from_label(&label).map(|chunk_type| TypeCount { chunk_type, count })
            })
            .collect();

        let db_size_bytes = std::fs::metadata(&self.db_path).map_or(0, |m| m.len());

        Ok(StoreStats {
            total_files,
            total_chunks,
            stale_chunks,
            embedded_chunks,
            archived_chunks,
            open_contradictions,
            chunks_by_type,
            last_indexed,
            db_size_bytes,
        })
    }

    // ─── Reflect support ────────────────────────────────────────────────

    /// Every chunk, without embeddings, for the reflect passes.
    pub fn all_chunks(&self) -> Result<Vec<Chunk>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CHUNK_COLUMNS_NO_EMB} FROM chunks ORDER BY id"))?;
        let rows = stmt.query_map([], |row| chunk_from_row(row))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Apply a batch of confidence updates in one transaction.
    pub fn apply_confidence_updates(&mut self, updates: &[(i64, f64)]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE chunks SET confidence = ?1 WHERE id = ?2")?;
            for (id, conf) in updates {
                stmt.execute(params![conf, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Mark a batch of chunks stale in one transaction.
    pub fn mark_stale(&mut self, ids: &[i64]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE chunks SET stale = 1 WHERE id = ?1")?;
            for id in ids {
                stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn contradiction_exists(&self, old_id: i64, new_id: i64) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM contradictions WHERE chunk_id_old = ?1 AND chunk_id_new = ?2",
            params![old_id, new_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn record_contradiction(&mut self, old_id: i64, new_id: i64, reason: &str) -> Result<()> {
        self.conn.execute(
            r#"INSERT OR IGNORE INTO contradictions
               (chunk_id_old, chunk_id_new, reason, resolved, created_at)
               VALUES (?1, ?2, ?3, 0, ?4)"#,
            params![old_id, new_id, reason, now_ms()],
        )?;
        Ok(())
    }

    /// Insert a batch of contradictions in one transaction, ignoring pairs
    /// already recorded.
    pub fn record_contradictions(&mut self, rows: &[(i64, i64, String)]) -> Result<()> {
        let now = now_ms();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT OR IGNORE INTO contradictions
                   (chunk_id_old, chunk_id_new, reason, resolved, created_at)
                   VALUES (?1, ?2, ?3, 0, ?4)"#,
            )?;
            for (old_id, new_id, reason) in rows {
                stmt.execute(params![old_id, new_id, reason, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_contradiction(&self, id: i64) -> Result<Option<Contradiction>> {
        self.conn
            .query_row(
                "SELECT id, chunk_id_old, chunk_id_new, reason, resolved, created_at
                 FROM contradictions WHERE id = ?1",
                [id],
                |row| contradiction_from_row(row),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_contradictions(&self, include_resolved: bool) -> Result<Vec<Contradiction>> {
        let sql = if include_resolved {
            "SELECT id, chunk_id_old, chunk_id_new, reason, resolved, created_at
             FROM contradictions ORDER BY id"
        } else {
            "SELECT id, chunk_id_old, chunk_id_new, reason, resolved, created_at
             FROM contradictions WHERE resolved = 0 ORDER BY id"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| contradiction_from_row(row))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Contradictions touching any of the given chunk ids, unresolved only.
    pub fn contradictions_for_chunks(&self, ids: &[i64]) -> Result<Vec<Contradiction>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT id, chunk_id_old, chunk_id_new, reason, resolved, created_at
             FROM contradictions
             WHERE resolved = 0 AND (chunk_id_old IN ({placeholders}) OR chunk_id_new IN ({placeholders}))"
        );
        let mut binds: Vec<&dyn ToSql> = Vec::with_capacity(ids.len() * 2);
        for id in ids {
            binds.push(id);
        }
        for id in ids {
            binds.push(id);
        }
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(binds), |row| contradiction_from_row(row))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn mark_contradiction_resolved(&mut self, id: i64) -> Result<()> {
        self.conn
            .execute("UPDATE contradictions SET resolved = 1 WHERE id = ?1", [id])?;
        Ok(())
    }

    /// Demote a chunk to `outdated` at confidence 0.3 (loser of a resolution).
    pub fn demote_chunk(&mut self, id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE chunks SET chunk_type = 'outdated', confidence = 0.3 WHERE id = ?1",
            [id],
        )?;
        Ok(())
    }

    /// Archive and delete a batch of chunks, one transaction for the pass.
    pub fn prune_chunks(&mut self, prunes: &[(i64, String)]) -> Result<usize> {
        let now = now_ms();
        let tx = self.conn.transaction()?;
        let mut pruned = 0usize;
        {
            let mut copy = tx.prepare(
                r#"INSERT INTO archived_chunks
                   (file_path, heading, content, line_start, line_end, entities,
                    chunk_type, confidence, created_at, file_weight, access_count,
                    archived_at, archive_reason)
                   SELECT file_path, heading, content, line_start, line_end, entities,
                          chunk_type, confidence, created_at, file_weight, access_count,
                          ?2, ?3
                   FROM chunks WHERE id = ?1"#,
            )?;
            let mut del = tx.prepare("DELETE FROM chunks WHERE id = ?1")?;
            for (id, reason) in prunes {
                if copy.execute(params![id, now, reason])? > 0 {
                    del.execute([id])?;
                    pruned += 1;
                }
            }
        }
        tx.commit()?;
        Ok(pruned)
    }

    pub fn get_archived(&self, id: i64) -> Result<Option<ArchivedChunk>> {
        self.conn
            .query_row(
                r#"SELECT id, file_path, heading, content, line_start, line_end, entities,
                          chunk_type, confidence, created_at, file_weight, access_count,
                          archived_at, archive_reason
                   FROM archived_chunks WHERE id = ?1"#,
                [id],
                |row| archived_from_row(row),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_archived(&self, limit: usize) -> Result<Vec<ArchivedChunk>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT id, file_path, heading, content, line_start, line_end, entities,
                      chunk_type, confidence, created_at, file_weight, access_count,
                      archived_at, archive_reason
               FROM archived_chunks ORDER BY archived_at DESC LIMIT ?1"#,
        )?;
        let rows = stmt.query_map([limit as i64], |row| archived_from_row(row))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Materialize an archived chunk as a fresh, non-stale row and drop the
    /// archive entry. Returns the new chunk id.
    pub fn restore_chunk(&mut self, archive_id: i64) -> Result<Option<i64>> {
        let Some(arch) = self.get_archived(archive_id)? else {
            return Ok(None);
        };
        let now = now_ms();
        let tx = self.conn.transaction()?;
        tx.execute(
            r#"INSERT INTO chunks
               (file_path, heading, content, line_start, line_end, entities,
                chunk_type, confidence, created_at, indexed_at, file_weight,
                access_count, stale)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0)"#,
            params![
                arch.file_path,
                arch.heading,
                arch.content,
                arch.line_start,
                arch.line_end,
                serde_json::to_string(&arch.entities)?,
                arch.chunk_type.as_str(),
                arch.confidence,
                arch.created_at,
                now,
                arch.file_weight,
                arch.access_count,
            ],
        )?;
        let new_id = tx.last_insert_rowid();
        tx.execute("DELETE FROM archived_chunks WHERE id = ?1", [archive_id])?;
        tx.commit()?;
        Ok(Some(new_id))
    }

    // ─── Embedding support ──────────────────────────────────────────────

    /// Ids and content of non-stale chunks still awaiting an embedding.
    pub fn chunks_missing_embedding(&self, limit: usize) -> Result<Vec<(i64, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, content FROM chunks
             WHERE embedding IS NULL AND stale = 0 ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| Ok((row.get(0)?, row.get(1)?)))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn store_embedding(&mut self, id: i64, vector: &[f32]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(vector);
        self.conn
            .execute("UPDATE chunks SET embedding = ?1 WHERE id = ?2", params![bytes, id])?;
        Ok(())
    }

    /// Every embedded, non-stale chunk's (id, vector), for the linear
    /// rescue scan.
    pub fn embedded_vectors(&self) -> Result<Vec<(i64, Vec<f32>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, embedding FROM chunks WHERE embedding IS NOT NULL AND stale = 0")?;
        let rows = stmt.query_map([], |row| {
            let id: i64 = row.get(0)?;
            let bytes: Vec<u8> = row.get(1)?;
            Ok((id, bytes))
        })?;
        Ok(rows
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(id, bytes)| (id, bytemuck::pod_collect_to_vec::<u8, f32>(&bytes)))
            .collect())
    }

    // ─── Entity index support ───────────────────────────────────────────

    /// (chunk id, entity labels, created_at) of every non-stale chunk with
    /// a non-empty entity list.
    pub fn entity_rows(&self) -> Result<Vec<(i64, Vec<String>, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entities, created_at FROM chunks WHERE stale = 0 AND entities != '[]'",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        Ok(rows
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(id, json, created)| {
                let labels: Vec<String> = serde_json::from_str(&json).unwrap_or_default();
                (id, labels, created)
            })
            .collect())
    }

    /// Replace the entity index atomically.
    pub fn replace_entity_index(&mut self, records: &[EntityRecord]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM entity_index", [])?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO entity_index (entity, chunk_ids, co_entities, mention_count, last_seen)
                   VALUES (?1, ?2, ?3, ?4, ?5)"#,
            )?;
            for rec in records {
                stmt.execute(params![
                    rec.entity,
                    serde_json::to_string(&rec.chunk_ids)?,
                    serde_json::to_string(&rec.co_entities)?,
                    rec.mention_count,
                    rec.last_seen,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn get_entity(&self, name: &str) -> Result<Option<EntityRecord>> {
        self.conn
            .query_row(
                "SELECT entity, chunk_ids, co_entities, mention_count, last_seen
                 FROM entity_index WHERE entity = ?1",
                [name],
                |row| entity_from_row(row),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_entities(&self, limit: usize) -> Result<Vec<EntityRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT entity, chunk_ids, co_entities, mention_count, last_seen
             FROM entity_index ORDER BY mention_count DESC, entity LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| entity_from_row(row))?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// FTS external-content integrity check; errors if the mirror drifted.
    #[cfg(test)]
    pub fn fts_integrity_check(&self) -> Result<()> {
        self.conn
            .execute("INSERT INTO chunks_fts(chunks_fts) VALUES('integrity-check')", [])?;
        Ok(())
    }
}

const CHUNK_COLUMNS: &str = "SELECT id, file_path, heading, content, line_start, line_end, \
     entities, chunk_type, confidence, created_at, indexed_at, file_weight, \
     access_count, last_accessed, stale, embedding";

const CHUNK_COLUMNS_NO_EMB: &str = "SELECT id, file_path, heading, content, line_start, line_end, \
     entities, chunk_type, confidence, created_at, indexed_at, file_weight, \
     access_count, last_accessed, stale, NULL";

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn chunk_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let entities_json: String = row.get(6)?;
    let type_label: String = row.get(7)?;
    let embedding: Option<Vec<u8>> = row.get(15)?;
    Ok(Chunk {
        id: row.get(0)?,
        file_path: row.get(1)?,
        heading: row.get(2)?,
        content: row.get(3)?,
        line_start: row.get(4)?,
        line_end: row.get(5)?,
        entities: serde_json::from_str(&entities_json).unwrap_or_default(),
        chunk_type: ChunkType::from_label(&type_label).unwrap_or(ChunkType::Raw),
        confidence: row.get(8)?,
        created_at: row.get(9)?,
        indexed_at: row.get(10)?,
        file_weight: row.get(11)?,
        access_count: row.get(12)?,
        last_accessed: row.get(13)?,
        stale: row.get::<_, i64>(14)? != 0,
        embedding: embedding.map(|bytes| bytemuck::pod_collect_to_vec::<u8, f32>(&bytes)),
    })
}

fn contradiction_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contradiction> {
    Ok(Contradiction {
        id: row.get(0)?,
        chunk_id_old: row.get(1)?,
        chunk_id_new: row.get(2)?,
        reason: row.get(3)?,
        resolved: row.get::<_, i64>(4)? != 0,
        created_at: row.get(5)?,
    })
}

fn archived_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArchivedChunk> {
    let entities_json: String = row.get(6)?;
    let type_label: String = row.get(7)?;
    Ok(ArchivedChunk {
        id: row.get(0)?,
        file_path: row.get(1)?,
        heading: row.get(2)?,
        content: row.get(3)?,
        line_start: row.get(4)?,
        line_end: row.get(5)?,
        entities: serde_json::from_str(&entities_json).unwrap_or_default(),
        chunk_type: ChunkType::from_label(&type_label).unwrap_or(ChunkType::Raw),
        confidence: row.get(8)?,
        created_at: row.get(9)?,
        file_weight: row.get(10)?,
        access_count: row.get(11)?,
        archived_at: row.get(12)?,
        archive_reason: row.get(13)?,
    })
}

fn entity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityRecord> {
    let chunk_ids_json: String = row.get(1)?;
    let co_json: String = row.get(2)?;
    Ok(EntityRecord {
        entity: row.get(0)?,
        chunk_ids: serde_json::from_str(&chunk_ids_json).unwrap_or_default(),
        co_entities: serde_json::from_str(&co_json).unwrap_or_default(),
        mention_count: row.get(3)?,
        last_seen: row.get(4)?,
    })
}
