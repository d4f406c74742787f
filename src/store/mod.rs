//! Metadata store backed by an embedded SQLite database
//!
//! Durable, transactional storage for all non-vector state: documents,
//! chunks, content metadata and the singleton system info row. The store is
//! the authoritative mapping from embedding ids to chunk and document rows;
//! the vector index holds only vectors and labels.
//!
//! Writes are serialized through a single connection. Higher layers never
//! share a connection across processes.

mod system_info;

pub use system_info::{
    ContentType, Mode, ModelKind, RerankStrategy, SystemInfo, SystemInfoUpdate,
};

use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{RagError, Result};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS system_info (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    mode TEXT NOT NULL,
    model_name TEXT NOT NULL,
    model_type TEXT NOT NULL,
    model_dimensions INTEGER NOT NULL,
    model_version TEXT,
    supported_content_types TEXT NOT NULL,
    reranking_strategy TEXT NOT NULL,
    reranking_model TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    content_id TEXT
);

CREATE TABLE IF NOT EXISTS chunks (
    embedding_id TEXT PRIMARY KEY,
    document_id INTEGER NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    content TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    content_type TEXT NOT NULL DEFAULT 'text',
    UNIQUE (document_id, chunk_index)
);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);

CREATE TABLE IF NOT EXISTS content_metadata (
    id TEXT PRIMARY KEY,
    storage_type TEXT NOT NULL,
    original_path TEXT,
    content_path TEXT,
    display_name TEXT NOT NULL,
    content_type TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    content_hash TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_journal (
    embedding_id TEXT PRIMARY KEY
);
"#;

/// A chunk joined with its owning document
#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub embedding_id: String,
    pub document_id: i64,
    pub content: String,
    pub chunk_index: usize,
    pub content_type: ContentType,
    pub source: String,
    pub title: String,
    pub document_content_id: Option<String>,
}

/// A chunk about to be inserted alongside its document
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub embedding_id: String,
    pub content: String,
    pub chunk_index: usize,
    pub content_type: ContentType,
}

/// Where a piece of binary content physically lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Filesystem,
    ContentDir,
    Inline,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Filesystem => "filesystem",
            StorageType::ContentDir => "content_dir",
            StorageType::Inline => "inline",
        }
    }
}

impl FromStr for StorageType {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "filesystem" => Ok(StorageType::Filesystem),
            "content_dir" => Ok(StorageType::ContentDir),
            "inline" => Ok(StorageType::Inline),
            other => Err(RagError::config(format!(
                "unknown storage type '{other}'"
            ))),
        }
    }
}

/// A content metadata row
#[derive(Debug, Clone)]
pub struct ContentMetadataRow {
    pub id: String,
    pub storage_type: StorageType,
    pub original_path: Option<String>,
    pub content_path: Option<String>,
    pub display_name: String,
    pub content_type: String,
    pub file_size: u64,
    pub content_hash: String,
    pub created_at: String,
}

/// Options for [`MetadataStore::reset_store`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ResetStoreOptions {
    pub preserve_system_info: bool,
    pub run_vacuum: bool,
}

/// Row counts removed by a reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetCounts {
    pub documents: usize,
    pub chunks: usize,
    pub content: usize,
}

/// Durable metadata store over a single SQLite file
#[derive(Debug)]
pub struct MetadataStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl MetadataStore {
    /// Open (or create) the store at `path` and apply the schema.
    ///
    /// Fails with a store error when the file exists but is not a valid
    /// database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RagError::io(parent, e.to_string()))?;
            }
        }

        let conn = Connection::open(path).map_err(|e| RagError::Store {
            message: format!(
                "could not open the store at {}: {e}. Check the path is writable \
                 and points to a raglite store",
                path.display()
            ),
            source: None,
        })?;

        // A garbage file opens fine but fails on first read. Probe before
        // applying the schema so corruption surfaces as one clear error.
        conn.query_row("SELECT count(*) FROM sqlite_master", [], |row| {
            row.get::<_, i64>(0)
        })
        .map_err(|_| RagError::Store {
            message: format!(
                "the file at {} is not a valid store; move it aside or pick \
                 another data directory, then re-ingest",
                path.display()
            ),
            source: None,
        })?;

        conn.pragma_update(None, "foreign_keys", "ON")?;

        let store = Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        };
        store.initialize_schema()?;
        debug!("store opened at {}", path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply the schema. Safe to call any number of times.
    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // === Documents ===

    pub fn insert_document(&self, source: &str, title: &str) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO documents (source, title) VALUES (?1, ?2)",
            params![source, title],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert or update a document, preserving the existing id on conflict.
    pub fn upsert_document(&self, source: &str, title: &str) -> Result<i64> {
        self.upsert_document_with_content(source, title, None)
    }

    pub fn upsert_document_with_content(
        &self,
        source: &str,
        title: &str,
        content_id: Option<&str>,
    ) -> Result<i64> {
        let conn = self.lock();
        upsert_document_inner(&conn, source, title, content_id)
    }

    pub fn get_document_id(&self, source: &str) -> Result<Option<i64>> {
        let conn = self.lock();
        Ok(conn
            .query_row(
                "SELECT id FROM documents WHERE source = ?1",
                params![source],
                |row| row.get(0),
            )
            .optional()?)
    }

    // === Chunks ===

    pub fn insert_chunk(
        &self,
        embedding_id: &str,
        document_id: i64,
        content: &str,
        chunk_index: usize,
        content_type: ContentType,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO chunks (embedding_id, document_id, content, chunk_index, content_type) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                embedding_id,
                document_id,
                content,
                chunk_index as i64,
                content_type.as_str()
            ],
        )?;
        Ok(())
    }

    /// Upsert a document and insert its chunks and journal entries in one
    /// transaction. Storage must commit before the vectors become
    /// searchable, so the journal rows ride along here.
    pub fn insert_document_chunks(
        &self,
        source: &str,
        title: &str,
        content_id: Option<&str>,
        chunks: &[NewChunk],
    ) -> Result<(i64, usize)> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let document_id = upsert_document_inner(&tx, source, title, content_id)?;
        // Re-ingesting a document replaces its chunk set.
        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?1",
            params![document_id],
        )?;
        let mut inserted = 0;
        for chunk in chunks {
            tx.execute(
                "INSERT INTO chunks (embedding_id, document_id, content, chunk_index, content_type) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    chunk.embedding_id,
                    document_id,
                    chunk.content,
                    chunk.chunk_index as i64,
                    chunk.content_type.as_str()
                ],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO sync_journal (embedding_id) VALUES (?1)",
                params![chunk.embedding_id],
            )?;
            inserted += 1;
        }
        tx.commit()?;
        Ok((document_id, inserted))
    }

    /// Load joined chunk+document rows for the given embedding ids. Input
    /// order is not preserved; callers reorder against their own id list.
    pub fn get_chunks_by_embedding_ids(&self, ids: &[String]) -> Result<Vec<ChunkRow>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT c.embedding_id, c.document_id, c.content, c.chunk_index, c.content_type, \
                    d.source, d.title, d.content_id \
             FROM chunks c JOIN documents d ON d.id = c.document_id \
             WHERE c.embedding_id IN ({placeholders})"
        );
        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), row_to_chunk)?;
        let mut out = Vec::with_capacity(ids.len());
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// All chunks in the store, ordered by document then chunk index.
    /// Used by index rebuilds.
    pub fn all_chunks(&self) -> Result<Vec<ChunkRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT c.embedding_id, c.document_id, c.content, c.chunk_index, c.content_type, \
                    d.source, d.title, d.content_id \
             FROM chunks c JOIN documents d ON d.id = c.document_id \
             ORDER BY c.document_id, c.chunk_index",
        )?;
        let rows = stmt.query_map([], row_to_chunk)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn delete_chunk(&self, embedding_id: &str) -> Result<bool> {
        let conn = self.lock();
        let deleted = conn.execute(
            "DELETE FROM chunks WHERE embedding_id = ?1",
            params![embedding_id],
        )?;
        Ok(deleted > 0)
    }

    pub fn count_documents(&self) -> Result<usize> {
        let conn = self.lock();
        let n: i64 = conn.query_row("SELECT count(*) FROM documents", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn count_chunks(&self) -> Result<usize> {
        let conn = self.lock();
        let n: i64 = conn.query_row("SELECT count(*) FROM chunks", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn has_data(&self) -> Result<bool> {
        Ok(self.count_chunks()? > 0)
    }

    // === System info ===

    /// Read the singleton system info row. Unknown enum values make the row
    /// unusable and are reported as absent; a malformed content type list
    /// falls back to the model family's default rather than surfacing the
    /// corruption.
    pub fn get_system_info(&self) -> Result<Option<SystemInfo>> {
        let conn = self.lock();
        let raw = conn
            .query_row(
                "SELECT mode, model_name, model_type, model_dimensions, model_version, \
                        supported_content_types, reranking_strategy, reranking_model, \
                        created_at, updated_at \
                 FROM system_info WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, String>(9)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            mode,
            model_name,
            model_type,
            dimensions,
            model_version,
            content_types_json,
            strategy,
            reranking_model,
            created_at,
            updated_at,
        )) = raw
        else {
            return Ok(None);
        };

        let (Ok(mode), Ok(model_kind), Ok(reranking_strategy)) = (
            Mode::from_str(&mode),
            ModelKind::from_str(&model_type),
            RerankStrategy::from_str(&strategy),
        ) else {
            warn!("system info row holds unrecognized values; treating it as absent");
            return Ok(None);
        };

        let supported_content_types = serde_json::from_str::<Vec<ContentType>>(
            &content_types_json,
        )
        .unwrap_or_else(|_| {
            warn!("stored content type list did not parse; using the model family default");
            default_content_types(model_kind)
        });

        Ok(Some(SystemInfo {
            mode,
            model_name,
            model_kind,
            model_dimensions: dimensions.max(0) as usize,
            model_version,
            supported_content_types,
            reranking_strategy,
            reranking_model,
            created_at,
            updated_at,
        }))
    }

    /// Merge a partial update over the persisted row, validate the result,
    /// and write it back. Creating the row requires at least mode, model
    /// name, model type and dimensions.
    pub fn set_system_info(&self, update: SystemInfoUpdate) -> Result<SystemInfo> {
        let existing = self.get_system_info()?;
        let now = Utc::now().to_rfc3339();

        let merged = match existing {
            Some(current) => SystemInfo {
                mode: update.mode.unwrap_or(current.mode),
                model_name: update.model_name.unwrap_or(current.model_name),
                model_kind: update.model_kind.unwrap_or(current.model_kind),
                model_dimensions: update.model_dimensions.unwrap_or(current.model_dimensions),
                model_version: update.model_version.or(current.model_version),
                supported_content_types: update
                    .supported_content_types
                    .unwrap_or(current.supported_content_types),
                reranking_strategy: update
                    .reranking_strategy
                    .unwrap_or(current.reranking_strategy),
                reranking_model: update.reranking_model.or(current.reranking_model),
                created_at: current.created_at,
                updated_at: now,
            },
            None => {
                let mode = update.mode.ok_or_else(|| {
                    RagError::config("cannot create system info without a mode")
                })?;
                let model_kind = update.model_kind.ok_or_else(|| {
                    RagError::config("cannot create system info without a model type")
                })?;
                SystemInfo {
                    mode,
                    model_name: update.model_name.ok_or_else(|| {
                        RagError::config("cannot create system info without a model name")
                    })?,
                    model_kind,
                    model_dimensions: update.model_dimensions.ok_or_else(|| {
                        RagError::config("cannot create system info without model dimensions")
                    })?,
                    model_version: update.model_version,
                    supported_content_types: update
                        .supported_content_types
                        .unwrap_or_else(|| default_content_types(model_kind)),
                    reranking_strategy: update.reranking_strategy.unwrap_or(match mode {
                        Mode::Text => RerankStrategy::CrossEncoder,
                        Mode::Multimodal => RerankStrategy::TextDerived,
                    }),
                    reranking_model: update.reranking_model,
                    created_at: now.clone(),
                    updated_at: now,
                }
            }
        };

        merged.validate()?;

        let content_types_json = serde_json::to_string(&merged.supported_content_types)
            .map_err(|e| RagError::store(format!("could not encode content types: {e}")))?;

        let conn = self.lock();
        conn.execute(
            "INSERT INTO system_info (id, mode, model_name, model_type, model_dimensions, \
                                      model_version, supported_content_types, \
                                      reranking_strategy, reranking_model, created_at, updated_at) \
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(id) DO UPDATE SET \
                 mode = excluded.mode, \
                 model_name = excluded.model_name, \
                 model_type = excluded.model_type, \
                 model_dimensions = excluded.model_dimensions, \
                 model_version = excluded.model_version, \
                 supported_content_types = excluded.supported_content_types, \
                 reranking_strategy = excluded.reranking_strategy, \
                 reranking_model = excluded.reranking_model, \
                 updated_at = excluded.updated_at",
            params![
                merged.mode.as_str(),
                merged.model_name,
                merged.model_kind.as_str(),
                merged.model_dimensions as i64,
                merged.model_version,
                content_types_json,
                merged.reranking_strategy.as_str(),
                merged.reranking_model,
                merged.created_at,
                merged.updated_at,
            ],
        )?;
        Ok(merged)
    }

    /// Model name and dimensions of the persisted corpus, read leniently so
    /// a compatibility check still works over a row with unknown enums.
    pub fn get_stored_model_info(&self) -> Result<Option<(String, usize)>> {
        let conn = self.lock();
        let raw = conn
            .query_row(
                "SELECT model_name, model_dimensions FROM system_info WHERE id = 1",
                [],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(raw.map(|(name, dims)| (name, dims.max(0) as usize)))
    }

    pub fn set_stored_model_info(
        &self,
        model_name: &str,
        dimensions: usize,
        model_kind: ModelKind,
    ) -> Result<()> {
        let mode = match model_kind {
            ModelKind::SentenceTransformer => Mode::Text,
            ModelKind::Clip => Mode::Multimodal,
        };
        // A mode switch may invalidate the persisted strategy; carry it
        // over only while it stays permitted.
        let reranking_strategy = match self.get_system_info()? {
            Some(info)
                if RerankStrategy::permitted_for(mode).contains(&info.reranking_strategy) =>
            {
                info.reranking_strategy
            }
            _ => match mode {
                Mode::Text => RerankStrategy::CrossEncoder,
                Mode::Multimodal => RerankStrategy::TextDerived,
            },
        };
        self.set_system_info(SystemInfoUpdate {
            mode: Some(mode),
            model_name: Some(model_name.to_string()),
            model_kind: Some(model_kind),
            model_dimensions: Some(dimensions),
            supported_content_types: Some(default_content_types(model_kind)),
            reranking_strategy: Some(reranking_strategy),
            ..Default::default()
        })?;
        Ok(())
    }

    // === Reset ===

    /// Delete all documents, chunks and content rows in one transaction.
    pub fn reset_store(&self, options: ResetStoreOptions) -> Result<ResetCounts> {
        let counts = {
            let mut conn = self.lock();
            let tx = conn.transaction()?;
            let documents: i64 =
                tx.query_row("SELECT count(*) FROM documents", [], |row| row.get(0))?;
            let chunks: i64 = tx.query_row("SELECT count(*) FROM chunks", [], |row| row.get(0))?;
            let content: i64 =
                tx.query_row("SELECT count(*) FROM content_metadata", [], |row| row.get(0))?;

            tx.execute("DELETE FROM chunks", [])?;
            tx.execute("DELETE FROM documents", [])?;
            tx.execute("DELETE FROM content_metadata", [])?;
            tx.execute("DELETE FROM sync_journal", [])?;
            if !options.preserve_system_info {
                tx.execute("DELETE FROM system_info", [])?;
            }
            tx.commit()?;

            ResetCounts {
                documents: documents as usize,
                chunks: chunks as usize,
                content: content as usize,
            }
        };

        if options.run_vacuum {
            let conn = self.lock();
            conn.execute_batch("VACUUM")?;
        }
        Ok(counts)
    }

    // === Sync journal ===

    pub fn journal_add(&self, embedding_ids: &[String]) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for id in embedding_ids {
            tx.execute(
                "INSERT OR IGNORE INTO sync_journal (embedding_id) VALUES (?1)",
                params![id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn journal_clear(&self) -> Result<()> {
        let conn = self.lock();
        conn.execute("DELETE FROM sync_journal", [])?;
        Ok(())
    }

    pub fn journal_ids(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT embedding_id FROM sync_journal")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // === Content metadata ===

    /// Record content metadata, deduplicating on the content hash. Returns
    /// the id of the new or the already-present row.
    pub fn insert_content_metadata(&self, meta: &ContentMetadataRow) -> Result<String> {
        let conn = self.lock();
        if let Some(existing) = conn
            .query_row(
                "SELECT id FROM content_metadata WHERE content_hash = ?1",
                params![meta.content_hash],
                |row| row.get::<_, String>(0),
            )
            .optional()?
        {
            debug!("content {} already stored, reusing {}", meta.content_hash, existing);
            return Ok(existing);
        }
        conn.execute(
            "INSERT INTO content_metadata (id, storage_type, original_path, content_path, \
                                           display_name, content_type, file_size, content_hash, \
                                           created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                meta.id,
                meta.storage_type.as_str(),
                meta.original_path,
                meta.content_path,
                meta.display_name,
                meta.content_type,
                meta.file_size as i64,
                meta.content_hash,
                meta.created_at,
            ],
        )?;
        Ok(meta.id.clone())
    }

    pub fn get_content_metadata(&self, id: &str) -> Result<Option<ContentMetadataRow>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT id, storage_type, original_path, content_path, display_name, \
                        content_type, file_size, content_hash, created_at \
                 FROM content_metadata WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;
        let Some((
            id,
            storage_type,
            original_path,
            content_path,
            display_name,
            content_type,
            file_size,
            content_hash,
            created_at,
        )) = row
        else {
            return Ok(None);
        };
        Ok(Some(ContentMetadataRow {
            id,
            storage_type: StorageType::from_str(&storage_type)
                .unwrap_or(StorageType::ContentDir),
            original_path,
            content_path,
            display_name,
            content_type,
            file_size: file_size.max(0) as u64,
            content_hash,
            created_at,
        }))
    }
}

fn upsert_document_inner(
    conn: &Connection,
    source: &str,
    title: &str,
    content_id: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO documents (source, title, content_id) VALUES (?1, ?2, ?3) \
         ON CONFLICT(source) DO UPDATE SET \
             title = excluded.title, \
             content_id = COALESCE(excluded.content_id, documents.content_id)",
        params![source, title, content_id],
    )?;
    let id = conn.query_row(
        "SELECT id FROM documents WHERE source = ?1",
        params![source],
        |row| row.get(0),
    )?;
    Ok(id)
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkRow> {
    let content_type: String = row.get(4)?;
    Ok(ChunkRow {
        embedding_id: row.get(0)?,
        document_id: row.get(1)?,
        content: row.get(2)?,
        chunk_index: row.get::<_, i64>(3)?.max(0) as usize,
        content_type: ContentType::from_str(&content_type).unwrap_or(ContentType::Text),
        source: row.get(5)?,
        title: row.get(6)?,
        document_content_id: row.get(7)?,
    })
}

fn default_content_types(kind: ModelKind) -> Vec<ContentType> {
    match kind {
        ModelKind::SentenceTransformer => vec![ContentType::Text],
        ModelKind::Clip => vec![ContentType::Text, ContentType::Image],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> MetadataStore {
        MetadataStore::open(&dir.path().join("metadata.db")).unwrap()
    }

    fn text_chunk(id: &str, index: usize) -> NewChunk {
        NewChunk {
            embedding_id: id.to_string(),
            content: format!("chunk {index}"),
            chunk_index: index,
            content_type: ContentType::Text,
        }
    }

    #[test]
    fn test_schema_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store.initialize_schema().unwrap();
        store.initialize_schema().unwrap();
        assert!(!store.has_data().unwrap());
    }

    #[test]
    fn test_open_rejects_garbage_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.db");
        std::fs::write(&path, "not a valid store").unwrap();
        let err = MetadataStore::open(&path).unwrap_err();
        assert!(matches!(err, RagError::Store { .. }));
        assert!(err.to_string().contains("not a valid store"));
    }

    #[test]
    fn test_upsert_preserves_document_id() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let first = store.upsert_document("docs/a.md", "a").unwrap();
        let second = store.upsert_document("docs/a.md", "a (renamed)").unwrap();
        assert_eq!(first, second);
        assert_eq!(store.count_documents().unwrap(), 1);
    }

    #[test]
    fn test_chunk_unique_constraints() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let doc = store.upsert_document("docs/a.md", "a").unwrap();
        store
            .insert_chunk("emb-1", doc, "hello", 0, ContentType::Text)
            .unwrap();
        // Duplicate embedding id
        assert!(store
            .insert_chunk("emb-1", doc, "hello", 1, ContentType::Text)
            .is_err());
        // Duplicate (document, chunk_index)
        assert!(store
            .insert_chunk("emb-2", doc, "hello", 0, ContentType::Text)
            .is_err());
    }

    #[test]
    fn test_insert_document_chunks_journals_and_replaces() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let chunks = vec![text_chunk("emb-1", 0), text_chunk("emb-2", 1)];
        let (doc_id, inserted) = store
            .insert_document_chunks("docs/a.md", "a", None, &chunks)
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(store.journal_ids().unwrap().len(), 2);

        // Re-ingesting the same document replaces its chunks
        let replacement = vec![text_chunk("emb-3", 0)];
        let (doc_id2, _) = store
            .insert_document_chunks("docs/a.md", "a", None, &replacement)
            .unwrap();
        assert_eq!(doc_id, doc_id2);
        assert_eq!(store.count_chunks().unwrap(), 1);

        store.journal_clear().unwrap();
        assert!(store.journal_ids().unwrap().is_empty());
    }

    #[test]
    fn test_get_chunks_by_embedding_ids_joins_documents() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store
            .insert_document_chunks(
                "docs/a.md",
                "Title A",
                None,
                &[text_chunk("emb-1", 0), text_chunk("emb-2", 1)],
            )
            .unwrap();

        let rows = store
            .get_chunks_by_embedding_ids(&["emb-2".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].embedding_id, "emb-2");
        assert_eq!(rows[0].source, "docs/a.md");
        assert_eq!(rows[0].title, "Title A");
        assert_eq!(rows[0].chunk_index, 1);
    }

    #[test]
    fn test_system_info_partial_update() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        assert!(store.get_system_info().unwrap().is_none());

        store
            .set_system_info(SystemInfoUpdate {
                mode: Some(Mode::Text),
                model_name: Some("all-minilm-l6-v2".to_string()),
                model_kind: Some(ModelKind::SentenceTransformer),
                model_dimensions: Some(384),
                ..Default::default()
            })
            .unwrap();

        let info = store.get_system_info().unwrap().unwrap();
        assert_eq!(info.mode, Mode::Text);
        assert_eq!(info.reranking_strategy, RerankStrategy::CrossEncoder);
        assert_eq!(info.supported_content_types, vec![ContentType::Text]);
        let created = info.created_at.clone();

        // Partial update keeps unspecified fields
        store
            .set_system_info(SystemInfoUpdate {
                reranking_strategy: Some(RerankStrategy::Disabled),
                ..Default::default()
            })
            .unwrap();
        let info = store.get_system_info().unwrap().unwrap();
        assert_eq!(info.model_name, "all-minilm-l6-v2");
        assert_eq!(info.reranking_strategy, RerankStrategy::Disabled);
        assert_eq!(info.created_at, created);
    }

    #[test]
    fn test_system_info_rejects_inconsistent_write() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        // clip with 384 dimensions violates the consistency rule
        let err = store
            .set_system_info(SystemInfoUpdate {
                mode: Some(Mode::Multimodal),
                model_name: Some("clip-vit-b-32".to_string()),
                model_kind: Some(ModelKind::Clip),
                model_dimensions: Some(384),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, RagError::Config { .. }));
        assert!(store.get_system_info().unwrap().is_none());
    }

    #[test]
    fn test_reset_store_counts_and_preserves_system_info() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store
            .set_system_info(SystemInfoUpdate {
                mode: Some(Mode::Text),
                model_name: Some("all-minilm-l6-v2".to_string()),
                model_kind: Some(ModelKind::SentenceTransformer),
                model_dimensions: Some(384),
                ..Default::default()
            })
            .unwrap();
        store
            .insert_document_chunks("docs/a.md", "a", None, &[text_chunk("emb-1", 0)])
            .unwrap();

        let counts = store
            .reset_store(ResetStoreOptions {
                preserve_system_info: true,
                run_vacuum: true,
            })
            .unwrap();
        assert_eq!(
            counts,
            ResetCounts {
                documents: 1,
                chunks: 1,
                content: 0
            }
        );
        assert!(!store.has_data().unwrap());
        assert!(store.get_system_info().unwrap().is_some());

        // Without preservation the singleton goes too
        let counts = store.reset_store(ResetStoreOptions::default()).unwrap();
        assert_eq!(counts.documents, 0);
        assert!(store.get_system_info().unwrap().is_none());
    }

    #[test]
    fn test_stored_model_switch_realigns_strategy() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store
            .set_stored_model_info("all-minilm-l6-v2", 384, ModelKind::SentenceTransformer)
            .unwrap();
        assert_eq!(
            store.get_system_info().unwrap().unwrap().reranking_strategy,
            RerankStrategy::CrossEncoder
        );

        // Switching to clip must not carry the text-only strategy along
        store
            .set_stored_model_info("clip-vit-b-32", 512, ModelKind::Clip)
            .unwrap();
        let info = store.get_system_info().unwrap().unwrap();
        assert_eq!(info.mode, Mode::Multimodal);
        assert_eq!(info.reranking_strategy, RerankStrategy::TextDerived);
        assert_eq!(store.get_stored_model_info().unwrap().unwrap().1, 512);
    }

    #[test]
    fn test_content_metadata_dedupes_on_hash() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let meta = ContentMetadataRow {
            id: "content-1".to_string(),
            storage_type: StorageType::ContentDir,
            original_path: None,
            content_path: Some("content/ab/abcd".to_string()),
            display_name: "notes.md".to_string(),
            content_type: "text/markdown".to_string(),
            file_size: 42,
            content_hash: "abcd".to_string(),
            created_at: "2025-01-01T00:00:00Z".to_string(),
        };
        assert_eq!(store.insert_content_metadata(&meta).unwrap(), "content-1");

        let mut duplicate = meta.clone();
        duplicate.id = "content-2".to_string();
        // Same bytes, same hash: the original id comes back
        assert_eq!(store.insert_content_metadata(&duplicate).unwrap(), "content-1");

        let fetched = store.get_content_metadata("content-1").unwrap().unwrap();
        assert_eq!(fetched.display_name, "notes.md");
        assert_eq!(fetched.file_size, 42);
    }
}
