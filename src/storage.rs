use rusqlite::{params, OptionalExtension};
use anyhow::{Result, Context, bail};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use r2d2_sqlite::SqliteConnectionManager;
use r2d2::Pool;
use crate::model::{KbType, KnowledgeEntry, RatedExample, Rating};

// Validation constants
const MAX_ID_LENGTH: usize = 128;
const MAX_TITLE_LENGTH: usize = 512;
const MAX_CONTENT_LENGTH: usize = 16384;
const MAX_TAG_LENGTH: usize = 128;

/// Title prefix length used for near-duplicate detection
pub const DUPLICATE_PREFIX_LEN: usize = 40;

/// Validate id/org id (no control characters, bounded length)
fn validate_id(id: &str, field: &str) -> Result<()> {
    if id.is_empty() {
        bail!("{} cannot be empty", field);
    }
    if id.len() > MAX_ID_LENGTH {
        bail!("{} too long (max {} chars)", field, MAX_ID_LENGTH);
    }
    if id.chars().any(|c| c.is_control() || c == '\0') {
        bail!("{} contains invalid characters", field);
    }
    Ok(())
}

/// Validate title text
fn validate_title(title: &str) -> Result<()> {
    if title.is_empty() {
        bail!("Title cannot be empty");
    }
    if title.len() > MAX_TITLE_LENGTH {
        bail!("Title too long (max {} chars)", MAX_TITLE_LENGTH);
    }
    if title.contains('\0') {
        bail!("Title contains null bytes");
    }
    Ok(())
}

/// Validate entry content
fn validate_content(content: &str) -> Result<()> {
    if content.len() > MAX_CONTENT_LENGTH {
        bail!("Content too long (max {} chars)", MAX_CONTENT_LENGTH);
    }
    if content.contains('\0') {
        bail!("Content contains null bytes");
    }
    Ok(())
}

/// Validate a single tag (namespace prefixes like "keyword:" are advisory)
fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        bail!("Tag cannot be empty");
    }
    if tag.len() > MAX_TAG_LENGTH {
        bail!("Tag too long (max {} chars)", MAX_TAG_LENGTH);
    }
    if tag.chars().any(|c| c.is_control() || c == '\0') {
        bail!("Tag contains invalid characters");
    }
    Ok(())
}

fn validate_entry(entry: &KnowledgeEntry) -> Result<()> {
    validate_id(&entry.id, "Entry id")?;
    validate_id(&entry.org_id, "Organization id")?;
    validate_title(&entry.title)?;
    validate_content(&entry.content)?;
    for tag in &entry.tags {
        validate_tag(tag)?;
    }
    Ok(())
}

/// Build SQL placeholders for IN queries (?1, ?2, ?3, ...)
/// offset: starting placeholder number
fn build_placeholders(count: usize, offset: usize) -> String {
    (offset..offset + count)
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validate database file path
fn validate_db_path(path: &Path) -> Result<()> {
    // Check file extension FIRST (before any filesystem operations)
    if let Some(ext) = path.extension() {
        if ext != "db" {
            bail!("Invalid database file extension (must be .db)");
        }
    } else {
        bail!("Database path must have .db extension");
    }
    Ok(())
}

/// Current wall-clock time in unix millis
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

const SCHEMA: &str = r#"
-- Knowledge base entries, scoped per organization
CREATE TABLE IF NOT EXISTS knowledge_entries (
    id TEXT NOT NULL,
    org_id TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    category TEXT NOT NULL,
    tags TEXT NOT NULL,
    kb_type TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (org_id, id)
) STRICT;

-- Rated generation transcripts (read-only context for future drafts)
CREATE TABLE IF NOT EXISTS rated_examples (
    id TEXT PRIMARY KEY NOT NULL,
    org_id TEXT NOT NULL,
    inquiry TEXT NOT NULL,
    response TEXT NOT NULL,
    rating TEXT NOT NULL,
    feedback TEXT,
    format TEXT,
    tone TEXT,
    correction_entry_id TEXT,
    created_at INTEGER NOT NULL
) STRICT;

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_entries_org ON knowledge_entries(org_id);
CREATE INDEX IF NOT EXISTS idx_entries_org_type ON knowledge_entries(org_id, kb_type);
CREATE INDEX IF NOT EXISTS idx_examples_org_rating ON rated_examples(org_id, rating, created_at);
CREATE INDEX IF NOT EXISTS idx_examples_correction ON rated_examples(correction_entry_id);
"#;

pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Open or create database with connection pool
    pub fn open(path: &Path) -> Result<Self> {
        // Validate path first
        validate_db_path(path)?;

        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder()
            .max_size(15)
            .build(manager)
            .context("Failed to create connection pool")?;

        // Initialize schema and pragmas on a connection
        {
            let conn = pool.get().context("Failed to get connection from pool")?;

            conn.execute_batch("PRAGMA foreign_keys = ON;")?;

            // WAL mode for concurrent reads
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;

            conn.execute_batch(SCHEMA)?;
        }

        Ok(Self { pool })
    }

    /// Create knowledge entries (returns only newly created entries)
    /// Wrapped in transaction for atomicity
    pub fn create_entries(&self, entries: &[KnowledgeEntry]) -> Result<Vec<KnowledgeEntry>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        // Validate all entries before starting transaction
        for entry in entries {
            validate_entry(entry)?;
        }

        let conn = self.pool.get()
            .context("Failed to get database connection from pool")?;
        let tx = conn.unchecked_transaction()
            .context("Failed to start transaction for creating entries")?;
        let mut new_entries = Vec::new();

        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO knowledge_entries
                 (id, org_id, title, content, category, tags, kb_type, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            )
            .context("Failed to prepare insert statement for entries")?;

            // INSERT OR IGNORE returns 0 if row already exists, 1 if inserted
            for entry in entries {
                let tags_json = serde_json::to_string(&entry.tags)
                    .context(format!("Failed to serialize tags for entry '{}'", entry.id))?;
                let rows_affected = stmt.execute(params![
                    &entry.id,
                    &entry.org_id,
                    &entry.title,
                    &entry.content,
                    &entry.category,
                    &tags_json,
                    entry.kb_type.as_str(),
                    entry.created_at,
                    entry.updated_at,
                ])
                .with_context(|| format!("Failed to insert entry '{}'", entry.id))?;

                if rows_affected > 0 {
                    new_entries.push(entry.clone());
                }
            }
        }

        tx.commit()
            .context("Failed to commit transaction for creating entries")?;
        Ok(new_entries)
    }

    /// Fetch entries for an organization, optionally filtered by type.
    /// Most-recently-updated first.
    pub fn entries_for_org(
        &self,
        org_id: &str,
        kb_type: Option<KbType>,
    ) -> Result<Vec<KnowledgeEntry>> {
        validate_id(org_id, "Organization id")?;

        let conn = self.pool.get()?;
        let mut entries = Vec::new();

        match kb_type {
            Some(t) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, org_id, title, content, category, tags, kb_type, created_at, updated_at
                     FROM knowledge_entries
                     WHERE org_id = ?1 AND kb_type = ?2
                     ORDER BY updated_at DESC, id ASC"
                )?;
                let rows = stmt.query_map(params![org_id, t.as_str()], row_to_raw_entry)?;
                for row in rows {
                    entries.push(raw_to_entry(row?)?);
                }
            }
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, org_id, title, content, category, tags, kb_type, created_at, updated_at
                     FROM knowledge_entries
                     WHERE org_id = ?1
                     ORDER BY updated_at DESC, id ASC"
                )?;
                let rows = stmt.query_map(params![org_id], row_to_raw_entry)?;
                for row in rows {
                    entries.push(raw_to_entry(row?)?);
                }
            }
        }

        Ok(entries)
    }

    /// Fetch a single entry by id
    pub fn get_entry(&self, org_id: &str, id: &str) -> Result<Option<KnowledgeEntry>> {
        validate_id(org_id, "Organization id")?;
        validate_id(id, "Entry id")?;

        let conn = self.pool.get()?;
        let raw = conn.query_row(
            "SELECT id, org_id, title, content, category, tags, kb_type, created_at, updated_at
             FROM knowledge_entries WHERE org_id = ?1 AND id = ?2",
            params![org_id, id],
            row_to_raw_entry,
        )
        .optional()
        .with_context(|| format!("Database error querying entry '{}'", id))?;

        raw.map(raw_to_entry).transpose()
    }

    /// Update entry fields (bumps updated_at)
    pub fn update_entry(
        &self,
        org_id: &str,
        id: &str,
        title: &str,
        content: &str,
        category: &str,
        tags: &[String],
    ) -> Result<KnowledgeEntry> {
        validate_id(org_id, "Organization id")?;
        validate_id(id, "Entry id")?;
        validate_title(title)?;
        validate_content(content)?;
        for tag in tags {
            validate_tag(tag)?;
        }

        let conn = self.pool.get()
            .context("Failed to get database connection from pool")?;
        let tags_json = serde_json::to_string(tags)
            .with_context(|| format!("Failed to serialize tags for entry '{}'", id))?;

        let rows = conn.execute(
            "UPDATE knowledge_entries
             SET title = ?1, content = ?2, category = ?3, tags = ?4, updated_at = ?5
             WHERE org_id = ?6 AND id = ?7",
            params![title, content, category, &tags_json, now_millis(), org_id, id],
        )
        .with_context(|| format!("Failed to update entry '{}'", id))?;

        if rows == 0 {
            bail!("Cannot update: entry '{}' does not exist", id);
        }

        self.get_entry(org_id, id)?
            .with_context(|| format!("Entry '{}' vanished after update", id))
    }

    /// Delete entries by id
    pub fn delete_entries(&self, org_id: &str, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        validate_id(org_id, "Organization id")?;
        for id in ids {
            validate_id(id, "Entry id")?;
        }

        let conn = self.pool.get()
            .context("Failed to get database connection from pool")?;

        let placeholders = build_placeholders(ids.len(), 2);
        let query = format!(
            "DELETE FROM knowledge_entries WHERE org_id = ?1 AND id IN ({})",
            placeholders
        );

        let org_param = org_id.to_string();
        let mut params: Vec<&dyn rusqlite::ToSql> = vec![&org_param];
        for id in ids {
            params.push(id);
        }

        let count = conn.execute(&query, params.as_slice())
            .context(format!("Failed to delete {} entries", ids.len()))?;

        Ok(count)
    }

    /// Case-insensitive LIKE search over titles, content and tags
    pub fn search_entries(&self, org_id: &str, query: &str) -> Result<Vec<KnowledgeEntry>> {
        validate_id(org_id, "Organization id")?;

        let conn = self.pool.get()?;
        let pattern = format!("%{}%", query);

        let mut stmt = conn.prepare_cached(
            "SELECT id, org_id, title, content, category, tags, kb_type, created_at, updated_at
             FROM knowledge_entries
             WHERE org_id = ?1 AND (title LIKE ?2 OR content LIKE ?2 OR tags LIKE ?2)
             ORDER BY updated_at DESC, id ASC"
        )?;
        let rows = stmt.query_map(params![org_id, &pattern], row_to_raw_entry)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(raw_to_entry(row?)?);
        }
        Ok(entries)
    }

    /// Candidate near-duplicate pairs: same org and kb_type, case-insensitive
    /// exact title match or shared lowercase 40-char title prefix. Self-pairs
    /// excluded via id ordering, so each pair is reported once.
    pub fn duplicate_pairs(&self, org_id: &str, kb_type: KbType) -> Result<Vec<(String, String)>> {
        validate_id(org_id, "Organization id")?;

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(
            "SELECT a.id, b.id
             FROM knowledge_entries a
             JOIN knowledge_entries b
               ON a.org_id = b.org_id
              AND a.kb_type = b.kb_type
              AND a.id < b.id
              AND (lower(a.title) = lower(b.title)
                   OR substr(lower(a.title), 1, ?3) = substr(lower(b.title), 1, ?3))
             WHERE a.org_id = ?1 AND a.kb_type = ?2"
        )?;

        let rows = stmt.query_map(
            params![org_id, kb_type.as_str(), DUPLICATE_PREFIX_LEN as i64],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;

        let mut pairs = Vec::new();
        for row in rows {
            pairs.push(row?);
        }
        Ok(pairs)
    }

    /// Merge source entry into target: target keeps its content and gains the
    /// deduplicated union of both tag lists, correction links are retargeted,
    /// source row is deleted. Single transaction so a partial merge is never
    /// observable.
    pub fn merge_entries(
        &self,
        org_id: &str,
        source_id: &str,
        target_id: &str,
    ) -> Result<KnowledgeEntry> {
        validate_id(org_id, "Organization id")?;
        validate_id(source_id, "Source entry id")?;
        validate_id(target_id, "Target entry id")?;
        if source_id == target_id {
            bail!("Cannot merge entry '{}' into itself", source_id);
        }

        let conn = self.pool.get()
            .context("Failed to get database connection from pool")?;
        let tx = conn.unchecked_transaction()
            .context("Failed to start transaction for merge")?;

        let source = query_entry_tx(&tx, org_id, source_id)?
            .with_context(|| format!("Cannot merge: source entry '{}' does not exist", source_id))?;
        let target = query_entry_tx(&tx, org_id, target_id)?
            .with_context(|| format!("Cannot merge: target entry '{}' does not exist", target_id))?;

        // Union tags, target order first, duplicates dropped
        let mut tags = target.tags.clone();
        for tag in &source.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }

        let tags_json = serde_json::to_string(&tags)
            .with_context(|| format!("Failed to serialize tags for entry '{}'", target_id))?;
        tx.execute(
            "UPDATE knowledge_entries SET tags = ?1, updated_at = ?2 WHERE org_id = ?3 AND id = ?4",
            params![&tags_json, now_millis(), org_id, target_id],
        )
        .with_context(|| format!("Failed to update merged entry '{}'", target_id))?;

        // Retarget references before deleting the source
        tx.execute(
            "UPDATE rated_examples SET correction_entry_id = ?1
             WHERE org_id = ?2 AND correction_entry_id = ?3",
            params![target_id, org_id, source_id],
        )
        .context("Failed to retarget correction links")?;

        tx.execute(
            "DELETE FROM knowledge_entries WHERE org_id = ?1 AND id = ?2",
            params![org_id, source_id],
        )
        .with_context(|| format!("Failed to delete source entry '{}'", source_id))?;

        tx.commit().context("Failed to commit merge transaction")?;

        self.get_entry(org_id, target_id)?
            .with_context(|| format!("Entry '{}' vanished after merge", target_id))
    }

    /// Store rated examples (returns only newly created rows)
    pub fn add_examples(&self, examples: &[RatedExample]) -> Result<Vec<RatedExample>> {
        if examples.is_empty() {
            return Ok(Vec::new());
        }

        for ex in examples {
            validate_id(&ex.id, "Example id")?;
            validate_id(&ex.org_id, "Organization id")?;
        }

        let conn = self.pool.get()
            .context("Failed to get database connection from pool")?;
        let tx = conn.unchecked_transaction()
            .context("Failed to start transaction for adding examples")?;
        let mut new_examples = Vec::new();

        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO rated_examples
                 (id, org_id, inquiry, response, rating, feedback, format, tone, correction_entry_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            )
            .context("Failed to prepare insert statement for examples")?;

            for ex in examples {
                let rows_affected = stmt.execute(params![
                    &ex.id,
                    &ex.org_id,
                    &ex.inquiry,
                    &ex.response,
                    ex.rating.as_str(),
                    &ex.feedback,
                    &ex.format,
                    &ex.tone,
                    &ex.correction_entry_id,
                    ex.created_at,
                ])
                .with_context(|| format!("Failed to insert example '{}'", ex.id))?;

                if rows_affected > 0 {
                    new_examples.push(ex.clone());
                }
            }
        }

        tx.commit()
            .context("Failed to commit transaction for adding examples")?;
        Ok(new_examples)
    }

    /// Most recent examples for one rating, newest first
    pub fn recent_examples(
        &self,
        org_id: &str,
        rating: Rating,
        limit: usize,
    ) -> Result<Vec<RatedExample>> {
        validate_id(org_id, "Organization id")?;

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, org_id, inquiry, response, rating, feedback, format, tone, correction_entry_id, created_at
             FROM rated_examples
             WHERE org_id = ?1 AND rating = ?2
             ORDER BY created_at DESC, id ASC
             LIMIT ?3"
        )?;

        let rows = stmt.query_map(
            params![org_id, rating.as_str(), limit as i64],
            row_to_example,
        )?;

        let mut examples = Vec::new();
        for row in rows {
            examples.push(row?);
        }
        Ok(examples)
    }

    /// Attach a corrective knowledge entry to a rated example.
    /// The only mutation allowed on a rated example.
    pub fn set_correction_link(&self, org_id: &str, example_id: &str, entry_id: &str) -> Result<()> {
        validate_id(org_id, "Organization id")?;
        validate_id(example_id, "Example id")?;
        validate_id(entry_id, "Entry id")?;

        let conn = self.pool.get()
            .context("Failed to get database connection from pool")?;

        let rows = conn.execute(
            "UPDATE rated_examples SET correction_entry_id = ?1 WHERE org_id = ?2 AND id = ?3",
            params![entry_id, org_id, example_id],
        )
        .with_context(|| format!("Failed to link correction for example '{}'", example_id))?;

        if rows == 0 {
            bail!("Cannot link correction: example '{}' does not exist", example_id);
        }
        Ok(())
    }

    /// Examples whose correction link points at the given entry
    pub fn examples_correcting(&self, org_id: &str, entry_id: &str) -> Result<Vec<RatedExample>> {
        validate_id(org_id, "Organization id")?;
        validate_id(entry_id, "Entry id")?;

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, org_id, inquiry, response, rating, feedback, format, tone, correction_entry_id, created_at
             FROM rated_examples
             WHERE org_id = ?1 AND correction_entry_id = ?2
             ORDER BY created_at DESC, id ASC"
        )?;

        let rows = stmt.query_map(params![org_id, entry_id], row_to_example)?;

        let mut examples = Vec::new();
        for row in rows {
            examples.push(row?);
        }
        Ok(examples)
    }
}

// Row with tags still serialized as JSON; parsed outside the rusqlite closure
// so JSON errors carry anyhow context
type RawEntryRow = (String, String, String, String, String, String, String, i64, i64);

fn row_to_raw_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntryRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn raw_to_entry(raw: RawEntryRow) -> Result<KnowledgeEntry> {
    let (id, org_id, title, content, category, tags_json, kb_type, created_at, updated_at) = raw;
    let tags: Vec<String> = serde_json::from_str(&tags_json)
        .with_context(|| format!("Corrupted tags data for entry '{}'", id))?;
    let kb_type = KbType::parse(&kb_type)
        .with_context(|| format!("Corrupted kb_type for entry '{}'", id))?;
    Ok(KnowledgeEntry {
        id,
        org_id,
        title,
        content,
        category,
        tags,
        kb_type,
        created_at,
        updated_at,
    })
}

fn row_to_example(row: &rusqlite::Row<'_>) -> rusqlite::Result<RatedExample> {
    let rating: String = row.get(4)?;
    Ok(RatedExample {
        id: row.get(0)?,
        org_id: row.get(1)?,
        inquiry: row.get(2)?,
        response: row.get(3)?,
        rating: Rating::parse(&rating).unwrap_or(Rating::Negative),
        feedback: row.get(5)?,
        format: row.get(6)?,
        tone: row.get(7)?,
        correction_entry_id: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn query_entry_tx(
    tx: &rusqlite::Transaction<'_>,
    org_id: &str,
    id: &str,
) -> Result<Option<KnowledgeEntry>> {
    let raw = tx.query_row(
        "SELECT id, org_id, title, content, category, tags, kb_type, created_at, updated_at
         FROM knowledge_entries WHERE org_id = ?1 AND id = ?2",
        params![org_id, id],
        row_to_raw_entry,
    )
    .optional()
    .with_context(|| format!("Database error querying entry '{}'", id))?;

    raw.map(raw_to_entry).transpose()
}
