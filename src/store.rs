use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::info;

use crate::error::PersistenceError;
use crate::models::{JobPosting, JobRecord, RunMetrics};
use crate::state::LifecycleState;

/// The durable ledger behind the dedup index. Loaded in full once per run;
/// per-record writes go through upsert, which is idempotent on
/// fingerprint.
pub trait PersistenceStore {
    fn load_index(&self) -> Result<Vec<JobRecord>, PersistenceError>;

    /// Insert or overwrite the record keyed by its fingerprint. Assigns
    /// the external id on first insert.
    fn upsert(&self, record: &mut JobRecord) -> Result<(), PersistenceError>;

    /// Fetch records by the external ids operators see in listings.
    /// Unknown ids are simply absent from the result.
    fn read_by_external_ids(&self, ids: &[i64]) -> Result<Vec<JobRecord>, PersistenceError>;

    /// Append the end-of-run counters.
    fn append_metrics(&self, operation: &str, metrics: &RunMetrics)
        -> Result<(), PersistenceError>;
}

pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: Option<&Path>) -> Result<Self, PersistenceError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path(),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&path)?;
        Ok(Self { conn, path })
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn,
            path: PathBuf::from(":memory:"),
        };
        store.init()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn default_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "scout") {
            proj_dirs.data_dir().join("scout.db")
        } else {
            PathBuf::from("scout.db")
        }
    }

    pub fn init(&self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                fingerprint TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                company TEXT,
                location TEXT,
                salary_text TEXT,
                url TEXT,
                source TEXT NOT NULL,
                sources TEXT NOT NULL,
                discovered_at TEXT NOT NULL,
                description TEXT,
                state TEXT NOT NULL DEFAULT 'unique',
                salary_aed INTEGER,
                resume_path TEXT,
                cover_letter_path TEXT,
                recruiter_email TEXT,
                outreach_sent INTEGER NOT NULL DEFAULT 0,
                applied INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                notes TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
            CREATE INDEX IF NOT EXISTS idx_jobs_fingerprint ON jobs(fingerprint);

            CREATE TABLE IF NOT EXISTS run_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_at TEXT NOT NULL,
                operation TEXT NOT NULL,
                discovered INTEGER NOT NULL,
                duplicates INTEGER NOT NULL,
                tailored INTEGER NOT NULL,
                tailoring_failed INTEGER NOT NULL,
                outreach_sent INTEGER NOT NULL,
                outreach_failed INTEGER NOT NULL,
                applied INTEGER NOT NULL,
                circuit_broken TEXT NOT NULL,
                errors TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> Result<(), PersistenceError> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='jobs'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            return Err(PersistenceError::NotInitialized);
        }
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
        let sources_json: String = row.get(8)?;
        let sources: Vec<String> = serde_json::from_str(&sources_json).unwrap_or_default();
        let state_str: String = row.get(11)?;
        let state = LifecycleState::parse(&state_str).unwrap_or(LifecycleState::Unique);

        Ok(JobRecord {
            id: Some(row.get(0)?),
            fingerprint: row.get(1)?,
            posting: JobPosting {
                title: row.get(2)?,
                company: row.get(3)?,
                location: row.get(4)?,
                salary_text: row.get(5)?,
                url: row.get(6)?,
                source: row.get(7)?,
                discovered_at: parse_timestamp(row, 9)?,
                description: row.get(10)?,
            },
            sources,
            state,
            salary_aed: row.get(12)?,
            resume_path: row.get(13)?,
            cover_letter_path: row.get(14)?,
            recruiter_email: row.get(15)?,
            outreach_sent: row.get::<_, i64>(16)? != 0,
            applied: row.get::<_, i64>(17)? != 0,
            updated_at: parse_timestamp(row, 18)?,
            notes: row.get(19)?,
        })
    }
}

fn parse_timestamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

const SELECT_COLUMNS: &str = "id, fingerprint, title, company, location, salary_text, url, \
     source, sources, discovered_at, description, state, salary_aed, resume_path, \
     cover_letter_path, recruiter_email, outreach_sent, applied, updated_at, notes";

impl PersistenceStore for SqliteStore {
    fn load_index(&self) -> Result<Vec<JobRecord>, PersistenceError> {
        self.ensure_initialized()?;
        let sql = format!("SELECT {SELECT_COLUMNS} FROM jobs ORDER BY id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], Self::row_to_record)?;
        let records = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn upsert(&self, record: &mut JobRecord) -> Result<(), PersistenceError> {
        self.ensure_initialized()?;
        let sources_json =
            serde_json::to_string(&record.sources).unwrap_or_else(|_| "[]".to_string());
        self.conn.execute(
            r#"
            INSERT INTO jobs (
                fingerprint, title, company, location, salary_text, url, source,
                sources, discovered_at, description, state, salary_aed,
                resume_path, cover_letter_path, recruiter_email,
                outreach_sent, applied, updated_at, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            ON CONFLICT(fingerprint) DO UPDATE SET
                sources = excluded.sources,
                salary_text = excluded.salary_text,
                state = excluded.state,
                salary_aed = excluded.salary_aed,
                resume_path = excluded.resume_path,
                cover_letter_path = excluded.cover_letter_path,
                recruiter_email = excluded.recruiter_email,
                outreach_sent = excluded.outreach_sent,
                applied = excluded.applied,
                updated_at = excluded.updated_at,
                notes = excluded.notes
            "#,
            params![
                record.fingerprint,
                record.posting.title,
                record.posting.company,
                record.posting.location,
                record.posting.salary_text,
                record.posting.url,
                record.posting.source,
                sources_json,
                record.posting.discovered_at.to_rfc3339(),
                record.posting.description,
                record.state.as_str(),
                record.salary_aed,
                record.resume_path,
                record.cover_letter_path,
                record.recruiter_email,
                record.outreach_sent as i64,
                record.applied as i64,
                record.updated_at.to_rfc3339(),
                record.notes,
            ],
        )?;

        if record.id.is_none() {
            let id: i64 = self.conn.query_row(
                "SELECT id FROM jobs WHERE fingerprint = ?1",
                [&record.fingerprint],
                |row| row.get(0),
            )?;
            record.id = Some(id);
        }
        Ok(())
    }

    fn read_by_external_ids(&self, ids: &[i64]) -> Result<Vec<JobRecord>, PersistenceError> {
        self.ensure_initialized()?;
        let sql = format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE id = ?1");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut records = Vec::new();
        for id in ids {
            match stmt.query_row([id], Self::row_to_record) {
                Ok(record) => records.push(record),
                Err(rusqlite::Error::QueryReturnedNoRows) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(records)
    }

    fn append_metrics(
        &self,
        operation: &str,
        metrics: &RunMetrics,
    ) -> Result<(), PersistenceError> {
        self.ensure_initialized()?;
        self.conn.execute(
            r#"
            INSERT INTO run_metrics (
                run_at, operation, discovered, duplicates, tailored,
                tailoring_failed, outreach_sent, outreach_failed, applied,
                circuit_broken, errors
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                Utc::now().to_rfc3339(),
                operation,
                metrics.discovered as i64,
                metrics.duplicates as i64,
                metrics.tailored as i64,
                metrics.tailoring_failed as i64,
                metrics.outreach_sent as i64,
                metrics.outreach_failed as i64,
                metrics.applied as i64,
                serde_json::to_string(&metrics.circuit_broken).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&metrics.errors).unwrap_or_else(|_| "[]".into()),
            ],
        )?;
        Ok(())
    }
}

/// Startup precondition against concurrent runs. A second orchestrator
/// refuses to start while the marker file exists; the file is removed when
/// the guard drops.
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: PathBuf) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                info!(path = %path.display(), "run lock acquired");
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(PersistenceError::RunLocked(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Lock path for a given database path.
    pub fn path_for_db(db_path: &Path) -> PathBuf {
        db_path.with_extension("lock")
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobPosting;

    fn record(fingerprint: &str, title: &str) -> JobRecord {
        let mut posting = JobPosting::new(title, "linkedin");
        posting.company = Some("Acme".to_string());
        JobRecord::new(fingerprint.to_string(), posting, Some(20_000))
    }

    #[test]
    fn upsert_assigns_id_and_round_trips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut rec = record("fp1", "Platform Engineer");
        store.upsert(&mut rec).unwrap();
        assert!(rec.id.is_some());

        let loaded = store.load_index().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].fingerprint, "fp1");
        assert_eq!(loaded[0].posting.title, "Platform Engineer");
        assert_eq!(loaded[0].salary_aed, Some(20_000));
        assert_eq!(loaded[0].state, LifecycleState::Unique);
    }

    #[test]
    fn upsert_same_fingerprint_never_duplicates() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut rec = record("fp1", "Platform Engineer");
        store.upsert(&mut rec).unwrap();
        let first_id = rec.id;

        rec.advance(LifecycleState::Tailored);
        rec.resume_path = Some("artifacts/resume.md".to_string());
        store.upsert(&mut rec).unwrap();
        store.upsert(&mut rec).unwrap();

        let loaded = store.load_index().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, first_id);
        assert_eq!(loaded[0].state, LifecycleState::Tailored);
        assert_eq!(
            loaded[0].resume_path.as_deref(),
            Some("artifacts/resume.md")
        );
    }

    #[test]
    fn read_by_external_ids_skips_unknown() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut rec = record("fp1", "Engineer");
        store.upsert(&mut rec).unwrap();
        let id = rec.id.unwrap();

        let found = store.read_by_external_ids(&[id, 9999]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, Some(id));
    }

    #[test]
    fn metrics_append() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut metrics = RunMetrics::default();
        metrics.discovered = 4;
        metrics.circuit_broken.push("indeed".to_string());
        store.append_metrics("scrape", &metrics).unwrap();
    }

    #[test]
    fn uninitialized_store_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        let store = SqliteStore {
            conn,
            path: PathBuf::from(":memory:"),
        };
        assert!(matches!(
            store.load_index(),
            Err(PersistenceError::NotInitialized)
        ));
    }

    #[test]
    fn run_lock_blocks_second_acquire_and_releases_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scout.lock");

        let lock = RunLock::acquire(path.clone()).unwrap();
        assert!(matches!(
            RunLock::acquire(path.clone()),
            Err(PersistenceError::RunLocked(_))
        ));
        drop(lock);
        let lock2 = RunLock::acquire(path).unwrap();
        drop(lock2);
    }
}
