//! Persisted records and the store that owns them.
//!
//! The store is a collaborator behind the [`RecordStore`] trait. [`JsonStore`]
//! keeps every record in memory and writes a compressed JSON snapshot after
//! each change. Deletes cascade: a file takes its charts with it, a user takes
//! their files and charts.

use crate::error::{StoreError, StoreResult};
use crate::saving;
use crate::series::{ChartSeries, ChartType};
use crate::spreadsheet::Sheet;
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A registered account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Username, unique, doubles as the owner id on files and charts
    pub username: String,

    /// Email address, unique, used for password recovery
    pub email: String,

    /// Argon2 hash of the password
    pub password_hash: String,

    /// Pending password reset code
    #[serde(default)]
    pub reset_code: Option<String>,

    /// When the pending reset code stops being valid
    #[serde(default)]
    pub reset_code_expires: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

/// An uploaded spreadsheet and what was parsed out of it.
///
/// A failed parse is still recorded, with `processed == false`, no sheets and
/// the parse error in `processing_error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub owner_id: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub storage_path: String,
    pub sheets: Vec<Sheet>,
    /// Union of the non-empty headers of every sheet, first-seen order.
    pub columns: Vec<String>,
    pub total_row_count: usize,
    pub processed: bool,
    pub processing_error: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// A file listing entry without the sheet data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub id: String,
    pub owner_id: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub sheet_names: Vec<String>,
    pub columns: Vec<String>,
    pub total_row_count: usize,
    pub processed: bool,
    pub processing_error: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn summary(&self) -> FileSummary {
        FileSummary {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            original_name: self.original_name.clone(),
            size_bytes: self.size_bytes,
            sheet_names: self.sheets.iter().map(|s| s.name.clone()).collect(),
            columns: self.columns.clone(),
            total_row_count: self.total_row_count,
            processed: self.processed,
            processing_error: self.processing_error.clone(),
            uploaded_at: self.uploaded_at,
        }
    }
}

/// A saved chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRecord {
    pub id: String,
    pub owner_id: String,
    pub file_id: String,
    pub chart_type: ChartType,
    pub x_column: String,
    pub y_column: String,
    pub title: String,
    pub description: String,
    /// Cached series for exact replay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<ChartSeries>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChartRecord {
    pub fn key(&self) -> ChartKey {
        ChartKey {
            owner_id: self.owner_id.clone(),
            file_id: self.file_id.clone(),
            chart_type: self.chart_type,
            x_column: self.x_column.clone(),
            y_column: self.y_column.clone(),
        }
    }
}

/// Identity of the canonical chart for a combination of owner, file, type and axes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChartKey {
    pub owner_id: String,
    pub file_id: String,
    pub chart_type: ChartType,
    pub x_column: String,
    pub y_column: String,
}

/// Input to [`RecordStore::upsert_chart`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChartDraft {
    pub key: ChartKey,
    pub title: String,
    pub description: String,
    pub series: Option<ChartSeries>,
}

/// What an upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

/// Records removed by a user deletion, for cleaning up stored bytes.
#[derive(Debug, Default)]
pub struct DeletedUser {
    pub files: Vec<FileRecord>,
    pub charts: usize,
}

/// The persistence collaborator.
pub trait RecordStore: Send + Sync {
    fn get_user(&self, username: &str) -> StoreResult<Option<User>>;
    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    fn list_users(&self) -> StoreResult<Vec<User>>;
    /// Fails with [`StoreError::Conflict`] on a taken username or email.
    fn insert_user(&self, user: User) -> StoreResult<()>;
    fn update_user(&self, user: User) -> StoreResult<()>;
    /// Removes the user with their files and charts.
    fn delete_user(&self, username: &str) -> StoreResult<Option<DeletedUser>>;

    fn insert_file(&self, record: FileRecord) -> StoreResult<()>;
    fn get_file(&self, id: &str) -> StoreResult<Option<FileRecord>>;
    /// Files of `owner` (or every file), newest first.
    fn list_files(&self, owner: Option<&str>) -> StoreResult<Vec<FileSummary>>;
    /// Removes the file with its charts.
    fn delete_file(&self, id: &str) -> StoreResult<Option<FileRecord>>;

    /// Creates the canonical chart for the draft's key, or updates title,
    /// description, series and timestamp of the existing one in place.
    fn upsert_chart(&self, draft: ChartDraft) -> StoreResult<(ChartRecord, Upsert)>;
    fn get_chart(&self, id: &str) -> StoreResult<Option<ChartRecord>>;
    /// Charts of `owner`, optionally limited to one file, newest update first.
    fn list_charts(&self, owner: &str, file_id: Option<&str>) -> StoreResult<Vec<ChartRecord>>;
    fn delete_chart(&self, id: &str) -> StoreResult<Option<ChartRecord>>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Database {
    users: BTreeMap<String, User>,
    files: BTreeMap<String, FileRecord>,
    charts: BTreeMap<String, ChartRecord>,
}

/// In-memory store with an optional gzip JSON snapshot on disk.
pub struct JsonStore {
    path: Option<PathBuf>,
    db: RwLock<Database>,
}

impl JsonStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            db: RwLock::new(Database::default()),
        }
    }

    /// Opens the snapshot at `path`, starting empty if it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = if path.exists() {
            saving::load_snapshot(&path)?
        } else {
            Database::default()
        };
        Ok(Self {
            path: Some(path),
            db: RwLock::new(db),
        })
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Database>> {
        self.db.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Database>> {
        self.db.write().map_err(|_| StoreError::Poisoned)
    }

    fn persist(&self, db: &Database) -> StoreResult<()> {
        if let Some(path) = &self.path {
            saving::save_snapshot(db, path).map_err(|e| {
                error!("failed to write database snapshot {}: {}", path.display(), e);
                StoreError::Io(e)
            })?;
        }
        Ok(())
    }

    /// Applies `change` to a copy of the database and keeps the copy only
    /// once its snapshot is written. On any error the store is unchanged.
    fn commit<T>(&self, change: impl FnOnce(&mut Database) -> StoreResult<T>) -> StoreResult<T> {
        let mut db = self.write()?;
        if self.path.is_none() {
            return change(&mut *db);
        }
        let mut staged = (*db).clone();
        let out = change(&mut staged)?;
        self.persist(&staged)?;
        *db = staged;
        Ok(out)
    }
}

impl RecordStore for JsonStore {
    fn get_user(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self.read()?.users.get(username).cloned())
    }

    fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let db = self.read()?;
        Ok(db
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    fn list_users(&self) -> StoreResult<Vec<User>> {
        Ok(self.read()?.users.values().cloned().collect())
    }

    fn insert_user(&self, user: User) -> StoreResult<()> {
        self.commit(|db| {
            if db.users.contains_key(&user.username) {
                return Err(StoreError::Conflict("Username already exists".to_string()));
            }
            if db
                .users
                .values()
                .any(|u| u.email.eq_ignore_ascii_case(&user.email))
            {
                return Err(StoreError::Conflict(
                    "Email address is already registered".to_string(),
                ));
            }
            db.users.insert(user.username.clone(), user);
            Ok(())
        })
    }

    fn update_user(&self, user: User) -> StoreResult<()> {
        if self.get_user(&user.username)?.is_none() {
            return Err(StoreError::NotFound(format!("user {}", user.username)));
        }
        self.commit(|db| match db.users.get_mut(&user.username) {
            Some(existing) => {
                *existing = user;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("user {}", user.username))),
        })
    }

    fn delete_user(&self, username: &str) -> StoreResult<Option<DeletedUser>> {
        if self.get_user(username)?.is_none() {
            return Ok(None);
        }
        self.commit(|db| {
            if db.users.remove(username).is_none() {
                return Ok(None);
            }

            let file_ids: Vec<String> = db
                .files
                .values()
                .filter(|f| f.owner_id == username)
                .map(|f| f.id.clone())
                .collect();
            let files = file_ids
                .iter()
                .filter_map(|id| db.files.remove(id))
                .collect();

            let before = db.charts.len();
            db.charts.retain(|_, c| c.owner_id != username);
            let charts = before - db.charts.len();

            Ok(Some(DeletedUser { files, charts }))
        })
    }

    fn insert_file(&self, record: FileRecord) -> StoreResult<()> {
        self.commit(|db| {
            db.files.insert(record.id.clone(), record);
            Ok(())
        })
    }

    fn get_file(&self, id: &str) -> StoreResult<Option<FileRecord>> {
        Ok(self.read()?.files.get(id).cloned())
    }

    fn list_files(&self, owner: Option<&str>) -> StoreResult<Vec<FileSummary>> {
        let db = self.read()?;
        let mut files: Vec<FileSummary> = db
            .files
            .values()
            .filter(|f| owner.is_none_or(|o| f.owner_id == o))
            .map(FileRecord::summary)
            .collect();
        files.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(files)
    }

    fn delete_file(&self, id: &str) -> StoreResult<Option<FileRecord>> {
        if self.get_file(id)?.is_none() {
            return Ok(None);
        }
        self.commit(|db| {
            let removed = db.files.remove(id);
            if removed.is_some() {
                db.charts.retain(|_, c| c.file_id != id);
            }
            Ok(removed)
        })
    }

    fn upsert_chart(&self, draft: ChartDraft) -> StoreResult<(ChartRecord, Upsert)> {
        self.commit(|db| {
            let now = Utc::now();

            let existing = db.charts.values_mut().find(|c| c.key() == draft.key);
            let upserted = match existing {
                Some(chart) => {
                    chart.title = draft.title;
                    chart.description = draft.description;
                    chart.series = draft.series;
                    chart.updated_at = now;
                    (chart.clone(), Upsert::Updated)
                }
                None => {
                    let ChartKey {
                        owner_id,
                        file_id,
                        chart_type,
                        x_column,
                        y_column,
                    } = draft.key;
                    let chart = ChartRecord {
                        id: uuid::Uuid::new_v4().to_string(),
                        owner_id,
                        file_id,
                        chart_type,
                        x_column,
                        y_column,
                        title: draft.title,
                        description: draft.description,
                        series: draft.series,
                        created_at: now,
                        updated_at: now,
                    };
                    db.charts.insert(chart.id.clone(), chart.clone());
                    (chart, Upsert::Created)
                }
            };
            Ok(upserted)
        })
    }

    fn get_chart(&self, id: &str) -> StoreResult<Option<ChartRecord>> {
        Ok(self.read()?.charts.get(id).cloned())
    }

    fn list_charts(&self, owner: &str, file_id: Option<&str>) -> StoreResult<Vec<ChartRecord>> {
        let db = self.read()?;
        let mut charts: Vec<ChartRecord> = db
            .charts
            .values()
            .filter(|c| c.owner_id == owner)
            .filter(|c| file_id.is_none_or(|f| c.file_id == f))
            .cloned()
            .collect();
        charts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(charts)
    }

    fn delete_chart(&self, id: &str) -> StoreResult<Option<ChartRecord>> {
        if self.get_chart(id)?.is_none() {
            return Ok(None);
        }
        self.commit(|db| Ok(db.charts.remove(id)))
    }
}
