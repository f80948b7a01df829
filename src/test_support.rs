//! Shared fixtures for unit tests.

use crate::{
    db,
    models::object::StoredObject,
    services::{
        checksum,
        object_store::{ObjectStore, ObjectStoreError, ObjectStoreResult},
        queue::{PublishOutcome, QueueError, QueuePublisher, SqliteQueue},
        retry::RetryPolicy,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use serde_json::{Map, Value, json};
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{
    collections::BTreeMap,
    io::{self, Cursor, Write},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use rust_xlsxwriter::Workbook;
use zip::{ZipWriter, write::SimpleFileOptions};

/// Build a zip archive holding `entries`; a trailing `/` makes a directory entry.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (path, contents) in entries {
        if path.ends_with('/') {
            writer.add_directory(*path, options).unwrap();
        } else {
            writer.start_file(*path, options).unwrap();
            writer.write_all(contents).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// A JSON digital file list describing `files`, grouped by parent folder.
pub fn file_list_json(accession: &str, application: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut folders = Map::new();
    let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();

    for (path, contents) in files {
        let (folder, name) = path.rsplit_once('/').unwrap_or(("", *path));
        folders.insert(
            folder.to_string(),
            json!({
                "schedule": "100001",
                "classification": "100001-01",
                "file": "Operational records",
                "opr": true,
                "startDate": "2020-01-01",
                "endDate": "2021-12-31",
                "soDate": null,
                "fdDate": null
            }),
        );
        grouped.entry(folder.to_string()).or_default().push(json!({
            "filepath": path,
            "filename": name,
            "size": contents.len(),
            "checksum": checksum::digest(contents),
            "birthtime": "2021-01-05T10:00:00Z",
            "lastModified": "2021-03-01T10:00:00Z",
            "lastAccessed": "2021-03-02T10:00:00Z"
        }));
    }

    serde_json::to_vec(&json!({
        "outputFileType": "json",
        "metadata": {
            "admin": { "accession": accession, "application": application },
            "folders": folders,
            "files": grouped
        }
    }))
    .unwrap()
}

/// The same file list as [`file_list_json`], laid out as an xlsx workbook.
pub fn file_list_xlsx(accession: &str, application: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut workbook = Workbook::new();

    let admin = workbook.add_worksheet().set_name("Admin").unwrap();
    admin.write_string(0, 0, "Accession").unwrap();
    admin.write_string(0, 1, accession).unwrap();
    admin.write_string(1, 0, "Application").unwrap();
    admin.write_string(1, 1, application).unwrap();

    let folders = workbook.add_worksheet().set_name("Folders").unwrap();
    for (col, header) in ["folder", "schedule", "classification", "opr", "startDate"]
        .iter()
        .enumerate()
    {
        folders.write_string(0, col as u16, *header).unwrap();
    }
    let mut seen = Vec::new();
    for (path, _) in files {
        let folder = path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        if seen.contains(&folder) {
            continue;
        }
        seen.push(folder);
        let row = seen.len() as u32;
        folders.write_string(row, 0, folder).unwrap();
        folders.write_string(row, 1, "100001").unwrap();
        folders.write_string(row, 2, "100001-01").unwrap();
        folders.write_boolean(row, 3, true).unwrap();
        folders.write_string(row, 4, "2020-01-01").unwrap();
    }

    let sheet = workbook.add_worksheet().set_name("Files").unwrap();
    for (col, header) in [
        "Filepath",
        "Filename",
        "Size",
        "Checksum",
        "Birthtime",
        "Last Modified",
        "Last Accessed",
    ]
    .iter()
    .enumerate()
    {
        sheet.write_string(0, col as u16, *header).unwrap();
    }
    for (idx, (path, contents)) in files.iter().enumerate() {
        let row = idx as u32 + 1;
        let name = path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path);
        sheet.write_string(row, 0, *path).unwrap();
        sheet.write_string(row, 1, name).unwrap();
        sheet.write_number(row, 2, contents.len() as f64).unwrap();
        sheet.write_string(row, 3, checksum::digest(contents)).unwrap();
        sheet.write_string(row, 4, "2021-01-05T10:00:00Z").unwrap();
        sheet.write_string(row, 5, "2021-03-01T10:00:00Z").unwrap();
        sheet.write_string(row, 6, "2021-03-02T10:00:00Z").unwrap();
    }

    workbook.save_to_buffer().unwrap()
}

/// A standard transfer holding `contents`, its file list and optionally a
/// signed agreement.
pub fn transfer_zip(
    accession: &str,
    application: &str,
    with_agreement: bool,
    contents: &[(&str, &[u8])],
) -> Vec<u8> {
    let list = file_list_json(accession, application, contents);
    let agreement = format!("documentation/Submission_Agreement_{accession}_{application}.pdf");

    let mut entries: Vec<(&str, &[u8])> =
        vec![("documentation/Digital_File_List.json", list.as_slice())];
    if with_agreement {
        entries.push((agreement.as_str(), &b"%PDF-1.7 signed agreement"[..]));
    }
    entries.extend_from_slice(contents);
    zip_bytes(&entries)
}

/// A complete, valid standard transfer for `accession`/`application`.
pub fn standard_package(accession: &str, application: &str, with_agreement: bool) -> Vec<u8> {
    transfer_zip(
        accession,
        application,
        with_agreement,
        &[
            ("content/file1.txt", b"first record"),
            ("content/reports/q1.csv", b"quarter,total\n1,10\n"),
        ],
    )
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 2,
        timeout: Duration::from_millis(500),
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

/// Migrated in-memory database; one connection so every query sees the same schema.
pub async fn memory_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    Arc::new(pool)
}

/// In-process object store with switchable failures.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Bytes>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
    fail_gets: AtomicBool,
    fail_puts: AtomicBool,
}

impl MemoryObjectStore {
    pub fn insert(&self, key: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), Bytes::copy_from_slice(bytes));
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    fn outage() -> ObjectStoreError {
        ObjectStoreError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "store offline"))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Bytes) -> ObjectStoreResult<StoredObject> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        let stored = StoredObject {
            key: key.to_string(),
            size_bytes: bytes.len() as u64,
            etag: format!("{:x}", md5::compute(&bytes)),
            last_modified: Utc::now(),
        };
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(stored)
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<Option<Bytes>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(Self::outage());
        }
        Ok(self.object(key))
    }

    async fn list(&self, prefix: &str) -> ObjectStoreResult<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> ObjectStoreResult<bool> {
        Ok(self.objects.lock().unwrap().remove(key).is_some())
    }
}

/// Durable queue that can be told to refuse publishes.
pub struct FlakyQueue {
    inner: SqliteQueue,
    failing: AtomicBool,
}

impl FlakyQueue {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self {
            inner: SqliteQueue::new(db),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueuePublisher for FlakyQueue {
    async fn publish(&self, queue: &str, job_id: &str) -> Result<PublishOutcome, QueueError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(QueueError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        self.inner.publish(queue, job_id).await
    }

    async fn is_published(&self, job_id: &str) -> Result<bool, QueueError> {
        self.inner.is_published(job_id).await
    }
}
