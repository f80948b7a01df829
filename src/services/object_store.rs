//! src/services/object_store.rs
//!
//! Durable keyed blob storage. The pipeline only talks to the [`ObjectStore`]
//! trait; two backends are provided:
//!
//! - [`LocalObjectStore`] keeps payloads on local disk, sharded beneath
//!   `base_path/{shard}/{shard}/{key}`, with temp-file writes and atomic renames.
//! - [`S3HttpObjectStore`] speaks the path-style S3 REST dialect
//!   (`PUT`/`GET`/`DELETE /{bucket}/{key}`, `GET /{bucket}?list-type=2`) to any
//!   S3-compatible endpoint, signing requests with SigV4 when credentials
//!   are configured.

use crate::{
    models::object::StoredObject,
    services::sigv4::{S3Credentials, SigningInput, amz_date, canonical_query, sha256_hex, uri_encode},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::{Method, StatusCode, Url, header};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("invalid object key `{0}`")]
    InvalidKey(String),
    #[error("invalid object store endpoint {0}")]
    InvalidEndpoint(String),
    #[error("object store answered {status} for `{key}`")]
    UnexpectedStatus { status: u16, key: String },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Keyed blob API shared by every backend. Writes overwrite.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Bytes) -> ObjectStoreResult<StoredObject>;

    /// `Ok(None)` when no object exists under `key`.
    async fn get(&self, key: &str) -> ObjectStoreResult<Option<Bytes>>;

    /// Keys starting with `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> ObjectStoreResult<Vec<String>>;

    /// Returns whether an object was removed.
    async fn delete(&self, key: &str) -> ObjectStoreResult<bool>;
}

const MAX_OBJECT_KEY_LEN: usize = 1024;
const TMP_PREFIX: &str = ".tmp-";

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Rejects empty or oversized keys, keys that begin with `/`, contain `..`,
/// backslashes or control bytes.
fn ensure_key_safe(key: &str) -> ObjectStoreResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_OBJECT_KEY_LEN
        || key.starts_with('/')
        || key.contains("..")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
    if invalid {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn md5_hex(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Disk-backed object store.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Generate two-level shard identifiers for an object key.
    ///
    /// Uses MD5(key) and returns the first two bytes as lowercase
    /// hexadecimal strings (00–ff). Reduces file count per directory.
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Combines base_path/{shard}/{shard}/{key}. Parent directories may not
    /// exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Recursively remove empty directories up to the store root.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    /// Write to a temp file, fsync, then atomically rename into place.
    async fn put(&self, key: &str, bytes: Bytes) -> ObjectStoreResult<StoredObject> {
        ensure_key_safe(key)?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            ObjectStoreError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!("{TMP_PREFIX}{}", Uuid::new_v4()));

        let write_result = async {
            let mut file = File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        if let Err(err) = write_result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ObjectStoreError::Io(err));
            }
        }

        debug!("stored {} ({} bytes) at {}", key, bytes.len(), file_path.display());
        Ok(StoredObject {
            key: key.to_string(),
            size_bytes: bytes.len() as u64,
            etag: md5_hex(&bytes),
            last_modified: Utc::now(),
        })
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<Option<Bytes>> {
        ensure_key_safe(key)?;
        match fs::read(self.object_path(key)).await {
            Ok(contents) => Ok(Some(Bytes::from(contents))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ObjectStoreError::Io(err)),
        }
    }

    /// Walks every shard directory; keys are the paths below the two shard
    /// levels.
    async fn list(&self, prefix: &str) -> ObjectStoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.base_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut reader = match fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(ObjectStoreError::Io(err)),
            };
            while let Some(entry) = reader.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if entry.file_name().to_string_lossy().starts_with(TMP_PREFIX) {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.base_path) else {
                    continue;
                };
                let key = relative
                    .components()
                    .skip(2)
                    .map(|part| part.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                if !key.is_empty() && key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    /// Deletes the payload best-effort and prunes emptied shard directories.
    async fn delete(&self, key: &str) -> ObjectStoreResult<bool> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let removed = match fs::remove_file(&file_path).await {
            Ok(_) => {
                debug!("removed physical file {}", file_path.display());
                true
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
                false
            }
            Err(err) => return Err(ObjectStoreError::Io(err)),
        };

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(removed)
    }
}

/// Client for an S3-compatible endpoint using path-style addressing.
///
/// Requests are signed with SigV4 when credentials are configured and sent
/// anonymously otherwise.
#[derive(Clone, Debug)]
pub struct S3HttpObjectStore {
    client: reqwest::Client,
    /// `scheme://host[:port]`
    origin: String,
    /// `host[:port]` as sent in the `Host` header.
    host: String,
    /// Encoded `{endpoint path}/{bucket}`.
    bucket_path: String,
    credentials: Option<S3Credentials>,
}

impl S3HttpObjectStore {
    pub fn new(client: reqwest::Client, endpoint: &str, bucket: &str) -> ObjectStoreResult<Self> {
        let url = Url::parse(endpoint)
            .map_err(|err| ObjectStoreError::InvalidEndpoint(format!("{endpoint}: {err}")))?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => {
                return Err(ObjectStoreError::InvalidEndpoint(format!(
                    "{endpoint}: no host"
                )));
            }
        };

        Ok(Self {
            client,
            origin: url.origin().ascii_serialization(),
            host,
            bucket_path: format!(
                "{}/{}",
                url.path().trim_end_matches('/'),
                uri_encode(bucket, false)
            ),
            credentials: None,
        })
    }

    pub fn with_credentials(mut self, credentials: Option<S3Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    fn object_path(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_path, uri_encode(key, true))
    }

    /// Build a request for `path` with the query already in canonical form, so
    /// the signed and sent strings are identical.
    fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Bytes>,
    ) -> reqwest::RequestBuilder {
        let query = canonical_query(query);
        let url = if query.is_empty() {
            format!("{}{}", self.origin, path)
        } else {
            format!("{}{}?{}", self.origin, path, query)
        };
        let mut builder = self.client.request(method.clone(), url);

        if let Some(credentials) = &self.credentials {
            let payload = sha256_hex(body.as_deref().unwrap_or_default());
            let amz = amz_date(Utc::now());
            let authorization = credentials.authorization(&SigningInput {
                method: method.as_str(),
                host: &self.host,
                canonical_uri: path,
                canonical_query: &query,
                payload_sha256: &payload,
                amz_date: &amz,
            });
            builder = builder
                .header("x-amz-date", amz)
                .header("x-amz-content-sha256", payload)
                .header(header::AUTHORIZATION, authorization);
        }

        match body {
            Some(body) => builder.body(body),
            None => builder,
        }
    }
}

#[async_trait]
impl ObjectStore for S3HttpObjectStore {
    async fn put(&self, key: &str, bytes: Bytes) -> ObjectStoreResult<StoredObject> {
        ensure_key_safe(key)?;
        let size_bytes = bytes.len() as u64;
        let local_etag = md5_hex(&bytes);

        let response = self
            .request(Method::PUT, &self.object_path(key), &[], Some(bytes))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ObjectStoreError::UnexpectedStatus {
                status: response.status().as_u16(),
                key: key.to_string(),
            });
        }

        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string())
            .unwrap_or(local_etag);

        Ok(StoredObject {
            key: key.to_string(),
            size_bytes,
            etag,
            last_modified: Utc::now(),
        })
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<Option<Bytes>> {
        ensure_key_safe(key)?;
        let response = self
            .request(Method::GET, &self.object_path(key), &[], None)
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.bytes().await?)),
            status => Err(ObjectStoreError::UnexpectedStatus {
                status: status.as_u16(),
                key: key.to_string(),
            }),
        }
    }

    /// Follows ListObjectsV2 continuation tokens until the listing is complete.
    async fn list(&self, prefix: &str) -> ObjectStoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query = vec![("list-type", "2".to_string()), ("prefix", prefix.to_string())];
            if let Some(token) = continuation.take() {
                query.push(("continuation-token", token));
            }

            let response = self
                .request(Method::GET, &self.bucket_path, &query, None)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(ObjectStoreError::UnexpectedStatus {
                    status: response.status().as_u16(),
                    key: prefix.to_string(),
                });
            }

            let body = response.text().await?;
            let page = parse_list_objects_v2(&body);
            keys.extend(page.keys);
            match page.next_continuation_token {
                Some(token) if page.is_truncated => continuation = Some(token),
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> ObjectStoreResult<bool> {
        ensure_key_safe(key)?;
        let response = self
            .request(Method::DELETE, &self.object_path(key), &[], None)
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(ObjectStoreError::UnexpectedStatus {
                status: status.as_u16(),
                key: key.to_string(),
            }),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
struct ListPage {
    keys: Vec<String>,
    is_truncated: bool,
    next_continuation_token: Option<String>,
}

/// Pull keys and paging markers out of a `ListBucketResult` document.
fn parse_list_objects_v2(xml: &str) -> ListPage {
    let mut page = ListPage::default();

    let mut rest = xml;
    while let Some(start) = rest.find("<Contents>") {
        let after = &rest[start + "<Contents>".len()..];
        let end = after.find("</Contents>").unwrap_or(after.len());
        if let Some(key) = element_text(&after[..end], "Key") {
            page.keys.push(key);
        }
        rest = &after[end..];
    }

    page.is_truncated = element_text(xml, "IsTruncated").is_some_and(|v| v == "true");
    page.next_continuation_token = element_text(xml, "NextContinuationToken");
    page
}

fn element_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = start + xml[start..].find(&close)?;
    Some(xml_unescape(&xml[start..end]))
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Router,
        body::Bytes as BodyBytes,
        extract::{Path as UrlPath, Query, Request, State},
        http::StatusCode as AxumStatus,
        middleware::{self, Next},
        response::{IntoResponse, Response},
        routing::get,
    };
    use std::{
        collections::{BTreeMap, HashMap},
        sync::{Arc, Mutex},
    };
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn local_store_overwrites_and_lists_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        let first = store
            .put("transfers/TR_1_2.zip", Bytes::from_static(b"first"))
            .await
            .unwrap();
        assert_eq!(first.etag, format!("{:x}", md5::compute(b"first")));

        store
            .put("transfers/TR_1_2.zip", Bytes::from_static(b"second"))
            .await
            .unwrap();
        store
            .put("submission-agreements/1_2.pdf", Bytes::from_static(b"%PDF"))
            .await
            .unwrap();

        assert_eq!(
            store.get("transfers/TR_1_2.zip").await.unwrap().unwrap(),
            Bytes::from_static(b"second")
        );
        assert_eq!(
            store.list("transfers/").await.unwrap(),
            vec!["transfers/TR_1_2.zip".to_string()]
        );
        assert_eq!(store.list("").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn local_store_missing_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        assert!(store.get("nope/key.bin").await.unwrap().is_none());
        assert!(!store.delete("nope/key.bin").await.unwrap());

        store.put("a/b.bin", Bytes::from_static(b"x")).await.unwrap();
        assert!(store.delete("a/b.bin").await.unwrap());
        assert!(store.get("a/b.bin").await.unwrap().is_none());
        assert!(store.list("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn local_store_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let err = store
            .put("../escape.bin", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::InvalidKey(_)));
    }

    #[test]
    fn parses_list_objects_page() {
        let xml = concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?><ListBucketResult>"#,
            "<IsTruncated>true</IsTruncated>",
            "<NextContinuationToken>dG9rZW4=</NextContinuationToken>",
            "<Contents><Key>transfers/TR_1_2.zip</Key><Size>3</Size></Contents>",
            "<Contents><Key>transfers/a&amp;b.zip</Key></Contents>",
            "</ListBucketResult>"
        );
        let page = parse_list_objects_v2(xml);
        assert_eq!(
            page,
            ListPage {
                keys: vec!["transfers/TR_1_2.zip".into(), "transfers/a&b.zip".into()],
                is_truncated: true,
                next_continuation_token: Some("dG9rZW4=".into()),
            }
        );
    }

    type Blobs = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

    async fn mock_put(
        State(blobs): State<Blobs>,
        UrlPath((_bucket, key)): UrlPath<(String, String)>,
        body: BodyBytes,
    ) -> impl IntoResponse {
        let etag = format!("\"{:x}\"", md5::compute(&body));
        blobs.lock().unwrap().insert(key, body.to_vec());
        ([(header::ETAG, etag)], AxumStatus::OK)
    }

    async fn mock_get(
        State(blobs): State<Blobs>,
        UrlPath((_bucket, key)): UrlPath<(String, String)>,
    ) -> Result<Vec<u8>, AxumStatus> {
        blobs.lock().unwrap().get(&key).cloned().ok_or(AxumStatus::NOT_FOUND)
    }

    async fn mock_delete(
        State(blobs): State<Blobs>,
        UrlPath((_bucket, key)): UrlPath<(String, String)>,
    ) -> AxumStatus {
        match blobs.lock().unwrap().remove(&key) {
            Some(_) => AxumStatus::NO_CONTENT,
            None => AxumStatus::NOT_FOUND,
        }
    }

    /// Serves one key per page so the client has to follow continuation tokens.
    async fn mock_list(
        State(blobs): State<Blobs>,
        Query(params): Query<HashMap<String, String>>,
    ) -> String {
        let prefix = params.get("prefix").cloned().unwrap_or_default();
        let after = params.get("continuation-token").cloned();
        let blobs = blobs.lock().unwrap();
        let mut matching = blobs
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .filter(|k| after.as_ref().is_none_or(|a| k.as_str() > a.as_str()));
        let mut xml = String::from("<ListBucketResult>");
        if let Some(key) = matching.next() {
            xml.push_str(&format!("<Contents><Key>{key}</Key></Contents>"));
            if matching.next().is_some() {
                xml.push_str("<IsTruncated>true</IsTruncated>");
                xml.push_str(&format!("<NextContinuationToken>{key}</NextContinuationToken>"));
            }
        }
        xml.push_str("</ListBucketResult>");
        xml
    }

    fn test_credentials() -> S3Credentials {
        S3Credentials {
            access_key_id: "test-access-key".into(),
            secret_access_key: "test-secret".into(),
            region: "us-east-1".into(),
        }
    }

    /// Recomputes the SigV4 signature from what actually arrived and rejects
    /// anything that does not match.
    async fn require_signature(request: Request, next: Next) -> Response {
        let headers = request.headers();
        let value = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        let received = value(header::AUTHORIZATION.as_str());
        let expected = test_credentials().authorization(&SigningInput {
            method: request.method().as_str(),
            host: &value(header::HOST.as_str()),
            canonical_uri: request.uri().path(),
            canonical_query: request.uri().query().unwrap_or_default(),
            payload_sha256: &value("x-amz-content-sha256"),
            amz_date: &value("x-amz-date"),
        });
        if received.is_empty() || received != expected {
            return AxumStatus::FORBIDDEN.into_response();
        }
        next.run(request).await
    }

    async fn spawn_mock_s3(signed: bool) -> String {
        let blobs: Blobs = Arc::default();
        let mut app = Router::new()
            .route("/{bucket}", get(mock_list))
            .route(
                "/{bucket}/{*key}",
                get(mock_get).put(mock_put).delete(mock_delete),
            )
            .with_state(blobs);
        if signed {
            app = app.layer(middleware::from_fn(require_signature));
        }
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn http_store_round_trips_against_s3_dialect() {
        let endpoint = spawn_mock_s3(false).await;
        let store = S3HttpObjectStore::new(reqwest::Client::new(), &endpoint, "dats").unwrap();

        let stored = store
            .put("transfers/TR_1_2.zip", Bytes::from_static(b"zip-bytes"))
            .await
            .unwrap();
        assert_eq!(stored.etag, format!("{:x}", md5::compute(b"zip-bytes")));
        store
            .put("transfers/TR_3_4.zip", Bytes::from_static(b"other"))
            .await
            .unwrap();
        store
            .put("submission-agreements/1_2.pdf", Bytes::from_static(b"%PDF"))
            .await
            .unwrap();

        assert_eq!(
            store.get("transfers/TR_1_2.zip").await.unwrap().unwrap(),
            Bytes::from_static(b"zip-bytes")
        );
        assert!(store.get("transfers/missing.zip").await.unwrap().is_none());
        assert_eq!(
            store.list("transfers/").await.unwrap(),
            vec!["transfers/TR_1_2.zip".to_string(), "transfers/TR_3_4.zip".to_string()]
        );
        assert!(store.delete("transfers/TR_3_4.zip").await.unwrap());
        assert!(!store.delete("transfers/TR_3_4.zip").await.unwrap());
    }

    #[tokio::test]
    async fn http_store_signs_every_request() {
        let endpoint = spawn_mock_s3(true).await;

        let anonymous = S3HttpObjectStore::new(reqwest::Client::new(), &endpoint, "dats").unwrap();
        let err = anonymous
            .put("transfers/TR_1_2.zip", Bytes::from_static(b"zip"))
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::UnexpectedStatus { status: 403, .. }));

        let store = S3HttpObjectStore::new(reqwest::Client::new(), &endpoint, "dats")
            .unwrap()
            .with_credentials(Some(test_credentials()));
        store
            .put("transfers/TR_1_2.zip", Bytes::from_static(b"zip"))
            .await
            .unwrap();
        store
            .put("transfers/TR 3+4.zip", Bytes::from_static(b"spaced"))
            .await
            .unwrap();
        assert_eq!(
            store.get("transfers/TR 3+4.zip").await.unwrap().unwrap(),
            Bytes::from_static(b"spaced")
        );
        assert_eq!(store.list("transfers/").await.unwrap().len(), 2);
        assert!(store.delete("transfers/TR_1_2.zip").await.unwrap());
    }

    #[test]
    fn rejects_endpoint_without_host() {
        let err = S3HttpObjectStore::new(reqwest::Client::new(), "not a url", "dats").unwrap_err();
        assert!(matches!(err, ObjectStoreError::InvalidEndpoint(_)));
    }
}
