//! Google Drive v3 storage: OAuth refresh-token auth, folders, resumable
//! chunked uploads, public links and name search.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use mirror_core::format::format_size;
use mirror_core::ports::{CloudStorage, FOLDER_MIME};
use mirror_core::{StorageError, UploadProgress};
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, LOCATION};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";

/// Resumable chunks must be multiples of 256 KiB.
const CHUNK_SIZE: usize = 32 * 1024 * 1024;
/// Refresh this long before the access token actually expires.
const TOKEN_SLACK: Duration = Duration::from_secs(60);

pub fn file_link(id: &str, is_folder: bool) -> String {
    if is_folder {
        format!("https://drive.google.com/drive/folders/{id}")
    } else {
        format!("https://drive.google.com/uc?id={id}&export=download")
    }
}

/// Drive `files.list` query matching `name` under `parent`. Names with
/// spaces also try the dotted, dashed and underscored spellings.
pub fn search_query(name: &str, parent: &str) -> String {
    let mut variants = vec![name.to_string()];
    if name.contains(' ') {
        let dotted = name.replace(' ', ".");
        let dashed = dotted.replace('.', "-");
        let underscored = dashed.replace('-', "_");
        variants.extend([dotted, dashed, underscored]);
    }
    let clauses: Vec<String> =
        variants.iter().map(|v| format!("name contains '{}'", escape_query(v))).collect();
    format!("'{}' in parents and ({})", escape_query(parent), clauses.join(" or "))
}

fn escape_query(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// One `/list` reply line per file, or a notice when nothing matched.
pub fn files_list_message(files: &[DriveFile]) -> String {
    if files.is_empty() {
        return "There are no files matching your parameters".to_string();
    }
    files
        .iter()
        .map(|f| {
            let is_folder = f.mime_type == FOLDER_MIME;
            let link = format!("<a href='{}'>{}</a>", file_link(&f.id, is_folder), f.name);
            match f.size.as_deref().and_then(|s| s.parse::<u64>().ok()) {
                Some(size) => format!("{link} ({})", format_size(size)),
                None if is_folder => format!("{link} (folder)"),
                None => link,
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `Content-Range` value for one chunk of a resumable upload.
fn content_range(start: u64, len: u64, total: u64) -> String {
    if len == 0 {
        format!("bytes */{total}")
    } else {
        format!("bytes {start}-{}/{total}", start + len - 1)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    /// Decimal string; folders have none.
    pub size: Option<String>,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
struct FileId {
    id: String,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

pub struct DriveClient {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    token: Mutex<Option<AccessToken>>,
}

impl DriveClient {
    pub fn new(client_id: String, client_secret: String, refresh_token: String) -> Self {
        Self { client: reqwest::Client::new(), client_id, client_secret, refresh_token, token: Mutex::new(None) }
    }

    /// Cached access token, refreshed when close to expiry.
    pub async fn access_token(&self) -> Result<String, StorageError> {
        let mut cached = self.token.lock().await;
        if let Some(t) = cached.as_ref() {
            if Instant::now() + TOKEN_SLACK < t.expires_at {
                return Ok(t.value.clone());
            }
        }

        let resp = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| StorageError::Auth(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Auth(format!("HTTP {status}: {body}")));
        }
        let token: TokenResponse = resp.json().await.map_err(|e| StorageError::Auth(e.to_string()))?;
        debug!(expires_in = token.expires_in, "drive: access token refreshed");

        let value = token.access_token.clone();
        *cached = Some(AccessToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }

    /// Newest first, at most 20 matches below `parent`.
    pub async fn list_files(&self, name: &str, parent: &str) -> Result<Vec<DriveFile>, StorageError> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .get(FILES_URL)
            .query(&[
                ("q", search_query(name, parent).as_str()),
                ("fields", "files(id, name, mimeType, size)"),
                ("orderBy", "modifiedTime desc"),
                ("pageSize", "20"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ])
            .bearer_auth(token)
            .send()
            .await
            .map_err(request_error)?;
        let list: FileList = checked(resp).await?.json().await.map_err(request_error)?;
        debug!(query=%name, found = list.files.len(), "drive: list");
        Ok(list.files)
    }

    async fn create_folder(&self, name: &str, parent: &str) -> Result<String, StorageError> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .post(FILES_URL)
            .query(&[("supportsAllDrives", "true"), ("fields", "id")])
            .bearer_auth(token)
            .json(&json!({ "name": name, "mimeType": FOLDER_MIME, "parents": [parent] }))
            .send()
            .await
            .map_err(request_error)?;
        let file: FileId = checked(resp).await?.json().await.map_err(request_error)?;
        Ok(file.id)
    }

    async fn upload_file(
        &self,
        path: &Path,
        name: &str,
        mime: &str,
        parent: &str,
        size: u64,
        progress: &UploadProgress,
    ) -> Result<String, StorageError> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .post(UPLOAD_URL)
            .query(&[("uploadType", "resumable"), ("supportsAllDrives", "true")])
            .bearer_auth(&token)
            .header("X-Upload-Content-Length", size.to_string())
            .header("X-Upload-Content-Type", mime)
            .json(&json!({ "name": name, "mimeType": mime, "parents": [parent] }))
            .send()
            .await
            .map_err(request_error)?;
        let resp = checked(resp).await?;
        let session = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| StorageError::Request("resumable session returned no location".to_string()))?;
        info!(name, size, "drive: uploading");

        let mut file = tokio::fs::File::open(path).await?;
        let mut offset = 0u64;
        loop {
            let mut buf = Vec::with_capacity(CHUNK_SIZE.min(size.saturating_sub(offset) as usize));
            (&mut file).take(CHUNK_SIZE as u64).read_to_end(&mut buf).await?;
            let len = buf.len() as u64;

            let resp = self
                .client
                .put(&session)
                .header(CONTENT_TYPE, mime)
                .header(CONTENT_RANGE, content_range(offset, len, size))
                .body(Bytes::from(buf))
                .send()
                .await
                .map_err(request_error)?;
            offset += len;
            progress.add(len);

            match resp.status() {
                StatusCode::OK | StatusCode::CREATED => {
                    let file: FileId = resp.json().await.map_err(request_error)?;
                    return Ok(file.id);
                }
                // 308: chunk accepted, more expected.
                s if s.as_u16() == 308 && len > 0 => continue,
                _ => {
                    checked(resp).await?;
                    return Err(StorageError::Request(format!("upload of {name} stopped at {offset} of {size} bytes")));
                }
            }
        }
    }
}

fn request_error(e: reqwest::Error) -> StorageError {
    StorageError::Request(e.to_string())
}

/// Turns a non-success response into an error carrying its body.
async fn checked(resp: reqwest::Response) -> Result<reqwest::Response, StorageError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(StorageError::Request(format!("HTTP {status}: {body}")))
}

#[async_trait]
impl CloudStorage for DriveClient {
    async fn upload_path(
        &self,
        path: &Path,
        mime: &str,
        parent: &str,
        size: u64,
        progress: &UploadProgress,
    ) -> Result<String, StorageError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        if mime == FOLDER_MIME {
            self.create_folder(&name, parent).await
        } else {
            self.upload_file(path, &name, mime, parent, size, progress).await
        }
    }

    async fn create_shareable_link(&self, remote_id: &str, is_folder: bool) -> Result<String, StorageError> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .post(format!("{FILES_URL}/{remote_id}/permissions"))
            .query(&[("supportsAllDrives", "true")])
            .bearer_auth(token)
            .json(&json!({ "role": "reader", "type": "anyone" }))
            .send()
            .await
            .map_err(request_error)?;
        checked(resp).await?;
        Ok(file_link(remote_id, is_folder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_by_kind() {
        assert_eq!(file_link("abc", true), "https://drive.google.com/drive/folders/abc");
        assert_eq!(file_link("abc", false), "https://drive.google.com/uc?id=abc&export=download");
    }

    #[test]
    fn content_ranges() {
        assert_eq!(content_range(0, 10, 10), "bytes 0-9/10");
        assert_eq!(content_range(32, 8, 40), "bytes 32-39/40");
        assert_eq!(content_range(0, 0, 0), "bytes */0");
    }

    #[test]
    fn search_query_single_word() {
        assert_eq!(search_query("ubuntu", "root"), "'root' in parents and (name contains 'ubuntu')");
    }

    #[test]
    fn search_query_tries_spellings_and_escapes() {
        let q = search_query("it's a.b", "root");
        assert_eq!(
            q,
            "'root' in parents and (name contains 'it\\'s a.b' or name contains 'it\\'s.a.b' \
             or name contains 'it\\'s-a-b' or name contains 'it\\'s_a_b')"
        );
    }

    #[test]
    fn list_message_lines() {
        let files = vec![
            DriveFile { id: "f1".into(), name: "a.iso".into(), mime_type: "application/x-iso9660-image".into(), size: Some("2048".into()) },
            DriveFile { id: "d1".into(), name: "Show".into(), mime_type: FOLDER_MIME.into(), size: None },
        ];
        assert_eq!(
            files_list_message(&files),
            "<a href='https://drive.google.com/uc?id=f1&export=download'>a.iso</a> (2KB)\n\
             <a href='https://drive.google.com/drive/folders/d1'>Show</a> (folder)"
        );
        assert_eq!(files_list_message(&[]), "There are no files matching your parameters");
    }

    #[test]
    fn chunk_size_is_resumable_multiple() {
        assert_eq!(CHUNK_SIZE % (256 * 1024), 0);
    }
}
