//! HTTP client for the RepRapFirmware web interface
//!
//! Implements [`RemoteFileService`] on top of the legacy `rr_*` endpoints
//! and adds the single-step operations used by the command layer.

use crate::remote::{
    FetchedFile, FileInfo, Filelist, RemoteEntry, RemoteError, RemoteFileManager,
    RemoteFileService,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, LocalResult, NaiveDateTime, TimeZone, Utc};
use futures::future::{BoxFuture, FutureExt};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, trace};

/// Timestamp format used by the device in listings and uploads
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Client for a single device
#[derive(Clone)]
pub struct RrfClient {
    http: Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct ErrReply {
    #[serde(default)]
    err: i64,
}

#[derive(Debug, Deserialize)]
struct FilelistReply {
    #[serde(default)]
    err: i64,
    #[serde(default)]
    dir: String,
    #[serde(default)]
    files: Vec<FileJson>,
    #[serde(default)]
    next: u64,
}

#[derive(Debug, Deserialize)]
struct FileJson {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileinfoReply {
    #[serde(default)]
    err: i64,
    #[serde(default)]
    size: u64,
    #[serde(default, rename = "lastModified")]
    last_modified: Option<String>,
}

impl RrfClient {
    /// Client for `http://domain:port`
    pub fn new(domain: &str, port: u16) -> Result<Self, RemoteError> {
        Self::with_base_url(&format!("http://{}:{}", domain, port))
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, RemoteError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Open a session with the given password
    pub async fn connect(&self, password: &str) -> Result<(), RemoteError> {
        let time = Local::now().format(TIME_FORMAT).to_string();
        let url = self.endpoint("rr_connect", &[("password", password), ("time", &time)])?;
        let reply: ErrReply = self.get_json(url).await?;
        match reply.err {
            0 => Ok(()),
            1 => Err(firmware(1, "connect (invalid password)")),
            2 => Err(firmware(2, "connect (no more sessions available)")),
            code => Err(firmware(code, "connect")),
        }
    }

    pub async fn disconnect(&self) -> Result<(), RemoteError> {
        let url = self.endpoint("rr_disconnect", &[])?;
        let reply: ErrReply = self.get_json(url).await?;
        check_err(reply.err, "disconnect")
    }

    /// Fetch one directory level, following the device's pagination
    async fn list_level(&self, path: &str) -> Result<Filelist, RemoteError> {
        let mut first = 0u64;
        let mut list = Filelist {
            dir: path.to_string(),
            ..Default::default()
        };

        loop {
            let first_param = first.to_string();
            let url = self.endpoint("rr_filelist", &[("dir", path), ("first", &first_param)])?;
            let reply: FilelistReply = self.get_json(url).await?;
            check_err(reply.err, path)?;

            if !reply.dir.is_empty() {
                list.dir = reply.dir;
            }
            for file in reply.files {
                list.files.push(file.into_entry()?);
            }

            if reply.next == 0 || reply.next <= first {
                break;
            }
            first = reply.next;
        }

        Ok(list)
    }

    fn list_recursive<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Filelist, RemoteError>> {
        async move {
            let mut list = self.list_level(path).await?;
            let subdirs: Vec<String> = list
                .files
                .iter()
                .filter(|f| f.is_dir)
                .map(|f| list.child_path(&f.name))
                .collect();
            for subdir in subdirs {
                let sub = self.list_recursive(&subdir).await?;
                list.subdirs.push(sub);
            }
            Ok(list)
        }
        .boxed()
    }

    fn endpoint(&self, name: &str, params: &[(&str, &str)]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.join(name)?;
        if !params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, RemoteError> {
        trace!("GET {}", url);
        let response = self.http.get(url).send().await?;
        Self::handle_json(response).await
    }

    async fn handle_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RemoteError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(RemoteError::Status { status, body })
        }
    }
}

#[async_trait]
impl RemoteFileService for RrfClient {
    async fn list_directory(&self, path: &str, recursive: bool) -> Result<Filelist, RemoteError> {
        if recursive {
            self.list_recursive(path).await
        } else {
            self.list_level(path).await
        }
    }

    async fn fetch_file(&self, path: &str) -> Result<FetchedFile, RemoteError> {
        let url = self.endpoint("rr_download", &[("name", path)])?;
        trace!("GET {}", url);

        let start = Instant::now();
        let response = self.http.get(url).send().await?;
        match response.status() {
            status if status.is_success() => {
                let bytes = response.bytes().await?.to_vec();
                Ok(FetchedFile {
                    bytes,
                    elapsed: start.elapsed(),
                })
            }
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound(path.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(RemoteError::Status { status, body })
            }
        }
    }
}

#[async_trait]
impl RemoteFileManager for RrfClient {
    async fn upload(
        &self,
        path: &str,
        content: Vec<u8>,
        modified: DateTime<Utc>,
    ) -> Result<(), RemoteError> {
        let time = format_device_time(modified);
        let url = self.endpoint("rr_upload", &[("name", path), ("time", &time)])?;
        debug!("POST {}", url);
        let response = self.http.post(url).body(content).send().await?;
        let reply: ErrReply = Self::handle_json(response).await?;
        check_err(reply.err, path)
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        let url = self.endpoint("rr_delete", &[("name", path)])?;
        let reply: ErrReply = self.get_json(url).await?;
        check_err(reply.err, path)
    }

    async fn mkdir(&self, path: &str) -> Result<(), RemoteError> {
        let url = self.endpoint("rr_mkdir", &[("dir", path)])?;
        let reply: ErrReply = self.get_json(url).await?;
        check_err(reply.err, path)
    }

    async fn move_entry(
        &self,
        old_path: &str,
        new_path: &str,
        delete_existing: bool,
    ) -> Result<(), RemoteError> {
        let mut params = vec![("old", old_path), ("new", new_path)];
        if delete_existing {
            params.push(("deleteexisting", "yes"));
        }
        let url = self.endpoint("rr_move", &params)?;
        let reply: ErrReply = self.get_json(url).await?;
        check_err(reply.err, old_path)
    }

    async fn fileinfo(&self, path: &str) -> Result<FileInfo, RemoteError> {
        let url = self.endpoint("rr_fileinfo", &[("name", path)])?;
        let reply: FileinfoReply = self.get_json(url).await?;
        check_err(reply.err, path)?;
        let last_modified = reply
            .last_modified
            .as_deref()
            .map(parse_device_time)
            .transpose()?;
        Ok(FileInfo {
            size: reply.size,
            last_modified,
        })
    }
}

impl FileJson {
    fn into_entry(self) -> Result<RemoteEntry, RemoteError> {
        let modified_at = match self.date.as_deref() {
            Some(date) if !date.is_empty() => parse_device_time(date)?,
            _ => DateTime::<Utc>::default(),
        };
        Ok(RemoteEntry {
            name: self.name,
            size: self.size,
            modified_at,
            is_dir: self.kind == "d",
        })
    }
}

fn firmware(code: i64, context: &str) -> RemoteError {
    RemoteError::Firmware {
        code,
        context: context.to_string(),
    }
}

fn check_err(code: i64, context: &str) -> Result<(), RemoteError> {
    if code == 0 {
        Ok(())
    } else {
        Err(firmware(code, context))
    }
}

/// Parse a device timestamp
///
/// The firmware reports its local wall clock without a zone; such values are
/// read in the host's local time zone. RFC 3339 values are accepted as-is.
///
/// A wall-clock time skipped by a forward DST transition is read with the
/// offset in force before the gap, so `02:30` in a `02:00 -> 03:00` gap
/// becomes `03:30` after the change.
pub fn parse_device_time(value: &str) -> Result<DateTime<Utc>, RemoteError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, TIME_FORMAT)
        .map_err(|_| RemoteError::InvalidTimestamp(value.to_string()))?;
    let local = match Local.from_local_datetime(&naive) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t,
        LocalResult::None => Local
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .ok_or_else(|| RemoteError::InvalidTimestamp(value.to_string()))?,
    };
    Ok(local.with_timezone(&Utc))
}

/// Format a timestamp the way the device expects it
pub fn format_device_time(value: DateTime<Utc>) -> String {
    value.with_timezone(&Local).format(TIME_FORMAT).to_string()
}
