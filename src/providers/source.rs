//! Upload inputs, local validation, and downloaded payloads.

use std::path::{Path, PathBuf};

use reqwest::Response;
use serde::de::DeserializeOwned;

use crate::{MimirError, Result};

/// Something to upload.
#[derive(Debug, Clone)]
pub enum UploadSource {
    /// A file on local disk.
    File(PathBuf),
    /// In-memory bytes with the file name to present to the provider.
    Bytes { data: Vec<u8>, file_name: String },
    /// A JSON document (object or array).
    Json(serde_json::Value),
}

impl UploadSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn bytes(data: impl Into<Vec<u8>>, file_name: impl Into<String>) -> Self {
        Self::Bytes {
            data: data.into(),
            file_name: file_name.into(),
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// An upload that passed local validation.
#[derive(Debug)]
pub(crate) enum PreparedUpload {
    File {
        data: Vec<u8>,
        file_name: String,
        content_type: &'static str,
    },
    Json(serde_json::Value),
}

impl PreparedUpload {
    /// Size in bytes of what will be sent.
    pub(crate) fn size(&self) -> usize {
        match self {
            Self::File { data, .. } => data.len(),
            Self::Json(value) => value.to_string().len(),
        }
    }

    pub(crate) fn content_type(&self) -> &'static str {
        match self {
            Self::File { content_type, .. } => content_type,
            Self::Json(_) => "application/json",
        }
    }
}

/// Validate `source` against size and type rules, reading files into memory.
///
/// No network I/O happens here; every failure is a `Validation` error.
pub(crate) async fn prepare(
    provider: &str,
    source: UploadSource,
    max_bytes: u64,
) -> Result<PreparedUpload> {
    match source {
        UploadSource::File(path) => {
            let meta = tokio::fs::metadata(&path).await.map_err(|e| {
                MimirError::validation(provider, format!("cannot read {}: {e}", path.display()))
            })?;
            if !meta.is_file() {
                return Err(MimirError::validation(
                    provider,
                    format!("{} is not a regular file", path.display()),
                ));
            }
            check_size(provider, meta.len(), max_bytes)?;
            let data = tokio::fs::read(&path).await.map_err(|e| {
                MimirError::validation(provider, format!("cannot read {}: {e}", path.display()))
            })?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string());
            Ok(PreparedUpload::File {
                content_type: guess_content_type(&path),
                data,
                file_name,
            })
        }
        UploadSource::Bytes { data, file_name } => {
            check_size(provider, data.len() as u64, max_bytes)?;
            if file_name.trim().is_empty() {
                return Err(MimirError::validation(provider, "file name must not be empty"));
            }
            Ok(PreparedUpload::File {
                content_type: guess_content_type(Path::new(&file_name)),
                data,
                file_name,
            })
        }
        UploadSource::Json(value) => {
            if !(value.is_object() || value.is_array()) {
                return Err(MimirError::validation(
                    provider,
                    "JSON uploads must be an object or an array",
                ));
            }
            check_size(provider, value.to_string().len() as u64, max_bytes)?;
            Ok(PreparedUpload::Json(value))
        }
    }
}

fn check_size(provider: &str, len: u64, max_bytes: u64) -> Result<()> {
    if len == 0 {
        return Err(MimirError::validation(provider, "upload is empty"));
    }
    if len > max_bytes {
        return Err(MimirError::validation(
            provider,
            format!("upload is {len} bytes, limit is {max_bytes}"),
        ));
    }
    Ok(())
}

/// MIME type from the file extension; octet-stream when unknown.
pub(crate) fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("json") => "application/json",
        Some("txt") | Some("md") => "text/plain",
        Some("csv") => "text/csv",
        Some("html") | Some("htm") => "text/html",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

/// Downloaded content.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl Payload {
    /// Collect a successful response body.
    pub(crate) async fn from_response(provider: &str, response: Response) -> Result<Self> {
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| MimirError::from_reqwest(provider, e))?;
        Ok(Self {
            bytes: bytes.to_vec(),
            content_type,
        })
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.bytes)?)
    }

    /// Borrow the body as UTF-8 text.
    pub fn text(&self) -> std::result::Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
