//! File records referenced by tasks.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifier of a stored file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct FileId(pub i64);

impl FileId {
    /// Interpret a JSON value (number or numeric string) as a file id.
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = match value {
            Value::Number(n) => n.as_i64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        (id > 0).then_some(Self(id))
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A file known to the system.
///
/// `storage_pointer` is a blob key once the bytes live in the blob store.
/// Lazily registered remote files start with the source URL as pointer and
/// `is_remote = true` until first materialization promotes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FileRecord {
    pub id: FileId,
    pub owner_id: String,
    /// Size in bytes (0 until known for remote files)
    #[serde(default)]
    pub size: u64,
    pub content_type: String,
    pub storage_pointer: String,
    #[serde(default)]
    pub is_remote: bool,
    /// Original filename, used to pick an extension for working copies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields required to create a file record; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFile {
    pub owner_id: String,
    pub size: u64,
    pub content_type: String,
    pub storage_pointer: String,
    pub is_remote: bool,
    pub original_name: Option<String>,
}

impl NewFile {
    /// A file whose bytes are already in the blob store.
    pub fn stored(
        owner_id: impl Into<String>,
        key: impl Into<String>,
        size: u64,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            size,
            content_type: content_type.into(),
            storage_pointer: key.into(),
            is_remote: false,
            original_name: None,
        }
    }

    /// A lazily registered remote file, fetched on first use.
    pub fn remote(owner_id: impl Into<String>, url: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            size: 0,
            content_type: content_type.into(),
            storage_pointer: url.into(),
            is_remote: true,
            original_name: None,
        }
    }

    pub fn with_original_name(mut self, name: impl Into<String>) -> Self {
        self.original_name = Some(name.into());
        self
    }

    /// Materialize into a record with the given id.
    pub fn into_record(self, id: FileId) -> FileRecord {
        FileRecord {
            id,
            owner_id: self.owner_id,
            size: self.size,
            content_type: self.content_type,
            storage_pointer: self.storage_pointer,
            is_remote: self.is_remote,
            original_name: self.original_name,
            created_at: Utc::now(),
        }
    }
}

impl FileRecord {
    /// Best-effort file extension, from the original name, the pointer, or
    /// the content type.
    pub fn extension(&self) -> String {
        let from_name = |name: &str| {
            let last = name.rsplit('/').next().unwrap_or(name);
            let last = last.split(['?', '#']).next().unwrap_or(last);
            last.rsplit_once('.')
                .map(|(_, ext)| ext.to_ascii_lowercase())
                .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        };

        self.original_name
            .as_deref()
            .and_then(from_name)
            .or_else(|| from_name(&self.storage_pointer))
            .unwrap_or_else(|| extension_for_content_type(&self.content_type).to_string())
    }
}

/// Map a content type to a conventional file extension.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    match content_type {
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "video/x-matroska" => "mkv",
        "audio/mpeg" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/aac" => "aac",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "application/x-subrip" | "text/srt" => "srt",
        "text/vtt" => "vtt",
        "text/x-ssa" => "ass",
        _ => "bin",
    }
}

/// Map a file extension to a content type.
pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "aac" => "audio/aac",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "srt" => "application/x-subrip",
        "vtt" => "text/vtt",
        "ass" => "text/x-ssa",
        _ => "application/octet-stream",
    }
}
