use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rand::{thread_rng, Rng};
use rocket::http::ContentType;

use crate::error::MarketError;
use crate::validation::extension_of;

const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadInfo {
    pub file_name: String,
    pub file_path: PathBuf,
    pub content_type: ContentType,
    pub expires_at: DateTime<Utc>,
}

/// In-memory table of download tokens. Entries live until they are looked up
/// after expiry, revoked, or swept by the next issuance.
pub struct DownloadTokens {
    ttl: Duration,
    entries: Mutex<HashMap<String, DownloadInfo>>,
}

impl DownloadTokens {
    pub fn new(ttl: Duration) -> DownloadTokens {
        DownloadTokens {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Issues a token for a file that must exist on disk.
    pub fn issue(&self, file_path: &Path) -> Result<String, MarketError> {
        if !file_path.is_file() {
            return Err(MarketError::NotFound("product file"));
        }
        self.issue_at(file_path, Utc::now())
    }

    pub(crate) fn issue_at(&self, file_path: &Path, now: DateTime<Utc>) -> Result<String, MarketError> {
        let token = generate_token();
        let file_name = file_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("download")
            .to_string();

        let info = DownloadInfo {
            content_type: guess_content_type(&file_name),
            file_name,
            file_path: file_path.to_path_buf(),
            expires_at: now + self.ttl,
        };

        let mut entries = self.lock()?;
        entries.retain(|_, entry| entry.expires_at >= now);
        entries.insert(token.clone(), info);

        Ok(token)
    }

    /// Returns the record for a live token. An expired token is evicted.
    pub fn lookup(&self, token: &str) -> Option<DownloadInfo> {
        self.lookup_at(token, Utc::now())
    }

    pub(crate) fn lookup_at(&self, token: &str, now: DateTime<Utc>) -> Option<DownloadInfo> {
        let mut entries = self.lock().ok()?;
        let expired = now > entries.get(token)?.expires_at;
        if expired {
            entries.remove(token);
            return None;
        }
        entries.get(token).cloned()
    }

    pub fn revoke(&self, token: &str) {
        if let Ok(mut entries) = self.lock() {
            entries.remove(token);
        }
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    pub(crate) fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        match self.lock() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|_, entry| entry.expires_at >= now);
                before - entries.len()
            }
            Err(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, DownloadInfo>>, MarketError> {
        self.entries
            .lock()
            .map_err(|_| MarketError::Internal("download token table is poisoned".to_string()))
    }
}

fn generate_token() -> String {
    let bytes: [u8; TOKEN_BYTES] = thread_rng().gen();
    hex::encode(bytes)
}

pub fn guess_content_type(file_name: &str) -> ContentType {
    match extension_of(file_name).as_deref() {
        Some("jpg") | Some("jpeg") => ContentType::JPEG,
        Some("png") => ContentType::PNG,
        Some("gif") => ContentType::GIF,
        Some("pdf") => ContentType::PDF,
        Some("zip") => ContentType::ZIP,
        Some("mp3") => ContentType::new("audio", "mpeg"),
        Some("mp4") => ContentType::MP4,
        _ => ContentType::Binary,
    }
}
