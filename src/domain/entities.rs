//! Forum records as handed over by the data provider.
//!
//! These mirror stored documents one-to-one. Builders never serialize them
//! directly onto public artifacts; see `application::builder` for the
//! allow-listed projections.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoardRecord {
    pub board_uri: String,
    pub board_name: String,
    pub board_description: String,
    pub board_message: Option<String>,
    pub board_markdown: Option<String>,
    pub owner: String,
    pub ip_salt: String,
    pub settings: Vec<String>,
    pub special_settings: Vec<String>,
    pub tags: Vec<String>,
    pub accepted_mimes: Option<Vec<String>>,
    pub volunteers: Vec<String>,
    pub anonymous_name: Option<String>,
    pub captcha_mode: u8,
    pub max_files: Option<u32>,
    #[serde(rename = "maxFileSizeMB")]
    pub max_file_size_mb: Option<u32>,
    pub auto_sage_limit: Option<u32>,
    pub max_thread_count: Option<u32>,
    pub hourly_thread_limit: Option<u32>,
    pub auto_captcha_threshold: Option<u32>,
    pub location_flag_mode: u8,
    pub max_bump_age_days: Option<u32>,
    pub uses_custom_css: bool,
    pub uses_custom_js: bool,
    pub uses_custom_spoiler: bool,
    pub rules: Vec<String>,
    pub flags: Vec<FlagRecord>,
    pub unique_ips: u64,
    pub last_post_id: u64,
    pub posts_per_hour: u64,
}

impl BoardRecord {
    pub fn has_setting(&self, setting: &str) -> bool {
        self.settings.iter().any(|value| value == setting)
    }

    pub fn has_special_setting(&self, setting: &str) -> bool {
        self.special_settings.iter().any(|value| value == setting)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagRecord {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub original_name: String,
    pub path: String,
    pub thumb: String,
    pub mime: String,
    pub size: u64,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub md5: String,
}

/// Content shared by thread openings and replies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Posting {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub signed_role: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub flag: Option<String>,
    #[serde(default)]
    pub flag_name: Option<String>,
    #[serde(default)]
    pub flag_code: Option<String>,
    /// Per-thread poster id, not the post number.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_edit_time: Option<OffsetDateTime>,
    #[serde(default)]
    pub last_edit_login: Option<String>,
    #[serde(default)]
    pub markdown: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub ban_message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub creation: OffsetDateTime,
    #[serde(default)]
    pub files: Vec<FileRecord>,
    #[serde(default)]
    pub ip: Option<IpAddr>,
}

impl Posting {
    pub fn new(creation: OffsetDateTime, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            name: None,
            signed_role: None,
            email: None,
            flag: None,
            flag_name: None,
            flag_code: None,
            id: None,
            subject: None,
            last_edit_time: None,
            last_edit_login: None,
            markdown: message.clone(),
            message,
            ban_message: None,
            creation,
            files: Vec::new(),
            ip: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRecord {
    pub board_uri: String,
    pub thread_id: u64,
    #[serde(default)]
    pub post_count: u32,
    #[serde(default)]
    pub file_count: u32,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub cyclic: bool,
    #[serde(default)]
    pub auto_sage: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_bump: OffsetDateTime,
    #[serde(flatten)]
    pub posting: Posting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    pub board_uri: String,
    pub thread_id: u64,
    pub post_id: u64,
    #[serde(flatten)]
    pub posting: Posting,
}

/// A thread together with every reply, as stored by the file-backed provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadDocument {
    pub thread: ThreadRecord,
    #[serde(default)]
    pub posts: Vec<PostRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestPost {
    pub board_uri: String,
    pub thread_id: u64,
    pub post_id: u64,
    pub preview_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestImage {
    pub board_uri: String,
    pub thread_id: u64,
    pub post_id: u64,
    pub thumb: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalStats {
    pub total_posts: u64,
    pub total_ips: u64,
    #[serde(rename = "totalPPH")]
    pub total_pph: u64,
    pub total_boards: u64,
    pub total_files: u64,
    pub total_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    pub id: String,
    #[serde(default)]
    pub board_uri: Option<String>,
    pub thread_id: u64,
    #[serde(default)]
    pub post_id: Option<u64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub creation: OffsetDateTime,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub closed_by: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub closing: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanRecord {
    pub id: String,
    #[serde(default)]
    pub board_uri: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expiration: Option<OffsetDateTime>,
    pub applied_by: String,
    #[serde(default)]
    pub appeal: Option<String>,
    #[serde(default)]
    pub denied: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeBanRecord {
    pub id: String,
    #[serde(default)]
    pub board_uri: Option<String>,
    /// Leading octets of the banned network.
    pub range: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashBanRecord {
    pub id: String,
    #[serde(default)]
    pub board_uri: Option<String>,
    pub md5: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRecord {
    pub board_uri: String,
    pub original_term: String,
    pub replacement_term: String,
    #[serde(default)]
    pub case_sensitive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub user: String,
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    #[serde(default)]
    pub global: bool,
    #[serde(default)]
    pub board_uri: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub login: String,
    #[serde(default)]
    pub global_role: u8,
    #[serde(default)]
    pub owned_boards: Vec<String>,
    #[serde(default)]
    pub volunteered_boards: Vec<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
}

impl UserRecord {
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            global_role: 0,
            owned_boards: Vec::new(),
            volunteered_boards: Vec::new(),
            last_seen: None,
        }
    }
}
