//! Logical artifact paths.
//!
//! Paths mirror the public URL of each artifact (`/{board}/res/{thread}.json`)
//! and are validated once so stores can map them onto disk without
//! re-checking for traversal.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::Date;

use super::store::CacheError;

pub const FRONT_PAGE: &str = "/index.json";
pub const NOT_FOUND: &str = "/404.json";
pub const LOGIN: &str = "/login.json";
const LOG_PREFIX: &str = "/.global/logs";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CachePath(String);

impl CachePath {
    pub fn new(value: impl Into<String>) -> Result<Self, CacheError> {
        let value = value.into();
        validate(&value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments without the leading slash.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.trim_start_matches('/').split('/')
    }

    pub fn extension(&self) -> Option<&str> {
        let file = self.0.rsplit('/').next()?;
        let (_, ext) = file.rsplit_once('.')?;
        Some(ext)
    }

    pub fn front_page() -> Self {
        Self(FRONT_PAGE.to_string())
    }

    pub fn not_found() -> Self {
        Self(NOT_FOUND.to_string())
    }

    pub fn login() -> Self {
        Self(LOGIN.to_string())
    }

    pub fn generic_thumb(extension: &str) -> Result<Self, CacheError> {
        Self::new(format!("/genericThumb.{extension}"))
    }

    pub fn thread(board_uri: &str, thread_id: u64) -> Result<Self, CacheError> {
        Self::new(format!("/{board_uri}/res/{thread_id}.json"))
    }

    pub fn board_page(board_uri: &str, page: u32) -> Result<Self, CacheError> {
        Self::new(format!("/{board_uri}/{page}.json"))
    }

    pub fn catalog(board_uri: &str) -> Result<Self, CacheError> {
        Self::new(format!("/{board_uri}/catalog.json"))
    }

    pub fn rules(board_uri: &str) -> Result<Self, CacheError> {
        Self::new(format!("/{board_uri}/rules.json"))
    }

    /// First page of an overboard or of a `a+b+c` multiboard.
    pub fn aggregate(uri: &str) -> Result<Self, CacheError> {
        Self::new(format!("/{uri}/1.json"))
    }

    pub fn log(date: Date) -> Result<Self, CacheError> {
        Self::new(format!("{LOG_PREFIX}/{date}.json"))
    }
}

fn validate(value: &str) -> Result<(), CacheError> {
    let invalid = |reason: &str| CacheError::InvalidPath {
        path: value.to_string(),
        reason: reason.to_string(),
    };

    if !value.starts_with('/') {
        return Err(invalid("must start with `/`"));
    }
    if value.len() == 1 {
        return Err(invalid("must name a file"));
    }
    if value.contains('\\') || value.contains('\0') {
        return Err(invalid("contains a forbidden character"));
    }
    for segment in value[1..].split('/') {
        match segment {
            "" => return Err(invalid("contains an empty segment")),
            "." | ".." => return Err(invalid("contains a relative segment")),
            _ => {}
        }
    }
    Ok(())
}

impl fmt::Display for CachePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CachePath {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CachePath> for String {
    fn from(path: CachePath) -> Self {
        path.0
    }
}
