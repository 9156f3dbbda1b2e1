//! Repository traits describing the forum data provider.

use async_trait::async_trait;
use thiserror::Error;
use time::Date;

use crate::domain::entities::{
    BoardRecord, GlobalStats, LatestImage, LatestPost, LogEntry, PostRecord, ThreadRecord,
    UserRecord,
};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: String },
    #[error("data provider unavailable: {0}")]
    Unavailable(String),
    #[error("malformed {entity} record `{id}`: {reason}")]
    Malformed {
        entity: &'static str,
        id: String,
        reason: String,
    },
    #[error("duplicate {entity} `{id}`")]
    Duplicate { entity: &'static str, id: String },
}

impl RepoError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn malformed(
        entity: &'static str,
        id: impl Into<String>,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::Malformed {
            entity,
            id: id.into(),
            reason: reason.to_string(),
        }
    }
}

/// Read side of the data provider, queried fresh on every rebuild.
#[async_trait]
pub trait ForumRepository: Send + Sync {
    async fn find_board(&self, board_uri: &str) -> Result<Option<BoardRecord>, RepoError>;

    /// Every board, ordered by URI.
    async fn list_boards(&self) -> Result<Vec<BoardRecord>, RepoError>;

    /// Boards ranked for the front page: most unique posters first.
    async fn top_boards(&self, limit: usize) -> Result<Vec<BoardRecord>, RepoError>;

    /// Threads of a board in index order: pinned first, then latest bump.
    async fn list_threads(&self, board_uri: &str) -> Result<Vec<ThreadRecord>, RepoError>;

    /// Replies of a thread in posting order.
    async fn thread_posts(
        &self,
        board_uri: &str,
        thread_id: u64,
    ) -> Result<Vec<PostRecord>, RepoError>;

    async fn latest_posts(&self, limit: usize) -> Result<Vec<LatestPost>, RepoError>;

    async fn latest_images(&self, limit: usize) -> Result<Vec<LatestImage>, RepoError>;

    async fn global_stats(&self) -> Result<GlobalStats, RepoError>;

    async fn logs_for_date(&self, date: Date) -> Result<Vec<LogEntry>, RepoError>;

    /// Days that have at least one log entry, newest first.
    async fn log_dates(&self) -> Result<Vec<Date>, RepoError>;
}

/// Write side used by board administration.
#[async_trait]
pub trait BoardWriteRepository: Send + Sync {
    async fn insert_board(&self, board: BoardRecord) -> Result<(), RepoError>;

    async fn update_board(&self, board: BoardRecord) -> Result<(), RepoError>;

    async fn find_user(&self, login: &str) -> Result<Option<UserRecord>, RepoError>;

    async fn save_user(&self, user: UserRecord) -> Result<(), RepoError>;

    async fn append_log(&self, entry: LogEntry) -> Result<(), RepoError>;
}
