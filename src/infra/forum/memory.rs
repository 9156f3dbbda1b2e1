//! In-memory data provider for tests and demos.

use std::collections::BTreeSet;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use time::Date;

use super::ForumState;
use crate::application::repos::{BoardWriteRepository, ForumRepository, RepoError};
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::entities::{
    BoardRecord, GlobalStats, LatestImage, LatestPost, LogEntry, PostRecord, ThreadDocument,
    ThreadRecord, UserRecord,
};

const SOURCE: &str = "infra::forum::memory";

#[derive(Default)]
pub struct MemoryForum {
    state: RwLock<ForumState>,
    failing_boards: RwLock<BTreeSet<String>>,
    unavailable: AtomicBool,
}

impl MemoryForum {
    pub fn new(state: ForumState) -> Self {
        Self {
            state: RwLock::new(state),
            ..Self::default()
        }
    }

    /// Apply `change` to the stored state.
    pub fn update(&self, change: impl FnOnce(&mut ForumState)) {
        change(&mut rw_write(&self.state, SOURCE, "update"));
    }

    pub fn snapshot(&self) -> ForumState {
        rw_read(&self.state, SOURCE, "snapshot").clone()
    }

    pub fn put_thread(&self, document: ThreadDocument) {
        self.update(|state| state.insert_thread(document));
    }

    /// Make every query that reads `board_uri` fail until cleared.
    pub fn fail_board(&self, board_uri: &str, failing: bool) {
        let mut boards = rw_write(&self.failing_boards, SOURCE, "fail_board");
        if failing {
            boards.insert(board_uri.to_string());
        } else {
            boards.remove(board_uri);
        }
    }

    /// Make every query fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self, board_uri: Option<&str>) -> Result<(), RepoError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepoError::unavailable("memory forum marked unavailable"));
        }
        if let Some(uri) = board_uri
            && rw_read(&self.failing_boards, SOURCE, "check").contains(uri)
        {
            return Err(RepoError::unavailable(format!("board /{uri}/ marked failing")));
        }
        Ok(())
    }

    fn read<T>(
        &self,
        board_uri: Option<&str>,
        query: impl FnOnce(&ForumState) -> T,
    ) -> Result<T, RepoError> {
        self.check(board_uri)?;
        Ok(query(&rw_read(&self.state, SOURCE, "read")))
    }
}

#[async_trait]
impl ForumRepository for MemoryForum {
    async fn find_board(&self, board_uri: &str) -> Result<Option<BoardRecord>, RepoError> {
        self.read(Some(board_uri), |state| state.boards.get(board_uri).cloned())
    }

    async fn list_boards(&self) -> Result<Vec<BoardRecord>, RepoError> {
        self.read(None, ForumState::list_boards)
    }

    async fn top_boards(&self, limit: usize) -> Result<Vec<BoardRecord>, RepoError> {
        self.read(None, |state| state.top_boards(limit))
    }

    async fn list_threads(&self, board_uri: &str) -> Result<Vec<ThreadRecord>, RepoError> {
        self.read(Some(board_uri), |state| state.list_threads(board_uri))
    }

    async fn thread_posts(
        &self,
        board_uri: &str,
        thread_id: u64,
    ) -> Result<Vec<PostRecord>, RepoError> {
        self.read(Some(board_uri), |state| state.thread_posts(board_uri, thread_id))
    }

    async fn latest_posts(&self, limit: usize) -> Result<Vec<LatestPost>, RepoError> {
        self.read(None, |state| state.latest_posts(limit))
    }

    async fn latest_images(&self, limit: usize) -> Result<Vec<LatestImage>, RepoError> {
        self.read(None, |state| state.latest_images(limit))
    }

    async fn global_stats(&self) -> Result<GlobalStats, RepoError> {
        self.read(None, ForumState::global_stats)
    }

    async fn logs_for_date(&self, date: Date) -> Result<Vec<LogEntry>, RepoError> {
        self.read(None, |state| state.logs_for_date(date))
    }

    async fn log_dates(&self) -> Result<Vec<Date>, RepoError> {
        self.read(None, ForumState::log_dates)
    }
}

#[async_trait]
impl BoardWriteRepository for MemoryForum {
    async fn insert_board(&self, board: BoardRecord) -> Result<(), RepoError> {
        self.check(Some(&board.board_uri))?;
        let mut state = rw_write(&self.state, SOURCE, "insert_board");
        if state.boards.contains_key(&board.board_uri) {
            return Err(RepoError::Duplicate {
                entity: "board",
                id: board.board_uri,
            });
        }
        state.insert_board(board);
        Ok(())
    }

    async fn update_board(&self, board: BoardRecord) -> Result<(), RepoError> {
        self.check(Some(&board.board_uri))?;
        let mut state = rw_write(&self.state, SOURCE, "update_board");
        if !state.boards.contains_key(&board.board_uri) {
            return Err(RepoError::not_found("board", board.board_uri));
        }
        state.insert_board(board);
        Ok(())
    }

    async fn find_user(&self, login: &str) -> Result<Option<UserRecord>, RepoError> {
        self.read(None, |state| state.users.get(login).cloned())
    }

    async fn save_user(&self, user: UserRecord) -> Result<(), RepoError> {
        self.check(None)?;
        rw_write(&self.state, SOURCE, "save_user").insert_user(user);
        Ok(())
    }

    async fn append_log(&self, entry: LogEntry) -> Result<(), RepoError> {
        self.check(None)?;
        rw_write(&self.state, SOURCE, "append_log").logs.push(entry);
        Ok(())
    }
}
