//! Data provider reading JSON documents from the data directory.
//!
//! Layout:
//!
//! - `boards/<uri>/board.json`
//! - `boards/<uri>/threads/<thread id>.json` holding the thread and its replies
//! - `users/<login>.json`
//! - `logs/<YYYY-MM-DD>.json` holding that day's entries
//!
//! Nothing is cached between calls; every query sees the files as they are.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use time::Date;
use time::macros::format_description;
use tokio::task;
use tracing::warn;

use super::ForumState;
use crate::application::repos::{BoardWriteRepository, ForumRepository, RepoError};
use crate::domain::entities::{
    BoardRecord, GlobalStats, LatestImage, LatestPost, LogEntry, PostRecord, ThreadDocument,
    ThreadRecord, UserRecord,
};

const BOARDS_DIR: &str = "boards";
const THREADS_DIR: &str = "threads";
const USERS_DIR: &str = "users";
const LOGS_DIR: &str = "logs";
const BOARD_FILE: &str = "board.json";

#[derive(Debug, Clone)]
pub struct FsForum {
    root: PathBuf,
}

impl FsForum {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write a thread document, replacing any previous version.
    pub async fn save_thread(&self, document: ThreadDocument) -> Result<(), RepoError> {
        let root = self.root.clone();
        blocking(move || {
            let target = thread_file(
                &root,
                &document.thread.board_uri,
                document.thread.thread_id,
            )?;
            write_json(&target, &document)
        })
        .await
    }

    async fn query<T, F>(&self, load: F) -> Result<T, RepoError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, RepoError> + Send + 'static,
    {
        let root = self.root.clone();
        blocking(move || load(&root)).await
    }
}

async fn blocking<T, F>(work: F) -> Result<T, RepoError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RepoError> + Send + 'static,
{
    task::spawn_blocking(work)
        .await
        .map_err(|err| RepoError::unavailable(format!("data provider task failed: {err}")))?
}

fn checked_segment<'a>(entity: &'static str, value: &'a str) -> Result<&'a str, RepoError> {
    if value.is_empty() || value.starts_with('.') || value.contains(['/', '\\']) {
        return Err(RepoError::malformed(entity, value, "not usable as a file name"));
    }
    Ok(value)
}

fn board_dir(root: &Path, board_uri: &str) -> Result<PathBuf, RepoError> {
    Ok(root.join(BOARDS_DIR).join(checked_segment("board", board_uri)?))
}

fn thread_file(root: &Path, board_uri: &str, thread_id: u64) -> Result<PathBuf, RepoError> {
    Ok(board_dir(root, board_uri)?
        .join(THREADS_DIR)
        .join(format!("{thread_id}.json")))
}

fn user_file(root: &Path, login: &str) -> Result<PathBuf, RepoError> {
    Ok(root
        .join(USERS_DIR)
        .join(format!("{}.json", checked_segment("user", login)?)))
}

fn log_file(root: &Path, date: Date) -> Result<PathBuf, RepoError> {
    let name = date
        .format(format_description!("[year]-[month]-[day]"))
        .map_err(|err| RepoError::malformed("log", date.to_string(), err))?;
    Ok(root.join(LOGS_DIR).join(format!("{name}.json")))
}

fn read_json<T: DeserializeOwned>(entity: &'static str, path: &Path) -> Result<Option<T>, RepoError> {
    match std::fs::read(path) {
        Ok(raw) => serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|err| RepoError::malformed(entity, path.display().to_string(), err)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(RepoError::unavailable(format!(
            "reading {}: {err}",
            path.display()
        ))),
    }
}

fn write_json<T: Serialize>(target: &Path, value: &T) -> Result<(), RepoError> {
    let describe = |err: &dyn std::fmt::Display| {
        RepoError::unavailable(format!("writing {}: {err}", target.display()))
    };
    let bytes = serde_json::to_vec_pretty(value).map_err(|err| describe(&err))?;
    let parent = target
        .parent()
        .ok_or_else(|| describe(&"target has no parent"))?;
    std::fs::create_dir_all(parent).map_err(|err| describe(&err))?;

    let mut staged = NamedTempFile::new_in(parent).map_err(|err| describe(&err))?;
    staged
        .write_all(&bytes)
        .and_then(|()| staged.as_file().sync_all())
        .map_err(|err| describe(&err))?;
    staged.persist(target).map_err(|err| describe(&err.error))?;
    Ok(())
}

/// JSON files directly inside `dir`, sorted by name. A missing directory is empty.
fn json_files(dir: &Path) -> Result<Vec<PathBuf>, RepoError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(RepoError::unavailable(format!(
                "listing {}: {err}",
                dir.display()
            )));
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|err| RepoError::unavailable(format!("listing {}: {err}", dir.display())))?
            .path();
        if path.extension().is_some_and(|ext| ext == "json") && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn load_board(root: &Path, board_uri: &str) -> Result<Option<BoardRecord>, RepoError> {
    read_json("board", &board_dir(root, board_uri)?.join(BOARD_FILE))
}

fn load_boards(root: &Path) -> Result<Vec<BoardRecord>, RepoError> {
    let boards_root = root.join(BOARDS_DIR);
    let entries = match std::fs::read_dir(&boards_root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(RepoError::unavailable(err)),
    };

    let mut boards = Vec::new();
    for entry in entries {
        let dir = entry.map_err(RepoError::unavailable)?.path();
        if !dir.is_dir() {
            continue;
        }
        if let Some(board) = read_json::<BoardRecord>("board", &dir.join(BOARD_FILE))? {
            boards.push(board);
        }
    }
    boards.sort_by(|a, b| a.board_uri.cmp(&b.board_uri));
    Ok(boards)
}

fn load_threads(root: &Path, board_uri: &str) -> Result<Vec<ThreadDocument>, RepoError> {
    let mut documents = Vec::new();
    for file in json_files(&board_dir(root, board_uri)?.join(THREADS_DIR))? {
        match read_json::<ThreadDocument>("thread", &file)? {
            Some(document) if document.thread.board_uri == board_uri => documents.push(document),
            Some(_) => warn!(
                file = %file.display(),
                board = board_uri,
                "Skipping thread stored under a different board"
            ),
            None => {}
        }
    }
    Ok(documents)
}

fn load_logs(root: &Path) -> Result<Vec<LogEntry>, RepoError> {
    let mut entries = Vec::new();
    for file in json_files(&root.join(LOGS_DIR))? {
        if let Some(day) = read_json::<Vec<LogEntry>>("log", &file)? {
            entries.extend(day);
        }
    }
    Ok(entries)
}

fn load_board_state(root: &Path, board_uri: &str) -> Result<ForumState, RepoError> {
    let mut state = ForumState::default();
    for document in load_threads(root, board_uri)? {
        state.insert_thread(document);
    }
    Ok(state)
}

/// Boards and threads; users and logs are loaded by the queries that need them.
fn load_content(root: &Path) -> Result<ForumState, RepoError> {
    let mut state = ForumState::default();
    for board in load_boards(root)? {
        for document in load_threads(root, &board.board_uri)? {
            state.insert_thread(document);
        }
        state.insert_board(board);
    }
    Ok(state)
}

fn load_log_state(root: &Path) -> Result<ForumState, RepoError> {
    Ok(ForumState {
        logs: load_logs(root)?,
        ..ForumState::default()
    })
}

#[async_trait]
impl ForumRepository for FsForum {
    async fn find_board(&self, board_uri: &str) -> Result<Option<BoardRecord>, RepoError> {
        let board_uri = board_uri.to_string();
        self.query(move |root| load_board(root, &board_uri)).await
    }

    async fn list_boards(&self) -> Result<Vec<BoardRecord>, RepoError> {
        self.query(load_boards).await
    }

    async fn top_boards(&self, limit: usize) -> Result<Vec<BoardRecord>, RepoError> {
        self.query(move |root| {
            let mut state = ForumState::default();
            for board in load_boards(root)? {
                state.insert_board(board);
            }
            Ok(state.top_boards(limit))
        })
        .await
    }

    async fn list_threads(&self, board_uri: &str) -> Result<Vec<ThreadRecord>, RepoError> {
        let board_uri = board_uri.to_string();
        self.query(move |root| Ok(load_board_state(root, &board_uri)?.list_threads(&board_uri)))
            .await
    }

    async fn thread_posts(
        &self,
        board_uri: &str,
        thread_id: u64,
    ) -> Result<Vec<PostRecord>, RepoError> {
        let board_uri = board_uri.to_string();
        self.query(move |root| {
            let document: Option<ThreadDocument> =
                read_json("thread", &thread_file(root, &board_uri, thread_id)?)?;
            let mut state = ForumState::default();
            if let Some(document) = document {
                state.insert_thread(document);
            }
            Ok(state.thread_posts(&board_uri, thread_id))
        })
        .await
    }

    async fn latest_posts(&self, limit: usize) -> Result<Vec<LatestPost>, RepoError> {
        self.query(move |root| Ok(load_content(root)?.latest_posts(limit)))
            .await
    }

    async fn latest_images(&self, limit: usize) -> Result<Vec<LatestImage>, RepoError> {
        self.query(move |root| Ok(load_content(root)?.latest_images(limit)))
            .await
    }

    async fn global_stats(&self) -> Result<GlobalStats, RepoError> {
        self.query(|root| Ok(load_content(root)?.global_stats()))
            .await
    }

    async fn logs_for_date(&self, date: Date) -> Result<Vec<LogEntry>, RepoError> {
        self.query(move |root| {
            let entries: Vec<LogEntry> =
                read_json("log", &log_file(root, date)?)?.unwrap_or_default();
            let state = ForumState {
                logs: entries,
                ..ForumState::default()
            };
            Ok(state.logs_for_date(date))
        })
        .await
    }

    async fn log_dates(&self) -> Result<Vec<Date>, RepoError> {
        self.query(|root| Ok(load_log_state(root)?.log_dates()))
            .await
    }
}

#[async_trait]
impl BoardWriteRepository for FsForum {
    async fn insert_board(&self, board: BoardRecord) -> Result<(), RepoError> {
        self.query(move |root| {
            let target = board_dir(root, &board.board_uri)?.join(BOARD_FILE);
            if target.exists() {
                return Err(RepoError::Duplicate {
                    entity: "board",
                    id: board.board_uri,
                });
            }
            write_json(&target, &board)
        })
        .await
    }

    async fn update_board(&self, board: BoardRecord) -> Result<(), RepoError> {
        self.query(move |root| {
            let target = board_dir(root, &board.board_uri)?.join(BOARD_FILE);
            if !target.exists() {
                return Err(RepoError::not_found("board", board.board_uri));
            }
            write_json(&target, &board)
        })
        .await
    }

    async fn find_user(&self, login: &str) -> Result<Option<UserRecord>, RepoError> {
        let login = login.to_string();
        self.query(move |root| read_json("user", &user_file(root, &login)?))
            .await
    }

    async fn save_user(&self, user: UserRecord) -> Result<(), RepoError> {
        self.query(move |root| write_json(&user_file(root, &user.login)?, &user))
            .await
    }

    async fn append_log(&self, entry: LogEntry) -> Result<(), RepoError> {
        self.query(move |root| {
            let target = log_file(root, entry.time.date())?;
            let mut entries: Vec<LogEntry> = read_json("log", &target)?.unwrap_or_default();
            entries.push(entry);
            write_json(&target, &entries)
        })
        .await
    }
}
