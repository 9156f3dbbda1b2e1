//! Forum data providers.
//!
//! Both providers answer queries from a [`ForumState`]: the memory provider
//! keeps one behind a lock, the filesystem provider loads the slice a query
//! needs from the data directory on every call.

mod fs;
mod memory;

pub use fs::FsForum;
pub use memory::MemoryForum;

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use time::Date;

use crate::domain::entities::{
    BoardRecord, GlobalStats, LatestImage, LatestPost, LogEntry, PostRecord, ThreadDocument,
    ThreadRecord, UserRecord,
};

const PREVIEW_TEXT_CHARS: usize = 128;

/// Everything a provider knows, keyed the way queries look it up.
#[derive(Debug, Clone, Default)]
pub struct ForumState {
    pub boards: BTreeMap<String, BoardRecord>,
    pub threads: BTreeMap<(String, u64), ThreadDocument>,
    pub users: BTreeMap<String, UserRecord>,
    pub logs: Vec<LogEntry>,
}

impl ForumState {
    pub fn insert_board(&mut self, board: BoardRecord) {
        self.boards.insert(board.board_uri.clone(), board);
    }

    pub fn insert_thread(&mut self, document: ThreadDocument) {
        let key = (document.thread.board_uri.clone(), document.thread.thread_id);
        self.threads.insert(key, document);
    }

    pub fn insert_user(&mut self, user: UserRecord) {
        self.users.insert(user.login.clone(), user);
    }

    pub(crate) fn list_boards(&self) -> Vec<BoardRecord> {
        self.boards.values().cloned().collect()
    }

    pub(crate) fn top_boards(&self, limit: usize) -> Vec<BoardRecord> {
        let mut boards = self.list_boards();
        boards.sort_by_key(|board| (Reverse(board.unique_ips), board.board_uri.clone()));
        boards.truncate(limit);
        boards
    }

    pub(crate) fn list_threads(&self, board_uri: &str) -> Vec<ThreadRecord> {
        let mut threads: Vec<ThreadRecord> = self
            .threads
            .values()
            .filter(|document| document.thread.board_uri == board_uri)
            .map(|document| document.thread.clone())
            .collect();
        sort_index_order(&mut threads);
        threads
    }

    pub(crate) fn thread_posts(&self, board_uri: &str, thread_id: u64) -> Vec<PostRecord> {
        let mut posts = self
            .threads
            .get(&(board_uri.to_string(), thread_id))
            .map(|document| document.posts.clone())
            .unwrap_or_default();
        posts.sort_by_key(|post| post.post_id);
        posts
    }

    pub(crate) fn latest_posts(&self, limit: usize) -> Vec<LatestPost> {
        let mut postings: Vec<_> = self
            .threads
            .values()
            .flat_map(|document| {
                let thread = &document.thread;
                std::iter::once((
                    thread.posting.creation,
                    LatestPost {
                        board_uri: thread.board_uri.clone(),
                        thread_id: thread.thread_id,
                        post_id: thread.thread_id,
                        preview_text: preview_text(&thread.posting.message),
                    },
                ))
                .chain(document.posts.iter().map(|post| {
                    (
                        post.posting.creation,
                        LatestPost {
                            board_uri: post.board_uri.clone(),
                            thread_id: post.thread_id,
                            post_id: post.post_id,
                            preview_text: preview_text(&post.posting.message),
                        },
                    )
                }))
            })
            .collect();

        postings.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| a.1.board_uri.cmp(&b.1.board_uri))
                .then_with(|| b.1.post_id.cmp(&a.1.post_id))
        });
        postings.into_iter().take(limit).map(|(_, post)| post).collect()
    }

    pub(crate) fn latest_images(&self, limit: usize) -> Vec<LatestImage> {
        let mut images: Vec<_> = self
            .threads
            .values()
            .flat_map(|document| {
                let thread = &document.thread;
                let opening = thread.posting.files.iter().map(move |file| {
                    (
                        thread.posting.creation,
                        LatestImage {
                            board_uri: thread.board_uri.clone(),
                            thread_id: thread.thread_id,
                            post_id: thread.thread_id,
                            thumb: file.thumb.clone(),
                        },
                    )
                });
                let replies = document.posts.iter().flat_map(|post| {
                    post.posting.files.iter().map(move |file| {
                        (
                            post.posting.creation,
                            LatestImage {
                                board_uri: post.board_uri.clone(),
                                thread_id: post.thread_id,
                                post_id: post.post_id,
                                thumb: file.thumb.clone(),
                            },
                        )
                    })
                });
                opening.chain(replies)
            })
            .filter(|(_, image)| !image.thumb.is_empty())
            .collect();

        images.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| a.1.board_uri.cmp(&b.1.board_uri))
                .then_with(|| b.1.post_id.cmp(&a.1.post_id))
        });
        images.into_iter().take(limit).map(|(_, image)| image).collect()
    }

    pub(crate) fn global_stats(&self) -> GlobalStats {
        let mut stats = GlobalStats {
            total_boards: self.boards.len() as u64,
            total_ips: self.boards.values().map(|board| board.unique_ips).sum(),
            total_pph: self.boards.values().map(|board| board.posts_per_hour).sum(),
            ..GlobalStats::default()
        };

        for document in self.threads.values() {
            let files = document
                .posts
                .iter()
                .flat_map(|post| post.posting.files.iter())
                .chain(document.thread.posting.files.iter());
            for file in files {
                stats.total_files += 1;
                stats.total_size += file.size;
            }
            stats.total_posts += 1 + document.posts.len() as u64;
        }
        stats
    }

    pub(crate) fn logs_for_date(&self, date: Date) -> Vec<LogEntry> {
        let mut entries: Vec<LogEntry> = self
            .logs
            .iter()
            .filter(|entry| entry.time.date() == date)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.time);
        entries
    }

    pub(crate) fn log_dates(&self) -> Vec<Date> {
        let dates: BTreeSet<Date> = self.logs.iter().map(|entry| entry.time.date()).collect();
        dates.into_iter().rev().collect()
    }
}

/// Pinned threads first, then the most recently bumped.
pub(crate) fn sort_index_order(threads: &mut [ThreadRecord]) {
    threads.sort_by(|a, b| {
        b.pinned
            .cmp(&a.pinned)
            .then_with(|| b.last_bump.cmp(&a.last_bump))
            .then_with(|| b.thread_id.cmp(&a.thread_id))
    });
}

fn preview_text(message: &str) -> String {
    message.chars().take(PREVIEW_TEXT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::domain::entities::{FileRecord, Posting};

    fn thread(uri: &str, id: u64, pinned: bool, bump: time::OffsetDateTime) -> ThreadDocument {
        ThreadDocument {
            thread: ThreadRecord {
                board_uri: uri.to_string(),
                thread_id: id,
                post_count: 0,
                file_count: 0,
                locked: false,
                archived: false,
                pinned,
                cyclic: false,
                auto_sage: false,
                last_bump: bump,
                posting: Posting::new(bump, format!("opening {id}")),
            },
            posts: Vec::new(),
        }
    }

    #[test]
    fn threads_are_listed_pinned_first_then_by_bump() {
        let mut state = ForumState::default();
        state.insert_thread(thread("a", 1, false, datetime!(2024-01-01 10:00 UTC)));
        state.insert_thread(thread("a", 2, false, datetime!(2024-01-03 10:00 UTC)));
        state.insert_thread(thread("a", 3, true, datetime!(2023-12-01 10:00 UTC)));
        state.insert_thread(thread("b", 4, false, datetime!(2024-02-01 10:00 UTC)));

        let ids: Vec<u64> = state.list_threads("a").iter().map(|t| t.thread_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn latest_images_skip_files_without_thumbnails() {
        let mut state = ForumState::default();
        let mut document = thread("a", 1, false, datetime!(2024-01-01 10:00 UTC));
        document.thread.posting.files = vec![
            FileRecord {
                original_name: "cat.png".to_string(),
                path: "/.media/cat.png".to_string(),
                thumb: "/.media/t_cat".to_string(),
                mime: "image/png".to_string(),
                size: 2048,
                width: None,
                height: None,
                md5: String::new(),
            },
            FileRecord {
                original_name: "notes.txt".to_string(),
                path: "/.media/notes.txt".to_string(),
                thumb: String::new(),
                mime: "text/plain".to_string(),
                size: 10,
                width: None,
                height: None,
                md5: String::new(),
            },
        ];
        state.insert_thread(document);

        let images = state.latest_images(10);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].thumb, "/.media/t_cat");

        let stats = state.global_stats();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_size, 2058);
        assert_eq!(stats.total_posts, 1);
    }

    #[test]
    fn log_dates_are_newest_first() {
        let mut state = ForumState::default();
        for time in [
            datetime!(2024-03-01 08:00 UTC),
            datetime!(2024-03-03 09:00 UTC),
            datetime!(2024-03-01 23:00 UTC),
        ] {
            state.logs.push(LogEntry {
                user: "admin".to_string(),
                time,
                global: true,
                board_uri: None,
                kind: "boardTransfer".to_string(),
                description: String::new(),
            });
        }

        let dates: Vec<String> = state.log_dates().iter().map(Date::to_string).collect();
        assert_eq!(dates, vec!["2024-03-03", "2024-03-01"]);
        assert_eq!(state.logs_for_date(time::macros::date!(2024 - 03 - 01)).len(), 2);
    }
}
