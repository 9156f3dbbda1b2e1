//! Fixtures shared by the integration tests.
#![allow(dead_code)]

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use boardcache::application::rebuild::{ArtifactGenerator, GenericThumbSource, RegenerationQueue};
use boardcache::application::settings::SettingsHandle;
use boardcache::cache::MemoryCacheStore;
use boardcache::config::GeneralSettings;
use boardcache::domain::entities::{BoardRecord, PostRecord, Posting, ThreadDocument, ThreadRecord};
use boardcache::infra::forum::{ForumState, MemoryForum};
use time::{Duration, OffsetDateTime, macros::datetime};

pub const EPOCH: OffsetDateTime = datetime!(2024-03-01 12:00 UTC);

pub fn board(uri: &str) -> BoardRecord {
    BoardRecord {
        board_uri: uri.to_string(),
        board_name: format!("/{uri}/ board"),
        board_description: format!("about {uri}"),
        owner: "admin".to_string(),
        ip_salt: format!("salt-{uri}"),
        rules: vec!["No spam".to_string(), "Be nice".to_string()],
        ..BoardRecord::default()
    }
}

/// A thread with `replies` posts, bumped `bump_minutes` after [`EPOCH`].
pub fn thread(uri: &str, thread_id: u64, replies: u64, bump_minutes: i64) -> ThreadDocument {
    let bump = EPOCH + Duration::minutes(bump_minutes);
    let posts = (1..=replies)
        .map(|n| PostRecord {
            board_uri: uri.to_string(),
            thread_id,
            post_id: thread_id + n,
            posting: Posting::new(bump, format!("reply {n}")),
        })
        .collect();

    ThreadDocument {
        thread: ThreadRecord {
            board_uri: uri.to_string(),
            thread_id,
            post_count: u32::try_from(replies).unwrap(),
            file_count: 0,
            locked: false,
            archived: false,
            pinned: false,
            cyclic: false,
            auto_sage: false,
            last_bump: bump,
            posting: Posting::new(EPOCH, format!("opening post {thread_id}")),
        },
        posts,
    }
}

pub fn forum(boards: &[&str]) -> Arc<MemoryForum> {
    let mut state = ForumState::default();
    for uri in boards {
        state.insert_board(board(uri));
    }
    Arc::new(MemoryForum::new(state))
}

pub fn settings() -> Arc<SettingsHandle> {
    Arc::new(SettingsHandle::new(GeneralSettings::default()))
}

pub struct Harness {
    pub forum: Arc<MemoryForum>,
    pub store: Arc<MemoryCacheStore>,
    pub settings: Arc<SettingsHandle>,
    pub queue: RegenerationQueue,
}

/// Queue over an in-memory forum and store. `fe_path` only matters for the
/// generic thumbnail.
pub fn harness(forum: Arc<MemoryForum>, fe_path: &Path, max_concurrent: usize) -> Harness {
    harness_with(forum, fe_path, max_concurrent, GeneralSettings::default())
}

pub fn harness_with(
    forum: Arc<MemoryForum>,
    fe_path: &Path,
    max_concurrent: usize,
    general: GeneralSettings,
) -> Harness {
    let store = Arc::new(MemoryCacheStore::new());
    let settings = Arc::new(SettingsHandle::new(general));
    let generator = ArtifactGenerator::new(
        forum.clone(),
        store.clone(),
        settings.clone(),
        GenericThumbSource::from_template(fe_path, "genericThumb.png"),
    );
    let queue = RegenerationQueue::new(
        Arc::new(generator),
        NonZeroUsize::new(max_concurrent).unwrap(),
        false,
    );
    Harness {
        forum,
        store,
        settings,
        queue,
    }
}

pub fn body(store: &MemoryCacheStore, path: &str) -> serde_json::Value {
    let entry = store
        .get(path)
        .unwrap_or_else(|| panic!("{path} missing from the cache"));
    serde_json::from_slice(&entry.content).unwrap()
}
