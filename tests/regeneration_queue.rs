//! End-to-end regeneration: requests in, cache artifacts out.

mod support;

use std::num::NonZeroU32;

use boardcache::application::rebuild::{RebuildKey, RebuildRequest, RebuildTarget, TargetKind};
use boardcache::application::rebuild::RebuildError;
use boardcache::cache::{ArtifactKind, CachePath, CacheStore};
use boardcache::config::GeneralSettings;
use boardcache_wire::RebuildMessage;
use tempfile::TempDir;

use support::{body, forum, harness, harness_with, thread};

fn fe_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("templates")).unwrap();
    std::fs::write(dir.path().join("templates/genericThumb.png"), b"\x89PNG").unwrap();
    dir
}

#[tokio::test]
async fn board_rebuild_writes_every_board_artifact() {
    let fe = fe_dir();
    let forum = forum(&["a"]);
    for id in 1..=25 {
        forum.put_thread(thread("a", id * 100, 2, id as i64));
    }
    let h = harness(forum, fe.path(), 4);

    let outcome = h
        .queue
        .rebuild_now(RebuildRequest::board_all("a"))
        .await
        .unwrap();

    // 3 index pages, catalog, 25 threads, rules.
    assert_eq!(outcome.written, 30);
    for path in ["/a/1.json", "/a/2.json", "/a/3.json", "/a/catalog.json", "/a/rules.json"] {
        assert!(h.store.get(path).is_some(), "{path} was not written");
    }
    assert!(h.store.get("/a/4.json").is_none());

    let first = body(&h.store, "/a/1.json");
    assert_eq!(first["pageCount"], 3);
    let ids: Vec<u64> = first["threads"]
        .as_array()
        .unwrap()
        .iter()
        .map(|thread| thread["threadId"].as_u64().unwrap())
        .collect();
    assert_eq!(ids.first(), Some(&2500), "most recently bumped thread leads");
    assert_eq!(ids.len(), 10);

    let catalog = body(&h.store, "/a/catalog.json");
    assert_eq!(catalog.as_array().unwrap().len(), 25);
    assert_eq!(catalog[24]["page"], 3);

    assert_eq!(body(&h.store, "/a/rules.json"), serde_json::json!(["No spam", "Be nice"]));
}

#[tokio::test]
async fn deleted_threads_and_boards_drop_their_artifacts() {
    let fe = fe_dir();
    let forum = forum(&["a"]);
    forum.put_thread(thread("a", 1, 0, 1));
    forum.put_thread(thread("a", 2, 0, 2));
    let h = harness(forum, fe.path(), 4);
    h.queue
        .rebuild_now(RebuildRequest::board_all("a"))
        .await
        .unwrap();
    assert!(h.store.get("/a/res/2.json").is_some());

    h.forum.update(|state| {
        state.threads.remove(&("a".to_string(), 2));
    });
    let outcome = h
        .queue
        .rebuild_now(RebuildRequest::new(RebuildTarget::Thread {
            uri: "a".to_string(),
            thread_id: 2,
        }))
        .await
        .unwrap();
    assert_eq!(outcome.deleted, 1);
    assert!(h.store.get("/a/res/2.json").is_none());
    assert!(h.store.get("/a/res/1.json").is_some());

    h.forum.update(|state| {
        state.boards.remove("a");
    });
    h.queue
        .rebuild_now(RebuildRequest::new(RebuildTarget::Board {
            uri: "a".to_string(),
        }))
        .await
        .unwrap();
    let leftovers: Vec<_> = h
        .store
        .paths()
        .into_iter()
        .filter(|path| path.as_str().starts_with("/a/"))
        .collect();
    assert!(leftovers.is_empty(), "stale artifacts: {leftovers:?}");
}

#[tokio::test]
async fn shrinking_index_prunes_pages_past_the_end() {
    let fe = fe_dir();
    let forum = forum(&["a"]);
    for id in 1..=15 {
        forum.put_thread(thread("a", id, 0, id as i64));
    }
    let h = harness(forum, fe.path(), 4);
    h.queue
        .rebuild_now(RebuildRequest::board_all("a"))
        .await
        .unwrap();
    assert!(h.store.get("/a/2.json").is_some());

    h.forum.update(|state| {
        state.threads.retain(|(_, id), _| *id <= 5);
    });
    h.queue.enqueue_message(&RebuildMessage::board("a"));
    h.queue.wait_idle().await;

    assert!(h.store.get("/a/1.json").is_some());
    assert!(h.store.get("/a/2.json").is_none());
    assert_eq!(body(&h.store, "/a/1.json")["pageCount"], 1);
}

#[tokio::test]
async fn rebuilds_after_a_settings_reload_use_the_new_values() {
    let fe = fe_dir();
    let forum = forum(&["a"]);
    for id in 1..=15 {
        forum.put_thread(thread("a", id, 0, id as i64));
    }
    let h = harness(forum, fe.path(), 2);
    h.queue
        .rebuild_now(RebuildRequest::board_all("a"))
        .await
        .unwrap();
    assert_eq!(body(&h.store, "/a/1.json")["pageCount"], 2);

    h.settings.reload(GeneralSettings {
        threads_per_page: NonZeroU32::new(20).unwrap(),
        ..GeneralSettings::default()
    });
    h.queue
        .rebuild_now(RebuildRequest::board_all("a"))
        .await
        .unwrap();

    let first = body(&h.store, "/a/1.json");
    assert_eq!(first["pageCount"], 1);
    assert_eq!(first["threads"].as_array().unwrap().len(), 15);
    assert!(h.store.get("/a/2.json").is_none());
}

#[tokio::test]
async fn a_failing_board_does_not_stop_the_others() {
    let fe = fe_dir();
    let forum = forum(&["a", "b", "c"]);
    for uri in ["a", "b", "c"] {
        forum.put_thread(thread(uri, 1, 1, 0));
    }
    forum.fail_board("b", true);
    let h = harness(forum, fe.path(), 2);

    let report = h.queue.rebuild_everything().await.unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(
        report.failures[0].key(),
        Some(&RebuildKey::scoped(TargetKind::Board, "b"))
    );
    for path in ["/a/1.json", "/c/1.json", "/index.json", "/404.json", "/login.json", "/genericThumb.png"] {
        assert!(h.store.get(path).is_some(), "{path} missing after partial failure");
    }
    assert!(h.store.get("/b/1.json").is_none());

    h.forum.fail_board("b", false);
    h.queue.enqueue_message(&RebuildMessage::board_all("b"));
    h.queue.wait_idle().await;
    assert!(h.store.get("/b/res/1.json").is_some());
}

#[tokio::test]
async fn failed_rebuild_keeps_the_previous_artifacts() {
    let fe = fe_dir();
    let forum = forum(&["b"]);
    forum.put_thread(thread("b", 1, 1, 0));
    let h = harness(forum, fe.path(), 2);
    h.queue
        .rebuild_now(RebuildRequest::board_all("b"))
        .await
        .unwrap();
    let before = h.store.get("/b/1.json").unwrap();

    h.forum.put_thread(thread("b", 9, 3, 30));
    h.forum.fail_board("b", true);
    let result = h.queue.rebuild_now(RebuildRequest::board_all("b")).await;
    assert!(matches!(result, Err(RebuildError::Fetch { .. })), "{result:?}");

    let after = h.store.get("/b/1.json").unwrap();
    assert_eq!(after.content, before.content);
    assert_eq!(after.metadata, before.metadata);
    assert!(h.store.get("/b/res/1.json").is_some());
    assert!(h.store.get("/b/res/9.json").is_none());
}

#[tokio::test]
async fn single_board_multiboards_never_touch_the_board_index() {
    let fe = fe_dir();
    let forum = forum(&["a"]);
    forum.put_thread(thread("a", 1, 0, 1));
    let h = harness(forum, fe.path(), 2);
    h.queue
        .rebuild_now(RebuildRequest::board_all("a"))
        .await
        .unwrap();
    let before = h.store.get("/a/1.json").unwrap();

    for boards in [vec!["a"], vec!["a", "a"]] {
        h.queue.enqueue_message(&RebuildMessage {
            multiboard: true,
            boards: boards.into_iter().map(String::from).collect(),
            ..RebuildMessage::default()
        });
    }
    h.queue.wait_idle().await;

    let result = h.queue.rebuild_now(RebuildRequest::multiboard(["a"])).await;
    assert!(matches!(result, Err(RebuildError::Build { .. })), "{result:?}");

    let after = h.store.get("/a/1.json").unwrap();
    assert_eq!(after.metadata.kind, ArtifactKind::Page);
    assert_eq!(after.metadata.board_uri.as_deref(), Some("a"));
    assert_eq!(after.content, before.content);
}

#[tokio::test]
async fn bursts_for_one_board_coalesce_into_one_execution() {
    let fe = fe_dir();
    let forum = forum(&["a"]);
    for id in 1..=20 {
        forum.put_thread(thread("a", id, 0, id as i64));
    }
    let h = harness(forum, fe.path(), 4);

    for _ in 0..20 {
        h.queue.enqueue_message(&RebuildMessage::board("a"));
    }
    h.queue.wait_idle().await;

    // Two index pages and the catalog, written once for the whole burst.
    assert_eq!(h.store.write_count(), 3);
    assert!(h.store.get("/a/2.json").is_some());
    assert!(h.queue.is_idle());
}

#[tokio::test]
async fn overboards_collect_threads_across_boards() {
    let fe = fe_dir();
    let forum = forum(&["a", "b"]);
    forum.put_thread(thread("a", 1, 0, 5));
    forum.put_thread(thread("b", 7, 0, 10));
    let general = GeneralSettings {
        overboard: Some("overboard".to_string()),
        ..GeneralSettings::default()
    };
    let h = harness_with(forum, fe.path(), 2, general);

    h.queue
        .rebuild_now(RebuildRequest::new(RebuildTarget::Overboard { sfw: false }))
        .await
        .unwrap();

    let overboard = body(&h.store, "/overboard/1.json");
    let uris: Vec<&str> = overboard["threads"]
        .as_array()
        .unwrap()
        .iter()
        .map(|thread| thread["boardUri"].as_str().unwrap())
        .collect();
    assert_eq!(uris, vec!["b", "a"]);

    // No sfw overboard configured: nothing written.
    let outcome = h
        .queue
        .rebuild_now(RebuildRequest::new(RebuildTarget::Overboard { sfw: true }))
        .await
        .unwrap();
    assert_eq!(outcome.written, 0);

    h.queue
        .rebuild_now(RebuildRequest::multiboard(["b", "a"]))
        .await
        .unwrap();
    let entry = h
        .store
        .read(&CachePath::new("/a+b/1.json").unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.metadata.boards, vec!["a", "b"]);
}
