//! Artifact shapes produced by the content builders.

mod support;

use std::net::{IpAddr, Ipv4Addr};

use boardcache::application::builder::redaction::{hash_for_display, range};
use boardcache::application::builder::{ViewSnapshot, Viewer, moderation, public};
use boardcache::application::rebuild::RebuildRequest;
use boardcache::application::settings::BuildSettings;
use boardcache::config::GeneralSettings;
use insta::assert_snapshot;
use tempfile::tempdir;

use support::{board, body, forum, harness_with, thread};

fn settings() -> BuildSettings {
    BuildSettings::new(GeneralSettings::default())
}

fn text(snapshot: &ViewSnapshot) -> String {
    String::from_utf8(snapshot.body.to_vec()).unwrap()
}

#[test]
fn fixed_pages_have_stable_shapes() {
    let settings = settings();

    let not_found = public::not_found(&settings).unwrap();
    assert_eq!(not_found.path.as_str(), "/404.json");
    assert_snapshot!(text(&not_found), @r#"{"status":"notFound","version":"0.3.0"}"#);

    let login = public::login(&settings).unwrap();
    assert_snapshot!(text(&login), @r#"{"captcha":false,"version":"0.3.0"}"#);
}

#[test]
fn catalog_tiles_carry_their_index_page() {
    let document = thread("a", 1, 2, 5);
    let catalog = public::catalog(&settings(), "a", &[document.thread]).unwrap();

    assert_eq!(catalog.path.as_str(), "/a/catalog.json");
    assert_snapshot!(
        text(&catalog),
        @r#"[{"autoSage":false,"cyclic":false,"fileCount":0,"lastBump":"2024-03-01T12:05:00Z","locked":false,"markdown":"opening post 1","message":"opening post 1","page":1,"pinned":false,"postCount":2,"threadId":1}]"#
    );
}

#[test]
fn hover_previews_leave_out_the_post_number() {
    let document = thread("a", 1, 1, 0);
    let mut post = document.posts[0].clone();
    post.posting.message = "hello".to_string();
    post.posting.markdown = "hello".to_string();

    assert_snapshot!(
        public::post_preview(&post).to_string(),
        @r#"{"creation":"2024-03-01T12:00:00Z","files":[],"markdown":"hello","message":"hello"}"#
    );
}

#[test]
fn identical_inputs_give_identical_bytes() {
    let settings = settings();
    let board = board("a");
    let document = thread("a", 1, 3, 0);

    let first = public::thread_page(&settings, &board, &document.thread, &document.posts).unwrap();
    let second = public::thread_page(&settings, &board, &document.thread, &document.posts).unwrap();

    assert_eq!(first.body, second.body);
    assert_eq!(first.metadata, second.metadata);
    assert_eq!(first.metadata.thread_id, Some(1));
}

#[test]
fn public_artifacts_never_expose_addresses() {
    let settings = settings();
    let board = board("a");
    let mut document = thread("a", 1, 1, 0);
    let ip = IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3));
    document.thread.posting.ip = Some(ip);
    document.posts[0].posting.ip = Some(ip);

    let page = public::thread_page(&settings, &board, &document.thread, &document.posts).unwrap();
    let rendered = text(&page);
    assert!(!rendered.contains("10.1.2.3"));
    assert!(!rendered.contains("\"ip\""));
    assert!(!rendered.contains("Range"));
}

#[test]
fn staff_views_hash_addresses_by_clearance() {
    let settings = settings();
    let board = board("a");
    let mut document = thread("a", 1, 0, 0);
    let ip = IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3));
    document.thread.posting.ip = Some(ip);
    let preview = public::ThreadPreview {
        thread: document.thread.clone(),
        posts: Vec::new(),
    };

    let admin = moderation::thread(&settings, &board, &preview, Viewer::Staff { role: 0 });
    let expected = hash_for_display("salt-a", "10.1.2.3");
    assert_eq!(expected.len(), 10);
    assert_eq!(admin["ip"], expected.as_str());
    assert!(admin.get("broadRange").is_none());

    let moderator = moderation::thread(&settings, &board, &preview, Viewer::Staff { role: 2 });
    assert_eq!(moderator["ip"], expected.as_str());
    assert_eq!(
        moderator["broadRange"],
        hash_for_display("salt-a", &range(&ip, false)).as_str()
    );
    assert_eq!(
        moderator["narrowRange"],
        hash_for_display("salt-a", &range(&ip, true)).as_str()
    );

    // Roles outside the staff range render like the public.
    let outsider = moderation::thread(&settings, &board, &preview, Viewer::Staff { role: 9 });
    assert!(outsider.get("ip").is_none());
}

#[tokio::test]
async fn index_pages_count_replies_left_out_of_previews() {
    let fe = tempdir().unwrap();
    let forum = forum(&["a"]);
    forum.put_thread(thread("a", 1, 50, 0));
    let general = GeneralSettings {
        preview_posts: 10,
        ..GeneralSettings::default()
    };
    let h = harness_with(forum, fe.path(), 1, general);

    h.queue
        .rebuild_now(RebuildRequest::board_all("a"))
        .await
        .unwrap();

    let page = body(&h.store, "/a/1.json");
    let preview = &page["threads"][0];
    assert_eq!(preview["omittedPosts"], 40);
    assert_eq!(preview["posts"].as_array().unwrap().len(), 10);
    assert_eq!(preview["posts"][9]["postId"], 51);

    let full = body(&h.store, "/a/res/1.json");
    assert_eq!(full["posts"].as_array().unwrap().len(), 50);
    assert!(full.get("omittedPosts").is_none());
    assert_eq!(full["boardName"], "/a/ board");
    assert_eq!(full["creation"], "2024-03-01T12:00:00Z");
}
