//! Builders for cached public artifacts.

use bytes::Bytes;
use serde_json::{Map, Value};
use time::Date;

use super::projection::{
    Field, ProjectionContext, flag, number, optional_text, project, text, timestamp,
};
use super::redaction::RedactionContext;
use super::views::{catalog_entry, post_object, thread_object};
use super::{BuildError, ViewSnapshot, insert_flag_data, set_file_limits};
use crate::application::settings::BuildSettings;
use crate::cache::{ArtifactKind, CacheMetadata, CachePath};
use crate::domain::entities::{
    BoardRecord, GlobalStats, LatestImage, LatestPost, LogEntry, PostRecord, ThreadRecord,
};

/// A thread with the replies shown under it on an index page.
#[derive(Debug, Clone)]
pub struct ThreadPreview {
    pub thread: ThreadRecord,
    pub posts: Vec<PostRecord>,
}

const TOP_BOARD_FIELDS: &[Field<BoardRecord>] = &[
    Field::always("boardUri", |board, _| text(&board.board_uri)),
    Field::always("boardName", |board, _| text(&board.board_name)),
];

const LATEST_POST_FIELDS: &[Field<LatestPost>] = &[
    Field::always("boardUri", |post, _| text(&post.board_uri)),
    Field::always("threadId", |post, _| number(post.thread_id)),
    Field::always("postId", |post, _| number(post.post_id)),
    Field::always("previewText", |post, _| text(&post.preview_text)),
];

const LATEST_IMAGE_FIELDS: &[Field<LatestImage>] = &[
    Field::always("boardUri", |image, _| text(&image.board_uri)),
    Field::always("threadId", |image, _| number(image.thread_id)),
    Field::always("postId", |image, _| number(image.post_id)),
    Field::always("thumb", |image, _| text(&image.thumb)),
];

const GLOBAL_STATS_FIELDS: &[Field<GlobalStats>] = &[
    Field::always("totalPosts", |stats, _| number(stats.total_posts)),
    Field::always("totalIps", |stats, _| number(stats.total_ips)),
    Field::always("totalPPH", |stats, _| number(stats.total_pph)),
    Field::always("totalBoards", |stats, _| number(stats.total_boards)),
    Field::always("totalFiles", |stats, _| number(stats.total_files)),
    Field::always("totalSize", |stats, _| number(stats.total_size)),
];

const LOG_FIELDS: &[Field<LogEntry>] = &[
    Field::always("user", |entry, _| text(&entry.user)),
    Field::always("time", |entry, _| timestamp(&entry.time)),
    Field::always("global", |entry, _| flag(entry.global)),
    Field::always("boardUri", |entry, _| optional_text(&entry.board_uri)),
    Field::always("type", |entry, _| text(&entry.kind)),
    Field::always("description", |entry, _| text(&entry.description)),
];

fn list<T>(records: &[T], fields: &[Field<T>], ctx: &ProjectionContext<'_>) -> Value {
    Value::Array(
        records
            .iter()
            .map(|record| Value::Object(project(record, fields, ctx)))
            .collect(),
    )
}

fn insert(target: &mut Map<String, Value>, key: &str, value: impl Into<Value>) {
    target.insert(key.to_string(), value.into());
}

/// Board header fields shown on a thread page.
fn add_extra_thread_info(
    target: &mut Map<String, Value>,
    board: &BoardRecord,
    settings: &BuildSettings,
) {
    insert(target, "usesCustomJs", board.uses_custom_js);
    insert(target, "boardName", board.board_name.as_str());
    insert(target, "boardDescription", board.board_description.as_str());
    if let Some(markdown) = board.board_markdown.as_deref() {
        insert(target, "boardMarkdown", markdown);
    }
    insert(target, "maxMessageLength", settings.general.message_length);
    insert(target, "usesCustomCss", board.uses_custom_css);

    set_file_limits(target, board, settings);

    if board.captcha_mode > 0 || settings.general.force_captcha {
        insert(target, "captcha", true);
    }
    if board.has_setting("forceAnonymity") {
        insert(target, "forceAnonymity", true);
    }
    if board.has_setting("textBoard") {
        insert(target, "textBoard", true);
    }

    insert_flag_data(target, board);
}

/// `/{board}/res/{thread}.json`
pub fn thread_page(
    settings: &BuildSettings,
    board: &BoardRecord,
    thread: &ThreadRecord,
    posts: &[PostRecord],
) -> Result<ViewSnapshot, BuildError> {
    let redaction = RedactionContext::public();
    let ctx = ProjectionContext::new(&redaction);

    let mut view = thread_object(thread, posts, &ctx);
    add_extra_thread_info(&mut view, board, settings);

    let mut metadata = CacheMetadata::for_board(ArtifactKind::Thread, &board.board_uri);
    metadata.thread_id = Some(thread.thread_id);

    ViewSnapshot::json(
        CachePath::thread(&board.board_uri, thread.thread_id)?,
        metadata,
        &Value::Object(view),
    )
}

/// `/{board}/{page}.json`
pub fn board_page(
    settings: &BuildSettings,
    board: &BoardRecord,
    page: u32,
    page_count: u32,
    threads: &[ThreadPreview],
) -> Result<ViewSnapshot, BuildError> {
    if page == 0 || page > page_count {
        return Err(BuildError::Malformed(format!(
            "page {page} outside 1..={page_count} for /{}/",
            board.board_uri
        )));
    }

    let redaction = RedactionContext::public();
    let ctx = ProjectionContext::new(&redaction);

    let mut view = Map::new();
    insert(&mut view, "pageCount", page_count);
    insert(&mut view, "boardName", board.board_name.as_str());
    insert(&mut view, "boardDescription", board.board_description.as_str());
    insert(&mut view, "settings", board.settings.clone());
    insert(
        &mut view,
        "threads",
        threads
            .iter()
            .map(|preview| Value::Object(thread_object(&preview.thread, &preview.posts, &ctx)))
            .collect::<Vec<_>>(),
    );
    insert(&mut view, "maxMessageLength", settings.general.message_length);
    insert(&mut view, "globalCaptcha", settings.general.force_captcha);
    insert(&mut view, "captchaMode", board.captcha_mode);
    set_file_limits(&mut view, board, settings);
    insert_flag_data(&mut view, board);

    let mut metadata = CacheMetadata::for_board(ArtifactKind::Page, &board.board_uri);
    metadata.page = Some(page);

    ViewSnapshot::json(
        CachePath::board_page(&board.board_uri, page)?,
        metadata,
        &Value::Object(view),
    )
}

/// `/{board}/catalog.json`: one tile per thread in index order.
pub fn catalog(
    settings: &BuildSettings,
    board_uri: &str,
    threads: &[ThreadRecord],
) -> Result<ViewSnapshot, BuildError> {
    let redaction = RedactionContext::public();
    let ctx = ProjectionContext::new(&redaction);
    let per_page = settings.general.threads_per_page.get() as usize;

    let tiles = threads
        .iter()
        .enumerate()
        .map(|(index, thread)| {
            let page = u32::try_from(index / per_page + 1).unwrap_or(u32::MAX);
            catalog_entry(thread, page, &ctx)
        })
        .collect();

    ViewSnapshot::json(
        CachePath::catalog(board_uri)?,
        CacheMetadata::for_board(ArtifactKind::Catalog, board_uri),
        &Value::Array(tiles),
    )
}

/// `/index.json`
pub fn front_page(
    settings: &BuildSettings,
    top_boards: &[BoardRecord],
    latest_posts: &[LatestPost],
    latest_images: &[LatestImage],
    stats: &GlobalStats,
) -> Result<ViewSnapshot, BuildError> {
    let redaction = RedactionContext::public();
    let ctx = ProjectionContext::new(&redaction);

    let mut view = project(stats, GLOBAL_STATS_FIELDS, &ctx);
    insert(&mut view, "topBoards", list(top_boards, TOP_BOARD_FIELDS, &ctx));
    insert(&mut view, "latestPosts", list(latest_posts, LATEST_POST_FIELDS, &ctx));
    insert(
        &mut view,
        "latestImages",
        list(latest_images, LATEST_IMAGE_FIELDS, &ctx),
    );
    insert(&mut view, "version", settings.version);

    ViewSnapshot::json(
        CachePath::front_page(),
        CacheMetadata::new(ArtifactKind::FrontPage),
        &Value::Object(view),
    )
}

/// `/{board}/rules.json`
pub fn rules(board_uri: &str, rules: &[String]) -> Result<ViewSnapshot, BuildError> {
    ViewSnapshot::json(
        CachePath::rules(board_uri)?,
        CacheMetadata::for_board(ArtifactKind::Rules, board_uri),
        &Value::from(rules.to_vec()),
    )
}

fn aggregate_threads(threads: &[ThreadPreview]) -> Value {
    let redaction = RedactionContext::public();
    let ctx = ProjectionContext::new(&redaction);

    let mut view = Map::new();
    insert(
        &mut view,
        "threads",
        threads
            .iter()
            .map(|preview| Value::Object(thread_object(&preview.thread, &preview.posts, &ctx)))
            .collect::<Vec<_>>(),
    );
    Value::Object(view)
}

/// `/{overboard}/1.json`
pub fn overboard(uri: &str, threads: &[ThreadPreview]) -> Result<ViewSnapshot, BuildError> {
    ViewSnapshot::json(
        CachePath::aggregate(uri)?,
        CacheMetadata::new(ArtifactKind::Overboard),
        &aggregate_threads(threads),
    )
}

/// `/{a+b+…}/1.json` with the board list in the metadata.
pub fn multiboard(boards: &[String], threads: &[ThreadPreview]) -> Result<ViewSnapshot, BuildError> {
    // One board would land on that board's own first index page.
    if boards.len() < 2 {
        return Err(BuildError::Malformed(
            "multiboard needs at least two boards".to_string(),
        ));
    }

    let mut metadata = CacheMetadata::new(ArtifactKind::Multiboard);
    metadata.boards = boards.to_vec();

    ViewSnapshot::json(
        CachePath::aggregate(&boards.join("+"))?,
        metadata,
        &aggregate_threads(threads),
    )
}

/// `/.global/logs/{date}.json`
pub fn log(date: Date, entries: &[LogEntry]) -> Result<ViewSnapshot, BuildError> {
    let redaction = RedactionContext::public();
    let ctx = ProjectionContext::new(&redaction);

    let mut metadata = CacheMetadata::new(ArtifactKind::Log);
    metadata.date = Some(date.to_string());

    ViewSnapshot::json(CachePath::log(date)?, metadata, &list(entries, LOG_FIELDS, &ctx))
}

/// `/404.json`
pub fn not_found(settings: &BuildSettings) -> Result<ViewSnapshot, BuildError> {
    let mut view = Map::new();
    insert(&mut view, "status", "notFound");
    insert(&mut view, "version", settings.version);

    ViewSnapshot::json(
        CachePath::not_found(),
        CacheMetadata::new(ArtifactKind::NotFound),
        &Value::Object(view),
    )
}

/// `/login.json`
pub fn login(settings: &BuildSettings) -> Result<ViewSnapshot, BuildError> {
    let mut view = Map::new();
    insert(&mut view, "captcha", settings.general.force_captcha);
    insert(&mut view, "version", settings.version);

    ViewSnapshot::json(
        CachePath::login(),
        CacheMetadata::new(ArtifactKind::Login),
        &Value::Object(view),
    )
}

/// `/genericThumb.{ext}`: raw image bytes copied from the front end.
pub fn generic_thumb(extension: &str, bytes: Bytes) -> Result<ViewSnapshot, BuildError> {
    let path = CachePath::generic_thumb(extension)?;
    let content_type = mime_guess::from_path(path.as_str())
        .first_or_octet_stream()
        .essence_str()
        .to_string();

    Ok(ViewSnapshot {
        path,
        metadata: CacheMetadata::new(ArtifactKind::GenericThumb),
        content_type,
        body: bytes,
    })
}

/// A single post as shown in a hover preview: no post number.
pub fn post_preview(post: &PostRecord) -> Value {
    let redaction = RedactionContext::public();
    Value::Object(post_object(post, &ProjectionContext::preview(&redaction)))
}
