//! Field tables for the entities shared by several artifacts.

use serde_json::{Map, Value};

use super::projection::{
    Field, ProjectionContext, Rule, flag, number, optional_text, optional_timestamp, project,
    project_into, text, timestamp,
};
use crate::domain::entities::{FileRecord, Posting, PostRecord, ThreadRecord};

const FILE_FIELDS: &[Field<FileRecord>] = &[
    Field::always("originalName", |file, _| text(&file.original_name)),
    Field::always("path", |file, _| text(&file.path)),
    Field::always("thumb", |file, _| text(&file.thumb)),
    Field::always("mime", |file, _| text(&file.mime)),
    Field::always("size", |file, _| number(file.size)),
    Field::always("width", |file, _| file.width.map(Value::from)),
    Field::always("height", |file, _| file.height.map(Value::from)),
    Field::with_rule("md5", Rule::Moderation, |file, _| text(&file.md5)),
];

const POSTING_FIELDS: &[Field<Posting>] = &[
    Field::always("name", |posting, _| optional_text(&posting.name)),
    Field::always("signedRole", |posting, _| optional_text(&posting.signed_role)),
    Field::always("email", |posting, _| optional_text(&posting.email)),
    Field::always("flag", |posting, _| optional_text(&posting.flag)),
    Field::always("flagName", |posting, _| optional_text(&posting.flag_name)),
    Field::always("flagCode", |posting, _| optional_text(&posting.flag_code)),
    Field::always("id", |posting, _| optional_text(&posting.id)),
    Field::always("subject", |posting, _| optional_text(&posting.subject)),
    Field::always("lastEditTime", |posting, _| {
        optional_timestamp(&posting.last_edit_time)
    }),
    Field::always("lastEditLogin", |posting, _| {
        optional_text(&posting.last_edit_login)
    }),
    Field::always("markdown", |posting, _| text(&posting.markdown)),
    Field::always("message", |posting, _| text(&posting.message)),
    Field::always("banMessage", |posting, _| optional_text(&posting.ban_message)),
    Field::always("creation", |posting, _| timestamp(&posting.creation)),
    Field::always("files", |posting, ctx| Some(files_array(&posting.files, ctx))),
    Field::with_rule("ip", Rule::Moderation, |posting, ctx| {
        posting
            .ip
            .as_ref()
            .map(|ip| Value::String(ctx.redaction.hash_ip(ip)))
    }),
    Field::with_rule("broadRange", Rule::BelowClearance, |posting, ctx| {
        posting
            .ip
            .as_ref()
            .map(|ip| Value::String(ctx.redaction.broad_range(ip)))
    }),
    Field::with_rule("narrowRange", Rule::BelowClearance, |posting, ctx| {
        posting
            .ip
            .as_ref()
            .map(|ip| Value::String(ctx.redaction.narrow_range(ip)))
    }),
];

const POST_FIELDS: &[Field<PostRecord>] = &[Field::with_rule(
    "postId",
    Rule::NotPreview,
    |post, _| number(post.post_id),
)];

const THREAD_FIELDS: &[Field<ThreadRecord>] = &[
    Field::always("boardUri", |thread, _| text(&thread.board_uri)),
    Field::always("threadId", |thread, _| number(thread.thread_id)),
    Field::always("locked", |thread, _| flag(thread.locked)),
    Field::always("archived", |thread, _| flag(thread.archived)),
    Field::always("pinned", |thread, _| flag(thread.pinned)),
    Field::always("cyclic", |thread, _| flag(thread.cyclic)),
    Field::always("autoSage", |thread, _| flag(thread.auto_sage)),
];

const CATALOG_FIELDS: &[Field<ThreadRecord>] = &[
    Field::always("message", |thread, _| text(&thread.posting.message)),
    Field::always("markdown", |thread, _| text(&thread.posting.markdown)),
    Field::always("threadId", |thread, _| number(thread.thread_id)),
    Field::always("postCount", |thread, _| number(thread.post_count)),
    Field::always("fileCount", |thread, _| number(thread.file_count)),
    Field::always("subject", |thread, _| optional_text(&thread.posting.subject)),
    Field::always("locked", |thread, _| flag(thread.locked)),
    Field::always("pinned", |thread, _| flag(thread.pinned)),
    Field::always("cyclic", |thread, _| flag(thread.cyclic)),
    Field::always("autoSage", |thread, _| flag(thread.auto_sage)),
    Field::always("lastBump", |thread, _| timestamp(&thread.last_bump)),
    Field::always("thumb", |thread, _| {
        thread.posting.files.first().and_then(|file| text(&file.thumb))
    }),
];

pub(crate) fn files_array(files: &[FileRecord], ctx: &ProjectionContext<'_>) -> Value {
    Value::Array(
        files
            .iter()
            .map(|file| Value::Object(project(file, FILE_FIELDS, ctx)))
            .collect(),
    )
}

pub(crate) fn post_object(post: &PostRecord, ctx: &ProjectionContext<'_>) -> Map<String, Value> {
    let mut object = project(&post.posting, POSTING_FIELDS, ctx);
    project_into(&mut object, post, POST_FIELDS, ctx);
    object
}

/// Thread with its (possibly truncated) replies. Replies left out are
/// counted in `omittedPosts`.
pub(crate) fn thread_object(
    thread: &ThreadRecord,
    posts: &[PostRecord],
    ctx: &ProjectionContext<'_>,
) -> Map<String, Value> {
    let mut object = project(&thread.posting, POSTING_FIELDS, ctx);
    project_into(&mut object, thread, THREAD_FIELDS, ctx);

    let replies = posts
        .iter()
        .map(|post| Value::Object(post_object(post, ctx)))
        .collect();
    object.insert("posts".to_string(), Value::Array(replies));

    let included = u32::try_from(posts.len()).unwrap_or(u32::MAX);
    if included < thread.post_count {
        object.insert(
            "omittedPosts".to_string(),
            Value::from(thread.post_count - included),
        );
    }

    object
}

/// Catalog tile for a thread shown on index page `page`.
pub(crate) fn catalog_entry(thread: &ThreadRecord, page: u32, ctx: &ProjectionContext<'_>) -> Value {
    let mut object = project(thread, CATALOG_FIELDS, ctx);
    object.insert("page".to_string(), Value::from(page));
    Value::Object(object)
}
