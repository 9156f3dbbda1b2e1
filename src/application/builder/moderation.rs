//! Moderation-only views. Built per request and never cached.

use serde_json::{Map, Value};
use time::Date;

use super::projection::{
    Field, ProjectionContext, flag, number, optional_text, optional_timestamp, project, text,
    timestamp,
};
use super::public::ThreadPreview;
use super::redaction::{RedactionContext, Viewer};
use super::views::thread_object;
use crate::application::settings::BuildSettings;
use crate::domain::entities::{
    BanRecord, BoardRecord, FilterRecord, HashBanRecord, Posting, RangeBanRecord, ReportRecord,
    UserRecord,
};

const REPORT_FIELDS: &[Field<ReportRecord>] = &[
    Field::always("_id", |report, _| text(&report.id)),
    Field::always("boardUri", |report, _| optional_text(&report.board_uri)),
    Field::always("threadId", |report, _| number(report.thread_id)),
    Field::always("postId", |report, _| report.post_id.map(Value::from)),
    Field::always("reason", |report, _| optional_text(&report.reason)),
    Field::always("creation", |report, _| timestamp(&report.creation)),
    Field::always("global", |report, _| flag(report.global)),
    Field::always("closedBy", |report, _| optional_text(&report.closed_by)),
    Field::always("closing", |report, _| optional_timestamp(&report.closing)),
];

const BAN_FIELDS: &[Field<BanRecord>] = &[
    Field::always("_id", |ban, _| text(&ban.id)),
    Field::always("boardUri", |ban, _| optional_text(&ban.board_uri)),
    Field::always("reason", |ban, _| optional_text(&ban.reason)),
    Field::always("expiration", |ban, _| optional_timestamp(&ban.expiration)),
    Field::always("appliedBy", |ban, _| text(&ban.applied_by)),
    Field::always("appeal", |ban, _| optional_text(&ban.appeal)),
    Field::always("denied", |ban, _| flag(ban.denied)),
];

const HASH_BAN_FIELDS: &[Field<HashBanRecord>] = &[
    Field::always("_id", |ban, _| text(&ban.id)),
    Field::always("boardUri", |ban, _| optional_text(&ban.board_uri)),
    Field::always("md5", |ban, _| text(&ban.md5)),
];

const FILTER_FIELDS: &[Field<FilterRecord>] = &[
    Field::always("originalTerm", |filter, _| text(&filter.original_term)),
    Field::always("replacementTerm", |filter, _| text(&filter.replacement_term)),
    Field::always("caseSensitive", |filter, _| flag(filter.case_sensitive)),
];

const BOARD_LIST_FIELDS: &[Field<BoardRecord>] = &[
    Field::always("boardUri", |board, _| text(&board.board_uri)),
    Field::always("boardName", |board, _| text(&board.board_name)),
    Field::always("boardDescription", |board, _| text(&board.board_description)),
    Field::always("postsPerHour", |board, _| number(board.posts_per_hour)),
    Field::always("uniqueIps", |board, _| number(board.unique_ips)),
    Field::always("lastPostId", |board, _| number(board.last_post_id)),
    Field::always("tags", |board, _| Some(Value::from(board.tags.clone()))),
    Field::always("specialSettings", |board, _| {
        Some(Value::from(board.special_settings.clone()))
    }),
];

const STAFF_FIELDS: &[Field<UserRecord>] = &[
    Field::always("login", |user, _| text(&user.login)),
    Field::always("globalRole", |user, _| number(user.global_role)),
];

fn plain<T>(records: &[T], fields: &[Field<T>]) -> Value {
    let redaction = RedactionContext::public();
    let ctx = ProjectionContext::new(&redaction);
    Value::Array(
        records
            .iter()
            .map(|record| Value::Object(project(record, fields, &ctx)))
            .collect(),
    )
}

fn insert(target: &mut Map<String, Value>, key: &str, value: impl Into<Value>) {
    target.insert(key.to_string(), value.into());
}

/// Board settings panel. Unset limits show the global defaults.
pub fn board_management(
    settings: &BuildSettings,
    viewer_login: &str,
    board: &BoardRecord,
    open_reports: &[ReportRecord],
    appealed_bans: &[BanRecord],
) -> Value {
    let general = &settings.general;
    let mut view = Map::new();

    insert(&mut view, "usesCustomSpoiler", board.uses_custom_spoiler);
    insert(&mut view, "volunteers", board.volunteers.clone());
    insert(&mut view, "boardName", board.board_name.as_str());
    insert(&mut view, "boardDescription", board.board_description.as_str());
    if let Some(name) = board.anonymous_name.as_deref() {
        insert(&mut view, "anonName", name);
    }
    if let Some(limit) = board.hourly_thread_limit {
        insert(&mut view, "hourlyThreadLimit", limit);
    }
    if let Some(threshold) = board.auto_captcha_threshold {
        insert(&mut view, "autoCaptchaThreshold", threshold);
    }
    insert(&mut view, "settings", board.settings.clone());
    insert(&mut view, "tags", board.tags.clone());
    if let Some(message) = board.board_message.as_deref() {
        insert(&mut view, "boardMessage", message);
    }
    insert(&mut view, "isOwner", viewer_login == board.owner);
    insert(&mut view, "openReports", plain(open_reports, REPORT_FIELDS));
    insert(&mut view, "appealedBans", plain(appealed_bans, BAN_FIELDS));
    insert(
        &mut view,
        "autoSageLimit",
        board.auto_sage_limit.unwrap_or(general.auto_sage_limit),
    );
    insert(
        &mut view,
        "maxThreadCount",
        board.max_thread_count.unwrap_or(general.max_thread_count),
    );
    insert(
        &mut view,
        "maxFileSizeMB",
        board.max_file_size_mb.unwrap_or(general.max_file_size_mb),
    );
    insert(
        &mut view,
        "acceptedMimes",
        board
            .accepted_mimes
            .clone()
            .unwrap_or_else(|| general.accepted_mimes.clone()),
    );
    insert(&mut view, "maxFiles", board.max_files.unwrap_or(general.max_files));
    insert(&mut view, "captchaMode", board.captcha_mode);
    insert(&mut view, "locationFlagMode", board.location_flag_mode);
    if let Some(days) = board.max_bump_age_days {
        insert(&mut view, "maxBumpAgeDays", days);
    }

    Value::Object(view)
}

pub fn closed_reports(reports: &[ReportRecord]) -> Value {
    plain(reports, REPORT_FIELDS)
}

pub fn bans(bans: &[BanRecord]) -> Value {
    plain(bans, BAN_FIELDS)
}

/// Range bans. With a board the ranges are hashed with its salt, global
/// ones are shown dotted.
pub fn range_bans(bans: &[RangeBanRecord], board: Option<&BoardRecord>) -> Value {
    Value::Array(
        bans.iter()
            .map(|ban| {
                let range = match board {
                    Some(board) => {
                        RedactionContext::staff(0, &board.ip_salt, 0).hash_range(&ban.range)
                    }
                    None => ban
                        .range
                        .iter()
                        .map(u8::to_string)
                        .collect::<Vec<_>>()
                        .join("."),
                };

                let mut entry = Map::new();
                insert(&mut entry, "_id", ban.id.as_str());
                if let Some(uri) = ban.board_uri.as_deref() {
                    insert(&mut entry, "boardUri", uri);
                }
                insert(&mut entry, "range", range);
                Value::Object(entry)
            })
            .collect(),
    )
}

pub fn hash_bans(bans: &[HashBanRecord]) -> Value {
    plain(bans, HASH_BAN_FIELDS)
}

pub fn filters(filters: &[FilterRecord]) -> Value {
    plain(filters, FILTER_FIELDS)
}

/// Days with log entries, as `YYYY-MM-DD`.
pub fn log_dates(dates: &[Date]) -> Value {
    Value::Array(
        dates
            .iter()
            .map(|date| Value::String(date.to_string()))
            .collect(),
    )
}

pub fn board_moderation(board: &BoardRecord, owner: &UserRecord) -> Value {
    let mut view = Map::new();
    insert(&mut view, "owner", owner.login.as_str());
    insert(&mut view, "specialSettings", board.special_settings.clone());
    if let Some(seen) = optional_timestamp(&owner.last_seen) {
        view.insert("lastSeen".to_string(), seen);
    }
    Value::Object(view)
}

/// Board directory with the configured overboard names.
pub fn boards(settings: &BuildSettings, page_count: u32, boards: &[BoardRecord]) -> Value {
    let mut view = Map::new();
    insert(&mut view, "pageCount", page_count);
    insert(&mut view, "boards", plain(boards, BOARD_LIST_FIELDS));
    insert(
        &mut view,
        "overboard",
        settings
            .general
            .overboard
            .clone()
            .map_or(Value::Null, Value::String),
    );
    insert(
        &mut view,
        "sfwOverboard",
        settings
            .general
            .sfw_overboard
            .clone()
            .map_or(Value::Null, Value::String),
    );
    Value::Object(view)
}

pub fn edit(posting: &Posting) -> Value {
    let mut view = Map::new();
    insert(&mut view, "message", posting.message.as_str());
    if let Some(subject) = posting.subject.as_deref() {
        insert(&mut view, "subject", subject);
    }
    Value::Object(view)
}

pub fn message(status: &str, data: Value) -> Value {
    let mut view = Map::new();
    insert(&mut view, "status", status);
    view.insert("data".to_string(), data);
    Value::Object(view)
}

pub fn accounts(users: &[UserRecord]) -> Value {
    Value::Array(
        users
            .iter()
            .map(|user| Value::String(user.login.clone()))
            .collect(),
    )
}

/// Users holding a global staff role, most privileged first.
pub fn staff(settings: &BuildSettings, users: &[UserRecord]) -> Value {
    let mut roster: Vec<UserRecord> = users
        .iter()
        .filter(|user| user.global_role <= settings.general.max_staff_role)
        .cloned()
        .collect();
    roster.sort_by(|a, b| a.global_role.cmp(&b.global_role).then(a.login.cmp(&b.login)));
    plain(&roster, STAFF_FIELDS)
}

/// Thread as seen from the moderation panel, with addresses redacted for
/// `viewer`.
pub fn thread(
    settings: &BuildSettings,
    board: &BoardRecord,
    preview: &ThreadPreview,
    viewer: Viewer,
) -> Value {
    let redaction = RedactionContext::for_viewer(viewer, &board.ip_salt, &settings.general);
    let ctx = ProjectionContext::new(&redaction);
    Value::Object(thread_object(&preview.thread, &preview.posts, &ctx))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::builder::redaction::hash_for_display;
    use crate::config::GeneralSettings;

    fn settings(general: GeneralSettings) -> BuildSettings {
        BuildSettings::new(general)
    }

    fn staff_user(login: &str, role: u8) -> UserRecord {
        UserRecord {
            global_role: role,
            ..UserRecord::new(login)
        }
    }

    #[test]
    fn board_range_bans_are_hashed_with_the_board_salt() {
        let bans = [RangeBanRecord {
            id: "r1".to_string(),
            board_uri: Some("a".to_string()),
            range: vec![10, 20],
        }];
        let board = BoardRecord {
            board_uri: "a".to_string(),
            ip_salt: "salt-a".to_string(),
            ..BoardRecord::default()
        };

        let hashed = range_bans(&bans, Some(&board));
        assert_eq!(
            hashed,
            json!([{
                "_id": "r1",
                "boardUri": "a",
                "range": hash_for_display("salt-a", "10.20"),
            }])
        );

        let global = [RangeBanRecord {
            id: "r2".to_string(),
            board_uri: None,
            range: vec![192, 168, 4],
        }];
        assert_eq!(
            range_bans(&global, None),
            json!([{ "_id": "r2", "range": "192.168.4" }])
        );
    }

    #[test]
    fn staff_roster_skips_regular_users_and_sorts_by_role() {
        let settings = settings(GeneralSettings {
            max_staff_role: 3,
            ..GeneralSettings::default()
        });
        let users = [
            staff_user("zed", 2),
            staff_user("user", 4),
            staff_user("root", 0),
            staff_user("amy", 2),
        ];

        assert_eq!(
            staff(&settings, &users),
            json!([
                { "login": "root", "globalRole": 0 },
                { "login": "amy", "globalRole": 2 },
                { "login": "zed", "globalRole": 2 },
            ])
        );
    }

    #[test]
    fn board_management_falls_back_to_global_limits() {
        let settings = settings(GeneralSettings {
            auto_sage_limit: 500,
            max_thread_count: 50,
            max_file_size_mb: 8,
            max_files: 3,
            accepted_mimes: vec!["image/png".to_string()],
            ..GeneralSettings::default()
        });
        let board = BoardRecord {
            board_uri: "a".to_string(),
            owner: "alice".to_string(),
            max_files: Some(1),
            ..BoardRecord::default()
        };

        let owner_view = board_management(&settings, "alice", &board, &[], &[]);
        assert_eq!(owner_view["isOwner"], json!(true));
        assert_eq!(owner_view["autoSageLimit"], json!(500));
        assert_eq!(owner_view["maxThreadCount"], json!(50));
        assert_eq!(owner_view["maxFileSizeMB"], json!(8));
        assert_eq!(owner_view["acceptedMimes"], json!(["image/png"]));
        assert_eq!(owner_view["maxFiles"], json!(1));
        assert_eq!(owner_view["openReports"], json!([]));
        assert!(owner_view.get("anonName").is_none());

        let volunteer_view = board_management(&settings, "bob", &board, &[], &[]);
        assert_eq!(volunteer_view["isOwner"], json!(false));
    }

    #[test]
    fn board_directory_names_the_overboards() {
        let configured = settings(GeneralSettings {
            overboard: Some("overboard".to_string()),
            sfw_overboard: Some("sfw".to_string()),
            ..GeneralSettings::default()
        });
        let board = BoardRecord {
            board_uri: "a".to_string(),
            board_name: "Anything".to_string(),
            ..BoardRecord::default()
        };

        let view = boards(&configured, 2, std::slice::from_ref(&board));
        assert_eq!(view["pageCount"], json!(2));
        assert_eq!(view["overboard"], json!("overboard"));
        assert_eq!(view["sfwOverboard"], json!("sfw"));
        assert_eq!(view["boards"][0]["boardUri"], json!("a"));
        assert_eq!(view["boards"][0]["boardName"], json!("Anything"));

        let bare = boards(&settings(GeneralSettings::default()), 1, &[]);
        assert_eq!(bare["overboard"], Value::Null);
        assert_eq!(bare["sfwOverboard"], Value::Null);
        assert_eq!(bare["boards"], json!([]));
    }
}
