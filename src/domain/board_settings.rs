//! Board setting rules: what may be stored and what counts as a visible change.

use std::collections::BTreeSet;

use boardcache_wire::BoardSettingsInput;

use super::entities::BoardRecord;
use super::error::DomainError;

/// Switches a board owner may toggle.
pub const VALID_SETTINGS: [&str; 10] = [
    "disableIds",
    "forceAnonymity",
    "allowCode",
    "early404",
    "unindex",
    "blockDeletion",
    "requireThreadFile",
    "uniqueFiles",
    "uniquePosts",
    "locationFlags",
];

/// Switches only global staff may toggle.
pub const VALID_SPECIAL_SETTINGS: [&str; 1] = ["sfw"];

/// Settings every new board starts with.
pub const DEFAULT_SETTINGS: [&str; 1] = ["disableIds"];

pub const BOARD_URI_MAX_LEN: usize = 32;
pub const BOARD_NAME_MAX_LEN: usize = 32;
pub const ANONYMOUS_NAME_MAX_LEN: usize = 32;
pub const BOARD_DESCRIPTION_MAX_LEN: usize = 128;
pub const BOARD_MESSAGE_MAX_LEN: usize = 256;
pub const LOGIN_MAX_LEN: usize = 16;
const TAG_MAX_LEN: usize = 32;

/// Trim, optionally neutralise angle brackets, and clip to `max_chars`.
pub fn sanitize_text(value: &str, max_chars: usize, remove_html: bool) -> String {
    let trimmed = value.trim();
    let escaped = if remove_html {
        escape_angle_brackets(trimmed)
    } else {
        trimmed.to_string()
    };
    escaped.chars().take(max_chars).collect()
}

fn escape_angle_brackets(value: &str) -> String {
    value.replace('<', "&lt;").replace('>', "&gt;")
}

/// Board URIs are word characters only and may not shadow an overboard.
pub fn validate_board_uri(uri: &str, reserved: &[&str]) -> Result<(), DomainError> {
    if uri.is_empty() {
        return Err(DomainError::validation("board uri must not be empty"));
    }
    if uri.chars().count() > BOARD_URI_MAX_LEN {
        return Err(DomainError::validation(format!(
            "board uri must be at most {BOARD_URI_MAX_LEN} characters"
        )));
    }
    if !uri.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        return Err(DomainError::validation(format!(
            "board uri `{uri}` may only contain letters, digits and underscores"
        )));
    }
    if reserved.iter().any(|candidate| !candidate.is_empty() && *candidate == uri) {
        return Err(DomainError::conflict("board", uri));
    }
    Ok(())
}

/// Keep only recognised switches, in canonical order.
pub fn filter_settings(requested: &[String]) -> Vec<String> {
    VALID_SETTINGS
        .iter()
        .filter(|setting| requested.iter().any(|value| value == *setting))
        .map(|setting| (*setting).to_string())
        .collect()
}

pub fn sanitize_tags(tags: &[String], max_tags: usize) -> Vec<String> {
    let mut sanitized: Vec<String> = Vec::new();

    for tag in tags {
        if sanitized.len() >= max_tags {
            break;
        }
        let candidate: String = escape_angle_brackets(tag.trim())
            .to_lowercase()
            .chars()
            .take(TAG_MAX_LEN)
            .collect();
        if !candidate.is_empty() && !sanitized.contains(&candidate) {
            sanitized.push(candidate);
        }
    }

    sanitized
}

/// Restrict requested mimes to the global list. `None` means "accept every
/// globally allowed type", which is also what an identical list collapses to.
pub fn sanitize_mimes(mimes: &[String], allowed: &[String]) -> Option<Vec<String>> {
    let mut sanitized: Vec<String> = Vec::new();

    for mime in mimes {
        let candidate = mime.trim().to_lowercase();
        if !sanitized.contains(&candidate) && allowed.contains(&candidate) {
            sanitized.push(candidate);
        }
    }

    let requested: BTreeSet<&String> = sanitized.iter().collect();
    let global: BTreeSet<&String> = allowed.iter().collect();

    (!sanitized.is_empty() && requested != global).then_some(sanitized)
}

/// Board message markup: escaped HTML plus `[label](href)` links.
pub fn message_markdown(message: Option<&str>) -> Option<String> {
    let message = message.filter(|value| !value.is_empty())?;
    let escaped = escape_angle_brackets(message);

    let mut output = String::with_capacity(escaped.len());
    let mut rest = escaped.as_str();

    while let Some(open) = rest.find('[') {
        output.push_str(&rest[..open]);
        let candidate = &rest[open..];
        match parse_link(candidate) {
            Some((label, href, consumed)) => {
                output.push_str(&format!("<a href=\"{href}\">{label}</a>"));
                rest = &candidate[consumed..];
            }
            None => {
                output.push('[');
                rest = &candidate[1..];
            }
        }
    }
    output.push_str(rest);

    Some(output)
}

fn parse_link(input: &str) -> Option<(&str, &str, usize)> {
    let close_label = input.find("](")?;
    let label = &input[1..close_label];
    if label.is_empty() || label.contains('\n') {
        return None;
    }
    let href_start = close_label + 2;
    let close_href = input[href_start..].find(')')? + href_start;
    let href = &input[href_start..close_href];
    if href.is_empty() || href.contains('\n') {
        return None;
    }
    Some((label, href, close_href + 1))
}

/// Whether a visible text field on the board header changed.
pub fn fields_changed(board: &BoardRecord, input: &BoardSettingsInput) -> bool {
    let pairs = [
        (board.board_name.as_str(), input.board_name.as_str()),
        (
            board.board_message.as_deref().unwrap_or_default(),
            input.board_message.as_deref().unwrap_or_default(),
        ),
        (
            board.board_description.as_str(),
            input.board_description.as_str(),
        ),
    ];

    pairs.iter().any(|(before, after)| before != after)
}

/// Anonymity toggles always matter; captcha toggles only when captcha is not
/// already forced globally.
pub fn captcha_or_anonymity_changed(
    board: &BoardRecord,
    input: &BoardSettingsInput,
    force_captcha: bool,
) -> bool {
    let had_anonymity = board.has_setting("forceAnonymity");
    let has_anonymity = input.settings.iter().any(|value| value == "forceAnonymity");
    let captcha_changed = board.captcha_mode != input.captcha_mode;

    had_anonymity != has_anonymity || (captcha_changed && !force_captcha)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn tags_are_trimmed_lowercased_and_deduplicated() {
        let tags = strings(&["  Anime ", "anime", "", "<b>", "x".repeat(40).as_str(), "extra"]);
        let sanitized = sanitize_tags(&tags, 3);
        assert_eq!(sanitized, strings(&["anime", "&lt;b&gt;", "x".repeat(32).as_str()]));
    }

    #[test]
    fn mimes_collapse_to_none_when_equal_to_global_list() {
        let allowed = strings(&["image/png", "image/jpeg"]);
        assert_eq!(sanitize_mimes(&strings(&["IMAGE/PNG", "image/jpeg"]), &allowed), None);
        assert_eq!(
            sanitize_mimes(&strings(&["image/png", "video/webm"]), &allowed),
            Some(strings(&["image/png"]))
        );
        assert_eq!(sanitize_mimes(&strings(&["video/webm"]), &allowed), None);
    }

    #[test]
    fn board_uri_rules() {
        assert!(validate_board_uri("tech_2", &["overboard", "sfw"]).is_ok());
        assert!(matches!(
            validate_board_uri("te-ch", &[]),
            Err(DomainError::Validation { .. })
        ));
        assert!(matches!(
            validate_board_uri("overboard", &["overboard", "sfw"]),
            Err(DomainError::Conflict { .. })
        ));
    }

    #[test]
    fn unknown_settings_are_dropped() {
        let filtered = filter_settings(&strings(&["textBoard", "forceAnonymity", "disableIds"]));
        assert_eq!(filtered, strings(&["disableIds", "forceAnonymity"]));
    }

    #[test]
    fn markdown_links_and_escapes() {
        let rendered = message_markdown(Some("see [rules](/a/rules) <now>"));
        assert_eq!(
            rendered.as_deref(),
            Some("see <a href=\"/a/rules\">rules</a> &lt;now&gt;")
        );
        assert_eq!(message_markdown(Some("")), None);
        assert_eq!(message_markdown(Some("[dangling")).as_deref(), Some("[dangling"));
    }

    #[test]
    fn captcha_change_is_ignored_when_forced_globally() {
        let board = BoardRecord {
            captcha_mode: 0,
            ..BoardRecord::default()
        };
        let input = BoardSettingsInput {
            captcha_mode: 1,
            ..BoardSettingsInput::default()
        };
        assert!(captcha_or_anonymity_changed(&board, &input, false));
        assert!(!captcha_or_anonymity_changed(&board, &input, true));
    }
}
