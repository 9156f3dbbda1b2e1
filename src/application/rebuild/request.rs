//! Typed rebuild requests and their deduplication keys.

use std::fmt;

use boardcache_wire::RebuildMessage;
use thiserror::Error;
use time::Date;
use time::macros::format_description;

use crate::domain::board_settings::validate_board_uri;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("rebuild message names no target")]
    Empty,
    #[error("`{field}` needs a board")]
    MissingBoard { field: &'static str },
    #[error("invalid board uri `{0}`")]
    InvalidBoard(String),
    #[error("multiboard request needs at least two boards")]
    NoBoards,
    #[error("log request needs a valid `date`: {0}")]
    InvalidDate(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildTarget {
    FrontPage,
    /// Every index page and the catalog of a board.
    Board { uri: String },
    BoardPage { uri: String, page: u32 },
    Thread { uri: String, thread_id: u64 },
    Catalog { uri: String },
    Rules { uri: String },
    Overboard { sfw: bool },
    /// Sorted, deduplicated board list.
    Multiboard { boards: Vec<String> },
    Log { date: Date },
    NotFound,
    Login,
    GenericThumb,
    /// Every artifact the system knows how to build.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TargetKind {
    FrontPage,
    Board,
    Overboard,
    Multiboard,
    Log,
    NotFound,
    Login,
    GenericThumb,
    All,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::FrontPage => "frontPage",
            TargetKind::Board => "board",
            TargetKind::Overboard => "overboard",
            TargetKind::Multiboard => "multiboard",
            TargetKind::Log => "log",
            TargetKind::NotFound => "notFound",
            TargetKind::Login => "login",
            TargetKind::GenericThumb => "genericThumb",
            TargetKind::All => "all",
        }
    }
}

/// Deduplication identity: at most one execution per key at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RebuildKey {
    pub kind: TargetKind,
    pub id: Option<String>,
}

impl RebuildKey {
    pub fn global(kind: TargetKind) -> Self {
        Self { kind, id: None }
    }

    pub fn scoped(kind: TargetKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: Some(id.into()),
        }
    }
}

impl fmt::Display for RebuildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{id}", self.kind.as_str()),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildRequest {
    pub target: RebuildTarget,
    pub build_all: bool,
}

impl RebuildRequest {
    pub fn new(target: RebuildTarget) -> Self {
        Self {
            target,
            build_all: false,
        }
    }

    pub fn board_all(uri: impl Into<String>) -> Self {
        Self {
            target: RebuildTarget::Board { uri: uri.into() },
            build_all: true,
        }
    }

    pub fn multiboard(boards: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut boards: Vec<String> = boards.into_iter().map(Into::into).collect();
        boards.sort();
        boards.dedup();
        Self::new(RebuildTarget::Multiboard { boards })
    }

    pub fn key(&self) -> RebuildKey {
        match &self.target {
            RebuildTarget::FrontPage => RebuildKey::global(TargetKind::FrontPage),
            RebuildTarget::Board { uri }
            | RebuildTarget::BoardPage { uri, .. }
            | RebuildTarget::Thread { uri, .. }
            | RebuildTarget::Catalog { uri }
            | RebuildTarget::Rules { uri } => RebuildKey::scoped(TargetKind::Board, uri.clone()),
            RebuildTarget::Overboard { sfw } => RebuildKey::scoped(
                TargetKind::Overboard,
                if *sfw { "sfwOverboard" } else { "overboard" },
            ),
            RebuildTarget::Multiboard { boards } => {
                RebuildKey::scoped(TargetKind::Multiboard, boards.join("+"))
            }
            RebuildTarget::Log { date } => RebuildKey::scoped(TargetKind::Log, date.to_string()),
            RebuildTarget::NotFound => RebuildKey::global(TargetKind::NotFound),
            RebuildTarget::Login => RebuildKey::global(TargetKind::Login),
            RebuildTarget::GenericThumb => RebuildKey::global(TargetKind::GenericThumb),
            RebuildTarget::All => RebuildKey::global(TargetKind::All),
        }
    }

    /// Split a worker message into typed requests, one per flagged target.
    pub fn from_message(message: &RebuildMessage) -> Result<Vec<RebuildRequest>, RequestError> {
        if message.all {
            return Ok(vec![RebuildRequest::new(RebuildTarget::All)]);
        }

        let mut requests = Vec::new();

        match message.board.as_deref() {
            Some(uri) => {
                validate_board_uri(uri, &[])
                    .map_err(|_| RequestError::InvalidBoard(uri.to_string()))?;
                let uri = uri.to_string();
                let build_all = message.build_all;
                let mut push = |target| requests.push(RebuildRequest { target, build_all });

                let mut specific = false;
                if let Some(thread_id) = message.thread {
                    push(RebuildTarget::Thread {
                        uri: uri.clone(),
                        thread_id,
                    });
                    specific = true;
                }
                if let Some(page) = message.page {
                    push(RebuildTarget::BoardPage {
                        uri: uri.clone(),
                        page,
                    });
                    specific = true;
                }
                if message.catalog {
                    push(RebuildTarget::Catalog { uri: uri.clone() });
                    specific = true;
                }
                if message.rules {
                    push(RebuildTarget::Rules { uri: uri.clone() });
                    specific = true;
                }
                if !specific {
                    push(RebuildTarget::Board { uri });
                }
            }
            None => {
                let board_fields = [
                    ("thread", message.thread.is_some()),
                    ("page", message.page.is_some()),
                    ("catalog", message.catalog),
                    ("rules", message.rules),
                    ("buildAll", message.build_all),
                ];
                if let Some((field, _)) = board_fields.iter().find(|(_, set)| *set) {
                    return Err(RequestError::MissingBoard { field: *field });
                }
            }
        }

        if message.front_page {
            requests.push(RebuildRequest::new(RebuildTarget::FrontPage));
        }
        if message.overboard {
            requests.push(RebuildRequest::new(RebuildTarget::Overboard {
                sfw: message.sfw,
            }));
        }
        if message.multiboard {
            for board in &message.boards {
                validate_board_uri(board, &[])
                    .map_err(|_| RequestError::InvalidBoard(board.clone()))?;
            }
            let request = RebuildRequest::multiboard(message.boards.iter().cloned());
            // A single board would collide with that board's own index page.
            if matches!(&request.target, RebuildTarget::Multiboard { boards } if boards.len() < 2) {
                return Err(RequestError::NoBoards);
            }
            requests.push(request);
        }
        if message.log {
            let raw = message.date.as_deref().unwrap_or_default();
            let date = Date::parse(raw, format_description!("[year]-[month]-[day]"))
                .map_err(|err| RequestError::InvalidDate(format!("`{raw}`: {err}")))?;
            requests.push(RebuildRequest::new(RebuildTarget::Log { date }));
        }
        if message.not_found {
            requests.push(RebuildRequest::new(RebuildTarget::NotFound));
        }
        if message.login {
            requests.push(RebuildRequest::new(RebuildTarget::Login));
        }
        if message.generic_thumb {
            requests.push(RebuildRequest::new(RebuildTarget::GenericThumb));
        }

        if requests.is_empty() {
            return Err(RequestError::Empty);
        }
        Ok(requests)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    #[test]
    fn board_scoped_requests_share_one_key() {
        let message = RebuildMessage {
            board: Some("a".to_string()),
            thread: Some(7),
            catalog: true,
            ..RebuildMessage::default()
        };

        let requests = RebuildRequest::from_message(&message).expect("valid message");
        assert_eq!(requests.len(), 2);
        assert!(
            requests
                .iter()
                .all(|request| request.key() == RebuildKey::scoped(TargetKind::Board, "a"))
        );
    }

    #[test]
    fn plain_board_message_rebuilds_the_index() {
        let requests = RebuildRequest::from_message(&RebuildMessage::board_all("a"))
            .expect("valid message");
        assert_eq!(requests, vec![RebuildRequest::board_all("a")]);
    }

    #[test]
    fn multiboard_key_ignores_board_order() {
        let first = RebuildRequest::multiboard(["b", "a"]);
        let second = RebuildRequest::multiboard(["a", "b", "a"]);
        assert_eq!(first.key(), second.key());
        assert_eq!(first.key().to_string(), "multiboard:a+b");
    }

    #[test]
    fn multiboards_need_two_distinct_boards() {
        for boards in [vec![], vec!["a"], vec!["a", "a"]] {
            let message = RebuildMessage {
                multiboard: true,
                boards: boards.iter().map(|board| board.to_string()).collect(),
                ..RebuildMessage::default()
            };
            assert_eq!(
                RebuildRequest::from_message(&message),
                Err(RequestError::NoBoards),
                "boards {boards:?}"
            );
        }
    }

    #[test]
    fn log_requests_parse_their_date() {
        let message = RebuildMessage {
            log: true,
            date: Some("2024-03-09".to_string()),
            ..RebuildMessage::default()
        };
        let requests = RebuildRequest::from_message(&message).expect("valid message");
        assert_eq!(
            requests,
            vec![RebuildRequest::new(RebuildTarget::Log {
                date: date!(2024 - 03 - 09)
            })]
        );
    }

    #[test]
    fn contradictory_messages_are_rejected() {
        assert_eq!(
            RebuildRequest::from_message(&RebuildMessage::default()),
            Err(RequestError::Empty)
        );

        let orphan_thread = RebuildMessage {
            thread: Some(1),
            ..RebuildMessage::default()
        };
        assert_eq!(
            RebuildRequest::from_message(&orphan_thread),
            Err(RequestError::MissingBoard { field: "thread" })
        );

        let traversal = RebuildMessage::board("../etc");
        assert!(matches!(
            RebuildRequest::from_message(&traversal),
            Err(RequestError::InvalidBoard(_))
        ));
    }

    #[test]
    fn all_overrides_everything_else() {
        let message = RebuildMessage {
            all: true,
            front_page: true,
            ..RebuildMessage::default()
        };
        let requests = RebuildRequest::from_message(&message).expect("valid message");
        assert_eq!(requests, vec![RebuildRequest::new(RebuildTarget::All)]);
        assert_eq!(requests[0].key(), RebuildKey::global(TargetKind::All));
    }
}
