//! Wire types exchanged across the boardcache process boundary.
//!
//! Workers emit [`RebuildMessage`] values as newline-delimited JSON on their
//! standard output; the supervisor relays them to the regeneration queue
//! without looking inside. [`SpoolEnvelope`] documents are dropped into the
//! spool directory by tooling and claimed by exactly one worker.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rebuild request as it travels from a worker to the supervisor.
///
/// Every field is optional. The shape mirrors what the request-handling
/// layer has always sent, so `boardUri` is accepted as an alias of `board`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildMessage {
    #[serde(default, alias = "boardUri", skip_serializing_if = "Option::is_none")]
    pub board: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub build_all: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub front_page: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub catalog: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub rules: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub overboard: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub sfw: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub multiboard: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boards: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub log: bool,
    /// Calendar day (`YYYY-MM-DD`) for log artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub not_found: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub login: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub generic_thumb: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub all: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl RebuildMessage {
    /// Rebuild the index pages and catalog of a board.
    pub fn board(uri: impl Into<String>) -> Self {
        Self {
            board: Some(uri.into()),
            ..Self::default()
        }
    }

    /// Rebuild every artifact derived from a board.
    pub fn board_all(uri: impl Into<String>) -> Self {
        Self {
            board: Some(uri.into()),
            build_all: true,
            ..Self::default()
        }
    }

    pub fn thread(uri: impl Into<String>, thread_id: u64) -> Self {
        Self {
            board: Some(uri.into()),
            thread: Some(thread_id),
            ..Self::default()
        }
    }

    pub fn front_page() -> Self {
        Self {
            front_page: true,
            ..Self::default()
        }
    }

    /// Encode as a single line, without the trailing newline.
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode one line of worker output.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

/// Identity of the person on whose behalf a spool command runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub login: String,
}

/// Replacement settings for an existing board.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoardSettingsInput {
    pub board_uri: String,
    pub board_name: String,
    pub board_description: String,
    pub board_message: Option<String>,
    pub anonymous_name: Option<String>,
    /// Switches to turn on; unknown names are ignored.
    pub settings: Vec<String>,
    pub tags: Vec<String>,
    pub accepted_mimes: Vec<String>,
    pub captcha_mode: u8,
    pub max_files: Option<u32>,
    pub max_file_size_mb: Option<u32>,
    pub auto_sage_limit: Option<u32>,
    pub max_thread_count: Option<u32>,
    pub hourly_thread_limit: Option<u32>,
    pub auto_captcha_limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBoardInput {
    pub board_uri: String,
    pub board_name: String,
    pub board_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferBoardInput {
    pub board_uri: String,
    /// Login of the new owner.
    pub login: String,
}

/// A data mutation a worker applies on behalf of an external caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerCommand {
    SetBoardSettings {
        actor: Actor,
        input: BoardSettingsInput,
    },
    CreateBoard {
        actor: Actor,
        input: CreateBoardInput,
    },
    TransferBoard {
        actor: Actor,
        input: TransferBoardInput,
    },
    /// Forward a rebuild request without touching any data.
    Rebuild { message: RebuildMessage },
}

/// File-level wrapper written to the spool directory as `{id}.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpoolEnvelope {
    pub id: Uuid,
    pub command: WorkerCommand,
}

impl SpoolEnvelope {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            id: Uuid::new_v4(),
            command,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.id)
    }
}
