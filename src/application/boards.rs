//! Board administration: settings, creation and ownership transfer.
//!
//! Each operation persists its change first and then tells the rebuild
//! notifier which artifacts went stale. Permission checks belong to the
//! request-handling layer and are not repeated here.

use std::sync::Arc;

use boardcache_wire::{Actor, BoardSettingsInput, CreateBoardInput, RebuildMessage, TransferBoardInput};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::application::notifier::RebuildNotifier;
use crate::application::repos::{BoardWriteRepository, ForumRepository, RepoError};
use crate::application::settings::SettingsHandle;
use crate::domain::board_settings::{
    ANONYMOUS_NAME_MAX_LEN, BOARD_DESCRIPTION_MAX_LEN, BOARD_MESSAGE_MAX_LEN, BOARD_NAME_MAX_LEN,
    DEFAULT_SETTINGS, LOGIN_MAX_LEN, captcha_or_anonymity_changed, fields_changed,
    filter_settings, message_markdown, sanitize_mimes, sanitize_tags, sanitize_text,
    validate_board_uri,
};
use crate::domain::entities::{BoardRecord, LogEntry};
use crate::domain::error::DomainError;

const TRANSFER_LOG_TYPE: &str = "boardTransfer";

#[derive(Debug, Error)]
pub enum BoardAdminError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Clone)]
pub struct BoardAdminService {
    reader: Arc<dyn ForumRepository>,
    writer: Arc<dyn BoardWriteRepository>,
    notifier: Arc<dyn RebuildNotifier>,
    settings: Arc<SettingsHandle>,
}

impl BoardAdminService {
    pub fn new(
        reader: Arc<dyn ForumRepository>,
        writer: Arc<dyn BoardWriteRepository>,
        notifier: Arc<dyn RebuildNotifier>,
        settings: Arc<SettingsHandle>,
    ) -> Self {
        Self {
            reader,
            writer,
            notifier,
            settings,
        }
    }

    /// Replace a board's settings and request the rebuilds the change implies.
    #[instrument(skip(self, input), fields(board = %input.board_uri))]
    pub async fn set_settings(
        &self,
        actor: &Actor,
        input: BoardSettingsInput,
    ) -> Result<BoardRecord, BoardAdminError> {
        let settings = self.settings.current();
        let board = self.load_board(&input.board_uri).await?;

        let input = BoardSettingsInput {
            board_name: sanitize_text(&input.board_name, BOARD_NAME_MAX_LEN, true),
            board_description: sanitize_text(
                &input.board_description,
                BOARD_DESCRIPTION_MAX_LEN,
                true,
            ),
            board_message: input
                .board_message
                .as_deref()
                .map(|message| sanitize_text(message, BOARD_MESSAGE_MAX_LEN, false))
                .filter(|message| !message.is_empty()),
            anonymous_name: input
                .anonymous_name
                .as_deref()
                .map(|name| sanitize_text(name, ANONYMOUS_NAME_MAX_LEN, true))
                .filter(|name| !name.is_empty()),
            settings: filter_settings(&input.settings),
            ..input
        };
        if input.board_name.is_empty() {
            return Err(DomainError::validation("board name must not be empty").into());
        }

        let rebuild_board = fields_changed(&board, &input)
            || captcha_or_anonymity_changed(&board, &input, settings.general.force_captcha);
        let rebuild_front_page = board.board_name != input.board_name;

        let updated = BoardRecord {
            board_name: input.board_name.clone(),
            board_description: input.board_description.clone(),
            board_markdown: message_markdown(input.board_message.as_deref()),
            board_message: input.board_message.clone(),
            anonymous_name: input.anonymous_name.clone(),
            settings: input.settings.clone(),
            tags: sanitize_tags(&input.tags, settings.general.max_board_tags),
            accepted_mimes: sanitize_mimes(&input.accepted_mimes, &settings.general.accepted_mimes),
            captcha_mode: input.captcha_mode.min(2),
            max_files: positive(input.max_files),
            max_file_size_mb: positive(input.max_file_size_mb),
            auto_sage_limit: positive(input.auto_sage_limit),
            max_thread_count: positive(input.max_thread_count),
            hourly_thread_limit: positive(input.hourly_thread_limit),
            auto_captcha_threshold: positive(input.auto_captcha_limit),
            ..board
        };

        self.writer.update_board(updated.clone()).await?;

        if rebuild_board {
            self.notifier
                .request_rebuild(RebuildMessage::board_all(updated.board_uri.clone()));
        }
        if rebuild_front_page {
            self.notifier.request_rebuild(RebuildMessage::front_page());
        }

        info!(
            actor = %actor.login,
            rebuild_board,
            rebuild_front_page,
            "Board settings updated"
        );
        Ok(updated)
    }

    /// Create a board owned by `actor`.
    #[instrument(skip(self, input), fields(board = %input.board_uri))]
    pub async fn create_board(
        &self,
        actor: &Actor,
        input: CreateBoardInput,
    ) -> Result<BoardRecord, BoardAdminError> {
        let settings = self.settings.current();
        let board_uri = input.board_uri.trim().to_string();
        validate_board_uri(&board_uri, &settings.reserved_uris())?;

        let board_name = sanitize_text(&input.board_name, BOARD_NAME_MAX_LEN, true);
        if board_name.is_empty() {
            return Err(DomainError::validation("board name must not be empty").into());
        }

        let login = actor_login(actor)?;
        let mut owner = self
            .writer
            .find_user(&login)
            .await?
            .ok_or_else(|| DomainError::not_found("user", login.clone()))?;

        if self.reader.find_board(&board_uri).await?.is_some() {
            return Err(DomainError::conflict("board", board_uri).into());
        }

        let board = BoardRecord {
            board_uri: board_uri.clone(),
            board_name,
            board_description: sanitize_text(
                &input.board_description,
                BOARD_DESCRIPTION_MAX_LEN,
                true,
            ),
            owner: owner.login.clone(),
            ip_salt: generate_salt(),
            settings: DEFAULT_SETTINGS.iter().map(|s| s.to_string()).collect(),
            ..BoardRecord::default()
        };

        self.writer
            .insert_board(board.clone())
            .await
            .map_err(|err| match err {
                RepoError::Duplicate { entity, id } => {
                    BoardAdminError::Domain(DomainError::conflict(entity, id))
                }
                other => BoardAdminError::Repo(other),
            })?;

        if !owner.owned_boards.contains(&board_uri) {
            owner.owned_boards.push(board_uri.clone());
        }
        self.writer.save_user(owner).await?;

        self.notifier
            .request_rebuild(RebuildMessage::board_all(board_uri.clone()));

        info!(actor = %login, "Board created");
        Ok(board)
    }

    /// Hand a board to another user. Artifacts do not show the owner, so no
    /// rebuild is requested.
    #[instrument(skip(self, input), fields(board = %input.board_uri))]
    pub async fn transfer(
        &self,
        actor: &Actor,
        input: TransferBoardInput,
    ) -> Result<BoardRecord, BoardAdminError> {
        let mut board = self.load_board(&input.board_uri).await?;
        let new_login = input.login.trim().to_string();
        if new_login.chars().count() > LOGIN_MAX_LEN {
            return Err(DomainError::validation("login is too long").into());
        }
        if board.owner == new_login {
            return Err(DomainError::validation(format!(
                "{new_login} already owns /{}/",
                board.board_uri
            ))
            .into());
        }

        let mut new_owner = self
            .writer
            .find_user(&new_login)
            .await?
            .ok_or_else(|| DomainError::not_found("user", new_login.clone()))?;

        let old_login = std::mem::replace(&mut board.owner, new_login.clone());
        board.volunteers.retain(|volunteer| volunteer != &new_login);
        self.writer.update_board(board.clone()).await?;

        if actor.login != old_login {
            self.writer
                .append_log(LogEntry {
                    user: actor.login.clone(),
                    time: OffsetDateTime::now_utc(),
                    global: true,
                    board_uri: Some(board.board_uri.clone()),
                    kind: TRANSFER_LOG_TYPE.to_string(),
                    description: format!(
                        "User {} transferred board /{}/ from {} to {}.",
                        actor.login, board.board_uri, old_login, new_login
                    ),
                })
                .await?;
        }

        if let Some(mut old_owner) = self.writer.find_user(&old_login).await? {
            old_owner.owned_boards.retain(|uri| uri != &board.board_uri);
            self.writer.save_user(old_owner).await?;
        }

        new_owner
            .volunteered_boards
            .retain(|uri| uri != &board.board_uri);
        if !new_owner.owned_boards.contains(&board.board_uri) {
            new_owner.owned_boards.push(board.board_uri.clone());
        }
        self.writer.save_user(new_owner).await?;

        info!(actor = %actor.login, from = %old_login, to = %new_login, "Board transferred");
        Ok(board)
    }

    async fn load_board(&self, board_uri: &str) -> Result<BoardRecord, BoardAdminError> {
        self.reader
            .find_board(board_uri)
            .await?
            .ok_or_else(|| DomainError::not_found("board", board_uri).into())
    }
}

fn actor_login(actor: &Actor) -> Result<String, DomainError> {
    let login = actor.login.trim();
    if login.is_empty() || login.chars().count() > LOGIN_MAX_LEN {
        return Err(DomainError::validation("invalid actor login"));
    }
    Ok(login.to_string())
}

fn positive(value: Option<u32>) -> Option<u32> {
    value.filter(|value| *value > 0)
}

fn generate_salt() -> String {
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(
        OffsetDateTime::now_utc()
            .unix_timestamp_nanos()
            .to_le_bytes(),
    );
    hex::encode(hasher.finalize())
}

