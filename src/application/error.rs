use thiserror::Error;

use crate::application::rebuild::RebuildError;
use crate::cache::CacheError;
use crate::infra::error::InfraError;
use crate::infra::templates::TemplateError;
use crate::supervisor::SupervisorError;
use crate::supervisor::boot::BootError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Boot(#[from] BootError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Rebuild(#[from] RebuildError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
