use bcp_process::CancellationToken;
use thiserror::Error;

use crate::{command::CommandError, label::LabelError};

#[derive(Debug, Error)]
pub enum BazelError {
    /// The workspace or tool setup is unusable; retrying will not help.
    #[error("invalid bazel configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Command(CommandError),
    #[error("operation was cancelled")]
    Cancelled,
    #[error("failed to parse {what}: {message}")]
    Parse { what: String, message: String },
    /// Bazel answered in a way that should be impossible (e.g. zero rules
    /// where exactly one was required).
    #[error("internal invariant violated: {0}")]
    Invariant(String),
    #[error(transparent)]
    Label(#[from] LabelError),
}

impl BazelError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Errors that should be surfaced once as a setup problem rather than per target.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Command(CommandError::Spawn { .. } | CommandError::Shell(_))
        )
    }
}

impl From<CommandError> for BazelError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Cancelled => Self::Cancelled,
            other => Self::Command(other),
        }
    }
}

/// Cooperative cancellation point between phases.
pub fn check_cancelled(cancel: &CancellationToken) -> Result<(), BazelError> {
    if cancel.is_cancelled() {
        Err(BazelError::Cancelled)
    } else {
        Ok(())
    }
}

pub type Result<T, E = BazelError> = std::result::Result<T, E>;
