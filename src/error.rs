use thiserror::Error;

use crate::bracket::NodeId;

/// Errors surfaced by the bracket engine.
///
/// `Config` is fatal and only produced while building the graph or the
/// third-place table. `InvalidInput` is returned before anything is written.
/// `Storage` wraps collaborator failures; the triggering event should be
/// retried from scratch since every mutation is idempotent.
#[derive(Error, Debug)]
pub enum BracketError {
    #[error("bracket config error: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("result for {node} already decided for {existing}, refusing {attempted}")]
    ResultConflict {
        node: NodeId,
        existing: String,
        attempted: String,
    },

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl BracketError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

pub type BracketResult<T> = Result<T, BracketError>;
