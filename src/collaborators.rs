//! Contracts for the systems the engine reads from and writes to. Storage
//! technology is left to the implementations (`memory`, `sqlite_store`).

use std::sync::Arc;

use anyhow::Result;

use crate::bracket::NodeId;
use crate::error::BracketResult;
use crate::prediction::{MatchResult, Prediction, UserId};

pub trait PredictionStore: Send + Sync {
    fn load(&self, user: UserId, node: NodeId) -> Result<Option<Prediction>>;
    fn save(&self, prediction: &Prediction) -> Result<()>;
    /// All of one user's rows, ordered by fixture.
    fn load_user(&self, user: UserId) -> Result<Vec<Prediction>>;
    fn users_at(&self, node: NodeId) -> Result<Vec<UserId>>;
    fn delete_user(&self, user: UserId) -> Result<()>;
}

/// Real results, written by the result-entry flow and only read here.
pub trait MatchResults: Send + Sync {
    fn result(&self, node: NodeId) -> Result<MatchResult>;
}

pub trait EliminationTracker: Send + Sync {
    fn is_eliminated(&self, team: &str) -> Result<bool>;
    fn set_eliminated(&self, team: &str, eliminated: bool) -> Result<()>;
}

/// Tournament-phase gate. Read once per engine call and threaded through as a
/// plain `bool` from there.
pub trait StageGate: Send + Sync {
    fn is_reachability_enforced(&self) -> bool;
}

/// Absolute-set score ledger; callers never add to the stored value.
pub trait ScoreLedger: Send + Sync {
    fn knockout_score(&self, user: UserId) -> Result<u32>;
    fn set_user_knockout_score(&self, user: UserId, total: u32) -> Result<()>;
}

pub trait GroupStandingsProvider: Send + Sync {
    /// Team the user currently has at `position` (1-based) of `group`.
    fn get_place(&self, user: UserId, group: char, position: u8) -> Result<Option<String>>;
}

/// Writer side of [`MatchResults`], owned by the result-entry flow.
pub trait ResultEntry: Send + Sync {
    fn enter_result(
        &self,
        node: NodeId,
        slot1: &str,
        slot2: &str,
        winner: &str,
    ) -> BracketResult<()>;
}

/// Everything the engine talks to, shared across calls.
#[derive(Clone)]
pub struct Collaborators {
    pub predictions: Arc<dyn PredictionStore>,
    pub results: Arc<dyn MatchResults>,
    pub eliminations: Arc<dyn EliminationTracker>,
    pub gate: Arc<dyn StageGate>,
    pub ledger: Arc<dyn ScoreLedger>,
    pub standings: Arc<dyn GroupStandingsProvider>,
}
