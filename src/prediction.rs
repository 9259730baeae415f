use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bracket::{NodeId, Slot};
use crate::error::{BracketError, BracketResult};

pub type UserId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictionStatus {
    Invalid,
    Valid,
    Unreachable,
    CorrectFull,
    CorrectPartial,
    Incorrect,
}

impl PredictionStatus {
    /// Statuses assigned by result reconciliation. Pre-result resolution never
    /// overwrites them.
    pub fn is_post_result(self) -> bool {
        matches!(
            self,
            PredictionStatus::CorrectFull
                | PredictionStatus::CorrectPartial
                | PredictionStatus::Incorrect
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PredictionStatus::Invalid => "INVALID",
            PredictionStatus::Valid => "VALID",
            PredictionStatus::Unreachable => "UNREACHABLE",
            PredictionStatus::CorrectFull => "CORRECT_FULL",
            PredictionStatus::CorrectPartial => "CORRECT_PARTIAL",
            PredictionStatus::Incorrect => "INCORRECT",
        }
    }
}

impl fmt::Display for PredictionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PredictionStatus {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "INVALID" => Ok(PredictionStatus::Invalid),
            "VALID" => Ok(PredictionStatus::Valid),
            "UNREACHABLE" => Ok(PredictionStatus::Unreachable),
            "CORRECT_FULL" => Ok(PredictionStatus::CorrectFull),
            "CORRECT_PARTIAL" => Ok(PredictionStatus::CorrectPartial),
            "INCORRECT" => Ok(PredictionStatus::Incorrect),
            other => Err(format!("unknown prediction status {other:?}")),
        }
    }
}

/// Read-only shape shared by stored predictions and their drafts.
pub trait PredictionView {
    fn node(&self) -> NodeId;
    fn slot1(&self) -> Option<&str>;
    fn slot2(&self) -> Option<&str>;
    fn winner(&self) -> Option<&str>;
    fn status(&self) -> PredictionStatus;

    fn slot(&self, slot: Slot) -> Option<&str> {
        match slot {
            Slot::One => self.slot1(),
            Slot::Two => self.slot2(),
        }
    }
}

/// A user's pick at one fixture. Only the propagation engine and the result
/// reconciler write these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub user: UserId,
    pub node: NodeId,
    pub slot1: Option<String>,
    pub slot2: Option<String>,
    pub winner: Option<String>,
    pub slot1_valid: bool,
    pub slot2_valid: bool,
    pub status: PredictionStatus,
    pub points: u32,
}

impl Prediction {
    pub fn new(user: UserId, node: NodeId) -> Self {
        Self {
            user,
            node,
            slot1: None,
            slot2: None,
            winner: None,
            slot1_valid: false,
            slot2_valid: false,
            status: PredictionStatus::Invalid,
            points: 0,
        }
    }

    pub fn slot_team(&self, slot: Slot) -> Option<&str> {
        match slot {
            Slot::One => self.slot1.as_deref(),
            Slot::Two => self.slot2.as_deref(),
        }
    }

    pub fn set_slot_team(&mut self, slot: Slot, team: Option<String>) {
        match slot {
            Slot::One => self.slot1 = team,
            Slot::Two => self.slot2 = team,
        }
    }

    pub fn slot_valid(&self, slot: Slot) -> bool {
        match slot {
            Slot::One => self.slot1_valid,
            Slot::Two => self.slot2_valid,
        }
    }

    pub fn set_slot_valid(&mut self, slot: Slot, valid: bool) {
        match slot {
            Slot::One => self.slot1_valid = valid,
            Slot::Two => self.slot2_valid = valid,
        }
    }

    pub fn slot_of(&self, team: &str) -> Option<Slot> {
        Slot::BOTH
            .into_iter()
            .find(|slot| self.slot_team(*slot) == Some(team))
    }

    /// The slot team that is not the recorded winner, once a winner exists.
    pub fn predicted_loser(&self) -> Option<&str> {
        let winner = self.winner.as_deref()?;
        let winner_slot = self.slot_of(winner)?;
        self.slot_team(winner_slot.other())
    }
}

impl PredictionView for Prediction {
    fn node(&self) -> NodeId {
        self.node
    }

    fn slot1(&self) -> Option<&str> {
        self.slot1.as_deref()
    }

    fn slot2(&self) -> Option<&str> {
        self.slot2.as_deref()
    }

    fn winner(&self) -> Option<&str> {
        self.winner.as_deref()
    }

    fn status(&self) -> PredictionStatus {
        self.status
    }
}

/// Disposable projection of a [`Prediction`], rebuilt on every request.
/// `current_winner` is display-only and never fed back into propagation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DraftPrediction {
    pub user: UserId,
    pub node: NodeId,
    pub slot1: Option<String>,
    pub slot2: Option<String>,
    pub winner: Option<String>,
    pub current_winner: Option<String>,
    pub status: PredictionStatus,
    pub from_result: bool,
}

impl PredictionView for DraftPrediction {
    fn node(&self) -> NodeId {
        self.node
    }

    fn slot1(&self) -> Option<&str> {
        self.slot1.as_deref()
    }

    fn slot2(&self) -> Option<&str> {
        self.slot2.as_deref()
    }

    fn winner(&self) -> Option<&str> {
        self.winner.as_deref()
    }

    fn status(&self) -> PredictionStatus {
        self.status
    }
}

/// Real outcome of a fixture. All fields stay `None` until decided; the
/// winner never changes once set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub slot1: Option<String>,
    pub slot2: Option<String>,
    pub winner: Option<String>,
}

impl MatchResult {
    pub fn decided(slot1: &str, slot2: &str, winner: &str) -> Self {
        Self {
            slot1: Some(slot1.to_string()),
            slot2: Some(slot2.to_string()),
            winner: Some(winner.to_string()),
        }
    }

    pub fn is_decided(&self) -> bool {
        self.winner.is_some()
    }

    pub fn teams_known(&self) -> bool {
        self.slot1.is_some() && self.slot2.is_some()
    }

    pub fn involves(&self, team: &str) -> bool {
        self.slot1.as_deref() == Some(team) || self.slot2.as_deref() == Some(team)
    }
}

/// Checks a decided fixture's teams and returns the loser.
pub fn result_loser<'a>(slot1: &'a str, slot2: &'a str, winner: &str) -> BracketResult<&'a str> {
    if slot1.trim().is_empty() || slot2.trim().is_empty() {
        return Err(BracketError::invalid("result needs both teams"));
    }
    if slot1 == slot2 {
        return Err(BracketError::invalid(format!(
            "result lists {slot1} on both sides"
        )));
    }
    if winner == slot1 {
        Ok(slot2)
    } else if winner == slot2 {
        Ok(slot1)
    } else {
        Err(BracketError::invalid(format!(
            "winner {winner} did not play {slot1} v {slot2}"
        )))
    }
}

/// Collapses the empty/placeholder team markers callers send into `None`.
pub fn normalize_team(team: Option<&str>) -> Option<String> {
    let trimmed = team?.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("none")
        || trimmed.eq_ignore_ascii_case("null")
    {
        return None;
    }
    Some(trimmed.to_string())
}
