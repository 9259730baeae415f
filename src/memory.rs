//! In-memory collaborators. Used by tests, the simulator and benchmarks.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{Result, anyhow};

use crate::bracket::NodeId;
use crate::collaborators::{
    Collaborators, EliminationTracker, GroupStandingsProvider, MatchResults, PredictionStore,
    ResultEntry, ScoreLedger, StageGate,
};
use crate::error::{BracketError, BracketResult};
use crate::prediction::{MatchResult, Prediction, UserId, result_loser};

fn poisoned(what: &str) -> anyhow::Error {
    anyhow!("{what} lock poisoned")
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<(UserId, NodeId), Prediction>>,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PredictionStore for MemoryStore {
    fn load(&self, user: UserId, node: NodeId) -> Result<Option<Prediction>> {
        let rows = self.rows.read().map_err(|_| poisoned("prediction store"))?;
        Ok(rows.get(&(user, node)).cloned())
    }

    fn save(&self, prediction: &Prediction) -> Result<()> {
        let mut rows = self.rows.write().map_err(|_| poisoned("prediction store"))?;
        rows.insert((prediction.user, prediction.node), prediction.clone());
        Ok(())
    }

    fn load_user(&self, user: UserId) -> Result<Vec<Prediction>> {
        let rows = self.rows.read().map_err(|_| poisoned("prediction store"))?;
        Ok(rows
            .range((user, NodeId(0))..=(user, NodeId(u16::MAX)))
            .map(|(_, p)| p.clone())
            .collect())
    }

    fn users_at(&self, node: NodeId) -> Result<Vec<UserId>> {
        let rows = self.rows.read().map_err(|_| poisoned("prediction store"))?;
        Ok(rows
            .keys()
            .filter(|(_, n)| *n == node)
            .map(|(user, _)| *user)
            .collect())
    }

    fn delete_user(&self, user: UserId) -> Result<()> {
        let mut rows = self.rows.write().map_err(|_| poisoned("prediction store"))?;
        rows.retain(|(u, _), _| *u != user);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ResultBook {
    results: RwLock<HashMap<NodeId, MatchResult>>,
}

impl ResultBook {
    /// Records a decided fixture. Re-recording the same outcome is a no-op;
    /// a different winner is refused.
    pub fn record(&self, node: NodeId, slot1: &str, slot2: &str, winner: &str) -> BracketResult<()> {
        result_loser(slot1, slot2, winner)?;
        let mut results = self.results.write().map_err(|_| poisoned("result book"))?;
        if let Some(existing) = results.get(&node).and_then(|r| r.winner.clone()) {
            if existing == winner {
                return Ok(());
            }
            return Err(BracketError::ResultConflict {
                node,
                existing,
                attempted: winner.to_string(),
            });
        }
        results.insert(node, MatchResult::decided(slot1, slot2, winner));
        Ok(())
    }

    /// Fixes a fixture's contestants before it is played.
    pub fn set_teams(&self, node: NodeId, slot1: &str, slot2: &str) -> BracketResult<()> {
        let mut results = self.results.write().map_err(|_| poisoned("result book"))?;
        let entry = results.entry(node).or_default();
        if entry.is_decided() {
            return Ok(());
        }
        entry.slot1 = Some(slot1.to_string());
        entry.slot2 = Some(slot2.to_string());
        Ok(())
    }
}

impl MatchResults for ResultBook {
    fn result(&self, node: NodeId) -> Result<MatchResult> {
        let results = self.results.read().map_err(|_| poisoned("result book"))?;
        Ok(results.get(&node).cloned().unwrap_or_default())
    }
}

impl ResultEntry for ResultBook {
    fn enter_result(&self, node: NodeId, slot1: &str, slot2: &str, winner: &str) -> BracketResult<()> {
        self.record(node, slot1, slot2, winner)
    }
}

#[derive(Debug, Default)]
pub struct EliminationSet {
    teams: RwLock<HashSet<String>>,
}

impl EliminationTracker for EliminationSet {
    fn is_eliminated(&self, team: &str) -> Result<bool> {
        let teams = self.teams.read().map_err(|_| poisoned("elimination set"))?;
        Ok(teams.contains(team))
    }

    fn set_eliminated(&self, team: &str, eliminated: bool) -> Result<()> {
        let mut teams = self.teams.write().map_err(|_| poisoned("elimination set"))?;
        if eliminated {
            teams.insert(team.to_string());
        } else {
            teams.remove(team);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    totals: RwLock<HashMap<UserId, u32>>,
}

impl MemoryLedger {
    /// Totals sorted best first, ties by user id.
    pub fn leaderboard(&self) -> Vec<(UserId, u32)> {
        let Ok(totals) = self.totals.read() else {
            return Vec::new();
        };
        let mut rows: Vec<(UserId, u32)> = totals.iter().map(|(u, t)| (*u, *t)).collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        rows
    }
}

impl ScoreLedger for MemoryLedger {
    fn knockout_score(&self, user: UserId) -> Result<u32> {
        let totals = self.totals.read().map_err(|_| poisoned("score ledger"))?;
        Ok(totals.get(&user).copied().unwrap_or(0))
    }

    fn set_user_knockout_score(&self, user: UserId, total: u32) -> Result<()> {
        let mut totals = self.totals.write().map_err(|_| poisoned("score ledger"))?;
        totals.insert(user, total);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FixedGate(AtomicBool);

impl FixedGate {
    pub fn new(enforced: bool) -> Self {
        Self(AtomicBool::new(enforced))
    }

    pub fn set(&self, enforced: bool) {
        self.0.store(enforced, Ordering::SeqCst);
    }
}

impl StageGate for FixedGate {
    fn is_reachability_enforced(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStandings {
    places: RwLock<HashMap<(UserId, char, u8), String>>,
}

impl MemoryStandings {
    /// Stores a pick and returns the team it replaced.
    pub fn set_place(&self, user: UserId, group: char, position: u8, team: &str) -> Option<String> {
        let mut places = self.places.write().ok()?;
        places.insert((user, group.to_ascii_uppercase(), position), team.to_string())
    }
}

impl GroupStandingsProvider for MemoryStandings {
    fn get_place(&self, user: UserId, group: char, position: u8) -> Result<Option<String>> {
        let places = self.places.read().map_err(|_| poisoned("standings"))?;
        Ok(places
            .get(&(user, group.to_ascii_uppercase(), position))
            .cloned())
    }
}

/// All in-memory collaborators, kept as concrete handles so callers can seed
/// and inspect them directly.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    pub predictions: Arc<MemoryStore>,
    pub results: Arc<ResultBook>,
    pub eliminations: Arc<EliminationSet>,
    pub gate: Arc<FixedGate>,
    pub ledger: Arc<MemoryLedger>,
    pub standings: Arc<MemoryStandings>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            predictions: self.predictions.clone(),
            results: self.results.clone(),
            eliminations: self.eliminations.clone(),
            gate: self.gate.clone(),
            ledger: self.ledger.clone(),
            standings: self.standings.clone(),
        }
    }
}
