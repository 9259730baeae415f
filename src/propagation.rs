//! Forward winner propagation and backward cascade invalidation.
//!
//! Every public call is idempotent: re-applying the same arguments rewrites
//! the same rows and stops cascading as soon as nothing downstream changes.
//! Callers must serialize calls per user (see `service::BracketService`).

use tracing::{debug, warn};

use crate::bracket::{BracketGraph, DerivationSource, GROUP_LETTERS, NodeId, Slot};
use crate::collaborators::{Collaborators, EliminationTracker, MatchResults, PredictionStore};
use crate::error::{BracketError, BracketResult};
use crate::prediction::{Prediction, PredictionStatus, UserId, normalize_team};
use crate::reachability::ReachabilityChecker;

pub struct PropagationEngine<'a> {
    graph: &'a BracketGraph,
    store: &'a dyn PredictionStore,
    results: &'a dyn MatchResults,
    eliminations: &'a dyn EliminationTracker,
}

impl<'a> PropagationEngine<'a> {
    pub fn new(graph: &'a BracketGraph, collab: &'a Collaborators) -> Self {
        Self {
            graph,
            store: collab.predictions.as_ref(),
            results: collab.results.as_ref(),
            eliminations: collab.eliminations.as_ref(),
        }
    }

    pub fn load(&self, user: UserId, node: NodeId) -> BracketResult<Option<Prediction>> {
        Ok(self.store.load(user, node)?)
    }

    /// Records `team` as the user's winner at `node` (or clears it) and pushes
    /// it into the fixture it feeds.
    pub fn set_winner(
        &self,
        user: UserId,
        node: NodeId,
        team: Option<&str>,
        enforce: bool,
    ) -> BracketResult<()> {
        self.require_node(node)?;
        let team = normalize_team(team);
        if let Some(team) = team.as_deref() {
            match self.store.load(user, node)? {
                Some(p) if p.slot_of(team).is_none() => {
                    return Err(BracketError::invalid(format!(
                        "{team} is not playing in {node} for user {user}"
                    )));
                }
                None => {
                    warn!(user, %node, "no prediction row; ignoring winner pick");
                    return Ok(());
                }
                Some(_) => {}
            }
        }
        self.apply_winner(user, node, team, enforce)
    }

    /// Writes one slot of `node` and clears the winner if it no longer plays
    /// there.
    pub fn set_slot(
        &self,
        user: UserId,
        node: NodeId,
        slot: Slot,
        team: Option<&str>,
        enforce: bool,
    ) -> BracketResult<()> {
        self.require_node(node)?;
        self.apply_slot(user, node, slot, normalize_team(team), enforce)
    }

    fn apply_winner(
        &self,
        user: UserId,
        node: NodeId,
        team: Option<String>,
        enforce: bool,
    ) -> BracketResult<()> {
        let Some(mut prediction) = self.store.load(user, node)? else {
            warn!(user, %node, "no prediction row; nothing to update");
            return Ok(());
        };

        prediction.winner = team.clone();
        self.refresh(&mut prediction, enforce)?;
        self.store.save(&prediction)?;
        debug!(user, %node, winner = ?team, status = %prediction.status, "winner set");

        if let Some((next, next_slot)) = self.graph.next(node) {
            self.apply_slot(user, next, next_slot, team, enforce)?;
        }
        if let Some((loser_node, loser_slot)) = self.graph.loser_next(node) {
            let loser = prediction.predicted_loser().map(str::to_string);
            self.apply_slot(user, loser_node, loser_slot, loser, enforce)?;
        }
        Ok(())
    }

    fn apply_slot(
        &self,
        user: UserId,
        node: NodeId,
        slot: Slot,
        team: Option<String>,
        enforce: bool,
    ) -> BracketResult<()> {
        let mut prediction = match self.store.load(user, node)? {
            Some(p) => p,
            None if team.is_none() => return Ok(()),
            None => {
                debug!(user, %node, "creating prediction row on first propagation");
                Prediction::new(user, node)
            }
        };

        prediction.set_slot_team(slot, team);
        self.refresh(&mut prediction, enforce)?;
        self.store.save(&prediction)?;

        let Some(winner) = prediction.winner.as_deref() else {
            return Ok(());
        };
        if prediction.slot_of(winner).is_none() {
            debug!(user, %node, winner, "winner no longer in either slot; clearing");
            return self.apply_winner(user, node, None, enforce);
        }
        // A new opponent changes who drops into the loser's fixture.
        if let Some((loser_node, loser_slot)) = self.graph.loser_next(node) {
            let loser = prediction.predicted_loser().map(str::to_string);
            self.apply_slot(user, loser_node, loser_slot, loser, enforce)?;
        }
        Ok(())
    }

    /// Recomputes slot validity and, unless the row is already reconciled,
    /// its pre-result status.
    pub fn refresh(&self, prediction: &mut Prediction, enforce: bool) -> BracketResult<()> {
        let checker = ReachabilityChecker::new(self.graph, self.results);
        for slot in Slot::BOTH {
            let valid = match prediction.slot_team(slot) {
                None => false,
                Some(team) => {
                    !self.eliminations.is_eliminated(team)?
                        && !checker.lost_before(prediction.node, team)?
                        && (!enforce || checker.can_occupy(prediction.node, team)?)
                }
            };
            prediction.set_slot_valid(slot, valid);
        }
        if !prediction.status.is_post_result() {
            prediction.status = self.resolve_status(prediction, enforce)?;
        }
        Ok(())
    }

    pub fn resolve_status(
        &self,
        prediction: &Prediction,
        enforce: bool,
    ) -> BracketResult<PredictionStatus> {
        let Some(winner) = prediction.winner.as_deref() else {
            return Ok(PredictionStatus::Invalid);
        };
        if self.eliminations.is_eliminated(winner)? {
            return Ok(PredictionStatus::Invalid);
        }
        // Semi-final losers are not eliminated but cannot reach the final.
        let checker = ReachabilityChecker::new(self.graph, self.results);
        if checker.lost_before(prediction.node, winner)? {
            return Ok(PredictionStatus::Invalid);
        }
        if enforce && !checker.can_occupy(prediction.node, winner)? {
            return Ok(PredictionStatus::Unreachable);
        }
        Ok(PredictionStatus::Valid)
    }

    /// Re-runs status resolution over every row of a user, e.g. after the
    /// stage gate flips.
    pub fn refresh_user(&self, user: UserId, enforce: bool) -> BracketResult<usize> {
        let mut changed = 0usize;
        for mut prediction in self.store.load_user(user)? {
            let before = prediction.clone();
            self.refresh(&mut prediction, enforce)?;
            if prediction != before {
                self.store.save(&prediction)?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Pushes a changed group placing into every round-of-32 slot it feeds.
    /// A new third-placed team also replaces `old` wherever it currently sits
    /// in a third-place slot.
    pub fn on_group_place_changed(
        &self,
        user: UserId,
        group: char,
        position: u8,
        old: Option<&str>,
        new: Option<&str>,
        enforce: bool,
    ) -> BracketResult<Vec<(NodeId, Slot)>> {
        let group = group.to_ascii_uppercase();
        if !GROUP_LETTERS.contains(&group) || !(1..=4).contains(&position) {
            return Err(BracketError::invalid(format!(
                "no group placing {position}{group}"
            )));
        }
        let old = normalize_team(old);
        let new = normalize_team(new);

        let mut touched = self.graph.group_position_slots(group, position);
        if position == 3
            && let Some(old) = old.as_deref()
        {
            for (node, slot, _) in self.graph.third_place_slots() {
                let current = self.store.load(user, node)?;
                if current.as_ref().and_then(|p| p.slot_team(slot)) == Some(old) {
                    touched.push((node, slot));
                }
            }
        }

        for (node, slot) in &touched {
            self.apply_slot(user, *node, *slot, new.clone(), enforce)?;
        }
        Ok(touched)
    }

    /// Creates missing rows for every fixture and fills round-of-32 group
    /// slots from `place`. Existing rows are left untouched.
    pub fn seed_user(
        &self,
        user: UserId,
        place: impl Fn(char, u8) -> BracketResult<Option<String>>,
        enforce: bool,
    ) -> BracketResult<usize> {
        let mut created = 0usize;
        for node in self.graph.nodes() {
            if self.store.load(user, node.id)?.is_some() {
                continue;
            }
            let mut prediction = Prediction::new(user, node.id);
            self.refresh(&mut prediction, enforce)?;
            self.store.save(&prediction)?;
            created += 1;

            for slot in Slot::BOTH {
                if let DerivationSource::GroupPosition { group, position } = node.source(slot) {
                    let team = place(*group, *position)?;
                    self.apply_slot(user, node.id, slot, team, enforce)?;
                }
            }
        }
        Ok(created)
    }

    fn require_node(&self, node: NodeId) -> BracketResult<()> {
        if self.graph.contains(node) {
            Ok(())
        } else {
            Err(BracketError::invalid(format!("unknown fixture {node}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn setup() -> (BracketGraph, MemoryBackend, Collaborators) {
        let graph = BracketGraph::world_cup_2026().unwrap();
        let backend = MemoryBackend::new();
        let collab = backend.collaborators();
        (graph, backend, collab)
    }

    fn seed_pair(engine: &PropagationEngine<'_>, user: UserId, node: NodeId, a: &str, b: &str) {
        engine.store.save(&Prediction::new(user, node)).unwrap();
        engine.set_slot(user, node, Slot::One, Some(a), false).unwrap();
        engine.set_slot(user, node, Slot::Two, Some(b), false).unwrap();
    }

    #[test]
    fn winner_outside_slots_is_rejected_without_writing() {
        let (graph, _backend, collab) = setup();
        let engine = PropagationEngine::new(&graph, &collab);
        seed_pair(&engine, 1, NodeId(73), "NED", "JPN");
        let before = engine.load(1, NodeId(73)).unwrap();

        let err = engine.set_winner(1, NodeId(73), Some("USA"), false).unwrap_err();
        assert!(matches!(err, BracketError::InvalidInput(_)));
        assert_eq!(engine.load(1, NodeId(73)).unwrap(), before);
        assert!(engine.load(1, NodeId(90)).unwrap().is_none());
    }

    #[test]
    fn winner_creates_downstream_row_lazily() {
        let (graph, _backend, collab) = setup();
        let engine = PropagationEngine::new(&graph, &collab);
        seed_pair(&engine, 1, NodeId(73), "NED", "JPN");

        engine.set_winner(1, NodeId(73), Some("JPN"), false).unwrap();
        let next = engine.load(1, NodeId(90)).unwrap().expect("row created");
        assert_eq!(next.slot1.as_deref(), Some("JPN"));
        assert!(next.slot1_valid);
        assert_eq!(next.status, PredictionStatus::Invalid);
        assert_eq!(
            engine.load(1, NodeId(73)).unwrap().unwrap().status,
            PredictionStatus::Valid
        );
    }

    #[test]
    fn eliminated_winner_resolves_invalid() {
        let (graph, backend, collab) = setup();
        let engine = PropagationEngine::new(&graph, &collab);
        seed_pair(&engine, 1, NodeId(73), "NED", "JPN");
        backend.eliminations.set_eliminated("JPN", true).unwrap();

        engine.set_winner(1, NodeId(73), Some("JPN"), false).unwrap();
        let p = engine.load(1, NodeId(73)).unwrap().unwrap();
        assert_eq!(p.status, PredictionStatus::Invalid);
        assert!(!p.slot2_valid);
        assert!(p.slot1_valid);
    }

    #[test]
    fn sentinel_winner_clears_the_pick() {
        let (graph, _backend, collab) = setup();
        let engine = PropagationEngine::new(&graph, &collab);
        seed_pair(&engine, 1, NodeId(73), "NED", "JPN");
        engine.set_winner(1, NodeId(73), Some("NED"), false).unwrap();
        engine.set_winner(1, NodeId(73), Some("None"), false).unwrap();

        let p = engine.load(1, NodeId(73)).unwrap().unwrap();
        assert_eq!(p.winner, None);
        assert_eq!(p.status, PredictionStatus::Invalid);
        assert_eq!(engine.load(1, NodeId(90)).unwrap().unwrap().slot1, None);
    }

    #[test]
    fn semi_final_loser_drops_into_third_place_match() {
        let (graph, _backend, collab) = setup();
        let engine = PropagationEngine::new(&graph, &collab);
        seed_pair(&engine, 4, NodeId(101), "ARG", "FRA");

        engine.set_winner(4, NodeId(101), Some("ARG"), false).unwrap();
        let third = engine.load(4, NodeId(103)).unwrap().unwrap();
        assert_eq!(third.slot1.as_deref(), Some("FRA"));

        engine.set_slot(4, NodeId(101), Slot::Two, Some("CRO"), false).unwrap();
        let third = engine.load(4, NodeId(103)).unwrap().unwrap();
        assert_eq!(third.slot1.as_deref(), Some("CRO"));

        engine.set_winner(4, NodeId(101), None, false).unwrap();
        let third = engine.load(4, NodeId(103)).unwrap().unwrap();
        assert_eq!(third.slot1, None);
    }
}
