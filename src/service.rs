//! Entry points used by the surrounding app. Every user mutation runs under
//! that user's lock; result recording runs under the fixture's lock and then
//! takes each affected user's lock in turn.

use std::sync::Arc;

use crate::bracket::{BracketGraph, NodeId, Slot};
use crate::collaborators::{
    Collaborators, GroupStandingsProvider, MatchResults, PredictionStore, ScoreLedger, StageGate,
};
use crate::config::EngineConfig;
use crate::draft::DraftProjector;
use crate::error::{BracketError, BracketResult};
use crate::locks::UserLocks;
use crate::prediction::{DraftPrediction, Prediction, UserId, result_loser};
use crate::propagation::PropagationEngine;
use crate::reconcile::{ReconcileSummary, ResultReconciler};
use crate::scoring::PointsTable;
use crate::third_place::{ThirdPlaceResolver, ThirdPlaceTable};

pub struct BracketService {
    graph: Arc<BracketGraph>,
    table: Arc<ThirdPlaceTable>,
    points: PointsTable,
    collab: Collaborators,
    locks: UserLocks,
}

impl BracketService {
    pub fn new(
        graph: Arc<BracketGraph>,
        table: Arc<ThirdPlaceTable>,
        points: PointsTable,
        collab: Collaborators,
    ) -> Self {
        Self {
            graph,
            table,
            points,
            collab,
            locks: UserLocks::new(),
        }
    }

    pub fn from_config(config: &EngineConfig, collab: Collaborators) -> BracketResult<Self> {
        let graph = config.load_graph()?;
        let table = config.load_third_place_table()?;
        Ok(Self::new(
            Arc::new(graph),
            Arc::new(table),
            config.points,
            collab,
        ))
    }

    pub fn graph(&self) -> &BracketGraph {
        &self.graph
    }

    pub fn third_place_table(&self) -> &ThirdPlaceTable {
        &self.table
    }

    pub fn points(&self) -> &PointsTable {
        &self.points
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collab
    }

    fn engine(&self) -> PropagationEngine<'_> {
        PropagationEngine::new(&self.graph, &self.collab)
    }

    fn enforce(&self) -> bool {
        self.collab.gate.is_reachability_enforced()
    }

    /// Creates the user's rows and fills group slots from their standings.
    pub fn seed_user(&self, user: UserId) -> BracketResult<usize> {
        let enforce = self.enforce();
        self.locks.with_user(user, || {
            let standings = self.collab.standings.as_ref();
            self.engine().seed_user(
                user,
                |group, position| Ok(standings.get_place(user, group, position)?),
                enforce,
            )
        })
    }

    /// Full account reset: drops every prediction and zeroes the total.
    pub fn reset_user(&self, user: UserId) -> BracketResult<()> {
        self.locks.with_user(user, || {
            self.collab.predictions.delete_user(user)?;
            self.collab.ledger.set_user_knockout_score(user, 0)?;
            Ok(())
        })
    }

    pub fn set_winner(&self, user: UserId, node: NodeId, team: Option<&str>) -> BracketResult<()> {
        let enforce = self.enforce();
        self.locks
            .with_user(user, || self.engine().set_winner(user, node, team, enforce))
    }

    /// `slot` is the 1-based selector the app sends.
    pub fn set_slot(
        &self,
        user: UserId,
        node: NodeId,
        slot: u8,
        team: Option<&str>,
    ) -> BracketResult<()> {
        let slot = Slot::from_index(slot)?;
        let enforce = self.enforce();
        self.locks
            .with_user(user, || self.engine().set_slot(user, node, slot, team, enforce))
    }

    /// Reconciles every user's prediction at a decided fixture. The result
    /// itself must already be entered; replays of the same result are safe.
    pub fn record_result(
        &self,
        node: NodeId,
        slot1: &str,
        slot2: &str,
        winner: &str,
    ) -> BracketResult<ReconcileSummary> {
        if !self.graph.contains(node) {
            return Err(BracketError::invalid(format!("unknown fixture {node}")));
        }
        let loser = result_loser(slot1, slot2, winner)?;

        self.locks.with_node(node, || {
            let existing = self.collab.results.result(node)?;
            if let Some(existing) = existing.winner
                && existing != winner
            {
                return Err(BracketError::ResultConflict {
                    node,
                    existing,
                    attempted: winner.to_string(),
                });
            }
            ResultReconciler::new(&self.graph, &self.collab, &self.points).record_result(
                node,
                winner,
                loser,
                &self.locks,
            )
        })
    }

    pub fn on_group_place_changed(
        &self,
        user: UserId,
        group: char,
        position: u8,
        old: Option<&str>,
        new: Option<&str>,
    ) -> BracketResult<Vec<(NodeId, Slot)>> {
        let enforce = self.enforce();
        self.locks.with_user(user, || {
            self.engine()
                .on_group_place_changed(user, group, position, old, new, enforce)
        })
    }

    pub fn on_third_place_qualifiers_changed(
        &self,
        user: UserId,
        teams: &[String],
    ) -> BracketResult<Vec<(NodeId, Slot)>> {
        let enforce = self.enforce();
        self.locks.with_user(user, || {
            let engine = self.engine();
            ThirdPlaceResolver::new(
                &self.graph,
                &self.table,
                self.collab.standings.as_ref(),
                &engine,
            )
            .on_qualifiers_changed(user, teams, enforce)
        })
    }

    /// Re-resolves every row of the user, e.g. after the stage gate flips.
    pub fn refresh_statuses(&self, user: UserId) -> BracketResult<usize> {
        let enforce = self.enforce();
        self.locks
            .with_user(user, || self.engine().refresh_user(user, enforce))
    }

    pub fn prediction(&self, user: UserId, node: NodeId) -> BracketResult<Option<Prediction>> {
        Ok(self.collab.predictions.load(user, node)?)
    }

    pub fn knockout_score(&self, user: UserId) -> BracketResult<u32> {
        Ok(self.collab.ledger.knockout_score(user)?)
    }

    pub fn draft(&self, user: UserId, node: NodeId) -> BracketResult<Option<DraftPrediction>> {
        DraftProjector::new(self.collab.results.as_ref()).draft_at(
            self.collab.predictions.as_ref(),
            user,
            node,
        )
    }

    pub fn bracket_draft(&self, user: UserId) -> BracketResult<Vec<DraftPrediction>> {
        DraftProjector::new(self.collab.results.as_ref()).build_bracket_draft(
            &self.graph,
            self.collab.predictions.as_ref(),
            user,
        )
    }
}
