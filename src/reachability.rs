use std::collections::HashSet;

use anyhow::Result;

use crate::bracket::{NodeId, SlotSources};
use crate::collaborators::MatchResults;

/// Answers whether a team can still legitimately occupy a fixture.
pub struct ReachabilityChecker<'a> {
    graph: &'a dyn SlotSources,
    results: &'a dyn MatchResults,
}

impl<'a> ReachabilityChecker<'a> {
    pub fn new(graph: &'a dyn SlotSources, results: &'a dyn MatchResults) -> Self {
        Self { graph, results }
    }

    pub fn can_occupy(&self, node: NodeId, team: &str) -> Result<bool> {
        self.can_occupy_from(node, team, &HashSet::new())
    }

    fn can_occupy_from(&self, node: NodeId, team: &str, visited: &HashSet<NodeId>) -> Result<bool> {
        if visited.contains(&node) {
            return Ok(false);
        }

        // Known contestants are ground truth.
        let result = self.results.result(node)?;
        if result.is_decided() || result.teams_known() {
            return Ok(result.involves(team));
        }

        let (Some(stage), Some((source1, source2))) =
            (self.graph.stage_of(node), self.graph.sources_of(node))
        else {
            return Ok(false);
        };

        let upstream: Vec<NodeId> = [source1, source2]
            .iter()
            .filter_map(|source| source.upstream())
            .collect();

        // Group and third-place picks are trusted as given.
        if upstream.is_empty() {
            return Ok(stage.is_leaf());
        }

        for up in upstream {
            let mut branch = visited.clone();
            branch.insert(node);
            if self.can_occupy_from(up, team, &branch)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether `team` already lost a decided fixture whose winner feeds
    /// `node`, directly or through undecided fixtures in between.
    pub fn lost_before(&self, node: NodeId, team: &str) -> Result<bool> {
        self.lost_before_from(node, team, &mut HashSet::new())
    }

    fn lost_before_from(
        &self,
        node: NodeId,
        team: &str,
        visited: &mut HashSet<NodeId>,
    ) -> Result<bool> {
        if !visited.insert(node) {
            return Ok(false);
        }
        let Some((source1, source2)) = self.graph.sources_of(node) else {
            return Ok(false);
        };
        for up in [source1, source2].iter().filter_map(|s| s.winner_of()) {
            let result = self.results.result(up)?;
            if result.is_decided() {
                if result.involves(team) && result.winner.as_deref() != Some(team) {
                    return Ok(true);
                }
                continue;
            }
            if self.lost_before_from(up, team, visited)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
