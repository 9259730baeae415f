use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BracketError, BracketResult};

pub const GROUP_LETTERS: [char; 12] = ['A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L'];
pub const THIRD_PLACE_SLOTS: u8 = 8;

/// Knockout stages, ordered from the first knockout round to the final.
/// `ThirdPlace` never feeds another fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Round32,
    Round16,
    Quarter,
    Semi,
    ThirdPlace,
    Final,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Round32,
        Stage::Round16,
        Stage::Quarter,
        Stage::Semi,
        Stage::ThirdPlace,
        Stage::Final,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stage::Round32 => "Round of 32",
            Stage::Round16 => "Round of 16",
            Stage::Quarter => "Quarter-final",
            Stage::Semi => "Semi-final",
            Stage::ThirdPlace => "Third place",
            Stage::Final => "Final",
        }
    }

    pub fn is_leaf(self) -> bool {
        self == Stage::Round32
    }

    pub fn advances(self) -> bool {
        self != Stage::ThirdPlace
    }
}

/// Fixture number, e.g. `M73`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u16);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = BracketError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix('M')
            .or_else(|| trimmed.strip_prefix('m'))
            .unwrap_or(trimmed);
        digits
            .parse::<u16>()
            .map(NodeId)
            .map_err(|_| BracketError::invalid(format!("not a fixture id: {raw:?}")))
    }
}

/// One of the two contestant positions of a fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    One,
    Two,
}

impl Slot {
    pub const BOTH: [Slot; 2] = [Slot::One, Slot::Two];

    pub fn from_index(index: u8) -> BracketResult<Self> {
        match index {
            1 => Ok(Slot::One),
            2 => Ok(Slot::Two),
            other => Err(BracketError::invalid(format!(
                "slot selector must be 1 or 2, got {other}"
            ))),
        }
    }

    pub fn index(self) -> u8 {
        match self {
            Slot::One => 1,
            Slot::Two => 2,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Slot::One => Slot::Two,
            Slot::Two => Slot::One,
        }
    }
}

/// Rule deciding who occupies a slot. Parsed once from the short derivation
/// strings used in fixture definitions (`1A`, `3rd_team_4`, `Winner_M73`,
/// `Loser_M101`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivationSource {
    GroupPosition { group: char, position: u8 },
    ThirdPlaceSlot(u8),
    WinnerOf(NodeId),
    LoserOf(NodeId),
}

impl DerivationSource {
    pub fn parse(raw: &str) -> BracketResult<Self> {
        let s = raw.trim();
        let lower = s.to_ascii_lowercase();

        if let Some(rest) = lower.strip_prefix("winner_") {
            return parse_upstream(rest, raw).map(DerivationSource::WinnerOf);
        }
        if let Some(rest) = lower.strip_prefix("loser_") {
            return parse_upstream(rest, raw).map(DerivationSource::LoserOf);
        }
        if let Some(rest) = lower.strip_prefix("3rd_team_") {
            let index = rest
                .parse::<u8>()
                .map_err(|_| BracketError::config(format!("bad third-place slot {raw:?}")))?;
            if !(1..=THIRD_PLACE_SLOTS).contains(&index) {
                return Err(BracketError::config(format!(
                    "third-place slot index out of range in {raw:?}"
                )));
            }
            return Ok(DerivationSource::ThirdPlaceSlot(index));
        }

        let mut chars = s.chars();
        if let (Some(pos), Some(group), None) = (chars.next(), chars.next(), chars.next()) {
            let group = group.to_ascii_uppercase();
            if let Some(position) = pos.to_digit(10)
                && (1..=4).contains(&position)
                && GROUP_LETTERS.contains(&group)
            {
                return Ok(DerivationSource::GroupPosition {
                    group,
                    position: position as u8,
                });
            }
        }

        Err(BracketError::config(format!(
            "unrecognised derivation source {raw:?}"
        )))
    }

    /// Fixture this slot is fed from, if any.
    pub fn upstream(&self) -> Option<NodeId> {
        match self {
            DerivationSource::WinnerOf(id) | DerivationSource::LoserOf(id) => Some(*id),
            _ => None,
        }
    }

    pub fn winner_of(&self) -> Option<NodeId> {
        match self {
            DerivationSource::WinnerOf(id) => Some(*id),
            _ => None,
        }
    }
}

fn parse_upstream(rest: &str, raw: &str) -> BracketResult<NodeId> {
    rest.parse::<NodeId>()
        .map_err(|_| BracketError::config(format!("bad fixture reference in {raw:?}")))
}

impl fmt::Display for DerivationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DerivationSource::GroupPosition { group, position } => write!(f, "{position}{group}"),
            DerivationSource::ThirdPlaceSlot(index) => write!(f, "3rd_team_{index}"),
            DerivationSource::WinnerOf(id) => write!(f, "Winner_{id}"),
            DerivationSource::LoserOf(id) => write!(f, "Loser_{id}"),
        }
    }
}

/// Raw fixture definition, as stored in config files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureDef {
    pub id: u16,
    pub stage: Stage,
    pub slot1: String,
    pub slot2: String,
}

#[derive(Debug, Clone)]
pub struct BracketNode {
    pub id: NodeId,
    pub stage: Stage,
    pub slot1_source: DerivationSource,
    pub slot2_source: DerivationSource,
    /// Fixture (and slot) the winner advances into; `None` only for the final
    /// and third-place fixtures.
    pub next: Option<(NodeId, Slot)>,
    /// Fixture the loser drops into (semi-finals feeding the third-place match).
    pub loser_next: Option<(NodeId, Slot)>,
}

impl BracketNode {
    pub fn source(&self, slot: Slot) -> &DerivationSource {
        match slot {
            Slot::One => &self.slot1_source,
            Slot::Two => &self.slot2_source,
        }
    }
}

/// Read-only view of a fixture graph used by reachability checks.
pub trait SlotSources {
    fn stage_of(&self, node: NodeId) -> Option<Stage>;
    fn sources_of(&self, node: NodeId) -> Option<(DerivationSource, DerivationSource)>;
}

/// Static fixture graph. Nodes live in an arena ordered by fixture number.
#[derive(Debug, Clone)]
pub struct BracketGraph {
    nodes: Vec<BracketNode>,
    index: HashMap<NodeId, usize>,
    final_node: NodeId,
}

impl BracketGraph {
    pub fn build(defs: &[FixtureDef]) -> BracketResult<Self> {
        if defs.is_empty() {
            return Err(BracketError::config("no fixtures defined"));
        }

        let mut nodes = Vec::with_capacity(defs.len());
        for def in defs {
            let slot1_source = DerivationSource::parse(&def.slot1)?;
            let slot2_source = DerivationSource::parse(&def.slot2)?;
            nodes.push(BracketNode {
                id: NodeId(def.id),
                stage: def.stage,
                slot1_source,
                slot2_source,
                next: None,
                loser_next: None,
            });
        }
        nodes.sort_by_key(|n| n.id);

        let mut index = HashMap::with_capacity(nodes.len());
        for (idx, node) in nodes.iter().enumerate() {
            if index.insert(node.id, idx).is_some() {
                return Err(BracketError::config(format!("duplicate fixture {}", node.id)));
            }
        }

        let mut third_place_seen = HashSet::new();
        let mut edges: Vec<(usize, bool, NodeId, Slot)> = Vec::new();
        for node in &nodes {
            for slot in Slot::BOTH {
                let source = *node.source(slot);
                match source {
                    DerivationSource::GroupPosition { .. } | DerivationSource::ThirdPlaceSlot(_)
                        if !node.stage.is_leaf() =>
                    {
                        return Err(BracketError::config(format!(
                            "{} ({}) takes {source} but only round-of-32 fixtures may",
                            node.id,
                            node.stage.label()
                        )));
                    }
                    DerivationSource::ThirdPlaceSlot(idx) if !third_place_seen.insert(idx) => {
                        return Err(BracketError::config(format!(
                            "third-place slot {idx} used twice"
                        )));
                    }
                    DerivationSource::WinnerOf(up) | DerivationSource::LoserOf(up) => {
                        let Some(&up_idx) = index.get(&up) else {
                            return Err(BracketError::config(format!(
                                "{} references unknown fixture {up}",
                                node.id
                            )));
                        };
                        if up == node.id {
                            return Err(BracketError::config(format!(
                                "{} feeds itself",
                                node.id
                            )));
                        }
                        let is_loser = matches!(source, DerivationSource::LoserOf(_));
                        edges.push((up_idx, is_loser, node.id, slot));
                    }
                    _ => {}
                }
            }
        }

        for (up_idx, is_loser, target, slot) in edges {
            let up = &mut nodes[up_idx];
            let up_id = up.id;
            let edge = if is_loser {
                &mut up.loser_next
            } else {
                &mut up.next
            };
            if let Some((existing, _)) = edge {
                return Err(BracketError::config(format!(
                    "{up_id} feeds both {existing} and {target}"
                )));
            }
            *edge = Some((target, slot));
        }

        let mut terminals = nodes
            .iter()
            .filter(|n| n.stage.advances() && n.next.is_none())
            .map(|n| n.id);
        let final_node = match (terminals.next(), terminals.next()) {
            (Some(id), None) => id,
            (None, _) => {
                return Err(BracketError::config(
                    "no terminal fixture; the bracket contains a cycle",
                ));
            }
            (Some(a), Some(b)) => {
                return Err(BracketError::config(format!(
                    "more than one terminal fixture ({a}, {b}); bracket is dangling"
                )));
            }
        };

        let graph = Self {
            nodes,
            index,
            final_node,
        };

        for node in &graph.nodes {
            if !node.stage.advances() {
                if node.next.is_some() {
                    return Err(BracketError::config(format!(
                        "third-place fixture {} must not advance",
                        node.id
                    )));
                }
                continue;
            }
            graph.check_reaches_final(node.id)?;
        }

        Ok(graph)
    }

    pub fn from_json(raw: &str) -> BracketResult<Self> {
        let defs: Vec<FixtureDef> = serde_json::from_str(raw)
            .map_err(|err| BracketError::config(format!("invalid fixture json: {err}")))?;
        Self::build(&defs)
    }

    pub fn world_cup_2026() -> BracketResult<Self> {
        Self::build(&world_cup_2026_fixtures())
    }

    fn check_reaches_final(&self, start: NodeId) -> BracketResult<()> {
        let mut current = start;
        for _ in 0..=self.nodes.len() {
            if current == self.final_node {
                return Ok(());
            }
            match self.next(current) {
                Some((next, _)) => current = next,
                None => {
                    return Err(BracketError::config(format!(
                        "{start} cannot reach the final {}",
                        self.final_node
                    )));
                }
            }
        }
        Err(BracketError::config(format!(
            "cycle detected following {start}"
        )))
    }

    pub fn node_by_id(&self, id: NodeId) -> Option<&BracketNode> {
        self.index.get(&id).map(|idx| &self.nodes[*idx])
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn next(&self, id: NodeId) -> Option<(NodeId, Slot)> {
        self.node_by_id(id).and_then(|n| n.next)
    }

    pub fn loser_next(&self, id: NodeId) -> Option<(NodeId, Slot)> {
        self.node_by_id(id).and_then(|n| n.loser_next)
    }

    pub fn sources(&self, id: NodeId) -> Option<(&DerivationSource, &DerivationSource)> {
        self.node_by_id(id)
            .map(|n| (&n.slot1_source, &n.slot2_source))
    }

    pub fn final_node(&self) -> NodeId {
        self.final_node
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &BracketNode> {
        self.nodes.iter()
    }

    pub fn nodes_in_stage(&self, stage: Stage) -> impl Iterator<Item = &BracketNode> {
        self.nodes.iter().filter(move |n| n.stage == stage)
    }

    /// Every `(node, slot, index)` fed by a third-place slot, ordered by index.
    pub fn third_place_slots(&self) -> Vec<(NodeId, Slot, u8)> {
        let mut out = Vec::new();
        for node in &self.nodes {
            for slot in Slot::BOTH {
                if let DerivationSource::ThirdPlaceSlot(idx) = node.source(slot) {
                    out.push((node.id, slot, *idx));
                }
            }
        }
        out.sort_by_key(|(_, _, idx)| *idx);
        out
    }

    pub fn group_position_slots(&self, group: char, position: u8) -> Vec<(NodeId, Slot)> {
        let group = group.to_ascii_uppercase();
        let mut out = Vec::new();
        for node in &self.nodes {
            for slot in Slot::BOTH {
                if *node.source(slot) == (DerivationSource::GroupPosition { group, position }) {
                    out.push((node.id, slot));
                }
            }
        }
        out
    }
}

impl SlotSources for BracketGraph {
    fn stage_of(&self, node: NodeId) -> Option<Stage> {
        self.node_by_id(node).map(|n| n.stage)
    }

    fn sources_of(&self, node: NodeId) -> Option<(DerivationSource, DerivationSource)> {
        self.node_by_id(node)
            .map(|n| (n.slot1_source, n.slot2_source))
    }
}

const WORLD_CUP_2026: &[(u16, Stage, &str, &str)] = &[
    (73, Stage::Round32, "2A", "2B"),
    (74, Stage::Round32, "1E", "3rd_team_1"),
    (75, Stage::Round32, "1F", "2C"),
    (76, Stage::Round32, "1C", "2F"),
    (77, Stage::Round32, "1I", "3rd_team_2"),
    (78, Stage::Round32, "2E", "2I"),
    (79, Stage::Round32, "1A", "3rd_team_3"),
    (80, Stage::Round32, "1L", "3rd_team_4"),
    (81, Stage::Round32, "1D", "3rd_team_5"),
    (82, Stage::Round32, "1G", "3rd_team_6"),
    (83, Stage::Round32, "2K", "2L"),
    (84, Stage::Round32, "1H", "2J"),
    (85, Stage::Round32, "1B", "3rd_team_7"),
    (86, Stage::Round32, "1J", "2H"),
    (87, Stage::Round32, "1K", "3rd_team_8"),
    (88, Stage::Round32, "2D", "2G"),
    (89, Stage::Round16, "Winner_M74", "Winner_M77"),
    (90, Stage::Round16, "Winner_M73", "Winner_M75"),
    (91, Stage::Round16, "Winner_M76", "Winner_M78"),
    (92, Stage::Round16, "Winner_M79", "Winner_M80"),
    (93, Stage::Round16, "Winner_M83", "Winner_M84"),
    (94, Stage::Round16, "Winner_M81", "Winner_M82"),
    (95, Stage::Round16, "Winner_M86", "Winner_M88"),
    (96, Stage::Round16, "Winner_M85", "Winner_M87"),
    (97, Stage::Quarter, "Winner_M89", "Winner_M90"),
    (98, Stage::Quarter, "Winner_M93", "Winner_M94"),
    (99, Stage::Quarter, "Winner_M91", "Winner_M92"),
    (100, Stage::Quarter, "Winner_M95", "Winner_M96"),
    (101, Stage::Semi, "Winner_M97", "Winner_M98"),
    (102, Stage::Semi, "Winner_M99", "Winner_M100"),
    (103, Stage::ThirdPlace, "Loser_M101", "Loser_M102"),
    (104, Stage::Final, "Winner_M101", "Winner_M102"),
];

/// Knockout fixtures of the 48-team 2026 format, M73 through M104.
pub fn world_cup_2026_fixtures() -> Vec<FixtureDef> {
    WORLD_CUP_2026
        .iter()
        .map(|(id, stage, slot1, slot2)| FixtureDef {
            id: *id,
            stage: *stage,
            slot1: slot1.to_string(),
            slot2: slot2.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(id: u16, stage: Stage, slot1: &str, slot2: &str) -> FixtureDef {
        FixtureDef {
            id,
            stage,
            slot1: slot1.to_string(),
            slot2: slot2.to_string(),
        }
    }

    #[test]
    fn parses_derivation_strings() {
        assert_eq!(
            DerivationSource::parse("1A").unwrap(),
            DerivationSource::GroupPosition {
                group: 'A',
                position: 1
            }
        );
        assert_eq!(
            DerivationSource::parse("3rd_team_4").unwrap(),
            DerivationSource::ThirdPlaceSlot(4)
        );
        assert_eq!(
            DerivationSource::parse("Winner_M73").unwrap(),
            DerivationSource::WinnerOf(NodeId(73))
        );
        assert_eq!(
            DerivationSource::parse("Loser_M101").unwrap(),
            DerivationSource::LoserOf(NodeId(101))
        );
        assert!(DerivationSource::parse("3rd_team_9").is_err());
        assert!(DerivationSource::parse("1M").is_err());
        assert!(DerivationSource::parse("Winner_Mx").is_err());
    }

    #[test]
    fn derivation_display_round_trips_through_parse() {
        for raw in ["2K", "3rd_team_7", "Winner_M99", "Loser_M102"] {
            let parsed = DerivationSource::parse(raw).unwrap();
            assert_eq!(parsed.to_string(), raw);
        }
    }

    #[test]
    fn world_cup_graph_has_expected_edges() {
        let graph = BracketGraph::world_cup_2026().expect("built-in bracket is valid");
        assert_eq!(graph.len(), 32);
        assert_eq!(graph.final_node(), NodeId(104));
        assert_eq!(graph.next(NodeId(74)), Some((NodeId(89), Slot::One)));
        assert_eq!(graph.next(NodeId(77)), Some((NodeId(89), Slot::Two)));
        assert_eq!(graph.next(NodeId(102)), Some((NodeId(104), Slot::Two)));
        assert_eq!(graph.loser_next(NodeId(101)), Some((NodeId(103), Slot::One)));
        assert_eq!(graph.next(NodeId(103)), None);
        assert_eq!(graph.next(NodeId(104)), None);
        assert_eq!(graph.third_place_slots().len(), 8);
        assert_eq!(graph.nodes_in_stage(Stage::Round32).count(), 16);
        assert_eq!(
            graph.group_position_slots('a', 1),
            vec![(NodeId(79), Slot::One)]
        );
    }

    #[test]
    fn rejects_cycles() {
        let defs = vec![
            def(1, Stage::Round32, "1A", "2B"),
            def(2, Stage::Round32, "1B", "2A"),
            def(3, Stage::Semi, "Winner_M1", "Winner_M4"),
            def(4, Stage::Semi, "Winner_M2", "Winner_M3"),
            def(5, Stage::Round32, "1C", "2C"),
        ];
        let err = BracketGraph::build(&defs).unwrap_err();
        assert!(matches!(err, BracketError::Config(_)));
        assert!(err.to_string().contains("cycle"), "{err}");
    }

    #[test]
    fn rejects_dangling_fixture() {
        let defs = vec![
            def(1, Stage::Round32, "1A", "2B"),
            def(2, Stage::Round32, "1B", "2A"),
            def(3, Stage::Round32, "1C", "2D"),
            def(4, Stage::Final, "Winner_M1", "Winner_M2"),
        ];
        let err = BracketGraph::build(&defs).unwrap_err();
        assert!(err.to_string().contains("dangling"), "{err}");
    }

    #[test]
    fn rejects_double_feed_and_unknown_reference() {
        let double = vec![
            def(1, Stage::Round32, "1A", "2B"),
            def(2, Stage::Semi, "Winner_M1", "Winner_M1"),
            def(3, Stage::Final, "Winner_M2", "Winner_M1"),
        ];
        assert!(BracketGraph::build(&double).is_err());

        let unknown = vec![
            def(1, Stage::Round32, "1A", "2B"),
            def(2, Stage::Final, "Winner_M1", "Winner_M9"),
        ];
        assert!(BracketGraph::build(&unknown).is_err());
    }

    #[test]
    fn slot_selector_is_validated() {
        assert_eq!(Slot::from_index(2).unwrap(), Slot::Two);
        assert!(matches!(
            Slot::from_index(3),
            Err(BracketError::InvalidInput(_))
        ));
    }
}
