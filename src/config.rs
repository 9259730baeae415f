use std::env;
use std::fs;
use std::path::PathBuf;

use crate::bracket::BracketGraph;
use crate::error::{BracketError, BracketResult};
use crate::scoring::PointsTable;
use crate::third_place::ThirdPlaceTable;

const CACHE_DIR: &str = "wc26_bracket";
const DB_FILE: &str = "bracket.sqlite";
const MAX_STAGE_POINTS: u32 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub points: PointsTable,
    pub fixtures_path: Option<PathBuf>,
    pub third_place_table_path: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub reachability_enforced: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            points: PointsTable::default(),
            fixtures_path: None,
            third_place_table_path: None,
            db_path: default_db_path(),
            reachability_enforced: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = PointsTable::default();
        let points = PointsTable {
            round32: env_u32_or("BRACKET_POINTS_ROUND32", defaults.round32, MAX_STAGE_POINTS),
            round16: env_u32_or("BRACKET_POINTS_ROUND16", defaults.round16, MAX_STAGE_POINTS),
            quarter: env_u32_or("BRACKET_POINTS_QUARTER", defaults.quarter, MAX_STAGE_POINTS),
            semi: env_u32_or("BRACKET_POINTS_SEMI", defaults.semi, MAX_STAGE_POINTS),
            third_place: env_u32_or(
                "BRACKET_POINTS_THIRD_PLACE",
                defaults.third_place,
                MAX_STAGE_POINTS,
            ),
            final_: env_u32_or("BRACKET_POINTS_FINAL", defaults.final_, MAX_STAGE_POINTS),
            partial_credit_pct: env_u32_or(
                "BRACKET_PARTIAL_CREDIT_PCT",
                defaults.partial_credit_pct,
                100,
            ),
        };

        Self {
            points,
            fixtures_path: opt_env("BRACKET_FIXTURES_PATH").map(PathBuf::from),
            third_place_table_path: opt_env("BRACKET_THIRD_PLACE_TABLE_PATH").map(PathBuf::from),
            db_path: opt_env("BRACKET_DB_PATH")
                .map(PathBuf::from)
                .or_else(default_db_path),
            reachability_enforced: env_flag("BRACKET_REACHABILITY_ENFORCED", false),
        }
    }

    /// Fixture graph from `BRACKET_FIXTURES_PATH`, or the built-in 2026 bracket.
    pub fn load_graph(&self) -> BracketResult<BracketGraph> {
        match &self.fixtures_path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|e| {
                    BracketError::config(format!("read fixtures {}: {e}", path.display()))
                })?;
                BracketGraph::from_json(&raw)
            }
            None => BracketGraph::world_cup_2026(),
        }
    }

    pub fn load_third_place_table(&self) -> BracketResult<ThirdPlaceTable> {
        match &self.third_place_table_path {
            Some(path) => {
                let raw = fs::read_to_string(path).map_err(|e| {
                    BracketError::config(format!("read third-place table {}: {e}", path.display()))
                })?;
                ThirdPlaceTable::from_json(&raw)
            }
            None => Ok(ThirdPlaceTable::derived_2026()?.clone()),
        }
    }
}

pub fn default_db_path() -> Option<PathBuf> {
    if let Ok(base) = env::var("XDG_CACHE_HOME") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(CACHE_DIR).join(DB_FILE));
        }
    }
    let home = env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(CACHE_DIR).join(DB_FILE))
}

fn opt_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

fn env_u32_or(key: &str, default: u32, max: u32) -> u32 {
    opt_env(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
        .min(max)
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| {
            let t = v.trim().to_ascii_lowercase();
            !(t.is_empty() || t == "0" || t == "false" || t == "off" || t == "no")
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::third_place::TableSource;

    #[test]
    fn defaults_use_builtin_bracket_and_table() {
        let config = EngineConfig {
            db_path: None,
            ..EngineConfig::default()
        };
        assert_eq!(config.load_graph().unwrap().len(), 32);
        let table = config.load_third_place_table().unwrap();
        assert_eq!(table.len(), 495);
        assert_eq!(table.source(), TableSource::Derived);
        assert_eq!(config.points, PointsTable::default());
    }

    #[test]
    fn missing_fixture_file_is_a_config_error() {
        let config = EngineConfig {
            fixtures_path: Some(PathBuf::from("/nonexistent/wc26_fixtures.json")),
            ..EngineConfig::default()
        };
        assert!(matches!(config.load_graph(), Err(BracketError::Config(_))));
    }
}
