//! rusqlite-backed collaborators: predictions, eliminations, knockout totals
//! and real results in one database file.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::bracket::NodeId;
use crate::collaborators::{
    EliminationTracker, MatchResults, PredictionStore, ResultEntry, ScoreLedger,
};
use crate::error::{BracketError, BracketResult};
use crate::prediction::{MatchResult, Prediction, PredictionStatus, UserId, result_loser};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite db {}", path.display()))?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite connection lock poisoned"))
    }

    /// Knockout totals, best first.
    pub fn leaderboard(&self) -> Result<Vec<(UserId, u32)>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT user_id, total FROM knockout_scores ORDER BY total DESC, user_id ASC")
            .context("prepare leaderboard query")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)? as UserId, row.get::<_, i64>(1)? as u32))
            })
            .context("query leaderboard")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("read leaderboard row")?);
        }
        Ok(out)
    }
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS predictions (
            user_id INTEGER NOT NULL,
            node_id INTEGER NOT NULL,
            slot1 TEXT NULL,
            slot2 TEXT NULL,
            winner TEXT NULL,
            slot1_valid INTEGER NOT NULL DEFAULT 0,
            slot2_valid INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            points INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (user_id, node_id)
        );
        CREATE INDEX IF NOT EXISTS idx_predictions_node ON predictions(node_id);

        CREATE TABLE IF NOT EXISTS eliminations (
            team TEXT PRIMARY KEY,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS knockout_scores (
            user_id INTEGER PRIMARY KEY,
            total INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS match_results (
            node_id INTEGER PRIMARY KEY,
            slot1 TEXT NOT NULL,
            slot2 TEXT NOT NULL,
            winner TEXT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .context("init sqlite schema")?;
    Ok(())
}

fn prediction_from_row(row: &Row<'_>) -> rusqlite::Result<(Prediction, String)> {
    let prediction = Prediction {
        user: row.get::<_, i64>(0)? as UserId,
        node: NodeId(row.get::<_, i64>(1)? as u16),
        slot1: row.get(2)?,
        slot2: row.get(3)?,
        winner: row.get(4)?,
        slot1_valid: row.get(5)?,
        slot2_valid: row.get(6)?,
        status: PredictionStatus::Invalid,
        points: row.get::<_, i64>(8)? as u32,
    };
    Ok((prediction, row.get(7)?))
}

fn with_status((mut prediction, status): (Prediction, String)) -> Result<Prediction> {
    prediction.status = status
        .parse()
        .map_err(|e: String| anyhow!("prediction {}/{}: {e}", prediction.user, prediction.node))?;
    Ok(prediction)
}

const PREDICTION_COLUMNS: &str =
    "user_id, node_id, slot1, slot2, winner, slot1_valid, slot2_valid, status, points";

impl PredictionStore for SqliteStore {
    fn load(&self, user: UserId, node: NodeId) -> Result<Option<Prediction>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {PREDICTION_COLUMNS} FROM predictions WHERE user_id = ?1 AND node_id = ?2"
                ),
                params![user as i64, node.0 as i64],
                prediction_from_row,
            )
            .optional()
            .context("query prediction")?;
        row.map(with_status).transpose()
    }

    fn save(&self, prediction: &Prediction) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO predictions (
                user_id, node_id, slot1, slot2, winner,
                slot1_valid, slot2_valid, status, points, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(user_id, node_id) DO UPDATE SET
                slot1 = excluded.slot1,
                slot2 = excluded.slot2,
                winner = excluded.winner,
                slot1_valid = excluded.slot1_valid,
                slot2_valid = excluded.slot2_valid,
                status = excluded.status,
                points = excluded.points,
                updated_at = excluded.updated_at
            "#,
            params![
                prediction.user as i64,
                prediction.node.0 as i64,
                prediction.slot1,
                prediction.slot2,
                prediction.winner,
                prediction.slot1_valid,
                prediction.slot2_valid,
                prediction.status.as_str(),
                prediction.points as i64,
                Utc::now().to_rfc3339(),
            ],
        )
        .with_context(|| format!("upsert prediction {}/{}", prediction.user, prediction.node))?;
        Ok(())
    }

    fn load_user(&self, user: UserId) -> Result<Vec<Prediction>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PREDICTION_COLUMNS} FROM predictions WHERE user_id = ?1 ORDER BY node_id"
            ))
            .context("prepare load user predictions")?;
        let rows = stmt
            .query_map(params![user as i64], prediction_from_row)
            .context("query user predictions")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(with_status(row.context("read prediction row")?)?);
        }
        Ok(out)
    }

    fn users_at(&self, node: NodeId) -> Result<Vec<UserId>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT user_id FROM predictions WHERE node_id = ?1 ORDER BY user_id")
            .context("prepare users at node")?;
        let rows = stmt
            .query_map(params![node.0 as i64], |row| row.get::<_, i64>(0))
            .context("query users at node")?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("read user id")? as UserId);
        }
        Ok(out)
    }

    fn delete_user(&self, user: UserId) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM predictions WHERE user_id = ?1",
            params![user as i64],
        )
        .with_context(|| format!("delete predictions of user {user}"))?;
        Ok(())
    }
}

impl EliminationTracker for SqliteStore {
    fn is_eliminated(&self, team: &str) -> Result<bool> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM eliminations WHERE team = ?1",
                params![team],
                |_| Ok(()),
            )
            .optional()
            .context("query elimination")?;
        Ok(found.is_some())
    }

    fn set_eliminated(&self, team: &str, eliminated: bool) -> Result<()> {
        let conn = self.lock()?;
        let updated = if eliminated {
            conn.execute(
                "INSERT INTO eliminations (team, updated_at) VALUES (?1, ?2)
                 ON CONFLICT(team) DO NOTHING",
                params![team, Utc::now().to_rfc3339()],
            )
        } else {
            conn.execute("DELETE FROM eliminations WHERE team = ?1", params![team])
        };
        updated.with_context(|| format!("update elimination of {team}"))?;
        Ok(())
    }
}

impl ScoreLedger for SqliteStore {
    fn knockout_score(&self, user: UserId) -> Result<u32> {
        let conn = self.lock()?;
        let total = conn
            .query_row(
                "SELECT total FROM knockout_scores WHERE user_id = ?1",
                params![user as i64],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .context("query knockout score")?;
        Ok(total.unwrap_or(0) as u32)
    }

    fn set_user_knockout_score(&self, user: UserId, total: u32) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO knockout_scores (user_id, total, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                total = excluded.total,
                updated_at = excluded.updated_at",
            params![user as i64, total as i64, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("set knockout score of user {user}"))?;
        Ok(())
    }
}

impl MatchResults for SqliteStore {
    fn result(&self, node: NodeId) -> Result<MatchResult> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT slot1, slot2, winner FROM match_results WHERE node_id = ?1",
                params![node.0 as i64],
                |row| {
                    Ok(MatchResult {
                        slot1: row.get(0)?,
                        slot2: row.get(1)?,
                        winner: row.get(2)?,
                    })
                },
            )
            .optional()
            .context("query match result")?;
        Ok(found.unwrap_or_default())
    }
}

impl ResultEntry for SqliteStore {
    fn enter_result(
        &self,
        node: NodeId,
        slot1: &str,
        slot2: &str,
        winner: &str,
    ) -> BracketResult<()> {
        result_loser(slot1, slot2, winner)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("begin result transaction")?;
        let existing = tx
            .query_row(
                "SELECT winner FROM match_results WHERE node_id = ?1",
                params![node.0 as i64],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .context("query existing result")?
            .flatten();
        if let Some(existing) = existing {
            if existing == winner {
                return Ok(());
            }
            return Err(BracketError::ResultConflict {
                node,
                existing,
                attempted: winner.to_string(),
            });
        }
        tx.execute(
            "INSERT INTO match_results (node_id, slot1, slot2, winner, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(node_id) DO UPDATE SET
                slot1 = excluded.slot1,
                slot2 = excluded.slot2,
                winner = excluded.winner,
                updated_at = excluded.updated_at",
            params![node.0 as i64, slot1, slot2, winner, Utc::now().to_rfc3339()],
        )
        .with_context(|| format!("record result of {node}"))?;
        tx.commit().context("commit result transaction")?;
        Ok(())
    }
}
