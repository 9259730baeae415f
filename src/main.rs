use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;

use wc26_bracket::bracket::Stage;
use wc26_bracket::collaborators::Collaborators;
use wc26_bracket::config::EngineConfig;
use wc26_bracket::memory::{FixedGate, MemoryBackend};
use wc26_bracket::prediction::UserId;
use wc26_bracket::service::BracketService;
use wc26_bracket::simulate::{self, SimulationOptions};
use wc26_bracket::sqlite_store::SqliteStore;

const USAGE: &str = "usage: wc26_bracket <validate | simulate --users N [--seed S] [--persist] | dump --user U> [--db PATH]";

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = EngineConfig::from_env();
    let command = std::env::args().nth(1);
    match command.as_deref() {
        None | Some("validate") => validate(&config),
        Some("simulate") => run_simulation(&config),
        Some("dump") => dump(&config),
        Some("-h") | Some("--help") => {
            println!("{USAGE}");
            Ok(())
        }
        Some(other) => Err(anyhow!("unknown command {other:?}\n{USAGE}")),
    }
}

fn validate(config: &EngineConfig) -> Result<()> {
    let graph = config.load_graph().context("load fixture graph")?;
    let table = config
        .load_third_place_table()
        .context("load third-place table")?;

    println!("Bracket OK: {} fixtures, final {}", graph.len(), graph.final_node());
    for stage in Stage::ALL {
        let count = graph.nodes_in_stage(stage).count();
        if count > 0 {
            println!("  {:<12} {count}", stage.label());
        }
    }
    println!("Third-place slots: {}", graph.third_place_slots().len());
    println!(
        "Third-place table: {} combinations ({})",
        table.len(),
        table.source().label()
    );
    println!(
        "Points: {:?} (partial credit {}%)",
        config.points, config.points.partial_credit_pct
    );
    println!("Reachability enforced: {}", config.reachability_enforced);
    Ok(())
}

fn sqlite_collaborators(store: Arc<SqliteStore>, backend: &MemoryBackend) -> Collaborators {
    Collaborators {
        predictions: store.clone(),
        results: store.clone(),
        eliminations: store.clone(),
        gate: backend.gate.clone(),
        ledger: store,
        standings: backend.standings.clone(),
    }
}

fn resolve_db_path(config: &EngineConfig) -> Result<PathBuf> {
    parse_db_path_arg()
        .or_else(|| config.db_path.clone())
        .context("unable to resolve sqlite path")
}

fn run_simulation(config: &EngineConfig) -> Result<()> {
    let options = SimulationOptions {
        users: parse_usize_arg("--users").unwrap_or(SimulationOptions::default().users),
        seed: parse_u64_arg("--seed").unwrap_or(SimulationOptions::default().seed),
    };
    let backend = MemoryBackend {
        gate: Arc::new(FixedGate::new(config.reachability_enforced)),
        ..MemoryBackend::new()
    };

    let report = if has_flag("--persist") {
        let db_path = resolve_db_path(config)?;
        let store = Arc::new(SqliteStore::open(&db_path)?);
        let service = BracketService::from_config(config, sqlite_collaborators(store.clone(), &backend))?;
        println!("DB: {}", db_path.display());
        simulate::run(&service, &backend.standings, store.as_ref(), &options)?
    } else {
        let service = BracketService::from_config(config, backend.collaborators())?;
        simulate::run(&service, &backend.standings, backend.results.as_ref(), &options)?
    };

    println!("Simulation complete");
    println!("Users: {}", report.users);
    println!("Fixtures played: {}", report.fixtures_played);
    println!(
        "Hits: full={} partial={} invalidated={}",
        report.full_hits, report.partial_hits, report.invalidated
    );
    println!(
        "Champion: {}",
        report.champion.as_deref().unwrap_or("n/a")
    );
    for (rank, (user, total)) in report.leaderboard.iter().take(10).enumerate() {
        println!("{:>3}. user {user:<6} {total}", rank + 1);
    }
    Ok(())
}

fn dump(config: &EngineConfig) -> Result<()> {
    let user = parse_u64_arg("--user").context("dump needs --user U")? as UserId;
    let db_path = resolve_db_path(config)?;
    let store = Arc::new(SqliteStore::open(&db_path)?);
    let backend = MemoryBackend::new();
    let service = BracketService::from_config(config, sqlite_collaborators(store, &backend))?;

    let drafts = service.bracket_draft(user)?;
    if drafts.is_empty() {
        return Err(anyhow!("no predictions for user {user} in {}", db_path.display()));
    }
    let out = serde_json::json!({
        "user": user,
        "knockout_score": service.knockout_score(user)?,
        "bracket": drafts,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}

fn parse_db_path_arg() -> Option<PathBuf> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(path) = arg.strip_prefix("--db=") {
            let trimmed = path.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
        if arg == "--db" {
            let Some(next) = args.get(idx + 1) else {
                continue;
            };
            if !next.trim().is_empty() {
                return Some(PathBuf::from(next));
            }
        }
    }
    None
}

fn parse_usize_arg(name: &str) -> Option<usize> {
    parse_u64_arg(name).map(|v| v as usize)
}

fn parse_u64_arg(name: &str) -> Option<u64> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && let Ok(v) = raw.trim().parse::<u64>()
        {
            return Some(v);
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && let Ok(v) = next.trim().parse::<u64>()
        {
            return Some(v);
        }
    }
    None
}
