//! sharepool-audit: offline invariant checker for a ledger database.
//!
//! Opens the SQLite ledger, re-derives every pool invariant from stored
//! state and prints a JSON report on stdout. Logs go to stderr.
//!
//! Usage:
//!   sharepool-audit                       # Audit every pool in the configured database
//!   sharepool-audit --db PATH             # Audit a specific database file
//!   sharepool-audit --pool CLIENT:ID ...  # Audit only the named pools
//!   sharepool-audit --config PATH         # Read configuration from PATH

mod config;
mod report;

use std::path::PathBuf;

use anyhow::{bail, Context};
use sharepool_ledger::audit;
use sharepool_ledger::SqliteStore;
use sharepool_types::PoolKey;
use tracing::info;

use crate::config::AuditConfig;
use crate::report::Report;

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    db: Option<PathBuf>,
    pools: Vec<String>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Args> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        let mut value = || args.next().with_context(|| format!("{arg} needs a value"));
        match arg.as_str() {
            "--config" => parsed.config = Some(PathBuf::from(value()?)),
            "--db" => parsed.db = Some(PathBuf::from(value()?)),
            "--pool" => parsed.pools.push(value()?),
            other => bail!("unknown argument {other:?}"),
        }
    }
    Ok(parsed)
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1))?;

    // 1. Load config, command line overrides the file
    let mut config = match &args.config {
        Some(path) => AuditConfig::load_from(path)?,
        None => AuditConfig::load()?,
    };
    if let Some(db) = &args.db {
        config.database.path = db.to_string_lossy().into_owned();
    }
    if !args.pools.is_empty() {
        config.audit.pools = args.pools;
    }

    // 2. Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("sharepool={}", config.logging.log_level).parse()?),
        )
        .init();

    // 3. Open database
    let db_path = config.database_path();
    if !db_path.exists() {
        bail!("ledger database {} does not exist", db_path.display());
    }
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("opening {}", db_path.display()))?;
    info!(path = %db_path.display(), "ledger database opened");

    // 4. Audit
    let filter: Vec<PoolKey> = config.pool_filter()?;
    let reports = if filter.is_empty() {
        audit::check_all(&store)?
    } else {
        filter
            .iter()
            .map(|pool| audit::check_pool(&store, pool))
            .collect::<Result<Vec<_>, _>>()?
    };

    // 5. Report
    let report = Report::new(db_path.display().to_string(), reports);
    println!("{}", serde_json::to_string_pretty(&report)?);
    info!(
        pools = report.pools_audited,
        violations = report.violations,
        "audit complete"
    );

    if !report.clean && config.audit.fail_on_violation {
        bail!("{} invariant violation(s) found", report.violations);
    }
    Ok(())
}
