//! JSON report assembled from per-pool audit results.

use serde::Serialize;
use sharepool_ledger::audit::AuditReport;

/// Top-level document written to stdout.
#[derive(Debug, Serialize)]
pub struct Report {
    pub version: String,
    pub database: String,
    pub pools_audited: usize,
    pub violations: usize,
    pub clean: bool,
    pub pools: Vec<AuditReport>,
}

impl Report {
    pub fn new(database: String, pools: Vec<AuditReport>) -> Self {
        let violations = pools.iter().map(|p| p.violations.len()).sum();
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            database,
            pools_audited: pools.len(),
            violations,
            clean: violations == 0,
            pools,
        }
    }
}
