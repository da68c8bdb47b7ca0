use std::collections::HashSet;
use std::fmt::Write;

use console::style;
use serde::Serialize;

use crate::catalog::Catalog;
use crate::database::Database;
use crate::error::MendError;
use crate::ledger::{Ledger, LedgerRecord};
use crate::manifest::Manifest;
use crate::plan::{self, Branch, Observed, Policy};
use crate::reconcile::Reconciler;

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    pub target: String,
    pub observed: Observed,
    pub branch: Option<Branch>,
    pub actions: Vec<String>,
    pub error: Option<String>,
}

/// Read-only picture of the ledger, the catalog and what a reconcile run would do.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub app: String,
    pub ledger_table: String,
    pub records: Vec<LedgerRecord>,
    pub tables: Vec<String>,
    pub orphans: Vec<String>,
    pub migrations: Vec<MigrationStatus>,
}

impl StatusReport {
    pub fn gather(
        db: &Database,
        ledger: &Ledger,
        manifest: &Manifest,
        files_on_disk: Option<&HashSet<String>>,
        policy: Policy,
    ) -> Result<Self, MendError> {
        let records = ledger.records_for_app(db, &manifest.app)?;
        let orphans = plan::find_orphans(manifest, &records, files_on_disk)
            .into_iter()
            .map(|d| d.migration)
            .collect();

        let reconciler = Reconciler::new(db, ledger, manifest);
        let mut migrations = Vec::with_capacity(manifest.migrations.len());
        for (def, observed) in reconciler.observe_all()? {
            let (branch, actions, error) = match plan::decide(&manifest.app, def, &observed, policy) {
                Ok(decision) => (
                    Some(decision.branch),
                    decision.actions.iter().map(|a| a.to_string()).collect(),
                    None,
                ),
                Err(e) => (None, Vec::new(), Some(e.to_string())),
            };
            migrations.push(MigrationStatus {
                name: def.name.clone(),
                target: def.target.describe(),
                observed,
                branch,
                actions,
                error,
            });
        }

        Ok(StatusReport {
            app: manifest.app.clone(),
            ledger_table: ledger.table().to_owned(),
            records,
            tables: Catalog::tables(db)?,
            orphans,
            migrations,
        })
    }

    pub fn to_json(&self) -> Result<String, MendError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| MendError::Error(format!("Failed to serialize status: {}", e)))
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(
            out,
            "{}",
            style(format!("Ledger '{}' for app '{}'", self.ledger_table, self.app)).bold()
        );
        if self.records.is_empty() {
            let _ = writeln!(out, "  (no records)");
        }
        for record in &self.records {
            let line = format!(
                "  {:>4}  {:<45} {}",
                record.id(),
                record.name(),
                record.applied()
            );
            if self.orphans.iter().any(|o| o == record.name()) {
                let _ = writeln!(out, "{} {}", style(line).red(), style("(orphaned)").red());
            } else {
                let _ = writeln!(out, "{}", line);
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "{}", style("Declared migrations").bold());
        for migration in &self.migrations {
            let verdict = match (&migration.branch, &migration.error) {
                (Some(Branch::NoOp), _) => style("in sync".to_string()).green(),
                (Some(branch), _) => style(branch.to_string()).yellow(),
                (None, Some(error)) => style(error.clone()).red(),
                (None, None) => style("unknown".to_string()).dim(),
            };
            let _ = writeln!(
                out,
                "  {:<45} {:<45} {}",
                migration.name, migration.target, verdict
            );
            for action in &migration.actions {
                let _ = writeln!(out, "      - {}", action);
            }
        }

        out
    }
}
