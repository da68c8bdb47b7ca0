use std::collections::HashSet;

use log::{info, warn};
use serde::Serialize;

use crate::catalog::Catalog;
use crate::database::Database;
use crate::error::MendError;
use crate::ledger::Ledger;
use crate::manifest::{Manifest, MigrationDef, SchemaTarget};
use crate::plan::{Action, Decision, Observed, Plan, Policy, SchemaState};
use crate::prompt::Prompter;

/// A cleanup pass followed by an apply pass is the most a run ever needs.
const MAX_PASSES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Executed,
    Unchanged,
    Declined,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionReport {
    pub decision: Decision,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub cleanup: bool,
    pub decisions: Vec<DecisionReport>,
}

impl PassReport {
    fn any_declined(&self) -> bool {
        self.decisions
            .iter()
            .any(|d| d.outcome == Outcome::Declined)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub passes: Vec<PassReport>,
}

impl RunReport {
    pub fn executed_actions(&self) -> usize {
        self.passes
            .iter()
            .flat_map(|p| p.decisions.iter())
            .filter(|d| d.outcome == Outcome::Executed)
            .map(|d| d.decision.actions.len())
            .sum()
    }

    #[cfg(test)]
    pub fn branches(&self) -> Vec<(String, crate::plan::Branch)> {
        self.passes
            .iter()
            .flat_map(|p| p.decisions.iter())
            .map(|d| (d.decision.migration.clone(), d.decision.branch))
            .collect()
    }
}

/// Brings the ledger and the physical schema of one app back in line.
///
/// Each pass observes the catalog and ledger afresh, builds a [`Plan`] and
/// executes it one decision at a time. Every statement runs in its own
/// implicit transaction.
pub struct Reconciler<'a> {
    db: &'a Database,
    ledger: &'a Ledger,
    manifest: &'a Manifest,
    files_on_disk: Option<HashSet<String>>,
    policy: Policy,
}

impl<'a> Reconciler<'a> {
    pub fn new(db: &'a Database, ledger: &'a Ledger, manifest: &'a Manifest) -> Self {
        Reconciler {
            db,
            ledger,
            manifest,
            files_on_disk: None,
            policy: Policy::default(),
        }
    }

    /// Ledger rows with no migration file in this set become orphans.
    pub fn with_files_on_disk(mut self, files: HashSet<String>) -> Self {
        self.files_on_disk = Some(files);
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn observe(&self, def: &MigrationDef) -> Result<Observed, MendError> {
        let ledger_has_record = self.ledger.contains(self.db, &self.manifest.app, &def.name)?;

        let (schema, indexes) = match &def.target {
            SchemaTarget::Table {
                name,
                columns,
                indexes,
                ..
            } => {
                if !Catalog::table_exists(self.db, name)? {
                    (SchemaState::Absent, Vec::new())
                } else {
                    let present = Catalog::columns(self.db, name)?;
                    let mut missing: Vec<String> = columns
                        .iter()
                        .filter(|c| !present.iter().any(|p| p.eq_ignore_ascii_case(c)))
                        .cloned()
                        .collect();
                    for index in indexes {
                        if !Catalog::index_exists(self.db, &index.name)? {
                            missing.push(index.name.clone());
                        }
                    }

                    let schema = if missing.is_empty() {
                        SchemaState::Matches
                    } else {
                        SchemaState::Partial { missing }
                    };
                    (schema, Catalog::indexes(self.db, name)?)
                }
            }
            SchemaTarget::Column { table, column, .. } => {
                let schema = if !Catalog::table_exists(self.db, table)? {
                    SchemaState::ParentMissing {
                        table: table.clone(),
                    }
                } else if Catalog::column_exists(self.db, table, column)? {
                    SchemaState::Matches
                } else {
                    SchemaState::Absent
                };
                (schema, Vec::new())
            }
        };

        Ok(Observed {
            ledger_has_record,
            schema,
            indexes,
        })
    }

    pub fn observe_all(&self) -> Result<Vec<(&'a MigrationDef, Observed)>, MendError> {
        let manifest: &'a Manifest = self.manifest;
        let mut observations = Vec::with_capacity(manifest.migrations.len());
        for def in &manifest.migrations {
            observations.push((def, self.observe(def)?));
        }
        Ok(observations)
    }

    /// Compute the next pass without executing anything.
    pub fn plan(&self) -> Result<Plan, MendError> {
        let records = self.ledger.records_for_app(self.db, &self.manifest.app)?;
        let observations = self.observe_all()?;

        Plan::build(
            self.manifest,
            &records,
            self.files_on_disk.as_ref(),
            &observations,
            self.policy,
        )
    }

    /// The apply pass that follows once any pending ledger cleanup is done.
    ///
    /// Cleanup only deletes undeclared rows, so the observations of declared
    /// migrations are the same before and after it.
    pub fn apply_plan(&self) -> Result<Plan, MendError> {
        let observations = self.observe_all()?;
        Plan::apply_pass(self.manifest, &observations, self.policy)
    }

    /// Plan and execute passes until the ledger holds no orphans.
    ///
    /// Each non-empty decision is confirmed with `prompter` before it runs;
    /// a declined decision is skipped and nothing else about it changes.
    pub fn run(&self, prompter: &mut dyn Prompter) -> Result<RunReport, MendError> {
        let mut report = RunReport::default();

        for pass_no in 1..=MAX_PASSES {
            let plan = self.plan()?;
            info!(
                "Pass {}: {} decision(s), {} action(s){}",
                pass_no,
                plan.decisions.len(),
                plan.action_count(),
                if plan.is_cleanup() { " (ledger cleanup)" } else { "" }
            );

            let pass = self.execute(&plan, prompter)?;
            let stop = !pass.cleanup || pass.any_declined();
            report.passes.push(pass);

            if stop {
                break;
            }
        }

        Ok(report)
    }

    pub fn execute(&self, plan: &Plan, prompter: &mut dyn Prompter) -> Result<PassReport, MendError> {
        let mut pass = PassReport {
            cleanup: plan.is_cleanup(),
            decisions: Vec::with_capacity(plan.decisions.len()),
        };

        for decision in &plan.decisions {
            let outcome = self.execute_decision(decision, prompter)?;
            pass.decisions.push(DecisionReport {
                decision: decision.clone(),
                outcome,
            });
        }

        Ok(pass)
    }

    fn execute_decision(
        &self,
        decision: &Decision,
        prompter: &mut dyn Prompter,
    ) -> Result<Outcome, MendError> {
        let app = &self.manifest.app;

        if decision.is_noop() {
            info!("{}.{}: {}", app, decision.migration, decision.branch);
            return Ok(Outcome::Unchanged);
        }

        let summary: Vec<String> = decision.actions.iter().map(|a| a.to_string()).collect();
        let prompt = format!(
            "{}.{} [{}]: {}. Proceed?",
            app,
            decision.migration,
            decision.branch,
            summary.join("; ")
        );

        if !prompter.confirm(&prompt)? {
            warn!(
                "{}.{}: {} declined by operator",
                app, decision.migration, decision.branch
            );
            return Ok(Outcome::Declined);
        }

        info!("{}.{}: {}", app, decision.migration, decision.branch);
        for action in &decision.actions {
            self.apply_action(action)?;
        }

        Ok(Outcome::Executed)
    }

    fn apply_action(&self, action: &Action) -> Result<(), MendError> {
        info!("  {}", action);

        match action {
            Action::DeleteLedgerRecord { id, .. } => {
                self.ledger.delete(self.db, *id)?;
            }
            Action::MarkApplied { app, name } => {
                self.ledger.mark_applied(self.db, app, name)?;
            }
            Action::DropIndex { name } => {
                self.db.execute(&format!(
                    "DROP INDEX IF EXISTS {}",
                    Database::quote_ident(name)
                ))?;
            }
            Action::DropTable { name } => {
                self.db.execute(&format!(
                    "DROP TABLE IF EXISTS {}",
                    Database::quote_ident(name)
                ))?;
            }
            Action::CreateTable { sql, .. }
            | Action::CreateIndex { sql, .. }
            | Action::Backfill { sql } => {
                self.db.execute(sql)?;
            }
            Action::AddColumn {
                table,
                column,
                definition,
            } => {
                self.db.execute(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    Database::quote_ident(table),
                    Database::quote_ident(column),
                    definition
                ))?;
            }
        }

        Ok(())
    }
}
