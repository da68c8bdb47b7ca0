use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use strum::{AsRefStr, Display, EnumIter};

use crate::error::MendError;
use crate::ledger::LedgerRecord;
use crate::manifest::{Manifest, MigrationDef, SchemaTarget};

/// The reconciliation branch taken for one migration.
#[derive(AsRefStr, Display, EnumIter, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Branch {
    /// Schema already matches, ledger lacks the record: record it only
    #[strum(serialize = "fake-apply")]
    FakeApply,
    /// Neither schema nor ledger: run the change, then record it
    #[strum(serialize = "apply")]
    Apply,
    /// Schema matches and the ledger agrees
    #[strum(serialize = "no-op")]
    NoOp,
    /// Ledger records it but the object is gone, recreated on request
    #[strum(serialize = "restore")]
    Restore,
    /// Half-built table dropped and built again on request
    #[strum(serialize = "recreate")]
    Recreate,
    /// Orphaned ledger row removed
    #[strum(serialize = "forget")]
    Forget,
}

/// What the catalog says about a migration's target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum SchemaState {
    Matches,
    Absent,
    /// Table exists but lacks some declared columns or indexes
    Partial { missing: Vec<String> },
    /// Column target whose table does not exist
    ParentMissing { table: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observed {
    pub ledger_has_record: bool,
    pub schema: SchemaState,
    /// Indexes currently on the target table
    pub indexes: Vec<String>,
}

impl Observed {
    #[cfg(test)]
    pub fn new(ledger_has_record: bool, schema: SchemaState) -> Self {
        Observed {
            ledger_has_record,
            schema,
            indexes: Vec::new(),
        }
    }
}

/// Creation paths the operator has opted into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Policy {
    /// Re-run the schema change when the ledger records a migration whose object is gone
    pub create_missing: bool,
    /// Drop and recreate tables that exist with only part of their declared shape
    pub recreate_partial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Action {
    DeleteLedgerRecord { id: i64, app: String, name: String },
    MarkApplied { app: String, name: String },
    DropIndex { name: String },
    DropTable { name: String },
    CreateTable { name: String, sql: String },
    CreateIndex { name: String, sql: String },
    AddColumn { table: String, column: String, definition: String },
    Backfill { sql: String },
}

impl Action {
    /// True for actions that write to the ledger table only.
    pub fn is_ledger_only(&self) -> bool {
        matches!(
            self,
            Action::DeleteLedgerRecord { .. } | Action::MarkApplied { .. }
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::DeleteLedgerRecord { id, app, name } => {
                write!(f, "delete ledger record {}.{} (id={})", app, name, id)
            }
            Action::MarkApplied { app, name } => write!(f, "mark {}.{} as applied", app, name),
            Action::DropIndex { name } => write!(f, "DROP INDEX {}", name),
            Action::DropTable { name } => write!(f, "DROP TABLE {}", name),
            Action::CreateTable { name, .. } => write!(f, "CREATE TABLE {}", name),
            Action::CreateIndex { name, .. } => write!(f, "CREATE INDEX {}", name),
            Action::AddColumn {
                table,
                column,
                definition,
            } => write!(f, "ALTER TABLE {} ADD COLUMN {} {}", table, column, definition),
            Action::Backfill { sql } => write!(f, "{}", sql.trim()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub migration: String,
    pub branch: Branch,
    pub actions: Vec<Action>,
}

impl Decision {
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Decide what one migration needs, given what was observed.
///
/// Exactly one branch is chosen for every combination of ledger and schema
/// state. Combinations that cannot be settled without an explicit policy fail
/// with `Conflict` (partially built table) or `NotFound` (object missing with
/// no creation path selected).
pub fn decide(
    app: &str,
    def: &MigrationDef,
    observed: &Observed,
    policy: Policy,
) -> Result<Decision, MendError> {
    let decision = |branch, actions| Decision {
        migration: def.name.clone(),
        branch,
        actions,
    };
    let mark = || Action::MarkApplied {
        app: app.to_owned(),
        name: def.name.clone(),
    };

    match (&observed.schema, observed.ledger_has_record) {
        (SchemaState::ParentMissing { table }, _) => Err(MendError::NotFound(format!(
            "{}.{}: table '{}' does not exist, cannot check {}",
            app,
            def.name,
            table,
            def.target.describe()
        ))),
        (SchemaState::Partial { missing }, has_record) => {
            let table = match &def.target {
                SchemaTarget::Table { name, .. } if policy.recreate_partial => name,
                _ => {
                    return Err(MendError::Conflict(format!(
                        "{}.{}: {} exists but is missing {}",
                        app,
                        def.name,
                        def.target.describe(),
                        missing.join(", ")
                    )))
                }
            };

            let mut actions: Vec<Action> = observed
                .indexes
                .iter()
                .map(|name| Action::DropIndex { name: name.clone() })
                .collect();
            actions.push(Action::DropTable {
                name: table.clone(),
            });
            actions.extend(schema_change(def));
            if !has_record {
                actions.push(mark());
            }
            Ok(decision(Branch::Recreate, actions))
        }
        (SchemaState::Matches, false) => Ok(decision(Branch::FakeApply, vec![mark()])),
        (SchemaState::Matches, true) => Ok(decision(Branch::NoOp, Vec::new())),
        (SchemaState::Absent, false) => {
            let mut actions = schema_change(def);
            actions.push(mark());
            Ok(decision(Branch::Apply, actions))
        }
        (SchemaState::Absent, true) if policy.create_missing => {
            Ok(decision(Branch::Restore, schema_change(def)))
        }
        (SchemaState::Absent, true) => Err(MendError::NotFound(format!(
            "{}.{} is recorded as applied but {} does not exist",
            app,
            def.name,
            def.target.describe()
        ))),
    }
}

/// The statements that build a migration's target, followed by its backfill.
fn schema_change(def: &MigrationDef) -> Vec<Action> {
    let mut actions = match &def.target {
        SchemaTarget::Table {
            name,
            create_sql,
            indexes,
            ..
        } => {
            let mut actions = vec![Action::CreateTable {
                name: name.clone(),
                sql: create_sql.clone(),
            }];
            actions.extend(indexes.iter().map(|index| Action::CreateIndex {
                name: index.name.clone(),
                sql: index.sql.clone(),
            }));
            actions
        }
        SchemaTarget::Column {
            table,
            column,
            definition,
        } => vec![Action::AddColumn {
            table: table.clone(),
            column: column.clone(),
            definition: definition.clone(),
        }],
    };

    actions.extend(
        def.backfill
            .iter()
            .map(|sql| Action::Backfill { sql: sql.clone() }),
    );
    actions
}

/// Ledger rows of the manifest's app that no definition accounts for.
///
/// A row is orphaned when it is not declared in the manifest and either matches
/// a retired pattern or, when the migration files on disk are known, has no
/// file of its own.
pub fn find_orphans(
    manifest: &Manifest,
    records: &[LedgerRecord],
    files_on_disk: Option<&HashSet<String>>,
) -> Vec<Decision> {
    records
        .iter()
        .filter(|record| record.app() == manifest.app)
        .filter(|record| !manifest.is_declared(record.name()))
        .filter(|record| {
            manifest.is_retired(record.name())
                || files_on_disk.is_some_and(|files| !files.contains(record.name()))
        })
        .map(|record| Decision {
            migration: record.name().to_owned(),
            branch: Branch::Forget,
            actions: vec![Action::DeleteLedgerRecord {
                id: record.id(),
                app: record.app().to_owned(),
                name: record.name().to_owned(),
            }],
        })
        .collect()
}

/// The actions of one reconciliation pass.
///
/// A pass is either a cleanup pass, which only deletes orphaned ledger rows,
/// or an apply pass. The two never mix so that forgetting a record can never
/// trigger a schema mutation in the same pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub decisions: Vec<Decision>,
}

impl Plan {
    pub fn build(
        manifest: &Manifest,
        records: &[LedgerRecord],
        files_on_disk: Option<&HashSet<String>>,
        observations: &[(&MigrationDef, Observed)],
        policy: Policy,
    ) -> Result<Self, MendError> {
        let orphans = find_orphans(manifest, records, files_on_disk);
        if !orphans.is_empty() {
            return Ok(Plan { decisions: orphans });
        }

        Self::apply_pass(manifest, observations, policy)
    }

    /// One decision per declared migration, ignoring any orphans in the ledger.
    pub fn apply_pass(
        manifest: &Manifest,
        observations: &[(&MigrationDef, Observed)],
        policy: Policy,
    ) -> Result<Self, MendError> {
        let mut decisions = Vec::with_capacity(observations.len());
        for (def, observed) in observations {
            decisions.push(decide(&manifest.app, def, observed, policy)?);
        }

        Ok(Plan { decisions })
    }

    pub fn is_cleanup(&self) -> bool {
        self.decisions.iter().any(|d| d.branch == Branch::Forget)
    }

    pub fn is_noop(&self) -> bool {
        self.decisions.iter().all(Decision::is_noop)
    }

    pub fn action_count(&self) -> usize {
        self.decisions.iter().map(|d| d.actions.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use strum::IntoEnumIterator;

    fn column_def() -> MigrationDef {
        MigrationDef {
            name: "0002_name".into(),
            target: SchemaTarget::Column {
                table: "people".into(),
                column: "name".into(),
                definition: "TEXT".into(),
            },
            backfill: vec!["UPDATE people SET name = 'unknown'".into()],
        }
    }

    fn table_def() -> MigrationDef {
        Manifest::builtin().unwrap().migrations[0].clone()
    }

    fn schema_for(matches: bool) -> SchemaState {
        if matches {
            SchemaState::Matches
        } else {
            SchemaState::Absent
        }
    }

    #[test]
    fn test_branch_names() {
        let names: Vec<String> = Branch::iter().map(|b| b.to_string()).collect();
        assert_eq!(
            names,
            vec!["fake-apply", "apply", "no-op", "restore", "recreate", "forget"]
        );
        assert_eq!(Branch::FakeApply.as_ref(), "fake-apply");
    }

    #[test]
    fn test_fake_apply_when_schema_matches() {
        let d = decide(
            "app",
            &column_def(),
            &Observed::new(false, SchemaState::Matches),
            Policy::default(),
        )
        .unwrap();
        assert_eq!(d.branch, Branch::FakeApply);
        assert_eq!(
            d.actions,
            vec![Action::MarkApplied {
                app: "app".into(),
                name: "0002_name".into()
            }]
        );
    }

    #[test]
    fn test_apply_runs_change_backfill_then_marks() {
        let d = decide(
            "app",
            &column_def(),
            &Observed::new(false, SchemaState::Absent),
            Policy::default(),
        )
        .unwrap();
        assert_eq!(d.branch, Branch::Apply);
        assert_eq!(
            d.actions,
            vec![
                Action::AddColumn {
                    table: "people".into(),
                    column: "name".into(),
                    definition: "TEXT".into()
                },
                Action::Backfill {
                    sql: "UPDATE people SET name = 'unknown'".into()
                },
                Action::MarkApplied {
                    app: "app".into(),
                    name: "0002_name".into()
                },
            ]
        );
    }

    #[test]
    fn test_apply_table_creates_indexes() {
        let d = decide(
            "agency",
            &table_def(),
            &Observed::new(false, SchemaState::Absent),
            Policy::default(),
        )
        .unwrap();
        let labels: Vec<String> = d.actions.iter().map(|a| a.to_string()).collect();
        assert_eq!(
            labels,
            vec![
                "CREATE TABLE agency_cost",
                "CREATE INDEX agency_cost_company_start_idx",
                "CREATE INDEX agency_cost_type_contractor_idx",
                "mark agency.0005_cost as applied",
            ]
        );
    }

    #[test]
    fn test_noop_when_both_agree() {
        let d = decide(
            "app",
            &column_def(),
            &Observed::new(true, SchemaState::Matches),
            Policy {
                create_missing: true,
                recreate_partial: true,
            },
        )
        .unwrap();
        assert_eq!(d.branch, Branch::NoOp);
        assert!(d.is_noop());
    }

    #[test]
    fn test_recorded_but_absent() {
        let observed = Observed::new(true, SchemaState::Absent);

        let err = decide("app", &column_def(), &observed, Policy::default()).unwrap_err();
        assert!(matches!(err, MendError::NotFound(_)));

        let policy = Policy {
            create_missing: true,
            ..Policy::default()
        };
        let d = decide("app", &column_def(), &observed, policy).unwrap();
        assert_eq!(d.branch, Branch::Restore);
        assert!(d.actions.iter().all(|a| !matches!(a, Action::MarkApplied { .. })));
    }

    #[test]
    fn test_parent_missing_is_not_found_under_any_policy() {
        let observed = Observed::new(
            false,
            SchemaState::ParentMissing {
                table: "people".into(),
            },
        );
        let policy = Policy {
            create_missing: true,
            recreate_partial: true,
        };
        assert!(matches!(
            decide("app", &column_def(), &observed, policy),
            Err(MendError::NotFound(_))
        ));
    }

    #[test]
    fn test_partial_table_conflicts_without_recreate() {
        let observed = Observed::new(
            false,
            SchemaState::Partial {
                missing: vec!["vendor".into()],
            },
        );
        let err = decide("agency", &table_def(), &observed, Policy::default()).unwrap_err();
        match err {
            MendError::Conflict(msg) => assert!(msg.contains("vendor")),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_table_recreated_on_request() {
        let mut observed = Observed::new(
            true,
            SchemaState::Partial {
                missing: vec!["vendor".into()],
            },
        );
        observed.indexes = vec!["agency_cost_company_start_idx".into()];
        let policy = Policy {
            recreate_partial: true,
            ..Policy::default()
        };

        let d = decide("agency", &table_def(), &observed, policy).unwrap();
        assert_eq!(d.branch, Branch::Recreate);
        let labels: Vec<String> = d.actions.iter().map(|a| a.to_string()).collect();
        assert_eq!(
            labels,
            vec![
                "DROP INDEX agency_cost_company_start_idx",
                "DROP TABLE agency_cost",
                "CREATE TABLE agency_cost",
                "CREATE INDEX agency_cost_company_start_idx",
                "CREATE INDEX agency_cost_type_contractor_idx",
            ]
        );
    }

    #[test]
    fn test_partial_column_target_always_conflicts() {
        let observed = Observed::new(
            false,
            SchemaState::Partial {
                missing: vec!["name".into()],
            },
        );
        let policy = Policy {
            recreate_partial: true,
            create_missing: true,
        };
        assert!(matches!(
            decide("app", &column_def(), &observed, policy),
            Err(MendError::Conflict(_))
        ));
    }

    fn record(id: i64, app: &str, name: &str) -> LedgerRecord {
        LedgerRecord::new(id, app, name, "2024-01-01 00:00:00")
    }

    #[test]
    fn test_orphans_by_retired_pattern() {
        let manifest = Manifest::builtin().unwrap();
        let records = vec![
            record(1, "agency", "0001_initial"),
            record(2, "agency", "0010_alter_monthlycost"),
            record(3, "auth", "0010_alter_monthlycost"),
        ];

        let orphans = find_orphans(&manifest, &records, None);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].branch, Branch::Forget);
        assert_eq!(
            orphans[0].actions,
            vec![Action::DeleteLedgerRecord {
                id: 2,
                app: "agency".into(),
                name: "0010_alter_monthlycost".into()
            }]
        );
    }

    #[test]
    fn test_orphans_by_missing_file() {
        let manifest = Manifest::builtin().unwrap();
        let records = vec![
            record(1, "agency", "0001_initial"),
            record(2, "agency", "0003_gone"),
            record(3, "agency", "0005_cost"),
        ];
        let files: HashSet<String> = ["0001_initial".to_string()].into_iter().collect();

        let orphans = find_orphans(&manifest, &records, Some(&files));
        let names: Vec<&str> = orphans.iter().map(|d| d.migration.as_str()).collect();
        // 0005_cost is declared, so it is never an orphan even without a file
        assert_eq!(names, vec!["0003_gone"]);
    }

    #[test]
    fn test_cleanup_pass_has_no_schema_mutation() {
        let manifest = Manifest::builtin().unwrap();
        let records = vec![record(7, "agency", "0010_alter_monthlycost")];
        let defs = manifest.migrations.clone();
        let observations: Vec<(&MigrationDef, Observed)> = defs
            .iter()
            .map(|def| (def, Observed::new(false, SchemaState::Absent)))
            .collect();

        let plan = Plan::build(&manifest, &records, None, &observations, Policy::default()).unwrap();
        assert!(plan.is_cleanup());
        assert_eq!(plan.action_count(), 1);
        assert!(plan
            .decisions
            .iter()
            .flat_map(|d| d.actions.iter())
            .all(Action::is_ledger_only));
    }

    #[test]
    fn test_apply_pass_when_no_orphans() {
        let manifest = Manifest::builtin().unwrap();
        let defs = manifest.migrations.clone();
        let observations: Vec<(&MigrationDef, Observed)> = defs
            .iter()
            .map(|def| (def, Observed::new(true, SchemaState::Matches)))
            .collect();

        let plan = Plan::build(&manifest, &[], None, &observations, Policy::default()).unwrap();
        assert!(!plan.is_cleanup());
        assert!(plan.is_noop());
        assert_eq!(plan.decisions.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_exactly_one_branch_per_state(
            has_record in any::<bool>(),
            matches in any::<bool>(),
            create_missing in any::<bool>(),
            recreate_partial in any::<bool>(),
        ) {
            let policy = Policy { create_missing, recreate_partial };
            let observed = Observed::new(has_record, schema_for(matches));
            let result = decide("app", &column_def(), &observed, policy);

            let expected = match (has_record, matches) {
                (false, true) => Some(Branch::FakeApply),
                (false, false) => Some(Branch::Apply),
                (true, true) => Some(Branch::NoOp),
                (true, false) if create_missing => Some(Branch::Restore),
                (true, false) => None,
            };

            match expected {
                Some(branch) => prop_assert_eq!(result.unwrap().branch, branch),
                None => prop_assert!(matches!(result, Err(MendError::NotFound(_)))),
            }
        }

        #[test]
        fn prop_ledger_marked_only_when_missing(
            has_record in any::<bool>(),
            matches in any::<bool>(),
        ) {
            let policy = Policy { create_missing: true, recreate_partial: true };
            let observed = Observed::new(has_record, schema_for(matches));
            let d = decide("app", &column_def(), &observed, policy).unwrap();

            let marks = d.actions.iter().filter(|a| matches!(a, Action::MarkApplied { .. })).count();
            prop_assert_eq!(marks, usize::from(!has_record));
            // Schema statements only run when the schema does not already match
            let mutates = d.actions.iter().any(|a| !a.is_ledger_only());
            prop_assert_eq!(mutates, !matches);
        }
    }
}
