use std::collections::HashSet;

use console::style;
use log::{error, info};

use crate::catalog::Catalog;
use crate::database::Database;
use crate::error::MendError;
use crate::ledger::Ledger;
use crate::manifest::Manifest;
use crate::plan::{self, Plan, Policy};
use crate::project::Project;
use crate::prompt::Prompter;
use crate::reconcile::{Outcome, Reconciler, RunReport};
use crate::status::StatusReport;
use crate::tool::MigrationTool;

const MENU_ITEMS: [&str; 9] = [
    "Show status",
    "List tables",
    "List migration files",
    "Reconcile ledger and schema",
    "Remove orphaned ledger records",
    "Apply migrations up to a named step",
    "Fake-apply migrations up to a named step",
    "Drop and recreate a partially built table",
    "Exit",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuChoice {
    Status,
    Tables,
    Files,
    Reconcile,
    RemoveOrphans,
    Migrate,
    Fake,
    Recreate,
    Exit,
}

impl MenuChoice {
    const ALL: [MenuChoice; 9] = [
        MenuChoice::Status,
        MenuChoice::Tables,
        MenuChoice::Files,
        MenuChoice::Reconcile,
        MenuChoice::RemoveOrphans,
        MenuChoice::Migrate,
        MenuChoice::Fake,
        MenuChoice::Recreate,
        MenuChoice::Exit,
    ];

    /// Parse a 1-based menu number.
    fn parse(answer: &str) -> Result<Self, MendError> {
        answer
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| Self::ALL.get(idx).copied())
            .ok_or_else(|| MendError::InvalidChoice(answer.trim().to_owned()))
    }
}

/// Everything one interactive repair session works against.
pub struct Session<'a> {
    pub db: &'a Database,
    pub ledger: &'a Ledger,
    pub manifest: &'a Manifest,
    pub migrations_dir: Option<std::path::PathBuf>,
    pub policy: Policy,
    pub tool: &'a mut dyn MigrationTool,
    pub prompter: &'a mut dyn Prompter,
}

impl<'a> Session<'a> {
    /// Loop over the numbered menu until the operator exits.
    ///
    /// A failing step is reported and the menu continues. An answer that is not
    /// a menu number ends the session with `InvalidChoice`. Returns the exit
    /// code of the last external command run, 0 when none ran.
    pub fn run_menu(&mut self) -> Result<i32, MendError> {
        let mut last_code = 0;

        loop {
            println!();
            println!("{}", style(format!("schemamend: {}", self.manifest.app)).bold());
            for (idx, item) in MENU_ITEMS.iter().enumerate() {
                println!("  {}) {}", idx + 1, item);
            }

            let answer = self.prompter.input("Choose an option")?;
            let choice = MenuChoice::parse(&answer)?;
            info!("Menu choice: {:?}", choice);

            let result = match choice {
                MenuChoice::Exit => return Ok(last_code),
                MenuChoice::Status => self.show_status().map(|_| None),
                MenuChoice::Tables => self.list_tables().map(|_| None),
                MenuChoice::Files => self.list_files().map(|_| None),
                MenuChoice::Reconcile => self.reconcile(self.policy).map(|_| None),
                MenuChoice::RemoveOrphans => self.remove_orphans().map(|_| None),
                MenuChoice::Migrate => self.migrate(false),
                MenuChoice::Fake => self.migrate(true),
                MenuChoice::Recreate => {
                    let policy = Policy {
                        recreate_partial: true,
                        ..self.policy
                    };
                    self.reconcile(policy).map(|_| None)
                }
            };

            match result {
                Ok(Some(code)) => last_code = code,
                Ok(None) => {}
                Err(e) => {
                    error!("{:?} failed: {}", choice, e);
                    eprintln!("{} {}", style("Error:").red().bold(), e);
                }
            }
        }
    }

    fn files_on_disk(&self) -> Result<Option<HashSet<String>>, MendError> {
        self.migrations_dir
            .as_deref()
            .map(Project::migration_file_set)
            .transpose()
            .map(Option::flatten)
    }

    fn reconciler(&self, policy: Policy) -> Result<Reconciler<'a>, MendError> {
        let mut reconciler = Reconciler::new(self.db, self.ledger, self.manifest).with_policy(policy);
        if let Some(files) = self.files_on_disk()? {
            reconciler = reconciler.with_files_on_disk(files);
        }
        Ok(reconciler)
    }

    pub fn show_status(&mut self) -> Result<(), MendError> {
        let files = self.files_on_disk()?;
        let report = StatusReport::gather(
            self.db,
            self.ledger,
            self.manifest,
            files.as_ref(),
            self.policy,
        )?;
        print!("{}", report.render());
        Ok(())
    }

    pub fn list_tables(&mut self) -> Result<(), MendError> {
        for table in Catalog::tables(self.db)? {
            println!("  - {}", table);
        }
        Ok(())
    }

    pub fn list_files(&mut self) -> Result<(), MendError> {
        match &self.migrations_dir {
            Some(dir) => {
                for name in Project::migration_files(dir)? {
                    println!("  - {}", name);
                }
            }
            None => println!("  No migration directory configured"),
        }
        Ok(())
    }

    pub fn reconcile(&mut self, policy: Policy) -> Result<RunReport, MendError> {
        let reconciler = self.reconciler(policy)?;
        let report = reconciler.run(&mut *self.prompter)?;
        print_report(&report);
        Ok(report)
    }

    pub fn remove_orphans(&mut self) -> Result<usize, MendError> {
        let files = self.files_on_disk()?;
        let records = self.ledger.records_for_app(self.db, &self.manifest.app)?;
        let orphans = plan::find_orphans(self.manifest, &records, files.as_ref());

        if orphans.is_empty() {
            println!("  No orphaned ledger records");
            return Ok(0);
        }

        let reconciler = self.reconciler(self.policy)?;
        let pass = reconciler.execute(&Plan { decisions: orphans }, &mut *self.prompter)?;
        let removed = pass
            .decisions
            .iter()
            .filter(|d| d.outcome == Outcome::Executed)
            .count();
        println!("  Removed {} orphaned ledger record(s)", removed);
        Ok(removed)
    }

    /// Run the migration tool up to a named step. A fake apply needs a target
    /// and a confirmation; `None` means nothing was run.
    pub fn migrate(&mut self, fake: bool) -> Result<Option<i32>, MendError> {
        let target = self
            .prompter
            .input("Target migration (empty for all)")?
            .trim()
            .to_owned();

        if !fake {
            let target = (!target.is_empty()).then_some(target.as_str());
            return self.tool.migrate(&self.manifest.app, target).map(Some);
        }

        if target.is_empty() {
            println!("  A fake apply needs a target migration");
            return Ok(None);
        }

        let prompt = format!(
            "Mark {} migrations up to {} as applied without running them?",
            self.manifest.app, target
        );
        if !self.prompter.confirm(&prompt)? {
            info!("Fake apply of {} declined", target);
            return Ok(None);
        }

        self.tool.fake(&self.manifest.app, &target).map(Some)
    }
}

pub fn print_report(report: &RunReport) {
    for (idx, pass) in report.passes.iter().enumerate() {
        let kind = if pass.cleanup { "ledger cleanup" } else { "apply" };
        println!("{}", style(format!("Pass {} ({})", idx + 1, kind)).bold());
        for entry in &pass.decisions {
            let outcome = match entry.outcome {
                Outcome::Executed => style("done").green(),
                Outcome::Unchanged => style("unchanged").dim(),
                Outcome::Declined => style("declined").yellow(),
            };
            println!(
                "  {:<45} {:<12} {}",
                entry.decision.migration, entry.decision.branch, outcome
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::LEDGER_DDL;
    use crate::prompt::scripted::ScriptedPrompter;
    use crate::tool::recording::RecordingTool;
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.conn().execute_batch(LEDGER_DDL).unwrap();
        db.conn()
            .execute_batch(
                "CREATE TABLE agency_company (id TEXT PRIMARY KEY);
                 CREATE TABLE agency_project (id TEXT PRIMARY KEY);
                 CREATE TABLE agency_userprofile (id INTEGER PRIMARY KEY, role TEXT);
                 INSERT INTO django_migrations (app, name, applied) VALUES
                    ('agency', '0001_initial', '2024-01-01 00:00:00'),
                    ('agency', '0010_alter_monthlycost', '2024-02-01 00:00:00');",
            )
            .unwrap();
        db
    }

    fn run(db: &Database, confirms: &[bool], inputs: &[&str]) -> (Result<i32, MendError>, Vec<String>) {
        let ledger = Ledger::new("django_migrations");
        let manifest = Manifest::builtin().unwrap();
        let mut tool = RecordingTool {
            exit_code: 3,
            ..RecordingTool::default()
        };
        let mut prompter = ScriptedPrompter::new(confirms, inputs);

        let result = Session {
            db,
            ledger: &ledger,
            manifest: &manifest,
            migrations_dir: None,
            policy: Policy::default(),
            tool: &mut tool,
            prompter: &mut prompter,
        }
        .run_menu();

        (result, tool.calls)
    }

    #[test]
    fn test_menu_choice_parse() {
        assert_eq!(MenuChoice::parse("1").unwrap(), MenuChoice::Status);
        assert_eq!(MenuChoice::parse(" 9 ").unwrap(), MenuChoice::Exit);
        assert!(matches!(MenuChoice::parse("0"), Err(MendError::InvalidChoice(_))));
        assert!(matches!(MenuChoice::parse("10"), Err(MendError::InvalidChoice(_))));
        assert!(matches!(MenuChoice::parse("status"), Err(MendError::InvalidChoice(_))));
        assert!(matches!(MenuChoice::parse(""), Err(MendError::InvalidChoice(_))));
        assert_eq!(MenuChoice::ALL.len(), MENU_ITEMS.len());
    }

    #[test]
    fn test_exit_without_tool_returns_zero() {
        let db = setup();
        let (result, calls) = run(&db, &[], &["1", "2", "3", "9"]);
        assert_eq!(result.unwrap(), 0);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_invalid_choice_ends_session() {
        let db = setup();
        let (result, _) = run(&db, &[], &["42"]);
        assert!(matches!(result, Err(MendError::InvalidChoice(_))));
    }

    #[test]
    fn test_last_tool_exit_code_is_returned() {
        let db = setup();
        let (result, calls) = run(&db, &[true], &["6", "0010", "7", "0010", "9"]);
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, vec!["migrate agency 0010", "migrate agency 0010 --fake"]);
    }

    #[test]
    fn test_declined_fake_runs_nothing() {
        let db = setup();
        let (result, calls) = run(&db, &[false], &["7", "0010", "9"]);
        assert_eq!(result.unwrap(), 0);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_reconcile_from_menu() {
        let db = setup();
        // Cleanup pass confirms the orphan, apply pass confirms both migrations
        let (result, _) = run(&db, &[true, true, true], &["4", "9"]);
        assert_eq!(result.unwrap(), 0);

        let ledger = Ledger::new("django_migrations");
        assert!(!ledger.contains(&db, "agency", "0010_alter_monthlycost").unwrap());
        assert!(ledger.contains(&db, "agency", "0005_cost").unwrap());
        assert!(Catalog::column_exists(&db, "agency_userprofile", "is_project_manager").unwrap());
    }

    #[test]
    fn test_remove_orphans_only_touches_ledger() {
        let db = setup();
        let tables_before = Catalog::tables(&db).unwrap();

        let (result, _) = run(&db, &[true], &["5", "9"]);
        assert_eq!(result.unwrap(), 0);

        let ledger = Ledger::new("django_migrations");
        assert!(!ledger.contains(&db, "agency", "0010_alter_monthlycost").unwrap());
        assert!(!ledger.contains(&db, "agency", "0005_cost").unwrap());
        assert_eq!(Catalog::tables(&db).unwrap(), tables_before);
    }

    #[test]
    fn test_failing_step_does_not_end_session() {
        let db = setup();
        db.conn().execute_batch("DROP TABLE agency_userprofile;").unwrap();

        // Reconcile fails with NotFound for the column target, menu continues
        let (result, calls) = run(&db, &[true], &["4", "6", "", "9"]);
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, vec!["migrate agency"]);
    }

    #[test]
    fn test_missing_migration_dir_does_not_block_status_or_reconcile() {
        let db = setup();
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new("django_migrations");
        let manifest = Manifest::builtin().unwrap();
        let mut tool = RecordingTool::default();
        let mut prompter = ScriptedPrompter::new(&[true, true, true], &[]);

        let mut session = Session {
            db: &db,
            ledger: &ledger,
            manifest: &manifest,
            migrations_dir: Some(dir.path().join("agency/migrations")),
            policy: Policy::default(),
            tool: &mut tool,
            prompter: &mut prompter,
        };

        assert!(session.show_status().is_ok());
        let report = session.reconcile(Policy::default()).unwrap();
        assert_eq!(report.passes.len(), 2);
        assert!(ledger.contains(&db, "agency", "0005_cost").unwrap());
    }
}
