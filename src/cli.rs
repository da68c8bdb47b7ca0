use std::collections::HashSet;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;
use log::{debug, info};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::database::Database;
use crate::error::MendError;
use crate::ledger::Ledger;
use crate::logging;
use crate::manifest::Manifest;
use crate::menu::{self, Session};
use crate::plan::{Plan, Policy};
use crate::project::Project;
use crate::prompt::{AssumeYes, Prompter, TerminalPrompter};
use crate::reconcile::Reconciler;
use crate::status::StatusReport;
use crate::tool::{ManagePy, MigrationTool};

#[derive(Parser)]
#[command(
    name = "schemamend",
    version,
    about = "schemamend: reconcile a migration ledger with the database schema"
)]
pub struct Cli {
    /// Extra configuration file, merged over schemamend.toml in the project root
    #[arg(long = "config", short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Project root (must contain the root marker, default manage.py)
    #[arg(long = "project", short = 'p', global = true, default_value = ".")]
    pub project: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Interactive numbered menu (default if no command specified)
    Menu,

    /// Show ledger records, tables and what a reconcile would do
    Status {
        /// Print as JSON
        #[arg(long = "json", default_value_t = false)]
        json: bool,
    },

    /// List tables in the database
    Tables,

    /// List migration files on disk
    Files,

    /// Bring the ledger and the schema back in line
    Reconcile {
        /// Print the plan without changing anything
        #[arg(long = "dry-run", default_value_t = false)]
        dry_run: bool,

        /// Do not ask before each change
        #[arg(long = "yes", short = 'y', default_value_t = false, conflicts_with = "dry_run")]
        yes: bool,

        /// Re-run the schema change for migrations the ledger records but whose objects are gone
        #[arg(long = "create-missing", default_value_t = false)]
        create_missing: bool,

        /// Drop and recreate tables that exist with only part of their declared shape
        #[arg(long = "recreate", default_value_t = false)]
        recreate: bool,
    },

    /// Delete ledger records whose name contains NAME. The schema is not touched
    Forget {
        name: String,

        /// Do not ask before deleting
        #[arg(long = "yes", short = 'y', default_value_t = false)]
        yes: bool,
    },

    /// Run the migration tool's status command
    #[command(name = "show-migrations")]
    ShowMigrations,

    /// Run the migration tool's migrate command
    Migrate {
        /// Migrate up to and including this step
        target: Option<String>,

        /// Only mark as applied (requires a target)
        #[arg(long = "fake", default_value_t = false, requires = "target")]
        fake: bool,
    },
}

/// Resolved project, configuration and manifest for one invocation.
struct Context {
    project: Project,
    config: Config,
    manifest: Manifest,
}

impl Context {
    fn open_db(&self) -> Result<Database, MendError> {
        Database::connect(&self.config.database_path(self.project.root()))
    }

    fn ledger(&self) -> Ledger {
        Ledger::new(&self.config.ledger.table)
    }

    fn files_on_disk(&self) -> Result<Option<HashSet<String>>, MendError> {
        self.config
            .migrations_dir(self.project.root())
            .map(|dir| Project::migration_file_set(&dir))
            .transpose()
            .map(Option::flatten)
    }

    fn tool(&self) -> ManagePy {
        ManagePy::new(&self.config.tool, self.project.root())
    }
}

impl Cli {
    /// Parse arguments, run the command and return the process exit code.
    pub fn handle_command_line() -> Result<i32, MendError> {
        let args = Cli::parse();

        let config = Config::load(&args.project, args.config.as_deref())?;
        let _logger = logging::init(&config.logging)?;
        debug!("Configuration: {:?}", config);

        let project = Project::locate(&args.project, &config.project.root_marker)?;
        let manifest_path = config.manifest_path(project.root());
        let manifest = Manifest::load(manifest_path.as_deref())?;
        info!(
            "Project {} - app '{}', {} declared migration(s)",
            project.root().display(),
            manifest.app,
            manifest.migrations.len()
        );

        let ctx = Context {
            project,
            config,
            manifest,
        };

        Self::dispatch(&ctx, args.command.unwrap_or(Command::Menu))
    }

    fn dispatch(ctx: &Context, command: Command) -> Result<i32, MendError> {
        match command {
            Command::Menu => Self::menu(ctx),
            Command::Status { json } => Self::status(ctx, json).map(|_| 0),
            Command::Tables => Self::tables(ctx).map(|_| 0),
            Command::Files => Self::files(ctx).map(|_| 0),
            Command::Reconcile {
                dry_run,
                yes,
                create_missing,
                recreate,
            } => {
                let policy = Policy {
                    create_missing,
                    recreate_partial: recreate,
                };
                Self::reconcile(ctx, policy, dry_run, yes).map(|_| 0)
            }
            Command::Forget { name, yes } => Self::forget(ctx, &name, yes).map(|_| 0),
            Command::ShowMigrations => ctx.tool().show_status(&ctx.manifest.app),
            Command::Migrate { target, fake } => {
                let mut tool = ctx.tool();
                match (target, fake) {
                    (Some(target), true) => tool.fake(&ctx.manifest.app, &target),
                    (target, _) => tool.migrate(&ctx.manifest.app, target.as_deref()),
                }
            }
        }
    }

    fn menu(ctx: &Context) -> Result<i32, MendError> {
        let db = ctx.open_db()?;
        let ledger = ctx.ledger();
        ledger.ensure_exists(&db)?;
        let mut tool = ctx.tool();
        let mut prompter = TerminalPrompter::new();

        Session {
            db: &db,
            ledger: &ledger,
            manifest: &ctx.manifest,
            migrations_dir: ctx.config.migrations_dir(ctx.project.root()),
            policy: Policy::default(),
            tool: &mut tool,
            prompter: &mut prompter,
        }
        .run_menu()
    }

    fn status(ctx: &Context, json: bool) -> Result<(), MendError> {
        let db = ctx.open_db()?;
        let files = ctx.files_on_disk()?;
        let report = StatusReport::gather(
            &db,
            &ctx.ledger(),
            &ctx.manifest,
            files.as_ref(),
            Policy::default(),
        )?;

        if json {
            println!("{}", report.to_json()?);
        } else {
            print!("{}", report.render());
        }
        Ok(())
    }

    fn tables(ctx: &Context) -> Result<(), MendError> {
        let db = ctx.open_db()?;
        for table in Catalog::tables(&db)? {
            println!("{}", table);
        }
        Ok(())
    }

    fn files(ctx: &Context) -> Result<(), MendError> {
        let dir = ctx
            .config
            .migrations_dir(ctx.project.root())
            .ok_or_else(|| MendError::Error("No migration directory configured".into()))?;
        for name in Project::migration_files(&dir)? {
            println!("{}", name);
        }
        Ok(())
    }

    fn reconcile(ctx: &Context, policy: Policy, dry_run: bool, yes: bool) -> Result<(), MendError> {
        let db = ctx.open_db()?;
        let ledger = ctx.ledger();
        let mut reconciler = Reconciler::new(&db, &ledger, &ctx.manifest).with_policy(policy);
        if let Some(files) = ctx.files_on_disk()? {
            reconciler = reconciler.with_files_on_disk(files);
        }

        if dry_run {
            let plan = reconciler.plan()?;
            print_plan(&plan);
            if plan.is_cleanup() {
                println!();
                println!("{}", style("Apply pass after cleanup").bold());
                print_plan(&reconciler.apply_plan()?);
            }
            return Ok(());
        }

        let mut assume_yes = AssumeYes;
        let mut terminal;
        let prompter: &mut dyn Prompter = if yes {
            &mut assume_yes
        } else {
            terminal = TerminalPrompter::new();
            &mut terminal
        };

        let report = reconciler.run(prompter)?;
        menu::print_report(&report);
        Ok(())
    }

    fn forget(ctx: &Context, name: &str, yes: bool) -> Result<(), MendError> {
        let db = ctx.open_db()?;
        let ledger = ctx.ledger();
        let records = ledger.find_matching(&db, &ctx.manifest.app, name)?;

        if records.is_empty() {
            println!("No ledger records for '{}' match '{}'", ctx.manifest.app, name);
            return Ok(());
        }

        let mut prompter = TerminalPrompter::new();
        for record in records {
            let prompt = format!(
                "Delete ledger record {}.{} (id={}, applied {})?",
                record.app(),
                record.name(),
                record.id(),
                record.applied()
            );
            if yes || prompter.confirm(&prompt)? {
                ledger.delete(&db, record.id())?;
                println!("{} {}", style("Removed").green(), record.name());
            }
        }
        Ok(())
    }
}

fn print_plan(plan: &Plan) {
    if plan.is_cleanup() {
        println!("{}", style("Ledger cleanup pass (schema untouched)").bold());
    }
    for decision in &plan.decisions {
        println!("{:<45} {}", decision.migration, decision.branch);
        for action in &decision.actions {
            println!("    - {}", action);
        }
    }
    if plan.is_noop() {
        println!("{}", style("Ledger and schema are in sync").green());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_parsing_no_command_defaults_to_menu() {
        let cli = Cli::try_parse_from(["schemamend"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.project, PathBuf::from("."));
        assert_eq!(cli.command.unwrap_or(Command::Menu), Command::Menu);
    }

    #[test]
    fn test_cli_parsing_reconcile_flags() {
        let cli = Cli::try_parse_from([
            "schemamend",
            "reconcile",
            "--yes",
            "--create-missing",
            "--project",
            "/srv/app",
        ])
        .unwrap();
        assert_eq!(cli.project, PathBuf::from("/srv/app"));
        assert_eq!(
            cli.command,
            Some(Command::Reconcile {
                dry_run: false,
                yes: true,
                create_missing: true,
                recreate: false,
            })
        );
    }

    #[test]
    fn test_cli_dry_run_conflicts_with_yes() {
        assert!(Cli::try_parse_from(["schemamend", "reconcile", "--dry-run", "--yes"]).is_err());
    }

    #[test]
    fn test_cli_fake_requires_target() {
        assert!(Cli::try_parse_from(["schemamend", "migrate", "--fake"]).is_err());

        let cli = Cli::try_parse_from(["schemamend", "migrate", "0010", "--fake"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Migrate {
                target: Some("0010".into()),
                fake: true
            })
        );
    }

    #[test]
    fn test_cli_forget_and_tool_commands() {
        let cli = Cli::try_parse_from(["schemamend", "forget", "monthlycost", "-y"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Forget {
                name: "monthlycost".into(),
                yes: true
            })
        );

        let cli = Cli::try_parse_from(["schemamend", "show-migrations"]).unwrap();
        assert_eq!(cli.command, Some(Command::ShowMigrations));
    }

    #[test]
    fn test_cli_parsing_invalid_arguments() {
        assert!(Cli::try_parse_from(["schemamend", "nonexistent-command"]).is_err());
        assert!(Cli::try_parse_from(["schemamend", "status", "--invalid-flag"]).is_err());
    }
}
