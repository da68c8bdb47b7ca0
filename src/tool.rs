use std::path::{Path, PathBuf};
use std::process::Command;

use log::{error, info};

use crate::config::ToolConfig;
use crate::error::MendError;

/// The application's own migration command.
///
/// Methods return the tool's exit code so the caller can pass it through as
/// this process's exit status.
pub trait MigrationTool {
    /// Print which migrations the framework considers applied.
    fn show_status(&mut self, app: &str) -> Result<i32, MendError>;

    /// Apply migrations of `app`, up to and including `target` when given.
    fn migrate(&mut self, app: &str, target: Option<&str>) -> Result<i32, MendError>;

    /// Mark migrations up to `target` as applied without running them.
    fn fake(&mut self, app: &str, target: &str) -> Result<i32, MendError>;
}

/// Runs `manage.py`-style commands in the project root with inherited stdio.
pub struct ManagePy {
    program: String,
    base_args: Vec<String>,
    cwd: PathBuf,
}

impl ManagePy {
    pub fn new(config: &ToolConfig, project_root: &Path) -> Self {
        ManagePy {
            program: config.program.clone(),
            base_args: config.args.clone(),
            cwd: project_root.to_path_buf(),
        }
    }

    pub fn status_args(&self, app: &str) -> Vec<String> {
        self.with_base(["showmigrations", app])
    }

    pub fn migrate_args(&self, app: &str, target: Option<&str>, fake: bool) -> Vec<String> {
        let mut args = self.with_base(["migrate", app]);
        if let Some(target) = target {
            args.push(target.to_owned());
        }
        if fake {
            args.push("--fake".to_owned());
        }
        args
    }

    fn with_base<const N: usize>(&self, extra: [&str; N]) -> Vec<String> {
        let mut args = self.base_args.clone();
        args.extend(extra.iter().map(|s| s.to_string()));
        args
    }

    fn run(&self, args: Vec<String>) -> Result<i32, MendError> {
        info!("Running: {} {}", self.program, args.join(" "));

        let status = Command::new(&self.program)
            .args(&args)
            .current_dir(&self.cwd)
            .status()
            .map_err(|e| {
                MendError::Error(format!("Failed to start '{}': {}", self.program, e))
            })?;

        // Killed by a signal: no code, report as a generic failure
        let code = status.code().unwrap_or(1);
        if code == 0 {
            info!("{} exited successfully", self.program);
        } else {
            error!("{} exited with status {}", self.program, code);
        }

        Ok(code)
    }
}

impl MigrationTool for ManagePy {
    fn show_status(&mut self, app: &str) -> Result<i32, MendError> {
        self.run(self.status_args(app))
    }

    fn migrate(&mut self, app: &str, target: Option<&str>) -> Result<i32, MendError> {
        self.run(self.migrate_args(app, target, false))
    }

    fn fake(&mut self, app: &str, target: &str) -> Result<i32, MendError> {
        self.run(self.migrate_args(app, Some(target), true))
    }
}

#[cfg(test)]
pub mod recording {
    use super::*;

    /// Records invocations instead of running anything.
    #[derive(Default)]
    pub struct RecordingTool {
        pub calls: Vec<String>,
        pub exit_code: i32,
    }

    impl MigrationTool for RecordingTool {
        fn show_status(&mut self, app: &str) -> Result<i32, MendError> {
            self.calls.push(format!("showmigrations {}", app));
            Ok(self.exit_code)
        }

        fn migrate(&mut self, app: &str, target: Option<&str>) -> Result<i32, MendError> {
            self.calls
                .push(format!("migrate {} {}", app, target.unwrap_or("")).trim_end().to_owned());
            Ok(self.exit_code)
        }

        fn fake(&mut self, app: &str, target: &str) -> Result<i32, MendError> {
            self.calls.push(format!("migrate {} {} --fake", app, target));
            Ok(self.exit_code)
        }
    }
}
