use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::MendError;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub schemamend: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const SCHEMAMEND_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            schemamend: Self::SCHEMAMEND_LEVEL.to_string(),
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.schemamend.clone();
        self.schemamend = self.schemamend.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.schemamend.as_str()) {
            eprintln!(
                "Config error: schemamend log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::SCHEMAMEND_LEVEL
            );
            self.schemamend = Self::SCHEMAMEND_LEVEL.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProjectConfig {
    /// File whose presence identifies the project root
    pub root_marker: String,
    /// SQLite database, relative to the project root unless absolute
    pub database: String,
    /// Directory holding migration files. Empty disables the on-disk check
    pub migrations_dir: String,
    /// Manifest TOML path. Empty selects the built-in agency manifest
    pub manifest: String,
}

impl ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            root_marker: "manage.py".to_owned(),
            database: "db.sqlite3".to_owned(),
            migrations_dir: "agency/migrations".to_owned(),
            manifest: String::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LedgerConfig {
    pub table: String,
}

impl LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            table: "django_migrations".to_owned(),
        }
    }

    fn ensure_valid(&mut self) {
        let trimmed = self.table.trim();
        if trimmed.is_empty() {
            eprintln!("Config error: ledger table is empty - using default of 'django_migrations'");
            self.table = Self::default().table;
        } else {
            self.table = trimmed.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolConfig {
    fn default() -> Self {
        ToolConfig {
            program: "python".to_owned(),
            args: vec!["manage.py".to_owned()],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub project: ProjectConfig,
    pub ledger: LedgerConfig,
    pub tool: ToolConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            project: ProjectConfig::default(),
            ledger: LedgerConfig::default(),
            tool: ToolConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub const PROJECT_FILE: &str = "schemamend.toml";
    const ENV_PREFIX: &str = "SCHEMAMEND_";

    /// Loads the configuration by layering, lowest precedence first:
    /// built-in defaults, the per-user config file, `schemamend.toml` in the
    /// project root, an explicitly named file and `SCHEMAMEND_*` environment
    /// variables (`__` separates sections, e.g. `SCHEMAMEND_LEDGER__TABLE`).
    pub fn load(project_root: &Path, explicit: Option<&Path>) -> Result<Self, MendError> {
        let mut config: Config = Self::figment(project_root, explicit)
            .extract()
            .map_err(Box::new)?;

        config.ensure_valid();

        Ok(config)
    }

    fn figment(project_root: &Path, explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if let Some(user_config) = Self::user_config_path() {
            figment = figment.merge(Toml::file(user_config));
        }

        figment = figment.merge(Toml::file(project_root.join(Self::PROJECT_FILE)));

        if let Some(path) = explicit {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
    }

    fn user_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "schemamend").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn database_path(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.project.database)
    }

    pub fn migrations_dir(&self, project_root: &Path) -> Option<PathBuf> {
        let dir = self.project.migrations_dir.trim();
        if dir.is_empty() {
            None
        } else {
            Some(project_root.join(dir))
        }
    }

    pub fn manifest_path(&self, project_root: &Path) -> Option<PathBuf> {
        let manifest = self.project.manifest.trim();
        if manifest.is_empty() {
            None
        } else {
            Some(project_root.join(manifest))
        }
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.ledger.ensure_valid();
    }
}
