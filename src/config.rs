use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use std::str::FromStr;

pub const POSTGRES_HOST_ENV: &str = "POSTGRES_HOST";
pub const POSTGRES_PORT_ENV: &str = "HOST_PORT";
pub const POSTGRES_DB_ENV: &str = "POSTGRES_DB";
pub const POSTGRES_USER_ENV: &str = "POSTGRES_USER";
pub const POSTGRES_PASSWORD_ENV: &str = "POSTGRES_PASSWORD";

const DEFAULT_POSTGRES_HOST: &str = "localhost";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub database: Option<DatabaseSection>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl Config {
    /// Loads the config file when one is given; otherwise every setting keeps
    /// its default.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let toml =
            fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&toml)
    }

    pub fn from_toml_str(toml: &str) -> anyhow::Result<Self> {
        toml.parse()
    }

    pub fn sqlite_path(&self) -> Option<&Path> {
        self.database
            .as_ref()
            .and_then(|database| database.sqlite_path.as_deref())
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        toml::from_str(s).context("parse config TOML")
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    /// Write to this SQLite file instead of PostgreSQL.
    pub sqlite_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// PostgreSQL connection parameters, sourced from the environment.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    password: String,
}

impl DatabaseConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from a variable lookup. An empty or unset host falls
    /// back to `localhost`; everything else is required.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |name: &str| {
            lookup(name).ok_or_else(|| anyhow!("environment variable `{name}` is not set"))
        };

        let host = lookup(POSTGRES_HOST_ENV)
            .filter(|host| !host.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_POSTGRES_HOST.to_owned());
        let raw_port = required(POSTGRES_PORT_ENV)?;
        let port = raw_port.trim().parse::<u16>().map_err(|_| {
            anyhow!("environment variable `{POSTGRES_PORT_ENV}` must be a port number, got `{raw_port}`")
        })?;

        Ok(Self {
            host,
            port,
            database: required(POSTGRES_DB_ENV)?,
            user: required(POSTGRES_USER_ENV)?,
            password: required(POSTGRES_PASSWORD_ENV)?,
        })
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}
