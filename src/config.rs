//! Replay configuration.
//!
//! Settings are resolved from layers, highest priority first: command-line
//! flags (and their environment variables), a TOML config file, then
//! built-in defaults.
//!
//! ```toml
//! [postgres]
//! host = "db.internal"
//! user = "replay"
//! password = "secret"
//! dbname = "app"
//! sql_file = "capture.json"
//!
//! [pool]
//! max_open_connections = 40
//! max_lifetime_secs = 60
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ReplayError, ReplayResult};
use crate::pool::{DEFAULT_MAX_IDLE_CONNECTIONS, PoolConfig};

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "sql-replay.toml";

/// Where and how to reach the target database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub sslmode: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: String::new(),
            password: String::new(),
            dbname: String::new(),
            sslmode: "disable".to_string(),
        }
    }
}

/// `[postgres]` section. Every field is optional so layers can be merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PostgresLayer {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub dbname: Option<String>,
    pub sslmode: Option<String>,
    pub sql_file: Option<PathBuf>,
}

/// `[pool]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PoolLayer {
    pub max_open_connections: Option<u32>,
    pub max_idle_connections: Option<u32>,
    pub max_lifetime_secs: Option<u64>,
    pub max_idle_time_secs: Option<u64>,
    pub acquire_timeout_secs: Option<u64>,
}

/// One source of settings: a config file or the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigLayer {
    #[serde(default)]
    pub postgres: PostgresLayer,
    #[serde(default)]
    pub pool: PoolLayer,
}

impl ConfigLayer {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> ReplayResult<Self> {
        toml::from_str(content).map_err(|e| ReplayError::config(format!("Invalid config file: {e}")))
    }

    /// Load a config file that must exist.
    pub fn load(path: &Path) -> ReplayResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ReplayError::io(path, e))?;
        let layer = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(layer)
    }

    /// Load `explicit` if given, otherwise the first default location that
    /// exists. No file at all yields an empty layer.
    pub fn discover(explicit: Option<&Path>) -> ReplayResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match default_config_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Fill every unset field of `self` from `lower`.
    pub fn or(self, lower: ConfigLayer) -> ConfigLayer {
        let (pg, low_pg) = (self.postgres, lower.postgres);
        let (pool, low_pool) = (self.pool, lower.pool);
        ConfigLayer {
            postgres: PostgresLayer {
                host: pg.host.or(low_pg.host),
                port: pg.port.or(low_pg.port),
                user: pg.user.or(low_pg.user),
                password: pg.password.or(low_pg.password),
                dbname: pg.dbname.or(low_pg.dbname),
                sslmode: pg.sslmode.or(low_pg.sslmode),
                sql_file: pg.sql_file.or(low_pg.sql_file),
            },
            pool: PoolLayer {
                max_open_connections: pool.max_open_connections.or(low_pool.max_open_connections),
                max_idle_connections: pool.max_idle_connections.or(low_pool.max_idle_connections),
                max_lifetime_secs: pool.max_lifetime_secs.or(low_pool.max_lifetime_secs),
                max_idle_time_secs: pool.max_idle_time_secs.or(low_pool.max_idle_time_secs),
                acquire_timeout_secs: pool.acquire_timeout_secs.or(low_pool.acquire_timeout_secs),
            },
        }
    }
}

/// `./sql-replay.toml`, then `<config dir>/sql-replay/config.toml`.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("sql-replay").join("config.toml"));
    }
    paths
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub connection: ConnectionSettings,
    pub pool: PoolConfig,
    pub sql_file: Option<PathBuf>,
}

impl Settings {
    /// Apply defaults to whatever the layers left unset.
    pub fn resolve(layer: ConfigLayer) -> Self {
        let defaults = ConnectionSettings::default();
        let pg = layer.postgres;
        let connection = ConnectionSettings {
            host: pg.host.unwrap_or(defaults.host),
            port: pg.port.unwrap_or(defaults.port),
            user: pg.user.unwrap_or_default(),
            password: pg.password.unwrap_or_default(),
            dbname: pg.dbname.unwrap_or_default(),
            sslmode: pg.sslmode.unwrap_or(defaults.sslmode),
        };

        let base = PoolConfig::default();
        let max_open = layer.pool.max_open_connections.unwrap_or(base.max_open_connections);
        let pool = PoolConfig {
            max_open_connections: max_open,
            max_idle_connections: layer
                .pool
                .max_idle_connections
                .unwrap_or_else(|| DEFAULT_MAX_IDLE_CONNECTIONS.min(max_open)),
            max_lifetime: layer
                .pool
                .max_lifetime_secs
                .map(Duration::from_secs)
                .unwrap_or(base.max_lifetime),
            max_idle_time: layer
                .pool
                .max_idle_time_secs
                .map(Duration::from_secs)
                .unwrap_or(base.max_idle_time),
            acquire_timeout: layer
                .pool
                .acquire_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(base.acquire_timeout),
        };

        Self {
            connection,
            pool,
            sql_file: pg.sql_file,
        }
    }

    /// Reject runs that are missing required settings.
    pub fn validate(&self) -> ReplayResult<()> {
        if self.connection.user.is_empty() {
            return Err(ReplayError::config("Missing user name"));
        }
        if self.connection.password.is_empty() {
            return Err(ReplayError::config("Missing password"));
        }
        if self.connection.dbname.is_empty() {
            return Err(ReplayError::config("Missing database name"));
        }
        if self.sql_file.as_deref().is_none_or(|p| p.as_os_str().is_empty()) {
            return Err(ReplayError::config("Missing sql file"));
        }
        self.pool.validate()
    }

    /// The capture file path. Call after [`Settings::validate`].
    pub fn sql_file(&self) -> ReplayResult<&Path> {
        self.sql_file
            .as_deref()
            .ok_or_else(|| ReplayError::config("Missing sql file"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn complete() -> ConfigLayer {
        ConfigLayer::from_toml(
            r#"
            [postgres]
            user = "replay"
            password = "secret"
            dbname = "app"
            sql_file = "capture.json"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::resolve(complete());
        assert_eq!(settings.connection.host, "localhost");
        assert_eq!(settings.connection.port, 5432);
        assert_eq!(settings.connection.sslmode, "disable");
        assert_eq!(settings.pool, PoolConfig::default());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_higher_layer_wins() {
        let cli = ConfigLayer {
            postgres: PostgresLayer {
                host: Some("db.internal".into()),
                user: Some("cli-user".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let settings = Settings::resolve(cli.or(complete()));
        assert_eq!(settings.connection.host, "db.internal");
        assert_eq!(settings.connection.user, "cli-user");
        assert_eq!(settings.connection.password, "secret");
    }

    #[test]
    fn test_missing_fields_reported_in_order() {
        let cases = [
            ("user", "Missing user name"),
            ("password", "Missing password"),
            ("dbname", "Missing database name"),
            ("sql_file", "Missing sql file"),
        ];
        for (field, message) in cases {
            let mut layer = complete();
            match field {
                "user" => layer.postgres.user = None,
                "password" => layer.postgres.password = None,
                "dbname" => layer.postgres.dbname = None,
                _ => layer.postgres.sql_file = None,
            }
            let err = Settings::resolve(layer).validate().unwrap_err();
            assert_eq!(err.to_string(), format!("Configuration error: {message}"));
        }
    }

    #[test]
    fn test_pool_section() {
        let layer = ConfigLayer::from_toml(
            r#"
            [pool]
            max_open_connections = 20
            max_idle_connections = 4
            max_lifetime_secs = 60
            max_idle_time_secs = 5
            acquire_timeout_secs = 600
            "#,
        )
        .unwrap();
        let pool = Settings::resolve(layer).pool;
        assert_eq!(pool.max_open_connections, 20);
        assert_eq!(pool.max_idle_connections, 4);
        assert_eq!(pool.max_lifetime, Duration::from_secs(60));
        assert_eq!(pool.max_idle_time, Duration::from_secs(5));
        assert_eq!(pool.acquire_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_idle_cap_follows_small_open_cap() {
        let mut layer = complete();
        layer.pool.max_open_connections = Some(3);
        let settings = Settings::resolve(layer);
        assert_eq!(settings.pool.max_idle_connections, 3);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = ConfigLayer::from_toml("[postgres\nuser = 1").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_explicit_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.toml");
        std::fs::write(&path, "[postgres]\nport = 6543\n").unwrap();

        let layer = ConfigLayer::discover(Some(&path)).unwrap();
        assert_eq!(layer.postgres.port, Some(6543));

        let err = ConfigLayer::discover(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.is_io_error());
    }
}
