//! Connection configuration and the deferred-database proxy.

use phoebe_core::{OrmError, OrmResult};
use phoebe_db::Dialect;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Configuration for connecting to a database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// The target dialect.
    pub dialect: Dialect,
    /// The database name or file path.
    pub name: String,
    /// The database host (for network backends).
    pub host: Option<String>,
    /// The database port.
    pub port: Option<u16>,
    /// The database user.
    pub user: Option<String>,
    /// The database password.
    pub password: Option<String>,
    /// Additional connection options.
    pub options: HashMap<String, String>,
}

impl DatabaseConfig {
    /// Configuration for an in-memory SQLite database.
    pub fn sqlite_memory() -> Self {
        Self {
            dialect: Dialect::Sqlite,
            name: ":memory:".to_string(),
            host: None,
            port: None,
            user: None,
            password: None,
            options: HashMap::new(),
        }
    }

    /// Configuration for a SQLite file database.
    pub fn sqlite_file(path: impl Into<String>) -> Self {
        Self {
            name: path.into(),
            ..Self::sqlite_memory()
        }
    }

    /// Configuration for a PostgreSQL database.
    pub fn postgres(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            dialect: Dialect::Postgres,
            name: name.into(),
            host: Some(host.into()),
            port: Some(port),
            user: Some(user.into()),
            password: Some(password.into()),
            options: HashMap::new(),
        }
    }

    /// Configuration for a MySQL database.
    pub fn mysql(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            dialect: Dialect::MySql,
            name: name.into(),
            host: Some(host.into()),
            port: Some(port),
            user: Some(user.into()),
            password: Some(password.into()),
            options: HashMap::new(),
        }
    }
}

/// A placeholder for a database (or any resource) whose configuration is not
/// known at declaration time.
///
/// Code can be written against the proxy and the real object supplied later,
/// exactly once. Using the proxy before initialization is
/// `ImproperlyConfigured`.
pub struct Proxy<T> {
    inner: OnceLock<T>,
}

impl<T> Proxy<T> {
    /// Creates an uninitialized proxy.
    pub const fn new() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    /// Supplies the real object. Fails if already initialized.
    pub fn initialize(&self, value: T) -> OrmResult<()> {
        self.inner.set(value).map_err(|_| {
            OrmError::ImproperlyConfigured("proxy is already initialized".to_string())
        })
    }

    /// Returns the real object, or `ImproperlyConfigured` before
    /// initialization.
    pub fn get(&self) -> OrmResult<&T> {
        self.inner.get().ok_or_else(|| {
            OrmError::ImproperlyConfigured(
                "database proxy used before initialization".to_string(),
            )
        })
    }

    /// Whether the proxy has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.inner.get().is_some()
    }
}

impl<T> Default for Proxy<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_memory_config() {
        let cfg = DatabaseConfig::sqlite_memory();
        assert_eq!(cfg.dialect, Dialect::Sqlite);
        assert_eq!(cfg.name, ":memory:");
        assert!(cfg.host.is_none());
    }

    #[test]
    fn test_postgres_config() {
        let cfg = DatabaseConfig::postgres("app", "localhost", 5432, "app", "secret");
        assert_eq!(cfg.dialect, Dialect::Postgres);
        assert_eq!(cfg.port, Some(5432));
        assert_eq!(cfg.user.as_deref(), Some("app"));
    }

    #[test]
    fn test_mysql_config() {
        let cfg = DatabaseConfig::mysql("app", "localhost", 3306, "root", "secret");
        assert_eq!(cfg.dialect, Dialect::MySql);
        assert_eq!(cfg.port, Some(3306));
    }

    #[test]
    fn test_proxy_lifecycle() {
        let proxy: Proxy<u32> = Proxy::new();
        assert!(!proxy.is_initialized());
        assert!(matches!(
            proxy.get(),
            Err(OrmError::ImproperlyConfigured(_))
        ));

        proxy.initialize(7).unwrap();
        assert_eq!(*proxy.get().unwrap(), 7);
        assert!(proxy.initialize(8).is_err());
    }
}
