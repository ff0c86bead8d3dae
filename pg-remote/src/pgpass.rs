//! pgpass credential lines

use std::fmt;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: &str = "5432";

/// One `host:port:database:username:password` record.
#[derive(Clone, PartialEq, Eq)]
pub struct PgPassEntry {
    pub host: String,
    pub port: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl PgPassEntry {
    /// Entry for the local server on the default port.
    pub fn new(username: &str, password: &str, database: &str) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT.to_string(),
            database: database.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn port(mut self, port: &str) -> Self {
        self.port = port.to_string();
        self
    }

    pub fn line(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.host, self.port, self.database, self.username, self.password
        )
    }
}

impl fmt::Debug for PgPassEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgPassEntry")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_line() {
        let entry = PgPassEntry::new("dbuser", "pw", "myapp");
        assert_eq!(entry.line(), "localhost:5432:myapp:dbuser:pw");
    }

    #[test]
    fn test_custom_host_and_port() {
        let entry = PgPassEntry::new("dbuser", "pw", "myapp")
            .host("db.internal")
            .port("6432");
        assert_eq!(entry.line(), "db.internal:6432:myapp:dbuser:pw");
    }

    #[test]
    fn test_debug_hides_password() {
        let entry = PgPassEntry::new("dbuser", "topsecret", "myapp");
        assert!(!format!("{:?}", entry).contains("topsecret"));
    }
}
