//! Remote PostgreSQL administration over SSH
//!
//! Creates roles and databases, checks their existence, dumps and uploads
//! databases, and maintains pgpass entries on a server reached through a
//! [`Remote`] capability. [`SshRemote`] provides one over OpenSSH.

pub mod admin;
pub mod commands;
pub mod config;
pub mod pgpass;
pub mod remote;
pub mod ssh;

pub use admin::{
    create_database, create_user, database_exists, dump_database, ensure_database, ensure_user,
    import_database, set_password_file, user_exists, DatabaseOptions, DEFAULT_DUMP_FILE,
};
pub use config::Config;
pub use pgpass::PgPassEntry;
pub use remote::{Remote, RemoteError, RemoteOutput, ShellCommand};
pub use ssh::{DryRunRemote, SshRemote};
