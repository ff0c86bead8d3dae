//! PostgreSQL role and database administration over a [`Remote`]
//!
//! Each operation is a single remote command (dumps add one download). Nothing is
//! retried. Existence checks turn an unsuccessful command into `false`; everything
//! else propagates the failure.

use crate::commands::{self, PGPASS_PATH};
use crate::pgpass::PgPassEntry;
use crate::remote::Remote;
use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

/// Default local file for dumps and imports.
pub const DEFAULT_DUMP_FILE: &str = "dump.sql";

/// Settings passed to `createdb`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseOptions {
    pub template: String,
    pub encoding: String,
    pub locale: String,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            template: "template0".to_string(),
            encoding: "UTF8".to_string(),
            locale: "en_US.UTF-8".to_string(),
        }
    }
}

/// Check if a PostgreSQL role exists.
///
/// True only when the query prints exactly `1`.
pub fn user_exists<R: Remote + ?Sized>(remote: &R, name: &str) -> Result<bool> {
    let output = remote.run_as_superuser(&commands::count_user(name))?;
    if !output.succeeded {
        debug!(user = %name, output = %output.output, "Role lookup failed, treating as absent");
        return Ok(false);
    }
    Ok(output.output.trim() == "1")
}

/// Create a PostgreSQL role. Fails if the role already exists.
pub fn create_user<R: Remote + ?Sized>(remote: &R, name: &str, password: &str) -> Result<()> {
    info!(user = %name, "Creating role");
    let cmd = commands::create_user(name, password);
    remote
        .run_as_superuser(&cmd)?
        .into_checked(&cmd)
        .context(format!("Failed to create role {}", name))?;
    Ok(())
}

/// Create the role unless it exists. Returns whether it was created.
pub fn ensure_user<R: Remote + ?Sized>(remote: &R, name: &str, password: &str) -> Result<bool> {
    if user_exists(remote, name)? {
        debug!(user = %name, "Role already exists");
        return Ok(false);
    }
    create_user(remote, name, password)?;
    Ok(true)
}

/// Check if a database accepts connections.
pub fn database_exists<R: Remote + ?Sized>(remote: &R, name: &str) -> Result<bool> {
    let output = remote.run_as_superuser(&commands::probe_database(name))?;
    if !output.succeeded {
        debug!(database = %name, output = %output.output, "Database probe failed");
    }
    Ok(output.succeeded)
}

/// Create a database. Fails if it exists or `owner` is not a role.
pub fn create_database<R: Remote + ?Sized>(
    remote: &R,
    name: &str,
    owner: &str,
    options: &DatabaseOptions,
) -> Result<()> {
    info!(database = %name, owner = %owner, template = %options.template, "Creating database");
    let cmd = commands::create_database(
        name,
        owner,
        &options.template,
        &options.encoding,
        &options.locale,
    );
    remote
        .run_as_superuser(&cmd)?
        .into_checked(&cmd)
        .context(format!("Failed to create database {}", name))?;
    Ok(())
}

/// Create the database unless it exists. Returns whether it was created.
pub fn ensure_database<R: Remote + ?Sized>(
    remote: &R,
    name: &str,
    owner: &str,
    options: &DatabaseOptions,
) -> Result<bool> {
    if database_exists(remote, name)? {
        debug!(database = %name, "Database already exists");
        return Ok(false);
    }
    create_database(remote, name, owner, options)?;
    Ok(true)
}

/// Dump `name` as plain SQL on the remote host and download it to `output`.
///
/// Returns the remote temporary path. The remote file is left in place.
pub fn dump_database<R: Remote + ?Sized>(
    remote: &R,
    name: &str,
    owner: &str,
    output: &Path,
) -> Result<String> {
    let tmp = commands::temp_path();
    info!(database = %name, remote_path = %tmp, local_path = %output.display(), "Dumping database");

    let cmd = commands::dump_database(name, owner, &tmp);
    remote
        .run(&cmd)?
        .into_checked(&cmd)
        .context(format!("Failed to dump database {}", name))?;

    remote
        .download(&tmp, output)
        .context(format!("Failed to download dump of {}", name))?;

    Ok(tmp)
}

/// Upload a local dump to a temporary remote path and return that path.
///
/// The dump is not restored into any database.
pub fn import_database<R: Remote + ?Sized>(remote: &R, source: &Path) -> Result<String> {
    let tmp = commands::temp_path();
    info!(local_path = %source.display(), remote_path = %tmp, "Uploading dump");
    remote
        .upload(source, &tmp)
        .context(format!("Failed to upload {}", source.display()))?;
    Ok(tmp)
}

/// Ensure the connecting user's pgpass file holds `entry`, then restrict it to 0600.
pub fn set_password_file<R: Remote + ?Sized>(remote: &R, entry: &PgPassEntry) -> Result<()> {
    info!(
        host = %entry.host,
        port = %entry.port,
        database = %entry.database,
        user = %entry.username,
        "Updating pgpass"
    );
    remote
        .append_line_if_absent(PGPASS_PATH, &entry.line())
        .context("Failed to update pgpass file")?;

    let cmd = commands::chmod_pgpass();
    remote
        .run(&cmd)?
        .into_checked(&cmd)
        .context("Failed to set pgpass permissions")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RemoteError, RemoteOutput, ShellCommand};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Run(String),
        Superuser(String),
        Upload(PathBuf, String),
        Download(String, PathBuf),
        Append(String, String),
    }

    /// Records every call and replays scripted command results in order.
    #[derive(Default)]
    struct RecordingRemote {
        calls: RefCell<Vec<Call>>,
        outputs: RefCell<VecDeque<RemoteOutput>>,
    }

    impl RecordingRemote {
        fn replying(outputs: Vec<RemoteOutput>) -> Self {
            Self {
                calls: RefCell::default(),
                outputs: RefCell::new(outputs.into()),
            }
        }

        fn next(&self) -> RemoteOutput {
            self.outputs
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| RemoteOutput::success(""))
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.borrow().clone()
        }
    }

    impl Remote for RecordingRemote {
        fn run(&self, command: &ShellCommand) -> Result<RemoteOutput> {
            self.calls.borrow_mut().push(Call::Run(command.as_str().to_string()));
            Ok(self.next())
        }

        fn run_as_superuser(&self, command: &ShellCommand) -> Result<RemoteOutput> {
            self.calls
                .borrow_mut()
                .push(Call::Superuser(command.as_str().to_string()));
            Ok(self.next())
        }

        fn upload(&self, local: &Path, remote: &str) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(Call::Upload(local.to_path_buf(), remote.to_string()));
            Ok(())
        }

        fn download(&self, remote: &str, local: &Path) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(Call::Download(remote.to_string(), local.to_path_buf()));
            Ok(())
        }

        fn append_line_if_absent(&self, remote_path: &str, line: &str) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(Call::Append(remote_path.to_string(), line.to_string()));
            Ok(())
        }
    }

    /// Transport that cannot reach the host.
    struct UnreachableRemote;

    impl Remote for UnreachableRemote {
        fn run(&self, _: &ShellCommand) -> Result<RemoteOutput> {
            anyhow::bail!("connection refused")
        }

        fn run_as_superuser(&self, _: &ShellCommand) -> Result<RemoteOutput> {
            anyhow::bail!("connection refused")
        }

        fn upload(&self, _: &Path, _: &str) -> Result<()> {
            anyhow::bail!("connection refused")
        }

        fn download(&self, _: &str, _: &Path) -> Result<()> {
            anyhow::bail!("connection refused")
        }

        fn append_line_if_absent(&self, _: &str, _: &str) -> Result<()> {
            anyhow::bail!("connection refused")
        }
    }

    #[test]
    fn test_user_exists_only_on_literal_one() {
        let remote = RecordingRemote::replying(vec![RemoteOutput::success("1")]);
        assert!(user_exists(&remote, "dbuser").unwrap());
        assert_eq!(
            remote.calls(),
            vec![Call::Superuser(
                r#"psql -t -A -c "SELECT COUNT(*) FROM pg_user WHERE usename = 'dbuser';""#
                    .to_string()
            )]
        );

        for output in ["0", "", "2", "1\n1", "count\n1"] {
            let remote = RecordingRemote::replying(vec![RemoteOutput::success(output)]);
            assert!(!user_exists(&remote, "dbuser").unwrap(), "output {:?}", output);
        }
    }

    #[test]
    fn test_user_exists_swallows_command_failure() {
        let remote = RecordingRemote::replying(vec![RemoteOutput::failure("1")]);
        assert!(!user_exists(&remote, "dbuser").unwrap());
    }

    #[test]
    fn test_user_exists_propagates_transport_error() {
        assert!(user_exists(&UnreachableRemote, "dbuser").is_err());
    }

    #[test]
    fn test_create_user_runs_as_superuser() {
        let remote = RecordingRemote::default();
        create_user(&remote, "dbuser", "somerandomstring").unwrap();
        assert_eq!(
            remote.calls(),
            vec![Call::Superuser(
                r#"psql -c "CREATE USER dbuser WITH PASSWORD 'somerandomstring';""#.to_string()
            )]
        );
    }

    #[test]
    fn test_create_user_failure_propagates_without_password() {
        let remote = RecordingRemote::replying(vec![RemoteOutput::failure(
            "ERROR:  role \"dbuser\" already exists",
        )]);
        let err = create_user(&remote, "dbuser", "somerandomstring").unwrap_err();
        assert!(err.downcast_ref::<RemoteError>().is_some());
        assert!(!format!("{:#}", err).contains("somerandomstring"));
    }

    #[test]
    fn test_ensure_user_skips_existing_role() {
        let remote = RecordingRemote::replying(vec![RemoteOutput::success("1")]);
        assert!(!ensure_user(&remote, "dbuser", "pw").unwrap());
        assert_eq!(remote.calls().len(), 1);

        let remote = RecordingRemote::replying(vec![RemoteOutput::success("0")]);
        assert!(ensure_user(&remote, "dbuser", "pw").unwrap());
        assert_eq!(remote.calls().len(), 2);
    }

    #[test]
    fn test_database_exists_follows_success_flag() {
        let remote = RecordingRemote::replying(vec![RemoteOutput::success("")]);
        assert!(database_exists(&remote, "myapp").unwrap());
        assert_eq!(
            remote.calls(),
            vec![Call::Superuser(r#"psql -d myapp -c """#.to_string())]
        );

        let remote = RecordingRemote::replying(vec![RemoteOutput::success("garbage")]);
        assert!(database_exists(&remote, "myapp").unwrap());

        let remote = RecordingRemote::replying(vec![RemoteOutput::failure(
            "FATAL:  database \"myapp\" does not exist",
        )]);
        assert!(!database_exists(&remote, "myapp").unwrap());
    }

    #[test]
    fn test_create_database_defaults() {
        let remote = RecordingRemote::default();
        create_database(&remote, "myapp", "dbuser", &DatabaseOptions::default()).unwrap();

        let calls = remote.calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            Call::Superuser(cmd) => {
                assert!(cmd.starts_with("createdb "));
                assert!(cmd.contains(
                    "--owner dbuser --template template0 --encoding=UTF8 \
                     --lc-ctype=en_US.UTF-8 --lc-collate=en_US.UTF-8 myapp"
                ));
            }
            other => panic!("unexpected call {:?}", other),
        }
    }

    #[test]
    fn test_create_database_failure_propagates() {
        let remote = RecordingRemote::replying(vec![RemoteOutput::failure("exists")]);
        let options = DatabaseOptions {
            template: "template1".to_string(),
            ..DatabaseOptions::default()
        };
        assert!(create_database(&remote, "myapp", "dbuser", &options).is_err());
    }

    #[test]
    fn test_ensure_database_creates_missing() {
        let remote = RecordingRemote::replying(vec![RemoteOutput::failure("")]);
        assert!(ensure_database(&remote, "myapp", "dbuser", &DatabaseOptions::default()).unwrap());
        assert_eq!(remote.calls().len(), 2);

        let remote = RecordingRemote::replying(vec![RemoteOutput::success("")]);
        assert!(!ensure_database(&remote, "myapp", "dbuser", &DatabaseOptions::default()).unwrap());
        assert_eq!(remote.calls().len(), 1);
    }

    #[test]
    fn test_dump_runs_then_downloads_temp_file() {
        let remote = RecordingRemote::default();
        let tmp = dump_database(&remote, "myapp", "dbuser", Path::new("out.sql")).unwrap();

        let calls = remote.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            Call::Run(format!(
                r#"pg_dump -w -h localhost -U dbuser --format plain --no-owner --no-acl --file "{}" myapp"#,
                tmp
            ))
        );
        assert_eq!(calls[1], Call::Download(tmp.clone(), PathBuf::from("out.sql")));
        assert!(tmp.starts_with("/tmp/"));
    }

    #[test]
    fn test_failed_dump_skips_download() {
        let remote = RecordingRemote::replying(vec![RemoteOutput::failure("pg_dump: error")]);
        assert!(dump_database(&remote, "myapp", "dbuser", Path::new(DEFAULT_DUMP_FILE)).is_err());
        assert_eq!(remote.calls().len(), 1);
    }

    #[test]
    fn test_import_only_uploads() {
        let remote = RecordingRemote::default();
        let tmp = import_database(&remote, Path::new(DEFAULT_DUMP_FILE)).unwrap();
        assert_eq!(
            remote.calls(),
            vec![Call::Upload(PathBuf::from("dump.sql"), tmp.clone())]
        );
        assert!(tmp.starts_with("/tmp/"));
    }

    #[test]
    fn test_set_password_file_appends_then_chmods() {
        let remote = RecordingRemote::default();
        let entry = PgPassEntry::new("dbuser", "pw", "myapp");
        set_password_file(&remote, &entry).unwrap();
        assert_eq!(
            remote.calls(),
            vec![
                Call::Append(
                    "~/.pgpass".to_string(),
                    "localhost:5432:myapp:dbuser:pw".to_string()
                ),
                Call::Run("chmod 0600 ~/.pgpass".to_string()),
            ]
        );
    }

    #[test]
    fn test_set_password_file_propagates_transport_error() {
        let entry = PgPassEntry::new("dbuser", "pw", "myapp");
        assert!(set_password_file(&UnreachableRemote, &entry).is_err());
    }
}
