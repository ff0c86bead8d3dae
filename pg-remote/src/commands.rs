//! Shell command templates for PostgreSQL administration
//!
//! The text is kept byte-for-byte stable; values are interpolated as given.

use crate::remote::ShellCommand;
use uuid::Uuid;

/// Remote pgpass file of the connecting user.
pub const PGPASS_PATH: &str = "~/.pgpass";

/// Count roles named `name` (unaligned, tuples only).
pub fn count_user(name: &str) -> ShellCommand {
    ShellCommand::new(format!(
        r#"psql -t -A -c "SELECT COUNT(*) FROM pg_user WHERE usename = '{name}';""#
    ))
}

pub fn create_user(name: &str, password: &str) -> ShellCommand {
    ShellCommand::new(format!(
        r#"psql -c "CREATE USER {name} WITH PASSWORD '{password}';""#
    ))
    .with_secret(format!("'{password}'"))
}

/// Connect to `name` and run an empty query.
pub fn probe_database(name: &str) -> ShellCommand {
    ShellCommand::new(format!(r#"psql -d {name} -c """#))
}

pub fn create_database(
    name: &str,
    owner: &str,
    template: &str,
    encoding: &str,
    locale: &str,
) -> ShellCommand {
    ShellCommand::new(format!(
        "createdb --owner {owner} --template {template} --encoding={encoding} \
         --lc-ctype={locale} --lc-collate={locale} {name}"
    ))
}

/// Plain-SQL dump without ownership or ACL clauses, written to `remote_path`.
pub fn dump_database(name: &str, owner: &str, remote_path: &str) -> ShellCommand {
    ShellCommand::new(format!(
        r#"pg_dump -w -h localhost -U {owner} --format plain --no-owner --no-acl --file "{remote_path}" {name}"#
    ))
}

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'\''"#))
}

/// Append `line` to `path` unless an identical line is already there.
///
/// `printf` writes the line verbatim; `echo` under dash would expand backslashes.
pub fn append_line_if_absent(path: &str, line: &str) -> ShellCommand {
    let quoted = shell_quote(line);
    ShellCommand::new(format!(
        r#"grep -qxF -- {quoted} {path} 2>/dev/null || printf '%s\n' {quoted} >> {path}"#
    ))
    .with_secret(quoted)
}

pub fn chmod_pgpass() -> ShellCommand {
    ShellCommand::new(format!("chmod 0600 {PGPASS_PATH}"))
}

/// Fresh temporary path on the remote host.
pub fn temp_path() -> String {
    format!("/tmp/{}", Uuid::new_v4())
}
