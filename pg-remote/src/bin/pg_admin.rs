//! pg-admin - PostgreSQL role and database administration over SSH
//!
//! Usage: pg-admin <action> [args...]
//! The server is configured through PG_REMOTE_* variables or a YAML file
//! named by PG_REMOTE_CONFIG.

use anyhow::Result;
use common::init_logging;
use pg_remote::{
    admin, Config, DatabaseOptions, DryRunRemote, PgPassEntry, Remote, SshRemote,
    DEFAULT_DUMP_FILE,
};
use std::env;
use std::path::Path;
use tracing::{info, warn};

const USAGE: &str = "\
Usage: pg-admin <action> [args...]

Actions:
  user-exists NAME
  create-user NAME PASSWORD
  ensure-user NAME PASSWORD
  database-exists NAME
  create-database NAME OWNER [TEMPLATE [ENCODING [LOCALE]]]
  ensure-database NAME OWNER [TEMPLATE [ENCODING [LOCALE]]]
  dump-database NAME OWNER [OUTPUT]
  import-database [SOURCE]
  set-password-file USERNAME PASSWORD DATABASE [HOST [PORT]]

Environment:
  PG_REMOTE_HOST (required), PG_REMOTE_PORT, PG_REMOTE_USER, PG_REMOTE_IDENTITY,
  PG_REMOTE_IDENTITY_PASSPHRASE, PG_REMOTE_SSH_PASSWORD, PG_REMOTE_ACCEPT_UNKNOWN_HOSTS,
  PG_REMOTE_SUPERUSER, PG_REMOTE_SUPERUSER_HOME, PG_REMOTE_CONNECT_TIMEOUT,
  PG_REMOTE_DRY_RUN, PG_REMOTE_CONFIG";

/// Minimum and maximum positional arguments per action.
fn arity(action: &str) -> Option<(usize, usize)> {
    match action {
        "user-exists" | "database-exists" => Some((1, 1)),
        "create-user" | "ensure-user" => Some((2, 2)),
        "create-database" | "ensure-database" => Some((2, 5)),
        "dump-database" => Some((2, 3)),
        "import-database" => Some((0, 1)),
        "set-password-file" => Some((3, 5)),
        _ => None,
    }
}

/// Whether `args` fit the action, checked before any configuration is read.
fn valid_invocation(action: &str, args: &[String]) -> bool {
    arity(action).is_some_and(|(min, max)| (min..=max).contains(&args.len()))
}

fn usage() -> ! {
    eprintln!("{}", USAGE);
    std::process::exit(2);
}

/// Positional argument `index`, or usage on absence.
fn required<'a>(args: &'a [String], index: usize) -> &'a str {
    args.get(index).map(String::as_str).unwrap_or_else(|| usage())
}

fn optional<'a>(args: &'a [String], index: usize) -> Option<&'a str> {
    args.get(index).map(String::as_str)
}

fn database_options(args: &[String], first: usize) -> DatabaseOptions {
    let mut options = DatabaseOptions::default();
    if let Some(template) = optional(args, first) {
        options.template = template.to_string();
    }
    if let Some(encoding) = optional(args, first + 1) {
        options.encoding = encoding.to_string();
    }
    if let Some(locale) = optional(args, first + 2) {
        options.locale = locale.to_string();
    }
    options
}

fn print_bool(value: bool) {
    println!("{}", value);
}

fn dispatch(remote: &dyn Remote, action: &str, args: &[String]) -> Result<()> {
    match action {
        "user-exists" => print_bool(admin::user_exists(remote, required(args, 0))?),
        "create-user" => admin::create_user(remote, required(args, 0), required(args, 1))?,
        "ensure-user" => {
            let created = admin::ensure_user(remote, required(args, 0), required(args, 1))?;
            info!(created, "Role ensured");
        }
        "database-exists" => print_bool(admin::database_exists(remote, required(args, 0))?),
        "create-database" => admin::create_database(
            remote,
            required(args, 0),
            required(args, 1),
            &database_options(args, 2),
        )?,
        "ensure-database" => {
            let created = admin::ensure_database(
                remote,
                required(args, 0),
                required(args, 1),
                &database_options(args, 2),
            )?;
            info!(created, "Database ensured");
        }
        "dump-database" => {
            let output = optional(args, 2).unwrap_or(DEFAULT_DUMP_FILE);
            let tmp = admin::dump_database(
                remote,
                required(args, 0),
                required(args, 1),
                Path::new(output),
            )?;
            info!(output, remote_path = %tmp, "Dump downloaded; remote copy left in place");
        }
        "import-database" => {
            let source = optional(args, 0).unwrap_or(DEFAULT_DUMP_FILE);
            let tmp = admin::import_database(remote, Path::new(source))?;
            println!("{}", tmp);
        }
        "set-password-file" => {
            let mut entry = PgPassEntry::new(required(args, 0), required(args, 1), required(args, 2));
            if let Some(host) = optional(args, 3) {
                entry = entry.host(host);
            }
            if let Some(port) = optional(args, 4) {
                entry = entry.port(port);
            }
            admin::set_password_file(remote, &entry)?;
        }
        _ => usage(),
    }
    Ok(())
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some((action, rest)) = args.split_first() else {
        usage();
    };
    if action == "-h" || action == "--help" {
        println!("{}", USAGE);
        return Ok(());
    }
    if !valid_invocation(action, rest) {
        usage();
    }

    let _guard = init_logging("pg-admin");
    let config = Config::load()?;

    if config.dry_run {
        info!(host = %config.host, "Dry run: no commands will be executed");
        return dispatch(&DryRunRemote, action, rest);
    }

    let remote = SshRemote::connect(&config)?;
    let result = dispatch(&remote, action, rest);
    if let Err(e) = remote.disconnect() {
        warn!(error = %e, "SSH disconnect failed");
    }
    result
}
