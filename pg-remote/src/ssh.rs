//! SSH transport
//!
//! Commands run over russh exec channels; files move over russh-sftp. The
//! `Remote` API is blocking, so each call drives a private current-thread
//! tokio runtime.

use crate::commands;
use crate::config::Config;
use crate::remote::{Remote, RemoteError, RemoteOutput, ShellCommand};
use anyhow::{anyhow, Context, Result};
use russh::client::{self, Handle};
use russh::keys::{check_known_hosts, load_secret_key, PrivateKeyWithHashAlg, PublicKey};
use russh::{ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Runtime;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// SSH_EXTENDED_DATA_STDERR
const STDERR_STREAM: u32 = 1;

/// Default keys tried when no identity or password is configured.
const DEFAULT_IDENTITIES: [&str; 3] = ["id_ed25519", "id_ecdsa", "id_rsa"];

/// Client handler that checks the server key against `~/.ssh/known_hosts`.
struct HostKeyCheck {
    host: String,
    port: u16,
    accept_unknown: bool,
}

impl client::Handler for HostKeyCheck {
    type Error = anyhow::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let known = check_known_hosts(&self.host, self.port, server_public_key);
        host_key_verdict(&self.host, known, self.accept_unknown)
    }
}

/// Decide whether to trust a server key given the known_hosts lookup.
fn host_key_verdict<E: fmt::Display>(
    host: &str,
    known: Result<bool, E>,
    accept_unknown: bool,
) -> Result<bool> {
    match known {
        Ok(true) => Ok(true),
        Ok(false) if accept_unknown => {
            warn!(host = %host, "Host not in known_hosts, accepting key");
            Ok(true)
        }
        Ok(false) => {
            warn!(host = %host, "Host not in known_hosts, rejecting key");
            Ok(false)
        }
        Err(e) => Err(anyhow!("Host key check failed for {}: {}", host, e)),
    }
}

#[derive(Debug)]
enum AuthMethod {
    Key(PathBuf),
    Password(SecretString),
}

/// Pick the configured identity, then a password, then a default key under `home`.
fn select_auth(config: &Config, home: Option<&Path>) -> Result<AuthMethod> {
    if let Some(identity) = &config.identity_file {
        return Ok(AuthMethod::Key(PathBuf::from(identity)));
    }
    if let Some(password) = &config.password {
        return Ok(AuthMethod::Password(password.clone()));
    }
    home.map(|home| home.join(".ssh"))
        .and_then(|dir| {
            DEFAULT_IDENTITIES
                .iter()
                .map(|name| dir.join(name))
                .find(|path| path.exists())
        })
        .map(AuthMethod::Key)
        .ok_or_else(|| {
            anyhow!("No SSH credentials: set PG_REMOTE_IDENTITY or PG_REMOTE_SSH_PASSWORD")
        })
}

/// Build the result of an exec channel. Without an exit status the command
/// was killed and counts as failed.
fn collect_output(stdout: &[u8], stderr: &[u8], exit_status: Option<u32>) -> RemoteOutput {
    let stdout = String::from_utf8_lossy(stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    let succeeded = exit_status == Some(0);

    // Remote programs report errors on stderr; keep it for failures.
    let output = if succeeded || stderr.is_empty() {
        stdout
    } else if stdout.is_empty() {
        stderr
    } else {
        format!("{}\n{}", stdout, stderr)
    };

    RemoteOutput { output, succeeded }
}

/// Command text executed as the superuser from its home directory.
pub fn superuser_command(superuser: &str, superuser_home: &str, command: &str) -> String {
    format!("cd {} && sudo -u {} {}", superuser_home, superuser, command)
}

/// [`Remote`] over a single authenticated SSH session.
pub struct SshRemote {
    runtime: Runtime,
    handle: Handle<HostKeyCheck>,
    destination: String,
    superuser: String,
    superuser_home: String,
}

impl SshRemote {
    /// Connect and authenticate.
    pub fn connect(config: &Config) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to start tokio runtime")?;

        let user = config.login_user();
        let home = std::env::var_os("HOME").map(PathBuf::from);
        let auth = select_auth(config, home.as_deref())?;
        let handle = runtime.block_on(open_session(config, &user, auth))?;

        info!(host = %config.host, port = config.port, user = %user, "SSH connected");

        Ok(Self {
            runtime,
            handle,
            destination: format!("{}@{}:{}", user, config.host, config.port),
            superuser: config.superuser.clone(),
            superuser_home: config.superuser_home.clone(),
        })
    }

    /// Close the session.
    pub fn disconnect(self) -> Result<()> {
        self.runtime.block_on(async {
            self.handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
                .context("Failed to disconnect")
        })
    }

    fn exec(&self, remote_command: &str, logged: &str) -> Result<RemoteOutput> {
        debug!(destination = %self.destination, command = %logged, "Running remote command");

        let output = self.runtime.block_on(async {
            let mut channel = self
                .handle
                .channel_open_session()
                .await
                .context("Failed to open SSH channel")?;
            channel
                .exec(true, remote_command)
                .await
                .context("Failed to start remote command")?;

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut exit_status = None;

            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                    ChannelMsg::ExtendedData { ref data, ext } if ext == STDERR_STREAM => {
                        stderr.extend_from_slice(data)
                    }
                    ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                    _ => {}
                }
            }

            Ok::<_, anyhow::Error>(collect_output(&stdout, &stderr, exit_status))
        })?;

        debug!(succeeded = output.succeeded, "Remote command finished");
        Ok(output)
    }

    async fn sftp(&self) -> Result<SftpSession> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .context("Failed to open SFTP channel")?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .context("Failed to request sftp subsystem")?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .context("Failed to start SFTP session")?;
        Ok(sftp)
    }

    fn transfer_error(from: &str, to: &str, e: anyhow::Error) -> anyhow::Error {
        RemoteError::TransferFailed {
            from: from.to_string(),
            to: to.to_string(),
            reason: format!("{:#}", e),
        }
        .into()
    }
}

async fn open_session(config: &Config, user: &str, auth: AuthMethod) -> Result<Handle<HostKeyCheck>> {
    let client_config = Arc::new(client::Config {
        inactivity_timeout: Some(Duration::from_secs(300)),
        ..Default::default()
    });
    let handler = HostKeyCheck {
        host: config.host.clone(),
        port: config.port,
        accept_unknown: config.accept_unknown_hosts,
    };

    let mut session = timeout(
        Duration::from_secs(config.connect_timeout),
        client::connect(client_config, (config.host.as_str(), config.port), handler),
    )
    .await
    .map_err(|_| anyhow!("Timed out connecting to {}:{}", config.host, config.port))?
    .context(format!("Failed to connect to {}:{}", config.host, config.port))?;

    let result = match auth {
        AuthMethod::Password(password) => session
            .authenticate_password(user, password.expose_secret().as_str())
            .await
            .context("Failed to authenticate with password")?,
        AuthMethod::Key(path) => {
            let passphrase = config
                .identity_passphrase
                .as_ref()
                .map(|p| p.expose_secret().as_str());
            let key = load_secret_key(&path, passphrase)
                .context(format!("Failed to load key {}", path.display()))?;
            let hash_alg = session.best_supported_rsa_hash().await?.flatten();
            session
                .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
                .await
                .context("Failed to authenticate with public key")?
        }
    };

    if !result.success() {
        anyhow::bail!("SSH authentication failed for {}@{}", user, config.host);
    }
    Ok(session)
}

impl Remote for SshRemote {
    fn run(&self, command: &ShellCommand) -> Result<RemoteOutput> {
        self.exec(command.as_str(), &command.redacted())
    }

    fn run_as_superuser(&self, command: &ShellCommand) -> Result<RemoteOutput> {
        self.exec(
            &superuser_command(&self.superuser, &self.superuser_home, command.as_str()),
            &superuser_command(&self.superuser, &self.superuser_home, &command.redacted()),
        )
    }

    fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        debug!(destination = %self.destination, local = %local.display(), remote = %remote, "Uploading");
        self.runtime
            .block_on(async {
                let data = tokio::fs::read(local)
                    .await
                    .context(format!("Failed to read {}", local.display()))?;
                let sftp = self.sftp().await?;
                let mut file = sftp.create(remote).await?;
                file.write_all(&data).await?;
                file.shutdown().await?;
                Ok::<_, anyhow::Error>(())
            })
            .map_err(|e| Self::transfer_error(&local.display().to_string(), remote, e))
    }

    fn download(&self, remote: &str, local: &Path) -> Result<()> {
        debug!(destination = %self.destination, remote = %remote, local = %local.display(), "Downloading");
        self.runtime
            .block_on(async {
                let sftp = self.sftp().await?;
                let data = sftp.read(remote).await?;
                tokio::fs::write(local, data)
                    .await
                    .context(format!("Failed to write {}", local.display()))?;
                Ok::<_, anyhow::Error>(())
            })
            .map_err(|e| Self::transfer_error(remote, &local.display().to_string(), e))
    }

    fn append_line_if_absent(&self, remote_path: &str, line: &str) -> Result<()> {
        let cmd = commands::append_line_if_absent(remote_path, line);
        self.run(&cmd)?.into_checked(&cmd)?;
        Ok(())
    }
}

/// [`Remote`] that logs what it would do and reports success.
#[derive(Debug, Default, Clone)]
pub struct DryRunRemote;

impl Remote for DryRunRemote {
    fn run(&self, command: &ShellCommand) -> Result<RemoteOutput> {
        info!(command = %command, "[dry-run] run");
        Ok(RemoteOutput::success(""))
    }

    fn run_as_superuser(&self, command: &ShellCommand) -> Result<RemoteOutput> {
        info!(command = %command, "[dry-run] run as superuser");
        Ok(RemoteOutput::success(""))
    }

    fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        info!(local = %local.display(), remote = %remote, "[dry-run] upload");
        Ok(())
    }

    fn download(&self, remote: &str, local: &Path) -> Result<()> {
        info!(remote = %remote, local = %local.display(), "[dry-run] download");
        Ok(())
    }

    fn append_line_if_absent(&self, remote_path: &str, _line: &str) -> Result<()> {
        info!(path = %remote_path, "[dry-run] append line if absent");
        Ok(())
    }
}
