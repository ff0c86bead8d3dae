//! Remote execution capability
//!
//! Every admin operation receives a [`Remote`] explicitly; there is no ambient
//! connection. A non-zero remote exit is reported in [`RemoteOutput`], while `Err`
//! is reserved for transport failures.

use anyhow::Result;
use std::fmt;
use std::path::Path;
use thiserror::Error;

const REDACTED: &str = "********";

/// Shell text to run on the remote host, plus the substrings that must not be logged.
#[derive(Clone, PartialEq, Eq)]
pub struct ShellCommand {
    text: String,
    secrets: Vec<String>,
}

impl ShellCommand {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            secrets: Vec::new(),
        }
    }

    /// Mark `secret` as sensitive. The executed text is unchanged.
    ///
    /// Every occurrence of `secret` is masked in logs, so pass the whole
    /// interpolated span (quotes included), not a bare value.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        let secret = secret.into();
        if !secret.is_empty() {
            self.secrets.push(secret);
        }
        self
    }

    /// Exact text sent to the remote shell.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Text safe for logs and error messages.
    pub fn redacted(&self) -> String {
        self.secrets
            .iter()
            .fold(self.text.clone(), |text, secret| text.replace(secret, REDACTED))
    }
}

impl fmt::Display for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl fmt::Debug for ShellCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ShellCommand").field(&self.redacted()).finish()
    }
}

/// Captured output of a remote command and whether it exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub output: String,
    pub succeeded: bool,
}

impl RemoteOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            succeeded: true,
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            succeeded: false,
        }
    }

    /// Turn an unsuccessful result into [`RemoteError::CommandFailed`].
    pub fn into_checked(self, command: &ShellCommand) -> Result<String> {
        if self.succeeded {
            Ok(self.output)
        } else {
            Err(RemoteError::CommandFailed {
                command: command.redacted(),
                output: self.output,
            }
            .into())
        }
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote command failed: {command}: {output}")]
    CommandFailed { command: String, output: String },

    #[error("transfer {from} -> {to} failed: {reason}")]
    TransferFailed {
        from: String,
        to: String,
        reason: String,
    },
}

/// Capabilities a host environment must supply to administer a remote server.
pub trait Remote {
    /// Run a command as the connecting user.
    fn run(&self, command: &ShellCommand) -> Result<RemoteOutput>;

    /// Run a command as the database superuser, from its home directory.
    fn run_as_superuser(&self, command: &ShellCommand) -> Result<RemoteOutput>;

    /// Copy a local file to the remote host.
    fn upload(&self, local: &Path, remote: &str) -> Result<()>;

    /// Copy a remote file to the local machine.
    fn download(&self, remote: &str, local: &Path) -> Result<()>;

    /// Append `line` to `remote_path` unless an identical line is already present.
    fn append_line_if_absent(&self, remote_path: &str, line: &str) -> Result<()>;
}

impl<R: Remote + ?Sized> Remote for &R {
    fn run(&self, command: &ShellCommand) -> Result<RemoteOutput> {
        (**self).run(command)
    }

    fn run_as_superuser(&self, command: &ShellCommand) -> Result<RemoteOutput> {
        (**self).run_as_superuser(command)
    }

    fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        (**self).upload(local, remote)
    }

    fn download(&self, remote: &str, local: &Path) -> Result<()> {
        (**self).download(remote, local)
    }

    fn append_line_if_absent(&self, remote_path: &str, line: &str) -> Result<()> {
        (**self).append_line_if_absent(remote_path, line)
    }
}

impl<R: Remote + ?Sized> Remote for Box<R> {
    fn run(&self, command: &ShellCommand) -> Result<RemoteOutput> {
        (**self).run(command)
    }

    fn run_as_superuser(&self, command: &ShellCommand) -> Result<RemoteOutput> {
        (**self).run_as_superuser(command)
    }

    fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        (**self).upload(local, remote)
    }

    fn download(&self, remote: &str, local: &Path) -> Result<()> {
        (**self).download(remote, local)
    }

    fn append_line_if_absent(&self, remote_path: &str, line: &str) -> Result<()> {
        (**self).append_line_if_absent(remote_path, line)
    }
}
