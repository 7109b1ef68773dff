//! Stream transports
//!
//! A transport decides where the receiving side of a replication stream
//! runs. The transfer engine hands it the local `zfs receive` command and
//! gets back the command that should consume the stream.

use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use super::types::{ReceiveConfig, RemoteConfig};
use crate::command::{CommandSpec, Program};
use crate::error::{ErrorCode, RodentError, Result};

/// Where a replication stream is received
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Short label for logs and error metadata
    fn name(&self) -> &'static str;

    /// The command that consumes the stream for a given receive command
    async fn prepare(&self, receive: CommandSpec) -> Result<CommandSpec>;
}

/// Pick the transport for a receive request
pub fn transport_for(config: &ReceiveConfig) -> Box<dyn StreamTransport> {
    match &config.remote_config {
        Some(remote) => Box::new(SshTransport::new(remote.clone())),
        None => Box::new(LocalTransport),
    }
}

// =============================================================================
// Local
// =============================================================================

/// Receive on this host
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

#[async_trait]
impl StreamTransport for LocalTransport {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn prepare(&self, receive: CommandSpec) -> Result<CommandSpec> {
        Ok(receive)
    }
}

// =============================================================================
// SSH
// =============================================================================

/// Receive on a remote host through the system ssh client
#[derive(Debug, Clone)]
pub struct SshTransport {
    remote: RemoteConfig,
}

impl SshTransport {
    pub fn new(remote: RemoteConfig) -> Self {
        Self { remote }
    }

    fn destination(&self) -> Result<String> {
        check_endpoint("host", &self.remote.host)?;
        check_endpoint("user", &self.remote.user)?;
        if self.remote.user.contains('@') {
            return Err(invalid(format!("invalid ssh user {:?}", self.remote.user)));
        }
        Ok(format!("{}@{}", self.remote.user, self.remote.host))
    }

    async fn check_key(&self) -> Result<()> {
        let key = &self.remote.private_key;
        match tokio::fs::metadata(key).await {
            Ok(meta) if meta.is_file() => Ok(()),
            Ok(_) => Err(invalid(format!("{} is not a file", key.display()))),
            Err(e) => Err(RodentError::from_error(&e, ErrorCode::CommandInvalidInput)
                .with_metadata("private_key", key.display().to_string())),
        }
    }

    /// The remote command line, quoted for the remote shell
    fn remote_command(&self, receive: &CommandSpec) -> String {
        let mut words: Vec<&str> = Vec::new();
        if self.remote.use_sudo {
            words.extend(["sudo", "-n"]);
        }
        words.push(receive.program().name());
        words.extend(receive.arguments().iter().map(String::as_str));

        words
            .into_iter()
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl StreamTransport for SshTransport {
    fn name(&self) -> &'static str {
        "ssh"
    }

    async fn prepare(&self, receive: CommandSpec) -> Result<CommandSpec> {
        let destination = self.destination()?;
        self.check_key().await?;

        let host_key_check = if self.remote.skip_host_key_check {
            "no"
        } else {
            "yes"
        };
        let known_hosts = if self.remote.skip_host_key_check {
            Some("/dev/null".to_string())
        } else {
            self.remote
                .known_hosts_file
                .as_deref()
                .map(|p: &Path| p.display().to_string())
        };

        let spec = CommandSpec::new(Program::Ssh)
            .arg("-i")
            .arg(self.remote.private_key.display().to_string())
            .arg("-p")
            .arg(self.remote.port.to_string())
            .args(["-o", "BatchMode=yes"])
            .arg("-o")
            .arg(format!("StrictHostKeyChecking={}", host_key_check))
            .option(
                "-o",
                known_hosts.map(|path| format!("UserKnownHostsFile={}", path)),
            )
            .arg("--")
            .arg(destination)
            .arg(self.remote_command(&receive));

        debug!("Remote receive via ssh to {}", self.remote.host);
        Ok(spec)
    }
}

fn invalid(details: String) -> RodentError {
    RodentError::new(ErrorCode::CommandInvalidInput, details)
}

fn check_endpoint(what: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value.starts_with('-')
        || value.contains(|c: char| c.is_whitespace() || c.is_control())
    {
        return Err(invalid(format!("invalid ssh {} {:?}", what, value)));
    }
    Ok(())
}

/// Quote a word for a POSIX shell unless it is plainly safe
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '=' | ':' | '@' | ',' | '+' | '%'));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
